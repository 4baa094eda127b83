//! Merging of blocks.
//!
//! Two rewrites, applied in one post-order walk over each function:
//!
//! * *flattening*: an anonymous block appearing in a parent block's list is
//!   replaced by its contents, and a `drop (block ...)` is rewritten so the
//!   drop applies to the block's tail, which lets the block flatten on the
//!   next round;
//! * *hoisting*: a non-block expression whose operand is an anonymous
//!   multi-element block is rewritten so the block wraps the expression,
//!   `(op (block A B C))` becoming `(block A B (op C))`.
//!
//! Both rewrites leave execution order, types, and label resolution intact.
//! Code that does not fall through is never relocated; a prior dead-code
//! pass is expected to have cleaned it up.

use tracing::trace;
use crate::builder::Builder;
use crate::effects::{EffectAnalyzer, EffectOracle};
use crate::ir::{ExprId, ExprKind, Function, Label};
use crate::pass::{Pass, PassOptions};
use crate::types::Type;
use crate::visit::{rewrite_function, rewrite_subtree, Rewriter};

/// The block-merging pass.
pub struct MergeBlocks {
  oracle: Box<dyn EffectOracle>,
}

impl MergeBlocks {
  /// Create the pass with the default effect analyzer.
  #[must_use] pub fn new() -> Self {
    MergeBlocks { oracle: Box::new(EffectAnalyzer) }
  }

  /// Create the pass with a custom effect oracle.
  #[must_use] pub fn with_oracle(oracle: Box<dyn EffectOracle>) -> Self {
    MergeBlocks { oracle }
  }
}

impl Default for MergeBlocks {
  fn default() -> Self { Self::new() }
}

/// The pass factory.
#[must_use] pub fn create() -> Box<dyn Pass> { Box::new(MergeBlocks::new()) }

impl Pass for MergeBlocks {
  fn name(&self) -> &'static str { "merge-blocks" }

  fn run_function(&self, options: &PassOptions, func: &mut Function) {
    let mut merger = Merger { oracle: &*self.oracle, options };
    rewrite_function(func, &mut merger);
  }
}

fn block_list(func: &Function, id: ExprId) -> &[ExprId] {
  match &func[id].kind {
    ExprKind::Block { list, .. } => list,
    _ => panic!("expected a block"),
  }
}

fn block_list_mut(func: &mut Function, id: ExprId) -> &mut Vec<ExprId> {
  match &mut func[id].kind {
    ExprKind::Block { list, .. } => list,
    _ => panic!("expected a block"),
  }
}

fn block_name(func: &Function, id: ExprId) -> Option<Label> {
  match &func[id].kind {
    ExprKind::Block { name, .. } => *name,
    _ => panic!("expected a block"),
  }
}

/// Does the block directly contain an element that never falls through?
/// Such blocks are left exactly where they are: moving them could change
/// types, and the code after the offending element is dead anyway.
fn has_unreachable_child(func: &Function, block: ExprId) -> bool {
  block_list(func, block).iter().any(|&c| func[c].ty == Type::Unreachable)
}

/// Flatten the children of `parent`, a block, to a fixed point.
///
/// Each round scans the list once. An anonymous child block is spliced into
/// the list; a `drop (block ...)` child has the drop sunk onto the block's
/// tail, turning it into a plain child block for the next round.
fn optimize_block(
  func: &mut Function, parent: ExprId, oracle: &dyn EffectOracle, options: &PassOptions,
) {
  let original_ty = func[parent].ty;
  let mut changed = false;
  let mut more = true;
  while more {
    more = false;
    let mut i = 0;
    while i < block_list(func, parent).len() {
      let child = block_list(func, parent)[i];
      let mut advance = true;
      match &func[child].kind {
        ExprKind::Block { name, .. } => {
          if name.is_none() && !has_unreachable_child(func, child) {
            trace!(parent = %parent, child = %child, "splicing block into parent");
            splice_child(func, parent, i, child);
            redrop_middles(func, parent);
            changed = true;
            more = true;
            break;
          }
        }
        ExprKind::Drop { value } => {
          let inner = *value;
          if matches!(func[inner].kind, ExprKind::Block { .. })
            && sink_drop(func, child, inner, oracle, options)
          {
            block_list_mut(func, parent)[i] = inner;
            changed = true;
            more = true;
            // the slot now holds the block itself; rescan it
            advance = false;
          }
        }
        _ => {}
      }
      if advance {
        i += 1;
      }
    }
  }
  if changed {
    func.finalize_to(parent, original_ty);
  }
}

/// Replace `parent.list[i]` (the block `child`) with `child`'s contents.
fn splice_child(func: &mut Function, parent: ExprId, i: usize, child: ExprId) {
  let inner = std::mem::take(block_list_mut(func, child));
  block_list_mut(func, parent).splice(i..=i, inner);
}

/// After a splice, non-tail elements may carry concrete values; wrap them
/// in drops so only the tail produces the block's value.
fn redrop_middles(func: &mut Function, parent: ExprId) {
  let list = block_list(func, parent).to_vec();
  if list.is_empty() {
    return;
  }
  for (j, &item) in list[..list.len() - 1].iter().enumerate() {
    if func[item].ty.is_concrete() {
      let dropped = Builder::new(func).make_drop(item);
      block_list_mut(func, parent)[j] = dropped;
    }
  }
}

/// Try to rewrite `drop (block ...)` so the drop applies to the block's
/// tail element. On success the caller installs `inner` (now typed `none`)
/// where the drop used to be; the drop node is reused as the new tail.
///
/// A labeled block can only be rewritten if every break targeting it can
/// lose its value; see [`ProblemFinder`].
fn sink_drop(
  func: &mut Function, drop: ExprId, inner: ExprId,
  oracle: &dyn EffectOracle, options: &PassOptions,
) -> bool {
  if block_list(func, inner).is_empty() || has_unreachable_child(func, inner) {
    return false;
  }
  if let Some(label) = block_name(func, inner) {
    let mut finder = ProblemFinder::new(label, oracle, options);
    finder.scan(func, inner);
    if finder.found() {
      return false;
    }
    let mut stripper = BreakValueStripper { origin: label, oracle, options };
    let root = rewrite_subtree(func, inner, &mut stripper);
    assert_eq!(root, inner, "stripping must not replace the block itself");
  }
  trace!(block = %inner, "sinking drop into block tail");
  let tail = *block_list(func, inner).last().expect("nonempty list");
  match &mut func[drop].kind {
    ExprKind::Drop { value } => *value = tail,
    _ => panic!("expected a drop"),
  }
  func.finalize(drop);
  *block_list_mut(func, inner).last_mut().expect("nonempty list") = drop;
  func.finalize(inner);
  true
}

/// Decides whether the value can be removed from every break targeting a
/// label. Removal is impossible when a carried value has side effects (it
/// would be evaluated in a different position), when a switch targets the
/// label (switch values cannot be stripped), or when some conditional
/// break's flowed value is consumed rather than dropped.
struct ProblemFinder<'a> {
  origin: Label,
  br_ifs: u32,
  dropped_br_ifs: u32,
  problem: bool,
  oracle: &'a dyn EffectOracle,
  options: &'a PassOptions,
}

impl<'a> ProblemFinder<'a> {
  fn new(origin: Label, oracle: &'a dyn EffectOracle, options: &'a PassOptions) -> Self {
    ProblemFinder { origin, br_ifs: 0, dropped_br_ifs: 0, problem: false, oracle, options }
  }

  fn scan(&mut self, func: &Function, id: ExprId) {
    match &func[id].kind {
      ExprKind::Break { name, condition, value } if *name == self.origin => {
        if condition.is_some() {
          self.br_ifs += 1;
        }
        if let Some(v) = *value {
          if self.oracle.analyze(self.options, func, v).has_side_effects() {
            self.problem = true;
          }
        }
      }
      ExprKind::Drop { value } => {
        if let ExprKind::Break { name, condition: Some(_), .. } = func[*value].kind {
          if name == self.origin {
            self.dropped_br_ifs += 1;
          }
        }
      }
      ExprKind::Switch { names, default, .. } => {
        if *default == self.origin || names.contains(&self.origin) {
          self.problem = true;
        }
      }
      _ => {}
    }
    for c in func.children(id) {
      self.scan(func, c);
    }
  }

  fn found(&self) -> bool {
    assert!(self.br_ifs >= self.dropped_br_ifs);
    self.problem || self.br_ifs > self.dropped_br_ifs
  }
}

/// Rewrites every break-with-value targeting `origin` into
/// `(block (drop value) (br ...))`, dropping the value in place. A break
/// whose value does not fall through is replaced by the value itself. Any
/// drop left holding a `none`-typed child disappears, and every visited
/// block is re-flattened so the new sequences merge immediately.
struct BreakValueStripper<'a> {
  origin: Label,
  oracle: &'a dyn EffectOracle,
  options: &'a PassOptions,
}

impl Rewriter for BreakValueStripper<'_> {
  fn visit(&mut self, func: &mut Function, id: ExprId) -> ExprId {
    match &func[id].kind {
      &ExprKind::Break { name, value: Some(v), .. } if name == self.origin => {
        if func[v].ty == Type::Unreachable {
          // the break is never reached; the value replaces it outright
          return v;
        }
        match &mut func[id].kind {
          ExprKind::Break { value, .. } => *value = None,
          _ => unreachable!(),
        }
        func.finalize(id);
        let mut b = Builder::new(func);
        let dropped = b.make_drop(v);
        b.make_sequence(dropped, id)
      }
      &ExprKind::Drop { value } if func[value].ty == Type::None => value,
      ExprKind::Block { .. } => {
        optimize_block(func, id, self.oracle, self.options);
        id
      }
      _ => id,
    }
  }
}

/// A child slot of an expression, named so rewrites can read and write it
/// without holding a borrow of the node.
#[derive(Clone, Copy, Debug)]
enum Slot {
  /// The `value` operand (also a break's or switch's carried value).
  Value,
  /// The address operand of a memory access.
  Ptr,
  /// A binary operation's left operand.
  Left,
  /// A binary operation's right operand.
  Right,
  /// A break's or switch's condition.
  Condition,
  /// The `i`th operand of a call, select, or compare-exchange.
  Operand(usize),
  /// An indirect call's target index.
  Target,
}

fn get_slot(func: &Function, parent: ExprId, slot: Slot) -> Option<ExprId> {
  match (&func[parent].kind, slot) {
    (ExprKind::SetLocal { value, .. }, Slot::Value)
    | (ExprKind::Drop { value }, Slot::Value)
    | (ExprKind::Unary { value, .. }, Slot::Value)
    | (ExprKind::Store { value, .. }, Slot::Value)
    | (ExprKind::AtomicRMW { value, .. }, Slot::Value) => Some(*value),
    (ExprKind::Return { value }, Slot::Value)
    | (ExprKind::Break { value, .. }, Slot::Value)
    | (ExprKind::Switch { value, .. }, Slot::Value) => *value,
    (ExprKind::Break { condition, .. }, Slot::Condition) => *condition,
    (ExprKind::Switch { condition, .. }, Slot::Condition) => Some(*condition),
    (ExprKind::Load { ptr, .. }, Slot::Ptr)
    | (ExprKind::Store { ptr, .. }, Slot::Ptr)
    | (ExprKind::AtomicRMW { ptr, .. }, Slot::Ptr) => Some(*ptr),
    (ExprKind::Binary { left, .. }, Slot::Left) => Some(*left),
    (ExprKind::Binary { right, .. }, Slot::Right) => Some(*right),
    (ExprKind::Select { if_true, .. }, Slot::Operand(0)) => Some(*if_true),
    (ExprKind::Select { if_false, .. }, Slot::Operand(1)) => Some(*if_false),
    (ExprKind::Select { condition, .. }, Slot::Operand(2)) => Some(*condition),
    (ExprKind::AtomicCmpxchg { ptr, .. }, Slot::Operand(0)) => Some(*ptr),
    (ExprKind::AtomicCmpxchg { expected, .. }, Slot::Operand(1)) => Some(*expected),
    (ExprKind::AtomicCmpxchg { replacement, .. }, Slot::Operand(2)) => Some(*replacement),
    (ExprKind::Call { operands, .. }, Slot::Operand(i))
    | (ExprKind::CallImport { operands, .. }, Slot::Operand(i))
    | (ExprKind::CallIndirect { operands, .. }, Slot::Operand(i)) => Some(operands[i]),
    (ExprKind::CallIndirect { target, .. }, Slot::Target) => Some(*target),
    _ => panic!("no such slot"),
  }
}

fn set_slot(func: &mut Function, parent: ExprId, slot: Slot, new: ExprId) {
  match (&mut func[parent].kind, slot) {
    (ExprKind::SetLocal { value, .. }, Slot::Value)
    | (ExprKind::Drop { value }, Slot::Value)
    | (ExprKind::Unary { value, .. }, Slot::Value)
    | (ExprKind::Store { value, .. }, Slot::Value)
    | (ExprKind::AtomicRMW { value, .. }, Slot::Value) => *value = new,
    (ExprKind::Return { value }, Slot::Value)
    | (ExprKind::Break { value, .. }, Slot::Value)
    | (ExprKind::Switch { value, .. }, Slot::Value) =>
      *value.as_mut().expect("slot is empty") = new,
    (ExprKind::Break { condition, .. }, Slot::Condition) =>
      *condition.as_mut().expect("slot is empty") = new,
    (ExprKind::Switch { condition, .. }, Slot::Condition) => *condition = new,
    (ExprKind::Load { ptr, .. }, Slot::Ptr)
    | (ExprKind::Store { ptr, .. }, Slot::Ptr)
    | (ExprKind::AtomicRMW { ptr, .. }, Slot::Ptr) => *ptr = new,
    (ExprKind::Binary { left, .. }, Slot::Left) => *left = new,
    (ExprKind::Binary { right, .. }, Slot::Right) => *right = new,
    (ExprKind::Select { if_true, .. }, Slot::Operand(0)) => *if_true = new,
    (ExprKind::Select { if_false, .. }, Slot::Operand(1)) => *if_false = new,
    (ExprKind::Select { condition, .. }, Slot::Operand(2)) => *condition = new,
    (ExprKind::AtomicCmpxchg { ptr, .. }, Slot::Operand(0)) => *ptr = new,
    (ExprKind::AtomicCmpxchg { expected, .. }, Slot::Operand(1)) => *expected = new,
    (ExprKind::AtomicCmpxchg { replacement, .. }, Slot::Operand(2)) => *replacement = new,
    (ExprKind::Call { operands, .. }, Slot::Operand(i))
    | (ExprKind::CallImport { operands, .. }, Slot::Operand(i))
    | (ExprKind::CallIndirect { operands, .. }, Slot::Operand(i)) => operands[i] = new,
    (ExprKind::CallIndirect { target, .. }, Slot::Target) => *target = new,
    _ => panic!("no such slot"),
  }
}

/// The per-kind hoisting driver. Dispatches each visited expression to its
/// hoistable operand slots, in evaluation order.
struct Merger<'a> {
  oracle: &'a dyn EffectOracle,
  options: &'a PassOptions,
}

impl Rewriter for Merger<'_> {
  fn visit(&mut self, func: &mut Function, id: ExprId) -> ExprId {
    match &func[id].kind {
      ExprKind::Block { .. } => {
        optimize_block(func, id, self.oracle, self.options);
        id
      }
      ExprKind::SetLocal { .. } | ExprKind::Drop { .. } | ExprKind::Unary { .. }
      | ExprKind::Return { .. } => self.drive(func, id, &[Slot::Value]),
      ExprKind::Load { .. } => self.drive(func, id, &[Slot::Ptr]),
      ExprKind::Binary { .. } => self.drive(func, id, &[Slot::Left, Slot::Right]),
      ExprKind::Store { .. } | ExprKind::AtomicRMW { .. } =>
        self.drive(func, id, &[Slot::Ptr, Slot::Value]),
      ExprKind::Break { .. } | ExprKind::Switch { .. } =>
        self.drive(func, id, &[Slot::Value, Slot::Condition]),
      ExprKind::Select { .. } | ExprKind::AtomicCmpxchg { .. } => self.drive_effectless(
        func, id, &[Slot::Operand(0), Slot::Operand(1), Slot::Operand(2)],
      ),
      ExprKind::Call { operands, .. } | ExprKind::CallImport { operands, .. } => {
        let slots: Vec<Slot> = (0..operands.len()).map(Slot::Operand).collect();
        self.drive_effectless(func, id, &slots)
      }
      ExprKind::CallIndirect { operands, .. } => {
        let mut slots: Vec<Slot> = (0..operands.len()).map(Slot::Operand).collect();
        slots.push(Slot::Target);
        self.drive_effectless(func, id, &slots)
      }
      _ => id,
    }
  }
}

impl Merger<'_> {
  /// Hoist each slot in order. When a later slot is hoisted past an earlier
  /// one that stayed in place, the earlier operand is the *dependency*: its
  /// effects must not invalidate the hoisted block's.
  fn drive(&mut self, func: &mut Function, id: ExprId, slots: &[Slot]) -> ExprId {
    let mut outer = None;
    for (n, &slot) in slots.iter().enumerate() {
      let dependency = if n == 0 { None } else { get_slot(func, id, slots[n - 1]) };
      outer = self.hoist(func, id, slot, outer, dependency);
    }
    outer.unwrap_or(id)
  }

  /// Hoist each slot in order, but only if no operand has side effects at
  /// all. Tracking cross-operand dependencies precisely for three or more
  /// operands is not worth it yet; see the pass tests for the boundary.
  fn drive_effectless(&mut self, func: &mut Function, id: ExprId, slots: &[Slot]) -> ExprId {
    for &slot in slots {
      if let Some(c) = get_slot(func, id, slot) {
        if self.oracle.analyze(self.options, func, c).has_side_effects() {
          return id;
        }
      }
    }
    let mut outer = None;
    for &slot in slots {
      outer = self.hoist(func, id, slot, outer, None);
    }
    outer.unwrap_or(id)
  }

  /// Try to hoist the block in `slot` out of `parent`:
  /// `(op (block A B C))` becomes `(block A B (op C))`.
  ///
  /// The first hoisted operand's block is reused as the outer block; later
  /// operands append their non-tail prefix to it, keeping operand order.
  /// Returns the outer block, if any rewrite has happened for this parent.
  fn hoist(
    &mut self, func: &mut Function, parent: ExprId, slot: Slot,
    outer: Option<ExprId>, dependency: Option<ExprId>,
  ) -> Option<ExprId> {
    let child = match get_slot(func, parent, slot) {
      Some(c) => c,
      None => return outer,
    };
    let (name, len) = match &func[child].kind {
      ExprKind::Block { name, list } => (*name, list.len()),
      _ => return outer,
    };
    if name.is_some() || len < 2 {
      return outer;
    }
    if has_unreachable_child(func, child) {
      // relocating code that does not fall through could change types
      return outer;
    }
    let back = *block_list(func, child).last().expect("len >= 2");
    if func[back].ty == Type::Unreachable {
      // the parent is effectively dead; leave it for dce
      return outer;
    }
    if func[child].ty != func[back].ty {
      return outer;
    }
    if let Some(dep) = dependency {
      let child_effects = self.oracle.analyze(self.options, func, child);
      if self.oracle.analyze(self.options, func, dep).invalidates(&child_effects) {
        return outer;
      }
    }
    trace!(parent = %parent, block = %child, "hoisting block out of operand position");
    set_slot(func, parent, slot, back);
    match outer {
      None => {
        // reuse the block: its tail slot now holds the parent expression
        let parent_ty = func[parent].ty;
        *block_list_mut(func, child).last_mut().expect("len >= 2") = parent;
        func.finalize_to(child, parent_ty);
        Some(child)
      }
      Some(outer_id) => {
        let mut prefix = block_list(func, child).to_vec();
        prefix.pop();
        let list = block_list_mut(func, outer_id);
        let popped = list.pop();
        assert_eq!(popped, Some(parent), "outer block must end with the rewritten expression");
        list.extend(prefix);
        list.push(parent);
        outer
      }
    }
  }
}
