//! Side-effect analysis.
//!
//! The optimizer never inspects expressions for effects directly; it asks
//! an [`EffectOracle`]. The default oracle, [`EffectAnalyzer`], computes a
//! conservative [`Effects`] summary by walking the subtree. Branches are
//! only reported when they escape the analyzed subtree: a break whose
//! target block is inside the subtree is invisible from the outside.

use std::collections::HashSet;
use bitflags::bitflags;
use crate::ir::{ExprId, ExprKind, Function, Label, LocalId};
use crate::pass::PassOptions;

bitflags! {
  /// Effect categories without an index component.
  struct EffectFlags: u8 {
    /// The subtree reads linear memory.
    const READS_MEMORY = 1;
    /// The subtree writes linear memory.
    const WRITES_MEMORY = 2;
    /// The subtree calls a function, which may do anything to memory.
    const CALLS = 4;
    /// The subtree may return from the enclosing function.
    const RETURNS = 8;
    /// The subtree may trap.
    const TRAPS = 16;
  }
}

/// A summary of what a subtree may do, queried by rewrites that reorder or
/// relocate code.
#[derive(Clone, Debug)]
pub struct Effects {
  flags: EffectFlags,
  branch_targets: HashSet<Label>,
  locals_read: HashSet<LocalId>,
  locals_written: HashSet<LocalId>,
}

impl Effects {
  fn none() -> Self {
    Effects {
      flags: EffectFlags::empty(),
      branch_targets: HashSet::new(),
      locals_read: HashSet::new(),
      locals_written: HashSet::new(),
    }
  }

  /// Does the subtree read linear memory?
  #[must_use] pub fn reads_memory(&self) -> bool {
    self.flags.contains(EffectFlags::READS_MEMORY)
  }

  /// Does the subtree write linear memory?
  #[must_use] pub fn writes_memory(&self) -> bool {
    self.flags.contains(EffectFlags::WRITES_MEMORY)
  }

  /// Does the subtree read or write linear memory?
  #[must_use] pub fn accesses_memory(&self) -> bool {
    self.reads_memory() || self.writes_memory()
  }

  /// Does the subtree call a function?
  #[must_use] pub fn calls(&self) -> bool { self.flags.contains(EffectFlags::CALLS) }

  /// May the subtree trap?
  #[must_use] pub fn traps(&self) -> bool { self.flags.contains(EffectFlags::TRAPS) }

  /// May control leave the subtree by a break, switch, or return?
  #[must_use] pub fn branches(&self) -> bool {
    self.flags.contains(EffectFlags::RETURNS) || !self.branch_targets.is_empty()
  }

  /// Is executing the subtree observable at all (beyond producing a value)?
  #[must_use] pub fn has_side_effects(&self) -> bool {
    self.writes_memory()
      || self.calls()
      || self.branches()
      || self.traps()
      || !self.locals_written.is_empty()
  }

  /// Would executing `self` first invalidate moving `other` before it?
  ///
  /// Used when code that ran after `self` is about to be reordered to run
  /// before it. Conservative: any doubt reports a conflict.
  #[must_use] pub fn invalidates(&self, other: &Effects) -> bool {
    if (self.branches() && other.has_side_effects())
      || (other.branches() && self.has_side_effects())
    {
      return true;
    }
    if (self.traps() && other.has_side_effects())
      || (other.traps() && self.has_side_effects())
    {
      return true;
    }
    if self.writes_memory() && other.accesses_memory() {
      return true;
    }
    if other.writes_memory() && self.reads_memory() {
      return true;
    }
    self
      .locals_written
      .iter()
      .any(|l| other.locals_read.contains(l) || other.locals_written.contains(l))
      || other.locals_written.iter().any(|l| self.locals_read.contains(l))
  }
}

/// The effect-analysis seam consumed by the optimizer. Implementations must
/// be side-effect-free; a single oracle is shared across worker threads.
pub trait EffectOracle: Sync {
  /// Summarize the effects of the subtree rooted at `expr`.
  fn analyze(&self, options: &PassOptions, func: &Function, expr: ExprId) -> Effects;
}

/// The default effect oracle.
#[derive(Clone, Copy, Debug, Default)]
pub struct EffectAnalyzer;

impl EffectOracle for EffectAnalyzer {
  fn analyze(&self, options: &PassOptions, func: &Function, expr: ExprId) -> Effects {
    let mut eff = Effects::none();
    scan(options, func, expr, &mut eff);
    eff
  }
}

fn scan(options: &PassOptions, func: &Function, id: ExprId, eff: &mut Effects) {
  let implicit_trap = if options.ignore_implicit_traps {
    EffectFlags::empty()
  } else {
    EffectFlags::TRAPS
  };
  let mut own_label = None;
  match &func[id].kind {
    ExprKind::Nop | ExprKind::Const(_) => {}
    ExprKind::Unreachable => eff.flags |= EffectFlags::TRAPS,
    ExprKind::GetLocal { index } => { eff.locals_read.insert(*index); }
    ExprKind::SetLocal { index, .. } => { eff.locals_written.insert(*index); }
    ExprKind::Block { name, .. } => own_label = *name,
    ExprKind::Break { name, .. } => { eff.branch_targets.insert(*name); }
    ExprKind::Switch { names, default, .. } => {
      eff.branch_targets.extend(names.iter().copied());
      eff.branch_targets.insert(*default);
    }
    ExprKind::Return { .. } => eff.flags |= EffectFlags::RETURNS,
    ExprKind::Load { .. } => eff.flags |= EffectFlags::READS_MEMORY | implicit_trap,
    ExprKind::Store { .. } => eff.flags |= EffectFlags::WRITES_MEMORY | implicit_trap,
    ExprKind::AtomicRMW { .. } | ExprKind::AtomicCmpxchg { .. } =>
      eff.flags |= EffectFlags::READS_MEMORY | EffectFlags::WRITES_MEMORY | implicit_trap,
    ExprKind::Call { .. } | ExprKind::CallImport { .. } | ExprKind::CallIndirect { .. } =>
      eff.flags |= EffectFlags::CALLS
        | EffectFlags::READS_MEMORY
        | EffectFlags::WRITES_MEMORY
        | implicit_trap,
    ExprKind::Drop { .. } | ExprKind::Unary { .. } | ExprKind::Binary { .. } |
    ExprKind::Select { .. } => {}
  }
  for c in func.children(id) {
    scan(options, func, c, eff);
  }
  // breaks to this block do not escape it
  if let Some(label) = own_label {
    eff.branch_targets.remove(&label);
  }
}
