//! The expression tree IR: a flat arena of nodes per function, with child
//! edges stored as [`ExprId`] indices into the arena.
//!
//! Rewrites mutate child slots and list orderings in place; a node removed
//! from the tree simply becomes unreachable from the body and is reclaimed
//! when the function is dropped or rebuilt.

use std::ops::{Index, IndexMut};
use crate::types::{AtomicOp, Binop, Literal, Type, Unop};

/// An expression ID, used to look up nodes in a [`Function`]'s arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ExprId(u32);

impl std::fmt::Display for ExprId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "_{}", self.0)
  }
}

/// A block label. Only labeled blocks can be targeted by breaks and
/// switches; labels are scoped to a single function.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Label(pub u32);

impl std::fmt::Display for Label {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "${}", self.0)
  }
}

/// A local variable index. Parameters occupy the first indices.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LocalId(pub u32);

impl std::fmt::Display for LocalId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "l{}", self.0)
  }
}

/// A function index, used as a call target. Imported functions are in a
/// separate index space from defined ones.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FuncId(pub u32);

impl std::fmt::Display for FuncId {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "f{}", self.0)
  }
}

/// An expression node: a kind plus the type of the value it produces.
#[derive(Clone, Debug)]
pub struct Expr {
  /// The node kind, with kind-specific children.
  pub kind: ExprKind,
  /// The type of the value this node produces. Maintained by
  /// [`Function::finalize`] after every structural rewrite.
  pub ty: Type,
}

/// The closed set of expression kinds.
///
/// Child slots are listed in evaluation order. [`Function::children`] and
/// [`Function::set_child`] expose that order generically for traversals.
#[derive(Clone, Debug)]
pub enum ExprKind {
  /// The empty statement.
  Nop,
  /// A trap: control never proceeds past this point.
  Unreachable,
  /// A constant.
  Const(Literal),
  /// Read a local variable.
  GetLocal {
    /// The local to read.
    index: LocalId,
  },
  /// Write a local variable; produces nothing.
  SetLocal {
    /// The local to write.
    index: LocalId,
    /// The value to store.
    value: ExprId,
  },
  /// A sequence of expressions. Only the last element's value survives;
  /// the block produces it. A block with a label may be targeted by
  /// breaks, which exit the block (optionally carrying its value); an
  /// *anonymous* block (no label) cannot be a break target.
  Block {
    /// The label, if any.
    name: Option<Label>,
    /// The elements, in execution order.
    list: Vec<ExprId>,
  },
  /// A break to an enclosing labeled block. With a condition this is a
  /// `br_if`: the value flows out as the result when the branch is not
  /// taken. Without a condition the break never falls through.
  Break {
    /// The target label.
    name: Label,
    /// The branch condition, if conditional.
    condition: Option<ExprId>,
    /// The carried value, if any.
    value: Option<ExprId>,
  },
  /// A multi-way break (`br_table`): the condition selects one of `names`,
  /// falling back to `default` when out of range.
  Switch {
    /// The jump table.
    names: Box<[Label]>,
    /// The out-of-range target.
    default: Label,
    /// The selector, evaluated after `value`.
    condition: ExprId,
    /// The carried value, if any.
    value: Option<ExprId>,
  },
  /// Evaluate and discard a value.
  Drop {
    /// The discarded operand.
    value: ExprId,
  },
  /// A unary operation.
  Unary {
    /// The operation.
    op: Unop,
    /// The operand.
    value: ExprId,
  },
  /// A binary operation.
  Binary {
    /// The operation.
    op: Binop,
    /// The left operand.
    left: ExprId,
    /// The right operand.
    right: ExprId,
  },
  /// Choose between two values by a condition; all three operands are
  /// always evaluated.
  Select {
    /// The value when the condition is nonzero.
    if_true: ExprId,
    /// The value when the condition is zero.
    if_false: ExprId,
    /// The selector.
    condition: ExprId,
  },
  /// Read linear memory.
  Load {
    /// The loaded type.
    ty: Type,
    /// The address operand.
    ptr: ExprId,
  },
  /// Write linear memory; produces nothing.
  Store {
    /// The address operand.
    ptr: ExprId,
    /// The stored value.
    value: ExprId,
  },
  /// Atomically read-modify-write a memory cell; produces the old value.
  AtomicRMW {
    /// The modification.
    op: AtomicOp,
    /// The cell type.
    ty: Type,
    /// The address operand.
    ptr: ExprId,
    /// The operand to combine.
    value: ExprId,
  },
  /// Atomic compare-and-exchange; produces the old value.
  AtomicCmpxchg {
    /// The cell type.
    ty: Type,
    /// The address operand.
    ptr: ExprId,
    /// The expected old value.
    expected: ExprId,
    /// The replacement value.
    replacement: ExprId,
  },
  /// Call a defined function.
  Call {
    /// The callee.
    target: FuncId,
    /// The arguments, in order.
    operands: Vec<ExprId>,
    /// The declared result type of the callee.
    result: Type,
  },
  /// Call an imported function.
  CallImport {
    /// The callee, in the import index space.
    target: FuncId,
    /// The arguments, in order.
    operands: Vec<ExprId>,
    /// The declared result type of the callee.
    result: Type,
  },
  /// Call through a table; the target index is evaluated after the
  /// arguments.
  CallIndirect {
    /// The arguments, in order.
    operands: Vec<ExprId>,
    /// The table index operand.
    target: ExprId,
    /// The declared result type of the signature.
    result: Type,
  },
  /// Return from the function.
  Return {
    /// The returned value, if the function produces one.
    value: Option<ExprId>,
  },
}

/// A function: a signature, local declarations, and a body expression,
/// together with the arena that owns every node of the body.
///
/// Each function owns its own arena, so independent functions can be
/// rewritten from different threads without sharing an allocator.
#[derive(Clone, Debug)]
pub struct Function {
  /// The function name, for diagnostics.
  pub name: String,
  /// The number of parameters; they occupy `locals[..params]`.
  pub params: usize,
  /// The result type (`Type::None` for no result).
  pub results: Type,
  /// Types of all locals, parameters first.
  pub locals: Vec<Type>,
  /// The body expression.
  pub body: ExprId,
  exprs: Vec<Expr>,
}

impl Index<ExprId> for Function {
  type Output = Expr;
  fn index(&self, index: ExprId) -> &Expr { &self.exprs[index.0 as usize] }
}
impl IndexMut<ExprId> for Function {
  fn index_mut(&mut self, index: ExprId) -> &mut Expr { &mut self.exprs[index.0 as usize] }
}

impl Function {
  /// Create a function with the given signature and a `nop` body.
  pub fn new(name: impl Into<String>, results: Type) -> Self {
    let mut f = Function {
      name: name.into(),
      params: 0,
      results,
      locals: vec![],
      body: ExprId(0),
      exprs: vec![],
    };
    f.body = f.alloc(ExprKind::Nop, Type::None);
    f
  }

  /// Allocate a node in the arena with an explicit type.
  pub fn alloc(&mut self, kind: ExprKind, ty: Type) -> ExprId {
    let id = ExprId(u32::try_from(self.exprs.len()).expect("arena overflow"));
    self.exprs.push(Expr { kind, ty });
    id
  }

  /// The number of nodes ever allocated, including ones no longer
  /// reachable from the body.
  #[must_use] pub fn arena_len(&self) -> usize { self.exprs.len() }

  /// Declare a new local and return its index.
  pub fn add_local(&mut self, ty: Type) -> LocalId {
    let id = LocalId(u32::try_from(self.locals.len()).expect("local overflow"));
    self.locals.push(ty);
    id
  }

  /// The children of a node, in evaluation order.
  #[must_use] pub fn children(&self, id: ExprId) -> Vec<ExprId> {
    // Keep in sync with `set_child`.
    let mut out = vec![];
    match &self[id].kind {
      ExprKind::Nop | ExprKind::Unreachable | ExprKind::Const(_) |
      ExprKind::GetLocal { .. } => {}
      ExprKind::SetLocal { value, .. } | ExprKind::Drop { value } |
      ExprKind::Unary { value, .. } => out.push(*value),
      ExprKind::Block { list, .. } => out.extend_from_slice(list),
      ExprKind::Break { condition, value, .. } => {
        out.extend(value.iter().copied());
        out.extend(condition.iter().copied());
      }
      ExprKind::Switch { condition, value, .. } => {
        out.extend(value.iter().copied());
        out.push(*condition);
      }
      ExprKind::Binary { left, right, .. } => out.extend([*left, *right]),
      ExprKind::Select { if_true, if_false, condition } =>
        out.extend([*if_true, *if_false, *condition]),
      ExprKind::Load { ptr, .. } => out.push(*ptr),
      ExprKind::Store { ptr, value } | ExprKind::AtomicRMW { ptr, value, .. } =>
        out.extend([*ptr, *value]),
      ExprKind::AtomicCmpxchg { ptr, expected, replacement, .. } =>
        out.extend([*ptr, *expected, *replacement]),
      ExprKind::Call { operands, .. } | ExprKind::CallImport { operands, .. } =>
        out.extend_from_slice(operands),
      ExprKind::CallIndirect { operands, target, .. } => {
        out.extend_from_slice(operands);
        out.push(*target);
      }
      ExprKind::Return { value } => out.extend(value.iter().copied()),
    }
    out
  }

  /// Overwrite the `i`th child slot (in [`Function::children`] order).
  /// Panics if the node has no such slot.
  pub fn set_child(&mut self, id: ExprId, i: usize, new: ExprId) {
    // Keep in sync with `children`.
    match &mut self[id].kind {
      ExprKind::SetLocal { value, .. } | ExprKind::Drop { value } |
      ExprKind::Unary { value, .. } if i == 0 => *value = new,
      ExprKind::Block { list, .. } => list[i] = new,
      ExprKind::Break { condition, value, .. } => {
        let slots: [Option<&mut ExprId>; 2] = [value.as_mut(), condition.as_mut()];
        *slots.into_iter().flatten().nth(i).expect("no such child") = new;
      }
      ExprKind::Switch { condition, value, .. } => {
        let slots: [Option<&mut ExprId>; 2] = [value.as_mut(), Some(condition)];
        *slots.into_iter().flatten().nth(i).expect("no such child") = new;
      }
      ExprKind::Binary { left, right, .. } =>
        *[left, right][i] = new,
      ExprKind::Select { if_true, if_false, condition } =>
        *[if_true, if_false, condition][i] = new,
      ExprKind::Load { ptr, .. } if i == 0 => *ptr = new,
      ExprKind::Store { ptr, value } | ExprKind::AtomicRMW { ptr, value, .. } =>
        *[ptr, value][i] = new,
      ExprKind::AtomicCmpxchg { ptr, expected, replacement, .. } =>
        *[ptr, expected, replacement][i] = new,
      ExprKind::Call { operands, .. } | ExprKind::CallImport { operands, .. } =>
        operands[i] = new,
      ExprKind::CallIndirect { operands, target, .. } => {
        if i < operands.len() { operands[i] = new } else {
          assert_eq!(i, operands.len(), "no such child");
          *target = new
        }
      }
      ExprKind::Return { value } if i == 0 =>
        *value.as_mut().expect("no such child") = new,
      _ => panic!("no such child"),
    }
  }

  /// Recompute a node's type from its children, without writing it back.
  #[must_use] pub fn compute_type(&self, id: ExprId) -> Type {
    let propagated = self
      .children(id)
      .iter()
      .any(|&c| self[c].ty == Type::Unreachable);
    match &self[id].kind {
      ExprKind::Nop => Type::None,
      ExprKind::Unreachable => Type::Unreachable,
      ExprKind::Const(lit) => lit.ty(),
      ExprKind::GetLocal { index } => self.locals[index.0 as usize],
      // A block's type is its tail's type, whatever sits in the middle. A
      // labeled block whose tail does not fall through may still complete
      // through a break targeting it, so the break's value decides.
      ExprKind::Block { name, list } => {
        let tail_ty = list.last().map_or(Type::None, |&tail| self[tail].ty);
        match name {
          Some(label) if tail_ty == Type::Unreachable =>
            self.break_value_type(id, *label).unwrap_or(Type::Unreachable),
          _ => tail_ty,
        }
      }
      // Statements and value producers become unreachable if any operand is.
      _ if propagated => Type::Unreachable,
      ExprKind::SetLocal { .. } | ExprKind::Drop { .. } | ExprKind::Store { .. } => Type::None,
      ExprKind::Break { condition: None, .. } | ExprKind::Switch { .. } |
      ExprKind::Return { .. } => Type::Unreachable,
      ExprKind::Break { condition: Some(_), value, .. } =>
        value.map_or(Type::None, |v| self[v].ty),
      ExprKind::Unary { op, value } => op.result_type(self[*value].ty),
      ExprKind::Binary { op, left, .. } => op.result_type(self[*left].ty),
      ExprKind::Select { if_true, .. } => self[*if_true].ty,
      ExprKind::Load { ty, .. } | ExprKind::AtomicRMW { ty, .. } |
      ExprKind::AtomicCmpxchg { ty, .. } => *ty,
      ExprKind::Call { result, .. } | ExprKind::CallImport { result, .. } |
      ExprKind::CallIndirect { result, .. } => *result,
    }
  }

  /// The type carried by breaks targeting `label` inside this subtree, or
  /// `None` if nothing targets it. Well-formed inputs agree across breaks,
  /// so the first one found decides.
  fn break_value_type(&self, root: ExprId, label: Label) -> Option<Type> {
    let mut stack = vec![root];
    while let Some(id) = stack.pop() {
      match &self[id].kind {
        ExprKind::Break { name, value, .. } if *name == label =>
          return Some(value.map_or(Type::None, |v| self[v].ty)),
        ExprKind::Switch { names, default, value, .. }
          if *default == label || names.contains(&label) =>
          return Some(value.map_or(Type::None, |v| self[v].ty)),
        _ => {}
      }
      stack.extend(self.children(id));
    }
    None
  }

  /// Recompute and store a node's type after a structural rewrite.
  pub fn finalize(&mut self, id: ExprId) {
    let ty = self.compute_type(id);
    self[id].ty = ty;
  }

  /// Recompute a node's type and assert it equals `ty`. A mismatch means a
  /// rewrite broke the typing invariants, which is a bug in the rewriter.
  pub fn finalize_to(&mut self, id: ExprId, ty: Type) {
    self.finalize(id);
    assert_eq!(self[id].ty, ty, "finalize mismatch on {id} in {}", self.name);
  }
}

/// A module: a list of functions sharing nothing but their index space.
#[derive(Clone, Debug, Default)]
pub struct Module {
  /// The functions, indexed by [`FuncId`].
  pub functions: Vec<Function>,
}

impl Module {
  /// Add a function and return its index.
  pub fn add_function(&mut self, f: Function) -> FuncId {
    let id = FuncId(u32::try_from(self.functions.len()).expect("function overflow"));
    self.functions.push(f);
    id
  }
}

impl Index<FuncId> for Module {
  type Output = Function;
  fn index(&self, index: FuncId) -> &Function { &self.functions[index.0 as usize] }
}
impl IndexMut<FuncId> for Module {
  fn index_mut(&mut self, index: FuncId) -> &mut Function {
    &mut self.functions[index.0 as usize]
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn block_type_is_tail_type() {
    let mut f = Function::new("t", Type::None);
    let a = f.alloc(ExprKind::Nop, Type::None);
    let b = f.alloc(ExprKind::Const(Literal::I32(7)), Type::I32);
    let blk = f.alloc(ExprKind::Block { name: None, list: vec![a, b] }, Type::None);
    f.finalize(blk);
    assert_eq!(f[blk].ty, Type::I32);
    let empty = f.alloc(ExprKind::Block { name: None, list: vec![] }, Type::I32);
    f.finalize(empty);
    assert_eq!(f[empty].ty, Type::None);
  }

  #[test]
  fn unreachable_operand_propagates() {
    let mut f = Function::new("t", Type::None);
    let tr = f.alloc(ExprKind::Unreachable, Type::Unreachable);
    let d = f.alloc(ExprKind::Drop { value: tr }, Type::None);
    f.finalize(d);
    assert_eq!(f[d].ty, Type::Unreachable);
  }

  #[test]
  fn break_types() {
    let mut f = Function::new("t", Type::None);
    let v = f.alloc(ExprKind::Const(Literal::I32(1)), Type::I32);
    let c = f.alloc(ExprKind::Const(Literal::I32(0)), Type::I32);
    let br = f.alloc(
      ExprKind::Break { name: Label(0), condition: None, value: Some(v) },
      Type::None,
    );
    f.finalize(br);
    assert_eq!(f[br].ty, Type::Unreachable);
    let br_if = f.alloc(
      ExprKind::Break { name: Label(0), condition: Some(c), value: Some(v) },
      Type::None,
    );
    f.finalize(br_if);
    assert_eq!(f[br_if].ty, Type::I32);
  }

  #[test]
  fn labeled_block_completed_by_breaks_is_not_unreachable() {
    let mut f = Function::new("t", Type::None);
    let br = f.alloc(
      ExprKind::Break { name: Label(0), condition: None, value: None },
      Type::Unreachable,
    );
    let blk = f.alloc(ExprKind::Block { name: Some(Label(0)), list: vec![br] }, Type::None);
    f.finalize(blk);
    assert_eq!(f[blk].ty, Type::None);
    // without the label nothing can complete the block
    let br2 = f.alloc(
      ExprKind::Break { name: Label(9), condition: None, value: None },
      Type::Unreachable,
    );
    let anon = f.alloc(ExprKind::Block { name: None, list: vec![br2] }, Type::None);
    f.finalize(anon);
    assert_eq!(f[anon].ty, Type::Unreachable);
  }

  #[test]
  fn set_child_matches_children_order() {
    let mut f = Function::new("t", Type::None);
    let p = f.alloc(ExprKind::Const(Literal::I32(0)), Type::I32);
    let v = f.alloc(ExprKind::Const(Literal::I32(1)), Type::I32);
    let st = f.alloc(ExprKind::Store { ptr: p, value: v }, Type::None);
    assert_eq!(f.children(st), vec![p, v]);
    let v2 = f.alloc(ExprKind::Const(Literal::I32(2)), Type::I32);
    f.set_child(st, 1, v2);
    assert_eq!(f.children(st), vec![p, v2]);
  }
}
