//! Construction helpers for IR nodes.
//!
//! A [`Builder`] borrows a function's arena and allocates finalized nodes,
//! so callers never write types by hand. Passes use [`Builder::make_drop`]
//! and [`Builder::make_sequence`]; the remaining constructors exist for IR
//! producers and tests.

use crate::ir::{ExprId, ExprKind, FuncId, Function, Label, LocalId};
use crate::types::{AtomicOp, Binop, Literal, Type, Unop};

/// A node builder over a single function's arena.
#[derive(Debug)]
pub struct Builder<'a> {
  func: &'a mut Function,
}

impl<'a> Builder<'a> {
  /// Create a builder for the given function.
  pub fn new(func: &'a mut Function) -> Self { Builder { func } }

  fn finalized(&mut self, kind: ExprKind) -> ExprId {
    let id = self.func.alloc(kind, Type::None);
    self.func.finalize(id);
    id
  }

  /// `(drop value)` — evaluate and discard.
  pub fn make_drop(&mut self, value: ExprId) -> ExprId {
    self.finalized(ExprKind::Drop { value })
  }

  /// `(block a b)` — an anonymous two-element sequence typed by `b`.
  pub fn make_sequence(&mut self, a: ExprId, b: ExprId) -> ExprId {
    self.finalized(ExprKind::Block { name: None, list: vec![a, b] })
  }

  /// The empty statement.
  pub fn nop(&mut self) -> ExprId { self.finalized(ExprKind::Nop) }

  /// A trap.
  pub fn unreachable(&mut self) -> ExprId { self.finalized(ExprKind::Unreachable) }

  /// A constant.
  pub fn const_(&mut self, lit: Literal) -> ExprId {
    self.finalized(ExprKind::Const(lit))
  }

  /// Read a local.
  pub fn get_local(&mut self, index: LocalId) -> ExprId {
    self.finalized(ExprKind::GetLocal { index })
  }

  /// Write a local.
  pub fn set_local(&mut self, index: LocalId, value: ExprId) -> ExprId {
    self.finalized(ExprKind::SetLocal { index, value })
  }

  /// A block with an optional label.
  pub fn block(&mut self, name: Option<Label>, list: Vec<ExprId>) -> ExprId {
    self.finalized(ExprKind::Block { name, list })
  }

  /// An unconditional break, optionally carrying a value.
  pub fn br(&mut self, name: Label, value: Option<ExprId>) -> ExprId {
    self.finalized(ExprKind::Break { name, condition: None, value })
  }

  /// A conditional break, optionally carrying a value.
  pub fn br_if(&mut self, name: Label, condition: ExprId, value: Option<ExprId>) -> ExprId {
    self.finalized(ExprKind::Break { name, condition: Some(condition), value })
  }

  /// A multi-way break.
  pub fn switch(
    &mut self, names: Box<[Label]>, default: Label, condition: ExprId, value: Option<ExprId>,
  ) -> ExprId {
    self.finalized(ExprKind::Switch { names, default, condition, value })
  }

  /// A unary operation.
  pub fn unary(&mut self, op: Unop, value: ExprId) -> ExprId {
    self.finalized(ExprKind::Unary { op, value })
  }

  /// A binary operation.
  pub fn binary(&mut self, op: Binop, left: ExprId, right: ExprId) -> ExprId {
    self.finalized(ExprKind::Binary { op, left, right })
  }

  /// A select.
  pub fn select(&mut self, if_true: ExprId, if_false: ExprId, condition: ExprId) -> ExprId {
    self.finalized(ExprKind::Select { if_true, if_false, condition })
  }

  /// A load of the given type.
  pub fn load(&mut self, ty: Type, ptr: ExprId) -> ExprId {
    self.finalized(ExprKind::Load { ty, ptr })
  }

  /// A store.
  pub fn store(&mut self, ptr: ExprId, value: ExprId) -> ExprId {
    self.finalized(ExprKind::Store { ptr, value })
  }

  /// An atomic read-modify-write.
  pub fn atomic_rmw(&mut self, op: AtomicOp, ty: Type, ptr: ExprId, value: ExprId) -> ExprId {
    self.finalized(ExprKind::AtomicRMW { op, ty, ptr, value })
  }

  /// An atomic compare-and-exchange.
  pub fn atomic_cmpxchg(
    &mut self, ty: Type, ptr: ExprId, expected: ExprId, replacement: ExprId,
  ) -> ExprId {
    self.finalized(ExprKind::AtomicCmpxchg { ty, ptr, expected, replacement })
  }

  /// A call to a defined function with the given declared result.
  pub fn call(&mut self, target: FuncId, operands: Vec<ExprId>, result: Type) -> ExprId {
    self.finalized(ExprKind::Call { target, operands, result })
  }

  /// A call to an imported function.
  pub fn call_import(&mut self, target: FuncId, operands: Vec<ExprId>, result: Type) -> ExprId {
    self.finalized(ExprKind::CallImport { target, operands, result })
  }

  /// An indirect call.
  pub fn call_indirect(&mut self, operands: Vec<ExprId>, target: ExprId, result: Type) -> ExprId {
    self.finalized(ExprKind::CallIndirect { operands, target, result })
  }

  /// A return.
  pub fn ret(&mut self, value: Option<ExprId>) -> ExprId {
    self.finalized(ExprKind::Return { value })
  }
}
