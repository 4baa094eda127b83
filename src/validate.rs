//! Structural and type validation.
//!
//! The optimizer itself treats malformed IR as a caller bug and asserts;
//! this module is the checkable boundary for IR producers and for tests,
//! which validate functions before and after every transformation.

use thiserror::Error;
use crate::ir::{ExprId, ExprKind, Function, Label, Module};
use crate::types::Type;

/// A validation failure. The first problem found is reported.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ValidateError {
  /// A node's stored type disagrees with the type computed from its
  /// children, meaning some rewrite forgot to finalize it.
  #[error("stale type on {expr}: stored {stored}, computed {computed}")]
  StaleType {
    /// The offending node.
    expr: ExprId,
    /// The type recorded on the node.
    stored: Type,
    /// The type recomputed from its children.
    computed: Type,
  },
  /// A break or switch names a label with no enclosing block.
  #[error("{expr} targets unbound label {label}")]
  UnknownLabel {
    /// The branching node.
    expr: ExprId,
    /// The unresolved label.
    label: Label,
  },
  /// A label is reused while still in scope.
  #[error("label {label} shadows an enclosing block")]
  ShadowedLabel {
    /// The reused label.
    label: Label,
  },
  /// A local index past the end of the locals table.
  #[error("{expr} references an undeclared local")]
  BadLocal {
    /// The offending node.
    expr: ExprId,
  },
  /// A local is read or written at the wrong type.
  #[error("{expr} uses a local of type {expected} at type {found}")]
  LocalType {
    /// The offending node.
    expr: ExprId,
    /// The declared local type.
    expected: Type,
    /// The type actually used.
    found: Type,
  },
  /// A non-tail block element produces a value; it should be dropped.
  #[error("{expr} produces a value in the middle of block {block}")]
  MiddleValue {
    /// The enclosing block.
    block: ExprId,
    /// The value-producing element.
    expr: ExprId,
  },
  /// A break's carried value does not match its target block's type.
  #[error("{expr} breaks with {found} to a block of type {expected}")]
  BreakValue {
    /// The branching node.
    expr: ExprId,
    /// The target block's type.
    expected: Type,
    /// The carried value's type (`none` for no value).
    found: Type,
  },
  /// A drop with nothing to discard.
  #[error("{expr} drops a none-typed operand")]
  DroppedNothing {
    /// The drop node.
    expr: ExprId,
  },
  /// A memory address operand that is not an `i32`.
  #[error("{expr} addresses memory with {found}")]
  BadAddress {
    /// The accessing node.
    expr: ExprId,
    /// The address operand's type.
    found: Type,
  },
  /// Operands of one operation disagree in type.
  #[error("{expr} mixes operand types {left} and {right}")]
  OperandMismatch {
    /// The offending node.
    expr: ExprId,
    /// The first operand type.
    left: Type,
    /// The second operand type.
    right: Type,
  },
  /// A return or function body that does not produce the declared result.
  #[error("{expr} produces {found} but the function returns {expected}")]
  ResultType {
    /// The body or return node.
    expr: ExprId,
    /// The declared result type.
    expected: Type,
    /// The produced type.
    found: Type,
  },
}

/// Validate every function of a module.
pub fn module(m: &Module) -> Result<(), ValidateError> {
  m.functions.iter().try_for_each(function)
}

/// Validate a single function.
pub fn function(f: &Function) -> Result<(), ValidateError> {
  let mut scope = vec![];
  check(f, f.body, &mut scope)?;
  let body_ty = f[f.body].ty;
  if body_ty != f.results && body_ty != Type::Unreachable {
    return Err(ValidateError::ResultType {
      expr: f.body,
      expected: f.results,
      found: body_ty,
    });
  }
  Ok(())
}

/// Does a value of type `found` satisfy a slot expecting `expected`?
fn flows_into(found: Type, expected: Type) -> bool {
  found == expected || found == Type::Unreachable
}

/// Does a break carrying `found` (`none` for no value) match a target
/// block of type `expected`? A block that never falls through still
/// accepts value-less breaks.
fn break_flows(found: Type, expected: Type) -> bool {
  if expected.is_concrete() {
    found == expected || found == Type::Unreachable
  } else {
    found == Type::None || found == Type::Unreachable
  }
}

fn resolve(scope: &[(Label, Type)], label: Label) -> Option<Type> {
  scope.iter().rev().find(|&&(l, _)| l == label).map(|&(_, ty)| ty)
}

fn check(f: &Function, id: ExprId, scope: &mut Vec<(Label, Type)>) -> Result<(), ValidateError> {
  // bad local indices would make type recomputation panic
  if let ExprKind::GetLocal { index } | ExprKind::SetLocal { index, .. } = &f[id].kind {
    if index.0 as usize >= f.locals.len() {
      return Err(ValidateError::BadLocal { expr: id });
    }
  }
  let computed = f.compute_type(id);
  if f[id].ty != computed {
    return Err(ValidateError::StaleType { expr: id, stored: f[id].ty, computed });
  }
  match &f[id].kind {
    ExprKind::Block { name, list } => {
      if let Some(label) = *name {
        if resolve(scope, label).is_some() {
          return Err(ValidateError::ShadowedLabel { label });
        }
        scope.push((label, f[id].ty));
      }
      for (i, &c) in list.iter().enumerate() {
        check(f, c, scope)?;
        if i + 1 < list.len() && f[c].ty.is_concrete() {
          return Err(ValidateError::MiddleValue { block: id, expr: c });
        }
      }
      if name.is_some() {
        scope.pop();
      }
      return Ok(());
    }
    ExprKind::Break { name, value, .. } => {
      let expected = resolve(scope, *name)
        .ok_or(ValidateError::UnknownLabel { expr: id, label: *name })?;
      let found = value.map_or(Type::None, |v| f[v].ty);
      if !break_flows(found, expected) {
        return Err(ValidateError::BreakValue { expr: id, expected, found });
      }
    }
    ExprKind::Switch { names, default, value, .. } => {
      let found = value.map_or(Type::None, |v| f[v].ty);
      for &label in names.iter().chain(std::iter::once(default)) {
        let expected = resolve(scope, label)
          .ok_or(ValidateError::UnknownLabel { expr: id, label })?;
        if !break_flows(found, expected) {
          return Err(ValidateError::BreakValue { expr: id, expected, found });
        }
      }
    }
    ExprKind::SetLocal { index, value } => {
      let expected = f.locals[index.0 as usize];
      let found = f[*value].ty;
      if !flows_into(found, expected) {
        return Err(ValidateError::LocalType { expr: id, expected, found });
      }
    }
    ExprKind::Drop { value } => {
      if f[*value].ty == Type::None {
        return Err(ValidateError::DroppedNothing { expr: id });
      }
    }
    ExprKind::Binary { left, right, .. } => {
      let (l, r) = (f[*left].ty, f[*right].ty);
      if l.is_concrete() && r.is_concrete() && l != r {
        return Err(ValidateError::OperandMismatch { expr: id, left: l, right: r });
      }
    }
    ExprKind::Select { if_true, if_false, .. } => {
      let (l, r) = (f[*if_true].ty, f[*if_false].ty);
      if l.is_concrete() && r.is_concrete() && l != r {
        return Err(ValidateError::OperandMismatch { expr: id, left: l, right: r });
      }
    }
    ExprKind::Load { ptr, .. } | ExprKind::Store { ptr, .. }
    | ExprKind::AtomicRMW { ptr, .. } | ExprKind::AtomicCmpxchg { ptr, .. } => {
      let found = f[*ptr].ty;
      if !flows_into(found, Type::I32) {
        return Err(ValidateError::BadAddress { expr: id, found });
      }
    }
    ExprKind::Return { value } => {
      let found = value.map_or(Type::None, |v| f[v].ty);
      if !flows_into(found, f.results) {
        return Err(ValidateError::ResultType { expr: id, expected: f.results, found });
      }
    }
    _ => {}
  }
  for c in f.children(id) {
    check(f, c, scope)?;
  }
  Ok(())
}
