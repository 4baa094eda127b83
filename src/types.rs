//! Value types, literals, and the closed operator sets of the IR.

/// The type of a value produced by an expression.
///
/// `None` is the type of expressions that push nothing (stores, drops, most
/// statements); `Unreachable` is the type of expressions that never fall
/// through (unconditional breaks, returns, traps). Everything else is a
/// *concrete* type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum Type {
  /// No value is produced.
  #[default]
  None,
  /// Control never falls through this expression.
  Unreachable,
  /// A 32-bit integer.
  I32,
  /// A 64-bit integer.
  I64,
  /// A 32-bit float.
  F32,
  /// A 64-bit float.
  F64,
}

impl Type {
  /// Is this a real value type, i.e. neither `None` nor `Unreachable`?
  #[must_use] pub fn is_concrete(self) -> bool {
    !matches!(self, Type::None | Type::Unreachable)
  }

  /// Is this the empty type?
  #[must_use] pub fn is_none(self) -> bool { self == Type::None }

  /// Is this the type of expressions that do not fall through?
  #[must_use] pub fn is_unreachable(self) -> bool { self == Type::Unreachable }

  /// A string representation of the type.
  #[must_use] pub fn to_str(self) -> &'static str {
    match self {
      Type::None => "none",
      Type::Unreachable => "unreachable",
      Type::I32 => "i32",
      Type::I64 => "i64",
      Type::F32 => "f32",
      Type::F64 => "f64",
    }
  }
}

impl std::fmt::Display for Type {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    self.to_str().fmt(f)
  }
}

/// A constant value. There is one case per concrete [`Type`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Literal {
  /// A 32-bit integer constant.
  I32(i32),
  /// A 64-bit integer constant.
  I64(i64),
  /// A 32-bit float constant.
  F32(f32),
  /// A 64-bit float constant.
  F64(f64),
}

impl Literal {
  /// The type of this constant.
  #[must_use] pub fn ty(self) -> Type {
    match self {
      Literal::I32(_) => Type::I32,
      Literal::I64(_) => Type::I64,
      Literal::F32(_) => Type::F32,
      Literal::F64(_) => Type::F64,
    }
  }

  /// The zero value of a concrete type, or `None` for `none`/`unreachable`.
  #[must_use] pub fn zero(ty: Type) -> Option<Literal> {
    match ty {
      Type::I32 => Some(Literal::I32(0)),
      Type::I64 => Some(Literal::I64(0)),
      Type::F32 => Some(Literal::F32(0.0)),
      Type::F64 => Some(Literal::F64(0.0)),
      Type::None | Type::Unreachable => None,
    }
  }

  /// Interpret this constant as a branch condition.
  #[must_use] pub fn truthy(self) -> bool {
    match self {
      Literal::I32(n) => n != 0,
      Literal::I64(n) => n != 0,
      Literal::F32(n) => n != 0.0,
      Literal::F64(n) => n != 0.0,
    }
  }
}

impl std::fmt::Display for Literal {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      Literal::I32(n) => write!(f, "i32.const {n}"),
      Literal::I64(n) => write!(f, "i64.const {n}"),
      Literal::F32(n) => write!(f, "f32.const {n}"),
      Literal::F64(n) => write!(f, "f64.const {n}"),
    }
  }
}

/// Unary operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Unop {
  /// Compare equal to zero; the result is always `i32`.
  EqZ,
  /// Count leading zero bits.
  Clz,
  /// Count one bits.
  Popcnt,
}

impl Unop {
  /// The result type, given the operand type.
  #[must_use] pub fn result_type(self, operand: Type) -> Type {
    match self {
      Unop::EqZ => Type::I32,
      Unop::Clz | Unop::Popcnt => operand,
    }
  }

  /// Evaluate the operation on a constant. Returns `None` if the operand
  /// is outside the operation's domain.
  #[must_use] pub fn apply(self, v: Literal) -> Option<Literal> {
    match (self, v) {
      (Unop::EqZ, Literal::I32(n)) => Some(Literal::I32((n == 0).into())),
      (Unop::EqZ, Literal::I64(n)) => Some(Literal::I32((n == 0).into())),
      (Unop::Clz, Literal::I32(n)) => Some(Literal::I32(n.leading_zeros() as i32)),
      (Unop::Clz, Literal::I64(n)) => Some(Literal::I64(n.leading_zeros().into())),
      (Unop::Popcnt, Literal::I32(n)) => Some(Literal::I32(n.count_ones() as i32)),
      (Unop::Popcnt, Literal::I64(n)) => Some(Literal::I64(n.count_ones().into())),
      _ => None,
    }
  }
}

/// Binary operations. Comparisons produce `i32`; everything else preserves
/// the operand type. Trapping operations (division, remainder) are not in
/// the set, so constant evaluation cannot trap.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Binop {
  /// Wrapping addition.
  Add,
  /// Wrapping subtraction.
  Sub,
  /// Wrapping multiplication.
  Mul,
  /// Bitwise AND.
  And,
  /// Bitwise OR.
  Or,
  /// Bitwise XOR.
  Xor,
  /// Shift left (modulo the bit width).
  Shl,
  /// Equal.
  Eq,
  /// Not equal.
  Ne,
  /// Signed less-than.
  LtS,
  /// Signed less-or-equal.
  LeS,
}

impl Binop {
  /// Does this operation produce an `i32` truth value?
  #[must_use] pub fn relational(self) -> bool {
    matches!(self, Binop::Eq | Binop::Ne | Binop::LtS | Binop::LeS)
  }

  /// The result type, given the left operand type.
  #[must_use] pub fn result_type(self, left: Type) -> Type {
    if self.relational() { Type::I32 } else { left }
  }

  /// Evaluate the operation on constants. Returns `None` if the operands
  /// are outside the operation's domain.
  #[must_use] pub fn apply(self, l: Literal, r: Literal) -> Option<Literal> {
    match (l, r) {
      (Literal::I32(a), Literal::I32(b)) => Some(self.apply_i32(a, b)),
      (Literal::I64(a), Literal::I64(b)) => Some(self.apply_i64(a, b)),
      (Literal::F32(a), Literal::F32(b)) => self.apply_f64(a.into(), b.into()).map(|v| match v {
        Literal::F64(n) => Literal::F32(n as f32),
        other => other,
      }),
      (Literal::F64(a), Literal::F64(b)) => self.apply_f64(a, b),
      _ => None,
    }
  }

  fn apply_i32(self, a: i32, b: i32) -> Literal {
    match self {
      Binop::Add => Literal::I32(a.wrapping_add(b)),
      Binop::Sub => Literal::I32(a.wrapping_sub(b)),
      Binop::Mul => Literal::I32(a.wrapping_mul(b)),
      Binop::And => Literal::I32(a & b),
      Binop::Or => Literal::I32(a | b),
      Binop::Xor => Literal::I32(a ^ b),
      Binop::Shl => Literal::I32(a.wrapping_shl(b as u32)),
      Binop::Eq => Literal::I32((a == b).into()),
      Binop::Ne => Literal::I32((a != b).into()),
      Binop::LtS => Literal::I32((a < b).into()),
      Binop::LeS => Literal::I32((a <= b).into()),
    }
  }

  fn apply_i64(self, a: i64, b: i64) -> Literal {
    match self {
      Binop::Add => Literal::I64(a.wrapping_add(b)),
      Binop::Sub => Literal::I64(a.wrapping_sub(b)),
      Binop::Mul => Literal::I64(a.wrapping_mul(b)),
      Binop::And => Literal::I64(a & b),
      Binop::Or => Literal::I64(a | b),
      Binop::Xor => Literal::I64(a ^ b),
      Binop::Shl => Literal::I64(a.wrapping_shl(b as u32)),
      Binop::Eq => Literal::I32((a == b).into()),
      Binop::Ne => Literal::I32((a != b).into()),
      Binop::LtS => Literal::I32((a < b).into()),
      Binop::LeS => Literal::I32((a <= b).into()),
    }
  }

  fn apply_f64(self, a: f64, b: f64) -> Option<Literal> {
    match self {
      Binop::Add => Some(Literal::F64(a + b)),
      Binop::Sub => Some(Literal::F64(a - b)),
      Binop::Mul => Some(Literal::F64(a * b)),
      Binop::Eq => Some(Literal::I32((a == b).into())),
      Binop::Ne => Some(Literal::I32((a != b).into())),
      Binop::LtS => Some(Literal::I32((a < b).into())),
      Binop::LeS => Some(Literal::I32((a <= b).into())),
      Binop::And | Binop::Or | Binop::Xor | Binop::Shl => None,
    }
  }
}

/// Atomic read-modify-write operations.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AtomicOp {
  /// Add the operand to the memory cell.
  Add,
  /// Subtract the operand from the memory cell.
  Sub,
  /// AND the operand into the memory cell.
  And,
  /// OR the operand into the memory cell.
  Or,
  /// XOR the operand into the memory cell.
  Xor,
  /// Exchange the memory cell with the operand.
  Xchg,
}

impl AtomicOp {
  /// The new cell value after applying this operation to the old value.
  #[must_use] pub fn apply(self, old: Literal, operand: Literal) -> Option<Literal> {
    match self {
      AtomicOp::Add => Binop::Add.apply(old, operand),
      AtomicOp::Sub => Binop::Sub.apply(old, operand),
      AtomicOp::And => Binop::And.apply(old, operand),
      AtomicOp::Or => Binop::Or.apply(old, operand),
      AtomicOp::Xor => Binop::Xor.apply(old, operand),
      AtomicOp::Xchg => Some(operand),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn concrete_types() {
    assert!(Type::I32.is_concrete());
    assert!(Type::F64.is_concrete());
    assert!(!Type::None.is_concrete());
    assert!(!Type::Unreachable.is_concrete());
  }

  #[test]
  fn relational_results() {
    assert_eq!(Binop::Eq.result_type(Type::I64), Type::I32);
    assert_eq!(Binop::Add.result_type(Type::I64), Type::I64);
    assert_eq!(Binop::LtS.apply(Literal::I64(3), Literal::I64(4)), Some(Literal::I32(1)));
  }

  #[test]
  fn eqz_is_i32() {
    assert_eq!(Unop::EqZ.result_type(Type::I64), Type::I32);
    assert_eq!(Unop::EqZ.apply(Literal::I64(0)), Some(Literal::I32(1)));
  }
}
