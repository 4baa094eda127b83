//! A reference evaluator for single function bodies.
//!
//! The evaluator exists to pin down observable behavior: it records every
//! call and memory write, in order, together with the final outcome. Two
//! [`Trace`]s compare with `==`, which is how the test suite states that a
//! rewritten function behaves like the original.
//!
//! Calls do not enter their callees; they are opaque events producing a
//! zero of the declared result type. The kind set has no loops, so
//! evaluation always terminates.

use std::collections::HashMap;
use crate::ir::{ExprId, ExprKind, FuncId, Function, Label};
use crate::types::{Literal, Type};

/// An observable event.
#[derive(Clone, Debug, PartialEq)]
pub enum Event {
  /// A call to a defined function.
  Call {
    /// The callee.
    target: FuncId,
    /// The evaluated arguments.
    args: Vec<Literal>,
  },
  /// A call to an imported function.
  CallImport {
    /// The callee.
    target: FuncId,
    /// The evaluated arguments.
    args: Vec<Literal>,
  },
  /// An indirect call.
  CallIndirect {
    /// The evaluated table index.
    index: Literal,
    /// The evaluated arguments.
    args: Vec<Literal>,
  },
  /// A plain store.
  Store {
    /// The byte address.
    addr: u32,
    /// The stored value.
    value: Literal,
  },
  /// An atomic operation's write-back; `value` is the final cell value.
  AtomicWrite {
    /// The byte address.
    addr: u32,
    /// The value left in the cell.
    value: Literal,
  },
}

/// How an evaluation ended.
#[derive(Clone, Debug, PartialEq)]
pub enum Outcome {
  /// The body finished, producing this value.
  Finished(Option<Literal>),
  /// The body trapped.
  Trapped,
}

/// The observable behavior of one evaluation.
#[derive(Clone, Debug, PartialEq)]
pub struct Trace {
  /// Side effects, in execution order.
  pub events: Vec<Event>,
  /// The final outcome.
  pub outcome: Outcome,
}

/// Evaluate a function body with zeroed locals and empty memory.
#[must_use] pub fn run(func: &Function) -> Trace {
  let mut st = State {
    locals: func
      .locals
      .iter()
      .map(|&ty| Literal::zero(ty).expect("locals must have concrete types"))
      .collect(),
    mem: HashMap::new(),
    events: vec![],
  };
  let outcome = match eval(func, func.body, &mut st) {
    Flow::Value(v) | Flow::Return(v) => Outcome::Finished(v),
    Flow::Trap => Outcome::Trapped,
    Flow::Break(label, _) => panic!("break to unbound label {label}"),
  };
  Trace { events: st.events, outcome }
}

struct State {
  locals: Vec<Literal>,
  mem: HashMap<u32, Literal>,
  events: Vec<Event>,
}

impl State {
  fn load(&self, addr: u32, ty: Type) -> Literal {
    let zero = Literal::zero(ty).expect("loads must have concrete types");
    match self.mem.get(&addr) {
      Some(&v) if v.ty() == ty => v,
      _ => zero,
    }
  }
}

enum Flow {
  Value(Option<Literal>),
  Break(Label, Option<Literal>),
  Return(Option<Literal>),
  Trap,
}

fn addr_of(lit: Literal) -> u32 {
  match lit {
    Literal::I32(n) => n as u32,
    _ => panic!("address must be an i32"),
  }
}

macro_rules! val {
  ($func:expr, $id:expr, $st:expr) => {
    match eval($func, $id, $st) {
      Flow::Value(v) => v,
      other => return other,
    }
  };
}

macro_rules! lit {
  ($func:expr, $id:expr, $st:expr) => {
    val!($func, $id, $st).expect("operand must produce a value")
  };
}

#[allow(clippy::too_many_lines)]
fn eval(func: &Function, id: ExprId, st: &mut State) -> Flow {
  match &func[id].kind {
    ExprKind::Nop => Flow::Value(None),
    ExprKind::Unreachable => Flow::Trap,
    ExprKind::Const(lit) => Flow::Value(Some(*lit)),
    ExprKind::GetLocal { index } => Flow::Value(Some(st.locals[index.0 as usize])),
    ExprKind::SetLocal { index, value } => {
      let v = lit!(func, *value, st);
      st.locals[index.0 as usize] = v;
      Flow::Value(None)
    }
    ExprKind::Block { name, list } => {
      let mut result = None;
      for &c in list {
        match eval(func, c, st) {
          Flow::Value(v) => result = v,
          Flow::Break(label, v) if Some(label) == *name => return Flow::Value(v),
          other => return other,
        }
      }
      Flow::Value(result)
    }
    ExprKind::Break { name, condition, value } => {
      let v = match value {
        Some(x) => val!(func, *x, st),
        None => None,
      };
      match condition {
        None => Flow::Break(*name, v),
        Some(c) => {
          if lit!(func, *c, st).truthy() {
            Flow::Break(*name, v)
          } else {
            Flow::Value(v)
          }
        }
      }
    }
    ExprKind::Switch { names, default, condition, value } => {
      let v = match value {
        Some(x) => val!(func, *x, st),
        None => None,
      };
      let picked = match lit!(func, *condition, st) {
        Literal::I32(n) => names.get(n as u32 as usize).copied().unwrap_or(*default),
        _ => panic!("switch selector must be an i32"),
      };
      Flow::Break(picked, v)
    }
    ExprKind::Drop { value } => {
      val!(func, *value, st);
      Flow::Value(None)
    }
    ExprKind::Unary { op, value } => {
      let v = lit!(func, *value, st);
      match op.apply(v) {
        Some(r) => Flow::Value(Some(r)),
        None => Flow::Trap,
      }
    }
    ExprKind::Binary { op, left, right } => {
      let l = lit!(func, *left, st);
      let r = lit!(func, *right, st);
      match op.apply(l, r) {
        Some(v) => Flow::Value(Some(v)),
        None => Flow::Trap,
      }
    }
    ExprKind::Select { if_true, if_false, condition } => {
      let t = lit!(func, *if_true, st);
      let e = lit!(func, *if_false, st);
      let c = lit!(func, *condition, st);
      Flow::Value(Some(if c.truthy() { t } else { e }))
    }
    ExprKind::Load { ty, ptr } => {
      let addr = addr_of(lit!(func, *ptr, st));
      Flow::Value(Some(st.load(addr, *ty)))
    }
    ExprKind::Store { ptr, value } => {
      let addr = addr_of(lit!(func, *ptr, st));
      let v = lit!(func, *value, st);
      st.events.push(Event::Store { addr, value: v });
      st.mem.insert(addr, v);
      Flow::Value(None)
    }
    ExprKind::AtomicRMW { op, ty, ptr, value } => {
      let addr = addr_of(lit!(func, *ptr, st));
      let v = lit!(func, *value, st);
      let old = st.load(addr, *ty);
      let new = match op.apply(old, v) {
        Some(n) => n,
        None => return Flow::Trap,
      };
      st.events.push(Event::AtomicWrite { addr, value: new });
      st.mem.insert(addr, new);
      Flow::Value(Some(old))
    }
    ExprKind::AtomicCmpxchg { ty, ptr, expected, replacement } => {
      let addr = addr_of(lit!(func, *ptr, st));
      let e = lit!(func, *expected, st);
      let r = lit!(func, *replacement, st);
      let old = st.load(addr, *ty);
      let new = if old == e { r } else { old };
      st.events.push(Event::AtomicWrite { addr, value: new });
      st.mem.insert(addr, new);
      Flow::Value(Some(old))
    }
    ExprKind::Call { target, operands, result } => {
      let mut args = Vec::with_capacity(operands.len());
      for &o in operands {
        args.push(lit!(func, o, st));
      }
      st.events.push(Event::Call { target: *target, args });
      Flow::Value(Literal::zero(*result))
    }
    ExprKind::CallImport { target, operands, result } => {
      let mut args = Vec::with_capacity(operands.len());
      for &o in operands {
        args.push(lit!(func, o, st));
      }
      st.events.push(Event::CallImport { target: *target, args });
      Flow::Value(Literal::zero(*result))
    }
    ExprKind::CallIndirect { operands, target, result } => {
      let mut args = Vec::with_capacity(operands.len());
      for &o in operands {
        args.push(lit!(func, o, st));
      }
      let index = lit!(func, *target, st);
      st.events.push(Event::CallIndirect { index, args });
      Flow::Value(Literal::zero(*result))
    }
    ExprKind::Return { value } => {
      let v = match value {
        Some(x) => val!(func, *x, st),
        None => None,
      };
      Flow::Return(v)
    }
  }
}
