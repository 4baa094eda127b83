//! End-to-end scenarios for the block-merging pass: each one builds a
//! function, runs the pass through the public runner, and checks the
//! resulting structure, validity, and observable behavior.

use wir::interp;
use wir::passes::merge_blocks;
use wir::validate;
use wir::{Builder, ExprId, ExprKind, FuncId, Function, Label, Literal, Module, PassRunner, Type};

/// Run the pass on a single function, checking validity on both sides and
/// that the observable trace is unchanged. Returns the transformed function.
fn merged(f: Function) -> Function {
  validate::function(&f).expect("input must validate");
  let before = interp::run(&f);
  let mut module = Module::default();
  let id = module.add_function(f.clone());
  let pass = merge_blocks::create();
  PassRunner::default().run(&*pass, &mut module);
  let out = module[id].clone();
  validate::function(&out).expect("output must validate");
  assert_eq!(interp::run(&out), before, "observable behavior changed");
  assert_eq!(out[out.body].ty, f[f.body].ty, "body type changed");
  out
}

fn list_of(f: &Function, id: ExprId) -> Vec<ExprId> {
  match &f[id].kind {
    ExprKind::Block { list, .. } => list.clone(),
    k => panic!("expected a block, got {k:?}"),
  }
}

#[test]
fn s1_nested_block_is_spliced() {
  let mut f = Function::new("s1", Type::None);
  let mut b = Builder::new(&mut f);
  let a = b.call_import(FuncId(0), vec![], Type::None);
  let x = b.call_import(FuncId(1), vec![], Type::None);
  let y = b.call_import(FuncId(2), vec![], Type::None);
  let inner = b.block(None, vec![x, y]);
  let d = b.call_import(FuncId(3), vec![], Type::None);
  f.body = b.block(None, vec![a, inner, d]);
  let out = merged(f);
  assert_eq!(list_of(&out, out.body), vec![a, x, y, d]);
}

#[test]
fn s2_drop_of_block_sinks_the_drop() {
  let mut f = Function::new("s2", Type::None);
  let mut b = Builder::new(&mut f);
  let call = b.call_import(FuncId(0), vec![], Type::None);
  let addr = b.const_(Literal::I32(100));
  let load = b.load(Type::I32, addr);
  let inner = b.block(None, vec![call, load]);
  let dropped = b.make_drop(inner);
  f.body = b.block(None, vec![dropped]);
  let out = merged(f);
  let list = list_of(&out, out.body);
  assert_eq!(list.len(), 2);
  assert_eq!(list[0], call);
  match &out[list[1]].kind {
    ExprKind::Drop { value } => assert_eq!(*value, load),
    k => panic!("expected drop, got {k:?}"),
  }
}

#[test]
fn s3_store_value_operand_hoists() {
  let mut f = Function::new("s3", Type::None);
  let mut b = Builder::new(&mut f);
  let ptr = b.const_(Literal::I32(0));
  let call = b.call_import(FuncId(0), vec![], Type::None);
  let addr = b.const_(Literal::I32(100));
  let load = b.load(Type::I32, addr);
  let blk = b.block(None, vec![call, load]);
  let store = b.store(ptr, blk);
  f.body = store;
  let out = merged(f);
  assert_eq!(out.body, blk);
  assert_eq!(list_of(&out, out.body), vec![call, store]);
  match &out[store].kind {
    ExprKind::Store { ptr: p, value } => {
      assert_eq!(*p, ptr);
      assert_eq!(*value, load);
    }
    k => panic!("expected store, got {k:?}"),
  }
}

#[test]
fn s4_both_store_operands_hoist_in_order() {
  let mut f = Function::new("s4", Type::None);
  let mut b = Builder::new(&mut f);
  let call_f = b.call_import(FuncId(0), vec![], Type::None);
  let p = b.const_(Literal::I32(100));
  let ptr_blk = b.block(None, vec![call_f, p]);
  let call_g = b.call_import(FuncId(1), vec![], Type::None);
  let v = b.const_(Literal::I32(200));
  let val_blk = b.block(None, vec![call_g, v]);
  let store = b.store(ptr_blk, val_blk);
  f.body = store;
  let out = merged(f);
  assert_eq!(out.body, ptr_blk);
  assert_eq!(list_of(&out, out.body), vec![call_f, call_g, store]);
  match &out[store].kind {
    ExprKind::Store { ptr, value } => {
      assert_eq!(*ptr, p);
      assert_eq!(*value, v);
    }
    k => panic!("expected store, got {k:?}"),
  }
}

#[test]
fn s5_labeled_inner_block_is_left_alone() {
  let mut f = Function::new("s5", Type::None);
  let l = Label(0);
  let mut b = Builder::new(&mut f);
  let a = b.call_import(FuncId(0), vec![], Type::None);
  let inner_call = b.call_import(FuncId(1), vec![], Type::None);
  let br = b.br(l, None);
  let inner = b.block(Some(l), vec![inner_call, br]);
  let d = b.call_import(FuncId(2), vec![], Type::None);
  f.body = b.block(None, vec![a, inner, d]);
  let out = merged(f);
  assert_eq!(list_of(&out, out.body), vec![a, inner, d]);
  assert_eq!(list_of(&out, inner), vec![inner_call, br]);
}

#[test]
fn s6_consumed_br_if_value_blocks_the_rewrite() {
  let mut f = Function::new("s6", Type::None);
  let cond = f.add_local(Type::I32);
  let dst = f.add_local(Type::I32);
  let l = Label(0);
  let mut b = Builder::new(&mut f);
  let v = b.const_(Literal::I32(1));
  let c = b.get_local(cond);
  let br = b.br_if(l, c, Some(v));
  let consume = b.set_local(dst, br);
  let addr = b.const_(Literal::I32(4));
  let tail = b.load(Type::I32, addr);
  let inner = b.block(Some(l), vec![consume, tail]);
  let dropped = b.make_drop(inner);
  f.body = b.block(None, vec![dropped]);
  let out = merged(f);
  assert_eq!(list_of(&out, out.body), vec![dropped]);
  match &out[dropped].kind {
    ExprKind::Drop { value } => assert_eq!(*value, inner),
    k => panic!("expected drop, got {k:?}"),
  }
}

#[test]
fn s7_select_with_side_effects_is_untouched() {
  let mut f = Function::new("s7", Type::I32);
  let x = f.add_local(Type::I32);
  let mut b = Builder::new(&mut f);
  let call = b.call_import(FuncId(0), vec![], Type::None);
  let val = b.get_local(x);
  let blk = b.block(None, vec![call, val]);
  let other = b.const_(Literal::I32(3));
  let c = b.get_local(x);
  let sel = b.select(blk, other, c);
  f.body = sel;
  let out = merged(f);
  assert_eq!(out.body, sel);
  match &out[sel].kind {
    ExprKind::Select { if_true, .. } => assert_eq!(*if_true, blk),
    k => panic!("expected select, got {k:?}"),
  }
}

#[test]
fn stripping_break_values_lets_the_drop_sink() {
  // (drop (block $l (drop (br_if $l (const 41) (load 0))) (load 200)))
  // every conditional break to $l is dropped and carries a pure value, so
  // the rewrite strips the values and sinks the drop.
  let mut f = Function::new("strip", Type::None);
  let l = Label(0);
  let mut b = Builder::new(&mut f);
  let v41 = b.const_(Literal::I32(41));
  let caddr = b.const_(Literal::I32(0));
  let c = b.load(Type::I32, caddr);
  let br = b.br_if(l, c, Some(v41));
  let dropped_br = b.make_drop(br);
  let addr = b.const_(Literal::I32(200));
  let load = b.load(Type::I32, addr);
  let inner = b.block(Some(l), vec![dropped_br, load]);
  let dropped = b.make_drop(inner);
  f.body = b.block(None, vec![dropped]);
  let out = merged(f);
  // the labeled block is now a none-typed statement holding the sunk drop
  assert_eq!(list_of(&out, out.body), vec![inner]);
  assert_eq!(out[inner].ty, Type::None);
  let list = list_of(&out, inner);
  assert_eq!(list.len(), 3);
  match &out[list[1]].kind {
    ExprKind::Break { condition, value, .. } => {
      assert!(condition.is_some());
      assert!(value.is_none());
    }
    k => panic!("expected break, got {k:?}"),
  }
  match &out[list[2]].kind {
    ExprKind::Drop { value } => assert_eq!(*value, load),
    k => panic!("expected drop, got {k:?}"),
  }
}

#[test]
fn call_arguments_hoist_only_when_pure() {
  let mut f = Function::new("call", Type::None);
  let x = f.add_local(Type::I32);
  let mut b = Builder::new(&mut f);
  let n = b.nop();
  let a0 = b.get_local(x);
  let pure_blk = b.block(None, vec![n, a0]);
  let a1 = b.const_(Literal::I32(5));
  let call = b.call_import(FuncId(0), vec![pure_blk, a1], Type::None);
  f.body = call;
  let out = merged(f);
  assert_eq!(out.body, pure_blk);
  assert_eq!(list_of(&out, out.body), vec![n, call]);

  // the same shape with an effectful block argument stays put
  let mut g = Function::new("call2", Type::None);
  let mut b = Builder::new(&mut g);
  let eff = b.call_import(FuncId(1), vec![], Type::None);
  let a0 = b.const_(Literal::I32(9));
  let eff_blk = b.block(None, vec![eff, a0]);
  let call2 = b.call_import(FuncId(0), vec![eff_blk], Type::None);
  g.body = call2;
  let out = merged(g);
  assert_eq!(out.body, call2);
}

#[test]
fn unreachable_children_pin_blocks_in_place() {
  let mut f = Function::new("unreachable", Type::None);
  let mut b = Builder::new(&mut f);
  let a = b.call_import(FuncId(0), vec![], Type::None);
  let tr = b.unreachable();
  let n = b.nop();
  let inner = b.block(None, vec![tr, n]);
  f.body = b.block(None, vec![a, inner]);
  let out = merged(f);
  assert_eq!(list_of(&out, out.body), vec![a, inner]);
}

#[test]
fn running_twice_changes_nothing_more() {
  let mut f = Function::new("idem", Type::None);
  let mut b = Builder::new(&mut f);
  let call_f = b.call_import(FuncId(0), vec![], Type::None);
  let p = b.const_(Literal::I32(100));
  let ptr_blk = b.block(None, vec![call_f, p]);
  let call_g = b.call_import(FuncId(1), vec![], Type::None);
  let v = b.const_(Literal::I32(200));
  let val_blk = b.block(None, vec![call_g, v]);
  let store = b.store(ptr_blk, val_blk);
  let x = b.call_import(FuncId(2), vec![], Type::None);
  let inner = b.block(None, vec![x]);
  f.body = b.block(None, vec![inner, store]);
  let once = merged(f);
  let twice = merged(once.clone());
  assert_eq!(list_of(&twice, twice.body), list_of(&once, once.body));
  assert_eq!(twice.body, once.body);
}
