//! Post-order rewriting traversal.
//!
//! The walker recurses into every child slot in evaluation order, writes
//! any replacement back into the parent's slot, and then visits the node
//! itself. Returning a different id from [`Rewriter::visit`] replaces the
//! current node in whatever slot refers to it (the body slot at the root).

use crate::ir::{ExprId, Function};

/// A post-order visitor that may replace the node it visits.
pub trait Rewriter {
  /// Visit `id` after all of its children. The returned id is written into
  /// the parent's child slot; return `id` itself to keep the node.
  fn visit(&mut self, func: &mut Function, id: ExprId) -> ExprId;
}

/// Rewrite the subtree rooted at `root`, returning the (possibly new) root.
pub fn rewrite_subtree(func: &mut Function, root: ExprId, v: &mut impl Rewriter) -> ExprId {
  let kids = func.children(root);
  for (i, &child) in kids.iter().enumerate() {
    let new = rewrite_subtree(func, child, v);
    if new != child {
      func.set_child(root, i, new);
    }
  }
  v.visit(func, root)
}

/// Rewrite a whole function body in post order.
pub fn rewrite_function(func: &mut Function, v: &mut impl Rewriter) {
  let body = func.body;
  func.body = rewrite_subtree(func, body, v);
}
