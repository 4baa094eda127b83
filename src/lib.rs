//! A tree-structured WebAssembly-like IR and optimization passes over it.
//!
//! Expressions form trees: blocks contain statement lists, breaks target
//! enclosing labeled blocks, and operand-bearing expressions reference
//! their children by [`ir::ExprId`] into a per-function arena. Passes
//! mutate functions in place and run function-parallel over a module; see
//! [`pass::PassRunner`].
//!
//! The only pass so far is [`passes::MergeBlocks`], which flattens nested
//! anonymous blocks and hoists blocks out of operand position so that
//! later cleanups see fewer block boundaries.

#![warn(missing_docs)]

pub mod types;
pub mod ir;
pub mod builder;
pub mod effects;
pub mod visit;
pub mod pass;
pub mod passes;
pub mod validate;
pub mod interp;

pub use builder::Builder;
pub use ir::{Expr, ExprId, ExprKind, FuncId, Function, Label, LocalId, Module};
pub use pass::{Pass, PassOptions, PassRunner};
pub use passes::MergeBlocks;
pub use types::{Literal, Type};
