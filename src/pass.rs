//! The pass abstraction and the function-parallel runner.

use std::time::Instant;
use rayon::prelude::*;
use tracing::debug;
use crate::ir::{Function, Module};

/// Configuration forwarded to passes and to the effect analyzer.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassOptions {
  /// Treat loads and stores as unable to trap. This lets more code move,
  /// at the cost of reordering a potential out-of-bounds trap.
  pub ignore_implicit_traps: bool,
}

/// A module transformation applied one function at a time.
///
/// Function-parallel passes are run concurrently over independent
/// functions; all state a run touches must be local to the function, which
/// holds its own node arena.
pub trait Pass: Sync {
  /// The pass name, for diagnostics.
  fn name(&self) -> &'static str;

  /// Whether independent functions may be transformed concurrently.
  fn is_function_parallel(&self) -> bool { true }

  /// Transform one function in place.
  fn run_function(&self, options: &PassOptions, func: &mut Function);
}

/// Runs passes over a module.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassRunner {
  /// Options forwarded to every pass.
  pub options: PassOptions,
}

impl PassRunner {
  /// Create a runner with the given options.
  #[must_use] pub fn new(options: PassOptions) -> Self { PassRunner { options } }

  /// Run a single pass over every function of the module.
  pub fn run(&self, pass: &dyn Pass, module: &mut Module) {
    let start = Instant::now();
    if pass.is_function_parallel() {
      module
        .functions
        .par_iter_mut()
        .for_each(|func| pass.run_function(&self.options, func));
    } else {
      for func in &mut module.functions {
        pass.run_function(&self.options, func);
      }
    }
    debug!(pass = pass.name(), elapsed = ?start.elapsed(), "pass finished");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::ir::Function;
  use crate::types::Type;

  struct Rename;
  impl Pass for Rename {
    fn name(&self) -> &'static str { "rename" }
    fn run_function(&self, _: &PassOptions, func: &mut Function) {
      func.name.push('!');
    }
  }

  #[test]
  fn runs_over_every_function() {
    let mut module = Module::default();
    module.add_function(Function::new("a", Type::None));
    module.add_function(Function::new("b", Type::None));
    PassRunner::default().run(&Rename, &mut module);
    assert_eq!(module.functions[0].name, "a!");
    assert_eq!(module.functions[1].name, "b!");
  }
}
