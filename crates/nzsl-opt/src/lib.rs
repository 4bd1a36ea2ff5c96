//! AST optimization passes.
//!
//! Provides a [`Pass`] trait, a [`PassManager`] with fixed-point iteration,
//! and the built-in passes: constant propagation and unused-declaration
//! elimination. Passes are pure functions from a module to a module; the
//! trait surface mutates in place by replacement so the manager can detect
//! convergence.

mod const_prop;
mod eliminate;

pub use const_prop::{
    propagate_constants, propagate_expression, propagate_statement, ConstantPropagation,
    ConstantQuery,
};
pub use eliminate::{eliminate_unused, DependencyConfig, EliminateUnused};

use nzsl_ast::{Error, Module};

/// An optimization pass over a sanitized module.
pub trait Pass {
    /// Human-readable name of the pass.
    fn name(&self) -> &str;

    /// Runs the pass. Returns `true` if the module changed.
    fn run(&self, module: &mut Module) -> Result<bool, Error>;
}

/// Maximum number of fixed-point iterations before giving up.
const MAX_ITERATIONS: usize = 10;

/// Runs passes in sequence until a fixed point is reached.
#[derive(Default)]
pub struct PassManager {
    passes: Vec<Box<dyn Pass>>,
}

impl PassManager {
    /// Creates an empty pass manager with no passes.
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard optimizing pipeline: propagate constants, then drop
    /// everything unreachable from the entry points.
    pub fn optimizing(config: DependencyConfig) -> Self {
        let mut manager = Self::new();
        manager.add_pass(Box::new(ConstantPropagation));
        manager.add_pass(Box::new(EliminateUnused::new(config)));
        manager
    }

    /// Adds a pass to the pipeline.
    pub fn add_pass(&mut self, pass: Box<dyn Pass>) {
        self.passes.push(pass);
    }

    /// Runs all passes until nothing changes or the iteration limit hits.
    pub fn run(&self, module: &mut Module) -> Result<(), Error> {
        for iteration in 0..MAX_ITERATIONS {
            let mut changed = false;
            for pass in &self.passes {
                let pass_changed = pass.run(module)?;
                log::debug!(
                    "pass {} iteration {iteration}: {}",
                    pass.name(),
                    if pass_changed { "changed" } else { "no change" }
                );
                changed |= pass_changed;
            }
            if !changed {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nzsl_ast::{Metadata, ShaderStageFlags};

    #[test]
    fn empty_module_converges() {
        let mut module = Module::new(Metadata::default());
        let manager = PassManager::optimizing(DependencyConfig {
            used_shader_stages: ShaderStageFlags::ALL,
        });
        manager.run(&mut module).unwrap();
        assert!(module.root_statements().is_empty());
    }

    #[test]
    fn empty_manager_is_noop() {
        let mut module = Module::new(Metadata::default());
        PassManager::new().run(&mut module).unwrap();
        assert!(module.imported_modules.is_empty());
    }
}
