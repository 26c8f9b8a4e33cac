//! Optimization passes for Spinel shaders.
//!
//! Provides a [`Pass`] trait, a [`PassManager`] that iterates a pass list to
//! a fixed point, the instruction-walking runner every lowering pass is built
//! on, and the standard simplification passes.

mod algebraic;
mod const_fold;
mod copy_prop;
mod cse;
mod dce;
mod dead_cf;
mod dead_vars;
mod licm;
mod phi;
mod runner;
mod validation;

pub use algebraic::AlgebraicSimplification;
pub use const_fold::ConstantFolding;
pub use copy_prop::CopyPropagation;
pub use cse::CommonSubexprElimination;
pub use dce::DeadCodeElimination;
pub use dead_cf::DeadControlFlow;
pub use dead_vars::{RemoveDeadVariables, remove_dead_variables};
pub use licm::LoopInvariantHoisting;
pub use phi::RedundantPhiRemoval;
pub use runner::{InstrCtx, run_function_pass, run_intrinsics_pass, run_pass};
pub use validation::IrValidation;

use std::fmt::Debug;

use spinel_ir::Shader;

/// A transformation over a whole shader.
///
/// Every pass must preserve SSA validity and must not grow the program in a
/// way an earlier pass in the same list could undo, or the driver would cycle.
pub trait Pass: Debug {
    /// Human-readable name of the pass.
    fn name(&self) -> &str;

    /// Runs the pass. Returns `true` if anything was modified.
    fn run(&self, shader: &mut Shader) -> bool;
}

/// Optimization level.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OptLevel {
    /// No optimizations.
    O0,
    /// The standard simplification loop.
    #[default]
    O1,
    /// Same as O1 followed by a validation sweep.
    O2,
}

/// Maximum number of rounds before the driver gives up on reaching a fixed point.
const MAX_ITERATIONS: usize = 32;

/// Runs passes in sequence until a whole round makes no progress.
#[derive(Debug)]
pub struct PassManager {
    passes: Vec<Box<dyn Pass>>,
}

impl Default for PassManager {
    fn default() -> Self {
        Self::new()
    }
}

impl PassManager {
    /// Creates an empty pass manager with no passes.
    pub fn new() -> Self {
        Self { passes: Vec::new() }
    }

    /// Creates a pass manager with the passes of the given level.
    pub fn for_level(level: OptLevel) -> Self {
        let mut pm = Self::new();
        match level {
            OptLevel::O0 => {}
            OptLevel::O1 | OptLevel::O2 => {
                pm.add_pass(Box::new(CopyPropagation));
                pm.add_pass(Box::new(ConstantFolding));
                pm.add_pass(Box::new(AlgebraicSimplification));
                pm.add_pass(Box::new(CommonSubexprElimination));
                pm.add_pass(Box::new(RedundantPhiRemoval));
                pm.add_pass(Box::new(DeadControlFlow));
                pm.add_pass(Box::new(LoopInvariantHoisting));
                pm.add_pass(Box::new(DeadCodeElimination));
                if level == OptLevel::O2 {
                    pm.add_pass(Box::new(IrValidation));
                }
            }
        }
        pm
    }

    /// Adds a pass to the end of the list.
    pub fn add_pass(&mut self, pass: Box<dyn Pass>) {
        self.passes.push(pass);
    }

    /// Names of the scheduled passes, in order.
    pub fn pass_names(&self) -> Vec<&str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    /// Runs all passes until a fixed point is reached or the iteration limit.
    ///
    /// Returns `true` if any pass changed the shader.
    pub fn run(&self, shader: &mut Shader) -> bool {
        let mut any = false;
        for round in 0..MAX_ITERATIONS {
            let mut changed = false;
            for pass in &self.passes {
                if pass.run(shader) {
                    log::debug!("round {round}: {} made progress", pass.name());
                    changed = true;
                }
            }
            if !changed {
                return any;
            }
            any = true;
        }
        log::warn!(
            "optimization did not reach a fixed point after {MAX_ITERATIONS} rounds ({} instructions left)",
            shader.instr_count()
        );
        any
    }
}

/// Runs the O1 pass list on a shader. Returns `true` if anything changed.
pub fn optimize(shader: &mut Shader) -> bool {
    PassManager::for_level(OptLevel::O1).run(shader)
}
