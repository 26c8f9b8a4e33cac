//! Dead code elimination pass.
//!
//! Marks every instruction reachable through operands from side-effecting
//! instructions and block terminators, then removes the rest. Dead phi cycles
//! go away together since nothing outside the cycle marks them.

use std::collections::HashSet;

use spinel_ir::{Function, Metadata, Shader, Value};

use crate::Pass;
use crate::runner::run_function_pass;

/// Removes instructions whose values are never observed.
#[derive(Debug)]
pub struct DeadCodeElimination;

impl Pass for DeadCodeElimination {
    fn name(&self) -> &str {
        "dce"
    }

    fn run(&self, shader: &mut Shader) -> bool {
        run_function_pass(shader, Metadata::ALL, run_on_function)
    }
}

fn run_on_function(func: &mut Function) -> bool {
    let mut live: HashSet<Value> = HashSet::new();
    let mut worklist: Vec<Value> = Vec::new();

    for (value, instr) in func.instrs.iter() {
        if instr.kind.has_side_effects() {
            worklist.push(value);
        }
    }
    for (_, block) in func.blocks.iter() {
        worklist.extend(block.terminator.srcs());
    }

    while let Some(value) = worklist.pop() {
        if !live.insert(value) {
            continue;
        }
        if let Some(instr) = func.instrs.try_get(value) {
            worklist.extend(instr.kind.srcs());
        }
    }

    let dead: Vec<Value> = func
        .instrs
        .iter()
        .map(|(h, _)| h)
        .filter(|h| !live.contains(h))
        .collect();
    for &value in &dead {
        func.remove_instr(value);
    }
    !dead.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use spinel_ir::{
        AluOp, Builder, Def, Mode, PhiSrc, Scalar, Stage, Terminator, TypeInner, Variable,
        validate,
    };

    #[test]
    fn removes_unused_arithmetic() {
        let mut shader = Shader::new(Stage::Compute);
        let entry = shader.entry().entry;
        let mut b = Builder::at_end(shader.entry_mut(), entry);
        let x = b.const_u32(1);
        b.iadd(x, x);
        assert!(DeadCodeElimination.run(&mut shader));
        assert!(shader.entry().instrs.is_empty());
        assert!(!DeadCodeElimination.run(&mut shader));
        assert_eq!(validate(&shader), Ok(()));
    }

    #[test]
    fn keeps_stores_and_their_operands() {
        let mut shader = Shader::new(Stage::Compute);
        let ty = shader.add_type(TypeInner::Scalar(Scalar::U32));
        let var = shader.add_variable(Variable::new("out", ty, Mode::Ssbo));
        let entry = shader.entry().entry;
        let mut b = Builder::at_end(shader.entry_mut(), entry);
        let x = b.const_u32(7);
        let d = b.deref_var(var, Mode::Ssbo, ty);
        b.store_deref(d, x);
        b.alu(AluOp::INot, &[x]);

        assert!(DeadCodeElimination.run(&mut shader));
        assert_eq!(shader.entry().instrs.len(), 3);
        assert_eq!(validate(&shader), Ok(()));
    }

    #[test]
    fn keeps_branch_conditions_and_drops_dead_phi_cycles() {
        let mut shader = Shader::new(Stage::Compute);
        let func = shader.entry_mut();
        let entry = func.entry;
        let header = func.add_block();
        let exit = func.add_block();
        let zero = Builder::at_end(func, entry).const_u32(0);
        func.blocks[entry].terminator = Terminator::Jump(header);
        let mut b = Builder::at_end(func, header);
        let phi = b.phi(header, Vec::new(), Def::U32);
        let next = b.iadd_imm(phi, 1);
        let cond = b.undef(Def::BOOL);
        func.blocks[header].terminator = Terminator::Branch {
            cond,
            then_block: header,
            else_block: exit,
        };
        func.blocks[exit].terminator = Terminator::Return(None);
        if let spinel_ir::InstrKind::Phi(srcs) = &mut func.instrs[phi].kind {
            *srcs = vec![
                PhiSrc {
                    pred: entry,
                    value: zero,
                },
                PhiSrc {
                    pred: header,
                    value: next,
                },
            ];
        }

        assert!(DeadCodeElimination.run(&mut shader));
        let func = shader.entry();
        assert!(func.instrs.contains(cond));
        assert!(!func.instrs.contains(phi));
        assert!(!func.instrs.contains(next));
        assert_eq!(func.instrs.len(), 1);
        assert_eq!(validate(&shader), Ok(()));
    }
}
