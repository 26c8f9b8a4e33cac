//! Loop-invariant code motion.
//!
//! Moves pure instructions whose operands are all defined outside a loop to
//! the end of the loop's preheader. Loops without a preheader are skipped.
//! Loops are visited innermost first, so an invariant can climb several
//! levels within one run.

use spinel_ir::{Function, InstrKind, Metadata, Shader};

use crate::Pass;
use crate::runner::run_function_pass;

/// Hoists loop-invariant instructions into loop preheaders.
#[derive(Debug)]
pub struct LoopInvariantHoisting;

impl Pass for LoopInvariantHoisting {
    fn name(&self) -> &str {
        "licm"
    }

    fn run(&self, shader: &mut Shader) -> bool {
        // Only instructions move; the CFG and its analyses stay intact.
        run_function_pass(shader, Metadata::ALL, run_on_function)
    }
}

fn is_hoistable(kind: &InstrKind) -> bool {
    matches!(
        kind,
        InstrKind::Const(_) | InstrKind::Undef | InstrKind::Alu { .. } | InstrKind::Deref(_)
    )
}

fn run_on_function(func: &mut Function) -> bool {
    let loops = func.loops();
    if loops.is_empty() {
        return false;
    }
    let dom = func.dominance();
    let mut changed = false;

    for l in &loops.loops {
        let Some(preheader) = l.preheader else {
            continue;
        };
        for &block in dom.rpo().iter().filter(|&&b| l.contains(b)) {
            for value in func.blocks[block].instrs.clone() {
                let instr = &func.instrs[value];
                if !is_hoistable(&instr.kind) {
                    continue;
                }
                let invariant = instr
                    .kind
                    .srcs()
                    .iter()
                    .all(|&src| func.instrs.try_get(src).is_some_and(|s| !l.contains(s.block)));
                if !invariant {
                    continue;
                }
                func.blocks[block].instrs.retain(|&v| v != value);
                func.blocks[preheader].instrs.push(value);
                func.instrs[value].block = preheader;
                changed = true;
            }
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;
    use spinel_ir::{Builder, Def, PhiSrc, Stage, Terminator, validate};

    #[test]
    fn hoists_invariant_arithmetic() {
        let mut shader = Shader::new(Stage::Compute);
        let func = shader.entry_mut();
        let entry = func.entry;
        let header = func.add_block();
        let exit = func.add_block();
        let n = Builder::at_end(func, entry).undef(Def::U32);
        func.blocks[entry].terminator = Terminator::Jump(header);

        let mut b = Builder::at_end(func, header);
        let i = b.phi(header, Vec::new(), Def::U32);
        let doubled = b.iadd(n, n);
        let next = b.iadd(i, doubled);
        let cond = b.alu(spinel_ir::AluOp::ULt, &[next, n]);
        func.blocks[header].terminator = Terminator::Branch {
            cond,
            then_block: header,
            else_block: exit,
        };
        func.blocks[exit].terminator = Terminator::Return(None);
        let zero = Builder::at_end(func, entry).const_u32(0);
        if let InstrKind::Phi(srcs) = &mut func.instrs[i].kind {
            srcs.push(PhiSrc {
                pred: entry,
                value: zero,
            });
            srcs.push(PhiSrc {
                pred: header,
                value: next,
            });
        }
        assert_eq!(validate(&shader), Ok(()));

        assert!(LoopInvariantHoisting.run(&mut shader));
        let func = shader.entry();
        assert_eq!(func.instrs[doubled].block, func.entry);
        assert_eq!(func.instrs[next].block, header);
        assert_eq!(validate(&shader), Ok(()));
        assert!(!LoopInvariantHoisting.run(&mut shader));
    }
}
