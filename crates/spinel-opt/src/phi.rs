//! Redundant phi removal.

use spinel_ir::{InstrKind, Metadata, Shader};

use crate::Pass;
use crate::runner::run_pass;

/// Removes phis whose incoming values, ignoring the phi itself, are all the same.
#[derive(Debug)]
pub struct RedundantPhiRemoval;

impl Pass for RedundantPhiRemoval {
    fn name(&self) -> &str {
        "redundant-phi"
    }

    fn run(&self, shader: &mut Shader) -> bool {
        run_pass(shader, Metadata::ALL, |ctx| {
            let InstrKind::Phi(srcs) = ctx.kind() else {
                return false;
            };
            let this = ctx.instr;
            let mut incoming = srcs.iter().map(|s| s.value).filter(|&v| v != this);
            let Some(first) = incoming.next() else {
                return false;
            };
            if incoming.any(|v| v != first) {
                return false;
            }
            ctx.replace_with(first);
            true
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spinel_ir::{Builder, Def, PhiSrc, Stage, Terminator, validate};

    #[test]
    fn loop_carried_phi_with_one_outside_value_is_removed() {
        let mut shader = Shader::new(Stage::Compute);
        let func = shader.entry_mut();
        let entry = func.entry;
        let header = func.add_block();
        let exit = func.add_block();
        let init = Builder::at_end(func, entry).const_u32(4);
        func.blocks[entry].terminator = Terminator::Jump(header);
        let cond = Builder::at_end(func, header).const_bool(false);
        func.blocks[header].terminator = Terminator::Branch {
            cond,
            then_block: header,
            else_block: exit,
        };
        func.blocks[exit].terminator = Terminator::Return(None);

        let mut b = Builder::at_end(func, header);
        let phi = b.phi(header, Vec::new(), Def::U32);
        let user = b.iadd(phi, phi);
        if let InstrKind::Phi(srcs) = &mut func.instrs[phi].kind {
            srcs.push(PhiSrc {
                pred: entry,
                value: init,
            });
            srcs.push(PhiSrc {
                pred: header,
                value: phi,
            });
        }
        assert_eq!(validate(&shader), Ok(()));

        assert!(RedundantPhiRemoval.run(&mut shader));
        let func = shader.entry();
        assert!(!func.instrs.contains(phi));
        assert_eq!(func.kind(user).srcs(), vec![init, init]);
        assert_eq!(validate(&shader), Ok(()));
    }
}
