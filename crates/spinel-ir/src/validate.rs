//! SSA well-formedness checks.

use std::collections::{HashMap, HashSet};

use crate::arena::Handle;
use crate::error::IrError;
use crate::func::{Block, Function};
use crate::instr::{DerefKind, InstrKind, Value};
use crate::metadata::DomTree;
use crate::shader::Shader;

/// Checks every function of `shader`, returning the first violation found.
///
/// Unreachable blocks are only checked structurally, since dominance is
/// meaningless there.
pub fn validate(shader: &Shader) -> Result<(), IrError> {
    for (_, func) in shader.functions.iter() {
        validate_function(shader, func)?;
    }
    Ok(())
}

pub fn validate_function(shader: &Shader, func: &Function) -> Result<(), IrError> {
    let name = || func.name.clone().unwrap_or_else(|| "<unnamed>".into());
    let dom = DomTree::compute(func);
    let preds = func.predecessors();

    // Block membership and position of every instruction.
    let mut position = HashMap::new();
    for (block, data) in func.blocks.iter() {
        let mut seen_non_phi = false;
        for (index, &value) in data.instrs.iter().enumerate() {
            let Some(instr) = func.instrs.try_get(value) else {
                return Err(IrError::DanglingOperand {
                    function: name(),
                    user: value.index(),
                    operand: value.index(),
                });
            };
            if instr.block != block {
                return Err(IrError::BlockMismatch {
                    function: name(),
                    instr: value.index(),
                    listed: block.index(),
                    recorded: instr.block.index(),
                });
            }
            if instr.kind.is_phi() {
                if seen_non_phi {
                    return Err(IrError::MisplacedPhi {
                        function: name(),
                        phi: value.index(),
                    });
                }
            } else {
                seen_non_phi = true;
            }
            position.insert(value, (block, index));
        }
        for target in data.terminator.successors() {
            if !func.blocks.contains(target) {
                return Err(IrError::BadBranchTarget {
                    function: name(),
                    block: block.index(),
                    target: target.index(),
                });
            }
        }
    }

    let check_operand = |user: usize, operand: Value| -> Result<(), IrError> {
        match func.instrs.try_get(operand) {
            None => Err(IrError::DanglingOperand {
                function: name(),
                user,
                operand: operand.index(),
            }),
            Some(i) if i.def.is_none() => Err(IrError::MissingDef {
                function: name(),
                user,
                operand: operand.index(),
            }),
            Some(_) => Ok(()),
        }
    };

    let dominates_use = |def: Value, use_block: Handle<Block>, use_index: usize| {
        let Some(&(def_block, def_index)) = position.get(&def) else {
            return false;
        };
        if def_block == use_block {
            def_index < use_index
        } else {
            dom.dominates(def_block, use_block)
        }
    };

    for (block, data) in func.blocks.iter() {
        let reachable = dom.is_reachable(block);
        for (index, &value) in data.instrs.iter().enumerate() {
            let instr = &func.instrs[value];
            match &instr.kind {
                InstrKind::Phi(srcs) => {
                    let expected: HashSet<_> = preds
                        .get(&block)
                        .map(|p| p.iter().copied().filter(|&b| dom.is_reachable(b)).collect())
                        .unwrap_or_default();
                    let actual: HashSet<_> = srcs.iter().map(|s| s.pred).collect();
                    if reachable && (expected != actual || actual.len() != srcs.len()) {
                        return Err(IrError::PhiPredecessorMismatch {
                            function: name(),
                            phi: value.index(),
                            block: block.index(),
                        });
                    }
                    for src in srcs {
                        check_operand(value.index(), src.value)?;
                        let pred_end = func
                            .blocks
                            .try_get(src.pred)
                            .map_or(0, |b| b.instrs.len());
                        if reachable && !dominates_use(src.value, src.pred, pred_end) {
                            return Err(IrError::NotDominated {
                                function: name(),
                                user: value.index(),
                                operand: src.value.index(),
                            });
                        }
                    }
                }
                kind => {
                    for src in kind.srcs() {
                        check_operand(value.index(), src)?;
                        if reachable && !dominates_use(src, block, index) {
                            return Err(IrError::NotDominated {
                                function: name(),
                                user: value.index(),
                                operand: src.index(),
                            });
                        }
                    }
                    if let InstrKind::Deref(deref) = kind
                        && let DerefKind::Var(var) = deref.kind
                        && !shader.variables.contains(var)
                    {
                        return Err(IrError::DanglingVariable {
                            function: name(),
                            deref: value.index(),
                            variable: var.index(),
                        });
                    }
                }
            }
        }
        for src in data.terminator.srcs() {
            // Terminators report themselves as the block's last slot.
            let user = data.instrs.last().map_or(0, |v| v.index());
            check_operand(user, src)?;
            if reachable && !dominates_use(src, block, data.instrs.len()) {
                return Err(IrError::NotDominated {
                    function: name(),
                    user,
                    operand: src.index(),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::Builder;
    use crate::func::Terminator;
    use crate::instr::{Def, PhiSrc};
    use crate::shader::Stage;

    #[test]
    fn straight_line_code_is_valid() {
        let mut shader = Shader::new(Stage::Compute);
        let entry = shader.entry().entry;
        let mut b = Builder::at_end(shader.entry_mut(), entry);
        let x = b.const_u32(1);
        let y = b.const_u32(2);
        b.iadd(x, y);
        assert_eq!(validate(&shader), Ok(()));
    }

    #[test]
    fn use_of_removed_value_is_reported() {
        let mut shader = Shader::new(Stage::Compute);
        let entry = shader.entry().entry;
        let mut b = Builder::at_end(shader.entry_mut(), entry);
        let x = b.const_u32(1);
        b.iadd(x, x);
        shader.entry_mut().remove_instr(x);
        assert!(matches!(
            validate(&shader),
            Err(IrError::DanglingOperand { .. })
        ));
    }

    #[test]
    fn use_before_def_is_reported() {
        let mut shader = Shader::new(Stage::Compute);
        let entry = shader.entry().entry;
        let func = shader.entry_mut();
        let x = Builder::at_end(func, entry).const_u32(1);
        Builder::at_end(func, entry).iadd(x, x);
        // Move the constant after its user.
        func.blocks[entry].instrs.retain(|&v| v != x);
        func.blocks[entry].instrs.push(x);
        assert!(matches!(
            validate(&shader),
            Err(IrError::NotDominated { .. })
        ));
    }

    #[test]
    fn phi_must_cover_every_predecessor() {
        let mut shader = Shader::new(Stage::Compute);
        let func = shader.entry_mut();
        let entry = func.entry;
        let left = func.add_block();
        let right = func.add_block();
        let join = func.add_block();
        let (cond, one) = {
            let mut b = Builder::at_end(func, entry);
            (b.const_bool(true), b.const_u32(1))
        };
        func.blocks[entry].terminator = Terminator::Branch {
            cond,
            then_block: left,
            else_block: right,
        };
        func.blocks[left].terminator = Terminator::Jump(join);
        func.blocks[right].terminator = Terminator::Jump(join);
        func.blocks[join].terminator = Terminator::Return(None);
        let phi = Builder::at_end(func, join).phi(
            join,
            vec![PhiSrc {
                pred: left,
                value: one,
            }],
            Def::U32,
        );
        assert!(matches!(
            validate(&shader),
            Err(IrError::PhiPredecessorMismatch { .. })
        ));

        let func = shader.entry_mut();
        if let InstrKind::Phi(srcs) = &mut func.instrs[phi].kind {
            srcs.push(PhiSrc {
                pred: right,
                value: one,
            });
        }
        assert_eq!(validate(&shader), Ok(()));
    }
}
