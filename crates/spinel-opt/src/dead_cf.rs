//! Dead control-flow elimination.
//!
//! Folds branches on constant conditions, drops blocks that became
//! unreachable and merges straight-line block chains. Phis are kept in sync
//! with every edge that disappears or moves.

use std::collections::HashSet;

use spinel_ir::{Block, Function, Handle, InstrKind, Metadata, Shader, Terminator};

use crate::Pass;
use crate::runner::run_function_pass;

/// Removes control flow that can never be taken.
#[derive(Debug)]
pub struct DeadControlFlow;

impl Pass for DeadControlFlow {
    fn name(&self) -> &str {
        "dead-cf"
    }

    fn run(&self, shader: &mut Shader) -> bool {
        run_function_pass(shader, Metadata::NONE, |func| {
            let mut changed = fold_branches(func);
            changed |= remove_unreachable(func);
            changed |= merge_chains(func);
            changed
        })
    }
}

/// Drops the phi operands flowing in from `pred` in `block`.
fn forget_edge(func: &mut Function, pred: Handle<Block>, block: Handle<Block>) {
    let Some(data) = func.blocks.try_get(block) else {
        return;
    };
    for value in data.instrs.clone() {
        match &mut func.instrs[value].kind {
            InstrKind::Phi(srcs) => srcs.retain(|s| s.pred != pred),
            _ => break,
        }
    }
}

fn fold_branches(func: &mut Function) -> bool {
    let mut changed = false;
    for block in func.blocks.handles() {
        let Terminator::Branch {
            cond,
            then_block,
            else_block,
        } = func.blocks[block].terminator
        else {
            continue;
        };
        let (taken, dropped) = if then_block == else_block {
            (then_block, None)
        } else {
            match func.as_uint(cond) {
                Some(0) => (else_block, Some(then_block)),
                Some(_) => (then_block, Some(else_block)),
                None => continue,
            }
        };
        if let Some(dropped) = dropped {
            forget_edge(func, block, dropped);
        }
        func.blocks[block].terminator = Terminator::Jump(taken);
        changed = true;
    }
    changed
}

fn remove_unreachable(func: &mut Function) -> bool {
    let reachable: HashSet<_> = func.reverse_postorder().into_iter().collect();
    let dead: Vec<_> = func
        .blocks
        .handles()
        .into_iter()
        .filter(|b| !reachable.contains(b))
        .collect();
    for &block in &dead {
        for succ in func.successors(block) {
            forget_edge(func, block, succ);
        }
    }
    for &block in &dead {
        func.remove_block(block);
    }
    !dead.is_empty()
}

/// Merges `b` into `a` when `a` jumps unconditionally to `b` and is its only predecessor.
fn merge_chains(func: &mut Function) -> bool {
    let mut changed = false;
    loop {
        let preds = func.predecessors();
        let candidate = func.blocks.iter().find_map(|(a, data)| match data.terminator {
            Terminator::Jump(b)
                if b != a && b != func.entry && preds.get(&b).is_some_and(|p| p.len() == 1) =>
            {
                Some((a, b))
            }
            _ => None,
        });
        let Some((a, b)) = candidate else {
            return changed;
        };

        let moved = std::mem::take(&mut func.blocks[b].instrs);
        let mut body = Vec::with_capacity(moved.len());
        for value in moved {
            // Single-predecessor phis carry exactly one value.
            if let InstrKind::Phi(srcs) = &func.instrs[value].kind {
                let incoming = srcs.first().map(|s| s.value);
                match incoming {
                    Some(v) => {
                        func.replace_all_uses(value, v);
                    }
                    None => {
                        let def = func.def(value);
                        func.instrs[value].kind = InstrKind::Undef;
                        func.instrs[value].def = def;
                        body.push(value);
                        continue;
                    }
                }
                func.instrs.remove(value);
                continue;
            }
            body.push(value);
        }
        for &value in &body {
            func.instrs[value].block = a;
        }
        func.blocks[a].instrs.extend(body);

        let terminator = std::mem::replace(&mut func.blocks[b].terminator, Terminator::Unreachable);
        for succ in terminator.successors() {
            let Some(data) = func.blocks.try_get(succ) else {
                continue;
            };
            for value in data.instrs.clone() {
                match &mut func.instrs[value].kind {
                    InstrKind::Phi(srcs) => {
                        for src in srcs.iter_mut().filter(|s| s.pred == b) {
                            src.pred = a;
                        }
                    }
                    _ => break,
                }
            }
        }
        func.blocks[a].terminator = terminator;
        func.remove_block(b);
        changed = true;
    }
}
