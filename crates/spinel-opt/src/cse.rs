//! Common subexpression elimination.
//!
//! Walks the reachable blocks in reverse postorder, keys every reorderable
//! instruction by its kind and result shape, and rewrites later duplicates
//! to an earlier occurrence that dominates them. Operands of commutative ALU
//! ops are sorted so `a + b` and `b + a` share a key.

use std::collections::HashMap;

use spinel_ir::{Def, Function, InstrKind, Metadata, Shader, Value};

use crate::Pass;
use crate::runner::run_function_pass;

/// Common subexpression elimination pass.
#[derive(Debug)]
pub struct CommonSubexprElimination;

impl Pass for CommonSubexprElimination {
    fn name(&self) -> &str {
        "cse"
    }

    fn run(&self, shader: &mut Shader) -> bool {
        run_function_pass(shader, Metadata::ALL, run_on_function)
    }
}

fn canonical(kind: &InstrKind) -> InstrKind {
    let mut kind = kind.clone();
    if let InstrKind::Alu { op, srcs } = &mut kind
        && op.is_commutative()
        && srcs.len() == 2
    {
        srcs.sort();
    }
    kind
}

fn run_on_function(func: &mut Function) -> bool {
    let dom = func.dominance();
    let mut seen: HashMap<(InstrKind, Option<Def>), Vec<Value>> = HashMap::new();
    let mut changed = false;

    for &block in dom.rpo() {
        let instrs = func.blocks[block].instrs.clone();
        for value in instrs {
            let Some(instr) = func.instrs.try_get(value) else {
                continue;
            };
            if !instr.kind.can_reorder() {
                continue;
            }
            let key = (canonical(&instr.kind), instr.def);
            let candidates = seen.entry(key).or_default();
            let existing = candidates.iter().copied().find(|&c| {
                let def_block = func.instrs[c].block;
                def_block == block || dom.dominates(def_block, block)
            });
            match existing {
                Some(earlier) => {
                    func.replace_all_uses(value, earlier);
                    func.remove_instr(value);
                    changed = true;
                }
                None => candidates.push(value),
            }
        }
    }
    changed
}
