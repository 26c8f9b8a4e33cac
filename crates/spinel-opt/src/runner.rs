//! Instruction-walking pass runner.
//!
//! Every rewriting pass in Spinel is a callback over instructions. The runner
//! walks each block from a snapshot of its instruction list, so callbacks may
//! delete the current instruction or insert around it without disturbing the
//! walk. Handles removed by an earlier callback are skipped.

use std::mem;

use spinel_ir::{
    Builder, Cursor, Def, Function, Handle, InstrKind, IntrinsicOp, Metadata, Shader, Value,
};

/// What a callback sees: the shader with the current function detached, the
/// function itself, and the instruction being visited.
///
/// While the callback runs, `shader.functions[function]` holds an empty
/// placeholder; everything about the function must be read through `func`.
pub struct InstrCtx<'a> {
    pub shader: &'a mut Shader,
    pub func: &'a mut Function,
    pub function: Handle<Function>,
    pub instr: Value,
}

impl InstrCtx<'_> {
    pub fn kind(&self) -> &InstrKind {
        &self.func.instrs[self.instr].kind
    }

    pub fn def(&self) -> Option<Def> {
        self.func.instrs[self.instr].def
    }

    /// Builder inserting immediately before the current instruction.
    pub fn before(&mut self) -> Builder<'_> {
        Builder::new(self.func, Cursor::Before(self.instr))
    }

    /// Builder inserting immediately after the current instruction.
    pub fn after(&mut self) -> Builder<'_> {
        Builder::new(self.func, Cursor::After(self.instr))
    }

    /// Redirects every use of the current instruction to `value` and removes it.
    pub fn replace_with(&mut self, value: Value) {
        self.func.replace_all_uses(self.instr, value);
        self.func.remove_instr(self.instr);
    }

    /// Removes the current instruction. Its value must have no remaining uses.
    pub fn remove(&mut self) {
        self.func.remove_instr(self.instr);
    }
}

/// Calls `callback` on every live instruction of every function.
///
/// If any callback reports progress, the cached analyses of every function are
/// reduced to `preserved`.
pub fn run_pass<F>(shader: &mut Shader, preserved: Metadata, callback: F) -> bool
where
    F: FnMut(&mut InstrCtx<'_>) -> bool,
{
    walk(shader, preserved, |_| true, callback)
}

/// Like [`run_pass`], but only visits intrinsics whose op is in `ops`.
pub fn run_intrinsics_pass<F>(
    shader: &mut Shader,
    ops: &[IntrinsicOp],
    preserved: Metadata,
    callback: F,
) -> bool
where
    F: FnMut(&mut InstrCtx<'_>) -> bool,
{
    walk(
        shader,
        preserved,
        |kind| matches!(kind, InstrKind::Intrinsic(intrinsic) if ops.contains(&intrinsic.op())),
        callback,
    )
}

/// Calls `callback` once per function, with the same metadata contract as [`run_pass`].
pub fn run_function_pass<F>(shader: &mut Shader, preserved: Metadata, mut callback: F) -> bool
where
    F: FnMut(&mut Function) -> bool,
{
    let mut progress = false;
    for (_, func) in shader.functions.iter_mut() {
        progress |= callback(func);
    }
    if progress {
        invalidate(shader, preserved);
    }
    progress
}

fn walk<P, F>(shader: &mut Shader, preserved: Metadata, filter: P, mut callback: F) -> bool
where
    P: Fn(&InstrKind) -> bool,
    F: FnMut(&mut InstrCtx<'_>) -> bool,
{
    let mut progress = false;
    let functions: Vec<_> = shader.functions.handles().collect();

    for function in functions {
        let mut func = mem::take(&mut shader.functions[function]);
        for block in func.blocks.handles() {
            let Some(data) = func.blocks.try_get(block) else {
                continue;
            };
            let snapshot = data.instrs.clone();
            for instr in snapshot {
                match func.instrs.try_get(instr) {
                    Some(i) if filter(&i.kind) => {}
                    _ => continue,
                }
                let mut ctx = InstrCtx {
                    shader: &mut *shader,
                    func: &mut func,
                    function,
                    instr,
                };
                progress |= callback(&mut ctx);
            }
        }
        shader.functions[function] = func;
    }

    if progress {
        invalidate(shader, preserved);
    }
    progress
}

fn invalidate(shader: &mut Shader, preserved: Metadata) {
    for (_, func) in shader.functions.iter_mut() {
        func.preserve_metadata(preserved);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spinel_ir::{AluOp, Intrinsic, Stage, SystemValue};

    #[test]
    fn callbacks_may_delete_and_insert() {
        let mut shader = Shader::new(Stage::Compute);
        let entry = shader.entry().entry;
        let mut b = Builder::at_end(shader.entry_mut(), entry);
        let a = b.const_u32(1);
        let copy = b.alu(AluOp::Mov, &[a]);
        b.iadd(copy, copy);

        let mut visited = 0;
        let changed = run_pass(&mut shader, Metadata::NONE, |ctx| {
            visited += 1;
            if let InstrKind::Alu {
                op: AluOp::Mov,
                srcs,
            } = ctx.kind()
            {
                let src = srcs[0];
                let doubled = ctx.before().iadd(src, src);
                ctx.replace_with(doubled);
                return true;
            }
            false
        });

        assert!(changed);
        // The instruction inserted during the walk is not part of the snapshot.
        assert_eq!(visited, 3);
        let func = shader.entry();
        assert_eq!(func.instrs.len(), 3);
        assert!(!func.instrs.contains(copy));
    }

    #[test]
    fn intrinsics_filter_by_op() {
        let mut shader = Shader::new(Stage::Compute);
        let entry = shader.entry().entry;
        let mut b = Builder::at_end(shader.entry_mut(), entry);
        b.const_u32(0);
        b.load_system_value(SystemValue::LocalInvocationIndex);
        b.intrinsic(Intrinsic::Barrier, None);

        let mut seen = Vec::new();
        let changed = run_intrinsics_pass(
            &mut shader,
            &[IntrinsicOp::LoadSystemValue],
            Metadata::ALL,
            |ctx| {
                seen.push(ctx.instr);
                false
            },
        );
        assert!(!changed);
        assert_eq!(seen.len(), 1);
    }

    #[test]
    fn metadata_is_reduced_only_on_progress() {
        let mut shader = Shader::new(Stage::Compute);
        let entry = shader.entry().entry;
        Builder::at_end(shader.entry_mut(), entry).const_u32(0);
        let _ = shader.entry_mut().dominance();

        run_pass(&mut shader, Metadata::NONE, |_| false);
        assert!(shader.entry().valid_metadata().contains(Metadata::DOMINANCE));

        run_pass(&mut shader, Metadata::BLOCK_INDEX, |_| true);
        assert!(!shader.entry().valid_metadata().contains(Metadata::DOMINANCE));
    }
}
