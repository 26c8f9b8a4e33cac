//! IR validation pass.
//!
//! Checks SSA well-formedness and logs a warning for the first problem found.
//! This pass never modifies the shader.

use spinel_ir::Shader;

use crate::Pass;

/// Validates SSA invariants. Returns `false` (never modifies the shader).
#[derive(Debug)]
pub struct IrValidation;

impl Pass for IrValidation {
    fn name(&self) -> &str {
        "ir-validation"
    }

    fn run(&self, shader: &mut Shader) -> bool {
        if let Err(err) = spinel_ir::validate(shader) {
            log::warn!("{} shader failed validation: {err}", shader.stage());
        }
        for (i, &size) in shader.info.workgroup_size.iter().enumerate() {
            if size == 0 {
                log::warn!("workgroup_size[{i}] = 0");
            }
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spinel_ir::{Builder, Stage};

    #[test]
    fn validation_never_reports_progress() {
        let mut shader = Shader::new(Stage::Compute);
        let entry = shader.entry().entry;
        let mut b = Builder::at_end(shader.entry_mut(), entry);
        let x = b.const_u32(1);
        b.iadd(x, x);
        shader.entry_mut().remove_instr(x);

        let before = shader.instr_count();
        assert!(!IrValidation.run(&mut shader));
        assert_eq!(shader.instr_count(), before);
    }
}
