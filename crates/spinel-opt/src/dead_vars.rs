//! Dead variable removal.

use std::collections::HashSet;

use spinel_ir::{DerefKind, InstrKind, ModeSet, Shader};

use crate::Pass;

/// Removes variables of the given modes that no deref names.
///
/// Runs before layout assignment so dead variables take up no memory.
#[derive(Debug)]
pub struct RemoveDeadVariables {
    pub modes: ModeSet,
}

impl Pass for RemoveDeadVariables {
    fn name(&self) -> &str {
        "dead-vars"
    }

    fn run(&self, shader: &mut Shader) -> bool {
        remove_dead_variables(shader, self.modes)
    }
}

/// Removes unreferenced variables whose mode is in `modes`. Returns `true` if
/// any variable was removed.
pub fn remove_dead_variables(shader: &mut Shader, modes: ModeSet) -> bool {
    let mut referenced = HashSet::new();
    for (_, func) in shader.functions.iter() {
        for (_, instr) in func.instrs.iter() {
            if let InstrKind::Deref(deref) = &instr.kind
                && let DerefKind::Var(var) = deref.kind
            {
                referenced.insert(var);
            }
        }
    }

    let dead: Vec<_> = shader
        .variables
        .iter()
        .filter(|(h, v)| modes.contains(v.mode) && !referenced.contains(h))
        .map(|(h, _)| h)
        .collect();
    for &var in &dead {
        if let Some(removed) = shader.variables.remove(var) {
            log::debug!(
                "removed dead {} variable `{}`",
                removed.mode,
                removed.name.as_deref().unwrap_or("<unnamed>")
            );
        }
    }
    !dead.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use spinel_ir::{Builder, Def, Mode, Scalar, Stage, TypeInner, Variable};

    #[test]
    fn only_unreferenced_variables_of_selected_modes_go() {
        let mut shader = Shader::new(Stage::Compute);
        let ty = shader.add_type(TypeInner::Scalar(Scalar::U32));
        let used = shader.add_variable(Variable::new("used", ty, Mode::Shared));
        let unused = shader.add_variable(Variable::new("unused", ty, Mode::Shared));
        let other = shader.add_variable(Variable::new("ubo", ty, Mode::Ubo));
        let entry = shader.entry().entry;
        let mut b = Builder::at_end(shader.entry_mut(), entry);
        let d = b.deref_var(used, Mode::Shared, ty);
        b.load_deref(d, Def::U32);

        let pass = RemoveDeadVariables {
            modes: ModeSet::of(Mode::Shared),
        };
        assert!(pass.run(&mut shader));
        assert!(shader.variables.contains(used));
        assert!(!shader.variables.contains(unused));
        assert!(shader.variables.contains(other));
        assert!(!pass.run(&mut shader));
    }
}
