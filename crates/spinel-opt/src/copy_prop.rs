//! Copy propagation.
//!
//! Forwards the source of moves, vector re-assembly of an existing vector, and
//! component extraction from a freshly built vector.

use spinel_ir::{AluOp, Function, InstrKind, Metadata, Shader, Value};

use crate::Pass;
use crate::runner::run_pass;

/// Replaces pure copies with the value they copy.
#[derive(Debug)]
pub struct CopyPropagation;

impl Pass for CopyPropagation {
    fn name(&self) -> &str {
        "copy-prop"
    }

    fn run(&self, shader: &mut Shader) -> bool {
        run_pass(shader, Metadata::ALL, |ctx| {
            let Some(source) = copied_value(ctx.func, ctx.kind()) else {
                return false;
            };
            ctx.replace_with(source);
            true
        })
    }
}

/// The value an ALU instruction merely copies, if any.
fn copied_value(func: &Function, kind: &InstrKind) -> Option<Value> {
    let InstrKind::Alu { op, srcs } = kind else {
        return None;
    };
    match *op {
        AluOp::Mov => Some(srcs[0]),
        AluOp::Extract(c) => {
            let src = srcs[0];
            match func.kind(src) {
                InstrKind::Alu {
                    op: AluOp::Vec,
                    srcs: components,
                } => components.get(usize::from(c)).copied(),
                _ if c == 0 && func.def(src)?.num_components == 1 => Some(src),
                _ => None,
            }
        }
        // vec(v.x, v.y, ...) covering every component of `v` in order.
        AluOp::Vec => {
            let mut whole = None;
            for (i, &component) in srcs.iter().enumerate() {
                let InstrKind::Alu {
                    op: AluOp::Extract(c),
                    srcs: from,
                } = func.kind(component)
                else {
                    return None;
                };
                if usize::from(*c) != i || whole.is_some_and(|w| w != from[0]) {
                    return None;
                }
                whole = Some(from[0]);
            }
            let whole = whole?;
            (func.def(whole)?.num_components as usize == srcs.len()).then_some(whole)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spinel_ir::{Builder, Stage, validate};

    #[test]
    fn forwards_moves() {
        let mut shader = Shader::new(Stage::Compute);
        let entry = shader.entry().entry;
        let mut b = Builder::at_end(shader.entry_mut(), entry);
        let x = b.const_u32(5);
        let copy = b.alu(AluOp::Mov, &[x]);
        let sum = b.iadd(copy, copy);

        assert!(CopyPropagation.run(&mut shader));
        let func = shader.entry();
        assert!(!func.instrs.contains(copy));
        assert_eq!(func.kind(sum).srcs(), vec![x, x]);
        assert!(!CopyPropagation.run(&mut shader));
        assert_eq!(validate(&shader), Ok(()));
    }

    #[test]
    fn extract_of_vec_forwards_component() {
        let mut shader = Shader::new(Stage::Compute);
        let entry = shader.entry().entry;
        let mut b = Builder::at_end(shader.entry_mut(), entry);
        let x = b.const_u32(1);
        let y = b.const_u32(2);
        let v = b.vec(&[x, y]);
        let e = b.extract(v, 1);
        let sum = b.iadd(e, x);

        assert!(CopyPropagation.run(&mut shader));
        assert_eq!(shader.entry().kind(sum).srcs(), vec![y, x]);
        assert_eq!(validate(&shader), Ok(()));
    }

    #[test]
    fn vec_of_in_order_extracts_is_the_source() {
        let mut shader = Shader::new(Stage::Compute);
        let entry = shader.entry().entry;
        let mut b = Builder::at_end(shader.entry_mut(), entry);
        let v = b.constant(vec![1, 2, 3], 32);
        let parts: Vec<_> = (0..3).map(|c| b.extract(v, c)).collect();
        let rebuilt = b.vec(&parts);
        let swizzled = b.vec(&[parts[1], parts[0], parts[2]]);
        let sum = b.iadd(rebuilt, swizzled);

        assert!(CopyPropagation.run(&mut shader));
        let func = shader.entry();
        assert!(!func.instrs.contains(rebuilt));
        assert!(func.instrs.contains(swizzled));
        assert_eq!(func.kind(sum).srcs(), vec![v, swizzled]);
        assert_eq!(validate(&shader), Ok(()));
    }
}
