//! Algebraic simplification.
//!
//! Applies identities that are exact for every input: additive and
//! multiplicative identities, self-cancelling operations, double negation and
//! selects with a known condition. Float rewrites are limited to those that
//! hold for signed zeros and NaNs.

use spinel_ir::{AluOp, Def, Function, InstrKind, Metadata, Shader, Value};

use crate::Pass;
use crate::runner::run_pass;

/// Simplifies ALU instructions using algebraic identities.
#[derive(Debug)]
pub struct AlgebraicSimplification;

impl Pass for AlgebraicSimplification {
    fn name(&self) -> &str {
        "algebraic"
    }

    fn run(&self, shader: &mut Shader) -> bool {
        run_pass(shader, Metadata::ALL, |ctx| {
            let Some(def) = ctx.def() else {
                return false;
            };
            let replacement = match simplify(ctx.func, ctx.kind()) {
                Some(Simplified::Value(v)) => v,
                Some(Simplified::Splat(imm)) => {
                    let values = vec![imm; usize::from(def.num_components)];
                    ctx.before().constant(values, def.bit_size)
                }
                None => return false,
            };
            ctx.replace_with(replacement);
            true
        })
    }
}

enum Simplified {
    /// The instruction computes an existing value.
    Value(Value),
    /// The instruction computes the same immediate in every component.
    Splat(u64),
}

/// Returns `true` if `value` is a constant with every component equal to `imm`.
fn is_splat(func: &Function, value: Value, imm: u64) -> bool {
    func.as_const(value)
        .is_some_and(|c| !c.is_empty() && c.iter().all(|&v| v == imm))
}

fn float_bits(def: Def, value: f64) -> Option<u64> {
    match def.bit_size {
        32 => Some(u64::from((value as f32).to_bits())),
        64 => Some(value.to_bits()),
        _ => None,
    }
}

fn simplify(func: &Function, kind: &InstrKind) -> Option<Simplified> {
    use Simplified::{Splat, Value as Same};

    let InstrKind::Alu { op, srcs } = kind else {
        return None;
    };
    let a = srcs[0];
    let b = srcs.get(1).copied();
    let unary_of = |v: Value, want: AluOp| match func.kind(v) {
        InstrKind::Alu { op, srcs } if *op == want => Some(srcs[0]),
        _ => None,
    };
    // For commutative ops, `k` matches either side and yields the other one.
    let other_if = |imm: u64| -> Option<Value> {
        let b = b?;
        if is_splat(func, b, imm) {
            Some(a)
        } else if op.is_commutative() && is_splat(func, a, imm) {
            Some(b)
        } else {
            None
        }
    };
    let def = func.def(a)?;

    match *op {
        AluOp::IAdd | AluOp::IOr | AluOp::IXor | AluOp::ISub => {
            if let Some(x) = other_if(0) {
                return Some(Same(x));
            }
            if Some(a) == b {
                return match op {
                    AluOp::IOr => Some(Same(a)),
                    AluOp::IXor | AluOp::ISub => Some(Splat(0)),
                    _ => None,
                };
            }
            None
        }
        AluOp::IShl | AluOp::IShr | AluOp::UShr => {
            is_splat(func, b?, 0).then_some(Same(a))
        }
        AluOp::IMul => {
            if let Some(x) = other_if(1) {
                Some(Same(x))
            } else if is_splat(func, a, 0) || is_splat(func, b?, 0) {
                Some(Splat(0))
            } else {
                None
            }
        }
        AluOp::UDiv | AluOp::IDiv => is_splat(func, b?, 1).then_some(Same(a)),
        AluOp::IAnd => {
            if Some(a) == b {
                Some(Same(a))
            } else if is_splat(func, a, 0) || is_splat(func, b?, 0) {
                Some(Splat(0))
            } else {
                other_if(def.bit_mask()).map(Same)
            }
        }
        AluOp::IMin | AluOp::IMax | AluOp::UMin | AluOp::UMax => {
            (Some(a) == b).then_some(Same(a))
        }
        AluOp::IEq | AluOp::IGe | AluOp::UGe if Some(a) == b => Some(Splat(1)),
        AluOp::INe | AluOp::ILt | AluOp::ULt if Some(a) == b => Some(Splat(0)),
        AluOp::INeg => unary_of(a, AluOp::INeg).map(Same),
        AluOp::INot => unary_of(a, AluOp::INot).map(Same),
        AluOp::FNeg => unary_of(a, AluOp::FNeg).map(Same),
        AluOp::FMul => other_if(float_bits(def, 1.0)?).map(Same),
        AluOp::FDiv => is_splat(func, b?, float_bits(def, 1.0)?).then_some(Same(a)),
        // x + -0.0 is x for every x, including +0.0.
        AluOp::FAdd => other_if(float_bits(def, -0.0)?).map(Same),
        AluOp::BCsel => {
            let (then_value, else_value) = (srcs[1], srcs[2]);
            if then_value == else_value {
                Some(Same(then_value))
            } else if is_splat(func, a, 1) {
                Some(Same(then_value))
            } else if is_splat(func, a, 0) {
                Some(Same(else_value))
            } else {
                None
            }
        }
        _ => None,
    }
}
