//! Constant folding pass.
//!
//! Evaluates ALU instructions whose sources are all constants and rewrites
//! them in place into the resulting constant. Integer arithmetic wraps at the
//! value's bit size; float folding covers 32- and 64-bit values.

use spinel_ir::{AluOp, Def, Function, InstrKind, Metadata, Shader};

use crate::Pass;
use crate::runner::run_pass;

/// Folds ALU instructions with constant operands at compile time.
#[derive(Debug)]
pub struct ConstantFolding;

impl Pass for ConstantFolding {
    fn name(&self) -> &str {
        "const-fold"
    }

    fn run(&self, shader: &mut Shader) -> bool {
        run_pass(shader, Metadata::ALL, |ctx| {
            let Some(def) = ctx.def() else {
                return false;
            };
            let Some(values) = fold(ctx.func, ctx.kind(), def) else {
                return false;
            };
            ctx.func.instrs[ctx.instr].kind = InstrKind::Const(values);
            true
        })
    }
}

fn fold(func: &Function, kind: &InstrKind, def: Def) -> Option<Vec<u64>> {
    let InstrKind::Alu { op, srcs } = kind else {
        return None;
    };
    let consts = srcs
        .iter()
        .map(|&s| func.as_const(s))
        .collect::<Option<Vec<_>>>()?;
    let src_bits = func.def(srcs[0])?.bit_size;
    let mask = def.bit_mask();

    let values = match *op {
        AluOp::Vec => consts.iter().map(|c| c[0]).collect(),
        AluOp::Extract(c) => vec![*consts[0].get(usize::from(c))?],
        AluOp::FDot => {
            let (a, b) = (consts[0], consts[1]);
            let mut sum = 0.0;
            for (&x, &y) in a.iter().zip(b) {
                sum += to_float(x, src_bits)? * to_float(y, src_bits)?;
            }
            vec![from_float(sum, def.bit_size)?]
        }
        op => {
            // The selector of a bcsel is a bool; the arms decide the width.
            let operand_bits = match op {
                AluOp::BCsel => func.def(srcs[1])?.bit_size,
                _ => src_bits,
            };
            let mut values = Vec::with_capacity(usize::from(def.num_components));
            for i in 0..usize::from(def.num_components) {
                let args: Vec<u64> = consts
                    .iter()
                    .map(|c| if c.len() == 1 { c[0] } else { c[i] })
                    .collect();
                values.push(fold_component(op, &args, operand_bits, def.bit_size)?);
            }
            values
        }
    };
    Some(values.into_iter().map(|v| v & mask).collect())
}

fn sign_extend(value: u64, bits: u8) -> i64 {
    if bits >= 64 {
        return value as i64;
    }
    let shift = 64 - u32::from(bits);
    ((value << shift) as i64) >> shift
}

fn to_float(value: u64, bits: u8) -> Option<f64> {
    match bits {
        32 => Some(f64::from(f32::from_bits(value as u32))),
        64 => Some(f64::from_bits(value)),
        _ => None,
    }
}

fn from_float(value: f64, bits: u8) -> Option<u64> {
    match bits {
        32 => Some(u64::from((value as f32).to_bits())),
        64 => Some(value.to_bits()),
        _ => None,
    }
}

fn fold_component(op: AluOp, args: &[u64], bits: u8, dst_bits: u8) -> Option<u64> {
    let a = args[0];
    let b = args.get(1).copied().unwrap_or(0);
    let (sa, sb) = (sign_extend(a, bits), sign_extend(b, bits));
    let shift = (b as u32) & (u32::from(bits.max(1)) - 1);
    let bool_bits = |v: bool| u64::from(v);

    let value = match op {
        AluOp::Mov => a,
        AluOp::IAdd => a.wrapping_add(b),
        AluOp::ISub => a.wrapping_sub(b),
        AluOp::IMul => a.wrapping_mul(b),
        AluOp::IDiv if sb != 0 => sa.wrapping_div(sb) as u64,
        AluOp::UDiv if b != 0 => a / b,
        AluOp::IRem if sb != 0 => sa.wrapping_rem(sb) as u64,
        AluOp::UMod if b != 0 => a % b,
        AluOp::INeg => a.wrapping_neg(),
        AluOp::IAbs => sa.wrapping_abs() as u64,
        AluOp::IMin => sa.min(sb) as u64,
        AluOp::IMax => sa.max(sb) as u64,
        AluOp::UMin => a.min(b),
        AluOp::UMax => a.max(b),
        AluOp::IAnd => a & b,
        AluOp::IOr => a | b,
        AluOp::IXor => a ^ b,
        AluOp::INot => !a,
        AluOp::IShl => a.wrapping_shl(shift),
        AluOp::IShr => (sa >> shift) as u64,
        AluOp::UShr => a >> shift,
        AluOp::IEq => bool_bits(a == b),
        AluOp::INe => bool_bits(a != b),
        AluOp::ILt => bool_bits(sa < sb),
        AluOp::IGe => bool_bits(sa >= sb),
        AluOp::ULt => bool_bits(a < b),
        AluOp::UGe => bool_bits(a >= b),
        AluOp::BCsel => {
            if a != 0 {
                b
            } else {
                args[2]
            }
        }
        AluOp::I2I(_) => sa as u64,
        AluOp::U2U(_) => a,
        AluOp::B2I(_) => a & 1,
        AluOp::I2F(_) => from_float(sa as f64, dst_bits)?,
        AluOp::U2F(_) => from_float(a as f64, dst_bits)?,
        AluOp::B2F(_) => from_float(if a != 0 { 1.0 } else { 0.0 }, dst_bits)?,
        AluOp::F2I(_) => to_float(a, bits)? as i64 as u64,
        AluOp::F2U(_) => to_float(a, bits)? as u64,
        AluOp::F2F(_) => from_float(to_float(a, bits)?, dst_bits)?,
        op => return fold_float(op, args, bits),
    };
    Some(value)
}

fn fold_float(op: AluOp, args: &[u64], bits: u8) -> Option<u64> {
    let a = to_float(args[0], bits)?;
    let b = match args.get(1) {
        Some(&v) => to_float(v, bits)?,
        None => 0.0,
    };
    let bool_bits = |v: bool| Some(u64::from(v));

    let result = match op {
        AluOp::FAdd => a + b,
        AluOp::FSub => a - b,
        AluOp::FMul => a * b,
        AluOp::FDiv => a / b,
        AluOp::FNeg => -a,
        AluOp::FAbs => a.abs(),
        AluOp::FMin => a.min(b),
        AluOp::FMax => a.max(b),
        AluOp::FFma => a.mul_add(b, to_float(args[2], bits)?),
        AluOp::FSqrt => a.sqrt(),
        AluOp::FRsq => 1.0 / a.sqrt(),
        AluOp::FFloor => a.floor(),
        AluOp::FCeil => a.ceil(),
        AluOp::FFract => a - a.floor(),
        AluOp::FTrunc => a.trunc(),
        AluOp::FSin => a.sin(),
        AluOp::FCos => a.cos(),
        AluOp::FExp2 => a.exp2(),
        AluOp::FLog2 => a.log2(),
        AluOp::FPow => a.powf(b),
        AluOp::FEq => return bool_bits(a == b),
        AluOp::FNe => return bool_bits(a != b),
        AluOp::FLt => return bool_bits(a < b),
        AluOp::FGe => return bool_bits(a >= b),
        _ => return None,
    };
    from_float(result, bits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use spinel_ir::{Builder, Stage, Value, validate};

    fn fold_one(build: impl FnOnce(&mut Builder<'_>) -> Value) -> Option<Vec<u64>> {
        let mut shader = Shader::new(Stage::Compute);
        let entry = shader.entry().entry;
        let v = build(&mut Builder::at_end(shader.entry_mut(), entry));
        ConstantFolding.run(&mut shader);
        assert_eq!(validate(&shader), Ok(()));
        shader.entry().as_const(v).map(<[u64]>::to_vec)
    }

    #[test]
    fn fold_integer_arithmetic() {
        let v = fold_one(|b| {
            let x = b.const_u32(7);
            let y = b.const_u32(5);
            b.alu(AluOp::ISub, &[y, x])
        });
        assert_eq!(v, Some(vec![0xffff_fffe]));
    }

    #[test]
    fn fold_signed_compare_uses_bit_size() {
        let v = fold_one(|b| {
            let minus_one = b.const_u32(u32::MAX);
            let zero = b.const_u32(0);
            b.alu(AluOp::ILt, &[minus_one, zero])
        });
        assert_eq!(v, Some(vec![1]));
    }

    #[test]
    fn fold_float_add() {
        let v = fold_one(|b| {
            let x = b.const_f32(1.5);
            let y = b.const_f32(2.25);
            b.alu(AluOp::FAdd, &[x, y])
        });
        assert_eq!(v, Some(vec![u64::from(3.75f32.to_bits())]));
    }

    #[test]
    fn fold_vectors_per_component() {
        let v = fold_one(|b| {
            let x = b.constant(vec![1, 2, 3], 32);
            let y = b.constant(vec![10, 20, 30], 32);
            b.alu(AluOp::IMul, &[x, y])
        });
        assert_eq!(v, Some(vec![10, 40, 90]));
    }

    #[test]
    fn fold_chains_within_one_run() {
        let v = fold_one(|b| {
            let cond = b.const_bool(false);
            let x = b.const_u32(1);
            let y = b.const_u32(3);
            let picked = b.bcsel(cond, x, y);
            b.alu(AluOp::U2F(32), &[picked])
        });
        assert_eq!(v, Some(vec![u64::from(3.0f32.to_bits())]));
    }

    #[test]
    fn division_by_zero_is_left_alone() {
        let v = fold_one(|b| {
            let x = b.const_u32(1);
            let zero = b.const_u32(0);
            b.alu(AluOp::UDiv, &[x, zero])
        });
        assert_eq!(v, None);
    }
}
