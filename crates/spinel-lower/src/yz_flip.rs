//! Clip-space y/z flip of the position output.
//!
//! Vulkan's clip space points y down and maps depth to `[0, 1]`; targets that
//! disagree get the difference folded into the last pre-raster stage. The
//! conditional variants test the runtime `yz_flip_mask` against the
//! configured viewport masks so a single compiled shader serves both
//! orientations.

use spinel_ir::{
    AluOp, Builder, Def, InstrKind, Intrinsic, IntrinsicOp, Metadata, Mode, Shader, Slot, Value,
};
use spinel_opt::run_intrinsics_pass;

use crate::LoweringResult;
use crate::runtime::{FlipKind, RuntimeConf, YZ_FLIP_MASK, load_runtime_field};

/// Rewrites whole-vector stores to the position output so y is negated
/// and/or z becomes `w - z`, as configured in [`RuntimeConf::yz_flip`].
///
/// Only the stage named by [`YzFlip::last_pre_raster`] is touched, so one
/// configuration can be shared by every stage of a pipeline. The pass is
/// not idempotent: running it twice flips twice, so the lowering pipeline
/// runs it exactly once.
pub fn lower_yz_flip(shader: &mut Shader, conf: &RuntimeConf) -> LoweringResult {
    let flip = conf.yz_flip;
    let stage = shader.stage();
    if !stage.is_pre_raster()
        || stage != flip.last_pre_raster
        || (flip.y == FlipKind::None && flip.z == FlipKind::None)
    {
        return LoweringResult::NONE;
    }

    let mut requires_runtime_data = false;
    let progress = run_intrinsics_pass(shader, &[IntrinsicOp::StoreDeref], Metadata::ALL, |ctx| {
        let InstrKind::Intrinsic(Intrinsic::StoreDeref {
            deref,
            value,
            write_mask,
        }) = *ctx.kind()
        else {
            return false;
        };
        let var = &ctx.shader.variables[ctx.func.deref_root(deref)];
        let whole = ctx.func.deref_path(deref).len() == 1
            && write_mask == 0xf
            && ctx.func.def_of(value).num_components == 4;
        if var.mode != Mode::ShaderOut || var.data.location != Some(Slot::POS) || !whole {
            return false;
        }

        let mut b = ctx.before();
        let [x, y, z, w] = [0, 1, 2, 3].map(|c| b.extract(value, c));
        let mask = if flip.y == FlipKind::Conditional || flip.z == FlipKind::Conditional {
            requires_runtime_data = true;
            Some(load_runtime_field(&mut b, conf, YZ_FLIP_MASK, Def::U32))
        } else {
            None
        };

        let flipped_y = b.alu(AluOp::FNeg, &[y]);
        let y = select(&mut b, flip.y, mask, u32::from(flip.y_mask), y, flipped_y);
        let flipped_z = b.alu(AluOp::FSub, &[w, z]);
        let z = select(&mut b, flip.z, mask, u32::from(flip.z_mask) << 16, z, flipped_z);
        let position = b.vec(&[x, y, z, w]);

        if let InstrKind::Intrinsic(Intrinsic::StoreDeref { value, .. }) =
            &mut ctx.func.instrs[ctx.instr].kind
        {
            *value = position;
        }
        true
    });

    LoweringResult {
        progress,
        requires_runtime_data,
        push_constant_size: None,
    }
}

fn select(
    b: &mut Builder<'_>,
    kind: FlipKind,
    mask: Option<Value>,
    bits: u32,
    original: Value,
    flipped: Value,
) -> Value {
    match (kind, mask) {
        (FlipKind::None, _) => original,
        (FlipKind::Unconditional, _) => flipped,
        (FlipKind::Conditional, Some(mask)) => {
            let bits = b.const_u32(bits);
            let set = b.alu(AluOp::IAnd, &[mask, bits]);
            let zero = b.const_u32(0);
            let cond = b.alu(AluOp::INe, &[set, zero]);
            b.bcsel(cond, flipped, original)
        }
        (FlipKind::Conditional, None) => unreachable!("conditional flip without a mask"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spinel_ir::{Scalar, Stage, TypeInner, Variable, VectorSize, validate};

    use crate::runtime::YzFlip;

    fn position_store(stage: Stage) -> (Shader, Value) {
        let mut shader = Shader::new(stage);
        let vec4 = shader.add_type(TypeInner::Vector {
            size: VectorSize::Quad,
            scalar: Scalar::F32,
        });
        let pos = shader.add_variable(
            Variable::new("gl_Position", vec4, Mode::ShaderOut).with_location(Slot::POS),
        );
        let entry = shader.entry().entry;
        let mut b = Builder::at_end(shader.entry_mut(), entry);
        let one = b.const_f32(1.0);
        let v = b.vec(&[one, one, one, one]);
        let d = b.deref_var(pos, Mode::ShaderOut, vec4);
        let store = b.store_deref(d, v);
        (shader, store)
    }

    fn stored_value(shader: &Shader, store: Value) -> Value {
        match shader.entry().kind(store) {
            InstrKind::Intrinsic(Intrinsic::StoreDeref { value, .. }) => *value,
            other => panic!("not a store: {other:?}"),
        }
    }

    fn conf(y: FlipKind, z: FlipKind) -> RuntimeConf {
        conf_for(Stage::Vertex, y, z)
    }

    fn conf_for(last_pre_raster: Stage, y: FlipKind, z: FlipKind) -> RuntimeConf {
        RuntimeConf {
            yz_flip: YzFlip {
                y,
                z,
                y_mask: 0b1,
                z_mask: 0b1,
                last_pre_raster,
            },
            ..RuntimeConf::default()
        }
    }

    #[test]
    fn unconditional_y_flip_negates_y() {
        let (mut shader, store) = position_store(Stage::Vertex);
        let result = lower_yz_flip(&mut shader, &conf(FlipKind::Unconditional, FlipKind::None));
        assert!(result.progress);
        assert!(!result.requires_runtime_data);
        assert_eq!(validate(&shader), Ok(()));

        let func = shader.entry();
        let InstrKind::Alu { op: AluOp::Vec, srcs } = func.kind(stored_value(&shader, store)) else {
            panic!("position is not rebuilt");
        };
        assert!(matches!(func.kind(srcs[1]), InstrKind::Alu { op: AluOp::FNeg, .. }));
        assert!(matches!(func.kind(srcs[2]), InstrKind::Alu { op: AluOp::Extract(2), .. }));
    }

    #[test]
    fn conditional_z_flip_reads_runtime_mask() {
        let (mut shader, store) = position_store(Stage::TessEval);
        let flip = conf_for(Stage::TessEval, FlipKind::None, FlipKind::Conditional);
        let result = lower_yz_flip(&mut shader, &flip);
        assert!(result.progress);
        assert!(result.requires_runtime_data);
        assert_eq!(validate(&shader), Ok(()));

        let func = shader.entry();
        let InstrKind::Alu { srcs, .. } = func.kind(stored_value(&shader, store)) else {
            panic!("position is not rebuilt");
        };
        assert!(matches!(func.kind(srcs[2]), InstrKind::Alu { op: AluOp::BCsel, .. }));
    }

    #[test]
    fn fragment_and_disabled_flips_do_nothing() {
        let (mut shader, _) = position_store(Stage::Fragment);
        let flip = conf(FlipKind::Unconditional, FlipKind::Unconditional);
        assert_eq!(lower_yz_flip(&mut shader, &flip), LoweringResult::NONE);

        let (mut shader, _) = position_store(Stage::Vertex);
        assert_eq!(lower_yz_flip(&mut shader, &RuntimeConf::default()), LoweringResult::NONE);
    }

    #[test]
    fn only_the_last_pre_raster_stage_flips() {
        let flip = conf_for(Stage::Geometry, FlipKind::Unconditional, FlipKind::None);
        let (mut vertex, vertex_store) = position_store(Stage::Vertex);
        let (mut geometry, geometry_store) = position_store(Stage::Geometry);
        let original = stored_value(&vertex, vertex_store);

        assert_eq!(lower_yz_flip(&mut vertex, &flip), LoweringResult::NONE);
        assert_eq!(stored_value(&vertex, vertex_store), original);
        assert!(lower_yz_flip(&mut geometry, &flip).progress);
        assert_eq!(validate(&geometry), Ok(()));
        let func = geometry.entry();
        let InstrKind::Alu { srcs, .. } = func.kind(stored_value(&geometry, geometry_store)) else {
            panic!("position is not rebuilt");
        };
        assert!(matches!(func.kind(srcs[1]), InstrKind::Alu { op: AluOp::FNeg, .. }));
    }
}
