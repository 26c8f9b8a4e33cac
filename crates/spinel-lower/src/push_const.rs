//! Push constants backed by a constant buffer.

use spinel_ir::{
    ArraySize, DescriptorBinding, ExplicitLayout, InstrKind, Intrinsic,
    IntrinsicOp, Metadata, Mode, Scalar, Shader, TypeInner, Variable,
};
use spinel_opt::run_intrinsics_pass;

use crate::address::descriptor_address;
use crate::{LoweringResult, align_up};

const PUSH_CONSTANTS_NAME: &str = "push_constants";

/// Turns every `load_push_constant` into a UBO load from an injected
/// `push_constants` buffer at `binding`.
///
/// The buffer is sized to cover the highest byte any read touches, rounded
/// up to 16 bytes. The unrounded size is reported in
/// [`LoweringResult::push_constant_size`] so the driver knows how much data
/// to upload.
pub fn lower_push_constants_to_ubo(shader: &mut Shader, binding: DescriptorBinding) -> LoweringResult {
    let mut size = 0;
    let mut found = false;
    for (_, func) in shader.functions.iter() {
        for (_, instr) in func.instrs.iter() {
            if let InstrKind::Intrinsic(Intrinsic::LoadPushConstant { base, range, .. }) = instr.kind {
                size = size.max(base.saturating_add(range));
                found = true;
            }
        }
    }
    if !found {
        return LoweringResult::NONE;
    }

    let resource_size = align_up(size, 16);
    let u32_ty = shader.add_type(TypeInner::Scalar(Scalar::U32));
    let ty = shader.add_type(TypeInner::Array {
        base: u32_ty,
        size: ArraySize::Constant(resource_size / 4),
        stride: 4,
    });
    let mut var = Variable::new(PUSH_CONSTANTS_NAME, ty, Mode::Ubo)
        .with_binding(binding)
        .injected();
    var.data.explicit = Some(ExplicitLayout {
        offset: 0,
        size: resource_size,
        align: 16,
    });
    shader.add_variable(var);
    log::debug!("push constants moved to {resource_size}-byte buffer at {binding}");

    run_intrinsics_pass(shader, &[IntrinsicOp::LoadPushConstant], Metadata::ALL, |ctx| {
        let InstrKind::Intrinsic(Intrinsic::LoadPushConstant {
            offset,
            base,
            range,
            align,
        }) = *ctx.kind()
        else {
            return false;
        };
        let def = ctx.def();
        let mut b = ctx.before();
        let zero = b.const_u32(0);
        let (resource, buffer_base) = descriptor_address(&mut b, binding, zero, Mode::Ubo);
        let offset = b.iadd_imm(offset, u64::from(base));
        let offset = b.iadd(buffer_base, offset);
        let load = b.intrinsic(
            Intrinsic::LoadUbo {
                resource,
                offset,
                align,
                range_base: base,
                range,
            },
            def,
        );
        ctx.replace_with(load);
        true
    });

    LoweringResult {
        progress: true,
        requires_runtime_data: false,
        push_constant_size: Some(size),
    }
}
