//! Runtime-data records and the lowering configuration.
//!
//! Values the target cannot read natively are fetched from a small constant
//! buffer the driver fills per draw or dispatch. The records below fix its
//! layout; field offsets come straight from `offset_of!`, so the compiler and
//! the driver can never disagree.

use std::mem::{offset_of, size_of};

use spinel_ir::{
    Alignment, ArraySize, Builder, Def, DescriptorBinding, ExplicitLayout, Handle, HowDeclared,
    Intrinsic, Mode, Scalar, Shader, Stage, SystemValue, SysvalSet, TypeInner, Value, VarData,
    Variable,
};

use crate::address::{AddressFormats, descriptor_address};

/// Runtime data of vertex, tessellation, geometry and fragment stages.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct VertexRuntimeData {
    pub first_vertex: u32,
    pub base_instance: u32,
    pub is_indexed_draw: u32,
    /// Bits 0..16 flip y, bits 16..32 flip z, one bit per viewport.
    pub yz_flip_mask: u32,
    pub draw_id: u32,
    pub viewport_width: f32,
    pub viewport_height: f32,
    pub view_index: u32,
    pub depth_bias: f32,
}

/// Runtime data of compute dispatches.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ComputeRuntimeData {
    pub group_count_x: u32,
    pub group_count_y: u32,
    pub group_count_z: u32,
    pub padding0: u32,
    pub base_group_x: u32,
    pub base_group_y: u32,
    pub base_group_z: u32,
}

pub(crate) const FIRST_VERTEX: u32 = offset_of!(VertexRuntimeData, first_vertex) as u32;
pub(crate) const BASE_INSTANCE: u32 = offset_of!(VertexRuntimeData, base_instance) as u32;
pub(crate) const IS_INDEXED_DRAW: u32 = offset_of!(VertexRuntimeData, is_indexed_draw) as u32;
pub(crate) const YZ_FLIP_MASK: u32 = offset_of!(VertexRuntimeData, yz_flip_mask) as u32;
pub(crate) const DRAW_ID: u32 = offset_of!(VertexRuntimeData, draw_id) as u32;
pub(crate) const VIEWPORT_SIZE: u32 = offset_of!(VertexRuntimeData, viewport_width) as u32;
pub(crate) const VIEW_INDEX: u32 = offset_of!(VertexRuntimeData, view_index) as u32;
pub(crate) const GROUP_COUNT: u32 = offset_of!(ComputeRuntimeData, group_count_x) as u32;
pub(crate) const BASE_GROUP: u32 = offset_of!(ComputeRuntimeData, base_group_x) as u32;

/// Size in bytes of the runtime-data record a stage uses.
pub(crate) fn record_size(stage: Stage) -> u32 {
    match stage {
        Stage::Compute => size_of::<ComputeRuntimeData>() as u32,
        _ => size_of::<VertexRuntimeData>() as u32,
    }
}

/// How a clip-space axis is flipped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FlipKind {
    #[default]
    None,
    Unconditional,
    /// Flip when the runtime `yz_flip_mask` has a bit of the configured
    /// viewport mask set.
    Conditional,
}

/// Clip-space y/z adjustment applied to the last pre-raster stage.
///
/// The conditional flips do not look at which viewport a primitive goes
/// to: the position is flipped when any viewport of `y_mask` (or
/// `z_mask`) has its bit set in the runtime mask. This is exact for
/// single-viewport pipelines only.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct YzFlip {
    pub y: FlipKind,
    pub z: FlipKind,
    /// Viewports whose y axis may be flipped.
    pub y_mask: u16,
    /// Viewports whose depth range may be inverted.
    pub z_mask: u16,
    /// The stage that feeds the rasterizer; earlier stages are left alone.
    pub last_pre_raster: Stage,
}

impl Default for YzFlip {
    fn default() -> Self {
        Self {
            y: FlipKind::None,
            z: FlipKind::None,
            y_mask: 0,
            z_mask: 0,
            last_pre_raster: Stage::Vertex,
        }
    }
}

/// What the target supports and how the driver binds its implicit buffers.
#[derive(Clone, Debug, PartialEq)]
pub struct RuntimeConf {
    /// Binding of the runtime-data buffer.
    pub runtime_data_cbv: DescriptorBinding,
    /// Binding of the buffer push constants move into.
    pub push_constant_cbv: DescriptorBinding,
    /// Vertex and instance ids start at zero for every draw.
    pub zero_based_vertex_instance_id: bool,
    /// Workgroup ids start at zero for every dispatch.
    pub zero_based_compute_workgroup_id: bool,
    /// Read the view index from runtime data instead of natively.
    pub lower_view_index: bool,
    pub yz_flip: YzFlip,
    /// System values the target reads natively.
    pub native_system_values: SysvalSet,
    pub address_formats: AddressFormats,
    /// Turn push-constant reads into loads from `push_constant_cbv`.
    pub push_constants_to_ubo: bool,
}

impl Default for RuntimeConf {
    fn default() -> Self {
        Self {
            runtime_data_cbv: DescriptorBinding::new(31, 0),
            push_constant_cbv: DescriptorBinding::new(30, 0),
            zero_based_vertex_instance_id: false,
            zero_based_compute_workgroup_id: false,
            lower_view_index: false,
            yz_flip: YzFlip::default(),
            native_system_values: SysvalSet::EMPTY
                .with(SystemValue::VertexIdZeroBase)
                .with(SystemValue::InstanceIdZeroBase)
                .with(SystemValue::WorkgroupIdZeroBase)
                .with(SystemValue::LocalInvocationId)
                .with(SystemValue::LocalInvocationIndex)
                .with(SystemValue::GlobalInvocationId)
                .with(SystemValue::FragCoord)
                .with(SystemValue::FrontFace)
                .with(SystemValue::SampleId)
                .with(SystemValue::ViewIndex),
            address_formats: AddressFormats::default(),
            push_constants_to_ubo: false,
        }
    }
}

const RUNTIME_DATA_NAME: &str = "runtime_data";

/// Declares the runtime-data buffer, once. Returns the existing declaration
/// when the shader already has one at the configured binding.
pub fn add_runtime_data_variable(shader: &mut Shader, conf: &RuntimeConf) -> Handle<Variable> {
    let existing = shader.variables.iter().find(|(_, v)| {
        v.mode == Mode::Ubo
            && v.data.binding == Some(conf.runtime_data_cbv)
            && v.data.how_declared == HowDeclared::Injected
    });
    if let Some((handle, _)) = existing {
        return handle;
    }

    let size = record_size(shader.stage());
    let u32_ty = shader.add_type(TypeInner::Scalar(Scalar::U32));
    let ty = shader.add_type(TypeInner::Array {
        base: u32_ty,
        size: ArraySize::Constant(size / 4),
        stride: 4,
    });
    log::debug!("declaring {size}-byte runtime data at {}", conf.runtime_data_cbv);
    shader.add_variable(Variable {
        name: Some(RUNTIME_DATA_NAME.into()),
        ty,
        mode: Mode::Ubo,
        init: None,
        data: VarData {
            binding: Some(conf.runtime_data_cbv),
            explicit: Some(ExplicitLayout {
                offset: 0,
                size,
                align: 16,
            }),
            how_declared: HowDeclared::Injected,
            ..VarData::default()
        },
    })
}

/// Emits a load of `def` from the runtime-data field at byte `offset`.
pub(crate) fn load_runtime_field(
    b: &mut Builder<'_>,
    conf: &RuntimeConf,
    offset: u32,
    def: Def,
) -> Value {
    // Runtime data is always addressed as an index/offset pair.
    let zero = b.const_u32(0);
    let (resource, base) = descriptor_address(b, conf.runtime_data_cbv, zero, Mode::Ubo);
    let address = b.iadd_imm(base, u64::from(offset));
    b.intrinsic(
        Intrinsic::LoadUbo {
            resource,
            offset: address,
            align: Alignment::new(4, 0),
            range_base: offset,
            range: def.byte_size(),
        },
        Some(def),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_layouts() {
        assert_eq!(FIRST_VERTEX, 0);
        assert_eq!(IS_INDEXED_DRAW, 8);
        assert_eq!(VIEWPORT_SIZE, 20);
        assert_eq!(size_of::<VertexRuntimeData>(), 36);
        assert_eq!(GROUP_COUNT, 0);
        assert_eq!(BASE_GROUP, 16);
        assert_eq!(record_size(Stage::Compute), 28);
    }

    #[test]
    fn runtime_variable_is_added_once() {
        let mut shader = Shader::new(Stage::Vertex);
        let conf = RuntimeConf::default();
        let first = add_runtime_data_variable(&mut shader, &conf);
        let second = add_runtime_data_variable(&mut shader, &conf);
        assert_eq!(first, second);
        assert_eq!(shader.variables.len(), 1);
        let var = &shader.variables[first];
        assert_eq!(var.data.binding, Some(DescriptorBinding::new(31, 0)));
        assert_eq!(var.data.explicit.map(|e| e.size), Some(36));
    }
}
