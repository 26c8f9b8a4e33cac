//! System-value materialization.
//!
//! Builtins the target reads natively stay `load_system_value`. Everything
//! else is computed from natively available values and fields of the
//! runtime-data buffer.

use spinel_ir::{
    AluOp, Builder, Def, InstrKind, Intrinsic, IntrinsicOp, Metadata, Mode, Shader, Stage,
    SystemValue, Value,
};
use spinel_opt::run_intrinsics_pass;

use crate::LoweringResult;
use crate::runtime::{
    BASE_GROUP, BASE_INSTANCE, DRAW_ID, FIRST_VERTEX, GROUP_COUNT, IS_INDEXED_DRAW, RuntimeConf,
    VIEW_INDEX, load_runtime_field,
};

/// Replaces reads of system values the target lacks.
///
/// Reads through [`Mode::SystemValue`] variables are first turned into
/// `load_system_value`. The result reports `requires_runtime_data` if any
/// replacement reads the runtime-data buffer.
pub fn lower_system_values(shader: &mut Shader, conf: &RuntimeConf) -> LoweringResult {
    let mut result = LoweringResult::progress(sysval_variables_to_intrinsics(shader));

    let stage = shader.stage();
    let mut requires_runtime_data = false;
    result.progress |= run_intrinsics_pass(
        shader,
        &[IntrinsicOp::LoadSystemValue],
        Metadata::ALL,
        |ctx| {
            let InstrKind::Intrinsic(Intrinsic::LoadSystemValue(value)) = *ctx.kind() else {
                return false;
            };
            if !needs_lowering(value, stage, conf) {
                return false;
            }
            let def = ctx.def().unwrap_or_else(|| value.def());
            let mut b = ctx.before();
            let lowered = materialize(&mut b, conf, value, def);
            requires_runtime_data |= lowered.reads_runtime_data;
            log::debug!("lowered {value} in {stage} shader");
            ctx.replace_with(lowered.value);
            true
        },
    );
    result.requires_runtime_data = requires_runtime_data;
    result
}

fn sysval_variables_to_intrinsics(shader: &mut Shader) -> bool {
    run_intrinsics_pass(shader, &[IntrinsicOp::LoadDeref], Metadata::ALL, |ctx| {
        let InstrKind::Intrinsic(Intrinsic::LoadDeref { deref }) = *ctx.kind() else {
            return false;
        };
        let var = &ctx.shader.variables[ctx.func.deref_root(deref)];
        if var.mode != Mode::SystemValue {
            return false;
        }
        let Some(value) = var.data.system_value else {
            panic!(
                "system value variable `{}` names no system value",
                var.name.as_deref().unwrap_or_default()
            );
        };
        let def = ctx.def();
        let load = ctx
            .before()
            .intrinsic(Intrinsic::LoadSystemValue(value), def);
        ctx.replace_with(load);
        true
    })
}

fn needs_lowering(value: SystemValue, stage: Stage, conf: &RuntimeConf) -> bool {
    use SystemValue::*;

    match value {
        ViewIndex => stage != Stage::Compute && conf.lower_view_index,
        NumWorkgroups | BaseWorkgroupId | WorkgroupId => {
            stage == Stage::Compute && !conf.native_system_values.contains(value)
        }
        FirstVertex | BaseVertex | BaseInstance | IsIndexedDraw | DrawId | VertexId | InstanceId => {
            stage != Stage::Compute && !conf.native_system_values.contains(value)
        }
        _ => false,
    }
}

struct Lowered {
    value: Value,
    reads_runtime_data: bool,
}

impl Lowered {
    fn constant(value: Value) -> Self {
        Self {
            value,
            reads_runtime_data: false,
        }
    }

    fn runtime(value: Value) -> Self {
        Self {
            value,
            reads_runtime_data: true,
        }
    }
}

fn materialize(b: &mut Builder<'_>, conf: &RuntimeConf, value: SystemValue, def: Def) -> Lowered {
    use SystemValue::*;

    let zero_based_draw = conf.zero_based_vertex_instance_id;
    let zero_based_dispatch = conf.zero_based_compute_workgroup_id;
    match value {
        NumWorkgroups => Lowered::runtime(load_runtime_field(b, conf, GROUP_COUNT, def)),
        BaseWorkgroupId if zero_based_dispatch => Lowered::constant(b.zero(def)),
        BaseWorkgroupId => Lowered::runtime(load_runtime_field(b, conf, BASE_GROUP, def)),
        WorkgroupId => offset_by_runtime(b, conf, WorkgroupIdZeroBase, BASE_GROUP, zero_based_dispatch, def),
        FirstVertex => Lowered::runtime(load_runtime_field(b, conf, FIRST_VERTEX, def)),
        BaseVertex | BaseInstance if zero_based_draw => Lowered::constant(b.zero(def)),
        BaseVertex => {
            let indexed = load_runtime_field(b, conf, IS_INDEXED_DRAW, def);
            let zero = b.zero(def);
            let is_indexed = b.alu(AluOp::INe, &[indexed, zero]);
            let first_vertex = load_runtime_field(b, conf, FIRST_VERTEX, def);
            Lowered::runtime(b.bcsel(is_indexed, first_vertex, zero))
        }
        BaseInstance => Lowered::runtime(load_runtime_field(b, conf, BASE_INSTANCE, def)),
        IsIndexedDraw => Lowered::runtime(load_runtime_field(b, conf, IS_INDEXED_DRAW, def)),
        DrawId => Lowered::runtime(load_runtime_field(b, conf, DRAW_ID, def)),
        ViewIndex => Lowered::runtime(load_runtime_field(b, conf, VIEW_INDEX, def)),
        VertexId => offset_by_runtime(b, conf, VertexIdZeroBase, FIRST_VERTEX, zero_based_draw, def),
        InstanceId => offset_by_runtime(b, conf, InstanceIdZeroBase, BASE_INSTANCE, zero_based_draw, def),
        other => panic!("no lowering for system value {other}"),
    }
}

/// `native + runtime[field]`, or just the native value when ids are zero-based.
fn offset_by_runtime(
    b: &mut Builder<'_>,
    conf: &RuntimeConf,
    native: SystemValue,
    field: u32,
    zero_based: bool,
    def: Def,
) -> Lowered {
    let base = b.intrinsic(Intrinsic::LoadSystemValue(native), Some(def));
    if zero_based {
        return Lowered::constant(base);
    }
    let offset = load_runtime_field(b, conf, field, def);
    Lowered::runtime(b.iadd(base, offset))
}
