mod common;

use pretty_assertions::assert_eq;
use spinel_ir::{IntrinsicOp, Mode, Stage, SystemValue, SysvalSet, validate};
use spinel_lower::RuntimeConf;

#[test]
fn vector_add_lowers_to_ssbo_access() {
    let source = common::load_shader("vector_add.wgsl");
    let (mut shader, result) = common::compile(&source, Stage::Compute, &RuntimeConf::default());
    assert!(result.progress);
    assert_eq!(validate(&shader), Ok(()));
    assert_eq!(shader.info.workgroup_size, [64, 1, 1]);
    assert_eq!(shader.variables_with_mode(Mode::Ssbo).len(), 3);

    let ops = common::intrinsic_ops(&shader);
    assert!(ops.contains(&IntrinsicOp::LoadSsbo));
    assert!(ops.contains(&IntrinsicOp::StoreSsbo));
    assert!(!ops.contains(&IntrinsicOp::LoadDeref));
    assert!(!ops.contains(&IntrinsicOp::StoreDeref));

    let count = shader.instr_count();
    assert!(!spinel_opt::optimize(&mut shader));
    assert_eq!(shader.instr_count(), count);
}

#[test]
fn histogram_needs_runtime_data_for_workgroup_count() {
    let source = common::load_shader("histogram.wgsl");
    let conf = RuntimeConf::default();
    let (shader, result) = common::compile(&source, Stage::Compute, &conf);
    assert!(result.requires_runtime_data);
    assert_eq!(validate(&shader), Ok(()));

    let runtime = shader
        .find_variable("runtime_data")
        .expect("runtime data buffer is declared");
    assert_eq!(shader.variables[runtime].data.binding, Some(conf.runtime_data_cbv));

    let ops = common::intrinsic_ops(&shader);
    assert!(ops.contains(&IntrinsicOp::SharedAtomic));
    assert!(ops.contains(&IntrinsicOp::SsboAtomic));
    assert!(ops.contains(&IntrinsicOp::LoadUbo));
    assert!(ops.contains(&IntrinsicOp::Barrier));
    assert!(!ops.contains(&IntrinsicOp::DerefAtomic));
}

#[test]
fn native_workgroup_count_skips_runtime_data() {
    let source = common::load_shader("histogram.wgsl");
    let conf = RuntimeConf {
        native_system_values: RuntimeConf::default()
            .native_system_values
            .with(SystemValue::NumWorkgroups),
        ..RuntimeConf::default()
    };
    let (shader, result) = common::compile(&source, Stage::Compute, &conf);
    assert!(!result.requires_runtime_data);
    assert_eq!(shader.find_variable("runtime_data"), None);
    assert!(
        shader
            .info
            .system_values_read
            .contains(SystemValue::NumWorkgroups)
    );
}

#[test]
fn shared_memory_gets_a_layout() {
    let source = common::load_shader("histogram.wgsl");
    let (shader, _) = common::compile(&source, Stage::Compute, &RuntimeConf::default());
    let shared = shader.variables_with_mode(Mode::Shared);
    assert_eq!(shared.len(), 1);
    let layout = shader.variables[shared[0]]
        .data
        .explicit
        .expect("shared variable has an explicit layout");
    assert_eq!(layout.size, 64);
    assert_eq!(layout.align, 4);
}

#[test]
fn vertex_stage_keeps_logical_varyings() {
    let source = common::load_shader("varyings.wgsl");
    let conf = RuntimeConf {
        native_system_values: SysvalSet::EMPTY.with(SystemValue::VertexId),
        ..RuntimeConf::default()
    };
    let (shader, _) = common::compile(&source, Stage::Vertex, &conf);
    assert_eq!(validate(&shader), Ok(()));
    assert_eq!(shader.variables_with_mode(Mode::ShaderOut).len(), 3);

    let ops = common::intrinsic_ops(&shader);
    assert!(ops.contains(&IntrinsicOp::StoreDeref));
    assert!(ops.contains(&IntrinsicOp::LoadDeref));
}

#[test]
fn repeated_lowering_is_stable() {
    let source = common::load_shader("vector_add.wgsl");
    let conf = RuntimeConf::default();
    let (mut shader, _) = common::compile(&source, Stage::Compute, &conf);
    let again = spinel_lower::lower_shader(&mut shader, &conf);
    assert!(!again.requires_runtime_data);
    assert_eq!(validate(&shader), Ok(()));
    assert!(!common::intrinsic_ops(&shader).contains(&IntrinsicOp::LoadDeref));
}
