//! Integration tests: whole lowering and linking flows on hand-built shaders.

use pretty_assertions::assert_eq;
use spinel_ir::*;
use spinel_lower::*;

fn vec_type(shader: &mut Shader, size: VectorSize) -> Handle<Type> {
    shader.add_type(TypeInner::Vector {
        size,
        scalar: Scalar::F32,
    })
}

fn member(ty: Handle<Type>, offset: u32) -> StructMember {
    StructMember {
        name: None,
        ty,
        offset,
    }
}

fn entry_intrinsics(shader: &Shader) -> Vec<Intrinsic> {
    let func = shader.entry();
    func.blocks[func.entry]
        .instrs
        .iter()
        .filter_map(|&v| func.kind(v).as_intrinsic().cloned())
        .collect()
}

#[test]
fn scalar_layout_of_vec3_and_float() {
    let mut shader = Shader::new(Stage::Compute);
    let f32_ty = shader.add_type(TypeInner::Scalar(Scalar::F32));
    let vec3 = vec_type(&mut shader, VectorSize::Tri);
    let block = shader.add_type(TypeInner::Struct {
        members: vec![member(vec3, 0), member(f32_ty, 0)],
        span: 0,
    });
    let var = shader.add_variable(Variable::new("s", block, Mode::Shared));

    assert!(assign_explicit_layout(&mut shader, ModeSet::of(Mode::Shared), &ScalarLayout));
    let var = &shader.variables[var];
    assert_eq!(
        var.data.explicit,
        Some(ExplicitLayout {
            offset: 0,
            size: 16,
            align: 4
        })
    );
    let TypeInner::Struct { members, span } = &shader.types[var.ty].inner else {
        panic!("layout changed the type kind");
    };
    assert_eq!(members.iter().map(|m| m.offset).collect::<Vec<_>>(), vec![0, 12]);
    assert_eq!(*span, 16);
}

fn varying_shader(stage: Stage, mode: Mode, slots: &[Slot]) -> Shader {
    let mut shader = Shader::new(stage);
    let vec4 = vec_type(&mut shader, VectorSize::Quad);
    let entry = shader.entry().entry;
    for &slot in slots {
        let var = shader.add_variable(Variable::new(format!("v{slot}"), vec4, mode).with_location(slot));
        let mut b = Builder::at_end(shader.entry_mut(), entry);
        let d = b.deref_var(var, mode, vec4);
        if mode == Mode::ShaderOut {
            let x = b.const_f32(0.5);
            let v = b.vec(&[x, x, x, x]);
            b.store_deref(d, v);
        } else {
            let v = b.load_deref(d, Def::new(4, 32));
            let out = shader.add_variable(
                Variable::new(format!("copy{slot}"), vec4, Mode::Ssbo)
                    .with_binding(DescriptorBinding::new(0, u32::from(slot.index()))),
            );
            let mut b = Builder::at_end(shader.entry_mut(), entry);
            let d = b.deref_var(out, Mode::Ssbo, vec4);
            b.store_deref(d, v);
        }
    }
    shader
}

#[test]
fn linking_keeps_only_the_exchanged_varying() {
    let mut producer = varying_shader(Stage::Vertex, Mode::ShaderOut, &[Slot::POS, Slot::var(3), Slot::var(7)]);
    let mut consumer = varying_shader(Stage::Fragment, Mode::ShaderIn, &[Slot::var(7), Slot::var(9)]);

    let result = link_shaders(&mut producer, &mut consumer, &LinkOptions::default());
    assert!(result.progress);
    assert_eq!(validate(&producer), Ok(()));
    assert_eq!(validate(&consumer), Ok(()));

    assert_eq!(producer.find_variable("vVAR3"), None);
    assert_eq!(consumer.find_variable("vVAR9"), None);
    let p7 = producer.find_variable("vVAR7").expect("producer keeps VAR7");
    let c7 = consumer.find_variable("vVAR7").expect("consumer keeps VAR7");
    assert_eq!(producer.variables[p7].data.driver_location, 0);
    assert_eq!(consumer.variables[c7].data.driver_location, 0);

    // the read of VAR9 now copies zero
    let stored_zero = entry_intrinsics(&consumer).iter().any(|i| match *i {
        Intrinsic::StoreDeref { value, .. } => consumer.entry().as_const(value) == Some(&[0u64, 0, 0, 0][..]),
        _ => false,
    });
    assert!(stored_zero);

    let again = link_shaders(&mut producer, &mut consumer, &LinkOptions::default());
    assert_eq!(again, LinkResult::default());
}

#[test]
fn push_constant_buffer_covers_every_read() {
    let mut shader = Shader::new(Stage::Vertex);
    let f32_ty = shader.add_type(TypeInner::Scalar(Scalar::F32));
    let vec2 = vec_type(&mut shader, VectorSize::Bi);
    let vec4 = vec_type(&mut shader, VectorSize::Quad);
    let block = shader.add_type(TypeInner::Struct {
        members: vec![member(vec4, 0), member(vec2, 16), member(f32_ty, 32)],
        span: 36,
    });
    let pc = shader.add_variable(Variable::new("pc", block, Mode::PushConstant));
    let out = shader.add_variable(
        Variable::new("out", f32_ty, Mode::Ssbo).with_binding(DescriptorBinding::new(0, 0)),
    );
    let entry = shader.entry().entry;
    let mut b = Builder::at_end(shader.entry_mut(), entry);
    let root = b.deref_var(pc, Mode::PushConstant, block);
    let d_scale = b.deref_struct(root, 1, vec2);
    let scale = b.load_deref(d_scale, Def::new(2, 32));
    let d_bias = b.deref_struct(root, 2, f32_ty);
    let bias = b.load_deref(d_bias, Def::U32);
    let x = b.extract(scale, 0);
    let sum = b.alu(AluOp::FAdd, &[x, bias]);
    let d_out = b.deref_var(out, Mode::Ssbo, f32_ty);
    b.store_deref(d_out, sum);

    let io = lower_explicit_io(&mut shader, ModeSet::of(Mode::PushConstant), &AddressFormats::default());
    assert!(io.progress);
    let reads: Vec<_> = entry_intrinsics(&shader)
        .into_iter()
        .filter_map(|i| match i {
            Intrinsic::LoadPushConstant { base, range, .. } => Some((base, range)),
            _ => None,
        })
        .collect();
    assert_eq!(reads, vec![(16, 8), (32, 4)]);

    let result = lower_push_constants_to_ubo(&mut shader, DescriptorBinding::new(30, 0));
    assert_eq!(result.push_constant_size, Some(36));
    let buffer = shader.find_variable("push_constants").expect("injected buffer");
    assert_eq!(shader.variables[buffer].data.explicit.map(|e| e.size), Some(48));
    assert_eq!(validate(&shader), Ok(()));
}

/// Builds the IR of a compute shader doing `result[gid.x] = a[gid.x] + 1.0`.
fn vector_add() -> Shader {
    let mut shader = Shader::new(Stage::Compute);
    shader.info.workgroup_size = [64, 1, 1];
    let f32_ty = shader.add_type(TypeInner::Scalar(Scalar::F32));
    let array_ty = shader.add_type(TypeInner::Array {
        base: f32_ty,
        size: ArraySize::Dynamic,
        stride: 4,
    });
    let a = shader.add_variable(
        Variable::new("a", array_ty, Mode::Ssbo).with_binding(DescriptorBinding::new(0, 0)),
    );
    let result = shader.add_variable(
        Variable::new("result", array_ty, Mode::Ssbo).with_binding(DescriptorBinding::new(0, 1)),
    );
    let entry = shader.entry().entry;
    let mut b = Builder::at_end(shader.entry_mut(), entry);
    let gid = b.load_system_value(SystemValue::GlobalInvocationId);
    let x = b.extract(gid, 0);
    let a_var = b.deref_var(a, Mode::Ssbo, array_ty);
    let a_elem = b.deref_array(a_var, x, f32_ty);
    let value = b.load_deref(a_elem, Def::U32);
    let one = b.const_f32(1.0);
    let sum = b.alu(AluOp::FAdd, &[value, one]);
    let r_var = b.deref_var(result, Mode::Ssbo, array_ty);
    let r_elem = b.deref_array(r_var, x, f32_ty);
    b.store_deref(r_elem, sum);
    shader
}

#[test]
fn lowering_reaches_a_fixed_point() {
    let mut shader = vector_add();
    let result = lower_shader(&mut shader, &RuntimeConf::default());
    assert!(result.progress);
    assert!(!result.requires_runtime_data);
    assert_eq!(validate(&shader), Ok(()));

    let ops: Vec<_> = entry_intrinsics(&shader).iter().map(Intrinsic::op).collect();
    assert!(ops.contains(&IntrinsicOp::LoadSsbo));
    assert!(ops.contains(&IntrinsicOp::StoreSsbo));
    assert!(!ops.contains(&IntrinsicOp::LoadDeref));
    assert!(!ops.contains(&IntrinsicOp::StoreDeref));

    let count = shader.instr_count();
    assert!(!spinel_opt::optimize(&mut shader));
    assert!(!spinel_opt::optimize(&mut shader));
    assert_eq!(shader.instr_count(), count);
}

#[test]
fn zero_based_base_vertex_lowers_to_zero() {
    let mut shader = Shader::new(Stage::Vertex);
    let u32_ty = shader.add_type(TypeInner::Scalar(Scalar::U32));
    let out = shader.add_variable(Variable::new("base", u32_ty, Mode::ShaderOut).with_location(Slot::var(0)));
    let entry = shader.entry().entry;
    let mut b = Builder::at_end(shader.entry_mut(), entry);
    let base = b.load_system_value(SystemValue::BaseVertex);
    let d = b.deref_var(out, Mode::ShaderOut, u32_ty);
    b.store_deref(d, base);

    let conf = RuntimeConf {
        zero_based_vertex_instance_id: true,
        ..RuntimeConf::default()
    };
    let result = lower_shader(&mut shader, &conf);
    assert!(!result.requires_runtime_data);
    assert!(!shader.info.system_values_read.contains(SystemValue::BaseVertex));

    let stored: Vec<_> = entry_intrinsics(&shader)
        .into_iter()
        .filter_map(|i| match i {
            Intrinsic::StoreDeref { value, .. } => shader.entry().as_uint(value),
            _ => None,
        })
        .collect();
    assert_eq!(stored, vec![0]);
}

#[test]
fn runtime_data_is_declared_when_needed() {
    let mut shader = Shader::new(Stage::Compute);
    let vec3u = shader.add_type(TypeInner::Vector {
        size: VectorSize::Tri,
        scalar: Scalar::U32,
    });
    let out = shader.add_variable(
        Variable::new("out", vec3u, Mode::Ssbo).with_binding(DescriptorBinding::new(0, 0)),
    );
    let entry = shader.entry().entry;
    let mut b = Builder::at_end(shader.entry_mut(), entry);
    let groups = b.load_system_value(SystemValue::NumWorkgroups);
    let d = b.deref_var(out, Mode::Ssbo, vec3u);
    b.store_deref(d, groups);

    let conf = RuntimeConf::default();
    let result = lower_shader(&mut shader, &conf);
    assert!(result.requires_runtime_data);
    assert_eq!(validate(&shader), Ok(()));
    let runtime = shader.find_variable("runtime_data").expect("runtime data buffer");
    let runtime = &shader.variables[runtime];
    assert_eq!(runtime.data.binding, Some(conf.runtime_data_cbv));
    assert_eq!(runtime.data.how_declared, HowDeclared::Injected);
    assert_eq!(
        runtime.data.explicit.map(|e| e.size),
        Some(std::mem::size_of::<ComputeRuntimeData>() as u32)
    );
    assert!(entry_intrinsics(&shader).iter().any(|i| matches!(
        i,
        Intrinsic::LoadUbo {
            range_base: 0,
            range: 12,
            ..
        }
    )));
}
