//! Integration test: build a vector-add compute shader programmatically and
//! verify validation and the text dump.

use spinel_ir::*;

/// Builds the IR of:
///
/// ```wgsl
/// @group(0) @binding(0) var<storage, read> a: array<f32>;
/// @group(0) @binding(1) var<storage, read_write> result: array<f32>;
///
/// @compute @workgroup_size(64)
/// fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
///     result[gid.x] = a[gid.x] + 1.0;
/// }
/// ```
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
    let value = b.load_deref(a_elem, Def::scalar(32));
    let one = b.const_f32(1.0);
    let sum = b.alu(AluOp::FAdd, &[value, one]);

    let r_var = b.deref_var(result, Mode::Ssbo, array_ty);
    let r_elem = b.deref_array(r_var, x, f32_ty);
    b.store_deref(r_elem, sum);

    shader.gather_info();
    shader
}

#[test]
fn vector_add_is_valid() {
    let shader = vector_add();
    assert_eq!(validate(&shader), Ok(()));
    assert_eq!(shader.entry().instrs.len(), 10);
    assert!(shader
        .info
        .system_values_read
        .contains(SystemValue::GlobalInvocationId));
}

#[test]
fn vector_add_dump() {
    let shader = vector_add();
    let dump = dump_shader(&shader);
    assert!(dump.contains("shader: compute"));
    assert!(dump.contains("workgroup_size: 64, 1, 1"));
    assert!(dump.contains("decl_var ssbo array<f32> /*stride 4*/ a @binding(0, 0)"));
    assert!(dump.contains("load_system_value () (global_invocation_id)"));
    assert!(dump.contains("fadd %4, %5"));
    assert!(dump.contains("store_deref (%8, %6) (wrmask=0x1)"));
}

#[test]
fn removing_a_used_value_breaks_validation() {
    let mut shader = vector_add();
    let gid = shader.entry().blocks[shader.entry().entry].instrs[0];
    shader.entry_mut().remove_instr(gid);
    assert!(matches!(
        validate(&shader),
        Err(IrError::DanglingOperand { operand, .. }) if operand == gid.index()
    ));
}
