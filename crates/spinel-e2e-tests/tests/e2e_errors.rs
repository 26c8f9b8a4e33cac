mod common;

use spinel_ir::Stage;
use spinel_parser::{ParseError, ParseOptions, TargetEnv};

#[test]
fn truncated_binary_is_rejected() {
    let mut spirv = common::spirv_from_wgsl(&common::load_shader("vector_add.wgsl"));
    spirv.truncate(spirv.len() / 2);
    let result = spinel_parser::parse(&spirv, &ParseOptions::default());
    assert!(result.is_err());
}

#[test]
fn empty_binary_is_rejected() {
    let err = spinel_parser::parse(&[], &ParseOptions::default()).unwrap_err();
    assert!(matches!(err, ParseError::Read(_)));
    assert!(!err.to_string().is_empty());
}

#[test]
fn shared_module_needs_a_selection() {
    let spirv = common::spirv_from_wgsl(&common::load_shader("varyings.wgsl"));
    let err = spinel_parser::parse(&spirv, &ParseOptions::default()).unwrap_err();
    let message = err.to_string();
    assert!(message.contains("vs_main"));
    assert!(message.contains("fs_main"));
}

#[test]
fn wrong_stage_has_no_entry_point() {
    let spirv = common::spirv_from_wgsl(&common::load_shader("vector_add.wgsl"));
    let options = ParseOptions {
        stage: Some(Stage::Fragment),
        ..ParseOptions::default()
    };
    let err = spinel_parser::parse(&spirv, &options).unwrap_err();
    assert!(matches!(err, ParseError::NoEntryPoint { .. }));
    assert!(err.to_string().contains("fragment"));
}

#[test]
fn opencl_environment_is_rejected() {
    let spirv = common::spirv_from_wgsl(&common::load_shader("vector_add.wgsl"));
    let options = ParseOptions {
        target_env: TargetEnv::OpenCl,
        ..ParseOptions::default()
    };
    assert!(matches!(
        spinel_parser::parse(&spirv, &options),
        Err(ParseError::Unsupported(_))
    ));
}

#[test]
fn runtime_sized_length_is_unsupported() {
    let source = "
@group(0) @binding(0) var<storage, read_write> data: array<u32>;

@compute @workgroup_size(1)
fn main() {
    data[0] = arrayLength(&data);
}
";
    let err = spinel_parser::parse(&common::spirv_from_wgsl(source), &ParseOptions::default())
        .unwrap_err();
    assert!(matches!(err, ParseError::Unsupported(_)));
}
