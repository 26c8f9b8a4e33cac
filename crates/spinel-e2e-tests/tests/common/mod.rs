use spinel_ir::{IntrinsicOp, Shader, Stage};
use spinel_lower::{LoweringResult, RuntimeConf};
use spinel_parser::ParseOptions;

/// Reads a WGSL file from the crate's `shaders/` directory.
#[allow(dead_code)]
pub fn load_shader(name: &str) -> String {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("shaders")
        .join(name);
    std::fs::read_to_string(&path)
        .unwrap_or_else(|e| panic!("failed to read {}: {e}", path.display()))
}

/// Compiles WGSL source to a little-endian SPIR-V binary with naga.
#[allow(dead_code)]
pub fn spirv_from_wgsl(source: &str) -> Vec<u8> {
    let module = naga::front::wgsl::parse_str(source).expect("WGSL parse failed");
    let info = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .expect("WGSL validation failed");
    let words =
        naga::back::spv::write_vec(&module, &info, &naga::back::spv::Options::default(), None)
            .expect("SPIR-V output failed");
    words.iter().flat_map(|w| w.to_le_bytes()).collect()
}

/// Parses the single entry point of `stage` in `source`.
#[allow(dead_code)]
pub fn parse_stage(source: &str, stage: Stage) -> Shader {
    let options = ParseOptions {
        stage: Some(stage),
        ..ParseOptions::default()
    };
    spinel_parser::parse(&spirv_from_wgsl(source), &options)
        .unwrap_or_else(|e| panic!("{stage} entry point failed to parse: {e}"))
}

/// Parses, optimizes and lowers the entry point of `stage` in `source`.
#[allow(dead_code)]
pub fn compile(source: &str, stage: Stage, conf: &RuntimeConf) -> (Shader, LoweringResult) {
    let mut shader = parse_stage(source, stage);
    spinel_opt::optimize(&mut shader);
    let result = spinel_lower::lower_shader(&mut shader, conf);
    (shader, result)
}

/// Every intrinsic left in any function of the shader.
#[allow(dead_code)]
pub fn intrinsic_ops(shader: &Shader) -> Vec<IntrinsicOp> {
    shader
        .functions
        .iter()
        .flat_map(|(_, func)| func.instrs.iter())
        .filter_map(|(_, instr)| instr.kind.as_intrinsic().map(|i| i.op()))
        .collect()
}
