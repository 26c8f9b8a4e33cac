use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use miette::{Context, IntoDiagnostic};

use spinel_ir::{Stage, SystemValue, SysvalSet};
use spinel_lower::RuntimeConf;
use spinel_opt::{OptLevel, PassManager};
use spinel_parser::{ParseOptions, TargetEnv};

/// Spinel: SPIR-V to driver-ready shader IR
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// Input SPIR-V binary
    input: PathBuf,

    /// Only consider entry points of this stage
    #[arg(long, value_parser = parse_stage)]
    stage: Option<Stage>,

    /// Entry point name
    #[arg(short, long)]
    entry: Option<String>,

    /// Client environment: vulkan, opengl or opencl
    #[arg(long, default_value = "vulkan", value_parser = parse_target_env)]
    target_env: TargetEnv,

    /// Run the optimization loop
    #[arg(long)]
    optimize: bool,

    /// Optimization level used by --optimize: 0, 1, or 2
    #[arg(long, default_value = "1", value_parser = parse_opt_level)]
    opt_level: OptLevel,

    /// Run the driver lowering pipeline
    #[arg(long)]
    lower: bool,

    /// System values the target reads natively (comma-separated names)
    #[arg(long, value_delimiter = ',', value_parser = parse_sysval)]
    native_sysvals: Vec<SystemValue>,

    /// Vertex, instance and workgroup ids start at zero
    #[arg(long)]
    zero_based_ids: bool,

    /// Output path (default: stdout)
    #[arg(short, long)]
    output: Option<PathBuf>,
}

fn parse_stage(s: &str) -> Result<Stage, String> {
    [
        Stage::Vertex,
        Stage::TessCtrl,
        Stage::TessEval,
        Stage::Geometry,
        Stage::Fragment,
        Stage::Compute,
    ]
    .into_iter()
    .find(|stage| stage.name() == s)
    .ok_or_else(|| {
        format!("invalid stage '{s}', expected vertex, tess_ctrl, tess_eval, geometry, fragment or compute")
    })
}

fn parse_target_env(s: &str) -> Result<TargetEnv, String> {
    match s {
        "vulkan" => Ok(TargetEnv::Vulkan),
        "opengl" => Ok(TargetEnv::OpenGl),
        "opencl" => Ok(TargetEnv::OpenCl),
        _ => Err(format!(
            "invalid target environment '{s}', expected vulkan, opengl, or opencl"
        )),
    }
}

fn parse_opt_level(s: &str) -> Result<OptLevel, String> {
    match s {
        "0" => Ok(OptLevel::O0),
        "1" => Ok(OptLevel::O1),
        "2" => Ok(OptLevel::O2),
        _ => Err(format!(
            "invalid optimization level '{s}', expected 0, 1, or 2"
        )),
    }
}

fn parse_sysval(s: &str) -> Result<SystemValue, String> {
    SystemValue::ALL
        .into_iter()
        .find(|sv| sv.name() == s)
        .ok_or_else(|| format!("unknown system value '{s}'"))
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {err:?}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> miette::Result<()> {
    let cli = Cli::parse();

    // 1. Read the SPIR-V binary.
    let spirv = std::fs::read(&cli.input)
        .into_diagnostic()
        .wrap_err_with(|| format!("failed to read {}", cli.input.display()))?;

    // 2. Parse one entry point to IR.
    let options = ParseOptions {
        stage: cli.stage,
        entry_point: cli.entry.as_deref(),
        target_env: cli.target_env,
        ..ParseOptions::default()
    };
    let mut shader = spinel_parser::parse(&spirv, &options)
        .map_err(|e| miette::miette!("{e}"))
        .wrap_err("SPIR-V to IR compilation failed")?;
    log::info!(
        "parsed {} entry point `{}`",
        shader.stage(),
        shader.info.name.as_deref().unwrap_or("main")
    );

    // 3. Optimize.
    let passes = PassManager::for_level(cli.opt_level);
    if cli.optimize {
        passes.run(&mut shader);
    }

    // 4. Lower for the driver.
    if cli.lower {
        let mut conf = RuntimeConf {
            zero_based_vertex_instance_id: cli.zero_based_ids,
            zero_based_compute_workgroup_id: cli.zero_based_ids,
            ..RuntimeConf::default()
        };
        if !cli.native_sysvals.is_empty() {
            conf.native_system_values = cli
                .native_sysvals
                .iter()
                .fold(SysvalSet::EMPTY, |set, &sv| set.with(sv));
        }
        let result = spinel_lower::lower_shader(&mut shader, &conf);
        if result.requires_runtime_data {
            log::info!("shader reads runtime data at {}", conf.runtime_data_cbv);
        }
        if cli.optimize {
            passes.run(&mut shader);
        }
    }

    // 5. Validate.
    spinel_ir::validate(&shader)
        .map_err(|e| miette::miette!("{e}"))
        .wrap_err("IR validation failed")?;

    // 6. Write the textual IR.
    let text = spinel_ir::dump_shader(&shader);
    match &cli.output {
        Some(path) => std::fs::write(path, text)
            .into_diagnostic()
            .wrap_err_with(|| format!("failed to write {}", path.display()))?,
        None => print!("{text}"),
    }

    Ok(())
}
