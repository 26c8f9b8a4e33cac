//! SPIR-V frontend for Spinel.
//!
//! Reads a SPIR-V module with [naga](https://crates.io/crates/naga)'s SPIR-V
//! frontend, validates it, picks one entry point and lowers naga's
//! structured IR into a Spinel [`Shader`].

mod lower;

use spinel_ir::{Shader, Stage};

/// Client environment the module was compiled for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TargetEnv {
    #[default]
    Vulkan,
    /// GL semantics for builtins such as `BaseVertex`.
    OpenGl,
    /// Kernels; not accepted by this frontend.
    OpenCl,
}

/// Severity of a frontend diagnostic.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DebugLevel {
    Info,
    Warning,
    Error,
}

/// Receives diagnostics while a module is parsed.
///
/// `offset` is the byte offset in the SPIR-V binary the message refers to,
/// or 0 when it is not tied to a position.
pub trait DebugSink {
    fn message(&self, level: DebugLevel, offset: usize, message: &str);
}

/// Forwards diagnostics to the `log` facade.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogSink;

impl DebugSink for LogSink {
    fn message(&self, level: DebugLevel, offset: usize, message: &str) {
        match level {
            DebugLevel::Info => log::info!("spirv@{offset}: {message}"),
            DebugLevel::Warning => log::warn!("spirv@{offset}: {message}"),
            DebugLevel::Error => log::error!("spirv@{offset}: {message}"),
        }
    }
}

/// Which entry point to lower, and how.
#[derive(Clone, Copy)]
pub struct ParseOptions<'a> {
    /// Only consider entry points of this stage.
    pub stage: Option<Stage>,
    /// Only consider entry points with this name.
    pub entry_point: Option<&'a str>,
    pub target_env: TargetEnv,
    pub debug_sink: &'a dyn DebugSink,
}

impl Default for ParseOptions<'_> {
    fn default() -> Self {
        Self {
            stage: None,
            entry_point: None,
            target_env: TargetEnv::default(),
            debug_sink: &LogSink,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error(transparent)]
    Read(#[from] naga::front::spv::Error),
    #[error("invalid module: {0}")]
    Validation(Box<naga::WithSpan<naga::valid::ValidationError>>),
    #[error("no entry point matches{}", describe_filter(.stage, .name))]
    NoEntryPoint {
        stage: Option<Stage>,
        name: Option<String>,
    },
    #[error("several entry points match: {}", .candidates.join(", "))]
    AmbiguousEntryPoint { candidates: Vec<String> },
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("lowering: {0}")]
    Lowering(String),
}

fn describe_filter(stage: &Option<Stage>, name: &Option<String>) -> String {
    match (stage, name) {
        (None, None) => String::new(),
        (Some(stage), None) => format!(" stage {stage}"),
        (None, Some(name)) => format!(" `{name}`"),
        (Some(stage), Some(name)) => format!(" `{name}` for stage {stage}"),
    }
}

/// Parse a SPIR-V binary into the IR of one of its entry points.
///
/// The entry point is chosen by [`ParseOptions::entry_point`] and
/// [`ParseOptions::stage`]; exactly one must match.
pub fn parse(spirv: &[u8], options: &ParseOptions<'_>) -> Result<Shader, ParseError> {
    let sink = options.debug_sink;
    if options.target_env == TargetEnv::OpenCl {
        let err = ParseError::Unsupported("OpenCL kernels".into());
        sink.message(DebugLevel::Error, 0, &err.to_string());
        return Err(err);
    }

    let frontend = naga::front::spv::Options {
        adjust_coordinate_space: false,
        ..Default::default()
    };
    let module = naga::front::spv::parse_u8_slice(spirv, &frontend).inspect_err(|err| {
        sink.message(DebugLevel::Error, 0, &err.to_string());
    })?;

    let mut validator = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    );
    if let Err(err) = validator.validate(&module) {
        sink.message(DebugLevel::Error, 0, &err.to_string());
        return Err(ParseError::Validation(Box::new(err)));
    }

    let entry = select_entry_point(&module, options)?;
    let ep = &module.entry_points[entry];
    sink.message(
        DebugLevel::Info,
        0,
        &format!("lowering entry point `{}`", ep.name),
    );
    lower::lower_entry_point(&module, ep, options)
}

pub(crate) fn stage_of(stage: naga::ShaderStage) -> Option<Stage> {
    match stage {
        naga::ShaderStage::Vertex => Some(Stage::Vertex),
        naga::ShaderStage::Fragment => Some(Stage::Fragment),
        naga::ShaderStage::Compute => Some(Stage::Compute),
        #[allow(unreachable_patterns)]
        _ => None,
    }
}

fn select_entry_point(module: &naga::Module, options: &ParseOptions<'_>) -> Result<usize, ParseError> {
    let matches: Vec<usize> = module
        .entry_points
        .iter()
        .enumerate()
        .filter(|(_, ep)| options.entry_point.is_none_or(|name| ep.name == name))
        .filter(|(_, ep)| {
            options
                .stage
                .is_none_or(|stage| stage_of(ep.stage) == Some(stage))
        })
        .map(|(i, _)| i)
        .collect();

    match *matches.as_slice() {
        [entry] => Ok(entry),
        [] => Err(ParseError::NoEntryPoint {
            stage: options.stage,
            name: options.entry_point.map(str::to_owned),
        }),
        _ => Err(ParseError::AmbiguousEntryPoint {
            candidates: matches
                .iter()
                .map(|&i| {
                    let ep = &module.entry_points[i];
                    format!("{} ({:?})", ep.name, ep.stage)
                })
                .collect(),
        }),
    }
}
