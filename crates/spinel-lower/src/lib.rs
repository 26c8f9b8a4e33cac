//! Backend-specializing lowering for Spinel shaders.
//!
//! These passes take a target-agnostic shader and commit it to a concrete
//! backend: memory accesses get an address format, implicit values are read
//! natively or from an injected runtime-data buffer, variables get explicit
//! byte layouts, and adjacent stages agree on their varying numbering.
//!
//! Every pass returns a [`LoweringResult`] instead of threading flags through
//! out-parameters; callers OR the results together and honor the obligations
//! they report.

mod address;
mod layout;
mod link;
mod push_const;
mod runtime;
mod sysval;
mod yz_flip;

pub use address::{AddressFormat, AddressFormats, lower_explicit_io};
pub use layout::{NaturalLayout, ScalarLayout, SizeAlign, assign_explicit_layout, explicit_type_layout};
pub use link::{LinkOptions, LinkResult, link_pipeline, link_shaders};
pub use push_const::lower_push_constants_to_ubo;
pub use runtime::{
    ComputeRuntimeData, FlipKind, RuntimeConf, VertexRuntimeData, YzFlip,
    add_runtime_data_variable,
};
pub use sysval::lower_system_values;
pub use yz_flip::lower_yz_flip;

use std::ops::{BitOr, BitOrAssign};

use spinel_ir::{Mode, ModeSet, Shader};

/// Outcome of a lowering pass: whether it changed anything, plus the
/// obligations the change created for the caller.
#[must_use]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoweringResult {
    pub progress: bool,
    /// The shader now reads the runtime-data buffer, so the caller must
    /// declare it with [`add_runtime_data_variable`].
    pub requires_runtime_data: bool,
    /// Highest `base + range` of any push-constant read.
    pub push_constant_size: Option<u32>,
}

impl LoweringResult {
    pub const NONE: Self = Self {
        progress: false,
        requires_runtime_data: false,
        push_constant_size: None,
    };

    pub fn progress(progress: bool) -> Self {
        Self {
            progress,
            ..Self::NONE
        }
    }
}

impl BitOr for LoweringResult {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self {
            progress: self.progress | rhs.progress,
            requires_runtime_data: self.requires_runtime_data | rhs.requires_runtime_data,
            push_constant_size: match (self.push_constant_size, rhs.push_constant_size) {
                (Some(a), Some(b)) => Some(a.max(b)),
                (a, b) => a.or(b),
            },
        }
    }
}

impl BitOrAssign for LoweringResult {
    fn bitor_assign(&mut self, rhs: Self) {
        *self = *self | rhs;
    }
}

/// Rounds `value` up to a multiple of `align`, which must be non-zero.
pub(crate) fn align_up(value: u32, align: u32) -> u32 {
    value.div_ceil(align) * align
}

/// Runs the per-shader lowering pipeline:
///
/// optimize, drop dead variables, materialize system values, flip y/z,
/// assign layouts to shared, scratch and constant memory, lower explicit IO,
/// move push constants into a buffer when requested, declare the runtime-data
/// buffer if anything needs it, and optimize again.
pub fn lower_shader(shader: &mut Shader, conf: &RuntimeConf) -> LoweringResult {
    log::info!("lowering {} shader", shader.stage());
    let mut result = LoweringResult::progress(spinel_opt::optimize(shader));

    let dead_modes = ModeSet::EMPTY
        .with(Mode::Shared)
        .with(Mode::FunctionTemp)
        .with(Mode::ShaderTemp)
        .with(Mode::Constant)
        .with(Mode::Uniform)
        .with(Mode::SystemValue);
    result.progress |= spinel_opt::remove_dead_variables(shader, dead_modes);

    result |= lower_system_values(shader, conf);
    result |= lower_yz_flip(shader, conf);

    result.progress |=
        assign_explicit_layout(shader, ModeSet::of(Mode::Shared), &NaturalLayout);
    result.progress |= assign_explicit_layout(
        shader,
        ModeSet::EMPTY
            .with(Mode::FunctionTemp)
            .with(Mode::ShaderTemp)
            .with(Mode::Constant)
            .with(Mode::Uniform),
        &ScalarLayout,
    );

    let io_modes = ModeSet::ALL.iter().filter(|&m| {
        conf.address_formats.for_mode(m) != AddressFormat::Logical
    });
    let io_modes = io_modes.fold(ModeSet::EMPTY, ModeSet::with);
    result |= lower_explicit_io(shader, io_modes, &conf.address_formats);

    if conf.push_constants_to_ubo {
        result |= lower_push_constants_to_ubo(shader, conf.push_constant_cbv);
    }

    if result.requires_runtime_data {
        add_runtime_data_variable(shader, conf);
    }

    result.progress |= spinel_opt::optimize(shader);
    result.progress |= spinel_opt::remove_dead_variables(
        shader,
        ModeSet::of(Mode::SystemValue) | Mode::PushConstant,
    );
    shader.gather_info();
    log::info!(
        "lowered {} shader: {} instructions, runtime data {}",
        shader.stage(),
        shader.instr_count(),
        if result.requires_runtime_data { "required" } else { "unused" }
    );
    result
}
