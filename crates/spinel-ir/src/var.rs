//! Variables, storage modes and interface/resource bindings.

use std::fmt;

use crate::arena::Handle;
use crate::slot::{Slot, SystemValue};
use crate::types::Type;

/// Storage class of a variable. Every variable has exactly one.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
#[repr(u8)]
pub enum Mode {
    /// Stage input varying.
    ShaderIn,
    /// Stage output varying.
    ShaderOut,
    /// Loose uniforms outside of any block.
    Uniform,
    /// Uniform buffer block.
    Ubo,
    /// Storage buffer block.
    Ssbo,
    /// Workgroup shared memory.
    Shared,
    /// Function-local temporary.
    FunctionTemp,
    /// Invocation-private variable visible to every function.
    ShaderTemp,
    /// Builtin read through a variable, turned into intrinsics by sysval lowering.
    SystemValue,
    /// Push-constant block.
    PushConstant,
    /// Read-only data baked into the shader.
    Constant,
    /// Memory reached through raw 64-bit addresses.
    Global,
}

impl Mode {
    pub const ALL: [Self; 12] = [
        Self::ShaderIn,
        Self::ShaderOut,
        Self::Uniform,
        Self::Ubo,
        Self::Ssbo,
        Self::Shared,
        Self::FunctionTemp,
        Self::ShaderTemp,
        Self::SystemValue,
        Self::PushConstant,
        Self::Constant,
        Self::Global,
    ];

    /// Returns `true` for classes that are never written by the shader.
    pub fn is_read_only(self) -> bool {
        matches!(
            self,
            Self::Uniform | Self::Ubo | Self::PushConstant | Self::Constant | Self::SystemValue
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::ShaderIn => "shader_in",
            Self::ShaderOut => "shader_out",
            Self::Uniform => "uniform",
            Self::Ubo => "ubo",
            Self::Ssbo => "ssbo",
            Self::Shared => "shared",
            Self::FunctionTemp => "function_temp",
            Self::ShaderTemp => "shader_temp",
            Self::SystemValue => "system_value",
            Self::PushConstant => "push_const",
            Self::Constant => "constant",
            Self::Global => "global",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Bitflags over [`Mode`].
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq)]
pub struct ModeSet(u16);

impl ModeSet {
    pub const EMPTY: Self = Self(0);
    pub const ALL: Self = Self((1 << Mode::ALL.len()) - 1);

    pub const fn with(self, mode: Mode) -> Self {
        Self(self.0 | 1 << mode as u8)
    }

    pub const fn of(mode: Mode) -> Self {
        Self::EMPTY.with(mode)
    }

    pub fn contains(self, mode: Mode) -> bool {
        self.0 & (1 << mode as u8) != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = Mode> {
        Mode::ALL.into_iter().filter(move |&m| self.contains(m))
    }
}

impl std::ops::BitOr for ModeSet {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOr<Mode> for ModeSet {
    type Output = Self;
    fn bitor(self, rhs: Mode) -> Self {
        self.with(rhs)
    }
}

impl From<Mode> for ModeSet {
    fn from(mode: Mode) -> Self {
        Self::of(mode)
    }
}

/// `(set, binding)` pair locating a resource in the descriptor layout.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct DescriptorBinding {
    pub set: u32,
    pub binding: u32,
}

impl DescriptorBinding {
    pub const fn new(set: u32, binding: u32) -> Self {
        Self { set, binding }
    }
}

impl fmt::Display for DescriptorBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.set, self.binding)
    }
}

/// Whether a variable came from the source program or was added by a pass.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq)]
pub enum HowDeclared {
    #[default]
    User,
    Injected,
}

/// Explicit placement of a variable in its storage class.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct ExplicitLayout {
    pub offset: u32,
    pub size: u32,
    pub align: u32,
}

/// Binding and placement data attached to a variable.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VarData {
    pub binding: Option<DescriptorBinding>,
    /// Interface slot of stage inputs and outputs.
    pub location: Option<Slot>,
    /// Builtin read by a [`Mode::SystemValue`] variable.
    pub system_value: Option<SystemValue>,
    /// Backend-facing location: the packed varying index for interface
    /// variables, the byte offset for explicitly laid out ones.
    pub driver_location: u32,
    pub explicit: Option<ExplicitLayout>,
    pub how_declared: HowDeclared,
}

/// A constant initializer.
#[derive(Clone, Debug, PartialEq)]
pub enum Constant {
    /// All bits zero.
    Zero,
    /// Raw scalar bits, zero-extended to 64 bits.
    Scalar(u64),
    /// Vector components, matrix columns, array elements or struct members.
    Composite(Vec<Constant>),
}

/// A shader variable.
#[derive(Clone, Debug, PartialEq)]
pub struct Variable {
    pub name: Option<String>,
    pub ty: Handle<Type>,
    pub mode: Mode,
    pub init: Option<Constant>,
    pub data: VarData,
}

impl Variable {
    pub fn new(name: impl Into<String>, ty: Handle<Type>, mode: Mode) -> Self {
        Self {
            name: Some(name.into()),
            ty,
            mode,
            init: None,
            data: VarData::default(),
        }
    }

    pub fn with_location(mut self, slot: Slot) -> Self {
        self.data.location = Some(slot);
        self
    }

    pub fn with_binding(mut self, binding: DescriptorBinding) -> Self {
        self.data.binding = Some(binding);
        self
    }

    pub fn injected(mut self) -> Self {
        self.data.how_declared = HowDeclared::Injected;
        self
    }
}
