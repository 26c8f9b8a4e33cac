//! Interface slots and system values, with their bitset types.

use std::fmt;
use std::ops::{BitAnd, BitOr, BitOrAssign, Sub};

use crate::instr::Def;

/// An interface slot identifying one 16-byte varying location.
///
/// Slots below [`Slot::VAR0`] are builtins with fixed meaning; the 32 slots
/// starting at `VAR0` are generic, user-numbered varyings.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Slot(u8);

impl Slot {
    pub const POS: Self = Self(0);
    pub const PSIZ: Self = Self(1);
    pub const CLIP_DIST0: Self = Self(2);
    pub const CLIP_DIST1: Self = Self(3);
    pub const CULL_DIST0: Self = Self(4);
    pub const LAYER: Self = Self(5);
    pub const VIEWPORT: Self = Self(6);
    pub const PRIMITIVE_ID: Self = Self(7);
    pub const FACE: Self = Self(8);
    pub const PNTC: Self = Self(9);
    pub const FRAG_DEPTH: Self = Self(10);
    pub const SAMPLE_MASK: Self = Self(11);
    pub const FRAG_DATA0: Self = Self(16);
    pub const VAR0: Self = Self(32);

    /// Number of generic varying slots.
    pub const MAX_VARYINGS: u8 = 32;

    /// Generic varying `n`.
    pub const fn var(n: u8) -> Self {
        assert!(n < Self::MAX_VARYINGS, "generic varying index out of range");
        Self(Self::VAR0.0 + n)
    }

    /// Fragment color output `n`.
    pub const fn frag_data(n: u8) -> Self {
        assert!(n < 8, "fragment output index out of range");
        Self(Self::FRAG_DATA0.0 + n)
    }

    pub fn from_index(index: u8) -> Option<Self> {
        (index < 64).then_some(Self(index))
    }

    pub fn index(self) -> u8 {
        self.0
    }

    pub fn offset(self, n: u32) -> Option<Self> {
        u8::try_from(u32::from(self.0) + n)
            .ok()
            .and_then(Self::from_index)
    }

    /// Returns `true` for user-numbered varyings.
    pub fn is_generic(self) -> bool {
        self.0 >= Self::VAR0.0
    }

    /// Index of a generic varying, `None` for builtins.
    pub fn generic_index(self) -> Option<u8> {
        self.is_generic().then(|| self.0 - Self::VAR0.0)
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::POS => write!(f, "POS"),
            Self::PSIZ => write!(f, "PSIZ"),
            Self::CLIP_DIST0 => write!(f, "CLIP_DIST0"),
            Self::CLIP_DIST1 => write!(f, "CLIP_DIST1"),
            Self::CULL_DIST0 => write!(f, "CULL_DIST0"),
            Self::LAYER => write!(f, "LAYER"),
            Self::VIEWPORT => write!(f, "VIEWPORT"),
            Self::PRIMITIVE_ID => write!(f, "PRIMITIVE_ID"),
            Self::FACE => write!(f, "FACE"),
            Self::PNTC => write!(f, "PNTC"),
            Self::FRAG_DEPTH => write!(f, "FRAG_DEPTH"),
            Self::SAMPLE_MASK => write!(f, "SAMPLE_MASK"),
            s if s.is_generic() => write!(f, "VAR{}", s.0 - Self::VAR0.0),
            s if s >= Self::FRAG_DATA0 => write!(f, "DATA{}", s.0 - Self::FRAG_DATA0.0),
            s => write!(f, "SLOT{}", s.0),
        }
    }
}

/// A set of [`Slot`]s.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq)]
pub struct SlotSet(u64);

impl SlotSet {
    pub const EMPTY: Self = Self(0);

    pub fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    pub fn bits(self) -> u64 {
        self.0
    }

    pub fn contains(self, slot: Slot) -> bool {
        self.0 & (1 << slot.0) != 0
    }

    pub fn insert(&mut self, slot: Slot) {
        self.0 |= 1 << slot.0;
    }

    pub fn remove(&mut self, slot: Slot) {
        self.0 &= !(1 << slot.0);
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> u32 {
        self.0.count_ones()
    }

    pub fn is_subset(self, other: Self) -> bool {
        self.0 & !other.0 == 0
    }

    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    /// Number of members strictly below `slot`.
    pub fn count_below(self, slot: Slot) -> u32 {
        (self.0 & ((1u64 << slot.0) - 1)).count_ones()
    }

    /// Keeps only the generic varyings.
    pub fn generic(self) -> Self {
        Self(self.0 & !((1u64 << Slot::VAR0.0) - 1))
    }

    pub fn iter(self) -> impl Iterator<Item = Slot> {
        (0..64u8).filter(move |&i| self.0 & (1 << i) != 0).map(Slot)
    }
}

impl BitOr for SlotSet {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for SlotSet {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for SlotSet {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self(self.0 & rhs.0)
    }
}

impl Sub for SlotSet {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self(self.0 & !rhs.0)
    }
}

impl FromIterator<Slot> for SlotSet {
    fn from_iter<I: IntoIterator<Item = Slot>>(iter: I) -> Self {
        let mut set = Self::EMPTY;
        for slot in iter {
            set.insert(slot);
        }
        set
    }
}

impl fmt::Display for SlotSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, slot) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{slot}")?;
        }
        write!(f, "}}")
    }
}

/// An implicit per-invocation or per-draw value.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
#[repr(u8)]
pub enum SystemValue {
    /// Vertex index including the draw's first vertex.
    VertexId,
    /// Vertex index relative to the draw's first vertex.
    VertexIdZeroBase,
    /// Instance index including the draw's base instance.
    InstanceId,
    /// Instance index relative to the draw's base instance.
    InstanceIdZeroBase,
    FirstVertex,
    /// First vertex for indexed draws, zero otherwise.
    BaseVertex,
    BaseInstance,
    IsIndexedDraw,
    DrawId,
    ViewIndex,
    FrontFace,
    FragCoord,
    SampleId,
    SampleMaskIn,
    GlobalInvocationId,
    LocalInvocationId,
    LocalInvocationIndex,
    /// Workgroup id including the dispatch's base group.
    WorkgroupId,
    /// Workgroup id relative to the dispatch's base group.
    WorkgroupIdZeroBase,
    BaseWorkgroupId,
    NumWorkgroups,
}

impl SystemValue {
    pub const ALL: [Self; 21] = [
        Self::VertexId,
        Self::VertexIdZeroBase,
        Self::InstanceId,
        Self::InstanceIdZeroBase,
        Self::FirstVertex,
        Self::BaseVertex,
        Self::BaseInstance,
        Self::IsIndexedDraw,
        Self::DrawId,
        Self::ViewIndex,
        Self::FrontFace,
        Self::FragCoord,
        Self::SampleId,
        Self::SampleMaskIn,
        Self::GlobalInvocationId,
        Self::LocalInvocationId,
        Self::LocalInvocationIndex,
        Self::WorkgroupId,
        Self::WorkgroupIdZeroBase,
        Self::BaseWorkgroupId,
        Self::NumWorkgroups,
    ];

    /// Shape of the value a read of this system value produces.
    pub fn def(self) -> Def {
        match self {
            Self::GlobalInvocationId
            | Self::LocalInvocationId
            | Self::WorkgroupId
            | Self::WorkgroupIdZeroBase
            | Self::BaseWorkgroupId
            | Self::NumWorkgroups => Def::new(3, 32),
            Self::FragCoord => Def::new(4, 32),
            Self::FrontFace => Def::BOOL,
            _ => Def::U32,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::VertexId => "vertex_id",
            Self::VertexIdZeroBase => "vertex_id_zero_base",
            Self::InstanceId => "instance_id",
            Self::InstanceIdZeroBase => "instance_id_zero_base",
            Self::FirstVertex => "first_vertex",
            Self::BaseVertex => "base_vertex",
            Self::BaseInstance => "base_instance",
            Self::IsIndexedDraw => "is_indexed_draw",
            Self::DrawId => "draw_id",
            Self::ViewIndex => "view_index",
            Self::FrontFace => "front_face",
            Self::FragCoord => "frag_coord",
            Self::SampleId => "sample_id",
            Self::SampleMaskIn => "sample_mask_in",
            Self::GlobalInvocationId => "global_invocation_id",
            Self::LocalInvocationId => "local_invocation_id",
            Self::LocalInvocationIndex => "local_invocation_index",
            Self::WorkgroupId => "workgroup_id",
            Self::WorkgroupIdZeroBase => "workgroup_id_zero_base",
            Self::BaseWorkgroupId => "base_workgroup_id",
            Self::NumWorkgroups => "num_workgroups",
        }
    }
}

impl fmt::Display for SystemValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A set of [`SystemValue`]s.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq)]
pub struct SysvalSet(u32);

impl SysvalSet {
    pub const EMPTY: Self = Self(0);

    pub const fn with(self, value: SystemValue) -> Self {
        Self(self.0 | 1 << value as u8)
    }

    pub fn contains(self, value: SystemValue) -> bool {
        self.0 & (1 << value as u8) != 0
    }

    pub fn insert(&mut self, value: SystemValue) {
        self.0 |= 1 << value as u8;
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn iter(self) -> impl Iterator<Item = SystemValue> {
        SystemValue::ALL.into_iter().filter(move |&v| self.contains(v))
    }
}

impl FromIterator<SystemValue> for SysvalSet {
    fn from_iter<I: IntoIterator<Item = SystemValue>>(iter: I) -> Self {
        let mut set = Self::EMPTY;
        for value in iter {
            set.insert(value);
        }
        set
    }
}

impl fmt::Display for SysvalSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, value) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{value}")?;
        }
        write!(f, "}}")
    }
}
