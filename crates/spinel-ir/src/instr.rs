//! SSA instructions.
//!
//! Every instruction lives in its function's [`Pool`](crate::Pool) and is
//! addressed by a [`Value`]. An instruction defines at most one SSA value,
//! described by its [`Def`]; operands are the values of other instructions.

use std::fmt;

use crate::arena::Handle;
use crate::func::{Block, Function};
use crate::slot::SystemValue;
use crate::types::Type;
use crate::var::{DescriptorBinding, Mode, Variable};

/// An SSA value: the handle of its defining instruction.
pub type Value = Handle<Instr>;

/// Shape of an SSA value.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct Def {
    pub num_components: u8,
    pub bit_size: u8,
}

impl Def {
    pub const BOOL: Self = Self::new(1, 1);
    pub const U32: Self = Self::new(1, 32);
    pub const U64: Self = Self::new(1, 64);

    pub const fn new(num_components: u8, bit_size: u8) -> Self {
        Self {
            num_components,
            bit_size,
        }
    }

    pub const fn scalar(bit_size: u8) -> Self {
        Self::new(1, bit_size)
    }

    pub fn with_components(self, num_components: u8) -> Self {
        Self::new(num_components, self.bit_size)
    }

    /// Bytes occupied in memory, with 1-bit booleans widened to 32 bits.
    pub fn byte_size(self) -> u32 {
        let bits = if self.bit_size == 1 { 32 } else { self.bit_size };
        u32::from(self.num_components) * u32::from(bits) / 8
    }

    /// Mask with the low `bit_size` bits set.
    pub fn bit_mask(self) -> u64 {
        if self.bit_size >= 64 {
            u64::MAX
        } else {
            (1u64 << self.bit_size) - 1
        }
    }
}

impl fmt::Display for Def {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.num_components == 1 {
            write!(f, "{}", self.bit_size)
        } else {
            write!(f, "{}x{}", self.bit_size, self.num_components)
        }
    }
}

/// ALU operations. Conversions carry their destination bit size.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum AluOp {
    /// Copy.
    Mov,
    /// Build a vector from scalar sources.
    Vec,
    /// Extract one component.
    Extract(u8),

    IAdd,
    ISub,
    IMul,
    IDiv,
    UDiv,
    IRem,
    UMod,
    INeg,
    IAbs,
    IMin,
    IMax,
    UMin,
    UMax,

    FAdd,
    FSub,
    FMul,
    FDiv,
    FNeg,
    FAbs,
    FMin,
    FMax,
    FFma,
    FDot,
    FSqrt,
    FRsq,
    FFloor,
    FCeil,
    FFract,
    FTrunc,
    FSin,
    FCos,
    FExp2,
    FLog2,
    FPow,

    IAnd,
    IOr,
    IXor,
    INot,
    IShl,
    IShr,
    UShr,

    IEq,
    INe,
    ILt,
    IGe,
    ULt,
    UGe,
    FEq,
    FNe,
    FLt,
    FGe,

    /// `srcs[0] ? srcs[1] : srcs[2]`, per component.
    BCsel,

    I2F(u8),
    U2F(u8),
    F2I(u8),
    F2U(u8),
    /// Sign-extend or truncate.
    I2I(u8),
    /// Zero-extend or truncate.
    U2U(u8),
    F2F(u8),
    B2I(u8),
    B2F(u8),
}

impl AluOp {
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            Self::IAdd
                | Self::IMul
                | Self::IMin
                | Self::IMax
                | Self::UMin
                | Self::UMax
                | Self::FAdd
                | Self::FMul
                | Self::FMin
                | Self::FMax
                | Self::FDot
                | Self::IAnd
                | Self::IOr
                | Self::IXor
                | Self::IEq
                | Self::INe
                | Self::FEq
                | Self::FNe
        )
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::IEq
                | Self::INe
                | Self::ILt
                | Self::IGe
                | Self::ULt
                | Self::UGe
                | Self::FEq
                | Self::FNe
                | Self::FLt
                | Self::FGe
        )
    }

    /// Number of sources, `None` for [`AluOp::Vec`].
    pub fn num_srcs(self) -> Option<usize> {
        Some(match self {
            Self::Vec => return None,
            Self::Mov
            | Self::Extract(_)
            | Self::INeg
            | Self::IAbs
            | Self::FNeg
            | Self::FAbs
            | Self::FSqrt
            | Self::FRsq
            | Self::FFloor
            | Self::FCeil
            | Self::FFract
            | Self::FTrunc
            | Self::FSin
            | Self::FCos
            | Self::FExp2
            | Self::FLog2
            | Self::INot
            | Self::I2F(_)
            | Self::U2F(_)
            | Self::F2I(_)
            | Self::F2U(_)
            | Self::I2I(_)
            | Self::U2U(_)
            | Self::F2F(_)
            | Self::B2I(_)
            | Self::B2F(_) => 1,
            Self::FFma | Self::BCsel => 3,
            _ => 2,
        })
    }

    /// Result shape given the shapes of the sources.
    pub fn infer_def(self, srcs: &[Def]) -> Def {
        let first = srcs[0];
        match self {
            Self::Vec => Def::new(srcs.len() as u8, first.bit_size),
            Self::Extract(_) | Self::FDot => Def::scalar(first.bit_size),
            op if op.is_comparison() => Def::new(first.num_components, 1),
            Self::BCsel => srcs[1],
            Self::I2F(bits)
            | Self::U2F(bits)
            | Self::F2I(bits)
            | Self::F2U(bits)
            | Self::I2I(bits)
            | Self::U2U(bits)
            | Self::F2F(bits)
            | Self::B2I(bits)
            | Self::B2F(bits) => Def::new(first.num_components, bits),
            _ => first,
        }
    }
}

impl fmt::Display for AluOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Extract(c) => return write!(f, "extract.{c}"),
            Self::I2F(b) => return write!(f, "i2f{b}"),
            Self::U2F(b) => return write!(f, "u2f{b}"),
            Self::F2I(b) => return write!(f, "f2i{b}"),
            Self::F2U(b) => return write!(f, "f2u{b}"),
            Self::I2I(b) => return write!(f, "i2i{b}"),
            Self::U2U(b) => return write!(f, "u2u{b}"),
            Self::F2F(b) => return write!(f, "f2f{b}"),
            Self::B2I(b) => return write!(f, "b2i{b}"),
            Self::B2F(b) => return write!(f, "b2f{b}"),
            other => format!("{other:?}").to_lowercase(),
        };
        f.write_str(&name)
    }
}

/// Atomic read-modify-write operations.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum AtomicOp {
    Add,
    And,
    Or,
    Xor,
    IMin,
    IMax,
    UMin,
    UMax,
    Exchange,
    CompareExchange,
}

/// Known alignment of an address: `address % mul == offset`.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct Alignment {
    pub mul: u32,
    pub offset: u32,
}

impl Alignment {
    pub const fn new(mul: u32, offset: u32) -> Self {
        Self { mul, offset }
    }
}

/// Intrinsic operations: memory access, resources and builtins.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub enum Intrinsic {
    LoadDeref {
        deref: Value,
    },
    StoreDeref {
        deref: Value,
        value: Value,
        write_mask: u8,
    },
    DerefAtomic {
        deref: Value,
        op: AtomicOp,
        data: Value,
        compare: Option<Value>,
    },
    /// Read of a builtin the target exposes directly.
    LoadSystemValue(SystemValue),
    /// Index of a resource within the descriptor layout.
    ResourceIndex {
        binding: DescriptorBinding,
        index: Value,
    },
    /// Turns a resource index into an address in the mode's format.
    LoadDescriptor {
        resource: Value,
        mode: Mode,
    },
    LoadUbo {
        resource: Value,
        offset: Value,
        align: Alignment,
        range_base: u32,
        range: u32,
    },
    LoadSsbo {
        resource: Value,
        offset: Value,
        align: Alignment,
    },
    StoreSsbo {
        resource: Value,
        offset: Value,
        value: Value,
        write_mask: u8,
        align: Alignment,
    },
    SsboAtomic {
        resource: Value,
        offset: Value,
        op: AtomicOp,
        data: Value,
        compare: Option<Value>,
    },
    LoadShared {
        offset: Value,
        align: Alignment,
    },
    StoreShared {
        offset: Value,
        value: Value,
        write_mask: u8,
        align: Alignment,
    },
    SharedAtomic {
        offset: Value,
        op: AtomicOp,
        data: Value,
        compare: Option<Value>,
    },
    LoadScratch {
        offset: Value,
        align: Alignment,
    },
    StoreScratch {
        offset: Value,
        value: Value,
        write_mask: u8,
        align: Alignment,
    },
    LoadGlobal {
        address: Value,
        align: Alignment,
    },
    StoreGlobal {
        address: Value,
        value: Value,
        write_mask: u8,
        align: Alignment,
    },
    GlobalAtomic {
        address: Value,
        op: AtomicOp,
        data: Value,
        compare: Option<Value>,
    },
    LoadUniform {
        offset: Value,
        base: u32,
        range: u32,
        align: Alignment,
    },
    /// Push-constant read of `range` bytes at `base + offset`.
    LoadPushConstant {
        offset: Value,
        base: u32,
        range: u32,
        align: Alignment,
    },
    LoadConstant {
        offset: Value,
        base: u32,
        range: u32,
        align: Alignment,
    },
    /// Workgroup execution and memory barrier.
    Barrier,
}

/// Fieldless tag of an [`Intrinsic`], used to filter intrinsic passes.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum IntrinsicOp {
    LoadDeref,
    StoreDeref,
    DerefAtomic,
    LoadSystemValue,
    ResourceIndex,
    LoadDescriptor,
    LoadUbo,
    LoadSsbo,
    StoreSsbo,
    SsboAtomic,
    LoadShared,
    StoreShared,
    SharedAtomic,
    LoadScratch,
    StoreScratch,
    LoadGlobal,
    StoreGlobal,
    GlobalAtomic,
    LoadUniform,
    LoadPushConstant,
    LoadConstant,
    Barrier,
}

impl IntrinsicOp {
    pub fn name(self) -> &'static str {
        match self {
            Self::LoadDeref => "load_deref",
            Self::StoreDeref => "store_deref",
            Self::DerefAtomic => "deref_atomic",
            Self::LoadSystemValue => "load_system_value",
            Self::ResourceIndex => "resource_index",
            Self::LoadDescriptor => "load_descriptor",
            Self::LoadUbo => "load_ubo",
            Self::LoadSsbo => "load_ssbo",
            Self::StoreSsbo => "store_ssbo",
            Self::SsboAtomic => "ssbo_atomic",
            Self::LoadShared => "load_shared",
            Self::StoreShared => "store_shared",
            Self::SharedAtomic => "shared_atomic",
            Self::LoadScratch => "load_scratch",
            Self::StoreScratch => "store_scratch",
            Self::LoadGlobal => "load_global",
            Self::StoreGlobal => "store_global",
            Self::GlobalAtomic => "global_atomic",
            Self::LoadUniform => "load_uniform",
            Self::LoadPushConstant => "load_push_constant",
            Self::LoadConstant => "load_constant",
            Self::Barrier => "barrier",
        }
    }
}

impl fmt::Display for IntrinsicOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Intrinsic {
    pub fn op(&self) -> IntrinsicOp {
        match self {
            Self::LoadDeref { .. } => IntrinsicOp::LoadDeref,
            Self::StoreDeref { .. } => IntrinsicOp::StoreDeref,
            Self::DerefAtomic { .. } => IntrinsicOp::DerefAtomic,
            Self::LoadSystemValue(_) => IntrinsicOp::LoadSystemValue,
            Self::ResourceIndex { .. } => IntrinsicOp::ResourceIndex,
            Self::LoadDescriptor { .. } => IntrinsicOp::LoadDescriptor,
            Self::LoadUbo { .. } => IntrinsicOp::LoadUbo,
            Self::LoadSsbo { .. } => IntrinsicOp::LoadSsbo,
            Self::StoreSsbo { .. } => IntrinsicOp::StoreSsbo,
            Self::SsboAtomic { .. } => IntrinsicOp::SsboAtomic,
            Self::LoadShared { .. } => IntrinsicOp::LoadShared,
            Self::StoreShared { .. } => IntrinsicOp::StoreShared,
            Self::SharedAtomic { .. } => IntrinsicOp::SharedAtomic,
            Self::LoadScratch { .. } => IntrinsicOp::LoadScratch,
            Self::StoreScratch { .. } => IntrinsicOp::StoreScratch,
            Self::LoadGlobal { .. } => IntrinsicOp::LoadGlobal,
            Self::StoreGlobal { .. } => IntrinsicOp::StoreGlobal,
            Self::GlobalAtomic { .. } => IntrinsicOp::GlobalAtomic,
            Self::LoadUniform { .. } => IntrinsicOp::LoadUniform,
            Self::LoadPushConstant { .. } => IntrinsicOp::LoadPushConstant,
            Self::LoadConstant { .. } => IntrinsicOp::LoadConstant,
            Self::Barrier => IntrinsicOp::Barrier,
        }
    }

    /// Operands in a fixed order.
    pub fn srcs(&self) -> Vec<Value> {
        let mut copy = self.clone();
        copy.srcs_mut().into_iter().map(|v| *v).collect()
    }

    pub fn srcs_mut(&mut self) -> Vec<&mut Value> {
        match self {
            Self::LoadDeref { deref } => vec![deref],
            Self::StoreDeref { deref, value, .. } => vec![deref, value],
            Self::DerefAtomic {
                deref,
                data,
                compare,
                ..
            } => with_optional(vec![deref, data], compare),
            Self::LoadSystemValue(_) | Self::Barrier => Vec::new(),
            Self::ResourceIndex { index, .. } => vec![index],
            Self::LoadDescriptor { resource, .. } => vec![resource],
            Self::LoadUbo {
                resource, offset, ..
            }
            | Self::LoadSsbo {
                resource, offset, ..
            } => vec![resource, offset],
            Self::StoreSsbo {
                resource,
                offset,
                value,
                ..
            } => vec![resource, offset, value],
            Self::SsboAtomic {
                resource,
                offset,
                data,
                compare,
                ..
            } => with_optional(vec![resource, offset, data], compare),
            Self::LoadShared { offset, .. }
            | Self::LoadScratch { offset, .. }
            | Self::LoadUniform { offset, .. }
            | Self::LoadPushConstant { offset, .. }
            | Self::LoadConstant { offset, .. } => vec![offset],
            Self::StoreShared { offset, value, .. } | Self::StoreScratch { offset, value, .. } => {
                vec![offset, value]
            }
            Self::SharedAtomic {
                offset,
                data,
                compare,
                ..
            } => with_optional(vec![offset, data], compare),
            Self::LoadGlobal { address, .. } => vec![address],
            Self::StoreGlobal { address, value, .. } => vec![address, value],
            Self::GlobalAtomic {
                address,
                data,
                compare,
                ..
            } => with_optional(vec![address, data], compare),
        }
    }

    /// Returns `true` if the intrinsic writes memory or synchronizes.
    pub fn has_side_effects(&self) -> bool {
        matches!(
            self.op(),
            IntrinsicOp::StoreDeref
                | IntrinsicOp::DerefAtomic
                | IntrinsicOp::StoreSsbo
                | IntrinsicOp::SsboAtomic
                | IntrinsicOp::StoreShared
                | IntrinsicOp::SharedAtomic
                | IntrinsicOp::StoreScratch
                | IntrinsicOp::StoreGlobal
                | IntrinsicOp::GlobalAtomic
                | IntrinsicOp::Barrier
        )
    }

    /// Returns `true` if the intrinsic reads nothing that a store could change,
    /// so two identical instances always produce the same value.
    pub fn can_reorder(&self) -> bool {
        matches!(
            self.op(),
            IntrinsicOp::LoadSystemValue
                | IntrinsicOp::ResourceIndex
                | IntrinsicOp::LoadDescriptor
                | IntrinsicOp::LoadUbo
                | IntrinsicOp::LoadUniform
                | IntrinsicOp::LoadPushConstant
                | IntrinsicOp::LoadConstant
        )
    }
}

fn with_optional<'a>(mut srcs: Vec<&'a mut Value>, extra: &'a mut Option<Value>) -> Vec<&'a mut Value> {
    if let Some(v) = extra {
        srcs.push(v);
    }
    srcs
}

/// The step a deref instruction takes.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub enum DerefKind {
    /// Root of a chain.
    Var(Handle<Variable>),
    Array { parent: Value, index: Value },
    Struct { parent: Value, member: u32 },
}

/// A symbolic memory location: a variable or a path into it.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct Deref {
    pub kind: DerefKind,
    pub mode: Mode,
    /// Type of the location this deref names.
    pub ty: Handle<Type>,
}

/// A phi operand flowing in from `pred`.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct PhiSrc {
    pub pred: Handle<Block>,
    pub value: Value,
}

/// What an instruction does.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub enum InstrKind {
    /// Immediate, one entry per component, bits above the bit size are zero.
    Const(Vec<u64>),
    Undef,
    Alu { op: AluOp, srcs: Vec<Value> },
    Intrinsic(Intrinsic),
    Deref(Deref),
    Phi(Vec<PhiSrc>),
    Call {
        callee: Handle<Function>,
        args: Vec<Value>,
    },
    /// Function parameter `n`, placed in the entry block.
    Param(u32),
}

impl InstrKind {
    pub fn srcs(&self) -> Vec<Value> {
        match self {
            Self::Const(_) | Self::Undef | Self::Param(_) => Vec::new(),
            Self::Alu { srcs, .. } => srcs.clone(),
            Self::Intrinsic(intrinsic) => intrinsic.srcs(),
            Self::Deref(deref) => match deref.kind {
                DerefKind::Var(_) => Vec::new(),
                DerefKind::Array { parent, index } => vec![parent, index],
                DerefKind::Struct { parent, .. } => vec![parent],
            },
            Self::Phi(srcs) => srcs.iter().map(|s| s.value).collect(),
            Self::Call { args, .. } => args.clone(),
        }
    }

    pub fn srcs_mut(&mut self) -> Vec<&mut Value> {
        match self {
            Self::Const(_) | Self::Undef | Self::Param(_) => Vec::new(),
            Self::Alu { srcs, .. } => srcs.iter_mut().collect(),
            Self::Intrinsic(intrinsic) => intrinsic.srcs_mut(),
            Self::Deref(deref) => match &mut deref.kind {
                DerefKind::Var(_) => Vec::new(),
                DerefKind::Array { parent, index } => vec![parent, index],
                DerefKind::Struct { parent, .. } => vec![parent],
            },
            Self::Phi(srcs) => srcs.iter_mut().map(|s| &mut s.value).collect(),
            Self::Call { args, .. } => args.iter_mut().collect(),
        }
    }

    pub fn as_const(&self) -> Option<&[u64]> {
        match self {
            Self::Const(values) => Some(values),
            _ => None,
        }
    }

    pub fn as_intrinsic(&self) -> Option<&Intrinsic> {
        match self {
            Self::Intrinsic(intrinsic) => Some(intrinsic),
            _ => None,
        }
    }

    pub fn as_deref(&self) -> Option<&Deref> {
        match self {
            Self::Deref(deref) => Some(deref),
            _ => None,
        }
    }

    pub fn is_phi(&self) -> bool {
        matches!(self, Self::Phi(_))
    }

    /// Returns `true` if the instruction must be kept even when its value is unused.
    pub fn has_side_effects(&self) -> bool {
        match self {
            Self::Intrinsic(intrinsic) => intrinsic.has_side_effects(),
            Self::Call { .. } => true,
            _ => false,
        }
    }

    /// Returns `true` if the instruction may be moved or merged with an
    /// identical one without changing the program.
    pub fn can_reorder(&self) -> bool {
        match self {
            Self::Const(_) | Self::Undef | Self::Alu { .. } | Self::Deref(_) => true,
            Self::Intrinsic(intrinsic) => intrinsic.can_reorder(),
            Self::Phi(_) | Self::Call { .. } | Self::Param(_) => false,
        }
    }
}

/// An instruction together with the block it sits in.
#[derive(Clone, Debug, PartialEq)]
pub struct Instr {
    pub kind: InstrKind,
    pub def: Option<Def>,
    pub block: Handle<Block>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn infer_def_rules() {
        let v3 = Def::new(3, 32);
        assert_eq!(AluOp::FAdd.infer_def(&[v3, v3]), v3);
        assert_eq!(AluOp::FLt.infer_def(&[v3, v3]), Def::new(3, 1));
        assert_eq!(AluOp::Extract(1).infer_def(&[v3]), Def::U32);
        assert_eq!(AluOp::U2U(64).infer_def(&[Def::U32]), Def::U64);
        assert_eq!(
            AluOp::Vec.infer_def(&[Def::U32, Def::U32]),
            Def::new(2, 32)
        );
        assert_eq!(
            AluOp::BCsel.infer_def(&[Def::BOOL, v3, v3]),
            v3
        );
    }

    #[test]
    fn def_sizes() {
        assert_eq!(Def::new(4, 32).byte_size(), 16);
        assert_eq!(Def::BOOL.byte_size(), 4);
        assert_eq!(Def::scalar(16).bit_mask(), 0xffff);
        assert_eq!(Def::U64.bit_mask(), u64::MAX);
        assert_eq!(Def::new(4, 32).to_string(), "32x4");
    }

    #[test]
    fn alu_op_display() {
        assert_eq!(AluOp::IAdd.to_string(), "iadd");
        assert_eq!(AluOp::Extract(2).to_string(), "extract.2");
        assert_eq!(AluOp::U2F(32).to_string(), "u2f32");
    }
}
