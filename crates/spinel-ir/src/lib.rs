//! Spinel intermediate representation.
//!
//! An arena-based SSA IR over a control-flow graph, shaped after the shader
//! IRs of GPU driver compilers: typed variables with a storage mode, deref
//! chains naming memory, and intrinsics for everything a target must lower.

pub mod arena;
mod builder;
mod display;
mod error;
mod func;
mod instr;
pub mod metadata;
mod shader;
mod slot;
mod types;
mod validate;
mod var;

pub use arena::{Arena, Handle, Pool, UniqueArena};
pub use builder::{Builder, Cursor};
pub use display::{dump_shader, format_instr, format_type, format_type_inner};
pub use error::IrError;
pub use func::{Block, Function, Terminator};
pub use instr::{
    Alignment, AluOp, AtomicOp, Def, Deref, DerefKind, Instr, InstrKind, Intrinsic, IntrinsicOp,
    PhiSrc, Value,
};
pub use metadata::{DomTree, Loop, LoopForest, Metadata};
pub use shader::{Shader, ShaderInfo, Stage};
pub use slot::{Slot, SlotSet, SystemValue, SysvalSet};
pub use types::{
    ArraySize, Bytes, Scalar, ScalarKind, StructMember, Type, TypeInner, VectorSize, memory_width,
};
pub use validate::{validate, validate_function};
pub use var::{
    Constant, DescriptorBinding, ExplicitLayout, HowDeclared, Mode, ModeSet, VarData, Variable,
};
