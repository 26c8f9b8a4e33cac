//! Address-format lowering.
//!
//! Rewrites deref-based loads, stores and atomics into explicit memory
//! intrinsics. Each storage class is addressed in the [`AddressFormat`]
//! configured for it; the byte offset of a deref chain is computed from the
//! explicit layout the variable's type already carries.

use spinel_ir::{
    Alignment, ArraySize, AtomicOp, Builder, Def, DerefKind, DescriptorBinding, ExplicitLayout,
    Function, Handle, InstrKind, Intrinsic, IntrinsicOp, Metadata, Mode, ModeSet, Shader, Type,
    TypeInner, UniqueArena, Value, memory_width,
};
use spinel_opt::{InstrCtx, run_intrinsics_pass};

use crate::LoweringResult;

/// How addresses of a storage class are represented.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq)]
pub enum AddressFormat {
    /// Accesses stay on derefs.
    #[default]
    Logical,
    /// A 32-bit byte offset into the class's memory.
    Offset32,
    /// A `(resource index, byte offset)` pair of 32-bit values.
    IndexOffset32,
    /// A raw 64-bit address.
    Global64,
}

impl AddressFormat {
    /// Shape of an address in this format. `None` for [`AddressFormat::Logical`].
    pub fn def(self) -> Option<Def> {
        match self {
            Self::Logical => None,
            Self::Offset32 => Some(Def::U32),
            Self::IndexOffset32 => Some(Def::new(2, 32)),
            Self::Global64 => Some(Def::U64),
        }
    }
}

/// Address format per storage class.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct AddressFormats {
    pub ubo: AddressFormat,
    pub ssbo: AddressFormat,
    pub shared: AddressFormat,
    /// Used for both function-local and shader-wide temporaries.
    pub function_temp: AddressFormat,
    pub global: AddressFormat,
    pub push_constant: AddressFormat,
    pub constant: AddressFormat,
    pub uniform: AddressFormat,
}

impl Default for AddressFormats {
    fn default() -> Self {
        Self {
            ubo: AddressFormat::IndexOffset32,
            ssbo: AddressFormat::IndexOffset32,
            shared: AddressFormat::Offset32,
            function_temp: AddressFormat::Offset32,
            global: AddressFormat::Global64,
            push_constant: AddressFormat::Offset32,
            constant: AddressFormat::Offset32,
            uniform: AddressFormat::Offset32,
        }
    }
}

impl AddressFormats {
    /// Every class that is not listed stays [`AddressFormat::Logical`].
    pub fn for_mode(&self, mode: Mode) -> AddressFormat {
        match mode {
            Mode::Ubo => self.ubo,
            Mode::Ssbo => self.ssbo,
            Mode::Shared => self.shared,
            Mode::FunctionTemp | Mode::ShaderTemp => self.function_temp,
            Mode::Global => self.global,
            Mode::PushConstant => self.push_constant,
            Mode::Constant => self.constant,
            Mode::Uniform => self.uniform,
            Mode::ShaderIn | Mode::ShaderOut | Mode::SystemValue => AddressFormat::Logical,
        }
    }
}

/// Alignment assumed for the start of a descriptor-backed buffer.
const BUFFER_ALIGN: u32 = 16;

/// Emits the resource index and descriptor load of `binding[index]` and
/// returns its `(resource, base offset)` pair.
pub(crate) fn descriptor_address(
    b: &mut Builder<'_>,
    binding: DescriptorBinding,
    index: Value,
    mode: Mode,
) -> (Value, Value) {
    let descriptor = load_descriptor(b, binding, index, mode, AddressFormat::IndexOffset32);
    let resource = b.extract(descriptor, 0);
    let base = b.extract(descriptor, 1);
    (resource, base)
}

/// Emits the resource index and descriptor load of `binding[index]` and
/// returns its 64-bit base address.
pub(crate) fn descriptor_pointer(
    b: &mut Builder<'_>,
    binding: DescriptorBinding,
    index: Value,
    mode: Mode,
) -> Value {
    load_descriptor(b, binding, index, mode, AddressFormat::Global64)
}

fn load_descriptor(
    b: &mut Builder<'_>,
    binding: DescriptorBinding,
    index: Value,
    mode: Mode,
    format: AddressFormat,
) -> Value {
    let resource = b.intrinsic(Intrinsic::ResourceIndex { binding, index }, Some(Def::U32));
    b.intrinsic(Intrinsic::LoadDescriptor { resource, mode }, format.def())
}

/// Byte offset of a deref chain relative to its root variable.
#[derive(Clone, Debug, Default, PartialEq)]
struct ChainOffset {
    /// Sum of every step whose index is known, wrapped to the 32-bit
    /// offset width.
    constant: u32,
    /// Dynamic indices with their byte strides, root first.
    dynamic: Vec<(Value, u32)>,
    /// Power of two every dynamic stride is a multiple of.
    stride_align: u32,
}

impl ChainOffset {
    fn compute(types: &UniqueArena<Type>, root_ty: Handle<Type>, func: &Function, deref: Value) -> Self {
        let mut chain = Self {
            stride_align: 1 << 31,
            ..Self::default()
        };
        let mut ty = root_ty;
        for &step in &func.deref_path(deref)[1..] {
            let Some(d) = func.kind(step).as_deref() else {
                break;
            };
            match (&d.kind, &types[ty].inner) {
                (&DerefKind::Struct { member, .. }, TypeInner::Struct { members, .. }) => {
                    let m = &members[member as usize];
                    chain.constant = chain.constant.wrapping_add(m.offset);
                    ty = m.ty;
                }
                (&DerefKind::Array { index, .. }, inner) => {
                    let (stride, element) = match *inner {
                        TypeInner::Array { base, stride, .. } => (stride, base),
                        TypeInner::Matrix { stride, .. } => (stride, d.ty),
                        TypeInner::Vector { scalar, .. } => (memory_width(scalar), d.ty),
                        ref other => panic!("deref {step:?} indexes into non-indexable {other:?}"),
                    };
                    match func.as_uint(index) {
                        Some(i) => {
                            let step = i.wrapping_mul(u64::from(stride)) as u32;
                            chain.constant = chain.constant.wrapping_add(step);
                        }
                        None => {
                            chain.dynamic.push((index, stride));
                            if stride != 0 {
                                chain.stride_align = chain.stride_align.min(1 << stride.trailing_zeros());
                            }
                        }
                    }
                    ty = element;
                }
                (kind, inner) => panic!("deref step {kind:?} does not match type {inner:?}"),
            }
        }
        chain
    }

    fn is_constant(&self) -> bool {
        self.dynamic.is_empty()
    }

    /// Emits `base + constant + sum(index * stride)` as a 32-bit value.
    fn emit(&self, b: &mut Builder<'_>, base: u32) -> Value {
        let mut offset = b.const_u32(base.wrapping_add(self.constant));
        for &(index, stride) in &self.dynamic {
            let index = b.u2u(index, 32);
            let scaled = b.imul_imm(index, u64::from(stride));
            offset = b.iadd(offset, scaled);
        }
        offset
    }

    /// Alignment of `root + chain` given the root's own alignment.
    fn alignment(&self, root_offset: u32, root_align: u32) -> Alignment {
        let mul = root_align.max(1).min(self.stride_align);
        Alignment::new(mul, root_offset.wrapping_add(self.constant) % mul)
    }
}

/// The memory operation a deref intrinsic performs.
#[derive(Clone, Copy, Debug)]
enum Access {
    Load(Def),
    Store {
        value: Value,
        write_mask: u8,
    },
    Atomic {
        op: AtomicOp,
        data: Value,
        compare: Option<Value>,
        def: Option<Def>,
    },
}

impl Access {
    fn def(self) -> Option<Def> {
        match self {
            Self::Load(def) => Some(def),
            Self::Store { .. } => None,
            Self::Atomic { def, .. } => def,
        }
    }
}

/// Everything about the accessed variable the rewrite needs.
struct Place {
    mode: Mode,
    name: String,
    binding: Option<DescriptorBinding>,
    explicit: Option<ExplicitLayout>,
    /// Size of the variable, `u32::MAX` if it ends in a runtime-sized array.
    size: u32,
    chain: ChainOffset,
}

impl Place {
    fn binding(&self) -> DescriptorBinding {
        self.binding
            .unwrap_or_else(|| panic!("{} variable `{}` has no descriptor binding", self.mode, self.name))
    }

    fn explicit(&self) -> ExplicitLayout {
        self.explicit.unwrap_or_else(|| {
            panic!(
                "{} variable `{}` is accessed before it was given an explicit layout",
                self.mode, self.name
            )
        })
    }

    /// `(range_base, range)` of a read of `def`.
    fn range(&self, def: Def) -> (u32, u32) {
        if self.chain.is_constant() {
            (self.chain.constant, def.byte_size())
        } else {
            (0, self.size)
        }
    }

    fn read_only(&self) -> ! {
        panic!("store to read-only {} variable `{}`", self.mode, self.name)
    }
}

fn is_runtime_sized(types: &UniqueArena<Type>, ty: Handle<Type>) -> bool {
    match types[ty].inner {
        TypeInner::Array {
            size: ArraySize::Dynamic,
            ..
        } => true,
        TypeInner::Struct { ref members, .. } => members
            .last()
            .is_some_and(|m| is_runtime_sized(types, m.ty)),
        _ => false,
    }
}

/// Lowers deref loads, stores and atomics of the classes in `modes` to the
/// intrinsics of their configured address formats.
///
/// # Panics
///
/// Panics on a store to a read-only class, on an Offset32 access to a
/// variable without an explicit layout, on a descriptor-backed variable
/// without a binding, and on format/class combinations with no lowering.
pub fn lower_explicit_io(shader: &mut Shader, modes: ModeSet, formats: &AddressFormats) -> LoweringResult {
    let progress = run_intrinsics_pass(
        shader,
        &[IntrinsicOp::LoadDeref, IntrinsicOp::StoreDeref, IntrinsicOp::DerefAtomic],
        Metadata::ALL,
        |ctx| lower_access(ctx, modes, formats),
    );
    LoweringResult::progress(progress)
}

fn lower_access(ctx: &mut InstrCtx<'_>, modes: ModeSet, formats: &AddressFormats) -> bool {
    let (deref, access) = match *ctx.kind() {
        InstrKind::Intrinsic(Intrinsic::LoadDeref { deref }) => {
            (deref, Access::Load(ctx.func.def_of(ctx.instr)))
        }
        InstrKind::Intrinsic(Intrinsic::StoreDeref {
            deref,
            value,
            write_mask,
        }) => (deref, Access::Store { value, write_mask }),
        InstrKind::Intrinsic(Intrinsic::DerefAtomic {
            deref,
            op,
            data,
            compare,
        }) => (
            deref,
            Access::Atomic {
                op,
                data,
                compare,
                def: ctx.def(),
            },
        ),
        _ => return false,
    };
    let Some(mode) = ctx.func.kind(deref).as_deref().map(|d| d.mode) else {
        return false;
    };
    let format = formats.for_mode(mode);
    if !modes.contains(mode) || format == AddressFormat::Logical {
        return false;
    }

    let var = ctx.func.deref_root(deref);
    let place = {
        let types = &ctx.shader.types;
        let variable = &ctx.shader.variables[var];
        let inner = &types[variable.ty].inner;
        Place {
            mode,
            name: variable.name.clone().unwrap_or_default(),
            binding: variable.data.binding,
            explicit: variable.data.explicit,
            size: if is_runtime_sized(types, variable.ty) {
                u32::MAX
            } else {
                inner.explicit_size(types)
            },
            chain: ChainOffset::compute(types, variable.ty, ctx.func, deref),
        }
    };

    let mut b = ctx.before();
    let lowered = match (mode, format) {
        (Mode::Ubo | Mode::Ssbo, AddressFormat::IndexOffset32) => lower_index_offset(&mut b, &place, access),
        (Mode::Ubo | Mode::Ssbo | Mode::Global, AddressFormat::Global64) => lower_global(&mut b, &place, access),
        (Mode::Shared | Mode::FunctionTemp | Mode::ShaderTemp, AddressFormat::Offset32) => {
            lower_offset(&mut b, &place, access)
        }
        (Mode::PushConstant | Mode::Constant | Mode::Uniform, AddressFormat::Offset32) => {
            lower_ranged(&mut b, &place, access)
        }
        (mode, format) => panic!("{mode} memory cannot be addressed as {format:?}"),
    };

    if access.def().is_some() {
        ctx.replace_with(lowered);
    } else {
        ctx.remove();
    }
    true
}

fn lower_index_offset(b: &mut Builder<'_>, place: &Place, access: Access) -> Value {
    let zero = b.const_u32(0);
    let (resource, base) = descriptor_address(b, place.binding(), zero, place.mode);
    let chain = place.chain.emit(b, 0);
    let offset = b.iadd(base, chain);
    let align = place.chain.alignment(0, BUFFER_ALIGN);
    let intrinsic = match (place.mode, access) {
        (Mode::Ubo, Access::Load(def)) => {
            let (range_base, range) = place.range(def);
            Intrinsic::LoadUbo {
                resource,
                offset,
                align,
                range_base,
                range,
            }
        }
        (Mode::Ubo, _) => place.read_only(),
        (_, Access::Load(_)) => Intrinsic::LoadSsbo {
            resource,
            offset,
            align,
        },
        (_, Access::Store { value, write_mask }) => Intrinsic::StoreSsbo {
            resource,
            offset,
            value,
            write_mask,
            align,
        },
        (_, Access::Atomic {
            op, data, compare, ..
        }) => Intrinsic::SsboAtomic {
            resource,
            offset,
            op,
            data,
            compare,
        },
    };
    b.intrinsic(intrinsic, access.def())
}

fn lower_global(b: &mut Builder<'_>, place: &Place, access: Access) -> Value {
    if place.mode == Mode::Ubo && !matches!(access, Access::Load(_)) {
        place.read_only();
    }
    let (base, root_offset, root_align) = match place.mode {
        Mode::Global => {
            let layout = place.explicit();
            (b.const_uint(0, 64), layout.offset, layout.align)
        }
        mode => {
            let zero = b.const_u32(0);
            (descriptor_pointer(b, place.binding(), zero, mode), 0, BUFFER_ALIGN)
        }
    };
    let chain = place.chain.emit(b, root_offset);
    let chain = b.u2u(chain, 64);
    let address = b.iadd(base, chain);
    let align = place.chain.alignment(root_offset, root_align);
    let intrinsic = match access {
        Access::Load(_) => Intrinsic::LoadGlobal { address, align },
        Access::Store { value, write_mask } => Intrinsic::StoreGlobal {
            address,
            value,
            write_mask,
            align,
        },
        Access::Atomic {
            op, data, compare, ..
        } => Intrinsic::GlobalAtomic {
            address,
            op,
            data,
            compare,
        },
    };
    b.intrinsic(intrinsic, access.def())
}

fn lower_offset(b: &mut Builder<'_>, place: &Place, access: Access) -> Value {
    let layout = place.explicit();
    let offset = place.chain.emit(b, layout.offset);
    let align = place.chain.alignment(layout.offset, layout.align);
    let shared = place.mode == Mode::Shared;
    let intrinsic = match access {
        Access::Load(_) if shared => Intrinsic::LoadShared { offset, align },
        Access::Load(_) => Intrinsic::LoadScratch { offset, align },
        Access::Store { value, write_mask } if shared => Intrinsic::StoreShared {
            offset,
            value,
            write_mask,
            align,
        },
        Access::Store { value, write_mask } => Intrinsic::StoreScratch {
            offset,
            value,
            write_mask,
            align,
        },
        Access::Atomic {
            op, data, compare, ..
        } if shared => Intrinsic::SharedAtomic {
            offset,
            op,
            data,
            compare,
        },
        Access::Atomic { .. } => {
            panic!("atomic on {} variable `{}`", place.mode, place.name)
        }
    };
    b.intrinsic(intrinsic, access.def())
}

/// Push constants, constant data and loose uniforms: reads carry the range
/// they may touch so the backend can place them.
fn lower_ranged(b: &mut Builder<'_>, place: &Place, access: Access) -> Value {
    let Access::Load(def) = access else {
        place.read_only();
    };
    let (root_offset, root_align) = match (place.mode, place.explicit) {
        (_, Some(layout)) => (layout.offset, layout.align),
        (Mode::PushConstant, None) => (0, 4),
        _ => (place.explicit().offset, 4),
    };
    let align = place.chain.alignment(root_offset, root_align);
    let (offset, base, range) = if place.chain.is_constant() {
        let zero = b.const_u32(0);
        (zero, root_offset.wrapping_add(place.chain.constant), def.byte_size())
    } else {
        (place.chain.emit(b, 0), root_offset, place.size)
    };
    let intrinsic = match place.mode {
        Mode::PushConstant => Intrinsic::LoadPushConstant {
            offset,
            base,
            range,
            align,
        },
        Mode::Constant => Intrinsic::LoadConstant {
            offset,
            base,
            range,
            align,
        },
        _ => Intrinsic::LoadUniform {
            offset,
            base,
            range,
            align,
        },
    };
    b.intrinsic(intrinsic, Some(def))
}
