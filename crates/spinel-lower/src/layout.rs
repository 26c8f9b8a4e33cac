//! Explicit variable layout.
//!
//! Memory classes without a host-visible layout (shared memory, scratch,
//! constant data, loose uniforms) get byte offsets here. A [`SizeAlign`]
//! policy decides the size and alignment of leaf types; arrays, matrices and
//! structs are laid out by one generic walk on top of it.

use spinel_ir::{
    ArraySize, Constant, DerefKind, ExplicitLayout, Handle, InstrKind, Mode, ModeSet, Scalar,
    Shader, StructMember, Type, TypeInner, UniqueArena, Value, Variable, VectorSize, memory_width,
};

use crate::align_up;

/// Size and alignment of leaf types.
pub trait SizeAlign {
    /// `(size, align)` in bytes of a scalar, vector or atomic.
    fn scalar_size_align(&self, inner: &TypeInner) -> (u32, u32);
}

/// Every value is aligned to its component size.
#[derive(Clone, Copy, Debug, Default)]
pub struct ScalarLayout;

/// Vectors are aligned to their own size, with vec3 aligned as vec4.
#[derive(Clone, Copy, Debug, Default)]
pub struct NaturalLayout;

fn leaf(inner: &TypeInner) -> (u32, u32) {
    match *inner {
        TypeInner::Scalar(scalar) | TypeInner::Atomic(scalar) => (1, memory_width(scalar)),
        TypeInner::Vector { size, scalar } => (size as u32, memory_width(scalar)),
        ref other => panic!("{other:?} is not a leaf type"),
    }
}

impl SizeAlign for ScalarLayout {
    fn scalar_size_align(&self, inner: &TypeInner) -> (u32, u32) {
        let (components, width) = leaf(inner);
        (components * width, width)
    }
}

impl SizeAlign for NaturalLayout {
    fn scalar_size_align(&self, inner: &TypeInner) -> (u32, u32) {
        let (components, width) = leaf(inner);
        let align = match components {
            1 => width,
            2 => 2 * width,
            _ => 4 * width,
        };
        (components * width, align)
    }
}

/// Rebuilds `ty` with explicit strides and member offsets computed by
/// `policy`. Returns the new type with its size and alignment.
///
/// Runtime-sized arrays contribute no size.
pub fn explicit_type_layout(
    types: &mut UniqueArena<Type>,
    ty: Handle<Type>,
    policy: &dyn SizeAlign,
) -> (Handle<Type>, u32, u32) {
    let Type { name, inner } = types[ty].clone();
    match inner {
        TypeInner::Scalar(_) | TypeInner::Vector { .. } | TypeInner::Atomic(_) => {
            let (size, align) = policy.scalar_size_align(&inner);
            (ty, size, align)
        }
        TypeInner::Matrix {
            columns,
            rows,
            scalar,
            ..
        } => {
            let (column_size, align) =
                policy.scalar_size_align(&TypeInner::Vector { size: rows, scalar });
            let stride = align_up(column_size, align);
            let inner = TypeInner::Matrix {
                columns,
                rows,
                scalar,
                stride,
            };
            (types.insert(Type { name, inner }), columns as u32 * stride, align)
        }
        TypeInner::Array { base, size, .. } => {
            let (base, element_size, align) = explicit_type_layout(types, base, policy);
            let stride = align_up(element_size, align);
            let count = match size {
                ArraySize::Constant(n) => n,
                ArraySize::Dynamic => 0,
            };
            let inner = TypeInner::Array { base, size, stride };
            (types.insert(Type { name, inner }), count * stride, align)
        }
        TypeInner::Struct { members, .. } => {
            let mut offset = 0;
            let mut struct_align = 1;
            let mut laid_out = Vec::with_capacity(members.len());
            for member in members {
                let (ty, size, align) = explicit_type_layout(types, member.ty, policy);
                offset = align_up(offset, align);
                laid_out.push(StructMember {
                    name: member.name,
                    ty,
                    offset,
                });
                offset += size;
                struct_align = struct_align.max(align);
            }
            let span = align_up(offset, struct_align);
            let inner = TypeInner::Struct {
                members: laid_out,
                span,
            };
            (types.insert(Type { name, inner }), span, struct_align)
        }
    }
}

/// End of the furthest explicit layout among the variables of `mode`.
fn explicit_end(shader: &Shader, mode: Mode) -> u32 {
    shader
        .variables
        .iter()
        .filter(|(_, v)| v.mode == mode)
        .filter_map(|(_, v)| v.data.explicit)
        .map(|e| e.offset.saturating_add(e.size))
        .max()
        .unwrap_or(0)
}

/// Gives every variable of `modes` without an explicit layout one, placed
/// after what the class already holds.
///
/// Shared, scratch, constant and uniform memory continue from
/// `shared_size`, `scratch_size`, `constant_data_size` and `num_uniforms`,
/// which are bumped past each new variable; other classes continue after the
/// furthest explicit layout already placed in them.
/// Constant initializers are written into `shader.constant_data`. Returns
/// `true` if any variable was laid out.
pub fn assign_explicit_layout(shader: &mut Shader, modes: ModeSet, policy: &dyn SizeAlign) -> bool {
    let mut progress = false;

    for var in shader.variables.handles() {
        let Variable { mode, ty, data, .. } = &shader.variables[var];
        if !modes.contains(*mode) || data.explicit.is_some() {
            continue;
        }
        let (mode, ty) = (*mode, *ty);
        let (ty, size, align) = explicit_type_layout(&mut shader.types, ty, policy);

        let mut placed = explicit_end(shader, mode);
        let cursor = match mode {
            Mode::Shared => &mut shader.info.shared_size,
            Mode::FunctionTemp | Mode::ShaderTemp => &mut shader.info.scratch_size,
            Mode::Constant => &mut shader.info.constant_data_size,
            Mode::Uniform => &mut shader.info.num_uniforms,
            _ => &mut placed,
        };
        let offset = align_up(*cursor, align);
        *cursor = offset + size;

        let variable = &mut shader.variables[var];
        variable.ty = ty;
        variable.data.explicit = Some(ExplicitLayout {
            offset,
            size,
            align,
        });
        variable.data.driver_location = offset;
        log::debug!(
            "{mode} variable `{}` placed at {offset} ({size} bytes, align {align})",
            variable.name.as_deref().unwrap_or("<unnamed>")
        );

        if mode == Mode::Constant
            && let Some(init) = variable.init.clone()
        {
            let end = (offset + size) as usize;
            if shader.constant_data.len() < end {
                shader.constant_data.resize(end, 0);
            }
            write_constant(
                &shader.types,
                ty,
                &init,
                &mut shader.constant_data[offset as usize..end],
            );
        }

        retype_derefs(shader, var);
        progress = true;
    }

    let constant_size = shader.info.constant_data_size as usize;
    if shader.constant_data.len() < constant_size {
        shader.constant_data.resize(constant_size, 0);
    }
    progress
}

/// Points every deref rooted at `var` at the variable's current type tree.
fn retype_derefs(shader: &mut Shader, var: Handle<Variable>) {
    let root_ty = shader.variables[var].ty;
    let types = &shader.types;
    for (_, func) in shader.functions.iter_mut() {
        let derefs: Vec<Value> = func
            .instrs
            .iter()
            .filter(|(_, i)| matches!(i.kind, InstrKind::Deref(_)))
            .map(|(v, _)| v)
            .collect();
        for deref in derefs {
            if func.deref_root(deref) != var {
                continue;
            }
            let mut ty = root_ty;
            for &step in &func.deref_path(deref)[1..] {
                let Some(d) = func.kind(step).as_deref() else {
                    break;
                };
                ty = match (&d.kind, &types[ty].inner) {
                    (&DerefKind::Struct { member, .. }, TypeInner::Struct { members, .. }) => {
                        members[member as usize].ty
                    }
                    (DerefKind::Array { .. }, TypeInner::Array { base, .. }) => *base,
                    // matrix columns and vector components are leaves
                    _ => d.ty,
                };
            }
            if let InstrKind::Deref(d) = &mut func.instrs[deref].kind {
                d.ty = ty;
            }
        }
    }
}

/// Serializes `value` little-endian into `out`, which covers one `ty`.
fn write_constant(types: &UniqueArena<Type>, ty: Handle<Type>, value: &Constant, out: &mut [u8]) {
    match (value, &types[ty].inner) {
        (Constant::Zero, _) => {}
        (&Constant::Scalar(bits), TypeInner::Scalar(scalar) | TypeInner::Atomic(scalar)) => {
            write_scalar(*scalar, bits, out);
        }
        (Constant::Composite(parts), &TypeInner::Vector { scalar, .. }) => {
            write_components(scalar, memory_width(scalar), parts, out);
        }
        (
            Constant::Composite(columns),
            &TypeInner::Matrix {
                rows,
                scalar,
                stride,
                ..
            },
        ) => {
            for (i, column) in columns.iter().enumerate() {
                let start = i * stride as usize;
                let column_out = &mut out[start..start + column_bytes(rows, scalar)];
                match column {
                    Constant::Composite(parts) => {
                        write_components(scalar, memory_width(scalar), parts, column_out)
                    }
                    Constant::Zero => {}
                    Constant::Scalar(_) => panic!("matrix column initialized with a scalar"),
                }
            }
        }
        (Constant::Composite(elements), &TypeInner::Array { base, stride, .. }) => {
            let size = types[base].inner.explicit_size(types) as usize;
            for (i, element) in elements.iter().enumerate() {
                let start = i * stride as usize;
                write_constant(types, base, element, &mut out[start..start + size]);
            }
        }
        (Constant::Composite(fields), TypeInner::Struct { members, .. }) => {
            for (field, member) in fields.iter().zip(members) {
                let start = member.offset as usize;
                let size = types[member.ty].inner.explicit_size(types) as usize;
                write_constant(types, member.ty, field, &mut out[start..start + size]);
            }
        }
        (value, inner) => panic!("initializer {value:?} does not fit {inner:?}"),
    }
}

fn column_bytes(rows: VectorSize, scalar: Scalar) -> usize {
    rows as usize * memory_width(scalar) as usize
}

fn write_components(scalar: Scalar, width: u32, parts: &[Constant], out: &mut [u8]) {
    let width = width as usize;
    for (i, part) in parts.iter().enumerate() {
        let bits = match *part {
            Constant::Scalar(bits) => bits,
            Constant::Zero => 0,
            Constant::Composite(_) => panic!("vector component initialized with a composite"),
        };
        write_scalar(scalar, bits, &mut out[i * width..(i + 1) * width]);
    }
}

fn write_scalar(scalar: Scalar, bits: u64, out: &mut [u8]) {
    let width = memory_width(scalar) as usize;
    out[..width].copy_from_slice(&bits.to_le_bytes()[..width]);
}
