//! Type system for the Spinel IR.

use crate::arena::{Handle, UniqueArena};
use crate::instr::Def;

/// Width of a scalar type in bytes.
pub type Bytes = u8;

/// The kind of a scalar type.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum ScalarKind {
    /// Boolean. Stored as a 1-bit SSA value, occupies 4 bytes in memory.
    Bool,
    /// Signed integer.
    Sint,
    /// Unsigned integer.
    Uint,
    /// Floating point.
    Float,
}

/// A scalar type: kind + byte width.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Scalar {
    pub kind: ScalarKind,
    pub width: Bytes,
}

impl Scalar {
    pub const BOOL: Self = Self {
        kind: ScalarKind::Bool,
        width: 1,
    };
    pub const I32: Self = Self {
        kind: ScalarKind::Sint,
        width: 4,
    };
    pub const U32: Self = Self {
        kind: ScalarKind::Uint,
        width: 4,
    };
    pub const I64: Self = Self {
        kind: ScalarKind::Sint,
        width: 8,
    };
    pub const U64: Self = Self {
        kind: ScalarKind::Uint,
        width: 8,
    };
    pub const F16: Self = Self {
        kind: ScalarKind::Float,
        width: 2,
    };
    pub const F32: Self = Self {
        kind: ScalarKind::Float,
        width: 4,
    };
    pub const F64: Self = Self {
        kind: ScalarKind::Float,
        width: 8,
    };

    /// Bit size of an SSA value holding this scalar.
    pub fn bit_size(self) -> u8 {
        match self.kind {
            ScalarKind::Bool => 1,
            _ => self.width * 8,
        }
    }
}

/// Number of components in a vector.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum VectorSize {
    /// 2 components.
    Bi = 2,
    /// 3 components.
    Tri = 3,
    /// 4 components.
    Quad = 4,
}

impl VectorSize {
    pub fn from_components(n: u8) -> Option<Self> {
        match n {
            2 => Some(Self::Bi),
            3 => Some(Self::Tri),
            4 => Some(Self::Quad),
            _ => None,
        }
    }
}

/// Size of an array.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum ArraySize {
    /// Fixed-size array.
    Constant(u32),
    /// Runtime-sized array.
    Dynamic,
}

/// A member of a struct type.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct StructMember {
    pub name: Option<String>,
    pub ty: Handle<Type>,
    pub offset: u32,
}

/// A named type.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct Type {
    pub name: Option<String>,
    pub inner: TypeInner,
}

impl Type {
    pub fn anonymous(inner: TypeInner) -> Self {
        Self { name: None, inner }
    }
}

/// The concrete shape of a type.
///
/// Array strides and struct member offsets are only meaningful once the type
/// carries an explicit layout. Types of interface blocks arrive with one from
/// the frontend; types of shared and function-temp variables get one from
/// layout assignment.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub enum TypeInner {
    /// A single scalar value.
    Scalar(Scalar),
    /// A vector of scalars.
    Vector { size: VectorSize, scalar: Scalar },
    /// A matrix of column vectors. `stride` is the byte distance between columns.
    Matrix {
        columns: VectorSize,
        rows: VectorSize,
        scalar: Scalar,
        stride: u32,
    },
    /// An atomic scalar.
    Atomic(Scalar),
    /// A fixed-size or runtime-sized array.
    Array {
        base: Handle<Type>,
        size: ArraySize,
        stride: u32,
    },
    /// A composite struct type.
    Struct {
        members: Vec<StructMember>,
        span: u32,
    },
}

impl TypeInner {
    /// Shape of an SSA value loaded from a location of this type, if it fits
    /// in a single value.
    pub fn value_def(&self) -> Option<Def> {
        match *self {
            Self::Scalar(scalar) | Self::Atomic(scalar) => Some(Def::new(1, scalar.bit_size())),
            Self::Vector { size, scalar } => Some(Def::new(size as u8, scalar.bit_size())),
            _ => None,
        }
    }

    /// Scalar component type of a scalar, vector, matrix or atomic.
    pub fn scalar(&self) -> Option<Scalar> {
        match *self {
            Self::Scalar(scalar) | Self::Atomic(scalar) => Some(scalar),
            Self::Vector { scalar, .. } | Self::Matrix { scalar, .. } => Some(scalar),
            _ => None,
        }
    }

    /// Returns `true` for scalars, vectors and atomics.
    pub fn is_leaf_value(&self) -> bool {
        self.value_def().is_some()
    }

    /// Size in bytes according to the explicit layout this type carries.
    ///
    /// Runtime-sized arrays contribute no size.
    pub fn explicit_size(&self, types: &UniqueArena<Type>) -> u32 {
        match *self {
            Self::Scalar(scalar) | Self::Atomic(scalar) => memory_width(scalar),
            Self::Vector { size, scalar } => size as u32 * memory_width(scalar),
            Self::Matrix {
                columns, stride, ..
            } => columns as u32 * stride,
            Self::Array {
                size: ArraySize::Constant(n),
                stride,
                ..
            } => n * stride,
            Self::Array {
                size: ArraySize::Dynamic,
                ..
            } => 0,
            Self::Struct { span, ref members } => {
                let end = members
                    .last()
                    .map(|m| m.offset + types[m.ty].inner.explicit_size(types))
                    .unwrap_or(0);
                span.max(end)
            }
        }
    }

    /// Number of interface slots a variable of this type occupies.
    pub fn slot_count(&self, types: &UniqueArena<Type>) -> u32 {
        match *self {
            Self::Matrix { columns, .. } => columns as u32,
            Self::Array {
                base,
                size: ArraySize::Constant(n),
                ..
            } => n * types[base].inner.slot_count(types),
            Self::Array { .. } => 1,
            Self::Struct { ref members, .. } => members
                .iter()
                .map(|m| types[m.ty].inner.slot_count(types))
                .sum(),
            _ => 1,
        }
    }
}

/// Bytes a scalar occupies in memory. Booleans are stored as 32-bit values.
pub fn memory_width(scalar: Scalar) -> u32 {
    match scalar.kind {
        ScalarKind::Bool => 4,
        _ => u32::from(scalar.width),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scalar(types: &mut UniqueArena<Type>, s: Scalar) -> Handle<Type> {
        types.insert(Type::anonymous(TypeInner::Scalar(s)))
    }

    #[test]
    fn scalar_constants() {
        assert_eq!(Scalar::F32.kind, ScalarKind::Float);
        assert_eq!(Scalar::F32.width, 4);
        assert_eq!(Scalar::BOOL.bit_size(), 1);
        assert_eq!(Scalar::U64.bit_size(), 64);
        assert_eq!(memory_width(Scalar::BOOL), 4);
    }

    #[test]
    fn type_dedup() {
        let mut types = UniqueArena::new();
        let t0 = scalar(&mut types, Scalar::F32);
        let t1 = scalar(&mut types, Scalar::F32);
        let t2 = scalar(&mut types, Scalar::I32);
        assert_eq!(t0, t1);
        assert_ne!(t0, t2);
        assert_eq!(types.len(), 2);
    }

    #[test]
    fn value_def_of_leaves() {
        let vec3 = TypeInner::Vector {
            size: VectorSize::Tri,
            scalar: Scalar::F32,
        };
        assert_eq!(vec3.value_def(), Some(Def::new(3, 32)));
        assert_eq!(
            TypeInner::Scalar(Scalar::BOOL).value_def(),
            Some(Def::new(1, 1))
        );
        let mat = TypeInner::Matrix {
            columns: VectorSize::Quad,
            rows: VectorSize::Quad,
            scalar: Scalar::F32,
            stride: 16,
        };
        assert_eq!(mat.value_def(), None);
        assert_eq!(mat.scalar(), Some(Scalar::F32));
    }

    #[test]
    fn explicit_size_of_struct_and_array() {
        let mut types = UniqueArena::new();
        let f32_ty = scalar(&mut types, Scalar::F32);
        let arr = types.insert(Type::anonymous(TypeInner::Array {
            base: f32_ty,
            size: ArraySize::Constant(4),
            stride: 16,
        }));
        assert_eq!(types[arr].inner.explicit_size(&types), 64);

        let st = TypeInner::Struct {
            members: vec![
                StructMember {
                    name: None,
                    ty: f32_ty,
                    offset: 0,
                },
                StructMember {
                    name: None,
                    ty: arr,
                    offset: 16,
                },
            ],
            span: 80,
        };
        assert_eq!(st.explicit_size(&types), 80);
    }

    #[test]
    fn slot_count_of_arrays_and_matrices() {
        let mut types = UniqueArena::new();
        let vec4 = types.insert(Type::anonymous(TypeInner::Vector {
            size: VectorSize::Quad,
            scalar: Scalar::F32,
        }));
        let arr = TypeInner::Array {
            base: vec4,
            size: ArraySize::Constant(3),
            stride: 16,
        };
        assert_eq!(arr.slot_count(&types), 3);
        let mat = TypeInner::Matrix {
            columns: VectorSize::Bi,
            rows: VectorSize::Quad,
            scalar: Scalar::F32,
            stride: 16,
        };
        assert_eq!(mat.slot_count(&types), 2);
    }

    #[test]
    fn vector_size_from_components() {
        assert_eq!(VectorSize::from_components(3), Some(VectorSize::Tri));
        assert_eq!(VectorSize::from_components(1), None);
        assert_eq!(VectorSize::Quad as u32, 4);
    }
}
