//! The closed set of shader types and structural operations on it.

use std::fmt;

use crate::index::{AliasIndex, FunctionIndex, StructIndex};

/// A scalar type of the source language.
///
/// `String` exists at compile time only (module metadata, attribute
/// parameters) and never reaches a target.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum PrimitiveType {
    Boolean,
    Float32,
    Int32,
    UInt32,
    String,
}

impl PrimitiveType {
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Float32 | Self::Int32 | Self::UInt32)
    }

    pub fn is_integer(self) -> bool {
        matches!(self, Self::Int32 | Self::UInt32)
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Boolean => "bool",
            Self::Float32 => "f32",
            Self::Int32 => "i32",
            Self::UInt32 => "u32",
            Self::String => "str",
        })
    }
}

/// Image dimensionality of a sampler.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum ImageDim {
    Dim1D,
    Dim1DArray,
    Dim2D,
    Dim2DArray,
    Dim3D,
    Cubemap,
}

impl ImageDim {
    /// Number of coordinate components needed to sample this dimensionality.
    pub fn coordinate_components(self) -> u32 {
        match self {
            Self::Dim1D => 1,
            Self::Dim1DArray | Self::Dim2D => 2,
            Self::Dim2DArray | Self::Dim3D | Self::Cubemap => 3,
        }
    }

    /// The surface-syntax sampler name for this dimensionality.
    pub fn sampler_name(self) -> &'static str {
        match self {
            Self::Dim1D => "sampler1D",
            Self::Dim1DArray => "sampler1DArray",
            Self::Dim2D => "sampler2D",
            Self::Dim2DArray => "sampler2DArray",
            Self::Dim3D => "sampler3D",
            Self::Cubemap => "samplerCube",
        }
    }
}

/// A fully-described shader type.
///
/// After sanitization every type reachable from an expression is one of the
/// concrete variants; `Alias` only survives inside alias declarations, and
/// the `Function`/`Method`/`IntrinsicFunction`/`Type` variants exist solely
/// while names are being resolved.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub enum ExpressionType {
    Primitive(PrimitiveType),
    Vector {
        prim: PrimitiveType,
        components: u32,
    },
    Matrix {
        prim: PrimitiveType,
        columns: u32,
        rows: u32,
    },
    Sampler {
        sampled: PrimitiveType,
        dim: ImageDim,
    },
    Array {
        element: Box<ExpressionType>,
        /// `None` only in the implicit-inference position of a declaration
        /// initialized by an array literal.
        length: Option<u32>,
    },
    Struct(StructIndex),
    /// A layout-decorated struct used as a uniform buffer.
    Uniform(StructIndex),
    Alias(AliasIndex),
    Function(FunctionIndex),
    Method {
        object: Box<ExpressionType>,
        method: u32,
    },
    IntrinsicFunction,
    /// A type used as a value (e.g. a constructor callee).
    Type(Box<ExpressionType>),
    /// The absence of a value.
    NoType,
}

impl ExpressionType {
    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array { .. })
    }

    pub fn is_struct(&self) -> bool {
        matches!(self, Self::Struct(_))
    }

    pub fn is_uniform(&self) -> bool {
        matches!(self, Self::Uniform(_))
    }

    pub fn is_sampler(&self) -> bool {
        matches!(self, Self::Sampler { .. })
    }

    pub fn is_alias(&self) -> bool {
        matches!(self, Self::Alias(_))
    }

    pub fn is_no_type(&self) -> bool {
        matches!(self, Self::NoType)
    }

    /// The scalar kind of a primitive or vector type.
    pub fn component_primitive(&self) -> Option<PrimitiveType> {
        match self {
            Self::Primitive(p) => Some(*p),
            Self::Vector { prim, .. } => Some(*prim),
            _ => None,
        }
    }

    /// Component count: 1 for primitives, N for vectors.
    pub fn component_count(&self) -> Option<u32> {
        match self {
            Self::Primitive(_) => Some(1),
            Self::Vector { components, .. } => Some(*components),
            _ => None,
        }
    }
}

impl fmt::Display for ExpressionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Primitive(p) => write!(f, "{p}"),
            Self::Vector { prim, components } => write!(f, "vec{components}[{prim}]"),
            Self::Matrix {
                prim,
                columns,
                rows,
            } => {
                if columns == rows {
                    write!(f, "mat{columns}[{prim}]")
                } else {
                    write!(f, "mat{columns}x{rows}[{prim}]")
                }
            }
            Self::Sampler { sampled, dim } => write!(f, "{}[{sampled}]", dim.sampler_name()),
            Self::Array { element, length } => match length {
                Some(len) => write!(f, "array[{element}, {len}]"),
                None => write!(f, "array[{element}]"),
            },
            Self::Struct(index) => write!(f, "struct#{index}"),
            Self::Uniform(index) => write!(f, "uniform[struct#{index}]"),
            Self::Alias(index) => write!(f, "alias#{index}"),
            Self::Function(index) => write!(f, "fn#{index}"),
            Self::Method { object, .. } => write!(f, "method of {object}"),
            Self::IntrinsicFunction => f.write_str("intrinsic"),
            Self::Type(inner) => write!(f, "type[{inner}]"),
            Self::NoType => f.write_str("()"),
        }
    }
}

/// Resolves an alias chain to a non-alias type.
///
/// `lookup` maps an alias index to its target type; the sanitizer guarantees
/// aliases only reference earlier declarations, so chains always terminate.
/// An unknown index (partial sanitization) stops the walk.
pub fn resolve_alias<'a>(
    mut ty: &'a ExpressionType,
    lookup: &dyn Fn(AliasIndex) -> Option<&'a ExpressionType>,
) -> &'a ExpressionType {
    while let ExpressionType::Alias(index) = ty {
        match lookup(*index) {
            Some(target) => ty = target,
            None => break,
        }
    }
    ty
}

/// Std140 alignment and size of one type, in bytes.
///
/// `struct_layout` yields the already-computed layout of a nested struct.
pub fn std140_layout(
    ty: &ExpressionType,
    struct_layout: &dyn Fn(StructIndex) -> Std140Struct,
) -> Std140Field {
    match ty {
        ExpressionType::Primitive(_) => Std140Field { align: 4, size: 4 },
        ExpressionType::Vector { components, .. } => match components {
            2 => Std140Field { align: 8, size: 8 },
            // vec3 aligns like vec4
            3 => Std140Field {
                align: 16,
                size: 12,
            },
            _ => Std140Field {
                align: 16,
                size: 16,
            },
        },
        // a matrix lays out as an array of its column vectors, 16-byte stride
        ExpressionType::Matrix { columns, .. } => Std140Field {
            align: 16,
            size: 16 * columns,
        },
        ExpressionType::Array { element, length } => {
            let elem = std140_layout(element, struct_layout);
            let stride = round_up(elem.size.max(elem.align), 16);
            Std140Field {
                align: 16,
                size: stride * length.unwrap_or(0),
            }
        }
        ExpressionType::Struct(index) | ExpressionType::Uniform(index) => {
            let inner = struct_layout(*index);
            Std140Field {
                align: 16,
                size: round_up(inner.size, 16),
            }
        }
        _ => Std140Field { align: 4, size: 0 },
    }
}

/// Computes std140 member offsets for a struct from its member types.
pub fn std140_struct(
    members: &[ExpressionType],
    struct_layout: &dyn Fn(StructIndex) -> Std140Struct,
) -> Std140Struct {
    let mut offsets = Vec::with_capacity(members.len());
    let mut offset = 0u32;
    let mut align = 16u32;
    for member in members {
        let field = std140_layout(member, struct_layout);
        offset = round_up(offset, field.align);
        offsets.push(offset);
        offset += field.size;
        align = align.max(field.align);
    }
    Std140Struct {
        offsets,
        size: offset,
        align,
    }
}

/// Alignment and size of one std140 field.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Std140Field {
    pub align: u32,
    pub size: u32,
}

/// Offsets and total extent of a std140 struct.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Std140Struct {
    pub offsets: Vec<u32>,
    pub size: u32,
    pub align: u32,
}

fn round_up(value: u32, align: u32) -> u32 {
    value.div_ceil(align) * align
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_structs(_: StructIndex) -> Std140Struct {
        panic!("no nested structs in this test")
    }

    #[test]
    fn display_forms() {
        assert_eq!(
            ExpressionType::Primitive(PrimitiveType::Float32).to_string(),
            "f32"
        );
        assert_eq!(
            ExpressionType::Vector {
                prim: PrimitiveType::Float32,
                components: 3
            }
            .to_string(),
            "vec3[f32]"
        );
        assert_eq!(
            ExpressionType::Matrix {
                prim: PrimitiveType::Float32,
                columns: 4,
                rows: 4
            }
            .to_string(),
            "mat4[f32]"
        );
        assert_eq!(
            ExpressionType::Matrix {
                prim: PrimitiveType::Float32,
                columns: 2,
                rows: 3
            }
            .to_string(),
            "mat2x3[f32]"
        );
        assert_eq!(
            ExpressionType::Array {
                element: Box::new(ExpressionType::Primitive(PrimitiveType::Float32)),
                length: Some(10)
            }
            .to_string(),
            "array[f32, 10]"
        );
        assert_eq!(
            ExpressionType::Sampler {
                sampled: PrimitiveType::Float32,
                dim: ImageDim::Dim2D
            }
            .to_string(),
            "sampler2D[f32]"
        );
    }

    #[test]
    fn alias_resolution_walks_chains() {
        let f32_ty = ExpressionType::Primitive(PrimitiveType::Float32);
        let targets = vec![f32_ty.clone(), ExpressionType::Alias(AliasIndex::new(0))];
        let lookup = |index: AliasIndex| targets.get(index.index());
        let alias = ExpressionType::Alias(AliasIndex::new(1));
        assert_eq!(*resolve_alias(&alias, &lookup), f32_ty);
    }

    #[test]
    fn std140_scalar_packing() {
        let members = vec![
            ExpressionType::Primitive(PrimitiveType::Float32),
            ExpressionType::Vector {
                prim: PrimitiveType::Float32,
                components: 3,
            },
            ExpressionType::Primitive(PrimitiveType::Float32),
        ];
        let layout = std140_struct(&members, &no_structs);
        // f32 at 0, vec3 aligned to 16, trailing f32 packs right after it
        assert_eq!(layout.offsets, vec![0, 16, 28]);
    }

    #[test]
    fn std140_matrix_and_array() {
        let mat = ExpressionType::Matrix {
            prim: PrimitiveType::Float32,
            columns: 4,
            rows: 4,
        };
        assert_eq!(
            std140_layout(&mat, &no_structs),
            Std140Field {
                align: 16,
                size: 64
            }
        );

        let arr = ExpressionType::Array {
            element: Box::new(ExpressionType::Primitive(PrimitiveType::Float32)),
            length: Some(4),
        };
        // each f32 element occupies a 16-byte stride
        assert_eq!(
            std140_layout(&arr, &no_structs),
            Std140Field {
                align: 16,
                size: 64
            }
        );
    }

    #[test]
    fn std140_nested_struct() {
        let inner = std140_struct(
            &[ExpressionType::Primitive(PrimitiveType::Float32)],
            &no_structs,
        );
        let inner_clone = inner.clone();
        let members = vec![
            ExpressionType::Primitive(PrimitiveType::Float32),
            ExpressionType::Struct(StructIndex::new(0)),
        ];
        let layout = std140_struct(&members, &move |_| inner_clone.clone());
        assert_eq!(layout.offsets, vec![0, 16]);
        let _ = inner;
    }
}
