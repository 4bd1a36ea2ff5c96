//! Compile-time constant values.

use std::fmt;

use crate::types::{ExpressionType, PrimitiveType};
use crate::vector::{Vector2, Vector3, Vector4};

/// A fully-evaluated compile-time value.
///
/// Vector constants exist for `f32` and `i32` components, which is what the
/// propagator can produce; other vector types stay symbolic.
#[derive(Clone, Debug, PartialEq)]
pub enum ConstantValue {
    Bool(bool),
    Float32(f32),
    Int32(i32),
    UInt32(u32),
    String(String),
    Vec2F32(Vector2<f32>),
    Vec3F32(Vector3<f32>),
    Vec4F32(Vector4<f32>),
    Vec2I32(Vector2<i32>),
    Vec3I32(Vector3<i32>),
    Vec4I32(Vector4<i32>),
}

impl ConstantValue {
    /// The shader type of this value.
    pub fn expression_type(&self) -> ExpressionType {
        match self {
            Self::Bool(_) => ExpressionType::Primitive(PrimitiveType::Boolean),
            Self::Float32(_) => ExpressionType::Primitive(PrimitiveType::Float32),
            Self::Int32(_) => ExpressionType::Primitive(PrimitiveType::Int32),
            Self::UInt32(_) => ExpressionType::Primitive(PrimitiveType::UInt32),
            Self::String(_) => ExpressionType::Primitive(PrimitiveType::String),
            Self::Vec2F32(_) => vector(PrimitiveType::Float32, 2),
            Self::Vec3F32(_) => vector(PrimitiveType::Float32, 3),
            Self::Vec4F32(_) => vector(PrimitiveType::Float32, 4),
            Self::Vec2I32(_) => vector(PrimitiveType::Int32, 2),
            Self::Vec3I32(_) => vector(PrimitiveType::Int32, 3),
            Self::Vec4I32(_) => vector(PrimitiveType::Int32, 4),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// The value as an unsigned integer, accepting non-negative `i32`.
    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Self::UInt32(v) => Some(*v),
            Self::Int32(v) if *v >= 0 => Some(*v as u32),
            _ => None,
        }
    }
}

impl fmt::Display for ConstantValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Float32(v) => write!(f, "{}", format_f32(*v)),
            Self::Int32(v) => write!(f, "{v}"),
            Self::UInt32(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "\"{v}\""),
            Self::Vec2F32(v) => {
                write!(f, "vec2[f32]({}, {})", format_f32(v.x), format_f32(v.y))
            }
            Self::Vec3F32(v) => write!(
                f,
                "vec3[f32]({}, {}, {})",
                format_f32(v.x),
                format_f32(v.y),
                format_f32(v.z)
            ),
            Self::Vec4F32(v) => write!(
                f,
                "vec4[f32]({}, {}, {}, {})",
                format_f32(v.x),
                format_f32(v.y),
                format_f32(v.z),
                format_f32(v.w)
            ),
            Self::Vec2I32(v) => write!(f, "vec2[i32]({}, {})", v.x, v.y),
            Self::Vec3I32(v) => write!(f, "vec3[i32]({}, {}, {})", v.x, v.y, v.z),
            Self::Vec4I32(v) => write!(f, "vec4[i32]({}, {}, {}, {})", v.x, v.y, v.z, v.w),
        }
    }
}

/// Prints a float with a guaranteed decimal point and minimal digits, so
/// printed modules re-parse to the same literal.
pub fn format_f32(value: f32) -> String {
    if value.is_finite() && value == value.trunc() && value.abs() < 1.0e16 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_types() {
        assert_eq!(
            ConstantValue::Float32(1.0).expression_type(),
            ExpressionType::Primitive(PrimitiveType::Float32)
        );
        assert_eq!(
            ConstantValue::Vec4I32(Vector4::splat(0)).expression_type(),
            ExpressionType::Vector {
                prim: PrimitiveType::Int32,
                components: 4
            }
        );
    }

    #[test]
    fn float_formatting() {
        assert_eq!(format_f32(42.0), "42.0");
        assert_eq!(format_f32(0.5), "0.5");
        assert_eq!(format_f32(-3.0), "-3.0");
        assert_eq!(format_f32(42.66), "42.66");
    }

    #[test]
    fn display_vectors() {
        let v = ConstantValue::Vec4F32(Vector4::new(48.0, 12.0, -42.0, 0.0));
        assert_eq!(v.to_string(), "vec4[f32](48.0, 12.0, -42.0, 0.0)");
    }

    #[test]
    fn as_u32_accepts_positive_i32() {
        assert_eq!(ConstantValue::Int32(10).as_u32(), Some(10));
        assert_eq!(ConstantValue::Int32(-1).as_u32(), None);
        assert_eq!(ConstantValue::UInt32(3).as_u32(), Some(3));
    }
}

fn vector(prim: PrimitiveType, components: u32) -> ExpressionType {
    ExpressionType::Vector { prim, components }
}
