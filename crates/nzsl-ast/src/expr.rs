//! Expression nodes.
//!
//! Every expression carries its source location and, once the sanitizer has
//! run, a cached resolved type. Sub-expressions are exclusively owned, so the
//! tree clones, compares and serializes without cycle tracking.

use std::fmt;

use crate::constant::ConstantValue;
use crate::index::{AliasIndex, ConstantIndex, FunctionIndex, StructIndex, VariableIndex};
use crate::location::SourceLocation;
use crate::types::ExpressionType;

/// An expression node: location, cached type slot, and the variant payload.
#[derive(Clone, Debug, PartialEq)]
pub struct Expression {
    pub location: SourceLocation,
    pub cached_type: Option<ExpressionType>,
    pub kind: ExpressionKind,
}

impl Expression {
    /// Creates an expression with an empty type slot.
    pub fn new(kind: ExpressionKind, location: SourceLocation) -> Self {
        Self {
            location,
            cached_type: None,
            kind,
        }
    }

    /// Creates an already-typed expression.
    pub fn typed(kind: ExpressionKind, ty: ExpressionType, location: SourceLocation) -> Self {
        Self {
            location,
            cached_type: Some(ty),
            kind,
        }
    }

    /// Shorthand for a typed constant-value expression.
    pub fn constant(value: ConstantValue, location: SourceLocation) -> Self {
        let ty = value.expression_type();
        Self::typed(ExpressionKind::ConstantValue { value }, ty, location)
    }
}

/// A value that is either still an expression or already resolved.
///
/// Attribute parameters and declared types start as expressions and are
/// replaced by their resolved value during sanitization.
#[derive(Clone, Debug, PartialEq)]
pub enum ExprValue<T> {
    Expr(Box<Expression>),
    Resolved(T),
}

impl<T> ExprValue<T> {
    pub fn resolved(&self) -> Option<&T> {
        match self {
            Self::Resolved(value) => Some(value),
            Self::Expr(_) => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, Self::Resolved(_))
    }
}

/// Assignment operators, simple and compound.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum AssignOp {
    Simple,
    CompoundAdd,
    CompoundSubtract,
    CompoundMultiply,
    CompoundDivide,
    CompoundLogicalAnd,
    CompoundLogicalOr,
}

impl AssignOp {
    /// The binary operator a compound assignment expands to.
    pub fn binary_op(self) -> Option<BinaryOp> {
        match self {
            Self::Simple => None,
            Self::CompoundAdd => Some(BinaryOp::Add),
            Self::CompoundSubtract => Some(BinaryOp::Subtract),
            Self::CompoundMultiply => Some(BinaryOp::Multiply),
            Self::CompoundDivide => Some(BinaryOp::Divide),
            Self::CompoundLogicalAnd => Some(BinaryOp::LogicalAnd),
            Self::CompoundLogicalOr => Some(BinaryOp::LogicalOr),
        }
    }
}

/// Binary operators.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    CompEq,
    CompGe,
    CompGt,
    CompLe,
    CompLt,
    CompNe,
    LogicalAnd,
    LogicalOr,
}

impl BinaryOp {
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::CompEq | Self::CompGe | Self::CompGt | Self::CompLe | Self::CompLt | Self::CompNe
        )
    }

    pub fn is_logical(self) -> bool {
        matches!(self, Self::LogicalAnd | Self::LogicalOr)
    }

    /// The surface-syntax token.
    pub fn token(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Modulo => "%",
            Self::CompEq => "==",
            Self::CompGe => ">=",
            Self::CompGt => ">",
            Self::CompLe => "<=",
            Self::CompLt => "<",
            Self::CompNe => "!=",
            Self::LogicalAnd => "&&",
            Self::LogicalOr => "||",
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

/// Unary operators.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum UnaryOp {
    LogicalNot,
    Minus,
    Plus,
}

impl UnaryOp {
    pub fn token(self) -> &'static str {
        match self {
            Self::LogicalNot => "!",
            Self::Minus => "-",
            Self::Plus => "+",
        }
    }
}

/// Built-in named functions.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum IntrinsicType {
    CrossProduct,
    DotProduct,
    Exp,
    Length,
    Max,
    Min,
    Normalize,
    Pow,
    Reflect,
    SampleTexture,
}

impl IntrinsicType {
    /// The surface-syntax callable name, if the intrinsic is callable by name
    /// (texture sampling is only reachable through the `Sample` method).
    pub fn name(self) -> Option<&'static str> {
        match self {
            Self::CrossProduct => Some("cross"),
            Self::DotProduct => Some("dot"),
            Self::Exp => Some("exp"),
            Self::Length => Some("length"),
            Self::Max => Some("max"),
            Self::Min => Some("min"),
            Self::Normalize => Some("normalize"),
            Self::Pow => Some("pow"),
            Self::Reflect => Some("reflect"),
            Self::SampleTexture => None,
        }
    }

    /// All intrinsics callable by bare name, in scope-registration order.
    pub const NAMED: [IntrinsicType; 9] = [
        Self::CrossProduct,
        Self::DotProduct,
        Self::Exp,
        Self::Length,
        Self::Max,
        Self::Min,
        Self::Normalize,
        Self::Pow,
        Self::Reflect,
    ];
}

/// One component of a member-access chain that is still unresolved.
#[derive(Clone, Debug, PartialEq)]
pub struct AccessEntry {
    pub identifier: String,
    pub location: SourceLocation,
}

/// A swizzle pattern: up to four component selectors, each in `0..=3`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SwizzlePattern {
    pub components: [u8; 4],
    pub count: usize,
}

impl SwizzlePattern {
    /// Parses a pattern like `xyz` or `rgba`. Returns `None` on anything that
    /// is not a 1-4 letter combination from a single naming set.
    pub fn parse(text: &str) -> Option<Self> {
        if text.is_empty() || text.len() > 4 {
            return None;
        }
        let mut components = [0u8; 4];
        let mut set = None;
        for (i, ch) in text.chars().enumerate() {
            let (index, in_set) = match ch {
                'x' => (0, 0),
                'y' => (1, 0),
                'z' => (2, 0),
                'w' => (3, 0),
                'r' => (0, 1),
                'g' => (1, 1),
                'b' => (2, 1),
                'a' => (3, 1),
                _ => return None,
            };
            if *set.get_or_insert(in_set) != in_set {
                return None;
            }
            components[i] = index;
        }
        Some(Self {
            components,
            count: text.len(),
        })
    }

    pub fn components(&self) -> &[u8] {
        &self.components[..self.count]
    }

    /// Largest component index referenced by the pattern.
    pub fn max_component(&self) -> u8 {
        self.components().iter().copied().max().unwrap_or(0)
    }
}

impl fmt::Display for SwizzlePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &c in self.components() {
            f.write_str(match c {
                0 => "x",
                1 => "y",
                2 => "z",
                _ => "w",
            })?;
        }
        Ok(())
    }
}

/// The expression variants.
#[derive(Clone, Debug, PartialEq)]
pub enum ExpressionKind {
    /// Surface member access by name; lowered to `AccessIndex` or `Swizzle`.
    AccessIdentifier {
        expr: Box<Expression>,
        identifiers: Vec<AccessEntry>,
    },
    /// Indexed access into an array, vector, matrix or struct.
    AccessIndex {
        expr: Box<Expression>,
        indices: Vec<Expression>,
    },
    /// Reference to a declared alias.
    AliasValue { alias: AliasIndex },
    Assign {
        op: AssignOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    CallFunction {
        target: Box<Expression>,
        parameters: Vec<Expression>,
    },
    /// Surface method call; lowered to an intrinsic during sanitization.
    CallMethod {
        object: Box<Expression>,
        method: String,
        parameters: Vec<Expression>,
    },
    /// Type construction / conversion.
    Cast {
        target: ExprValue<ExpressionType>,
        expressions: Vec<Expression>,
    },
    /// Compile-time select, pruned during sanitization.
    Conditional {
        condition: Box<Expression>,
        true_path: Box<Expression>,
        false_path: Box<Expression>,
    },
    /// Reference to a declared constant by index.
    Constant { constant: ConstantIndex },
    /// An inline literal value.
    ConstantValue { value: ConstantValue },
    /// Reference to a declared function.
    Function { function: FunctionIndex },
    /// Unresolved name; none remain after full sanitization.
    Identifier { name: String },
    Intrinsic {
        intrinsic: IntrinsicType,
        parameters: Vec<Expression>,
    },
    /// Reference to an intrinsic used as a callee.
    IntrinsicFunction { intrinsic: IntrinsicType },
    /// Reference to a declared struct used as a type value.
    StructType { struct_index: StructIndex },
    Swizzle {
        expr: Box<Expression>,
        pattern: SwizzlePattern,
    },
    /// A concrete type used as a value (e.g. cast callee).
    Type { ty: ExpressionType },
    /// Reference to a declared variable.
    VariableValue { variable: VariableIndex },
    Unary {
        op: UnaryOp,
        expr: Box<Expression>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swizzle_parse() {
        let pattern = SwizzlePattern::parse("yzwx").unwrap();
        assert_eq!(pattern.components(), &[1, 2, 3, 0]);
        assert_eq!(pattern.to_string(), "yzwx");

        let rgba = SwizzlePattern::parse("rg").unwrap();
        assert_eq!(rgba.components(), &[0, 1]);

        assert!(SwizzlePattern::parse("").is_none());
        assert!(SwizzlePattern::parse("xyzwx").is_none());
        assert!(SwizzlePattern::parse("xg").is_none());
        assert!(SwizzlePattern::parse("value").is_none());
    }

    #[test]
    fn swizzle_max_component() {
        assert_eq!(SwizzlePattern::parse("xxxx").unwrap().max_component(), 0);
        assert_eq!(SwizzlePattern::parse("xw").unwrap().max_component(), 3);
    }

    #[test]
    fn compound_assign_expansion() {
        assert_eq!(AssignOp::CompoundAdd.binary_op(), Some(BinaryOp::Add));
        assert_eq!(AssignOp::Simple.binary_op(), None);
    }

    #[test]
    fn constant_expression_carries_type() {
        let expr = Expression::constant(ConstantValue::Int32(42), SourceLocation::default());
        assert_eq!(
            expr.cached_type,
            Some(crate::types::ExpressionType::Primitive(
                crate::types::PrimitiveType::Int32
            ))
        );
    }
}
