//! Statement nodes and declaration payloads.

use std::fmt;

use crate::expr::{ExprValue, Expression};
use crate::index::{AliasIndex, ConstantIndex, FunctionIndex, OptionIndex, StructIndex, VariableIndex};
use crate::location::SourceLocation;
use crate::types::ExpressionType;

/// A statement node: location plus the variant payload.
#[derive(Clone, Debug, PartialEq)]
pub struct Statement {
    pub location: SourceLocation,
    pub kind: StatementKind,
}

impl Statement {
    pub fn new(kind: StatementKind, location: SourceLocation) -> Self {
        Self { location, kind }
    }

    /// An empty statement with no location.
    pub fn no_op() -> Self {
        Self::new(StatementKind::NoOp, SourceLocation::default())
    }
}

/// A pipeline stage an entry point can target.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum ShaderStage {
    Fragment,
    Vertex,
}

impl ShaderStage {
    pub const ALL: [ShaderStage; 2] = [Self::Fragment, Self::Vertex];

    /// The attribute parameter naming this stage.
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Fragment => "frag",
            Self::Vertex => "vert",
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fragment => "fragment",
            Self::Vertex => "vertex",
        })
    }
}

/// Bitmask over [`ShaderStage`], used to key dead-code elimination and the
/// stage-flow analysis.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct ShaderStageFlags(u32);

impl ShaderStageFlags {
    pub const EMPTY: Self = Self(0);
    pub const FRAGMENT: Self = Self(1);
    pub const VERTEX: Self = Self(2);
    pub const ALL: Self = Self(1 | 2);

    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// The stages present in the mask, fragment first.
    pub fn stages(self) -> impl Iterator<Item = ShaderStage> {
        ShaderStage::ALL
            .into_iter()
            .filter(move |stage| self.contains(Self::from(*stage)))
    }
}

impl From<ShaderStage> for ShaderStageFlags {
    fn from(stage: ShaderStage) -> Self {
        match stage {
            ShaderStage::Fragment => Self::FRAGMENT,
            ShaderStage::Vertex => Self::VERTEX,
        }
    }
}

impl std::ops::BitOr for ShaderStageFlags {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for ShaderStageFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Predefined pipeline inputs/outputs addressable from struct members.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum BuiltinEntry {
    FragCoord,
    FragDepth,
    VertexPosition,
}

impl BuiltinEntry {
    /// The attribute parameter naming this builtin.
    pub fn keyword(self) -> &'static str {
        match self {
            Self::FragCoord => "fragcoord",
            Self::FragDepth => "fragdepth",
            Self::VertexPosition => "position",
        }
    }

    pub fn from_keyword(name: &str) -> Option<Self> {
        match name {
            "fragcoord" => Some(Self::FragCoord),
            "fragdepth" => Some(Self::FragDepth),
            "position" => Some(Self::VertexPosition),
            _ => None,
        }
    }

    /// Stages from which this builtin may be accessed.
    pub fn compatible_stages(self) -> ShaderStageFlags {
        match self {
            Self::FragCoord | Self::FragDepth => ShaderStageFlags::FRAGMENT,
            Self::VertexPosition => ShaderStageFlags::VERTEX,
        }
    }

    /// The type the hosting struct member must declare.
    pub fn expected_type(self) -> ExpressionType {
        match self {
            Self::FragCoord | Self::VertexPosition => ExpressionType::Vector {
                prim: crate::types::PrimitiveType::Float32,
                components: 4,
            },
            Self::FragDepth => {
                ExpressionType::Primitive(crate::types::PrimitiveType::Float32)
            }
        }
    }
}

/// Depth write behavior of a fragment entry point.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum DepthWriteMode {
    Greater,
    Less,
    Replace,
    Unchanged,
}

impl DepthWriteMode {
    pub fn keyword(self) -> &'static str {
        match self {
            Self::Greater => "greater",
            Self::Less => "less",
            Self::Replace => "replace",
            Self::Unchanged => "unchanged",
        }
    }
}

/// Unroll hint on loops.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum LoopUnroll {
    Always,
    Hint,
    Never,
}

/// Uniform buffer layouts.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum MemoryLayout {
    Std140,
}

/// One member of a struct declaration.
#[derive(Clone, Debug, PartialEq)]
pub struct StructMember {
    pub name: String,
    pub ty: ExprValue<ExpressionType>,
    pub builtin: Option<ExprValue<BuiltinEntry>>,
    pub location_index: Option<ExprValue<u32>>,
    /// Compile-time condition; false-valued members are pruned.
    pub cond: Option<Box<Expression>>,
    pub location: SourceLocation,
}

/// The body of a struct declaration.
#[derive(Clone, Debug, PartialEq)]
pub struct StructDescription {
    pub name: String,
    pub layout: Option<ExprValue<MemoryLayout>>,
    pub members: Vec<StructMember>,
}

/// One binding inside an `external` block.
#[derive(Clone, Debug, PartialEq)]
pub struct ExternalVar {
    pub variable_index: Option<VariableIndex>,
    pub name: String,
    pub ty: ExprValue<ExpressionType>,
    pub binding_index: Option<ExprValue<u32>>,
    pub binding_set: Option<ExprValue<u32>>,
    pub location: SourceLocation,
}

/// One formal parameter of a function.
#[derive(Clone, Debug, PartialEq)]
pub struct FunctionParameter {
    pub variable_index: Option<VariableIndex>,
    pub name: String,
    pub ty: ExprValue<ExpressionType>,
    pub location: SourceLocation,
}

/// A function declaration, entry point or helper.
#[derive(Clone, Debug, PartialEq)]
pub struct FunctionDeclaration {
    pub func_index: Option<FunctionIndex>,
    pub name: String,
    pub parameters: Vec<FunctionParameter>,
    pub statements: Vec<Statement>,
    pub return_type: Option<ExprValue<ExpressionType>>,
    pub entry_stage: Option<ExprValue<ShaderStage>>,
    pub depth_write: Option<ExprValue<DepthWriteMode>>,
    pub early_fragment_tests: Option<ExprValue<bool>>,
    pub exported: bool,
}

/// One `(condition, statement)` arm of a branch.
#[derive(Clone, Debug, PartialEq)]
pub struct CondStatement {
    pub condition: Box<Expression>,
    pub statement: Box<Statement>,
}

/// One imported symbol of an `import ... from Module` directive.
///
/// A `*` identifier is the wildcard; an empty import list means the plain
/// `import Module;` form, which behaves as a single wildcard.
#[derive(Clone, Debug, PartialEq)]
pub struct ImportSymbol {
    pub identifier: String,
    pub rename: Option<String>,
    pub location: SourceLocation,
}

impl ImportSymbol {
    pub fn is_wildcard(&self) -> bool {
        self.identifier == "*"
    }
}

/// The statement variants.
#[derive(Clone, Debug, PartialEq)]
pub enum StatementKind {
    /// An if/else-if chain; `is_const` marks `const if`.
    Branch {
        branches: Vec<CondStatement>,
        else_statement: Option<Box<Statement>>,
        is_const: bool,
    },
    Break,
    /// A compile-time-guarded sub-tree (`[cond(expr)]` on a statement).
    Conditional {
        condition: Box<Expression>,
        statement: Box<Statement>,
    },
    Continue,
    DeclareAlias {
        alias_index: Option<AliasIndex>,
        name: String,
        expression: Box<Expression>,
    },
    DeclareConst {
        const_index: Option<ConstantIndex>,
        name: String,
        ty: Option<ExprValue<ExpressionType>>,
        expression: Box<Expression>,
    },
    DeclareExternal {
        binding_set: Option<ExprValue<u32>>,
        variables: Vec<ExternalVar>,
    },
    DeclareFunction(Box<FunctionDeclaration>),
    DeclareOption {
        option_index: Option<OptionIndex>,
        name: String,
        ty: ExprValue<ExpressionType>,
        default_value: Option<Box<Expression>>,
    },
    DeclareStruct {
        struct_index: Option<StructIndex>,
        exported: bool,
        description: StructDescription,
    },
    DeclareVariable {
        variable_index: Option<VariableIndex>,
        name: String,
        ty: Option<ExprValue<ExpressionType>>,
        initial: Option<Box<Expression>>,
    },
    Discard,
    Expression { expression: Box<Expression> },
    For {
        variable_index: Option<VariableIndex>,
        name: String,
        from: Box<Expression>,
        to: Box<Expression>,
        step: Option<Box<Expression>>,
        unroll: Option<ExprValue<LoopUnroll>>,
        body: Box<Statement>,
    },
    ForEach {
        variable_index: Option<VariableIndex>,
        name: String,
        expression: Box<Expression>,
        unroll: Option<ExprValue<LoopUnroll>>,
        body: Box<Statement>,
    },
    Import {
        module_name: String,
        imports: Vec<ImportSymbol>,
    },
    /// A statement list that does not open a scope.
    Multi { statements: Vec<Statement> },
    NoOp,
    Return { expression: Option<Box<Expression>> },
    /// A statement list with its own scope (`{ ... }`).
    Scoped { statement: Box<Statement> },
    While {
        condition: Box<Expression>,
        unroll: Option<ExprValue<LoopUnroll>>,
        body: Box<Statement>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_flags() {
        let all = ShaderStageFlags::FRAGMENT | ShaderStageFlags::VERTEX;
        assert_eq!(all, ShaderStageFlags::ALL);
        assert!(all.contains(ShaderStageFlags::FRAGMENT));
        assert!(!ShaderStageFlags::FRAGMENT.contains(all));
        assert!(ShaderStageFlags::EMPTY.is_empty());
        let stages: Vec<_> = ShaderStageFlags::VERTEX.stages().collect();
        assert_eq!(stages, vec![ShaderStage::Vertex]);
    }

    #[test]
    fn builtin_compatibility() {
        assert!(BuiltinEntry::FragCoord
            .compatible_stages()
            .contains(ShaderStageFlags::FRAGMENT));
        assert!(!BuiltinEntry::VertexPosition
            .compatible_stages()
            .contains(ShaderStageFlags::FRAGMENT));
        assert_eq!(BuiltinEntry::from_keyword("position"), Some(BuiltinEntry::VertexPosition));
        assert_eq!(BuiltinEntry::from_keyword("unknown"), None);
    }

    #[test]
    fn wildcard_import_symbol() {
        let sym = ImportSymbol {
            identifier: "*".into(),
            rename: None,
            location: SourceLocation::default(),
        };
        assert!(sym.is_wildcard());
    }

    #[test]
    fn stage_display() {
        assert_eq!(ShaderStage::Fragment.to_string(), "fragment");
        assert_eq!(ShaderStage::Vertex.keyword(), "vert");
    }
}
