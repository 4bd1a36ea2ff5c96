//! NZSL abstract syntax tree.
//!
//! Owned-tree AST for the NZSL shading language: expression and statement
//! variants carrying source locations and cached resolved types, the closed
//! shader type set, typed declaration indices, the module model, recursive
//! visitors, and the `.nzslb` binary serialization.

pub mod checksum;
mod constant;
mod error;
mod expr;
mod index;
mod location;
mod module;
pub mod serialize;
mod stmt;
pub mod types;
mod vector;
pub mod visit;

pub use constant::{format_f32, ConstantValue};
pub use error::{CompilerError, Error, ErrorKind, LexerError, ParserError};
pub use expr::{
    AccessEntry, AssignOp, BinaryOp, ExprValue, Expression, ExpressionKind, IntrinsicType,
    SwizzlePattern, UnaryOp,
};
pub use index::{
    AliasIndex, ConstantIndex, FunctionIndex, Index, OptionIndex, StructIndex, VariableIndex,
};
pub use location::SourceLocation;
pub use module::{
    ImportedModule, LangVersion, Metadata, Module, ModuleFeature, ModuleResolver, ResolveError,
};
pub use stmt::{
    BuiltinEntry, CondStatement, DepthWriteMode, ExternalVar, FunctionDeclaration,
    FunctionParameter, ImportSymbol, LoopUnroll, MemoryLayout, ShaderStage, ShaderStageFlags,
    Statement, StatementKind, StructDescription, StructMember,
};
pub use types::{ExpressionType, ImageDim, PrimitiveType};
pub use vector::{Vector2, Vector3, Vector4};
