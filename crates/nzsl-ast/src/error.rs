//! Error taxonomy for the whole compilation pipeline.
//!
//! Errors carry a four-letter-family mnemonic code (`L*` lexer, `P*` parser,
//! `C*` compiler) and a [`SourceLocation`]. The user-visible rendering is
//! `(line,col -> col): <CODE> error: <message>`.

use crate::location::SourceLocation;

/// A located compilation error.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
#[error("{location}: {} error: {kind}", .kind.code())]
pub struct Error {
    pub location: SourceLocation,
    pub kind: ErrorKind,
}

/// The family of an [`Error`].
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ErrorKind {
    #[error(transparent)]
    Lexer(#[from] LexerError),
    #[error(transparent)]
    Parser(#[from] ParserError),
    #[error(transparent)]
    Compiler(#[from] CompilerError),
}

impl ErrorKind {
    /// The stable mnemonic code, e.g. `LBadNumber` or `CModuleFeatureMismatch`.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Lexer(err) => err.code(),
            Self::Parser(err) => err.code(),
            Self::Compiler(err) => err.code(),
        }
    }
}

/// Tokenization errors (`L*`).
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum LexerError {
    #[error("bad number")]
    BadNumber,
    #[error("number is out of range")]
    NumberOutOfRange,
    #[error("unfinished string")]
    UnfinishedString,
    #[error("unrecognized character")]
    UnrecognizedChar,
    #[error("unrecognized token")]
    UnrecognizedToken,
}

impl LexerError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::BadNumber => "LBadNumber",
            Self::NumberOutOfRange => "LNumberOutOfRange",
            Self::UnfinishedString => "LUnfinishedString",
            Self::UnrecognizedChar => "LUnrecognizedChar",
            Self::UnrecognizedToken => "LUnrecognizedToken",
        }
    }

    pub fn at(self, location: SourceLocation) -> Error {
        Error {
            location,
            kind: ErrorKind::Lexer(self),
        }
    }
}

/// Syntax errors (`P*`).
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ParserError {
    #[error("unexpected token {token}")]
    UnexpectedToken { token: String },
    #[error("missing attribute {attribute}")]
    MissingAttribute { attribute: String },
    #[error("attribute {attribute} requires a parameter")]
    AttributeMissingParameter { attribute: String },
    #[error("attribute {attribute} can only be present once")]
    AttributeMultipleUnique { attribute: String },
    #[error("invalid parameter {parameter} for attribute {attribute}")]
    AttributeInvalidParameter {
        attribute: String,
        parameter: String,
    },
    #[error("unexpected attribute {attribute}")]
    UnexpectedAttribute { attribute: String },
    #[error("module feature {feature} has already been specified")]
    ModuleFeatureMultipleUnique { feature: String },
}

impl ParserError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnexpectedToken { .. } => "PUnexpectedToken",
            Self::MissingAttribute { .. } => "PMissingAttribute",
            Self::AttributeMissingParameter { .. } => "PAttributeMissingParameter",
            Self::AttributeMultipleUnique { .. } => "PAttributeMultipleUnique",
            Self::AttributeInvalidParameter { .. } => "PAttributeInvalidParameter",
            Self::UnexpectedAttribute { .. } => "PUnexpectedAttribute",
            Self::ModuleFeatureMultipleUnique { .. } => "PModuleFeatureMultipleUnique",
        }
    }

    pub fn at(self, location: SourceLocation) -> Error {
        Error {
            location,
            kind: ErrorKind::Parser(self),
        }
    }
}

/// Sanitizer and pass errors (`C*`).
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum CompilerError {
    #[error("array length is required in this context")]
    ArrayLengthRequired,
    #[error("binary operation between {left} and {right} is not supported")]
    BinaryIncompatibleTypes { left: String, right: String },
    #[error("builtin {builtin} expected type {expected}, got type {got}")]
    BuiltinUnexpectedType {
        builtin: String,
        expected: String,
        got: String,
    },
    #[error("builtin {builtin} is not available in {stage} stage")]
    BuiltinUnsupportedStage { builtin: String, stage: String },
    #[error("function {function} expects {expected} parameter(s), got {got}")]
    CallUnmatchingParameterCount {
        function: String,
        expected: usize,
        got: usize,
    },
    #[error("parameter #{index} type ({got}) doesn't match expected type ({expected})")]
    CallUnmatchingParameterType {
        index: usize,
        expected: String,
        got: String,
    },
    #[error("component count ({got}) doesn't match required component count ({expected})")]
    CastComponentMismatch { got: u32, expected: u32 },
    #[error("vector component count ({got}) doesn't match target matrix row count ({expected})")]
    CastMatrixVectorComponentMismatch { got: u32, expected: u32 },
    #[error("expected a constant expression")]
    ConstantExpressionRequired,
    #[error("condition must be a boolean, got {got}")]
    ConditionExpectedBool { got: String },
    #[error("an entry point is already defined for the {stage} stage")]
    EntryPointAlreadyDefined { stage: String },
    #[error("entry function parameter must be a struct whose members carry a location or builtin")]
    EntryFunctionParameter,
    #[error("entry function return type must be a struct or nothing")]
    EntryFunctionReturnType,
    #[error("external variable {name} has unauthorized type ({ty}): only storage buffers, samplers and uniform buffers (and primitives, vectors and matrices if primitive external feature is enabled) are allowed in external blocks")]
    ExtTypeNotAllowed { name: String, ty: String },
    #[error("for-each expects a fixed-size array, got {got}")]
    ForEachUnsupportedType { got: String },
    #[error("{name} identifier was already imported")]
    ImportIdentifierAlreadyPresent { name: String },
    #[error("{name} is not exported by module {module}")]
    ImportIdentifierNotFound { name: String, module: String },
    #[error("only one wildcard can be present in an import directive")]
    ImportMultipleWildcard,
    #[error("wildcard cannot be renamed")]
    ImportWildcardRename,
    #[error("identifier {name} is already used in this scope")]
    IdentifierAlreadyUsed { name: String },
    #[error("index must be an integer, got {got}")]
    IndexExpectedInteger { got: String },
    #[error("type {ty} cannot be indexed")]
    IndexUnexpectedType { ty: String },
    #[error("integral division by zero in expression ({expr})")]
    IntegralDivisionByZero { expr: String },
    #[error("integral modulo by zero in expression ({expr})")]
    IntegralModuloByZero { expr: String },
    #[error("expected type {expected} for parameter #{index}, got {got}")]
    IntrinsicExpectedType {
        index: usize,
        expected: String,
        got: String,
    },
    #[error("this is only valid in the fragment stage but this function gets called in the {stage} stage")]
    InvalidStageDependency { stage: String },
    #[error("loop control instruction {control} found outside of loop")]
    LoopControlOutsideOfLoop { control: String },
    #[error("method {method} is not defined on type {ty}")]
    MethodNotFound { method: String, ty: String },
    #[error("module {module} requires feature {feature}")]
    ModuleFeatureMismatch { module: String, feature: String },
    #[error("module {module} could not be resolved: {reason}")]
    ModuleNotFound { module: String, reason: String },
    #[error("no module resolver provided for import")]
    ModuleResolverMissing,
    #[error("return type mismatch: expected {expected}, got {got}")]
    ReturnTypeMismatch { expected: String, got: String },
    #[error("invalid swizzle {swizzle}")]
    SwizzleInvalid { swizzle: String },
    #[error("type {ty} cannot be swizzled")]
    SwizzleUnexpectedType { ty: String },
    #[error("expected a type, got {got}")]
    TypeExpected { got: String },
    #[error("unary operation is not supported on type {ty}")]
    UnaryUnsupported { ty: String },
    #[error("unknown identifier {name}")]
    UnknownIdentifier { name: String },
    #[error("left operand type ({left}) doesn't match right operand type ({right})")]
    UnmatchingTypes { left: String, right: String },
    #[error("initial expression type ({got}) doesn't match specified type ({expected})")]
    VarDeclarationTypeUnmatching { got: String, expected: String },
}

impl CompilerError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::ArrayLengthRequired => "CArrayLengthRequired",
            Self::BinaryIncompatibleTypes { .. } => "CBinaryIncompatibleTypes",
            Self::BuiltinUnexpectedType { .. } => "CBuiltinUnexpectedType",
            Self::BuiltinUnsupportedStage { .. } => "CBuiltinUnsupportedStage",
            Self::CallUnmatchingParameterCount { .. } => "CCallUnmatchingParameterCount",
            Self::CallUnmatchingParameterType { .. } => "CCallUnmatchingParameterType",
            Self::CastComponentMismatch { .. } => "CCastComponentMismatch",
            Self::CastMatrixVectorComponentMismatch { .. } => "CCastMatrixVectorComponentMismatch",
            Self::ConstantExpressionRequired => "CConstantExpressionRequired",
            Self::ConditionExpectedBool { .. } => "CConditionExpectedBool",
            Self::EntryPointAlreadyDefined { .. } => "CEntryPointAlreadyDefined",
            Self::EntryFunctionParameter => "CEntryFunctionParameter",
            Self::EntryFunctionReturnType => "CEntryFunctionReturnType",
            Self::ExtTypeNotAllowed { .. } => "CExtTypeNotAllowed",
            Self::ForEachUnsupportedType { .. } => "CForEachUnsupportedType",
            Self::ImportIdentifierAlreadyPresent { .. } => "CImportIdentifierAlreadyPresent",
            Self::ImportIdentifierNotFound { .. } => "CImportIdentifierNotFound",
            Self::ImportMultipleWildcard => "CImportMultipleWildcard",
            Self::ImportWildcardRename => "CImportWildcardRename",
            Self::IdentifierAlreadyUsed { .. } => "CIdentifierAlreadyUsed",
            Self::IndexExpectedInteger { .. } => "CIndexExpectedInteger",
            Self::IndexUnexpectedType { .. } => "CIndexUnexpectedType",
            Self::IntegralDivisionByZero { .. } => "CIntegralDivisionByZero",
            Self::IntegralModuloByZero { .. } => "CIntegralModuloByZero",
            Self::IntrinsicExpectedType { .. } => "CIntrinsicExpectedType",
            Self::InvalidStageDependency { .. } => "CInvalidStageDependency",
            Self::LoopControlOutsideOfLoop { .. } => "CLoopControlOutsideOfLoop",
            Self::MethodNotFound { .. } => "CMethodNotFound",
            Self::ModuleFeatureMismatch { .. } => "CModuleFeatureMismatch",
            Self::ModuleNotFound { .. } => "CModuleNotFound",
            Self::ModuleResolverMissing => "CModuleResolverMissing",
            Self::ReturnTypeMismatch { .. } => "CReturnTypeMismatch",
            Self::SwizzleInvalid { .. } => "CSwizzleInvalid",
            Self::SwizzleUnexpectedType { .. } => "CSwizzleUnexpectedType",
            Self::TypeExpected { .. } => "CTypeExpected",
            Self::UnaryUnsupported { .. } => "CUnaryUnsupported",
            Self::UnknownIdentifier { .. } => "CUnknownIdentifier",
            Self::UnmatchingTypes { .. } => "CUnmatchingTypes",
            Self::VarDeclarationTypeUnmatching { .. } => "CVarDeclarationTypeUnmatching",
        }
    }

    pub fn at(self, location: SourceLocation) -> Error {
        Error {
            location,
            kind: ErrorKind::Compiler(self),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lexer_error_rendering() {
        let err = LexerError::BadNumber.at(SourceLocation::span(1, 1, 1, 4));
        assert_eq!(err.to_string(), "(1,1 -> 4): LBadNumber error: bad number");
    }

    #[test]
    fn single_position_rendering() {
        let err = LexerError::UnrecognizedToken.at(SourceLocation::at(1, 1));
        assert_eq!(
            err.to_string(),
            "(1, 1): LUnrecognizedToken error: unrecognized token"
        );
    }

    #[test]
    fn parser_error_rendering() {
        let err = ParserError::AttributeMultipleUnique {
            attribute: "nzsl_version".into(),
        }
        .at(SourceLocation::span(1, 23, 1, 41));
        assert_eq!(
            err.to_string(),
            "(1,23 -> 41): PAttributeMultipleUnique error: attribute nzsl_version can only be present once"
        );
    }

    #[test]
    fn compiler_error_rendering() {
        let err = CompilerError::IntegralDivisionByZero {
            expr: "42 / 0".into(),
        }
        .at(SourceLocation::span(5, 11, 5, 30));
        assert_eq!(
            err.to_string(),
            "(5,11 -> 30): CIntegralDivisionByZero error: integral division by zero in expression (42 / 0)"
        );
    }

    #[test]
    fn line_span_rendering() {
        let err = CompilerError::ArrayLengthRequired.at(SourceLocation::span(5, 1, 9, 1));
        assert_eq!(
            err.to_string(),
            "(5 -> 9,1 -> 1): CArrayLengthRequired error: array length is required in this context"
        );
    }
}
