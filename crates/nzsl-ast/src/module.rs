//! The module model: metadata, imports, root statement, resolver contract.

use std::fmt;
use std::sync::Arc;

use crate::location::SourceLocation;
use crate::stmt::{Statement, StatementKind};

/// A language version, e.g. `1.0`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct LangVersion {
    pub major: u32,
    pub minor: u32,
}

impl LangVersion {
    pub const CURRENT: Self = Self { major: 1, minor: 0 };

    /// Parses `"major.minor"`.
    pub fn parse(text: &str) -> Option<Self> {
        let (major, minor) = text.split_once('.')?;
        Some(Self {
            major: major.parse().ok()?,
            minor: minor.parse().ok()?,
        })
    }
}

impl fmt::Display for LangVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Optional capabilities a module can enable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ModuleFeature {
    /// Allows primitives, vectors and matrices directly in external blocks.
    PrimitiveExternals,
}

impl ModuleFeature {
    pub fn keyword(self) -> &'static str {
        match self {
            Self::PrimitiveExternals => "primitive_externals",
        }
    }

    pub fn from_keyword(name: &str) -> Option<Self> {
        match name {
            "primitive_externals" => Some(Self::PrimitiveExternals),
            _ => None,
        }
    }
}

impl fmt::Display for ModuleFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Module metadata from the attribute block preceding `module`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Metadata {
    /// Dotted module name; empty for the unnamed root module.
    pub module_name: String,
    pub lang_version: LangVersion,
    pub author: String,
    pub description: String,
    pub license: String,
    pub enabled_features: Vec<ModuleFeature>,
}

/// A sanitized import, inlined under a renamed identifier.
#[derive(Clone, Debug, PartialEq)]
pub struct ImportedModule {
    /// The inner namespace identifier, e.g. `_SimpleModule`.
    pub identifier: String,
    pub module: Module,
}

/// A compilation unit: metadata, inlined imports, and a root multi-statement.
#[derive(Clone, Debug, PartialEq)]
pub struct Module {
    pub metadata: Arc<Metadata>,
    pub imported_modules: Vec<ImportedModule>,
    pub root: Statement,
}

impl Module {
    /// Creates an empty module with the given metadata.
    pub fn new(metadata: Metadata) -> Self {
        Self {
            metadata: Arc::new(metadata),
            imported_modules: Vec::new(),
            root: Statement::new(
                StatementKind::Multi { statements: Vec::new() },
                SourceLocation::default(),
            ),
        }
    }

    /// The statements of the root multi-statement.
    pub fn root_statements(&self) -> &[Statement] {
        match &self.root.kind {
            StatementKind::Multi { statements } => statements,
            _ => std::slice::from_ref(&self.root),
        }
    }
}

/// Resolves imported module names to module ASTs.
///
/// Implementations may cache, parse on demand, or deserialize pre-compiled
/// modules; the sanitizer treats resolution as opaque and synchronous.
pub trait ModuleResolver {
    fn resolve(&self, module_name: &str) -> Result<Arc<Module>, ResolveError>;
}

/// Failure to resolve a module name.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error("module {0} not found")]
    NotFound(String),
    #[error("module {name} is invalid: {reason}")]
    Invalid { name: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_parse_and_display() {
        let version = LangVersion::parse("1.0").unwrap();
        assert_eq!(version, LangVersion { major: 1, minor: 0 });
        assert_eq!(version.to_string(), "1.0");
        assert!(LangVersion::parse("1").is_none());
        assert!(LangVersion::parse("a.b").is_none());
    }

    #[test]
    fn feature_keywords() {
        assert_eq!(
            ModuleFeature::from_keyword("primitive_externals"),
            Some(ModuleFeature::PrimitiveExternals)
        );
        assert_eq!(ModuleFeature::from_keyword("non_existent"), None);
    }

    #[test]
    fn empty_module_root() {
        let module = Module::new(Metadata::default());
        assert!(module.root_statements().is_empty());
        assert!(module.imported_modules.is_empty());
    }
}
