#![warn(missing_docs)]
//! Writer trait and shared output types for the NZSL code generators.
//!
//! Defines the [`Writer`] contract that the NZSL, GLSL and SPIR-V emitters
//! implement, along with supporting types ([`WriterStates`],
//! [`WriterOutput`], [`WriterError`]) and a [`WriterRegistry`] for CLI
//! dispatch.

use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::sync::Arc;

use nzsl_ast::{ConstantValue, Module, ModuleResolver};

/// A code generator that compiles a module to target-specific output.
///
/// A writer handed a non-canonical module sanitizes it internally with its
/// own option set before emitting.
pub trait Writer {
    /// Human-readable name (e.g. "GLSL").
    fn name(&self) -> &str;

    /// Target identifiers this writer handles (for `--target` dispatch).
    fn targets(&self) -> &[&str];

    /// Generates target output for a module.
    fn generate(&self, module: &Module, states: &WriterStates)
        -> Result<WriterOutput, WriterError>;
}

/// Caller-provided compilation state shared by all writers.
#[derive(Clone, Default)]
pub struct WriterStates {
    /// The input module is already sanitized; skip the writer's own pass.
    pub sanitized: bool,
    /// Run constant propagation and unused-declaration elimination first.
    pub optimize: bool,
    /// Option overrides forwarded to sanitization.
    pub option_values: HashMap<u32, ConstantValue>,
    /// Resolver forwarded to sanitization for `import` statements.
    pub module_resolver: Option<Arc<dyn ModuleResolver>>,
}

impl WriterStates {
    /// Builds the sanitizer options common to every writer.
    pub fn sanitizer_options(&self) -> nzsl_sanitizer::Options {
        nzsl_sanitizer::Options {
            module_resolver: self.module_resolver.clone(),
            option_values: self.option_values.clone(),
            ..nzsl_sanitizer::Options::default()
        }
    }
}

/// The output produced by a writer.
#[derive(Clone, Debug)]
pub struct WriterOutput {
    /// One or more output files.
    pub files: Vec<OutputFile>,
}

impl WriterOutput {
    /// Single-file text output.
    pub fn text(name: impl Into<String>, content: String) -> Self {
        Self {
            files: vec![OutputFile {
                name: name.into(),
                content: OutputContent::Text(content),
            }],
        }
    }

    /// Single-file binary output.
    pub fn binary(name: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            files: vec![OutputFile {
                name: name.into(),
                content: OutputContent::Binary(content),
            }],
        }
    }
}

impl fmt::Display for WriterOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} file(s)", self.files.len())
    }
}

/// A single output file.
#[derive(Clone, Debug)]
pub struct OutputFile {
    /// Suggested file name (e.g. "shader.frag.glsl").
    pub name: String,
    /// The file content.
    pub content: OutputContent,
}

/// Content of an output file.
#[derive(Clone, Debug)]
pub enum OutputContent {
    /// UTF-8 text.
    Text(String),
    /// Raw binary data.
    Binary(Vec<u8>),
}

impl fmt::Display for OutputContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => write!(f, "Text({} chars)", text.len()),
            Self::Binary(data) => write!(f, "Binary({} bytes)", data.len()),
        }
    }
}

/// Errors produced while generating output.
#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    /// Sanitization of the input module failed.
    #[error(transparent)]
    Compile(#[from] nzsl_ast::Error),
    /// The module has no entry point usable by this writer.
    #[error("no entry point found for {0}")]
    MissingEntryPoint(String),
    /// The module uses a feature the target cannot express.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Registry of available writers, used for CLI `--target` dispatch.
#[derive(Default)]
pub struct WriterRegistry {
    writers: Vec<Box<dyn Writer>>,
}

impl WriterRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a writer.
    pub fn register(&mut self, writer: Box<dyn Writer>) {
        self.writers.push(writer);
    }

    /// Finds a writer that handles the given target identifier.
    pub fn find(&self, target: &str) -> Option<&dyn Writer> {
        self.writers
            .iter()
            .find(|w| w.targets().contains(&target))
            .map(|w| &**w)
    }

    /// Lists all supported target identifiers.
    pub fn list_targets(&self) -> Vec<&str> {
        self.writers
            .iter()
            .flat_map(|w| w.targets().iter().copied())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nzsl_ast::Metadata;

    struct NullWriter;

    impl Writer for NullWriter {
        fn name(&self) -> &str {
            "null"
        }

        fn targets(&self) -> &[&str] {
            &["null", "none"]
        }

        fn generate(
            &self,
            _module: &Module,
            _states: &WriterStates,
        ) -> Result<WriterOutput, WriterError> {
            Ok(WriterOutput::text("out.txt", String::new()))
        }
    }

    #[test]
    fn registry_dispatch() {
        let mut registry = WriterRegistry::new();
        registry.register(Box::new(NullWriter));
        assert!(registry.find("null").is_some());
        assert!(registry.find("none").is_some());
        assert!(registry.find("glsl").is_none());
        assert_eq!(registry.list_targets(), vec!["null", "none"]);
    }

    #[test]
    fn writer_output_constructors() {
        let output = WriterOutput::text("a.txt", "hi".into());
        assert_eq!(output.files.len(), 1);
        assert!(matches!(&output.files[0].content, OutputContent::Text(t) if t == "hi"));
        assert_eq!(output.to_string(), "1 file(s)");

        let output = WriterOutput::binary("a.bin", vec![1, 2, 3]);
        assert!(matches!(
            &output.files[0].content,
            OutputContent::Binary(b) if b.len() == 3
        ));
        assert_eq!(
            OutputContent::Binary(vec![0; 100]).to_string(),
            "Binary(100 bytes)"
        );
    }

    #[test]
    fn null_writer_generates() {
        let module = Module::new(Metadata::default());
        let output = NullWriter
            .generate(&module, &WriterStates::default())
            .unwrap();
        assert_eq!(output.files[0].name, "out.txt");
    }
}
