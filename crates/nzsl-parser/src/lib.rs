//! NZSL lexer and parser.
//!
//! Turns UTF-8 source text into a surface [`nzsl_ast::Module`] ready for
//! sanitization, and provides the filesystem-backed [`ModuleResolver`]
//! implementation used to satisfy imports.
//!
//! [`ModuleResolver`]: nzsl_ast::ModuleResolver

mod lexer;
mod parser;
mod resolver;

pub use lexer::{tokenize, tokenize_with_file, Token, TokenKind};
pub use parser::parse_tokens;
pub use resolver::{FilesystemModuleResolver, COMPILED_MODULE_EXTENSION, MODULE_EXTENSION};

use nzsl_ast::{Error, Module};

/// Parses NZSL source into a surface module.
pub fn parse(source: &str) -> Result<Module, Error> {
    parse_tokens(&tokenize(source)?)
}

/// Parses NZSL source, attaching `file` to every source location.
pub fn parse_with_file(source: &str, file: &str) -> Result<Module, Error> {
    parse_tokens(&tokenize_with_file(source, Some(file))?)
}
