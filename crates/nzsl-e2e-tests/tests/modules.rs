//! Module imports: inlining, re-exports, features, repeat imports.

mod common;

use std::sync::Arc;

use common::{expect_nzsl, parse, sanitize_module};
use nzsl_ast::ModuleResolver;
use nzsl_parser::FilesystemModuleResolver;
use nzsl_sanitizer::Options;

const SIMPLE_MODULE: &str = r#"
[nzsl_version("1.0")]
module SimpleModule;

[layout(std140)]
struct Data
{
    value: f32
}

[export]
[layout(std140)]
struct Block
{
    data: Data
}

[export]
fn GetDataValue(data: Data) -> f32
{
    return data.value;
}

struct Unused {}

[export]
struct InputData
{
    [location(0)] value: f32
}

[export]
struct OutputData
{
    [location(0)] value: f32
}
"#;

const MAIN_SHADER: &str = r#"
[nzsl_version("1.0")]
module;

import SimpleModule;

external
{
    [binding(0)] block: uniform[Block]
}

[entry(frag)]
fn main(input: InputData) -> OutputData
{
    let output: OutputData;
    output.value = GetDataValue(block.data) * input.value;
    return output;
}
"#;

fn resolver_with(sources: &[&str]) -> Arc<dyn ModuleResolver> {
    let resolver = FilesystemModuleResolver::new();
    for source in sources {
        resolver
            .register_module_source(source)
            .unwrap_or_else(|err| panic!("module registration failed: {err}"));
    }
    Arc::new(resolver)
}

#[test]
fn simple_module_import() {
    let options = Options {
        module_resolver: Some(resolver_with(&[SIMPLE_MODULE])),
        ..Options::default()
    };
    let module = sanitize_module(&parse(MAIN_SHADER), &options);

    // the import becomes an inlined renamed module
    assert_eq!(module.imported_modules.len(), 1);
    assert_eq!(module.imported_modules[0].identifier, "_SimpleModule");

    expect_nzsl(
        &module,
        r#"
[nzsl_version("1.0")]
module _SimpleModule
{
    [layout(std140)]
    struct Data
    {
        value: f32
    }
"#,
    );

    // exported declarations surface as aliases, in declaration order
    expect_nzsl(&module, "alias Block = _SimpleModule.Block;");
    expect_nzsl(&module, "alias GetDataValue = _SimpleModule.GetDataValue;");
    expect_nzsl(&module, "alias InputData = _SimpleModule.InputData;");
    expect_nzsl(&module, "alias OutputData = _SimpleModule.OutputData;");

    // uses resolve through the aliases to the inlined declarations
    expect_nzsl(
        &module,
        r#"
external
{
    [set(0), binding(0)] block: uniform[_SimpleModule.Block]
}
"#,
    );
    expect_nzsl(
        &module,
        "output.value = GetDataValue(block.data) * input.value;",
    );
}

#[test]
fn nested_module_imports_inline_flat() {
    let data_module = r#"
[nzsl_version("1.0")]
module Modules.Data;

fn dummy() {}

[export]
[layout(std140)]
struct Data
{
    value: f32
}
"#;

    let block_module = r#"
[nzsl_version("1.0")]
module Modules.Block;

import Modules.Data;

[export]
[layout(std140)]
struct Block
{
    data: Data
}

struct Unused {}
"#;

    let shader = r#"
[nzsl_version("1.0")]
module;

import Modules.Block;

external
{
    [binding(0)] block: uniform[Block]
}

[entry(frag)]
fn main()
{
    let x = block.data.value;
}
"#;

    let options = Options {
        module_resolver: Some(resolver_with(&[data_module, block_module])),
        ..Options::default()
    };
    let module = sanitize_module(&parse(shader), &options);

    // dependencies come first, flattened at the root
    let identifiers: Vec<_> = module
        .imported_modules
        .iter()
        .map(|m| m.identifier.as_str())
        .collect();
    assert_eq!(identifiers, vec!["_Modules_Data", "_Modules_Block"]);

    // the inner module re-exports through its own alias
    expect_nzsl(
        &module,
        r#"
[nzsl_version("1.0")]
module _Modules_Block
{
    alias Data = _Modules_Data.Data;
"#,
    );
    expect_nzsl(
        &module,
        r#"
external
{
    [set(0), binding(0)] block: uniform[_Modules_Block.Block]
}
"#,
    );
}

#[test]
fn selective_import_with_rename() {
    let shader = r#"
[nzsl_version("1.0")]
module;

import Block as UniformBlock, GetDataValue from SimpleModule;

external
{
    [binding(0)] block: uniform[UniformBlock]
}
"#;

    let options = Options {
        module_resolver: Some(resolver_with(&[SIMPLE_MODULE])),
        ..Options::default()
    };
    let module = sanitize_module(&parse(shader), &options);

    expect_nzsl(&module, "alias UniformBlock = _SimpleModule.Block;");
    let printed = nzsl_backend_lang::write_module(&module);
    assert!(
        !printed.contains("alias InputData"),
        "selective import must not pull unrequested symbols:\n{printed}"
    );
}

#[test]
fn repeat_import_is_free() {
    let shader = r#"
[nzsl_version("1.0")]
module;

import SimpleModule;
import SimpleModule;

external
{
    [binding(0)] block: uniform[Block]
}
"#;

    let options = Options {
        module_resolver: Some(resolver_with(&[SIMPLE_MODULE])),
        ..Options::default()
    };
    let module = sanitize_module(&parse(shader), &options);
    assert_eq!(module.imported_modules.len(), 1);
}

#[test]
fn feature_mismatch_is_rejected() {
    let imported = r#"
[nzsl_version("1.0")]
[feature(primitive_externals)]
module Module;

external
{
    data: mat4[f32]
}
"#;

    let shader = r#"
[nzsl_version("1.0")]
module;

import * from Module;
"#;

    let options = Options {
        module_resolver: Some(resolver_with(&[imported])),
        ..Options::default()
    };
    let err = nzsl_sanitizer::sanitize(&parse(shader), &options).unwrap_err();
    assert_eq!(
        err.to_string(),
        "(5,1 -> 21): CModuleFeatureMismatch error: module Module requires feature primitive_externals"
    );
}

#[test]
fn feature_subset_is_accepted() {
    let imported = r#"
[nzsl_version("1.0")]
[feature(primitive_externals)]
module Module;

[export]
struct Data
{
    value: f32
}
"#;

    let shader = r#"
[nzsl_version("1.0")]
[feature(primitive_externals)]
module;

import * from Module;
"#;

    let options = Options {
        module_resolver: Some(resolver_with(&[imported])),
        ..Options::default()
    };
    sanitize_module(&parse(shader), &options);
}

#[test]
fn missing_resolver_is_reported() {
    let shader = "[nzsl_version(\"1.0\")]\nmodule;\nimport Missing;";
    let err = nzsl_sanitizer::sanitize(&parse(shader), &Options::default()).unwrap_err();
    assert!(err
        .to_string()
        .contains("CModuleResolverMissing error: no module resolver provided for import"));
}

#[test]
fn unknown_module_is_reported() {
    let shader = "[nzsl_version(\"1.0\")]\nmodule;\nimport Missing;";
    let options = Options {
        module_resolver: Some(resolver_with(&[])),
        ..Options::default()
    };
    let err = nzsl_sanitizer::sanitize(&parse(shader), &options).unwrap_err();
    assert!(err.to_string().contains("CModuleNotFound"));
}

#[test]
fn partial_sanitization_keeps_imports() {
    let shader = "[nzsl_version(\"1.0\")]\nmodule;\nimport Missing;";
    let options = Options {
        allow_partial_sanitization: true,
        ..Options::default()
    };
    let module = nzsl_sanitizer::sanitize(&parse(shader), &options).unwrap();
    let printed = nzsl_backend_lang::write_module(&module);
    assert!(printed.contains("import Missing;"), "output:\n{printed}");
}
