//! Binary module round trips, including through the filesystem resolver.

mod common;

use std::sync::Arc;

use common::{parse, sanitize_module};
use nzsl_ast::serialize::{deserialize_module, serialize_module};
use nzsl_ast::ModuleResolver;
use nzsl_parser::FilesystemModuleResolver;
use nzsl_sanitizer::Options;

const SHADER: &str = r#"
[nzsl_version("1.0")]
module;

struct InputData
{
    value: f32
}

external
{
    [set(0), binding(0)] data: uniform[InputData]
}

struct Output
{
    [location(0)] color: vec4[f32]
}

[entry(frag)]
fn main() -> Output
{
    let output: Output;
    output.color = (data.value * 2.0).xxxx;
    return output;
}
"#;

#[test]
fn binary_round_trip() {
    let module = sanitize_module(&parse(SHADER), &Options::default());
    let bytes = serialize_module(&module);
    let restored = deserialize_module(&bytes).expect("deserialization failed");
    assert_eq!(restored, module);
}

#[test]
fn binary_round_trip_with_imports() {
    let imported = r#"
[nzsl_version("1.0")]
module Simple;

[export]
struct Data
{
    value: f32
}
"#;
    let shader = r#"
[nzsl_version("1.0")]
module;

import Simple;

external
{
    [binding(0)] block: uniform[Data]
}
"#;
    let resolver = FilesystemModuleResolver::new();
    resolver.register_module_source(imported).unwrap();
    let options = Options {
        module_resolver: Some(Arc::new(resolver) as Arc<dyn ModuleResolver>),
        ..Options::default()
    };
    let module = sanitize_module(&parse(shader), &options);
    assert_eq!(module.imported_modules.len(), 1);

    let bytes = serialize_module(&module);
    let restored = deserialize_module(&bytes).expect("deserialization failed");
    assert_eq!(restored, module);
}

#[test]
fn serialized_module_resolves_from_disk() {
    let imported = r#"
[nzsl_version("1.0")]
module Precompiled;

[export]
struct Data
{
    value: f32
}
"#;
    // pre-compile the module to .nzslb in a temp directory
    let dir = std::env::temp_dir().join(format!("nzsl-e2e-nzslb-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let sanitized = sanitize_module(&parse(imported), &Options::default());
    std::fs::write(
        dir.join("Precompiled.nzslb"),
        serialize_module(&sanitized),
    )
    .unwrap();

    let shader = r#"
[nzsl_version("1.0")]
module;

import Precompiled;

external
{
    [binding(0)] block: uniform[Data]
}
"#;
    let mut resolver = FilesystemModuleResolver::new();
    resolver.register_directory(&dir);
    let options = Options {
        module_resolver: Some(Arc::new(resolver) as Arc<dyn ModuleResolver>),
        ..Options::default()
    };
    let module = sanitize_module(&parse(shader), &options);
    assert_eq!(module.imported_modules[0].identifier, "_Precompiled");

    std::fs::remove_dir_all(&dir).ok();
}

#[test]
fn deserialization_rejects_garbage() {
    assert!(deserialize_module(b"not a module").is_err());
    let mut bytes = serialize_module(&sanitize_module(&parse(SHADER), &Options::default()));
    bytes.truncate(bytes.len() / 3);
    assert!(deserialize_module(&bytes).is_err());
}

#[test]
fn sanitize_is_idempotent_end_to_end() {
    let options = Options::default();
    let once = sanitize_module(&parse(SHADER), &options);
    let twice = nzsl_sanitizer::sanitize(&once, &options).expect("re-sanitize failed");
    assert_eq!(once, twice);
}
