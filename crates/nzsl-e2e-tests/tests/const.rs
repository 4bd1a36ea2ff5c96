//! Compile-time constants, `const if` selection, and `[unroll]` expansion.

mod common;

use common::{expect_nzsl, parse, sanitize_module, sanitize_source};
use nzsl_ast::checksum::option_hash;
use nzsl_ast::ConstantValue;
use nzsl_sanitizer::Options;

#[test]
fn consts_feed_array_sizes() {
    let source = r#"
[nzsl_version("1.0")]
module;

const LightCount = 3;
const LightCapacity = LightCount + 2;

[layout(std140)]
struct Light
{
    color: vec4[f32]
}

[layout(std140)]
struct LightData
{
    lights: array[Light, LightCapacity]
}
"#;

    let module = sanitize_source(source, &Options::default());
    expect_nzsl(
        &module,
        r#"
[layout(std140)]
struct LightData
{
    lights: array[Light, 5]
}
"#,
    );
}

#[test]
fn const_if_selects_by_option() {
    let source = r#"
[nzsl_version("1.0")]
module;

option UseInt: bool = false;

[cond(UseInt)]
struct inputStruct
{
    value: i32
}

[cond(!UseInt)]
struct inputStruct
{
    value: f32
}

external
{
    [set(0), binding(0)] data: uniform[inputStruct]
}

[entry(frag)]
fn main()
{
    let value: f32;

    const if (UseInt)
    {
        value = f32(data.value);
    }
    else
    {
        value = data.value;
    }
}
"#;

    let module = parse(source);

    // enabling the option keeps the i32 struct and the cast arm
    let mut enabled = Options::default();
    enabled
        .option_values
        .insert(option_hash("UseInt"), ConstantValue::Bool(true));
    let sanitized = sanitize_module(&module, &enabled);
    expect_nzsl(
        &sanitized,
        r#"
struct inputStruct
{
    value: i32
}
"#,
    );
    expect_nzsl(
        &sanitized,
        r#"
[entry(frag)]
fn main()
{
    let value: f32;
    value = f32(data.value);
}
"#,
    );

    // disabling it keeps the f32 struct and the direct arm
    let mut disabled = Options::default();
    disabled
        .option_values
        .insert(option_hash("UseInt"), ConstantValue::Bool(false));
    let sanitized = sanitize_module(&module, &disabled);
    expect_nzsl(
        &sanitized,
        r#"
struct inputStruct
{
    value: f32
}
"#,
    );
    expect_nzsl(
        &sanitized,
        r#"
[entry(frag)]
fn main()
{
    let value: f32;
    value = data.value;
}
"#,
    );
}

#[test]
fn unroll_numeric_for() {
    let source = r#"
[nzsl_version("1.0")]
module;

const LightCount = 3;

[layout(std140)]
struct Light
{
    color: vec4[f32]
}

[layout(std140)]
struct LightData
{
    lights: array[Light, LightCount]
}

external
{
    [set(0), binding(0)] data: uniform[LightData]
}

[entry(frag)]
fn main()
{
    let color = (0.0).xxxx;

    [unroll]
    for i in 0 -> 10 : 2
    {
        color += data.lights[i].color;
    }
}
"#;

    let module = sanitize_source(source, &Options::default());
    expect_nzsl(
        &module,
        r#"
[entry(frag)]
fn main()
{
    let color: vec4[f32] = 0.0.xxxx;
    {
        let i: i32 = 0;
        color += data.lights[i].color;
    }
    {
        let i: i32 = 2;
        color += data.lights[i].color;
    }
    {
        let i: i32 = 4;
        color += data.lights[i].color;
    }
    {
        let i: i32 = 6;
        color += data.lights[i].color;
    }
    {
        let i: i32 = 8;
        color += data.lights[i].color;
    }
}
"#,
    );
}

#[test]
fn unroll_for_each() {
    let source = r#"
[nzsl_version("1.0")]
module;

const LightCount = 3;

[layout(std140)]
struct Light
{
    color: vec4[f32]
}

[layout(std140)]
struct LightData
{
    lights: array[Light, LightCount]
}

external
{
    [set(0), binding(0)] data: uniform[LightData]
}

[entry(frag)]
fn main()
{
    let color = (0.0).xxxx;

    [unroll]
    for light in data.lights
    {
        color += light.color;
    }
}
"#;

    let module = sanitize_source(source, &Options::default());
    expect_nzsl(
        &module,
        r#"
[entry(frag)]
fn main()
{
    let color: vec4[f32] = 0.0.xxxx;
    {
        let light: Light = data.lights[u32(0)];
        color += light.color;
    }
    {
        let light: Light = data.lights[u32(1)];
        color += light.color;
    }
    {
        let light: Light = data.lights[u32(2)];
        color += light.color;
    }
}
"#,
    );
}

#[test]
fn const_declarations_can_be_dropped() {
    let source = r#"
[nzsl_version("1.0")]
module;

const Scale = 2.0;

[entry(frag)]
fn main()
{
    let x = Scale;
}
"#;

    let module = sanitize_source(
        source,
        &Options {
            remove_const_declaration: true,
            ..Options::default()
        },
    );
    let printed = nzsl_backend_lang::write_module(&module);
    assert!(!printed.contains("const Scale"), "output:\n{printed}");
    assert!(printed.contains("let x: f32 = 2.0;"), "output:\n{printed}");
}

#[test]
fn option_declarations_can_be_dropped() {
    let source = r#"
[nzsl_version("1.0")]
module;

option Enable: bool = true;

[cond(Enable)]
struct Data
{
    value: f32
}

[cond(!Enable)]
struct Fallback
{
    value: i32
}
"#;

    let module = sanitize_source(
        source,
        &Options {
            remove_option_declaration: true,
            ..Options::default()
        },
    );
    let printed = nzsl_backend_lang::write_module(&module);
    assert!(!printed.contains("option Enable"), "output:\n{printed}");
    assert!(printed.contains("struct Data"), "output:\n{printed}");
    assert!(!printed.contains("struct Fallback"), "output:\n{printed}");
}
