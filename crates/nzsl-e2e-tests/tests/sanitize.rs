//! Sanitization rewrites, checked through the NZSL writer.

mod common;

use common::{expect_nzsl, parse, sanitize_module};
use nzsl_sanitizer::Options;

#[test]
fn splitting_branches() {
    let source = r#"
[nzsl_version("1.0")]
module;

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
    if (data.value > 3.0)
        value = 3.0;
    else if (data.value > 2.0)
        value = 2.0;
    else if (data.value > 1.0)
        value = 1.0;
    else
        value = 0.0;
}
"#;

    let module = sanitize_module(
        &parse(source),
        &Options {
            split_multiple_branches: true,
            ..Options::default()
        },
    );

    expect_nzsl(
        &module,
        r#"
[entry(frag)]
fn main()
{
    let value: f32;
    if (data.value > 3.0)
    {
        value = 3.0;
    }
    else
    {
        if (data.value > 2.0)
        {
            value = 2.0;
        }
        else
        {
            if (data.value > 1.0)
            {
                value = 1.0;
            }
            else
            {
                value = 0.0;
            }
        }
    }
}
"#,
    );
}

#[test]
fn reducing_for_each_to_while() {
    let source = r#"
[nzsl_version("1.0")]
module;

struct inputStruct
{
    value: array[f32, 10]
}

external
{
    [set(0), binding(0)] data: uniform[inputStruct]
}

[entry(frag)]
fn main()
{
    let x = 0.0;
    for v in data.value
    {
        x += v;
    }
}
"#;

    let module = sanitize_module(
        &parse(source),
        &Options {
            reduce_loops_to_while: true,
            ..Options::default()
        },
    );

    expect_nzsl(
        &module,
        r#"
[entry(frag)]
fn main()
{
    let x: f32 = 0.0;
    let i: u32 = u32(0);
    while (i < u32(10))
    {
        let v: f32 = data.value[i];
        x += v;
        i += u32(1);
    }
}
"#,
    );
}

#[test]
fn reducing_numeric_for_to_while() {
    let source = r#"
[nzsl_version("1.0")]
module;

[entry(frag)]
fn main()
{
    let sum = 0;
    for k in 0 -> 10 : 2
    {
        sum += k;
    }
}
"#;

    let module = sanitize_module(
        &parse(source),
        &Options {
            reduce_loops_to_while: true,
            ..Options::default()
        },
    );

    expect_nzsl(
        &module,
        r#"
[entry(frag)]
fn main()
{
    let sum: i32 = 0;
    let k: i32 = 0;
    while (k < 10)
    {
        sum += k;
        k += 2;
    }
}
"#,
    );
}

#[test]
fn removing_matrix_casts() {
    let source = r#"
[nzsl_version("1.0")]
module;

fn testMat2ToMat3(input: mat2[f32]) -> mat3[f32]
{
    return mat3[f32](input);
}

fn testMat3ToMat3(input: mat3[f32]) -> mat3[f32]
{
    return mat3[f32](input);
}

fn testMat4ToMat2(input: mat4[f32]) -> mat2[f32]
{
    return mat2[f32](input);
}

fn testMat4ToMat3(input: mat4[f32]) -> mat3[f32]
{
    return mat3[f32](input);
}
"#;

    let module = sanitize_module(
        &parse(source),
        &Options {
            remove_matrix_cast: true,
            ..Options::default()
        },
    );

    // identity cast disappears
    expect_nzsl(
        &module,
        r#"
fn testMat3ToMat3(input: mat3[f32]) -> mat3[f32]
{
    return input;
}
"#,
    );

    // growth keeps columns padded with zeros and synthesizes the identity
    // column
    expect_nzsl(
        &module,
        r#"
fn testMat2ToMat3(input: mat2[f32]) -> mat3[f32]
{
    let temp: mat3[f32];
    temp[0] = vec3[f32](input[0], 0.0);
    temp[1] = vec3[f32](input[1], 0.0);
    temp[2] = vec3[f32](0.0, 0.0, 1.0);
    return temp;
}
"#,
    );

    // shrink truncates columns with swizzles
    expect_nzsl(
        &module,
        r#"
fn testMat4ToMat2(input: mat4[f32]) -> mat2[f32]
{
    let temp: mat2[f32];
    temp[0] = input[0].xy;
    temp[1] = input[1].xy;
    return temp;
}
"#,
    );

    expect_nzsl(
        &module,
        r#"
fn testMat4ToMat3(input: mat4[f32]) -> mat3[f32]
{
    let temp: mat3[f32];
    temp[0] = input[0].xyz;
    temp[1] = input[1].xyz;
    temp[2] = input[2].xyz;
    return temp;
}
"#,
    );
}

#[test]
fn removing_aliases() {
    let source = r#"
[nzsl_version("1.0")]
module;

struct inputStruct
{
    value: f32
}

alias Input = inputStruct;
alias In = Input;

external
{
    [set(0), binding(0)] data: uniform[In]
}
"#;

    let module = sanitize_module(
        &parse(source),
        &Options {
            remove_aliases: true,
            ..Options::default()
        },
    );

    expect_nzsl(
        &module,
        r#"
struct inputStruct
{
    value: f32
}

external
{
    [set(0), binding(0)] data: uniform[inputStruct]
}
"#,
    );

    let printed = nzsl_backend_lang::write_module(&module);
    assert!(!printed.contains("alias"), "output:\n{printed}");
}

#[test]
fn removing_compound_assignments() {
    let source = r#"
[nzsl_version("1.0")]
module;

[entry(frag)]
fn main()
{
    let x = 1.0;
    x += 2.0;
    x *= 3.0;
}
"#;

    let module = sanitize_module(
        &parse(source),
        &Options {
            remove_compound_assignments: true,
            ..Options::default()
        },
    );

    expect_nzsl(
        &module,
        r#"
[entry(frag)]
fn main()
{
    let x: f32 = 1.0;
    x = x + 2.0;
    x = x * 3.0;
}
"#,
    );
}

#[test]
fn removing_scalar_swizzles() {
    let source = r#"
[nzsl_version("1.0")]
module;

[entry(frag)]
fn main()
{
    let v = 2.0;
    let all = v.xxxx;
}
"#;

    let module = sanitize_module(
        &parse(source),
        &Options {
            remove_scalar_swizzling: true,
            ..Options::default()
        },
    );

    expect_nzsl(
        &module,
        r#"
[entry(frag)]
fn main()
{
    let v: f32 = 2.0;
    let all: vec4[f32] = vec4[f32](v, v, v, v);
}
"#,
    );
}

#[test]
fn unique_variable_names() {
    let source = r#"
[nzsl_version("1.0")]
module;

[entry(frag)]
fn main()
{
    {
        let value = 1.0;
    }

    {
        let value = 2.0;
    }
}
"#;

    let module = sanitize_module(
        &parse(source),
        &Options {
            make_variable_name_unique: true,
            ..Options::default()
        },
    );

    let printed = nzsl_backend_lang::write_module(&module);
    assert!(printed.contains("let value: f32 = 1.0;"), "output:\n{printed}");
    assert!(
        printed.contains("let value_2: f32 = 2.0;"),
        "output:\n{printed}"
    );
}

#[test]
fn sanitization_is_deterministic() {
    let source = r#"
[nzsl_version("1.0")]
module;

struct Data
{
    value: f32
}

external
{
    [set(0), binding(0)] data: uniform[Data]
}

[entry(frag)]
fn main()
{
    let x = data.value * 2.0;
}
"#;
    let first = sanitize_module(&parse(source), &Options::default());
    let second = sanitize_module(&parse(source), &Options::default());
    assert_eq!(first, second);
}
