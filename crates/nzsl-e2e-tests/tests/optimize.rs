//! Constant propagation and unused-declaration elimination.

mod common;

use common::{assert_contains_lines, parse, sanitize_module};
use nzsl_ast::ShaderStageFlags;
use nzsl_backend_lang::write_module;
use nzsl_opt::DependencyConfig;
use nzsl_sanitizer::Options;

fn propagate_and_expect(source: &str, expected: &str) {
    let module = sanitize_module(&parse(source), &Options::default());
    let propagated =
        nzsl_opt::propagate_constants(&module).unwrap_or_else(|err| panic!("propagation: {err}"));
    assert_contains_lines(&write_module(&propagated), expected);
}

fn eliminate_and_expect(source: &str, expected: &str) {
    let module = sanitize_module(&parse(source), &Options::default());
    let eliminated = nzsl_opt::eliminate_unused(
        &module,
        &DependencyConfig {
            used_shader_stages: ShaderStageFlags::ALL,
        },
    );
    assert_contains_lines(&write_module(&eliminated), expected);
}

#[test]
fn propagating_constants() {
    propagate_and_expect(
        r#"
[nzsl_version("1.0")]
module;

[entry(frag)]
fn main()
{
    let output = 8.0 * (7.0 + 5.0) * 2.0 / 4.0 - 6.0 % 7.0;
    let output2 = 8 * (7 + 5) * 2 / 4 - 6 % 7;
}
"#,
        r#"
[entry(frag)]
fn main()
{
    let output: f32 = 42.0;
    let output2: i32 = 42;
}
"#,
    );
}

#[test]
fn propagating_vector_constants() {
    propagate_and_expect(
        r#"
[nzsl_version("1.0")]
module;

[entry(frag)]
fn main()
{
    let output = vec4[f32](8.0, 2.0, -7.0, 0.0) * (7.0 + 5.0) * 2.0 / 4.0;
    let output2 = vec4[i32](8, 2, -7, 0) * (7 + 5) * 2 / 4;
}
"#,
        r#"
[entry(frag)]
fn main()
{
    let output: vec4[f32] = vec4[f32](48.0, 12.0, -42.0, 0.0);
    let output2: vec4[i32] = vec4[i32](48, 12, -42, 0);
}
"#,
    );
}

#[test]
fn eliminating_simple_branch() {
    let module = sanitize_module(
        &parse(
            r#"
[nzsl_version("1.0")]
module;

[entry(frag)]
fn main()
{
    if (5 + 3 < 2)
        discard;
}
"#,
        ),
        &Options::default(),
    );
    let propagated = nzsl_opt::propagate_constants(&module).unwrap();
    let printed = write_module(&propagated);
    assert!(!printed.contains("discard"), "output:\n{printed}");
    assert!(!printed.contains("if"), "output:\n{printed}");
}

#[test]
fn eliminating_multiple_branches() {
    propagate_and_expect(
        r#"
[nzsl_version("1.0")]
module;

[entry(frag)]
fn main()
{
    let output = 0.0;
    if (5 <= 3)
        output = 5.0;
    else if (4 <= 3)
        output = 4.0;
    else if (3 <= 3)
        output = 3.0;
    else if (2 <= 3)
        output = 2.0;
    else if (1 <= 3)
        output = 1.0;
    else
        output = 0.0;
}
"#,
        r#"
[entry(frag)]
fn main()
{
    let output: f32 = 0.0;
    output = 3.0;
}
"#,
    );
}

#[test]
fn eliminating_split_branches() {
    let module = sanitize_module(
        &parse(
            r#"
[nzsl_version("1.0")]
module;

[entry(frag)]
fn main()
{
    let output = 0.0;
    if (5 <= 3)
        output = 5.0;
    else if (3 <= 3)
        output = 3.0;
    else
        output = 0.0;
}
"#,
        ),
        &Options {
            split_multiple_branches: true,
            ..Options::default()
        },
    );
    let propagated = nzsl_opt::propagate_constants(&module).unwrap();
    assert_contains_lines(
        &write_module(&propagated),
        r#"
[entry(frag)]
fn main()
{
    let output: f32 = 0.0;
    output = 3.0;
}
"#,
    );
}

#[test]
fn scalar_swizzle_on_constant() {
    propagate_and_expect(
        r#"
[nzsl_version("1.0")]
module;

[entry(frag)]
fn main()
{
    let value = vec3[f32](3.0, 0.0, 1.0).z;
}
"#,
        "let value: f32 = 1.0;",
    );

    propagate_and_expect(
        r#"
[nzsl_version("1.0")]
module;

[entry(frag)]
fn main()
{
    let value = (42.0).xxxx;
}
"#,
        "let value: vec4[f32] = vec4[f32](42.0, 42.0, 42.0, 42.0);",
    );
}

#[test]
fn vector_swizzles_fold() {
    propagate_and_expect(
        r#"
[nzsl_version("1.0")]
module;

[entry(frag)]
fn main()
{
    let value = vec4[f32](3.0, 0.0, 1.0, 2.0).yzwx;
}
"#,
        "let value: vec4[f32] = vec4[f32](0.0, 1.0, 2.0, 3.0);",
    );

    propagate_and_expect(
        r#"
[nzsl_version("1.0")]
module;

[entry(frag)]
fn main()
{
    let value = vec4[f32](3.0, 0.0, 1.0, 2.0).zzxx;
}
"#,
        "let value: vec4[f32] = vec4[f32](1.0, 1.0, 3.0, 3.0);",
    );
}

#[test]
fn complex_swizzle_chain_folds() {
    propagate_and_expect(
        r#"
[nzsl_version("1.0")]
module;

[entry(frag)]
fn main()
{
    let value = vec4[f32](0.0, 1.0, 2.0, 3.0).xyz.yz.y.x.xxxx;
}
"#,
        "let value: vec4[f32] = vec4[f32](2.0, 2.0, 2.0, 2.0);",
    );
}

#[test]
fn swizzle_chain_composes_over_unknown_base() {
    propagate_and_expect(
        r#"
[nzsl_version("1.0")]
module;

struct inputStruct
{
    value: vec4[f32]
}

external
{
    [set(0), binding(0)] data: uniform[inputStruct]
}

[entry(frag)]
fn main()
{
    let value = data.value.xyz.yz.y.x.xxxx;
}
"#,
        "let value: vec4[f32] = data.value.zzzz;",
    );
}

#[test]
fn eliminating_unused_code() {
    eliminate_and_expect(
        r#"
[nzsl_version("1.0")]
module;

struct inputStruct
{
    value: vec4[f32]
}

struct notUsed
{
    value: vec4[f32]
}

external
{
    [set(0), binding(0)] unusedData: uniform[notUsed],
    [set(0), binding(1)] data: uniform[inputStruct]
}

fn unusedFunction() -> vec4[f32]
{
    return unusedData.value;
}

struct Output
{
    [location(0)] value: vec4[f32]
}

[entry(frag)]
fn main() -> Output
{
    let unusedvalue = unusedFunction();

    let output: Output;
    output.value = data.value;
    return output;
}
"#,
        r#"
struct inputStruct
{
    value: vec4[f32]
}

external
{
    [set(0), binding(1)] data: uniform[inputStruct]
}

struct Output
{
    [location(0)] value: vec4[f32]
}

[entry(frag)]
fn main() -> Output
{
    let output: Output;
    output.value = data.value;
    return output;
}
"#,
    );
}

#[test]
fn elimination_respects_stage_mask() {
    let module = sanitize_module(
        &parse(
            r#"
[nzsl_version("1.0")]
module;

struct VertOut
{
    [builtin(position)] pos: vec4[f32]
}

[entry(vert)]
fn vertMain() -> VertOut
{
    let out: VertOut;
    out.pos = vec4[f32](0.0, 0.0, 0.0, 1.0);
    return out;
}

[entry(frag)]
fn fragMain()
{
}
"#,
        ),
        &Options::default(),
    );
    let eliminated = nzsl_opt::eliminate_unused(
        &module,
        &DependencyConfig {
            used_shader_stages: ShaderStageFlags::FRAGMENT,
        },
    );
    let printed = write_module(&eliminated);
    assert!(printed.contains("fragMain"), "output:\n{printed}");
    assert!(!printed.contains("vertMain"), "output:\n{printed}");
    assert!(!printed.contains("struct VertOut"), "output:\n{printed}");
}

#[test]
fn propagation_reaches_a_fixpoint() {
    let module = sanitize_module(
        &parse(
            r#"
[nzsl_version("1.0")]
module;

[entry(frag)]
fn main()
{
    let a = 1.0 + 2.0;
    let b = a;
}
"#,
        ),
        &Options::default(),
    );
    let once = nzsl_opt::propagate_constants(&module).unwrap();
    let twice = nzsl_opt::propagate_constants(&once).unwrap();
    assert_eq!(once, twice);
}
