use nzsl_ast::visit::{walk_expression, AstVisitor};
use nzsl_ast::{Expression, ExpressionKind, Module, StatementKind};
use nzsl_sanitizer::{sanitize, Options};

fn parse(source: &str) -> Module {
    nzsl_parser::parse(source).expect("parse failed")
}

fn sanitize_source(source: &str) -> Module {
    sanitize(&parse(source), &Options::default()).expect("sanitize failed")
}

/// Fails on any remaining identifier expression or missing cached type.
struct CanonicalChecker;

impl AstVisitor for CanonicalChecker {
    fn visit_expression(&mut self, expr: &Expression) {
        assert!(
            !matches!(expr.kind, ExpressionKind::Identifier { .. }),
            "identifier expression survived sanitization: {expr:?}"
        );
        assert!(
            expr.cached_type.is_some(),
            "expression has no cached type: {expr:?}"
        );
        assert!(
            !expr
                .cached_type
                .as_ref()
                .is_some_and(|ty| ty.is_alias()),
            "alias type survived in a resolved expression type"
        );
        walk_expression(self, expr);
    }
}

const BASIC_SHADER: &str = r#"
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
    output.color = (data.value).xxxx;
    return output;
}
"#;

#[test]
fn canonical_after_sanitization() {
    let module = sanitize_source(BASIC_SHADER);
    let mut checker = CanonicalChecker;
    checker.visit_statement(&module.root);
}

#[test]
fn sanitization_is_idempotent() {
    let once = sanitize_source(BASIC_SHADER);
    let twice = sanitize(&once, &Options::default()).expect("re-sanitize failed");
    assert_eq!(once, twice);
}

#[test]
fn indices_are_stable_across_runs() {
    let first = sanitize_source(BASIC_SHADER);
    let second = sanitize_source(BASIC_SHADER);
    assert_eq!(first, second);
}

#[test]
fn unknown_identifier_is_reported() {
    let err = sanitize(
        &parse("[nzsl_version(\"1.0\")]\nmodule;\nfn f()\n{\nlet x = missing;\n}"),
        &Options::default(),
    )
    .unwrap_err();
    assert!(err
        .to_string()
        .contains("CUnknownIdentifier error: unknown identifier missing"));
}

#[test]
fn partial_sanitization_keeps_unknown_identifiers() {
    let module = sanitize(
        &parse("[nzsl_version(\"1.0\")]\nmodule;\nfn f()\n{\nlet x = missing + missing;\n}"),
        &Options {
            allow_partial_sanitization: true,
            ..Options::default()
        },
    )
    .expect("partial sanitize failed");

    struct FindIdentifier(bool);
    impl AstVisitor for FindIdentifier {
        fn visit_expression(&mut self, expr: &Expression) {
            if matches!(expr.kind, ExpressionKind::Identifier { .. }) {
                self.0 = true;
            }
            walk_expression(self, expr);
        }
    }
    let mut finder = FindIdentifier(false);
    finder.visit_statement(&module.root);
    assert!(finder.0, "unresolved identifier should survive partial mode");
}

#[test]
fn variable_type_mismatch() {
    let err = sanitize(
        &parse("[nzsl_version(\"1.0\")]\nmodule;\nfn f()\n{\nlet a: i32 = 42.66;\n}"),
        &Options::default(),
    )
    .unwrap_err();
    assert_eq!(
        err.to_string(),
        "(5,1 -> 19): CVarDeclarationTypeUnmatching error: initial expression type (f32) doesn't match specified type (i32)"
    );
}

#[test]
fn const_type_mismatch_points_at_expression() {
    let err = sanitize(
        &parse("[nzsl_version(\"1.0\")]\nmodule;\nconst Pi: f32 = 3;"),
        &Options::default(),
    )
    .unwrap_err();
    assert_eq!(
        err.to_string(),
        "(3, 17): CVarDeclarationTypeUnmatching error: initial expression type (i32) doesn't match specified type (f32)"
    );
}

#[test]
fn loop_control_outside_loop() {
    let err = sanitize(
        &parse("[nzsl_version(\"1.0\")]\nmodule;\nfn f()\n{\nbreak;\n}"),
        &Options::default(),
    )
    .unwrap_err();
    assert_eq!(
        err.to_string(),
        "(5,1 -> 5): CLoopControlOutsideOfLoop error: loop control instruction break found outside of loop"
    );

    let err = sanitize(
        &parse("[nzsl_version(\"1.0\")]\nmodule;\nfn f()\n{\ncontinue;\n}"),
        &Options::default(),
    )
    .unwrap_err();
    assert!(err.to_string().contains("loop control instruction continue"));
}

#[test]
fn break_inside_unrolled_loop_is_rejected() {
    let source = r#"
[nzsl_version("1.0")]
module;

fn f()
{
    [unroll]
    for i in 0 -> 10
    {
        if (i > 5)
            break;
    }
}
"#;
    let err = sanitize(&parse(source), &Options::default()).unwrap_err();
    assert!(err
        .to_string()
        .contains("CLoopControlOutsideOfLoop error: loop control instruction break"));
}

#[test]
fn break_inside_regular_loop_is_fine() {
    let source = r#"
[nzsl_version("1.0")]
module;

fn f()
{
    let i = 0;
    while (i < 10)
    {
        break;
    }
}
"#;
    sanitize(&parse(source), &Options::default()).expect("break in a loop is legal");
}

#[test]
fn unsized_array_requires_initializer() {
    let err = sanitize(
        &parse("[nzsl_version(\"1.0\")]\nmodule;\nfn f()\n{\nlet data: array[f32];\n}"),
        &Options::default(),
    )
    .unwrap_err();
    assert_eq!(
        err.to_string(),
        "(5,1 -> 21): CArrayLengthRequired error: array length is required in this context"
    );
}

#[test]
fn array_length_is_inferred_from_literal() {
    let module = sanitize_source(
        "[nzsl_version(\"1.0\")]\nmodule;\nfn f()\n{\nlet data = array[i32](1, 2, 3, 4, 5);\n}",
    );
    let func = match &module.root_statements()[0].kind {
        StatementKind::DeclareFunction(func) => func,
        other => panic!("expected function, got {other:?}"),
    };
    match &func.statements[0].kind {
        StatementKind::DeclareVariable { ty: Some(ty), .. } => {
            assert_eq!(
                ty.resolved().map(|t| t.to_string()).as_deref(),
                Some("array[i32, 5]")
            );
        }
        other => panic!("expected variable declaration, got {other:?}"),
    }
}

#[test]
fn sized_array_literal_mismatch() {
    let err = sanitize(
        &parse("[nzsl_version(\"1.0\")]\nmodule;\nconst data = array[f32, 4](1.0, 2.0, 3.0);"),
        &Options::default(),
    )
    .unwrap_err();
    assert_eq!(
        err.to_string(),
        "(3,14 -> 41): CCastComponentMismatch error: component count (3) doesn't match required component count (4)"
    );
}

#[test]
fn matrix_from_vector_component_mismatch() {
    let source = r#"
[nzsl_version("1.0")]
module;

fn main()
{
    let a: vec2[f32];
    let b: vec3[f32];
    let x = mat2[f32](a, b);
}
"#;
    let err = sanitize(&parse(source), &Options::default()).unwrap_err();
    assert!(err.to_string().contains(
        "CCastMatrixVectorComponentMismatch error: vector component count (3) doesn't match target matrix row count (2)"
    ));
}

#[test]
fn builtin_member_must_have_expected_type() {
    let source = r#"
[nzsl_version("1.0")]
module;

struct Input
{
    [builtin(position)] pos: f32
}
"#;
    let err = sanitize(&parse(source), &Options::default()).unwrap_err();
    assert!(err.to_string().contains(
        "CBuiltinUnexpectedType error: builtin position expected type vec4[f32], got type f32"
    ));
}

#[test]
fn unused_builtin_member_is_fine() {
    let source = r#"
[nzsl_version("1.0")]
module;

struct Input
{
    [builtin(position)] pos: vec4[f32]
}

fn helper(input: Input)
{
}

[entry(frag)]
fn main(input: Input)
{
    helper(input);
}
"#;
    sanitize(&parse(source), &Options::default()).expect("unused builtin member is legal");
}

#[test]
fn discard_reached_from_vertex_stage() {
    let source = r#"
[nzsl_version("1.0")]
module;

struct Input
{
    [location(0)] data: f32
}

fn clip(v: f32)
{
    if (v < 0.0)
        discard;
}

[entry(vert)]
fn main(input: Input)
{
    clip(input.data);
}
"#;
    let err = sanitize(&parse(source), &Options::default()).unwrap_err();
    assert_eq!(
        err.to_string(),
        "(13,9 -> 15): CInvalidStageDependency error: this is only valid in the fragment stage but this function gets called in the vertex stage"
    );
}

#[test]
fn vertex_builtin_read_from_fragment_stage() {
    let source = r#"
[nzsl_version("1.0")]
module;

struct Input
{
    [builtin(position)] pos: vec4[f32]
}

fn helper(input: Input) -> vec4[f32]
{
    return input.pos;
}

[entry(frag)]
fn main(input: Input)
{
    helper(input);
}
"#;
    let err = sanitize(&parse(source), &Options::default()).unwrap_err();
    assert!(err.to_string().contains(
        "CBuiltinUnsupportedStage error: builtin position is not available in fragment stage"
    ));
}

#[test]
fn duplicate_entry_stage_is_rejected() {
    let source = r#"
[nzsl_version("1.0")]
module;

[entry(frag)]
fn a()
{
}

[entry(frag)]
fn b()
{
}
"#;
    let err = sanitize(&parse(source), &Options::default()).unwrap_err();
    assert!(err
        .to_string()
        .contains("CEntryPointAlreadyDefined error: an entry point is already defined for the fragment stage"));
}

#[test]
fn external_type_restriction() {
    let source = r#"
[nzsl_version("1.0")]
module;

external
{
    [binding(0)] data: mat4[f32]
}
"#;
    let err = sanitize(&parse(source), &Options::default()).unwrap_err();
    assert!(err.to_string().contains(
        "CExtTypeNotAllowed error: external variable data has unauthorized type (mat4[f32])"
    ));
}

#[test]
fn primitive_externals_feature_lifts_restriction() {
    let source = r#"
[nzsl_version("1.0")]
[feature(primitive_externals)]
module;

external
{
    [binding(0)] data: mat4[f32]
}
"#;
    sanitize(&parse(source), &Options::default())
        .expect("primitive externals are allowed with the feature");
}

#[test]
fn intrinsic_type_check() {
    let source = r#"
[nzsl_version("1.0")]
module;

fn main()
{
    let a: vec2[f32];
    let b: vec2[f32];
    let c = cross(a, b);
}
"#;
    let err = sanitize(&parse(source), &Options::default()).unwrap_err();
    assert!(err
        .to_string()
        .contains("CIntrinsicExpectedType error: expected type vec3[f32] for parameter #0"));
}

#[test]
fn option_override_drives_const_if() {
    let source = r#"
[nzsl_version("1.0")]
module;

option UseInt: bool = false;

fn main()
{
    let value: f32;
    const if (UseInt)
    {
        value = 1.0;
    }
    else
    {
        value = 2.0;
    }
}
"#;
    let mut options = Options::default();
    options.option_values.insert(
        nzsl_ast::checksum::option_hash("UseInt"),
        nzsl_ast::ConstantValue::Bool(true),
    );
    let module = sanitize(&parse(source), &options).expect("sanitize failed");
    // the selected arm is inlined; the other disappears
    let func = match &module.root_statements()[1].kind {
        StatementKind::DeclareFunction(func) => func,
        other => panic!("expected function, got {other:?}"),
    };
    let flattened = format!("{:?}", func.statements);
    assert!(flattened.contains("Float32(1.0)"));
    assert!(!flattened.contains("Float32(2.0)"));
}

#[test]
fn option_type_mismatch() {
    let err = sanitize(
        &parse("[nzsl_version(\"1.0\")]\nmodule;\noption test: bool = 42;"),
        &Options::default(),
    )
    .unwrap_err();
    assert!(err.to_string().contains(
        "CVarDeclarationTypeUnmatching error: initial expression type (i32) doesn't match specified type (bool)"
    ));
}

#[test]
fn struct_member_cond_prunes() {
    let source = r#"
[nzsl_version("1.0")]
module;

option UseInt: bool = false;

struct Data
{
    [cond(UseInt)] a: i32,
    [cond(!UseInt)] b: f32
}
"#;
    let module = sanitize_source(source);
    let description = match &module.root_statements()[1].kind {
        StatementKind::DeclareStruct { description, .. } => description,
        other => panic!("expected struct, got {other:?}"),
    };
    assert_eq!(description.members.len(), 1);
    assert_eq!(description.members[0].name, "b");
}

#[test]
fn division_by_zero_in_const() {
    let err = sanitize(
        &parse("[nzsl_version(\"1.0\")]\nmodule;\nconst V = 21 * 2 / (9 - 3 * 3);"),
        &Options::default(),
    )
    .unwrap_err();
    assert_eq!(
        err.to_string(),
        "(3,11 -> 30): CIntegralDivisionByZero error: integral division by zero in expression (42 / 0)"
    );
}

#[test]
fn consts_fold_into_array_sizes() {
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
    let module = sanitize_source(source);
    let description = match &module.root_statements()[3].kind {
        StatementKind::DeclareStruct { description, .. } => description,
        other => panic!("expected struct, got {other:?}"),
    };
    let ty = description.members[0].ty.resolved().unwrap();
    assert!(matches!(
        ty,
        nzsl_ast::ExpressionType::Array {
            length: Some(5),
            ..
        }
    ));
}
