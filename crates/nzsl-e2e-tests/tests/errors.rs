//! End-to-end error reporting: exact codes, messages and spans.

mod common;

use common::parse;
use nzsl_sanitizer::Options;

fn compile_err(source: &str) -> String {
    let module = parse(source);
    nzsl_sanitizer::sanitize(&module, &Options::default())
        .expect_err("compilation should fail")
        .to_string()
}

fn parse_err(source: &str) -> String {
    nzsl_parser::parse(source)
        .expect_err("parsing should fail")
        .to_string()
}

#[test]
fn lexer_errors() {
    let tokenize_err = |source: &str| {
        nzsl_parser::tokenize(source)
            .expect_err("tokenizing should fail")
            .to_string()
    };
    assert_eq!(
        tokenize_err("1x42"),
        "(1,1 -> 4): LBadNumber error: bad number"
    );
    assert_eq!(
        tokenize_err("123456789876543210123456789"),
        "(1,1 -> 27): LNumberOutOfRange error: number is out of range"
    );
    assert_eq!(
        tokenize_err("\"Hello world"),
        "(1,1 -> 13): LUnfinishedString error: unfinished string"
    );
    assert_eq!(
        tokenize_err(r#""hello \p""#),
        "(1,1 -> 9): LUnrecognizedChar error: unrecognized character"
    );
    assert_eq!(
        tokenize_err("$"),
        "(1, 1): LUnrecognizedToken error: unrecognized token"
    );
}

#[test]
fn parser_errors() {
    assert_eq!(
        parse_err("nazara"),
        "(1,1 -> 6): PUnexpectedToken error: unexpected token Identifier"
    );
    assert_eq!(
        parse_err("module;"),
        "(1,1 -> 6): PMissingAttribute error: missing attribute nzsl_version"
    );
    assert_eq!(
        parse_err("[nzsl_version] module;"),
        "(1,2 -> 13): PAttributeMissingParameter error: attribute nzsl_version requires a parameter"
    );
    assert_eq!(
        parse_err("[nzsl_version(\"1.0\"), nzsl_version(\"1.0\")] module;"),
        "(1,23 -> 41): PAttributeMultipleUnique error: attribute nzsl_version can only be present once"
    );
    assert_eq!(
        parse_err("[nzsl_version(\"1.0\"), author(\"Lynix\"), author(\"Sir Lynix\")] module;"),
        "(1,40 -> 58): PAttributeMultipleUnique error: attribute author can only be present once"
    );
}

#[test]
fn unsized_arrays_are_declaration_only() {
    // the inference positions are fine
    let module = parse(
        r#"
[nzsl_version("1.0")]
module;

const data = array[f32](1.0, 2.0, 3.0);

fn main()
{
    let runtimeData = array[i32](1, 2, 3, 4, 5);
}
"#,
    );
    nzsl_sanitizer::sanitize(&module, &Options::default()).expect("inference positions are legal");

    // everything else requires a length
    assert_eq!(
        compile_err("[nzsl_version(\"1.0\")]\nmodule;\nfn main()\n{\nlet data: array[f32];\n}"),
        "(5,1 -> 21): CArrayLengthRequired error: array length is required in this context"
    );
    assert!(compile_err(
        "[nzsl_version(\"1.0\")]\nmodule;\nstruct Data\n{\ndata: array[bool]\n}"
    )
    .contains("CArrayLengthRequired"));
    assert!(compile_err(
        "[nzsl_version(\"1.0\")]\nmodule;\nfn test(param: array[f32])\n{\n}"
    )
    .contains("CArrayLengthRequired"));
}

#[test]
fn sized_array_literal_count_mismatch() {
    assert_eq!(
        compile_err("[nzsl_version(\"1.0\")]\nmodule;\nconst data = array[f32, 4](1.0, 2.0, 3.0);"),
        "(3,14 -> 41): CCastComponentMismatch error: component count (3) doesn't match required component count (4)"
    );
    assert!(compile_err(
        "[nzsl_version(\"1.0\")]\nmodule;\nconst data = array[f32, 2](1.0, 2.0, 3.0);"
    )
    .contains("component count (3) doesn't match required component count (2)"));
}

#[test]
fn division_and_modulo_by_zero() {
    assert_eq!(
        compile_err("[nzsl_version(\"1.0\")]\nmodule;\nconst V = 21 * 2 / (9 - 3 * 3);"),
        "(3,11 -> 30): CIntegralDivisionByZero error: integral division by zero in expression (42 / 0)"
    );
    assert!(compile_err(
        "[nzsl_version(\"1.0\")]\nmodule;\nconst V = vec4[i32](7, 6, 5, 4) / vec4[i32](3, 2, 1, 0);"
    )
    .contains(
        "CIntegralDivisionByZero error: integral division by zero in expression (vec4[i32](7, 6, 5, 4) / vec4[i32](3, 2, 1, 0))"
    ));
    assert_eq!(
        compile_err("[nzsl_version(\"1.0\")]\nmodule;\nconst V = 21 * 2 % (9 - 3 * 3);"),
        "(3,11 -> 30): CIntegralModuloByZero error: integral modulo by zero in expression (42 % 0)"
    );
    assert!(compile_err(
        "[nzsl_version(\"1.0\")]\nmodule;\nconst V = vec4[i32](7, 6, 5, 4) % vec4[i32](3, 2, 1, 0);"
    )
    .contains("CIntegralModuloByZero"));
}

#[test]
fn external_requires_opaque_types() {
    assert!(compile_err(
        "[nzsl_version(\"1.0\")]\nmodule;\nexternal\n{\n[binding(0)] data: mat4[f32]\n}"
    )
    .contains(
        "CExtTypeNotAllowed error: external variable data has unauthorized type (mat4[f32])"
    ));
}

#[test]
fn import_directive_rules() {
    assert_eq!(
        compile_err("[nzsl_version(\"1.0\")]\nmodule;\nimport *, * from Module;"),
        "(3, 11): CImportMultipleWildcard error: only one wildcard can be present in an import directive"
    );
    assert_eq!(
        compile_err("[nzsl_version(\"1.0\")]\nmodule;\nimport * as Y from Module;"),
        "(3,8 -> 13): CImportWildcardRename error: wildcard cannot be renamed"
    );
    assert_eq!(
        compile_err("[nzsl_version(\"1.0\")]\nmodule;\nimport X, X from Module;"),
        "(3, 11): CImportIdentifierAlreadyPresent error: X identifier was already imported"
    );
}

#[test]
fn loop_control_rules() {
    assert!(
        compile_err("[nzsl_version(\"1.0\")]\nmodule;\nfn main()\n{\nbreak;\n}").contains(
            "CLoopControlOutsideOfLoop error: loop control instruction break found outside of loop"
        )
    );
    assert!(
        compile_err("[nzsl_version(\"1.0\")]\nmodule;\nfn main()\n{\ncontinue;\n}").contains(
            "loop control instruction continue found outside of loop"
        )
    );

    let unrolled_break = r#"
[nzsl_version("1.0")]
module;

fn main()
{
    [unroll]
    for i in 0 -> 10
    {
        if (i > 5)
            break;
    }
}
"#;
    assert!(compile_err(unrolled_break).contains("loop control instruction break"));

    let unrolled_continue = r#"
[nzsl_version("1.0")]
module;

fn main()
{
    [unroll]
    for i in 0 -> 10
    {
        if (i == 5)
            continue;
    }
}
"#;
    assert!(compile_err(unrolled_continue).contains("loop control instruction continue"));
}

#[test]
fn nested_real_loop_reopens_control() {
    // a non-unrolled loop inside an unrolled one restores its own frame
    let source = r#"
[nzsl_version("1.0")]
module;

fn main()
{
    [unroll]
    for i in 0 -> 2
    {
        let j = 0;
        while (j < 3)
        {
            break;
        }
    }
}
"#;
    let module = parse(source);
    nzsl_sanitizer::sanitize(&module, &Options::default())
        .expect("break targeting an inner real loop is legal");
}

#[test]
fn intrinsic_parameter_types() {
    assert!(compile_err(
        "[nzsl_version(\"1.0\")]\nmodule;\nfn main()\n{\nlet a: vec2[f32];\nlet b = cross(a, a);\n}"
    )
    .contains("CIntrinsicExpectedType error: expected type vec3[f32] for parameter #0, got vec2[f32]"));
}

#[test]
fn option_and_variable_type_mismatches() {
    assert!(compile_err("[nzsl_version(\"1.0\")]\nmodule;\noption test: bool = 42;").contains(
        "CVarDeclarationTypeUnmatching error: initial expression type (i32) doesn't match specified type (bool)"
    ));
    assert!(
        compile_err("[nzsl_version(\"1.0\")]\nmodule;\nfn main()\n{\nlet a: i32 = 42.66;\n}")
            .contains(
                "initial expression type (f32) doesn't match specified type (i32)"
            )
    );
}
