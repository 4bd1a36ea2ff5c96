use nzsl_ast::Module;
use nzsl_backend_lang::write_module;
use nzsl_sanitizer::Options;

/// Parses NZSL source, panicking with the error rendering on failure.
#[allow(dead_code)]
pub fn parse(source: &str) -> Module {
    nzsl_parser::parse(source).unwrap_or_else(|err| panic!("parse failed: {err}"))
}

/// Sanitizes a module and checks the print → reparse → resanitize loop is
/// stable before handing the result back.
#[allow(dead_code)]
pub fn sanitize_module(module: &Module, options: &Options) -> Module {
    let sanitized = nzsl_sanitizer::sanitize(module, options)
        .unwrap_or_else(|err| panic!("sanitize failed: {err}"));

    let printed = write_module(&sanitized);
    let reparsed = nzsl_parser::parse(&printed)
        .unwrap_or_else(|err| panic!("printed output failed to parse: {err}\n---\n{printed}"));
    let resanitized = nzsl_sanitizer::sanitize(&reparsed, options).unwrap_or_else(|err| {
        panic!("printed output failed to sanitize: {err}\n---\n{printed}")
    });
    let reprinted = write_module(&resanitized);
    pretty_assertions::assert_eq!(
        printed,
        reprinted,
        "print/reparse/sanitize loop is unstable"
    );

    sanitized
}

/// Parses and sanitizes in one go.
#[allow(dead_code)]
pub fn sanitize_source(source: &str, options: &Options) -> Module {
    sanitize_module(&parse(source), options)
}

/// Asserts the module prints to NZSL containing `expected`, comparing
/// trimmed non-empty lines so indentation and blank lines don't matter.
#[allow(dead_code)]
pub fn expect_nzsl(module: &Module, expected: &str) {
    let output = write_module(module);
    assert_contains_lines(&output, expected);
}

#[allow(dead_code)]
pub fn assert_contains_lines(output: &str, expected: &str) {
    let output_lines = significant_lines(output);
    let expected_lines = significant_lines(expected);
    assert!(
        !expected_lines.is_empty(),
        "expected block must not be empty"
    );
    let found = output_lines
        .windows(expected_lines.len())
        .any(|window| window == expected_lines.as_slice());
    assert!(
        found,
        "expected lines not found in output\n--- expected ---\n{}\n--- output ---\n{output}",
        expected_lines.join("\n")
    );
}

fn significant_lines(text: &str) -> Vec<String> {
    text.lines()
        .map(|line| line.trim().to_owned())
        .filter(|line| !line.is_empty())
        .collect()
}
