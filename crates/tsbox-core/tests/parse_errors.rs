//! Black-box parser checks: determinism/idempotence of accepted sources,
//! syntax-error shapes, and type-annotation stripping.

use tsbox_core::error::TsError;
use tsbox_core::parser::Parser;

#[test]
fn reparsing_accepted_source_yields_a_structurally_equal_tree() {
    let src = "let x = 1; function f(a, b) { return a + b; } f(x, 2);";
    let first = Parser::parse_script(src).unwrap();
    let second = Parser::parse_script(src).unwrap();
    assert_eq!(first, second);
}

#[test]
fn type_annotated_and_plain_sources_parse_identically() {
    let plain = "function add(a, b) { return a + b; }";
    let annotated = "function add(a: number, b: number): number { return a + b; }";
    let plain_ast = Parser::parse_script(plain).unwrap();
    let annotated_ast = Parser::parse_script(annotated).unwrap();
    assert_eq!(plain_ast, annotated_ast);
}

#[test]
fn variable_type_annotations_are_stripped() {
    let plain = "let x = 1;";
    let annotated = "let x: number = 1;";
    assert_eq!(Parser::parse_script(plain).unwrap(), Parser::parse_script(annotated).unwrap());
}

#[test]
fn unterminated_string_literal_is_a_parse_error() {
    let result = Parser::parse_script("let x = \"unterminated");
    assert!(matches!(result, Err(TsError::Parse { .. })));
}

#[test]
fn unexpected_token_is_a_parse_error() {
    let result = Parser::parse_script("let = 1;");
    assert!(matches!(result, Err(TsError::Parse { .. })));
}

#[test]
fn unbalanced_braces_are_a_parse_error() {
    let result = Parser::parse_script("function f() { return 1;");
    assert!(matches!(result, Err(TsError::Parse { .. })));
}

#[test]
fn module_source_accepts_top_level_import_and_export() {
    let program = Parser::parse_module("import { a } from \"m\"; export const b = a + 1;").unwrap();
    assert!(program.is_module);
}

#[test]
fn script_and_module_parsers_accept_the_same_import_syntax() {
    let as_script = Parser::parse_script("import { a } from \"m\";").unwrap();
    let as_module = Parser::parse_module("import { a } from \"m\";").unwrap();
    assert_eq!(as_script.body, as_module.body);
    assert!(!as_script.is_module);
    assert!(as_module.is_module);
}
