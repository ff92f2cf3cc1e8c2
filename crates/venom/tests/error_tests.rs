//! Error-path tests: each error kind surfaces at the API boundary with the
//! expected stage attached.

use venom::{CompileErrorKind, VenomError, run_source};

fn compile_error_kind(src: &str) -> CompileErrorKind {
    match run_source(src) {
        Err(VenomError::Compile(e)) => e.kind,
        Err(VenomError::Runtime(e)) => panic!("expected compile error, got runtime: {e}"),
        Ok(out) => panic!("expected failure, program printed: {out:?}"),
    }
}

#[test]
fn test_parse_error_on_bad_syntax() {
    assert_eq!(
        compile_error_kind("def = 1"),
        CompileErrorKind::ParseError
    );
    assert_eq!(
        compile_error_kind("if x then"),
        CompileErrorKind::ParseError
    );
}

#[test]
fn test_semantic_violation_on_duplicate_class() {
    let src = "class A\nend\nclass A\nend";
    assert_eq!(
        compile_error_kind(src),
        CompileErrorKind::SemanticViolation
    );
}

#[test]
fn test_semantic_violation_on_undefined_symbol() {
    assert_eq!(
        compile_error_kind("print(missing)"),
        CompileErrorKind::SemanticViolation
    );
}

#[test]
fn test_semantic_violation_on_self_outside_class() {
    assert_eq!(
        compile_error_kind("x = self"),
        CompileErrorKind::SemanticViolation
    );
}

#[test]
fn test_semantic_violation_on_missing_import() {
    assert_eq!(
        compile_error_kind("import nowhere"),
        CompileErrorKind::SemanticViolation
    );
}

#[test]
fn test_type_violation_on_mixed_concat() {
    assert_eq!(
        compile_error_kind("print(\"a\" + 1)"),
        CompileErrorKind::TypeViolation
    );
}

#[test]
fn test_type_violation_on_bad_assignment() {
    let src = "x = 1\nx = \"str\"";
    assert_eq!(compile_error_kind(src), CompileErrorKind::TypeViolation);
}

#[test]
fn test_type_violation_on_non_invocable() {
    let src = "x = 1\nx()";
    assert_eq!(compile_error_kind(src), CompileErrorKind::TypeViolation);
}

#[test]
fn test_type_violation_on_bad_index_target() {
    let src = "x = 1\nprint(x[0])";
    assert_eq!(compile_error_kind(src), CompileErrorKind::TypeViolation);
}

#[test]
fn test_type_violation_on_override_signature_mismatch() {
    let src = "\
class A
  def m() :: int = return 1; end
end
class B <: A
  def m() :: string = return \"x\"; end
end
";
    assert_eq!(compile_error_kind(src), CompileErrorKind::TypeViolation);
}

#[test]
fn test_type_violation_on_wrong_argument_count() {
    let src = "\
def f(a::int) :: int = return a; end
f(1, 2)
";
    assert_eq!(compile_error_kind(src), CompileErrorKind::TypeViolation);
}

#[test]
fn test_type_violation_on_float_to_int_assignment() {
    // numeric widening is not a subtype relation
    let src = "x = 1\nx = 2.5";
    assert_eq!(compile_error_kind(src), CompileErrorKind::TypeViolation);
}

#[test]
fn test_runtime_error_is_fatal_and_reported() {
    let src = "\
l = [1]
print(l.get(5))
";
    match run_source(src) {
        Err(VenomError::Runtime(e)) => {
            assert!(e.message.contains("out of range"), "message: {}", e.message);
        }
        other => panic!("expected runtime error, got {other:?}"),
    }
}

#[test]
fn test_runtime_error_on_missing_map_key() {
    let src = "\
m = {1 : 2}
print(m[9])
";
    match run_source(src) {
        Err(VenomError::Runtime(e)) => {
            assert!(e.message.contains("key"), "message: {}", e.message);
        }
        other => panic!("expected runtime error, got {other:?}"),
    }
}

#[test]
fn test_runtime_error_on_division_by_zero() {
    let src = "\
z = 0
print(1 / z)
";
    match run_source(src) {
        Err(VenomError::Runtime(_)) => {}
        other => panic!("expected runtime error, got {other:?}"),
    }
}
