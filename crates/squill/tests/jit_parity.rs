//! The JIT must be invisible: for every procedure it accepts, calling the
//! compiled entry gives exactly the interpreter's result, and anything it
//! rejects (or bails on at run time) falls back transparently.

use squill::{Config, Value, run_source, set_jit_enabled};

/// Runs the same program with the emitter on and off and checks agreement.
fn assert_parity(text: &str) -> Value {
    set_jit_enabled(false);
    let interpreted = run_source("test.scm", text, Config { debug: false, jit: false }).unwrap();
    set_jit_enabled(true);
    let jitted = run_source("test.scm", text, Config { debug: false, jit: true }).unwrap();
    assert!(
        interpreted.equal(&jitted),
        "{text}: interpreter {interpreted} != jit {jitted}"
    );
    jitted
}

#[test]
fn literal_bodies() {
    assert_eq!(assert_parity("(define f (lambda () 42)) (f)"), Value::Int(42));
    assert_eq!(assert_parity("(define f (lambda () nil)) (f)"), Value::Nil);
    assert_eq!(assert_parity("(define f (lambda () 2.5)) (f)"), Value::Float(2.5));
    assert_eq!(assert_parity("(define f (lambda () \"lit\")) (f)"), Value::string("lit"));
    assert_eq!(assert_parity("(define f (lambda () true)) (f)"), Value::Bool(true));
}

#[test]
fn argument_references() {
    assert_eq!(assert_parity("(define f (lambda (a b) b)) (f 1 2)"), Value::Int(2));
    // non-numeric arguments pass through the fallback path
    assert_eq!(
        assert_parity("(define f (lambda (a) a)) (f \"text\")"),
        Value::string("text")
    );
    assert_eq!(assert_parity("(define f (lambda (a) a)) (f 2.25)"), Value::Float(2.25));
    // missing arguments read as nil
    assert_eq!(assert_parity("(define f (lambda (a b) b)) (f 1)"), Value::Nil);
}

#[test]
fn integer_arithmetic() {
    assert_eq!(
        assert_parity("(define f (lambda (a b) (+ a (* b 2)))) (f 3 4)"),
        Value::Int(11)
    );
    assert_eq!(assert_parity("(define f (lambda (a) (- a))) (f 9)"), Value::Int(-9));
    assert_eq!(
        assert_parity("(define f (lambda (a b c) (- a b c))) (f 10 3 2)"),
        Value::Int(5)
    );
    assert_eq!(assert_parity("(define f (lambda (a) (/ a 3))) (f 9)"), Value::Int(3));
    // inexact division bails to the interpreter's float result
    assert_eq!(assert_parity("(define f (lambda (a) (/ a 2))) (f 7)"), Value::Float(3.5));
}

#[test]
fn comparisons() {
    assert_eq!(assert_parity("(define f (lambda (a b) (< a b))) (f 1 2)"), Value::Bool(true));
    assert_eq!(assert_parity("(define f (lambda (a b) (>= a b))) (f 1 2)"), Value::Bool(false));
    assert_eq!(assert_parity("(define f (lambda (a) (<= a 0))) (f 0)"), Value::Bool(true));
}

#[test]
fn tag_tests() {
    assert_eq!(assert_parity("(define f (lambda (a) (nil? a))) (f nil)"), Value::Bool(true));
    assert_eq!(assert_parity("(define f (lambda (a) (nil? a))) (f 0)"), Value::Bool(false));
    assert_eq!(assert_parity("(define f (lambda (a) (int? a))) (f 3)"), Value::Bool(true));
    assert_eq!(assert_parity("(define f (lambda (a) (int? a))) (f 3.5)"), Value::Bool(false));
    assert_eq!(assert_parity("(define f (lambda (a) (number? a))) (f 3.5)"), Value::Bool(true));
    assert_eq!(
        assert_parity("(define f (lambda (a) (number? a))) (f \"3\")"),
        Value::Bool(false)
    );
    // statically known subtrees fold inside the emitter
    assert_eq!(
        assert_parity("(define f (lambda (a b) (int? (+ a b)))) (f 1 2)"),
        Value::Bool(true)
    );
}

#[test]
fn runtime_type_surprises_fall_back() {
    // floats, nil propagation, and string coercion all disagree with the
    // integer fast path, so the compiled code must bail to the interpreter
    assert_eq!(
        assert_parity("(define f (lambda (a b) (+ a b))) (f 1 2.5)"),
        Value::Float(3.5)
    );
    assert_eq!(assert_parity("(define f (lambda (a b) (* a b))) (f 2 nil)"), Value::Nil);
    assert_eq!(assert_parity("(define f (lambda (a b) (+ a b))) (f \"1\" 2)"), Value::Int(3));
    assert_eq!(assert_parity("(define f (lambda (a) (/ a 0))) (f 1)"), Value::Float(f64::INFINITY));
}

#[test]
fn large_literals_stay_consistent() {
    // literals beyond 2^53 read as floats, so both paths must agree on the
    // float route end to end
    assert_parity(&format!("(define f (lambda (a) (+ a 1))) (f {})", i64::MAX));
    assert_parity(&format!("(define f (lambda (a b) (* a b))) (f {} 3)", i64::MAX / 2));
}

#[test]
fn unsupported_shapes_stay_interpreted() {
    assert_eq!(
        assert_parity("(define f (lambda (s) (concat s \"!\"))) (f \"hi\")"),
        Value::string("hi!")
    );
    assert_eq!(
        assert_parity("(define f (lambda (n) (if (> n 0) n (- n)))) (f -4)"),
        Value::Int(4)
    );
}

#[test]
fn jit_procedures_print_like_lambdas() {
    set_jit_enabled(true);
    let printed = run_source(
        "test.scm",
        "(concat \"\" (lambda (a) (+ a 1)))",
        Config { debug: false, jit: true },
    )
    .unwrap();
    let Value::String(text) = printed else { panic!("expected string") };
    assert!(text.starts_with("(lambda"), "printed: {text}");
}
