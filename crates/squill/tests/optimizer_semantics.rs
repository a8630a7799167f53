//! The optimizer must be semantics-preserving: for every closed expression,
//! evaluating the optimized tree gives the same value as evaluating the raw
//! tree.

use squill::{Env, Value, eval, optimize, read_one};

/// Evaluates `text` twice, raw and optimized, and checks agreement.
fn assert_preserved(text: &str) -> Value {
    let form = read_one("test.scm", text).unwrap();
    let raw = eval(&form, &Env::new_global()).unwrap();
    let optimized = optimize(&form, false);
    let opt = eval(&optimized, &Env::new_global()).unwrap();
    assert!(raw.equal(&opt), "{text}: raw {raw} != optimized {opt}");
    // and once more with debug (source info kept)
    let debug = optimize(&form, true);
    let dbg = eval(&debug, &Env::new_global()).unwrap();
    assert!(raw.equal(&dbg), "{text}: raw {raw} != debug {dbg}");
    raw
}

#[test]
fn arithmetic_and_folding() {
    assert_preserved("(+ 1 2 3)");
    assert_preserved("(* 2 (+ 3 4))");
    assert_preserved("(- 10 2.5)");
    assert_preserved("(/ 7 2)");
    assert_preserved("(min 3 1 2)");
}

#[test]
fn begin_inlining() {
    assert_preserved("(begin (define x 5) (+ x 1))");
    assert_preserved("(begin (define x 5) (+ x x))");
    assert_preserved("(begin (define x 5) (define y 6) (+ x y))");
    assert_preserved("(begin 1 2 3)");
    assert_preserved("(begin (define unused 9) 42)");
    // begins in discarded and in consumed positions
    assert_preserved("(begin (begin 1 2) 3)");
    assert_preserved("(begin (collate (begin 1 7) 9) 42)");
    assert_preserved("(if (begin 1 7) \"yes\" \"no\")");
}

#[test]
fn lambda_numbering() {
    assert_preserved("((lambda (a b) (+ a b)) 3 4)");
    assert_preserved("((lambda (a) (* a a)) 9)");
    assert_preserved("((lambda args (count args)) 1 2 3)");
    assert_preserved("((lambda () 42))");
}

#[test]
fn closures_survive_optimization() {
    assert_preserved("(((lambda (x) (lambda (y) (+ x y))) 10) 5)");
    assert_preserved("(begin (define make (lambda (n) (lambda () n))) ((make 7)))");
}

#[test]
fn match_forms() {
    assert_preserved("(match (list 1 2) (cons h t) h)");
    assert_preserved("(match \"a=b\" (regex \"(.)=(.)\" _ k v) (concat v k))");
    assert_preserved("(match 5 (number? n) (+ n 1) \"no\")");
    assert_preserved("((lambda (x) (match x (cons x rest) x x)) (list 9 8))");
}

#[test]
fn quoted_data_is_untouched() {
    assert_preserved("(quote (+ 1 2))");
    assert_preserved("'(1 2 3)");
    assert_preserved("(count '(1 2 3))");
}

#[test]
fn serialization_artifacts_normalize() {
    // (var i) and (unquote "s") come from serialized code
    let form = read_one("test.scm", "((lambda ((var 0)) (+ (var 0) 1) 1) 41)").unwrap();
    let optimized = optimize(&form, false);
    let result = eval(&optimized, &Env::new_global()).unwrap();
    assert_eq!(result, Value::Int(42));

    let form = read_one("test.scm", "(begin (define (unquote \"odd name\") 5) 7)").unwrap();
    let optimized = optimize(&form, false);
    assert_eq!(eval(&optimized, &Env::new_global()).unwrap(), Value::Int(7));
}

#[test]
fn impure_calls_never_fold() {
    let form = read_one("test.scm", "(sql_rand)").unwrap();
    let optimized = optimize(&form, false);
    // still a call, not a folded constant
    assert!(optimized.as_list().is_some());
}

#[test]
fn regex_patterns_precompile_at_call_sites() {
    let form = read_one("test.scm", "(regexp_test s \"^a+$\")").unwrap();
    let optimized = optimize(&form, false);
    let items = optimized.as_list().unwrap();
    assert!(matches!(items[2].peel_source(), Value::Regex(_)));
}

#[test]
fn strings_and_conditions() {
    assert_preserved("(if (strlike \"abc\" \"a%\") \"yes\" \"no\")");
    assert_preserved("(concat \"a\" (toUpper \"b\"))");
    assert_preserved("(collate nil (concat \"x\" \"y\"))");
}
