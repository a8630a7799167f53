//! End-to-end evaluation tests: read, optimize, evaluate.

use squill::{Config, ErrorKind, ReplError, Value, run_source};

fn run(text: &str) -> Value {
    run_source("test.scm", text, Config::default()).unwrap()
}

fn run_err(text: &str) -> squill::EvalError {
    match run_source("test.scm", text, Config::default()) {
        Ok(v) => panic!("expected an error, got {v}"),
        Err(ReplError::Eval(error)) => error,
        Err(other) => panic!("expected an eval error, got {other}"),
    }
}

#[test]
fn integer_addition() {
    assert_eq!(run("(+ 1 2 3)"), Value::Int(6));
}

#[test]
fn mixed_addition_is_float() {
    assert_eq!(run("(+ 1 2.5)"), Value::Float(3.5));
}

#[test]
fn nil_propagates_through_multiplication() {
    assert_eq!(run("(* 2 nil 3)"), Value::Nil);
}

#[test]
fn match_cons_binds_head() {
    assert_eq!(run("(match (list 1 2 3) (cons x rest) x)"), Value::Int(1));
}

#[test]
fn match_regex_binds_captures() {
    assert_eq!(
        run("(match \"foo=42\" (regex \"^(.*)=(.*)$\" _ k v) (list k v))"),
        Value::list(vec![Value::string("foo"), Value::string("42")])
    );
}

#[test]
fn set_assoc_replaces_in_place() {
    let result = run("(set_assoc (set_assoc '() \"a\" 1) \"a\" 2)");
    assert_eq!(run("(extract_assoc (set_assoc (set_assoc '() \"a\" 1) \"a\" 2) \"a\")"), Value::Int(2));
    assert_eq!(result.as_list().unwrap().len(), 2);
}

#[test]
fn strlike_scenarios() {
    assert_eq!(run("(strlike \"abcdef\" \"a%f\")"), Value::Bool(true));
    assert_eq!(run("(strlike \"abcdef\" \"a_f\")"), Value::Bool(false));
}

#[test]
fn if_with_and_without_else() {
    assert_eq!(run("(if true 1 2)"), Value::Int(1));
    assert_eq!(run("(if false 1 2)"), Value::Int(2));
    assert_eq!(run("(if false 1)"), Value::Nil);
    // zero and the empty string are falsy
    assert_eq!(run("(if 0 1 2)"), Value::Int(2));
    assert_eq!(run("(if \"\" 1 2)"), Value::Int(2));
}

#[test]
fn and_or_return_bools() {
    assert_eq!(run("(and 1 2)"), Value::Bool(true));
    assert_eq!(run("(and 1 nil 2)"), Value::Bool(false));
    assert_eq!(run("(or nil 3)"), Value::Bool(true));
    assert_eq!(run("(or)"), Value::Bool(false));
    assert_eq!(run("(and)"), Value::Bool(true));
}

#[test]
fn collate_returns_the_value_not_a_bool() {
    assert_eq!(run("(collate nil 0 \"\" 7 8)"), Value::Int(7));
    assert_eq!(run("(collate nil false)"), Value::Nil);
    assert_eq!(run("(collateNil nil 0)"), Value::Int(0));
    assert_eq!(run("(collateNil nil nil)"), Value::Nil);
}

#[test]
fn short_circuit_skips_side_effects() {
    // the unbound symbol after the short-circuit point must never evaluate
    assert_eq!(run("(or 1 boom)"), Value::Bool(true));
    assert_eq!(run("(and nil boom)"), Value::Bool(false));
}

#[test]
fn define_then_use() {
    assert_eq!(run("(define x 20) (+ x 2)"), Value::Int(22));
}

#[test]
fn lambda_application() {
    assert_eq!(run("((lambda (a b) (+ a b)) 3 4)"), Value::Int(7));
    // a single-symbol parameter binds the whole argument list
    assert_eq!(run("((lambda args (count args)) 1 2 3)"), Value::Int(3));
    // missing arguments bind nil
    assert_eq!(run("((lambda (a b) b) 1)"), Value::Nil);
}

#[test]
fn closures_capture_their_scope() {
    assert_eq!(
        run("(define add (lambda (x) (lambda (y) (+ x y)))) ((add 10) 5)"),
        Value::Int(15)
    );
}

#[test]
fn recursion_through_define() {
    assert_eq!(
        run("(define fact (lambda (n) (if (<= n 1) 1 (* n (fact (- n 1)))))) (fact 10)"),
        Value::Int(3628800)
    );
}

#[test]
fn deep_tail_recursion_runs_in_constant_stack() {
    assert_eq!(
        run("(define loop (lambda (n acc) (if (<= n 0) acc (loop (- n 1) (+ acc 1))))) (loop 200000 0)"),
        Value::Int(200000)
    );
}

#[test]
fn begin_scopes_definitions() {
    assert_eq!(run("(define x 1) (begin (define x 2) x)"), Value::Int(2));
    // outer binding is not touched when a define happens in a begin scope
    assert_eq!(run("(define x 1) (begin (define x (+ x 1)) nil) x"), Value::Int(1));
}

#[test]
fn quote_and_eval() {
    assert_eq!(run("(quote x)"), Value::symbol("x"));
    assert_eq!(run("(eval (quote (+ 1 2)))"), Value::Int(3));
    assert_eq!(run("'(1 2)"), Value::list(vec![Value::Int(1), Value::Int(2)]));
}

#[test]
fn dispatch_table_flat_pairs() {
    assert_eq!(run("(define t '(\"a\" 1 \"b\" 2)) (t \"b\")"), Value::Int(2));
    assert_eq!(run("(define t '(\"a\" 1 \"b\" 2)) (t \"zz\")"), Value::Nil);
    // odd-length tables have a default
    assert_eq!(run("(define t '(\"a\" 1 99)) (t \"zz\")"), Value::Int(99));
}

#[test]
fn dispatch_table_sublists() {
    assert_eq!(
        run("(define t '((\"a\" 1 2) (\"b\" 3))) (t \"b\")"),
        Value::list(vec![Value::string("b"), Value::Int(3)])
    );
}

#[test]
fn unbound_symbol_error() {
    assert_eq!(run_err("missing_thing").kind, ErrorKind::UnboundSymbol);
}

#[test]
fn arity_mismatch_error() {
    assert_eq!(run_err("(nth '(1 2))").kind, ErrorKind::ArityMismatch);
}

#[test]
fn user_error_carries_payload() {
    let err = run_err("(error \"boom\")");
    assert_eq!(err.kind, ErrorKind::UserError);
    assert_eq!(err.payload, Some(Value::string("boom")));
}

#[test]
fn errors_carry_source_locations() {
    let err = run_err("(begin\n  (car '()))");
    assert_eq!(err.kind, ErrorKind::IndexOutOfRange);
    assert!(err.trace.iter().any(|loc| loc.line == 2), "trace: {err}");
}

#[test]
fn list_builtins_compose() {
    assert_eq!(run("(count (filter '(1 2 3 4) (lambda (x) (> x 2))))"), Value::Int(2));
    assert_eq!(
        run("(map '(1 2 3) (lambda (x) (* x x)))"),
        Value::list(vec![Value::Int(1), Value::Int(4), Value::Int(9)])
    );
    assert_eq!(run("(reduce '(1 2 3 4) + 0)"), Value::Int(10));
    assert_eq!(run("(reduce '() +)"), Value::Nil);
    assert_eq!(run("(reduce '(5) +)"), Value::Int(5));
    assert_eq!(
        run("(mapIndex '(\"a\" \"b\") (lambda (x i) i))"),
        Value::list(vec![Value::Int(0), Value::Int(1)])
    );
}

#[test]
fn apply_spreads_a_list() {
    assert_eq!(run("(apply + '(1 2 3))"), Value::Int(6));
}

#[test]
fn produce_collects_until_nil() {
    assert_eq!(
        run("(define s (newsession)) (s \"i\" 0) \
             (produce (lambda () (begin \
               (s \"i\" (+ 1 (s \"i\"))) \
               (if (<= (s \"i\") 3) (s \"i\") nil))))"),
        Value::list(vec![Value::Int(1), Value::Int(2), Value::Int(3)])
    );
}

#[test]
fn produce_n_indexes() {
    assert_eq!(
        run("(produceN (lambda (i) (* i i)) 4)"),
        Value::list(vec![Value::Int(0), Value::Int(1), Value::Int(4), Value::Int(9)])
    );
}

#[test]
fn string_builtins() {
    assert_eq!(run("(concat \"a\" 1 nil \"b\")"), Value::string("a1b"));
    assert_eq!(run("(toUpper \"abc\")"), Value::string("ABC"));
    assert_eq!(run("(split \"a,b,c\" \",\")").as_list().unwrap().len(), 3);
    assert_eq!(run("(strlen \"héllo\")"), Value::Int(5));
    assert_eq!(run("(simplify \"  a   b  \")"), Value::string("a b"));
}

#[test]
fn date_round_trip_through_the_language() {
    assert_eq!(
        run("(format_date (parse_date \"2024-03-07 12:30:45\" \"%Y-%m-%d %T\") \"%Y-%m-%d %T\")"),
        Value::string("2024-03-07 12:30:45")
    );
}

#[test]
fn vector_dot() {
    assert_eq!(run("(dot (vector 1 2 3) (vector 4 5 6))"), Value::Float(32.0));
}

#[test]
fn stream_pipeline() {
    assert_eq!(
        run("(streamToString (zcat (gzip (streamString \"abc abc abc\"))))"),
        Value::string("abc abc abc")
    );
}

#[test]
fn time_returns_its_result() {
    assert_eq!(run("(time (+ 1 2))"), Value::Int(3));
}

#[test]
fn match_without_default_is_nil() {
    assert_eq!(run("(match 5 6 \"six\")"), Value::Nil);
    assert_eq!(run("(match 5 6 \"six\" \"other\")"), Value::string("other"));
}

#[test]
fn json_through_the_language() {
    assert_eq!(run("(json_encode '(1 \"a\" nil))"), Value::string("[1,\"a\",null]"));
    assert_eq!(
        run("(json_decode \"{\\\"a\\\": 1}\")"),
        Value::list(vec![Value::string("a"), Value::Int(1)])
    );
    assert_eq!(run("(json_encode_assoc '(\"a\" 1))"), Value::string("{\"a\":1}"));
}

#[test]
fn sessions_store_and_list() {
    assert_eq!(
        run("(define s (newsession)) (s \"k\" 41) (+ (s \"k\") 1)"),
        Value::Int(42)
    );
    assert_eq!(
        run("(define s (newsession)) (s \"a\" 1) (s \"b\" 2) (count (s))"),
        Value::Int(2)
    );
}

#[test]
fn once_runs_a_thunk_one_time() {
    assert_eq!(
        run("(define s (newsession)) (define f (lambda () (s \"n\" (+ 1 (collateNil (s \"n\") 0))))) (once f) (once f) (s \"n\")"),
        Value::Int(1)
    );
}
