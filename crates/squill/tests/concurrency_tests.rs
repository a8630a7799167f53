//! Sessions, deferred callbacks, and cooperative cancellation through the
//! language surface.

use squill::{Config, Value, run_source};

fn run(text: &str) -> Value {
    run_source("test.scm", text, Config::default()).unwrap()
}

#[test]
fn sleep_returns_nil() {
    assert_eq!(run("(sleep 0.01)"), Value::Nil);
}

#[test]
fn context_check_passes_without_cancellation() {
    assert_eq!(run("(context \"check\")"), Value::Nil);
    // the context is also a callable value
    assert_eq!(run("((context) \"check\")"), Value::Nil);
}

#[test]
fn mutex_serializes_and_returns_the_thunk_result() {
    assert_eq!(run("(mutex \"m\" (lambda () 42))"), Value::Int(42));
    // reentrant use of a different name nests fine
    assert_eq!(
        run("(mutex \"outer\" (lambda () (mutex \"inner\" (lambda () 7))))"),
        Value::Int(7)
    );
}

#[test]
fn set_timeout_returns_a_cancellable_token() {
    let token = run("(setTimeout (lambda () 1) 50)");
    assert!(matches!(token, Value::Int(t) if t > 0));
    assert_eq!(run("(clearTimeout (setTimeout (lambda () 1) 50))"), Value::Bool(true));
}

#[test]
fn sessions_share_between_evaluations_of_one_program() {
    // two separate forms see the same session through the global binding
    assert_eq!(
        run("(define s (newsession)) (s \"hits\" 1) (s \"hits\" (+ 1 (s \"hits\"))) (s \"hits\")"),
        Value::Int(2)
    );
}

#[test]
fn once_failures_cache_nil() {
    assert_eq!(
        run("(define f (lambda () (error \"nope\"))) (once f) (once f)"),
        Value::Nil
    );
}
