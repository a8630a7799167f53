//! PEG parser construction and execution through the language.

use squill::{Config, ErrorKind, ReplError, Value, run_source};

fn run(text: &str) -> Value {
    run_source("test.scm", text, Config::default()).unwrap()
}

#[test]
fn sum_of_numbers() {
    // a parser over repeated number tokens whose generator folds them
    let result = run(
        "(define p (parser (define nums (+ (regex \"[0-9]+\"))) \
                           (reduce nums (lambda (acc s) (+ acc (round s))) 0))) \
         (p \"1 2 3\")",
    );
    assert_eq!(result, Value::Int(6));
}

#[test]
fn parser_without_generator_returns_the_match() {
    assert_eq!(
        run("(define p (parser (* (regex \"[a-z]+\") \",\"))) (p \"a, b ,c\")"),
        Value::list(vec![Value::string("a"), Value::string("b"), Value::string("c")])
    );
}

#[test]
fn alternatives_take_first_success() {
    assert_eq!(
        run("(define p (parser (or \"select\" \"insert\" \"delete\"))) (p \"insert\")"),
        Value::string("insert")
    );
}

#[test]
fn keyword_sequences_skip_comments() {
    assert_eq!(
        run("(define p (parser '(\"select\" \"from\"))) (p \"select /* all */ from\")"),
        Value::list(vec![Value::string("select"), Value::string("from")])
    );
}

#[test]
fn defined_bindings_reach_the_generator() {
    let result = run(
        "(define kv (parser '((define k (regex \"[a-z]+\")) \"=\" (define v (regex \"[0-9]+\"))) \
                            (list k (round v)))) \
         (kv \"port = 8080\")",
    );
    assert_eq!(result, Value::list(vec![Value::string("port"), Value::Int(8080)]));
}

#[test]
fn parsers_compose_by_reference() {
    let result = run(
        "(define item (parser (regex \"[0-9]+\"))) \
         (define pair (parser '(\"[\" item \",\" item \"]\"))) \
         (pair \"[1, 2]\")",
    );
    let items = result.as_list().unwrap();
    assert_eq!(items.len(), 5);
    assert_eq!(items[1], Value::string("1"));
    assert_eq!(items[3], Value::string("2"));
}

#[test]
fn forward_references_resolve_on_first_use() {
    let result = run(
        "(define outer (parser '(\"(\" inner \")\"))) \
         (define inner (parser (regex \"[0-9]+\"))) \
         (outer \"(42)\")",
    );
    assert_eq!(result.as_list().unwrap()[1], Value::string("42"));
}

#[test]
fn parse_failure_is_an_error() {
    let err = run_source(
        "test.scm",
        "(define p (parser (+ (regex \"[0-9]+\")))) (p \"abc\")",
        Config::default(),
    )
    .unwrap_err();
    let ReplError::Eval(err) = err else { panic!("expected eval error") };
    assert_eq!(err.kind, ErrorKind::ParserFailed);
}

#[test]
fn optional_and_not() {
    assert_eq!(
        run("(define p (parser '((? \"not\") \"null\"))) (car (p \"null\"))"),
        Value::Nil
    );
    assert_eq!(
        run("(define p (parser (not (regex \"[a-z]+\") \"from\"))) (p \"users\")"),
        Value::string("users")
    );
}

#[test]
fn custom_skipper() {
    // a skipper that only eats dashes: spaces then break the parse
    assert_eq!(
        run("(define p (parser '(\"a\" \"b\") nil \"-+\")) (p \"a--b\")"),
        Value::list(vec![Value::string("a"), Value::string("b")])
    );
    assert!(run_source(
        "test.scm",
        "(define p (parser '(\"a\" \"b\") nil \"-+\")) (p \"a b\")",
        Config::default()
    )
    .is_err());
}

#[test]
fn generator_defines_pass_through_the_parse_scope() {
    // the parse scope refuses definitions, so a define in the generator
    // lands in the globals while the parser-bound name stays contained
    let result = run(
        "(define p (parser (define hit (regex \"[a-z]+\")) (define seen hit))) \
         (p \"ok\") \
         seen",
    );
    assert_eq!(result, Value::string("ok"));
}
