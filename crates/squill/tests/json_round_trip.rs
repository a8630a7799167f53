//! `json_decode(json_encode(v))` must be semantically equal to `v`, modulo
//! the collapse of whole floats into integers and of associations into
//! pairs lists.

use squill::{Config, Value, json_decode, json_encode, run_source};

fn run(text: &str) -> Value {
    run_source("test.scm", text, Config::default()).unwrap()
}

fn assert_round_trip(text: &str) {
    let value = run(text);
    let encoded = json_encode(&value).unwrap();
    let decoded = json_decode(&encoded).unwrap();
    assert!(value.equal(&decoded), "{text}: {value} -> {encoded} -> {decoded}");
}

#[test]
fn scalars() {
    for text in ["nil", "true", "false", "0", "-17", "2.5", "\"hello\"", "\"\"", "(quote sym)"] {
        assert_round_trip(text);
    }
}

#[test]
fn collections() {
    assert_round_trip("'(1 2 3)");
    assert_round_trip("'(1 \"two\" nil '(3 4))");
    assert_round_trip("(set_assoc '() \"a\" 1)");
    assert_round_trip("(zip '(1 2) '(\"a\" \"b\"))");
}

#[test]
fn dates_and_regexes() {
    assert_round_trip("(parse_date \"2024-01-02\" \"%Y-%m-%d\")");
    assert_round_trip("(now)");
}

#[test]
fn binary_strings() {
    assert_round_trip("(hex2bin \"00ff10\")");
    assert_round_trip("(randomBytes 32)");
}

#[test]
fn lambdas_round_trip_applicably() {
    let value = run("(lambda (a b) (+ a b))");
    let encoded = json_encode(&value).unwrap();
    let decoded = json_decode(&encoded).unwrap();
    // the reconstructed procedure is bound to a fresh global scope but must
    // keep params, body shape, and slot count
    assert!(
        matches!(&decoded, Value::Proc(_) | Value::Jit(_)),
        "decoded {decoded} is not a procedure"
    );
    let applied = {
        let env = squill::Env::new_global();
        squill::call_value(&decoded, &[Value::Int(20), Value::Int(22)], &env).unwrap()
    };
    assert_eq!(applied, Value::Int(42));
}

#[test]
fn builtins_encode_by_name_and_revive_as_symbols() {
    let plus = run("+");
    let encoded = json_encode(&plus).unwrap();
    assert_eq!(encoded, "{\"symbol\":\"+\"}");
    let decoded = json_decode(&encoded).unwrap();
    assert_eq!(decoded, Value::symbol("+"));
}

#[test]
fn promoted_dicts_collapse_to_pairs() {
    let value = run(
        "(reduce '(0 1 2 3 4 5 6 7 8 9 10 11 12 13 14 15 16 17) \
                 (lambda (acc i) (set_assoc acc i (* i i))) '())",
    );
    assert!(matches!(value, Value::FastDict(_)));
    let decoded = json_decode(&json_encode(&value).unwrap()).unwrap();
    assert!(value.equal(&decoded));
}

#[test]
fn integer_float_collapse_is_the_allowed_exception() {
    let encoded = json_encode(&Value::Float(4.0)).unwrap();
    let decoded = json_decode(&encoded).unwrap();
    // 4.0 encodes as a JSON number; the decode may surface it as either
    // numeric kind but it must stay numerically equal
    assert!(decoded.equal(&Value::Float(4.0)));
}
