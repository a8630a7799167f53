//! JSON codec for runtime values.
//!
//! `serde_json::Value` is the interchange tree: sessions store it to cross
//! thread boundaries and `json_encode`/`json_decode` expose it to programs.
//! The mapping is symmetric enough that `decode(encode(v))` is semantically
//! equal to `v`, modulo the collapse of whole floats into integers and of
//! associations into pairs lists.
//!
//! Special forms on the wire:
//! - `{"symbol": name}`: a symbol (native functions encode as their
//!   registry name, unknown natives as `"?"`)
//! - `{"bytes": base64}`: a binary-unsafe string
//! - `{"date": seconds}`: a date
//! - `{"var": i}`: a positional slot reference (serialization artifact)
//! - `{"regex": pattern}`: a compiled regex
//! - `[{"symbol": "lambda"}, params, body, numVars?]`: a procedure,
//!   reconstructed bound to a fresh global environment
//!
//! Any other object decodes as an association pairs list, which is what
//! makes `json_decode` useful against external JSON.

use std::rc::Rc;

use serde_json::{Map, Number, json};

use crate::{
    builtins::strings::{base64_decode_bytes, base64_encode_bytes, binary_bytes, binary_string},
    decl,
    env::Env,
    error::{ErrorKind, EvalError, EvalResult},
    value::{CompiledRegex, Proc, Value},
};

/// True when a string cannot ride in a JSON string without losing data
/// under the one-char-per-byte binary convention.
fn is_binary_unsafe(text: &str) -> bool {
    text.chars().any(|c| (c as u32) < 0x20 && !matches!(c, '\n' | '\r' | '\t'))
}

/// Encodes a value to the interchange tree.
pub fn to_json(value: &Value) -> EvalResult<serde_json::Value> {
    Ok(match value.peel_source() {
        Value::Nil => serde_json::Value::Null,
        Value::Bool(b) => json!(b),
        Value::Int(i) => json!(i),
        Value::Float(f) => Number::from_f64(*f).map_or(serde_json::Value::Null, serde_json::Value::Number),
        Value::Date(secs) => json!({ "date": secs }),
        Value::String(s) => {
            if is_binary_unsafe(s) {
                json!({ "bytes": base64_encode_bytes(&binary_bytes(s)) })
            } else {
                json!(&**s)
            }
        }
        Value::Symbol(s) => json!({ "symbol": &**s }),
        Value::List(items) => {
            let encoded = items.iter().map(to_json).collect::<EvalResult<Vec<_>>>()?;
            serde_json::Value::Array(encoded)
        }
        Value::Vector(items) => serde_json::Value::Array(
            items
                .iter()
                .map(|f| Number::from_f64(*f).map_or(serde_json::Value::Null, serde_json::Value::Number))
                .collect(),
        ),
        Value::FastDict(dict) => {
            let encoded = dict.borrow().pairs().iter().map(to_json).collect::<EvalResult<Vec<_>>>()?;
            serde_json::Value::Array(encoded)
        }
        Value::Proc(proc) => encode_proc(proc)?,
        Value::Jit(jit) => encode_proc(jit.proc())?,
        Value::Func(f) => json!({ "symbol": decl::name_of_native(*f).unwrap_or("?") }),
        Value::FuncEnv(f) => json!({ "symbol": decl::name_of_env_native(*f).unwrap_or("?") }),
        Value::NthLocalVar(i) => json!({ "var": i }),
        Value::Regex(re) => json!({ "regex": &*re.pattern }),
        Value::Parser(_) | Value::Opaque(_) => json!({ "symbol": "?" }),
        Value::SourceInfo(_) => unreachable!("peel_source strips all SourceInfo wrappers"),
    })
}

fn encode_proc(proc: &Rc<Proc>) -> EvalResult<serde_json::Value> {
    let mut parts = vec![json!({ "symbol": "lambda" }), to_json(&proc.params)?, to_json(&proc.body)?];
    if proc.num_positional_vars > 0 {
        parts.push(json!(proc.num_positional_vars));
    }
    Ok(serde_json::Value::Array(parts))
}

/// Canonical JSON text of a value.
pub fn encode(value: &Value) -> EvalResult<String> {
    serde_json::to_string(&to_json(value)?).map_err(|e| EvalError::internal(format!("json encoding failed: {e}")))
}

/// Encodes an association as a JSON object keyed by the stringified keys,
/// rather than as a pairs array.
pub fn encode_assoc(value: &Value) -> EvalResult<String> {
    let pairs = crate::builtins::dicts::assoc_pairs(value)?;
    let mut object = Map::with_capacity(pairs.len() / 2);
    let mut i = 0;
    while i + 1 < pairs.len() {
        object.insert(pairs[i].coerce_string(), to_json(&pairs[i + 1])?);
        i += 2;
    }
    serde_json::to_string(&serde_json::Value::Object(object))
        .map_err(|e| EvalError::internal(format!("json encoding failed: {e}")))
}

/// Decodes the interchange tree back into a value. Procedures bind to a
/// fresh global environment; builtins keep resolving through the registry.
pub fn from_json(tree: &serde_json::Value) -> Value {
    match tree {
        serde_json::Value::Null => Value::Nil,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map_or_else(|| Value::Float(n.as_f64().unwrap_or(0.0)), Value::Int),
        serde_json::Value::String(s) => Value::string(s),
        serde_json::Value::Array(items) => {
            if is_lambda_marker(items.first()) {
                return decode_proc(items);
            }
            Value::list(items.iter().map(from_json).collect())
        }
        serde_json::Value::Object(object) => decode_object(object),
    }
}

fn is_lambda_marker(v: Option<&serde_json::Value>) -> bool {
    v.and_then(|v| v.get("symbol")).and_then(serde_json::Value::as_str) == Some("lambda")
}

fn decode_proc(items: &[serde_json::Value]) -> Value {
    let params = items.get(1).map_or(Value::Nil, from_json);
    let body = items.get(2).map_or(Value::Nil, from_json);
    let num_positional_vars = items.get(3).and_then(serde_json::Value::as_u64).unwrap_or(0) as u32;
    Value::Proc(Rc::new(Proc {
        params,
        body,
        env: Env::new_global(),
        num_positional_vars,
    }))
}

fn decode_object(object: &Map<String, serde_json::Value>) -> Value {
    if object.len() == 1 {
        if let Some(name) = object.get("symbol").and_then(serde_json::Value::as_str) {
            return Value::symbol(name);
        }
        if let Some(encoded) = object.get("bytes").and_then(serde_json::Value::as_str) {
            return match base64_decode_bytes(encoded) {
                Ok(bytes) => Value::string(binary_string(&bytes)),
                Err(_) => Value::string(encoded),
            };
        }
        if let Some(secs) = object.get("date").and_then(serde_json::Value::as_i64) {
            return Value::Date(secs);
        }
        if let Some(slot) = object.get("var").and_then(serde_json::Value::as_u64) {
            return Value::NthLocalVar(slot as u32);
        }
        if let Some(pattern) = object.get("regex").and_then(serde_json::Value::as_str) {
            if let Ok(re) = CompiledRegex::compile(pattern, false) {
                return Value::Regex(Rc::new(re));
            }
            return Value::string(pattern);
        }
    }
    // generic objects become association pairs lists
    let mut pairs = Vec::with_capacity(object.len() * 2);
    for (key, value) in object {
        pairs.push(Value::string(key));
        pairs.push(from_json(value));
    }
    Value::list(pairs)
}

/// Parses JSON text and decodes it.
pub fn decode_global(text: &str) -> EvalResult<Value> {
    let tree: serde_json::Value = serde_json::from_str(text)
        .map_err(|e| EvalError::new(ErrorKind::Parse, format!("invalid json: {e}")))?;
    Ok(from_json(&tree))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(v: &Value) -> Value {
        decode_global(&encode(v).unwrap()).unwrap()
    }

    #[test]
    fn scalars_round_trip() {
        assert_eq!(round_trip(&Value::Nil), Value::Nil);
        assert_eq!(round_trip(&Value::Bool(true)), Value::Bool(true));
        assert_eq!(round_trip(&Value::Int(-7)), Value::Int(-7));
        assert_eq!(round_trip(&Value::Float(2.5)), Value::Float(2.5));
        assert_eq!(round_trip(&Value::string("hi")), Value::string("hi"));
        assert_eq!(round_trip(&Value::Date(1700000000)), Value::Date(1700000000));
        assert_eq!(round_trip(&Value::symbol("x")), Value::symbol("x"));
    }

    #[test]
    fn binary_strings_use_the_bytes_form() {
        let binary = Value::string(binary_string(&[0, 1, 2, 255]));
        let encoded = encode(&binary).unwrap();
        assert!(encoded.contains("bytes"));
        assert_eq!(round_trip(&binary), binary);
    }

    #[test]
    fn lists_and_assocs_round_trip() {
        let list = Value::list(vec![Value::Int(1), Value::string("two"), Value::Nil]);
        assert_eq!(round_trip(&list), list);
        let assoc = crate::dict::Dict::from_pairs(&[Value::string("a"), Value::Int(1)]);
        let dict = Value::FastDict(Rc::new(std::cell::RefCell::new(assoc)));
        // a promoted dict collapses to its pairs list, which compares equal
        assert!(round_trip(&dict).equal(&dict));
    }

    #[test]
    fn lambda_round_trips_as_a_proc() {
        let proc = Value::Proc(Rc::new(Proc {
            params: Value::list(vec![Value::NthLocalVar(0)]),
            body: Value::list(vec![Value::symbol("+"), Value::NthLocalVar(0), Value::Int(1)]),
            env: Env::new_global(),
            num_positional_vars: 1,
        }));
        let Value::Proc(decoded) = round_trip(&proc) else {
            panic!("expected a proc");
        };
        assert_eq!(decoded.num_positional_vars, 1);
        assert!(decoded.body.equal(&Value::list(vec![
            Value::symbol("+"),
            Value::NthLocalVar(0),
            Value::Int(1)
        ])));
    }

    #[test]
    fn native_functions_encode_by_name() {
        let plus = crate::decl::lookup("+").unwrap().value().unwrap();
        assert_eq!(encode(&plus).unwrap(), "{\"symbol\":\"+\"}");
    }

    #[test]
    fn external_objects_decode_to_assocs() {
        let decoded = decode_global("{\"a\":1,\"b\":[2,3]}").unwrap();
        let pairs = decoded.as_list().unwrap();
        assert_eq!(pairs[0], Value::string("a"));
        assert_eq!(pairs[1], Value::Int(1));
        assert_eq!(pairs[2], Value::string("b"));
    }

    #[test]
    fn assoc_object_encoding() {
        let assoc = Value::list(vec![Value::string("a"), Value::Int(1)]);
        assert_eq!(encode_assoc(&assoc).unwrap(), "{\"a\":1}");
    }
}
