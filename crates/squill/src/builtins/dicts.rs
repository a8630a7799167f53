//! Association builtins.
//!
//! An association is either a flat list of alternating `[k v k v ...]`
//! pairs (the small representation, and what `'()` starts as) or a promoted
//! [`crate::dict::Dict`] with a hash index. `set_assoc` promotes a list past
//! [`PROMOTE_THRESHOLD`] entries and mutates a promoted dict in place
//! through its shared handle.

use std::{cell::RefCell, rc::Rc};

use crate::{
    decl::{Decl, Kind, Registry, VARIADIC},
    dict::{Dict, PROMOTE_THRESHOLD},
    env::EnvRef,
    error::{EvalError, EvalResult},
    eval::call_value,
    value::Value,
};

pub(crate) fn install(registry: &mut Registry) {
    registry.add(
        Decl::func("set_assoc", set_assoc)
            .args(3, 3)
            .param("assoc", Kind::Assoc, "subject; a promoted dict is mutated in place")
            .param("key", Kind::Any, "key to set")
            .param("value", Kind::Any, "new value")
            .result(Kind::Assoc)
            .doc("inserts or replaces a key; promotes to the hashed representation when large"),
    );
    registry.add(
        Decl::func("has_assoc?", has_assoc)
            .args(2, 2)
            .result(Kind::Bool)
            .pure(),
    );
    registry.add(
        Decl::func("extract_assoc", extract_assoc)
            .args(2, 3)
            .param("assoc", Kind::Assoc, "subject")
            .param("key", Kind::Any, "key to read")
            .param("default", Kind::Any, "returned when the key is absent")
            .pure()
            .doc("the value stored under a key, or the default, or nil"),
    );
    registry.add(
        Decl::func("merge_assoc", merge_assoc)
            .args(1, VARIADIC)
            .result(Kind::Assoc)
            .pure()
            .doc("unions associations left to right; later pairs win"),
    );
    registry.add(
        Decl::func_env("filter_assoc", filter_assoc)
            .args(2, 2)
            .param("assoc", Kind::Assoc, "subject")
            .param("f", Kind::Func, "predicate receiving (key value)")
            .result(Kind::Assoc),
    );
    registry.add(
        Decl::func_env("map_assoc", map_assoc)
            .args(2, 2)
            .param("assoc", Kind::Assoc, "subject")
            .param("f", Kind::Func, "mapper receiving (key value), producing the new value")
            .result(Kind::Assoc),
    );
    registry.add(
        Decl::func_env("reduce_assoc", reduce_assoc)
            .args(3, 3)
            .param("assoc", Kind::Assoc, "subject")
            .param("f", Kind::Func, "folder receiving (accumulator key value)")
            .param("init", Kind::Any, "initial accumulator"),
    );
}

/// Flat alternating pairs of any association representation.
pub(crate) fn assoc_pairs(v: &Value) -> EvalResult<Vec<Value>> {
    match v.peel_source() {
        Value::Nil => Ok(Vec::new()),
        Value::List(items) => Ok(items.to_vec()),
        Value::FastDict(dict) => Ok(dict.borrow().pairs().to_vec()),
        other => Err(EvalError::type_mismatch(format!(
            "expected an association, got {}",
            other.tag()
        ))),
    }
}

/// Packs pairs back into the fitting representation: a plain list while
/// small, a hashed dict once past the promotion threshold.
fn make_assoc(pairs: Vec<Value>) -> Value {
    if pairs.len() / 2 > PROMOTE_THRESHOLD {
        Value::FastDict(Rc::new(RefCell::new(Dict::from_pairs(&pairs))))
    } else {
        Value::list(pairs)
    }
}

fn set_assoc(args: &[Value]) -> EvalResult<Value> {
    let key = args[1].clone();
    let value = args[2].clone();
    // a promoted dict mutates in place through the shared handle
    if let Value::FastDict(dict) = args[0].peel_source() {
        dict.borrow_mut().set(key, value);
        return Ok(args[0].peel_source().clone());
    }
    let mut pairs = assoc_pairs(&args[0])?;
    let mut i = 0;
    while i + 1 < pairs.len() {
        if pairs[i].equal(&key) {
            pairs[i + 1] = value;
            return Ok(make_assoc(pairs));
        }
        i += 2;
    }
    pairs.push(key);
    pairs.push(value);
    Ok(make_assoc(pairs))
}

fn lookup(v: &Value, key: &Value) -> EvalResult<Option<Value>> {
    if let Value::FastDict(dict) = v.peel_source() {
        return Ok(dict.borrow().get(key));
    }
    let pairs = assoc_pairs(v)?;
    let mut i = 0;
    while i + 1 < pairs.len() {
        if pairs[i].equal(key) {
            return Ok(Some(pairs[i + 1].clone()));
        }
        i += 2;
    }
    Ok(None)
}

fn has_assoc(args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Bool(lookup(&args[0], &args[1])?.is_some()))
}

fn extract_assoc(args: &[Value]) -> EvalResult<Value> {
    match lookup(&args[0], &args[1])? {
        Some(v) => Ok(v),
        None => Ok(args.get(2).cloned().unwrap_or(Value::Nil)),
    }
}

fn merge_assoc(args: &[Value]) -> EvalResult<Value> {
    let mut acc = Dict::new();
    for arg in args {
        let pairs = assoc_pairs(arg)?;
        let mut i = 0;
        while i + 1 < pairs.len() {
            acc.set(pairs[i].clone(), pairs[i + 1].clone());
            i += 2;
        }
    }
    Ok(make_assoc(acc.pairs().to_vec()))
}

fn filter_assoc(env: &EnvRef, args: &[Value]) -> EvalResult<Value> {
    let pairs = assoc_pairs(&args[0])?;
    let mut out = Vec::with_capacity(pairs.len());
    let mut i = 0;
    while i + 1 < pairs.len() {
        if call_value(&args[1], &[pairs[i].clone(), pairs[i + 1].clone()], env)?.is_truthy() {
            out.push(pairs[i].clone());
            out.push(pairs[i + 1].clone());
        }
        i += 2;
    }
    Ok(make_assoc(out))
}

fn map_assoc(env: &EnvRef, args: &[Value]) -> EvalResult<Value> {
    let pairs = assoc_pairs(&args[0])?;
    let mut out = Vec::with_capacity(pairs.len());
    let mut i = 0;
    while i + 1 < pairs.len() {
        let new_value = call_value(&args[1], &[pairs[i].clone(), pairs[i + 1].clone()], env)?;
        out.push(pairs[i].clone());
        out.push(new_value);
        i += 2;
    }
    Ok(make_assoc(out))
}

fn reduce_assoc(env: &EnvRef, args: &[Value]) -> EvalResult<Value> {
    let pairs = assoc_pairs(&args[0])?;
    let mut acc = args[2].clone();
    let mut i = 0;
    while i + 1 < pairs.len() {
        acc = call_value(&args[1], &[acc, pairs[i].clone(), pairs[i + 1].clone()], env)?;
        i += 2;
    }
    Ok(acc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_assoc_replaces_without_duplicating() {
        let a = set_assoc(&[Value::empty_list(), Value::string("a"), Value::Int(1)]).unwrap();
        let b = set_assoc(&[a, Value::string("a"), Value::Int(2)]).unwrap();
        assert_eq!(
            extract_assoc(&[b.clone(), Value::string("a")]).unwrap(),
            Value::Int(2)
        );
        assert_eq!(b.as_list().unwrap().len(), 2);
    }

    #[test]
    fn growth_promotes_to_hashed_representation() {
        let mut assoc = Value::empty_list();
        for i in 0..20 {
            assoc = set_assoc(&[assoc, Value::Int(i), Value::Int(i * 10)]).unwrap();
        }
        assert!(matches!(assoc, Value::FastDict(_)));
        assert_eq!(
            extract_assoc(&[assoc.clone(), Value::Int(7)]).unwrap(),
            Value::Int(70)
        );
        // promoted dicts mutate in place
        let same = set_assoc(&[assoc.clone(), Value::Int(7), Value::Int(77)]).unwrap();
        assert_eq!(extract_assoc(&[assoc, Value::Int(7)]).unwrap(), Value::Int(77));
        assert!(matches!(same, Value::FastDict(_)));
    }

    #[test]
    fn merge_assoc_later_wins() {
        let left = Value::list(vec![Value::string("a"), Value::Int(1), Value::string("b"), Value::Int(2)]);
        let right = Value::list(vec![Value::string("b"), Value::Int(9)]);
        let merged = merge_assoc(&[left, right]).unwrap();
        assert_eq!(
            extract_assoc(&[merged.clone(), Value::string("b")]).unwrap(),
            Value::Int(9)
        );
        assert_eq!(merged.as_list().unwrap().len(), 4);
    }
}
