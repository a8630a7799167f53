//! List builtins.
//!
//! Lists are immutable shared sequences; every operation returns a fresh
//! list and never mutates its inputs.

use crate::{
    decl::{Decl, Kind, Registry, VARIADIC},
    env::EnvRef,
    error::{EvalError, EvalResult},
    eval::call_value,
    value::Value,
};

pub(crate) fn install(registry: &mut Registry) {
    registry.add(
        Decl::func("list", list)
            .result(Kind::List)
            .pure()
            .doc("builds a list of its arguments"),
    );
    registry.add(
        Decl::func("count", count)
            .args(1, 1)
            .result(Kind::Int)
            .pure()
            .doc("element count of a list or association, character count of a string"),
    );
    registry.add(
        Decl::func("nth", nth)
            .args(2, 2)
            .param("xs", Kind::List, "subject")
            .param("i", Kind::Int, "0-based index")
            .pure(),
    );
    registry.add(
        Decl::func("append", append)
            .args(1, VARIADIC)
            .result(Kind::List)
            .pure()
            .doc("returns a new list with the values appended; the input is unchanged"),
    );
    registry.add(
        Decl::func("append_unique", append_unique)
            .args(1, VARIADIC)
            .result(Kind::List)
            .pure()
            .doc("appends only values not already present"),
    );
    registry.add(Decl::func("cons", cons).args(2, 2).result(Kind::List).pure());
    registry.add(Decl::func("car", car).args(1, 1).pure());
    registry.add(Decl::func("cdr", cdr).args(1, 1).result(Kind::List).pure());
    registry.add(
        Decl::func("zip", zip)
            .args(1, VARIADIC)
            .result(Kind::List)
            .pure()
            .doc("pairs elements positionally, stopping at the shortest input"),
    );
    registry.add(
        Decl::func("merge", merge)
            .args(1, VARIADIC)
            .result(Kind::List)
            .pure()
            .doc("concatenates lists; nil counts as empty"),
    );
    registry.add(
        Decl::func("merge_unique", merge_unique)
            .args(1, VARIADIC)
            .result(Kind::List)
            .pure()
            .doc("concatenates lists dropping duplicates"),
    );
    registry.add(Decl::func("has?", has).args(2, 2).result(Kind::Bool).pure());
    registry.add(
        Decl::func("contains?", contains)
            .args(2, 2)
            .result(Kind::Bool)
            .pure()
            .doc("substring test on strings, membership test on lists"),
    );
    registry.add(
        Decl::func_env("filter", filter)
            .args(2, 2)
            .param("xs", Kind::List, "subject")
            .param("f", Kind::Func, "predicate")
            .result(Kind::List),
    );
    registry.add(
        Decl::func_env("map", map)
            .args(2, 2)
            .param("xs", Kind::List, "subject")
            .param("f", Kind::Func, "mapper")
            .result(Kind::List),
    );
    registry.add(
        Decl::func_env("mapIndex", map_index)
            .args(2, 2)
            .param("xs", Kind::List, "subject")
            .param("f", Kind::Func, "mapper receiving (element index)")
            .result(Kind::List),
    );
    registry.add(
        Decl::func_env("reduce", reduce)
            .args(2, 3)
            .param("xs", Kind::List, "subject")
            .param("f", Kind::Func, "folder receiving (accumulator element)")
            .param("init", Kind::Any, "initial accumulator; first element when omitted")
            .doc("left fold; an empty list without an initial value reduces to nil"),
    );
    registry.add(
        Decl::func_env("produce", produce)
            .args(1, 1)
            .param("f", Kind::Func, "generator called until it returns nil")
            .result(Kind::List)
            .doc("collects generator results until the first nil"),
    );
    registry.add(
        Decl::func_env("produceN", produce_n)
            .args(2, 2)
            .param("f", Kind::Func, "generator receiving the index")
            .param("n", Kind::Int, "number of elements")
            .result(Kind::List),
    );
    registry.add(Decl::func("list?", is_list).args(1, 1).result(Kind::Bool).pure());
}

/// A list argument; nil counts as the empty list.
fn list_arg(v: &Value) -> EvalResult<Vec<Value>> {
    match v.peel_source() {
        Value::List(items) => Ok(items.to_vec()),
        Value::Nil => Ok(Vec::new()),
        Value::FastDict(dict) => Ok(dict.borrow().pairs().to_vec()),
        other => Err(EvalError::type_mismatch(format!("expected a list, got {}", other.tag()))),
    }
}

fn list(args: &[Value]) -> EvalResult<Value> {
    Ok(Value::list(args.to_vec()))
}

fn count(args: &[Value]) -> EvalResult<Value> {
    let n = match args[0].peel_source() {
        Value::Nil => 0,
        Value::List(items) => items.len(),
        Value::FastDict(dict) => dict.borrow().len(),
        Value::String(s) => s.chars().count(),
        other => {
            return Err(EvalError::type_mismatch(format!(
                "`count` expects a list, association, or string, got {}",
                other.tag()
            )));
        }
    };
    Ok(Value::Int(n as i64))
}

fn nth(args: &[Value]) -> EvalResult<Value> {
    let items = list_arg(&args[0])?;
    let i = args[1].to_i64();
    if i < 0 || i as usize >= items.len() {
        return Err(EvalError::index(format!("`nth` index {i} out of range 0..{}", items.len())));
    }
    Ok(items[i as usize].clone())
}

fn append(args: &[Value]) -> EvalResult<Value> {
    let mut items = list_arg(&args[0])?;
    items.extend(args[1..].iter().cloned());
    Ok(Value::list(items))
}

fn append_unique(args: &[Value]) -> EvalResult<Value> {
    let mut items = list_arg(&args[0])?;
    for value in &args[1..] {
        if !items.iter().any(|existing| existing.equal(value)) {
            items.push(value.clone());
        }
    }
    Ok(Value::list(items))
}

fn cons(args: &[Value]) -> EvalResult<Value> {
    let mut items = Vec::with_capacity(1);
    items.push(args[0].clone());
    items.extend(list_arg(&args[1])?);
    Ok(Value::list(items))
}

fn car(args: &[Value]) -> EvalResult<Value> {
    let items = list_arg(&args[0])?;
    items
        .first()
        .cloned()
        .ok_or_else(|| EvalError::index("`car` of an empty list"))
}

fn cdr(args: &[Value]) -> EvalResult<Value> {
    let items = list_arg(&args[0])?;
    if items.is_empty() {
        return Err(EvalError::index("`cdr` of an empty list"));
    }
    Ok(Value::list(items[1..].to_vec()))
}

fn zip(args: &[Value]) -> EvalResult<Value> {
    let lists: Vec<Vec<Value>> = args.iter().map(list_arg).collect::<EvalResult<_>>()?;
    let shortest = lists.iter().map(Vec::len).min().unwrap_or(0);
    let mut out = Vec::with_capacity(shortest);
    for i in 0..shortest {
        out.push(Value::list(lists.iter().map(|l| l[i].clone()).collect()));
    }
    Ok(Value::list(out))
}

fn merge(args: &[Value]) -> EvalResult<Value> {
    let mut out = Vec::new();
    for arg in args {
        out.extend(list_arg(arg)?);
    }
    Ok(Value::list(out))
}

fn merge_unique(args: &[Value]) -> EvalResult<Value> {
    let mut out: Vec<Value> = Vec::new();
    for arg in args {
        for value in list_arg(arg)? {
            if !out.iter().any(|existing| existing.equal(&value)) {
                out.push(value);
            }
        }
    }
    Ok(Value::list(out))
}

fn has(args: &[Value]) -> EvalResult<Value> {
    let items = list_arg(&args[0])?;
    Ok(Value::Bool(items.iter().any(|v| v.equal(&args[1]))))
}

fn contains(args: &[Value]) -> EvalResult<Value> {
    match args[0].peel_source() {
        Value::String(s) => {
            let needle = args[1].coerce_string();
            Ok(Value::Bool(s.contains(&needle)))
        }
        _ => has(args),
    }
}

fn filter(env: &EnvRef, args: &[Value]) -> EvalResult<Value> {
    let items = list_arg(&args[0])?;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        if call_value(&args[1], std::slice::from_ref(&item), env)?.is_truthy() {
            out.push(item);
        }
    }
    Ok(Value::list(out))
}

fn map(env: &EnvRef, args: &[Value]) -> EvalResult<Value> {
    let items = list_arg(&args[0])?;
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        out.push(call_value(&args[1], std::slice::from_ref(&item), env)?);
    }
    Ok(Value::list(out))
}

fn map_index(env: &EnvRef, args: &[Value]) -> EvalResult<Value> {
    let items = list_arg(&args[0])?;
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.into_iter().enumerate() {
        out.push(call_value(&args[1], &[item, Value::Int(i as i64)], env)?);
    }
    Ok(Value::list(out))
}

fn reduce(env: &EnvRef, args: &[Value]) -> EvalResult<Value> {
    let items = list_arg(&args[0])?;
    let mut iter = items.into_iter();
    let mut acc = match args.get(2) {
        Some(init) => init.clone(),
        None => match iter.next() {
            Some(first) => first,
            None => return Ok(Value::Nil),
        },
    };
    for item in iter {
        acc = call_value(&args[1], &[acc, item], env)?;
    }
    Ok(acc)
}

fn produce(env: &EnvRef, args: &[Value]) -> EvalResult<Value> {
    let mut out = Vec::new();
    loop {
        let v = call_value(&args[0], &[], env)?;
        if v.is_nil() {
            return Ok(Value::list(out));
        }
        out.push(v);
    }
}

fn produce_n(env: &EnvRef, args: &[Value]) -> EvalResult<Value> {
    let n = args[1].to_i64().max(0);
    let mut out = Vec::with_capacity(n as usize);
    for i in 0..n {
        out.push(call_value(&args[0], &[Value::Int(i)], env)?);
    }
    Ok(Value::list(out))
}

fn is_list(args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Bool(matches!(args[0].peel_source(), Value::List(_))))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ints(values: &[i64]) -> Value {
        Value::list(values.iter().map(|&i| Value::Int(i)).collect())
    }

    #[test]
    fn append_does_not_mutate_input() {
        let xs = ints(&[1, 2]);
        let ys = append(&[xs.clone(), Value::Int(3)]).unwrap();
        assert_eq!(xs.as_list().unwrap().len(), 2);
        assert_eq!(ys, ints(&[1, 2, 3]));
    }

    #[test]
    fn car_of_empty_is_an_index_error() {
        let err = car(&[Value::empty_list()]).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::IndexOutOfRange);
    }

    #[test]
    fn zip_stops_at_shortest() {
        let zipped = zip(&[ints(&[1, 2, 3]), ints(&[10, 20])]).unwrap();
        assert_eq!(
            zipped,
            Value::list(vec![ints(&[1, 10]), ints(&[2, 20])])
        );
    }

    #[test]
    fn merge_unique_dedups_across_inputs() {
        let merged = merge_unique(&[ints(&[1, 2]), ints(&[2, 3])]).unwrap();
        assert_eq!(merged, ints(&[1, 2, 3]));
    }
}
