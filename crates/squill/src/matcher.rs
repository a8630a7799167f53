//! The pattern-match engine behind the `match` special form.
//!
//! `match_pattern` unifies a value against a pattern, writing captured
//! bindings into the frame it is given. Scoping of bindings between sibling
//! arms is the optimizer's job (per-arm meta copies and unique slot
//! numbering); the matcher itself never allocates frames.

use std::rc::Rc;

use crate::{
    env::EnvRef,
    error::{EvalError, EvalResult},
    eval,
    value::{CompiledRegex, Value},
};

/// Unifies `value` against `pattern`. Returns whether the pattern matched;
/// bindings made by a partially-matched pattern may remain in the frame, the
/// optimizer's arm numbering keeps them from being observed.
pub fn match_pattern(value: &Value, pattern: &Value, env: &EnvRef) -> EvalResult<bool> {
    let pattern = pattern.peel_source();
    let value = value.peel_source();
    match pattern {
        Value::Nil | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::String(_) | Value::Date(_) => {
            Ok(value.equal(pattern))
        }
        Value::Symbol(name) => match &**name {
            "nil" => Ok(value.is_nil()),
            "true" => Ok(matches!(value, Value::Bool(true))),
            "false" => Ok(matches!(value, Value::Bool(false))),
            _ => {
                env.bind(name.clone(), value.clone());
                Ok(true)
            }
        },
        Value::NthLocalVar(slot) => {
            env.set_slot(*slot, value.clone());
            Ok(true)
        }
        Value::Regex(re) => match_regex(value, re, &[], env),
        Value::List(parts) if !parts.is_empty() => match_compound(value, parts, env),
        other => Err(EvalError::pattern(format!("unsupported pattern of kind {}", other.tag()))),
    }
}

fn match_compound(value: &Value, parts: &[Value], env: &EnvRef) -> EvalResult<bool> {
    let head = parts[0].peel_source();
    let Some(head) = head.as_str_symbol() else {
        return Err(EvalError::pattern("pattern head must be a symbol"));
    };
    let args = &parts[1..];
    match head {
        "list" => {
            let Some(items) = value.as_list() else { return Ok(false) };
            if items.len() != args.len() {
                return Ok(false);
            }
            for (item, sub) in items.iter().zip(args.iter()) {
                if !match_pattern(item, sub, env)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        "quote" | "symbol" => {
            let Some(expected) = args.first().map(Value::peel_source) else {
                return Err(EvalError::pattern(format!("`{head}` pattern needs a name")));
            };
            let Some(expected) = expected.as_str() else {
                return Err(EvalError::pattern(format!("`{head}` pattern name must be a symbol or string")));
            };
            Ok(value.as_str_symbol() == Some(expected))
        }
        "string?" | "number?" | "list?" => {
            let kind_ok = match head {
                "string?" => matches!(value, Value::String(_)),
                "number?" => matches!(value, Value::Int(_) | Value::Float(_)),
                _ => matches!(value, Value::List(_)),
            };
            if !kind_ok {
                return Ok(false);
            }
            match args.first() {
                Some(sub) => match_pattern(value, sub, env),
                None => Ok(true),
            }
        }
        "ignorecase" => {
            let Some(text) = value.as_str() else { return Ok(false) };
            let Some(expected) = args.first().and_then(|p| reify_string(p, env)) else {
                return Ok(false);
            };
            Ok(text.eq_ignore_ascii_case(&expected))
        }
        "concat" => match_concat(value, args, env),
        "cons" => {
            if args.len() != 2 {
                return Err(EvalError::pattern("`cons` pattern takes a head and a tail pattern"));
            }
            let Some(items) = value.as_list() else { return Ok(false) };
            let Some((first, rest)) = items.split_first() else { return Ok(false) };
            Ok(match_pattern(first, &args[0], env)? && match_pattern(&Value::list(rest.to_vec()), &args[1], env)?)
        }
        "merge" => {
            if args.len() != 2 {
                return Err(EvalError::pattern("`merge` pattern takes a head list and a rest pattern"));
            }
            let heads = pattern_list_items(&args[0])?;
            let Some(items) = value.as_list() else { return Ok(false) };
            if items.len() < heads.len() {
                return Ok(false);
            }
            for (item, sub) in items.iter().zip(heads.iter()) {
                if !match_pattern(item, sub, env)? {
                    return Ok(false);
                }
            }
            let rest = Value::list(items[heads.len()..].to_vec());
            match_pattern(&rest, &args[1], env)
        }
        "regex" => {
            let Some(first) = args.first().map(Value::peel_source) else {
                return Err(EvalError::pattern("`regex` pattern needs a pattern argument"));
            };
            let re = match first {
                Value::Regex(re) => re.clone(),
                Value::String(pat) => Rc::new(
                    CompiledRegex::compile(pat, false)
                        .map_err(|e| EvalError::pattern(format!("invalid regex pattern: {e}")))?,
                ),
                other => {
                    return Err(EvalError::pattern(format!(
                        "`regex` pattern argument must be a string, got {}",
                        other.tag()
                    )));
                }
            };
            match_regex(value, &re, &args[1..], env)
        }
        "eval" => {
            let Some(expr) = args.first() else {
                return Err(EvalError::pattern("`eval` pattern needs an expression"));
            };
            let expected = eval::eval(expr, env)?;
            Ok(value.equal(&expected))
        }
        "var" => {
            let Some(Value::Int(slot)) = args.first().map(Value::peel_source) else {
                return Err(EvalError::pattern("`var` pattern needs a slot index"));
            };
            env.set_slot(*slot as u32, value.clone());
            Ok(true)
        }
        other => Err(EvalError::pattern(format!("unknown pattern head `{other}`"))),
    }
}

/// The `'(h1 ... hn)` head list of a `merge` pattern, tolerating both the
/// reader's `(list ...)` form and a bare list.
fn pattern_list_items(pattern: &Value) -> EvalResult<Vec<Value>> {
    let Some(items) = pattern.peel_source().as_list() else {
        return Err(EvalError::pattern("`merge` head must be a list pattern"));
    };
    if items.first().and_then(|h| h.peel_source().as_str_symbol()) == Some("list") {
        Ok(items[1..].to_vec())
    } else {
        Ok(items.to_vec())
    }
}

fn match_regex(value: &Value, re: &Rc<CompiledRegex>, captures: &[Value], env: &EnvRef) -> EvalResult<bool> {
    let Value::String(text) = value else { return Ok(false) };
    // one capture slot per group plus one for the whole match
    if !captures.is_empty() && captures.len() != re.re.captures_len() {
        return Err(EvalError::pattern(format!(
            "`regex` pattern has {} capture group(s) plus the whole match but {} capture name(s)",
            re.re.captures_len() - 1,
            captures.len()
        )));
    }
    let Some(found) = re.re.captures(text) else { return Ok(false) };
    for (i, target) in captures.iter().enumerate() {
        let captured = found.get(i).map_or(Value::Nil, |m| Value::string(m.as_str()));
        match target.peel_source() {
            Value::Symbol(name) if &**name == "_" => {}
            Value::Symbol(name) => env.bind(name.clone(), captured),
            Value::NthLocalVar(slot) => env.set_slot(*slot, captured),
            other => {
                return Err(EvalError::pattern(format!(
                    "`regex` capture target must be a symbol or `_`, got {}",
                    other.tag()
                )));
            }
        }
    }
    Ok(true)
}

/// One piece of a `concat` pattern after resolving variables through the
/// environment: either a literal constraint or a binder.
enum ConcatPart {
    Lit(String),
    BindName(Rc<str>),
    BindSlot(u32),
}

/// Decomposes a string against a sequence of literals and variables
/// (spec shapes: `prefix var`, `var suffix`, `var delim var`, and longer
/// `var delim var delim ...` chains). Delimiter searches are greedy
/// left-to-right (`index_of`); the dedicated `var suffix` shape anchors at
/// the end instead.
fn match_concat(value: &Value, args: &[Value], env: &EnvRef) -> EvalResult<bool> {
    let Value::String(text) = value else { return Ok(false) };
    let mut parts = Vec::with_capacity(args.len());
    for arg in args {
        match arg.peel_source() {
            Value::String(s) => parts.push(ConcatPart::Lit(s.to_string())),
            Value::Symbol(name) => match env.lookup(name) {
                Some(Value::String(s)) => parts.push(ConcatPart::Lit(s.to_string())),
                _ => parts.push(ConcatPart::BindName(name.clone())),
            },
            Value::NthLocalVar(slot) => match env.get_slot(*slot) {
                Value::String(s) => parts.push(ConcatPart::Lit(s.to_string())),
                _ => parts.push(ConcatPart::BindSlot(*slot)),
            },
            other => {
                return Err(EvalError::pattern(format!(
                    "`concat` pattern piece must be a string or variable, got {}",
                    other.tag()
                )));
            }
        }
    }

    let mut bindings: Vec<(&ConcatPart, String)> = Vec::new();
    // `var suffix` anchors the literal at the end of the string
    if let [binder @ (ConcatPart::BindName(_) | ConcatPart::BindSlot(_)), ConcatPart::Lit(suffix)] = &parts[..] {
        let Some(stem) = text.strip_suffix(suffix.as_str()) else {
            return Ok(false);
        };
        commit_binding(binder, stem.to_string(), env);
        return Ok(true);
    }

    let mut pos = 0usize;
    let mut i = 0usize;
    while i < parts.len() {
        match &parts[i] {
            ConcatPart::Lit(lit) => {
                if !text[pos..].starts_with(lit.as_str()) {
                    return Ok(false);
                }
                pos += lit.len();
                i += 1;
            }
            binder => {
                if i + 1 == parts.len() {
                    // final variable takes the rest of the string
                    bindings.push((binder, text[pos..].to_string()));
                    pos = text.len();
                    i += 1;
                } else {
                    let ConcatPart::Lit(delim) = &parts[i + 1] else {
                        return Err(EvalError::pattern("`concat` pattern cannot have two adjacent variables"));
                    };
                    let Some(at) = text[pos..].find(delim.as_str()) else {
                        return Ok(false);
                    };
                    bindings.push((binder, text[pos..pos + at].to_string()));
                    pos += at + delim.len();
                    i += 2;
                }
            }
        }
    }
    if pos != text.len() {
        return Ok(false);
    }
    for (binder, captured) in bindings {
        commit_binding(binder, captured, env);
    }
    Ok(true)
}

fn commit_binding(binder: &ConcatPart, captured: String, env: &EnvRef) {
    match binder {
        ConcatPart::BindName(name) => env.bind(name.clone(), Value::string(captured)),
        ConcatPart::BindSlot(slot) => env.set_slot(*slot, Value::string(captured)),
        ConcatPart::Lit(_) => {}
    }
}

/// Resolves a pattern piece to a string through the environment, used by
/// `ignorecase`.
fn reify_string(pattern: &Value, env: &EnvRef) -> Option<String> {
    match pattern.peel_source() {
        Value::String(s) => Some(s.to_string()),
        Value::Symbol(name) => match env.lookup(name)? {
            Value::String(s) => Some(s.to_string()),
            _ => None,
        },
        _ => None,
    }
}
