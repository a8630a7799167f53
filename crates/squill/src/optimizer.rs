//! AST normalization and optimization.
//!
//! A top-down rewrite over the value tree: resolves known local symbols to
//! positional slots, numbers lambda parameters, strips source annotations
//! outside debug mode, inlines scalar `define`s inside `begin`, normalizes
//! serialization artifacts (`(var i)`, `(unquote "s")`), folds pure builtin
//! calls over literal arguments, and partially precompiles `parser` and
//! `match` subforms. The rewrite preserves evaluation order and side
//! effects: for every closed expression `e`, evaluating the optimized tree
//! yields the same result as evaluating `e`.

use std::{cell::Cell, rc::Rc};

use ahash::{AHashMap, AHashSet};

use crate::{
    decl::{self, NativeImp},
    peg,
    value::{SrcInfo, Value},
};

/// Rewrite context threaded through the traversal. Cloned at scope
/// boundaries (lambda bodies, match arms) so replacements cannot leak
/// sideways.
#[derive(Clone)]
struct Meta {
    /// Symbol replacements: positional slot references or inlined constants.
    replace: AHashMap<Rc<str>, Value>,
    /// Symbols whose `define` was inlined away; a later `set` of one of
    /// these forces the containing `begin` to keep its named form.
    blacklist: AHashSet<Rc<str>>,
    /// False when the enclosing position discards this form's value: set for
    /// non-final `begin` children and propagated through `begin` tails, so
    /// value-only forms drop even when nested. Reset to true wherever a
    /// subexpression's value is consumed (conditions, arguments, `define`
    /// values), since dropping those would change evaluation.
    use_result: bool,
    /// Slot numbering for the innermost lambda, shared across its arms and
    /// nested begins so slots are never reused.
    counter: Rc<Cell<u32>>,
    /// Keep source info wrappers so errors carry locations.
    debug: bool,
}

impl Meta {
    fn root(debug: bool) -> Self {
        Self {
            replace: AHashMap::new(),
            blacklist: AHashSet::new(),
            use_result: true,
            counter: Rc::new(Cell::new(0)),
            debug,
        }
    }

    fn with_result(&self, use_result: bool) -> Self {
        let mut meta = self.clone();
        meta.use_result = use_result;
        meta
    }
}

/// Optimizes a top-level form. `debug` keeps `SourceInfo` wrappers in place;
/// release strips them.
#[must_use]
pub fn optimize(expr: &Value, debug: bool) -> Value {
    rewrite(expr, &Meta::root(debug))
}

fn rewrite(expr: &Value, meta: &Meta) -> Value {
    match expr {
        Value::SourceInfo(info) => {
            let inner = rewrite(&info.inner, meta);
            if meta.debug {
                Value::SourceInfo(Rc::new(SrcInfo {
                    source: info.source.clone(),
                    line: info.line,
                    col: info.col,
                    inner,
                }))
            } else {
                inner
            }
        }
        Value::Symbol(name) => match meta.replace.get(name) {
            Some(replacement) => replacement.clone(),
            None => expr.clone(),
        },
        Value::List(items) if !items.is_empty() => rewrite_list(items, meta),
        other => other.clone(),
    }
}

fn rewrite_list(items: &[Value], meta: &Meta) -> Value {
    let head = items[0].peel_source();
    if let Some(name) = head.as_str_symbol() {
        match name {
            // serialization artifacts
            "var" => {
                if let Some(Value::Int(i)) = items.get(1).map(Value::peel_source) {
                    return Value::NthLocalVar(*i as u32);
                }
            }
            "unquote" => {
                if let Some(Value::String(s)) = items.get(1).map(Value::peel_source) {
                    return Value::Symbol(s.clone());
                }
            }
            "quote" => {
                // malformed quote forms keep their shape for the arity error
                if items.len() != 2 {
                    return Value::list(items.to_vec());
                }
                let datum = if meta.debug { items[1].clone() } else { strip_source(&items[1]) };
                return Value::list(vec![Value::symbol("quote"), datum]);
            }
            "lambda" => return rewrite_lambda(items, meta),
            "begin" | "!begin" => return rewrite_begin(name, items, meta),
            "define" | "set" | "setN" => return rewrite_define(name, items, meta),
            "match" => return rewrite_match(items, meta),
            "parser" => return rewrite_parser(items, meta),
            "source" => {
                if items.len() == 5 && !meta.debug {
                    return rewrite(&items[4], meta);
                }
                let mut out = items[..items.len().min(4)].to_vec();
                if let Some(e) = items.get(4) {
                    out.push(rewrite(e, meta));
                }
                return Value::list(out);
            }
            "if" | "and" | "or" | "collate" | "collateNil" | "eval" | "time" => {
                // every sub-form's value feeds the result or a branch test
                let value_meta = meta.with_result(true);
                let mut out = Vec::with_capacity(items.len());
                out.push(Value::symbol(name));
                for item in &items[1..] {
                    out.push(rewrite(item, &value_meta));
                }
                return Value::list(out);
            }
            _ => {}
        }
    }

    // ordinary call: rewrite head and arguments, then try the declaration's
    // call-site optimizer and constant folding
    let value_meta = meta.with_result(true);
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        out.push(rewrite(item, &value_meta));
    }
    if let Some(name) = out[0].peel_source().as_str_symbol()
        && !meta.replace.contains_key(name)
        && let Some(d) = decl::lookup(name)
    {
        if let Some(optimizer) = d.optimizer
            && let Some(new_args) = optimizer(&out[1..])
        {
            out.truncate(1);
            out.extend(new_args);
        }
        if d.pure
            && let NativeImp::Func(f) = d.imp
            && d.check_arity(out.len() - 1).is_ok()
            && let Some(args) = out[1..].iter().map(fold_arg).collect::<Option<Vec<_>>>()
            && let Ok(folded) = f(&args)
        {
            return quote_if_syntax(folded);
        }
    }
    Value::list(out)
}

/// The evaluated value of an argument expression, when it can be known at
/// optimization time: literals evaluate to themselves and `(quote d)` to `d`.
fn fold_arg(v: &Value) -> Option<Value> {
    let v = v.peel_source();
    if is_literal(v) {
        return Some(v.clone());
    }
    let items = v.as_list()?;
    if items.len() == 2 && items[0].peel_source().as_str_symbol() == Some("quote") {
        return Some(items[1].clone().into_peeled());
    }
    None
}

/// Wraps a folded result in `quote` when the evaluator would otherwise
/// mistake it for syntax (a call form or a variable reference).
fn quote_if_syntax(v: Value) -> Value {
    match &v {
        Value::List(items) if !items.is_empty() => Value::list(vec![Value::symbol("quote"), v]),
        Value::Symbol(_) | Value::NthLocalVar(_) | Value::SourceInfo(_) => {
            Value::list(vec![Value::symbol("quote"), v])
        }
        _ => v,
    }
}

/// True for argument values the constant folder may evaluate now: anything
/// that is not syntax (symbols, slot references, unevaluated lists).
fn is_literal(v: &Value) -> bool {
    !matches!(
        v.peel_source(),
        Value::Symbol(_) | Value::NthLocalVar(_) | Value::List(_) | Value::SourceInfo(_)
    )
}

fn strip_source(v: &Value) -> Value {
    match v.peel_source() {
        Value::List(items) => Value::list(items.iter().map(strip_source).collect()),
        other => other.clone(),
    }
}

/// Normalizes `lambda` forms: strips source info from the parameter spec,
/// numbers named parameters into positional slots, and optimizes the body
/// with the parameters shadowing the outer replacement map.
fn rewrite_lambda(items: &[Value], meta: &Meta) -> Value {
    if items.len() < 3 {
        return Value::list(items.to_vec());
    }
    let params = strip_source(&items[1]);
    let given_num_vars = match items.get(3).map(Value::peel_source) {
        Some(Value::Int(n)) => Some(*n as u32),
        _ => None,
    };

    let mut body_meta = meta.clone();
    body_meta.use_result = true;
    body_meta.counter = Rc::new(Cell::new(0));

    let (params, num_vars) = match &params {
        // already numbered (serialized form): normalize `(var i)` artifacts
        // in the parameter spec, keep the slots, shadow nothing new
        _ if given_num_vars.is_some() => {
            body_meta.counter.set(given_num_vars.unwrap_or(0));
            let params = match &params {
                Value::List(entries) => Value::list(entries.iter().map(normalize_artifact).collect()),
                other => other.clone(),
            };
            (params, given_num_vars.unwrap_or(0))
        }
        // positional slots never escape their frame, so parameters captured
        // by a nested lambda or parser must stay named
        Value::List(_) if captures_scope(&items[2]) => {
            shadow_params(&params, &mut body_meta);
            (params.clone(), 0)
        }
        Value::List(param_syms) => {
            let mut numbered = Vec::with_capacity(param_syms.len());
            for param in param_syms.iter() {
                match param {
                    Value::Symbol(name) => {
                        let slot = body_meta.counter.get();
                        body_meta.counter.set(slot + 1);
                        body_meta.replace.insert(name.clone(), Value::NthLocalVar(slot));
                        numbered.push(Value::NthLocalVar(slot));
                    }
                    other => numbered.push(other.clone()),
                }
            }
            (Value::list(numbered), body_meta.counter.get())
        }
        Value::Symbol(name) => {
            // single symbol binds the whole argument list by name
            body_meta.replace.remove(name);
            (params.clone(), 0)
        }
        _ => (params.clone(), 0),
    };

    let body = rewrite(&items[2], &body_meta);
    let num_vars = num_vars.max(body_meta.counter.get());
    let mut out = vec![Value::symbol("lambda"), params, body];
    if num_vars > 0 {
        out.push(Value::Int(i64::from(num_vars)));
    }
    Value::list(out)
}

/// True when a body contains a form that captures the enclosing scope by
/// reference (a nested lambda or a parser, whose generator runs against the
/// captured environment later). Quoted data does not count.
fn captures_scope(body: &Value) -> bool {
    match body.peel_source() {
        Value::List(items) if !items.is_empty() => {
            match items[0].peel_source().as_str_symbol() {
                Some("lambda" | "parser") => true,
                Some("quote") => false,
                _ => items.iter().any(captures_scope),
            }
        }
        _ => false,
    }
}

/// Removes replacements shadowed by named parameters.
fn shadow_params(params: &Value, meta: &mut Meta) {
    if let Value::List(param_syms) = params {
        for param in param_syms.iter() {
            if let Value::Symbol(name) = param {
                meta.replace.remove(name);
            }
        }
    }
}

/// `begin` rewriting: counts uses of each `define`d symbol; scalars used
/// fewer than twice are inlined at their use sites and the `define` dropped.
/// When no definitions remain the head becomes `!begin` and the evaluator
/// skips scope creation.
fn rewrite_begin(head: &str, items: &[Value], meta: &Meta) -> Value {
    let body = &items[1..];
    let mut scope = meta.clone();

    // symbols written more than once stay named; inlining them would change
    // which value later uses observe
    let mut write_counts: AHashMap<Rc<str>, usize> = AHashMap::new();
    for form in body {
        if let Some(name) = define_target(form) {
            *write_counts.entry(name).or_insert(0) += 1;
        }
    }

    let mut out_forms: Vec<Value> = Vec::with_capacity(body.len());
    let mut kept_defines = false;
    for (i, form) in body.iter().enumerate() {
        let is_last = i + 1 == body.len();
        if let Some((name, value_expr)) = scalar_define(form)
            && write_counts.get(&name).copied() == Some(1)
            && !scope.blacklist.contains(&name)
        {
            let uses = body[i + 1..].iter().map(|f| count_uses(f, &name)).sum::<usize>();
            if uses < 2 {
                let inlined = rewrite(&value_expr, &scope);
                scope.replace.insert(name.clone(), inlined);
                scope.blacklist.insert(name);
                continue;
            }
        }
        if define_target(form).is_some() {
            kept_defines = true;
        }
        let form_meta = scope.with_result(is_last && meta.use_result);
        let rewritten = rewrite(form, &form_meta);
        // a value-only form whose result is discarded has no effect
        if !form_meta.use_result && is_literal(&rewritten) {
            continue;
        }
        out_forms.push(rewritten);
    }

    if out_forms.is_empty() {
        return Value::Nil;
    }
    if out_forms.len() == 1 && !kept_defines {
        return out_forms.pop().unwrap_or(Value::Nil);
    }
    // with every definition inlined away the evaluator can reuse the frame
    let head = if kept_defines { head } else { "!begin" };
    let mut out = Vec::with_capacity(out_forms.len() + 1);
    out.push(Value::symbol(head));
    out.extend(out_forms);
    Value::list(out)
}

/// The target symbol of a `define`/`set` form, if any.
fn define_target(form: &Value) -> Option<Rc<str>> {
    let items = form.peel_source().as_list()?;
    let head = items.first()?.peel_source().as_str_symbol()?;
    if head != "define" && head != "set" {
        return None;
    }
    match items.get(1)?.peel_source() {
        Value::Symbol(name) => Some(name.clone()),
        _ => None,
    }
}

/// A `define` whose value is a scalar (not a list expression), eligible for
/// inlining.
fn scalar_define(form: &Value) -> Option<(Rc<str>, Value)> {
    let items = form.peel_source().as_list()?;
    let head = items.first()?.peel_source().as_str_symbol()?;
    if head != "define" {
        return None;
    }
    let Value::Symbol(name) = items.get(1)?.peel_source() else {
        return None;
    };
    let value = items.get(2)?.peel_source();
    if matches!(value, Value::List(_)) {
        return None;
    }
    Some((name.clone(), value.clone()))
}

fn count_uses(form: &Value, name: &str) -> usize {
    match form.peel_source() {
        Value::Symbol(s) => usize::from(&**s == name),
        Value::List(items) => items.iter().map(|f| count_uses(f, name)).sum(),
        _ => 0,
    }
}

/// Normalizes one serialization artifact: `(var i)` to a slot reference and
/// `(unquote "s")` to a symbol. Anything else passes through source-stripped.
fn normalize_artifact(v: &Value) -> Value {
    if let Some(items) = v.peel_source().as_list() {
        match items.first().and_then(|h| h.peel_source().as_str_symbol()) {
            Some("var") => {
                if let Some(Value::Int(i)) = items.get(1).map(Value::peel_source) {
                    return Value::NthLocalVar(*i as u32);
                }
            }
            Some("unquote") => {
                if let Some(Value::String(s)) = items.get(1).map(Value::peel_source) {
                    return Value::Symbol(s.clone());
                }
            }
            _ => {}
        }
    }
    strip_source(v)
}

fn rewrite_define(head: &str, items: &[Value], meta: &Meta) -> Value {
    if items.len() < 3 {
        return Value::list(items.to_vec());
    }
    let value = rewrite(&items[2], &meta.with_result(true));
    let target = normalize_artifact(&items[1]);
    // `(define (var i) e)` and slot-resolved symbols become `setN`
    let slot = match &target {
        Value::NthLocalVar(i) => Some(*i),
        Value::Symbol(name) if head != "setN" => match meta.replace.get(name) {
            Some(Value::NthLocalVar(i)) => Some(*i),
            _ => None,
        },
        Value::Int(i) if head == "setN" => Some(*i as u32),
        _ => None,
    };
    match slot {
        Some(i) => Value::list(vec![Value::symbol("setN"), Value::Int(i64::from(i)), value]),
        None => Value::list(vec![Value::symbol(head), target, value]),
    }
}

/// `match` rewriting: the scrutinee and every result are optimized; each
/// arm's pattern is normalized and its bound symbols shadow the replacement
/// map for that arm only, so pattern bindings cannot leak into siblings.
fn rewrite_match(items: &[Value], meta: &Meta) -> Value {
    let mut out = vec![Value::symbol("match")];
    if items.len() < 2 {
        return Value::list(items.to_vec());
    }
    // the scrutinee and pattern sub-expressions are always consumed; arm
    // results are the match's value and keep the caller's position
    let value_meta = meta.with_result(true);
    out.push(rewrite(&items[1], &value_meta));
    let arms = &items[2..];
    let mut i = 0;
    while i + 1 < arms.len() {
        let pattern = normalize_pattern(&arms[i], &value_meta);
        let mut arm_meta = meta.clone();
        let mut bound = Vec::new();
        pattern_bound_symbols(&pattern, &mut bound);
        for name in bound {
            arm_meta.replace.remove(&name);
        }
        out.push(pattern);
        out.push(rewrite(&arms[i + 1], &arm_meta));
        i += 2;
    }
    if i < arms.len() {
        out.push(rewrite(&arms[i], meta));
    }
    Value::list(out)
}

/// Normalizes a pattern: strips source info, converts `(var i)` artifacts,
/// and recurses into compound patterns without touching binder symbols.
fn normalize_pattern(pattern: &Value, meta: &Meta) -> Value {
    match pattern.peel_source() {
        Value::List(parts) if !parts.is_empty() => {
            let head = parts[0].peel_source().as_str_symbol();
            match head {
                Some("var") => {
                    if let Some(Value::Int(i)) = parts.get(1).map(Value::peel_source) {
                        return Value::NthLocalVar(*i as u32);
                    }
                    Value::list(parts.iter().map(|p| normalize_pattern(p, meta)).collect())
                }
                Some("unquote") => {
                    if let Some(Value::String(s)) = parts.get(1).map(Value::peel_source) {
                        return Value::Symbol(s.clone());
                    }
                    Value::list(parts.to_vec())
                }
                // `eval` patterns contain an expression, not sub-patterns
                Some("eval") => {
                    let mut out = vec![Value::symbol("eval")];
                    out.extend(parts[1..].iter().map(|p| rewrite(p, meta)));
                    Value::list(out)
                }
                _ => Value::list(parts.iter().map(|p| normalize_pattern(p, meta)).collect()),
            }
        }
        other => other.clone(),
    }
}

/// Collects the symbols a pattern would bind on success.
fn pattern_bound_symbols(pattern: &Value, out: &mut Vec<Rc<str>>) {
    match pattern.peel_source() {
        Value::Symbol(name) => {
            if !matches!(&**name, "nil" | "true" | "false" | "_") {
                out.push(name.clone());
            }
        }
        Value::List(parts) if !parts.is_empty() => {
            let head = parts[0].peel_source().as_str_symbol();
            match head {
                // these heads never bind through their first argument
                Some("quote" | "symbol" | "eval") => {}
                Some("regex") => {
                    for capture in &parts[2..] {
                        pattern_bound_symbols(capture, out);
                    }
                }
                _ => {
                    for part in &parts[1..] {
                        pattern_bound_symbols(part, out);
                    }
                }
            }
        }
        _ => {}
    }
}

/// `parser` rewriting: the syntax tree is partially precompiled. Closed
/// subtrees (atoms, regexes, combinators over closed subtrees) are
/// materialized as parser values now; symbol references stay symbolic and
/// resolve lazily at construction.
fn rewrite_parser(items: &[Value], meta: &Meta) -> Value {
    let mut out = vec![Value::symbol("parser")];
    let value_meta = meta.with_result(true);
    if let Some(syntax) = items.get(1) {
        out.push(peg::precompile(&strip_if_release(syntax, meta)));
    }
    if let Some(generator) = items.get(2) {
        out.push(rewrite(generator, &value_meta));
    }
    if let Some(skipper) = items.get(3) {
        out.push(rewrite(skipper, &value_meta));
    }
    Value::list(out)
}

fn strip_if_release(v: &Value, meta: &Meta) -> Value {
    if meta.debug { v.clone() } else { strip_source(v) }
}
