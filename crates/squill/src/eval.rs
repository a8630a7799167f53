//! The tree-walking evaluator.
//!
//! `eval` is a loop: forms in tail position reassign `expr`/`env` and
//! continue instead of recursing, so arbitrarily deep tail recursion runs in
//! constant Rust stack. Non-tail recursion (argument evaluation, nested
//! forms) recurses and is bounded by a depth guard.
//!
//! Symbol lookup consults the environment chain first and falls back to the
//! declaration registry, so builtins are ordinary first-class values unless
//! shadowed.

use std::{cell::Cell, rc::Rc, sync::atomic::{AtomicBool, Ordering as AtomicOrdering}, time::Instant};

use crate::{
    decl,
    env::{Env, EnvRef},
    error::{ErrorKind, EvalError, EvalResult, SourceLoc},
    jit,
    matcher,
    peg,
    value::{Proc, Value},
};

/// Hard cap on non-tail evaluator recursion.
const MAX_DEPTH: u32 = 4096;

static JIT_ENABLED: AtomicBool = AtomicBool::new(true);

/// Globally enables or disables the native emitter. Observable behavior must
/// be identical either way; this is exposed so hosts and tests can compare.
pub fn set_jit_enabled(enabled: bool) {
    JIT_ENABLED.store(enabled, AtomicOrdering::Relaxed);
}

#[must_use]
pub fn jit_enabled() -> bool {
    JIT_ENABLED.load(AtomicOrdering::Relaxed)
}

thread_local! {
    static DEPTH: Cell<u32> = const { Cell::new(0) };
}

struct DepthGuard;

impl DepthGuard {
    fn enter() -> EvalResult<Self> {
        let depth = DEPTH.with(|d| {
            let depth = d.get() + 1;
            d.set(depth);
            depth
        });
        if depth > MAX_DEPTH {
            DEPTH.with(|d| d.set(d.get() - 1));
            return Err(EvalError::new(ErrorKind::InternalPanic, "evaluator recursion depth exceeded"));
        }
        Ok(Self)
    }
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        DEPTH.with(|d| d.set(d.get() - 1));
    }
}

/// Evaluates `expr` in `env`.
pub fn eval(expr: &Value, env: &EnvRef) -> EvalResult<Value> {
    let _guard = DepthGuard::enter()?;
    let mut expr = expr.clone();
    let mut env = env.clone();

    loop {
        match expr {
            Value::Symbol(name) => return lookup_symbol(&name, &env),
            Value::NthLocalVar(i) => return Ok(env.get_slot(i)),
            Value::SourceInfo(info) => {
                // the wrapper catches the unwinding error and re-raises with
                // its location appended to the chain
                return eval(&info.inner, &env).map_err(|e| e.at(info.loc()));
            }
            Value::List(items) if !items.is_empty() => {
                let head = items[0].peel_source();
                if let Some(name) = head.as_str_symbol() {
                    match eval_special(name, &items, &env)? {
                        Special::Done(v) => return Ok(v),
                        Special::Tail(next_expr, next_env) => {
                            expr = next_expr;
                            env = next_env;
                            continue;
                        }
                        Special::NotSpecial => {}
                    }
                }
                // ordinary application: head and arguments left-to-right
                let callee = eval(&items[0], &env)?;
                let mut args = Vec::with_capacity(items.len() - 1);
                for item in &items[1..] {
                    args.push(eval(item, &env)?);
                }
                match apply_tail(callee, args, &env)? {
                    Applied::Done(v) => return Ok(v),
                    Applied::Tail(next_expr, next_env) => {
                        expr = next_expr;
                        env = next_env;
                    }
                }
            }
            literal => return Ok(literal),
        }
    }
}

/// Looks up a symbol in the environment chain, falling back to the
/// declaration registry.
fn lookup_symbol(name: &str, env: &EnvRef) -> EvalResult<Value> {
    if let Some(v) = env.lookup(name) {
        return Ok(v);
    }
    if let Some(d) = decl::lookup(name) {
        if let Some(v) = d.value() {
            return Ok(v);
        }
        return Err(EvalError::type_mismatch(format!("special form `{name}` used as a value")));
    }
    // serialized code can carry the literal keywords as symbols
    match name {
        "nil" => Ok(Value::Nil),
        "true" => Ok(Value::Bool(true)),
        "false" => Ok(Value::Bool(false)),
        _ => Err(EvalError::unbound(name)),
    }
}

/// Outcome of special-form dispatch.
enum Special {
    Done(Value),
    /// Continue the eval loop with a new expression and environment.
    Tail(Value, EnvRef),
    NotSpecial,
}

/// Outcome of applying a callable.
enum Applied {
    Done(Value),
    Tail(Value, EnvRef),
}

fn expect_args(name: &str, items: &[Value], min: usize, max: usize) -> EvalResult<()> {
    let got = items.len() - 1;
    if got < min || (max != usize::MAX && got > max) {
        return Err(EvalError::arity(name, got, min, max));
    }
    Ok(())
}

fn eval_special(name: &str, items: &[Value], env: &EnvRef) -> EvalResult<Special> {
    match name {
        "quote" => {
            expect_args(name, items, 1, 1)?;
            Ok(Special::Done(items[1].clone().into_peeled()))
        }
        "eval" => {
            expect_args(name, items, 1, 1)?;
            let form = eval(&items[1], env)?;
            let form = match form {
                Value::String(text) => crate::reader::read_one("eval", &text).map_err(EvalError::from)?,
                other => other,
            };
            Ok(Special::Tail(form, env.clone()))
        }
        "time" => {
            expect_args(name, items, 1, 1)?;
            let start = Instant::now();
            let result = eval(&items[1], env)?;
            eprintln!("time: {} took {:?}", items[1].peel_source(), start.elapsed());
            Ok(Special::Done(result))
        }
        "if" => {
            expect_args(name, items, 2, 3)?;
            let cond = eval(&items[1], env)?;
            if cond.is_truthy() {
                Ok(Special::Tail(items[2].clone(), env.clone()))
            } else if let Some(alt) = items.get(3) {
                Ok(Special::Tail(alt.clone(), env.clone()))
            } else {
                Ok(Special::Done(Value::Nil))
            }
        }
        "and" => {
            for item in &items[1..] {
                if !eval(item, env)?.is_truthy() {
                    return Ok(Special::Done(Value::Bool(false)));
                }
            }
            Ok(Special::Done(Value::Bool(true)))
        }
        "or" => {
            for item in &items[1..] {
                if eval(item, env)?.is_truthy() {
                    return Ok(Special::Done(Value::Bool(true)));
                }
            }
            Ok(Special::Done(Value::Bool(false)))
        }
        "collate" => {
            for item in &items[1..] {
                let v = eval(item, env)?;
                if v.is_truthy() {
                    return Ok(Special::Done(v));
                }
            }
            Ok(Special::Done(Value::Nil))
        }
        "collateNil" => {
            for item in &items[1..] {
                let v = eval(item, env)?;
                if !v.is_nil() {
                    return Ok(Special::Done(v));
                }
            }
            Ok(Special::Done(Value::Nil))
        }
        "match" => {
            expect_args(name, items, 1, usize::MAX)?;
            let value = eval(&items[1], env)?;
            eval_match(&value, &items[2..], env)
        }
        "define" | "set" => {
            expect_args(name, items, 2, 2)?;
            let target = items[1].peel_source();
            match target {
                Value::Symbol(sym) => {
                    let value = eval(&items[2], env)?;
                    env.define(sym.clone(), value.clone());
                    Ok(Special::Done(value))
                }
                Value::NthLocalVar(i) => {
                    let value = eval(&items[2], env)?;
                    env.set_slot(*i, value.clone());
                    Ok(Special::Done(value))
                }
                other => Err(EvalError::type_mismatch(format!(
                    "`{name}` target must be a symbol, got {}",
                    other.tag()
                ))),
            }
        }
        "setN" => {
            expect_args(name, items, 2, 2)?;
            let idx = match items[1].peel_source() {
                Value::Int(i) => *i as u32,
                Value::NthLocalVar(i) => *i,
                other => {
                    return Err(EvalError::type_mismatch(format!(
                        "`setN` slot index must be an integer, got {}",
                        other.tag()
                    )));
                }
            };
            let value = eval(&items[2], env)?;
            env.set_slot(idx, value.clone());
            Ok(Special::Done(value))
        }
        "parser" => {
            expect_args(name, items, 1, 3)?;
            let parser = peg::construct(&items[1], items.get(2), items.get(3), env)?;
            Ok(Special::Done(Value::Parser(Rc::new(parser))))
        }
        "lambda" => {
            expect_args(name, items, 2, 3)?;
            let params = items[1].clone().into_peeled();
            let num_positional_vars = match items.get(3).map(Value::peel_source) {
                Some(Value::Int(n)) => *n as u32,
                _ => 0,
            };
            let proc = Rc::new(Proc {
                params,
                body: items[2].clone(),
                env: env.clone(),
                num_positional_vars,
            });
            if jit_enabled()
                && let Some(compiled) = jit::try_compile(&proc)
            {
                return Ok(Special::Done(Value::Jit(Rc::new(compiled))));
            }
            Ok(Special::Done(Value::Proc(proc)))
        }
        "begin" | "!begin" => {
            let scope = if name == "begin" { Env::child(env) } else { env.clone() };
            if items.len() == 1 {
                return Ok(Special::Done(Value::Nil));
            }
            for item in &items[1..items.len() - 1] {
                eval(item, &scope)?;
            }
            Ok(Special::Tail(items[items.len() - 1].clone(), scope))
        }
        "source" => {
            expect_args(name, items, 4, 4)?;
            let loc = SourceLoc {
                source: items[1].coerce_string(),
                line: items[2].to_i64() as u32,
                col: items[3].to_i64() as u32,
            };
            let result = eval(&items[4], env).map_err(|e| e.at(loc))?;
            Ok(Special::Done(result))
        }
        _ => Ok(Special::NotSpecial),
    }
}

/// Tries `match` arms in declaration order. Bindings go into the current
/// frame; per-arm scoping is guaranteed by the optimizer's per-arm meta copy
/// and unique slot numbering.
fn eval_match(value: &Value, arms: &[Value], env: &EnvRef) -> EvalResult<Special> {
    let mut i = 0;
    while i + 1 < arms.len() {
        if matcher::match_pattern(value, &arms[i], env)? {
            return Ok(Special::Tail(arms[i + 1].clone(), env.clone()));
        }
        i += 2;
    }
    if i < arms.len() {
        // odd trailing form is the default
        return Ok(Special::Tail(arms[i].clone(), env.clone()));
    }
    Ok(Special::Done(Value::Nil))
}

/// Applies `callee`, returning either a finished value or a tail jump into a
/// procedure body.
fn apply_tail(callee: Value, args: Vec<Value>, env: &EnvRef) -> EvalResult<Applied> {
    match callee {
        Value::Func(f) => {
            if let Some(d) = decl::registry().lookup_by_func(f) {
                d.check_arity(args.len())?;
            }
            Ok(Applied::Done(f(&args)?))
        }
        Value::FuncEnv(f) => {
            if let Some(d) = decl::registry().lookup_by_env_func(f) {
                d.check_arity(args.len())?;
            }
            Ok(Applied::Done(f(env, &args)?))
        }
        Value::Proc(proc) => {
            let frame = bind_proc_frame(&proc, &args);
            Ok(Applied::Tail(proc.body.clone(), frame))
        }
        Value::Jit(compiled) => {
            if let Some(result) = compiled.call(&args)? {
                return Ok(Applied::Done(result));
            }
            // compiled code bailed; fall back to the interpreted proc
            let proc = compiled.proc().clone();
            let frame = bind_proc_frame(&proc, &args);
            Ok(Applied::Tail(proc.body.clone(), frame))
        }
        Value::Parser(parser) => {
            if args.is_empty() {
                return Err(EvalError::arity("parser", 0, 1, 1));
            }
            let text = args[0].coerce_string();
            Ok(Applied::Done(parser.parse_str(&text)?))
        }
        Value::List(table) => Ok(Applied::Done(dispatch_table(&table, &args))),
        Value::FastDict(dict) => {
            // promoted associations dispatch like `(k v ...)` tables
            let key = args.first().cloned().unwrap_or(Value::Nil);
            Ok(Applied::Done(dict.borrow().get(&key).unwrap_or(Value::Nil)))
        }
        Value::Opaque(opaque) => crate::builtins::session::call_opaque(&opaque, &args).map(Applied::Done),
        other => Err(EvalError::type_mismatch(format!("value of kind {} is not callable", other.tag()))),
    }
}

/// Creates the invocation frame for an interpreted procedure and binds its
/// arguments.
fn bind_proc_frame(proc: &Proc, args: &[Value]) -> EnvRef {
    let frame = Env::child_with_slots(&proc.env, proc.num_positional_vars);
    match proc.params.peel_source() {
        Value::Nil => {}
        // a single symbol binds the entire argument list
        Value::Symbol(name) => frame.bind(name.clone(), Value::list(args.to_vec())),
        Value::List(params) => {
            for (i, param) in params.iter().enumerate() {
                let arg = args.get(i).cloned().unwrap_or(Value::Nil);
                match param.peel_source() {
                    Value::Symbol(name) => frame.bind(name.clone(), arg),
                    Value::NthLocalVar(slot) => frame.set_slot(*slot, arg),
                    _ => {}
                }
            }
        }
        _ => {}
    }
    frame
}

/// A list used as a callable is a dispatch table. Two shapes are supported:
/// all-sublists `((key values...) ...)` returns the matched sub-list, and
/// flat `(k v k v ... default)` returns the matching value, the default for
/// an odd-length tail, or nil.
fn dispatch_table(table: &[Value], args: &[Value]) -> Value {
    let key = args.first().cloned().unwrap_or(Value::Nil);
    let all_sublists = !table.is_empty() && table.iter().all(|e| e.peel_source().as_list().is_some());
    if all_sublists {
        for entry in table {
            let entry = entry.peel_source();
            if let Some(sub) = entry.as_list()
                && sub.first().is_some_and(|k| k.equal(&key))
            {
                return entry.clone();
            }
        }
        return Value::Nil;
    }
    let mut i = 0;
    while i + 1 < table.len() {
        if table[i].equal(&key) {
            return table[i + 1].clone();
        }
        i += 2;
    }
    if i < table.len() {
        return table[i].clone();
    }
    Value::Nil
}

/// Calls an already-evaluated callable with evaluated arguments. Builtins
/// that take function arguments (`map`, `filter`, `reduce`, parser
/// generators) go through here; tail position does not apply.
pub fn call_value(callee: &Value, args: &[Value], env: &EnvRef) -> EvalResult<Value> {
    match apply_tail(callee.clone(), args.to_vec(), env)? {
        Applied::Done(v) => Ok(v),
        Applied::Tail(expr, frame) => eval(&expr, &frame),
    }
}
