//! The builtin surface.
//!
//! Each submodule owns one category of builtins and contributes its
//! declarations through an `install` function; every builtin is an ordinary
//! native function described by a [`crate::decl::Decl`] so arity, purity,
//! documentation, and JIT wiring live in one place.

pub(crate) mod arith;
pub(crate) mod dates;
pub(crate) mod dicts;
pub(crate) mod lists;
pub(crate) mod session;
pub(crate) mod streams;
pub(crate) mod strings;
pub(crate) mod vectors;

use crate::{
    decl::{Decl, Kind, Registry},
    error::{EvalError, EvalResult},
    value::Value,
};

/// Installs the whole builtin surface into the registry. Called exactly once
/// from [`crate::decl::registry`].
pub(crate) fn install(registry: &mut Registry) {
    install_special_forms(registry);
    arith::install(registry);
    strings::install(registry);
    lists::install(registry);
    dicts::install(registry);
    dates::install(registry);
    vectors::install(registry);
    streams::install(registry);
    session::install(registry);
}

/// Special forms are dispatched by the evaluator; their declarations exist
/// for documentation, arity reporting, and so the serializer can recognize
/// the names.
fn install_special_forms(registry: &mut Registry) {
    registry.add(Decl::special("quote").args(1, 1).doc("returns its argument unevaluated"));
    registry.add(
        Decl::special("eval")
            .args(1, 1)
            .doc("evaluates its argument, then evaluates the result in the current scope"),
    );
    registry.add(
        Decl::special("time")
            .args(1, 1)
            .doc("evaluates the form, reports wall-clock duration to stderr, returns the result"),
    );
    registry.add(Decl::special("if").args(2, 3).doc("conditional with optional else branch"));
    registry.add(Decl::special("and").doc("short-circuit conjunction, returns a bool"));
    registry.add(Decl::special("or").doc("short-circuit disjunction, returns a bool"));
    registry.add(Decl::special("collate").doc("returns the first truthy argument, else nil"));
    registry.add(Decl::special("collateNil").doc("returns the first non-nil argument, else nil"));
    registry.add(
        Decl::special("match")
            .args(1, crate::decl::VARIADIC)
            .doc("unifies a value against pattern/result arms with an optional default"),
    );
    registry.add(
        Decl::special("define")
            .args(2, 2)
            .doc("binds a symbol in the innermost open scope"),
    );
    registry.add(Decl::special("set").args(2, 2).doc("rebinds a symbol in the innermost open scope"));
    registry.add(Decl::special("setN").args(2, 2).doc("writes a positional slot"));
    registry.add(
        Decl::special("parser")
            .args(1, 3)
            .doc("constructs a parser from syntax, optional generator, optional skipper"),
    );
    registry.add(
        Decl::special("lambda")
            .args(2, 3)
            .doc("builds a procedure capturing the current scope"),
    );
    registry.add(Decl::special("begin").doc("evaluates forms in a child scope, returns the last"));
    registry.add(
        Decl::special("!begin")
            .doc("like begin but reuses the current frame; emitted by the optimizer"),
    );
    registry.add(
        Decl::special("source")
            .args(4, 4)
            .doc("evaluates a form wrapped with source location info"),
    );

    registry.add(
        Decl::func("error", error_builtin)
            .args(1, 1)
            .param("value", Kind::Any, "payload carried by the raised error")
            .doc("raises a user error carrying the value"),
    );
    registry.add(
        Decl::func("symbol", symbol_builtin)
            .args(1, 1)
            .param("name", Kind::String, "symbol text")
            .result(Kind::Symbol)
            .pure()
            .doc("builds a symbol from a string"),
    );
    registry.add(
        Decl::func_env("apply", apply_builtin)
            .args(2, 2)
            .param("f", Kind::Func, "callable to invoke")
            .param("args", Kind::List, "argument list")
            .doc("calls a function with a list of arguments"),
    );
    registry.add(
        Decl::func_env("apply_assoc", apply_assoc_builtin)
            .args(2, 2)
            .param("f", Kind::Func, "callable to invoke")
            .param("assoc", Kind::Assoc, "association flattened into alternating arguments")
            .doc("calls a function with an association's pairs as alternating arguments"),
    );
}

fn error_builtin(args: &[Value]) -> EvalResult<Value> {
    Err(EvalError::user(args[0].clone()))
}

fn symbol_builtin(args: &[Value]) -> EvalResult<Value> {
    Ok(Value::symbol(args[0].coerce_string()))
}

fn apply_builtin(env: &crate::env::EnvRef, args: &[Value]) -> EvalResult<Value> {
    let call_args = match args[1].peel_source() {
        Value::List(items) => items.to_vec(),
        Value::Nil => Vec::new(),
        other => {
            return Err(EvalError::type_mismatch(format!(
                "`apply` needs an argument list, got {}",
                other.tag()
            )));
        }
    };
    crate::eval::call_value(&args[0], &call_args, env)
}

fn apply_assoc_builtin(env: &crate::env::EnvRef, args: &[Value]) -> EvalResult<Value> {
    let call_args = dicts::assoc_pairs(&args[1])?;
    crate::eval::call_value(&args[0], &call_args, env)
}

