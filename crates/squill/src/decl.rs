//! The process-wide declaration registry.
//!
//! Every builtin is described by a [`Decl`]: documentation, arity range,
//! parameter descriptors, result kind, the native implementation, a purity
//! flag (pure builtins may be constant-folded), an optional call-site
//! optimizer (used to pre-compile literal regex patterns), and an optional
//! JIT emitter id. The registry is installed once on first use and is
//! read-only afterwards, so worker threads can evaluate independent
//! expressions without synchronization.

use std::sync::OnceLock;

use ahash::AHashMap;
use strum::Display;

use crate::{
    error::{EvalError, EvalResult},
    value::{EnvFn, NativeFn, Value},
};

/// Maximum arity marker for variadic builtins.
pub const VARIADIC: usize = usize::MAX;

/// Coarse value-kind hints used in declarations and documentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Kind {
    Any,
    Bool,
    Int,
    Number,
    String,
    Symbol,
    List,
    Assoc,
    Date,
    Vector,
    Func,
    Parser,
    Regex,
    Stream,
    Session,
}

/// Identifies the JIT emitter wired to a declaration. The actual code
/// generation lives in the `jit` module; declarations only carry the id so
/// the registry stays independent of the target architecture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitOp {
    Add,
    Sub,
    Mul,
    Div,
    Lt,
    Le,
    Gt,
    Ge,
    IsNil,
    IsInt,
    IsNumber,
}

/// Native implementation of a declared name.
#[derive(Clone, Copy)]
pub enum NativeImp {
    /// Plain function over evaluated arguments.
    Func(NativeFn),
    /// Function that also reads the calling environment.
    FuncEnv(EnvFn),
    /// Handled by the evaluator's special-form dispatch; the declaration
    /// exists for documentation, arity reporting, and serialization.
    Special,
}

impl std::fmt::Debug for NativeImp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Func(_) => f.write_str("Func"),
            Self::FuncEnv(_) => f.write_str("FuncEnv"),
            Self::Special => f.write_str("Special"),
        }
    }
}

/// Parameter descriptor for documentation and tooling.
#[derive(Debug, Clone, Copy)]
pub struct Param {
    pub name: &'static str,
    pub kind: Kind,
    pub doc: &'static str,
}

/// Call-site rewriter: receives the already-optimized argument expressions
/// and may return replacement arguments (e.g. a literal pattern compiled to a
/// regex value). Returning `None` leaves the call unchanged.
pub type CallOptimizer = fn(&[Value]) -> Option<Vec<Value>>;

/// One entry of the declaration registry.
#[derive(Debug)]
pub struct Decl {
    pub name: &'static str,
    pub doc: &'static str,
    pub min_args: usize,
    pub max_args: usize,
    pub params: Vec<Param>,
    pub result: Kind,
    pub imp: NativeImp,
    /// Pure builtins are deterministic functions of their inputs; the
    /// optimizer may fold calls whose arguments are all literals.
    pub pure: bool,
    pub optimizer: Option<CallOptimizer>,
    pub jit: Option<JitOp>,
}

impl Decl {
    #[must_use]
    pub fn func(name: &'static str, imp: NativeFn) -> Self {
        Self::new(name, NativeImp::Func(imp))
    }

    #[must_use]
    pub fn func_env(name: &'static str, imp: EnvFn) -> Self {
        Self::new(name, NativeImp::FuncEnv(imp))
    }

    #[must_use]
    pub fn special(name: &'static str) -> Self {
        Self::new(name, NativeImp::Special)
    }

    fn new(name: &'static str, imp: NativeImp) -> Self {
        Self {
            name,
            doc: "",
            min_args: 0,
            max_args: VARIADIC,
            params: Vec::new(),
            result: Kind::Any,
            imp,
            pure: false,
            optimizer: None,
            jit: None,
        }
    }

    #[must_use]
    pub fn doc(mut self, doc: &'static str) -> Self {
        self.doc = doc;
        self
    }

    #[must_use]
    pub fn args(mut self, min: usize, max: usize) -> Self {
        self.min_args = min;
        self.max_args = max;
        self
    }

    #[must_use]
    pub fn param(mut self, name: &'static str, kind: Kind, doc: &'static str) -> Self {
        self.params.push(Param { name, kind, doc });
        self
    }

    #[must_use]
    pub fn result(mut self, kind: Kind) -> Self {
        self.result = kind;
        self
    }

    #[must_use]
    pub fn pure(mut self) -> Self {
        self.pure = true;
        self
    }

    #[must_use]
    pub fn optimize_with(mut self, optimizer: CallOptimizer) -> Self {
        self.optimizer = Some(optimizer);
        self
    }

    #[must_use]
    pub fn jit(mut self, op: JitOp) -> Self {
        self.jit = Some(op);
        self
    }

    /// Checks `got` against the declared arity range.
    pub fn check_arity(&self, got: usize) -> EvalResult<()> {
        if got < self.min_args || got > self.max_args {
            return Err(EvalError::arity(self.name, got, self.min_args, self.max_args));
        }
        Ok(())
    }

    /// The callable value for this declaration, `None` for special forms.
    #[must_use]
    pub fn value(&self) -> Option<Value> {
        match self.imp {
            NativeImp::Func(f) => Some(Value::Func(f)),
            NativeImp::FuncEnv(f) => Some(Value::FuncEnv(f)),
            NativeImp::Special => None,
        }
    }
}

/// The installed registry: name lookup plus reverse lookup by implementation
/// pointer (used by the printer and the JSON codec to name native functions).
#[derive(Debug, Default)]
pub struct Registry {
    decls: Vec<Decl>,
    by_name: AHashMap<&'static str, usize>,
    by_func: AHashMap<usize, usize>,
    by_env_func: AHashMap<usize, usize>,
}

impl Registry {
    pub fn add(&mut self, decl: Decl) {
        let idx = self.decls.len();
        debug_assert!(
            !self.by_name.contains_key(decl.name),
            "duplicate declaration `{}`",
            decl.name
        );
        self.by_name.insert(decl.name, idx);
        match decl.imp {
            NativeImp::Func(f) => {
                self.by_func.insert(f as usize, idx);
            }
            NativeImp::FuncEnv(f) => {
                self.by_env_func.insert(f as usize, idx);
            }
            NativeImp::Special => {}
        }
        self.decls.push(decl);
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&Decl> {
        self.by_name.get(name).map(|&idx| &self.decls[idx])
    }

    #[must_use]
    pub fn lookup_by_func(&self, f: NativeFn) -> Option<&Decl> {
        self.by_func.get(&(f as usize)).map(|&idx| &self.decls[idx])
    }

    #[must_use]
    pub fn lookup_by_env_func(&self, f: EnvFn) -> Option<&Decl> {
        self.by_env_func.get(&(f as usize)).map(|&idx| &self.decls[idx])
    }

    /// All declared names, for REPL introspection.
    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.decls.iter().map(|d| d.name)
    }
}

static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// The process-wide registry, installing the builtin surface on first use.
pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(|| {
        let mut registry = Registry::default();
        crate::builtins::install(&mut registry);
        registry
    })
}

/// Shorthand: declaration for `name` if it exists.
#[must_use]
pub fn lookup(name: &str) -> Option<&'static Decl> {
    registry().lookup(name)
}

/// Name of a plain native function, for printing.
#[must_use]
pub fn name_of_native(f: NativeFn) -> Option<&'static str> {
    registry().lookup_by_func(f).map(|d| d.name)
}

/// Name of an environment-taking native function, for printing.
#[must_use]
pub fn name_of_env_native(f: EnvFn) -> Option<&'static str> {
    registry().lookup_by_env_func(f).map(|d| d.name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_resolves_builtins_both_ways() {
        let decl = lookup("+").expect("+ is declared");
        assert!(decl.pure);
        let Some(Value::Func(f)) = decl.value() else {
            panic!("+ should be a plain native");
        };
        assert_eq!(name_of_native(f), Some("+"));
    }

    #[test]
    fn special_forms_are_declared_without_values() {
        let decl = lookup("if").expect("if is declared");
        assert!(matches!(decl.imp, NativeImp::Special));
        assert!(decl.value().is_none());
    }

    #[test]
    fn arity_errors_name_the_range() {
        let decl = lookup("nth").expect("nth is declared");
        let err = decl.check_arity(1).unwrap_err();
        assert!(err.message.contains("nth"));
    }
}
