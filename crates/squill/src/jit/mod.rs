//! Native-code emission for trivially shaped procedures.
//!
//! The JIT is a pure optimization: for every input, calling the compiled
//! entry yields exactly what interpreting the wrapped procedure would, or the
//! compiled code signals a bail and the caller falls back to the
//! interpreter. Procedures the emitter does not accept stay interpreted.
//!
//! Accepted shapes: a literal body (nil/bool/int/float/string), a positional
//! argument reference, or a call tree over the primitives that declare a JIT
//! emitter (`+ - * / < <= > >= nil? int? number?`) with integer operands.
//! Anything else bails at compile time; runtime type surprises (a float
//! where an int was assumed, nil propagation through `- * /`) bail at run
//! time through a sentinel return.
//!
//! The ABI mirrors the host calling convention: the argument slice base
//! arrives in the first argument register as a pointer to 16-byte
//! `(tag, payload)` records, the record count in the second, and the result
//! comes back as two registers carrying the same `(tag, payload)` layout.
//!
//! Compilation is gated on the `jit` cargo feature and an x86-64 unix
//! target; everywhere else `try_compile` returns `None` and the interpreter
//! carries all execution.

#[cfg(all(feature = "jit", target_arch = "x86_64", unix))]
mod page;
#[cfg(all(feature = "jit", target_arch = "x86_64", unix))]
mod x86_64;

use std::rc::Rc;

use crate::{error::EvalResult, value::Proc, value::Tag, value::Value};

/// Raw `(tag, payload)` record passed to and returned from compiled code.
/// Numeric payloads travel by value; everything else carries a sentinel and
/// only participates in tag tests.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawVal {
    pub tag: u64,
    pub bits: u64,
}

/// Returned tag signaling "fall back to the interpreter".
pub const BAIL: u64 = u64::MAX;

/// Payload sentinel for arguments whose value cannot travel in a register.
pub const OPAQUE_BITS: u64 = u64::MAX;

impl RawVal {
    /// Encodes an argument for the compiled code. Non-numeric values keep
    /// their tag (so tag tests work) but carry an opaque payload.
    fn encode(value: &Value) -> Self {
        let tag = value.tag() as u64;
        let bits = match value.peel_source() {
            Value::Nil => 0,
            Value::Bool(b) => u64::from(*b),
            Value::Int(i) => *i as u64,
            Value::Date(d) => *d as u64,
            Value::Float(f) => f.to_bits(),
            _ => OPAQUE_BITS,
        };
        Self { tag, bits }
    }
}

/// A procedure with a compiled native entry.
#[derive(Debug)]
pub struct JitProc {
    proc: Rc<Proc>,
    #[cfg(all(feature = "jit", target_arch = "x86_64", unix))]
    code: page::CodePage,
    /// String literals the compiled code returns by pool index.
    #[cfg(all(feature = "jit", target_arch = "x86_64", unix))]
    pool: Vec<Value>,
    /// Highest argument slot the code reads; the call wrapper pads the
    /// argument records up to this.
    #[cfg(all(feature = "jit", target_arch = "x86_64", unix))]
    max_arg: usize,
}

impl JitProc {
    /// The interpreted procedure this entry was compiled from.
    #[must_use]
    pub fn proc(&self) -> &Rc<Proc> {
        &self.proc
    }

    /// Runs the compiled entry. `Ok(None)` means the code bailed and the
    /// caller must interpret the wrapped procedure instead.
    #[cfg(all(feature = "jit", target_arch = "x86_64", unix))]
    pub fn call(&self, args: &[Value]) -> EvalResult<Option<Value>> {
        let mut raw: Vec<RawVal> = args.iter().map(RawVal::encode).collect();
        if raw.len() <= self.max_arg {
            raw.resize(self.max_arg + 1, RawVal { tag: Tag::Nil as u64, bits: 0 });
        }
        let out = self.code.invoke(raw.as_ptr(), raw.len());
        Ok(self.decode(out))
    }

    #[cfg(not(all(feature = "jit", target_arch = "x86_64", unix)))]
    pub fn call(&self, _args: &[Value]) -> EvalResult<Option<Value>> {
        Ok(None)
    }

    #[cfg(all(feature = "jit", target_arch = "x86_64", unix))]
    fn decode(&self, out: RawVal) -> Option<Value> {
        match out.tag {
            t if t == Tag::Nil as u64 => Some(Value::Nil),
            t if t == Tag::Bool as u64 => Some(Value::Bool(out.bits != 0)),
            t if t == Tag::Int as u64 => Some(Value::Int(out.bits as i64)),
            t if t == Tag::Float as u64 => Some(Value::Float(f64::from_bits(out.bits))),
            t if t == Tag::Date as u64 => Some(Value::Date(out.bits as i64)),
            t if t == Tag::String as u64 => self.pool.get(out.bits as usize).cloned(),
            _ => None,
        }
    }
}

/// Attempts to compile `proc`. `None` means the shape is unsupported and the
/// procedure stays interpreted.
#[cfg(all(feature = "jit", target_arch = "x86_64", unix))]
#[must_use]
pub fn try_compile(proc: &Rc<Proc>) -> Option<JitProc> {
    let compiled = x86_64::compile(&proc.body)?;
    let code = page::CodePage::new(&compiled.code)?;
    Some(JitProc {
        proc: proc.clone(),
        code,
        pool: compiled.pool,
        max_arg: compiled.max_arg,
    })
}

#[cfg(not(all(feature = "jit", target_arch = "x86_64", unix)))]
#[must_use]
pub fn try_compile(_proc: &Rc<Proc>) -> Option<JitProc> {
    None
}
