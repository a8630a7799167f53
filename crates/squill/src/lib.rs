#![doc = include_str!("../../../README.md")]
#![expect(clippy::cast_possible_truncation, reason = "numeric narrowing is checked at call sites")]
#![expect(clippy::cast_sign_loss, reason = "tag codes and payload bits reinterpret intentionally")]
#![expect(clippy::cast_possible_wrap, reason = "payload bits round-trip through u64")]

mod builtins;
mod decl;
mod dict;
mod env;
mod error;
mod eval;
mod jit;
mod json;
mod matcher;
mod optimizer;
mod peg;
mod reader;
mod repl;
mod scheduler;
mod value;

pub use crate::{
    decl::{Decl, Kind, Param, Registry, registry},
    dict::Dict,
    jit::JitProc,
    peg::ScmParser,
    env::{Env, EnvRef},
    error::{ErrorKind, EvalError, EvalResult, ReadError, ReplError, SourceLoc},
    eval::{call_value, eval, jit_enabled, set_jit_enabled},
    json::{decode_global as json_decode, encode as json_encode},
    matcher::match_pattern,
    optimizer::optimize,
    reader::{read_multi, read_one},
    repl::{Config, ReplProgress, ReplSession, run_source},
    scheduler::{Scheduler, global as global_scheduler},
    value::{CompiledRegex, EnvFn, NativeFn, OpaqueValue, Proc, SrcInfo, Tag, Value},
};
