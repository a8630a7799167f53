//! Sessions, contexts, and concurrency builtins.
//!
//! A session is a mutex-protected string-keyed map shared between parallel
//! evaluations. Values cross the thread boundary through the JSON codec
//! (runtime values are single-threaded `Rc` structures), so a session stores
//! interchange trees and rebuilds values on read.
//!
//! A context carries a cancellation flag and the current session; library
//! code observes cancellation cooperatively via `(context "check")`, and
//! `sleep` waits on the flag so it can be interrupted.

use std::{
    cell::RefCell,
    rc::Rc,
    sync::{Arc, Condvar, Mutex, OnceLock, PoisonError},
    time::Duration,
};

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::{
    decl::{Decl, Kind, Registry},
    env::EnvRef,
    error::{ErrorKind, EvalError, EvalResult},
    eval::call_value,
    json, optimizer, reader, scheduler,
    value::{OpaqueValue, Value},
};

pub(crate) const SESSION_TAG: u32 = 1;
pub(crate) const CONTEXT_TAG: u32 = 2;

type SessionStore = Arc<Mutex<IndexMap<String, serde_json::Value>>>;

/// Cancellation flag with a condvar so sleepers wake immediately.
pub(crate) struct CancelFlag {
    fired: Mutex<bool>,
    wakeup: Condvar,
}

impl CancelFlag {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            fired: Mutex::new(false),
            wakeup: Condvar::new(),
        })
    }

    fn fire(&self) {
        *self.fired.lock().unwrap_or_else(PoisonError::into_inner) = true;
        self.wakeup.notify_all();
    }

    fn is_fired(&self) -> bool {
        *self.fired.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleeps up to `duration`; true when woken by cancellation.
    fn cancelled_within(&self, duration: Duration) -> bool {
        let guard = self.fired.lock().unwrap_or_else(PoisonError::into_inner);
        if *guard {
            return true;
        }
        let (guard, _) = self
            .wakeup
            .wait_timeout(guard, duration)
            .unwrap_or_else(PoisonError::into_inner);
        *guard
    }
}

struct SessionHandle(SessionStore);

struct ContextHandle {
    cancel: Arc<CancelFlag>,
    session: Option<SessionStore>,
}

thread_local! {
    /// Ambient context for the evaluation running on this thread.
    static CURRENT: RefCell<Option<Rc<OpaqueValue>>> = const { RefCell::new(None) };
    /// Memoized `once` results, keyed by callable identity.
    static ONCE_RESULTS: RefCell<AHashMap<usize, Value>> = RefCell::new(AHashMap::new());
}

pub(crate) fn install(registry: &mut Registry) {
    registry.add(
        Decl::func("newsession", newsession)
            .args(0, 0)
            .result(Kind::Session)
            .doc("creates a session: call with no args for keys, (k) to get, (k v) to set"),
    );
    registry.add(
        Decl::func("context", context)
            .args(0, 1)
            .doc("the ambient context; (context \"check\") raises once cancellation has fired"),
    );
    registry.add(
        Decl::func("sleep", sleep)
            .args(1, 1)
            .param("seconds", Kind::Number, "how long to sleep; fractional values allowed")
            .doc("cancellable sleep observing the ambient context"),
    );
    registry.add(
        Decl::func_env("once", once)
            .args(1, 1)
            .param("f", Kind::Func, "thunk to run at most one time")
            .doc("runs a thunk exactly once and caches the result; failures log and cache nil"),
    );
    registry.add(
        Decl::func_env("mutex", mutex)
            .args(2, 2)
            .param("name", Kind::String, "process-wide lock name")
            .param("f", Kind::Func, "thunk run while the lock is held")
            .doc("serializes evaluation of a thunk under a named process-wide lock"),
    );
    registry.add(
        Decl::func_env("setTimeout", set_timeout)
            .args(2, 2)
            .param("f", Kind::Func, "callback; runs on a worker with a fresh global scope")
            .param("ms", Kind::Int, "delay in milliseconds")
            .result(Kind::Int)
            .doc("schedules a deferred callback, returns a cancellation token"),
    );
    registry.add(
        Decl::func("clearTimeout", clear_timeout)
            .args(1, 1)
            .param("token", Kind::Int, "token from setTimeout")
            .result(Kind::Bool),
    );
}

fn newsession(_args: &[Value]) -> EvalResult<Value> {
    let store: SessionStore = Arc::new(Mutex::new(IndexMap::new()));
    Ok(Value::Opaque(OpaqueValue::new(SESSION_TAG, "session", SessionHandle(store))))
}

/// The thread's ambient context, created on first use.
fn ambient_context() -> Rc<OpaqueValue> {
    CURRENT.with(|current| {
        current
            .borrow_mut()
            .get_or_insert_with(|| {
                OpaqueValue::new(
                    CONTEXT_TAG,
                    "context",
                    ContextHandle {
                        cancel: CancelFlag::new(),
                        session: None,
                    },
                )
            })
            .clone()
    })
}

fn ambient_cancel_flag() -> Arc<CancelFlag> {
    let ctx = ambient_context();
    let data = ctx.data.borrow();
    data.downcast_ref::<ContextHandle>()
        .map_or_else(CancelFlag::new, |handle| handle.cancel.clone())
}

fn context(args: &[Value]) -> EvalResult<Value> {
    match args.first() {
        None => Ok(Value::Opaque(ambient_context())),
        Some(op) => context_op(&ambient_context(), &op.coerce_string()),
    }
}

fn context_op(ctx: &Rc<OpaqueValue>, op: &str) -> EvalResult<Value> {
    let data = ctx.data.borrow();
    let handle = data
        .downcast_ref::<ContextHandle>()
        .ok_or_else(|| EvalError::internal("context handle with foreign payload"))?;
    match op {
        "check" => {
            if handle.cancel.is_fired() {
                return Err(EvalError::new(ErrorKind::Cancelled, "context cancelled"));
            }
            Ok(Value::Nil)
        }
        "cancel" => {
            handle.cancel.fire();
            Ok(Value::Nil)
        }
        "session" => match &handle.session {
            Some(store) => Ok(Value::Opaque(OpaqueValue::new(
                SESSION_TAG,
                "session",
                SessionHandle(store.clone()),
            ))),
            None => Ok(Value::Nil),
        },
        other => Err(EvalError::type_mismatch(format!("unknown context operation `{other}`"))),
    }
}

/// Callable dispatch for opaque values, reached through the evaluator's
/// apply path. Sessions expose the three arities (list-keys / get / set);
/// contexts expose their operations by name.
pub(crate) fn call_opaque(opaque: &Rc<OpaqueValue>, args: &[Value]) -> EvalResult<Value> {
    match opaque.tag {
        SESSION_TAG => {
            let data = opaque.data.borrow();
            let handle = data
                .downcast_ref::<SessionHandle>()
                .ok_or_else(|| EvalError::internal("session handle with foreign payload"))?;
            let mut store = handle.0.lock().unwrap_or_else(PoisonError::into_inner);
            match args {
                [] => Ok(Value::list(store.keys().map(Value::string).collect())),
                [key] => {
                    let key = key.coerce_string();
                    Ok(store.get(&key).map_or(Value::Nil, json::from_json))
                }
                [key, value] => {
                    let key = key.coerce_string();
                    store.insert(key, json::to_json(value)?);
                    Ok(value.clone())
                }
                _ => Err(EvalError::arity("session", args.len(), 0, 2)),
            }
        }
        CONTEXT_TAG => match args {
            [] => Ok(Value::Nil),
            [op] => context_op(opaque, &op.coerce_string()),
            _ => Err(EvalError::arity("context", args.len(), 0, 1)),
        },
        _ => Err(EvalError::type_mismatch(format!("{} is not callable", opaque.name))),
    }
}

fn sleep(args: &[Value]) -> EvalResult<Value> {
    let seconds = args[0].to_f64().max(0.0);
    let flag = ambient_cancel_flag();
    if flag.cancelled_within(Duration::from_secs_f64(seconds)) {
        return Err(EvalError::new(ErrorKind::Cancelled, "sleep cancelled"));
    }
    Ok(Value::Nil)
}

/// Identity of a callable for the `once` cache.
fn callable_identity(v: &Value) -> Option<usize> {
    match v.peel_source() {
        Value::Proc(p) => Some(Rc::as_ptr(p) as usize),
        Value::Jit(p) => Some(Rc::as_ptr(p) as usize),
        Value::Func(f) => Some(*f as usize),
        Value::FuncEnv(f) => Some(*f as usize),
        _ => None,
    }
}

fn once(env: &EnvRef, args: &[Value]) -> EvalResult<Value> {
    let Some(key) = callable_identity(&args[0]) else {
        return Err(EvalError::type_mismatch("`once` needs a callable"));
    };
    let cached = ONCE_RESULTS.with(|results| results.borrow().get(&key).cloned());
    if let Some(v) = cached {
        return Ok(v);
    }
    // failures are logged and cached as nil so the thunk never reruns
    let result = match call_value(&args[0], &[], env) {
        Ok(v) => v,
        Err(error) => {
            eprintln!("once: {error}");
            Value::Nil
        }
    };
    ONCE_RESULTS.with(|results| results.borrow_mut().insert(key, result.clone()));
    Ok(result)
}

static NAMED_MUTEXES: OnceLock<Mutex<AHashMap<String, Arc<Mutex<()>>>>> = OnceLock::new();

fn mutex(env: &EnvRef, args: &[Value]) -> EvalResult<Value> {
    let name = args[0].coerce_string();
    let lock = {
        let registry = NAMED_MUTEXES.get_or_init(|| Mutex::new(AHashMap::new()));
        let mut map = registry.lock().unwrap_or_else(PoisonError::into_inner);
        map.entry(name).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    };
    let guard = lock.lock().unwrap_or_else(PoisonError::into_inner);
    let result = call_value(&args[1], &[], env);
    drop(guard);
    result
}

fn set_timeout(_env: &EnvRef, args: &[Value]) -> EvalResult<Value> {
    if callable_identity(&args[0]).is_none() {
        return Err(EvalError::type_mismatch("`setTimeout` needs a callable"));
    }
    // the callback crosses the thread boundary in printed form and replays
    // in a fresh global scope on the worker
    let printed = format!("({})", args[0]);
    let ms = args[1].to_i64().max(0) as u64;
    let token = scheduler::global().schedule(
        Duration::from_millis(ms),
        Box::new(move || match reader::read_one("setTimeout", &printed) {
            Ok(form) => {
                let env = crate::env::Env::new_global();
                let optimized = optimizer::optimize(&form, false);
                if let Err(error) = crate::eval::eval(&optimized, &env) {
                    eprintln!("setTimeout callback failed: {error}");
                }
            }
            Err(error) => eprintln!("setTimeout callback failed to parse: {error}"),
        }),
    );
    Ok(Value::Int(token as i64))
}

fn clear_timeout(args: &[Value]) -> EvalResult<Value> {
    let token = args[0].to_i64().max(0) as u64;
    Ok(Value::Bool(scheduler::global().cancel(token)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::Env;

    #[test]
    fn session_three_arities() {
        let session = newsession(&[]).unwrap();
        let Value::Opaque(handle) = &session else { panic!("expected opaque") };
        assert_eq!(call_opaque(handle, &[]).unwrap(), Value::empty_list());
        call_opaque(handle, &[Value::string("k"), Value::Int(42)]).unwrap();
        assert_eq!(call_opaque(handle, &[Value::string("k")]).unwrap(), Value::Int(42));
        assert_eq!(
            call_opaque(handle, &[]).unwrap(),
            Value::list(vec![Value::string("k")])
        );
        assert_eq!(call_opaque(handle, &[Value::string("missing")]).unwrap(), Value::Nil);
    }

    #[test]
    fn context_check_passes_until_cancelled() {
        let ctx = ambient_context();
        // fresh flag per test thread
        assert!(context_op(&ctx, "check").is_ok());
        context_op(&ctx, "cancel").unwrap();
        let err = context_op(&ctx, "check").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Cancelled);
    }

    #[test]
    fn once_caches_by_identity() {
        let env = Env::new_global();
        let counter = Value::Func(|_args: &[Value]| Ok(Value::Int(7)));
        let first = once(&env, &[counter.clone()]).unwrap();
        let second = once(&env, &[counter]).unwrap();
        assert_eq!(first, Value::Int(7));
        assert_eq!(second, Value::Int(7));
    }
}
