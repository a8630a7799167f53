//! Nested binding frames.
//!
//! A frame carries named bindings, positional slots written by the
//! optimizer-numbered `setN` form, and an optional outer frame. Lookup walks
//! outward; definition writes into the nearest frame whose `no_define` flag is
//! unset, which is how imports propagate to the globals while `match` arms and
//! parser generators stay contained.

use std::{cell::RefCell, rc::Rc};

use ahash::AHashMap;

use crate::value::Value;

/// Shared handle to a frame. Frames are single-threaded; interior mutability
/// is `RefCell`, sharing is `Rc`.
pub type EnvRef = Rc<Env>;

/// One binding frame.
#[derive(Debug, Default)]
pub struct Env {
    /// Named bindings, created by `define`/`set` and parameter binding.
    vars: RefCell<AHashMap<Rc<str>, Value>>,
    /// Positional slots indexed by `NthLocalVar`. Never escape the frame.
    slots: RefCell<Vec<Value>>,
    /// Enclosing frame, `None` for the global frame.
    outer: Option<EnvRef>,
    /// When set, `define` skips this frame and writes further out.
    no_define: bool,
}

impl Env {
    /// Creates a fresh global frame.
    #[must_use]
    pub fn new_global() -> EnvRef {
        Rc::new(Self::default())
    }

    /// Creates a child frame of `outer`.
    #[must_use]
    pub fn child(outer: &EnvRef) -> EnvRef {
        Rc::new(Self {
            outer: Some(outer.clone()),
            ..Self::default()
        })
    }

    /// Creates a child frame that `define` writes through rather than into.
    ///
    /// Used for parser generator scopes: bindings made by `(define var sub)`
    /// parser nodes are seeded directly via [`Env::bind`], while `define`
    /// forms evaluated inside the generator cannot clobber the scope.
    #[must_use]
    pub fn child_no_define(outer: &EnvRef) -> EnvRef {
        Rc::new(Self {
            outer: Some(outer.clone()),
            no_define: true,
            ..Self::default()
        })
    }

    /// Creates a child frame with `n` positional slots pre-filled with nil.
    #[must_use]
    pub fn child_with_slots(outer: &EnvRef, n: u32) -> EnvRef {
        Rc::new(Self {
            outer: Some(outer.clone()),
            slots: RefCell::new(vec![Value::Nil; n as usize]),
            ..Self::default()
        })
    }

    /// Looks up `name`, walking outward until found.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(v) = self.vars.borrow().get(name) {
            return Some(v.clone());
        }
        self.outer.as_ref().and_then(|outer| outer.lookup(name))
    }

    /// True when `name` is bound in this frame or any enclosing one.
    #[must_use]
    pub fn is_bound(&self, name: &str) -> bool {
        self.vars.borrow().contains_key(name) || self.outer.as_ref().is_some_and(|o| o.is_bound(name))
    }

    /// Writes `name` into the nearest frame whose `no_define` flag is unset.
    pub fn define(&self, name: Rc<str>, value: Value) {
        if self.no_define {
            if let Some(outer) = &self.outer {
                outer.define(name, value);
                return;
            }
            // a no_define global frame still has to store the binding somewhere
        }
        self.vars.borrow_mut().insert(name, value);
    }

    /// Binds directly into this frame, ignoring `no_define`.
    ///
    /// Parameter binding, `match` captures, and parser `(define var sub)`
    /// seeds use this so their bindings stay in the target frame.
    pub fn bind(&self, name: Rc<str>, value: Value) {
        self.vars.borrow_mut().insert(name, value);
    }

    /// Reads positional slot `idx`, nil when the slot was never written.
    #[must_use]
    pub fn get_slot(&self, idx: u32) -> Value {
        self.slots.borrow().get(idx as usize).cloned().unwrap_or(Value::Nil)
    }

    /// Writes positional slot `idx`, growing the slot vector as needed.
    pub fn set_slot(&self, idx: u32, value: Value) {
        let mut slots = self.slots.borrow_mut();
        let idx = idx as usize;
        if idx >= slots.len() {
            slots.resize(idx + 1, Value::Nil);
        }
        slots[idx] = value;
    }

    /// Number of positional slots currently allocated in this frame.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.slots.borrow().len()
    }

    /// Snapshot of the names bound directly in this frame.
    #[must_use]
    pub fn local_names(&self) -> Vec<Rc<str>> {
        self.vars.borrow().keys().cloned().collect()
    }
}
