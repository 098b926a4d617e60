//! Execution state (spec.md §3, §4.4): the value stack, the call-info
//! chain, and the globals table.
//!
//! Frames are addressed via `(base, k)` pairs rather than held as slice
//! views, so a stack growth never leaves a stale reference alive
//! (spec.md §4.4, Design Notes in spec.md §9).

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::RuntimeError;
use crate::value::{Closure, Table, Value};
use crate::VmConfig;

/// A frame descriptor (spec.md §3). `num_results == -1` means "the
/// caller wants every result" (`C == 0` in the `CALL` encoding).
pub struct CallInfo {
    pub closure: Rc<Closure>,
    pub func_index: usize,
    pub base: usize,
    pub num_results: isize,
    pub pc: usize,
    pub prev: Option<Box<CallInfo>>,
    /// Number of extra arguments sitting just below `base`, reachable via
    /// `VARARG` (spec.md §4.5). Zero for non-vararg prototypes.
    pub num_varargs: usize,
}

/// Owns the stack, the call-info chain and the globals table
/// (spec.md §3).
pub struct State {
    pub stack: Vec<Value>,
    pub top: usize,
    pub globals: Rc<RefCell<Table>>,
    pub ci: Option<Box<CallInfo>>,
    /// Number of frames currently on `ci`, tracked incrementally so
    /// `CALL` doesn't have to walk the chain to enforce `max_call_depth`.
    pub call_depth: usize,
    pub max_call_depth: usize,
}

impl State {
    /// Builds the initial state for an entry closure. The entry closure's
    /// sole upvalue (if it has one) is wired to `globals`, per spec.md §3:
    /// "The entry closure has at most one upvalue; if exactly one, it is
    /// the globals table." This core does not expose the globals table as
    /// a `Value::Table` upvalue slot (upvalue slots hold plain `Value`s,
    /// and nothing in this core reads a table out of an upvalue except
    /// through `GETTABUP`/`SETTABUP`, which operate on `Value` upvalues
    /// directly) — so the entry closure's upvalue, when present, is set to
    /// `Value::Table(globals.clone())`.
    pub fn new(entry: Rc<Closure>, config: VmConfig) -> Result<State, RuntimeError> {
        let globals = Rc::new(RefCell::new(Table::new()));
        if !entry.upvalues.is_empty() {
            *entry.upvalues[0].borrow_mut() = Value::Table(globals.clone());
        }

        let max_stack = entry.proto.max_stack_size as usize;
        let mut stack = Vec::with_capacity(config.initial_stack_capacity.max(max_stack));
        stack.resize(max_stack, Value::Nil);

        let ci = CallInfo {
            closure: entry,
            func_index: 0,
            base: 0,
            num_results: -1,
            pc: 0,
            prev: None,
            num_varargs: 0,
        };

        Ok(State {
            stack,
            top: max_stack,
            globals,
            ci: Some(Box::new(ci)),
            call_depth: 1,
            max_call_depth: config.max_call_depth,
        })
    }

    /// Ensures the stack has at least `needed` absolute slots, padding
    /// with nil. This is the only place the stack vector is resized, and
    /// every caller must re-derive any `(base, k)` addressed value after
    /// calling it rather than holding a slice across the call
    /// (spec.md §3, §4.4).
    pub fn ensure_capacity(&mut self, needed: usize) {
        if self.stack.len() < needed {
            self.stack.resize(needed, Value::Nil);
        }
    }

    /// Reads `stack[base + k]`, growing first if necessary.
    pub fn get(&self, base: usize, k: usize) -> &Value {
        &self.stack[base + k]
    }

    pub fn set(&mut self, base: usize, k: usize, value: Value) {
        self.stack[base + k] = value;
    }

    pub fn ci(&self) -> &CallInfo {
        self.ci.as_ref().expect("State::ci called with no active frame")
    }

    pub fn ci_mut(&mut self) -> &mut CallInfo {
        self.ci.as_mut().expect("State::ci_mut called with no active frame")
    }
}
