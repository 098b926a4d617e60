//! A loader and interpreter for precompiled Lua 5.2 bytecode chunks.
//!
//! ```no_run
//! use std::fs;
//! use luavm::{loader, state::State, interp, host, VmConfig};
//!
//! let data = fs::read("chunk.luac").unwrap();
//! let proto = loader::load(&data).unwrap();
//! let entry = luavm::value::Closure { proto, upvalues: vec![Default::default()] };
//! let mut state = State::new(std::rc::Rc::new(entry), VmConfig::default()).unwrap();
//! host::install_defaults(&mut state);
//! interp::execute(&mut state).unwrap();
//! ```

pub mod coerce;
pub mod error;
pub mod host;
pub mod interp;
pub mod loader;
pub mod opcode;
pub mod state;
pub mod value;

/// Tunable limits for a single execution (spec.md §2's ambient-stack
/// section). Mirrors the role the teacher's `config::Config` plays for
/// its server: a small, explicit struct rather than scattered constants.
#[derive(Debug, Clone, Copy)]
pub struct VmConfig {
    /// Hard cap on call depth, checked each time a new `CallInfo` frame
    /// would be pushed. Guards against runaway or malicious recursion in
    /// a chunk, since this core has no stack-size-driven OS guard.
    pub max_call_depth: usize,
    /// Initial value-stack capacity reserved up front, to avoid a string
    /// of small reallocations for typical chunks.
    pub initial_stack_capacity: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        VmConfig {
            max_call_depth: 200,
            initial_stack_capacity: 256,
        }
    }
}
