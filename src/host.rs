//! The host bridge (spec.md §4.6): registers named host functions into
//! the globals table before execution starts. A host function is a
//! plain `fn(&[Value]) -> Result<Vec<Value>, RuntimeError>` — it never
//! sees `State` directly, matching the ABI in spec.md §7
//! ("Host-function ABI (in-process)").

use std::io::Write as _;
use std::rc::Rc;

use crate::coerce;
use crate::error::RuntimeError;
use crate::state::State;
use crate::value::Value;

/// Installs the host functions the end-to-end scenarios in spec.md §8
/// rely on: `io.write` (reachable from a chunk as `GETTABUP _ENV "io"`
/// followed by `GETTABLE ... "write"`) and a flat global `print`.
pub fn install_defaults(state: &mut State) {
    let io_table = Value::new_table();
    if let Value::Table(t) = &io_table {
        t.borrow_mut()
            .set(Value::str_from("write"), Value::Host(io_write()))
            .expect("\"write\" is a valid string key");
    }
    let mut globals = state.globals.borrow_mut();
    globals
        .set(Value::str_from("io"), io_table)
        .expect("\"io\" is a valid string key");
    globals
        .set(Value::str_from("print"), Value::Host(print_fn()))
        .expect("\"print\" is a valid string key");
}

/// Writes every argument's string coercion to stdout with no separator
/// or trailing newline, matching Lua's `io.write` (spec.md §8: a chunk
/// calling `io.write("hi")` must print exactly "hi"). Returns no
/// results.
fn io_write() -> Rc<dyn Fn(&[Value]) -> Result<Vec<Value>, RuntimeError>> {
    Rc::new(|args: &[Value]| -> Result<Vec<Value>, RuntimeError> {
        let stdout = std::io::stdout();
        let mut handle = stdout.lock();
        for arg in args {
            let s = coerce::to_concat_str(arg)?;
            handle
                .write_all(s.as_bytes())
                .map_err(|e| RuntimeError::HostError(e.to_string()))?;
        }
        Ok(Vec::new())
    })
}

/// Tab-separates `display_value` of every argument and writes one line
/// to stdout, matching Lua's `print`. Unlike `io.write`, this accepts
/// any value (not just strings/numbers) since there is no coercion
/// failure to report.
fn print_fn() -> Rc<dyn Fn(&[Value]) -> Result<Vec<Value>, RuntimeError>> {
    Rc::new(|args: &[Value]| -> Result<Vec<Value>, RuntimeError> {
        let line = args
            .iter()
            .map(display_value)
            .collect::<Vec<_>>()
            .join("\t");
        println!("{line}");
        Ok(Vec::new())
    })
}

/// `tostring`-equivalent formatting for `print`: no quoting for
/// strings, unlike `Value`'s `Debug` impl.
fn display_value(value: &Value) -> String {
    match value {
        Value::Nil => "nil".to_string(),
        Value::Boolean(b) => b.to_string(),
        Value::Number(n) => coerce::number_to_string(*n),
        Value::Str(s) => s.to_string_lossy().into_owned(),
        Value::Table(t) => format!("table: {:p}", Rc::as_ptr(t)),
        Value::Closure(c) => format!("function: {:p}", Rc::as_ptr(c)),
        Value::Host(h) => format!("function: builtin: {:p}", Rc::as_ptr(h)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Closure;
    use crate::VmConfig;

    fn empty_entry_state() -> State {
        let proto = Rc::new(crate::value::FunctionProto {
            line_defined: 0,
            last_line_defined: 0,
            num_params: 0,
            is_vararg: false,
            max_stack_size: 2,
            code: vec![],
            constants: vec![],
            protos: vec![],
            upvalues: vec![],
            debug: Default::default(),
        });
        let entry = Rc::new(Closure {
            proto,
            upvalues: vec![],
        });
        State::new(entry, VmConfig::default()).unwrap()
    }

    #[test]
    fn installs_io_write_under_globals() {
        let mut state = empty_entry_state();
        install_defaults(&mut state);
        let io = state
            .globals
            .borrow()
            .get(&Value::str_from("io"))
            .unwrap();
        match io {
            Value::Table(t) => {
                let write = t.borrow().get(&Value::str_from("write")).unwrap();
                assert!(matches!(write, Value::Host(_)));
            }
            other => panic!("expected io table, got {other:?}"),
        }
    }

    #[test]
    fn installs_print_as_a_flat_global() {
        let mut state = empty_entry_state();
        install_defaults(&mut state);
        let print = state.globals.borrow().get(&Value::str_from("print")).unwrap();
        assert!(matches!(print, Value::Host(_)));
    }

    #[test]
    fn display_value_does_not_quote_strings() {
        assert_eq!(display_value(&Value::str_from("hi")), "hi");
        assert_eq!(display_value(&Value::Nil), "nil");
        assert_eq!(display_value(&Value::Number(21.0)), "21");
    }
}
