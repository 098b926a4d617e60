//! CLI entry point: loads a precompiled Lua 5.2 chunk and runs it
//! (spec.md §6). Hand-rolled argument parsing, matching the teacher's
//! `lua_cli.rs` rather than pulling in an argument-parsing crate for a
//! single positional path.

use std::cell::RefCell;
use std::fs;
use std::process::ExitCode;
use std::rc::Rc;

use luavm::value::Closure;
use luavm::{host, interp, loader, state::State, VmConfig};

fn print_usage() {
    eprintln!("usage: luavm <chunk.luac>");
    eprintln!();
    eprintln!("Loads and runs a precompiled Lua 5.2 bytecode chunk.");
}

fn main() -> ExitCode {
    let mut args = std::env::args().skip(1);
    let first = match args.next() {
        Some(a) => a,
        None => {
            print_usage();
            return ExitCode::FAILURE;
        }
    };
    if first == "-h" || first == "--help" {
        print_usage();
        return ExitCode::SUCCESS;
    }
    let path = first;
    if args.next().is_some() {
        print_usage();
        return ExitCode::FAILURE;
    }

    let data = match fs::read(&path) {
        Ok(d) => d,
        Err(e) => {
            eprintln!("luavm: cannot read '{path}': {e}");
            return ExitCode::FAILURE;
        }
    };

    let proto = match loader::load(&data) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("luavm: {path}: {e}");
            return ExitCode::FAILURE;
        }
    };

    let upvalues = (0..proto.upvalues.len())
        .map(|_| RefCell::new(luavm::value::Value::Nil))
        .collect();
    let entry = Rc::new(Closure { proto, upvalues });

    let mut state = match State::new(entry, VmConfig::default()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("luavm: {path}: {e}");
            return ExitCode::FAILURE;
        }
    };
    host::install_defaults(&mut state);

    match interp::execute(&mut state) {
        Ok(_results) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("luavm: {path}: runtime error: {e}");
            ExitCode::FAILURE
        }
    }
}
