//! The interpreter loop (spec.md §4.3, §4.4, §4.5): 40-opcode dispatch.
//!
//! `CALL`/`RETURN` switch frames by mutating `State::ci` and looping back
//! to the top of `execute`, never by recursing into this function
//! (spec.md §4.4, Design Notes spec.md §9). Every operand is read through
//! a fresh `state.stack[..]` index each time rather than a cached slice,
//! so a stack growth mid-instruction can never leave a stale reference
//! alive.

use std::rc::Rc;

use crate::coerce;
use crate::error::RuntimeError;
use crate::opcode::{decode_rk, Instruction, OpCode, Operand};
use crate::state::{CallInfo, State};
use crate::value::{Closure, FunctionProto, LuaStr, Value};

/// Runs `state` to completion and returns the top-level function's
/// results (spec.md §4.4: "If none remain, the machine halts").
pub fn execute(state: &mut State) -> Result<Vec<Value>, RuntimeError> {
    loop {
        let proto = state.ci().closure.proto.clone();
        let base = state.ci().base;
        let pc = state.ci().pc;

        debug_assert!(base <= state.top && state.top <= state.stack.len());
        debug_assert!(base + proto.max_stack_size as usize <= state.stack.len());

        let word = proto.code.get(pc).copied().ok_or_else(|| {
            RuntimeError::MalformedCode(format!("program counter {pc} out of range"))
        })?;
        let instr = Instruction(word);
        state.ci_mut().pc = pc + 1;

        let opcode = instr.opcode().ok_or_else(|| {
            RuntimeError::MalformedCode(format!("invalid opcode byte {}", instr.opcode_raw()))
        })?;

        let a = instr.a() as usize;

        match opcode {
            OpCode::Move => {
                let b = instr.b_raw() as usize;
                let v = state.stack[base + b].clone();
                state.stack[base + a] = v;
            }

            OpCode::LoadK => {
                let v = proto.constants[instr.bx() as usize].clone();
                state.stack[base + a] = v;
            }

            OpCode::LoadKx => {
                let ax = consume_extraarg(state, &proto)?;
                let v = proto.constants[ax as usize].clone();
                state.stack[base + a] = v;
            }

            OpCode::LoadBool => {
                let b = instr.b_raw();
                let c = instr.c_raw();
                state.stack[base + a] = Value::Boolean(b != 0);
                if c != 0 {
                    state.ci_mut().pc += 1;
                }
            }

            OpCode::LoadNil => {
                let b = instr.b_raw() as usize;
                for i in 0..=b {
                    state.stack[base + a + i] = Value::Nil;
                }
            }

            OpCode::GetUpval => {
                let b = instr.b_raw() as usize;
                let v = state.ci().closure.upvalues[b].borrow().clone();
                state.stack[base + a] = v;
            }

            OpCode::SetUpval => {
                let b = instr.b_raw() as usize;
                let v = state.stack[base + a].clone();
                *state.ci().closure.upvalues[b].borrow_mut() = v;
            }

            OpCode::GetTabUp => {
                let b = instr.b_raw() as usize;
                let upval = state.ci().closure.upvalues[b].borrow().clone();
                let key = read_rk(state, &proto, base, instr.c_raw());
                let v = index_get(&upval, &key)?;
                state.stack[base + a] = v;
            }

            OpCode::SetTabUp => {
                let upval = state.ci().closure.upvalues[a].borrow().clone();
                let key = read_rk(state, &proto, base, instr.b_raw());
                let value = read_rk(state, &proto, base, instr.c_raw());
                index_set(&upval, key, value)?;
            }

            OpCode::GetTable => {
                let b = instr.b_raw() as usize;
                let container = state.stack[base + b].clone();
                let key = read_rk(state, &proto, base, instr.c_raw());
                let v = index_get(&container, &key)?;
                state.stack[base + a] = v;
            }

            OpCode::SetTable => {
                let container = state.stack[base + a].clone();
                let key = read_rk(state, &proto, base, instr.b_raw());
                let value = read_rk(state, &proto, base, instr.c_raw());
                index_set(&container, key, value)?;
            }

            OpCode::NewTable => {
                state.stack[base + a] = Value::new_table();
            }

            OpCode::SelfOp => {
                let b = instr.b_raw() as usize;
                let bval = state.stack[base + b].clone();
                state.stack[base + a + 1] = bval.clone();
                let key = read_rk(state, &proto, base, instr.c_raw());
                state.stack[base + a] = index_get(&bval, &key)?;
            }

            OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Mod | OpCode::Pow => {
                let x = read_rk(state, &proto, base, instr.b_raw());
                let y = read_rk(state, &proto, base, instr.c_raw());
                let result = match opcode {
                    OpCode::Add => coerce::arith("add", &x, &y, |a, b| a + b)?,
                    OpCode::Sub => coerce::arith("sub", &x, &y, |a, b| a - b)?,
                    OpCode::Mul => coerce::arith("mul", &x, &y, |a, b| a * b)?,
                    OpCode::Div => coerce::arith("div", &x, &y, |a, b| a / b)?,
                    OpCode::Mod => coerce::arith("mod", &x, &y, coerce::lua_mod)?,
                    OpCode::Pow => coerce::arith("pow", &x, &y, f64::powf)?,
                    _ => unreachable!(),
                };
                state.stack[base + a] = result;
            }

            OpCode::Unm => {
                let b = instr.b_raw() as usize;
                let v = state.stack[base + b].clone();
                state.stack[base + a] = coerce::unary_minus(&v)?;
            }

            OpCode::Not => {
                let b = instr.b_raw() as usize;
                let truthy = state.stack[base + b].is_truthy();
                state.stack[base + a] = Value::Boolean(!truthy);
            }

            OpCode::Len => {
                let b = instr.b_raw() as usize;
                let v = state.stack[base + b].clone();
                state.stack[base + a] = Value::Number(coerce::length(&v)?);
            }

            OpCode::Concat => {
                let b = instr.b_raw() as usize;
                let c = instr.c_raw() as usize;
                let mut bytes = Vec::new();
                for i in b..=c {
                    let v = state.stack[base + i].clone();
                    bytes.extend_from_slice(coerce::to_concat_str(&v)?.as_bytes());
                }
                state.stack[base + a] = Value::Str(Rc::new(LuaStr::new(bytes)));
            }

            OpCode::Jmp => {
                let target = (state.ci().pc as i64 + instr.sbx() as i64) as usize;
                state.ci_mut().pc = target;
            }

            OpCode::Eq | OpCode::Lt | OpCode::Le => {
                let x = read_rk(state, &proto, base, instr.b_raw());
                let y = read_rk(state, &proto, base, instr.c_raw());
                let result = match opcode {
                    OpCode::Eq => coerce::eq(&x, &y),
                    OpCode::Lt => coerce::lt(&x, &y),
                    OpCode::Le => coerce::le(&x, &y),
                    _ => unreachable!(),
                };
                let jump = result == (instr.a() != 0);
                cond_jump(state, &proto, jump)?;
            }

            OpCode::Test => {
                let c = instr.c_raw();
                let truthy = state.stack[base + a].is_truthy();
                let jump = truthy == (c != 0);
                cond_jump(state, &proto, jump)?;
            }

            OpCode::TestSet => {
                let b = instr.b_raw() as usize;
                let c = instr.c_raw();
                let bval = state.stack[base + b].clone();
                let jump = bval.is_truthy() == (c != 0);
                if jump {
                    state.stack[base + a] = bval;
                }
                cond_jump(state, &proto, jump)?;
            }

            OpCode::Call | OpCode::TailCall => {
                let callee_idx = base + a;
                let b = instr.b_raw();
                let c = instr.c_raw();
                let nargs = if b != 0 {
                    (b - 1) as usize
                } else {
                    state.top - callee_idx - 1
                };
                if b != 0 {
                    state.top = callee_idx + 1 + nargs;
                }
                let nresults: isize = if c == 0 { -1 } else { (c - 1) as isize };
                do_call(state, callee_idx, nargs, nresults)?;
            }

            OpCode::Return => {
                let b = instr.b_raw();
                if let Some(results) = do_return(state, a, b)? {
                    return Ok(results);
                }
            }

            OpCode::ForPrep => {
                let init = coerce::to_number(&state.stack[base + a])
                    .ok_or(RuntimeError::BadForArg { which: "initial" })?;
                coerce::to_number(&state.stack[base + a + 1])
                    .ok_or(RuntimeError::BadForArg { which: "limit" })?;
                let step = coerce::to_number(&state.stack[base + a + 2])
                    .ok_or(RuntimeError::BadForArg { which: "step" })?;
                state.stack[base + a] = Value::Number(init - step);
                let target = (state.ci().pc as i64 + instr.sbx() as i64) as usize;
                state.ci_mut().pc = target;
            }

            OpCode::ForLoop => {
                let cur = coerce::to_number(&state.stack[base + a])
                    .ok_or(RuntimeError::BadForArg { which: "initial" })?;
                let limit = coerce::to_number(&state.stack[base + a + 1])
                    .ok_or(RuntimeError::BadForArg { which: "limit" })?;
                let step = coerce::to_number(&state.stack[base + a + 2])
                    .ok_or(RuntimeError::BadForArg { which: "step" })?;
                let idx = cur + step;
                let keep_looping = if step > 0.0 {
                    idx <= limit
                } else {
                    limit <= idx
                };
                if keep_looping {
                    state.stack[base + a] = Value::Number(idx);
                    state.stack[base + a + 3] = Value::Number(idx);
                    let target = (state.ci().pc as i64 + instr.sbx() as i64) as usize;
                    state.ci_mut().pc = target;
                }
            }

            OpCode::TForCall => {
                let c = instr.c_raw() as usize;
                state.ensure_capacity(base + a + 6);
                for i in 0..3 {
                    let v = state.stack[base + a + i].clone();
                    state.stack[base + a + 3 + i] = v;
                }
                state.top = base + a + 6;
                do_call(state, base + a + 3, 2, c as isize)?;
            }

            OpCode::TForLoop => {
                if !state.stack[base + a + 1].is_nil() {
                    let v = state.stack[base + a + 1].clone();
                    state.stack[base + a] = v;
                    let target = (state.ci().pc as i64 + instr.sbx() as i64) as usize;
                    state.ci_mut().pc = target;
                }
            }

            OpCode::SetList => {
                let b = instr.b_raw() as usize;
                let mut c = instr.c_raw() as usize;
                if c == 0 {
                    c = consume_extraarg(state, &proto)? as usize;
                }
                const FIELDS_PER_FLUSH: usize = 50;
                let table_val = state.stack[base + a].clone();
                let n = if b != 0 { b } else { state.top - (base + a) - 1 };
                for i in 1..=n {
                    let v = state.stack[base + a + i].clone();
                    index_set(&table_val, Value::Number(((c - 1) * FIELDS_PER_FLUSH + i) as f64), v)?;
                }
                if b == 0 {
                    state.top = base + a + 1;
                }
            }

            OpCode::Closure => {
                let sub_proto = proto.protos[instr.bx() as usize].clone();
                let mut upvalues = Vec::with_capacity(sub_proto.upvalues.len());
                for uv in &sub_proto.upvalues {
                    let captured = if uv.in_stack {
                        state.stack[base + uv.index as usize].clone()
                    } else {
                        state.ci().closure.upvalues[uv.index as usize].borrow().clone()
                    };
                    upvalues.push(std::cell::RefCell::new(captured));
                }
                let closure = Closure {
                    proto: sub_proto,
                    upvalues,
                };
                state.stack[base + a] = Value::Closure(Rc::new(closure));
            }

            OpCode::Vararg => {
                let n_varargs = state.ci().num_varargs;
                let vararg_start = base - n_varargs;
                let b = instr.b_raw() as usize;
                let want = if b == 0 { n_varargs } else { b - 1 };
                state.ensure_capacity(base + a + want);
                for i in 0..want {
                    state.stack[base + a + i] = if i < n_varargs {
                        state.stack[vararg_start + i].clone()
                    } else {
                        Value::Nil
                    };
                }
                if b == 0 {
                    state.top = base + a + n_varargs;
                }
            }

            OpCode::ExtraArg => {
                return Err(RuntimeError::MalformedCode(
                    "EXTRAARG encountered outside LOADKX/SETLIST pairing".to_string(),
                ));
            }
        }
    }
}

/// Reads an `RK(x)` operand: a plain register or, with the K-bit set, a
/// constant (spec.md §4.2).
fn read_rk(state: &State, proto: &FunctionProto, base: usize, raw: u32) -> Value {
    match decode_rk(raw) {
        Operand::Register(r) => state.stack[base + r as usize].clone(),
        Operand::Constant(k) => proto.constants[k as usize].clone(),
    }
}

fn index_get(container: &Value, key: &Value) -> Result<Value, RuntimeError> {
    match container {
        Value::Table(t) => t.borrow().get(key),
        other => Err(RuntimeError::TypeMismatch {
            op: "index",
            expected: "table",
            got: other.type_name(),
        }),
    }
}

fn index_set(container: &Value, key: Value, value: Value) -> Result<(), RuntimeError> {
    match container {
        Value::Table(t) => t.borrow_mut().set(key, value),
        other => Err(RuntimeError::TypeMismatch {
            op: "index",
            expected: "table",
            got: other.type_name(),
        }),
    }
}

/// Implements the EQ/LT/LE/TEST/TESTSET → JMP pairing (spec.md §4.3,
/// §8): the instruction immediately after the comparison must be `JMP`;
/// jumping "executes" it (advances past it, then applies its `sBx`)
/// while not jumping simply skips over it.
fn cond_jump(state: &mut State, proto: &FunctionProto, jump: bool) -> Result<(), RuntimeError> {
    let pc_at_jmp = state.ci().pc;
    let word = proto.code.get(pc_at_jmp).copied().ok_or_else(|| {
        RuntimeError::MalformedCode("expected JMP after comparison, found end of code".to_string())
    })?;
    let jmp = Instruction(word);
    if jmp.opcode() != Some(OpCode::Jmp) {
        return Err(RuntimeError::MalformedCode(format!(
            "expected JMP after comparison, found {}",
            jmp.opcode().map(|o| o.name()).unwrap_or("<invalid opcode>")
        )));
    }
    state.ci_mut().pc = if jump {
        (pc_at_jmp as i64 + 1 + jmp.sbx() as i64) as usize
    } else {
        pc_at_jmp + 1
    };
    Ok(())
}

fn consume_extraarg(state: &mut State, proto: &FunctionProto) -> Result<u32, RuntimeError> {
    let pc = state.ci().pc;
    let word = proto
        .code
        .get(pc)
        .copied()
        .ok_or_else(|| RuntimeError::MalformedCode("missing EXTRAARG".to_string()))?;
    let instr = Instruction(word);
    if instr.opcode() != Some(OpCode::ExtraArg) {
        return Err(RuntimeError::MalformedCode(format!(
            "expected EXTRAARG, found {}",
            instr.opcode().map(|o| o.name()).unwrap_or("<invalid opcode>")
        )));
    }
    state.ci_mut().pc = pc + 1;
    Ok(instr.ax())
}

/// The `CALL` protocol (spec.md §4.4): `callee_idx` holds the callable,
/// `nargs` contiguous values above it are the arguments. Host functions
/// run to completion synchronously; closures push a new `CallInfo` and
/// return — the outer `execute` loop resumes at the new frame.
fn do_call(
    state: &mut State,
    callee_idx: usize,
    nargs: usize,
    nresults: isize,
) -> Result<(), RuntimeError> {
    let func = state.stack[callee_idx].clone();
    match func {
        Value::Host(f) => {
            let args: Vec<Value> = state.stack[callee_idx + 1..callee_idx + 1 + nargs].to_vec();
            let results = f(&args)?;
            place_results(state, callee_idx, results, nresults);
            Ok(())
        }
        Value::Closure(closure) => {
            if state.call_depth >= state.max_call_depth {
                return Err(RuntimeError::StackOverflow);
            }
            let proto = closure.proto.clone();
            let nfixed = proto.num_params as usize;
            let fixed_start = callee_idx + 1;

            let (new_base, num_varargs) = if proto.is_vararg {
                let actual = nargs.max(nfixed);
                state.ensure_capacity(fixed_start + actual);
                for i in nargs..nfixed {
                    state.stack[fixed_start + i] = Value::Nil;
                }
                let new_base = fixed_start + actual;
                state.ensure_capacity(new_base + nfixed);
                for i in 0..nfixed {
                    let v = state.stack[fixed_start + i].clone();
                    state.stack[new_base + i] = v;
                    state.stack[fixed_start + i] = Value::Nil;
                }
                (new_base, actual - nfixed)
            } else {
                let new_base = fixed_start;
                state.ensure_capacity(new_base + nfixed.max(nargs));
                for i in nargs..nfixed {
                    state.stack[new_base + i] = Value::Nil;
                }
                (new_base, 0)
            };

            state.ensure_capacity(new_base + proto.max_stack_size as usize);
            state.top = new_base + proto.max_stack_size as usize;

            let ci = CallInfo {
                closure,
                func_index: callee_idx,
                base: new_base,
                num_results: nresults,
                pc: 0,
                prev: state.ci.take(),
                num_varargs,
            };
            state.ci = Some(Box::new(ci));
            state.call_depth += 1;
            Ok(())
        }
        other => Err(RuntimeError::NotCallable(other.type_name())),
    }
}

fn place_results(state: &mut State, result_index: usize, results: Vec<Value>, nresults: isize) {
    let actual = results.len();
    let want = if nresults >= 0 {
        nresults as usize
    } else {
        actual
    };
    state.ensure_capacity(result_index + want.max(actual));
    for (i, v) in results.into_iter().enumerate() {
        if i < want {
            state.stack[result_index + i] = v;
        }
    }
    for i in actual..want {
        state.stack[result_index + i] = Value::Nil;
    }
    state.top = result_index + want;
}

/// The `RETURN` protocol (spec.md §4.4). Returns `Some(results)` once the
/// last frame has been popped (the machine halts).
fn do_return(state: &mut State, a: usize, b: u32) -> Result<Option<Vec<Value>>, RuntimeError> {
    let base = state.ci().base;
    let func_index = state.ci().func_index;
    let num_results_wanted = state.ci().num_results;

    let first = base + a;
    let n = if b != 0 {
        (b - 1) as usize
    } else {
        state.top - first
    };

    let values: Vec<Value> = (0..n).map(|i| state.stack[first + i].clone()).collect();
    let reserve = func_index + n.max(if num_results_wanted >= 0 {
        num_results_wanted as usize
    } else {
        0
    });
    state.ensure_capacity(reserve);
    for (i, v) in values.into_iter().enumerate() {
        state.stack[func_index + i] = v;
    }

    let actual = if num_results_wanted >= 0 {
        let want = num_results_wanted as usize;
        for i in n..want {
            state.stack[func_index + i] = Value::Nil;
        }
        want
    } else {
        n
    };
    state.top = func_index + actual;

    let finished = state.ci.take().expect("do_return called with no active frame");
    state.ci = finished.prev;
    state.call_depth -= 1;

    if state.ci.is_none() {
        let results: Vec<Value> = (0..actual).map(|i| state.stack[func_index + i].clone()).collect();
        return Ok(Some(results));
    }
    Ok(None)
}
