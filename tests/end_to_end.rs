//! End-to-end scenarios (spec.md §8): each builds a `FunctionProto` tree
//! directly, since this sandbox has no `luac` binary to produce real
//! chunks. The bit layout mirrored here (op/A/C/B field positions, the
//! K-bit, the sBx bias) is the same one `src/opcode.rs` decodes; see
//! its doc comments for the authoritative description.

use std::cell::RefCell;
use std::io::Write as _;
use std::rc::Rc;

use luavm::interp;
use luavm::loader;
use luavm::opcode::OpCode;
use luavm::state::State;
use luavm::value::{Closure, DebugInfo, FunctionProto, UpvalueDesc, Value};
use luavm::{host, VmConfig};

const SIZE_OP: u32 = 6;
const SIZE_A: u32 = 8;
const POS_A: u32 = SIZE_OP;
const POS_C: u32 = POS_A + SIZE_A;
const POS_B: u32 = POS_C + 9;
const POS_BX: u32 = POS_C;
const BITRK: u32 = 1 << 8;
const MAXARG_SBX: i32 = ((1u32 << 18) - 1) as i32 >> 1;

fn iabc(op: OpCode, a: u32, b: u32, c: u32) -> u32 {
    (op as u32) | (a << POS_A) | (c << POS_C) | (b << POS_B)
}

fn iabx(op: OpCode, a: u32, bx: u32) -> u32 {
    (op as u32) | (a << POS_A) | (bx << POS_BX)
}

fn iasbx(op: OpCode, a: u32, sbx: i32) -> u32 {
    iabx(op, a, (sbx + MAXARG_SBX) as u32)
}

fn k(idx: u32) -> u32 {
    BITRK | idx
}

fn entry_upvalues() -> Vec<UpvalueDesc> {
    vec![UpvalueDesc {
        in_stack: false,
        index: 0,
        name: None,
    }]
}

fn proto(
    num_params: u8,
    is_vararg: bool,
    max_stack_size: u8,
    code: Vec<u32>,
    constants: Vec<Value>,
    protos: Vec<Rc<FunctionProto>>,
    upvalues: Vec<UpvalueDesc>,
) -> Rc<FunctionProto> {
    Rc::new(FunctionProto {
        line_defined: 0,
        last_line_defined: 0,
        num_params,
        is_vararg,
        max_stack_size,
        code,
        constants,
        protos,
        upvalues,
        debug: DebugInfo::default(),
    })
}

fn run(root: Rc<FunctionProto>) -> (Vec<Value>, State) {
    let upvalues = (0..root.upvalues.len())
        .map(|_| RefCell::new(Value::Nil))
        .collect();
    let entry = Rc::new(Closure {
        proto: root,
        upvalues,
    });
    let mut state = State::new(entry, VmConfig::default()).unwrap();
    host::install_defaults(&mut state);
    let results = interp::execute(&mut state).unwrap();
    (results, state)
}

fn global(state: &State, name: &str) -> Value {
    state.globals.borrow().get(&Value::str_from(name)).unwrap()
}

/// t1: `a = 6`.
#[test]
fn t1_assigns_global_number() {
    let code = vec![
        iabc(OpCode::SetTabUp, 0, k(0), k(1)),
        iabc(OpCode::Return, 0, 1, 0),
    ];
    let constants = vec![Value::str_from("a"), Value::Number(6.0)];
    let root = proto(0, false, 2, code, constants, vec![], entry_upvalues());
    let (_results, state) = run(root);
    assert_eq!(global(&state, "a"), Value::Number(6.0));
    assert_eq!(state.top, 0);
}

/// t2: `b = 10.5 * 2`.
#[test]
fn t2_arithmetic_then_assign() {
    let code = vec![
        iabx(OpCode::LoadK, 0, 0),          // R0 = 10.5
        iabc(OpCode::Mul, 0, 0, k(1)),      // R0 = R0 * 2.0
        iabc(OpCode::SetTabUp, 0, k(2), 0), // U0["b"] = R0
        iabc(OpCode::Return, 0, 1, 0),
    ];
    let constants = vec![
        Value::Number(10.5),
        Value::Number(2.0),
        Value::str_from("b"),
    ];
    let root = proto(0, false, 2, code, constants, vec![], entry_upvalues());
    let (_results, state) = run(root);
    assert_eq!(global(&state, "b"), Value::Number(21.0));
}

/// t4: `a = not false; b = not true; c = nil`.
#[test]
fn t4_bool_and_nil_assignment() {
    let code = vec![
        iabc(OpCode::LoadBool, 0, 0, 0), // R0 = false
        iabc(OpCode::Not, 1, 0, 0),      // R1 = not R0 = true
        iabc(OpCode::SetTabUp, 0, k(0), 1),
        iabc(OpCode::LoadBool, 0, 1, 0), // R0 = true
        iabc(OpCode::Not, 1, 0, 0),      // R1 = not R0 = false
        iabc(OpCode::SetTabUp, 0, k(1), 1),
        iabc(OpCode::LoadNil, 0, 0, 0),
        iabc(OpCode::SetTabUp, 0, k(2), 0),
        iabc(OpCode::Return, 0, 1, 0),
    ];
    let constants = vec![
        Value::str_from("a"),
        Value::str_from("b"),
        Value::str_from("c"),
    ];
    let root = proto(0, false, 2, code, constants, vec![], entry_upvalues());
    let (_results, state) = run(root);
    assert_eq!(global(&state, "a"), Value::Boolean(true));
    assert_eq!(global(&state, "b"), Value::Boolean(false));
    assert_eq!(global(&state, "c"), Value::Nil);
}

/// t5: `a = {}; a.test = 6; b = a.test * 2`.
#[test]
fn t5_table_field_roundtrip() {
    let code = vec![
        iabc(OpCode::NewTable, 0, 0, 0),
        iabc(OpCode::SetTable, 0, k(1), k(2)), // R0["test"] = 6
        iabc(OpCode::SetTabUp, 0, k(0), 0),    // U0["a"] = R0
        iabc(OpCode::GetTable, 1, 0, k(1)),    // R1 = R0["test"]
        iabc(OpCode::Mul, 1, 1, k(3)),         // R1 = R1 * 2
        iabc(OpCode::SetTabUp, 0, k(4), 1),    // U0["b"] = R1
        iabc(OpCode::Return, 0, 1, 0),
    ];
    let constants = vec![
        Value::str_from("a"),
        Value::str_from("test"),
        Value::Number(6.0),
        Value::Number(2.0),
        Value::str_from("b"),
    ];
    let root = proto(0, false, 3, code, constants, vec![], entry_upvalues());
    let (_results, state) = run(root);
    match global(&state, "a") {
        Value::Table(t) => {
            assert_eq!(
                t.borrow().get(&Value::str_from("test")).unwrap(),
                Value::Number(6.0)
            );
        }
        other => panic!("expected table, got {other:?}"),
    }
    assert_eq!(global(&state, "b"), Value::Number(12.0));
}

/// t6: `#"I come from down in the valley"`.
#[test]
fn t6_len_on_string_constant() {
    let text = "I come from down in the valley";
    assert_eq!(text.len(), 30);
    let code = vec![
        iabx(OpCode::LoadK, 0, 0),
        iabc(OpCode::Len, 1, 0, 0),
        iabc(OpCode::Return, 1, 2, 0),
    ];
    let constants = vec![Value::str_from(text)];
    let root = proto(0, false, 2, code, constants, vec![], entry_upvalues());
    let (results, _state) = run(root);
    assert_eq!(results, vec![Value::Number(30.0)]);
}

/// t8: recursive fib (base case returns 1, so `fib(3) == 3`), closure
/// stored in globals, called once from the top level.
#[test]
fn t8_recursive_closure_call() {
    let fib_code = vec![
        iabx(OpCode::LoadK, 1, 0),           // R1 = 2.0
        iabc(OpCode::Lt, 1, 0, 1),           // if n < 2 then (jump to base case)
        iasbx(OpCode::Jmp, 0, 8),            // -> index 11
        iabc(OpCode::GetTabUp, 2, 0, k(1)),  // R2 = fib
        iabc(OpCode::Sub, 3, 0, k(2)),       // R3 = n - 1
        iabc(OpCode::Call, 2, 2, 2),         // R2 = fib(R3)
        iabc(OpCode::GetTabUp, 4, 0, k(1)),  // R4 = fib
        iabc(OpCode::Sub, 5, 0, k(3)),       // R5 = n - 2
        iabc(OpCode::Call, 4, 2, 2),         // R4 = fib(R5)
        iabc(OpCode::Add, 2, 2, 4),          // R2 = R2 + R4
        iabc(OpCode::Return, 2, 2, 0),
        iabx(OpCode::LoadK, 0, 2),           // base case: R0 = 1.0
        iabc(OpCode::Return, 0, 2, 0),
    ];
    let fib_constants = vec![
        Value::Number(2.0),
        Value::str_from("fib"),
        Value::Number(1.0),
        Value::Number(2.0),
    ];
    let fib_upvalues = vec![UpvalueDesc {
        in_stack: false,
        index: 0,
        name: None,
    }];
    let fib_proto = proto(1, false, 6, fib_code, fib_constants, vec![], fib_upvalues);

    let root_code = vec![
        iabx(OpCode::Closure, 0, 0),
        iabc(OpCode::SetTabUp, 0, k(0), 0), // globals.fib = closure
        iabc(OpCode::GetTabUp, 1, 0, k(0)), // R1 = fib
        iabx(OpCode::LoadK, 2, 1),          // R2 = 3.0
        iabc(OpCode::Call, 1, 2, 2),        // R1 = fib(3)
        iabc(OpCode::SetTabUp, 0, k(2), 1), // globals.a = R1
        iabc(OpCode::Return, 0, 1, 0),
    ];
    let root_constants = vec![
        Value::str_from("fib"),
        Value::Number(3.0),
        Value::str_from("a"),
    ];
    let root = proto(
        0,
        false,
        3,
        root_code,
        root_constants,
        vec![fib_proto],
        entry_upvalues(),
    );

    let (_results, state) = run(root);
    assert_eq!(global(&state, "a"), Value::Number(3.0));
    match global(&state, "fib") {
        Value::Closure(_) => {}
        other => panic!("expected closure, got {other:?}"),
    }
}

/// Host-function integration: a chunk calling `io.write("hi")`.
#[test]
fn io_write_reaches_the_host() {
    let code = vec![
        iabc(OpCode::GetTabUp, 0, 0, k(0)), // R0 = io
        iabc(OpCode::GetTable, 0, 0, k(1)), // R0 = io.write
        iabx(OpCode::LoadK, 1, 2),          // R1 = "hi"
        iabc(OpCode::Call, 0, 2, 1),        // io.write("hi"), 0 results
        iabc(OpCode::Return, 0, 1, 0),
    ];
    let constants = vec![
        Value::str_from("io"),
        Value::str_from("write"),
        Value::str_from("hi"),
    ];
    let root = proto(0, false, 2, code, constants, vec![], entry_upvalues());
    let (results, _state) = run(root);
    assert!(results.is_empty());
}

/// The loader can parse a chunk read back from disk, exercising the
/// same path the CLI binary takes.
#[test]
fn loader_round_trips_a_chunk_written_to_a_temp_file() {
    let mut out = Vec::new();
    out.extend_from_slice(&[0x1B, 0x4C, 0x75, 0x61]); // signature
    out.push(0x52); // version
    out.push(0); // format
    out.push(1); // little-endian
    out.push(4); // int size
    out.push(8); // size_t size
    out.push(4); // instruction size
    out.push(8); // number size
    out.push(0); // int flag
    out.extend_from_slice(&[0x19, 0x93, 0x0D, 0x0A, 0x1A, 0x0A]); // tail

    out.extend_from_slice(&0u32.to_le_bytes()); // line_defined
    out.extend_from_slice(&0u32.to_le_bytes()); // last_line_defined
    out.push(0); // num_params
    out.push(0); // is_vararg
    out.push(2); // max_stack_size

    let ret = iabc(OpCode::Return, 0, 1, 0);
    out.extend_from_slice(&1u32.to_le_bytes());
    out.extend_from_slice(&ret.to_le_bytes());

    out.extend_from_slice(&0u32.to_le_bytes()); // constants
    out.extend_from_slice(&0u32.to_le_bytes()); // sub-protos
    out.extend_from_slice(&0u32.to_le_bytes()); // upvalues

    out.extend_from_slice(&0u64.to_le_bytes()); // debug source
    out.extend_from_slice(&0u32.to_le_bytes()); // line info
    out.extend_from_slice(&0u32.to_le_bytes()); // locals
    out.extend_from_slice(&0u32.to_le_bytes()); // upvalue names

    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(&out).unwrap();

    let data = std::fs::read(file.path()).unwrap();
    let root = loader::load(&data).unwrap();
    let (results, _state) = run(root);
    assert!(results.is_empty());
}
