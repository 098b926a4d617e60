//! The Lua value model (spec.md §3).
//!
//! Tables are shared and mutable (`Rc<RefCell<Table>>`); closures and
//! strings are shared and immutable after construction (`Rc<Closure>`,
//! `Rc<LuaStr>`). This mirrors the teacher's own `Rc<RefCell<_>>` value
//! draft (`rc_value.rs`) minus the GC/arena and coroutine/userdata layers
//! this core's Non-goals exclude.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use crate::error::RuntimeError;

/// An immutable byte string.
#[derive(Debug, PartialEq, Eq)]
pub struct LuaStr {
    pub bytes: Vec<u8>,
}

impl LuaStr {
    pub fn new(bytes: Vec<u8>) -> Self {
        LuaStr { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_string_lossy(&self) -> std::borrow::Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }
}

impl From<&str> for LuaStr {
    fn from(s: &str) -> Self {
        LuaStr::new(s.as_bytes().to_vec())
    }
}

/// A callable registered by the host, bridging spec.md §4.6.
pub type HostFn = Rc<dyn Fn(&[Value]) -> Result<Vec<Value>, RuntimeError>>;

/// The tagged value sum of spec.md §3.
#[derive(Clone)]
pub enum Value {
    Nil,
    Boolean(bool),
    Number(f64),
    Str(Rc<LuaStr>),
    Table(Rc<RefCell<Table>>),
    Closure(Rc<Closure>),
    Host(HostFn),
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Boolean(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Table(_) => "table",
            Value::Closure(_) | Value::Host(_) => "function",
        }
    }

    /// Lua truthiness: only nil and false are falsy (spec.md §4.3).
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Boolean(false))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn str_from(s: &str) -> Value {
        Value::Str(Rc::new(LuaStr::from(s)))
    }

    pub fn new_table() -> Value {
        Value::Table(Rc::new(RefCell::new(Table::new())))
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Boolean(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "{:?}", s.to_string_lossy()),
            Value::Table(t) => write!(f, "table: {:p}", Rc::as_ptr(t)),
            Value::Closure(c) => write!(f, "function: {:p}", Rc::as_ptr(c)),
            Value::Host(h) => write!(f, "function: host@{:p}", Rc::as_ptr(h)),
        }
    }
}

/// Equality never coerces across variants (spec.md §3, §4.3).
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b) || a.bytes == b.bytes,
            (Value::Table(a), Value::Table(b)) => Rc::ptr_eq(a, b),
            (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            (Value::Host(a), Value::Host(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

/// A bit-exact wrapper making `f64` usable as a hash-map key.
#[derive(Debug, Clone, Copy)]
pub struct OrderedFloat(pub f64);

impl PartialEq for OrderedFloat {
    fn eq(&self, other: &Self) -> bool {
        self.0.to_bits() == other.0.to_bits()
    }
}
impl Eq for OrderedFloat {}
impl Hash for OrderedFloat {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.to_bits().hash(state);
    }
}

/// A table key: nil, booleans, numbers and strings only (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TableKey {
    Boolean(bool),
    Number(OrderedFloat),
    Str(Vec<u8>),
}

impl TableKey {
    /// Converts a `Value` used as a table key, rejecting nil/NaN/non-scalar
    /// keys with a typed error rather than panicking (spec.md §3 allows a
    /// panic here; the teacher's own `Table::set` prefers a typed error).
    pub fn from_value(value: &Value) -> Result<TableKey, RuntimeError> {
        match value {
            Value::Nil => Err(RuntimeError::InvalidTableKey("nil")),
            Value::Boolean(b) => Ok(TableKey::Boolean(*b)),
            Value::Number(n) if n.is_nan() => Err(RuntimeError::InvalidTableKey("NaN")),
            Value::Number(n) => Ok(TableKey::Number(OrderedFloat(*n))),
            Value::Str(s) => Ok(TableKey::Str(s.bytes.clone())),
            Value::Table(_) => Err(RuntimeError::InvalidTableKey("table")),
            Value::Closure(_) | Value::Host(_) => Err(RuntimeError::InvalidTableKey("function")),
        }
    }
}

/// A table is a hash-keyed map from `Value` to `Value`, with a dense
/// array part for small positive-integer keys (spec.md §3), the same
/// split the teacher's `Table` uses in `value.rs`.
#[derive(Debug, Default)]
pub struct Table {
    array: Vec<Value>,
    map: HashMap<TableKey, Value>,
}

impl Table {
    pub fn new() -> Self {
        Table {
            array: Vec::new(),
            map: HashMap::new(),
        }
    }

    /// Number of entries, used for `LEN` (spec.md §4.3: "number of
    /// entries in this core", not full Lua border semantics).
    pub fn len(&self) -> usize {
        self.array.iter().filter(|v| !v.is_nil()).count() + self.map.len()
    }

    pub fn get(&self, key: &Value) -> Result<Value, RuntimeError> {
        if let Value::Number(n) = key {
            if *n >= 1.0 && n.fract() == 0.0 {
                let idx = *n as usize;
                if idx >= 1 && idx <= self.array.len() {
                    return Ok(self.array[idx - 1].clone());
                }
            }
        }
        let tkey = TableKey::from_value(key)?;
        Ok(self.map.get(&tkey).cloned().unwrap_or(Value::Nil))
    }

    pub fn set(&mut self, key: Value, value: Value) -> Result<(), RuntimeError> {
        if let Value::Number(n) = &key {
            if *n >= 1.0 && n.fract() == 0.0 {
                let idx = *n as usize;
                if idx >= 1 && idx <= self.array.len() {
                    self.array[idx - 1] = value;
                    return Ok(());
                }
                if idx == self.array.len() + 1 {
                    self.array.push(value);
                    // Absorb any contiguous keys already sitting in the map.
                    loop {
                        let next = TableKey::Number(OrderedFloat((self.array.len() + 1) as f64));
                        match self.map.remove(&next) {
                            Some(v) => self.array.push(v),
                            None => break,
                        }
                    }
                    return Ok(());
                }
            }
        }
        let tkey = TableKey::from_value(&key)?;
        if value.is_nil() {
            self.map.remove(&tkey);
        } else {
            self.map.insert(tkey, value);
        }
        Ok(())
    }
}

/// An upvalue descriptor as stored on disk (spec.md §3, §4.1).
#[derive(Debug, Clone, Copy)]
pub struct UpvalueDesc {
    pub in_stack: bool,
    pub index: u8,
    pub name: Option<Rc<LuaStr>>,
}

/// Per-instruction line numbers, local-variable ranges and upvalue names
/// (spec.md §3, §4.1). Entirely optional; absent for stripped chunks.
#[derive(Debug, Clone, Default)]
pub struct DebugInfo {
    pub source: Option<Rc<LuaStr>>,
    pub line_info: Vec<i32>,
    pub locals: Vec<LocalVar>,
}

#[derive(Debug, Clone)]
pub struct LocalVar {
    pub name: Rc<LuaStr>,
    pub start_pc: i32,
    pub end_pc: i32,
}

/// A compiled function template, immutable after load (spec.md §3).
#[derive(Debug)]
pub struct FunctionProto {
    pub line_defined: u32,
    pub last_line_defined: u32,
    pub num_params: u8,
    pub is_vararg: bool,
    pub max_stack_size: u8,
    pub code: Vec<u32>,
    pub constants: Vec<Value>,
    pub protos: Vec<Rc<FunctionProto>>,
    pub upvalues: Vec<UpvalueDesc>,
    pub debug: DebugInfo,
}

/// A runtime binding of a prototype to concrete upvalue slots
/// (spec.md §3).
#[derive(Debug)]
pub struct Closure {
    pub proto: Rc<FunctionProto>,
    pub upvalues: Vec<RefCell<Value>>,
}
