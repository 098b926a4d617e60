//! The bytecode reader (spec.md §4.1): parses the header and recursively
//! decodes a `Prototype` tree from a byte stream. Everything is
//! little-endian; byte-exact compatible with `luac` output on a 64-bit
//! little-endian host using 8-byte numbers and 4-byte instructions
//! (spec.md §6).

use std::rc::Rc;

use crate::error::LoadError;
use crate::value::{DebugInfo, FunctionProto, LocalVar, LuaStr, UpvalueDesc, Value};

const SIGNATURE: [u8; 4] = [0x1B, 0x4C, 0x75, 0x61];
const LUAC_VERSION: u8 = 0x52;
const LUAC_FORMAT: u8 = 0;
const TAIL: [u8; 6] = [0x19, 0x93, 0x0D, 0x0A, 0x1A, 0x0A];

const TNIL: u8 = 0;
const TBOOLEAN: u8 = 1;
const TNUMBER: u8 = 3;
const TSTRING: u8 = 4;

/// A cursor over an in-memory chunk, tracking position for error reports.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Reader { data, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], LoadError> {
        if self.pos + n > self.data.len() {
            return Err(LoadError::MalformedChunk(format!(
                "unexpected end of chunk at offset {} (wanted {} bytes)",
                self.pos, n
            )));
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, LoadError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, LoadError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes(b.try_into().unwrap()))
    }

    fn i32(&mut self) -> Result<i32, LoadError> {
        Ok(self.u32()? as i32)
    }

    fn u64(&mut self) -> Result<u64, LoadError> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes(b.try_into().unwrap()))
    }

    fn f64(&mut self) -> Result<f64, LoadError> {
        let b = self.take(8)?;
        Ok(f64::from_le_bytes(b.try_into().unwrap()))
    }

    fn bool_byte(&mut self) -> Result<bool, LoadError> {
        match self.u8()? {
            0 => Ok(false),
            1 => Ok(true),
            other => Err(LoadError::MalformedChunk(format!(
                "invalid boolean byte {other:#04x}"
            ))),
        }
    }

    /// A length-prefixed string: u64 length including a trailing NUL; a
    /// length of 0 means an empty string (spec.md §4.1).
    fn lua_string(&mut self) -> Result<Option<Rc<LuaStr>>, LoadError> {
        let len = self.u64()?;
        if len == 0 {
            return Ok(None);
        }
        let len = len as usize;
        let bytes = self.take(len)?;
        // Drop the trailing NUL terminator.
        let content = &bytes[..len - 1];
        Ok(Some(Rc::new(LuaStr::new(content.to_vec()))))
    }
}

/// Parses a full chunk: header then the root prototype.
pub fn load(data: &[u8]) -> Result<Rc<FunctionProto>, LoadError> {
    let mut r = Reader::new(data);
    read_header(&mut r)?;
    read_prototype(&mut r)
}

fn read_header(r: &mut Reader) -> Result<(), LoadError> {
    let sig = r.take(4)?;
    if sig != SIGNATURE {
        return Err(LoadError::NotPrecompiledChunk);
    }
    let version = r.u8()?;
    if version != LUAC_VERSION {
        return Err(LoadError::VersionMismatch {
            got: version,
            want: LUAC_VERSION,
        });
    }
    let format = r.u8()?;
    if format != LUAC_FORMAT {
        return Err(LoadError::IncompatibleFormat(format!(
            "unsupported format byte {format:#04x}"
        )));
    }
    let endianness = r.u8()?;
    if endianness != 1 {
        return Err(LoadError::IncompatibleFormat(
            "only little-endian chunks are supported".to_string(),
        ));
    }
    let int_size = r.u8()?;
    let size_t_size = r.u8()?;
    let instr_size = r.u8()?;
    let number_size = r.u8()?;
    if (int_size, size_t_size, instr_size, number_size) != (4, 8, 4, 8) {
        return Err(LoadError::IncompatibleFormat(format!(
            "unsupported size layout: int={int_size} size_t={size_t_size} \
             instruction={instr_size} number={number_size}"
        )));
    }
    let int_flag = r.u8()?;
    if int_flag != 0 {
        return Err(LoadError::IncompatibleFormat(
            "only floating-point number chunks are supported".to_string(),
        ));
    }
    let tail = r.take(6)?;
    if tail != TAIL {
        return Err(LoadError::MalformedChunk(
            "conversion-tail mismatch".to_string(),
        ));
    }
    Ok(())
}

fn read_prototype(r: &mut Reader) -> Result<Rc<FunctionProto>, LoadError> {
    let line_defined = r.u32()?;
    let last_line_defined = r.u32()?;
    let num_params = r.u8()?;
    let is_vararg = r.bool_byte()?;
    let max_stack_size = r.u8()?;

    let n_code = r.u32()?;
    let mut code = Vec::with_capacity(n_code as usize);
    for _ in 0..n_code {
        code.push(r.u32()?);
    }

    let n_const = r.u32()?;
    let mut constants = Vec::with_capacity(n_const as usize);
    for _ in 0..n_const {
        let tag = r.u8()?;
        let value = match tag {
            TNIL => Value::Nil,
            TBOOLEAN => Value::Boolean(r.bool_byte()?),
            TNUMBER => Value::Number(r.f64()?),
            TSTRING => match r.lua_string()? {
                Some(s) => Value::Str(s),
                None => Value::str_from(""),
            },
            other => return Err(LoadError::MalformedChunk(format!("unknown constant tag {other:#04x}"))),
        };
        constants.push(value);
    }

    let n_protos = r.u32()?;
    let mut protos = Vec::with_capacity(n_protos as usize);
    for _ in 0..n_protos {
        protos.push(read_prototype(r)?);
    }

    let n_upvals = r.u32()?;
    let mut upvalues = Vec::with_capacity(n_upvals as usize);
    for _ in 0..n_upvals {
        let in_stack = r.bool_byte()?;
        let index = r.u8()?;
        upvalues.push(UpvalueDesc {
            in_stack,
            index,
            name: None,
        });
    }

    let debug = read_debug(r, &mut upvalues)?;

    Ok(Rc::new(FunctionProto {
        line_defined,
        last_line_defined,
        num_params,
        is_vararg,
        max_stack_size,
        code,
        constants,
        protos,
        upvalues,
        debug,
    }))
}

fn read_debug(r: &mut Reader, upvalues: &mut [UpvalueDesc]) -> Result<DebugInfo, LoadError> {
    let source = r.lua_string()?;

    let n_lines = r.u32()?;
    let mut line_info = Vec::with_capacity(n_lines as usize);
    for _ in 0..n_lines {
        line_info.push(r.i32()?);
    }

    let n_locals = r.u32()?;
    let mut locals = Vec::with_capacity(n_locals as usize);
    for _ in 0..n_locals {
        let name = r.lua_string()?.unwrap_or_else(|| Rc::new(LuaStr::new(Vec::new())));
        let start_pc = r.i32()?;
        let end_pc = r.i32()?;
        locals.push(LocalVar {
            name,
            start_pc,
            end_pc,
        });
    }

    let n_upval_names = r.u32()?;
    for i in 0..n_upval_names as usize {
        let name = r.lua_string()?;
        if let Some(uv) = upvalues.get_mut(i) {
            uv.name = name;
        }
    }

    Ok(DebugInfo {
        source,
        line_info,
        locals,
    })
}
