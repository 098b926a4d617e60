//! Error types for the loader and interpreter.

/// Errors produced while parsing a precompiled chunk (spec.md §4.1, §7).
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// The byte stream does not start with the Lua signature `\x1BLua`.
    #[error("not a precompiled chunk")]
    NotPrecompiledChunk,

    /// The header's version byte does not match the supported Lua 5.2
    /// version byte (`0x52`).
    #[error("version mismatch: chunk is {got:#04x}, loader supports {want:#04x}")]
    VersionMismatch { got: u8, want: u8 },

    /// Some other header field (format, endianness, size, int-flag) does
    /// not match this loader's fixed assumptions.
    #[error("incompatible chunk format: {0}")]
    IncompatibleFormat(String),

    /// A structurally invalid chunk body: short read, unknown constant
    /// tag, invalid boolean byte, etc.
    #[error("malformed chunk: {0}")]
    MalformedChunk(String),

    /// Underlying I/O failure while reading the chunk.
    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors raised by the interpreter while executing a loaded chunk
/// (spec.md §7).
#[derive(Debug, thiserror::Error, Clone)]
pub enum RuntimeError {
    /// An operand had a variant the operation cannot work with.
    #[error("attempt to perform {op} on a {got} value (expected {expected})")]
    TypeMismatch {
        op: &'static str,
        expected: &'static str,
        got: &'static str,
    },

    /// `CALL` targeted a value that is neither a closure nor a host
    /// function.
    #[error("attempt to call a {0} value")]
    NotCallable(&'static str),

    /// Arithmetic attempted on operands with no numeric coercion and no
    /// metamethod support (metamethods are out of scope for this core).
    #[error("attempt to perform arithmetic on a {0} value")]
    NoArithMetamethod(&'static str),

    /// `LEN` attempted on a value that has no defined length and no
    /// metamethod support.
    #[error("attempt to get length of a {0} value")]
    NoLenMetamethod(&'static str),

    /// A constant table entry carried an unrecognized type tag.
    #[error("invalid constant tag: {0:#04x}")]
    InvalidConstantTag(u8),

    /// Bytecode violated a structural contract the interpreter relies on
    /// (e.g. EQ/LT/LE/TEST/TESTSET not followed by JMP, LOADKX not
    /// followed by EXTRAARG).
    #[error("malformed code: {0}")]
    MalformedCode(String),

    /// The value stack could not grow enough to satisfy a frame's
    /// required window.
    #[error("stack overflow")]
    StackOverflow,

    /// A numeric `for` loop control value (init/limit/step) did not
    /// coerce to a number.
    #[error("'for' {which} value must be a number")]
    BadForArg { which: &'static str },

    /// A table key was nil, NaN, or otherwise not a valid table key.
    #[error("table index is {0}")]
    InvalidTableKey(&'static str),

    /// A host function returned an error of its own.
    #[error("host function error: {0}")]
    HostError(String),
}
