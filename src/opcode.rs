//! Instruction decoding (spec.md §4.2): bit-field extraction, the K-bit
//! test, and the opcode-to-operand-mode table.

/// One 32-bit instruction word, decoded lazily via field accessors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Instruction(pub u32);

const SIZE_OP: u32 = 6;
const SIZE_A: u32 = 8;
const SIZE_C: u32 = 9;
const SIZE_B: u32 = 9;
const SIZE_BX: u32 = SIZE_C + SIZE_B;
const SIZE_AX: u32 = SIZE_A + SIZE_BX;

const POS_OP: u32 = 0;
const POS_A: u32 = POS_OP + SIZE_OP;
const POS_C: u32 = POS_A + SIZE_A;
const POS_B: u32 = POS_C + SIZE_C;
const POS_BX: u32 = POS_C;
const POS_AX: u32 = POS_A;

/// Bit 8 of a 9-bit B/C operand marks it as a constant index (spec.md §4.2).
pub const BITRK: u32 = 1 << (SIZE_B - 1);
const MAXARG_BX: u32 = (1 << SIZE_BX) - 1;
const MAXARG_SBX: i32 = (MAXARG_BX >> 1) as i32;

fn field(word: u32, pos: u32, size: u32) -> u32 {
    (word >> pos) & ((1 << size) - 1)
}

impl Instruction {
    pub fn opcode_raw(self) -> u8 {
        field(self.0, POS_OP, SIZE_OP) as u8
    }

    pub fn a(self) -> u32 {
        field(self.0, POS_A, SIZE_A)
    }

    /// Raw 9-bit B field, K-bit still set if present.
    pub fn b_raw(self) -> u32 {
        field(self.0, POS_B, SIZE_B)
    }

    /// Raw 9-bit C field, K-bit still set if present.
    pub fn c_raw(self) -> u32 {
        field(self.0, POS_C, SIZE_C)
    }

    pub fn bx(self) -> u32 {
        field(self.0, POS_BX, SIZE_BX)
    }

    pub fn sbx(self) -> i32 {
        self.bx() as i32 - MAXARG_SBX
    }

    pub fn ax(self) -> u32 {
        field(self.0, POS_AX, SIZE_AX)
    }

    pub fn opcode(self) -> Option<OpCode> {
        OpCode::from_raw(self.opcode_raw())
    }
}

/// Whether a 9-bit B/C operand is a plain register index or, with the
/// K-bit set, a constant index (spec.md §4.2, the "RK" convention).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operand {
    Register(u8),
    Constant(u8),
}

/// Splits a raw 9-bit RK operand per the K-bit test.
pub fn decode_rk(raw: u32) -> Operand {
    if raw & BITRK != 0 {
        Operand::Constant((raw & 0xFF) as u8)
    } else {
        Operand::Register((raw & 0xFF) as u8)
    }
}

/// Instruction encoding format (spec.md §4.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstrMode {
    IABC,
    IABx,
    IAsBx,
    IAx,
}

/// Operand mode for the generic `B`/`C` fields (spec.md §4.2). `A`'s role
/// is opcode-specific (register for almost every opcode, upvalue index
/// only for `GETUPVAL`/`SETUPVAL`, and the upvalue-table operand for
/// `GETTABUP`/`SETTABUP`) and is therefore not modeled generically here;
/// see SPEC_FULL.md §9.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpArgMode {
    Unused,
    Used,
    Register,
    ConstOrRegister,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpMode {
    pub mode: InstrMode,
    pub b: OpArgMode,
    pub c: OpArgMode,
}

macro_rules! opmode {
    ($mode:ident, $b:ident, $c:ident) => {
        OpMode {
            mode: InstrMode::$mode,
            b: OpArgMode::$b,
            c: OpArgMode::$c,
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    Move = 0,
    LoadK,
    LoadKx,
    LoadBool,
    LoadNil,
    GetUpval,
    GetTabUp,
    GetTable,
    SetTabUp,
    SetUpval,
    SetTable,
    NewTable,
    SelfOp,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Unm,
    Not,
    Len,
    Concat,
    Jmp,
    Eq,
    Lt,
    Le,
    Test,
    TestSet,
    Call,
    TailCall,
    Return,
    ForLoop,
    ForPrep,
    TForCall,
    TForLoop,
    SetList,
    Closure,
    Vararg,
    ExtraArg,
}

pub const NUM_OPCODES: u8 = 40;

impl OpCode {
    pub fn from_raw(raw: u8) -> Option<OpCode> {
        use OpCode::*;
        const TABLE: [OpCode; NUM_OPCODES as usize] = [
            Move, LoadK, LoadKx, LoadBool, LoadNil, GetUpval, GetTabUp, GetTable, SetTabUp,
            SetUpval, SetTable, NewTable, SelfOp, Add, Sub, Mul, Div, Mod, Pow, Unm, Not, Len,
            Concat, Jmp, Eq, Lt, Le, Test, TestSet, Call, TailCall, Return, ForLoop, ForPrep,
            TForCall, TForLoop, SetList, Closure, Vararg, ExtraArg,
        ];
        TABLE.get(raw as usize).copied()
    }

    pub fn name(self) -> &'static str {
        use OpCode::*;
        match self {
            Move => "MOVE",
            LoadK => "LOADK",
            LoadKx => "LOADKX",
            LoadBool => "LOADBOOL",
            LoadNil => "LOADNIL",
            GetUpval => "GETUPVAL",
            GetTabUp => "GETTABUP",
            GetTable => "GETTABLE",
            SetTabUp => "SETTABUP",
            SetUpval => "SETUPVAL",
            SetTable => "SETTABLE",
            NewTable => "NEWTABLE",
            SelfOp => "SELF",
            Add => "ADD",
            Sub => "SUB",
            Mul => "MUL",
            Div => "DIV",
            Mod => "MOD",
            Pow => "POW",
            Unm => "UNM",
            Not => "NOT",
            Len => "LEN",
            Concat => "CONCAT",
            Jmp => "JMP",
            Eq => "EQ",
            Lt => "LT",
            Le => "LE",
            Test => "TEST",
            TestSet => "TESTSET",
            Call => "CALL",
            TailCall => "TAILCALL",
            Return => "RETURN",
            ForLoop => "FORLOOP",
            ForPrep => "FORPREP",
            TForCall => "TFORCALL",
            TForLoop => "TFORLOOP",
            SetList => "SETLIST",
            Closure => "CLOSURE",
            Vararg => "VARARG",
            ExtraArg => "EXTRAARG",
        }
    }

    /// The static opcode → operand-mode table (spec.md §4.2).
    pub fn mode(self) -> OpMode {
        use OpCode::*;
        match self {
            Move => opmode!(IABC, Register, Unused),
            LoadK => opmode!(IABx, Unused, Unused),
            LoadKx => opmode!(IABx, Unused, Unused),
            LoadBool => opmode!(IABC, Used, Used),
            LoadNil => opmode!(IABC, Used, Unused),
            GetUpval => opmode!(IABC, Used, Unused),
            GetTabUp => opmode!(IABC, Used, ConstOrRegister),
            GetTable => opmode!(IABC, Register, ConstOrRegister),
            SetTabUp => opmode!(IABC, ConstOrRegister, ConstOrRegister),
            SetUpval => opmode!(IABC, Used, Unused),
            SetTable => opmode!(IABC, ConstOrRegister, ConstOrRegister),
            NewTable => opmode!(IABC, Used, Used),
            SelfOp => opmode!(IABC, Register, ConstOrRegister),
            Add | Sub | Mul | Div | Mod | Pow => opmode!(IABC, ConstOrRegister, ConstOrRegister),
            Unm | Not | Len => opmode!(IABC, Register, Unused),
            Concat => opmode!(IABC, Register, Register),
            Jmp => opmode!(IAsBx, Unused, Unused),
            Eq | Lt | Le => opmode!(IABC, ConstOrRegister, ConstOrRegister),
            Test => opmode!(IABC, Unused, Used),
            TestSet => opmode!(IABC, Register, Used),
            Call => opmode!(IABC, Used, Used),
            TailCall => opmode!(IABC, Used, Used),
            Return => opmode!(IABC, Used, Unused),
            ForLoop => opmode!(IAsBx, Unused, Unused),
            ForPrep => opmode!(IAsBx, Unused, Unused),
            TForCall => opmode!(IABC, Unused, Used),
            TForLoop => opmode!(IAsBx, Unused, Unused),
            SetList => opmode!(IABC, Used, Used),
            Closure => opmode!(IABx, Unused, Unused),
            Vararg => opmode!(IABC, Used, Unused),
            ExtraArg => opmode!(IAx, Unused, Unused),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn field_layout_matches_spec() {
        // OP in low 6 bits, A next 8, C next 9, B next 9.
        let word: u32 = (OpCode::Move as u32) | (5 << 6) | (7 << 14) | (9 << 23);
        let i = Instruction(word);
        assert_eq!(i.opcode(), Some(OpCode::Move));
        assert_eq!(i.a(), 5);
        assert_eq!(i.c_raw(), 7);
        assert_eq!(i.b_raw(), 9);
    }

    #[test]
    fn k_bit_marks_constant_operand() {
        assert_eq!(decode_rk(0x42), Operand::Register(0x42));
        assert_eq!(decode_rk(BITRK | 0x12), Operand::Constant(0x12));
    }

    #[test]
    fn sbx_bias_is_signed() {
        let zero_bx: u32 = MAXARG_SBX as u32;
        let word = (zero_bx << POS_BX) | (OpCode::Jmp as u32);
        assert_eq!(Instruction(word).sbx(), 0);

        let neg_bx: u32 = 0;
        let word = (neg_bx << POS_BX) | (OpCode::Jmp as u32);
        assert_eq!(Instruction(word).sbx(), -MAXARG_SBX);
    }

    #[test]
    fn opcode_table_has_40_entries() {
        for raw in 0..NUM_OPCODES {
            assert!(OpCode::from_raw(raw).is_some());
        }
        assert!(OpCode::from_raw(NUM_OPCODES).is_none());
    }
}
