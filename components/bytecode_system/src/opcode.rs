//! Canonical opcode table for the Hamba stack machine.
//!
//! The byte values are fixed at design time. The operand classification
//! here is the single source of instruction widths: the engine, the
//! disassembler and the obfuscator all size instructions from it.

/// Width in bytes of an encoded operand
pub const OPERAND_WIDTH: usize = 2;

/// Bit set in a `PUSH` operand when it refers to the string pool
pub const STRING_REF_FLAG: u16 = 0x8000;

/// Bytecode opcodes, one byte each on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Opcode {
    /// No effect
    Nop = 0x00,
    /// Push a pool entry (operand: pool reference)
    Push = 0x01,
    /// Discard the top of stack
    Pop = 0x02,
    /// Push a variable slot (operand: slot id)
    Load = 0x03,
    /// Pop into a variable slot (operand: slot id)
    Store = 0x04,
    /// Pop and emit one output line
    Print = 0x10,
    /// Add or concatenate
    Add = 0x20,
    /// Subtract top from second-top
    Sub = 0x21,
    /// Multiply
    Mul = 0x22,
    /// Divide second-top by top
    Div = 0x23,
    /// Remainder of second-top by top
    Mod = 0x24,
    /// Equality, pushes 1 or 0
    Eq = 0x30,
    /// Less than, pushes 1 or 0
    Lt = 0x31,
    /// Greater than, pushes 1 or 0
    Gt = 0x32,
    /// Unconditional jump (operand: address)
    Jump = 0x40,
    /// Pop a condition, jump when falsy (operand: address)
    JumpIfFalse = 0x41,
    /// Push a return frame and jump (operand: address)
    Call = 0x50,
    /// Resume at the most recent return frame
    Ret = 0x51,
    /// Pop a percentage and deplete the budget by it
    Deplete = 0x60,
    /// Pop a description and abort the program
    ForceTerminate = 0x61,
    /// Bounded repeat over the top-of-stack counter (operand: back-edge address)
    Repeat = 0x62,
    /// Pop a duration in milliseconds and block
    Sleep = 0x70,
    /// Halt
    End = 0xFF,
}

impl Opcode {
    /// Every canonical opcode, in ascending byte order
    pub const ALL: [Opcode; 23] = [
        Opcode::Nop,
        Opcode::Push,
        Opcode::Pop,
        Opcode::Load,
        Opcode::Store,
        Opcode::Print,
        Opcode::Add,
        Opcode::Sub,
        Opcode::Mul,
        Opcode::Div,
        Opcode::Mod,
        Opcode::Eq,
        Opcode::Lt,
        Opcode::Gt,
        Opcode::Jump,
        Opcode::JumpIfFalse,
        Opcode::Call,
        Opcode::Ret,
        Opcode::Deplete,
        Opcode::ForceTerminate,
        Opcode::Repeat,
        Opcode::Sleep,
        Opcode::End,
    ];

    /// Look up the opcode for a canonical byte
    pub fn from_byte(byte: u8) -> Option<Opcode> {
        let op = match byte {
            0x00 => Opcode::Nop,
            0x01 => Opcode::Push,
            0x02 => Opcode::Pop,
            0x03 => Opcode::Load,
            0x04 => Opcode::Store,
            0x10 => Opcode::Print,
            0x20 => Opcode::Add,
            0x21 => Opcode::Sub,
            0x22 => Opcode::Mul,
            0x23 => Opcode::Div,
            0x24 => Opcode::Mod,
            0x30 => Opcode::Eq,
            0x31 => Opcode::Lt,
            0x32 => Opcode::Gt,
            0x40 => Opcode::Jump,
            0x41 => Opcode::JumpIfFalse,
            0x50 => Opcode::Call,
            0x51 => Opcode::Ret,
            0x60 => Opcode::Deplete,
            0x61 => Opcode::ForceTerminate,
            0x62 => Opcode::Repeat,
            0x70 => Opcode::Sleep,
            0xFF => Opcode::End,
            _ => return None,
        };
        Some(op)
    }

    /// The canonical byte for this opcode
    pub fn byte(self) -> u8 {
        self as u8
    }

    /// Mnemonic used by the disassembler and trace output
    pub fn name(self) -> &'static str {
        match self {
            Opcode::Nop => "NOP",
            Opcode::Push => "PUSH",
            Opcode::Pop => "POP",
            Opcode::Load => "LOAD",
            Opcode::Store => "STORE",
            Opcode::Print => "PRINT",
            Opcode::Add => "ADD",
            Opcode::Sub => "SUB",
            Opcode::Mul => "MUL",
            Opcode::Div => "DIV",
            Opcode::Mod => "MOD",
            Opcode::Eq => "EQ",
            Opcode::Lt => "LT",
            Opcode::Gt => "GT",
            Opcode::Jump => "JUMP",
            Opcode::JumpIfFalse => "JIF",
            Opcode::Call => "CALL",
            Opcode::Ret => "RET",
            Opcode::Deplete => "DEPLETE",
            Opcode::ForceTerminate => "FORCE_TERMINATE",
            Opcode::Repeat => "REPEAT",
            Opcode::Sleep => "SLEEP",
            Opcode::End => "END",
        }
    }

    /// Whether a 2-byte little-endian operand follows the opcode byte
    pub fn has_operand(self) -> bool {
        matches!(
            self,
            Opcode::Push
                | Opcode::Load
                | Opcode::Store
                | Opcode::Jump
                | Opcode::JumpIfFalse
                | Opcode::Call
                | Opcode::Repeat
        )
    }

    /// Encoded width of the instruction in bytes
    pub fn width(self) -> usize {
        if self.has_operand() {
            1 + OPERAND_WIDTH
        } else {
            1
        }
    }

    /// Whether the operand is a code address that relocation must rewrite
    pub fn is_control_transfer(self) -> bool {
        matches!(
            self,
            Opcode::Jump | Opcode::JumpIfFalse | Opcode::Call | Opcode::Repeat
        )
    }

    /// Check if this opcode ends a basic block
    pub fn is_terminator(self) -> bool {
        self.is_control_transfer()
            || matches!(self, Opcode::Ret | Opcode::End | Opcode::ForceTerminate)
    }

    /// Check if execution can never fall through to the next instruction
    pub fn is_unconditional_terminator(self) -> bool {
        matches!(
            self,
            Opcode::Jump | Opcode::Ret | Opcode::End | Opcode::ForceTerminate
        )
    }
}
