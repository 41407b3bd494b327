//! IJVM opcode table.

/// Opcodes supported by the machine, with their fixed wire encoding.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum OPCode {
    Nop = 0x00,
    BiPush = 0x10,
    LdcW = 0x13,
    ILoad = 0x15,
    IStore = 0x36,
    Pop = 0x57,
    Dup = 0x59,
    Swap = 0x5F,
    IAdd = 0x60,
    ISub = 0x64,
    IAnd = 0x7E,
    IInc = 0x84,
    IfEq = 0x99,
    IfLt = 0x9B,
    IfICmpEq = 0x9F,
    Goto = 0xA7,
    IReturn = 0xAC,
    IOr = 0xB0,
    InvokeVirtual = 0xB6,
    Wide = 0xC4,
    TailCall = 0xCB,
    NewArray = 0xD1,
    IALoad = 0xD2,
    IAStore = 0xD3,
    In = 0xFC,
    Out = 0xFD,
    Err = 0xFE,
    Halt = 0xFF,
}

impl OPCode {
    /// Decode an opcode byte. Returns `None` for bytes outside the table;
    /// the runtime treats those as a recoverable error, not a crash.
    pub fn from_u8(byte: u8) -> Option<Self> {
        let op = match byte {
            0x00 => Self::Nop,
            0x10 => Self::BiPush,
            0x13 => Self::LdcW,
            0x15 => Self::ILoad,
            0x36 => Self::IStore,
            0x57 => Self::Pop,
            0x59 => Self::Dup,
            0x5F => Self::Swap,
            0x60 => Self::IAdd,
            0x64 => Self::ISub,
            0x7E => Self::IAnd,
            0x84 => Self::IInc,
            0x99 => Self::IfEq,
            0x9B => Self::IfLt,
            0x9F => Self::IfICmpEq,
            0xA7 => Self::Goto,
            0xAC => Self::IReturn,
            0xB0 => Self::IOr,
            0xB6 => Self::InvokeVirtual,
            0xC4 => Self::Wide,
            0xCB => Self::TailCall,
            0xD1 => Self::NewArray,
            0xD2 => Self::IALoad,
            0xD3 => Self::IAStore,
            0xFC => Self::In,
            0xFD => Self::Out,
            0xFE => Self::Err,
            0xFF => Self::Halt,
            _ => return None,
        };
        Some(op)
    }

    /// Assembler mnemonic, used in diagnostics.
    pub const fn mnemonic(&self) -> &'static str {
        match self {
            Self::Nop => "NOP",
            Self::BiPush => "BIPUSH",
            Self::LdcW => "LDC_W",
            Self::ILoad => "ILOAD",
            Self::IStore => "ISTORE",
            Self::Pop => "POP",
            Self::Dup => "DUP",
            Self::Swap => "SWAP",
            Self::IAdd => "IADD",
            Self::ISub => "ISUB",
            Self::IAnd => "IAND",
            Self::IInc => "IINC",
            Self::IfEq => "IFEQ",
            Self::IfLt => "IFLT",
            Self::IfICmpEq => "IF_ICMPEQ",
            Self::Goto => "GOTO",
            Self::IReturn => "IRETURN",
            Self::IOr => "IOR",
            Self::InvokeVirtual => "INVOKEVIRTUAL",
            Self::Wide => "WIDE",
            Self::TailCall => "TAILCALL",
            Self::NewArray => "NEWARRAY",
            Self::IALoad => "IALOAD",
            Self::IAStore => "IASTORE",
            Self::In => "IN",
            Self::Out => "OUT",
            Self::Err => "ERR",
            Self::Halt => "HALT",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_every_table_entry() {
        let table = [
            (0x00, OPCode::Nop),
            (0x10, OPCode::BiPush),
            (0x13, OPCode::LdcW),
            (0x15, OPCode::ILoad),
            (0x36, OPCode::IStore),
            (0x59, OPCode::Dup),
            (0x5F, OPCode::Swap),
            (0x60, OPCode::IAdd),
            (0x84, OPCode::IInc),
            (0xA7, OPCode::Goto),
            (0xAC, OPCode::IReturn),
            (0xB6, OPCode::InvokeVirtual),
            (0xC4, OPCode::Wide),
            (0xCB, OPCode::TailCall),
            (0xD1, OPCode::NewArray),
            (0xFF, OPCode::Halt),
        ];
        for (byte, expected) in table {
            assert_eq!(OPCode::from_u8(byte), Some(expected));
            assert_eq!(expected as u8, byte);
        }
    }

    #[test]
    fn rejects_unknown_bytes() {
        assert_eq!(OPCode::from_u8(0x01), None);
        assert_eq!(OPCode::from_u8(0xCA), None);
        assert_eq!(OPCode::from_u8(0xFB), None);
    }
}
