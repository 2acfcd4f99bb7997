//! Bytecode instruction set and emitter.
//!
//! Every instruction is one opcode byte followed by its inline operands:
//!
//! | operand   | width | encoding                                      |
//! |-----------|-------|-----------------------------------------------|
//! | size      | 1     | size class, log2 of the byte width (0..=3)    |
//! | type      | 1     | [`TypeTag`] byte                              |
//! | register  | 1     | register in the upper nibble, size class low  |
//! | offset    | 4     | little-endian `i32`, absolute byte offset     |
//!
//! Instructions without an explicit register operand work on `left`.
//! Literal data lives after the instruction stream; see [`CodeBuffer`].

use std::fmt;

use thiserror::Error;

use crate::types::{SizeClass, TypeTag};
use crate::value::Scalar;

/// Placeholder written for an offset whose final value is not known yet.
pub const UNRESOLVED_OFFSET: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Call = 0x00,
    Return = 0x01,
    LoadSp = 0x02,
    LoadFp = 0x03,
    LoadIr = 0x04,
    LoadC = 0x05,
    Swap = 0x06,
    StoreSp = 0x07,
    StoreFp = 0x08,
    StoreIr = 0x09,
    Jmp = 0x0A,
    Jmpz = 0x0B,
    Jmpnz = 0x0C,
    CmpE = 0x0D,
    CmpL = 0x0E,
    CmpG = 0x0F,
    Push = 0x10,
    Pop = 0x11,
    Add = 0x12,
    Sub = 0x13,
    Mul = 0x14,
    Div = 0x15,
    Neg = 0x16,
    Floor = 0x17,
    Ceil = 0x18,
    And = 0x19,
    Or = 0x1A,
    Xor = 0x1B,
    Not = 0x1C,
    Conv = 0x1D,
}

impl TryFrom<u8> for Opcode {
    type Error = DecodeError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        use Opcode::*;
        const TABLE: [Opcode; 30] = [
            Call, Return, LoadSp, LoadFp, LoadIr, LoadC, Swap, StoreSp, StoreFp, StoreIr, Jmp,
            Jmpz, Jmpnz, CmpE, CmpL, CmpG, Push, Pop, Add, Sub, Mul, Div, Neg, Floor, Ceil, And,
            Or, Xor, Not, Conv,
        ];
        TABLE
            .get(byte as usize)
            .copied()
            .ok_or(DecodeError::UnknownOpcode(byte))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    Left = 0,
    Right = 1,
}

/// Register plus transfer width, packed into one operand byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegisterOperand {
    pub register: Register,
    pub size: SizeClass,
}

impl RegisterOperand {
    pub fn new(register: Register, size: SizeClass) -> Self {
        RegisterOperand { register, size }
    }

    pub fn bits(self) -> u8 {
        ((self.register as u8) << 4) | self.size.bits()
    }

    pub fn from_bits(bits: u8) -> Option<Self> {
        let register = match bits >> 4 {
            0 => Register::Left,
            1 => Register::Right,
            _ => return None,
        };
        let size = SizeClass::from_bits(bits & 0x0F)?;
        Some(RegisterOperand { register, size })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    /// Push frame pointer and return address, then jump.
    Call { target: i32 },
    /// Pop return address and frame pointer; a negative address halts.
    Return,
    LoadSp { size: SizeClass, offset: i32 },
    LoadFp { size: SizeClass, offset: i32 },
    /// Load from the operand-stack address held in `right`.
    LoadIr { size: SizeClass },
    LoadC { size: SizeClass, offset: i32 },
    Swap,
    StoreSp { size: SizeClass, offset: i32 },
    StoreFp { size: SizeClass, offset: i32 },
    /// Store to the operand-stack address held in `right`.
    StoreIr { size: SizeClass },
    Jmp { target: i32 },
    /// Jump when the low bit of `left` is clear.
    Jmpz { target: i32 },
    /// Jump when the low bit of `left` is set.
    Jmpnz { target: i32 },
    CmpE(TypeTag),
    CmpL(TypeTag),
    CmpG(TypeTag),
    Push(RegisterOperand),
    Pop(RegisterOperand),
    Add(TypeTag),
    Sub(TypeTag),
    Mul(TypeTag),
    Div(TypeTag),
    Neg(TypeTag),
    Floor(TypeTag),
    Ceil(TypeTag),
    And(TypeTag),
    Or(TypeTag),
    Xor(TypeTag),
    Not(TypeTag),
    Conv { from: TypeTag, to: TypeTag },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("instruction at {0} runs past the end of the buffer")]
    Truncated(usize),
    #[error("unknown opcode 0x{0:02x}")]
    UnknownOpcode(u8),
    #[error("invalid operand byte 0x{0:02x}")]
    InvalidOperand(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RelocationError {
    #[error("offset {0} does not fit a 4-byte signed operand")]
    OffsetOverflow(usize),
    #[error("no branch instruction at offset {0}")]
    NotABranch(usize),
}

impl Instruction {
    pub fn opcode(&self) -> Opcode {
        match self {
            Instruction::Call { .. } => Opcode::Call,
            Instruction::Return => Opcode::Return,
            Instruction::LoadSp { .. } => Opcode::LoadSp,
            Instruction::LoadFp { .. } => Opcode::LoadFp,
            Instruction::LoadIr { .. } => Opcode::LoadIr,
            Instruction::LoadC { .. } => Opcode::LoadC,
            Instruction::Swap => Opcode::Swap,
            Instruction::StoreSp { .. } => Opcode::StoreSp,
            Instruction::StoreFp { .. } => Opcode::StoreFp,
            Instruction::StoreIr { .. } => Opcode::StoreIr,
            Instruction::Jmp { .. } => Opcode::Jmp,
            Instruction::Jmpz { .. } => Opcode::Jmpz,
            Instruction::Jmpnz { .. } => Opcode::Jmpnz,
            Instruction::CmpE(_) => Opcode::CmpE,
            Instruction::CmpL(_) => Opcode::CmpL,
            Instruction::CmpG(_) => Opcode::CmpG,
            Instruction::Push(_) => Opcode::Push,
            Instruction::Pop(_) => Opcode::Pop,
            Instruction::Add(_) => Opcode::Add,
            Instruction::Sub(_) => Opcode::Sub,
            Instruction::Mul(_) => Opcode::Mul,
            Instruction::Div(_) => Opcode::Div,
            Instruction::Neg(_) => Opcode::Neg,
            Instruction::Floor(_) => Opcode::Floor,
            Instruction::Ceil(_) => Opcode::Ceil,
            Instruction::And(_) => Opcode::And,
            Instruction::Or(_) => Opcode::Or,
            Instruction::Xor(_) => Opcode::Xor,
            Instruction::Not(_) => Opcode::Not,
            Instruction::Conv { .. } => Opcode::Conv,
        }
    }

    /// Append the encoded instruction to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.push(self.opcode() as u8);
        match *self {
            Instruction::Return | Instruction::Swap => {}
            Instruction::Call { target }
            | Instruction::Jmp { target }
            | Instruction::Jmpz { target }
            | Instruction::Jmpnz { target } => out.extend_from_slice(&target.to_le_bytes()),
            Instruction::LoadSp { size, offset }
            | Instruction::LoadFp { size, offset }
            | Instruction::LoadC { size, offset }
            | Instruction::StoreSp { size, offset }
            | Instruction::StoreFp { size, offset } => {
                out.push(size.bits());
                out.extend_from_slice(&offset.to_le_bytes());
            }
            Instruction::LoadIr { size } | Instruction::StoreIr { size } => out.push(size.bits()),
            Instruction::Push(reg) | Instruction::Pop(reg) => out.push(reg.bits()),
            Instruction::CmpE(ty)
            | Instruction::CmpL(ty)
            | Instruction::CmpG(ty)
            | Instruction::Add(ty)
            | Instruction::Sub(ty)
            | Instruction::Mul(ty)
            | Instruction::Div(ty)
            | Instruction::Neg(ty)
            | Instruction::Floor(ty)
            | Instruction::Ceil(ty)
            | Instruction::And(ty)
            | Instruction::Or(ty)
            | Instruction::Xor(ty)
            | Instruction::Not(ty) => out.push(ty.bits()),
            Instruction::Conv { from, to } => {
                out.push(from.bits());
                out.push(to.bits());
            }
        }
    }

    /// Decode the instruction starting at `pc`, returning it together with
    /// the offset of the next instruction.
    pub fn decode(code: &[u8], pc: usize) -> Result<(Instruction, usize), DecodeError> {
        let mut cursor = Cursor { code, start: pc, pos: pc };
        let opcode = Opcode::try_from(cursor.byte()?)?;
        let instruction = match opcode {
            Opcode::Call => Instruction::Call { target: cursor.i32()? },
            Opcode::Return => Instruction::Return,
            Opcode::LoadSp => Instruction::LoadSp { size: cursor.size()?, offset: cursor.i32()? },
            Opcode::LoadFp => Instruction::LoadFp { size: cursor.size()?, offset: cursor.i32()? },
            Opcode::LoadIr => Instruction::LoadIr { size: cursor.size()? },
            Opcode::LoadC => Instruction::LoadC { size: cursor.size()?, offset: cursor.i32()? },
            Opcode::Swap => Instruction::Swap,
            Opcode::StoreSp => Instruction::StoreSp { size: cursor.size()?, offset: cursor.i32()? },
            Opcode::StoreFp => Instruction::StoreFp { size: cursor.size()?, offset: cursor.i32()? },
            Opcode::StoreIr => Instruction::StoreIr { size: cursor.size()? },
            Opcode::Jmp => Instruction::Jmp { target: cursor.i32()? },
            Opcode::Jmpz => Instruction::Jmpz { target: cursor.i32()? },
            Opcode::Jmpnz => Instruction::Jmpnz { target: cursor.i32()? },
            Opcode::CmpE => Instruction::CmpE(cursor.scalar_type()?),
            Opcode::CmpL => Instruction::CmpL(cursor.scalar_type()?),
            Opcode::CmpG => Instruction::CmpG(cursor.scalar_type()?),
            Opcode::Push => Instruction::Push(cursor.register()?),
            Opcode::Pop => Instruction::Pop(cursor.register()?),
            Opcode::Add => Instruction::Add(cursor.scalar_type()?),
            Opcode::Sub => Instruction::Sub(cursor.scalar_type()?),
            Opcode::Mul => Instruction::Mul(cursor.scalar_type()?),
            Opcode::Div => Instruction::Div(cursor.scalar_type()?),
            Opcode::Neg => Instruction::Neg(cursor.scalar_type()?),
            Opcode::Floor => Instruction::Floor(cursor.scalar_type()?),
            Opcode::Ceil => Instruction::Ceil(cursor.scalar_type()?),
            Opcode::And => Instruction::And(cursor.scalar_type()?),
            Opcode::Or => Instruction::Or(cursor.scalar_type()?),
            Opcode::Xor => Instruction::Xor(cursor.scalar_type()?),
            Opcode::Not => Instruction::Not(cursor.scalar_type()?),
            Opcode::Conv => Instruction::Conv {
                from: cursor.scalar_type()?,
                to: cursor.scalar_type()?,
            },
        };
        Ok((instruction, cursor.pos))
    }

    pub fn encoded_len(&self) -> usize {
        let mut buf = Vec::with_capacity(6);
        self.encode(&mut buf);
        buf.len()
    }
}

struct Cursor<'a> {
    code: &'a [u8],
    start: usize,
    pos: usize,
}

impl Cursor<'_> {
    fn byte(&mut self) -> Result<u8, DecodeError> {
        let byte = *self
            .code
            .get(self.pos)
            .ok_or(DecodeError::Truncated(self.start))?;
        self.pos += 1;
        Ok(byte)
    }

    fn i32(&mut self) -> Result<i32, DecodeError> {
        let bytes = self
            .code
            .get(self.pos..self.pos + 4)
            .ok_or(DecodeError::Truncated(self.start))?;
        self.pos += 4;
        Ok(i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn size(&mut self) -> Result<SizeClass, DecodeError> {
        let byte = self.byte()?;
        SizeClass::from_bits(byte).ok_or(DecodeError::InvalidOperand(byte))
    }

    /// One of the ten scalar tags; NONE is never a valid operand.
    fn scalar_type(&mut self) -> Result<TypeTag, DecodeError> {
        let byte = self.byte()?;
        match TypeTag::from_bits(byte) {
            Some(tag) if !tag.is_none() => Ok(tag),
            _ => Err(DecodeError::InvalidOperand(byte)),
        }
    }

    fn register(&mut self) -> Result<RegisterOperand, DecodeError> {
        let byte = self.byte()?;
        RegisterOperand::from_bits(byte).ok_or(DecodeError::InvalidOperand(byte))
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mnemonic = format!("{:?}", self.opcode()).to_uppercase();
        match *self {
            Instruction::Return | Instruction::Swap => write!(f, "{mnemonic}"),
            Instruction::Call { target }
            | Instruction::Jmp { target }
            | Instruction::Jmpz { target }
            | Instruction::Jmpnz { target } => write!(f, "{mnemonic:<8}@{target:04x}"),
            Instruction::LoadSp { size, offset }
            | Instruction::LoadFp { size, offset }
            | Instruction::StoreSp { size, offset }
            | Instruction::StoreFp { size, offset } => {
                write!(f, "{mnemonic:<8}{}b {offset:+}", size.byte_width())
            }
            Instruction::LoadC { size, offset } => {
                write!(f, "{mnemonic:<8}{}b @{offset:04x}", size.byte_width())
            }
            Instruction::LoadIr { size } | Instruction::StoreIr { size } => {
                write!(f, "{mnemonic:<8}{}b", size.byte_width())
            }
            Instruction::Push(reg) | Instruction::Pop(reg) => {
                let name = match reg.register {
                    Register::Left => "left",
                    Register::Right => "right",
                };
                write!(f, "{mnemonic:<8}{name} {}b", reg.size.byte_width())
            }
            Instruction::Conv { from, to } => write!(f, "{mnemonic:<8}{from} -> {to}"),
            Instruction::CmpE(ty)
            | Instruction::CmpL(ty)
            | Instruction::CmpG(ty)
            | Instruction::Add(ty)
            | Instruction::Sub(ty)
            | Instruction::Mul(ty)
            | Instruction::Div(ty)
            | Instruction::Neg(ty)
            | Instruction::Floor(ty)
            | Instruction::Ceil(ty)
            | Instruction::And(ty)
            | Instruction::Or(ty)
            | Instruction::Xor(ty)
            | Instruction::Not(ty) => write!(f, "{mnemonic:<8}{ty}"),
        }
    }
}

/// Literal bytes waiting to be appended after the instruction stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRelocation {
    /// Position of the 4-byte offset operand to patch.
    pub placeholder: usize,
    pub data: Vec<u8>,
}

/// Finished buffer: instructions first, constant region from `code_len`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assembled {
    pub bytes: Vec<u8>,
    pub code_len: usize,
}

/// Append-only instruction buffer.
///
/// Constants are emitted as a `LOADC` whose offset operand is a
/// placeholder; the literal bytes are kept as a [`PendingRelocation`] until
/// [`CodeBuffer::finish`] appends them after the last instruction and
/// patches each placeholder with the final offset. `finish` consumes the
/// buffer, so every relocation is resolved exactly once.
#[derive(Debug, Default)]
pub struct CodeBuffer {
    bytes: Vec<u8>,
    relocations: Vec<PendingRelocation>,
}

impl CodeBuffer {
    pub fn new() -> Self {
        CodeBuffer::default()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Append an instruction and return the offset it starts at.
    pub fn emit(&mut self, instruction: Instruction) -> usize {
        let at = self.bytes.len();
        instruction.encode(&mut self.bytes);
        at
    }

    /// Emit `LOADC` for `value`; the literal lands in the constant region.
    pub fn emit_constant(&mut self, value: Scalar) -> usize {
        let at = self.emit(Instruction::LoadC {
            size: value.type_tag().size(),
            offset: UNRESOLVED_OFFSET,
        });
        self.relocations.push(PendingRelocation {
            placeholder: self.bytes.len() - 4,
            data: value.to_le_bytes(),
        });
        at
    }

    pub fn pending(&self) -> &[PendingRelocation] {
        &self.relocations
    }

    /// Point the branch (`CALL`/`JMP`/`JMPZ`/`JMPNZ`) emitted at `at` to
    /// `target`. Used for forward references within the instruction stream.
    pub fn patch_target(&mut self, at: usize, target: usize) -> Result<(), RelocationError> {
        let is_branch = self.bytes.get(at).is_some_and(|&byte| {
            matches!(
                Opcode::try_from(byte),
                Ok(Opcode::Call | Opcode::Jmp | Opcode::Jmpz | Opcode::Jmpnz)
            )
        });
        if !is_branch || at + 5 > self.bytes.len() {
            return Err(RelocationError::NotABranch(at));
        }
        let target = i32::try_from(target).map_err(|_| RelocationError::OffsetOverflow(target))?;
        self.write_i32(at + 1, target);
        Ok(())
    }

    /// Append every pending literal and patch its placeholder.
    pub fn finish(mut self) -> Result<Assembled, RelocationError> {
        let code_len = self.bytes.len();
        for relocation in std::mem::take(&mut self.relocations) {
            let offset = self.bytes.len();
            let end = offset + relocation.data.len();
            if i32::try_from(end).is_err() {
                return Err(RelocationError::OffsetOverflow(end));
            }
            self.bytes.extend_from_slice(&relocation.data);
            self.write_i32(relocation.placeholder, offset as i32);
        }
        Ok(Assembled {
            bytes: self.bytes,
            code_len,
        })
    }

    fn write_i32(&mut self, at: usize, value: i32) {
        self.bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encodes_operands_little_endian() {
        let mut out = Vec::new();
        Instruction::LoadC { size: SizeClass::B16, offset: 0x0102_0304 }.encode(&mut out);
        assert_eq!(out, [Opcode::LoadC as u8, 1, 0x04, 0x03, 0x02, 0x01]);

        out.clear();
        Instruction::Push(RegisterOperand::new(Register::Right, SizeClass::B32)).encode(&mut out);
        assert_eq!(out, [Opcode::Push as u8, 0x12]);

        out.clear();
        Instruction::Conv { from: TypeTag::U8, to: TypeTag::I8 }.encode(&mut out);
        assert_eq!(out, [Opcode::Conv as u8, 0x10, 0x20]);
    }

    #[test]
    fn decodes_what_it_encodes() {
        let program = [
            Instruction::Call { target: 12 },
            Instruction::StoreFp { size: SizeClass::B64, offset: -8 },
            Instruction::Mul(TypeTag::F64),
            Instruction::Pop(RegisterOperand::new(Register::Left, SizeClass::B8)),
            Instruction::Return,
        ];
        let mut bytes = Vec::new();
        for instruction in &program {
            instruction.encode(&mut bytes);
        }
        let mut pc = 0;
        for expected in program {
            let (decoded, next) = Instruction::decode(&bytes, pc).unwrap();
            assert_eq!(decoded, expected);
            assert_eq!(next - pc, expected.encoded_len());
            pc = next;
        }
        assert_eq!(pc, bytes.len());
    }

    #[test]
    fn rejects_bad_bytes() {
        assert_eq!(Instruction::decode(&[0xEE], 0), Err(DecodeError::UnknownOpcode(0xEE)));
        assert_eq!(
            Instruction::decode(&[Opcode::Add as u8, 0x00], 0),
            Err(DecodeError::InvalidOperand(0x00))
        );
        assert_eq!(
            Instruction::decode(&[Opcode::Neg as u8, 0x31], 0),
            Err(DecodeError::InvalidOperand(0x31))
        );
        assert_eq!(
            Instruction::decode(&[Opcode::Push as u8, 0x20], 0),
            Err(DecodeError::InvalidOperand(0x20))
        );
        assert_eq!(
            Instruction::decode(&[Opcode::Jmp as u8, 1, 2], 0),
            Err(DecodeError::Truncated(0))
        );
    }

    #[test]
    fn finish_appends_literals_and_patches_placeholders() {
        let mut buffer = CodeBuffer::new();
        buffer.emit_constant(Scalar::U8(7));
        buffer.emit_constant(Scalar::U16(0xBEEF));
        buffer.emit(Instruction::Return);
        assert_eq!(buffer.pending().len(), 2);

        let assembled = buffer.finish().unwrap();
        assert_eq!(assembled.code_len, 13);
        assert_eq!(&assembled.bytes[13..], &[7, 0xEF, 0xBE]);

        let (first, next) = Instruction::decode(&assembled.bytes, 0).unwrap();
        assert_eq!(first, Instruction::LoadC { size: SizeClass::B8, offset: 13 });
        let (second, _) = Instruction::decode(&assembled.bytes, next).unwrap();
        assert_eq!(second, Instruction::LoadC { size: SizeClass::B16, offset: 14 });
    }

    #[test]
    fn patches_forward_branches_only() {
        let mut buffer = CodeBuffer::new();
        let jump = buffer.emit(Instruction::Jmp { target: UNRESOLVED_OFFSET });
        let swap = buffer.emit(Instruction::Swap);
        let end = buffer.emit(Instruction::Return);
        buffer.patch_target(jump, end).unwrap();
        assert_eq!(buffer.patch_target(swap, end), Err(RelocationError::NotABranch(swap)));

        let assembled = buffer.finish().unwrap();
        let (patched, _) = Instruction::decode(&assembled.bytes, jump).unwrap();
        assert_eq!(patched, Instruction::Jmp { target: end as i32 });
    }

    #[test]
    fn displays_mnemonics() {
        assert_eq!(Instruction::Add(TypeTag::I32).to_string(), "ADD     i32");
        assert_eq!(
            Instruction::Conv { from: TypeTag::U8, to: TypeTag::F32 }.to_string(),
            "CONV    u8 -> f32"
        );
        assert_eq!(Instruction::Return.to_string(), "RETURN");
    }
}
