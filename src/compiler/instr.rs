//! Packed instruction words.
//!
//! Every instruction is a single `u64`: the opcode sits in the low 8 bits and the
//! operand in the high 56. The operand is either a signed immediate, a type handle
//! (for [`OpCode::Defer`] and [`OpCode::MapBegin`]) or a program position (for the
//! branch opcodes). Ranges are checked when a word is built, never when it is read.
use core::fmt;

use crate::{
    limits::{MAX_INT56, MAX_UINT56, MIN_INT56, OPCODE_BITS, OPCODE_MASK},
    types::{TypeArena, TypeId},
};

use super::CompileError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, arbitrary::Arbitrary)]
#[repr(u8)]
pub enum OpCode {
    /// Reserve output bytes
    Size,
    Byte,
    Word,
    Long,
    /// Copy bytes from the source value
    Copy,
    /// Move the source cursor by a byte delta
    Seek,
    /// Length-prefixed string or binary
    Vstr,
    /// Skip the referent when the pointer is null, otherwise follow it
    Deref,
    /// Hand the value to the program compiled for the operand type
    Defer,
    MapBegin,
    MapIsEnd,
    MapKey,
    MapValue,
    MapEnd,
    ListBegin,
    ListIsEnd,
    ListNext,
    ListEnd,
    Goto,
    IfNil,
    IfTrue,
}

#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("invalid opcode {0:#04x}")]
pub struct InvalidOpcode(pub u8);

impl OpCode {
    pub const ALL: [OpCode; 21] = [
        OpCode::Size,
        OpCode::Byte,
        OpCode::Word,
        OpCode::Long,
        OpCode::Copy,
        OpCode::Seek,
        OpCode::Vstr,
        OpCode::Deref,
        OpCode::Defer,
        OpCode::MapBegin,
        OpCode::MapIsEnd,
        OpCode::MapKey,
        OpCode::MapValue,
        OpCode::MapEnd,
        OpCode::ListBegin,
        OpCode::ListIsEnd,
        OpCode::ListNext,
        OpCode::ListEnd,
        OpCode::Goto,
        OpCode::IfNil,
        OpCode::IfTrue,
    ];

    pub fn name(self) -> &'static str {
        match self {
            OpCode::Size => "size",
            OpCode::Byte => "byte",
            OpCode::Word => "word",
            OpCode::Long => "long",
            OpCode::Copy => "copy",
            OpCode::Seek => "seek",
            OpCode::Vstr => "vstr",
            OpCode::Deref => "deref",
            OpCode::Defer => "defer",
            OpCode::MapBegin => "map_begin",
            OpCode::MapIsEnd => "map_is_end",
            OpCode::MapKey => "map_key",
            OpCode::MapValue => "map_value",
            OpCode::MapEnd => "map_end",
            OpCode::ListBegin => "list_begin",
            OpCode::ListIsEnd => "list_is_end",
            OpCode::ListNext => "list_next",
            OpCode::ListEnd => "list_end",
            OpCode::Goto => "goto",
            OpCode::IfNil => "if_nil",
            OpCode::IfTrue => "if_true",
        }
    }

    /// Opcodes whose operand is a program position.
    pub fn is_branch(self) -> bool {
        matches!(
            self,
            OpCode::Deref | OpCode::Goto | OpCode::IfNil | OpCode::IfTrue
        )
    }

    /// Opcodes whose operand is a type handle.
    pub fn carries_type(self) -> bool {
        matches!(self, OpCode::Defer | OpCode::MapBegin)
    }
}

impl TryFrom<u8> for OpCode {
    type Error = InvalidOpcode;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        OpCode::ALL
            .get(usize::from(value))
            .copied()
            .ok_or(InvalidOpcode(value))
    }
}

impl fmt::Display for OpCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Instr(u64);

impl Instr {
    /// An instruction with a zero operand.
    pub fn new(op: OpCode) -> Self {
        Self(op as u64)
    }

    pub fn with_int(op: OpCode, iv: i64) -> Result<Self, CompileError> {
        if !(MIN_INT56..=MAX_INT56).contains(&iv) {
            return Err(CompileError::ImmediateOutOfRange(iv));
        }
        Ok(Self(((iv as u64) << OPCODE_BITS) | op as u64))
    }

    pub fn with_type(op: OpCode, ty: TypeId) -> Result<Self, CompileError> {
        if ty.raw() > MAX_UINT56 {
            return Err(CompileError::TypeRefOutOfRange(ty));
        }
        Ok(Self((ty.raw() << OPCODE_BITS) | op as u64))
    }

    /// Rebuilds an instruction from a raw word, rejecting unknown opcodes.
    pub fn from_bits(bits: u64) -> Result<Self, InvalidOpcode> {
        OpCode::try_from((bits & OPCODE_MASK) as u8)?;
        Ok(Self(bits))
    }

    pub fn bits(self) -> u64 {
        self.0
    }

    pub fn op(self) -> OpCode {
        // every constructor stores a valid opcode
        OpCode::ALL[(self.0 & OPCODE_MASK) as usize]
    }

    /// Sign-extended immediate.
    pub fn iv(self) -> i64 {
        (self.0 as i64) >> OPCODE_BITS
    }

    /// Type handle, meaningful only when [`OpCode::carries_type`] holds.
    pub fn vt(self) -> TypeId {
        TypeId::from_raw(self.0 >> OPCODE_BITS)
    }

    /// Branch target, meaningful only when [`OpCode::is_branch`] holds.
    pub fn target(self) -> usize {
        (self.0 >> OPCODE_BITS) as usize
    }

    /// Same opcode, operand replaced by the position `pc`.
    pub(crate) fn retarget(self, pc: usize) -> Self {
        Self((self.0 & OPCODE_MASK) | ((pc as u64) << OPCODE_BITS))
    }

    pub fn disassemble<'a>(self, types: &'a TypeArena) -> Disassembly<'a> {
        Disassembly { ins: self, types }
    }
}

impl fmt::Debug for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = self.op();
        if op.carries_type() {
            write!(f, "{op} {}", self.vt())
        } else if op.is_branch() {
            write!(f, "{op} @{}", self.target())
        } else {
            write!(f, "{op} {}", self.iv())
        }
    }
}

pub struct Disassembly<'a> {
    ins: Instr,
    types: &'a TypeArena,
}

impl fmt::Display for Disassembly<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ins = self.ins;
        let op = ins.op();
        match op {
            OpCode::Byte => write!(f, "{:<18}0x{:02x}", op.name(), ins.iv()),
            OpCode::Word => write!(f, "{:<18}0x{:04x}", op.name(), ins.iv()),
            OpCode::Long => write!(f, "{:<18}0x{:08x}", op.name(), ins.iv()),
            OpCode::Size | OpCode::Copy | OpCode::Seek | OpCode::ListNext => {
                write!(f, "{:<18}{}", op.name(), ins.iv())
            }
            OpCode::Defer | OpCode::MapBegin => {
                write!(f, "{:<18}{}", op.name(), self.types.display(ins.vt()))
            }
            OpCode::Deref | OpCode::Goto | OpCode::IfNil | OpCode::IfTrue => {
                write!(f, "{:<18}L_{}", op.name(), ins.target())
            }
            _ => f.write_str(op.name()),
        }
    }
}
