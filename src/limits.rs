//! Numeric limits shared by the instruction encoding and the compiler

/// Smallest immediate an instruction word can carry.
pub const MIN_INT56: i64 = -(1 << 55);
/// Largest immediate an instruction word can carry.
pub const MAX_INT56: i64 = (1 << 55) - 1;
/// Largest type handle (and largest program position) an instruction word can carry.
pub const MAX_UINT56: u64 = (1 << 56) - 1;

/// Default nesting budget of the execution engine's evaluation stack.
pub const MAX_DEPTH: usize = 1024;

/// Width of the opcode field, which sits in the low bits of a word.
pub(crate) const OPCODE_BITS: u32 = 8;
pub(crate) const OPCODE_MASK: u64 = (1 << OPCODE_BITS) - 1;
