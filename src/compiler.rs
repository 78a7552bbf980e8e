//! Compiles resolved types into encoder programs.
//!
//! For example, given
//!
//! ```text
//! struct Point { 1: i32 x, 2: optional i64 tag }
//! ```
//!
//! the unoptimized program for `Point` is
//!
//! ```text
//!     size              3
//!     byte              0x08
//!     word              0x0001
//!     size              4
//!     copy              4
//!     size              3
//!     seek              8
//!     byte              0x0a
//!     word              0x0002
//!     deref             L_12
//!     size              8
//!     copy              8
//! L_12:
//!     byte              0x00
//!     end
//! ```
//!
//! Each field is its Thrift header (type tag and id) followed by the code for its
//! value, `seek` moves the source cursor between fields and `byte 0x00` is the STOP
//! marker. Types that are already being expanded further up are not inlined again: a
//! `defer` hands them to whatever program the execution engine keeps for that type.
use std::collections::HashSet;

use tracing::{debug, instrument, trace};

use crate::{
    limits::{MAX_DEPTH, MAX_UINT56},
    types::{Field, ResolveError, TypeArena, TypeDesc, TypeId},
};

pub mod instr;
pub mod optimize;
pub mod pool;
pub mod program;

pub use instr::{Instr, InvalidOpcode, OpCode};
pub use pool::Pool;
pub use program::Program;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CompileError {
    #[error("immediate {0} does not fit in 56 bits")]
    ImmediateOutOfRange(i64),
    #[error("type handle {0} does not fit in 56 bits")]
    TypeRefOutOfRange(TypeId),
    #[error("program is longer than {limit} instructions")]
    ProgramTooLong { limit: u64 },
    #[error("nesting depth {depth} reaches the limit of {limit}")]
    NestingTooDeep { depth: usize, limit: usize },
    #[error(transparent)]
    Resolve(#[from] ResolveError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Options {
    /// Structural nesting budget of the execution engine.
    pub max_depth: usize,
    /// Largest program, in instructions.
    pub max_program_len: u64,
    /// Run the peephole pass on the finished program.
    pub optimize: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            max_depth: MAX_DEPTH,
            max_program_len: MAX_UINT56,
            optimize: true,
        }
    }
}

impl Options {
    pub fn with_max_depth(self, max_depth: usize) -> Self {
        Self { max_depth, ..self }
    }

    pub fn with_max_program_len(self, max_program_len: u64) -> Self {
        Self {
            max_program_len,
            ..self
        }
    }

    pub fn with_optimize(self, optimize: bool) -> Self {
        Self { optimize, ..self }
    }
}

/// Compiler state. One instance serves one compilation at a time; reuse it (or pool it)
/// for the next.
#[derive(Debug, Default)]
pub struct Compiler {
    /// types whose code is currently being emitted
    expanding: HashSet<TypeId>,
    options: Options,
}

impl Compiler {
    pub fn new(options: Options) -> Self {
        Self {
            expanding: HashSet::new(),
            options,
        }
    }

    pub fn options(&self) -> Options {
        self.options
    }

    pub(crate) fn reset(&mut self, options: Options) {
        self.expanding.clear();
        self.options = options;
    }

    pub fn release(self, pool: &mut Pool) {
        pool.put_compiler(self);
    }

    pub fn compile(&mut self, types: &TypeArena, root: TypeId) -> Result<Program, CompileError> {
        let mut program = Program::with_limit(self.options.max_program_len);
        self.compile_into(types, root, &mut program)?;
        Ok(program)
    }

    /// Like [`Compiler::compile`], but the program storage comes from `pool`. On failure
    /// the storage goes straight back.
    pub fn compile_pooled(
        &mut self,
        types: &TypeArena,
        root: TypeId,
        pool: &mut Pool,
    ) -> Result<Program, CompileError> {
        let mut program = pool.acquire_program(self.options.max_program_len);
        match self.compile_into(types, root, &mut program) {
            Ok(()) => Ok(program),
            Err(err) => {
                program.release(pool);
                Err(err)
            }
        }
    }

    #[instrument(level = "debug", skip_all, fields(root = %types.display(root)))]
    fn compile_into(
        &mut self,
        types: &TypeArena,
        root: TypeId,
        program: &mut Program,
    ) -> Result<(), CompileError> {
        self.expanding.clear();
        let result = self.compile_one(types, program, 0, root);
        self.expanding.clear();

        if let Err(err) = result {
            debug!(%err, "compilation failed");
            return Err(err);
        }
        if self.options.optimize {
            optimize::optimize(program);
        }
        debug!(len = program.len(), "compiled");
        Ok(())
    }

    fn compile_one(
        &mut self,
        types: &TypeArena,
        p: &mut Program,
        sp: usize,
        vt: TypeId,
    ) -> Result<(), CompileError> {
        match types.desc(vt)? {
            TypeDesc::Pointer(elem) => self.compile_ptr(types, p, sp, elem),
            _ if self.expanding.contains(&vt) => {
                trace!(ty = %types.display(vt), "deferred");
                p.rtt(OpCode::Defer, vt)
            }
            desc => {
                self.expanding.insert(vt);
                let result = self.compile_rec(types, p, sp, vt, desc);
                self.expanding.remove(&vt);
                result
            }
        }
    }

    fn compile_rec(
        &mut self,
        types: &TypeArena,
        p: &mut Program,
        sp: usize,
        vt: TypeId,
        desc: TypeDesc,
    ) -> Result<(), CompileError> {
        match desc {
            TypeDesc::Bool | TypeDesc::I8 => compile_scalar(p, 1),
            TypeDesc::I16 => compile_scalar(p, 2),
            TypeDesc::I32 => compile_scalar(p, 4),
            TypeDesc::I64 | TypeDesc::Double => compile_scalar(p, 8),
            TypeDesc::String | TypeDesc::Binary => p.add(OpCode::Vstr),
            TypeDesc::Struct(_) => self.compile_struct(types, p, sp, vt),
            TypeDesc::Map(key, value) => self.compile_map(types, p, sp, vt, key, value),
            TypeDesc::List(elem) | TypeDesc::Set(elem) => {
                self.compile_set_list(types, p, sp, elem)
            }
            TypeDesc::Void | TypeDesc::Pointer(_) => {
                unreachable!("{} has no encoding", types.display(vt))
            }
        }
    }

    /// `deref` skips the referent when the pointer is null.
    fn compile_ptr(
        &mut self,
        types: &TypeArena,
        p: &mut Program,
        sp: usize,
        elem: TypeId,
    ) -> Result<(), CompileError> {
        p.guard_depth(sp, self.options.max_depth)?;
        let j = p.pc();
        p.add(OpCode::Deref)?;
        self.compile_one(types, p, sp + 1, elem)?;
        p.patch(j);
        Ok(())
    }

    fn compile_struct(
        &mut self,
        types: &TypeArena,
        p: &mut Program,
        sp: usize,
        vt: TypeId,
    ) -> Result<(), CompileError> {
        let fields = types.resolve_fields(vt)?;
        let Some((first, rest)) = fields.split_first() else {
            return p.i64(OpCode::Byte, 0);
        };

        p.guard_depth(sp, self.options.max_depth)?;
        self.compile_field(types, p, sp, first, None)?;
        let mut prev = first;
        for field in rest {
            self.compile_field(types, p, sp, field, Some(prev))?;
            prev = field;
        }

        // STOP
        p.i64(OpCode::Byte, 0)
    }

    fn compile_field(
        &mut self,
        types: &TypeArena,
        p: &mut Program,
        sp: usize,
        field: &Field,
        prev: Option<&Field>,
    ) -> Result<(), CompileError> {
        p.i64(OpCode::Size, 3)?;
        if let Some(prev) = prev {
            p.i64(OpCode::Seek, field.offset as i64 - prev.offset as i64)?;
        }
        p.i64(OpCode::Byte, i64::from(types.wire_kind(field.ty)?.tag()))?;
        p.i64(OpCode::Word, i64::from(field.id))?;
        self.compile_one(types, p, sp + 1, field.ty)
    }

    fn compile_map(
        &mut self,
        types: &TypeArena,
        p: &mut Program,
        sp: usize,
        vt: TypeId,
        key: TypeId,
        value: TypeId,
    ) -> Result<(), CompileError> {
        p.guard_depth(sp, self.options.max_depth)?;
        p.i64(OpCode::Size, 6)?;
        p.i64(OpCode::Byte, i64::from(types.wire_kind(key)?.tag()))?;
        p.i64(OpCode::Byte, i64::from(types.wire_kind(value)?.tag()))?;
        p.rtt(OpCode::MapBegin, vt)?;

        let i = p.pc();
        p.add(OpCode::MapIsEnd)?;
        let j = p.pc();
        p.add(OpCode::IfTrue)?;
        p.add(OpCode::MapKey)?;
        self.compile_one(types, p, sp + 1, key)?;
        p.add(OpCode::MapValue)?;
        self.compile_one(types, p, sp + 1, value)?;
        p.jmp(OpCode::Goto, i)?;
        p.patch(j);
        p.add(OpCode::MapEnd)
    }

    fn compile_set_list(
        &mut self,
        types: &TypeArena,
        p: &mut Program,
        sp: usize,
        elem: TypeId,
    ) -> Result<(), CompileError> {
        p.guard_depth(sp, self.options.max_depth)?;
        p.i64(OpCode::Size, 5)?;
        p.i64(OpCode::Byte, i64::from(types.wire_kind(elem)?.tag()))?;
        p.add(OpCode::ListBegin)?;

        let i = p.pc();
        p.add(OpCode::ListIsEnd)?;
        let j = p.pc();
        p.add(OpCode::IfTrue)?;
        self.compile_one(types, p, sp + 1, elem)?;
        p.add(OpCode::ListNext)?;
        p.jmp(OpCode::Goto, i)?;
        p.patch(j);
        p.add(OpCode::ListEnd)
    }
}

fn compile_scalar(p: &mut Program, width: i64) -> Result<(), CompileError> {
    p.i64(OpCode::Size, width)?;
    p.i64(OpCode::Copy, width)
}
