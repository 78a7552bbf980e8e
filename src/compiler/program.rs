use core::ops::Index;

use crate::{
    limits::MAX_UINT56,
    types::{TypeArena, TypeId},
};

use super::{
    instr::{Instr, OpCode},
    pool::Pool,
    CompileError,
};

/// An encoder program: a position-addressed sequence of [`Instr`] words.
///
/// Branch operands are positions in this sequence. A branch whose target is not known
/// yet is emitted with a placeholder operand and fixed up later with [`Program::patch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Program {
    code: Vec<Instr>,
    limit: u64,
}

impl Default for Program {
    fn default() -> Self {
        Self::new()
    }
}

impl Program {
    pub fn new() -> Self {
        Self::with_limit(MAX_UINT56)
    }

    /// A program that refuses to grow past `limit` instructions. The limit is clamped
    /// to the addressable range of a branch operand.
    pub fn with_limit(limit: u64) -> Self {
        Self {
            code: Vec::new(),
            limit: limit.min(MAX_UINT56),
        }
    }

    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Position of the next instruction to be appended.
    pub fn pc(&self) -> usize {
        self.code.len()
    }

    pub fn len(&self) -> usize {
        self.code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Instr> {
        self.code.iter()
    }

    pub fn as_slice(&self) -> &[Instr] {
        &self.code
    }

    pub fn append(&mut self, ins: Instr) -> Result<(), CompileError> {
        if self.code.len() as u64 >= self.limit {
            return Err(CompileError::ProgramTooLong { limit: self.limit });
        }
        self.code.push(ins);
        Ok(())
    }

    pub(crate) fn add(&mut self, op: OpCode) -> Result<(), CompileError> {
        self.append(Instr::new(op))
    }

    pub(crate) fn i64(&mut self, op: OpCode, iv: i64) -> Result<(), CompileError> {
        self.append(Instr::with_int(op, iv)?)
    }

    pub(crate) fn rtt(&mut self, op: OpCode, ty: TypeId) -> Result<(), CompileError> {
        self.append(Instr::with_type(op, ty)?)
    }

    /// Emits a branch to an already known position.
    pub(crate) fn jmp(&mut self, op: OpCode, to: usize) -> Result<(), CompileError> {
        self.append(Instr::new(op).retarget(to))
    }

    /// Points the branch at `at` to the current position.
    pub fn patch(&mut self, at: usize) {
        let pc = self.pc();
        self.code[at] = self.code[at].retarget(pc);
    }

    /// Fails once `depth` reaches `budget`.
    pub fn guard_depth(&self, depth: usize, budget: usize) -> Result<(), CompileError> {
        if depth >= budget {
            return Err(CompileError::NestingTooDeep {
                depth,
                limit: budget,
            });
        }
        Ok(())
    }

    /// Marks every position (end of program included) that some branch jumps to.
    pub fn branch_targets(&self) -> Vec<bool> {
        let mut targets = vec![false; self.code.len() + 1];
        for ins in &self.code {
            if ins.op().is_branch() {
                if let Some(slot) = targets.get_mut(ins.target()) {
                    *slot = true;
                }
            }
        }
        targets
    }

    pub(crate) fn code_mut(&mut self) -> &mut Vec<Instr> {
        &mut self.code
    }

    /// Renders the program one instruction per line, with an `L_n:` line before
    /// each branch target.
    pub fn disassemble(&self, types: &TypeArena) -> String {
        let targets = self.branch_targets();
        let mut lines = Vec::with_capacity(self.code.len() + 2);
        for (pc, ins) in self.code.iter().enumerate() {
            let text = ins.disassemble(types);
            if targets[pc] {
                lines.push(format!("L_{pc}:\n\t{text}"));
            } else {
                lines.push(format!("\t{text}"));
            }
        }
        if targets[self.code.len()] {
            lines.push(format!("L_{}:", self.code.len()));
        }
        lines.push("\tend".to_owned());
        lines.join("\n")
    }

    /// Hands the storage back to `pool` for the next compilation.
    pub fn release(self, pool: &mut Pool) {
        pool.put_program(self);
    }

    pub(crate) fn reset(&mut self, limit: u64) {
        self.code.clear();
        self.limit = limit.min(MAX_UINT56);
    }
}

impl Index<usize> for Program {
    type Output = Instr;

    fn index(&self, index: usize) -> &Self::Output {
        &self.code[index]
    }
}

impl<'a> IntoIterator for &'a Program {
    type Item = &'a Instr;
    type IntoIter = std::slice::Iter<'a, Instr>;

    fn into_iter(self) -> Self::IntoIter {
        self.code.iter()
    }
}
