//! Caller-owned free lists for programs and compiler state.
//!
//! Nothing here is global: whoever compiles many types in a row keeps a [`Pool`] around
//! and threads it through. Anything taken out of the pool is reset first, so a released
//! object never leaks state into the next compilation.
use super::{program::Program, Compiler, Options};

#[derive(Debug, Default)]
pub struct Pool {
    programs: Vec<Program>,
    compilers: Vec<Compiler>,
}

impl Pool {
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty program limited to `limit` instructions, reusing released storage
    /// when there is some.
    pub fn acquire_program(&mut self, limit: u64) -> Program {
        match self.programs.pop() {
            Some(mut program) => {
                program.reset(limit);
                program
            }
            None => Program::with_limit(limit),
        }
    }

    pub fn acquire_compiler(&mut self, options: Options) -> Compiler {
        match self.compilers.pop() {
            Some(mut compiler) => {
                compiler.reset(options);
                compiler
            }
            None => Compiler::new(options),
        }
    }

    pub(crate) fn put_program(&mut self, program: Program) {
        self.programs.push(program);
    }

    pub(crate) fn put_compiler(&mut self, compiler: Compiler) {
        self.compilers.push(compiler);
    }

    pub fn idle_programs(&self) -> usize {
        self.programs.len()
    }

    pub fn idle_compilers(&self) -> usize {
        self.compilers.len()
    }
}
