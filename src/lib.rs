pub mod compiler;
pub mod lexer;
pub mod limits;
pub mod schema;
pub mod types;

pub use compiler::{CompileError, Compiler, Instr, OpCode, Options, Pool, Program};
pub use schema::{Schema, SchemaError};
pub use types::{ResolveError, TypeArena, TypeDesc, TypeId, TypeKind};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error("no type named `{0}` in the schema")]
    UnknownRoot(Box<str>),
}

/// Parses `source` and compiles the type named `root` with default options.
pub fn compile(source: &str, root: &str) -> Result<(Schema, Program), Error> {
    let schema = Schema::parse(source)?;
    let ty = schema
        .lookup(root)
        .ok_or_else(|| Error::UnknownRoot(root.into()))?;
    let program = Compiler::default().compile(schema.types(), ty)?;
    Ok((schema, program))
}
