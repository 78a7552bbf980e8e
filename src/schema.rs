//! Schema front end: turns a Thrift-flavoured IDL into resolved types in a [`TypeArena`].
//!
//! ```text
//! typedef i64 Timestamp
//! enum Color { RED = 1, GREEN, BLUE }
//! struct Node {
//!     1: i64 value,
//!     2: optional Node next      // optional fields become pointers
//!     3: list<Node> children;
//!     4: map<string, *Node> index
//! }
//! ```
//!
//! Structs may be referenced before they are defined. Typedefs and enums may not.
use std::collections::{BTreeMap, HashMap};

use crate::{
    lexer::{LexerError, Span, Token},
    limits::MAX_DEPTH,
    types::{TypeArena, TypeId},
};

#[derive(thiserror::Error, Debug, PartialEq, Clone)]
pub enum SchemaError {
    #[error("{error}")]
    Lexer { error: LexerError, span: Span },
    #[error("expected {expected}, found {found}")]
    UnexpectedToken {
        expected: &'static str,
        found: Box<str>,
        span: Span,
    },
    #[error("unexpected end of input, expected {expected}")]
    UnexpectedEof { expected: &'static str, span: Span },
    #[error("unknown type `{name}`")]
    UnknownType { name: Box<str>, span: Span },
    #[error("`{name}` is already defined")]
    Duplicate { name: Box<str>, span: Span },
    #[error("`{name}` is used before its definition, only structs may be referenced ahead")]
    ForwardAlias { name: Box<str>, span: Span },
    #[error("field id {id} does not fit in 16 bits")]
    FieldIdRange { id: i64, span: Span },
    #[error("enum value {value} does not fit in 32 bits")]
    EnumValueRange { value: i64, span: Span },
    #[error("type expression nests deeper than {limit} levels")]
    TypeTooDeep { limit: usize, span: Span },
}

impl SchemaError {
    pub fn span(&self) -> Span {
        match self {
            Self::Lexer { span, .. }
            | Self::UnexpectedToken { span, .. }
            | Self::UnexpectedEof { span, .. }
            | Self::UnknownType { span, .. }
            | Self::Duplicate { span, .. }
            | Self::ForwardAlias { span, .. }
            | Self::FieldIdRange { span, .. }
            | Self::EnumValueRange { span, .. }
            | Self::TypeTooDeep { span, .. } => span.clone(),
        }
    }
}

/// What a top-level name refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Named {
    Struct(TypeId),
    Alias(TypeId),
}

impl Named {
    fn id(self) -> TypeId {
        match self {
            Named::Struct(id) | Named::Alias(id) => id,
        }
    }
}

/// A parsed schema: the type arena plus the names declared in the source.
#[derive(Debug, Default)]
pub struct Schema {
    arena: TypeArena,
    names: HashMap<Box<str>, Named>,
    /// enum constants, kept for listing purposes
    enums: BTreeMap<Box<str>, Vec<(Box<str>, i32)>>,
}

impl Schema {
    pub fn parse(source: &str) -> Result<Self, SchemaError> {
        let mut schema = Schema::default();
        let mut parser = Parser::new(source, &mut schema, true)?;
        parser.document()?;
        Ok(schema)
    }

    /// Parses a standalone type expression, such as `map<i32, list<Node>>`, against the
    /// names of this schema. Unknown names are errors here.
    pub fn parse_type(&mut self, source: &str) -> Result<TypeId, SchemaError> {
        let mut parser = Parser::new(source, self, false)?;
        let ty = parser.ty()?;
        parser.finish()?;
        Ok(ty)
    }

    pub fn lookup(&self, name: impl AsRef<str>) -> Option<TypeId> {
        self.names.get(name.as_ref()).map(|named| named.id())
    }

    pub fn types(&self) -> &TypeArena {
        &self.arena
    }

    pub fn into_types(self) -> TypeArena {
        self.arena
    }

    /// Declared names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.names.keys().map(|n| n.as_ref()).collect();
        names.sort_unstable();
        names
    }

    pub fn enum_values(&self, name: impl AsRef<str>) -> Option<&[(Box<str>, i32)]> {
        self.enums.get(name.as_ref()).map(|v| &v[..])
    }
}

struct Parser<'a> {
    tokens: Vec<(Token, Span)>,
    pos: usize,
    eof: Span,
    schema: &'a mut Schema,
    /// allow names to be declared on first use (forward struct references)
    forward: bool,
    /// structs referenced but not yet defined, with their first use
    pending: HashMap<Box<str>, Span>,
    /// type expressions currently open
    depth: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &str, schema: &'a mut Schema, forward: bool) -> Result<Self, SchemaError> {
        let mut tokens = vec![];
        for (token, span) in Token::lexer(source).spanned() {
            match token {
                Ok(token) => tokens.push((token, span)),
                Err(error) => return Err(SchemaError::Lexer { error, span }),
            }
        }
        Ok(Self {
            tokens,
            pos: 0,
            eof: source.len()..source.len(),
            schema,
            forward,
            pending: HashMap::new(),
            depth: 0,
        })
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn next(&mut self, expected: &'static str) -> Result<(Token, Span), SchemaError> {
        let Some(item) = self.tokens.get(self.pos).cloned() else {
            return Err(SchemaError::UnexpectedEof {
                expected,
                span: self.eof.clone(),
            });
        };
        self.pos += 1;
        Ok(item)
    }

    fn unexpected(expected: &'static str, (token, span): (Token, Span)) -> SchemaError {
        SchemaError::UnexpectedToken {
            expected,
            found: token.describe(),
            span,
        }
    }

    fn expect(&mut self, want: Token, expected: &'static str) -> Result<Span, SchemaError> {
        let item = self.next(expected)?;
        if item.0 == want {
            Ok(item.1)
        } else {
            Err(Self::unexpected(expected, item))
        }
    }

    fn ident(&mut self, expected: &'static str) -> Result<(Box<str>, Span), SchemaError> {
        match self.next(expected)? {
            (Token::Identifier(name), span) => Ok((name, span)),
            item => Err(Self::unexpected(expected, item)),
        }
    }

    fn integer(&mut self, expected: &'static str) -> Result<(i64, Span), SchemaError> {
        match self.next(expected)? {
            (Token::Integer(value), span) => Ok((value, span)),
            item => Err(Self::unexpected(expected, item)),
        }
    }

    /// Eats an optional `,` or `;`.
    fn separator(&mut self) {
        if matches!(self.peek(), Some(Token::Comma | Token::Semicolon)) {
            self.pos += 1;
        }
    }

    fn finish(&mut self) -> Result<(), SchemaError> {
        match self.tokens.get(self.pos).cloned() {
            None => Ok(()),
            Some(item) => Err(Self::unexpected("end of input", item)),
        }
    }

    fn document(&mut self) -> Result<(), SchemaError> {
        while let Some(token) = self.peek() {
            match token {
                Token::Struct => self.struct_def()?,
                Token::Enum => self.enum_def()?,
                Token::Typedef => self.typedef()?,
                _ => {
                    let item = self.next("a definition")?;
                    return Err(Self::unexpected("`struct`, `enum` or `typedef`", item));
                }
            }
        }

        // every forward reference must have been satisfied
        let first_missing = self
            .pending
            .drain()
            .min_by_key(|(_, span)| span.start);
        match first_missing {
            Some((name, span)) => Err(SchemaError::UnknownType { name, span }),
            None => Ok(()),
        }
    }

    fn define_name(&mut self, name: Box<str>, span: Span, named: Named) -> Result<(), SchemaError> {
        if self.schema.names.contains_key(&name) {
            return Err(SchemaError::Duplicate { name, span });
        }
        self.schema.names.insert(name, named);
        Ok(())
    }

    fn struct_def(&mut self) -> Result<(), SchemaError> {
        self.expect(Token::Struct, "`struct`")?;
        let (name, span) = self.ident("a struct name")?;

        let id = match self.schema.names.get(&name) {
            // declared by a forward reference
            Some(Named::Struct(id)) if self.pending.remove(&name).is_some() => *id,
            Some(_) => return Err(SchemaError::Duplicate { name, span }),
            None => {
                let id = self.schema.arena.declare_struct(&name);
                self.schema.names.insert(name.clone(), Named::Struct(id));
                id
            }
        };

        self.expect(Token::LBrace, "`{`")?;
        let mut fields = vec![];
        while self.peek() != Some(&Token::RBrace) {
            fields.push(self.field()?);
        }
        self.expect(Token::RBrace, "`}`")?;

        if self.schema.arena.is_defined(id) {
            return Err(SchemaError::Duplicate { name, span });
        }
        self.schema
            .arena
            .define_struct(id, fields)
            .map_err(|_| SchemaError::Duplicate { name, span })
    }

    fn field(&mut self) -> Result<(i16, Box<str>, TypeId), SchemaError> {
        let (raw_id, id_span) = self.integer("a field id")?;
        let id = i16::try_from(raw_id).map_err(|_| SchemaError::FieldIdRange {
            id: raw_id,
            span: id_span,
        })?;
        self.expect(Token::Colon, "`:`")?;

        let optional = match self.peek() {
            Some(Token::Optional) => {
                self.pos += 1;
                true
            }
            Some(Token::Required) => {
                self.pos += 1;
                false
            }
            _ => false,
        };
        let mut ty = self.ty()?;
        if optional {
            ty = self.schema.arena.pointer(ty);
        }
        let (name, _) = self.ident("a field name")?;
        self.separator();
        Ok((id, name, ty))
    }

    fn enum_def(&mut self) -> Result<(), SchemaError> {
        self.expect(Token::Enum, "`enum`")?;
        let (name, span) = self.ident("an enum name")?;
        if self.pending.contains_key(&name) {
            return Err(SchemaError::ForwardAlias { name, span });
        }

        self.expect(Token::LBrace, "`{`")?;
        let mut values = vec![];
        let mut next = 0i64;
        while self.peek() != Some(&Token::RBrace) {
            let (constant, _) = self.ident("an enum constant")?;
            if self.peek() == Some(&Token::Equals) {
                self.pos += 1;
                next = self.integer("an enum value")?.0;
            }
            let span = self.tokens[self.pos - 1].1.clone();
            let value = i32::try_from(next)
                .map_err(|_| SchemaError::EnumValueRange { value: next, span })?;
            values.push((constant, value));
            next += 1;
            self.separator();
        }
        self.expect(Token::RBrace, "`}`")?;

        let i32_ = self.schema.arena.i32();
        self.define_name(name.clone(), span, Named::Alias(i32_))?;
        self.schema.enums.insert(name, values);
        Ok(())
    }

    fn typedef(&mut self) -> Result<(), SchemaError> {
        self.expect(Token::Typedef, "`typedef`")?;
        let ty = self.ty()?;
        let (name, span) = self.ident("a typedef name")?;
        if self.pending.contains_key(&name) {
            return Err(SchemaError::ForwardAlias { name, span });
        }
        self.define_name(name, span, Named::Alias(ty))?;
        self.separator();
        Ok(())
    }

    fn ty(&mut self) -> Result<TypeId, SchemaError> {
        if self.depth >= MAX_DEPTH {
            let span = self.tokens.get(self.pos).map_or_else(|| self.eof.clone(), |(_, span)| span.clone());
            return Err(SchemaError::TypeTooDeep { limit: MAX_DEPTH, span });
        }
        self.depth += 1;
        let ty = self.ty_inner();
        self.depth -= 1;
        ty
    }

    fn ty_inner(&mut self) -> Result<TypeId, SchemaError> {
        let (token, span) = self.next("a type")?;
        let name = match token {
            Token::Star => {
                let elem = self.ty()?;
                return Ok(self.schema.arena.pointer(elem));
            }
            Token::Identifier(name) => name,
            token => return Err(Self::unexpected("a type", (token, span))),
        };

        let arena = &mut self.schema.arena;
        Ok(match &*name {
            "bool" => arena.bool(),
            "byte" | "i8" => arena.i8(),
            "i16" => arena.i16(),
            "i32" => arena.i32(),
            "i64" => arena.i64(),
            "double" => arena.double(),
            "string" => arena.string(),
            "binary" => arena.binary(),
            "list" | "set" => {
                self.expect(Token::LAngle, "`<`")?;
                let elem = self.ty()?;
                self.expect(Token::RAngle, "`>`")?;
                if &*name == "list" {
                    self.schema.arena.list(elem)
                } else {
                    self.schema.arena.set(elem)
                }
            }
            "map" => {
                self.expect(Token::LAngle, "`<`")?;
                let key = self.ty()?;
                self.expect(Token::Comma, "`,`")?;
                let value = self.ty()?;
                self.expect(Token::RAngle, "`>`")?;
                self.schema.arena.map(key, value)
            }
            _ => self.named(name, span)?,
        })
    }

    fn named(&mut self, name: Box<str>, span: Span) -> Result<TypeId, SchemaError> {
        if let Some(named) = self.schema.names.get(&name) {
            return Ok(named.id());
        }
        if !self.forward {
            return Err(SchemaError::UnknownType { name, span });
        }

        // only structs can be referenced ahead of their definition
        let id = self.schema.arena.declare_struct(&name);
        self.schema.names.insert(name.clone(), Named::Struct(id));
        self.pending.entry(name).or_insert(span);
        Ok(id)
    }
}
