pub use logos::Span;
use logos::{Lexer, Logos};

fn read_integer(lexer: &mut Lexer<Token>) -> Result<i64, LexerError> {
    lexer
        .slice()
        .parse::<i64>()
        .map_err(|_| LexerError::NumberTooBig)
}

#[derive(thiserror::Error, Debug, PartialEq, Clone, Default)]
pub enum LexerError {
    #[default]
    #[error("invalid token encountered")]
    Invalid,
    #[error("integer literal too big")]
    NumberTooBig,
}

/// Tokens of the schema language. Whitespace and comments never reach the parser.
#[derive(Debug, Clone, PartialEq, Logos)]
#[logos(error = LexerError)]
#[logos(skip r"[ \t\r\n]+")]
#[logos(skip r"//[^\n]*")]
#[logos(skip r"#[^\n]*")]
pub enum Token {
    #[token("struct")]
    Struct,
    #[token("enum")]
    Enum,
    #[token("typedef")]
    Typedef,
    #[token("optional")]
    Optional,
    #[token("required")]
    Required,

    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("<")]
    LAngle,
    #[token(">")]
    RAngle,
    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,
    #[token(":")]
    Colon,
    #[token("=")]
    Equals,
    #[token("*")]
    Star,

    #[regex(r"[a-zA-Z_][a-zA-Z0-9_.]*", |l| Box::from(l.slice()))]
    Identifier(Box<str>),
    #[regex(r"-?[0-9]+", read_integer)]
    Integer(i64),
}

impl Token {
    pub fn lexer(source: &str) -> Lexer<Self> {
        <Self as Logos>::lexer(source)
    }

    /// Short human description, used in parse errors.
    pub fn describe(&self) -> Box<str> {
        match self {
            Token::Struct => "`struct`".into(),
            Token::Enum => "`enum`".into(),
            Token::Typedef => "`typedef`".into(),
            Token::Optional => "`optional`".into(),
            Token::Required => "`required`".into(),
            Token::LBrace => "`{`".into(),
            Token::RBrace => "`}`".into(),
            Token::LAngle => "`<`".into(),
            Token::RAngle => "`>`".into(),
            Token::Comma => "`,`".into(),
            Token::Semicolon => "`;`".into(),
            Token::Colon => "`:`".into(),
            Token::Equals => "`=`".into(),
            Token::Star => "`*`".into(),
            Token::Identifier(name) => format!("identifier `{name}`").into(),
            Token::Integer(value) => format!("integer {value}").into(),
        }
    }
}
