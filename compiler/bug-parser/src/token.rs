//! Token definitions for the BUG lexer.

use std::fmt;

use alloy_primitives::U256;
use bug_source::Span;

/// A token paired with the [Span] of its source text.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, span: Span) -> Self {
        Self { kind, span }
    }
}

/// Keywords of the language. Identifiers are checked against this set
/// during lexing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    Name,
    Struct,
    Define,
    Function,
    Returns,
    Storage,
    Create,
    Code,
    Let,
    If,
    Else,
    While,
    For,
    Return,
    Break,
    Continue,
    Mapping,
    Array,
    True,
    False,
}

impl Keyword {
    pub fn from_ident(ident: &str) -> Option<Self> {
        Some(match ident {
            "name" => Keyword::Name,
            "struct" => Keyword::Struct,
            "define" => Keyword::Define,
            "function" => Keyword::Function,
            "returns" => Keyword::Returns,
            "storage" => Keyword::Storage,
            "create" => Keyword::Create,
            "code" => Keyword::Code,
            "let" => Keyword::Let,
            "if" => Keyword::If,
            "else" => Keyword::Else,
            "while" => Keyword::While,
            "for" => Keyword::For,
            "return" => Keyword::Return,
            "break" => Keyword::Break,
            "continue" => Keyword::Continue,
            "mapping" => Keyword::Mapping,
            "array" => Keyword::Array,
            "true" => Keyword::True,
            "false" => Keyword::False,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Keyword::Name => "name",
            Keyword::Struct => "struct",
            Keyword::Define => "define",
            Keyword::Function => "function",
            Keyword::Returns => "returns",
            Keyword::Storage => "storage",
            Keyword::Create => "create",
            Keyword::Code => "code",
            Keyword::Let => "let",
            Keyword::If => "if",
            Keyword::Else => "else",
            Keyword::While => "while",
            Keyword::For => "for",
            Keyword::Return => "return",
            Keyword::Break => "break",
            Keyword::Continue => "continue",
            Keyword::Mapping => "mapping",
            Keyword::Array => "array",
            Keyword::True => "true",
            Keyword::False => "false",
        }
    }
}

/// The kind of a [Token].
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// A non-keyword identifier.
    Ident(String),
    /// A reserved word.
    Keyword(Keyword),
    /// A decimal or `0x`-prefixed number, reduced into the word domain.
    Number(U256),
    /// A double-quoted string literal, quotes stripped.
    String(String),

    /// '('
    OpenParen,
    /// ')'
    CloseParen,
    /// '{'
    OpenBrace,
    /// '}'
    CloseBrace,
    /// '['
    OpenBracket,
    /// ']'
    CloseBracket,

    /// ';'
    Semi,
    /// ':'
    Colon,
    /// ','
    Comma,
    /// '.'
    Dot,

    /// '='
    Assign,
    /// '=='
    EqEq,
    /// '!='
    NotEq,
    /// '<'
    Lt,
    /// '<='
    LtEq,
    /// '>'
    Gt,
    /// '>='
    GtEq,
    /// '<<'
    Shl,
    /// '>>'
    Shr,
    /// '&&'
    AndAnd,
    /// '||'
    OrOr,
    /// '+'
    Plus,
    /// '-'
    Minus,
    /// '*'
    Star,
    /// '/'
    Slash,
    /// '%'
    Percent,
    /// '!'
    Bang,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenKind::Ident(ident) => write!(f, "`{ident}`"),
            TokenKind::Keyword(keyword) => write!(f, "`{}`", keyword.as_str()),
            TokenKind::Number(value) => write!(f, "`{value}`"),
            TokenKind::String(value) => write!(f, "\"{value}\""),
            TokenKind::OpenParen => write!(f, "`(`"),
            TokenKind::CloseParen => write!(f, "`)`"),
            TokenKind::OpenBrace => write!(f, "`{{`"),
            TokenKind::CloseBrace => write!(f, "`}}`"),
            TokenKind::OpenBracket => write!(f, "`[`"),
            TokenKind::CloseBracket => write!(f, "`]`"),
            TokenKind::Semi => write!(f, "`;`"),
            TokenKind::Colon => write!(f, "`:`"),
            TokenKind::Comma => write!(f, "`,`"),
            TokenKind::Dot => write!(f, "`.`"),
            TokenKind::Assign => write!(f, "`=`"),
            TokenKind::EqEq => write!(f, "`==`"),
            TokenKind::NotEq => write!(f, "`!=`"),
            TokenKind::Lt => write!(f, "`<`"),
            TokenKind::LtEq => write!(f, "`<=`"),
            TokenKind::Gt => write!(f, "`>`"),
            TokenKind::GtEq => write!(f, "`>=`"),
            TokenKind::Shl => write!(f, "`<<`"),
            TokenKind::Shr => write!(f, "`>>`"),
            TokenKind::AndAnd => write!(f, "`&&`"),
            TokenKind::OrOr => write!(f, "`||`"),
            TokenKind::Plus => write!(f, "`+`"),
            TokenKind::Minus => write!(f, "`-`"),
            TokenKind::Star => write!(f, "`*`"),
            TokenKind::Slash => write!(f, "`/`"),
            TokenKind::Percent => write!(f, "`%`"),
            TokenKind::Bang => write!(f, "`!`"),
        }
    }
}
