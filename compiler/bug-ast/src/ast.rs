//! AST node definitions.

use std::{fmt, ops::Deref};

use alloy_primitives::U256;
use bug_source::Span;
use bug_utils::counter;

counter! {
    name: NodeId,
    counter_name: NODE_ID_COUNTER,
    visibility: pub,
    method_visibility: pub,
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// A node in the tree: the node body together with its stable id and the
/// span it originated from.
#[derive(Debug, Clone)]
pub struct AstNode<T> {
    id: NodeId,
    span: Span,
    body: Box<T>,
}

impl<T> AstNode<T> {
    /// Create a new node over `body`, assigning it a fresh [NodeId].
    pub fn new(body: T, span: Span) -> Self {
        Self { id: NodeId::new(), span, body: Box::new(body) }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn span(&self) -> Span {
        self.span
    }

    pub fn body(&self) -> &T {
        &self.body
    }
}

impl<T> Deref for AstNode<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.body
    }
}

/// The root of the tree: module name, ordered declarations, the optional
/// constructor block and the required main code block.
#[derive(Debug, Clone)]
pub struct Program {
    pub name: AstNode<Name>,
    pub declarations: Vec<AstNode<Declaration>>,
    pub create: Option<AstNode<Block>>,
    pub main: AstNode<Block>,
}

/// An identifier occurrence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Name {
    pub ident: String,
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.ident)
    }
}

/// A module-level declaration.
#[derive(Debug, Clone)]
pub enum Declaration {
    Struct(StructDecl),
    Function(FunctionDecl),
    Storage(StorageDecl),
}

/// `struct Name { field: ty; … }`
#[derive(Debug, Clone)]
pub struct StructDecl {
    pub name: AstNode<Name>,
    pub fields: Vec<AstNode<FieldDecl>>,
}

/// A single field within a [StructDecl].
#[derive(Debug, Clone)]
pub struct FieldDecl {
    pub name: AstNode<Name>,
    pub ty: AstNode<TyExpr>,
}

/// `define function name(params) returns ty { … }`
#[derive(Debug, Clone)]
pub struct FunctionDecl {
    pub name: AstNode<Name>,
    pub params: Vec<AstNode<ParamDecl>>,
    pub returns: Option<AstNode<TyExpr>>,
    pub body: AstNode<Block>,
}

/// A single function parameter.
#[derive(Debug, Clone)]
pub struct ParamDecl {
    pub name: AstNode<Name>,
    pub ty: AstNode<TyExpr>,
}

/// `storage { [slot] name: ty; … }`
#[derive(Debug, Clone)]
pub struct StorageDecl {
    pub entries: Vec<AstNode<StorageEntry>>,
}

/// One persistent storage slot declaration.
#[derive(Debug, Clone)]
pub struct StorageEntry {
    pub slot: u64,
    pub name: AstNode<Name>,
    pub ty: AstNode<TyExpr>,
}

/// A `{ … }` statement sequence.
#[derive(Debug, Clone)]
pub struct Block {
    pub statements: Vec<AstNode<Statement>>,
}

/// A single statement.
#[derive(Debug, Clone)]
pub enum Statement {
    /// `let name: ty = value;`
    Let {
        name: AstNode<Name>,
        ty: Option<AstNode<TyExpr>>,
        value: Option<AstNode<Expr>>,
    },
    /// `target = value;`
    Assign { target: AstNode<Expr>, value: AstNode<Expr> },
    /// `if (condition) { … } else { … }`
    If {
        condition: AstNode<Expr>,
        then_block: AstNode<Block>,
        else_block: Option<AstNode<Block>>,
    },
    /// `while (condition) { … }`
    While { condition: AstNode<Expr>, body: AstNode<Block> },
    /// `for (init; condition; update) { … }`
    For {
        init: Option<AstNode<Statement>>,
        condition: Option<AstNode<Expr>>,
        update: Option<AstNode<Statement>>,
        body: AstNode<Block>,
    },
    /// `return value?;`
    Return { value: Option<AstNode<Expr>> },
    /// `break;`
    Break,
    /// `continue;`
    Continue,
    /// A bare expression statement, `f(x);`.
    Expr(AstNode<Expr>),
}

/// Binary operators, in source notation order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinOp {
    /// '+'
    Add,
    /// '-'
    Sub,
    /// '*'
    Mul,
    /// '/'
    Div,
    /// '%'
    Mod,
    /// '<<'
    Shl,
    /// '>>'
    Shr,
    /// '=='
    Eq,
    /// '!='
    Neq,
    /// '<'
    Lt,
    /// '<='
    LtEq,
    /// '>'
    Gt,
    /// '>='
    GtEq,
    /// '&&'
    And,
    /// '||'
    Or,
}

impl BinOp {
    /// Whether the operator produces a `bool` regardless of operand type.
    pub fn is_comparison(&self) -> bool {
        matches!(self, BinOp::Eq | BinOp::Neq | BinOp::Lt | BinOp::LtEq | BinOp::Gt | BinOp::GtEq)
    }

    /// Whether the operator is a logical connective over booleans.
    pub fn is_logical(&self) -> bool {
        matches!(self, BinOp::And | BinOp::Or)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Shl => "<<",
            BinOp::Shr => ">>",
            BinOp::Eq => "==",
            BinOp::Neq => "!=",
            BinOp::Lt => "<",
            BinOp::LtEq => "<=",
            BinOp::Gt => ">",
            BinOp::GtEq => ">=",
            BinOp::And => "&&",
            BinOp::Or => "||",
        }
    }
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    /// Logical inversion, '!'.
    Not,
    /// Arithmetic negation, '-'.
    Neg,
}

impl fmt::Display for UnOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnOp::Not => write!(f, "!"),
            UnOp::Neg => write!(f, "-"),
        }
    }
}

/// Execution-environment accessors, `msg.*` and `block.*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvOp {
    MsgSender,
    MsgValue,
    MsgData,
    BlockNumber,
    BlockTimestamp,
}

impl EnvOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnvOp::MsgSender => "msg.sender",
            EnvOp::MsgValue => "msg.value",
            EnvOp::MsgData => "msg.data",
            EnvOp::BlockNumber => "block.number",
            EnvOp::BlockTimestamp => "block.timestamp",
        }
    }
}

impl fmt::Display for EnvOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A literal value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Literal {
    /// A decimal or hexadecimal number, already reduced into the 256-bit
    /// word domain by the parser.
    Number(U256),
    /// `true` or `false`.
    Bool(bool),
    /// A double-quoted string.
    String(String),
}

/// An expression.
#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Literal),
    /// A variable or storage identifier reference.
    Ident(Name),
    /// `lhs op rhs`
    Binary { op: BinOp, lhs: AstNode<Expr>, rhs: AstNode<Expr> },
    /// `op operand`
    Unary { op: UnOp, operand: AstNode<Expr> },
    /// `object[index]`
    Index { object: AstNode<Expr>, index: AstNode<Expr> },
    /// `object[start:end]`, permitted on `bytes` only.
    Slice {
        object: AstNode<Expr>,
        start: AstNode<Expr>,
        end: AstNode<Expr>,
    },
    /// `object.field`
    Field { object: AstNode<Expr>, name: AstNode<Name> },
    /// A user-defined function call, `f(args)`.
    Call { callee: AstNode<Name>, args: Vec<AstNode<Expr>> },
    /// A cast written in call notation over a type name, `uint256(x)`.
    Cast { ty: AstNode<TyExpr>, value: AstNode<Expr> },
    /// `keccak256(value)`
    Keccak { value: AstNode<Expr> },
    /// `msg.*` / `block.*`
    Env(EnvOp),
}

/// Surface type syntax. Resolution into semantic types happens in the type
/// environment, so a [`TyExpr::Named`] may turn out to be elementary, a
/// struct reference, or unknown.
#[derive(Debug, Clone)]
pub enum TyExpr {
    /// `uint256`, `address`, `MyStruct`, …
    Named(Name),
    /// `array<element>` or `array<element, size>`.
    Array { element: AstNode<TyExpr>, size: Option<u64> },
    /// `mapping<key, value>`.
    Mapping { key: AstNode<TyExpr>, value: AstNode<TyExpr> },
}
