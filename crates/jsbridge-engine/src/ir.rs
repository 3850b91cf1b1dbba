//! Owned intermediate representation produced by the compiler
//!
//! The tree is `Send + Sync` and independent of the parser's source map, so
//! a compiled script can be shared and run any number of times.

use std::sync::Arc;

/// 1-based source position
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pos {
    pub line: u32,
    pub column: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Literal {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(Arc<str>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeclKind {
    Var,
    Let,
    Const,
}

#[derive(Debug, Clone)]
pub(crate) struct Stmt {
    pub pos: Pos,
    pub kind: StmtKind,
}

#[derive(Debug, Clone)]
pub(crate) enum StmtKind {
    Empty,
    Expr(Expr),
    Declare {
        kind: DeclKind,
        name: Arc<str>,
        init: Option<Expr>,
    },
    Block(Vec<Stmt>),
    If {
        test: Expr,
        cons: Box<Stmt>,
        alt: Option<Box<Stmt>>,
    },
    While {
        test: Expr,
        body: Box<Stmt>,
    },
    DoWhile {
        body: Box<Stmt>,
        test: Expr,
    },
    For {
        init: Vec<Stmt>,
        test: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
    },
    Throw(Expr),
    Break,
    Continue,
}

#[derive(Debug, Clone)]
pub(crate) enum MemberKey {
    Named(Arc<str>),
    Computed(Box<Expr>),
}

#[derive(Debug, Clone)]
pub(crate) enum Target {
    Ident(Arc<str>),
    Member { object: Box<Expr>, key: MemberKey },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UnaryOp {
    Minus,
    Plus,
    Not,
    BitNot,
    TypeOf,
    Void,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Exp,
    Eq,
    NotEq,
    StrictEq,
    StrictNotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
    UShr,
    In,
    InstanceOf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LogicalOp {
    And,
    Or,
    Nullish,
}

#[derive(Debug, Clone)]
pub(crate) enum Expr {
    Literal(Literal),
    Ident(Arc<str>),
    This,
    Array(Vec<Expr>),
    Object(Vec<(Arc<str>, Expr)>),
    RegExp {
        source: Arc<str>,
        flags: Arc<str>,
    },
    Template {
        quasis: Vec<Arc<str>>,
        exprs: Vec<Expr>,
    },
    Member {
        object: Box<Expr>,
        key: MemberKey,
    },
    Unary {
        op: UnaryOp,
        arg: Box<Expr>,
    },
    Delete(Target),
    Update {
        increment: bool,
        prefix: bool,
        target: Target,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Logical {
        op: LogicalOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Assign {
        op: Option<BinaryOp>,
        target: Target,
        value: Box<Expr>,
    },
    Cond {
        test: Box<Expr>,
        cons: Box<Expr>,
        alt: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    New {
        callee: Box<Expr>,
        args: Vec<Expr>,
    },
    Seq(Vec<Expr>),
}

/// A compiled script, ready to be run by [`crate::Isolate::run`]
#[derive(Debug)]
pub struct CompiledScript {
    pub(crate) source_name: Arc<str>,
    pub(crate) body: Vec<Stmt>,
}

impl CompiledScript {
    pub fn source_name(&self) -> &str {
        &self.source_name
    }

    /// Number of top-level statements
    pub fn len(&self) -> usize {
        self.body.len()
    }

    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}
