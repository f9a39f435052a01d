//! Abstract syntax tree.
//!
//! Function bodies record their hoisted `var` names and function
//! declarations at parse time so activation can bind them up front.

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec::Vec;

use crate::string::JsString;

/// A function body, or a whole program.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionNode {
    pub name: Option<JsString>,
    pub params: Vec<JsString>,
    pub body: Vec<Stmt>,
    /// Hoisted `var`/`let`/`const` names, deduplicated.
    pub vars: Vec<JsString>,
    /// Hoisted function declarations, in source order.
    pub functions: Vec<Rc<FunctionNode>>,
    /// Whether the body mentions `arguments`.
    pub uses_arguments: bool,
    pub line: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Stmt {
    pub kind: StmtKind,
    pub line: usize,
}

pub type Declarations = Vec<(JsString, Option<Expr>)>;

#[derive(Debug, Clone, PartialEq)]
pub enum StmtKind {
    Empty,
    Expr(Expr),
    Var(Declarations),
    /// Declaration already hoisted; evaluates to nothing.
    FunctionDecl,
    Block(Vec<Stmt>),
    If(Expr, Box<Stmt>, Option<Box<Stmt>>),
    For {
        init: Option<ForInit>,
        test: Option<Expr>,
        update: Option<Expr>,
        body: Box<Stmt>,
    },
    ForIn {
        target: ForInTarget,
        object: Expr,
        body: Box<Stmt>,
    },
    While(Expr, Box<Stmt>),
    DoWhile(Box<Stmt>, Expr),
    Break,
    Continue,
    Return(Option<Expr>),
    Throw(Expr),
    Try {
        block: Vec<Stmt>,
        catch: Option<(JsString, Vec<Stmt>)>,
        finally: Option<Vec<Stmt>>,
    },
    Switch(Expr, Vec<Case>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ForInit {
    Var(Declarations),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ForInTarget {
    Var(JsString),
    Expr(Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Case {
    /// `None` for `default:`.
    pub test: Option<Expr>,
    pub body: Vec<Stmt>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Minus,
    Plus,
    Not,
    BitNot,
    TypeOf,
    Void,
    Delete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Less,
    Greater,
    LessEqual,
    GreaterEqual,
    Equal,
    NotEqual,
    StrictEqual,
    StrictNotEqual,
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
pub enum LogicalOp {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    String(JsString),
    Boolean(bool),
    Null,
    This,
    Ident(JsString),
    /// `None` entries are holes.
    Array(Vec<Option<Expr>>),
    Object(Vec<(JsString, Expr)>),
    Function(Rc<FunctionNode>),
    Unary(UnaryOp, Box<Expr>),
    Update {
        increment: bool,
        prefix: bool,
        target: Box<Expr>,
    },
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Logical(LogicalOp, Box<Expr>, Box<Expr>),
    /// Plain (`None`) or compound assignment.
    Assign(Option<BinaryOp>, Box<Expr>, Box<Expr>),
    Conditional(Box<Expr>, Box<Expr>, Box<Expr>),
    Member(Box<Expr>, JsString),
    Index(Box<Expr>, Box<Expr>),
    Call(Box<Expr>, Vec<Expr>),
    New(Box<Expr>, Vec<Expr>),
    Sequence(Vec<Expr>),
}

impl Expr {
    /// Whether this expression may appear on the left of an assignment.
    pub fn is_reference(&self) -> bool {
        matches!(self, Expr::Ident(_) | Expr::Member(..) | Expr::Index(..))
    }
}
