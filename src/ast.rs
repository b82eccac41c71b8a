//! Structured statement tree, as produced by [`emit`](crate::emit).
//!
//! All identifiers are already resolved to their final (unique) names, and
//! types are kept as their textual spelling, so rendering (see [`print`](crate::print))
//! needs no access to the original module.

use crate::spv;

/// A structurized function, along with its (pass-through) signature.
#[derive(Clone, Debug, PartialEq)]
pub struct FunctionBody {
    pub func_id: spv::Id,
    pub name: String,
    pub params: Vec<Param>,

    /// `None` for `void` functions.
    pub ret_type: Option<String>,

    pub entry_point: Option<EntryPointInfo>,

    pub body: Block,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Param {
    pub name: String,
    pub ty: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct EntryPointInfo {
    /// `vertex`, `fragment` or `compute`.
    pub stage: &'static str,
    pub workgroup_size: Option<[u32; 3]>,
}

pub type Block = Vec<Statement>;

#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    /// `var name : ty;` or `var name : ty = init;`.
    Var { name: String, ty: String, init: Option<Expr> },

    /// `let name : ty = value;` (or `let name = value;` without `ty`).
    Let { name: String, ty: Option<String>, value: Expr },

    Assign { lhs: Expr, rhs: Expr },

    /// Expression evaluated only for its side-effects (e.g. a `void` call).
    Expr(Expr),

    /// An empty `else_body` is omitted when printing.
    If { cond: Expr, then_body: Block, else_body: Block },

    /// An empty `continuing` is omitted when printing.
    Loop { body: Block, continuing: Block },

    Switch { selector: Expr, cases: Vec<Case> },

    Break,
    Continue,
    Return(Option<Expr>),
    Discard,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Case {
    pub selectors: Vec<CaseSelector>,
    pub body: Block,
}

#[derive(Clone, Debug, PartialEq)]
pub enum CaseSelector {
    Value(Literal),
    Default,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Ident(String),
    Literal(Literal),

    /// Rendered fully parenthesized, i.e. `(lhs op rhs)`.
    Binary { op: BinaryOp, lhs: Box<Expr>, rhs: Box<Expr> },

    /// Rendered as `op(operand)`.
    Unary { op: UnaryOp, operand: Box<Expr> },

    /// Call of a function, builtin, or type constructor/conversion, where
    /// `callee` may include template arguments (e.g. `bitcast<i32>`).
    Call { callee: String, args: Vec<Expr> },

    /// Struct member or vector component (`base.member`).
    Member { base: Box<Expr>, member: String },

    Index { base: Box<Expr>, index: Box<Expr> },

    AddrOf(Box<Expr>),
    Deref(Box<Expr>),
}

impl Expr {
    pub fn ident(name: impl Into<String>) -> Self {
        Expr::Ident(name.into())
    }

    pub fn call(callee: impl Into<String>, args: impl IntoIterator<Item = Expr>) -> Self {
        Expr::Call { callee: callee.into(), args: args.into_iter().collect() }
    }

    pub fn binary(op: BinaryOp, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs) }
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Expr::Unary { op, operand: Box::new(operand) }
    }

    pub fn member(self, member: impl Into<String>) -> Self {
        Expr::Member { base: Box::new(self), member: member.into() }
    }

    pub fn index(self, index: Expr) -> Self {
        Expr::Index { base: Box::new(self), index: Box::new(index) }
    }

    /// `&e`, simplifying `&*p` to just `p`.
    pub fn addr_of(self) -> Self {
        match self {
            Expr::Deref(ptr) => *ptr,
            e => Expr::AddrOf(Box::new(e)),
        }
    }

    /// `*p`, simplifying `*&e` to just `e`.
    pub fn deref(self) -> Self {
        match self {
            Expr::AddrOf(e) => *e,
            ptr => Expr::Deref(Box::new(ptr)),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Literal {
    Bool(bool),
    I32(i32),
    U32(u32),
    F32(f32),
    F16(f32),
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    And,
    Or,
    Xor,
    LogicalAnd,
    LogicalOr,
    ShiftLeft,
    ShiftRight,
    Equal,
    NotEqual,
    LessThan,
    LessThanEqual,
    GreaterThan,
    GreaterThanEqual,
}

impl BinaryOp {
    pub fn token(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
            BinaryOp::And => "&",
            BinaryOp::Or => "|",
            BinaryOp::Xor => "^",
            BinaryOp::LogicalAnd => "&&",
            BinaryOp::LogicalOr => "||",
            BinaryOp::ShiftLeft => "<<",
            BinaryOp::ShiftRight => ">>",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::LessThan => "<",
            BinaryOp::LessThanEqual => "<=",
            BinaryOp::GreaterThan => ">",
            BinaryOp::GreaterThanEqual => ">=",
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum UnaryOp {
    Negate,
    Not,
    Complement,
}

impl UnaryOp {
    pub fn token(self) -> &'static str {
        match self {
            UnaryOp::Negate => "-",
            UnaryOp::Not => "!",
            UnaryOp::Complement => "~",
        }
    }
}
