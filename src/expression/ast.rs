//! Expression syntax tree

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Negate,
    Plus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    /// `==`
    LooseEq,
    /// `!=`
    LooseNe,
    /// `===`
    StrictEq,
    /// `!==`
    StrictNe,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOp {
    And,
    Or,
    Nullish,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Ident(String),
    Array(Vec<Expr>),
    Member {
        object: Box<Expr>,
        property: String,
        optional: bool,
    },
    Index {
        object: Box<Expr>,
        index: Box<Expr>,
        optional: bool,
    },
    /// Call of an allow-listed function by name
    Call {
        function: String,
        args: Vec<Expr>,
    },
    /// Call of an allow-listed method on a value (`name.trim()`)
    MethodCall {
        object: Box<Expr>,
        method: String,
        args: Vec<Expr>,
        optional: bool,
    },
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
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
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
}

impl Expr {
    /// Visit this node and every descendant, parents first
    pub fn walk<'a>(&'a self, visit: &mut dyn FnMut(&'a Expr)) {
        visit(self);
        match self {
            Expr::Literal(_) | Expr::Ident(_) => {}
            Expr::Array(items) => {
                for item in items {
                    item.walk(visit);
                }
            }
            Expr::Member { object, .. } => object.walk(visit),
            Expr::Index { object, index, .. } => {
                object.walk(visit);
                index.walk(visit);
            }
            Expr::Call { args, .. } => {
                for arg in args {
                    arg.walk(visit);
                }
            }
            Expr::MethodCall { object, args, .. } => {
                object.walk(visit);
                for arg in args {
                    arg.walk(visit);
                }
            }
            Expr::Unary { operand, .. } => operand.walk(visit),
            Expr::Binary { left, right, .. } | Expr::Logical { left, right, .. } => {
                left.walk(visit);
                right.walk(visit);
            }
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                test.walk(visit);
                consequent.walk(visit);
                alternate.walk(visit);
            }
        }
    }
}
