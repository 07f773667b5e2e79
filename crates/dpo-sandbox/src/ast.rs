//! Syntax tree of the snippet language

use dpo_types::Scalar;

/// One line of a program
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    /// `import module`
    Import { module: String, line: usize },
    /// `let name = value`
    Let { name: String, value: Expr, line: usize },
    /// Bare expression; the last one is the program's result
    Expr { value: Expr, line: usize },
}

/// Infix operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    /// `+`, also concatenates strings and lists
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`, always a float
    Div,
    /// `%`
    Rem,
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `and`, short-circuiting
    And,
    /// `or`, short-circuiting
    Or,
}

/// Prefix operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    /// `-x`
    Neg,
    /// `not x`
    Not,
}

/// Expression tree
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Number, string, bool or null
    Literal(Scalar),
    /// Variable reference
    Var(String),
    /// `[a, b]`
    List(Vec<Expr>),
    /// `{key: value}`
    Map(Vec<(String, Expr)>),
    /// `module.function(args)`
    Call {
        module: String,
        function: String,
        args: Vec<Expr>,
    },
    /// `target[index]`
    Index {
        target: Box<Expr>,
        index: Box<Expr>,
    },
    /// Prefix operation
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    /// Infix operation
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

/// A parsed snippet
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    /// Statements in source order
    pub statements: Vec<Stmt>,
}

impl Program {
    /// Modules named by `import` statements
    pub fn imports(&self) -> impl Iterator<Item = &str> {
        self.statements.iter().filter_map(|s| match s {
            Stmt::Import { module, .. } => Some(module.as_str()),
            _ => None,
        })
    }
}
