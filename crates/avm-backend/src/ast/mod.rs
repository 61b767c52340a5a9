//! Target AST
//!
//! A deliberately small expression/statement tree: enough to express the
//! lowered method body and nothing more. Nodes carry no semantics beyond
//! their shape; the printer decides spelling and parenthesization.

pub mod printer;

use avm_ir::{BinaryOp, UnaryOp};

pub use printer::{CodePrinter, JsPrinter};

/// Primitive literal
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Null,
    Bool(bool),
    /// Printed as the shortest text that parses back to the same value
    Number(f64),
    Str(String),
}

/// Expression node
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    Identifier(String),
    This,
    /// `object.name` when `computed` is false, `object[property]` otherwise
    Member {
        object: Box<Expr>,
        property: Box<Expr>,
        computed: bool,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Unary {
        op: UnaryOp,
        argument: Box<Expr>,
    },
    Call {
        callee: Box<Expr>,
        arguments: Vec<Expr>,
    },
    New {
        callee: Box<Expr>,
        arguments: Vec<Expr>,
    },
    Assign {
        target: Box<Expr>,
        value: Box<Expr>,
    },
    Conditional {
        test: Box<Expr>,
        consequent: Box<Expr>,
        alternate: Box<Expr>,
    },
    Array(Vec<Expr>),
    Object(Vec<(String, Expr)>),
}

impl Expr {
    pub fn ident(name: impl Into<String>) -> Expr {
        Expr::Identifier(name.into())
    }

    pub fn number(value: f64) -> Expr {
        Expr::Literal(Literal::Number(value))
    }

    pub fn string(value: impl Into<String>) -> Expr {
        Expr::Literal(Literal::Str(value.into()))
    }

    pub fn boolean(value: bool) -> Expr {
        Expr::Literal(Literal::Bool(value))
    }

    /// `object.name`
    pub fn dot(object: Expr, name: impl Into<String>) -> Expr {
        Expr::Member {
            object: Box::new(object),
            property: Box::new(Expr::Identifier(name.into())),
            computed: false,
        }
    }

    /// `object[property]`
    pub fn index(object: Expr, property: Expr) -> Expr {
        Expr::Member {
            object: Box::new(object),
            property: Box::new(property),
            computed: true,
        }
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn unary(op: UnaryOp, argument: Expr) -> Expr {
        Expr::Unary {
            op,
            argument: Box::new(argument),
        }
    }

    pub fn call(callee: Expr, arguments: Vec<Expr>) -> Expr {
        Expr::Call {
            callee: Box::new(callee),
            arguments,
        }
    }

    pub fn new_object(callee: Expr, arguments: Vec<Expr>) -> Expr {
        Expr::New {
            callee: Box::new(callee),
            arguments,
        }
    }

    pub fn assign(target: Expr, value: Expr) -> Expr {
        Expr::Assign {
            target: Box::new(target),
            value: Box::new(value),
        }
    }

    pub fn conditional(test: Expr, consequent: Expr, alternate: Expr) -> Expr {
        Expr::Conditional {
            test: Box::new(test),
            consequent: Box::new(consequent),
            alternate: Box::new(alternate),
        }
    }
}

/// One clause of a `switch`; `test` is `None` for `default`
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchCase {
    pub test: Option<Expr>,
    pub body: Vec<Stmt>,
}

/// Statement node
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    /// `var a, b;`
    Var(Vec<String>),
    Block(Vec<Stmt>),
    If {
        test: Expr,
        consequent: Vec<Stmt>,
        alternate: Option<Vec<Stmt>>,
    },
    While {
        test: Expr,
        body: Vec<Stmt>,
    },
    Labeled {
        label: String,
        body: Box<Stmt>,
    },
    Switch {
        discriminant: Expr,
        cases: Vec<SwitchCase>,
    },
    Try {
        block: Vec<Stmt>,
        param: String,
        handler: Vec<Stmt>,
    },
    Throw(Expr),
    Return(Option<Expr>),
    Break(Option<String>),
    Continue(Option<String>),
}

impl Stmt {
    /// Whether control never continues past this statement
    pub fn is_jump(&self) -> bool {
        matches!(
            self,
            Stmt::Break(_) | Stmt::Continue(_) | Stmt::Return(_) | Stmt::Throw(_)
        )
    }
}

/// A callable unit: parameter list and body
#[derive(Debug, Clone, PartialEq)]
pub struct Function {
    pub params: Vec<String>,
    pub body: Vec<Stmt>,
}
