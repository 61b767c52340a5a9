//! JavaScript source printer
//!
//! Deterministic pre-order formatter. Parentheses are derived from operator
//! precedence alone; the tree is never reordered, so evaluation order in the
//! text is exactly the order of the AST.

use avm_ir::{BinaryOp, UnaryOp};

use super::{Expr, Function, Literal, Stmt, SwitchCase};
use crate::config::PrinterConfig;

/// Formats an AST as source text for one target language
pub trait CodePrinter {
    /// `function (params) { body }`
    fn print_function(&self, function: &Function) -> String;

    /// Statements at the top indentation level, one per line
    fn print_statements(&self, body: &[Stmt]) -> String;

    fn print_expr(&self, expr: &Expr) -> String;
}

// Precedence levels, loosest first
const ASSIGN: u8 = 2;
const CONDITIONAL: u8 = 3;
const UNARY: u8 = 15;
const MEMBER: u8 = 18;
const PRIMARY: u8 = 20;

fn binary_precedence(op: BinaryOp) -> u8 {
    match op {
        BinaryOp::Or => 4,
        BinaryOp::And => 5,
        BinaryOp::BitOr => 6,
        BinaryOp::BitXor => 7,
        BinaryOp::BitAnd => 8,
        BinaryOp::Equal | BinaryOp::NotEqual | BinaryOp::StrictEqual | BinaryOp::StrictNotEqual => {
            9
        }
        BinaryOp::Less
        | BinaryOp::LessEqual
        | BinaryOp::Greater
        | BinaryOp::GreaterEqual
        | BinaryOp::In
        | BinaryOp::InstanceOf => 10,
        BinaryOp::ShiftLeft | BinaryOp::ShiftRight | BinaryOp::UnsignedShiftRight => 11,
        BinaryOp::Add | BinaryOp::Sub => 12,
        BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 13,
    }
}

fn precedence(expr: &Expr) -> u8 {
    match expr {
        // A negative literal prints with a leading minus
        Expr::Literal(Literal::Number(n)) if n.is_sign_negative() && !n.is_nan() => UNARY,
        Expr::Literal(_) | Expr::Identifier(_) | Expr::This | Expr::Array(_) | Expr::Object(_) => {
            PRIMARY
        }
        Expr::Member { .. } | Expr::Call { .. } | Expr::New { .. } => MEMBER,
        Expr::Unary { .. } => UNARY,
        Expr::Binary { op, .. } => binary_precedence(*op),
        Expr::Conditional { .. } => CONDITIONAL,
        Expr::Assign { .. } => ASSIGN,
    }
}

/// Format a number so that the host parses it back to the same value
pub fn format_number(value: f64) -> String {
    if value.is_nan() {
        return "NaN".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
    }
    if value == 0.0 {
        return if value.is_sign_negative() { "-0" } else { "0" }.to_string();
    }
    let magnitude = value.abs();
    if !(1e-6..1e21).contains(&magnitude) {
        format!("{:e}", value)
    } else {
        format!("{}", value)
    }
}

/// Double-quoted string literal with JS escapes
pub fn quote_string(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\u{2028}' => out.push_str("\\u2028"),
            '\u{2029}' => out.push_str("\\u2029"),
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Words that cannot follow a `.` or name an object literal key without
/// confusing older hosts
const RESERVED_WORDS: &[&str] = &[
    "arguments", "await", "break", "case", "catch", "class", "const", "continue", "debugger",
    "default", "delete", "do", "else", "enum", "eval", "export", "extends", "false", "finally",
    "for", "function", "if", "implements", "import", "in", "instanceof", "interface", "let",
    "new", "null", "package", "private", "protected", "public", "return", "static", "super",
    "switch", "this", "throw", "true", "try", "typeof", "undefined", "var", "void", "while",
    "with", "yield",
];

pub fn is_reserved_word(name: &str) -> bool {
    RESERVED_WORDS.contains(&name)
}

/// Whether `name` can be written as a bare identifier
pub fn is_identifier_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c == '$' || c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '$' || c == '_' || c.is_ascii_alphanumeric())
}

fn starts_with_object(expr: &Expr) -> bool {
    match expr {
        Expr::Object(_) => true,
        Expr::Member { object, .. } => starts_with_object(object),
        Expr::Call { callee, .. } => starts_with_object(callee),
        Expr::Binary { left, .. } => starts_with_object(left),
        Expr::Assign { target, .. } => starts_with_object(target),
        Expr::Conditional { test, .. } => starts_with_object(test),
        _ => false,
    }
}

fn new_callee_needs_parens(expr: &Expr) -> bool {
    match expr {
        Expr::Identifier(_) | Expr::This => false,
        Expr::Member { object, .. } => new_callee_needs_parens(object),
        _ => true,
    }
}

/// Printer for JavaScript
#[derive(Debug, Clone, Default)]
pub struct JsPrinter {
    config: PrinterConfig,
}

impl JsPrinter {
    pub fn new(config: PrinterConfig) -> Self {
        JsPrinter { config }
    }

    fn pad(&self, out: &mut String, depth: usize) {
        out.push_str(&self.config.base);
        for _ in 0..depth {
            out.push_str(&self.config.indent);
        }
    }

    fn wrapped(&self, expr: &Expr, parens: bool) -> String {
        let text = self.expr(expr);
        if parens {
            format!("({})", text)
        } else {
            text
        }
    }

    fn list(&self, exprs: &[Expr]) -> String {
        exprs
            .iter()
            .map(|e| self.wrapped(e, precedence(e) < ASSIGN))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn expr(&self, expr: &Expr) -> String {
        match expr {
            Expr::Literal(lit) => match lit {
                Literal::Null => "null".to_string(),
                Literal::Bool(b) => b.to_string(),
                Literal::Number(n) => format_number(*n),
                Literal::Str(s) => quote_string(s),
            },
            Expr::Identifier(name) => name.clone(),
            Expr::This => "this".to_string(),
            Expr::Member {
                object,
                property,
                computed,
            } => {
                let bare_number = matches!(**object, Expr::Literal(Literal::Number(_)));
                let obj = self.wrapped(object, precedence(object) < MEMBER || bare_number);
                if *computed {
                    format!("{}[{}]", obj, self.expr(property))
                } else {
                    format!("{}.{}", obj, self.expr(property))
                }
            }
            Expr::Binary { op, left, right } => {
                let prec = binary_precedence(*op);
                format!(
                    "{} {} {}",
                    self.wrapped(left, precedence(left) < prec),
                    op.as_str(),
                    self.wrapped(right, precedence(right) <= prec)
                )
            }
            Expr::Unary { op, argument } => {
                let sign = matches!(op, UnaryOp::Neg | UnaryOp::Plus);
                let signed_arg = match &**argument {
                    Expr::Unary { op: inner, .. } => matches!(inner, UnaryOp::Neg | UnaryOp::Plus),
                    Expr::Literal(Literal::Number(n)) => n.is_sign_negative() && !n.is_nan(),
                    _ => false,
                };
                let arg = self.wrapped(argument, precedence(argument) < UNARY || (sign && signed_arg));
                if op.is_keyword() {
                    format!("{} {}", op.as_str(), arg)
                } else {
                    format!("{}{}", op.as_str(), arg)
                }
            }
            Expr::Call { callee, arguments } => format!(
                "{}({})",
                self.wrapped(callee, precedence(callee) < MEMBER),
                self.list(arguments)
            ),
            Expr::New { callee, arguments } => format!(
                "new {}({})",
                self.wrapped(callee, new_callee_needs_parens(callee)),
                self.list(arguments)
            ),
            Expr::Assign { target, value } => format!(
                "{} = {}",
                self.wrapped(target, precedence(target) < MEMBER),
                self.wrapped(value, precedence(value) < ASSIGN)
            ),
            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => format!(
                "{} ? {} : {}",
                self.wrapped(test, precedence(test) <= CONDITIONAL),
                self.wrapped(consequent, precedence(consequent) < ASSIGN),
                self.wrapped(alternate, precedence(alternate) < ASSIGN)
            ),
            Expr::Array(elements) => format!("[{}]", self.list(elements)),
            Expr::Object(properties) => {
                if properties.is_empty() {
                    return "{}".to_string();
                }
                let props = properties
                    .iter()
                    .map(|(key, value)| {
                        let key = if is_identifier_name(key) && !is_reserved_word(key) {
                            key.clone()
                        } else {
                            quote_string(key)
                        };
                        format!("{}: {}", key, self.wrapped(value, precedence(value) < ASSIGN))
                    })
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{{{}}}", props)
            }
        }
    }

    fn block(&self, out: &mut String, body: &[Stmt], depth: usize) {
        if body.is_empty() {
            out.push_str("{}");
            return;
        }
        out.push_str("{\n");
        for stmt in body {
            self.stmt(out, stmt, depth + 1);
        }
        self.pad(out, depth);
        out.push('}');
    }

    fn stmt(&self, out: &mut String, stmt: &Stmt, depth: usize) {
        self.pad(out, depth);
        self.stmt_inline(out, stmt, depth);
        out.push('\n');
    }

    /// Print a statement from the current position, without the trailing newline
    fn stmt_inline(&self, out: &mut String, stmt: &Stmt, depth: usize) {
        match stmt {
            Stmt::Expr(expr) => {
                let text = self.expr(expr);
                if starts_with_object(expr) {
                    out.push_str(&format!("({});", text));
                } else {
                    out.push_str(&text);
                    out.push(';');
                }
            }
            Stmt::Var(names) => {
                out.push_str("var ");
                out.push_str(&names.join(", "));
                out.push(';');
            }
            Stmt::Block(body) => self.block(out, body, depth),
            Stmt::If {
                test,
                consequent,
                alternate,
            } => {
                out.push_str(&format!("if ({}) ", self.expr(test)));
                self.block(out, consequent, depth);
                if let Some(alternate) = alternate {
                    out.push_str(" else ");
                    match alternate.as_slice() {
                        [nested @ Stmt::If { .. }] => self.stmt_inline(out, nested, depth),
                        _ => self.block(out, alternate, depth),
                    }
                }
            }
            Stmt::While { test, body } => {
                out.push_str(&format!("while ({}) ", self.expr(test)));
                self.block(out, body, depth);
            }
            Stmt::Labeled { label, body } => {
                out.push_str(label);
                out.push_str(": ");
                self.stmt_inline(out, body, depth);
            }
            Stmt::Switch {
                discriminant,
                cases,
            } => {
                out.push_str(&format!("switch ({}) {{\n", self.expr(discriminant)));
                for SwitchCase { test, body } in cases {
                    self.pad(out, depth + 1);
                    match test {
                        Some(test) => out.push_str(&format!("case {}:\n", self.expr(test))),
                        None => out.push_str("default:\n"),
                    }
                    for stmt in body {
                        self.stmt(out, stmt, depth + 2);
                    }
                }
                self.pad(out, depth);
                out.push('}');
            }
            Stmt::Try {
                block,
                param,
                handler,
            } => {
                out.push_str("try ");
                self.block(out, block, depth);
                out.push_str(&format!(" catch ({}) ", param));
                self.block(out, handler, depth);
            }
            Stmt::Throw(expr) => out.push_str(&format!("throw {};", self.expr(expr))),
            Stmt::Return(None) => out.push_str("return;"),
            Stmt::Return(Some(expr)) => out.push_str(&format!("return {};", self.expr(expr))),
            Stmt::Break(None) => out.push_str("break;"),
            Stmt::Break(Some(label)) => out.push_str(&format!("break {};", label)),
            Stmt::Continue(None) => out.push_str("continue;"),
            Stmt::Continue(Some(label)) => out.push_str(&format!("continue {};", label)),
        }
    }
}

impl CodePrinter for JsPrinter {
    fn print_function(&self, function: &Function) -> String {
        let mut out = String::new();
        self.pad(&mut out, 0);
        out.push_str(&format!("function ({}) ", function.params.join(", ")));
        self.block(&mut out, &function.body, 0);
        out
    }

    fn print_statements(&self, body: &[Stmt]) -> String {
        let mut out = String::new();
        for stmt in body {
            self.stmt(&mut out, stmt, 0);
        }
        out
    }

    fn print_expr(&self, expr: &Expr) -> String {
        self.expr(expr)
    }
}
