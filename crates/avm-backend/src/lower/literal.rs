//! Constants, condition negation and property names

use avm_ir::{ConstValue, UnaryOp};

use crate::ast::printer::{is_identifier_name, is_reserved_word};
use crate::ast::{Expr, Literal};
use crate::constants::ConstantPool;

/// Whether `obj.name` is a faithful spelling of the property access
pub fn is_safe_property_name(name: &str) -> bool {
    is_identifier_name(name) && !is_reserved_word(name)
}

/// Lower a constant. Primitives become literals; objects are interned in
/// `pool` and read back as `constants_name[index]`.
pub fn lower_constant(value: &ConstValue, pool: &ConstantPool, constants_name: &str) -> Expr {
    match value {
        ConstValue::Undefined => Expr::ident("undefined"),
        ConstValue::Null => Expr::Literal(Literal::Null),
        ConstValue::Bool(b) => Expr::boolean(*b),
        ConstValue::Number(n) => lower_number(*n),
        ConstValue::String(s) => Expr::string(s.as_str()),
        ConstValue::Object(object) => {
            let index = pool.intern(object);
            Expr::index(Expr::ident(constants_name), Expr::number(index as f64))
        }
    }
}

fn lower_number(value: f64) -> Expr {
    if value.is_nan() {
        return Expr::ident("NaN");
    }
    if value.is_infinite() {
        let infinity = Expr::ident("Infinity");
        return if value > 0.0 {
            infinity
        } else {
            Expr::unary(UnaryOp::Neg, infinity)
        };
    }
    // Covers -0, whose sign a literal cannot carry
    if value.is_sign_negative() {
        return Expr::unary(UnaryOp::Neg, Expr::number(-value));
    }
    Expr::number(value)
}

/// Logical negation of a condition, simplified where an exact inverse
/// exists. Applying it twice to a comparison gives back the comparison.
pub fn negate(expr: Expr) -> Expr {
    match expr {
        Expr::Literal(Literal::Bool(b)) => Expr::boolean(!b),
        Expr::Unary {
            op: UnaryOp::Not,
            argument,
        } => *argument,
        Expr::Binary { op, left, right } => match op.negated() {
            Some(negated) => Expr::Binary {
                op: negated,
                left,
                right,
            },
            None => Expr::unary(UnaryOp::Not, Expr::Binary { op, left, right }),
        },
        other => Expr::unary(UnaryOp::Not, other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{CodePrinter, JsPrinter};
    use avm_ir::{BinaryOp, ObjectHandle};

    fn print(expr: &Expr) -> String {
        JsPrinter::default().print_expr(expr)
    }

    fn constant(value: ConstValue) -> String {
        print(&lower_constant(&value, &ConstantPool::new(), "$C"))
    }

    #[test]
    fn test_primitive_literals() {
        assert_eq!(constant(ConstValue::Number(42.0)), "42");
        assert_eq!(constant(ConstValue::Number(-0.0)), "-0");
        assert_eq!(constant(ConstValue::Number(-7.5)), "-7.5");
        assert_eq!(constant(ConstValue::Number(f64::NAN)), "NaN");
        assert_eq!(constant(ConstValue::Number(f64::INFINITY)), "Infinity");
        assert_eq!(constant(ConstValue::Number(f64::NEG_INFINITY)), "-Infinity");
        assert_eq!(constant(ConstValue::String("a \"string\"".into())), "\"a \\\"string\\\"\"");
        assert_eq!(constant(ConstValue::Undefined), "undefined");
        assert_eq!(constant(ConstValue::Null), "null");
        assert_eq!(constant(ConstValue::Bool(false)), "false");
    }

    #[test]
    fn test_negative_zero_keeps_sign() {
        let expr = lower_constant(&ConstValue::Number(-0.0), &ConstantPool::new(), "$C");
        match expr {
            Expr::Unary {
                op: UnaryOp::Neg,
                argument,
            } => assert_eq!(*argument, Expr::number(0.0)),
            other => panic!("expected negation, got {:?}", other),
        }
    }

    #[test]
    fn test_object_goes_through_pool() {
        let pool = ConstantPool::new();
        let first = ObjectHandle::new("first");
        let second = ObjectHandle::new("second");
        let a = lower_constant(&ConstValue::Object(first.clone()), &pool, "$C");
        let b = lower_constant(&ConstValue::Object(second), &pool, "$C");
        let again = lower_constant(&ConstValue::Object(first), &pool, "$C");
        assert_eq!(print(&a), "$C[0]");
        assert_eq!(print(&b), "$C[1]");
        assert_eq!(a, again);
        assert_eq!(pool.len(), 2);
    }

    #[test]
    fn test_negate_comparisons_is_involution() {
        let x = Expr::ident("x");
        let y = Expr::ident("y");
        for op in [
            BinaryOp::Equal,
            BinaryOp::NotEqual,
            BinaryOp::StrictEqual,
            BinaryOp::StrictNotEqual,
        ] {
            let expr = Expr::binary(op, x.clone(), y.clone());
            let once = negate(expr.clone());
            assert_ne!(once, expr);
            assert_eq!(negate(once), expr);
        }
    }

    #[test]
    fn test_negate_forms() {
        let x = Expr::ident("x");
        assert_eq!(print(&negate(x.clone())), "!x");
        assert_eq!(negate(negate(x.clone())), x);
        assert_eq!(print(&negate(Expr::boolean(true))), "false");
        let truthy = Expr::unary(UnaryOp::Truthy, x.clone());
        assert_eq!(print(&negate(truthy.clone())), "!!!x");
        assert_eq!(negate(negate(truthy.clone())), truthy);
        let less = Expr::binary(BinaryOp::Less, x.clone(), Expr::number(1.0));
        assert_eq!(print(&negate(less.clone())), "!(x < 1)");
        assert_eq!(negate(negate(less.clone())), less);
    }

    #[test]
    fn test_property_names() {
        assert!(is_safe_property_name("length"));
        assert!(is_safe_property_name("$value"));
        assert!(!is_safe_property_name("class"));
        assert!(!is_safe_property_name("default"));
        assert!(!is_safe_property_name("my-prop"));
        assert!(!is_safe_property_name("0"));
        assert!(!is_safe_property_name(""));
    }
}
