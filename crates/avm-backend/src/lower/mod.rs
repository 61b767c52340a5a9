//! Instruction lowering
//!
//! Maps IR nodes to AST expressions and statements. Values bound to a
//! variable are read through it; everything else is rebuilt inline at the
//! use. The runtime primitives the generated code calls into (`getProperty`,
//! `setSlot`, `Scope`, ...) are a fixed ABI provided by the loader.

mod literal;

use avm_ir::{ConstValue, NodeId, NodeKind};

pub use literal::{is_safe_property_name, lower_constant, negate};

use crate::ast::{Expr, Stmt};
use crate::context::Context;
use crate::error::{CompileError, CompileResult};

/// Expression reading the value of `id` at a use site
pub fn lower_use(ctx: &mut Context<'_>, id: NodeId) -> CompileResult<Expr> {
    if let Some(name) = ctx.binding(id)? {
        return Ok(Expr::Identifier(name));
    }
    let node = ctx.node(id)?;
    if matches!(node.kind, NodeKind::Phi) {
        return Err(CompileError::UnboundPhi { node: id });
    }
    if !node.kind.produces_value() {
        return Err(CompileError::StatementInExpression { node: id });
    }
    lower_value(ctx, id)
}

fn lower_all(ctx: &mut Context<'_>, ids: &[NodeId]) -> CompileResult<Vec<Expr>> {
    ids.iter().map(|id| lower_use(ctx, *id)).collect()
}

/// Static property name of `id`, if it is a constant string
fn constant_name(ctx: &Context<'_>, id: NodeId) -> Option<String> {
    match ctx.node(id).ok().map(|n| &n.kind) {
        Some(NodeKind::Constant {
            value: ConstValue::String(name),
        }) => Some(name.clone()),
        _ => None,
    }
}

/// How a property is reached: `obj.name`, or the runtime accessor taking
/// these leading arguments
enum Access {
    Member(Expr),
    Accessor(Vec<Expr>),
}

fn property_access(ctx: &mut Context<'_>, object: NodeId, name: NodeId) -> CompileResult<Access> {
    let object = lower_use(ctx, object)?;
    match constant_name(ctx, name) {
        Some(name) if is_safe_property_name(&name) => Ok(Access::Member(Expr::dot(object, name))),
        _ => {
            let name = lower_use(ctx, name)?;
            Ok(Access::Accessor(vec![object, name]))
        }
    }
}

fn runtime_call(function: &str, arguments: Vec<Expr>) -> Expr {
    Expr::call(Expr::ident(function), arguments)
}

/// The expression computing `id` itself, ignoring any variable it is bound to
pub fn lower_value(ctx: &mut Context<'_>, id: NodeId) -> CompileResult<Expr> {
    let node = ctx.node(id)?;
    let expr = match &node.kind {
        NodeKind::Parameter { index, name } => Expr::Identifier(ctx.use_parameter(*index, name)),
        NodeKind::Constant { value } => {
            lower_constant(value, ctx.pool(), &ctx.config().constants_name)
        }
        NodeKind::Variable { variable } => Expr::Identifier(ctx.use_variable(*variable)?),
        NodeKind::Phi => return Err(CompileError::UnboundPhi { node: id }),
        NodeKind::Move { .. } | NodeKind::Throw { .. } => {
            return Err(CompileError::StatementInExpression { node: id })
        }
        NodeKind::Unary { op, argument } => Expr::unary(*op, lower_use(ctx, *argument)?),
        NodeKind::Binary { op, left, right } => {
            let left = lower_use(ctx, *left)?;
            let right = lower_use(ctx, *right)?;
            Expr::binary(*op, left, right)
        }
        NodeKind::Latch {
            condition,
            left,
            right,
        } => {
            let condition = lower_use(ctx, *condition)?;
            let left = lower_use(ctx, *left)?;
            let right = lower_use(ctx, *right)?;
            Expr::conditional(condition, left, right)
        }
        NodeKind::Call {
            callee,
            object,
            args,
        } => {
            let callee = lower_use(ctx, *callee)?;
            match object {
                // The receiver is passed explicitly; `a.b()` sugar would bind
                // `this` to whatever the callee expression happens to be
                Some(object) => {
                    let mut arguments = vec![lower_use(ctx, *object)?];
                    arguments.extend(lower_all(ctx, args)?);
                    Expr::call(Expr::dot(callee, "call"), arguments)
                }
                None => Expr::call(callee, lower_all(ctx, args)?),
            }
        }
        NodeKind::New { callee, args } => {
            let callee = lower_use(ctx, *callee)?;
            Expr::new_object(callee, lower_all(ctx, args)?)
        }
        NodeKind::PropertyGet { object, name } => match property_access(ctx, *object, *name)? {
            Access::Member(member) => member,
            Access::Accessor(arguments) => runtime_call("getProperty", arguments),
        },
        NodeKind::PropertySet {
            object,
            name,
            value,
        } => match property_access(ctx, *object, *name)? {
            Access::Member(member) => Expr::assign(member, lower_use(ctx, *value)?),
            Access::Accessor(mut arguments) => {
                arguments.push(lower_use(ctx, *value)?);
                runtime_call("setProperty", arguments)
            }
        },
        NodeKind::SlotGet { object, index } => runtime_call("getSlot", lower_all(ctx, &[*object, *index])?),
        NodeKind::SlotSet {
            object,
            index,
            value,
        } => runtime_call("setSlot", lower_all(ctx, &[*object, *index, *value])?),
        NodeKind::This => Expr::This,
        NodeKind::Arguments => Expr::ident("arguments"),
        NodeKind::NewArray { elements } => Expr::Array(lower_all(ctx, elements)?),
        NodeKind::NewObject { properties } => {
            let mut fields = Vec::with_capacity(properties.len());
            for (key, value) in properties {
                fields.push((key.clone(), lower_use(ctx, *value)?));
            }
            Expr::Object(fields)
        }
        NodeKind::ScopeCreate {
            parent,
            object,
            is_with,
        } => {
            let mut arguments = lower_all(ctx, &[*parent, *object])?;
            arguments.push(Expr::boolean(*is_with));
            Expr::new_object(Expr::ident("Scope"), arguments)
        }
        NodeKind::FindProperty {
            scope,
            name,
            domain,
            strict,
        } => {
            let scope = lower_use(ctx, *scope)?;
            let mut arguments = lower_all(ctx, &[*name, *domain])?;
            arguments.push(Expr::boolean(*strict));
            Expr::call(Expr::dot(scope, "findProperty"), arguments)
        }
        NodeKind::RuntimeMultiname { namespaces, name } => Expr::call(
            Expr::dot(Expr::ident("Multiname"), "getMultiname"),
            lower_all(ctx, &[*namespaces, *name])?,
        ),
        NodeKind::Activation { method_info } => {
            runtime_call("createActivation", vec![lower_use(ctx, *method_info)?])
        }
        NodeKind::Global { scope } => Expr::dot(Expr::dot(lower_use(ctx, *scope)?, "global"), "object"),
        NodeKind::GlobalProperty { name } => Expr::ident(name.as_str()),
    };
    Ok(expr)
}

/// Statement for a node scheduled in a block, or `None` when evaluating it
/// in place has no effect
pub fn lower_statement(ctx: &mut Context<'_>, id: NodeId) -> CompileResult<Option<Stmt>> {
    let node = ctx.node(id)?;
    let stmt = match &node.kind {
        NodeKind::Move { to, from } => {
            let value = lower_use(ctx, *from)?;
            let target = Expr::Identifier(ctx.use_variable(*to)?);
            Some(Stmt::Expr(Expr::assign(target, value)))
        }
        NodeKind::Throw { value } => Some(Stmt::Throw(lower_use(ctx, *value)?)),
        NodeKind::PropertySet { .. } | NodeKind::SlotSet { .. } => Some(Stmt::Expr(lower_value(ctx, id)?)),
        // Written by the moves feeding it
        NodeKind::Phi => None,
        kind => match ctx.binding(id)? {
            Some(name) => {
                let value = lower_value(ctx, id)?;
                Some(Stmt::Expr(Expr::assign(Expr::Identifier(name), value)))
            }
            None if has_inline_effects(ctx, kind)? => Some(Stmt::Expr(lower_value(ctx, id)?)),
            None => None,
        },
    };
    Ok(stmt)
}

/// Whether evaluating a node in place can have an effect, counting the
/// unscheduled operands expanded into it
fn has_inline_effects(ctx: &Context<'_>, kind: &NodeKind) -> CompileResult<bool> {
    if kind.has_side_effects() {
        return Ok(true);
    }
    for operand in kind.operands() {
        let node = ctx.node(operand)?;
        if ctx.is_scheduled(operand) || matches!(node.kind, NodeKind::Phi) {
            continue;
        }
        if has_inline_effects(ctx, &node.kind)? {
            return Ok(true);
        }
    }
    Ok(false)
}
