//! Value-graph nodes
//!
//! Every value a method computes is a `Node` in the graph's arena. Operands
//! refer to other nodes by `NodeId`; the graph is a DAG per block, with
//! loop-carried values flowing through variables written by `Move`.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::types::{NodeId, VariableId};

/// A node in the value graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    #[serde(flatten)]
    pub kind: NodeKind,
    /// Storage slot the node's result is written to, if any. Spelled
    /// `bind` in JSON, where `variable` is taken by variable reads.
    #[serde(default, rename = "bind")]
    pub variable: Option<VariableId>,
}

impl Node {
    pub fn new(kind: NodeKind) -> Self {
        Node { kind, variable: None }
    }

    pub fn with_variable(kind: NodeKind, variable: VariableId) -> Self {
        Node { kind, variable: Some(variable) }
    }
}

/// A named storage slot, declared once per compiled method
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
}

/// Node kinds understood by the backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    /// Method parameter at `index`
    Parameter { index: u32, name: String },
    Constant { value: ConstValue },
    /// Read of a variable
    Variable { variable: VariableId },
    /// Merge point; always read through its bound variable
    Phi,
    /// `to = from`, the explicit copy feeding a phi's variable
    Move { to: VariableId, from: NodeId },
    Unary { op: UnaryOp, argument: NodeId },
    Binary { op: BinaryOp, left: NodeId, right: NodeId },
    /// `condition ? left : right`
    Latch { condition: NodeId, left: NodeId, right: NodeId },
    /// Call, optionally with an explicit receiver
    Call {
        callee: NodeId,
        #[serde(default)]
        object: Option<NodeId>,
        args: Vec<NodeId>,
    },
    New { callee: NodeId, args: Vec<NodeId> },
    PropertyGet { object: NodeId, name: NodeId },
    PropertySet { object: NodeId, name: NodeId, value: NodeId },
    SlotGet { object: NodeId, index: NodeId },
    SlotSet { object: NodeId, index: NodeId, value: NodeId },
    Throw { value: NodeId },
    This,
    Arguments,
    NewArray { elements: Vec<NodeId> },
    NewObject { properties: Vec<(String, NodeId)> },
    /// Push a new scope onto the scope chain
    ScopeCreate { parent: NodeId, object: NodeId, is_with: bool },
    FindProperty { scope: NodeId, name: NodeId, domain: NodeId, strict: bool },
    RuntimeMultiname { namespaces: NodeId, name: NodeId },
    /// Activation object for a method with captured locals
    Activation { method_info: NodeId },
    /// Global object of a scope chain
    Global { scope: NodeId },
    /// Host-provided global binding, referenced by name
    GlobalProperty { name: String },
}

impl NodeKind {
    /// Value edges of this node, in evaluation order
    pub fn operands(&self) -> Vec<NodeId> {
        match self {
            NodeKind::Parameter { .. }
            | NodeKind::Constant { .. }
            | NodeKind::Variable { .. }
            | NodeKind::Phi
            | NodeKind::This
            | NodeKind::Arguments
            | NodeKind::GlobalProperty { .. } => vec![],

            NodeKind::Move { from, .. } => vec![*from],
            NodeKind::Unary { argument, .. } => vec![*argument],
            NodeKind::Binary { left, right, .. } => vec![*left, *right],
            NodeKind::Latch { condition, left, right } => vec![*condition, *left, *right],
            NodeKind::Call { callee, object, args } => {
                let mut ops = vec![*callee];
                ops.extend(object.iter().copied());
                ops.extend(args.iter().copied());
                ops
            }
            NodeKind::New { callee, args } => {
                let mut ops = vec![*callee];
                ops.extend(args.iter().copied());
                ops
            }
            NodeKind::PropertyGet { object, name } => vec![*object, *name],
            NodeKind::PropertySet { object, name, value } => vec![*object, *name, *value],
            NodeKind::SlotGet { object, index } => vec![*object, *index],
            NodeKind::SlotSet { object, index, value } => vec![*object, *index, *value],
            NodeKind::Throw { value } => vec![*value],
            NodeKind::NewArray { elements } => elements.clone(),
            NodeKind::NewObject { properties } => properties.iter().map(|(_, v)| *v).collect(),
            NodeKind::ScopeCreate { parent, object, .. } => vec![*parent, *object],
            NodeKind::FindProperty { scope, name, domain, .. } => vec![*scope, *name, *domain],
            NodeKind::RuntimeMultiname { namespaces, name } => vec![*namespaces, *name],
            NodeKind::Activation { method_info } => vec![*method_info],
            NodeKind::Global { scope } => vec![*scope],
        }
    }

    /// Whether the node yields a value that other nodes can consume
    pub fn produces_value(&self) -> bool {
        !matches!(
            self,
            NodeKind::Move { .. }
                | NodeKind::PropertySet { .. }
                | NodeKind::SlotSet { .. }
                | NodeKind::Throw { .. }
        )
    }

    /// Whether re-evaluating the node at every use is free and unobservable
    pub fn is_trivial(&self) -> bool {
        matches!(
            self,
            NodeKind::Parameter { .. }
                | NodeKind::Constant { .. }
                | NodeKind::Variable { .. }
                | NodeKind::Phi
                | NodeKind::This
                | NodeKind::Arguments
                | NodeKind::GlobalProperty { .. }
        )
    }

    /// Whether the node can run user code or observably mutate state
    pub fn has_side_effects(&self) -> bool {
        matches!(
            self,
            NodeKind::Move { .. }
                | NodeKind::Call { .. }
                | NodeKind::New { .. }
                | NodeKind::PropertyGet { .. }
                | NodeKind::PropertySet { .. }
                | NodeKind::SlotSet { .. }
                | NodeKind::Throw { .. }
                | NodeKind::FindProperty { .. }
        )
    }
}

/// A constant operand
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum ConstValue {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    /// Opaque runtime object (class descriptor, multiname, ...). Never
    /// crosses the JSON boundary.
    #[serde(skip)]
    Object(ObjectHandle),
}

impl ConstValue {
    pub fn is_primitive(&self) -> bool {
        !matches!(self, ConstValue::Object(_))
    }
}

/// Shared reference to a runtime object, compared by identity
#[derive(Clone)]
pub struct ObjectHandle(Arc<dyn Any + Send + Sync>);

impl ObjectHandle {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        ObjectHandle(Arc::new(value))
    }

    /// Address of the shared allocation; stable while any clone is alive
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    pub fn ptr_eq(&self, other: &ObjectHandle) -> bool {
        self.identity() == other.identity()
    }
}

impl fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectHandle({:#x})", self.identity())
    }
}

/// Binary operators, spelled as in the generated JavaScript
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    // Arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,

    // Comparison
    Equal,
    NotEqual,
    StrictEqual,
    StrictNotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,

    // Logical
    And,
    Or,

    // Bitwise
    BitAnd,
    BitOr,
    BitXor,
    ShiftLeft,
    ShiftRight,
    UnsignedShiftRight,

    // Relational keywords
    In,
    InstanceOf,
}

impl BinaryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::StrictEqual => "===",
            BinaryOp::StrictNotEqual => "!==",
            BinaryOp::Less => "<",
            BinaryOp::LessEqual => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::And => "&&",
            BinaryOp::Or => "||",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::ShiftLeft => "<<",
            BinaryOp::ShiftRight => ">>",
            BinaryOp::UnsignedShiftRight => ">>>",
            BinaryOp::In => "in",
            BinaryOp::InstanceOf => "instanceof",
        }
    }

    /// Exact logical complement, if one exists.
    ///
    /// Ordering comparisons have none: `!(a < b)` differs from `a >= b`
    /// when either side is NaN.
    pub fn negated(&self) -> Option<BinaryOp> {
        match self {
            BinaryOp::Equal => Some(BinaryOp::NotEqual),
            BinaryOp::NotEqual => Some(BinaryOp::Equal),
            BinaryOp::StrictEqual => Some(BinaryOp::StrictNotEqual),
            BinaryOp::StrictNotEqual => Some(BinaryOp::StrictEqual),
            _ => None,
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Unary operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnaryOp {
    /// Numeric negation (-)
    Neg,
    /// Numeric conversion (+)
    Plus,
    /// Logical not (!)
    Not,
    /// Boolean conversion (!!)
    Truthy,
    /// Bitwise not (~)
    BitNot,
    TypeOf,
    Void,
}

impl UnaryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnaryOp::Neg => "-",
            UnaryOp::Plus => "+",
            UnaryOp::Not => "!",
            UnaryOp::Truthy => "!!",
            UnaryOp::BitNot => "~",
            UnaryOp::TypeOf => "typeof",
            UnaryOp::Void => "void",
        }
    }

    /// Keyword operators need a space before their operand
    pub fn is_keyword(&self) -> bool {
        matches!(self, UnaryOp::TypeOf | UnaryOp::Void)
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
