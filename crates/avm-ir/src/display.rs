//! Pretty-printing for method graphs
//!
//! Display implementations for debugging and trace output.

use std::fmt;

use crate::cfg::{BasicBlock, MethodGraph, Terminator};
use crate::node::{ConstValue, Node, NodeKind};
use crate::types::NodeId;

fn list(ids: &[NodeId]) -> String {
    ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(", ")
}

impl fmt::Display for MethodGraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "method @{} (params: {}, nodes: {}, vars: {}) entry {} {{",
            self.name,
            self.parameter_count,
            self.nodes.len(),
            self.variables.len(),
            self.entry
        )?;

        for block in &self.blocks {
            write!(f, "{}", block)?;
            for id in &block.nodes {
                if let Some(node) = self.node(*id) {
                    writeln!(f, "    {} = {}", id, node)?;
                }
            }
            writeln!(f, "    {}", block.terminator)?;
        }

        for (idx, region) in self.exception_regions.iter().enumerate() {
            write!(f, "  try#{} entry {} blocks [", idx, region.entry)?;
            for (i, b) in region.blocks.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{}", b)?;
            }
            writeln!(f, "] handler {}", region.handler)?;
        }

        writeln!(f, "}}")
    }
}

impl fmt::Display for BasicBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "  {}:", self.id)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(var) = self.variable {
            write!(f, " -> {}", var)?;
        }
        Ok(())
    }
}

impl fmt::Display for ConstValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConstValue::Undefined => write!(f, "undefined"),
            ConstValue::Null => write!(f, "null"),
            ConstValue::Bool(b) => write!(f, "{}", b),
            ConstValue::Number(n) => write!(f, "{}", n),
            ConstValue::String(s) => write!(f, "{:?}", s),
            ConstValue::Object(handle) => write!(f, "{:?}", handle),
        }
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKind::Parameter { index, name } => write!(f, "param #{} {}", index, name),
            NodeKind::Constant { value } => write!(f, "const {}", value),
            NodeKind::Variable { variable } => write!(f, "read {}", variable),
            NodeKind::Phi => write!(f, "phi"),
            NodeKind::Move { to, from } => write!(f, "move {} <- {}", to, from),
            NodeKind::Unary { op, argument } => write!(f, "unary {} {}", op, argument),
            NodeKind::Binary { op, left, right } => write!(f, "binary {} {}, {}", op, left, right),
            NodeKind::Latch { condition, left, right } => {
                write!(f, "latch {} ? {} : {}", condition, left, right)
            }
            NodeKind::Call { callee, object, args } => match object {
                Some(obj) => write!(f, "call {} on {} ({})", callee, obj, list(args)),
                None => write!(f, "call {} ({})", callee, list(args)),
            },
            NodeKind::New { callee, args } => write!(f, "new {} ({})", callee, list(args)),
            NodeKind::PropertyGet { object, name } => write!(f, "get {}[{}]", object, name),
            NodeKind::PropertySet { object, name, value } => {
                write!(f, "set {}[{}] = {}", object, name, value)
            }
            NodeKind::SlotGet { object, index } => write!(f, "getslot {}[{}]", object, index),
            NodeKind::SlotSet { object, index, value } => {
                write!(f, "setslot {}[{}] = {}", object, index, value)
            }
            NodeKind::Throw { value } => write!(f, "throw {}", value),
            NodeKind::This => write!(f, "this"),
            NodeKind::Arguments => write!(f, "arguments"),
            NodeKind::NewArray { elements } => write!(f, "array [{}]", list(elements)),
            NodeKind::NewObject { properties } => {
                write!(f, "object {{")?;
                for (i, (key, value)) in properties.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, " {}: {}", key, value)?;
                }
                write!(f, " }}")
            }
            NodeKind::ScopeCreate { parent, object, is_with } => {
                write!(f, "scope {} {} with={}", parent, object, is_with)
            }
            NodeKind::FindProperty { scope, name, domain, strict } => {
                write!(f, "findprop {} {} {} strict={}", scope, name, domain, strict)
            }
            NodeKind::RuntimeMultiname { namespaces, name } => {
                write!(f, "multiname {} {}", namespaces, name)
            }
            NodeKind::Activation { method_info } => write!(f, "activation {}", method_info),
            NodeKind::Global { scope } => write!(f, "global {}", scope),
            NodeKind::GlobalProperty { name } => write!(f, "globalprop {}", name),
        }
    }
}

impl fmt::Display for Terminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Terminator::Jump { target } => write!(f, "jump {}", target),
            Terminator::Branch {
                cond,
                then_block,
                else_block,
            } => write!(f, "br {}, {}, {}", cond, then_block, else_block),
            Terminator::Switch {
                value,
                cases,
                default,
            } => {
                write!(f, "switch {} [", value)?;
                for (i, (v, target)) in cases.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} => {}", v, target)?;
                }
                write!(f, "] default {}", default)
            }
            Terminator::Return { value: Some(v) } => write!(f, "ret {}", v),
            Terminator::Return { value: None } => write!(f, "ret void"),
            Terminator::Throw { value } => write!(f, "throw {}", value),
            Terminator::Unreachable => write!(f, "unreachable"),
        }
    }
}
