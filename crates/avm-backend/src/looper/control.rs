//! Structured control tree
//!
//! Output of the looper and input of the control-tree compiler. The tree is
//! arena-indexed; iteration exists only as `Loop` nodes, and jumps name
//! their target loop by id rather than by reference.

use std::fmt;

use avm_ir::{BlockId, VariableId};

/// Index of a node in a `ControlTree`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControlId(pub u32);

/// Identity of a `Loop` node, referenced by `Break`/`Continue`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LoopId(pub u32);

impl fmt::Display for LoopId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "loop{}", self.0)
    }
}

/// One arm of a native switch
#[derive(Debug, Clone, PartialEq)]
pub struct SwitchArm {
    /// Case values leading here
    pub values: Vec<i32>,
    /// Whether this arm also takes the default
    pub is_default: bool,
    pub body: Option<ControlId>,
}

/// Handler of a `Try`
#[derive(Debug, Clone, PartialEq)]
pub struct CatchClause {
    /// Variable receiving the thrown value
    pub variable: Option<VariableId>,
    pub body: Option<ControlId>,
}

/// Structured control node.
///
/// `label` on a jump is the block the transfer lands on; it is stored to the
/// label variable before jumping, for a `LabelSwitch` to dispatch on.
#[derive(Debug, Clone, PartialEq)]
pub enum Control {
    Seq(Vec<ControlId>),
    /// A straight-line block ending in return, throw or jump
    Block(BlockId),
    /// A block ending in a two-way branch. When `negated`, `then` runs on
    /// the false edge.
    If {
        block: BlockId,
        then: Option<ControlId>,
        otherwise: Option<ControlId>,
        negated: bool,
    },
    /// `while (true)`
    Loop { id: LoopId, body: ControlId },
    /// A block ending in a multi-way branch
    Switch { block: BlockId, arms: Vec<SwitchArm> },
    /// Dispatch on the label variable; falls through when no case matches
    LabelSwitch { cases: Vec<(Vec<BlockId>, ControlId)> },
    Try { body: ControlId, catch: CatchClause },
    Break { label: Option<BlockId>, target: LoopId },
    Continue { label: Option<BlockId>, target: LoopId },
    /// Fall out of the enclosing structure, setting the label if present
    Exit { label: Option<BlockId> },
}

/// Arena of control nodes with a single root
#[derive(Debug, Clone)]
pub struct ControlTree {
    nodes: Vec<Control>,
    root: Option<ControlId>,
    loop_count: u32,
}

impl Default for ControlTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlTree {
    pub fn new() -> Self {
        ControlTree {
            nodes: Vec::new(),
            root: None,
            loop_count: 0,
        }
    }

    pub fn push(&mut self, node: Control) -> ControlId {
        let id = ControlId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn get(&self, id: ControlId) -> Option<&Control> {
        self.nodes.get(id.0 as usize)
    }

    /// Root of the tree; an empty method has an empty `Seq`
    pub fn root(&self) -> Option<ControlId> {
        self.root
    }

    pub fn set_root(&mut self, root: ControlId) {
        self.root = Some(root);
    }

    /// Allocate a fresh loop identity
    pub fn fresh_loop(&mut self) -> LoopId {
        let id = LoopId(self.loop_count);
        self.loop_count += 1;
        id
    }

    pub fn loop_count(&self) -> u32 {
        self.loop_count
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Blocks in depth-first, left-to-right order
    pub fn blocks(&self) -> Vec<BlockId> {
        let mut out = Vec::new();
        if let Some(root) = self.root {
            self.collect_blocks(root, &mut out);
        }
        out
    }

    fn collect_blocks(&self, id: ControlId, out: &mut Vec<BlockId>) {
        let Some(node) = self.get(id) else { return };
        match node {
            Control::Seq(items) => {
                for item in items {
                    self.collect_blocks(*item, out);
                }
            }
            Control::Block(block) => out.push(*block),
            Control::If {
                block,
                then,
                otherwise,
                ..
            } => {
                out.push(*block);
                for arm in [then, otherwise].into_iter().flatten() {
                    self.collect_blocks(*arm, out);
                }
            }
            Control::Loop { body, .. } => self.collect_blocks(*body, out),
            Control::Switch { block, arms } => {
                out.push(*block);
                for arm in arms.iter().filter_map(|a| a.body) {
                    self.collect_blocks(arm, out);
                }
            }
            Control::LabelSwitch { cases } => {
                for (_, body) in cases {
                    self.collect_blocks(*body, out);
                }
            }
            Control::Try { body, catch } => {
                self.collect_blocks(*body, out);
                if let Some(handler) = catch.body {
                    self.collect_blocks(handler, out);
                }
            }
            Control::Break { .. } | Control::Continue { .. } | Control::Exit { .. } => {}
        }
    }

    /// Whether any node reads or writes the label variable
    pub fn uses_label(&self) -> bool {
        self.nodes.iter().any(|node| match node {
            Control::LabelSwitch { .. } => true,
            Control::Break { label, .. }
            | Control::Continue { label, .. }
            | Control::Exit { label } => label.is_some(),
            _ => false,
        })
    }

    fn write_node(&self, f: &mut fmt::Formatter<'_>, id: ControlId, depth: usize) -> fmt::Result {
        let pad = "  ".repeat(depth);
        let Some(node) = self.get(id) else {
            return writeln!(f, "{}<missing {}>", pad, id.0);
        };
        let label = |l: &Option<BlockId>| match l {
            Some(b) => format!(" [$L = {}]", b.as_u32()),
            None => String::new(),
        };
        match node {
            Control::Seq(items) => {
                writeln!(f, "{}seq", pad)?;
                for item in items {
                    self.write_node(f, *item, depth + 1)?;
                }
                Ok(())
            }
            Control::Block(block) => writeln!(f, "{}block {}", pad, block),
            Control::If {
                block,
                then,
                otherwise,
                negated,
            } => {
                writeln!(f, "{}if {}{}", pad, block, if *negated { " (negated)" } else { "" })?;
                if let Some(then) = then {
                    self.write_node(f, *then, depth + 1)?;
                }
                if let Some(otherwise) = otherwise {
                    writeln!(f, "{}else", pad)?;
                    self.write_node(f, *otherwise, depth + 1)?;
                }
                Ok(())
            }
            Control::Loop { id: loop_id, body } => {
                writeln!(f, "{}{}", pad, loop_id)?;
                self.write_node(f, *body, depth + 1)
            }
            Control::Switch { block, arms } => {
                writeln!(f, "{}switch {}", pad, block)?;
                for arm in arms {
                    writeln!(
                        f,
                        "{}case {:?}{}",
                        pad,
                        arm.values,
                        if arm.is_default { " default" } else { "" }
                    )?;
                    if let Some(body) = arm.body {
                        self.write_node(f, body, depth + 1)?;
                    }
                }
                Ok(())
            }
            Control::LabelSwitch { cases } => {
                writeln!(f, "{}label-switch", pad)?;
                for (labels, body) in cases {
                    let labels: Vec<_> = labels.iter().map(|b| b.as_u32()).collect();
                    writeln!(f, "{}case $L in {:?}", pad, labels)?;
                    self.write_node(f, *body, depth + 1)?;
                }
                Ok(())
            }
            Control::Try { body, catch } => {
                writeln!(f, "{}try", pad)?;
                self.write_node(f, *body, depth + 1)?;
                writeln!(f, "{}catch", pad)?;
                if let Some(handler) = catch.body {
                    self.write_node(f, handler, depth + 1)?;
                }
                Ok(())
            }
            Control::Break { label: l, target } => {
                writeln!(f, "{}break {}{}", pad, target, label(l))
            }
            Control::Continue { label: l, target } => {
                writeln!(f, "{}continue {}{}", pad, target, label(l))
            }
            Control::Exit { label: l } => writeln!(f, "{}exit{}", pad, label(l)),
        }
    }
}

impl fmt::Display for ControlTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.root {
            Some(root) => self.write_node(f, root, 0),
            None => writeln!(f, "<empty>"),
        }
    }
}
