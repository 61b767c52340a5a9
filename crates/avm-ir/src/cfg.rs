//! Control-flow graph of a method
//!
//! Basic blocks hold the scheduled nodes in evaluation order and end in a
//! terminator. The graph is finalized upstream; `validate` is the gate the
//! backend runs before structuring.

use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};

use crate::node::{Node, NodeKind, Variable};
use crate::types::{BlockId, NodeId, VariableId};

/// Errors for graphs that violate the input contract
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CfgError {
    #[error("method has no blocks")]
    Empty,
    #[error("entry block {0} does not exist")]
    UnknownEntry(BlockId),
    #[error("block {0} is defined more than once")]
    DuplicateBlock(BlockId),
    #[error("block {0} is not terminated")]
    MissingTerminator(BlockId),
    #[error("block {block} references non-existent successor {target}")]
    UnknownTarget { block: BlockId, target: BlockId },
    #[error("block {0} is unreachable from the entry")]
    UnreachableBlock(BlockId),
    #[error("reference to non-existent node {0}")]
    UnknownNode(NodeId),
    #[error("reference to non-existent variable {0}")]
    UnknownVariable(VariableId),
    #[error("declared loop header {0} does not exist")]
    UnknownLoopHeader(BlockId),
    #[error("exception region {region} is malformed: {reason}")]
    MalformedRegion { region: usize, reason: String },
    #[error("block {block} is entered from outside exception region {region} other than through its entry")]
    RegionEnteredMidway { region: usize, block: BlockId },
}

/// A basic block: scheduled nodes followed by a terminator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasicBlock {
    pub id: BlockId,
    /// Scheduled nodes, in evaluation order
    #[serde(default)]
    pub nodes: Vec<NodeId>,
    pub terminator: Terminator,
}

impl BasicBlock {
    pub fn new(id: BlockId) -> Self {
        BasicBlock {
            id,
            nodes: Vec::new(),
            terminator: Terminator::Unreachable,
        }
    }

    /// Distinct successor blocks, in terminator order
    pub fn successors(&self) -> Vec<BlockId> {
        let mut succs = Vec::new();
        for target in self.terminator.targets() {
            if !succs.contains(&target) {
                succs.push(target);
            }
        }
        succs
    }

    /// Check if this block is terminated (not unreachable)
    pub fn is_terminated(&self) -> bool {
        !matches!(self.terminator, Terminator::Unreachable)
    }
}

/// How a basic block ends
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Terminator {
    /// Unconditional jump
    Jump { target: BlockId },
    /// Two-way branch on a condition value
    Branch {
        cond: NodeId,
        then_block: BlockId,
        else_block: BlockId,
    },
    /// Multi-way branch on an integer discriminant
    Switch {
        value: NodeId,
        cases: Vec<(i32, BlockId)>,
        default: BlockId,
    },
    /// Return from the method, optionally with a value
    Return { value: Option<NodeId> },
    /// Throw a value
    Throw { value: NodeId },
    /// No terminator set (rejected by validation)
    Unreachable,
}

impl Terminator {
    /// Every edge target, duplicates included
    pub fn targets(&self) -> Vec<BlockId> {
        match self {
            Terminator::Jump { target } => vec![*target],
            Terminator::Branch {
                then_block,
                else_block,
                ..
            } => vec![*then_block, *else_block],
            Terminator::Switch { cases, default, .. } => {
                let mut targets: Vec<_> = cases.iter().map(|(_, block)| *block).collect();
                targets.push(*default);
                targets
            }
            Terminator::Return { .. } | Terminator::Throw { .. } | Terminator::Unreachable => {
                vec![]
            }
        }
    }

    /// Value operands read by the terminator
    pub fn operands(&self) -> Vec<NodeId> {
        match self {
            Terminator::Branch { cond, .. } => vec![*cond],
            Terminator::Switch { value, .. } => vec![*value],
            Terminator::Return { value } => value.iter().copied().collect(),
            Terminator::Throw { value } => vec![*value],
            Terminator::Jump { .. } | Terminator::Unreachable => vec![],
        }
    }
}

/// A protected region with a catch handler
///
/// Control enters the region only through `entry`. An exception raised in
/// any of `blocks` transfers to `handler`, binding the thrown value to
/// `catch_variable` when one is given.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExceptionRegion {
    pub entry: BlockId,
    pub blocks: Vec<BlockId>,
    pub handler: BlockId,
    #[serde(default)]
    pub catch_variable: Option<VariableId>,
}

impl ExceptionRegion {
    pub fn contains(&self, block: BlockId) -> bool {
        self.blocks.contains(&block)
    }
}

/// A method ready for the backend: value graph plus control-flow graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodGraph {
    pub name: String,
    pub parameter_count: u32,
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub variables: Vec<Variable>,
    pub blocks: Vec<BasicBlock>,
    pub entry: BlockId,
    /// Loop headers found by the verifier
    #[serde(default)]
    pub loop_headers: Vec<BlockId>,
    #[serde(default)]
    pub exception_regions: Vec<ExceptionRegion>,
}

impl MethodGraph {
    /// Create an empty graph whose entry will be `BlockId(0)`
    pub fn new(name: impl Into<String>, parameter_count: u32) -> Self {
        MethodGraph {
            name: name.into(),
            parameter_count,
            nodes: Vec::new(),
            variables: Vec::new(),
            blocks: Vec::new(),
            entry: BlockId(0),
            loop_headers: Vec::new(),
            exception_regions: Vec::new(),
        }
    }

    pub fn node(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id.index())
    }

    pub fn variable(&self, id: VariableId) -> Option<&Variable> {
        self.variables.get(id.index())
    }

    pub fn block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.iter().find(|b| b.id == id)
    }

    /// Map from block id to its position in `blocks`
    pub fn block_positions(&self) -> FxHashMap<BlockId, usize> {
        self.blocks
            .iter()
            .enumerate()
            .map(|(pos, block)| (block.id, pos))
            .collect()
    }

    /// Handlers reachable by an exception raised in `block`'s region, keyed
    /// on region entries: control can only be inside a region after passing
    /// its entry, so one edge per region is enough for reachability.
    pub fn exceptional_successors(&self, block: BlockId) -> Vec<BlockId> {
        self.exception_regions
            .iter()
            .filter(|r| r.entry == block)
            .map(|r| r.handler)
            .collect()
    }

    /// Check the input contract. The first violation found is returned.
    pub fn validate(&self) -> Result<(), CfgError> {
        if self.blocks.is_empty() {
            return Err(CfgError::Empty);
        }

        let mut ids = FxHashSet::default();
        for block in &self.blocks {
            if !ids.insert(block.id) {
                return Err(CfgError::DuplicateBlock(block.id));
            }
        }

        if !ids.contains(&self.entry) {
            return Err(CfgError::UnknownEntry(self.entry));
        }

        for block in &self.blocks {
            if !block.is_terminated() {
                return Err(CfgError::MissingTerminator(block.id));
            }
            for target in block.terminator.targets() {
                if !ids.contains(&target) {
                    return Err(CfgError::UnknownTarget {
                        block: block.id,
                        target,
                    });
                }
            }
            for node in block.nodes.iter().chain(block.terminator.operands().iter()) {
                self.check_node(*node)?;
            }
        }

        for node in &self.nodes {
            for operand in node.kind.operands() {
                self.check_node(operand)?;
            }
            if let Some(var) = node.variable {
                self.check_variable(var)?;
            }
            match &node.kind {
                NodeKind::Variable { variable } | NodeKind::Move { to: variable, .. } => {
                    self.check_variable(*variable)?
                }
                _ => {}
            }
        }

        for header in &self.loop_headers {
            if !ids.contains(header) {
                return Err(CfgError::UnknownLoopHeader(*header));
            }
        }

        self.validate_regions(&ids)?;

        // Reachability, with region entries linked to their handlers
        let mut reached = FxHashSet::default();
        let mut stack = vec![self.entry];
        let positions = self.block_positions();
        while let Some(id) = stack.pop() {
            if !reached.insert(id) {
                continue;
            }
            if let Some(&pos) = positions.get(&id) {
                stack.extend(self.blocks[pos].successors());
                stack.extend(self.exceptional_successors(id));
            }
        }
        for block in &self.blocks {
            if !reached.contains(&block.id) {
                return Err(CfgError::UnreachableBlock(block.id));
            }
        }

        Ok(())
    }

    fn check_node(&self, node: NodeId) -> Result<(), CfgError> {
        if node.index() >= self.nodes.len() {
            return Err(CfgError::UnknownNode(node));
        }
        Ok(())
    }

    fn check_variable(&self, var: VariableId) -> Result<(), CfgError> {
        if var.index() >= self.variables.len() {
            return Err(CfgError::UnknownVariable(var));
        }
        Ok(())
    }

    fn validate_regions(&self, ids: &FxHashSet<BlockId>) -> Result<(), CfgError> {
        let malformed = |region: usize, reason: String| CfgError::MalformedRegion { region, reason };

        for (idx, region) in self.exception_regions.iter().enumerate() {
            for block in region.blocks.iter().chain([&region.entry, &region.handler]) {
                if !ids.contains(block) {
                    return Err(malformed(idx, format!("block {} does not exist", block)));
                }
            }
            if !region.contains(region.entry) {
                return Err(malformed(idx, format!("entry {} is not protected", region.entry)));
            }
            if region.contains(region.handler) {
                return Err(malformed(
                    idx,
                    format!("handler {} lies inside the region", region.handler),
                ));
            }
            if let Some(var) = region.catch_variable {
                self.check_variable(var)?;
            }
            let entry_block = self.blocks.iter().find(|b| b.id == region.entry);
            if entry_block.is_some_and(|b| b.successors().contains(&region.handler)) {
                return Err(malformed(
                    idx,
                    format!("entry {} also jumps to handler {}", region.entry, region.handler),
                ));
            }

            if region.contains(self.entry) && region.entry != self.entry {
                return Err(CfgError::RegionEnteredMidway {
                    region: idx,
                    block: self.entry,
                });
            }
            for block in &self.blocks {
                if region.contains(block.id) {
                    continue;
                }
                for succ in block.successors() {
                    if succ != region.entry && region.contains(succ) {
                        return Err(CfgError::RegionEnteredMidway {
                            region: idx,
                            block: succ,
                        });
                    }
                }
            }

            // Exceptional edges count as edges into the region too
            for other in &self.exception_regions {
                let handler = other.handler;
                if region.contains(handler) && handler != region.entry && !region.contains(other.entry) {
                    return Err(CfgError::RegionEnteredMidway {
                        region: idx,
                        block: handler,
                    });
                }
            }

            for (other_idx, other) in self.exception_regions.iter().enumerate().skip(idx + 1) {
                if other.entry == region.entry {
                    return Err(malformed(
                        idx,
                        format!("shares its entry with region {}", other_idx),
                    ));
                }
                let shared = region.blocks.iter().filter(|b| other.contains(**b)).count();
                let nested = shared == region.blocks.len() || shared == other.blocks.len();
                if shared > 0 && !nested {
                    return Err(malformed(
                        idx,
                        format!("partially overlaps region {}", other_idx),
                    ));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::ConstValue;

    fn block(id: u32, terminator: Terminator) -> BasicBlock {
        BasicBlock {
            id: BlockId(id),
            nodes: vec![],
            terminator,
        }
    }

    fn jump(target: u32) -> Terminator {
        Terminator::Jump {
            target: BlockId(target),
        }
    }

    fn ret() -> Terminator {
        Terminator::Return { value: None }
    }

    fn graph(blocks: Vec<BasicBlock>) -> MethodGraph {
        let mut g = MethodGraph::new("test", 0);
        g.nodes.push(Node::new(NodeKind::Constant {
            value: ConstValue::Bool(true),
        }));
        g.blocks = blocks;
        g
    }

    #[test]
    fn test_validate_ok() {
        let g = graph(vec![
            block(0, Terminator::Branch {
                cond: NodeId(0),
                then_block: BlockId(1),
                else_block: BlockId(2),
            }),
            block(1, jump(2)),
            block(2, ret()),
        ]);
        assert_eq!(g.validate(), Ok(()));
    }

    #[test]
    fn test_validate_empty() {
        assert_eq!(graph(vec![]).validate(), Err(CfgError::Empty));
    }

    #[test]
    fn test_validate_missing_terminator() {
        let g = graph(vec![block(0, jump(1)), BasicBlock::new(BlockId(1))]);
        assert_eq!(g.validate(), Err(CfgError::MissingTerminator(BlockId(1))));
    }

    #[test]
    fn test_validate_unknown_target() {
        let g = graph(vec![block(0, jump(5))]);
        assert_eq!(
            g.validate(),
            Err(CfgError::UnknownTarget {
                block: BlockId(0),
                target: BlockId(5)
            })
        );
    }

    #[test]
    fn test_validate_unreachable_block() {
        let g = graph(vec![block(0, ret()), block(1, ret())]);
        assert_eq!(g.validate(), Err(CfgError::UnreachableBlock(BlockId(1))));
    }

    #[test]
    fn test_validate_duplicate_block() {
        let g = graph(vec![block(0, jump(0)), block(0, ret())]);
        assert_eq!(g.validate(), Err(CfgError::DuplicateBlock(BlockId(0))));
    }

    #[test]
    fn test_validate_unknown_node() {
        let g = graph(vec![block(0, Terminator::Return {
            value: Some(NodeId(9)),
        })]);
        assert_eq!(g.validate(), Err(CfgError::UnknownNode(NodeId(9))));
    }

    #[test]
    fn test_validate_unknown_loop_header() {
        let mut g = graph(vec![block(0, ret())]);
        g.loop_headers.push(BlockId(4));
        assert_eq!(g.validate(), Err(CfgError::UnknownLoopHeader(BlockId(4))));
    }

    #[test]
    fn test_handler_reachable_through_region() {
        let mut g = graph(vec![block(0, jump(1)), block(1, ret()), block(2, ret())]);
        g.exception_regions.push(ExceptionRegion {
            entry: BlockId(0),
            blocks: vec![BlockId(0)],
            handler: BlockId(2),
            catch_variable: None,
        });
        assert_eq!(g.validate(), Ok(()));
    }

    #[test]
    fn test_region_entered_midway() {
        let mut g = graph(vec![
            block(0, Terminator::Branch {
                cond: NodeId(0),
                then_block: BlockId(1),
                else_block: BlockId(2),
            }),
            block(1, jump(2)),
            block(2, ret()),
            block(3, ret()),
        ]);
        g.exception_regions.push(ExceptionRegion {
            entry: BlockId(1),
            blocks: vec![BlockId(1), BlockId(2)],
            handler: BlockId(3),
            catch_variable: None,
        });
        assert_eq!(
            g.validate(),
            Err(CfgError::RegionEnteredMidway {
                region: 0,
                block: BlockId(2)
            })
        );
    }

    #[test]
    fn test_region_handler_inside_region() {
        let mut g = graph(vec![block(0, jump(1)), block(1, ret())]);
        g.exception_regions.push(ExceptionRegion {
            entry: BlockId(0),
            blocks: vec![BlockId(0), BlockId(1)],
            handler: BlockId(1),
            catch_variable: None,
        });
        assert!(matches!(
            g.validate(),
            Err(CfgError::MalformedRegion { region: 0, .. })
        ));
    }

    #[test]
    fn test_region_entry_jumping_to_handler() {
        let mut g = graph(vec![block(0, jump(1)), block(1, ret())]);
        g.exception_regions.push(ExceptionRegion {
            entry: BlockId(0),
            blocks: vec![BlockId(0)],
            handler: BlockId(1),
            catch_variable: None,
        });
        assert!(matches!(
            g.validate(),
            Err(CfgError::MalformedRegion { region: 0, .. })
        ));
    }

    #[test]
    fn test_successors_deduplicated() {
        let b = block(0, Terminator::Switch {
            value: NodeId(0),
            cases: vec![(0, BlockId(1)), (1, BlockId(2)), (2, BlockId(1))],
            default: BlockId(2),
        });
        assert_eq!(b.successors(), vec![BlockId(1), BlockId(2)]);
        assert_eq!(b.terminator.targets().len(), 4);
    }
}
