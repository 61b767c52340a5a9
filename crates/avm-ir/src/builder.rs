//! Graph builder helpers
//!
//! Utilities for constructing method graphs by hand, used by tests,
//! benchmarks and embedders that produce graphs without the verifier.

use crate::cfg::{BasicBlock, ExceptionRegion, MethodGraph, Terminator};
use crate::node::{BinaryOp, ConstValue, Node, NodeKind, UnaryOp, Variable};
use crate::types::{BlockId, NodeId, VariableId};

/// Builder that simplifies method graph construction
pub struct GraphBuilder {
    graph: MethodGraph,
    current_block: BlockId,
}

impl GraphBuilder {
    /// Create a builder with an empty entry block
    pub fn new(name: impl Into<String>, parameter_count: u32) -> Self {
        let mut graph = MethodGraph::new(name, parameter_count);
        graph.blocks.push(BasicBlock::new(BlockId(0)));
        GraphBuilder {
            graph,
            current_block: BlockId(0),
        }
    }

    /// The entry block
    pub fn entry_block(&self) -> BlockId {
        self.graph.entry
    }

    /// Create a new basic block
    pub fn create_block(&mut self) -> BlockId {
        let id = BlockId(self.graph.blocks.len() as u32);
        self.graph.blocks.push(BasicBlock::new(id));
        id
    }

    /// Switch to emitting into a different block
    pub fn switch_to_block(&mut self, block: BlockId) {
        self.current_block = block;
    }

    /// Get the current block ID
    pub fn current_block(&self) -> BlockId {
        self.current_block
    }

    /// Declare a named variable
    pub fn variable(&mut self, name: impl Into<String>) -> VariableId {
        let id = VariableId(self.graph.variables.len() as u32);
        self.graph.variables.push(Variable { name: name.into() });
        id
    }

    /// Add an unscheduled node; it is inlined at its single use
    pub fn node(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.graph.nodes.len() as u32);
        self.graph.nodes.push(Node::new(kind));
        id
    }

    /// Add a node and schedule it at the end of the current block
    pub fn emit(&mut self, kind: NodeKind) -> NodeId {
        let id = self.node(kind);
        self.current_mut().nodes.push(id);
        id
    }

    /// Schedule a node whose result is stored in `variable`
    pub fn emit_into(&mut self, variable: VariableId, kind: NodeKind) -> NodeId {
        let id = self.emit(kind);
        self.bind(id, variable);
        id
    }

    /// Bind a node's result to a variable
    pub fn bind(&mut self, node: NodeId, variable: VariableId) {
        if let Some(n) = self.graph.nodes.get_mut(node.index()) {
            n.variable = Some(variable);
        }
    }

    pub fn parameter(&mut self, index: u32, name: impl Into<String>) -> NodeId {
        self.node(NodeKind::Parameter {
            index,
            name: name.into(),
        })
    }

    pub fn constant(&mut self, value: ConstValue) -> NodeId {
        self.node(NodeKind::Constant { value })
    }

    pub fn number(&mut self, value: f64) -> NodeId {
        self.constant(ConstValue::Number(value))
    }

    pub fn string(&mut self, value: impl Into<String>) -> NodeId {
        self.constant(ConstValue::String(value.into()))
    }

    pub fn boolean(&mut self, value: bool) -> NodeId {
        self.constant(ConstValue::Bool(value))
    }

    /// Read of a variable
    pub fn read(&mut self, variable: VariableId) -> NodeId {
        self.node(NodeKind::Variable { variable })
    }

    /// A phi bound to `variable`; its inputs arrive through `move_to`
    pub fn phi(&mut self, variable: VariableId) -> NodeId {
        let id = self.node(NodeKind::Phi);
        self.bind(id, variable);
        id
    }

    pub fn binary(&mut self, op: BinaryOp, left: NodeId, right: NodeId) -> NodeId {
        self.node(NodeKind::Binary { op, left, right })
    }

    pub fn unary(&mut self, op: UnaryOp, argument: NodeId) -> NodeId {
        self.node(NodeKind::Unary { op, argument })
    }

    /// Emit `to = from` into the current block
    pub fn move_to(&mut self, to: VariableId, from: NodeId) -> NodeId {
        self.emit(NodeKind::Move { to, from })
    }

    /// Set the terminator for the current block
    pub fn terminate(&mut self, terminator: Terminator) {
        self.current_mut().terminator = terminator;
    }

    pub fn jump(&mut self, target: BlockId) {
        self.terminate(Terminator::Jump { target });
    }

    pub fn branch(&mut self, cond: NodeId, then_block: BlockId, else_block: BlockId) {
        self.terminate(Terminator::Branch {
            cond,
            then_block,
            else_block,
        });
    }

    pub fn switch(&mut self, value: NodeId, cases: Vec<(i32, BlockId)>, default: BlockId) {
        self.terminate(Terminator::Switch {
            value,
            cases,
            default,
        });
    }

    pub fn ret(&mut self, value: Option<NodeId>) {
        self.terminate(Terminator::Return { value });
    }

    pub fn throw(&mut self, value: NodeId) {
        self.terminate(Terminator::Throw { value });
    }

    /// Record a loop header found by the verifier
    pub fn loop_header(&mut self, block: BlockId) {
        if !self.graph.loop_headers.contains(&block) {
            self.graph.loop_headers.push(block);
        }
    }

    /// Protect `blocks` (entered through `entry`) with `handler`
    pub fn exception_region(
        &mut self,
        entry: BlockId,
        blocks: Vec<BlockId>,
        handler: BlockId,
        catch_variable: Option<VariableId>,
    ) {
        self.graph.exception_regions.push(ExceptionRegion {
            entry,
            blocks,
            handler,
            catch_variable,
        });
    }

    /// Finish building and return the graph
    pub fn finish(self) -> MethodGraph {
        self.graph
    }

    fn current_mut(&mut self) -> &mut BasicBlock {
        let pos = self.current_block.as_u32() as usize;
        &mut self.graph.blocks[pos]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_diamond() {
        let mut b = GraphBuilder::new("max", 1);
        let x = b.parameter(0, "x");
        let zero = b.number(0.0);
        let cond = b.binary(BinaryOp::Greater, x, zero);
        let then_block = b.create_block();
        let else_block = b.create_block();
        b.branch(cond, then_block, else_block);

        b.switch_to_block(then_block);
        let one = b.number(1.0);
        b.ret(Some(one));

        b.switch_to_block(else_block);
        let two = b.number(2.0);
        b.ret(Some(two));

        let graph = b.finish();
        assert_eq!(graph.blocks.len(), 3);
        assert_eq!(graph.entry, BlockId(0));
        assert_eq!(graph.blocks[0].successors(), vec![then_block, else_block]);
        assert!(graph.blocks[0].nodes.is_empty());
        assert_eq!(graph.validate(), Ok(()));
    }

    #[test]
    fn test_emit_schedules_into_current_block() {
        let mut b = GraphBuilder::new("f", 0);
        let v = b.variable("a");
        let this = b.emit_into(v, NodeKind::This);
        b.ret(None);

        let graph = b.finish();
        assert_eq!(graph.blocks[0].nodes, vec![this]);
        assert_eq!(graph.nodes[this.index()].variable, Some(v));
        assert_eq!(graph.variables[0].name, "a");
    }
}
