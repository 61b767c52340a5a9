//! Shape chain to control tree
//!
//! Walks the shapes produced by the relooper and turns every classified edge
//! into the jump it needs, if any. A break out of a Multiple or Try that is
//! not the structure control naturally falls out of gets a one-shot wrapper
//! loop around that shape to break from.

use avm_ir::{BlockId, CfgError, Terminator};
use rustc_hash::{FxHashMap, FxHashSet};

use super::control::{CatchClause, Control, ControlId, ControlTree, LoopId, SwitchArm};
use super::relooper::{Flow, Relooper, ShapeId, ShapeKind};
use crate::error::{CompileError, CompileResult};

/// Branch arms of a Simple shape: either its fused Multiple's groups or
/// plain flows landing on `landing`
struct Arms<'t> {
    fused: Option<ShapeId>,
    landing: Option<ShapeId>,
    flow_tails: &'t [ShapeId],
    group_tails: &'t [ShapeId],
}

pub(crate) struct Emitter<'a, 'g> {
    relooper: &'a Relooper<'g>,
    tree: ControlTree,
    loop_ids: FxHashMap<ShapeId, LoopId>,
    wrappers: FxHashMap<ShapeId, LoopId>,
}

impl<'a, 'g> Emitter<'a, 'g> {
    pub fn new(relooper: &'a Relooper<'g>) -> Self {
        Emitter {
            relooper,
            tree: ControlTree::new(),
            loop_ids: FxHashMap::default(),
            wrappers: FxHashMap::default(),
        }
    }

    pub fn finish(mut self, root: Option<ShapeId>) -> CompileResult<ControlTree> {
        let items = self.chain(root, &[])?;
        let root = self.seq(items);
        self.tree.set_root(root);
        Ok(self.tree)
    }

    /// Emit a chain of shapes. `tails` are the shapes whose end control
    /// reaches by falling off the end of this chain.
    fn chain(&mut self, first: Option<ShapeId>, tails: &[ShapeId]) -> CompileResult<Vec<ControlId>> {
        let relooper = self.relooper;
        let mut out = Vec::new();
        let mut cursor = first;

        while let Some(id) = cursor {
            let shape = &relooper.shapes[id];
            let next = shape.next;
            let inherited: Vec<ShapeId> = if next.is_none() { tails.to_vec() } else { Vec::new() };

            match &shape.kind {
                ShapeKind::Simple { block } => {
                    if let Some(multiple) = next.filter(|m| relooper.is_fused(*m)) {
                        let after = relooper.shapes[multiple].next;
                        let flow_tails: Vec<ShapeId> =
                            if after.is_none() { tails.to_vec() } else { Vec::new() };
                        let mut group_tails = vec![multiple];
                        group_tails.extend(&flow_tails);
                        let arms = Arms {
                            fused: Some(multiple),
                            landing: after,
                            flow_tails: &flow_tails,
                            group_tails: &group_tails,
                        };
                        let node = self.branching(*block, &arms)?;
                        out.push(self.wrap(multiple, node));
                        cursor = after;
                        continue;
                    }
                    if let Some(node) = self.nested_branch(*block, next, tails)? {
                        out.push(node);
                        break;
                    }
                    out.extend(self.simple(*block, next, &inherited)?);
                }
                ShapeKind::Loop { inner } => {
                    let loop_id = self.loop_id(id);
                    let items = self.chain(*inner, &[])?;
                    let body = self.seq(items);
                    out.push(self.tree.push(Control::Loop { id: loop_id, body }));
                }
                ShapeKind::Multiple { groups, .. } => {
                    let mut case_tails = vec![id];
                    case_tails.extend(&inherited);
                    let mut cases = Vec::with_capacity(groups.len());
                    for &(entry, group) in groups {
                        let items = self.chain(Some(group), &case_tails)?;
                        cases.push((vec![relooper.ids[entry]], self.seq(items)));
                    }
                    let node = self.tree.push(Control::LabelSwitch { cases });
                    out.push(self.wrap(id, node));
                }
                ShapeKind::Try {
                    region,
                    body,
                    handler,
                } => {
                    let mut try_tails = vec![id];
                    try_tails.extend(&inherited);
                    let items = self.chain(*body, &try_tails)?;
                    let body = self.seq(items);

                    let catch_body = match handler {
                        Some(handler) => {
                            let items = self.chain(Some(*handler), &try_tails)?;
                            self.arm(items)
                        }
                        None => {
                            let (entry, handler) = relooper.region_edge(*region);
                            self.flow(entry, handler, next, &try_tails)?
                        }
                    };
                    let variable = relooper
                        .graph
                        .exception_regions
                        .get(*region)
                        .and_then(|r| r.catch_variable);
                    let node = self.tree.push(Control::Try {
                        body,
                        catch: CatchClause {
                            variable,
                            body: catch_body,
                        },
                    });
                    out.push(self.wrap(id, node));
                }
            }
            cursor = next;
        }
        Ok(out)
    }

    /// A Simple shape that is not fused with what follows
    fn simple(
        &mut self,
        block: usize,
        next: Option<ShapeId>,
        tails: &[ShapeId],
    ) -> CompileResult<Vec<ControlId>> {
        let relooper = self.relooper;
        let id = relooper.ids[block];
        match relooper.terminator(block) {
            Terminator::Jump { target } => {
                let target = relooper.position(*target)?;
                let mut items = vec![self.tree.push(Control::Block(id))];
                items.extend(self.flow(block, target, next, tails)?);
                Ok(items)
            }
            Terminator::Branch { .. } | Terminator::Switch { .. } => {
                let arms = Arms {
                    fused: None,
                    landing: next,
                    flow_tails: tails,
                    group_tails: &[],
                };
                Ok(vec![self.branching(block, &arms)?])
            }
            Terminator::Return { .. } | Terminator::Throw { .. } => {
                Ok(vec![self.tree.push(Control::Block(id))])
            }
            Terminator::Unreachable => Err(CompileError::MalformedCfg(CfgError::MissingTerminator(id))),
        }
    }

    /// If or Switch node for a block ending in a branch
    fn branching(&mut self, block: usize, arms: &Arms<'_>) -> CompileResult<ControlId> {
        let relooper = self.relooper;
        let id = relooper.ids[block];
        match relooper.terminator(block) {
            Terminator::Branch {
                then_block,
                else_block,
                ..
            } => {
                let then_target = relooper.position(*then_block)?;
                let else_target = relooper.position(*else_block)?;
                let then = self.arm_for(block, then_target, arms)?;
                let otherwise = self.arm_for(block, else_target, arms)?;
                Ok(self.if_node(id, then, otherwise))
            }
            Terminator::Switch { cases, default, .. } => {
                // One arm per distinct target, in first-appearance order
                let mut order: Vec<BlockId> = Vec::new();
                let mut values: FxHashMap<BlockId, Vec<i32>> = FxHashMap::default();
                let mut seen = FxHashSet::default();
                for &(value, target) in cases {
                    if !seen.insert(value) {
                        continue;
                    }
                    if !order.contains(&target) {
                        order.push(target);
                    }
                    values.entry(target).or_default().push(value);
                }
                if !order.contains(default) {
                    order.push(*default);
                }

                let mut switch_arms = Vec::with_capacity(order.len());
                for target in order {
                    let position = relooper.position(target)?;
                    let body = self.arm_for(block, position, arms)?;
                    switch_arms.push(SwitchArm {
                        values: values.remove(&target).unwrap_or_default(),
                        is_default: target == *default,
                        body,
                    });
                }
                Ok(self.tree.push(Control::Switch {
                    block: id,
                    arms: switch_arms,
                }))
            }
            _ => Err(CompileError::UnexpectedTerminator { block: id }),
        }
    }

    /// A branch with one edge falling into `next` and the other leaving for
    /// a shape the chain falls out to anyway. The rest of the chain moves
    /// into the falling arm, so leaving needs no wrapper loop.
    fn nested_branch(
        &mut self,
        block: usize,
        next: Option<ShapeId>,
        tails: &[ShapeId],
    ) -> CompileResult<Option<ControlId>> {
        let relooper = self.relooper;
        let Some(next) = next else {
            return Ok(None);
        };
        let Terminator::Branch {
            then_block,
            else_block,
            ..
        } = relooper.terminator(block)
        else {
            return Ok(None);
        };
        let then_target = relooper.position(*then_block)?;
        let else_target = relooper.position(*else_block)?;

        let falls = |to: usize| relooper.flows.get(&(block, to)) == Some(&Flow::Direct);
        let leaves = |to: usize| match relooper.flows.get(&(block, to)) {
            Some(Flow::Break(shape)) => {
                !matches!(relooper.shapes[*shape].kind, ShapeKind::Loop { .. }) && tails.contains(shape)
            }
            _ => false,
        };
        let then_falls = if falls(then_target) && leaves(else_target) {
            true
        } else if falls(else_target) && leaves(then_target) {
            false
        } else {
            return Ok(None);
        };

        let items = self.chain(Some(next), tails)?;
        let rest = self.arm(items);
        let leaving = if then_falls { else_target } else { then_target };
        let exit = self.flow(block, leaving, None, tails)?;
        let (then, otherwise) = if then_falls { (rest, exit) } else { (exit, rest) };
        Ok(Some(self.if_node(relooper.ids[block], then, otherwise)))
    }

    /// `if`, negated when only the false arm has code
    fn if_node(&mut self, block: BlockId, then: Option<ControlId>, otherwise: Option<ControlId>) -> ControlId {
        let node = match (then, otherwise) {
            (None, Some(otherwise)) => Control::If {
                block,
                then: Some(otherwise),
                otherwise: None,
                negated: true,
            },
            (then, otherwise) => Control::If {
                block,
                then,
                otherwise,
                negated: false,
            },
        };
        self.tree.push(node)
    }

    fn arm_for(&mut self, block: usize, target: usize, arms: &Arms<'_>) -> CompileResult<Option<ControlId>> {
        let group = arms
            .fused
            .and_then(|multiple| self.relooper.group_of(multiple, target));
        match group {
            Some(group) => {
                let items = self.chain(Some(group), arms.group_tails)?;
                Ok(self.arm(items))
            }
            None => self.flow(block, target, arms.landing, arms.flow_tails),
        }
    }

    /// Jump for edge `from -> to`, if control does not already get there
    fn flow(
        &mut self,
        from: usize,
        to: usize,
        landing: Option<ShapeId>,
        tails: &[ShapeId],
    ) -> CompileResult<Option<ControlId>> {
        let relooper = self.relooper;
        let flow = relooper
            .flows
            .get(&(from, to))
            .copied()
            .ok_or(CompileError::UnclassifiedEdge {
                from: relooper.ids[from],
                to: relooper.ids[to],
            })?;

        let node = match flow {
            Flow::Direct => self.label_for(landing, to).map(|label| Control::Exit { label: Some(label) }),
            Flow::Break(shape) => {
                let label = self.label_for(relooper.shapes[shape].next, to);
                match relooper.shapes[shape].kind {
                    ShapeKind::Loop { .. } => Some(Control::Break {
                        label,
                        target: self.loop_id(shape),
                    }),
                    _ if tails.contains(&shape) => label.map(|label| Control::Exit { label: Some(label) }),
                    _ => Some(Control::Break {
                        label,
                        target: self.wrapper_id(shape),
                    }),
                }
            }
            Flow::Continue(shape) => {
                let label = if relooper.shapes[shape].entries.len() > 1 {
                    Some(relooper.ids[to])
                } else {
                    None
                };
                Some(Control::Continue {
                    label,
                    target: self.loop_id(shape),
                })
            }
        };
        Ok(node.map(|node| self.tree.push(node)))
    }

    /// Label needed to land on `to` in `landing`, which must tell its
    /// entries apart when it has more than one
    fn label_for(&self, landing: Option<ShapeId>, to: usize) -> Option<BlockId> {
        landing
            .filter(|shape| self.relooper.shapes[*shape].entries.len() > 1)
            .map(|_| self.relooper.ids[to])
    }

    fn loop_id(&mut self, shape: ShapeId) -> LoopId {
        if let Some(id) = self.loop_ids.get(&shape) {
            return *id;
        }
        let id = self.tree.fresh_loop();
        self.loop_ids.insert(shape, id);
        id
    }

    fn wrapper_id(&mut self, shape: ShapeId) -> LoopId {
        if let Some(id) = self.wrappers.get(&shape) {
            return *id;
        }
        let id = self.tree.fresh_loop();
        self.wrappers.insert(shape, id);
        id
    }

    /// Enclose `node` in its shape's wrapper loop, if anything breaks to it
    fn wrap(&mut self, shape: ShapeId, node: ControlId) -> ControlId {
        let Some(&id) = self.wrappers.get(&shape) else {
            return node;
        };
        let exit = self.tree.push(Control::Break {
            label: None,
            target: id,
        });
        let body = self.tree.push(Control::Seq(vec![node, exit]));
        self.tree.push(Control::Loop { id, body })
    }

    fn seq(&mut self, items: Vec<ControlId>) -> ControlId {
        if items.len() == 1 {
            items[0]
        } else {
            self.tree.push(Control::Seq(items))
        }
    }

    fn arm(&mut self, items: Vec<ControlId>) -> Option<ControlId> {
        if items.is_empty() {
            None
        } else {
            Some(self.seq(items))
        }
    }
}
