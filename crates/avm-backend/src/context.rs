//! Control-tree compiler
//!
//! A `Context` lives for the compilation of one method. It walks the
//! structured control tree, lowers each block's nodes as it reaches them and
//! keeps the per-method naming state: which variables and parameters were
//! used, which scheduled values need a temporary, whether the label variable
//! is live, and which loops must carry a JS label.

use avm_ir::{BinaryOp, BlockId, CfgError, MethodGraph, Node, NodeId, NodeKind, Terminator, VariableId};
use rustc_hash::{FxHashMap, FxHashSet};

use crate::ast::{Expr, Function, Stmt, SwitchCase};
use crate::config::BackendConfig;
use crate::constants::ConstantPool;
use crate::error::{CompileError, CompileResult};
use crate::looper::{CatchClause, Control, ControlId, ControlTree, LoopId, SwitchArm};
use crate::lower::{lower_statement, lower_use, negate};

/// Statement a plain `break` would bind to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Breakable {
    Loop(LoopId),
    Switch,
}

/// Whether a scheduled value with uses is read back through a temporary
/// rather than recomputed at each use
fn needs_temporary(kind: &NodeKind) -> bool {
    kind.produces_value()
        && !matches!(
            kind,
            NodeKind::Constant { .. }
                | NodeKind::Parameter { .. }
                | NodeKind::This
                | NodeKind::Arguments
                | NodeKind::Phi
        )
}

/// Number of times each node is consumed once inlining is accounted for.
/// Unscheduled nodes are expanded at their use, so their operands count
/// once per expansion site.
fn count_uses(graph: &MethodGraph, scheduled: &FxHashSet<NodeId>) -> FxHashMap<NodeId, u32> {
    let mut pending = Vec::new();
    for block in &graph.blocks {
        for id in &block.nodes {
            if let Some(node) = graph.node(*id) {
                pending.extend(node.kind.operands());
            }
        }
        pending.extend(block.terminator.operands());
    }

    let mut counts: FxHashMap<NodeId, u32> = FxHashMap::default();
    while let Some(id) = pending.pop() {
        let count = counts.entry(id).or_insert(0);
        *count += 1;
        if scheduled.contains(&id) {
            continue;
        }
        if let Some(node) = graph.node(id) {
            debug_assert!(
                *count == 1 || node.kind.is_trivial() || node.variable.is_some(),
                "unscheduled node {} is used more than once without a variable",
                id
            );
            if *count == 1 {
                pending.extend(node.kind.operands());
            }
        }
    }
    counts
}

/// Per-method compilation state
pub struct Context<'a> {
    graph: &'a MethodGraph,
    config: &'a BackendConfig,
    pool: &'a ConstantPool,
    scheduled: FxHashSet<NodeId>,
    temporaries: FxHashMap<NodeId, String>,
    /// Declared names, in first-use order
    declared: Vec<String>,
    declared_names: FxHashSet<String>,
    /// Parameter index → name, once used
    parameters: Vec<Option<String>>,
    label_used: bool,
    breakables: Vec<Breakable>,
    labelled_loops: FxHashSet<LoopId>,
}

impl<'a> Context<'a> {
    pub fn new(graph: &'a MethodGraph, config: &'a BackendConfig, pool: &'a ConstantPool) -> Self {
        let scheduled: FxHashSet<NodeId> = graph
            .blocks
            .iter()
            .flat_map(|b| b.nodes.iter().copied())
            .collect();
        let counts = count_uses(graph, &scheduled);

        let mut temporaries = FxHashMap::default();
        for block in &graph.blocks {
            for id in &block.nodes {
                let Some(node) = graph.node(*id) else { continue };
                let used = counts.get(id).copied().unwrap_or(0) > 0;
                if used && node.variable.is_none() && needs_temporary(&node.kind) {
                    temporaries.insert(*id, format!("{}{}", config.temporary_prefix, id.as_u32()));
                }
            }
        }
        tracing::trace!(
            method = %graph.name,
            scheduled = scheduled.len(),
            temporaries = temporaries.len(),
            "prepared context"
        );

        Context {
            graph,
            config,
            pool,
            scheduled,
            temporaries,
            declared: Vec::new(),
            declared_names: FxHashSet::default(),
            parameters: Vec::new(),
            label_used: false,
            breakables: Vec::new(),
            labelled_loops: FxHashSet::default(),
        }
    }

    pub fn graph(&self) -> &'a MethodGraph {
        self.graph
    }

    pub fn config(&self) -> &'a BackendConfig {
        self.config
    }

    pub fn pool(&self) -> &'a ConstantPool {
        self.pool
    }

    pub fn node(&self, id: NodeId) -> CompileResult<&'a Node> {
        self.graph.node(id).ok_or(CompileError::UnknownNode { node: id })
    }

    /// Whether `id` is placed in a block rather than expanded at its use
    pub fn is_scheduled(&self, id: NodeId) -> bool {
        self.scheduled.contains(&id)
    }

    fn declare(&mut self, name: &str) {
        if self.declared_names.insert(name.to_string()) {
            self.declared.push(name.to_string());
        }
    }

    /// Name of `variable`, declaring it on first use
    pub fn use_variable(&mut self, variable: VariableId) -> CompileResult<String> {
        let name = self
            .graph
            .variable(variable)
            .map(|v| v.name.clone())
            .ok_or(CompileError::UnknownVariable { variable })?;
        self.declare(&name);
        Ok(name)
    }

    /// Name of the parameter at `index`; the first name seen for an index wins
    pub fn use_parameter(&mut self, index: u32, name: &str) -> String {
        let index = index as usize;
        if self.parameters.len() <= index {
            self.parameters.resize(index + 1, None);
        }
        self.parameters[index]
            .get_or_insert_with(|| name.to_string())
            .clone()
    }

    /// Variable holding the value of `id`, if it is read through one.
    ///
    /// Phis always are; other nodes only when they are scheduled, since an
    /// unscheduled node's variable is never written.
    pub fn binding(&mut self, id: NodeId) -> CompileResult<Option<String>> {
        let node = self.node(id)?;
        if let Some(variable) = node.variable {
            if matches!(node.kind, NodeKind::Phi) || self.scheduled.contains(&id) {
                return self.use_variable(variable).map(Some);
            }
        }
        match self.temporaries.get(&id).cloned() {
            Some(name) => {
                self.declare(&name);
                Ok(Some(name))
            }
            None => Ok(None),
        }
    }

    /// Compile the whole tree into the method body
    pub fn compile(&mut self, tree: &ControlTree) -> CompileResult<Vec<Stmt>> {
        let mut out = Vec::new();
        if let Some(root) = tree.root() {
            self.compile_node(tree, root, &mut out)?;
        }
        Ok(out)
    }

    /// Assemble the function: parameter list, then a single `var`
    /// declaration of every name used, then `body`
    pub fn into_function(self, body: Vec<Stmt>) -> Function {
        let count = (self.graph.parameter_count as usize).max(self.parameters.len());
        let params = (0..count)
            .map(|i| match self.parameters.get(i) {
                Some(Some(name)) => name.clone(),
                _ => format!("{}{}", self.config.unused_parameter_prefix, i),
            })
            .collect();

        let mut names = Vec::with_capacity(self.declared.len() + 1);
        if self.label_used {
            names.push(self.config.label_variable.clone());
        }
        names.extend(self.declared);

        let mut statements = Vec::with_capacity(body.len() + 1);
        if !names.is_empty() {
            statements.push(Stmt::Var(names));
        }
        statements.extend(body);
        Function {
            params,
            body: statements,
        }
    }

    fn control(tree: &ControlTree, id: ControlId) -> CompileResult<&Control> {
        tree.get(id).ok_or_else(|| CompileError::InternalError {
            message: format!("control node {} does not exist", id.0),
        })
    }

    fn compile_arm(&mut self, tree: &ControlTree, arm: Option<ControlId>) -> CompileResult<Vec<Stmt>> {
        let mut out = Vec::new();
        if let Some(arm) = arm {
            self.compile_node(tree, arm, &mut out)?;
        }
        Ok(out)
    }

    fn compile_node(&mut self, tree: &ControlTree, id: ControlId, out: &mut Vec<Stmt>) -> CompileResult<()> {
        match Self::control(tree, id)? {
            Control::Seq(items) => {
                for item in items {
                    self.compile_node(tree, *item, out)?;
                }
            }
            Control::Block(block) => self.compile_block(*block, out)?,
            Control::If {
                block,
                then,
                otherwise,
                negated,
            } => {
                let terminator = self.block_body(*block, out)?;
                let Terminator::Branch { cond, .. } = terminator else {
                    return Err(CompileError::UnexpectedTerminator { block: *block });
                };
                let test = lower_use(self, *cond)?;
                let test = if *negated { negate(test) } else { test };
                let consequent = self.compile_arm(tree, *then)?;
                let alternate = self.compile_arm(tree, *otherwise)?;
                out.push(Stmt::If {
                    test,
                    consequent,
                    alternate: if alternate.is_empty() { None } else { Some(alternate) },
                });
            }
            Control::Loop { id: loop_id, body } => {
                self.breakables.push(Breakable::Loop(*loop_id));
                let mut statements = Vec::new();
                self.compile_node(tree, *body, &mut statements)?;
                self.breakables.pop();

                let stmt = Stmt::While {
                    test: Expr::boolean(true),
                    body: statements,
                };
                if self.labelled_loops.contains(loop_id) {
                    out.push(Stmt::Labeled {
                        label: self.loop_label(*loop_id),
                        body: Box::new(stmt),
                    });
                } else {
                    out.push(stmt);
                }
            }
            Control::Switch { block, arms } => self.compile_switch(tree, *block, arms, out)?,
            Control::LabelSwitch { cases } => {
                self.label_used = true;
                let mut compiled = Vec::with_capacity(cases.len());
                for (labels, body) in cases {
                    let test = labels
                        .iter()
                        .map(|label| Expr::binary(BinaryOp::StrictEqual, self.label_expr(), label_value(*label)))
                        .reduce(|a, b| Expr::binary(BinaryOp::Or, a, b));
                    let mut statements = Vec::new();
                    self.compile_node(tree, *body, &mut statements)?;
                    if let Some(test) = test {
                        compiled.push((test, statements));
                    }
                }
                let mut chain: Option<Vec<Stmt>> = None;
                for (test, consequent) in compiled.into_iter().rev() {
                    chain = Some(vec![Stmt::If {
                        test,
                        consequent,
                        alternate: chain,
                    }]);
                }
                out.extend(chain.unwrap_or_default());
            }
            Control::Try { body, catch } => self.compile_try(tree, *body, catch, out)?,
            Control::Break { label, target } => {
                self.set_label(*label, out);
                out.push(self.break_statement(*target)?);
            }
            Control::Continue { label, target } => {
                self.set_label(*label, out);
                out.push(self.continue_statement(*target)?);
            }
            Control::Exit { label } => self.set_label(*label, out),
        }
        Ok(())
    }

    /// Statements of the block's scheduled nodes; returns its terminator
    fn block_body(&mut self, id: BlockId, out: &mut Vec<Stmt>) -> CompileResult<&'a Terminator> {
        let block = self.graph.block(id).ok_or_else(|| CompileError::InternalError {
            message: format!("block {} does not exist", id),
        })?;
        for node in &block.nodes {
            if let Some(stmt) = lower_statement(self, *node)? {
                out.push(stmt);
            }
        }
        Ok(&block.terminator)
    }

    fn compile_block(&mut self, id: BlockId, out: &mut Vec<Stmt>) -> CompileResult<()> {
        match self.block_body(id, out)? {
            Terminator::Return { value } => {
                let value = value.map(|v| lower_use(self, v)).transpose()?;
                out.push(Stmt::Return(value));
            }
            Terminator::Throw { value } => out.push(Stmt::Throw(lower_use(self, *value)?)),
            Terminator::Jump { .. } => {}
            Terminator::Branch { .. } | Terminator::Switch { .. } => {
                return Err(CompileError::UnexpectedTerminator { block: id })
            }
            Terminator::Unreachable => return Err(CfgError::MissingTerminator(id).into()),
        }
        Ok(())
    }

    fn compile_switch(
        &mut self,
        tree: &ControlTree,
        block: BlockId,
        arms: &[SwitchArm],
        out: &mut Vec<Stmt>,
    ) -> CompileResult<()> {
        let Terminator::Switch { value, .. } = self.block_body(block, out)? else {
            return Err(CompileError::UnexpectedTerminator { block });
        };
        let discriminant = lower_use(self, *value)?;

        self.breakables.push(Breakable::Switch);
        let mut cases = Vec::new();
        for arm in arms {
            let mut body = self.compile_arm(tree, arm.body)?;
            if !body.last().is_some_and(Stmt::is_jump) {
                body.push(Stmt::Break(None));
            }
            let mut tests: Vec<Option<Expr>> = arm.values.iter().map(|v| Some(Expr::number(*v as f64))).collect();
            if arm.is_default {
                tests.push(None);
            }
            let last = tests.len().saturating_sub(1);
            for (i, test) in tests.into_iter().enumerate() {
                let body = if i == last { std::mem::take(&mut body) } else { Vec::new() };
                cases.push(SwitchCase { test, body });
            }
        }
        self.breakables.pop();

        out.push(Stmt::Switch { discriminant, cases });
        Ok(())
    }

    fn compile_try(
        &mut self,
        tree: &ControlTree,
        body: ControlId,
        catch: &CatchClause,
        out: &mut Vec<Stmt>,
    ) -> CompileResult<()> {
        let mut block = Vec::new();
        self.compile_node(tree, body, &mut block)?;

        let param = self.config.exception_variable.clone();
        let mut handler = Vec::new();
        if let Some(variable) = catch.variable {
            let name = self.use_variable(variable)?;
            handler.push(Stmt::Expr(Expr::assign(Expr::Identifier(name), Expr::ident(param.as_str()))));
        }
        handler.extend(self.compile_arm(tree, catch.body)?);
        out.push(Stmt::Try { block, param, handler });
        Ok(())
    }

    fn label_expr(&self) -> Expr {
        Expr::ident(self.config.label_variable.as_str())
    }

    fn set_label(&mut self, label: Option<BlockId>, out: &mut Vec<Stmt>) {
        if let Some(label) = label {
            self.label_used = true;
            out.push(Stmt::Expr(Expr::assign(self.label_expr(), label_value(label))));
        }
    }

    fn loop_label(&self, id: LoopId) -> String {
        format!("{}{}", self.config.loop_label_prefix, id.0)
    }

    fn encloses(&self, target: LoopId) -> bool {
        self.breakables.contains(&Breakable::Loop(target))
    }

    fn break_statement(&mut self, target: LoopId) -> CompileResult<Stmt> {
        if self.breakables.last() == Some(&Breakable::Loop(target)) {
            return Ok(Stmt::Break(None));
        }
        if !self.encloses(target) {
            return Err(CompileError::InvalidJumpTarget { target });
        }
        self.labelled_loops.insert(target);
        Ok(Stmt::Break(Some(self.loop_label(target))))
    }

    fn continue_statement(&mut self, target: LoopId) -> CompileResult<Stmt> {
        let innermost = self.breakables.iter().rev().find_map(|b| match b {
            Breakable::Loop(id) => Some(*id),
            Breakable::Switch => None,
        });
        if innermost == Some(target) {
            return Ok(Stmt::Continue(None));
        }
        if !self.encloses(target) {
            return Err(CompileError::InvalidJumpTarget { target });
        }
        self.labelled_loops.insert(target);
        Ok(Stmt::Continue(Some(self.loop_label(target))))
    }
}

fn label_value(block: BlockId) -> Expr {
    Expr::number(block.as_u32() as f64)
}
