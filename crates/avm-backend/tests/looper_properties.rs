//! Structural properties of the looper
//!
//! Whatever the shape of the CFG, every reachable block is emitted exactly
//! once, and executing the tree moves between blocks only along CFG edges.
//! Only multi-entry cycles get a dispatch loop; nested ifs, loops, switches
//! and try/catch never touch the label variable.

use avm_backend::{structure, Backend, BackendConfig, ConstantPool, Control, ControlId, ControlTree, LoopId};
use avm_ir::{BlockId, GraphBuilder, MethodGraph, Terminator};

fn assert_each_block_once(graph: &MethodGraph, tree: &ControlTree) {
    let mut emitted = tree.blocks();
    emitted.sort();
    let expected: Vec<BlockId> = graph.blocks.iter().map(|b| b.id).collect();
    assert_eq!(emitted, expected, "blocks emitted for {}", graph.name);
}

/// Small deterministic generator; graphs must be reproducible across runs
struct Lcg(u64);

impl Lcg {
    fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        self.0 >> 33
    }

    fn below(&mut self, bound: usize) -> usize {
        (self.next() % bound as u64) as usize
    }
}

/// Block `i` always reaches `i + 1`, so every block is reachable; its
/// other successors are arbitrary, producing loops, cross edges and
/// irreducible cycles. The last block returns.
fn random_graph(seed: u64, size: usize) -> MethodGraph {
    let mut rng = Lcg(seed);
    let mut b = GraphBuilder::new(format!("random_{}", seed), 1);
    let cond = b.parameter(0, "p");
    let blocks: Vec<BlockId> = std::iter::once(b.entry_block())
        .chain((1..size).map(|_| b.create_block()))
        .collect();

    for i in 0..size {
        b.switch_to_block(blocks[i]);
        if i + 1 == size {
            b.ret(None);
            continue;
        }
        let next = blocks[i + 1];
        match rng.below(4) {
            0 => b.jump(next),
            1 => {
                let cases = (0..1 + rng.below(3))
                    .map(|value| (value as i32, blocks[rng.below(size)]))
                    .collect();
                b.switch(cond, cases, next);
            }
            _ => {
                let other = blocks[rng.below(size)];
                if other == next {
                    b.jump(next);
                } else if rng.below(2) == 0 {
                    b.branch(cond, next, other);
                } else {
                    b.branch(cond, other, next);
                }
            }
        }
    }
    b.finish()
}

// ============================================================================
// Tree execution
// ============================================================================

/// Blocks visited before a walk stops; generated graphs loop freely
const MAX_VISITS: usize = 256;

enum Outcome {
    Normal,
    Break(LoopId),
    Continue(LoopId),
    Return,
    Halted,
}

/// Executes a control tree the way the printed code runs, choosing branch
/// and switch outcomes at random. Every block entered must be the target
/// of the edge chosen at the previous block. Nothing raises an exception;
/// a throw ends the walk like a return.
struct Walk<'g> {
    graph: &'g MethodGraph,
    tree: &'g ControlTree,
    rng: Lcg,
    label: Option<BlockId>,
    expected: BlockId,
    visits: usize,
    steps: usize,
}

impl<'g> Walk<'g> {
    fn enter(&mut self, block: BlockId) -> &'g Terminator {
        assert_eq!(
            block, self.expected,
            "{}: control reached {} instead of {}\n{}",
            self.graph.name, block, self.expected, self.tree
        );
        self.visits += 1;
        let graph = self.graph;
        &graph.block(block).unwrap().terminator
    }

    fn exec_arm(&mut self, arm: Option<ControlId>) -> Outcome {
        match arm {
            Some(id) => self.exec(id),
            None => Outcome::Normal,
        }
    }

    fn exec(&mut self, id: ControlId) -> Outcome {
        if self.visits >= MAX_VISITS {
            return Outcome::Halted;
        }
        self.steps += 1;
        assert!(
            self.steps <= (MAX_VISITS + 1) * (self.tree.len() + 1),
            "{}: walk makes no progress\n{}",
            self.graph.name,
            self.tree
        );

        let tree = self.tree;
        match tree.get(id).unwrap() {
            Control::Seq(items) => {
                for item in items {
                    match self.exec(*item) {
                        Outcome::Normal => {}
                        other => return other,
                    }
                }
                Outcome::Normal
            }
            Control::Block(block) => match self.enter(*block) {
                Terminator::Jump { target } => {
                    self.expected = *target;
                    Outcome::Normal
                }
                Terminator::Return { .. } | Terminator::Throw { .. } => Outcome::Return,
                other => panic!("block {} ends in {:?}", block, other),
            },
            Control::If {
                block,
                then,
                otherwise,
                negated,
            } => {
                let Terminator::Branch {
                    then_block,
                    else_block,
                    ..
                } = self.enter(*block)
                else {
                    panic!("if on {} without a branch", block);
                };
                let cond = self.rng.below(2) == 0;
                self.expected = if cond { *then_block } else { *else_block };
                let arm = if cond != *negated { *then } else { *otherwise };
                self.exec_arm(arm)
            }
            Control::Switch { block, arms } => {
                let Terminator::Switch { cases, default, .. } = self.enter(*block) else {
                    panic!("switch on {} without a switch terminator", block);
                };
                // One value past the generated cases reaches the default
                let value = self.rng.below(4) as i32;
                self.expected = cases
                    .iter()
                    .find(|(case, _)| *case == value)
                    .map_or(*default, |(_, target)| *target);
                let arm = arms
                    .iter()
                    .find(|arm| arm.values.contains(&value))
                    .or_else(|| arms.iter().find(|arm| arm.is_default))
                    .unwrap_or_else(|| panic!("no arm of {} takes {}", block, value));
                self.exec_arm(arm.body)
            }
            Control::LabelSwitch { cases } => {
                let label = self.label;
                let case = cases
                    .iter()
                    .find(|(labels, _)| label.map_or(false, |l| labels.contains(&l)));
                match case {
                    Some((_, body)) => self.exec(*body),
                    None => Outcome::Normal,
                }
            }
            Control::Loop { id: loop_id, body } => loop {
                match self.exec(*body) {
                    Outcome::Normal => {}
                    Outcome::Continue(target) if target == *loop_id => {}
                    Outcome::Break(target) if target == *loop_id => return Outcome::Normal,
                    other => return other,
                }
            },
            Control::Try { body, .. } => self.exec(*body),
            Control::Break { label, target } => {
                self.label = label.or(self.label);
                Outcome::Break(*target)
            }
            Control::Continue { label, target } => {
                self.label = label.or(self.label);
                Outcome::Continue(*target)
            }
            Control::Exit { label } => {
                self.label = label.or(self.label);
                Outcome::Normal
            }
        }
    }
}

/// Run `graph`'s tree once per seed, checking every transfer against the CFG
fn assert_walks_follow_edges(graph: &MethodGraph, tree: &ControlTree, seeds: std::ops::Range<u64>) {
    let root = tree.root().unwrap();
    for seed in seeds {
        let mut walk = Walk {
            graph,
            tree,
            rng: Lcg(seed),
            label: None,
            expected: graph.entry,
            visits: 0,
            steps: 0,
        };
        match walk.exec(root) {
            Outcome::Return | Outcome::Halted => {}
            Outcome::Normal => panic!("{}: walk {} fell off the end\n{}", graph.name, seed, tree),
            Outcome::Break(target) | Outcome::Continue(target) => {
                panic!("{}: walk {} escaped to {}\n{}", graph.name, seed, target, tree)
            }
        }
    }
}

// ============================================================================
// Fixed shapes
// ============================================================================

mod shapes {
    use super::*;

    fn nested_loops() -> MethodGraph {
        let mut b = GraphBuilder::new("nested", 1);
        let p = b.parameter(0, "p");
        let outer = b.create_block();
        let inner = b.create_block();
        let latch = b.create_block();
        let exit = b.create_block();
        b.jump(outer);
        b.switch_to_block(outer);
        b.branch(p, inner, exit);
        b.switch_to_block(inner);
        b.branch(p, inner, latch);
        b.switch_to_block(latch);
        b.jump(outer);
        b.switch_to_block(exit);
        b.ret(None);
        b.finish()
    }

    fn switch_with_join() -> MethodGraph {
        let mut b = GraphBuilder::new("switch", 1);
        let p = b.parameter(0, "p");
        let a = b.create_block();
        let c = b.create_block();
        let join = b.create_block();
        b.switch(p, vec![(0, a), (1, c), (2, join)], a);
        b.switch_to_block(a);
        b.jump(join);
        b.switch_to_block(c);
        b.jump(join);
        b.switch_to_block(join);
        b.ret(None);
        b.finish()
    }

    /// One arm continues into another arm's target
    fn switch_with_fallthrough() -> MethodGraph {
        let mut b = GraphBuilder::new("fallthrough", 1);
        let p = b.parameter(0, "p");
        let a = b.create_block();
        let c = b.create_block();
        let join = b.create_block();
        b.switch(p, vec![(0, a), (1, c), (2, join)], a);
        b.switch_to_block(a);
        b.jump(c);
        b.switch_to_block(c);
        b.jump(join);
        b.switch_to_block(join);
        b.ret(None);
        b.finish()
    }

    fn nested_ifs() -> MethodGraph {
        let mut b = GraphBuilder::new("nested_ifs", 2);
        let p = b.parameter(0, "p");
        let q = b.parameter(1, "q");
        let inner = b.create_block();
        let body = b.create_block();
        let join = b.create_block();
        b.branch(p, inner, join);
        b.switch_to_block(inner);
        b.branch(q, body, join);
        b.switch_to_block(body);
        b.jump(join);
        b.switch_to_block(join);
        b.ret(None);
        b.finish()
    }

    fn try_inside_loop() -> MethodGraph {
        let mut b = GraphBuilder::new("try_loop", 1);
        let p = b.parameter(0, "p");
        let header = b.create_block();
        let guarded = b.create_block();
        let handler = b.create_block();
        let latch = b.create_block();
        let exit = b.create_block();
        b.jump(header);
        b.switch_to_block(header);
        b.branch(p, guarded, exit);
        b.switch_to_block(guarded);
        b.jump(latch);
        b.switch_to_block(handler);
        b.jump(latch);
        b.switch_to_block(latch);
        b.jump(header);
        b.switch_to_block(exit);
        b.ret(None);
        b.exception_region(guarded, vec![guarded], handler, None);
        b.finish()
    }

    fn irreducible() -> MethodGraph {
        let mut b = GraphBuilder::new("irreducible", 1);
        let p = b.parameter(0, "p");
        let left = b.create_block();
        let right = b.create_block();
        let exit = b.create_block();
        b.branch(p, left, right);
        b.switch_to_block(left);
        b.branch(p, right, exit);
        b.switch_to_block(right);
        b.branch(p, left, exit);
        b.switch_to_block(exit);
        b.ret(None);
        b.finish()
    }

    #[test]
    fn test_every_block_emitted_once() {
        for graph in [
            nested_loops(),
            switch_with_join(),
            switch_with_fallthrough(),
            nested_ifs(),
            try_inside_loop(),
            irreducible(),
        ] {
            let tree = structure(&graph).unwrap();
            assert_each_block_once(&graph, &tree);
        }
    }

    #[test]
    fn test_walks_follow_edges() {
        for graph in [
            nested_loops(),
            switch_with_join(),
            switch_with_fallthrough(),
            nested_ifs(),
            try_inside_loop(),
            irreducible(),
        ] {
            let tree = structure(&graph).unwrap();
            assert_walks_follow_edges(&graph, &tree, 0..50);
        }
    }

    #[test]
    fn test_reducible_shapes_need_no_label() {
        for graph in [nested_loops(), switch_with_join(), nested_ifs(), try_inside_loop()] {
            let tree = structure(&graph).unwrap();
            assert!(!tree.uses_label(), "{} should not dispatch on a label", graph.name);
        }
    }

    #[test]
    fn test_switch_fallthrough_selects_by_label_without_loop() {
        let tree = structure(&switch_with_fallthrough()).unwrap();
        assert!(tree.uses_label());
        assert_eq!(tree.loop_count(), 0);

        let pool = ConstantPool::new();
        let method = Backend::with_pool(BackendConfig::default(), &pool)
            .compile(&switch_with_fallthrough())
            .unwrap();
        assert!(!method.body.contains("while"));
    }

    #[test]
    fn test_irreducible_uses_label() {
        let tree = structure(&irreducible()).unwrap();
        assert!(tree.uses_label());
    }

    #[test]
    fn test_nested_loops_get_distinct_ids() {
        let tree = structure(&nested_loops()).unwrap();
        assert_eq!(tree.loop_count(), 2);
    }
}

// ============================================================================
// Generated graphs
// ============================================================================

mod generated {
    use super::*;

    #[test]
    fn test_random_graphs_structure() {
        for seed in 0..200 {
            let graph = random_graph(seed, 2 + (seed as usize % 12));
            let tree = structure(&graph)
                .unwrap_or_else(|e| panic!("seed {}: {}\n{}", seed, e, graph));
            assert_each_block_once(&graph, &tree);
        }
    }

    #[test]
    fn test_random_graph_walks_follow_edges() {
        for seed in 0..1000 {
            let graph = random_graph(seed, 2 + (seed as usize % 14));
            let tree = structure(&graph).unwrap();
            assert_walks_follow_edges(&graph, &tree, 0..20);
        }
    }

    #[test]
    fn test_random_graphs_compile() {
        let pool = ConstantPool::new();
        let backend = Backend::with_pool(BackendConfig::default(), &pool);
        for seed in 0..100 {
            let graph = random_graph(seed, 3 + (seed as usize % 10));
            let first = backend
                .compile(&graph)
                .unwrap_or_else(|e| panic!("seed {}: {}\n{}", seed, e, graph));
            let second = backend.compile(&graph).unwrap();
            assert_eq!(first, second, "seed {}", seed);
            assert!(first.source.starts_with("function ("));
        }
    }

    #[test]
    fn test_straight_chain_has_no_loops() {
        let mut b = GraphBuilder::new("chain", 0);
        let mut current = b.entry_block();
        for _ in 0..32 {
            let next = b.create_block();
            b.switch_to_block(current);
            b.jump(next);
            current = next;
        }
        b.switch_to_block(current);
        b.ret(None);
        let graph = b.finish();

        let tree = structure(&graph).unwrap();
        assert_eq!(tree.loop_count(), 0);
        assert!(!tree.uses_label());
        assert_each_block_once(&graph, &tree);
    }
}
