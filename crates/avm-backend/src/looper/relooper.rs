//! Shape calculation
//!
//! Recursively partitions a set of blocks, given the entries control can
//! arrive at, into a chain of shapes:
//!
//! - Simple: one entry that cannot reach itself
//! - Loop: entries that can reach themselves; the body is every block that
//!   can get back to an entry
//! - Multiple: entries that own an independent group of blocks (reachable
//!   from that entry and from no other)
//! - Try: the entry of a not yet structured exception region
//!
//! Every CFG edge is classified exactly once as a `Flow`. Reachability only
//! follows unclassified edges, and every edge leaving the block set of a
//! recursive call is classified before the call, so each call sees a
//! self-contained subgraph. A multi-entry cycle ends up as a Loop whose body
//! is a Multiple; that is where label dispatch comes from.

use std::collections::BTreeSet;

use avm_ir::{BlockId, CfgError, MethodGraph, Terminator};
use rustc_hash::FxHashMap;

use crate::error::{CompileError, CompileResult};

pub(crate) type ShapeId = usize;
pub(crate) type BlockSet = BTreeSet<usize>;

/// How control travels along an edge once structured
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    /// Falls into the next shape (or into a fused branch arm)
    Direct,
    /// Leaves the given shape, landing in its `next`
    Break(ShapeId),
    /// Back to the head of the given loop shape
    Continue(ShapeId),
}

#[derive(Debug)]
pub(crate) enum ShapeKind {
    Simple {
        block: usize,
    },
    Loop {
        inner: Option<ShapeId>,
    },
    /// `fused` when the preceding Simple branches straight into the groups,
    /// which then become that branch's arms
    Multiple {
        groups: Vec<(usize, ShapeId)>,
        fused: bool,
    },
    Try {
        region: usize,
        body: Option<ShapeId>,
        handler: Option<ShapeId>,
    },
}

#[derive(Debug)]
pub(crate) struct Shape {
    pub kind: ShapeKind,
    /// Blocks control can arrive at when entering this shape
    pub entries: Vec<usize>,
    pub next: Option<ShapeId>,
}

struct Region {
    entry: usize,
    blocks: BlockSet,
    handler: usize,
}

/// Block positions are indices into `MethodGraph::blocks`
pub(crate) struct Relooper<'g> {
    pub graph: &'g MethodGraph,
    pub ids: Vec<BlockId>,
    positions: FxHashMap<BlockId, usize>,
    succs: Vec<Vec<usize>>,
    regions: Vec<Region>,
    /// Region whose entry is the block
    region_at: Vec<Option<usize>>,
    structured: Vec<bool>,
    pub flows: FxHashMap<(usize, usize), Flow>,
    pub shapes: Vec<Shape>,
}

fn push_unique(list: &mut Vec<usize>, item: usize) {
    if !list.contains(&item) {
        list.push(item);
    }
}

impl<'g> Relooper<'g> {
    /// Index the graph. The graph must already be validated.
    pub fn new(graph: &'g MethodGraph) -> CompileResult<Self> {
        let positions = graph.block_positions();
        let ids: Vec<BlockId> = graph.blocks.iter().map(|b| b.id).collect();
        let lookup = |id: BlockId| -> CompileResult<usize> {
            positions
                .get(&id)
                .copied()
                .ok_or(CompileError::MalformedCfg(CfgError::UnknownEntry(id)))
        };

        let mut succs = Vec::with_capacity(graph.blocks.len());
        for block in &graph.blocks {
            let mut list = Vec::new();
            for target in block.successors() {
                list.push(lookup(target)?);
            }
            succs.push(list);
        }

        let mut regions = Vec::with_capacity(graph.exception_regions.len());
        let mut region_at = vec![None; graph.blocks.len()];
        for (idx, region) in graph.exception_regions.iter().enumerate() {
            let entry = lookup(region.entry)?;
            let mut blocks = BlockSet::new();
            for b in &region.blocks {
                blocks.insert(lookup(*b)?);
            }
            region_at[entry] = Some(idx);
            regions.push(Region {
                entry,
                blocks,
                handler: lookup(region.handler)?,
            });
        }

        Ok(Relooper {
            graph,
            ids,
            positions,
            succs,
            structured: vec![false; regions.len()],
            regions,
            region_at,
            flows: FxHashMap::default(),
            shapes: Vec::new(),
        })
    }

    /// Structure the whole method, returning the first shape of the chain
    pub fn run(&mut self) -> CompileResult<Option<ShapeId>> {
        let entry = self.position(self.graph.entry)?;
        let all: BlockSet = (0..self.ids.len()).collect();
        let root = self.calculate(all, vec![entry])?;

        for from in 0..self.ids.len() {
            for to in self.out_edges(from) {
                if !self.is_processed(from, to) {
                    return Err(CompileError::UnclassifiedEdge {
                        from: self.ids[from],
                        to: self.ids[to],
                    });
                }
            }
        }
        Ok(root)
    }

    pub fn position(&self, id: BlockId) -> CompileResult<usize> {
        self.positions
            .get(&id)
            .copied()
            .ok_or(CompileError::MalformedCfg(CfgError::UnknownEntry(id)))
    }

    pub fn terminator(&self, block: usize) -> &'g Terminator {
        &self.graph.blocks[block].terminator
    }

    /// Entry and handler of a region
    pub fn region_edge(&self, region: usize) -> (usize, usize) {
        (self.regions[region].entry, self.regions[region].handler)
    }

    pub fn is_fused(&self, shape: ShapeId) -> bool {
        matches!(self.shapes[shape].kind, ShapeKind::Multiple { fused: true, .. })
    }

    /// Group of a Multiple entered at `entry`
    pub fn group_of(&self, shape: ShapeId, entry: usize) -> Option<ShapeId> {
        match &self.shapes[shape].kind {
            ShapeKind::Multiple { groups, .. } => {
                groups.iter().find(|(e, _)| *e == entry).map(|(_, g)| *g)
            }
            _ => None,
        }
    }

    /// Entries of the loop shapes found, for comparison with declared headers
    pub fn loop_entries(&self) -> Vec<BlockId> {
        let mut out = Vec::new();
        for shape in &self.shapes {
            if let ShapeKind::Loop { .. } = shape.kind {
                out.extend(shape.entries.iter().map(|e| self.ids[*e]));
            }
        }
        out
    }

    /// Normal successors plus the exceptional edge of a region entry
    fn out_edges(&self, block: usize) -> Vec<usize> {
        let mut edges = self.succs[block].clone();
        if let Some(region) = self.region_at[block] {
            push_unique(&mut edges, self.regions[region].handler);
        }
        edges
    }

    fn is_processed(&self, from: usize, to: usize) -> bool {
        self.flows.contains_key(&(from, to))
    }

    fn classify(&mut self, from: usize, to: usize, flow: Flow) {
        let previous = self.flows.insert((from, to), flow);
        debug_assert!(previous.is_none(), "edge {} -> {} classified twice", from, to);
    }

    /// Blocks reachable from `starts` (inclusive) over unclassified edges
    fn reach(&self, starts: &[usize], within: &BlockSet) -> BlockSet {
        let mut seen = BlockSet::new();
        let mut stack: Vec<usize> = starts.iter().copied().filter(|s| within.contains(s)).collect();
        while let Some(block) = stack.pop() {
            if !seen.insert(block) {
                continue;
            }
            for succ in self.out_edges(block) {
                if within.contains(&succ) && !self.is_processed(block, succ) && !seen.contains(&succ) {
                    stack.push(succ);
                }
            }
        }
        seen
    }

    fn reaches_itself(&self, entry: usize, within: &BlockSet) -> bool {
        let starts: Vec<usize> = self
            .out_edges(entry)
            .into_iter()
            .filter(|s| !self.is_processed(entry, *s))
            .collect();
        self.reach(&starts, within).contains(&entry)
    }

    /// Blocks in `within` that can reach one of `targets` (targets included)
    fn reaching(&self, targets: &[usize], within: &BlockSet) -> BlockSet {
        let mut preds: FxHashMap<usize, Vec<usize>> = FxHashMap::default();
        for &block in within {
            for succ in self.out_edges(block) {
                if within.contains(&succ) && !self.is_processed(block, succ) {
                    preds.entry(succ).or_default().push(block);
                }
            }
        }
        let mut seen = BlockSet::new();
        let mut stack: Vec<usize> = targets.to_vec();
        while let Some(block) = stack.pop() {
            if !seen.insert(block) {
                continue;
            }
            if let Some(list) = preds.get(&block) {
                stack.extend(list.iter().copied().filter(|p| !seen.contains(p)));
            }
        }
        seen
    }

    fn pending_region(&self, block: usize) -> Option<usize> {
        self.region_at[block].filter(|r| !self.structured[*r])
    }

    fn internal(&self, message: String) -> CompileError {
        CompileError::InternalError {
            message: format!("{}: {}", self.graph.name, message),
        }
    }

    fn calculate(&mut self, blocks: BlockSet, entries: Vec<usize>) -> CompileResult<Option<ShapeId>> {
        let mut blocks = blocks;
        let mut entries = entries;
        let mut first = None;
        let mut prev: Option<ShapeId> = None;

        while !entries.is_empty() {
            let (shape, rest, next_entries) = self.make_shape(blocks, entries)?;
            match prev {
                Some(p) => {
                    self.shapes[p].next = Some(shape);
                    self.try_fuse(p, shape);
                }
                None => first = Some(shape),
            }
            prev = Some(shape);
            blocks = rest;
            entries = next_entries;
        }

        if let Some(&stray) = blocks.iter().next() {
            return Err(self.internal(format!("block {} was left unstructured", self.ids[stray])));
        }
        Ok(first)
    }

    fn make_shape(
        &mut self,
        blocks: BlockSet,
        entries: Vec<usize>,
    ) -> CompileResult<(ShapeId, BlockSet, Vec<usize>)> {
        if let [entry] = entries[..] {
            if self.reaches_itself(entry, &blocks) {
                return self.make_loop(blocks, entries);
            }
            if let Some(region) = self.pending_region(entry) {
                return self.make_try(blocks, entry, region);
            }
            return self.make_simple(blocks, entry);
        }

        let groups = self.independent_groups(&blocks, &entries);
        if groups.is_empty() {
            self.make_loop(blocks, entries)
        } else {
            self.make_multiple(blocks, entries, groups)
        }
    }

    fn try_fuse(&mut self, prev: ShapeId, shape: ShapeId) {
        let branches = match self.shapes[prev].kind {
            ShapeKind::Simple { block } => matches!(
                self.terminator(block),
                Terminator::Branch { .. } | Terminator::Switch { .. }
            ),
            _ => false,
        };
        if let ShapeKind::Multiple { fused, .. } = &mut self.shapes[shape].kind {
            *fused = branches;
        }
    }

    fn new_shape(&mut self, kind: ShapeKind, entries: Vec<usize>) -> ShapeId {
        self.shapes.push(Shape {
            kind,
            entries,
            next: None,
        });
        self.shapes.len() - 1
    }

    /// Classify every unclassified edge leaving `inner` as a break out of
    /// `shape`, collecting the targets into `next_entries`
    fn break_out(
        &mut self,
        shape: ShapeId,
        inner: &BlockSet,
        blocks: &BlockSet,
        next_entries: &mut Vec<usize>,
    ) -> CompileResult<()> {
        for &block in inner {
            for succ in self.out_edges(block) {
                if inner.contains(&succ) || self.is_processed(block, succ) {
                    continue;
                }
                if !blocks.contains(&succ) {
                    return Err(self.internal(format!(
                        "edge {} -> {} escapes its region",
                        self.ids[block], self.ids[succ]
                    )));
                }
                self.classify(block, succ, Flow::Break(shape));
                push_unique(next_entries, succ);
            }
        }
        Ok(())
    }

    fn make_simple(
        &mut self,
        blocks: BlockSet,
        entry: usize,
    ) -> CompileResult<(ShapeId, BlockSet, Vec<usize>)> {
        let shape = self.new_shape(ShapeKind::Simple { block: entry }, vec![entry]);
        let mut next_entries = Vec::new();
        for succ in self.out_edges(entry) {
            if self.is_processed(entry, succ) {
                continue;
            }
            if !blocks.contains(&succ) {
                return Err(self.internal(format!(
                    "edge {} -> {} escapes its region",
                    self.ids[entry], self.ids[succ]
                )));
            }
            self.classify(entry, succ, Flow::Direct);
            push_unique(&mut next_entries, succ);
        }
        let mut rest = blocks;
        rest.remove(&entry);
        Ok((shape, rest, next_entries))
    }

    fn make_loop(
        &mut self,
        blocks: BlockSet,
        entries: Vec<usize>,
    ) -> CompileResult<(ShapeId, BlockSet, Vec<usize>)> {
        let mut inner = self.reaching(&entries, &blocks);

        // A try nested in the loop body keeps all of its protected blocks
        loop {
            let mut grew = false;
            let pending: Vec<usize> = inner
                .iter()
                .filter_map(|b| self.pending_region(*b))
                .collect();
            for region in pending {
                for &b in &self.regions[region].blocks {
                    if !blocks.contains(&b) {
                        return Err(CompileError::RegionSplit {
                            entry: self.ids[self.regions[region].entry],
                        });
                    }
                    grew |= inner.insert(b);
                }
            }
            if !grew {
                break;
            }
        }

        let shape = self.new_shape(ShapeKind::Loop { inner: None }, entries.clone());
        for &block in &inner {
            for succ in self.out_edges(block) {
                if entries.contains(&succ) && !self.is_processed(block, succ) {
                    self.classify(block, succ, Flow::Continue(shape));
                }
            }
        }
        let mut next_entries = Vec::new();
        self.break_out(shape, &inner, &blocks, &mut next_entries)?;

        let rest: BlockSet = blocks.difference(&inner).copied().collect();
        let body = self.calculate(inner, entries)?;
        self.shapes[shape].kind = ShapeKind::Loop { inner: body };
        Ok((shape, rest, next_entries))
    }

    /// Entries whose reachable set no other entry can get into
    fn independent_groups(&self, blocks: &BlockSet, entries: &[usize]) -> Vec<(usize, BlockSet)> {
        let reaches: Vec<BlockSet> = entries.iter().map(|e| self.reach(&[*e], blocks)).collect();
        let mut groups = Vec::new();
        for (i, &entry) in entries.iter().enumerate() {
            let shared = |b: &usize| reaches.iter().enumerate().any(|(j, r)| j != i && r.contains(b));
            if shared(&entry) {
                continue;
            }
            let group: BlockSet = reaches[i].iter().copied().filter(|b| !shared(b)).collect();
            groups.push((entry, group));
        }
        groups
    }

    fn make_multiple(
        &mut self,
        blocks: BlockSet,
        entries: Vec<usize>,
        groups: Vec<(usize, BlockSet)>,
    ) -> CompileResult<(ShapeId, BlockSet, Vec<usize>)> {
        let shape = self.new_shape(
            ShapeKind::Multiple {
                groups: Vec::new(),
                fused: false,
            },
            entries.clone(),
        );

        let mut next_entries: Vec<usize> = entries
            .iter()
            .copied()
            .filter(|e| !groups.iter().any(|(g, _)| g == e))
            .collect();
        let mut rest = blocks.clone();
        for (_, group) in &groups {
            self.break_out(shape, group, &blocks, &mut next_entries)?;
            for b in group {
                rest.remove(b);
            }
        }

        let mut handled = Vec::with_capacity(groups.len());
        for (entry, group) in groups {
            if let Some(inner) = self.calculate(group, vec![entry])? {
                handled.push((entry, inner));
            }
        }
        self.shapes[shape].kind = ShapeKind::Multiple {
            groups: handled,
            fused: false,
        };
        Ok((shape, rest, next_entries))
    }

    fn make_try(
        &mut self,
        blocks: BlockSet,
        entry: usize,
        region: usize,
    ) -> CompileResult<(ShapeId, BlockSet, Vec<usize>)> {
        let body = self.regions[region].blocks.clone();
        if !body.is_subset(&blocks) {
            return Err(CompileError::RegionSplit {
                entry: self.ids[entry],
            });
        }
        self.structured[region] = true;
        let handler = self.regions[region].handler;

        let shape = self.new_shape(
            ShapeKind::Try {
                region,
                body: None,
                handler: None,
            },
            vec![entry],
        );

        let outside: BlockSet = blocks.difference(&body).copied().collect();
        let mut exits = Vec::new();
        for &block in &body {
            for succ in self.out_edges(block) {
                let own_edge = block == entry && succ == handler;
                if !own_edge && !body.contains(&succ) && !self.is_processed(block, succ) {
                    push_unique(&mut exits, succ);
                }
            }
        }

        let mut next_entries = Vec::new();
        let mut handler_group = None;
        if !self.is_processed(entry, handler) {
            if !outside.contains(&handler) {
                return Err(self.internal(format!(
                    "handler {} is outside the region being structured",
                    self.ids[handler]
                )));
            }
            let normal = self.reach(&exits, &outside);
            let group: BlockSet = self
                .reach(&[handler], &outside)
                .difference(&normal)
                .copied()
                .collect();
            if group.contains(&handler) {
                self.classify(entry, handler, Flow::Direct);
                handler_group = Some(group);
            } else {
                // Handler shares code with the normal path
                self.classify(entry, handler, Flow::Break(shape));
                push_unique(&mut next_entries, handler);
            }
        }

        self.break_out(shape, &body, &blocks, &mut next_entries)?;
        let mut rest = outside;
        if let Some(group) = &handler_group {
            self.break_out(shape, group, &blocks, &mut next_entries)?;
            for b in group {
                rest.remove(b);
            }
        }

        let body_shape = self.calculate(body, vec![entry])?;
        let handler_shape = match handler_group {
            Some(group) => self.calculate(group, vec![handler])?,
            None => None,
        };
        self.shapes[shape].kind = ShapeKind::Try {
            region,
            body: body_shape,
            handler: handler_shape,
        };
        Ok((shape, rest, next_entries))
    }
}
