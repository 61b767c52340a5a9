//! Control flow structuring
//!
//! Recovers structured control flow (sequences, conditionals, loops, breaks
//! and continues) from an arbitrary method CFG. Reducible flow maps onto
//! nested loops and branches; irreducible flow is resolved with a label
//! variable that a `LabelSwitch` inside a loop dispatches on.

mod control;
mod emit;
mod relooper;

use avm_ir::{BlockId, MethodGraph};
use rustc_hash::FxHashSet;

pub use control::{CatchClause, Control, ControlId, ControlTree, LoopId, SwitchArm};

use crate::error::CompileResult;
use emit::Emitter;
use relooper::Relooper;

/// Structure the CFG of `graph` into a control tree.
///
/// Every block appears exactly once in the result, and every CFG edge is
/// realized either by falling through or by an explicit jump node.
pub fn structure(graph: &MethodGraph) -> CompileResult<ControlTree> {
    graph.validate()?;

    let mut relooper = Relooper::new(graph)?;
    let root = relooper.run()?;
    check_loop_headers(graph, &relooper.loop_entries());

    let tree = Emitter::new(&relooper).finish(root)?;
    tracing::debug!(
        method = %graph.name,
        blocks = graph.blocks.len(),
        shapes = relooper.shapes.len(),
        loops = tree.loop_count(),
        labels = tree.uses_label(),
        "structured control flow"
    );
    tracing::trace!("control tree of {}:\n{}", graph.name, tree);
    Ok(tree)
}

/// Compare the loops found with the headers the front end declared.
/// Disagreement is expected with irreducible flow and only reported.
fn check_loop_headers(graph: &MethodGraph, found: &[BlockId]) {
    let found: FxHashSet<BlockId> = found.iter().copied().collect();
    for header in &graph.loop_headers {
        if !found.contains(header) {
            tracing::debug!(method = %graph.name, %header, "declared loop header not structured as a loop");
        }
    }
    for header in &found {
        if !graph.loop_headers.is_empty() && !graph.loop_headers.contains(header) {
            tracing::debug!(method = %graph.name, %header, "loop found at undeclared header");
        }
    }
}
