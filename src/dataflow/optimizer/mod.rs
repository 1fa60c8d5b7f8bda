//! Graph rewrites run to a fixpoint before assembly.

mod facet;
mod passes;

use petgraph::stable_graph::NodeIndex;
use tracing::{debug, instrument};

use crate::core::CompileContext;
use crate::dataflow::graph::DataflowGraph;
use crate::error::CompileError;

pub use self::facet::FACET_SCALE_PREFIX;
pub use self::passes::*;

/// Upper bound on full runs of the pass list per phase.
pub const MAX_OPTIMIZATION_RUNS: usize = 5;

/// Where a bottom-up walk goes after visiting a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Stop,
    /// Continue with the node's parent as it was before the visit.
    Continue,
    /// Visit this node next.
    Visit(NodeIndex),
}

/// A rewrite that starts at each leaf and walks towards the root.
pub trait BottomUpOptimizer {
    fn run(
        &mut self,
        g: &mut DataflowGraph,
        cx: &mut CompileContext,
        node: NodeIndex,
        mutated: &mut bool,
    ) -> Result<Step, CompileError>;

    /// Clears per-walk state; called before every leaf.
    fn reset(&mut self) {}

    fn optimize(&mut self, g: &mut DataflowGraph, cx: &mut CompileContext) -> Result<bool, CompileError> {
        let mut mutated = false;
        for leaf in g.leaves() {
            self.reset();
            let mut current = Some(leaf);
            while let Some(node) = current {
                if !g.contains(node) || g.node(node).is_data_source() {
                    break;
                }
                let parent = g.parent(node);
                current = match self.run(g, cx, node, &mut mutated)? {
                    Step::Stop => None,
                    Step::Continue => parent,
                    Step::Visit(next) => Some(next),
                };
            }
        }
        Ok(mutated)
    }
}

/// A rewrite that starts at each root and recurses into children.
pub trait TopDownOptimizer {
    fn run(
        &mut self,
        g: &mut DataflowGraph,
        cx: &mut CompileContext,
        node: NodeIndex,
        mutated: &mut bool,
    ) -> Result<(), CompileError>;

    fn optimize(&mut self, g: &mut DataflowGraph, cx: &mut CompileContext) -> Result<bool, CompileError> {
        let mut mutated = false;
        for root in g.sources.clone() {
            if g.contains(root) {
                self.run(g, cx, root, &mut mutated)?;
            }
        }
        Ok(mutated)
    }
}

/// Facts about the compiled views that the passes need.
#[derive(Debug, Clone, Copy, Default)]
pub struct OptimizeOptions {
    /// Some point selection needs stable row identifiers.
    pub requires_selection_id: bool,
}

/// Sources that feed nothing are dropped.
fn prune_roots(g: &mut DataflowGraph) {
    for root in g.sources.clone() {
        if g.num_children(root) == 0 {
            g.remove(root);
        }
    }
}

/// Runs the whole pass list once. Returns whether anything changed.
#[instrument(skip_all)]
pub fn run_passes(
    g: &mut DataflowGraph,
    cx: &mut CompileContext,
    options: OptimizeOptions,
) -> Result<bool, CompileError> {
    let mut mutated = false;

    mutated |= RemoveUnnecessaryOutputNodes.optimize(g, cx)?;
    mutated |= RemoveUnnecessaryIdentifierNodes {
        requires_selection_id: options.requires_selection_id,
    }
    .optimize(g, cx)?;
    prune_roots(g);
    mutated |= RemoveUnusedSubtrees.optimize(g, cx)?;
    prune_roots(g);
    mutated |= MoveParseUp.optimize(g, cx)?;
    mutated |= MergeBins.optimize(g, cx)?;
    mutated |= MergeParse.optimize(g, cx)?;
    mutated |= MergeAggregates.optimize(g, cx)?;
    mutated |= MergeTimeUnits.optimize(g, cx)?;
    mutated |= RemoveDuplicateTimeUnits::default().optimize(g, cx)?;
    mutated |= MergeIdenticalNodes.optimize(g, cx)?;
    mutated |= MergeOutputs.optimize(g, cx)?;

    debug!(mutated, nodes = g.node_count(), "optimizer pass list");
    Ok(mutated)
}

/// Repeats `pass_list` until nothing changes or the bound is hit, warning
/// once when the bound is hit.
fn run_to_fixpoint(
    g: &mut DataflowGraph,
    cx: &mut CompileContext,
    mut pass_list: impl FnMut(&mut DataflowGraph, &mut CompileContext) -> Result<bool, CompileError>,
) -> Result<(), CompileError> {
    for _ in 0..MAX_OPTIMIZATION_RUNS {
        if !pass_list(g, cx)? {
            return Ok(());
        }
    }
    cx.warn_once(format!(
        "Maximum optimization runs ({MAX_OPTIMIZATION_RUNS}) reached."
    ));
    Ok(())
}

/// Optimizes the whole forest: fixpoint, facet move-down, fixpoint, then a
/// structural check.
#[instrument(skip_all)]
pub fn optimize(
    g: &mut DataflowGraph,
    cx: &mut CompileContext,
    options: OptimizeOptions,
) -> Result<(), CompileError> {
    g.validate()?;

    run_to_fixpoint(g, cx, |g, cx| run_passes(g, cx, options))?;
    facet::move_facets_down(g, cx)?;
    run_to_fixpoint(g, cx, |g, cx| run_passes(g, cx, options))?;

    g.validate()
}
