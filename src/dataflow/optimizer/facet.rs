//! Moves facet boundaries below the computation they do not depend on, and
//! keeps a global copy of the per-cell subtree for shared scales.

use petgraph::stable_graph::NodeIndex;
use tracing::debug;

use crate::core::CompileContext;
use crate::dataflow::graph::DataflowGraph;
use crate::dataflow::node::Node;
use crate::dataflow::nodes::OutputKind;
use crate::error::CompileError;

/// Prefix of the global copies of faceted outputs.
pub const FACET_SCALE_PREFIX: &str = "scale_";

pub fn move_facets_down(g: &mut DataflowGraph, cx: &mut CompileContext) -> Result<(), CompileError> {
    for root in g.sources.clone() {
        visit(g, cx, root)?;
    }
    Ok(())
}

fn visit(g: &mut DataflowGraph, cx: &mut CompileContext, node: NodeIndex) -> Result<(), CompileError> {
    if !matches!(g.node(node), Node::Facet(_)) {
        for child in g.children(node) {
            visit(g, cx, child)?;
        }
        return Ok(());
    }
    let Node::Facet(facet) = g.node(node) else {
        return Ok(());
    };
    let fields = facet.fields();
    let main = facet.main.clone();

    // Stop at a fork or at an output.
    loop {
        let [child] = g.children(node)[..] else {
            break;
        };
        if matches!(g.node(child), Node::Output(_)) {
            break;
        }
        g.node_mut(child).add_dimensions(&fields);
        g.swap_with_parent(child)?;
    }

    let Some(&main) = g.outputs.get(&main) else {
        debug!(facet = %main, "faceted model has no main output");
        return Ok(());
    };
    move_main_down(g, main)?;

    let mut copies = Vec::new();
    for child in g.children(node) {
        copies.extend(clone_subtree(g, cx, child, &fields));
    }
    for copy in copies {
        g.attach(copy, main, None);
    }
    Ok(())
}

/// Moves the main output down until it sits right above the facet.
fn move_main_down(g: &mut DataflowGraph, main: NodeIndex) -> Result<(), CompileError> {
    if !matches!(g.node(main), Node::Output(o) if o.kind == OutputKind::Main) {
        return Ok(());
    }
    loop {
        let [child] = g.children(main)[..] else {
            break;
        };
        if matches!(g.node(child), Node::Facet(_)) {
            break;
        }
        g.swap_with_parent(child)?;
    }
    Ok(())
}

/// Parentless copies of the subtree at `node`, without facet nodes. Copied
/// grouping nodes also group by the facet fields.
fn clone_subtree(
    g: &mut DataflowGraph,
    cx: &mut CompileContext,
    node: NodeIndex,
    fields: &[String],
) -> Vec<NodeIndex> {
    let children = g.children(node);
    if matches!(g.node(node), Node::Facet(_)) {
        let mut out = Vec::new();
        for child in children {
            out.extend(clone_subtree(g, cx, child, fields));
        }
        return out;
    }

    let copy = g.clone_node(cx, node);
    let registered = match g.node_mut(copy) {
        Node::Output(output) => {
            output.source = format!("{FACET_SCALE_PREFIX}{}", output.source);
            output.kind = OutputKind::Scale;
            Some(output.source.clone())
        }
        other => {
            other.add_dimensions(fields);
            None
        }
    };
    if let Some(name) = registered {
        g.outputs.insert(name, copy);
    }

    for child in children {
        for grandchild in clone_subtree(g, cx, child, fields) {
            g.attach(grandchild, copy, None);
        }
    }
    vec![copy]
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::dataflow::nodes::*;

    fn facet_node() -> Node {
        Node::Facet(FacetNode {
            id: 7,
            main: "main".into(),
            name: "facet".into(),
            row: Some(FacetChannel {
                name: "row_domain".into(),
                fields: vec!["g".into()],
                sort: None,
            }),
            column: None,
            facet: None,
            child_independent_fields: BTreeMap::new(),
            data: None,
        })
    }

    #[test]
    fn test_facet_moves_below_aggregate() {
        let mut g = DataflowGraph::new();
        let mut cx = CompileContext::default();
        let s = g.add(Node::Source(SourceNode::values(json!([]))), None);
        let main = g.add(Node::Output(OutputNode::new("main", OutputKind::Main, 0)), Some(s));
        g.outputs.insert("main".into(), main);
        let facet = g.add(facet_node(), Some(main));
        let mut aggregate = AggregateNode::default();
        aggregate.add_dimensions(&["k".to_string()]);
        aggregate.add_measure(None, "count", "__count".into());
        let agg = g.add(Node::Aggregate(aggregate), Some(facet));
        let cell = g.add(Node::Output(OutputNode::new("cell", OutputKind::Main, 1)), Some(agg));
        g.outputs.insert("cell".into(), cell);

        move_facets_down(&mut g, &mut cx).unwrap();
        g.validate().unwrap();

        assert_eq!(g.children(s), vec![agg]);
        assert_eq!(g.children(agg), vec![main]);
        let Node::Aggregate(moved) = g.node(agg) else { unreachable!() };
        assert_eq!(moved.dimensions, BTreeSet::from(["g".to_string(), "k".to_string()]));

        let children = g.children(main);
        assert_eq!(children.len(), 2);
        assert_eq!(children[0], facet);
        assert_eq!(g.children(facet), vec![cell]);

        let copy = g.outputs["scale_cell"];
        assert_eq!(children[1], copy);
        let Node::Output(output) = g.node(copy) else { unreachable!() };
        assert_eq!(output.name, "cell");
        assert_eq!(output.kind, OutputKind::Scale);
    }

    #[test]
    fn test_grouping_nodes_in_copies_gain_facet_fields() {
        let mut g = DataflowGraph::new();
        let mut cx = CompileContext::default();
        let s = g.add(Node::Source(SourceNode::values(json!([]))), None);
        let main = g.add(Node::Output(OutputNode::new("main", OutputKind::Main, 0)), Some(s));
        g.outputs.insert("main".into(), main);
        let facet = g.add(facet_node(), Some(main));
        let mut aggregate = AggregateNode::default();
        aggregate.add_measure(Some("b"), "sum", "sum_b".into());
        let left = g.add(Node::Aggregate(aggregate), Some(facet));
        let right = g.add(Node::Output(OutputNode::new("other", OutputKind::Main, 1)), Some(facet));

        move_facets_down(&mut g, &mut cx).unwrap();
        g.validate().unwrap();

        assert_eq!(g.children(facet), vec![left, right]);
        let copies = g.children(main);
        assert_eq!(copies.len(), 3);
        let Node::Aggregate(copied) = g.node(copies[1]) else { unreachable!() };
        assert_eq!(copied.dimensions, BTreeSet::from(["g".to_string()]));
        let Node::Aggregate(original) = g.node(left) else { unreachable!() };
        assert!(original.dimensions.is_empty());
    }
}
