use std::collections::BTreeMap;

use petgraph::stable_graph::NodeIndex;

use super::{BottomUpOptimizer, Step, TopDownOptimizer};
use crate::core::{CompileContext, Hash32};
use crate::dataflow::graph::DataflowGraph;
use crate::dataflow::node::Node;
use crate::dataflow::nodes::ParseNode;
use crate::error::CompileError;

fn is_output(g: &DataflowGraph, index: NodeIndex) -> bool {
    matches!(g.node(index), Node::Output(_))
}

/// Merges the bins of `other` into `keep`, recording signal renames, and
/// moves `other`'s children under `keep`.
fn merge_bin_into(g: &mut DataflowGraph, keep: NodeIndex, other: NodeIndex) {
    let Node::Bin(theirs) = g.node(other).clone() else {
        return;
    };
    let mut renames = std::mem::take(&mut g.signal_renames);
    if let Node::Bin(ours) = g.node_mut(keep) {
        ours.merge(theirs, &mut renames);
    }
    g.signal_renames = renames;
    g.absorb(keep, other);
}

/// Drops outputs nobody requested.
pub struct RemoveUnnecessaryOutputNodes;

impl TopDownOptimizer for RemoveUnnecessaryOutputNodes {
    fn run(
        &mut self,
        g: &mut DataflowGraph,
        cx: &mut CompileContext,
        node: NodeIndex,
        mutated: &mut bool,
    ) -> Result<(), CompileError> {
        let children = g.children(node);
        if let Node::Output(output) = g.node(node)
            && g.ref_count(&output.name) == 0
        {
            g.remove(node);
            *mutated = true;
        }
        for child in children {
            self.run(g, cx, child, mutated)?;
        }
        Ok(())
    }
}

/// Drops identifier nodes unless a selection needs them and they sit right
/// below a node whose rows are stable.
pub struct RemoveUnnecessaryIdentifierNodes {
    pub requires_selection_id: bool,
}

impl TopDownOptimizer for RemoveUnnecessaryIdentifierNodes {
    fn run(
        &mut self,
        g: &mut DataflowGraph,
        cx: &mut CompileContext,
        node: NodeIndex,
        mutated: &mut bool,
    ) -> Result<(), CompileError> {
        let children = g.children(node);
        if matches!(g.node(node), Node::Identifier) {
            let anchored = g.parent(node).is_some_and(|p| {
                let parent = g.node(p);
                parent.is_data_source() || matches!(parent, Node::Aggregate(_) | Node::Parse(_))
            });
            if !(self.requires_selection_id && anchored) {
                g.remove(node);
                *mutated = true;
            }
        }
        for child in children {
            self.run(g, cx, child, mutated)?;
        }
        Ok(())
    }
}

/// Removes leaves that feed no output.
pub struct RemoveUnusedSubtrees;

impl BottomUpOptimizer for RemoveUnusedSubtrees {
    fn run(
        &mut self,
        g: &mut DataflowGraph,
        _cx: &mut CompileContext,
        node: NodeIndex,
        mutated: &mut bool,
    ) -> Result<Step, CompileError> {
        if g.num_children(node) > 0 || matches!(g.node(node), Node::Output(_) | Node::Facet(_)) {
            return Ok(Step::Stop);
        }
        g.remove(node);
        *mutated = true;
        Ok(Step::Continue)
    }
}

/// Moves parse nodes towards the source, merging adjacent ones.
pub struct MoveParseUp;

impl BottomUpOptimizer for MoveParseUp {
    fn run(
        &mut self,
        g: &mut DataflowGraph,
        cx: &mut CompileContext,
        node: NodeIndex,
        mutated: &mut bool,
    ) -> Result<Step, CompileError> {
        let Node::Parse(parse) = g.node(node) else {
            return Ok(Step::Continue);
        };
        let Some(parent) = g.parent(node) else {
            return Ok(Step::Stop);
        };
        if g.node(parent).is_data_source() {
            return Ok(Step::Stop);
        }
        if g.num_children(parent) > 1 {
            return Ok(Step::Continue);
        }

        if matches!(g.node(parent), Node::Parse(_)) {
            let parse = parse.clone();
            if let Node::Parse(target) = g.node_mut(parent) {
                target.merge(cx, &parse);
            }
            g.remove(node);
            *mutated = true;
            return Ok(Step::Visit(parent));
        }

        let needs = parse.fields();
        let blocked = g
            .node(parent)
            .produced_fields()
            .is_none_or(|produced| !produced.is_disjoint(&needs));
        if blocked {
            return Ok(Step::Continue);
        }

        g.swap_with_parent(node)?;
        *mutated = true;
        Ok(Step::Visit(node))
    }
}

/// Pulls bins above their parent and merges sibling bins.
pub struct MergeBins;

impl BottomUpOptimizer for MergeBins {
    fn run(
        &mut self,
        g: &mut DataflowGraph,
        _cx: &mut CompileContext,
        node: NodeIndex,
        mutated: &mut bool,
    ) -> Result<Step, CompileError> {
        let Some(parent) = g.parent(node) else {
            return Ok(Step::Stop);
        };
        let parent_node = g.node(parent);
        let move_up = !(parent_node.is_data_source()
            || matches!(parent_node, Node::Filter(_) | Node::Parse(_) | Node::Identifier));
        let produced = parent_node.produced_fields();

        let mut promotable = Vec::new();
        let mut remaining = Vec::new();
        for child in g.children(parent) {
            if !matches!(g.node(child), Node::Bin(_)) {
                continue;
            }
            let independent = produced
                .as_ref()
                .is_some_and(|p| p.is_disjoint(&g.node(child).dependent_fields()));
            if move_up && independent {
                promotable.push(child);
            } else {
                remaining.push(child);
            }
        }

        if let Some((&keep, rest)) = promotable.split_first() {
            for other in rest {
                merge_bin_into(g, keep, *other);
            }
            if matches!(g.node(parent), Node::Bin(_)) {
                merge_bin_into(g, parent, keep);
            } else {
                g.swap_with_parent(keep)?;
            }
            *mutated = true;
        }

        if let Some((&keep, rest)) = remaining.split_first()
            && !rest.is_empty()
        {
            for other in rest {
                merge_bin_into(g, keep, *other);
            }
            *mutated = true;
        }

        Ok(Step::Continue)
    }
}

/// Hoists the coercions shared by sibling parse nodes above the fork.
pub struct MergeParse;

impl BottomUpOptimizer for MergeParse {
    fn run(
        &mut self,
        g: &mut DataflowGraph,
        cx: &mut CompileContext,
        node: NodeIndex,
        mutated: &mut bool,
    ) -> Result<Step, CompileError> {
        let Some(parent) = g.parent(node) else {
            return Ok(Step::Stop);
        };
        let children = g.children(parent);
        let parses: Vec<&ParseNode> = children
            .iter()
            .filter_map(|c| match g.node(*c) {
                Node::Parse(p) => Some(p),
                _ => None,
            })
            .collect();
        if children.len() <= 1 || parses.is_empty() {
            return Ok(Step::Continue);
        }

        let mut common: BTreeMap<String, String> = BTreeMap::new();
        let mut conflicting = Vec::new();
        for parse in &parses {
            for (field, kind) in &parse.parse {
                match common.get(field) {
                    None => {
                        common.insert(field.clone(), kind.clone());
                    }
                    Some(existing) if existing != kind => conflicting.push(field.clone()),
                    Some(_) => {}
                }
            }
        }
        for field in conflicting {
            if common.remove(&field).is_some() {
                cx.warn_once(format!(
                    "Field \"{field}\" is parsed differently by sibling views; each keeps its own parse."
                ));
            }
        }
        if common.is_empty() {
            return Ok(Step::Continue);
        }

        let merged = g.add(Node::Parse(ParseNode::new(common.clone())), Some(parent));
        for child in children {
            g.set_parent(child, merged);
            if let Node::Parse(p) = g.node_mut(child) {
                p.parse.retain(|field, _| !common.contains_key(field));
                if p.parse.is_empty() {
                    g.remove(child);
                }
            }
        }
        *mutated = true;
        Ok(Step::Continue)
    }
}

/// Merges sibling aggregates with the same grouping.
pub struct MergeAggregates;

impl BottomUpOptimizer for MergeAggregates {
    fn run(
        &mut self,
        g: &mut DataflowGraph,
        _cx: &mut CompileContext,
        node: NodeIndex,
        mutated: &mut bool,
    ) -> Result<Step, CompileError> {
        let Some(parent) = g.parent(node) else {
            return Ok(Step::Stop);
        };
        let mut groups: BTreeMap<String, Vec<NodeIndex>> = BTreeMap::new();
        for child in g.children(parent) {
            if let Node::Aggregate(a) = g.node(child) {
                groups.entry(a.groupby_key()).or_default().push(child);
            }
        }

        for group in groups.into_values() {
            let Some((&keep, rest)) = group.split_first() else {
                continue;
            };
            for &other in rest {
                let Node::Aggregate(theirs) = g.node(other).clone() else {
                    continue;
                };
                let merged = match g.node_mut(keep) {
                    Node::Aggregate(ours) => ours.merge(&theirs),
                    _ => false,
                };
                if merged {
                    g.absorb(keep, other);
                    *mutated = true;
                }
            }
        }
        Ok(Step::Continue)
    }
}

/// Merges sibling time unit nodes.
pub struct MergeTimeUnits;

impl BottomUpOptimizer for MergeTimeUnits {
    fn run(
        &mut self,
        g: &mut DataflowGraph,
        _cx: &mut CompileContext,
        node: NodeIndex,
        mutated: &mut bool,
    ) -> Result<Step, CompileError> {
        let Some(parent) = g.parent(node) else {
            return Ok(Step::Stop);
        };
        let units: Vec<NodeIndex> = g
            .children(parent)
            .into_iter()
            .filter(|c| matches!(g.node(*c), Node::TimeUnit(_)))
            .collect();
        // Nodes that conflict with every earlier one start a group of their own.
        let mut kept: Vec<NodeIndex> = Vec::new();
        for other in units {
            let Node::TimeUnit(theirs) = g.node(other).clone() else {
                continue;
            };
            let target = kept.iter().copied().find(|&keep| match g.node_mut(keep) {
                Node::TimeUnit(ours) => ours.merge(&theirs),
                _ => false,
            });
            match target {
                Some(keep) => {
                    g.absorb(keep, other);
                    *mutated = true;
                }
                None => kept.push(other),
            }
        }
        Ok(Step::Continue)
    }
}

/// Drops time unit formulas an ancestor already computes.
#[derive(Default)]
pub struct RemoveDuplicateTimeUnits {
    /// Time unit nodes seen below the current node on this walk.
    seen: Vec<NodeIndex>,
}

impl BottomUpOptimizer for RemoveDuplicateTimeUnits {
    fn run(
        &mut self,
        g: &mut DataflowGraph,
        _cx: &mut CompileContext,
        node: NodeIndex,
        mutated: &mut bool,
    ) -> Result<Step, CompileError> {
        let Node::TimeUnit(ancestor) = g.node(node) else {
            return Ok(Step::Continue);
        };
        let produced = ancestor.produced_fields();

        let mut kept = Vec::new();
        for below in std::mem::take(&mut self.seen) {
            if !g.contains(below) {
                continue;
            }
            let emptied = match g.node_mut(below) {
                Node::TimeUnit(unit) => {
                    if unit.remove_formulas(&produced) {
                        *mutated = true;
                    }
                    unit.formulas.is_empty()
                }
                _ => false,
            };
            if emptied {
                g.remove(below);
            } else {
                kept.push(below);
            }
        }
        kept.push(node);
        self.seen = kept;
        Ok(Step::Continue)
    }

    fn reset(&mut self) {
        self.seen.clear();
    }
}

/// Merges structurally identical siblings.
pub struct MergeIdenticalNodes;

impl TopDownOptimizer for MergeIdenticalNodes {
    fn run(
        &mut self,
        g: &mut DataflowGraph,
        cx: &mut CompileContext,
        node: NodeIndex,
        mutated: &mut bool,
    ) -> Result<(), CompileError> {
        let mut buckets: Vec<(Hash32, Vec<NodeIndex>)> = Vec::new();
        for child in g.children(node) {
            let hash = g.node(child).hash();
            match buckets.iter_mut().find(|(h, _)| *h == hash) {
                Some((_, bucket)) => bucket.push(child),
                None => buckets.push((hash, vec![child])),
            }
        }
        for (_, bucket) in buckets {
            if let Some((&keep, rest)) = bucket.split_first() {
                for &other in rest {
                    g.absorb(keep, other);
                    *mutated = true;
                }
            }
        }
        for child in g.children(node) {
            self.run(g, cx, child, mutated)?;
        }
        Ok(())
    }
}

/// Chains sibling outputs and moves the other siblings below the chain, so a
/// fork with outputs produces one dataset instead of several copies.
pub struct MergeOutputs;

impl BottomUpOptimizer for MergeOutputs {
    fn run(
        &mut self,
        g: &mut DataflowGraph,
        _cx: &mut CompileContext,
        node: NodeIndex,
        mutated: &mut bool,
    ) -> Result<Step, CompileError> {
        let Some(parent) = g.parent(node) else {
            return Ok(Step::Stop);
        };
        let children = g.children(parent);
        if children.len() <= 1 || !children.iter().any(|c| is_output(g, *c)) {
            return Ok(Step::Continue);
        }

        let mut end: Option<NodeIndex> = None;
        let mut others = Vec::new();
        for child in children {
            if !is_output(g, child) {
                others.push(child);
                continue;
            }
            let mut last = child;
            loop {
                match g.children(last).as_slice() {
                    [only] if is_output(g, *only) => last = *only,
                    _ => break,
                }
            }
            others.extend(g.children(last));
            if let Some(end) = end {
                g.set_parent(child, end);
                *mutated = true;
            }
            end = Some(last);
        }

        if let Some(end) = end {
            for other in others {
                if g.parent(other) != Some(end) {
                    g.set_parent(other, end);
                    *mutated = true;
                }
            }
        }
        Ok(Step::Continue)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, BTreeSet};

    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::dataflow::nodes::*;
    use crate::spec::encoding::{TimeUnitParams, normalize_bin};

    fn source(g: &mut DataflowGraph) -> NodeIndex {
        g.add(Node::Source(SourceNode::values(json!([{"a": 1}]))), None)
    }

    fn output(g: &mut DataflowGraph, name: &str, parent: NodeIndex, id: u64) -> NodeIndex {
        let index = g.add(Node::Output(OutputNode::new(name, OutputKind::Main, id)), Some(parent));
        g.outputs.insert(name.to_string(), index);
        index
    }

    fn parse(fields: &[(&str, &str)]) -> Node {
        Node::Parse(ParseNode::new(
            fields.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        ))
    }

    fn formula(r#as: &str) -> Node {
        Node::Formula(FormulaNode::new("datum.a * 2".into(), r#as.into()))
    }

    fn bin(field: &str, prefix: &str) -> Node {
        let params = match normalize_bin(&json!(true), "x") {
            Some(crate::spec::encoding::Bin::Params(p)) => p,
            _ => unreachable!(),
        };
        let (key, component) = BinComponent::new(
            params,
            field,
            [format!("bin_{field}"), format!("bin_{field}_end")],
            prefix,
        );
        Node::Bin(BinNode::single(key, component))
    }

    fn time_unit(field: &str, unit: &str) -> Node {
        Node::TimeUnit(TimeUnitNode::single(TimeUnitComponent {
            r#as: format!("{unit}_{field}"),
            field: field.into(),
            unit: TimeUnitParams::parse(&json!(unit)).unwrap(),
        }))
    }

    fn aggregate(groupby: &[&str], op: &str) -> Node {
        let mut node = AggregateNode::default();
        node.add_dimensions(&groupby.iter().map(|s| s.to_string()).collect::<Vec<_>>());
        node.add_measure(Some("b"), op, format!("{op}_b"));
        Node::Aggregate(node)
    }

    fn run_bottom_up(pass: &mut impl BottomUpOptimizer, g: &mut DataflowGraph) -> bool {
        let mut cx = CompileContext::default();
        let mutated = pass.optimize(g, &mut cx).unwrap();
        g.validate().unwrap();
        mutated
    }

    #[test]
    fn test_unrequested_output_is_removed() {
        let mut g = DataflowGraph::new();
        let s = source(&mut g);
        let o = output(&mut g, "main", s, 0);
        let f = g.add(formula("c"), Some(o));
        let kept = output(&mut g, "raw", f, 1);
        g.request("raw");

        let mut cx = CompileContext::default();
        assert!(RemoveUnnecessaryOutputNodes.optimize(&mut g, &mut cx).unwrap());
        assert_eq!(g.children(s), vec![f]);
        assert_eq!(g.children(f), vec![kept]);
        assert!(!g.outputs.contains_key("main"));
        g.validate().unwrap();
    }

    #[test]
    fn test_identifier_kept_only_when_anchored() {
        let mut g = DataflowGraph::new();
        let s = source(&mut g);
        let anchored = g.add(Node::Identifier, Some(s));
        let f = g.add(formula("c"), Some(anchored));
        let loose = g.add(Node::Identifier, Some(f));
        output(&mut g, "main", loose, 0);

        let mut cx = CompileContext::default();
        let mut pass = RemoveUnnecessaryIdentifierNodes { requires_selection_id: true };
        assert!(pass.optimize(&mut g, &mut cx).unwrap());
        assert!(g.contains(anchored));
        assert!(!g.contains(loose));

        let mut pass = RemoveUnnecessaryIdentifierNodes { requires_selection_id: false };
        assert!(pass.optimize(&mut g, &mut cx).unwrap());
        assert!(!g.contains(anchored));
    }

    #[test]
    fn test_dead_leaves_are_removed_up_to_the_fork() {
        let mut g = DataflowGraph::new();
        let s = source(&mut g);
        let f = g.add(formula("c"), Some(s));
        let o = output(&mut g, "main", f, 0);
        let dead = g.add(formula("d"), Some(f));
        let dead_child = g.add(formula("e"), Some(dead));

        assert!(run_bottom_up(&mut RemoveUnusedSubtrees, &mut g));
        assert!(!g.contains(dead));
        assert!(!g.contains(dead_child));
        assert_eq!(g.children(f), vec![o]);
        assert!(!run_bottom_up(&mut RemoveUnusedSubtrees, &mut g));
    }

    #[test]
    fn test_parse_moves_past_unrelated_nodes() {
        let mut g = DataflowGraph::new();
        let s = source(&mut g);
        let f = g.add(formula("c"), Some(s));
        let p = g.add(parse(&[("a", "number")]), Some(f));
        output(&mut g, "main", p, 0);

        assert!(run_bottom_up(&mut MoveParseUp, &mut g));
        assert_eq!(g.children(s), vec![p]);
        assert_eq!(g.children(p), vec![f]);
    }

    #[test]
    fn test_parse_stops_at_producer() {
        let mut g = DataflowGraph::new();
        let s = source(&mut g);
        let f = g.add(formula("a"), Some(s));
        let p = g.add(parse(&[("a", "number")]), Some(f));
        output(&mut g, "main", p, 0);

        assert!(!run_bottom_up(&mut MoveParseUp, &mut g));
        assert_eq!(g.children(f), vec![p]);
    }

    #[test]
    fn test_adjacent_parses_merge() {
        let mut g = DataflowGraph::new();
        let s = source(&mut g);
        let upper = g.add(parse(&[("a", "number")]), Some(s));
        let lower = g.add(parse(&[("b", "date")]), Some(upper));
        output(&mut g, "main", lower, 0);

        assert!(run_bottom_up(&mut MoveParseUp, &mut g));
        assert!(!g.contains(lower));
        let Node::Parse(merged) = g.node(upper) else { unreachable!() };
        assert_eq!(merged.fields(), BTreeSet::from(["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn test_sibling_bins_merge_and_rename_signals() {
        let mut g = DataflowGraph::new();
        let s = source(&mut g);
        let f = g.add(formula("c"), Some(s));
        let left = g.add(bin("a", "layer_0_"), Some(f));
        let right = g.add(bin("a", "layer_1_"), Some(f));
        output(&mut g, "left", left, 0);
        output(&mut g, "right", right, 1);

        assert!(run_bottom_up(&mut MergeBins, &mut g));
        assert!(!g.contains(right));
        assert_eq!(g.children(s), vec![left]);
        assert_eq!(g.children(left), vec![f]);
        assert_eq!(g.num_children(f), 2);
        assert_eq!(
            g.signal_renames.resolve("layer_1_bin_maxbins_10_a_bins"),
            "layer_0_bin_maxbins_10_a_bins"
        );
    }

    #[test]
    fn test_bins_below_filters_stay() {
        let mut g = DataflowGraph::new();
        let s = source(&mut g);
        let filter = g.add(
            Node::Filter(FilterNode::new(crate::spec::predicate::Predicate::Expr("datum.a > 1".into()))),
            Some(s),
        );
        let b = g.add(bin("a", ""), Some(filter));
        output(&mut g, "main", b, 0);

        assert!(!run_bottom_up(&mut MergeBins, &mut g));
        assert_eq!(g.children(filter), vec![b]);
    }

    #[test]
    fn test_common_parse_is_hoisted() {
        let mut g = DataflowGraph::new();
        let s = source(&mut g);
        let left = g.add(parse(&[("a", "number"), ("b", "date")]), Some(s));
        let right = g.add(parse(&[("a", "number"), ("b", "string")]), Some(s));
        output(&mut g, "left", left, 0);
        output(&mut g, "right", right, 1);

        let mut cx = CompileContext::default();
        assert!(MergeParse.optimize(&mut g, &mut cx).unwrap());
        g.validate().unwrap();
        assert_eq!(cx.diagnostics().warnings().count(), 1);

        let [merged] = g.children(s)[..] else { unreachable!() };
        let Node::Parse(common) = g.node(merged) else { unreachable!() };
        assert_eq!(common.parse, BTreeMap::from([("a".to_string(), "number".to_string())]));
        assert_eq!(g.children(merged), vec![left, right]);
        let Node::Parse(local) = g.node(left) else { unreachable!() };
        assert_eq!(local.parse, BTreeMap::from([("b".to_string(), "date".to_string())]));

        assert!(!MergeParse.optimize(&mut g, &mut cx).unwrap());
        assert_eq!(cx.diagnostics().warnings().count(), 1);
    }

    #[test]
    fn test_aggregates_with_same_groupby_merge() {
        let mut g = DataflowGraph::new();
        let s = source(&mut g);
        let sum = g.add(aggregate(&["k"], "sum"), Some(s));
        let mean = g.add(aggregate(&["k"], "mean"), Some(s));
        let other = g.add(aggregate(&["j"], "sum"), Some(s));
        output(&mut g, "sum", sum, 0);
        let mean_out = output(&mut g, "mean", mean, 1);
        output(&mut g, "other", other, 2);

        assert!(run_bottom_up(&mut MergeAggregates, &mut g));
        assert!(!g.contains(mean));
        assert_eq!(g.children(s), vec![sum, other]);
        assert_eq!(g.parent(mean_out), Some(sum));
        let Node::Aggregate(merged) = g.node(sum) else { unreachable!() };
        assert_eq!(
            merged.produced_fields(),
            BTreeSet::from(["mean_b".to_string(), "sum_b".to_string()])
        );
    }

    #[test]
    fn test_sibling_time_units_merge() {
        let mut g = DataflowGraph::new();
        let s = source(&mut g);
        let month = g.add(time_unit("date", "month"), Some(s));
        let year = g.add(time_unit("date", "year"), Some(s));
        output(&mut g, "a", month, 0);
        output(&mut g, "b", year, 1);

        assert!(run_bottom_up(&mut MergeTimeUnits, &mut g));
        assert_eq!(g.children(s), vec![month]);
        let Node::TimeUnit(merged) = g.node(month) else { unreachable!() };
        assert_eq!(merged.formulas.len(), 2);
    }

    #[test]
    fn test_conflicting_time_units_stay_apart() {
        let mut g = DataflowGraph::new();
        let s = source(&mut g);
        let conflicting = |unit: &str| {
            Node::TimeUnit(TimeUnitNode::single(TimeUnitComponent {
                r#as: "t".into(),
                field: "date".into(),
                unit: TimeUnitParams::parse(&json!(unit)).unwrap(),
            }))
        };
        let month = g.add(conflicting("month"), Some(s));
        let year = g.add(conflicting("year"), Some(s));
        let day = g.add(time_unit("date", "day"), Some(s));
        output(&mut g, "a", month, 0);
        output(&mut g, "b", year, 1);
        output(&mut g, "c", day, 2);

        assert!(run_bottom_up(&mut MergeTimeUnits, &mut g));
        assert_eq!(g.children(s), vec![month, year]);
        let Node::TimeUnit(kept) = g.node(year) else { unreachable!() };
        assert_eq!(kept.formulas["t"].unit.full_name(), "year");
        assert!(!run_bottom_up(&mut MergeTimeUnits, &mut g));
    }

    #[test]
    fn test_duplicate_time_unit_below_is_removed() {
        let mut g = DataflowGraph::new();
        let s = source(&mut g);
        let upper = g.add(time_unit("date", "month"), Some(s));
        let f = g.add(formula("c"), Some(upper));
        let lower = g.add(time_unit("date", "month"), Some(f));
        let o = output(&mut g, "main", lower, 0);

        assert!(run_bottom_up(&mut RemoveDuplicateTimeUnits::default(), &mut g));
        assert!(!g.contains(lower));
        assert_eq!(g.children(f), vec![o]);
    }

    #[test]
    fn test_identical_siblings_merge() {
        let mut g = DataflowGraph::new();
        let s = source(&mut g);
        let a = g.add(formula("c"), Some(s));
        let b = g.add(formula("c"), Some(s));
        let oa = output(&mut g, "a", a, 0);
        let ob = output(&mut g, "b", b, 1);

        let mut cx = CompileContext::default();
        assert!(MergeIdenticalNodes.optimize(&mut g, &mut cx).unwrap());
        g.validate().unwrap();
        assert_eq!(g.children(s), vec![a]);
        assert_eq!(g.children(a), vec![oa, ob]);
        assert!(!MergeIdenticalNodes.optimize(&mut g, &mut cx).unwrap());
    }

    #[test]
    fn test_sibling_outputs_chain() {
        let mut g = DataflowGraph::new();
        let s = source(&mut g);
        let raw = output(&mut g, "raw", s, 0);
        let f = g.add(formula("c"), Some(s));
        let main = output(&mut g, "main", f, 1);

        assert!(run_bottom_up(&mut MergeOutputs, &mut g));
        assert_eq!(g.children(s), vec![raw]);
        assert_eq!(g.children(raw), vec![f]);
        assert_eq!(g.children(f), vec![main]);
        assert!(!run_bottom_up(&mut MergeOutputs, &mut g));
    }
}
