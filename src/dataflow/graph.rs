use std::collections::BTreeMap;
use std::fmt::Write as _;

use petgraph::Direction;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};
use petgraph::visit::{EdgeRef, IntoEdgeReferences};

use crate::core::{CompileContext, Renames};
use crate::dataflow::node::Node;
use crate::error::CompileError;

/// The dataflow forest of one compilation.
///
/// Nodes live in an arena; every edge goes from a parent to a child and
/// carries the child's position among its siblings. A node has at most one
/// parent, so the graph is a forest rooted at the registered sources.
#[derive(Debug, Default)]
pub struct DataflowGraph {
    graph: StableDiGraph<Node, u32>,
    /// Roots in creation order.
    pub sources: Vec<NodeIndex>,
    /// Logical output name to the node currently holding it.
    pub outputs: BTreeMap<String, NodeIndex>,
    /// How many consumers requested each logical output.
    pub ref_counts: BTreeMap<String, usize>,
    /// Signals renamed while merging nodes.
    pub signal_renames: Renames,
}

impl DataflowGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn node(&self, index: NodeIndex) -> &Node {
        &self.graph[index]
    }

    pub fn node_mut(&mut self, index: NodeIndex) -> &mut Node {
        &mut self.graph[index]
    }

    pub fn contains(&self, index: NodeIndex) -> bool {
        self.graph.contains_node(index)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Adds `node` as the last child of `parent`, or as a new root.
    pub fn add(&mut self, node: Node, parent: Option<NodeIndex>) -> NodeIndex {
        let index = self.graph.add_node(node);
        match parent {
            Some(parent) => self.attach(index, parent, None),
            None => self.sources.push(index),
        }
        index
    }

    pub fn parent(&self, index: NodeIndex) -> Option<NodeIndex> {
        self.graph
            .edges_directed(index, Direction::Incoming)
            .map(|edge| edge.source())
            .next()
    }

    /// Children ordered by position.
    pub fn children(&self, index: NodeIndex) -> Vec<NodeIndex> {
        let mut edges: Vec<(u32, NodeIndex)> = self
            .graph
            .edges_directed(index, Direction::Outgoing)
            .map(|edge| (*edge.weight(), edge.target()))
            .collect();
        edges.sort();
        edges.into_iter().map(|(_, child)| child).collect()
    }

    pub fn num_children(&self, index: NodeIndex) -> usize {
        self.graph.edges_directed(index, Direction::Outgoing).count()
    }

    /// Replaces the outgoing edges of `parent` with `children`, in order.
    fn set_children(&mut self, parent: NodeIndex, children: &[NodeIndex]) {
        let old: Vec<_> = self
            .graph
            .edges_directed(parent, Direction::Outgoing)
            .map(|edge| edge.id())
            .collect();
        for edge in old {
            self.graph.remove_edge(edge);
        }
        for (position, child) in children.iter().enumerate() {
            self.graph.add_edge(parent, *child, position as u32);
        }
    }

    /// Unlinks `index` from its parent; returns the parent and the position the
    /// node had among its siblings.
    pub fn detach(&mut self, index: NodeIndex) -> Option<(NodeIndex, usize)> {
        let parent = self.parent(index)?;
        let mut siblings = self.children(parent);
        let position = siblings.iter().position(|c| *c == index)?;
        siblings.remove(position);
        self.set_children(parent, &siblings);
        Some((parent, position))
    }

    /// Links a parentless node under `parent` at `position` (appends on `None`).
    pub fn attach(&mut self, index: NodeIndex, parent: NodeIndex, position: Option<usize>) {
        self.sources.retain(|s| *s != index);
        let mut siblings = self.children(parent);
        let position = position.unwrap_or(siblings.len()).min(siblings.len());
        siblings.insert(position, index);
        self.set_children(parent, &siblings);
    }

    /// Moves `index` (with its subtree) to the end of `parent`'s children.
    pub fn set_parent(&mut self, index: NodeIndex, parent: NodeIndex) {
        self.detach(index);
        self.attach(index, parent, None);
    }

    /// Deletes a node, splicing its children into its parent at its position.
    pub fn remove(&mut self, index: NodeIndex) {
        let children = self.children(index);
        match self.detach(index) {
            Some((parent, position)) => {
                let mut siblings = self.children(parent);
                for (offset, child) in children.iter().enumerate() {
                    siblings.insert(position + offset, *child);
                }
                self.set_children(parent, &siblings);
            }
            None => {
                let position = self.sources.iter().position(|s| *s == index);
                self.sources.retain(|s| *s != index);
                let at = position.unwrap_or(self.sources.len());
                for (offset, child) in children.iter().enumerate() {
                    self.sources.insert(at + offset, *child);
                }
            }
        }
        self.graph.remove_node(index);
        self.outputs.retain(|_, node| *node != index);
    }

    /// Moves every child of `other` under `keep` and deletes `other`.
    pub fn absorb(&mut self, keep: NodeIndex, other: NodeIndex) {
        for child in self.children(other) {
            self.set_parent(child, keep);
        }
        self.remove(other);
    }

    /// Swaps a node with its parent. The node takes the parent's place among
    /// the grandparent's children, the node's children move to the old parent,
    /// and the old parent becomes the node's only child.
    pub fn swap_with_parent(&mut self, index: NodeIndex) -> Result<(), CompileError> {
        let parent = self
            .parent(index)
            .ok_or_else(|| CompileError::InvalidGraph("cannot swap a root with its parent".into()))?;
        let grandparent = self
            .parent(parent)
            .ok_or_else(|| CompileError::InvalidGraph("cannot swap a node below a root".into()))?;

        let children = self.children(index);
        self.detach(index);
        for child in children {
            self.set_parent(child, parent);
        }
        let (_, position) = self
            .detach(parent)
            .ok_or_else(|| CompileError::InvalidGraph("parent lost its grandparent".into()))?;
        self.attach(index, grandparent, Some(position));
        self.attach(parent, index, None);
        Ok(())
    }

    /// Places a parentless node between `child` and its parent.
    pub fn insert_as_parent_of(&mut self, index: NodeIndex, child: NodeIndex) {
        match self.detach(child) {
            Some((parent, position)) => self.attach(index, parent, Some(position)),
            None => {
                if let Some(position) = self.sources.iter().position(|s| *s == child) {
                    self.sources[position] = index;
                }
            }
        }
        self.attach(child, index, None);
    }

    /// Adds a parentless copy of a node. Nodes with identity get a fresh one.
    pub fn clone_node(&mut self, cx: &mut CompileContext, index: NodeIndex) -> NodeIndex {
        let mut node = self.graph[index].clone();
        node.refresh_identity(cx);
        self.graph.add_node(node)
    }

    pub fn siblings(&self, index: NodeIndex) -> Vec<NodeIndex> {
        match self.parent(index) {
            Some(parent) => self.children(parent),
            None => vec![index],
        }
    }

    /// Leaves in depth-first, child order from each source.
    pub fn leaves(&self) -> Vec<NodeIndex> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeIndex> = self.sources.iter().rev().copied().collect();
        while let Some(index) = stack.pop() {
            let children = self.children(index);
            if children.is_empty() {
                out.push(index);
            }
            stack.extend(children.into_iter().rev());
        }
        out
    }

    /// Every node below `index`, including itself, in pre-order.
    pub fn subtree(&self, index: NodeIndex) -> Vec<NodeIndex> {
        let mut out = Vec::new();
        let mut stack = vec![index];
        while let Some(index) = stack.pop() {
            out.push(index);
            stack.extend(self.children(index).into_iter().rev());
        }
        out
    }

    /// Registers a consumer of the logical output `name`.
    pub fn request(&mut self, name: &str) {
        *self.ref_counts.entry(name.to_string()).or_default() += 1;
    }

    pub fn ref_count(&self, name: &str) -> usize {
        self.ref_counts.get(name).copied().unwrap_or(0)
    }

    /// Checks parent/child consistency, acyclicity and the root list.
    pub fn validate(&self) -> Result<(), CompileError> {
        if petgraph::algo::is_cyclic_directed(&self.graph) {
            return Err(CompileError::InvalidGraph("cycle detected".into()));
        }
        for index in self.graph.node_indices() {
            let incoming = self.graph.edges_directed(index, Direction::Incoming).count();
            if incoming > 1 {
                return Err(CompileError::InvalidGraph(format!(
                    "{} has {incoming} parents",
                    self.graph[index].kind_name()
                )));
            }
            if incoming == 0 && !self.sources.contains(&index) {
                return Err(CompileError::InvalidGraph(format!(
                    "{} is detached from every source",
                    self.graph[index].kind_name()
                )));
            }
            let mut positions: Vec<u32> = self
                .graph
                .edges_directed(index, Direction::Outgoing)
                .map(|edge| *edge.weight())
                .collect();
            positions.sort();
            if positions.iter().enumerate().any(|(i, p)| *p as usize != i) {
                return Err(CompileError::InvalidGraph(format!(
                    "children of {} are not contiguous",
                    self.graph[index].kind_name()
                )));
            }
        }
        for source in &self.sources {
            if self.parent(*source).is_some() {
                return Err(CompileError::InvalidGraph("a source has a parent".into()));
            }
        }
        for (name, index) in &self.outputs {
            if !self.graph.contains_node(*index) {
                return Err(CompileError::InvalidGraph(format!(
                    "output \"{name}\" points to a deleted node"
                )));
            }
        }
        Ok(())
    }

    /// Indented textual dump, one node per line.
    pub fn debug_tree(&self) -> String {
        let mut out = String::new();
        let mut stack: Vec<(NodeIndex, usize)> =
            self.sources.iter().rev().map(|s| (*s, 0)).collect();
        while let Some((index, depth)) = stack.pop() {
            let _ = writeln!(out, "{}{}", "  ".repeat(depth), self.graph[index].debug_name());
            for child in self.children(index).into_iter().rev() {
                stack.push((child, depth + 1));
            }
        }
        out
    }
}

impl std::fmt::Display for DataflowGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "graph TD")?;
        for index in self.graph.node_indices() {
            writeln!(f, "    N{}[\"{}\"]", index.index(), self.graph[index].debug_name())?;
        }
        for edge in self.graph.edge_references() {
            writeln!(f, "    N{} --> N{}", edge.source().index(), edge.target().index())?;
        }
        Ok(())
    }
}
