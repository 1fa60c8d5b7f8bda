//! Serialises the optimized forest into named datasets.
//!
//! Consecutive nodes of a chain share one dataset. A new dataset starts at a
//! fork, after an output that other views read, and below a facet. Roots keep
//! their `data.name` or become `source_N`; everything else is `data_N`.

use std::collections::BTreeMap;

use petgraph::stable_graph::NodeIndex;
use serde_json::{Map, Value, json};
use tracing::{debug, instrument};

use crate::core::{CompileContext, Renames};
use crate::dataflow::graph::DataflowGraph;
use crate::dataflow::node::Node;

/// Datasets scoped to one facet cell.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FacetData {
    /// Dataset partitioned into cells.
    pub data: String,
    /// Datasets computed per cell, sourced from the facet name.
    pub datasets: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AssembledData {
    /// Top-level datasets.
    pub data: Vec<Value>,
    /// Per-cell datasets keyed by facet name.
    pub facets: BTreeMap<String, FacetData>,
}

impl AssembledData {
    /// Every dataset name, top-level and facet-scoped, including facet names.
    pub fn names(&self) -> Vec<&str> {
        let mut out: Vec<&str> = self.data.iter().filter_map(|d| d["name"].as_str()).collect();
        for (facet, data) in &self.facets {
            out.push(facet);
            out.extend(data.datasets.iter().filter_map(|d| d["name"].as_str()));
        }
        out
    }
}

/// A dataset while its transforms are being collected.
#[derive(Debug, Default)]
struct Dataset {
    name: Option<String>,
    source: Option<String>,
    descriptor: Map<String, Value>,
    transform: Vec<Value>,
}

impl Dataset {
    fn derived(source: String) -> Self {
        Self {
            source: Some(source),
            ..Self::default()
        }
    }

    /// Only refers to another dataset.
    fn is_reference(&self) -> bool {
        self.source.is_some() && self.transform.is_empty()
    }

    fn into_value(self) -> Value {
        let mut out = Map::new();
        if let Some(name) = self.name {
            out.insert("name".into(), Value::String(name));
        }
        out.extend(self.descriptor);
        if let Some(source) = self.source {
            out.insert("source".into(), Value::String(source));
        }
        if !self.transform.is_empty() {
            out.insert("transform".into(), Value::Array(self.transform));
        }
        Value::Object(out)
    }
}

struct Assembler<'a> {
    g: &'a mut DataflowGraph,
    cx: &'a mut CompileContext,
    signals: Renames,
    next_data: usize,
    facets: BTreeMap<String, FacetData>,
}

impl Assembler<'_> {
    fn name(&mut self, ds: &mut Dataset) -> String {
        match &ds.name {
            Some(name) => name.clone(),
            None => {
                let name = format!("data_{}", self.next_data);
                self.next_data += 1;
                ds.name = Some(name.clone());
                name
            }
        }
    }

    fn set_source(&mut self, node: NodeIndex, source: String) {
        if let Node::Output(output) = self.g.node_mut(node) {
            output.source = source;
        }
    }

    fn walk(&mut self, node: NodeIndex, mut ds: Dataset, out: &mut Vec<Value>) {
        let parent = self.g.parent(node).map(|p| self.g.node(p));
        let under_source = matches!(parent, Some(Node::Source(_)));
        let under_output = matches!(parent, Some(Node::Output(_)));

        match self.g.node(node) {
            Node::Source(source) => {
                if !source.descriptor.contains_key("url") {
                    let name = self.name(&mut ds);
                    out.push(ds.into_value());
                    ds = Dataset::derived(name);
                }
            }
            Node::Parse(parse) => {
                if under_source && ds.source.is_none() {
                    let format_parse = parse.assemble_format_parse();
                    if !format_parse.is_empty() {
                        let format = ds
                            .descriptor
                            .entry("format")
                            .or_insert_with(|| Value::Object(Map::new()));
                        format["parse"] = Value::Object(format_parse);
                    }
                    ds.transform.extend(parse.assemble_transforms(self.cx, true));
                } else {
                    ds.transform.extend(parse.assemble_transforms(self.cx, false));
                }
            }
            Node::Facet(_) => {
                self.walk_facet(node, ds, out);
                return;
            }
            Node::Output(_) => {
                if let (true, Some(source)) = (ds.is_reference(), ds.source.clone()) {
                    self.set_source(node, source);
                } else if under_output {
                    let name = self.name(&mut ds);
                    self.set_source(node, name);
                } else {
                    let name = self.name(&mut ds);
                    self.set_source(node, name.clone());
                    if self.g.num_children(node) == 1 {
                        out.push(ds.into_value());
                        ds = Dataset::derived(name);
                    }
                }
            }
            other => {
                let records = other.assemble(self.cx, &self.signals);
                ds.transform.extend(records);
            }
        }

        let children = self.g.children(node);
        match children.as_slice() {
            [] => {
                if matches!(self.g.node(node), Node::Output(_)) && !ds.is_reference() {
                    out.push(ds.into_value());
                }
            }
            [child] => self.walk(*child, ds, out),
            _ => {
                let source = match (ds.is_reference(), ds.source.clone()) {
                    (true, Some(source)) => source,
                    _ => {
                        let name = self.name(&mut ds);
                        out.push(ds.into_value());
                        name
                    }
                };
                for child in children {
                    self.walk(child, Dataset::derived(source.clone()), out);
                }
            }
        }
    }

    fn walk_facet(&mut self, node: NodeIndex, mut ds: Dataset, out: &mut Vec<Value>) {
        let data = match (ds.is_reference(), ds.source.clone()) {
            (true, Some(source)) => source,
            _ => {
                let name = self.name(&mut ds);
                out.push(ds.into_value());
                name
            }
        };

        let Node::Facet(facet) = self.g.node_mut(node) else {
            return;
        };
        facet.data = Some(data.clone());
        let name = facet.name.clone();
        out.extend(facet.assemble());

        let mut datasets = Vec::new();
        for child in self.g.children(node) {
            self.walk(child, Dataset::derived(name.clone()), &mut datasets);
        }
        self.facets.insert(name, FacetData { data, datasets });
    }
}

/// Points lookups at the final name of their secondary dataset.
fn resolve_lookups(g: &DataflowGraph, data: &mut [Value]) {
    for dataset in data {
        let Some(transforms) = dataset.get_mut("transform").and_then(Value::as_array_mut) else {
            continue;
        };
        for t in transforms {
            if t["type"] != "lookup" {
                continue;
            }
            let Some(from) = t["from"].as_str() else {
                continue;
            };
            if let Some(Node::Output(output)) = g.outputs.get(from).map(|index| g.node(*index)) {
                t["from"] = json!(output.source);
            }
        }
    }
}

/// Assembles every tree of the forest. Output nodes learn their final dataset
/// name through [`crate::dataflow::nodes::OutputNode::source`].
#[instrument(skip_all)]
pub fn assemble(g: &mut DataflowGraph, cx: &mut CompileContext) -> AssembledData {
    let signals = g.signal_renames.clone();
    let mut assembler = Assembler {
        g,
        cx,
        signals,
        next_data: 0,
        facets: BTreeMap::new(),
    };

    let mut data = Vec::new();
    let mut next_source = 0;
    for root in assembler.g.sources.clone() {
        let mut ds = Dataset::default();
        if let Node::Source(source) = assembler.g.node(root) {
            ds.name = source.data_name.clone();
            ds.descriptor = source.descriptor.clone();
        }
        if ds.name.is_none() {
            ds.name = Some(format!("source_{next_source}"));
            next_source += 1;
        }
        assembler.walk(root, ds, &mut data);
    }

    // Datasets without source and transforms may be lookup targets.
    let (mut front, rest): (Vec<Value>, Vec<Value>) = data
        .into_iter()
        .partition(|d| d.get("source").is_none() && d.get("transform").is_none());
    front.extend(rest);
    let mut data = front;

    let Assembler { g, mut facets, .. } = assembler;
    resolve_lookups(g, &mut data);
    for facet in facets.values_mut() {
        resolve_lookups(g, &mut facet.datasets);
    }

    debug!(datasets = data.len(), facets = facets.len(), "assembled data");
    AssembledData { data, facets }
}
