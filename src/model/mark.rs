//! Assembles the view tree into Vega group scopes: the components each scope
//! owns plus minimal mark stubs that reference the produced datasets.

use serde_json::{Map, Value, json};

use crate::core::Renames;
use crate::dataflow::optimizer::FACET_SCALE_PREFIX;
use crate::dataflow::{AssembledData, DataflowGraph, Node};
use crate::model::{Model, ModelKind, UnitModel};

/// Final dataset name of the output registered as `logical`, if it survived
/// optimization.
pub fn dataset_name(g: &DataflowGraph, logical: &str) -> Option<String> {
    let index = *g.outputs.get(logical)?;
    if !g.contains(index) {
        return None;
    }
    g.node(index).as_output().map(|o| o.source.clone())
}

/// Dataset a component in a top-level scope reads: the global copy of a
/// faceted computation when one exists.
fn top_level_dataset_name(g: &DataflowGraph, logical: &str) -> Option<String> {
    dataset_name(g, &format!("{FACET_SCALE_PREFIX}{logical}")).or_else(|| dataset_name(g, logical))
}

fn vega_mark(mark: &str) -> &str {
    match mark {
        "bar" | "tick" => "rect",
        "point" | "circle" | "square" => "symbol",
        "geoshape" => "shape",
        other => other,
    }
}

pub struct AssembleContext<'a> {
    pub g: &'a DataflowGraph,
    pub data: &'a AssembledData,
    pub scales: &'a Renames,
    pub signals: &'a Renames,
}

/// Components and marks of one group scope.
#[derive(Debug, Default, PartialEq)]
pub struct Group {
    pub scales: Vec<Value>,
    pub axes: Vec<Value>,
    pub legends: Vec<Value>,
    pub projections: Vec<Value>,
    pub marks: Vec<Value>,
}

impl Group {
    /// Writes the non-empty sections into `out`.
    pub fn write_into(self, out: &mut Map<String, Value>) {
        for (key, values) in [
            ("projections", self.projections),
            ("scales", self.scales),
            ("axes", self.axes),
            ("legends", self.legends),
            ("marks", self.marks),
        ] {
            if !values.is_empty() {
                out.insert(key.to_string(), Value::Array(values));
            }
        }
    }
}

impl AssembleContext<'_> {
    /// The top-level scope of `model`.
    pub fn assemble_group(&self, model: &Model) -> Group {
        let mut group = Group::default();
        self.collect(model, true, &mut group);
        group
    }

    fn collect(&self, model: &Model, top_level: bool, group: &mut Group) {
        let dataset = |name: &str| {
            if top_level {
                top_level_dataset_name(self.g, name)
            } else {
                dataset_name(self.g, name)
            }
        };

        let component = &model.component;
        if let Some(projection) = &component.projection
            && !projection.merged
        {
            group.projections.push(projection.assemble());
        }
        for scale in component.scales.values().filter(|s| !s.merged) {
            group.scales.push(scale.assemble(self.signals, &dataset));
        }
        for axis in component.axes.values().flatten() {
            group.axes.push(axis.assemble(self.scales));
        }
        for legend in component.legends.values() {
            group.legends.push(legend.assemble(self.scales));
        }

        match &model.kind {
            ModelKind::Unit(unit) => group.marks.push(self.unit_mark(model, unit, &dataset)),
            ModelKind::Layer(children) => {
                for child in children {
                    self.collect(child, top_level, group);
                }
            }
            ModelKind::Concat(children) => {
                for child in children {
                    let mut inner = Group::default();
                    self.collect(child, top_level, &mut inner);
                    let mut mark = Map::new();
                    mark.insert("name".into(), json!(child.get_name("group")));
                    mark.insert("type".into(), json!("group"));
                    inner.write_into(&mut mark);
                    group.marks.push(Value::Object(mark));
                }
            }
            ModelKind::Facet { child, .. } => self.facet_marks(model, child, group),
        }
    }

    fn unit_mark(&self, model: &Model, unit: &UnitModel, dataset: &dyn Fn(&str) -> Option<String>) -> Value {
        let main = model.component.data.main_name.clone().unwrap_or_else(|| model.get_name("main"));
        let data = dataset(&main).unwrap_or(main);
        json!({
            "name": model.get_name("marks"),
            "type": vega_mark(&unit.mark.ty),
            "from": {"data": data},
        })
    }

    /// Header groups reading the header datasets, then the cell group
    /// partitioning the faceted data.
    fn facet_marks(&self, model: &Model, child: &Model, group: &mut Group) {
        let facet_name = model.get_name("facet");
        let facet = self
            .g
            .outputs
            .get(&facet_name)
            .filter(|&&index| self.g.contains(index))
            .and_then(|&index| match self.g.node(index) {
                Node::Facet(facet) => Some(facet),
                _ => None,
            });

        let mut cell = Map::new();
        cell.insert("name".into(), json!(model.get_name("cell")));
        cell.insert("type".into(), json!("group"));
        if let Some(facet) = facet {
            for (channel, header) in facet.channels() {
                group.marks.push(json!({
                    "name": model.get_name(&format!("{channel}_header")),
                    "type": "group",
                    "role": format!("{channel}-header"),
                    "from": {"data": header.name},
                }));
            }
            cell.insert(
                "from".into(),
                json!({"facet": {
                    "name": facet.name,
                    "data": facet.data,
                    "groupby": facet.fields(),
                }}),
            );
            if let Some(data) = self.data.facets.get(&facet.name)
                && !data.datasets.is_empty()
            {
                cell.insert("data".into(), Value::Array(data.datasets.clone()));
            }
        }

        let mut inner = Group::default();
        self.collect(child, false, &mut inner);
        inner.write_into(&mut cell);
        group.marks.push(Value::Object(cell));
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::dataflow::nodes::{OutputKind, OutputNode, SourceNode};

    #[test]
    fn test_dataset_name_prefers_scale_copy_at_top_level() {
        let mut g = DataflowGraph::new();
        let root = g.add(Node::Source(SourceNode::empty()), None);
        let mut main = OutputNode::new("main", OutputKind::Main, 0);
        main.source = "data_1".into();
        let index = g.add(Node::Output(main), Some(root));
        g.outputs.insert("main".into(), index);
        let mut copy = OutputNode::new("scale_main", OutputKind::Scale, 1);
        copy.source = "data_0".into();
        let index = g.add(Node::Output(copy), Some(root));
        g.outputs.insert("scale_main".into(), index);

        assert_eq!(dataset_name(&g, "main").as_deref(), Some("data_1"));
        assert_eq!(top_level_dataset_name(&g, "main").as_deref(), Some("data_0"));
        assert_eq!(dataset_name(&g, "raw"), None);
    }

    #[test]
    fn test_removed_output_has_no_dataset() {
        let mut g = DataflowGraph::new();
        let root = g.add(Node::Source(SourceNode::empty()), None);
        let index = g.add(Node::Output(OutputNode::new("raw", OutputKind::Raw, 0)), Some(root));
        g.outputs.insert("raw".into(), index);
        g.remove(index);
        assert_eq!(dataset_name(&g, "raw"), None);
    }

    #[test]
    fn test_mark_types() {
        assert_eq!(vega_mark("bar"), "rect");
        assert_eq!(vega_mark("circle"), "symbol");
        assert_eq!(vega_mark("line"), "line");
    }
}
