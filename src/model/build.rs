//! Builds the dataflow of every model: the root source, the `transform`
//! array, and the nodes the encoding implies (parse, bin, time unit,
//! aggregate, impute, stack, invalid filtering), ending in named outputs.

use std::collections::{BTreeMap, BTreeSet};

use petgraph::stable_graph::NodeIndex;
use serde_json::{Map, Value};

use crate::config::{Config, Invalid};
use crate::core::{CompileContext, Renames};
use crate::dataflow::nodes::*;
use crate::dataflow::{DataflowGraph, Node};
use crate::error::CompileError;
use crate::expr::{flat_access_name, is_nested};
use crate::model::scale::{has_continuous_domain, has_discrete_domain};
use crate::model::{DataComponent, Model, ModelKind, UnitModel};
use crate::model::selection::STORE;
use crate::spec::encoding::{Bin, BinParams, SCALE_CHANNELS, Suffix, TimeUnitParams};
use crate::spec::encoding::{bin_to_string, normalize_bin, scale_channel};
use crate::spec::transform::ImputeTransform;
use crate::spec::{Data, DataKind, DataSetting, FieldDef, FieldType, ParseSetting, Transform};
use crate::split::{Explicit, Split};

const PATH_MARKS: &[&str] = &["line", "area", "trail"];

/// Channels whose unaggregated fields split a path into separate series.
const PATH_GROUPING_CHANNELS: &[&str] = &[
    "color",
    "fill",
    "stroke",
    "opacity",
    "fillOpacity",
    "strokeOpacity",
    "strokeDash",
    "strokeWidth",
    "shape",
    "detail",
];

/// Signal holding the bin boundaries of `field` binned with `params`.
pub fn bin_signal(model_name: &str, params: &BinParams, field: &str) -> String {
    format!("{}{}_bins", signal_prefix(model_name), bin_key(params, field))
}

fn signal_prefix(model_name: &str) -> String {
    if model_name.is_empty() {
        String::new()
    } else {
        format!("{model_name}_")
    }
}

/// Parse types already applied above a model, so descendants neither repeat
/// nor contradict them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AncestorParse {
    split: Split<String>,
    /// Set for generators and `format.parse: null`.
    pub parse_nothing: bool,
}

impl AncestorParse {
    pub fn get(&self, field: &str) -> Option<&String> {
        self.split.get(field)
    }

    pub fn get_with_explicit(&self, field: &str) -> Option<Explicit<String>> {
        self.split.get_with_explicit(field)
    }

    pub fn set(&mut self, field: impl Into<String>, ty: impl Into<String>, explicit: bool) {
        self.split.set(field, ty.into(), explicit);
    }

    fn copy_all(&mut self, other: &Split<String>) {
        for (field, ty) in &other.explicit {
            self.split.set(field.clone(), ty.clone(), true);
        }
        for (field, ty) in &other.implicit {
            self.split.set(field.clone(), ty.clone(), false);
        }
    }
}

/// Shared state while building the dataflow of a whole model tree.
pub struct DataBuilder<'a> {
    pub cx: &'a mut CompileContext,
    pub g: &'a mut DataflowGraph,
    pub config: &'a Config,
    /// Projection renames from layer merging.
    pub renames: &'a Renames,
    /// Selection names defined anywhere in the tree.
    pub selections: BTreeSet<String>,
    pub requires_selection_id: bool,
}

impl DataBuilder<'_> {
    /// Builds the dataflow of `model` and its descendants.
    pub fn parse_data(&mut self, model: &mut Model, parent: Option<(&DataComponent, bool)>) -> Result<(), CompileError> {
        let parent_is_layer = parent.is_some_and(|(_, layer)| layer);
        let mut head = self.parse_root(model, parent.map(|(data, _)| data))?;

        let new_data = matches!(&model.data, DataSetting::Data(data) if data.kind != DataKind::Named)
            || matches!(model.data, DataSetting::Null);
        let mut ancestor_parse = match parent {
            Some((data, _)) if !new_data => data.ancestor_parse.clone(),
            _ => AncestorParse::default(),
        };

        if let DataSetting::Data(data) = &model.data {
            if data.is_generator() || data.parse == ParseSetting::Null {
                ancestor_parse.parse_nothing = true;
            } else if let ParseSetting::Fields(fields) = &data.parse {
                head = self.parse_with_ancestors(head, fields.clone(), BTreeMap::new(), &mut ancestor_parse);
            }
        }

        head = self.g.add(Node::Identifier, Some(head));

        let defs = encoded_defs(model);
        if !defs.is_empty() && parent_is_layer {
            head = self.bins_from_encoding(model, &defs, head);
        }

        head = self.parse_transforms(model, head, &mut ancestor_parse)?;

        let implicit = implicit_parse(model, &defs);
        head = self.parse_with_ancestors(head, BTreeMap::new(), implicit, &mut ancestor_parse);

        if let ModelKind::Unit(unit) = &model.kind {
            head = self.geo_nodes(model, unit, head);
        }
        if !defs.is_empty() {
            if !parent_is_layer {
                head = self.bins_from_encoding(model, &defs, head);
            }
            head = time_units_from_encoding(self.g, &defs, head);
            for def in &defs {
                if let Some(Value::Array(order)) = &def.sort
                    && let Some(formula) = FormulaNode::sort_index(def, order)
                {
                    head = self.g.add(Node::Formula(formula), Some(head));
                }
            }
        }

        head = self.add_output(model, head, OutputKind::Raw, "raw");

        if let ModelKind::Unit(unit) = &model.kind {
            if let Some(aggregate) = aggregate_from_encoding(model, unit) {
                head = self.g.add(Node::Aggregate(aggregate), Some(head));
                if self.requires_selection_id {
                    head = self.g.add(Node::Identifier, Some(head));
                }
            }
            if let Some(impute) = impute_from_encoding(unit) {
                head = self.g.add(Node::Impute(ImputeNode { transform: impute }), Some(head));
            }
            if let Some(stack) = stack_from_encoding(unit) {
                head = self.g.add(Node::Stack(stack), Some(head));
            }
            if let Some(filter) = self.filter_invalid(model, unit) {
                head = self.g.add(Node::FilterInvalid(filter), Some(head));
            }
        }

        let main_name = model.get_name("main");
        let main = self.add_output(model, head, OutputKind::Main, "main");
        if model.as_unit().is_some() {
            self.g.request(&main_name);
        }

        let mut facet_root = None;
        if let ModelKind::Facet { facet, child } = &model.kind {
            let mut node = FacetNode {
                id: self.cx.unique_id(),
                main: main_name.clone(),
                name: model.get_name("facet"),
                row: None,
                column: None,
                facet: None,
                child_independent_fields: BTreeMap::new(),
                data: None,
            };
            for (channel, def) in facet.iter() {
                let facet_channel = facet_channel(model, channel, def);
                match channel {
                    "row" => node.row = Some(facet_channel),
                    "column" => node.column = Some(facet_channel),
                    _ => node.facet = Some(facet_channel),
                }
            }
            for channel in ["x", "y"] {
                let Some(scale) = child.component.scales.get(channel) else {
                    continue;
                };
                let sized_by_step = scale.props.get("range").is_some_and(|r| r.get("step").is_some());
                if scale.merged || !has_discrete_domain(scale.ty()) || !sized_by_step {
                    continue;
                }
                match scale.domain_field() {
                    Some(field) => {
                        node.child_independent_fields.insert(channel.to_string(), field);
                    }
                    None => self.cx.warn(format!(
                        "Cannot size the independent \"{channel}\" scale of the facet cells: its domain is not a single field."
                    )),
                }
            }
            let name = node.name.clone();
            let index = self.g.add(Node::Facet(node), Some(main));
            self.g.request(&main_name);
            self.g.outputs.insert(name, index);
            facet_root = Some(index);
        }

        model.component.data = DataComponent {
            main: Some(main),
            main_name: Some(main_name),
            facet_root,
            ancestor_parse,
        };

        let data = model.component.data.clone();
        let is_layer = model.is_layer();
        for child in model.children_mut() {
            self.parse_data(child, Some((&data, is_layer)))?;
        }
        Ok(())
    }

    fn parse_root(&mut self, model: &Model, parent: Option<&DataComponent>) -> Result<NodeIndex, CompileError> {
        match &model.data {
            DataSetting::Null => Ok(self.g.add(Node::Source(SourceNode::empty()), None)),
            DataSetting::Data(data) => Ok(self.find_or_add_source(data)),
            DataSetting::Inherit => match parent.and_then(|p| p.facet_root.or(p.main)) {
                Some(index) => Ok(index),
                None if parent.is_some() => Err(CompileError::InvalidGraph(format!(
                    "parent of \"{}\" has no data to inherit",
                    model.name
                ))),
                None => {
                    let source = SourceNode {
                        descriptor: Map::new(),
                        data_name: Some("source".to_string()),
                    };
                    Ok(self.find_or_add(Node::Source(source)))
                }
            },
        }
    }

    fn find_or_add_source(&mut self, data: &Data) -> NodeIndex {
        let node = match &data.kind {
            DataKind::Sequence { start, stop, step, r#as } => Node::Sequence(SequenceNode {
                start: *start,
                stop: *stop,
                step: *step,
                r#as: r#as.clone(),
            }),
            DataKind::Graticule(params) => Node::Graticule(GraticuleNode { params: params.clone() }),
            _ => Node::Source(SourceNode::from_data(data)),
        };
        self.find_or_add(node)
    }

    /// Reuses a root with the same content. An unnamed existing source adopts
    /// the name of an identical named one.
    fn find_or_add(&mut self, node: Node) -> NodeIndex {
        let found = self.g.sources.iter().copied().find(|&root| match (self.g.node(root), &node) {
            (Node::Source(a), Node::Source(b)) => {
                a.descriptor == b.descriptor
                    && (a.data_name.is_none() || b.data_name.is_none() || a.data_name == b.data_name)
            }
            (existing @ (Node::Sequence(_) | Node::Graticule(_)), _) => *existing == node,
            _ => false,
        });
        let Some(root) = found else {
            return self.g.add(node, None);
        };
        if let (Node::Source(existing), Node::Source(new)) = (self.g.node_mut(root), node)
            && existing.data_name.is_none()
        {
            existing.data_name = new.data_name;
        }
        root
    }

    fn add_output(&mut self, model: &Model, head: NodeIndex, kind: OutputKind, text: &str) -> NodeIndex {
        let name = model.get_name(text);
        let id = self.cx.unique_id();
        let index = self.g.add(Node::Output(OutputNode::new(name.clone(), kind, id)), Some(head));
        self.g.outputs.insert(name, index);
        index
    }

    /// Adds a parse node for the coercions not already applied above.
    pub fn parse_with_ancestors(
        &mut self,
        head: NodeIndex,
        mut explicit: BTreeMap<String, String>,
        mut implicit: BTreeMap<String, String>,
        ancestor_parse: &mut AncestorParse,
    ) -> NodeIndex {
        explicit.retain(|field, ty| match ancestor_parse.get(field) {
            None => true,
            Some(parsed) if parsed == ty => false,
            Some(parsed) => {
                self.cx.warn(different_parse(field, ty, parsed));
                true
            }
        });
        // An inferred coercion never overrides what the user or a transform
        // already decided for the field.
        implicit.retain(|field, ty| match ancestor_parse.get_with_explicit(field) {
            None => true,
            Some(parsed) => {
                if parsed.explicit || parsed.value == *ty || parsed.value == "derived" || ty == "flatten" {
                    false
                } else {
                    self.cx.warn(different_parse(field, ty, &parsed.value));
                    true
                }
            }
        });

        let split = Split {
            explicit,
            implicit,
        };
        ancestor_parse.copy_all(&split);

        let parse = split.combine();
        if parse.is_empty() || ancestor_parse.parse_nothing {
            return head;
        }
        self.g.add(Node::Parse(ParseNode::new(parse)), Some(head))
    }

    fn parse_transforms(
        &mut self,
        model: &Model,
        mut head: NodeIndex,
        ancestor_parse: &mut AncestorParse,
    ) -> Result<NodeIndex, CompileError> {
        let mut lookups = 0;
        for transform in &model.transforms {
            let (node, derived) = match transform {
                Transform::Filter(predicate) => {
                    let implicit = predicate.implicit_parse();
                    head = self.parse_with_ancestors(head, BTreeMap::new(), implicit, ancestor_parse);
                    (Node::Filter(FilterNode::new(predicate.clone())), "derived")
                }
                Transform::Calculate(t) => (Node::Formula(FormulaNode::new(t.calculate.clone(), t.r#as.clone())), "derived"),
                Transform::Bin(t) => {
                    let params = match normalize_bin(&t.bin, "") {
                        Some(Bin::Params(params)) => params,
                        _ => {
                            self.cx.warn(format!("Ignoring bin transform on \"{}\" that does not bin.", t.field));
                            continue;
                        }
                    };
                    let (key, component) = BinComponent::new(params, &t.field, t.r#as.fields(), &signal_prefix(&model.name));
                    (Node::Bin(BinNode::single(key, component)), "number")
                }
                Transform::TimeUnit(t) => {
                    let Some(unit) = TimeUnitParams::parse(&t.time_unit) else {
                        self.cx.warn(format!("Ignoring invalid time unit {}.", t.time_unit));
                        continue;
                    };
                    if ancestor_parse.get(&t.field).is_none() {
                        let parse = BTreeMap::from([(t.field.clone(), "date".to_string())]);
                        head = self.parse_with_ancestors(head, BTreeMap::new(), parse, ancestor_parse);
                    }
                    let component = TimeUnitComponent {
                        r#as: t.r#as.clone(),
                        field: t.field.clone(),
                        unit,
                    };
                    (Node::TimeUnit(TimeUnitNode::single(component)), "date")
                }
                Transform::Aggregate(t) => {
                    head = self.g.add(Node::Aggregate(AggregateNode::from_transform(t)), Some(head));
                    mark_produced(self.g.node(head), ancestor_parse, "number");
                    if self.requires_selection_id {
                        head = self.g.add(Node::Identifier, Some(head));
                    }
                    continue;
                }
                Transform::JoinAggregate(t) => (Node::JoinAggregate(JoinAggregateNode::from_transform(t)), "number"),
                Transform::Window(t) => (Node::Window(WindowNode { transform: t.clone() }), "number"),
                Transform::Lookup(t) => {
                    let secondary = if let Some(data) = &t.from.data {
                        let name = model.get_name(&format!("lookup_{lookups}"));
                        lookups += 1;
                        self.lookup_source(data, &name)?;
                        name
                    } else if let Some(param) = &t.from.param {
                        if !self.selections.contains(param) {
                            return Err(CompileError::spec(
                                "transform.lookup.from.param",
                                format!("undefined selection \"{param}\""),
                            ));
                        }
                        format!("{param}{STORE}")
                    } else {
                        return Err(CompileError::spec(
                            "transform.lookup.from",
                            "lookup requires data or a param",
                        ));
                    };
                    (Node::Lookup(LookupNode::new(t, secondary)), "derived")
                }
                Transform::Stack(t) => (Node::Stack(StackNode::from_transform(t)), "derived"),
                Transform::Fold(t) => (Node::Fold(FoldNode::from_transform(t)), "derived"),
                Transform::Flatten(t) => (Node::Flatten(FlattenNode::from_transform(t)), "derived"),
                Transform::Pivot(t) => (Node::Pivot(PivotNode { transform: t.clone() }), "derived"),
                Transform::Sample(t) => (Node::Sample(SampleNode { size: t.sample }), "derived"),
                Transform::Impute(t) => (Node::Impute(ImputeNode { transform: t.clone() }), "derived"),
                Transform::Statistical { method, transform } => (
                    Node::Statistical(StatisticalNode::from_transform(*method, transform)),
                    "derived",
                ),
                Transform::Extent(t) => (
                    Node::Extent(ExtentNode {
                        field: t.extent.clone(),
                        param: t.param.clone(),
                    }),
                    "derived",
                ),
            };
            head = self.g.add(node, Some(head));
            mark_produced(self.g.node(head), ancestor_parse, derived);
        }
        Ok(head)
    }

    /// Secondary dataset of a lookup, exposed as the output `name`.
    fn lookup_source(&mut self, data: &Value, name: &str) -> Result<(), CompileError> {
        let DataSetting::Data(data) = DataSetting::parse(Some(data))? else {
            return Err(CompileError::spec("transform.lookup.from.data", "expected a data source"));
        };
        let mut head = self.find_or_add_source(&data);
        if let ParseSetting::Fields(fields) = &data.parse {
            head = self.g.add(Node::Parse(ParseNode::new(fields.clone())), Some(head));
        }
        let id = self.cx.unique_id();
        let output = self.g.add(
            Node::Output(OutputNode::new(name, OutputKind::Lookup, id)),
            Some(head),
        );
        self.g.outputs.insert(name.to_string(), output);
        self.g.request(name);
        Ok(())
    }

    fn bins_from_encoding(&mut self, model: &Model, defs: &[&FieldDef], head: NodeIndex) -> NodeIndex {
        let mut node = BinNode::default();
        for def in defs {
            let (Some(params), Some(field)) = (def.bin_params(), &def.field) else {
                continue;
            };
            let start = format!("{}_{}", bin_to_string(params), flat_access_name(field));
            let end = format!("{start}_end");
            let (key, mut component) = BinComponent::new(params.clone(), field, [start.clone(), end.clone()], &signal_prefix(&model.name));
            if bin_requires_range(def) {
                component = component.with_range(format!("{start}_range"));
            }
            match node.bins.get_mut(&key) {
                Some(existing) => {
                    if !existing.r#as.contains(&[start.clone(), end.clone()]) {
                        existing.r#as.push([start, end]);
                    }
                    if existing.range.is_none() {
                        existing.range = component.range;
                    }
                }
                None => {
                    node.bins.insert(key, component);
                }
            }
        }
        if node.bins.is_empty() {
            return head;
        }
        self.g.add(Node::Bin(node), Some(head))
    }

    fn geo_nodes(&mut self, model: &Model, unit: &UnitModel, mut head: NodeIndex) -> NodeIndex {
        for node in geojson_nodes(model, unit) {
            head = self.g.add(Node::GeoJson(node), Some(head));
        }
        let projection = self.renames.resolve(&model.get_name("projection"));
        for (lon, lat, x, y) in [("longitude", "latitude", "x", "y"), ("longitude2", "latitude2", "x2", "y2")] {
            if let Some([lon, lat]) = coordinate_fields(unit, lon, lat) {
                let node = GeoPointNode {
                    projection: projection.clone(),
                    fields: [lon, lat],
                    r#as: [model.get_name(x), model.get_name(y)],
                };
                head = self.g.add(Node::GeoPoint(node), Some(head));
            }
        }
        head
    }

    fn filter_invalid(&mut self, model: &Model, unit: &UnitModel) -> Option<FilterInvalidNode> {
        let invalid = match unit.mark.props.get("invalid") {
            Some(Value::String(s)) if s == "filter" => Some(Invalid::Filter),
            Some(_) => None,
            None => self.config.mark.invalid,
        };
        if invalid.is_none() || PATH_MARKS.contains(&unit.mark.ty.as_str()) {
            return None;
        }
        let mut fields = BTreeMap::new();
        for def in unit.encoding.iter() {
            if def.is_count() || def.field.is_none() {
                continue;
            }
            let channel = scale_channel(&def.channel);
            let Some(scale) = model.component.scales.get(channel) else {
                continue;
            };
            if has_continuous_domain(scale.ty()) {
                fields.insert(def.vg_field(Suffix::None), def.ty);
            }
        }
        if fields.is_empty() {
            return None;
        }
        Some(FilterInvalidNode { fields })
    }
}

fn different_parse(field: &str, local: &str, ancestor: &str) -> String {
    format!("Conflicting parse for field \"{field}\": \"{local}\" vs. \"{ancestor}\" parsed by an ancestor. Using \"{local}\".")
}

fn mark_produced(node: &Node, ancestor_parse: &mut AncestorParse, ty: &str) {
    for field in node.produced_fields().unwrap_or_default() {
        ancestor_parse.set(field, ty, false);
    }
}

/// Field definitions whose fields the model's own dataflow must prepare.
fn encoded_defs(model: &Model) -> Vec<&FieldDef> {
    match &model.kind {
        ModelKind::Unit(unit) => unit.encoding.iter().collect(),
        ModelKind::Facet { facet, .. } => facet.iter().map(|(_, def)| def).collect(),
        _ => Vec::new(),
    }
}

fn bin_requires_range(def: &FieldDef) -> bool {
    def.ty.is_discrete() && SCALE_CHANNELS.contains(&def.channel.as_str())
}

/// Coercions the encoding needs before its fields can be used.
fn implicit_parse(model: &Model, defs: &[&FieldDef]) -> BTreeMap<String, String> {
    let mut parse = BTreeMap::new();
    for def in defs {
        let Some(field) = &def.field else {
            continue;
        };
        if def.ty == FieldType::Geojson {
            continue;
        }
        if def.ty == FieldType::Temporal || def.time_unit.is_some() {
            parse.insert(field.clone(), "date".to_string());
        } else if def.ty == FieldType::Quantitative && matches!(def.aggregate.as_deref(), Some("min" | "max")) {
            parse.insert(field.clone(), "number".to_string());
        } else if is_nested(field) {
            parse.entry(field.clone()).or_insert_with(|| "flatten".to_string());
        }
        if let Some(Value::Object(sort)) = &def.sort
            && let Some(Value::String(sort_field)) = sort.get("field")
            && is_nested(sort_field)
        {
            parse.entry(sort_field.clone()).or_insert_with(|| "flatten".to_string());
        }
    }

    // Paths connect points in dimension order, so that field must be numeric.
    if let ModelKind::Unit(unit) = &model.kind
        && PATH_MARKS.contains(&unit.mark.ty.as_str())
        && unit.encoding.get("order").is_none()
    {
        let horizontal = unit.mark.props.get("orient").and_then(Value::as_str) == Some("horizontal");
        let dimension = if horizontal { "y" } else { "x" };
        if let Some(def) = unit.encoding.get(dimension)
            && def.ty == FieldType::Quantitative
            && def.aggregate.is_none()
            && !def.is_binned()
            && let Some(field) = &def.field
        {
            parse.entry(field.clone()).or_insert_with(|| "number".to_string());
        }
    }
    parse
}

fn time_units_from_encoding(g: &mut DataflowGraph, defs: &[&FieldDef], head: NodeIndex) -> NodeIndex {
    let mut node = TimeUnitNode::default();
    for def in defs {
        let (Some(unit), Some(field)) = (&def.time_unit, &def.field) else {
            continue;
        };
        if def.is_binned() {
            continue;
        }
        let r#as = format!("{}_{}", unit.full_name(), flat_access_name(field));
        node.formulas.entry(r#as.clone()).or_insert_with(|| TimeUnitComponent {
            r#as,
            field: field.clone(),
            unit: unit.clone(),
        });
    }
    if node.formulas.is_empty() {
        return head;
    }
    g.add(Node::TimeUnit(node), Some(head))
}

fn coordinate_fields(unit: &UnitModel, lon: &str, lat: &str) -> Option<[String; 2]> {
    let lon = unit.encoding.get(lon)?.field.clone()?;
    let lat = unit.encoding.get(lat)?.field.clone()?;
    Some([lon, lat])
}

/// GeoJSON feature nodes of a unit. Their signals feed the projection fit.
pub fn geojson_nodes(model: &Model, unit: &UnitModel) -> Vec<GeoJsonNode> {
    let mut out = Vec::new();
    for (lon, lat) in [("longitude", "latitude"), ("longitude2", "latitude2")] {
        if let Some(fields) = coordinate_fields(unit, lon, lat) {
            out.push(GeoJsonNode {
                fields: Some(fields),
                geojson: None,
                signal: format!("{}_{}", model.get_name("geojson"), out.len()),
            });
        }
    }
    if let Some(def) = unit.encoding.get("shape")
        && def.ty == FieldType::Geojson
        && let Some(field) = &def.field
    {
        out.push(GeoJsonNode {
            fields: None,
            geojson: Some(field.clone()),
            signal: format!("{}_{}", model.get_name("geojson"), out.len()),
        });
    }
    out
}

fn aggregate_from_encoding(model: &Model, unit: &UnitModel) -> Option<AggregateNode> {
    if !unit.encoding.has_aggregate() {
        return None;
    }
    let mut node = AggregateNode::default();
    for def in unit.encoding.iter() {
        match &def.aggregate {
            Some(op) if op == "count" => node.add_measure(None, op, def.vg_field(Suffix::None)),
            Some(op) => node.add_measure(def.field.as_deref(), op, def.vg_field(Suffix::None)),
            None => {
                if let Some(position) = projected_position(&def.channel) {
                    node.dimensions.insert(model.get_name(position));
                    continue;
                }
                node.dimensions.insert(def.vg_field(Suffix::None));
                if def.bin_params().is_some() {
                    node.dimensions.insert(def.vg_field(Suffix::End));
                    if bin_requires_range(def) {
                        node.dimensions.insert(def.vg_field(Suffix::Range));
                    }
                }
            }
        }
    }
    Some(node)
}

/// Coordinates are aggregated through the positions they project to.
fn projected_position(channel: &str) -> Option<&'static str> {
    Some(match channel {
        "longitude" => "x",
        "latitude" => "y",
        "longitude2" => "x2",
        "latitude2" => "y2",
        _ => return None,
    })
}

fn path_grouping_fields(unit: &UnitModel) -> Vec<String> {
    let mut out = Vec::new();
    for channel in PATH_GROUPING_CHANNELS {
        for def in unit.encoding.channels.get(*channel).into_iter().flatten() {
            if def.aggregate.is_none() {
                let field = def.vg_field(Suffix::None);
                if !out.contains(&field) {
                    out.push(field);
                }
            }
        }
    }
    out
}

fn impute_from_encoding(unit: &UnitModel) -> Option<ImputeTransform> {
    let (x, y) = (unit.encoding.get("x")?, unit.encoding.get("y")?);
    let (imputed, key) = match (&x.impute, &y.impute) {
        (Some(_), _) => (x, y),
        (None, Some(_)) => (y, x),
        _ => return None,
    };
    let params = imputed.impute.as_ref().and_then(Value::as_object).cloned().unwrap_or_default();
    Some(ImputeTransform {
        impute: imputed.vg_field(Suffix::None),
        key: key.vg_field(Suffix::None),
        keyvals: params.get("keyvals").cloned(),
        groupby: path_grouping_fields(unit),
        frame: params.get("frame").and_then(|f| serde_json::from_value(f.clone()).ok()),
        method: params.get("method").and_then(Value::as_str).map(str::to_string),
        value: params.get("value").cloned(),
    })
}

fn stack_from_encoding(unit: &UnitModel) -> Option<StackNode> {
    let stack = unit.stack.as_ref()?;
    let field = unit.encoding.get(stack.field_channel)?.vg_field(Suffix::None);

    let mut groupby = Vec::new();
    if let Some(channel) = stack.groupby_channel
        && let Some(def) = unit.encoding.get(channel)
    {
        groupby.push(def.vg_field(Suffix::None));
        if def.bin_params().is_some() && def.aggregate.is_none() {
            groupby.push(def.vg_field(Suffix::End));
        }
    }

    let stackby: Vec<String> = stack.stackby.iter().map(|d| d.vg_field(Suffix::None)).collect();
    let (sort_fields, sort_order) = match unit.encoding.channels.get("order") {
        Some(defs) => defs
            .iter()
            .map(|d| {
                let order = if d.sort.as_ref().and_then(Value::as_str) == Some("descending") {
                    "descending"
                } else {
                    "ascending"
                };
                (d.vg_field(Suffix::None), order.to_string())
            })
            .unzip(),
        None => {
            let order = if stack.field_channel == "y" { "descending" } else { "ascending" };
            stackby.iter().map(|f| (f.clone(), order.to_string())).unzip()
        }
    };

    Some(StackNode {
        groupby,
        facetby: Vec::new(),
        r#as: [format!("{field}_start"), format!("{field}_end")],
        field,
        stackby,
        sort_fields,
        sort_order,
        offset: stack.offset.clone(),
    })
}

fn facet_channel(model: &Model, channel: &str, def: &FieldDef) -> FacetChannel {
    let mut fields = vec![def.vg_field(Suffix::None)];
    if def.bin_params().is_some() {
        fields.push(def.vg_field(Suffix::End));
    }
    let sort = match &def.sort {
        Some(Value::Object(sort)) => sort.get("field").and_then(Value::as_str).map(|field| {
            let op = sort.get("op").and_then(Value::as_str).unwrap_or("mean").to_string();
            let r#as = format!("{op}_{}", flat_access_name(field));
            (op, field.to_string(), r#as)
        }),
        _ => None,
    };
    FacetChannel {
        name: model.get_name(&format!("{channel}_domain")),
        fields,
        sort,
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;
    use crate::model::{scale, selection};
    use crate::spec::Spec;

    struct Built {
        g: DataflowGraph,
        model: Model,
        cx: CompileContext,
    }

    fn build(value: Value) -> Result<Built, CompileError> {
        let mut cx = CompileContext::default();
        let spec = Spec::parse(&mut cx, &value)?;
        let mut model = Model::build(&mut cx, spec)?;
        selection::parse_selections(&mut model);
        let config = Config::default();
        let mut renames = Renames::default();
        scale::parse_scales(&mut cx, &mut model, &config, &mut renames);
        let mut selections = BTreeSet::new();
        model.walk(&mut |m| selections.extend(m.component.selections.iter().map(|s| s.name.clone())));
        let requires_selection_id = selection::requires_selection_id(&model);

        let mut g = DataflowGraph::new();
        let mut builder = DataBuilder {
            cx: &mut cx,
            g: &mut g,
            config: &config,
            renames: &renames,
            selections,
            requires_selection_id,
        };
        builder.parse_data(&mut model, None)?;
        Ok(Built { g, model, cx })
    }

    #[test]
    fn test_bin_signal_prefix() {
        let params = BinParams::from([("maxbins".to_string(), json!(10))]);
        assert_eq!(bin_signal("", &params, "a"), "bin_maxbins_10_a_bins");
        assert_eq!(bin_signal("layer_0", &params, "a"), "layer_0_bin_maxbins_10_a_bins");
    }

    #[test]
    fn test_unit_chain() {
        let built = build(json!({
            "data": {"values": [{"a": "x", "b": 1}]},
            "transform": [{"filter": "datum.b > 0"}],
            "mark": "bar",
            "encoding": {
                "x": {"field": "a", "type": "nominal"},
                "y": {"aggregate": "sum", "field": "b", "type": "quantitative"}
            }
        }))
        .unwrap();
        assert_eq!(
            built.g.debug_tree(),
            "Source\n  Identifier\n    Filter\n      Output raw (raw)\n        Aggregate [a]\n          FilterInvalid\n            Output main (main)\n"
        );
        assert_eq!(built.g.ref_count("main"), 1);
        assert!(built.model.component.data.main.is_some());
    }

    #[test]
    fn test_layers_share_inherited_parse() {
        let built = build(json!({
            "data": {"url": "data.csv"},
            "layer": [
                {"mark": "line", "encoding": {"x": {"field": "date", "type": "temporal"}}},
                {"mark": "rule", "encoding": {"x": {"field": "date", "type": "temporal"}}}
            ]
        }))
        .unwrap();
        let parses = built
            .g
            .debug_tree()
            .lines()
            .filter(|l| l.trim_start().starts_with("Parse"))
            .count();
        assert_eq!(parses, 2);
        assert!(!built.cx.diagnostics().has_warnings());
    }

    #[test]
    fn test_conflicting_parse_warns() {
        let mut cx = CompileContext::default();
        let mut g = DataflowGraph::new();
        let config = Config::default();
        let renames = Renames::default();
        let mut builder = DataBuilder {
            cx: &mut cx,
            g: &mut g,
            config: &config,
            renames: &renames,
            selections: BTreeSet::new(),
            requires_selection_id: false,
        };
        let root = builder.g.add(Node::Source(SourceNode::empty()), None);
        let mut ancestors = AncestorParse::default();
        ancestors.set("a", "number", false);
        ancestors.set("b", "derived", false);
        ancestors.set("c", "number", true);
        ancestors.set("d", "date", false);

        let implicit = BTreeMap::from([
            ("a".to_string(), "date".to_string()),
            ("b".to_string(), "date".to_string()),
            ("c".to_string(), "date".to_string()),
        ]);
        let explicit = BTreeMap::from([("d".to_string(), "number".to_string())]);
        let head = builder.parse_with_ancestors(root, explicit, implicit, &mut ancestors);

        assert_eq!(
            builder.g.node(head),
            &Node::Parse(ParseNode::new(BTreeMap::from([
                ("a".to_string(), "date".to_string()),
                ("d".to_string(), "number".to_string()),
            ])))
        );
        assert_eq!(cx.diagnostics().warnings().count(), 2);
        assert_eq!(ancestors.get("b").map(String::as_str), Some("derived"));
        assert_eq!(ancestors.get_with_explicit("c").map(|e| e.value), Some("number".to_string()));
        assert_eq!(ancestors.get_with_explicit("d").map(|e| e.explicit), Some(true));
    }

    #[test]
    fn test_implicit_parse_skips_derived_and_explicit_fields() {
        let built = build(json!({
            "data": {"url": "data.csv", "format": {"parse": {"a": "number"}}},
            "transform": [{"calculate": "now()", "as": "t"}],
            "layer": [
                {"mark": "point", "encoding": {"x": {"field": "t", "type": "temporal"}}},
                {"mark": "point", "encoding": {"x": {"field": "a", "type": "temporal"}}}
            ]
        }))
        .unwrap();
        let parses: Vec<&Node> = built
            .g
            .sources
            .iter()
            .flat_map(|&root| built.g.subtree(root))
            .map(|index| built.g.node(index))
            .filter(|node| matches!(node, Node::Parse(_)))
            .collect();
        assert_eq!(
            parses,
            vec![&Node::Parse(ParseNode::new(BTreeMap::from([("a".to_string(), "number".to_string())])))]
        );
        assert!(!built.cx.diagnostics().has_warnings());
    }

    #[test]
    fn test_null_data_under_parent_starts_fresh() {
        let built = build(json!({
            "data": {"values": [{"a": "x", "b": 1}]},
            "transform": [{"filter": "datum.b > 0"}],
            "layer": [
                {"mark": "point", "encoding": {"x": {"field": "a", "type": "nominal"}}},
                {"data": null, "mark": "rule"}
            ]
        }))
        .unwrap();
        assert_eq!(built.g.sources.len(), 2);
        let fresh = built.g.sources[1];
        assert_eq!(built.g.node(fresh), &Node::Source(SourceNode::empty()));

        let subtree = built.g.subtree(fresh);
        assert!(subtree.contains(&built.g.outputs["layer_1_main"]));
        assert!(!subtree.contains(&built.g.outputs["layer_0_main"]));
        assert!(subtree.iter().all(|&i| !matches!(built.g.node(i), Node::Filter(_) | Node::Parse(_))));
        assert_eq!(built.model.children()[1].component.data.ancestor_parse, AncestorParse::default());
    }

    #[test]
    fn test_parse_null_disables_parsing() {
        let built = build(json!({
            "data": {"url": "data.csv", "format": {"parse": null}},
            "mark": "point",
            "encoding": {"x": {"field": "date", "type": "temporal"}}
        }))
        .unwrap();
        assert!(!built.g.debug_tree().contains("Parse"));
    }

    #[test]
    fn test_identical_sources_are_shared() {
        let built = build(json!({
            "vconcat": [
                {"data": {"url": "a.csv"}, "mark": "point"},
                {"data": {"url": "a.csv"}, "mark": "rule"},
                {"data": null, "mark": "rule"}
            ]
        }))
        .unwrap();
        assert_eq!(built.g.sources.len(), 3);
    }

    #[test]
    fn test_lookup_from_data_adds_requested_output() {
        let built = build(json!({
            "data": {"values": [{"k": 1}]},
            "transform": [{"lookup": "k", "from": {"data": {"values": [{"k": 1, "v": 2}]}, "key": "k", "fields": ["v"]}}],
            "mark": "point"
        }))
        .unwrap();
        assert!(built.g.outputs.contains_key("lookup_0"));
        assert_eq!(built.g.ref_count("lookup_0"), 1);
    }

    #[test]
    fn test_lookup_of_undefined_selection_is_fatal() {
        let result = build(json!({
            "data": {"values": []},
            "transform": [{"lookup": "k", "from": {"param": "nope", "key": "k"}}],
            "mark": "point"
        }));
        assert!(matches!(result, Err(CompileError::InvalidSpec { .. })));
    }

    #[test]
    fn test_stack_from_encoding() {
        let built = build(json!({
            "data": {"values": []},
            "mark": "bar",
            "encoding": {
                "x": {"field": "a", "type": "nominal"},
                "y": {"aggregate": "sum", "field": "b", "type": "quantitative"},
                "color": {"field": "c", "type": "nominal"}
            }
        }))
        .unwrap();
        let stack = built.g.outputs.get("main").map(|&main| built.g.parent(main).unwrap()).unwrap();
        let stack = built.g.parent(stack).unwrap();
        let Node::Stack(stack) = built.g.node(stack) else {
            panic!("expected a stack above the invalid filter");
        };
        assert_eq!(stack.groupby, vec!["a".to_string()]);
        assert_eq!(stack.stackby, vec!["c".to_string()]);
        assert_eq!(stack.sort_order, vec!["descending".to_string()]);
        assert_eq!(stack.r#as, ["sum_b_start".to_string(), "sum_b_end".to_string()]);
    }

    #[test]
    fn test_facet_node_registers_output() {
        let built = build(json!({
            "data": {"values": []},
            "facet": {"row": {"field": "r", "type": "nominal"}},
            "spec": {"mark": "point", "encoding": {"x": {"field": "a", "type": "nominal"}}}
        }))
        .unwrap();
        let facet = built.g.outputs["facet"];
        let Node::Facet(node) = built.g.node(facet) else {
            panic!("expected a facet node");
        };
        assert_eq!(node.row.as_ref().map(|r| r.name.as_str()), Some("row_domain"));
        assert_eq!(
            node.child_independent_fields,
            BTreeMap::new(),
            "shared child scales are sized by the parent"
        );
        assert_eq!(built.g.ref_count("main"), 1);
        assert!(built.g.outputs.contains_key("child_main"));
    }
}
