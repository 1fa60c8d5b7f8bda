use std::collections::BTreeSet;

use serde_json::{Value, json};

use crate::core::{CompileContext, Hash32, Renames};
use crate::dataflow::nodes::*;

/// One stage of the dataflow. The set of kinds is closed; every operation
/// dispatches with an exhaustive match.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Source(SourceNode),
    Sequence(SequenceNode),
    Graticule(GraticuleNode),
    Output(OutputNode),
    Facet(FacetNode),
    Parse(ParseNode),
    Identifier,
    Formula(FormulaNode),
    Filter(FilterNode),
    FilterInvalid(FilterInvalidNode),
    Bin(BinNode),
    TimeUnit(TimeUnitNode),
    Aggregate(AggregateNode),
    JoinAggregate(JoinAggregateNode),
    Lookup(LookupNode),
    Window(WindowNode),
    Stack(StackNode),
    Fold(FoldNode),
    Flatten(FlattenNode),
    Pivot(PivotNode),
    Sample(SampleNode),
    Impute(ImputeNode),
    Statistical(StatisticalNode),
    Extent(ExtentNode),
    GeoPoint(GeoPointNode),
    GeoJson(GeoJsonNode),
}

impl Node {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Node::Source(_) => "Source",
            Node::Sequence(_) => "Sequence",
            Node::Graticule(_) => "Graticule",
            Node::Output(_) => "Output",
            Node::Facet(_) => "Facet",
            Node::Parse(_) => "Parse",
            Node::Identifier => "Identifier",
            Node::Formula(_) => "Formula",
            Node::Filter(_) => "Filter",
            Node::FilterInvalid(_) => "FilterInvalid",
            Node::Bin(_) => "Bin",
            Node::TimeUnit(_) => "TimeUnit",
            Node::Aggregate(_) => "Aggregate",
            Node::JoinAggregate(_) => "JoinAggregate",
            Node::Lookup(_) => "Lookup",
            Node::Window(_) => "Window",
            Node::Stack(_) => "Stack",
            Node::Fold(_) => "Fold",
            Node::Flatten(_) => "Flatten",
            Node::Pivot(_) => "Pivot",
            Node::Sample(_) => "Sample",
            Node::Impute(_) => "Impute",
            Node::Statistical(_) => "Statistical",
            Node::Extent(_) => "Extent",
            Node::GeoPoint(_) => "GeoPoint",
            Node::GeoJson(_) => "GeoJson",
        }
    }

    pub fn debug_name(&self) -> String {
        match self {
            Node::Output(o) => format!("Output {} ({})", o.name, o.source),
            Node::Facet(f) => format!("Facet {}", f.name),
            Node::Parse(p) => format!("Parse {:?}", p.parse),
            Node::Bin(b) => format!("Bin {:?}", b.bins.keys().collect::<Vec<_>>()),
            Node::Aggregate(a) => format!("Aggregate [{}]", a.groupby_key()),
            other => other.kind_name().to_string(),
        }
    }

    /// Roots that generate or load data.
    pub fn is_data_source(&self) -> bool {
        matches!(self, Node::Source(_) | Node::Sequence(_) | Node::Graticule(_))
    }

    pub fn as_output(&self) -> Option<&OutputNode> {
        match self {
            Node::Output(o) => Some(o),
            _ => None,
        }
    }

    /// Canonical description of what the node computes.
    fn identity(&self) -> Value {
        match self {
            Node::Source(s) => s.identity(),
            Node::Sequence(s) => s.assemble(),
            Node::Graticule(g) => g.assemble(),
            Node::Output(o) => json!(o.id),
            Node::Facet(f) => json!(f.id),
            Node::Parse(p) => json!(p.parse),
            Node::Identifier => Value::Null,
            Node::Formula(f) => f.assemble(),
            Node::Filter(f) => f.assemble(),
            Node::FilterInvalid(f) => {
                let fields: Vec<String> = f.fields.iter().map(|(k, t)| format!("{k}:{t:?}")).collect();
                json!(fields)
            }
            Node::Bin(b) => b.identity(),
            Node::TimeUnit(t) => t.identity(),
            Node::Aggregate(a) => a.identity(),
            Node::JoinAggregate(j) => j.identity(),
            Node::Lookup(l) => l.identity(),
            Node::Window(w) => w.identity(),
            Node::Stack(s) => s.identity(),
            Node::Fold(f) => f.assemble(),
            Node::Flatten(f) => f.assemble(),
            Node::Pivot(p) => p.identity(),
            Node::Sample(s) => s.assemble(),
            Node::Impute(i) => i.identity(),
            Node::Statistical(s) => s.identity(),
            Node::Extent(e) => e.assemble(),
            Node::GeoPoint(g) => g.identity(),
            Node::GeoJson(g) => g.identity(),
        }
    }

    /// Structural hash. Equal hashes on siblings mean the nodes are
    /// interchangeable; outputs and facets carry their id and never collide.
    pub fn hash(&self) -> Hash32 {
        Hash32::hash(format!("{} {}", self.kind_name(), self.identity()))
    }

    pub fn dependent_fields(&self) -> BTreeSet<String> {
        match self {
            Node::Source(_)
            | Node::Sequence(_)
            | Node::Graticule(_)
            | Node::Output(_)
            | Node::Identifier
            | Node::Sample(_) => BTreeSet::new(),
            Node::Facet(f) => f.dependent_fields(),
            Node::Parse(p) => p.fields(),
            Node::Formula(f) => f.dependent_fields(),
            Node::Filter(f) => f.dependent_fields(),
            Node::FilterInvalid(f) => f.dependent_fields(),
            Node::Bin(b) => b.dependent_fields(),
            Node::TimeUnit(t) => t.dependent_fields(),
            Node::Aggregate(a) => a.dependent_fields(),
            Node::JoinAggregate(j) => j.dependent_fields(),
            Node::Lookup(l) => l.dependent_fields(),
            Node::Window(w) => w.dependent_fields(),
            Node::Stack(s) => s.dependent_fields(),
            Node::Fold(f) => f.dependent_fields(),
            Node::Flatten(f) => f.dependent_fields(),
            Node::Pivot(p) => p.dependent_fields(),
            Node::Impute(i) => i.dependent_fields(),
            Node::Statistical(s) => s.dependent_fields(),
            Node::Extent(e) => BTreeSet::from([e.field.clone()]),
            Node::GeoPoint(g) => g.dependent_fields(),
            Node::GeoJson(g) => g.dependent_fields(),
        }
    }

    /// Fields added or overwritten; `None` when not statically known.
    pub fn produced_fields(&self) -> Option<BTreeSet<String>> {
        Some(match self {
            Node::Source(_)
            | Node::Graticule(_)
            | Node::Output(_)
            | Node::Facet(_)
            | Node::Filter(_)
            | Node::FilterInvalid(_)
            | Node::Sample(_)
            | Node::Extent(_)
            | Node::GeoJson(_) => BTreeSet::new(),
            Node::Pivot(_) => return None,
            Node::Sequence(s) => BTreeSet::from([s.r#as.clone()]),
            Node::Parse(p) => p.fields(),
            Node::Identifier => BTreeSet::from([SELECTION_ID.to_string()]),
            Node::Formula(f) => f.produced_fields(),
            Node::Bin(b) => b.produced_fields(),
            Node::TimeUnit(t) => t.produced_fields(),
            Node::Aggregate(a) => a.produced_fields(),
            Node::JoinAggregate(j) => j.produced_fields(),
            Node::Lookup(l) => l.produced_fields(),
            Node::Window(w) => w.produced_fields(),
            Node::Stack(s) => s.produced_fields(),
            Node::Fold(f) => f.produced_fields(),
            Node::Flatten(f) => f.produced_fields(),
            Node::Impute(i) => i.produced_fields(),
            Node::Statistical(s) => s.produced_fields(),
            Node::GeoPoint(g) => g.produced_fields(),
        })
    }

    /// Transform records of this node. Sources, outputs and facets are
    /// handled by the assembler and emit nothing here.
    pub fn assemble(&self, cx: &mut CompileContext, signals: &Renames) -> Vec<Value> {
        match self {
            Node::Source(_) | Node::Output(_) | Node::Facet(_) => Vec::new(),
            Node::Sequence(s) => vec![s.assemble()],
            Node::Graticule(g) => vec![g.assemble()],
            Node::Parse(p) => p.assemble_transforms(cx, false),
            Node::Identifier => vec![json!({ "type": "identifier", "as": SELECTION_ID })],
            Node::Formula(f) => vec![f.assemble()],
            Node::Filter(f) => vec![f.assemble()],
            Node::FilterInvalid(f) => f.assemble().into_iter().collect(),
            Node::Bin(b) => b.assemble(signals),
            Node::TimeUnit(t) => t.assemble(),
            Node::Aggregate(a) => vec![a.assemble()],
            Node::JoinAggregate(j) => vec![j.assemble()],
            Node::Lookup(l) => vec![l.assemble(cx)],
            Node::Window(w) => vec![w.assemble()],
            Node::Stack(s) => vec![s.assemble()],
            Node::Fold(f) => vec![f.assemble()],
            Node::Flatten(f) => vec![f.assemble()],
            Node::Pivot(p) => vec![p.assemble()],
            Node::Sample(s) => vec![s.assemble()],
            Node::Impute(i) => i.assemble(),
            Node::Statistical(s) => vec![s.assemble()],
            Node::Extent(e) => vec![e.assemble()],
            Node::GeoPoint(g) => vec![g.assemble()],
            Node::GeoJson(g) => vec![g.assemble()],
        }
    }

    /// Gives a copied node its own identity where identity matters.
    pub fn refresh_identity(&mut self, cx: &mut CompileContext) {
        match self {
            Node::Output(o) => o.id = cx.unique_id(),
            Node::Facet(f) => f.id = cx.unique_id(),
            _ => {}
        }
    }

    /// Adds facet fields to grouping nodes. Returns whether the node groups.
    pub fn add_dimensions(&mut self, fields: &[String]) -> bool {
        match self {
            Node::Aggregate(a) => a.add_dimensions(fields),
            Node::Stack(s) => s.add_dimensions(fields),
            Node::Window(w) => w.add_dimensions(fields),
            Node::JoinAggregate(j) => j.add_dimensions(fields),
            _ => return false,
        }
        true
    }
}
