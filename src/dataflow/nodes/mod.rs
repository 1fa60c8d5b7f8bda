mod aggregate;
mod bin;
mod facet;
mod filter;
mod formula;
mod geo;
mod impute;
mod lookup;
mod output;
mod parse;
mod reshape;
mod source;
mod stack;
mod statistics;
mod timeunit;
mod window;

pub use aggregate::{AggregateNode, COUNT_FIELD, JoinAggregateNode, Measures};
pub use bin::{BinComponent, BinNode, bin_key};
pub use facet::{FacetChannel, FacetNode};
pub use filter::{FilterInvalidNode, FilterNode};
pub use formula::{FormulaNode, sort_index_field};
pub use geo::{GeoJsonNode, GeoPointNode};
pub use impute::ImputeNode;
pub use lookup::LookupNode;
pub use output::{OutputKind, OutputNode};
pub use parse::ParseNode;
pub use reshape::{FlattenNode, FoldNode, PivotNode, SampleNode};
pub use source::{GraticuleNode, SequenceNode, SourceNode};
pub use stack::StackNode;
pub use statistics::{ExtentNode, StatisticalNode};
pub use timeunit::{TimeUnitComponent, TimeUnitNode};
pub use window::{WindowNode, is_aggregate_op};

/// Field holding the stable row identifier used by point selections.
pub const SELECTION_ID: &str = "_vgsid_";
