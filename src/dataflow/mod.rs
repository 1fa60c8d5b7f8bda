//! The dataflow intermediate representation: nodes, the graph that holds
//! them, the optimizer and the assembler.

pub mod assemble;
pub mod graph;
pub mod node;
pub mod nodes;
pub mod optimizer;

pub use self::assemble::{AssembledData, FacetData, assemble};
pub use self::graph::DataflowGraph;
pub use self::node::Node;
pub use self::optimizer::{OptimizeOptions, optimize};
