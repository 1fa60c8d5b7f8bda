#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

pub mod config;
pub mod core;
pub mod dataflow;
mod error;
pub mod expr;
pub mod model;
pub mod spec;
pub mod split;

use std::collections::BTreeSet;

use serde_json::{Map, Value, json};
use tracing::{debug, info, instrument};

pub use crate::config::{CompileOptions, Config};
pub use crate::core::{CompileContext, Diagnostics, LogLevel, Renames};
pub use crate::error::*;

use crate::dataflow::{DataflowGraph, OptimizeOptions, assemble, optimize};
use crate::model::build::DataBuilder;
use crate::model::mark::AssembleContext;
use crate::model::{Model, axis, legend, projection, scale, selection};
use crate::spec::Spec;

const VEGA_SCHEMA: &str = "https://vega.github.io/schema/vega/v5.json";

/// Result of a successful compilation.
#[derive(Debug)]
pub struct CompileOutput {
    /// The assembled spec: datasets, selection signals, components and mark
    /// stubs.
    pub spec: Value,
    pub diagnostics: Diagnostics,
    /// Signals renamed while merging dataflow nodes.
    pub signal_renames: Renames,
    /// Child scales renamed to the shared scale that replaced them.
    pub scale_renames: Renames,
}

/// Compiles a declarative visualization spec into named datasets and the
/// components that read them.
///
/// A top-level `config` block, when present, replaces `opts.config`.
#[instrument(skip_all)]
pub fn compile(spec: &Value, opts: &CompileOptions) -> Result<CompileOutput, CompileError> {
    let mut cx = CompileContext::new(opts.log_level);
    let config: Config = match spec.get("config") {
        Some(config) => serde_json::from_value(config.clone())?,
        None => opts.config.clone(),
    };

    let parsed = Spec::parse(&mut cx, spec)?;
    let mut model = Model::build(&mut cx, parsed)?;

    selection::parse_selections(&mut model);
    let mut scale_renames = Renames::default();
    scale::parse_scales(&mut cx, &mut model, &config, &mut scale_renames);
    let mut projection_renames = Renames::default();
    projection::parse_projections(&mut cx, &mut model, &mut projection_renames);

    let requires_selection_id = selection::requires_selection_id(&model);
    let mut selections = BTreeSet::new();
    model.walk(&mut |m| selections.extend(m.component.selections.iter().map(|s| s.name.clone())));

    let mut g = DataflowGraph::new();
    DataBuilder {
        cx: &mut cx,
        g: &mut g,
        config: &config,
        renames: &projection_renames,
        selections,
        requires_selection_id,
    }
    .parse_data(&mut model, None)?;
    debug!(nodes = g.node_count(), "built dataflow");

    axis::parse_axes(&mut cx, &mut model);
    legend::parse_legends(&mut cx, &mut model);

    optimize(&mut g, &mut cx, OptimizeOptions { requires_selection_id })?;
    let assembled = assemble(&mut g, &mut cx);
    let signal_renames = g.signal_renames.clone();

    let mut data = selection::assemble_stores(&model);
    data.extend(assembled.data.iter().cloned());

    let group = AssembleContext {
        g: &g,
        data: &assembled,
        scales: &scale_renames,
        signals: &signal_renames,
    }
    .assemble_group(&model);

    let mut out = Map::new();
    out.insert("$schema".into(), json!(VEGA_SCHEMA));
    if let Some(title) = &model.title {
        out.insert("title".into(), title.clone());
    }
    out.insert("data".into(), Value::Array(data));
    let signals = selection::assemble_signals(&model);
    if !signals.is_empty() {
        out.insert("signals".into(), Value::Array(signals));
    }
    group.write_into(&mut out);

    info!(datasets = assembled.names().len(), "compiled");
    Ok(CompileOutput {
        spec: Value::Object(out),
        diagnostics: cx.into_diagnostics(),
        signal_renames,
        scale_renames,
    })
}

/// Installs a `fmt` subscriber filtered by `RUST_LOG`, defaulting to `warn`.
#[cfg(feature = "logging")]
pub fn init_logging() -> anyhow::Result<()> {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn,vlflow=info"));
    fmt()
        .with_env_filter(filter)
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to install the tracing subscriber:\n{e}"))
}
