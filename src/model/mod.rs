//! The model tree: one node per view of the input, with the components
//! (data, scales, axes, legends, projection, selections) parsed for it.

pub mod axis;
pub mod build;
pub mod legend;
pub mod mark;
pub mod projection;
pub mod scale;
pub mod selection;
pub mod stack;

use std::collections::BTreeMap;

use petgraph::stable_graph::NodeIndex;
use serde_json::Value;

use crate::core::CompileContext;
use crate::error::CompileError;
use crate::expr::var_name;
use crate::spec::{DataSetting, Encoding, Param, Spec, SpecKind, Transform};
use crate::spec::{FacetMapping, Mark, Resolve, ResolveMode};

pub use self::axis::AxisComponent;
pub use self::build::AncestorParse;
pub use self::legend::LegendComponent;
pub use self::projection::ProjectionComponent;
pub use self::scale::ScaleComponent;
pub use self::selection::SelectionComponent;
pub use self::stack::StackProperties;

#[derive(Debug)]
pub struct UnitModel {
    pub mark: Mark,
    pub encoding: Encoding,
    pub stack: Option<StackProperties>,
}

#[derive(Debug)]
pub enum ModelKind {
    Unit(UnitModel),
    Layer(Vec<Model>),
    Facet {
        facet: FacetMapping,
        child: Box<Model>,
    },
    Concat(Vec<Model>),
}

/// Handles into the dataflow graph for one model.
#[derive(Debug, Clone, Default)]
pub struct DataComponent {
    /// Main output; children without their own data continue from here.
    pub main: Option<NodeIndex>,
    /// Logical name of the main output.
    pub main_name: Option<String>,
    /// Facet boundary that children continue from instead of `main`.
    pub facet_root: Option<NodeIndex>,
    pub ancestor_parse: AncestorParse,
}

#[derive(Debug, Default)]
pub struct Components {
    pub data: DataComponent,
    pub scales: BTreeMap<String, ScaleComponent>,
    /// Several axes per channel when layered axes could not be merged.
    pub axes: BTreeMap<String, Vec<AxisComponent>>,
    pub legends: BTreeMap<String, LegendComponent>,
    pub projection: Option<ProjectionComponent>,
    pub selections: Vec<SelectionComponent>,
}

#[derive(Debug)]
pub struct Model {
    pub name: String,
    pub data: DataSetting,
    pub transforms: Vec<Transform>,
    pub params: Vec<Param>,
    pub resolve: Resolve,
    pub projection: Option<Value>,
    pub title: Option<Value>,
    pub kind: ModelKind,
    pub component: Components,
}

/// `name_text`, or `text` for the unnamed top-level view.
pub fn prefixed(name: &str, text: &str) -> String {
    if name.is_empty() {
        var_name(text)
    } else {
        var_name(&format!("{name}_{text}"))
    }
}

impl Model {
    /// Builds the model tree of a parsed spec.
    pub fn build(cx: &mut CompileContext, spec: Spec) -> Result<Self, CompileError> {
        Self::from_spec(cx, spec, String::new())
    }

    fn from_spec(cx: &mut CompileContext, spec: Spec, given: String) -> Result<Self, CompileError> {
        let name = spec.name.as_deref().map(var_name).unwrap_or(given);

        let kind = match spec.kind {
            SpecKind::Unit { mark, encoding } => {
                let stack = stack::stack(cx, &mark.ty, &encoding)?;
                ModelKind::Unit(UnitModel {
                    mark,
                    encoding,
                    stack,
                })
            }
            SpecKind::Layer(children) => ModelKind::Layer(
                children
                    .into_iter()
                    .enumerate()
                    .map(|(i, child)| Self::from_spec(cx, child, prefixed(&name, &format!("layer_{i}"))))
                    .collect::<Result<_, _>>()?,
            ),
            SpecKind::Facet { facet, spec } => ModelKind::Facet {
                facet,
                child: Box::new(Self::from_spec(cx, *spec, prefixed(&name, "child"))?),
            },
            SpecKind::Concat(children) => ModelKind::Concat(
                children
                    .into_iter()
                    .enumerate()
                    .map(|(i, child)| Self::from_spec(cx, child, prefixed(&name, &format!("concat_{i}"))))
                    .collect::<Result<_, _>>()?,
            ),
        };

        Ok(Model {
            name,
            data: spec.data,
            transforms: spec.transform,
            params: spec.params,
            resolve: spec.resolve,
            projection: spec.projection,
            title: spec.title,
            kind,
            component: Components::default(),
        })
    }

    pub fn get_name(&self, text: &str) -> String {
        prefixed(&self.name, text)
    }

    pub fn children(&self) -> &[Model] {
        match &self.kind {
            ModelKind::Unit(_) => &[],
            ModelKind::Layer(children) | ModelKind::Concat(children) => children,
            ModelKind::Facet { child, .. } => std::slice::from_ref(&**child),
        }
    }

    pub fn children_mut(&mut self) -> &mut [Model] {
        match &mut self.kind {
            ModelKind::Unit(_) => &mut [],
            ModelKind::Layer(children) | ModelKind::Concat(children) => children,
            ModelKind::Facet { child, .. } => std::slice::from_mut(&mut **child),
        }
    }

    pub fn as_unit(&self) -> Option<&UnitModel> {
        match &self.kind {
            ModelKind::Unit(unit) => Some(unit),
            _ => None,
        }
    }

    pub fn is_layer(&self) -> bool {
        matches!(self.kind, ModelKind::Layer(_))
    }

    pub fn is_facet(&self) -> bool {
        matches!(self.kind, ModelKind::Facet { .. })
    }

    /// Resolution of `kind` (`scale`, `axis`, `legend`) for `channel`, with
    /// the default of this composition.
    pub fn resolve_mode(&self, kind: &str, channel: &str) -> ResolveMode {
        if let Some(mode) = self.resolve.get(kind, channel) {
            return mode;
        }
        match &self.kind {
            ModelKind::Concat(_) if matches!(channel, "x" | "y") => ResolveMode::Independent,
            _ => ResolveMode::Shared,
        }
    }

    /// Calls `f` on every model of the tree, parents before children.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Model)) {
        f(self);
        for child in self.children() {
            child.walk(f);
        }
    }
}
