//! Axes for the position channels. Layered axes merge like scales do, except
//! that two explicitly different orientations keep both axes.

use std::collections::BTreeSet;

use serde_json::{Map, Value, json};

use crate::core::{CompileContext, Renames};
use crate::model::scale::has_continuous_domain;
use crate::model::{Model, ModelKind};
use crate::spec::{FieldType, ResolveMode};
use crate::split::{Explicit, Split, TieBreaker, first_defined, merge_titles, merge_values_with_explicit};

#[derive(Debug, Clone, PartialEq)]
pub struct AxisComponent {
    pub channel: String,
    /// Scale of the view that produced the axis; resolved through scale
    /// renames at assembly.
    pub scale: String,
    pub props: Split<Value>,
}

fn default_orient(channel: &str) -> &'static str {
    if channel == "x" { "bottom" } else { "left" }
}

fn tie_breaker(key: &str) -> Option<TieBreaker<'static, Value>> {
    match key {
        "title" => Some(&merge_titles),
        "gridScale" | "orient" => Some(&first_defined),
        _ => None,
    }
}

/// Parses the axes of `model` and its descendants.
pub fn parse_axes(cx: &mut CompileContext, model: &mut Model) {
    if let ModelKind::Unit(unit) = &model.kind {
        for channel in ["x", "y"] {
            let Some(def) = unit.encoding.get(channel) else {
                continue;
            };
            let Some(scale) = model.component.scales.get(channel) else {
                continue;
            };
            if def.axis == Some(Value::Null) {
                continue;
            }

            let mut props = Split::new();
            props.set("orient", json!(default_orient(channel)), false);
            props.set("title", json!(def.default_title()), false);
            let continuous = has_continuous_domain(scale.ty());
            props.set(
                "grid",
                json!(continuous && def.ty == FieldType::Quantitative && !def.is_binned()),
                false,
            );
            if let Some(Value::Object(axis)) = &def.axis {
                for (key, value) in axis {
                    props.set(key.clone(), value.clone(), true);
                }
            }
            if let Some(title) = &def.title {
                props.set("title", title.clone(), true);
            }

            let axis = AxisComponent {
                channel: channel.to_string(),
                scale: scale.name.clone(),
                props,
            };
            model.component.axes.insert(channel.to_string(), vec![axis]);
        }
        return;
    }

    for child in model.children_mut() {
        parse_axes(cx, child);
    }

    if matches!(model.kind, ModelKind::Concat(_)) {
        return;
    }
    for channel in ["x", "y"] {
        if !model.children().iter().any(|c| c.component.axes.contains_key(channel)) {
            continue;
        }
        let scale_independent = model.resolve_mode("scale", channel) == ResolveMode::Independent;
        let axis_mode = model.resolve_mode("axis", channel);
        if scale_independent {
            if axis_mode == ResolveMode::Shared && model.resolve.get("axis", channel).is_some() {
                cx.warn(format!(
                    "Setting the \"{channel}\" axis to independent because its scale is independent."
                ));
            }
            continue;
        }
        if axis_mode == ResolveMode::Independent {
            continue;
        }

        let mut axes = Vec::new();
        for child in model.children_mut() {
            if let Some(child_axes) = child.component.axes.remove(channel) {
                axes.extend(child_axes);
            }
        }
        let axes = match merge_axes(cx, &axes) {
            Some(merged) => vec![merged],
            None => axes,
        };
        model.component.axes.insert(channel.to_string(), axes);
    }
}

/// One axis for all of `axes`, or `None` when their explicit orientations
/// differ.
fn merge_axes(cx: &mut CompileContext, axes: &[AxisComponent]) -> Option<AxisComponent> {
    let (first, rest) = axes.split_first()?;
    let mut merged = first.clone();
    for axis in rest {
        let (a, b) = (
            merged.props.get_with_explicit("orient"),
            axis.props.get_with_explicit("orient"),
        );
        if let (Some(a), Some(b)) = (a, b)
            && a.explicit
            && b.explicit
            && a.value != b.value
        {
            return None;
        }

        let keys: BTreeSet<String> = merged.props.keys().into_iter().chain(axis.props.keys()).collect();
        let mut props = Split::new();
        for key in keys {
            let value: Option<Explicit<Value>> = merge_values_with_explicit(
                cx,
                merged.props.get_with_explicit(&key),
                axis.props.get_with_explicit(&key),
                &key,
                "axis",
                tie_breaker(&key),
            );
            if let Some(value) = value {
                props.set_with_explicit(key, value);
            }
        }
        merged.props = props;
    }
    Some(merged)
}

impl AxisComponent {
    pub fn assemble(&self, scales: &Renames) -> Value {
        let mut out = Map::new();
        out.insert("scale".into(), Value::String(scales.resolve(&self.scale)));
        for (key, value) in self.props.combine() {
            out.insert(key, value);
        }
        Value::Object(out)
    }
}
