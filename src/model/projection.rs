//! Cartographic projections. A unit view gets one when it declares (or
//! inherits) a `projection` or encodes geographic data; layers share one
//! projection when the layers' explicit properties agree.

use std::collections::BTreeSet;

use serde_json::{Map, Value, json};
use tracing::debug;

use crate::core::{CompileContext, Renames};
use crate::model::build::geojson_nodes;
use crate::model::{Model, ModelKind};
use crate::spec::FieldType;
use crate::split::{Split, merge_values_with_explicit};

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectionComponent {
    pub name: String,
    pub props: Split<Value>,
    /// Signals holding the features the projection is fit to.
    pub fit: Vec<String>,
    /// A parent view owns the merged projection; this one is not emitted.
    pub merged: bool,
}

fn uses_projection(model: &Model) -> bool {
    let Some(unit) = model.as_unit() else {
        return false;
    };
    unit.mark.ty == "geoshape"
        || ["longitude", "latitude", "longitude2", "latitude2"]
            .iter()
            .any(|c| unit.encoding.get(c).is_some())
        || unit.encoding.get("shape").is_some_and(|d| d.ty == FieldType::Geojson)
}

/// Parses the projections of `model` and its descendants. Merged child
/// projections are recorded in `renames`.
pub fn parse_projections(cx: &mut CompileContext, model: &mut Model, renames: &mut Renames) {
    parse_with_inherited(cx, model, None, renames);
}

fn parse_with_inherited(cx: &mut CompileContext, model: &mut Model, inherited: Option<&Value>, renames: &mut Renames) {
    let specified = model.projection.clone().or_else(|| inherited.cloned());

    if let ModelKind::Unit(unit) = &model.kind {
        if specified.is_none() && !uses_projection(model) {
            return;
        }
        let mut props = Split::new();
        if let Some(Value::Object(explicit)) = &specified {
            for (key, value) in explicit {
                props.set(key.clone(), value.clone(), true);
            }
        }
        let fit: Vec<String> = geojson_nodes(model, unit).into_iter().map(|n| n.signal).collect();
        if !fit.is_empty() {
            props.set("size", json!({"signal": "[width, height]"}), false);
        }
        model.component.projection = Some(ProjectionComponent {
            name: model.get_name("projection"),
            props,
            fit,
            merged: false,
        });
        return;
    }

    for child in model.children_mut() {
        parse_with_inherited(cx, child, specified.as_ref(), renames);
    }
    if !model.is_layer() {
        return;
    }

    let children: Vec<ProjectionComponent> = model
        .children()
        .iter()
        .filter_map(|c| c.component.projection.clone())
        .collect();
    let Some((first, rest)) = children.split_first() else {
        return;
    };

    let mut props = first.props.clone();
    let mut fit = first.fit.clone();
    for projection in rest {
        let keys: BTreeSet<String> = props.keys().into_iter().chain(projection.props.keys()).collect();
        let mut merged = Split::new();
        for key in keys {
            if let Some(value) = merge_values_with_explicit(
                cx,
                props.get_with_explicit(&key),
                projection.props.get_with_explicit(&key),
                &key,
                "projection",
                None,
            ) {
                merged.set_with_explicit(key, value);
            }
        }
        props = merged;
        for signal in &projection.fit {
            if !fit.contains(signal) {
                fit.push(signal.clone());
            }
        }
    }

    let name = model.get_name("projection");
    for child in model.children_mut() {
        if let Some(projection) = child.component.projection.as_mut() {
            renames.rename(&projection.name, &name);
            projection.merged = true;
        }
    }
    debug!(projection = %name, "merged layer projections");
    model.component.projection = Some(ProjectionComponent {
        name,
        props,
        fit,
        merged: false,
    });
}

impl ProjectionComponent {
    pub fn assemble(&self) -> Value {
        let mut out = Map::new();
        out.insert("name".into(), Value::String(self.name.clone()));
        for (key, value) in self.props.combine() {
            out.insert(key, value);
        }
        match self.fit.as_slice() {
            [] => {}
            [single] => {
                out.insert("fit".into(), json!({ "signal": single }));
            }
            many => {
                out.insert("fit".into(), json!({ "signal": format!("[{}]", many.join(", ")) }));
            }
        }
        Value::Object(out)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::spec::Spec;

    fn parsed(value: Value) -> (CompileContext, Model, Renames) {
        let mut cx = CompileContext::default();
        let spec = Spec::parse(&mut cx, &value).unwrap();
        let mut model = Model::build(&mut cx, spec).unwrap();
        let mut renames = Renames::default();
        parse_projections(&mut cx, &mut model, &mut renames);
        (cx, model, renames)
    }

    #[test]
    fn test_geopoints_fit_projection() {
        let (_, model, _) = parsed(json!({
            "projection": {"type": "albersUsa"},
            "mark": "circle",
            "encoding": {
                "longitude": {"field": "lon", "type": "quantitative"},
                "latitude": {"field": "lat", "type": "quantitative"}
            }
        }));
        let projection = model.component.projection.as_ref().unwrap();
        assert_eq!(
            projection.assemble(),
            json!({
                "name": "projection",
                "type": "albersUsa",
                "size": {"signal": "[width, height]"},
                "fit": {"signal": "geojson_0"}
            })
        );
    }

    #[test]
    fn test_layers_share_projection() {
        let (cx, model, renames) = parsed(json!({
            "projection": {"type": "mercator"},
            "layer": [
                {"mark": "geoshape"},
                {"mark": "circle", "encoding": {
                    "longitude": {"field": "lon", "type": "quantitative"},
                    "latitude": {"field": "lat", "type": "quantitative"}
                }}
            ]
        }));
        assert!(model.component.projection.is_some());
        assert_eq!(renames.resolve("layer_1_projection"), "projection");
        assert_eq!(model.component.projection.as_ref().unwrap().fit, vec!["layer_1_geojson_0".to_string()]);
        assert!(!cx.diagnostics().has_warnings());
    }

    #[test]
    fn test_conflicting_layers_keep_first_projection_type() {
        let (cx, model, renames) = parsed(json!({
            "layer": [
                {"mark": "geoshape", "projection": {"type": "mercator", "center": [0, 0]}},
                {"mark": "geoshape", "projection": {"type": "albersUsa", "scale": 200}}
            ]
        }));
        let projection = model.component.projection.as_ref().unwrap();
        assert_eq!(
            projection.assemble(),
            json!({"name": "projection", "type": "mercator", "center": [0, 0], "scale": 200})
        );
        assert!(projection.props.explicit.contains_key("scale"));
        assert_eq!(renames.resolve("layer_1_projection"), "projection");
        let warnings: Vec<&str> = cx.diagnostics().warnings().collect();
        assert_eq!(warnings, vec!["Conflicting projection property \"type\"; keeping the first value."]);
    }
}
