//! Legends for the non-positional scale channels.

use std::collections::BTreeSet;

use serde_json::{Map, Value, json};

use crate::core::{CompileContext, Renames};
use crate::model::scale::has_continuous_domain;
use crate::model::{Model, ModelKind};
use crate::spec::ResolveMode;
use crate::split::{Split, TieBreaker, merge_titles, merge_values_with_explicit, prefer_circle};

pub const LEGEND_CHANNELS: &[&str] = &["color", "fill", "stroke", "size", "shape", "opacity", "strokeDash"];

const UNFILLED_MARKS: &[&str] = &["point", "line", "rule", "trail"];

#[derive(Debug, Clone, PartialEq)]
pub struct LegendComponent {
    pub channel: String,
    /// Vega legend property naming the scale, e.g. `fill` for a filled color.
    pub scale_key: String,
    pub scale: String,
    pub props: Split<Value>,
}

fn symbol_type(mark: &str) -> &'static str {
    match mark {
        "line" | "rule" | "trail" => "stroke",
        "square" => "square",
        _ => "circle",
    }
}

fn tie_breaker(key: &str) -> Option<TieBreaker<'static, Value>> {
    match key {
        "title" => Some(&merge_titles),
        "symbolType" => Some(&prefer_circle),
        _ => None,
    }
}

/// Parses the legends of `model` and its descendants.
pub fn parse_legends(cx: &mut CompileContext, model: &mut Model) {
    if let ModelKind::Unit(unit) = &model.kind {
        for channel in LEGEND_CHANNELS {
            let Some(def) = unit.encoding.get(channel) else {
                continue;
            };
            let Some(scale) = model.component.scales.get(*channel) else {
                continue;
            };
            if def.legend == Some(Value::Null) {
                continue;
            }

            let mut props = Split::new();
            let gradient = matches!(*channel, "color" | "fill" | "stroke" | "opacity")
                && has_continuous_domain(scale.ty())
                && !def.is_binned();
            props.set("type", json!(if gradient { "gradient" } else { "symbol" }), false);
            props.set("title", json!(def.default_title()), false);
            if !gradient {
                props.set("symbolType", json!(symbol_type(&unit.mark.ty)), false);
            }
            if let Some(Value::Object(legend)) = &def.legend {
                for (key, value) in legend {
                    props.set(key.clone(), value.clone(), true);
                }
            }
            if let Some(title) = &def.title {
                props.set("title", title.clone(), true);
            }

            let filled = unit
                .mark
                .props
                .get("filled")
                .and_then(Value::as_bool)
                .unwrap_or(!UNFILLED_MARKS.contains(&unit.mark.ty.as_str()));
            let scale_key = match *channel {
                "color" if filled => "fill",
                "color" => "stroke",
                other => other,
            };
            let legend = LegendComponent {
                channel: channel.to_string(),
                scale_key: scale_key.to_string(),
                scale: scale.name.clone(),
                props,
            };
            model.component.legends.insert(channel.to_string(), legend);
        }
        return;
    }

    for child in model.children_mut() {
        parse_legends(cx, child);
    }

    for channel in LEGEND_CHANNELS {
        if !model.children().iter().any(|c| c.component.legends.contains_key(*channel)) {
            continue;
        }
        if model.resolve_mode("scale", channel) == ResolveMode::Independent
            || model.resolve_mode("legend", channel) == ResolveMode::Independent
        {
            continue;
        }

        let legends: Vec<LegendComponent> = model
            .children_mut()
            .iter_mut()
            .filter_map(|child| child.component.legends.remove(*channel))
            .collect();
        let Some((first, rest)) = legends.split_first() else {
            continue;
        };
        let mut merged = first.clone();
        for legend in rest {
            let keys: BTreeSet<String> = merged.props.keys().into_iter().chain(legend.props.keys()).collect();
            let mut props = Split::new();
            for key in keys {
                if let Some(value) = merge_values_with_explicit(
                    cx,
                    merged.props.get_with_explicit(&key),
                    legend.props.get_with_explicit(&key),
                    &key,
                    "legend",
                    tie_breaker(&key),
                ) {
                    props.set_with_explicit(key, value);
                }
            }
            merged.props = props;
        }
        model.component.legends.insert(channel.to_string(), merged);
    }
}

impl LegendComponent {
    pub fn assemble(&self, scales: &Renames) -> Value {
        let mut out = Map::new();
        out.insert(self.scale_key.clone(), Value::String(scales.resolve(&self.scale)));
        for (key, value) in self.props.combine() {
            out.insert(key, value);
        }
        Value::Object(out)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::config::Config;
    use crate::model::scale::parse_scales;
    use crate::spec::Spec;

    fn parsed(value: Value) -> (CompileContext, Model, Renames) {
        let mut cx = CompileContext::default();
        let spec = Spec::parse(&mut cx, &value).unwrap();
        let mut model = Model::build(&mut cx, spec).unwrap();
        let mut renames = Renames::default();
        parse_scales(&mut cx, &mut model, &Config::default(), &mut renames);
        parse_legends(&mut cx, &mut model);
        (cx, model, renames)
    }

    #[test]
    fn test_continuous_color_is_gradient() {
        let (_, model, renames) = parsed(json!({
            "mark": "rect",
            "encoding": {"color": {"field": "v", "type": "quantitative"}}
        }));
        assert_eq!(
            model.component.legends["color"].assemble(&renames),
            json!({"fill": "color", "type": "gradient", "title": "v"})
        );
    }

    #[test]
    fn test_layer_prefers_circle_symbols() {
        let (cx, model, renames) = parsed(json!({
            "layer": [
                {"mark": "line", "encoding": {"color": {"field": "c", "type": "nominal"}}},
                {"mark": "point", "encoding": {"color": {"field": "c", "type": "nominal"}}}
            ]
        }));
        let legend = &model.component.legends["color"];
        assert_eq!(legend.props.get("symbolType"), Some(&json!("circle")));
        assert_eq!(legend.props.get("title"), Some(&json!("c")));
        assert_eq!(legend.assemble(&renames)["stroke"], json!("color"));
        assert!(model.children().iter().all(|c| c.component.legends.is_empty()));
        assert!(!cx.diagnostics().has_warnings());
    }

    #[test]
    fn test_legend_null_disables() {
        let (_, model, _) = parsed(json!({
            "mark": "point",
            "encoding": {"shape": {"field": "c", "type": "nominal", "legend": null}}
        }));
        assert!(model.component.legends.is_empty());
    }
}
