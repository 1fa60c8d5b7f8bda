//! Scales: parsed per unit view, then merged upwards wherever the
//! composition resolves a channel as shared.

use std::collections::BTreeSet;

use serde_json::{Map, Value, json};
use tracing::debug;

use crate::config::Config;
use crate::core::{CompileContext, Renames};
use crate::dataflow::nodes::sort_index_field;
use crate::model::build::bin_signal;
use crate::model::{Model, ModelKind, UnitModel};
use crate::spec::encoding::{SCALE_CHANNELS, Suffix};
use crate::spec::{FieldDef, FieldType, ResolveMode};
use crate::split::{Explicit, Split, TieBreaker, larger_step, merge_values_with_explicit, union_domains};

#[derive(Debug, Clone, PartialEq)]
pub struct ScaleComponent {
    pub name: String,
    pub channel: String,
    /// `type`, `domain`, `range`, `zero`, `nice`, `bins` and any property
    /// written in the encoding's `scale` block.
    pub props: Split<Value>,
    /// A parent view owns the merged scale; this one is not emitted.
    pub merged: bool,
}

impl ScaleComponent {
    pub fn ty(&self) -> &str {
        self.props.get("type").and_then(Value::as_str).unwrap_or("linear")
    }

    /// Data reference the domain reads, when it reads exactly one field.
    pub fn domain_field(&self) -> Option<String> {
        let domain = self.props.get("domain")?;
        domain.get("field").and_then(Value::as_str).map(str::to_string)
    }
}

pub fn has_discrete_domain(ty: &str) -> bool {
    matches!(ty, "ordinal" | "band" | "point" | "bin-ordinal")
}

pub fn has_continuous_domain(ty: &str) -> bool {
    matches!(
        ty,
        "linear" | "log" | "pow" | "sqrt" | "symlog" | "time" | "utc" | "sequential" | "quantile" | "quantize" | "threshold"
    )
}

fn category(ty: &str) -> &str {
    match ty {
        "linear" | "log" | "pow" | "sqrt" | "symlog" | "time" | "utc" | "sequential" => "numeric",
        "band" | "point" => "ordinal-position",
        other => other,
    }
}

/// Two scale types can share one scale.
pub fn scale_compatible(a: &str, b: &str) -> bool {
    let (ca, cb) = (category(a), category(b));
    ca == cb || (ca == "ordinal-position" && b == "time") || (cb == "ordinal-position" && a == "time")
}

pub fn scale_type_precedence(ty: &str) -> u8 {
    match ty {
        "band" => 11,
        "point" => 10,
        "log" | "pow" | "sqrt" | "symlog" | "identity" | "sequential" => 1,
        _ => 0,
    }
}

/// Keeps the scale type with the higher precedence, the first on a tie.
pub fn prefer_scale_type(v1: &Explicit<Value>, v2: &Explicit<Value>) -> Explicit<Value> {
    let precedence = |v: &Explicit<Value>| scale_type_precedence(v.value.as_str().unwrap_or_default());
    if precedence(v2) > precedence(v1) {
        v2.clone()
    } else {
        v1.clone()
    }
}

fn default_type(channel: &str, def: &FieldDef, mark: &str) -> &'static str {
    let time = || {
        if def.time_unit.as_ref().is_some_and(|u| u.utc) {
            "utc"
        } else {
            "time"
        }
    };
    match channel {
        "x" | "y" => {
            if def.ty.is_discrete() {
                if matches!(mark, "bar" | "rect" | "image" | "rule" | "tick") {
                    "band"
                } else {
                    "point"
                }
            } else if def.ty == FieldType::Temporal {
                time()
            } else {
                "linear"
            }
        }
        "theta" | "radius" if def.ty.is_discrete() => "band",
        "shape" | "strokeDash" => "ordinal",
        "color" | "fill" | "stroke" => match def.ty {
            FieldType::Nominal | FieldType::Ordinal => "ordinal",
            FieldType::Temporal => time(),
            _ if def.bin_params().is_some() => "bin-ordinal",
            _ => "linear",
        },
        _ if def.ty.is_discrete() => "point",
        _ if def.ty == FieldType::Temporal => time(),
        _ => "linear",
    }
}

fn default_range(channel: &str, ty: &str, def: &FieldDef, config: &Config) -> Option<Value> {
    let discrete = has_discrete_domain(ty);
    Some(match channel {
        "x" if discrete => json!({ "step": config.view.discrete_step }),
        "x" => json!([0, { "signal": "width" }]),
        "y" if discrete => json!({ "step": config.view.discrete_step }),
        "y" => json!([{ "signal": "height" }, 0]),
        "theta" => json!([0, std::f64::consts::TAU]),
        "radius" => json!([0, { "signal": "min(width,height)/2" }]),
        "color" | "fill" | "stroke" => match def.ty {
            FieldType::Nominal => json!("category"),
            FieldType::Ordinal => json!("ordinal"),
            _ => json!("ramp"),
        },
        "opacity" | "fillOpacity" | "strokeOpacity" => {
            json!([config.scale.min_opacity, config.scale.max_opacity])
        }
        "size" => json!([0, config.scale.max_size]),
        "shape" => json!("symbol"),
        _ => return None,
    })
}

fn data_ref(data: &str, field: String) -> Value {
    json!({ "data": data, "field": field })
}

fn default_domain(
    model: &Model,
    unit: &UnitModel,
    channel: &str,
    def: &FieldDef,
    ty: &str,
) -> Value {
    let main = model.get_name("main");

    if let (Some(params), Some(field)) = (def.bin_params(), &def.field)
        && def.aggregate.is_none()
        && has_continuous_domain(ty)
    {
        let signal = bin_signal(&model.name, params, field);
        return json!({ "signal": format!("[{signal}.start, {signal}.stop]") });
    }

    if has_discrete_domain(ty) {
        let mut domain = data_ref(&main, def.vg_field(Suffix::None));
        match &def.sort {
            Some(Value::Null) => {}
            Some(Value::Array(_)) => {
                domain["sort"] = json!({ "op": "min", "field": sort_index_field(def) });
            }
            Some(Value::String(order)) if order == "descending" => {
                domain["sort"] = json!({ "order": "descending" });
            }
            _ => domain["sort"] = json!(true),
        }
        return domain;
    }

    let mut fields = Vec::new();
    match &unit.stack {
        Some(stack) if stack.field_channel == channel => {
            let field = def.vg_field(Suffix::None);
            fields.push(data_ref(&main, format!("{field}_start")));
            fields.push(data_ref(&main, format!("{field}_end")));
        }
        _ => {
            fields.push(data_ref(&main, def.vg_field(Suffix::None)));
            let secondary = format!("{channel}2");
            if let Some(end) = unit.encoding.get(&secondary) {
                fields.push(data_ref(&main, end.vg_field(Suffix::None)));
            }
        }
    }
    if fields.len() == 1 {
        fields.remove(0)
    } else {
        json!({ "fields": fields })
    }
}

fn parse_unit_scale(model: &Model, unit: &UnitModel, def: &FieldDef, config: &Config) -> ScaleComponent {
    let channel = def.channel.as_str();
    let mut props = Split::new();
    if let Some(Value::Object(explicit)) = &def.scale {
        for (key, value) in explicit {
            if key == "domain" && value == "unaggregated" {
                continue;
            }
            props.set(key.clone(), value.clone(), true);
        }
    }

    let ty = match props.get("type").and_then(Value::as_str) {
        Some(ty) => ty.to_string(),
        None => {
            let ty = default_type(channel, def, &unit.mark.ty);
            props.set("type", json!(ty), false);
            ty.to_string()
        }
    };

    props.set_if_absent("domain", default_domain(model, unit, channel, def, &ty));
    if !props.contains("scheme")
        && let Some(range) = default_range(channel, &ty, def, config)
    {
        props.set_if_absent("range", range);
    }

    let binned = def.is_binned() && def.aggregate.is_none();
    let custom_domain = props.explicit.contains_key("domain");
    if ty == "linear" && !binned && !custom_domain && matches!(channel, "x" | "y" | "size" | "theta" | "radius") {
        props.set_if_absent("zero", json!(true));
    }
    if matches!(channel, "x" | "y") && has_continuous_domain(&ty) && !binned {
        props.set_if_absent("nice", json!(true));
    }
    if let Some(params) = def.bin_params()
        && let Some(field) = &def.field
        && def.aggregate.is_none()
        && matches!(channel, "x" | "y")
    {
        props.set_if_absent("bins", json!({ "signal": bin_signal(&model.name, params, field) }));
    }
    match ty.as_str() {
        "point" if matches!(channel, "x" | "y") => props.set_if_absent("padding", json!(0.5)),
        "band" => props.set_if_absent("paddingInner", json!(0.1)),
        _ => {}
    }

    ScaleComponent {
        name: model.get_name(channel),
        channel: channel.to_string(),
        props,
        merged: false,
    }
}

fn tie_breaker(key: &str) -> Option<TieBreaker<'static, Value>> {
    match key {
        "domain" => Some(&union_domains),
        "range" => Some(&larger_step),
        "type" => Some(&prefer_scale_type),
        _ => None,
    }
}

/// Merges one channel's child scales into a scale owned by `model`, or
/// returns `None` when the child scale types cannot share a scale.
fn merge_children(cx: &mut CompileContext, model: &Model, channel: &str) -> Option<Split<Value>> {
    let scales: Vec<&ScaleComponent> = model
        .children()
        .iter()
        .filter_map(|child| child.component.scales.get(channel))
        .collect();

    for pair in scales.windows(2) {
        if !scale_compatible(pair[0].ty(), pair[1].ty()) {
            return None;
        }
    }

    let keys: BTreeSet<String> = scales.iter().flat_map(|s| s.props.keys()).collect();
    let mut props = Split::new();
    for key in keys {
        let mut merged = None;
        for scale in &scales {
            merged = merge_values_with_explicit(
                cx,
                merged,
                scale.props.get_with_explicit(&key),
                &key,
                "scale",
                tie_breaker(&key),
            );
        }
        if let Some(value) = merged {
            props.set_with_explicit(key, value);
        }
    }
    Some(props)
}

/// Parses the scales of `model` and its descendants. Merged child scales are
/// recorded in `renames` under the name of the scale that replaced them.
pub fn parse_scales(cx: &mut CompileContext, model: &mut Model, config: &Config, renames: &mut Renames) {
    if let ModelKind::Unit(unit) = &model.kind {
        let mut scales = Vec::new();
        for channel in SCALE_CHANNELS {
            let Some(def) = unit.encoding.get(channel) else {
                continue;
            };
            if def.scale == Some(Value::Null) || def.ty == FieldType::Geojson {
                continue;
            }
            scales.push(parse_unit_scale(model, unit, def, config));
        }
        for scale in scales {
            model.component.scales.insert(scale.channel.clone(), scale);
        }
        return;
    }

    for child in model.children_mut() {
        parse_scales(cx, child, config, renames);
    }

    for channel in SCALE_CHANNELS {
        if !model.children().iter().any(|c| c.component.scales.contains_key(*channel)) {
            continue;
        }
        if model.resolve_mode("scale", channel) == ResolveMode::Independent {
            continue;
        }
        let Some(props) = merge_children(cx, model, channel) else {
            cx.warn(format!(
                "Channel \"{channel}\" has incompatible scale types across views; using independent scales."
            ));
            model
                .resolve
                .modes
                .entry("scale".to_string())
                .or_default()
                .insert(channel.to_string(), ResolveMode::Independent);
            continue;
        };

        let name = model.get_name(channel);
        for child in model.children_mut() {
            if let Some(scale) = child.component.scales.get_mut(*channel) {
                renames.rename(&scale.name, &name);
                scale.merged = true;
            }
        }
        debug!(scale = %name, "merged child scales");
        model.component.scales.insert(
            channel.to_string(),
            ScaleComponent {
                name,
                channel: channel.to_string(),
                props,
                merged: false,
            },
        );
    }
}

/// Rewrites signal names inside `signal` expressions.
pub fn resolve_signal_refs(value: &mut Value, renames: &Renames) {
    match value {
        Value::Object(map) => {
            for (key, inner) in map.iter_mut() {
                if key == "signal"
                    && let Value::String(expr) = inner
                {
                    let mut olds: Vec<&str> = renames.iter().map(|(old, _)| old).collect();
                    olds.sort_by_key(|old| std::cmp::Reverse(old.len()));
                    for old in olds {
                        if expr.contains(old) {
                            *expr = expr.replace(old, &renames.resolve(old));
                        }
                    }
                } else {
                    resolve_signal_refs(inner, renames);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(|item| resolve_signal_refs(item, renames)),
        _ => {}
    }
}

/// Rewrites `data` references from logical output names to dataset names.
pub fn resolve_data_refs(value: &mut Value, dataset: &dyn Fn(&str) -> Option<String>) {
    match value {
        Value::Object(map) => {
            for (key, inner) in map.iter_mut() {
                if key == "data"
                    && let Value::String(name) = inner
                {
                    if let Some(resolved) = dataset(name) {
                        *name = resolved;
                    }
                } else {
                    resolve_data_refs(inner, dataset);
                }
            }
        }
        Value::Array(items) => items.iter_mut().for_each(|item| resolve_data_refs(item, dataset)),
        _ => {}
    }
}

impl ScaleComponent {
    pub fn assemble(&self, signals: &Renames, dataset: &dyn Fn(&str) -> Option<String>) -> Value {
        let mut out = Map::new();
        out.insert("name".into(), Value::String(self.name.clone()));
        for (key, value) in self.props.combine() {
            out.insert(key, value);
        }
        let mut out = Value::Object(out);
        resolve_signal_refs(&mut out, signals);
        resolve_data_refs(&mut out, dataset);
        out
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
        parse_scales(&mut cx, &mut model, &Config::default(), &mut renames);
        (cx, model, renames)
    }

    #[test]
    fn test_unit_defaults() {
        let (_, model, _) = parsed(json!({
            "mark": "bar",
            "encoding": {
                "x": {"field": "a", "type": "nominal"},
                "y": {"aggregate": "sum", "field": "b", "type": "quantitative"}
            }
        }));
        let x = &model.component.scales["x"];
        assert_eq!(x.ty(), "band");
        assert_eq!(
            x.props.get("domain"),
            Some(&json!({"data": "main", "field": "a", "sort": true}))
        );
        assert_eq!(x.props.get("range"), Some(&json!({"step": 20.0})));

        let y = &model.component.scales["y"];
        assert_eq!(y.ty(), "linear");
        assert_eq!(y.props.get("zero"), Some(&json!(true)));
        assert_eq!(y.props.get("domain"), Some(&json!({"data": "main", "field": "sum_b"})));
    }

    #[test]
    fn test_stacked_domain_reads_start_and_end() {
        let (_, model, _) = parsed(json!({
            "mark": "bar",
            "encoding": {
                "x": {"field": "a", "type": "nominal"},
                "y": {"aggregate": "sum", "field": "b", "type": "quantitative"},
                "color": {"field": "c", "type": "nominal"}
            }
        }));
        assert_eq!(
            model.component.scales["y"].props.get("domain"),
            Some(&json!({"fields": [
                {"data": "main", "field": "sum_b_start"},
                {"data": "main", "field": "sum_b_end"}
            ]}))
        );
        assert_eq!(model.component.scales["color"].props.get("range"), Some(&json!("category")));
    }

    #[test]
    fn test_layer_merges_domains() {
        let (cx, model, renames) = parsed(json!({
            "layer": [
                {"mark": "point", "encoding": {"x": {"field": "a", "type": "quantitative"}}},
                {"mark": "rule", "encoding": {"x": {"field": "b", "type": "quantitative"}}}
            ]
        }));
        let x = &model.component.scales["x"];
        assert_eq!(x.name, "x");
        assert_eq!(
            x.props.get("domain"),
            Some(&json!({"fields": [
                {"data": "layer_0_main", "field": "a"},
                {"data": "layer_1_main", "field": "b"}
            ]}))
        );
        assert!(model.children()[0].component.scales["x"].merged);
        assert_eq!(renames.resolve("layer_1_x"), "x");
        assert!(!cx.diagnostics().has_warnings());
    }

    #[test]
    fn test_explicit_domain_wins_over_inferred() {
        let (_, model, _) = parsed(json!({
            "layer": [
                {"mark": "point", "encoding": {"y": {"field": "a", "type": "quantitative", "scale": {"domain": [0, 10]}}}},
                {"mark": "point", "encoding": {"y": {"field": "b", "type": "quantitative"}}}
            ]
        }));
        let y = model.component.scales["y"].props.get_with_explicit("domain").unwrap();
        assert_eq!(y, Explicit::explicit(json!([0, 10])));
    }

    #[test]
    fn test_incompatible_types_become_independent() {
        let (cx, model, _) = parsed(json!({
            "layer": [
                {"mark": "bar", "encoding": {"x": {"field": "a", "type": "nominal"}}},
                {"mark": "point", "encoding": {"x": {"field": "b", "type": "quantitative"}}}
            ]
        }));
        assert!(!model.component.scales.contains_key("x"));
        assert_eq!(model.resolve_mode("scale", "x"), ResolveMode::Independent);
        assert!(!model.children()[1].component.scales["x"].merged);
        assert_eq!(cx.diagnostics().warnings().count(), 1);
    }

    #[test]
    fn test_concat_keeps_positions_independent() {
        let (_, model, _) = parsed(json!({
            "hconcat": [
                {"mark": "point", "encoding": {
                    "x": {"field": "a", "type": "quantitative"},
                    "color": {"field": "c", "type": "nominal"}
                }},
                {"mark": "point", "encoding": {
                    "x": {"field": "a", "type": "quantitative"},
                    "color": {"field": "c", "type": "nominal"}
                }}
            ]
        }));
        assert!(!model.component.scales.contains_key("x"));
        assert_eq!(model.component.scales["color"].name, "color");
        assert_eq!(model.children()[0].component.scales["x"].name, "concat_0_x");
    }

    #[test]
    fn test_signal_refs_follow_renames() {
        let mut renames = Renames::default();
        renames.rename("layer_1_bin_maxbins_10_x_bins", "layer_0_bin_maxbins_10_x_bins");
        let mut value = json!({"domain": {"signal": "[layer_1_bin_maxbins_10_x_bins.start, layer_1_bin_maxbins_10_x_bins.stop]"}});
        resolve_signal_refs(&mut value, &renames);
        assert_eq!(
            value,
            json!({"domain": {"signal": "[layer_0_bin_maxbins_10_x_bins.start, layer_0_bin_maxbins_10_x_bins.stop]"}})
        );
    }
}
