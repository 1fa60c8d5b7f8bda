//! Decides whether a unit view stacks, and along which channel.

use serde_json::Value;

use crate::core::CompileContext;
use crate::error::CompileError;
use crate::spec::{Encoding, FieldDef, FieldType};
use crate::spec::encoding::Suffix;

const STACKABLE_MARKS: &[&str] = &[
    "arc", "bar", "area", "rule", "point", "circle", "square", "line", "text", "tick",
];
const STACK_BY_DEFAULT_MARKS: &[&str] = &["bar", "area", "arc"];

/// Channels whose fields split a stack into layers. Tooltips never do.
const STACK_BY_CHANNELS: &[&str] = &[
    "color",
    "fill",
    "stroke",
    "opacity",
    "fillOpacity",
    "strokeOpacity",
    "strokeWidth",
    "strokeDash",
    "size",
    "shape",
    "detail",
    "text",
];

#[derive(Debug, Clone, PartialEq)]
pub struct StackProperties {
    /// Channel carrying the stacked measure.
    pub field_channel: &'static str,
    /// The other position channel, when it groups the stack.
    pub groupby_channel: Option<&'static str>,
    pub stackby: Vec<FieldDef>,
    pub offset: String,
}

fn secondary(channel: &str) -> &'static str {
    match channel {
        "x" => "x2",
        "y" => "y2",
        "theta" => "theta2",
        _ => "radius2",
    }
}

fn dimension(channel: &str) -> &'static str {
    match channel {
        "x" => "y",
        "y" => "x",
        "theta" => "radius",
        _ => "theta",
    }
}

/// Offset requested by a `stack` property; `None` when stacking is disabled.
fn explicit_offset(stack: &Value) -> Option<String> {
    match stack {
        Value::Bool(true) => Some("zero".to_string()),
        Value::String(offset) => Some(offset.clone()),
        _ => None,
    }
}

fn is_stackable_measure(def: Option<&FieldDef>) -> bool {
    def.is_some_and(|def| def.ty == FieldType::Quantitative && !def.is_binned())
}

fn stacked_channel(
    encoding: &Encoding,
    a: &'static str,
    b: &'static str,
) -> Result<Option<&'static str>, CompileError> {
    let (da, db) = (encoding.get(a), encoding.get(b));
    let requested = |def: Option<&FieldDef>| {
        def.and_then(|def| def.stack.as_ref()).and_then(explicit_offset).is_some()
    };
    if requested(da) && requested(db) {
        return Err(CompileError::ContradictoryStack(format!(
            "both \"{a}\" and \"{b}\" request stacking"
        )));
    }

    Ok(match (is_stackable_measure(da), is_stackable_measure(db)) {
        (true, true) => {
            if requested(da) {
                Some(a)
            } else if requested(db) {
                Some(b)
            } else {
                let aggregated = |def: Option<&FieldDef>| def.is_some_and(|d| d.aggregate.is_some());
                match (aggregated(da), aggregated(db)) {
                    (true, false) => Some(a),
                    (false, true) => Some(b),
                    _ => None,
                }
            }
        }
        (true, false) => Some(a),
        (false, true) => Some(b),
        (false, false) => None,
    })
}

/// Stack properties of a unit view, or `None` when nothing stacks.
pub fn stack(
    cx: &mut CompileContext,
    mark: &str,
    encoding: &Encoding,
) -> Result<Option<StackProperties>, CompileError> {
    let Some(field_channel) = stacked_channel(encoding, "x", "y")?
        .or(stacked_channel(encoding, "theta", "radius")?)
    else {
        return Ok(None);
    };
    if !STACKABLE_MARKS.contains(&mark) {
        return Ok(None);
    }
    let Some(stacked) = encoding.get(field_channel) else {
        return Ok(None);
    };

    let dimension_channel = dimension(field_channel);
    let dimension_field = encoding.get(dimension_channel).map(|d| d.vg_field(Suffix::None));
    let stacked_field = stacked.vg_field(Suffix::None);
    let groupby_channel = match &dimension_field {
        Some(field) if *field != stacked_field => Some(dimension_channel),
        _ => None,
    };

    let mut stackby = Vec::new();
    for channel in STACK_BY_CHANNELS {
        for def in encoding.channels.get(*channel).into_iter().flatten() {
            if def.aggregate.is_some() {
                continue;
            }
            if dimension_field.as_deref() != Some(def.vg_field(Suffix::None).as_str()) {
                stackby.push(def.clone());
            }
        }
    }

    let offset = match &stacked.stack {
        Some(stack) => explicit_offset(stack),
        None if STACK_BY_DEFAULT_MARKS.contains(&mark) => Some("zero".to_string()),
        None => None,
    };
    let Some(offset) = offset else {
        return Ok(None);
    };
    if !matches!(offset.as_str(), "zero" | "center" | "normalize") {
        cx.warn(format!("Invalid stack offset \"{offset}\"."));
        return Ok(None);
    }

    if encoding.has_aggregate() && stackby.is_empty() {
        return Ok(None);
    }
    if encoding.get(secondary(field_channel)).is_some() {
        if stacked.stack.is_some() {
            cx.warn(format!("Cannot stack \"{field_channel}\" of a ranged mark."));
        }
        return Ok(None);
    }
    if let Some(op) = &stacked.aggregate
        && !matches!(op.as_str(), "sum" | "count" | "valid" | "missing" | "distinct")
    {
        cx.warn(format!(
            "Stacking is applied even though the aggregate function is non-summative (\"{op}\")."
        ));
    }

    Ok(Some(StackProperties {
        field_channel,
        groupby_channel,
        stackby,
        offset,
    }))
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use super::*;

    fn encoding(cx: &mut CompileContext, value: Value) -> Encoding {
        Encoding::parse(cx, Some(&value)).unwrap()
    }

    #[test]
    fn test_bar_with_color_stacks_aggregate() {
        let mut cx = CompileContext::default();
        let enc = encoding(
            &mut cx,
            json!({
                "x": {"field": "a", "type": "nominal"},
                "y": {"aggregate": "sum", "field": "b", "type": "quantitative"},
                "color": {"field": "c", "type": "nominal"}
            }),
        );
        let props = stack(&mut cx, "bar", &enc).unwrap().unwrap();
        assert_eq!(props.field_channel, "y");
        assert_eq!(props.groupby_channel, Some("x"));
        assert_eq!(props.offset, "zero");
        assert_eq!(props.stackby.len(), 1);
        assert_eq!(props.stackby[0].channel, "color");
    }

    #[test]
    fn test_point_does_not_stack_by_default() {
        let mut cx = CompileContext::default();
        let enc = encoding(
            &mut cx,
            json!({
                "x": {"field": "a", "type": "nominal"},
                "y": {"field": "b", "type": "quantitative"},
                "color": {"field": "c", "type": "nominal"}
            }),
        );
        assert_eq!(stack(&mut cx, "point", &enc).unwrap(), None);
    }

    #[test]
    fn test_stack_null_disables() {
        let mut cx = CompileContext::default();
        let enc = encoding(
            &mut cx,
            json!({
                "x": {"field": "a", "type": "nominal"},
                "y": {"field": "b", "type": "quantitative", "stack": null},
                "color": {"field": "c", "type": "nominal"}
            }),
        );
        assert_eq!(stack(&mut cx, "bar", &enc).unwrap(), None);
    }

    #[test]
    fn test_stacking_both_axes_is_fatal() {
        let mut cx = CompileContext::default();
        let enc = encoding(
            &mut cx,
            json!({
                "x": {"field": "a", "type": "quantitative", "stack": "zero"},
                "y": {"field": "b", "type": "quantitative", "stack": true}
            }),
        );
        assert!(matches!(
            stack(&mut cx, "bar", &enc),
            Err(CompileError::ContradictoryStack(_))
        ));
    }
}
