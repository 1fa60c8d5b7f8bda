use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::core::CompileContext;
use crate::error::CompileError;
use crate::expr::{flat_access_name, var_name};

/// Measurement type of an encoded field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum FieldType {
    Quantitative,
    Temporal,
    Ordinal,
    Nominal,
    Geojson,
}

impl FieldType {
    fn parse(text: &str) -> Option<Self> {
        Some(match text {
            "quantitative" | "Q" => FieldType::Quantitative,
            "temporal" | "T" => FieldType::Temporal,
            "ordinal" | "O" => FieldType::Ordinal,
            "nominal" | "N" => FieldType::Nominal,
            "geojson" => FieldType::Geojson,
            _ => return None,
        })
    }

    pub fn is_discrete(self) -> bool {
        matches!(self, FieldType::Ordinal | FieldType::Nominal)
    }
}

/// Normalised bin parameters, keyed by property name.
pub type BinParams = BTreeMap<String, Value>;

#[derive(Debug, Clone, PartialEq)]
pub enum Bin {
    Params(BinParams),
    /// The data is already binned; no bin transform is generated.
    Binned,
}

/// Default `maxbins` for a channel when `bin: true` is given.
pub fn default_max_bins(channel: &str) -> u64 {
    match channel {
        "row" | "column" | "facet" | "shape" | "size" | "strokeDash" => 6,
        _ => 10,
    }
}

/// Normalises a `bin` property value. `false` yields `None`.
pub fn normalize_bin(value: &Value, channel: &str) -> Option<Bin> {
    match value {
        Value::Bool(true) => {
            let mut params = BinParams::new();
            params.insert("maxbins".into(), Value::from(default_max_bins(channel)));
            Some(Bin::Params(params))
        }
        Value::String(s) if s == "binned" => Some(Bin::Binned),
        Value::Object(map) => {
            if map.get("binned") == Some(&Value::Bool(true)) {
                return Some(Bin::Binned);
            }
            let mut params: BinParams = map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
            if !["maxbins", "step", "steps"].iter().any(|k| params.contains_key(*k)) {
                params.insert("maxbins".into(), Value::from(default_max_bins(channel)));
            }
            Some(Bin::Params(params))
        }
        _ => None,
    }
}

/// Stable textual key of bin parameters, e.g. `bin_maxbins_10`.
pub fn bin_to_string(params: &BinParams) -> String {
    let mut out = String::from("bin");
    for (key, value) in params {
        let text = match value {
            Value::String(s) => s.clone(),
            Value::Object(obj) => obj
                .iter()
                .map(|(k, v)| format!("{k}_{v}"))
                .collect::<Vec<_>>()
                .join("_"),
            other => other.to_string(),
        };
        out.push_str(&var_name(&format!("_{key}_{text}")));
    }
    out
}

/// Parts a composite time unit can be built from, in canonical order.
pub const TIME_UNIT_PARTS: &[&str] = &[
    "year",
    "quarter",
    "month",
    "week",
    "day",
    "dayofyear",
    "date",
    "hours",
    "minutes",
    "seconds",
    "milliseconds",
];

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimeUnitParams {
    /// Unit without the `utc` prefix, e.g. `yearmonth`.
    pub unit: String,
    pub utc: bool,
}

impl TimeUnitParams {
    pub fn parse(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => {
                let (utc, unit) = match s.strip_prefix("utc") {
                    Some(rest) => (true, rest),
                    None => (false, s.as_str()),
                };
                Some(Self {
                    unit: unit.to_string(),
                    utc,
                })
            }
            Value::Object(map) => {
                let mut params = Self::parse(map.get("unit")?)?;
                if map.get("utc") == Some(&Value::Bool(true)) {
                    params.utc = true;
                }
                Some(params)
            }
            _ => None,
        }
    }

    /// Full name including the `utc` prefix.
    pub fn full_name(&self) -> String {
        if self.utc {
            format!("utc{}", self.unit)
        } else {
            self.unit.clone()
        }
    }

    /// Decomposes the unit into its single parts, longest match first.
    pub fn parts(&self) -> Vec<&'static str> {
        let mut rest = self.unit.as_str();
        let mut parts = Vec::new();
        while !rest.is_empty() {
            let found = TIME_UNIT_PARTS
                .iter()
                .filter(|part| rest.starts_with(*part))
                .max_by_key(|part| part.len());
            match found {
                Some(part) => {
                    parts.push(*part);
                    rest = &rest[part.len()..];
                }
                None => break,
            }
        }
        parts
    }
}

/// A channel definition that refers to a data field (or an aggregate of one).
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    pub channel: String,
    pub field: Option<String>,
    pub ty: FieldType,
    pub bin: Option<Bin>,
    pub time_unit: Option<TimeUnitParams>,
    pub aggregate: Option<String>,
    /// `Some(Value::Null)` disables stacking explicitly.
    pub stack: Option<Value>,
    pub sort: Option<Value>,
    /// `Some(Value::Null)` disables the scale.
    pub scale: Option<Value>,
    pub axis: Option<Value>,
    pub legend: Option<Value>,
    pub title: Option<Value>,
    pub impute: Option<Value>,
}

/// Suffix variants of a generated field name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Suffix {
    None,
    End,
    Range,
}

impl FieldDef {
    fn from_object(
        cx: &mut CompileContext,
        channel: &str,
        map: &Map<String, Value>,
    ) -> Result<Option<Self>, CompileError> {
        let field = match map.get("field") {
            None => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => {
                return Err(CompileError::InvalidEncoding {
                    channel: channel.to_string(),
                    message: format!("field must be a string, got {other}"),
                });
            }
        };
        let aggregate = map.get("aggregate").and_then(Value::as_str).map(str::to_string);
        if field.is_none() && aggregate.as_deref() != Some("count") {
            return Ok(None);
        }

        let bin = map.get("bin").and_then(|b| normalize_bin(b, channel));
        let time_unit = map.get("timeUnit").and_then(TimeUnitParams::parse);

        let ty = match map.get("type").and_then(Value::as_str) {
            Some(text) => FieldType::parse(text).ok_or_else(|| CompileError::InvalidEncoding {
                channel: channel.to_string(),
                message: format!("unknown type \"{text}\""),
            })?,
            None => {
                let ty = if aggregate.as_deref() == Some("count") || matches!(bin, Some(Bin::Params(_))) {
                    FieldType::Quantitative
                } else if time_unit.is_some() {
                    FieldType::Temporal
                } else if matches!(channel, "latitude" | "longitude" | "latitude2" | "longitude2") {
                    FieldType::Quantitative
                } else {
                    FieldType::Nominal
                };
                if aggregate.as_deref() != Some("count") {
                    cx.warn(format!(
                        "Missing type for channel \"{channel}\", using \"{}\" instead.",
                        format!("{ty:?}").to_lowercase()
                    ));
                }
                ty
            }
        };

        Ok(Some(FieldDef {
            channel: channel.to_string(),
            field,
            ty,
            bin,
            time_unit,
            aggregate,
            stack: map.get("stack").cloned(),
            sort: map.get("sort").cloned(),
            scale: map.get("scale").cloned(),
            axis: map.get("axis").cloned(),
            legend: map.get("legend").cloned(),
            title: map.get("title").cloned(),
            impute: map.get("impute").cloned(),
        }))
    }

    pub fn bin_params(&self) -> Option<&BinParams> {
        match &self.bin {
            Some(Bin::Params(params)) => Some(params),
            _ => None,
        }
    }

    pub fn is_binned(&self) -> bool {
        self.bin.is_some()
    }

    pub fn is_count(&self) -> bool {
        self.aggregate.as_deref() == Some("count")
    }

    /// Name of the field this definition reads in the final data.
    pub fn vg_field(&self, suffix: Suffix) -> String {
        let field = self.field.as_deref().map(flat_access_name).unwrap_or_default();
        let base = if self.is_count() {
            return "__count".to_string();
        } else if let Some(op) = &self.aggregate {
            format!("{op}_{field}")
        } else if let Some(params) = self.bin_params() {
            format!("{}_{field}", bin_to_string(params))
        } else if let Some(unit) = &self.time_unit {
            format!("{}_{field}", unit.full_name())
        } else {
            field
        };
        match suffix {
            Suffix::None => base,
            Suffix::End if self.bin_params().is_some() && self.aggregate.is_none() => {
                format!("{base}_end")
            }
            Suffix::Range if self.bin_params().is_some() && self.aggregate.is_none() => {
                format!("{base}_range")
            }
            _ => base,
        }
    }

    /// Human readable default title.
    pub fn default_title(&self) -> String {
        let field = self.field.clone().unwrap_or_default();
        if self.is_count() {
            "Count of Records".to_string()
        } else if let Some(op) = &self.aggregate {
            let mut op = op.clone();
            if let Some(first) = op.get_mut(0..1) {
                first.make_ascii_uppercase();
            }
            format!("{op} of {field}")
        } else if self.bin_params().is_some() {
            format!("{field} (binned)")
        } else if let Some(unit) = &self.time_unit {
            format!("{field} ({})", unit.parts().join("-"))
        } else {
            field
        }
    }
}

/// Channel name to the field definitions it carries (several for `tooltip` and
/// `detail` arrays). Value and datum definitions produce no entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Encoding {
    pub channels: BTreeMap<String, Vec<FieldDef>>,
}

impl Encoding {
    pub fn parse(cx: &mut CompileContext, value: Option<&Value>) -> Result<Self, CompileError> {
        let mut channels = BTreeMap::new();
        let Some(value) = value else {
            return Ok(Self { channels });
        };
        let map = value
            .as_object()
            .ok_or_else(|| CompileError::spec("encoding", "expected an object"))?;

        for (channel, def) in map {
            let mut defs = Vec::new();
            let items: Vec<&Value> = match def {
                Value::Array(items) => items.iter().collect(),
                other => vec![other],
            };
            for item in items {
                let Some(obj) = item.as_object() else {
                    continue;
                };
                if let Some(def) = FieldDef::from_object(cx, channel, obj)? {
                    defs.push(def);
                } else if let Some(Value::Object(cond)) = obj.get("condition") {
                    // conditional field definitions carry the field inside
                    if let Some(def) = FieldDef::from_object(cx, channel, cond)? {
                        defs.push(def);
                    }
                }
            }
            if !defs.is_empty() {
                channels.insert(channel.clone(), defs);
            }
        }
        Ok(Self { channels })
    }

    pub fn get(&self, channel: &str) -> Option<&FieldDef> {
        self.channels.get(channel).and_then(|defs| defs.first())
    }

    pub fn iter(&self) -> impl Iterator<Item = &FieldDef> {
        self.channels.values().flatten()
    }

    pub fn has_aggregate(&self) -> bool {
        self.iter().any(|def| def.aggregate.is_some())
    }
}

/// Channels that may own a scale, in the order scales are emitted.
pub const SCALE_CHANNELS: &[&str] = &[
    "x",
    "y",
    "theta",
    "radius",
    "color",
    "fill",
    "stroke",
    "opacity",
    "fillOpacity",
    "strokeOpacity",
    "size",
    "shape",
    "strokeWidth",
    "strokeDash",
];

pub fn is_position(channel: &str) -> bool {
    matches!(channel, "x" | "y")
}

/// Secondary channels share the scale of their primary channel.
pub fn scale_channel(channel: &str) -> &str {
    match channel {
        "x2" => "x",
        "y2" => "y",
        "theta2" => "theta",
        "radius2" => "radius",
        other => other,
    }
}
