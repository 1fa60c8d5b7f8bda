use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::error::CompileError;

/// The `data` property of a view. Absent and `null` mean different things:
/// an absent property inherits the parent's data, `null` starts empty.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum DataSetting {
    #[default]
    Inherit,
    Null,
    Data(Data),
}

#[derive(Debug, Clone, PartialEq)]
pub enum DataKind {
    Values(Value),
    Url(String),
    /// Provided at runtime under `name`.
    Named,
    Sequence {
        start: f64,
        stop: f64,
        step: Option<f64>,
        r#as: String,
    },
    Graticule(Value),
}

/// `format.parse`: absent, disabled with `null`, or an explicit mapping.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ParseSetting {
    #[default]
    Absent,
    Null,
    Fields(BTreeMap<String, String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Data {
    pub kind: DataKind,
    pub name: Option<String>,
    /// Format properties other than `parse`.
    pub format: Map<String, Value>,
    pub parse: ParseSetting,
}

impl Data {
    pub fn is_generator(&self) -> bool {
        matches!(self.kind, DataKind::Sequence { .. } | DataKind::Graticule(_))
    }

    /// Format type, inferred from the url extension when not given.
    pub fn format_type(&self) -> Option<String> {
        if let Some(ty) = self.format.get("type").and_then(Value::as_str) {
            return Some(ty.to_string());
        }
        match &self.kind {
            DataKind::Url(url) => {
                let path = url.split(['?', '#']).next().unwrap_or(url);
                let ext = path.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase())?;
                match ext.as_str() {
                    "json" | "csv" | "tsv" | "dsv" | "topojson" => Some(ext),
                    _ => Some("json".to_string()),
                }
            }
            DataKind::Values(Value::String(_)) => Some("json".to_string()),
            _ => None,
        }
    }
}

impl DataSetting {
    pub fn parse(value: Option<&Value>) -> Result<Self, CompileError> {
        let value = match value {
            None => return Ok(DataSetting::Inherit),
            Some(Value::Null) => return Ok(DataSetting::Null),
            Some(value) => value,
        };
        let map = value
            .as_object()
            .ok_or_else(|| CompileError::spec("data", "expected an object or null"))?;

        let name = map.get("name").and_then(Value::as_str).map(str::to_string);
        let kind = if let Some(values) = map.get("values") {
            DataKind::Values(values.clone())
        } else if let Some(url) = map.get("url") {
            let url = url
                .as_str()
                .ok_or_else(|| CompileError::spec("data.url", "expected a string"))?;
            DataKind::Url(url.to_string())
        } else if let Some(seq) = map.get("sequence") {
            let num = |key: &str| seq.get(key).and_then(Value::as_f64);
            let (Some(start), Some(stop)) = (num("start"), num("stop")) else {
                return Err(CompileError::spec(
                    "data.sequence",
                    "sequence requires numeric start and stop",
                ));
            };
            DataKind::Sequence {
                start,
                stop,
                step: num("step"),
                r#as: seq
                    .get("as")
                    .and_then(Value::as_str)
                    .unwrap_or("data")
                    .to_string(),
            }
        } else if let Some(graticule) = map.get("graticule") {
            DataKind::Graticule(graticule.clone())
        } else if name.is_some() {
            DataKind::Named
        } else {
            return Err(CompileError::spec(
                "data",
                "expected one of values, url, name, sequence or graticule",
            ));
        };

        let mut format = map
            .get("format")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        let parse = match format.remove("parse") {
            None => ParseSetting::Absent,
            Some(Value::Null) => ParseSetting::Null,
            Some(Value::Object(fields)) => ParseSetting::Fields(
                fields
                    .into_iter()
                    .filter_map(|(k, v)| v.as_str().map(|s| (k, s.to_string())))
                    .collect(),
            ),
            Some(_) => {
                return Err(CompileError::spec("data.format.parse", "expected an object or null"));
            }
        };

        Ok(DataSetting::Data(Data {
            kind,
            name,
            format,
            parse,
        }))
    }
}
