use serde_json::{Map, Value, json};

use crate::spec::{Data, DataKind};

/// Root of a dataflow tree backed by inline values, a url or runtime data.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceNode {
    /// Dataset descriptor without `name` and `transform`.
    pub descriptor: Map<String, Value>,
    /// Name given by `data.name`; otherwise allocated at assembly.
    pub data_name: Option<String>,
}

impl SourceNode {
    pub fn from_data(data: &Data) -> Self {
        let mut descriptor = Map::new();
        match &data.kind {
            DataKind::Values(values) => {
                descriptor.insert("values".into(), values.clone());
            }
            DataKind::Url(url) => {
                descriptor.insert("url".into(), Value::String(url.clone()));
            }
            _ => {}
        }
        let mut format = data.format.clone();
        if let Some(ty) = data.format_type() {
            format.insert("type".into(), Value::String(ty));
        }
        if !format.is_empty() {
            descriptor.insert("format".into(), Value::Object(format));
        }
        Self {
            descriptor,
            data_name: data.name.clone(),
        }
    }

    /// An empty dataset, used for `data: null` and for views without data.
    pub fn empty() -> Self {
        Self::values(json!([]))
    }

    pub fn values(values: Value) -> Self {
        let mut descriptor = Map::new();
        descriptor.insert("values".into(), values);
        Self {
            descriptor,
            data_name: None,
        }
    }

    pub fn identity(&self) -> Value {
        json!({ "descriptor": self.descriptor, "name": self.data_name })
    }

    pub fn is_empty_values(&self) -> bool {
        self.descriptor.get("values") == Some(&json!([]))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SequenceNode {
    pub start: f64,
    pub stop: f64,
    pub step: Option<f64>,
    pub r#as: String,
}

impl SequenceNode {
    pub fn assemble(&self) -> Value {
        let mut out = json!({
            "type": "sequence",
            "start": self.start,
            "stop": self.stop,
            "as": self.r#as,
        });
        if let Some(step) = self.step {
            out["step"] = json!(step);
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GraticuleNode {
    pub params: Value,
}

impl GraticuleNode {
    pub fn assemble(&self) -> Value {
        let mut out = json!({ "type": "graticule" });
        if let Value::Object(params) = &self.params {
            for (key, value) in params {
                out[key] = value.clone();
            }
        }
        out
    }
}
