use std::collections::BTreeSet;

use serde_json::{Value, json};

use crate::core::CompileContext;
use crate::spec::transform::LookupTransform;

/// Joins fields of a secondary dataset by key.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupNode {
    pub lookup: String,
    /// Logical output name of the secondary data; rewritten to the final
    /// dataset name after assembly.
    pub secondary: String,
    pub key: String,
    pub fields: Option<Vec<String>>,
    pub r#as: Option<Vec<String>>,
    pub default: Option<Value>,
}

impl LookupNode {
    pub fn new(t: &LookupTransform, secondary: String) -> Self {
        let r#as = match &t.r#as {
            Some(Value::String(s)) => Some(vec![s.clone()]),
            Some(Value::Array(items)) => Some(
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect(),
            ),
            _ => t.from.param.clone().map(|p| vec![p]),
        };
        Self {
            lookup: t.lookup.clone(),
            secondary,
            key: t.from.key.clone(),
            fields: t.from.fields.clone(),
            r#as,
            default: t.default.clone(),
        }
    }

    pub fn dependent_fields(&self) -> BTreeSet<String> {
        BTreeSet::from([self.lookup.clone()])
    }

    pub fn produced_fields(&self) -> BTreeSet<String> {
        self.r#as
            .clone()
            .or_else(|| self.fields.clone())
            .unwrap_or_default()
            .into_iter()
            .collect()
    }

    pub fn identity(&self) -> Value {
        json!({
            "lookup": self.lookup,
            "secondary": self.secondary,
            "key": self.key,
            "fields": self.fields,
            "as": self.r#as,
            "default": self.default,
        })
    }

    pub fn assemble(&self, cx: &mut CompileContext) -> Value {
        let mut out = json!({
            "type": "lookup",
            "from": self.secondary,
            "key": self.key,
            "fields": [self.lookup],
        });
        match (&self.fields, &self.r#as) {
            (Some(fields), r#as) => {
                out["values"] = json!(fields);
                if let Some(r#as) = r#as {
                    out["as"] = json!(r#as);
                }
            }
            (None, Some(r#as)) => out["as"] = json!(r#as),
            (None, None) => {
                cx.warn("A lookup without \"fields\" requires \"as\"; using \"_lookup\".");
                out["as"] = json!(["_lookup"]);
            }
        }
        if let Some(default) = &self.default {
            out["default"] = default.clone();
        }
        out
    }
}
