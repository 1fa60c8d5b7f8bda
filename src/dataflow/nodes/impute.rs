use std::collections::BTreeSet;

use serde_json::{Value, json};

use crate::spec::transform::ImputeTransform;

/// Fills missing values of a field along a key, by constant or by a window
/// statistic.
#[derive(Debug, Clone, PartialEq)]
pub struct ImputeNode {
    pub transform: ImputeTransform,
}

impl ImputeNode {
    pub fn dependent_fields(&self) -> BTreeSet<String> {
        let t = &self.transform;
        let mut out = BTreeSet::from([t.impute.clone(), t.key.clone()]);
        out.extend(t.groupby.iter().cloned());
        out
    }

    pub fn produced_fields(&self) -> BTreeSet<String> {
        BTreeSet::from([self.transform.impute.clone()])
    }

    pub fn identity(&self) -> Value {
        let t = &self.transform;
        json!([t.impute, t.key, t.keyvals, t.groupby, t.frame, t.method, t.value])
    }

    /// `{start, stop, step}` key values become a `sequence` signal.
    fn keyvals(keyvals: &Value) -> Value {
        match keyvals {
            Value::Object(seq) if seq.contains_key("stop") => {
                let mut parts = vec![
                    seq.get("start").cloned().unwrap_or(json!(0)).to_string(),
                    seq["stop"].to_string(),
                ];
                if let Some(step) = seq.get("step") {
                    parts.push(step.to_string());
                }
                json!({ "signal": format!("sequence({})", parts.join(",")) })
            }
            other => other.clone(),
        }
    }

    pub fn assemble(&self) -> Vec<Value> {
        let t = &self.transform;
        let field = &t.impute;
        let by_value = t.method.as_deref().is_none_or(|m| m == "value");

        let mut impute = json!({ "type": "impute", "field": field, "key": t.key });
        if let Some(keyvals) = &t.keyvals {
            impute["keyvals"] = Self::keyvals(keyvals);
        }
        impute["method"] = json!("value");
        if !t.groupby.is_empty() {
            impute["groupby"] = json!(t.groupby);
        }
        impute["value"] = if by_value {
            t.value.clone().unwrap_or(Value::Null)
        } else {
            Value::Null
        };
        if by_value {
            return vec![impute];
        }

        let derived = format!("imputed_{field}_value");
        let mut window = json!({
            "type": "window",
            "as": [derived],
            "ops": [t.method],
            "fields": [field],
            "frame": t.frame.clone().unwrap_or_else(|| vec![None, None]),
            "ignorePeers": false,
        });
        if !t.groupby.is_empty() {
            window["groupby"] = json!(t.groupby);
        }
        let replace = json!({
            "type": "formula",
            "expr": format!("datum.{field} === null ? datum.{derived} : datum.{field}"),
            "as": field,
        });
        vec![impute, window, replace]
    }
}
