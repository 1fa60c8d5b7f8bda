use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Value, json};

use crate::spec::transform::StatisticalTransform;

/// Density estimate, quantiles, regression or loess over one field.
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticalNode {
    pub method: &'static str,
    pub field: String,
    /// Independent field of `regression` and `loess`.
    pub on: Option<String>,
    pub groupby: Vec<String>,
    pub r#as: [String; 2],
    /// Remaining parameters passed through unchanged.
    pub params: BTreeMap<String, Value>,
}

impl StatisticalNode {
    pub fn from_transform(method: &'static str, t: &StatisticalTransform) -> Self {
        let mut params = t.params.clone();
        let field = params
            .remove(method)
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        let on = params.remove("on").and_then(|v| v.as_str().map(str::to_string));

        let (first, second) = match method {
            "density" => ("value".to_string(), "density".to_string()),
            "quantile" => ("prob".to_string(), "value".to_string()),
            _ => (on.clone().unwrap_or_default(), field.clone()),
        };
        let given = t.r#as.clone().unwrap_or_default();
        let r#as = [
            given.first().cloned().unwrap_or(first),
            given.get(1).cloned().unwrap_or(second),
        ];
        if method == "density" {
            params
                .entry("resolve".to_string())
                .or_insert_with(|| json!("shared"));
        }
        Self {
            method,
            field,
            on,
            groupby: t.groupby.clone(),
            r#as,
            params,
        }
    }

    pub fn dependent_fields(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::from([self.field.clone()]);
        out.extend(self.on.iter().cloned());
        out.extend(self.groupby.iter().cloned());
        out
    }

    pub fn produced_fields(&self) -> BTreeSet<String> {
        self.r#as.iter().cloned().collect()
    }

    pub fn identity(&self) -> Value {
        json!([self.method, self.field, self.on, self.groupby, self.r#as, self.params])
    }

    pub fn assemble(&self) -> Value {
        let mut out = match self.method {
            "density" => json!({ "type": "kde", "field": self.field }),
            "quantile" => json!({ "type": "quantile", "field": self.field }),
            method => json!({ "type": method, "x": self.on, "y": self.field }),
        };
        if !self.groupby.is_empty() {
            out["groupby"] = json!(self.groupby);
        }
        for (key, value) in &self.params {
            out[key] = value.clone();
        }
        out["as"] = json!(self.r#as);
        out
    }
}

/// Computes `[min, max]` of a field into a signal.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtentNode {
    pub field: String,
    pub param: String,
}

impl ExtentNode {
    pub fn assemble(&self) -> Value {
        json!({ "type": "extent", "field": self.field, "signal": self.param })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(method: &'static str, value: Value) -> StatisticalNode {
        let t: StatisticalTransform = serde_json::from_value(value).unwrap();
        StatisticalNode::from_transform(method, &t)
    }

    #[test]
    fn test_density() {
        let n = node("density", json!({"density": "v", "bandwidth": 0.5}));
        assert_eq!(
            n.assemble(),
            json!({
                "type": "kde",
                "field": "v",
                "bandwidth": 0.5,
                "resolve": "shared",
                "as": ["value", "density"]
            })
        );
    }

    #[test]
    fn test_regression_defaults_to_input_names() {
        let n = node("regression", json!({"regression": "y", "on": "x", "method": "poly"}));
        assert_eq!(
            n.assemble(),
            json!({"type": "regression", "x": "x", "y": "y", "method": "poly", "as": ["x", "y"]})
        );
        assert_eq!(n.dependent_fields().len(), 2);
    }

    #[test]
    fn test_quantile_names() {
        let n = node("quantile", json!({"quantile": "v", "as": ["p"]}));
        assert_eq!(n.r#as, ["p".to_string(), "value".to_string()]);
    }
}
