use std::collections::BTreeSet;

use serde_json::{Value, json};

use crate::spec::transform::WindowTransform;

const AGGREGATE_OPS: &[&str] = &[
    "argmax", "argmin", "average", "count", "distinct", "product", "max", "mean", "median", "min",
    "missing", "q1", "q3", "ci0", "ci1", "stderr", "stdev", "stdevp", "sum", "valid", "values",
    "variance", "variancep", "exponential", "exponentialb",
];

pub fn is_aggregate_op(op: &str) -> bool {
    AGGREGATE_OPS.contains(&op)
}

#[derive(Debug, Clone, PartialEq)]
pub struct WindowNode {
    pub transform: WindowTransform,
}

impl WindowNode {
    pub fn add_dimensions(&mut self, fields: &[String]) {
        for field in fields {
            if !self.transform.groupby.contains(field) {
                self.transform.groupby.push(field.clone());
            }
        }
    }

    pub fn dependent_fields(&self) -> BTreeSet<String> {
        let t = &self.transform;
        let mut out: BTreeSet<String> = t.groupby.iter().cloned().collect();
        out.extend(t.window.iter().filter_map(|w| w.field.clone()));
        out.extend(t.sort.iter().map(|s| s.field.clone()));
        out
    }

    pub fn produced_fields(&self) -> BTreeSet<String> {
        self.transform.window.iter().map(|w| w.r#as.clone()).collect()
    }

    pub fn identity(&self) -> Value {
        let t = &self.transform;
        json!({
            "window": t.window.iter().map(|w| json!([w.op, w.field, w.param, w.r#as])).collect::<Vec<_>>(),
            "frame": t.frame,
            "ignorePeers": t.ignore_peers,
            "groupby": t.groupby,
            "sort": t.sort.iter().map(|s| json!([s.field, s.order])).collect::<Vec<_>>(),
        })
    }

    /// A window over the whole partition whose operations all aggregate is
    /// emitted as a join-aggregate.
    pub fn assemble(&self) -> Value {
        let t = &self.transform;
        let ops: Vec<&str> = t.window.iter().map(|w| w.op.as_str()).collect();
        let r#as: Vec<&str> = t.window.iter().map(|w| w.r#as.as_str()).collect();
        let fields: Vec<Option<&str>> = t.window.iter().map(|w| w.field.as_deref()).collect();
        let params: Vec<Value> = t.window.iter().map(|w| w.param.clone().unwrap_or(Value::Null)).collect();

        let unbounded = matches!(t.frame.as_deref(), Some([None, None]));
        if unbounded && ops.iter().all(|op| is_aggregate_op(op)) {
            let mut out = json!({ "type": "joinaggregate", "as": r#as, "ops": ops, "fields": fields });
            if !t.groupby.is_empty() {
                out["groupby"] = json!(t.groupby);
            }
            return out;
        }

        let sort_fields: Vec<&str> = t.sort.iter().map(|s| s.field.as_str()).collect();
        let sort_order: Vec<&str> = t
            .sort
            .iter()
            .map(|s| s.order.as_deref().unwrap_or("ascending"))
            .collect();
        let mut out = json!({
            "type": "window",
            "params": params,
            "as": r#as,
            "ops": ops,
            "fields": fields,
            "sort": { "field": sort_fields, "order": sort_order },
        });
        if let Some(ignore_peers) = t.ignore_peers {
            out["ignorePeers"] = json!(ignore_peers);
        }
        if !t.groupby.is_empty() {
            out["groupby"] = json!(t.groupby);
        }
        if let Some(frame) = &t.frame {
            out["frame"] = json!(frame);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(value: Value) -> WindowNode {
        WindowNode {
            transform: serde_json::from_value(value).unwrap(),
        }
    }

    #[test]
    fn test_unbounded_aggregate_becomes_joinaggregate() {
        let n = node(json!({"window": [{"op": "sum", "field": "a", "as": "total"}], "frame": [null, null], "groupby": ["g"]}));
        assert_eq!(
            n.assemble(),
            json!({"type": "joinaggregate", "as": ["total"], "ops": ["sum"], "fields": ["a"], "groupby": ["g"]})
        );
    }

    #[test]
    fn test_ranking_window() {
        let n = node(json!({"window": [{"op": "rank", "as": "r"}], "sort": [{"field": "v", "order": "descending"}]}));
        assert_eq!(
            n.assemble(),
            json!({
                "type": "window",
                "params": [null],
                "as": ["r"],
                "ops": ["rank"],
                "fields": [null],
                "sort": {"field": ["v"], "order": ["descending"]}
            })
        );
        assert!(n.dependent_fields().contains("v"));
    }
}
