use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Value, json};

use crate::expr::flat_access_name;
use crate::spec::transform::{AggregateTransform, AggregatedField, JoinAggregateTransform};

/// Field used for `count`, which reads no field.
pub const COUNT_FIELD: &str = "*";

/// Field to operation to output names.
pub type Measures = BTreeMap<String, BTreeMap<String, BTreeSet<String>>>;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct AggregateNode {
    pub dimensions: BTreeSet<String>,
    pub measures: Measures,
}

impl AggregateNode {
    pub fn add_measure(&mut self, field: Option<&str>, op: &str, r#as: String) {
        let field = if op == "count" {
            COUNT_FIELD
        } else {
            field.unwrap_or(COUNT_FIELD)
        };
        self.measures
            .entry(field.to_string())
            .or_default()
            .entry(op.to_string())
            .or_default()
            .insert(r#as);
    }

    pub fn from_transform(t: &AggregateTransform) -> Self {
        let mut node = Self {
            dimensions: t.groupby.iter().cloned().collect(),
            measures: Measures::new(),
        };
        for AggregatedField { op, field, r#as } in &t.aggregate {
            node.add_measure(field.as_deref(), op, r#as.clone());
        }
        node
    }

    /// Adds grouping fields, e.g. the facet fields of a per-cell aggregate.
    pub fn add_dimensions(&mut self, fields: &[String]) {
        self.dimensions.extend(fields.iter().cloned());
    }

    /// Merges the measures of an aggregate with the same grouping. Returns
    /// `false` and leaves `self` untouched when the groupings differ.
    pub fn merge(&mut self, other: &AggregateNode) -> bool {
        if self.dimensions != other.dimensions {
            return false;
        }
        for (field, ops) in &other.measures {
            for (op, names) in ops {
                self.measures
                    .entry(field.clone())
                    .or_default()
                    .entry(op.clone())
                    .or_default()
                    .extend(names.iter().cloned());
            }
        }
        true
    }

    /// Key grouping aggregates that may merge.
    pub fn groupby_key(&self) -> String {
        self.dimensions.iter().cloned().collect::<Vec<_>>().join(",")
    }

    pub fn dependent_fields(&self) -> BTreeSet<String> {
        let mut out = self.dimensions.clone();
        out.extend(self.measures.keys().filter(|f| *f != COUNT_FIELD).cloned());
        out
    }

    pub fn produced_fields(&self) -> BTreeSet<String> {
        self.measures
            .values()
            .flat_map(|ops| ops.values().flatten().cloned())
            .collect()
    }

    pub fn identity(&self) -> Value {
        json!({ "dimensions": self.dimensions, "measures": self.measures })
    }

    pub fn assemble(&self) -> Value {
        let mut ops = Vec::new();
        let mut fields = Vec::new();
        let mut r#as = Vec::new();
        for (field, by_op) in &self.measures {
            for (op, names) in by_op {
                for name in names {
                    r#as.push(name.clone());
                    ops.push(op.clone());
                    fields.push(if field == COUNT_FIELD {
                        Value::Null
                    } else {
                        Value::String(flat_access_name(field))
                    });
                }
            }
        }
        let groupby: Vec<String> = self.dimensions.iter().map(|d| flat_access_name(d)).collect();
        json!({
            "type": "aggregate",
            "groupby": groupby,
            "ops": ops,
            "fields": fields,
            "as": r#as,
        })
    }
}

/// Aggregates joined back onto every row.
#[derive(Debug, Clone, PartialEq)]
pub struct JoinAggregateNode {
    pub fields: Vec<Option<String>>,
    pub ops: Vec<String>,
    pub r#as: Vec<String>,
    pub groupby: Vec<String>,
}

impl JoinAggregateNode {
    pub fn from_transform(t: &JoinAggregateTransform) -> Self {
        Self {
            fields: t.joinaggregate.iter().map(|f| f.field.clone()).collect(),
            ops: t.joinaggregate.iter().map(|f| f.op.clone()).collect(),
            r#as: t.joinaggregate.iter().map(|f| f.r#as.clone()).collect(),
            groupby: t.groupby.clone(),
        }
    }

    pub fn add_dimensions(&mut self, fields: &[String]) {
        for field in fields {
            if !self.groupby.contains(field) {
                self.groupby.push(field.clone());
            }
        }
    }

    pub fn dependent_fields(&self) -> BTreeSet<String> {
        let mut out: BTreeSet<String> = self.groupby.iter().cloned().collect();
        out.extend(self.fields.iter().flatten().cloned());
        out
    }

    pub fn produced_fields(&self) -> BTreeSet<String> {
        self.r#as.iter().cloned().collect()
    }

    pub fn identity(&self) -> Value {
        json!({ "fields": self.fields, "ops": self.ops, "as": self.r#as, "groupby": self.groupby })
    }

    pub fn assemble(&self) -> Value {
        let mut out = json!({
            "type": "joinaggregate",
            "as": self.r#as,
            "ops": self.ops,
            "fields": self.fields.iter().map(|f| f.as_deref().map(flat_access_name)).collect::<Vec<_>>(),
        });
        if !self.groupby.is_empty() {
            out["groupby"] = json!(self.groupby);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn aggregate(groupby: &[&str], measures: &[(&str, &str, &str)]) -> AggregateNode {
        let mut node = AggregateNode {
            dimensions: groupby.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        for (field, op, r#as) in measures {
            node.add_measure(Some(field), op, r#as.to_string());
        }
        node
    }

    #[test]
    fn test_assemble_count_has_null_field() {
        let node = aggregate(&["a"], &[("*", "count", "__count"), ("b", "mean", "mean_b")]);
        assert_eq!(
            node.assemble(),
            json!({
                "type": "aggregate",
                "groupby": ["a"],
                "ops": ["count", "mean"],
                "fields": [null, "b"],
                "as": ["__count", "mean_b"]
            })
        );
    }

    #[test]
    fn test_merge_soundness() {
        let mut a = aggregate(&["g"], &[("x", "sum", "sum_x")]);
        let b = aggregate(&["g"], &[("y", "max", "max_y")]);
        let deps: BTreeSet<String> = a.dependent_fields().union(&b.dependent_fields()).cloned().collect();
        let produced: BTreeSet<String> = a.produced_fields().union(&b.produced_fields()).cloned().collect();

        assert!(a.merge(&b));
        assert_eq!(a.dependent_fields(), deps);
        assert_eq!(a.produced_fields(), produced);

        let c = aggregate(&["h"], &[("y", "max", "max_y")]);
        assert!(!a.merge(&c));
    }

    #[test]
    fn test_hash_ignores_insertion_order() {
        let a = aggregate(&["a", "b"], &[("x", "sum", "s"), ("y", "min", "m")]);
        let b = aggregate(&["b", "a"], &[("y", "min", "m"), ("x", "sum", "s")]);
        assert_eq!(a.identity().to_string(), b.identity().to_string());
    }
}
