//! Nodes that reshape rows without computing new measures.

use std::collections::BTreeSet;

use serde_json::{Value, json};

use crate::spec::transform::{FlattenTransform, FoldTransform, PivotTransform};

#[derive(Debug, Clone, PartialEq)]
pub struct FoldNode {
    pub fields: Vec<String>,
    pub r#as: [String; 2],
}

impl FoldNode {
    pub fn from_transform(t: &FoldTransform) -> Self {
        let (key, value) = t
            .r#as
            .clone()
            .unwrap_or_else(|| ("key".into(), "value".into()));
        Self {
            fields: t.fold.clone(),
            r#as: [key, value],
        }
    }

    pub fn dependent_fields(&self) -> BTreeSet<String> {
        self.fields.iter().cloned().collect()
    }

    pub fn produced_fields(&self) -> BTreeSet<String> {
        self.r#as.iter().cloned().collect()
    }

    pub fn assemble(&self) -> Value {
        json!({ "type": "fold", "fields": self.fields, "as": self.r#as })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FlattenNode {
    pub fields: Vec<String>,
    pub r#as: Vec<String>,
}

impl FlattenNode {
    pub fn from_transform(t: &FlattenTransform) -> Self {
        let given = t.r#as.clone().unwrap_or_default();
        let r#as = t
            .flatten
            .iter()
            .enumerate()
            .map(|(i, field)| given.get(i).cloned().unwrap_or_else(|| field.clone()))
            .collect();
        Self {
            fields: t.flatten.clone(),
            r#as,
        }
    }

    pub fn dependent_fields(&self) -> BTreeSet<String> {
        self.fields.iter().cloned().collect()
    }

    pub fn produced_fields(&self) -> BTreeSet<String> {
        self.r#as.iter().cloned().collect()
    }

    pub fn assemble(&self) -> Value {
        json!({ "type": "flatten", "fields": self.fields, "as": self.r#as })
    }
}

/// Output columns depend on the data, so the produced fields are unknown.
#[derive(Debug, Clone, PartialEq)]
pub struct PivotNode {
    pub transform: PivotTransform,
}

impl PivotNode {
    pub fn dependent_fields(&self) -> BTreeSet<String> {
        let t = &self.transform;
        let mut out = BTreeSet::from([t.pivot.clone(), t.value.clone()]);
        out.extend(t.groupby.iter().cloned());
        out
    }

    pub fn identity(&self) -> Value {
        let t = &self.transform;
        json!([t.pivot, t.value, t.groupby, t.limit, t.op])
    }

    pub fn assemble(&self) -> Value {
        let t = &self.transform;
        let mut out = json!({ "type": "pivot", "field": t.pivot, "value": t.value });
        if let Some(limit) = t.limit {
            out["limit"] = json!(limit);
        }
        if let Some(op) = &t.op {
            out["op"] = json!(op);
        }
        if !t.groupby.is_empty() {
            out["groupby"] = json!(t.groupby);
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SampleNode {
    pub size: u64,
}

impl SampleNode {
    pub fn assemble(&self) -> Value {
        json!({ "type": "sample", "size": self.size })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fold_defaults() {
        let t: FoldTransform = serde_json::from_value(json!({"fold": ["a", "b"]})).unwrap();
        assert_eq!(
            FoldNode::from_transform(&t).assemble(),
            json!({"type": "fold", "fields": ["a", "b"], "as": ["key", "value"]})
        );
    }

    #[test]
    fn test_flatten_partial_as() {
        let t: FlattenTransform =
            serde_json::from_value(json!({"flatten": ["a", "b"], "as": ["x"]})).unwrap();
        assert_eq!(FlattenNode::from_transform(&t).r#as, vec!["x", "b"]);
    }

    #[test]
    fn test_pivot() {
        let t: PivotTransform =
            serde_json::from_value(json!({"pivot": "k", "value": "v", "groupby": ["g"]})).unwrap();
        let node = PivotNode { transform: t };
        assert_eq!(
            node.assemble(),
            json!({"type": "pivot", "field": "k", "value": "v", "groupby": ["g"]})
        );
        assert_eq!(node.dependent_fields().len(), 3);
    }
}
