use std::collections::BTreeSet;

use serde_json::{Value, json};

use crate::spec::transform::StackTransform;

/// Stacks a measure within groups.
#[derive(Debug, Clone, PartialEq)]
pub struct StackNode {
    /// Grouping fields from the dimension channel or the transform.
    pub groupby: Vec<String>,
    /// Facet fields added when the node runs once per cell.
    pub facetby: Vec<String>,
    pub field: String,
    pub stackby: Vec<String>,
    pub sort_fields: Vec<String>,
    pub sort_order: Vec<String>,
    pub offset: String,
    pub r#as: [String; 2],
}

impl StackNode {
    pub fn from_transform(t: &StackTransform) -> Self {
        let r#as = match &t.r#as {
            Value::Array(items) if items.len() == 2 => [
                items[0].as_str().unwrap_or_default().to_string(),
                items[1].as_str().unwrap_or_default().to_string(),
            ],
            Value::String(s) => [s.clone(), format!("{s}_end")],
            _ => [format!("{}_start", t.stack), format!("{}_end", t.stack)],
        };
        Self {
            groupby: t.groupby.clone(),
            facetby: Vec::new(),
            field: t.stack.clone(),
            stackby: Vec::new(),
            sort_fields: t.sort.iter().map(|s| s.field.clone()).collect(),
            sort_order: t
                .sort
                .iter()
                .map(|s| s.order.clone().unwrap_or_else(|| "ascending".into()))
                .collect(),
            offset: t.offset.clone().unwrap_or_else(|| "zero".into()),
            r#as,
        }
    }

    pub fn add_dimensions(&mut self, fields: &[String]) {
        self.facetby.extend(fields.iter().cloned());
    }

    pub fn dependent_fields(&self) -> BTreeSet<String> {
        let mut out: BTreeSet<String> = self.groupby.iter().cloned().collect();
        out.insert(self.field.clone());
        out.extend(self.facetby.iter().cloned());
        out.extend(self.stackby.iter().cloned());
        out.extend(self.sort_fields.iter().cloned());
        out
    }

    pub fn produced_fields(&self) -> BTreeSet<String> {
        self.r#as.iter().cloned().collect()
    }

    pub fn identity(&self) -> Value {
        json!({
            "groupby": self.groupby,
            "facetby": self.facetby,
            "field": self.field,
            "stackby": self.stackby,
            "sort": [self.sort_fields, self.sort_order],
            "offset": self.offset,
            "as": self.r#as,
        })
    }

    pub fn assemble(&self) -> Value {
        let mut groupby = self.groupby.clone();
        groupby.extend(self.facetby.iter().cloned());
        json!({
            "type": "stack",
            "groupby": groupby,
            "field": self.field,
            "sort": { "field": self.sort_fields, "order": self.sort_order },
            "as": self.r#as,
            "offset": self.offset,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transform_defaults() {
        let t: StackTransform =
            serde_json::from_value(json!({"stack": "v", "groupby": ["g"], "as": "s"})).unwrap();
        let mut node = StackNode::from_transform(&t);
        node.add_dimensions(&["row".to_string()]);
        assert_eq!(
            node.assemble(),
            json!({
                "type": "stack",
                "groupby": ["g", "row"],
                "field": "v",
                "sort": {"field": [], "order": []},
                "as": ["s", "s_end"],
                "offset": "zero"
            })
        );
    }
}
