use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Value, json};

use crate::expr::quote;
use crate::spec::{FieldType, Predicate};

#[derive(Debug, Clone, PartialEq)]
pub struct FilterNode {
    pub predicate: Predicate,
    pub expr: String,
}

impl FilterNode {
    pub fn new(predicate: Predicate) -> Self {
        let expr = predicate.to_expr();
        Self { predicate, expr }
    }

    /// Fields read by the predicate. A field that does not exist in the data
    /// is still reported; the filter then simply matches nothing.
    pub fn dependent_fields(&self) -> BTreeSet<String> {
        self.predicate.fields()
    }

    pub fn assemble(&self) -> Value {
        json!({ "type": "filter", "expr": self.expr })
    }
}

/// Drops rows whose continuous fields are null, NaN or otherwise invalid.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterInvalidNode {
    /// Flat field name to its measurement type.
    pub fields: BTreeMap<String, FieldType>,
}

impl FilterInvalidNode {
    pub fn dependent_fields(&self) -> BTreeSet<String> {
        self.fields.keys().cloned().collect()
    }

    pub fn assemble(&self) -> Option<Value> {
        let mut filters = Vec::new();
        for (field, ty) in &self.fields {
            let r = format!("datum[{}]", quote(field));
            match ty {
                FieldType::Temporal => {
                    filters.push(format!("(isDate({r}) || (isValid({r}) && isFinite(+{r})))"))
                }
                FieldType::Quantitative => {
                    filters.push(format!("isValid({r})"));
                    filters.push(format!("isFinite(+{r})"));
                }
                _ => {}
            }
        }
        if filters.is_empty() {
            return None;
        }
        Some(json!({ "type": "filter", "expr": filters.join(" && ") }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_invalid() {
        let node = FilterInvalidNode {
            fields: BTreeMap::from([
                ("a".to_string(), FieldType::Quantitative),
                ("d".to_string(), FieldType::Temporal),
            ]),
        };
        assert_eq!(
            node.assemble(),
            Some(json!({
                "type": "filter",
                "expr": "isValid(datum[\"a\"]) && isFinite(+datum[\"a\"]) && (isDate(datum[\"d\"]) || (isValid(datum[\"d\"]) && isFinite(+datum[\"d\"])))"
            }))
        );
    }

    #[test]
    fn test_undeclared_field_is_a_dependency() {
        let node = FilterNode::new(Predicate::parse(&json!("datum.nope > 1")).unwrap());
        assert!(node.dependent_fields().contains("nope"));
        assert_eq!(node.assemble(), json!({"type": "filter", "expr": "datum.nope > 1"}));
    }
}
