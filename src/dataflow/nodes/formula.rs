use std::collections::BTreeSet;

use serde_json::{Value, json};

use crate::expr::fields_in_expr;
use crate::spec::FieldDef;
use crate::spec::predicate::{FieldTest, Predicate};

/// `calculate` transform: evaluates an expression into a new field.
#[derive(Debug, Clone, PartialEq)]
pub struct FormulaNode {
    pub expr: String,
    pub r#as: String,
}

impl FormulaNode {
    pub fn new(expr: String, r#as: String) -> Self {
        Self { expr, r#as }
    }

    /// Index of each datum in a custom sort array, used to sort by position.
    pub fn sort_index(def: &FieldDef, order: &[Value]) -> Option<Self> {
        let field = def.field.clone()?;
        let mut expr = String::new();
        for (i, value) in order.iter().enumerate() {
            let test = Predicate::Field {
                field: field.clone(),
                time_unit: def.time_unit.clone(),
                test: FieldTest::Equal(value.clone()),
            };
            expr.push_str(&format!("{} ? {i} : ", test.to_expr()));
        }
        expr.push_str(&order.len().to_string());
        Some(Self::new(expr, sort_index_field(def)))
    }

    pub fn dependent_fields(&self) -> BTreeSet<String> {
        fields_in_expr(&self.expr)
    }

    pub fn produced_fields(&self) -> BTreeSet<String> {
        BTreeSet::from([self.r#as.clone()])
    }

    pub fn assemble(&self) -> Value {
        json!({ "type": "formula", "expr": self.expr, "as": self.r#as })
    }
}

pub fn sort_index_field(def: &FieldDef) -> String {
    format!(
        "{}_{}_sort_index",
        def.channel,
        def.field.as_deref().unwrap_or_default()
    )
}
