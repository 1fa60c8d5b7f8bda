use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Value, json};

use crate::expr::flat_access_name;
use crate::spec::encoding::TimeUnitParams;

#[derive(Debug, Clone, PartialEq)]
pub struct TimeUnitComponent {
    pub r#as: String,
    pub field: String,
    pub unit: TimeUnitParams,
}

/// Truncates dates to time units. Keyed by output field.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TimeUnitNode {
    pub formulas: BTreeMap<String, TimeUnitComponent>,
}

impl TimeUnitNode {
    pub fn single(component: TimeUnitComponent) -> Self {
        Self {
            formulas: BTreeMap::from([(component.r#as.clone(), component)]),
        }
    }

    /// Adds the other node's entries. Refuses, leaving `self` untouched, when
    /// both nodes write the same output from a different field or unit.
    pub fn merge(&mut self, other: &TimeUnitNode) -> bool {
        let conflict = other.formulas.iter().any(|(key, theirs)| {
            self.formulas
                .get(key)
                .is_some_and(|ours| ours.field != theirs.field || ours.unit != theirs.unit)
        });
        if conflict {
            return false;
        }
        for (key, component) in &other.formulas {
            self.formulas.entry(key.clone()).or_insert_with(|| component.clone());
        }
        true
    }

    /// Drops entries whose outputs are already in `produced`. Returns whether
    /// anything was removed.
    pub fn remove_formulas(&mut self, produced: &BTreeSet<String>) -> bool {
        let before = self.formulas.len();
        self.formulas.retain(|key, _| !produced.contains(key));
        self.formulas.len() != before
    }

    pub fn dependent_fields(&self) -> BTreeSet<String> {
        self.formulas.values().map(|c| c.field.clone()).collect()
    }

    pub fn produced_fields(&self) -> BTreeSet<String> {
        self.formulas
            .values()
            .flat_map(|c| [c.r#as.clone(), format!("{}_end", c.r#as)])
            .collect()
    }

    pub fn identity(&self) -> Value {
        let entries: BTreeMap<&String, Value> = self
            .formulas
            .iter()
            .map(|(key, c)| (key, json!({ "field": c.field, "unit": c.unit.full_name() })))
            .collect();
        json!(entries)
    }

    pub fn assemble(&self) -> Vec<Value> {
        self.formulas
            .values()
            .map(|c| {
                let mut transform = json!({
                    "type": "timeunit",
                    "field": flat_access_name(&c.field),
                    "as": [c.r#as, format!("{}_end", c.r#as)],
                    "units": c.unit.parts(),
                });
                if c.unit.utc {
                    transform["timezone"] = json!("utc");
                }
                transform
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn component(unit: &str, field: &str) -> TimeUnitComponent {
        let unit = TimeUnitParams::parse(&json!(unit)).unwrap();
        TimeUnitComponent {
            r#as: format!("{}_{field}", unit.full_name()),
            field: field.into(),
            unit,
        }
    }

    #[test]
    fn test_assemble() {
        let node = TimeUnitNode::single(component("utcyearmonth", "date"));
        assert_eq!(
            node.assemble(),
            vec![json!({
                "type": "timeunit",
                "field": "date",
                "as": ["utcyearmonth_date", "utcyearmonth_date_end"],
                "units": ["year", "month"],
                "timezone": "utc"
            })]
        );
    }

    #[test]
    fn test_merge_and_strip() {
        let mut a = TimeUnitNode::single(component("year", "d"));
        assert!(a.merge(&TimeUnitNode::single(component("month", "d"))));
        assert!(a.merge(&TimeUnitNode::single(component("year", "d"))));
        assert_eq!(a.formulas.len(), 2);

        let produced = BTreeSet::from(["year_d".to_string()]);
        assert!(a.remove_formulas(&produced));
        assert!(!a.remove_formulas(&produced));
        assert_eq!(a.formulas.keys().collect::<Vec<_>>(), vec!["month_d"]);
    }

    #[test]
    fn test_merge_refuses_conflicting_output() {
        let mut month = component("month", "d");
        month.r#as = "t".into();
        let mut year = component("year", "d");
        year.r#as = "t".into();

        let mut a = TimeUnitNode::single(month);
        let before = a.clone();
        assert!(!a.merge(&TimeUnitNode::single(year)));
        assert_eq!(a, before);
    }

    #[test]
    fn test_merge_keeps_fields_sound() {
        let a = TimeUnitNode::single(component("year", "d"));
        let b = TimeUnitNode::single(component("month", "e"));
        let mut merged = a.clone();
        assert!(merged.merge(&b));

        let mut expected = a.dependent_fields();
        expected.extend(a.produced_fields());
        expected.extend(b.dependent_fields());
        expected.extend(b.produced_fields());
        let mut actual = merged.dependent_fields();
        actual.extend(merged.produced_fields());
        assert_eq!(actual, expected);
    }
}
