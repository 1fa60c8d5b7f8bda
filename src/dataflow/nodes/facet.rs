use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Value, json};

/// One faceting channel: the header dataset name and the grouping fields.
#[derive(Debug, Clone, PartialEq)]
pub struct FacetChannel {
    /// Header dataset, e.g. `column_domain`.
    pub name: String,
    pub fields: Vec<String>,
    /// Sort field aggregated into the header dataset, as `(op, field, as)`.
    pub sort: Option<(String, String, String)>,
}

/// Boundary below which the data is evaluated once per facet cell.
#[derive(Debug, Clone, PartialEq)]
pub struct FacetNode {
    pub id: u64,
    /// Logical name of the faceted model's main output.
    pub main: String,
    /// Name of the per-cell facet dataset.
    pub name: String,
    pub row: Option<FacetChannel>,
    pub column: Option<FacetChannel>,
    pub facet: Option<FacetChannel>,
    /// Child x/y fields with independent discrete scales sized by step.
    pub child_independent_fields: BTreeMap<String, String>,
    /// Dataset the facet partitions; set during assembly.
    pub data: Option<String>,
}

impl FacetNode {
    pub fn channels(&self) -> impl Iterator<Item = (&'static str, &FacetChannel)> {
        [("row", &self.row), ("column", &self.column), ("facet", &self.facet)]
            .into_iter()
            .filter_map(|(channel, def)| def.as_ref().map(|def| (channel, def)))
    }

    /// Grouping fields across every channel.
    pub fn fields(&self) -> Vec<String> {
        let mut out = Vec::new();
        for (_, channel) in self.channels() {
            for field in &channel.fields {
                if !out.contains(field) {
                    out.push(field.clone());
                }
            }
        }
        out
    }

    pub fn dependent_fields(&self) -> BTreeSet<String> {
        let mut out: BTreeSet<String> = self.fields().into_iter().collect();
        for (_, channel) in self.channels() {
            if let Some((_, field, _)) = &channel.sort {
                out.insert(field.clone());
            }
        }
        out.extend(self.child_independent_fields.values().cloned());
        out
    }

    /// Header datasets derived from the faceted data.
    pub fn assemble(&self) -> Vec<Value> {
        let data = self.data.clone().unwrap_or_default();
        let mut out = Vec::new();

        let mut crossed = None;
        if let (Some(column), Some(row)) = (&self.column, &self.row)
            && !self.child_independent_fields.is_empty()
        {
            let name = format!("cross_{}_{}", column.name, row.name);
            let fields: Vec<&String> = ["x", "y"]
                .iter()
                .filter_map(|c| self.child_independent_fields.get(*c))
                .collect();
            let ops: Vec<&str> = fields.iter().map(|_| "distinct").collect();
            out.push(json!({
                "name": name,
                "source": data,
                "transform": [{
                    "type": "aggregate",
                    "groupby": self.fields(),
                    "fields": fields,
                    "ops": ops,
                }]
            }));
            crossed = Some(name);
        }

        for (channel, child_channel) in [(&self.column, Some("x")), (&self.row, Some("y")), (&self.facet, None)] {
            let Some(channel) = channel else {
                continue;
            };
            out.push(self.assemble_header(channel, child_channel, crossed.as_deref(), &data));
        }
        out
    }

    fn assemble_header(
        &self,
        channel: &FacetChannel,
        child_channel: Option<&str>,
        crossed: Option<&str>,
        data: &str,
    ) -> Value {
        let mut fields = Vec::new();
        let mut ops = Vec::new();
        let mut r#as = Vec::new();

        if let Some(field) = child_channel.and_then(|c| self.child_independent_fields.get(c)) {
            let distinct = format!("distinct_{field}");
            if crossed.is_some() {
                fields.push(distinct.clone());
                ops.push("max".to_string());
            } else {
                fields.push(field.clone());
                ops.push("distinct".to_string());
            }
            r#as.push(distinct);
        }
        if let Some((op, field, name)) = &channel.sort {
            fields.push(field.clone());
            ops.push(op.clone());
            r#as.push(name.clone());
        }

        let mut aggregate = json!({ "type": "aggregate", "groupby": channel.fields });
        if !fields.is_empty() {
            aggregate["fields"] = json!(fields);
            aggregate["ops"] = json!(ops);
            aggregate["as"] = json!(r#as);
        }
        json!({
            "name": channel.name,
            "source": crossed.unwrap_or(data),
            "transform": [aggregate],
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn channel(name: &str, field: &str) -> FacetChannel {
        FacetChannel {
            name: name.into(),
            fields: vec![field.into()],
            sort: None,
        }
    }

    #[test]
    fn test_header_with_independent_child() {
        let node = FacetNode {
            id: 0,
            main: "main".into(),
            name: "facet".into(),
            row: None,
            column: Some(channel("column_domain", "g")),
            facet: None,
            child_independent_fields: BTreeMap::from([("x".into(), "a".into())]),
            data: Some("data_0".into()),
        };
        assert_eq!(
            node.assemble(),
            vec![json!({
                "name": "column_domain",
                "source": "data_0",
                "transform": [{
                    "type": "aggregate",
                    "groupby": ["g"],
                    "fields": ["a"],
                    "ops": ["distinct"],
                    "as": ["distinct_a"]
                }]
            })]
        );
    }

    #[test]
    fn test_crossed_header() {
        let node = FacetNode {
            id: 0,
            main: "main".into(),
            name: "facet".into(),
            row: Some(channel("row_domain", "r")),
            column: Some(channel("column_domain", "c")),
            facet: None,
            child_independent_fields: BTreeMap::from([("y".into(), "b".into())]),
            data: Some("data_0".into()),
        };
        let data = node.assemble();
        assert_eq!(data.len(), 3);
        assert_eq!(data[0]["name"], "cross_column_domain_row_domain");
        assert_eq!(data[2]["source"], "cross_column_domain_row_domain");
        assert_eq!(data[2]["transform"][0]["ops"], json!(["max"]));
    }
}
