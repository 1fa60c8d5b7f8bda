use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value, json};

use crate::core::CompileContext;
use crate::expr::{quote, split_access_path};

/// Field coercions: field path to `number`, `boolean`, `string`, `date`,
/// `date:'<format>'`, `utc:'<format>'` or `flatten` for nested paths.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParseNode {
    pub parse: BTreeMap<String, String>,
}

impl ParseNode {
    pub fn new(parse: BTreeMap<String, String>) -> Self {
        Self { parse }
    }

    pub fn fields(&self) -> BTreeSet<String> {
        self.parse.keys().cloned().collect()
    }

    /// Keys both nodes coerce differently.
    pub fn conflicts(&self, other: &ParseNode) -> Vec<String> {
        self.parse
            .iter()
            .filter(|(field, kind)| other.parse.get(*field).is_some_and(|k| k != *kind))
            .map(|(field, _)| field.clone())
            .collect()
    }

    /// Absorbs another parse; on a conflicting key the other value wins and a
    /// warning is recorded.
    pub fn merge(&mut self, cx: &mut CompileContext, other: &ParseNode) {
        for field in self.conflicts(other) {
            cx.warn(format!(
                "Field \"{field}\" is parsed as \"{}\" and \"{}\"; using \"{}\".",
                self.parse[&field], other.parse[&field], other.parse[&field]
            ));
        }
        for (field, kind) in &other.parse {
            self.parse.insert(field.clone(), kind.clone());
        }
    }

    /// `format.parse` entry for top-level fields.
    pub fn assemble_format_parse(&self) -> Map<String, Value> {
        self.parse
            .iter()
            .filter(|(field, _)| split_access_path(field).len() == 1)
            .map(|(field, kind)| (field.clone(), Value::String(kind.clone())))
            .collect()
    }

    /// Formula transforms for the coercions; with `only_nested` the top-level
    /// fields are assumed to be parsed by the loader.
    pub fn assemble_transforms(&self, cx: &mut CompileContext, only_nested: bool) -> Vec<Value> {
        self.parse
            .iter()
            .filter(|(field, _)| !only_nested || split_access_path(field).len() > 1)
            .filter_map(|(field, kind)| {
                let expr = parse_expression(field, kind);
                if expr.is_none() {
                    cx.warn(format!("Unrecognized parse \"{kind}\" for field \"{field}\"."));
                }
                Some(json!({
                    "type": "formula",
                    "expr": expr?,
                    "as": split_access_path(field).join("."),
                }))
            })
            .collect()
    }
}

/// `datum["a"] && datum["a"]["b"]` for `a.b`.
fn access_path_with_datum(field: &str) -> String {
    let parts = split_access_path(field);
    (1..=parts.len())
        .map(|i| {
            let path: Vec<String> = parts[..i].iter().map(|p| quote(p)).collect();
            format!("datum[{}]", path.join("]["))
        })
        .collect::<Vec<_>>()
        .join(" && ")
}

fn parse_expression(field: &str, kind: &str) -> Option<String> {
    let f = access_path_with_datum(field);
    let unquote = |s: &str| s.trim_matches(|c| c == '\'' || c == '"').to_string();
    Some(match kind {
        "number" => format!("toNumber({f})"),
        "boolean" => format!("toBoolean({f})"),
        "string" => format!("toString({f})"),
        "date" => format!("toDate({f})"),
        "flatten" => f,
        _ => {
            if let Some(spec) = kind.strip_prefix("date:") {
                format!("timeParse({f},'{}')", unquote(spec))
            } else if let Some(spec) = kind.strip_prefix("utc:") {
                format!("utcParse({f},'{}')", unquote(spec))
            } else {
                return None;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(pairs: &[(&str, &str)]) -> ParseNode {
        ParseNode::new(pairs.iter().map(|(f, k)| (f.to_string(), k.to_string())).collect())
    }

    #[test]
    fn test_assemble_transforms() {
        let mut cx = CompileContext::default();
        let p = node(&[("a", "number"), ("b.c", "flatten"), ("d", "date:'%Y'")]);
        assert_eq!(
            p.assemble_transforms(&mut cx, false),
            vec![
                json!({"type": "formula", "expr": "toNumber(datum[\"a\"])", "as": "a"}),
                json!({"type": "formula", "expr": "datum[\"b\"] && datum[\"b\"][\"c\"]", "as": "b.c"}),
                json!({"type": "formula", "expr": "timeParse(datum[\"d\"],'%Y')", "as": "d"}),
            ]
        );
        assert_eq!(p.assemble_transforms(&mut cx, true).len(), 1);
        assert_eq!(p.assemble_format_parse().len(), 2);
    }

    #[test]
    fn test_unknown_parse_warns() {
        let mut cx = CompileContext::default();
        assert!(node(&[("a", "weird")]).assemble_transforms(&mut cx, false).is_empty());
        assert!(cx.diagnostics().has_warnings());
    }

    #[test]
    fn test_merge_conflicts_warn() {
        let mut cx = CompileContext::default();
        let mut a = node(&[("x", "number")]);
        a.merge(&mut cx, &node(&[("y", "date")]));
        assert!(!cx.diagnostics().has_warnings());
        a.merge(&mut cx, &node(&[("x", "string")]));
        assert!(cx.diagnostics().has_warnings());
        assert_eq!(a.parse["x"], "string");
    }

    #[test]
    fn test_merge_keeps_fields_sound() {
        use crate::dataflow::node::Node;

        let mut cx = CompileContext::default();
        let a = node(&[("x", "number"), ("y", "date")]);
        let b = node(&[("y", "date"), ("z.w", "flatten")]);
        let mut merged = a.clone();
        merged.merge(&mut cx, &b);

        let fields = |p: &ParseNode| {
            let node = Node::Parse(p.clone());
            let mut out = node.dependent_fields();
            out.extend(node.produced_fields().unwrap_or_default());
            out
        };
        let mut expected = fields(&a);
        expected.extend(fields(&b));
        assert_eq!(fields(&merged), expected);
        assert!(!cx.diagnostics().has_warnings());
    }
}
