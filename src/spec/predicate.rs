use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Map, Value};

use crate::error::CompileError;
use crate::expr::{datum_accessor, fields_in_expr, quote};
use crate::spec::encoding::TimeUnitParams;

#[derive(Debug, Clone, PartialEq)]
pub enum FieldTest {
    Equal(Value),
    Lt(Value),
    Lte(Value),
    Gt(Value),
    Gte(Value),
    Range(Vec<Value>),
    OneOf(Vec<Value>),
    Valid(bool),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Expr(String),
    Field {
        field: String,
        time_unit: Option<TimeUnitParams>,
        test: FieldTest,
    },
    Param {
        param: String,
        empty: bool,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
}

impl Predicate {
    pub fn parse(value: &Value) -> Result<Self, CompileError> {
        match value {
            Value::String(expr) => Ok(Predicate::Expr(expr.clone())),
            Value::Object(map) => Self::parse_object(map),
            other => Err(CompileError::spec("filter", format!("unsupported predicate {other}"))),
        }
    }

    fn parse_object(map: &Map<String, Value>) -> Result<Self, CompileError> {
        let list = |v: &Value| -> Result<Vec<Predicate>, CompileError> {
            v.as_array()
                .ok_or_else(|| CompileError::spec("filter", "logical operands must be an array"))?
                .iter()
                .map(Predicate::parse)
                .collect()
        };
        if let Some(v) = map.get("and") {
            return Ok(Predicate::And(list(v)?));
        }
        if let Some(v) = map.get("or") {
            return Ok(Predicate::Or(list(v)?));
        }
        if let Some(v) = map.get("not") {
            return Ok(Predicate::Not(Box::new(Predicate::parse(v)?)));
        }
        if let Some(param) = map.get("param").and_then(Value::as_str) {
            return Ok(Predicate::Param {
                param: param.to_string(),
                empty: map.get("empty").and_then(Value::as_bool).unwrap_or(true),
            });
        }

        let field = map
            .get("field")
            .and_then(Value::as_str)
            .ok_or_else(|| CompileError::spec("filter", "field predicate requires \"field\""))?
            .to_string();
        let time_unit = map.get("timeUnit").and_then(TimeUnitParams::parse);
        let array = |v: &Value| v.as_array().cloned().unwrap_or_default();

        let test = if let Some(v) = map.get("equal") {
            FieldTest::Equal(v.clone())
        } else if let Some(v) = map.get("lt") {
            FieldTest::Lt(v.clone())
        } else if let Some(v) = map.get("lte") {
            FieldTest::Lte(v.clone())
        } else if let Some(v) = map.get("gt") {
            FieldTest::Gt(v.clone())
        } else if let Some(v) = map.get("gte") {
            FieldTest::Gte(v.clone())
        } else if let Some(v) = map.get("range") {
            FieldTest::Range(array(v))
        } else if let Some(v) = map.get("oneOf").or_else(|| map.get("in")) {
            FieldTest::OneOf(array(v))
        } else if let Some(v) = map.get("valid") {
            FieldTest::Valid(v.as_bool().unwrap_or(true))
        } else {
            return Err(CompileError::spec(
                "filter",
                format!("field predicate on \"{field}\" has no test"),
            ));
        };

        Ok(Predicate::Field {
            field,
            time_unit,
            test,
        })
    }

    /// Every field the predicate reads.
    pub fn fields(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        self.collect_fields(&mut out);
        out
    }

    fn collect_fields(&self, out: &mut BTreeSet<String>) {
        match self {
            Predicate::Expr(expr) => out.extend(fields_in_expr(expr)),
            Predicate::Field { field, .. } => {
                out.insert(field.clone());
            }
            Predicate::Param { .. } => {}
            Predicate::And(items) | Predicate::Or(items) => {
                items.iter().for_each(|p| p.collect_fields(out))
            }
            Predicate::Not(inner) => inner.collect_fields(out),
        }
    }

    /// Selection parameters referenced by the predicate.
    pub fn params(&self) -> Vec<String> {
        match self {
            Predicate::Param { param, .. } => vec![param.clone()],
            Predicate::And(items) | Predicate::Or(items) => {
                items.iter().flat_map(Predicate::params).collect()
            }
            Predicate::Not(inner) => inner.params(),
            _ => Vec::new(),
        }
    }

    /// Parse types implied by the literals the predicate compares against.
    pub fn implicit_parse(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        self.collect_parse(&mut out);
        out
    }

    fn collect_parse(&self, out: &mut BTreeMap<String, String>) {
        match self {
            Predicate::Field {
                field,
                time_unit,
                test,
            } => {
                let literal = match test {
                    FieldTest::Equal(v) => Some(v),
                    FieldTest::Range(items) | FieldTest::OneOf(items) => items.first(),
                    _ => None,
                };
                let kind = match literal {
                    Some(v) if is_date_time(v) => Some("date"),
                    Some(Value::Number(n)) if n.as_f64() != Some(0.0) => Some("number"),
                    Some(Value::String(s)) if !s.is_empty() => Some("string"),
                    _ => None,
                };
                if let Some(kind) = kind {
                    out.insert(field.clone(), kind.to_string());
                }
                if time_unit.is_some() {
                    out.insert(field.clone(), "date".to_string());
                }
            }
            Predicate::And(items) | Predicate::Or(items) => {
                items.iter().for_each(|p| p.collect_parse(out))
            }
            Predicate::Not(inner) => inner.collect_parse(out),
            _ => {}
        }
    }

    /// Expression string evaluated by the runtime filter transform.
    pub fn to_expr(&self) -> String {
        match self {
            Predicate::Expr(expr) => expr.clone(),
            Predicate::Param { param, empty } => {
                let store = quote(&format!("{param}_store"));
                let test = format!("vlSelectionTest({store}, datum)");
                if *empty {
                    format!("!length(data({store})) || {test}")
                } else {
                    format!("length(data({store})) && {test}")
                }
            }
            Predicate::And(items) => join(items, " && "),
            Predicate::Or(items) => join(items, " || "),
            Predicate::Not(inner) => format!("!({})", inner.to_expr()),
            Predicate::Field {
                field,
                time_unit,
                test,
            } => {
                let accessor = match time_unit {
                    Some(unit) => format!("time({})", time_unit_expr(unit, &datum_accessor(field))),
                    None => datum_accessor(field),
                };
                let lit = |v: &Value| literal(v, time_unit.is_some());
                match test {
                    FieldTest::Equal(v) => format!("{accessor}==={}", lit(v)),
                    FieldTest::Lt(v) => format!("{accessor}<{}", lit(v)),
                    FieldTest::Lte(v) => format!("{accessor}<={}", lit(v)),
                    FieldTest::Gt(v) => format!("{accessor}>{}", lit(v)),
                    FieldTest::Gte(v) => format!("{accessor}>={}", lit(v)),
                    FieldTest::Range(items) => {
                        let lower = items.first().filter(|v| !v.is_null());
                        let upper = items.get(1).filter(|v| !v.is_null());
                        match (lower, upper) {
                            (Some(lo), Some(hi)) => {
                                format!("inrange({accessor}, [{}, {}])", lit(lo), lit(hi))
                            }
                            (Some(lo), None) => format!("{accessor} >= {}", lit(lo)),
                            (None, Some(hi)) => format!("{accessor} <= {}", lit(hi)),
                            (None, None) => "true".to_string(),
                        }
                    }
                    FieldTest::OneOf(items) => {
                        let items: Vec<String> = items.iter().map(lit).collect();
                        format!("indexof([{}], {accessor}) !== -1", items.join(","))
                    }
                    FieldTest::Valid(true) => {
                        format!("{accessor}!==null&&!isNaN({accessor})")
                    }
                    FieldTest::Valid(false) => {
                        format!("{accessor}===null||isNaN({accessor})")
                    }
                }
            }
        }
    }
}

fn join(items: &[Predicate], op: &str) -> String {
    items
        .iter()
        .map(|p| format!("({})", p.to_expr()))
        .collect::<Vec<_>>()
        .join(op)
}

fn is_date_time(value: &Value) -> bool {
    value.as_object().is_some_and(|map| {
        ["year", "quarter", "month", "date", "day", "hours", "minutes", "seconds", "milliseconds"]
            .iter()
            .any(|k| map.contains_key(*k))
    })
}

fn literal(value: &Value, temporal: bool) -> String {
    if is_date_time(value) {
        return format!("time({})", date_time_expr(value));
    }
    match value {
        Value::String(s) if temporal => format!("time(datetime({}))", quote(s)),
        other => other.to_string(),
    }
}

/// `datetime(...)` expression for a date-time object literal.
fn date_time_expr(value: &Value) -> String {
    let num = |key: &str, default: i64| {
        value
            .get(key)
            .map(|v| match v {
                Value::String(s) => quote(s),
                other => other.to_string(),
            })
            .unwrap_or_else(|| default.to_string())
    };
    let month = match value.get("month").and_then(Value::as_i64) {
        Some(m) => (m - 1).to_string(),
        None => num("month", 0),
    };
    let func = if value.get("utc") == Some(&Value::Bool(true)) {
        "utc"
    } else {
        "datetime"
    };
    format!(
        "{func}({}, {month}, {}, {}, {}, {}, {})",
        num("year", 2012),
        num("date", 1),
        num("hours", 0),
        num("minutes", 0),
        num("seconds", 0),
        num("milliseconds", 0)
    )
}

/// Truncates a date expression to the given unit.
pub fn time_unit_expr(unit: &TimeUnitParams, field_expr: &str) -> String {
    let prefix = if unit.utc { "utc" } else { "" };
    let parts = unit.parts();
    let has = |p: &str| parts.contains(&p);
    let get = |p: &str, default: &str| {
        if has(p) {
            format!("{prefix}{p}({field_expr})")
        } else {
            default.to_string()
        }
    };
    let month = if has("quarter") && !has("month") {
        format!("3*{prefix}quarter({field_expr})")
    } else {
        get("month", "0")
    };
    let func = if unit.utc { "utc" } else { "datetime" };
    format!(
        "{func}({}, {month}, {}, {}, {}, {}, {})",
        get("year", "2012"),
        get("date", "1"),
        get("hours", "0"),
        get("minutes", "0"),
        get("seconds", "0"),
        get("milliseconds", "0")
    )
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_expression_fields() {
        let pred = Predicate::parse(&json!("datum.missing > 2")).unwrap();
        assert!(pred.fields().contains("missing"));
    }

    #[test]
    fn test_field_predicates() {
        let pred = Predicate::parse(&json!({"and": [
            {"field": "a", "equal": 5},
            {"field": "b", "oneOf": ["x", "y"]},
            {"not": {"field": "c", "range": [1, null]}}
        ]}))
        .unwrap();
        assert_eq!(
            pred.to_expr(),
            r#"(datum["a"]===5) && (indexof(["x","y"], datum["b"]) !== -1) && (!(datum["c"] >= 1))"#
        );
        let parse = pred.implicit_parse();
        assert_eq!(parse["a"], "number");
        assert_eq!(parse["b"], "string");
        assert_eq!(parse["c"], "number");
    }

    #[test]
    fn test_date_literal_implies_date_parse() {
        let pred = Predicate::parse(&json!({"field": "d", "equal": {"year": 2000}})).unwrap();
        assert_eq!(pred.implicit_parse()["d"], "date");
        assert!(pred.to_expr().contains("datetime(2000, 0, 1"));
    }

    #[test]
    fn test_param_predicate() {
        let pred = Predicate::parse(&json!({"param": "brush"})).unwrap();
        assert_eq!(
            pred.to_expr(),
            r#"!length(data("brush_store")) || vlSelectionTest("brush_store", datum)"#
        );
        assert_eq!(pred.params(), vec!["brush"]);
    }

    #[test]
    fn test_field_predicate_without_test_is_fatal() {
        assert!(Predicate::parse(&json!({"field": "a"})).is_err());
    }
}
