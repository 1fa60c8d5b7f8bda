use std::collections::BTreeMap;

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::CompileError;
use crate::spec::predicate::Predicate;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AggregatedField {
    pub op: String,
    #[serde(default)]
    pub field: Option<String>,
    pub r#as: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SortField {
    pub field: String,
    #[serde(default)]
    pub order: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct WindowField {
    pub op: String,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub param: Option<Value>,
    pub r#as: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CalculateTransform {
    pub calculate: String,
    pub r#as: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BinTransform {
    pub bin: Value,
    pub field: String,
    pub r#as: BinAs,
}

/// Output fields of a bin transform: a start name, or a `[start, end]` pair.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum BinAs {
    Start(String),
    Pair([String; 2]),
}

impl BinAs {
    pub fn fields(&self) -> [String; 2] {
        match self {
            BinAs::Start(start) => [start.clone(), format!("{start}_end")],
            BinAs::Pair(pair) => pair.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeUnitTransform {
    pub time_unit: Value,
    pub field: String,
    pub r#as: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AggregateTransform {
    pub aggregate: Vec<AggregatedField>,
    #[serde(default)]
    pub groupby: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct JoinAggregateTransform {
    pub joinaggregate: Vec<AggregatedField>,
    #[serde(default)]
    pub groupby: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowTransform {
    pub window: Vec<WindowField>,
    #[serde(default)]
    pub frame: Option<Vec<Option<i64>>>,
    #[serde(default)]
    pub ignore_peers: Option<bool>,
    #[serde(default)]
    pub groupby: Vec<String>,
    #[serde(default)]
    pub sort: Vec<SortField>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LookupFrom {
    /// Secondary data; absent when looking up a selection parameter.
    #[serde(default)]
    pub data: Option<Value>,
    #[serde(default)]
    pub param: Option<String>,
    pub key: String,
    #[serde(default)]
    pub fields: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LookupTransform {
    pub lookup: String,
    pub from: LookupFrom,
    #[serde(default)]
    pub r#as: Option<Value>,
    #[serde(default)]
    pub default: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StackTransform {
    pub stack: String,
    #[serde(default)]
    pub groupby: Vec<String>,
    #[serde(default)]
    pub offset: Option<String>,
    #[serde(default)]
    pub sort: Vec<SortField>,
    pub r#as: Value,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FoldTransform {
    pub fold: Vec<String>,
    #[serde(default)]
    pub r#as: Option<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FlattenTransform {
    pub flatten: Vec<String>,
    #[serde(default)]
    pub r#as: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PivotTransform {
    pub pivot: String,
    pub value: String,
    #[serde(default)]
    pub groupby: Vec<String>,
    #[serde(default)]
    pub limit: Option<u64>,
    #[serde(default)]
    pub op: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SampleTransform {
    pub sample: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ImputeTransform {
    pub impute: String,
    pub key: String,
    #[serde(default)]
    pub keyvals: Option<Value>,
    #[serde(default)]
    pub groupby: Vec<String>,
    #[serde(default)]
    pub frame: Option<Vec<Option<i64>>>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub value: Option<Value>,
}

/// Shape shared by the statistical transforms: a target field, optional
/// grouping, optional output names and pass-through parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StatisticalTransform {
    #[serde(default)]
    pub groupby: Vec<String>,
    #[serde(default)]
    pub r#as: Option<Vec<String>>,
    #[serde(flatten)]
    pub params: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExtentTransform {
    pub extent: String,
    pub param: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Transform {
    Filter(Predicate),
    Calculate(CalculateTransform),
    Bin(BinTransform),
    TimeUnit(TimeUnitTransform),
    Aggregate(AggregateTransform),
    JoinAggregate(JoinAggregateTransform),
    Window(WindowTransform),
    Lookup(LookupTransform),
    Stack(StackTransform),
    Fold(FoldTransform),
    Flatten(FlattenTransform),
    Pivot(PivotTransform),
    Sample(SampleTransform),
    Impute(ImputeTransform),
    /// `density`, `quantile`, `regression` or `loess`, with the target field
    /// left in `params` under the method key.
    Statistical {
        method: &'static str,
        transform: StatisticalTransform,
    },
    Extent(ExtentTransform),
}

fn typed<T: DeserializeOwned>(kind: &'static str, value: &Value) -> Result<T, CompileError> {
    serde_json::from_value(value.clone())
        .map_err(|source| CompileError::InvalidTransform { kind, source })
}

impl Transform {
    /// Discriminates a transform object by the key that identifies its kind.
    pub fn parse(value: &Value) -> Result<Self, CompileError> {
        let map = value
            .as_object()
            .ok_or_else(|| CompileError::spec("transform", "expected an object"))?;
        let has = |key: &str| map.contains_key(key);

        Ok(if has("filter") {
            Transform::Filter(Predicate::parse(&map["filter"])?)
        } else if has("calculate") {
            Transform::Calculate(typed("calculate", value)?)
        } else if has("bin") {
            Transform::Bin(typed("bin", value)?)
        } else if has("timeUnit") {
            Transform::TimeUnit(typed("timeUnit", value)?)
        } else if has("aggregate") {
            Transform::Aggregate(typed("aggregate", value)?)
        } else if has("joinaggregate") {
            Transform::JoinAggregate(typed("joinaggregate", value)?)
        } else if has("window") {
            Transform::Window(typed("window", value)?)
        } else if has("lookup") {
            Transform::Lookup(typed("lookup", value)?)
        } else if has("stack") {
            Transform::Stack(typed("stack", value)?)
        } else if has("fold") {
            Transform::Fold(typed("fold", value)?)
        } else if has("flatten") {
            Transform::Flatten(typed("flatten", value)?)
        } else if has("pivot") {
            Transform::Pivot(typed("pivot", value)?)
        } else if has("sample") {
            Transform::Sample(typed("sample", value)?)
        } else if has("impute") {
            Transform::Impute(typed("impute", value)?)
        } else if has("extent") {
            Transform::Extent(typed("extent", value)?)
        } else if let Some(method) = ["density", "quantile", "regression", "loess"]
            .into_iter()
            .find(|key| has(key))
        {
            let transform: StatisticalTransform = typed(method, value)?;
            if !transform.params.get(method).is_some_and(Value::is_string) {
                return Err(CompileError::spec(
                    "transform",
                    format!("\"{method}\" must name a field"),
                ));
            }
            if matches!(method, "regression" | "loess")
                && !transform.params.get("on").is_some_and(Value::is_string)
            {
                return Err(CompileError::spec(
                    "transform",
                    format!("\"{method}\" requires an \"on\" field"),
                ));
            }
            Transform::Statistical { method, transform }
        } else {
            return Err(CompileError::spec(
                "transform",
                format!("unrecognized transform {value}"),
            ));
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_discriminates_by_key() {
        let t = Transform::parse(&json!({"calculate": "datum.a * 2", "as": "b"})).unwrap();
        assert!(matches!(t, Transform::Calculate(c) if c.r#as == "b"));

        let t = Transform::parse(&json!({"density": "v", "groupby": ["g"], "bandwidth": 0.3})).unwrap();
        let Transform::Statistical { method, transform } = t else {
            panic!("expected a statistical transform");
        };
        assert_eq!(method, "density");
        assert_eq!(transform.groupby, vec!["g"]);
        assert_eq!(transform.params["bandwidth"], json!(0.3));
    }

    #[test]
    fn test_missing_required_field_is_fatal() {
        let err = Transform::parse(&json!({"calculate": "datum.a"})).unwrap_err();
        assert!(matches!(err, CompileError::InvalidTransform { kind: "calculate", .. }));
        assert!(Transform::parse(&json!({"regression": "y"})).is_err());
        assert!(Transform::parse(&json!({"unknown": 1})).is_err());
    }

    #[test]
    fn test_bin_output_fields() {
        let Transform::Bin(t) = Transform::parse(&json!({"bin": true, "field": "a", "as": "b"})).unwrap() else {
            unreachable!()
        };
        assert_eq!(t.r#as.fields(), ["b".to_string(), "b_end".to_string()]);
        let Transform::Bin(t) = Transform::parse(&json!({"bin": true, "field": "a", "as": ["lo", "hi"]})).unwrap() else {
            unreachable!()
        };
        assert_eq!(t.r#as.fields(), ["lo".to_string(), "hi".to_string()]);

        for malformed in [json!([1, 2]), json!(["lo"]), json!(3)] {
            let err = Transform::parse(&json!({"bin": true, "field": "a", "as": malformed})).unwrap_err();
            assert!(matches!(err, CompileError::InvalidTransform { kind: "bin", .. }), "{err}");
        }
    }
}
