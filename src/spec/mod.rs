//! Typed view of the input visualization spec.

pub mod data;
pub mod encoding;
pub mod predicate;
pub mod transform;

use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::core::CompileContext;
use crate::error::CompileError;
use crate::expr::var_name;

pub use self::data::{Data, DataKind, DataSetting, ParseSetting};
pub use self::encoding::{Encoding, FieldDef, FieldType};
pub use self::predicate::Predicate;
pub use self::transform::Transform;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ResolveMode {
    Shared,
    Independent,
}

/// `resolve` block: component kind (`scale`, `axis`, `legend`) to channel mode.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Resolve {
    pub modes: BTreeMap<String, BTreeMap<String, ResolveMode>>,
}

impl Resolve {
    fn parse(value: Option<&Value>) -> Self {
        let mut modes = BTreeMap::new();
        let Some(Value::Object(map)) = value else {
            return Self { modes };
        };
        for (kind, channels) in map {
            let Some(channels) = channels.as_object() else {
                continue;
            };
            let entry: BTreeMap<String, ResolveMode> = channels
                .iter()
                .filter_map(|(channel, mode)| {
                    let mode = match mode.as_str()? {
                        "independent" => ResolveMode::Independent,
                        "shared" => ResolveMode::Shared,
                        _ => return None,
                    };
                    Some((channel.clone(), mode))
                })
                .collect();
            modes.insert(kind.clone(), entry);
        }
        Self { modes }
    }

    pub fn get(&self, kind: &str, channel: &str) -> Option<ResolveMode> {
        self.modes.get(kind)?.get(channel).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionType {
    Point,
    Interval,
}

/// A top-level or view-level parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub value: Option<Value>,
    pub select: Option<Selection>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub ty: SelectionType,
    pub fields: Vec<String>,
    pub encodings: Vec<String>,
}

impl Param {
    fn parse(value: &Value) -> Result<Self, CompileError> {
        let name = value
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| CompileError::spec("params", "parameter requires a name"))?
            .to_string();

        let select = match value.get("select") {
            None => None,
            Some(select) => {
                let ty_name = match select {
                    Value::String(s) => s.as_str(),
                    other => other.get("type").and_then(Value::as_str).unwrap_or_default(),
                };
                let ty = match ty_name {
                    "point" => SelectionType::Point,
                    "interval" => SelectionType::Interval,
                    other => {
                        return Err(CompileError::spec(
                            format!("params.{name}.select"),
                            format!("unknown selection type \"{other}\""),
                        ));
                    }
                };
                let strings = |key: &str| -> Vec<String> {
                    select
                        .get(key)
                        .and_then(Value::as_array)
                        .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
                        .unwrap_or_default()
                };
                Some(Selection {
                    ty,
                    fields: strings("fields"),
                    encodings: strings("encodings"),
                })
            }
        };

        Ok(Param {
            name,
            value: value.get("value").cloned(),
            select,
        })
    }
}

/// Row/column/wrapped facet mapping.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FacetMapping {
    pub row: Option<FieldDef>,
    pub column: Option<FieldDef>,
    pub facet: Option<FieldDef>,
}

impl FacetMapping {
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &FieldDef)> {
        [("row", &self.row), ("column", &self.column), ("facet", &self.facet)]
            .into_iter()
            .filter_map(|(channel, def)| def.as_ref().map(|def| (channel, def)))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Mark {
    pub ty: String,
    pub props: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SpecKind {
    Unit { mark: Mark, encoding: Encoding },
    Layer(Vec<Spec>),
    Facet { facet: FacetMapping, spec: Box<Spec> },
    /// `concat`, `hconcat`, `vconcat`; repeat specs are expanded into this.
    Concat(Vec<Spec>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spec {
    pub name: Option<String>,
    pub data: DataSetting,
    pub transform: Vec<Transform>,
    pub params: Vec<Param>,
    pub resolve: Resolve,
    pub projection: Option<Value>,
    pub title: Option<Value>,
    pub kind: SpecKind,
}

impl Spec {
    pub fn parse(cx: &mut CompileContext, value: &Value) -> Result<Self, CompileError> {
        Self::parse_at(cx, value, "$")
    }

    fn parse_at(cx: &mut CompileContext, value: &Value, path: &str) -> Result<Self, CompileError> {
        let map = value
            .as_object()
            .ok_or_else(|| CompileError::spec(path, "expected an object"))?;

        let children = |cx: &mut CompileContext, key: &str| -> Result<Vec<Spec>, CompileError> {
            map[key]
                .as_array()
                .ok_or_else(|| CompileError::spec(format!("{path}.{key}"), "expected an array"))?
                .iter()
                .enumerate()
                .map(|(i, child)| Spec::parse_at(cx, child, &format!("{path}.{key}[{i}]")))
                .collect()
        };

        let kind = if map.contains_key("layer") {
            SpecKind::Layer(children(cx, "layer")?)
        } else if map.contains_key("repeat") && map.contains_key("spec") {
            SpecKind::Concat(expand_repeat(cx, map, path)?)
        } else if map.contains_key("facet") && map.contains_key("spec") {
            let facet = parse_facet(cx, &map["facet"])?;
            let spec = Spec::parse_at(cx, &map["spec"], &format!("{path}.spec"))?;
            SpecKind::Facet {
                facet,
                spec: Box::new(spec),
            }
        } else if let Some(key) = ["concat", "hconcat", "vconcat"]
            .into_iter()
            .find(|key| map.contains_key(*key))
        {
            SpecKind::Concat(children(cx, key)?)
        } else if let Some(mark) = map.get("mark") {
            let (ty, props) = match mark {
                Value::String(ty) => (ty.clone(), Map::new()),
                Value::Object(props) => {
                    let ty = props
                        .get("type")
                        .and_then(Value::as_str)
                        .ok_or_else(|| CompileError::spec(format!("{path}.mark"), "mark requires a type"))?;
                    (ty.to_string(), props.clone())
                }
                _ => return Err(CompileError::spec(format!("{path}.mark"), "expected a string or object")),
            };
            let encoding = Encoding::parse(cx, map.get("encoding"))?;
            SpecKind::Unit {
                mark: Mark { ty, props },
                encoding,
            }
        } else {
            return Err(CompileError::spec(
                path,
                "expected one of mark, layer, facet, repeat, concat, hconcat or vconcat",
            ));
        };

        let transform = match map.get("transform") {
            None => Vec::new(),
            Some(Value::Array(items)) => items.iter().map(Transform::parse).collect::<Result<_, _>>()?,
            Some(_) => return Err(CompileError::spec(format!("{path}.transform"), "expected an array")),
        };
        let params = match map.get("params") {
            Some(Value::Array(items)) => items.iter().map(Param::parse).collect::<Result<_, _>>()?,
            _ => Vec::new(),
        };

        Ok(Spec {
            name: map.get("name").and_then(Value::as_str).map(str::to_string),
            data: DataSetting::parse(map.get("data"))?,
            transform,
            params,
            resolve: Resolve::parse(map.get("resolve")),
            projection: map.get("projection").cloned(),
            title: map.get("title").cloned(),
            kind,
        })
    }
}

fn parse_facet(cx: &mut CompileContext, value: &Value) -> Result<FacetMapping, CompileError> {
    let map = value
        .as_object()
        .ok_or_else(|| CompileError::spec("facet", "expected an object"))?;
    if map.contains_key("field") {
        let encoding = Encoding::parse(cx, Some(&serde_json::json!({ "facet": value })))?;
        return Ok(FacetMapping {
            facet: encoding.get("facet").cloned(),
            ..Default::default()
        });
    }
    let encoding = Encoding::parse(cx, Some(value))?;
    Ok(FacetMapping {
        row: encoding.get("row").cloned(),
        column: encoding.get("column").cloned(),
        facet: None,
    })
}

/// Expands `repeat` into one child spec per repeated field (or field pair),
/// replacing `{"repeat": ...}` references with the concrete field.
fn expand_repeat(
    cx: &mut CompileContext,
    map: &Map<String, Value>,
    path: &str,
) -> Result<Vec<Spec>, CompileError> {
    let strings = |value: Option<&Value>| -> Vec<String> {
        value
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
            .unwrap_or_default()
    };

    let combos: Vec<BTreeMap<&str, String>> = match &map["repeat"] {
        Value::Array(_) => strings(Some(&map["repeat"]))
            .into_iter()
            .map(|field| BTreeMap::from([("repeat", field)]))
            .collect(),
        Value::Object(layout) => {
            let rows = strings(layout.get("row"));
            let columns = strings(layout.get("column"));
            let rows: Vec<Option<String>> = if rows.is_empty() {
                vec![None]
            } else {
                rows.into_iter().map(Some).collect()
            };
            let columns: Vec<Option<String>> = if columns.is_empty() {
                vec![None]
            } else {
                columns.into_iter().map(Some).collect()
            };
            let mut combos = Vec::new();
            for row in &rows {
                for column in &columns {
                    let mut combo = BTreeMap::new();
                    if let Some(row) = row {
                        combo.insert("row", row.clone());
                    }
                    if let Some(column) = column {
                        combo.insert("column", column.clone());
                    }
                    combos.push(combo);
                }
            }
            combos
        }
        _ => return Err(CompileError::spec(format!("{path}.repeat"), "expected an array or object")),
    };

    let mut specs = Vec::new();
    for combo in combos {
        let mut child = map["spec"].clone();
        replace_repeat_refs(&mut child, &combo);
        let suffix: String = combo
            .iter()
            .map(|(dir, field)| format!("_{dir}_{}", var_name(field)))
            .collect();
        if let Value::Object(obj) = &mut child {
            obj.entry("name")
                .or_insert_with(|| Value::String(format!("child_{suffix}")));
        }
        specs.push(Spec::parse_at(cx, &child, &format!("{path}.spec"))?);
    }
    Ok(specs)
}

fn replace_repeat_refs(value: &mut Value, combo: &BTreeMap<&str, String>) {
    match value {
        Value::Object(map) => {
            if let Some(Value::Object(reference)) = map.get("field")
                && let Some(dir) = reference.get("repeat").and_then(Value::as_str)
                && let Some(field) = combo.get(dir)
            {
                map.insert("field".into(), Value::String(field.clone()));
            }
            map.values_mut().for_each(|v| replace_repeat_refs(v, combo));
        }
        Value::Array(items) => items.iter_mut().for_each(|v| replace_repeat_refs(v, combo)),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_unrecognized_shape_is_fatal() {
        let mut cx = CompileContext::default();
        let err = Spec::parse(&mut cx, &json!({"data": {"values": []}})).unwrap_err();
        assert!(matches!(err, CompileError::InvalidSpec { .. }));
    }

    #[test]
    fn test_repeat_expands_to_concat() {
        let mut cx = CompileContext::default();
        let spec = Spec::parse(
            &mut cx,
            &json!({
                "repeat": {"column": ["a", "b"]},
                "spec": {
                    "mark": "point",
                    "encoding": {"x": {"field": {"repeat": "column"}, "type": "quantitative"}}
                }
            }),
        )
        .unwrap();

        let SpecKind::Concat(children) = spec.kind else {
            panic!("expected concat");
        };
        assert_eq!(children.len(), 2);
        assert_eq!(children[1].name.as_deref(), Some("child__column_b"));
        let SpecKind::Unit { encoding, .. } = &children[1].kind else {
            panic!("expected unit");
        };
        assert_eq!(encoding.get("x").unwrap().field.as_deref(), Some("b"));
    }

    #[test]
    fn test_selection_params() {
        let mut cx = CompileContext::default();
        let spec = Spec::parse(
            &mut cx,
            &json!({"mark": "point", "params": [{"name": "p", "select": {"type": "point", "fields": ["a"]}}]}),
        )
        .unwrap();
        let select = spec.params[0].select.as_ref().unwrap();
        assert_eq!(select.ty, SelectionType::Point);
        assert_eq!(select.fields, vec!["a"]);
    }
}
