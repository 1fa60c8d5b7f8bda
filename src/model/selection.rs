//! Selection parameters: which fields they project, whether rows need stable
//! identifiers, and the declarative store datasets and signals.

use serde_json::{Value, json};

pub use crate::dataflow::nodes::SELECTION_ID;
use crate::expr::{quote, var_name};
use crate::model::{Model, ModelKind};
use crate::spec::{Param, SelectionType};
use crate::spec::encoding::Suffix;

pub const STORE: &str = "_store";

#[derive(Debug, Clone, PartialEq)]
pub struct SelectionComponent {
    pub name: String,
    pub ty: SelectionType,
    /// Projected fields; [`SELECTION_ID`] when a point selection projects
    /// nothing.
    pub project: Vec<String>,
    pub init: Option<Value>,
}

impl SelectionComponent {
    pub fn store(&self) -> String {
        format!("{}{STORE}", self.name)
    }

    pub fn requires_id(&self) -> bool {
        self.project.iter().any(|p| p == SELECTION_ID)
    }
}

/// Attaches every selection parameter to the unit views it applies to. A
/// selection declared on a composition applies to all units below it.
pub fn parse_selections(model: &mut Model) {
    parse_with_inherited(model, &[]);
}

fn parse_with_inherited(model: &mut Model, inherited: &[Param]) {
    let mut params: Vec<Param> = inherited.to_vec();
    params.extend(model.params.iter().filter(|p| p.select.is_some()).cloned());

    if let ModelKind::Unit(unit) = &model.kind {
        let mut out = Vec::new();
        for param in &params {
            let Some(select) = &param.select else {
                continue;
            };
            let mut project: Vec<String> = select.fields.clone();
            let encodings: Vec<String> = match (select.ty, select.fields.is_empty(), select.encodings.is_empty()) {
                (SelectionType::Interval, true, true) => vec!["x".into(), "y".into()],
                _ => select.encodings.clone(),
            };
            for channel in &encodings {
                if let Some(def) = unit.encoding.get(channel) {
                    let field = def.vg_field(Suffix::None);
                    if !project.contains(&field) {
                        project.push(field);
                    }
                }
            }
            if project.is_empty() && select.ty == SelectionType::Point {
                project.push(SELECTION_ID.to_string());
            }
            out.push(SelectionComponent {
                name: var_name(&param.name),
                ty: select.ty,
                project,
                init: param.value.clone(),
            });
        }
        model.component.selections = out;
        return;
    }

    for child in model.children_mut() {
        parse_with_inherited(child, &params);
    }
}

/// Whether any view has a point selection over row identities.
pub fn requires_selection_id(model: &Model) -> bool {
    let mut out = false;
    model.walk(&mut |m| {
        out |= m.component.selections.iter().any(SelectionComponent::requires_id);
    });
    out
}

pub fn find<'a>(model: &'a Model, name: &str) -> Option<&'a SelectionComponent> {
    let mut found = None;
    model.walk(&mut |m| {
        if found.is_none() {
            found = m.component.selections.iter().find(|s| s.name == name);
        }
    });
    found
}

/// Store datasets, one per selection name.
pub fn assemble_stores(model: &Model) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::new();
    model.walk(&mut |m| {
        for selection in &m.component.selections {
            let name = selection.store();
            if out.iter().any(|d| d["name"] == name) {
                continue;
            }
            let mut data = json!({ "name": name });
            if let Some(init) = &selection.init {
                let values = match init {
                    Value::Array(items) => items.clone(),
                    other => vec![other.clone()],
                };
                data["values"] = json!(values.into_iter().map(|v| json!({"unit": "", "values": v})).collect::<Vec<_>>());
            }
            out.push(data);
        }
    });
    out
}

/// Top-level signals resolving each store into a selection value.
pub fn assemble_signals(model: &Model) -> Vec<Value> {
    let mut out: Vec<Value> = Vec::new();
    model.walk(&mut |m| {
        for selection in &m.component.selections {
            if out.iter().any(|s| s["name"] == selection.name) {
                continue;
            }
            out.push(json!({
                "name": selection.name,
                "update": format!("vlSelectionResolve({}, \"union\")", quote(&selection.store())),
            }));
        }
    });
    out
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::core::CompileContext;
    use crate::spec::Spec;

    fn model(value: Value) -> Model {
        let mut cx = CompileContext::default();
        let spec = Spec::parse(&mut cx, &value).unwrap();
        let mut model = Model::build(&mut cx, spec).unwrap();
        parse_selections(&mut model);
        model
    }

    #[test]
    fn test_point_selection_without_projection_needs_ids() {
        let m = model(json!({
            "params": [{"name": "pick", "select": "point"}],
            "mark": "point",
            "encoding": {"x": {"field": "a", "type": "quantitative"}}
        }));
        assert_eq!(m.component.selections[0].project, vec![SELECTION_ID.to_string()]);
        assert!(requires_selection_id(&m));
        assert_eq!(assemble_stores(&m), vec![json!({"name": "pick_store"})]);
        assert_eq!(
            assemble_signals(&m),
            vec![json!({"name": "pick", "update": "vlSelectionResolve(\"pick_store\", \"union\")"})]
        );
    }

    #[test]
    fn test_layer_selection_applies_to_units() {
        let m = model(json!({
            "params": [{"name": "brush", "select": {"type": "interval", "encodings": ["x"]}}],
            "layer": [
                {"mark": "point", "encoding": {"x": {"field": "a", "type": "quantitative"}}},
                {"mark": "rule", "encoding": {"x": {"field": "b", "type": "quantitative"}}}
            ]
        }));
        assert!(!requires_selection_id(&m));
        assert_eq!(m.children()[1].component.selections[0].project, vec!["b".to_string()]);
        assert_eq!(assemble_stores(&m).len(), 1);
        assert!(find(&m, "brush").is_some());
    }
}
