use std::collections::BTreeMap;

use serde_json::{Value, json};

use crate::core::CompileContext;

/// A value together with the flag telling whether the user wrote it.
#[derive(Debug, Clone, PartialEq)]
pub struct Explicit<T> {
    pub value: T,
    pub explicit: bool,
}

impl<T> Explicit<T> {
    pub fn explicit(value: T) -> Self {
        Self {
            value,
            explicit: true,
        }
    }

    pub fn implicit(value: T) -> Self {
        Self {
            value,
            explicit: false,
        }
    }
}

/// Two buckets of properties: those the user specified and those the compiler
/// inferred. Reads prefer the explicit bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct Split<T> {
    pub explicit: BTreeMap<String, T>,
    pub implicit: BTreeMap<String, T>,
}

impl<T> Default for Split<T> {
    fn default() -> Self {
        Self {
            explicit: BTreeMap::new(),
            implicit: BTreeMap::new(),
        }
    }
}

impl<T: Clone> Split<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&T> {
        self.explicit.get(key).or_else(|| self.implicit.get(key))
    }

    pub fn get_with_explicit(&self, key: &str) -> Option<Explicit<T>> {
        if let Some(value) = self.explicit.get(key) {
            return Some(Explicit::explicit(value.clone()));
        }
        self.implicit
            .get(key)
            .map(|value| Explicit::implicit(value.clone()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.explicit.contains_key(key) || self.implicit.contains_key(key)
    }

    /// Stores a value in one bucket and evicts the key from the other one.
    pub fn set(&mut self, key: impl Into<String>, value: T, explicit: bool) {
        let key = key.into();
        if explicit {
            self.implicit.remove(&key);
            self.explicit.insert(key, value);
        } else {
            self.explicit.remove(&key);
            self.implicit.insert(key, value);
        }
    }

    pub fn set_with_explicit(&mut self, key: impl Into<String>, value: Explicit<T>) {
        self.set(key, value.value, value.explicit);
    }

    /// Sets an implicit value unless anything is already present.
    pub fn set_if_absent(&mut self, key: impl Into<String>, value: T) {
        let key = key.into();
        if !self.contains(&key) {
            self.implicit.insert(key, value);
        }
    }

    pub fn remove(&mut self, key: &str) {
        self.explicit.remove(key);
        self.implicit.remove(key);
    }

    /// Every key once, explicit entries first in key order.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.explicit.keys().cloned().collect();
        keys.extend(
            self.implicit
                .keys()
                .filter(|k| !self.explicit.contains_key(*k))
                .cloned(),
        );
        keys
    }

    /// Flattened view with explicit values shadowing implicit ones.
    pub fn combine(&self) -> BTreeMap<String, T> {
        let mut out = self.implicit.clone();
        out.extend(self.explicit.iter().map(|(k, v)| (k.clone(), v.clone())));
        out
    }

    pub fn is_empty(&self) -> bool {
        self.explicit.is_empty() && self.implicit.is_empty()
    }
}

/// Property-specific conflict resolution between two values of equal standing.
pub type TieBreaker<'a, T> = &'a dyn Fn(&Explicit<T>, &Explicit<T>) -> Explicit<T>;

/// Merges two candidate values for `property` of `property_of`.
///
/// An absent side yields the other one. An explicit value beats an implicit
/// one. Deep-equal values keep the first. Anything else goes to the
/// tie-breaker; without one the first value is kept, with a warning when both
/// were written by the user.
pub fn merge_values_with_explicit<T: Clone + PartialEq>(
    cx: &mut CompileContext,
    v1: Option<Explicit<T>>,
    v2: Option<Explicit<T>>,
    property: &str,
    property_of: &str,
    tie_breaker: Option<TieBreaker<'_, T>>,
) -> Option<Explicit<T>> {
    let (v1, v2) = match (v1, v2) {
        (None, other) | (other, None) => return other,
        (Some(v1), Some(v2)) => (v1, v2),
    };

    if v1.explicit && !v2.explicit {
        return Some(v1);
    }
    if v2.explicit && !v1.explicit {
        return Some(v2);
    }
    if v1.value == v2.value {
        return Some(v1);
    }

    match tie_breaker {
        Some(tie_breaker) => Some(tie_breaker(&v1, &v2)),
        None => Some(default_tie_breaker(cx, v1, v2, property, property_of)),
    }
}

fn default_tie_breaker<T>(
    cx: &mut CompileContext,
    v1: Explicit<T>,
    v2: Explicit<T>,
    property: &str,
    property_of: &str,
) -> Explicit<T> {
    if v1.explicit && v2.explicit {
        cx.warn(format!(
            "Conflicting {property_of} property \"{property}\"; keeping the first value."
        ));
    }
    v1
}

/// Order-preserving union of two domains. Data-reference domains are collected
/// into a `fields` list; literal arrays are concatenated without duplicates.
pub fn union_domains(v1: &Explicit<Value>, v2: &Explicit<Value>) -> Explicit<Value> {
    let value = match (&v1.value, &v2.value) {
        (Value::Array(a), Value::Array(b)) => {
            let mut out = a.clone();
            for item in b {
                if !out.contains(item) {
                    out.push(item.clone());
                }
            }
            Value::Array(out)
        }
        (a, b) => {
            let mut refs = Vec::new();
            for domain in [a, b] {
                match domain.get("fields").and_then(Value::as_array) {
                    Some(fields) => refs.extend(fields.iter().cloned()),
                    None => refs.push(domain.clone()),
                }
            }
            let mut unique: Vec<Value> = Vec::new();
            for r in refs {
                if !unique.contains(&r) {
                    unique.push(r);
                }
            }
            if unique.len() == 1 {
                unique.remove(0)
            } else {
                let sort = a.get("sort").or_else(|| b.get("sort")).cloned();
                let mut domain = json!({ "fields": unique });
                if let Some(sort) = sort {
                    domain["sort"] = sort;
                }
                domain
            }
        }
    };
    Explicit {
        value,
        explicit: v1.explicit || v2.explicit,
    }
}

/// Keeps the range with the larger band step.
pub fn larger_step(v1: &Explicit<Value>, v2: &Explicit<Value>) -> Explicit<Value> {
    let step = |v: &Value| v.get("step").and_then(Value::as_f64);
    match (step(&v1.value), step(&v2.value)) {
        (Some(a), Some(b)) if b > a => v2.clone(),
        (None, Some(_)) => v2.clone(),
        _ => v1.clone(),
    }
}

/// Joins two titles with ", ", skipping one that is already contained.
pub fn merge_titles(v1: &Explicit<Value>, v2: &Explicit<Value>) -> Explicit<Value> {
    let text = |v: &Value| match v {
        Value::String(s) => s.clone(),
        Value::Array(parts) => parts
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(", "),
        other => other.to_string(),
    };
    let (a, b) = (text(&v1.value), text(&v2.value));
    let value = if a.is_empty() || a == b {
        b
    } else if b.is_empty() || a.split(", ").any(|part| part == b) {
        a
    } else {
        format!("{a}, {b}")
    };
    Explicit {
        value: Value::String(value),
        explicit: v1.explicit,
    }
}

/// Prefers a filled circle legend symbol over stroke-like ones.
pub fn prefer_circle(v1: &Explicit<Value>, v2: &Explicit<Value>) -> Explicit<Value> {
    if v2.value == "circle" {
        v2.clone()
    } else {
        v1.clone()
    }
}

/// Keeps whichever value is defined, the first one when both are.
pub fn first_defined(v1: &Explicit<Value>, v2: &Explicit<Value>) -> Explicit<Value> {
    if v1.value.is_null() {
        v2.clone()
    } else {
        v1.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn merge(
        v1: Explicit<Value>,
        v2: Explicit<Value>,
        tie: Option<TieBreaker<'_, Value>>,
    ) -> (Explicit<Value>, CompileContext) {
        let mut cx = CompileContext::default();
        let out = merge_values_with_explicit(&mut cx, Some(v1), Some(v2), "scale", "domain", tie);
        (out.unwrap(), cx)
    }

    #[test]
    fn test_get_prefers_explicit() {
        let mut split = Split::new();
        split.set_if_absent("type", json!("linear"));
        split.explicit.insert("type".into(), json!("log"));
        assert_eq!(split.get("type"), Some(&json!("log")));

        split.set("type", json!("sqrt"), false);
        assert_eq!(split.get("type"), Some(&json!("sqrt")));
        assert!(split.explicit.is_empty());
    }

    #[test]
    fn test_explicit_precedence_law() {
        let candidates = [json!(1), json!("a"), json!([1, 2]), json!({"step": 3})];
        for x in &candidates {
            for y in &candidates {
                let (out, _) = merge(Explicit::explicit(x.clone()), Explicit::implicit(y.clone()), None);
                assert_eq!(&out.value, x);
                let (out, _) = merge(Explicit::implicit(y.clone()), Explicit::explicit(x.clone()), None);
                assert_eq!(&out.value, x);
            }
        }
    }

    #[test]
    fn test_absent_side() {
        let mut cx = CompileContext::default();
        let out = merge_values_with_explicit(&mut cx, None, Some(Explicit::implicit(json!(2))), "a", "b", None);
        assert_eq!(out, Some(Explicit::implicit(json!(2))));
    }

    #[test]
    fn test_default_tie_breaker_warns_on_explicit_conflict() {
        let (out, cx) = merge(Explicit::explicit(json!("a")), Explicit::explicit(json!("b")), None);
        assert_eq!(out.value, json!("a"));
        assert!(cx.diagnostics().has_warnings());

        let (out, cx) = merge(Explicit::implicit(json!("a")), Explicit::implicit(json!("b")), None);
        assert_eq!(out.value, json!("a"));
        assert!(!cx.diagnostics().has_warnings());
    }

    #[test]
    fn test_domain_union() {
        let (out, _) = merge(
            Explicit::implicit(json!([1, 2])),
            Explicit::implicit(json!([2, 3])),
            Some(&union_domains),
        );
        assert_eq!(out.value, json!([1, 2, 3]));

        let (out, _) = merge(
            Explicit::implicit(json!({"data": "a", "field": "x"})),
            Explicit::implicit(json!({"data": "b", "field": "x"})),
            Some(&union_domains),
        );
        assert_eq!(
            out.value,
            json!({"fields": [{"data": "a", "field": "x"}, {"data": "b", "field": "x"}]})
        );
    }

    #[test]
    fn test_tie_breakers() {
        let (out, _) = merge(
            Explicit::implicit(json!({"step": 20})),
            Explicit::implicit(json!({"step": 30})),
            Some(&larger_step),
        );
        assert_eq!(out.value, json!({"step": 30}));

        let (out, _) = merge(Explicit::implicit(json!("a")), Explicit::implicit(json!("b")), Some(&merge_titles));
        assert_eq!(out.value, json!("a, b"));

        let (out, _) = merge(
            Explicit::implicit(json!("stroke")),
            Explicit::implicit(json!("circle")),
            Some(&prefer_circle),
        );
        assert_eq!(out.value, json!("circle"));

        let (out, _) = merge(Explicit::implicit(Value::Null), Explicit::implicit(json!("left")), Some(&first_defined));
        assert_eq!(out.value, json!("left"));
    }
}
