//! Small helpers around the expression strings and field access paths that
//! appear in transforms.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;

static DATUM_ACCESS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"datum\.([A-Za-z_$][\w$]*)|datum\[\s*["']([^"']*)["']\s*\]"#)
        .expect("datum access pattern is a valid regex")
});

/// Fields read by an expression through `datum.f` or `datum["f"]`.
pub fn fields_in_expr(expr: &str) -> BTreeSet<String> {
    DATUM_ACCESS
        .captures_iter(expr)
        .filter_map(|caps| caps.get(1).or_else(|| caps.get(2)))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Splits a field access path on unescaped dots and brackets.
///
/// `a.b` is nested, `a\.b` is a flat field containing a dot.
pub fn split_access_path(path: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut chars = path.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => {
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '.' => parts.push(std::mem::take(&mut current)),
            '[' => {
                if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
                for inner in chars.by_ref() {
                    if inner == ']' {
                        break;
                    }
                    if inner != '"' && inner != '\'' {
                        current.push(inner);
                    }
                }
                parts.push(std::mem::take(&mut current));
                if chars.peek() == Some(&'.') {
                    chars.next();
                }
            }
            _ => current.push(c),
        }
    }
    if !current.is_empty() || parts.is_empty() {
        parts.push(current);
    }
    parts
}

pub fn is_nested(path: &str) -> bool {
    split_access_path(path).len() > 1
}

/// Flat name of a nested path: `a.b` becomes `a.b` with the dots escaped.
pub fn flat_access_name(path: &str) -> String {
    split_access_path(path)
        .iter()
        .map(|p| p.replace('.', "\\."))
        .collect::<Vec<_>>()
        .join("\\.")
}

/// Expression accessing a path on `datum`, e.g. `datum["a"]["b"]`.
pub fn datum_accessor(path: &str) -> String {
    let mut out = String::from("datum");
    for part in split_access_path(path) {
        out.push_str(&format!("[{}]", quote(&part)));
    }
    out
}

/// Field name with the path syntax stripped, usable as a flat key.
pub fn unescape(field: &str) -> String {
    field.replace("\\.", ".")
}

/// JSON string literal, valid in the expression language too.
pub fn quote(text: &str) -> String {
    serde_json::Value::String(text.to_string()).to_string()
}

/// Replaces characters that are not allowed in dataset and signal names.
pub fn var_name(text: &str) -> String {
    let mut out: String = text
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    if out.starts_with(|c: char| c.is_ascii_digit()) {
        out.insert(0, '_');
    }
    out
}
