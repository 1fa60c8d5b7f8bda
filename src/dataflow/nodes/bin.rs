use std::collections::{BTreeMap, BTreeSet};

use serde_json::{Value, json};

use crate::core::Renames;
use crate::expr::{flat_access_name, quote};
use crate::spec::encoding::{BinParams, bin_to_string};

/// One binning of one field, possibly exposed under several output names.
#[derive(Debug, Clone, PartialEq)]
pub struct BinComponent {
    pub bin: BinParams,
    pub field: String,
    /// `[start, end]` output pairs; the first is computed by the bin transform
    /// and the rest are copies.
    pub r#as: Vec<[String; 2]>,
    pub signal: String,
    pub extent_signal: String,
    /// Human readable range label, as `(expr, as)`.
    pub range: Option<(String, String)>,
}

/// Bins keyed by `bin_<params>_<field>`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BinNode {
    pub bins: BTreeMap<String, BinComponent>,
}

/// Key identifying a binning of a field, independent of the output names.
pub fn bin_key(bin: &BinParams, field: &str) -> String {
    format!("{}_{field}", bin_to_string(bin))
}

impl BinComponent {
    /// `prefix` is the owning model's name prefix for the generated signals.
    pub fn new(bin: BinParams, field: &str, r#as: [String; 2], prefix: &str) -> (String, Self) {
        let key = bin_key(&bin, field);
        let component = Self {
            bin,
            field: field.to_string(),
            r#as: vec![r#as],
            signal: format!("{prefix}{key}_bins"),
            extent_signal: format!("{prefix}{key}_extent"),
            range: None,
        };
        (key, component)
    }

    /// Adds a `start - end` label formula, e.g. for discrete legends.
    pub fn with_range(mut self, r#as: String) -> Self {
        let [start, end] = &self.r#as[0];
        let (s, e) = (format!("datum[{}]", quote(start)), format!("datum[{}]", quote(end)));
        let expr = format!(
            "{s} === null || isNaN({s}) ? \"null\" : format({s}, \"\") + \" \u{2013} \" + format({e}, \"\")"
        );
        self.range = Some((expr, r#as));
        self
    }
}

impl BinNode {
    pub fn single(key: String, component: BinComponent) -> Self {
        Self {
            bins: BTreeMap::from([(key, component)]),
        }
    }

    /// Merges `other` into this node. Bins with the same key keep this node's
    /// signals and the other node's signals are renamed to them.
    pub fn merge(&mut self, other: BinNode, renames: &mut Renames) {
        for (key, theirs) in other.bins {
            match self.bins.get_mut(&key) {
                Some(ours) => {
                    renames.rename(&theirs.signal, &ours.signal);
                    renames.rename(&theirs.extent_signal, &ours.extent_signal);
                    for pair in theirs.r#as {
                        if !ours.r#as.contains(&pair) {
                            ours.r#as.push(pair);
                        }
                    }
                    if ours.range.is_none() {
                        ours.range = theirs.range;
                    }
                }
                None => {
                    self.bins.insert(key, theirs);
                }
            }
        }
    }

    pub fn dependent_fields(&self) -> BTreeSet<String> {
        self.bins.values().map(|b| b.field.clone()).collect()
    }

    pub fn produced_fields(&self) -> BTreeSet<String> {
        let mut out = BTreeSet::new();
        for bin in self.bins.values() {
            for [start, end] in &bin.r#as {
                out.insert(start.clone());
                out.insert(end.clone());
            }
            if let Some((_, r#as)) = &bin.range {
                out.insert(r#as.clone());
            }
        }
        out
    }

    /// Signal names are part of the identity; bins owned by different views
    /// only become one through [`BinNode::merge`], which records the renames.
    pub fn identity(&self) -> Value {
        let bins: BTreeMap<&String, Value> = self
            .bins
            .iter()
            .map(|(key, b)| {
                (
                    key,
                    json!({
                        "bin": b.bin,
                        "field": b.field,
                        "as": b.r#as,
                        "signal": b.signal,
                        "extent": b.extent_signal,
                        "range": b.range,
                    }),
                )
            })
            .collect();
        json!(bins)
    }

    pub fn assemble(&self, renames: &Renames) -> Vec<Value> {
        let mut out = Vec::new();
        for bin in self.bins.values() {
            let field = flat_access_name(&bin.field);
            let signal = renames.resolve(&bin.signal);
            let extent_signal = renames.resolve(&bin.extent_signal);
            let [start, end] = &bin.r#as[0];

            let mut transform = json!({
                "type": "bin",
                "field": field,
                "as": [start, end],
                "signal": signal,
            });
            for (key, value) in &bin.bin {
                transform[key] = value.clone();
            }
            if !bin.bin.contains_key("extent") {
                out.push(json!({ "type": "extent", "field": field, "signal": extent_signal }));
                transform["extent"] = json!({ "signal": extent_signal });
            }
            out.push(transform);

            for pair in &bin.r#as[1..] {
                for (from, to) in [(start, &pair[0]), (end, &pair[1])] {
                    out.push(json!({
                        "type": "formula",
                        "expr": format!("datum[{}]", quote(from)),
                        "as": to,
                    }));
                }
            }
            if let Some((expr, r#as)) = &bin.range {
                out.push(json!({ "type": "formula", "expr": expr, "as": r#as }));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn bin_node(field: &str, r#as: &str, prefix: &str) -> BinNode {
        let params = BinParams::from([("maxbins".to_string(), json!(10))]);
        let (key, component) =
            BinComponent::new(params, field, [r#as.to_string(), format!("{as}_end")], prefix);
        BinNode::single(key, component)
    }

    #[test]
    fn test_assemble() {
        let node = bin_node("x", "bin_maxbins_10_x", "");
        assert_eq!(
            node.assemble(&Renames::default()),
            vec![
                json!({"type": "extent", "field": "x", "signal": "bin_maxbins_10_x_extent"}),
                json!({
                    "type": "bin",
                    "field": "x",
                    "as": ["bin_maxbins_10_x", "bin_maxbins_10_x_end"],
                    "signal": "bin_maxbins_10_x_bins",
                    "maxbins": 10,
                    "extent": {"signal": "bin_maxbins_10_x_extent"}
                }),
            ]
        );
    }

    #[test]
    fn test_merge_renames_signals_and_unions_fields() {
        let mut renames = Renames::default();
        let mut a = bin_node("x", "bin_maxbins_10_x", "layer_0_");
        let b = bin_node("x", "bx", "layer_1_");
        let expected: BTreeSet<String> = a.produced_fields().union(&b.produced_fields()).cloned().collect();

        a.merge(b, &mut renames);
        assert_eq!(a.bins.len(), 1);
        assert_eq!(a.produced_fields(), expected);
        assert_eq!(
            renames.resolve("layer_1_bin_maxbins_10_x_bins"),
            "layer_0_bin_maxbins_10_x_bins"
        );

        let transforms = a.assemble(&renames);
        assert_eq!(transforms.len(), 4);
        assert_eq!(transforms[2]["as"], "bx");
    }
}
