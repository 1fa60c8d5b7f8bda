//! Geographic nodes: projecting coordinates and building GeoJSON features.

use std::collections::BTreeSet;

use serde_json::{Value, json};

use crate::expr::flat_access_name;

/// Projects longitude/latitude pairs to pixel positions.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoPointNode {
    pub projection: String,
    /// `[longitude, latitude]` fields.
    pub fields: [String; 2],
    /// `[x, y]` output names.
    pub r#as: [String; 2],
}

impl GeoPointNode {
    pub fn dependent_fields(&self) -> BTreeSet<String> {
        self.fields.iter().cloned().collect()
    }

    pub fn produced_fields(&self) -> BTreeSet<String> {
        self.r#as.iter().cloned().collect()
    }

    pub fn identity(&self) -> Value {
        json!([self.projection, self.fields, self.r#as])
    }

    pub fn assemble(&self) -> Value {
        json!({
            "type": "geopoint",
            "projection": self.projection,
            "fields": self.fields.iter().map(|f| flat_access_name(f)).collect::<Vec<_>>(),
            "as": self.r#as,
        })
    }
}

/// Builds GeoJSON features from coordinate fields or a GeoJSON field, and
/// publishes them to a signal used to fit the projection.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoJsonNode {
    pub fields: Option<[String; 2]>,
    pub geojson: Option<String>,
    pub signal: String,
}

impl GeoJsonNode {
    pub fn dependent_fields(&self) -> BTreeSet<String> {
        let mut out: BTreeSet<String> = self.fields.iter().flatten().cloned().collect();
        out.extend(self.geojson.iter().cloned());
        out
    }

    pub fn identity(&self) -> Value {
        json!([self.fields, self.geojson, self.signal])
    }

    pub fn assemble(&self) -> Value {
        let mut out = json!({ "type": "geojson" });
        if let Some(fields) = &self.fields {
            out["fields"] = json!(fields.iter().map(|f| flat_access_name(f)).collect::<Vec<_>>());
        }
        if let Some(geojson) = &self.geojson {
            out["geojson"] = json!(flat_access_name(geojson));
        }
        out["signal"] = json!(self.signal);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geopoint() {
        let node = GeoPointNode {
            projection: "projection".into(),
            fields: ["lon".into(), "lat".into()],
            r#as: ["x".into(), "y".into()],
        };
        assert_eq!(
            node.assemble(),
            json!({"type": "geopoint", "projection": "projection", "fields": ["lon", "lat"], "as": ["x", "y"]})
        );
    }

    #[test]
    fn test_geojson_from_coordinates() {
        let node = GeoJsonNode {
            fields: Some(["lon".into(), "lat".into()]),
            geojson: None,
            signal: "geojson_0".into(),
        };
        assert_eq!(
            node.assemble(),
            json!({"type": "geojson", "fields": ["lon", "lat"], "signal": "geojson_0"})
        );
    }
}
