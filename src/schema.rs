//! Drill-log entities and validation of raw model output.
//!
//! The VLM is asked twice per page for JSON conforming to one of two
//! schemas ([`SchemaKind::Soil`], [`SchemaKind::Sample`]). Nothing guarantees
//! the answer actually conforms, so every payload passes through
//! [`parse_fragment`] at the driver boundary. A payload that would break
//! reconciliation later (no `metadata` object, no hole number, a sample
//! without a depth) is rejected here and becomes a
//! [`crate::error::PageError::Malformed`] instead.
//!
//! Scalar fields are read leniently: models routinely answer `"5.0m"` where a
//! number was requested, or `null` for an empty table cell.

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use tracing::warn;

/// Metadata keys that carry the borehole identifier, in lookup order.
const HOLE_NO_KEYS: [&str; 4] = ["HOLE_NO", "HOLE NO.", "HOLE_NO.", "hole_no"];

/// Which of the two per-page extraction schemas a call uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaKind {
    /// Metadata + soil layers (`soil_data`).
    Soil,
    /// Metadata + sample records (`sample_data`).
    Sample,
}

impl SchemaKind {
    /// JSON key of the item array for this kind.
    pub fn items_key(self) -> &'static str {
        match self {
            SchemaKind::Soil => "soil_data",
            SchemaKind::Sample => "sample_data",
        }
    }

    /// JSON schema sent to the model for this kind.
    pub fn json_schema(self) -> Value {
        let schema = match self {
            SchemaKind::Soil => schemars::schema_for!(SoilPageSchema),
            SchemaKind::Sample => schemars::schema_for!(SamplePageSchema),
        };
        serde_json::to_value(&schema).unwrap_or_default()
    }
}

impl fmt::Display for SchemaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaKind::Soil => f.write_str("soil"),
            SchemaKind::Sample => f.write_str("sample"),
        }
    }
}

// ── Entities ─────────────────────────────────────────────────────────────

/// One depth-bounded segment of a borehole's stratigraphy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoilLayer {
    /// Raw range text as read from the log, e.g. `"0.0~5.0m"`. A blank cell
    /// reads as `""` and is reported at reconciliation.
    #[serde(default, deserialize_with = "lenient::text")]
    pub depth_range: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub soil_name: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub soil_color: String,
    #[serde(default, deserialize_with = "lenient::text")]
    pub observation: String,
}

/// A physical sample taken at one depth.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    /// Expected as `<letter><integer>`, e.g. `S1`.
    #[serde(
        rename = "Sample_number",
        alias = "sample_number",
        alias = "Sample_Number",
        deserialize_with = "lenient::required_text"
    )]
    pub sample_number: String,
    /// Collection depth in meters.
    #[serde(rename = "Depth", alias = "depth", deserialize_with = "lenient::depth")]
    pub depth: f64,
    /// Blow count fraction such as `"10/30"`, kept verbatim.
    #[serde(rename = "Hits", alias = "hits", default, deserialize_with = "lenient::text")]
    pub hits: String,
    #[serde(rename = "Method", alias = "method", default, deserialize_with = "lenient::text")]
    pub method: String,
}

/// Key → scalar metadata snapshot as reported by the model.
///
/// Keys are kept verbatim (`"HOLE_NO"`, `"PROJECT_NAME"`, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Metadata(BTreeMap<String, Value>);

impl Metadata {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// String value for `key`, if present and a string.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(Value::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for Metadata {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        Metadata(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

/// One schema-kind extraction result from one page, pre-reconciliation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageExtraction<T> {
    /// 1-indexed page number within the source document.
    pub page_num: usize,
    /// Borehole identifier exactly as reported by the model.
    pub hole_no: String,
    pub metadata: Metadata,
    pub items: Vec<T>,
}

pub type SoilFragment = PageExtraction<SoilLayer>;
pub type SampleFragment = PageExtraction<SampleRecord>;

/// Item types that can appear in a fragment, tied to their schema kind.
pub trait FragmentItem: DeserializeOwned + Clone + Send + Sync + 'static {
    const KIND: SchemaKind;
}

impl FragmentItem for SoilLayer {
    const KIND: SchemaKind = SchemaKind::Soil;
}

impl FragmentItem for SampleRecord {
    const KIND: SchemaKind = SchemaKind::Sample;
}

// ── Boundary validation ──────────────────────────────────────────────────

/// Validate a raw model payload and turn it into a typed fragment.
///
/// Returns a human-readable reason on shape mismatch.
pub fn parse_fragment<T: FragmentItem>(
    page_num: usize,
    json: &Value,
) -> Result<PageExtraction<T>, String> {
    let root = json
        .as_object()
        .ok_or_else(|| format!("expected a JSON object, got {}", value_kind(json)))?;

    let raw_meta = root
        .get("metadata")
        .and_then(Value::as_object)
        .ok_or_else(|| "missing `metadata` object".to_string())?;

    let hole_no = HOLE_NO_KEYS
        .iter()
        .find_map(|key| raw_meta.get(*key).and_then(identifier_text))
        .ok_or_else(|| "metadata has no usable HOLE_NO".to_string())?;

    let metadata = raw_meta
        .iter()
        .filter_map(|(key, value)| {
            if is_scalar(value) {
                Some((key.clone(), value.clone()))
            } else {
                warn!(
                    "Page {}: dropping non-scalar metadata field '{}'",
                    page_num, key
                );
                None
            }
        })
        .collect();

    let key = T::KIND.items_key();
    let raw_items = root
        .get(key)
        .and_then(Value::as_array)
        .ok_or_else(|| format!("missing `{key}` array"))?;

    let items = raw_items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            serde_json::from_value::<T>(item.clone()).map_err(|e| format!("{key}[{i}]: {e}"))
        })
        .collect::<Result<Vec<T>, String>>()?;

    Ok(PageExtraction {
        page_num,
        hole_no,
        metadata,
        items,
    })
}

fn identifier_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Array(_) | Value::Object(_))
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

mod lenient {
    use serde::de::{Deserializer, Error};
    use serde::Deserialize;
    use serde_json::Value;

    /// Any scalar as text; `null` becomes the empty string.
    pub fn text<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        match Value::deserialize(d)? {
            Value::Null => Ok(String::new()),
            Value::String(s) => Ok(s),
            Value::Number(n) => Ok(n.to_string()),
            Value::Bool(b) => Ok(b.to_string()),
            other => Err(D::Error::custom(format!("expected text, got {other}"))),
        }
    }

    /// Like [`text`] but rejects null and blank values.
    pub fn required_text<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
        let s = text(d)?;
        if s.trim().is_empty() {
            return Err(D::Error::custom("value must not be empty"));
        }
        Ok(s)
    }

    /// A depth in meters: `5.0`, `"5.0"`, `"5.0m"`, `"5.0 m"`.
    pub fn depth<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        let v = match Value::deserialize(d)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s
                .trim()
                .trim_end_matches(['m', 'M'])
                .trim()
                .parse::<f64>()
                .ok(),
            _ => None,
        };
        match v {
            Some(x) if x.is_finite() => Ok(x),
            _ => Err(D::Error::custom("depth must be a number of meters")),
        }
    }
}

// ── Prompt-facing schema ─────────────────────────────────────────────────

/// Metadata block requested from the model.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct MetadataSchema {
    #[serde(rename = "PROJECT_NAME")]
    pub project_name: String,
    #[serde(rename = "HOLE_NO")]
    pub hole_no: String,
    #[serde(rename = "Excavation_level")]
    pub excavation_level: f64,
    #[serde(rename = "LOCATION")]
    pub location: String,
    #[serde(rename = "GROUND_WATER_LEVEL")]
    pub ground_water_level: Option<f64>,
    #[serde(rename = "DATE")]
    pub date: String,
    #[serde(rename = "DRILLER")]
    pub driller: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SoilSchema {
    pub depth_range: String,
    pub soil_name: String,
    pub soil_color: String,
    pub observation: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SampleSchema {
    #[serde(rename = "Sample_number")]
    pub sample_number: String,
    #[serde(rename = "Depth")]
    pub depth: f64,
    #[serde(rename = "Hits")]
    pub hits: String,
    #[serde(rename = "Method")]
    pub method: String,
}

/// Soil-pass response shape.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SoilPageSchema {
    pub metadata: MetadataSchema,
    pub soil_data: Vec<SoilSchema>,
}

/// Sample-pass response shape.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SamplePageSchema {
    pub metadata: MetadataSchema,
    pub sample_data: Vec<SampleSchema>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_well_formed_soil_fragment() {
        let payload = json!({
            "metadata": { "HOLE_NO": "BH-1", "PROJECT_NAME": "Harbor", "Excavation_level": 3.65 },
            "soil_data": [
                { "depth_range": "0.0~5.0m", "soil_name": "clay", "soil_color": "grey", "observation": "soft" }
            ]
        });
        let frag = parse_fragment::<SoilLayer>(2, &payload).expect("valid");
        assert_eq!(frag.page_num, 2);
        assert_eq!(frag.hole_no, "BH-1");
        assert_eq!(frag.metadata.get_str("PROJECT_NAME"), Some("Harbor"));
        assert_eq!(frag.items.len(), 1);
        assert_eq!(frag.items[0].soil_name, "clay");
    }

    #[test]
    fn sample_fields_are_read_leniently() {
        let payload = json!({
            "metadata": { "HOLE NO.": "BH-2" },
            "sample_data": [
                { "sample_number": "S1", "Depth": "5.0m", "Hits": "10/30", "Method": null },
                { "Sample_number": "S2", "Depth": 7, "Hits": 12 }
            ]
        });
        let frag = parse_fragment::<SampleRecord>(1, &payload).expect("valid");
        assert_eq!(frag.hole_no, "BH-2");
        assert_eq!(frag.items[0].depth, 5.0);
        assert_eq!(frag.items[0].method, "");
        assert_eq!(frag.items[1].depth, 7.0);
        assert_eq!(frag.items[1].hits, "12");
    }

    #[test]
    fn numeric_hole_number_is_rendered_as_text() {
        let payload = json!({ "metadata": { "HOLE_NO": 4 }, "soil_data": [] });
        let frag = parse_fragment::<SoilLayer>(1, &payload).expect("valid");
        assert_eq!(frag.hole_no, "4");
    }

    #[test]
    fn hole_number_is_not_normalised() {
        let payload = json!({ "metadata": { "HOLE_NO": " bh-1 " }, "soil_data": [] });
        let frag = parse_fragment::<SoilLayer>(1, &payload).expect("valid");
        assert_eq!(frag.hole_no, " bh-1 ");
    }

    #[test]
    fn blank_depth_range_keeps_the_fragment() {
        let payload = json!({
            "metadata": { "HOLE_NO": "BH-1" },
            "soil_data": [
                { "depth_range": "0.0~5.0m", "soil_name": "clay" },
                { "depth_range": "", "soil_name": "silt" },
                { "depth_range": null, "soil_name": "sand" },
                { "soil_name": "gravel" },
                { "depth_range": "5.0~10.0m", "soil_name": "rock" }
            ]
        });
        let frag = parse_fragment::<SoilLayer>(1, &payload).expect("valid");
        let ranges: Vec<_> = frag.items.iter().map(|l| l.depth_range.as_str()).collect();
        assert_eq!(ranges, vec!["0.0~5.0m", "", "", "", "5.0~10.0m"]);
    }

    #[test]
    fn rejects_missing_metadata() {
        let payload = json!({ "soil_data": [] });
        let err = parse_fragment::<SoilLayer>(1, &payload).unwrap_err();
        assert!(err.contains("metadata"), "got: {err}");
    }

    #[test]
    fn rejects_missing_hole_number() {
        let payload = json!({ "metadata": { "HOLE_NO": null, "DATE": "2021" }, "soil_data": [] });
        let err = parse_fragment::<SoilLayer>(1, &payload).unwrap_err();
        assert!(err.contains("HOLE_NO"), "got: {err}");
    }

    #[test]
    fn rejects_wrong_kind_array() {
        let payload = json!({ "metadata": { "HOLE_NO": "BH-1" }, "soil_data": [] });
        let err = parse_fragment::<SampleRecord>(1, &payload).unwrap_err();
        assert!(err.contains("sample_data"), "got: {err}");
    }

    #[test]
    fn rejects_item_without_depth_and_names_index() {
        let payload = json!({
            "metadata": { "HOLE_NO": "BH-1" },
            "sample_data": [
                { "Sample_number": "S1", "Depth": 3.0 },
                { "Sample_number": "S2", "Depth": "deep" }
            ]
        });
        let err = parse_fragment::<SampleRecord>(1, &payload).unwrap_err();
        assert!(err.starts_with("sample_data[1]"), "got: {err}");
    }

    #[test]
    fn rejects_non_object_root() {
        let err = parse_fragment::<SoilLayer>(1, &json!([1, 2])).unwrap_err();
        assert!(err.contains("an array"), "got: {err}");
    }

    #[test]
    fn nested_metadata_values_are_dropped() {
        let payload = json!({
            "metadata": { "HOLE_NO": "BH-1", "LOCATION": { "x": 1 } },
            "soil_data": []
        });
        let frag = parse_fragment::<SoilLayer>(1, &payload).expect("valid");
        assert!(frag.metadata.get("LOCATION").is_none());
        assert_eq!(frag.metadata.len(), 1);
    }

    #[test]
    fn sample_record_serialises_with_wire_names() {
        let rec = SampleRecord {
            sample_number: "S1".into(),
            depth: 3.0,
            hits: "10/30".into(),
            method: "SPT".into(),
        };
        let v = serde_json::to_value(&rec).unwrap();
        assert_eq!(v["Sample_number"], "S1");
        assert_eq!(v["Depth"], 3.0);
    }

    #[test]
    fn json_schema_names_item_array() {
        let soil = SchemaKind::Soil.json_schema().to_string();
        assert!(soil.contains("soil_data"));
        assert!(soil.contains("HOLE_NO"));
        let sample = SchemaKind::Sample.json_schema().to_string();
        assert!(sample.contains("Sample_number"));
    }
}
