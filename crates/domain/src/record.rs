//! Bitable record model.
//!
//! The backend returns polymorphic field values (strings, numbers, arrays
//! of option objects, person tuples, millisecond timestamps, rich-text
//! blobs). They are decoded once into [`FieldValue`]; everything downstream
//! (formatter, renderer, extractors) consumes the variant, never raw JSON.

use std::collections::BTreeMap;

use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Millisecond-timestamp detection threshold: anything above this is a
/// date-time in ms since the epoch (10^12 ms ≈ 2001-09-09).
pub const DATE_MS_THRESHOLD: i64 = 1_000_000_000_000;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// FieldValue
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A person reference as stored in person-typed fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Person {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
}

/// One segment of a rich-text blob. Only the text payload is retained.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RichSegment {
    #[serde(default)]
    pub text: String,
}

/// The closed set of backend value shapes.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// Plain string (text, single-select, formula output).
    Text(String),
    /// Numeric value below the date threshold.
    Number(f64),
    /// Checkbox.
    Bool(bool),
    /// Millisecond timestamp (date / date-time fields).
    DateMs(i64),
    /// Multi-select style option list.
    Options(Vec<String>),
    /// Person-typed field.
    Persons(Vec<Person>),
    /// Rich-text blob (list of `{text, …}` segments).
    Rich(Vec<RichSegment>),
    /// Explicit null / absent.
    Null,
}

impl FieldValue {
    /// Decode a raw backend JSON value into the closed variant set.
    pub fn from_json(value: &Value) -> FieldValue {
        match value {
            Value::Null => FieldValue::Null,
            Value::Bool(b) => FieldValue::Bool(*b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    if i > DATE_MS_THRESHOLD {
                        return FieldValue::DateMs(i);
                    }
                }
                FieldValue::Number(n.as_f64().unwrap_or(0.0))
            }
            Value::String(s) => FieldValue::Text(s.clone()),
            Value::Array(items) => Self::from_array(items),
            Value::Object(map) => {
                // Dicts with `text` or `name` carry the display string.
                if let Some(Value::String(s)) = map.get("text") {
                    FieldValue::Text(s.clone())
                } else if map.contains_key("id") || map.contains_key("name") {
                    FieldValue::Persons(vec![person_from_map(map)])
                } else {
                    FieldValue::Text(Value::Object(map.clone()).to_string())
                }
            }
        }
    }

    fn from_array(items: &[Value]) -> FieldValue {
        if items.is_empty() {
            return FieldValue::Options(Vec::new());
        }
        let all_strings = items.iter().all(|v| v.is_string());
        if all_strings {
            return FieldValue::Options(
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_owned))
                    .collect(),
            );
        }
        // Person tuples carry an id; rich-text / option objects carry text.
        let looks_person = items
            .iter()
            .any(|v| v.as_object().is_some_and(|m| m.contains_key("id")));
        if looks_person {
            let persons = items
                .iter()
                .filter_map(|v| v.as_object().map(person_from_map))
                .collect();
            return FieldValue::Persons(persons);
        }
        let has_text = items
            .iter()
            .any(|v| v.as_object().is_some_and(|m| m.contains_key("text")));
        if has_text {
            let segs = items
                .iter()
                .filter_map(|v| {
                    v.as_object().map(|m| RichSegment {
                        text: m
                            .get("text")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_owned(),
                    })
                })
                .collect();
            return FieldValue::Rich(segs);
        }
        FieldValue::Options(items.iter().map(|v| v.to_string()).collect())
    }

    /// Re-encode into the backend's native JSON shape.
    pub fn to_json(&self) -> Value {
        match self {
            FieldValue::Text(s) => Value::String(s.clone()),
            FieldValue::Number(n) => serde_json::json!(n),
            FieldValue::Bool(b) => Value::Bool(*b),
            FieldValue::DateMs(ms) => serde_json::json!(ms),
            FieldValue::Options(opts) => {
                Value::Array(opts.iter().map(|o| Value::String(o.clone())).collect())
            }
            FieldValue::Persons(ps) => Value::Array(
                ps.iter()
                    .map(|p| serde_json::json!({ "id": p.id, "name": p.name }))
                    .collect(),
            ),
            FieldValue::Rich(segs) => Value::Array(
                segs.iter()
                    .map(|s| serde_json::json!({ "text": s.text }))
                    .collect(),
            ),
            FieldValue::Null => Value::Null,
        }
    }

    /// True when the value renders to an empty string.
    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Null => true,
            FieldValue::Text(s) => s.trim().is_empty(),
            FieldValue::Options(o) => o.is_empty(),
            FieldValue::Persons(p) => p.is_empty(),
            FieldValue::Rich(r) => r.iter().all(|s| s.text.trim().is_empty()),
            _ => false,
        }
    }
}

fn person_from_map(map: &serde_json::Map<String, Value>) -> Person {
    Person {
        id: map
            .get("id")
            .or_else(|| map.get("open_id"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
        name: map
            .get("name")
            .or_else(|| map.get("en_name"))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned(),
    }
}

impl Serialize for FieldValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for FieldValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(FieldValue::from_json(&value))
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A record as returned by the backend, plus the text-coerced rendering
/// produced by the schema-aware formatter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Record {
    pub record_id: String,
    #[serde(default)]
    pub record_url: String,
    #[serde(default)]
    pub fields: BTreeMap<String, FieldValue>,
    /// Text rendering of each field; populated by the formatter pass.
    #[serde(default)]
    pub fields_text: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table_name: Option<String>,
}

impl Record {
    /// Formatted text for a field, falling back to an em-dash placeholder.
    pub fn text(&self, field: &str) -> &str {
        self.fields_text.get(field).map(String::as_str).unwrap_or("—")
    }

    /// First non-blank formatted value among `candidates`.
    pub fn pick_text(&self, candidates: &[&str]) -> String {
        for key in candidates {
            if let Some(v) = self.fields_text.get(*key) {
                if !v.trim().is_empty() && v != "—" {
                    return v.clone();
                }
            }
        }
        String::new()
    }
}

/// A `(table_id, table_name)` pair naming a backend table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRef {
    pub table_id: String,
    pub table_name: String,
}

impl TableRef {
    pub fn new(table_id: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            table_id: table_id.into(),
            table_name: table_name.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_scalars() {
        assert_eq!(
            FieldValue::from_json(&serde_json::json!("未结")),
            FieldValue::Text("未结".into())
        );
        assert_eq!(
            FieldValue::from_json(&serde_json::json!(3.5)),
            FieldValue::Number(3.5)
        );
        assert_eq!(
            FieldValue::from_json(&serde_json::json!(true)),
            FieldValue::Bool(true)
        );
        assert_eq!(FieldValue::from_json(&Value::Null), FieldValue::Null);
    }

    #[test]
    fn large_integers_become_dates() {
        let v = FieldValue::from_json(&serde_json::json!(1_726_000_000_000_i64));
        assert_eq!(v, FieldValue::DateMs(1_726_000_000_000));
        // Below the threshold stays numeric.
        let v = FieldValue::from_json(&serde_json::json!(20240101));
        assert!(matches!(v, FieldValue::Number(_)));
    }

    #[test]
    fn person_arrays_are_detected_by_id() {
        let v = FieldValue::from_json(&serde_json::json!([
            { "id": "ou_1", "name": "张三" },
            { "id": "ou_2", "name": "李四" }
        ]));
        match v {
            FieldValue::Persons(ps) => {
                assert_eq!(ps.len(), 2);
                assert_eq!(ps[0].name, "张三");
            }
            other => panic!("expected Persons, got {other:?}"),
        }
    }

    #[test]
    fn rich_text_segments_keep_text() {
        let v = FieldValue::from_json(&serde_json::json!([
            { "text": "(2024)粤0101民初100号", "type": "text" }
        ]));
        match v {
            FieldValue::Rich(segs) => assert_eq!(segs[0].text, "(2024)粤0101民初100号"),
            other => panic!("expected Rich, got {other:?}"),
        }
    }

    #[test]
    fn string_arrays_are_options() {
        let v = FieldValue::from_json(&serde_json::json!(["诉讼", "仲裁"]));
        assert_eq!(
            v,
            FieldValue::Options(vec!["诉讼".into(), "仲裁".into()])
        );
    }

    #[test]
    fn roundtrips_through_serde() {
        let v = FieldValue::from_json(&serde_json::json!([{ "id": "ou_1", "name": "张三" }]));
        let json = serde_json::to_value(&v).unwrap();
        let back = FieldValue::from_json(&json);
        assert_eq!(v, back);
    }
}
