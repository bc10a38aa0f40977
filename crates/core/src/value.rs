//! Wire value model: parameter normalization and result encoding.
//!
//! Clients send parameter trees as JSON with tagged wire forms for types that
//! JSON cannot express (`{"__type": "Date", "iso": ...}`, `{"__type": "File",
//! "name": ...}`). Handlers work against the normalized [`Value`] model;
//! results travel back through [`Value::encode`], which re-emits the tagged
//! forms.

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::Value as JsonValue;

/// A normalized parameter or result value.
///
/// Immutable by convention: normalization builds a fresh tree and never
/// mutates its input.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    /// A rehydrated tagged date. Extra tagged fields beyond `__type`/`iso`
    /// are preserved alongside the parsed timestamp.
    Date {
        iso: DateTime<Utc>,
        extra: BTreeMap<String, Value>,
    },
    /// A rehydrated file reference handle.
    File { name: String, url: Option<String> },
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// Recursively normalize a wire JSON tree.
    ///
    /// Sequences map element-wise; tagged dates and file references are
    /// rehydrated; plain objects normalize key-by-key; scalars pass through.
    /// A tagged object that fails to rehydrate (missing or unparseable
    /// fields) is kept as a plain object rather than rejected.
    pub fn decode(json: JsonValue) -> Value {
        match json {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(b),
            JsonValue::Number(n) => Value::Number(n),
            JsonValue::String(s) => Value::String(s),
            JsonValue::Array(items) => Value::Array(items.into_iter().map(Value::decode).collect()),
            JsonValue::Object(map) => match map.get("__type").and_then(JsonValue::as_str) {
                Some("Date") => decode_date(map),
                Some("File") => decode_file(map),
                _ => Value::Object(decode_object(map)),
            },
        }
    }

    /// Re-encode a normalized value into its wire JSON form.
    pub fn encode(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Number(n) => JsonValue::Number(n.clone()),
            Value::String(s) => JsonValue::String(s.clone()),
            Value::Date { iso, extra } => {
                let mut map = serde_json::Map::new();
                map.insert("__type".to_string(), JsonValue::String("Date".to_string()));
                map.insert(
                    "iso".to_string(),
                    JsonValue::String(iso.to_rfc3339_opts(SecondsFormat::Millis, true)),
                );
                for (key, value) in extra {
                    map.insert(key.clone(), value.encode());
                }
                JsonValue::Object(map)
            }
            Value::File { name, url } => {
                let mut map = serde_json::Map::new();
                map.insert("__type".to_string(), JsonValue::String("File".to_string()));
                map.insert("name".to_string(), JsonValue::String(name.clone()));
                if let Some(url) = url {
                    map.insert("url".to_string(), JsonValue::String(url.clone()));
                }
                JsonValue::Object(map)
            }
            Value::Array(items) => JsonValue::Array(items.iter().map(Value::encode).collect()),
            Value::Object(map) => JsonValue::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), value.encode()))
                    .collect(),
            ),
        }
    }
}

fn decode_object(map: serde_json::Map<String, JsonValue>) -> BTreeMap<String, Value> {
    map.into_iter()
        .map(|(key, value)| (key, Value::decode(value)))
        .collect()
}

fn decode_date(map: serde_json::Map<String, JsonValue>) -> Value {
    let parsed = map
        .get("iso")
        .and_then(JsonValue::as_str)
        .and_then(|iso| DateTime::parse_from_rfc3339(iso).ok());

    match parsed {
        Some(iso) => {
            let extra = map
                .into_iter()
                .filter(|(key, _)| key != "__type" && key != "iso")
                .map(|(key, value)| (key, Value::decode(value)))
                .collect();
            Value::Date {
                iso: iso.with_timezone(&Utc),
                extra,
            }
        }
        None => Value::Object(decode_object(map)),
    }
}

fn decode_file(map: serde_json::Map<String, JsonValue>) -> Value {
    let name = map.get("name").and_then(JsonValue::as_str);
    match name {
        Some(name) => Value::File {
            name: name.to_string(),
            url: map
                .get("url")
                .and_then(JsonValue::as_str)
                .map(str::to_string),
        },
        None => Value::Object(decode_object(map)),
    }
}

/// Normalize a request body into a parameter map.
///
/// Non-object bodies produce an empty map (a function invoked with no
/// parameters has `params == {}`).
pub fn decode_params(body: JsonValue) -> BTreeMap<String, Value> {
    match body {
        JsonValue::Object(map) => decode_object(map),
        _ => BTreeMap::new(),
    }
}

/// Encode a parameter map back to its wire JSON object.
pub fn encode_params(params: &BTreeMap<String, Value>) -> JsonValue {
    JsonValue::Object(
        params
            .iter()
            .map(|(key, value)| (key.clone(), value.encode()))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn tagged_date_rehydrates() {
        let value = Value::decode(json!({
            "when": {"__type": "Date", "iso": "2024-05-01T12:30:00.000Z"}
        }));
        let Value::Object(map) = value else {
            panic!("expected object")
        };
        let Value::Date { iso, extra } = &map["when"] else {
            panic!("expected date")
        };
        assert_eq!(iso.to_rfc3339_opts(SecondsFormat::Millis, true), "2024-05-01T12:30:00.000Z");
        assert!(extra.is_empty());
    }

    #[test]
    fn tagged_date_preserves_extra_fields() {
        let value = Value::decode(json!({
            "__type": "Date", "iso": "2024-05-01T00:00:00.000Z", "zone": "UTC"
        }));
        let Value::Date { extra, .. } = value else {
            panic!("expected date")
        };
        assert_eq!(extra.get("zone"), Some(&Value::String("UTC".to_string())));
    }

    #[test]
    fn unparseable_date_stays_a_plain_object() {
        let value = Value::decode(json!({"__type": "Date", "iso": "not-a-date"}));
        assert!(matches!(value, Value::Object(_)));
    }

    #[test]
    fn tagged_file_rehydrates() {
        let value = Value::decode(json!({
            "__type": "File", "name": "photo.png", "url": "https://files.example/photo.png"
        }));
        assert_eq!(
            value,
            Value::File {
                name: "photo.png".to_string(),
                url: Some("https://files.example/photo.png".to_string()),
            }
        );
    }

    #[test]
    fn arrays_normalize_element_wise() {
        let value = Value::decode(json!([1, {"__type": "File", "name": "a"}, "x"]));
        let Value::Array(items) = value else {
            panic!("expected array")
        };
        assert_eq!(items.len(), 3);
        assert!(matches!(items[1], Value::File { .. }));
    }

    #[test]
    fn date_roundtrips_through_encode() {
        let wire = json!({"__type": "Date", "iso": "2024-05-01T12:30:00.000Z"});
        assert_eq!(Value::decode(wire.clone()).encode(), wire);
    }

    #[test]
    fn non_object_body_yields_empty_params() {
        assert!(decode_params(json!([1, 2, 3])).is_empty());
        assert!(decode_params(json!("text")).is_empty());
    }

    // JSON trees with no tagged forms must survive normalization untouched.
    fn plain_json() -> impl Strategy<Value = JsonValue> {
        let leaf = prop_oneof![
            Just(JsonValue::Null),
            any::<bool>().prop_map(JsonValue::Bool),
            any::<i64>().prop_map(|n| json!(n)),
            "[a-z]{0,8}".prop_map(JsonValue::String),
        ];
        leaf.prop_recursive(4, 32, 6, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..4).prop_map(JsonValue::Array),
                prop::collection::btree_map("[a-z]{1,6}", inner, 0..4).prop_map(|m| {
                    JsonValue::Object(m.into_iter().collect())
                }),
            ]
        })
    }

    proptest! {
        #[test]
        fn plain_trees_roundtrip(tree in plain_json()) {
            prop_assert_eq!(Value::decode(tree.clone()).encode(), tree);
        }

        #[test]
        fn decode_terminates_on_any_tree(tree in plain_json()) {
            let _ = Value::decode(tree);
        }
    }
}
