//! Dynamic document value tree.
//!
//! # Responsibility
//! - Represent semi-structured record bodies of unbounded depth.
//! - Classify values as mergeable containers or opaque leaves.
//! - Map to and from extended JSON for storage and fixtures.
//!
//! # Invariants
//! - Only `Value::Object` is mergeable; arrays, dates and ids are leaves.
//! - `Value::Unset` only appears in pending changes and merged reads; it is
//!   never stored.
//! - `Value::from(value.to_json()) == value` for every non-float value.

use crate::model::record_id::RecordId;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

/// Ordered string-keyed container used for every nested object.
pub type Map = BTreeMap<String, Value>;

const OID_KEY: &str = "$oid";
const DATE_KEY: &str = "$date";
const UNSET_KEY: &str = "$unset";

/// One node of a record body.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    /// Unix epoch milliseconds. Opaque leaf, never merged.
    DateTime(i64),
    Id(RecordId),
    Array(Vec<Value>),
    Object(Map),
    /// Pending field-removal marker.
    Unset,
}

impl Value {
    /// Empty object.
    pub fn object() -> Self {
        Self::Object(Map::new())
    }

    /// Whether this value is a keyed container eligible for recursive merge.
    pub fn is_mergeable(&self) -> bool {
        matches!(self, Self::Object(_))
    }

    pub fn is_unset(&self) -> bool {
        matches!(self, Self::Unset)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn is_empty_object(&self) -> bool {
        matches!(self, Self::Object(map) if map.is_empty())
    }

    pub fn as_object(&self) -> Option<&Map> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_object_mut(&mut self) -> Option<&mut Map> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn into_object(self) -> Option<Map> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(text) => Some(text),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_id(&self) -> Option<RecordId> {
        match self {
            Self::Id(id) => Some(*id),
            _ => None,
        }
    }

    /// Looks up a dotted path below this value. Non-objects have no children.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        self.as_object()
            .and_then(|map| crate::tracking::dot_path::get_path(map, path))
    }

    /// Renders extended JSON: ids as `{"$oid": hex}`, dates as
    /// `{"$date": millis}`, removal markers as `{"$unset": true}`.
    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;

        match self {
            Self::Null => Json::Null,
            Self::Bool(value) => Json::Bool(*value),
            Self::Int(value) => Json::from(*value),
            Self::Float(value) => serde_json::Number::from_f64(*value)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            Self::String(text) => Json::String(text.clone()),
            Self::DateTime(millis) => tagged(DATE_KEY, Json::from(*millis)),
            Self::Id(id) => tagged(OID_KEY, Json::String(id.to_hex())),
            Self::Array(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Self::Object(map) => Json::Object(
                map.iter()
                    .map(|(key, value)| (key.clone(), value.to_json()))
                    .collect(),
            ),
            Self::Unset => tagged(UNSET_KEY, Json::Bool(true)),
        }
    }
}

fn tagged(key: &str, value: serde_json::Value) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    map.insert(key.to_string(), value);
    serde_json::Value::Object(map)
}

fn untag(map: &serde_json::Map<String, serde_json::Value>) -> Option<Value> {
    if map.len() != 1 {
        return None;
    }
    let (key, value) = map.iter().next()?;
    match key.as_str() {
        OID_KEY => value
            .as_str()
            .and_then(|text| RecordId::parse_str(text).ok())
            .map(Value::Id),
        DATE_KEY => value.as_i64().map(Value::DateTime),
        UNSET_KEY if value.as_bool() == Some(true) => Some(Value::Unset),
        _ => None,
    }
}

impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value as Json;

        match value {
            Json::Null => Self::Null,
            Json::Bool(value) => Self::Bool(value),
            Json::Number(number) => match number.as_i64() {
                Some(int) => Self::Int(int),
                None => Self::Float(number.as_f64().unwrap_or(f64::NAN)),
            },
            Json::String(text) => Self::String(text),
            Json::Array(items) => Self::Array(items.into_iter().map(Value::from).collect()),
            Json::Object(map) => match untag(&map) {
                Some(special) => special,
                None => Self::Object(
                    map.into_iter()
                        .map(|(key, value)| (key, Value::from(value)))
                        .collect(),
                ),
            },
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Value::from)
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Self::Int(i64::from(value))
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<RecordId> for Value {
    fn from(value: RecordId) -> Self {
        Self::Id(value)
    }
}

impl From<Map> for Value {
    fn from(value: Map) -> Self {
        Self::Object(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(value: Vec<T>) -> Self {
        Self::Array(value.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::{Map, Value};
    use crate::model::record_id::RecordId;
    use serde_json::json;

    #[test]
    fn only_objects_are_mergeable() {
        assert!(Value::object().is_mergeable());
        assert!(!Value::from(vec![1, 2]).is_mergeable());
        assert!(!Value::DateTime(1_700_000_000_000).is_mergeable());
        assert!(!Value::Id(RecordId::new()).is_mergeable());
        assert!(!Value::from("text").is_mergeable());
    }

    #[test]
    fn extended_json_tags_decode_to_opaque_leaves() {
        let value = Value::from(json!({
            "_id": {"$oid": "5aa9399f229cbe35cc9174ca"},
            "at": {"$date": 1_700_000_000_000_i64},
            "nested": {"$oid": "not-an-id"},
        }));

        let map = value.as_object().expect("object");
        assert!(matches!(map["_id"], Value::Id(_)));
        assert_eq!(map["at"], Value::DateTime(1_700_000_000_000));
        assert!(map["nested"].is_mergeable());
    }

    #[test]
    fn json_rendering_keeps_tags_and_plain_fields() {
        let id = RecordId::parse_str("5aa9399f229cbe35cc9174ca").expect("fixture id");
        let mut map = Map::new();
        map.insert("_id".to_string(), Value::Id(id));
        map.insert("n".to_string(), Value::Int(3));
        map.insert("gone".to_string(), Value::Unset);

        let json = Value::Object(map.clone()).to_json();
        assert_eq!(
            json,
            json!({
                "_id": {"$oid": "5aa9399f229cbe35cc9174ca"},
                "n": 3,
                "gone": {"$unset": true},
            })
        );
        assert_eq!(Value::from(json), Value::Object(map));
    }

    #[test]
    fn get_path_walks_nested_objects() {
        let value = Value::from(json!({"a": {"b": {"c": 1}}, "list": [1, 2]}));
        assert_eq!(value.get_path("a.b.c"), Some(&Value::Int(1)));
        assert_eq!(value.get_path("list.0"), None);
        assert_eq!(value.get_path("a.missing"), None);
    }
}
