//!
//! The dynamic value: a tagged union over the JSON data model plus
//! distinct signed/unsigned 64-bit integers and a binary blob. All
//! typed argument and result conversion bridges through
//! [`serde_json::Value`], so any `serde` type can appear in an
//! interface declaration. Both directions are guarded by a nesting
//! depth bound.
//!

use crate::error::RpcError;
use crate::result::RpcResult;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub enum Variant {
    Null,
    Bool(bool),
    Int64(i64),
    UInt64(u64),
    Double(f64),
    String(String),
    Blob(Vec<u8>),
    Array(Vec<Variant>),
    Object(VariantObject),
}

/// Ordered string-keyed mapping. Keys are unique; insertion order is
/// preserved on encode.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct VariantObject {
    entries: Vec<(String, Variant)>,
}

impl VariantObject {
    pub fn new() -> VariantObject {
        VariantObject::default()
    }

    /// Insert a key/value pair, replacing the value in place if the
    /// key is already present.
    pub fn insert(&mut self, key: impl Into<String>, value: Variant) {
        let key = key.into();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            entry.1 = value;
        } else {
            self.entries.push((key, value));
        }
    }

    pub fn get(&self, key: &str) -> Option<&Variant> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }

    pub fn remove(&mut self, key: &str) -> Option<Variant> {
        let index = self.entries.iter().position(|(k, _)| k == key)?;
        Some(self.entries.remove(index).1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Variant)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl FromIterator<(String, Variant)> for VariantObject {
    fn from_iter<T: IntoIterator<Item = (String, Variant)>>(iter: T) -> VariantObject {
        let mut object = VariantObject::new();
        for (key, value) in iter {
            object.insert(key, value);
        }
        object
    }
}

impl Variant {
    pub fn is_null(&self) -> bool {
        matches!(self, Variant::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Variant::Bool(v) => Some(*v),
            _ => None,
        }
    }

    /// Signed view of a numeric variant. Unsigned values narrow only
    /// when exact.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Variant::Int64(v) => Some(*v),
            Variant::UInt64(v) => i64::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Unsigned view of a numeric variant. Signed values narrow only
    /// when non-negative.
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Variant::UInt64(v) => Some(*v),
            Variant::Int64(v) => u64::try_from(*v).ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Variant::Double(v) => Some(*v),
            Variant::Int64(v) => Some(*v as f64),
            Variant::UInt64(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Variant::String(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&[Variant]> {
        match self {
            Variant::Array(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&VariantObject> {
        match self {
            Variant::Object(v) => Some(v),
            _ => None,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Variant::Null => "null",
            Variant::Bool(_) => "bool",
            Variant::Int64(_) => "int64",
            Variant::UInt64(_) => "uint64",
            Variant::Double(_) => "double",
            Variant::String(_) => "string",
            Variant::Blob(_) => "blob",
            Variant::Array(_) => "array",
            Variant::Object(_) => "object",
        }
    }

    /// Depth-checked conversion into a [`serde_json::Value`]. Blobs
    /// encode as base64 strings; non-finite doubles are rejected.
    pub fn to_json_value(&self, max_depth: usize) -> RpcResult<Value> {
        if max_depth == 0 {
            return Err(RpcError::depth_exceeded());
        }
        let value = match self {
            Variant::Null => Value::Null,
            Variant::Bool(v) => Value::Bool(*v),
            Variant::Int64(v) => Value::from(*v),
            Variant::UInt64(v) => Value::from(*v),
            Variant::Double(v) => serde_json::Number::from_f64(*v)
                .map(Value::Number)
                .ok_or_else(|| RpcError::bad_cast("non-finite double"))?,
            Variant::String(v) => Value::String(v.clone()),
            Variant::Blob(data) => Value::String(BASE64.encode(data)),
            Variant::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| item.to_json_value(max_depth - 1))
                    .collect::<RpcResult<Vec<_>>>()?,
            ),
            Variant::Object(object) => {
                let mut map = serde_json::Map::with_capacity(object.len());
                for (key, value) in object.iter() {
                    map.insert(key.to_string(), value.to_json_value(max_depth - 1)?);
                }
                Value::Object(map)
            }
        };
        Ok(value)
    }

    /// Depth-checked conversion from a [`serde_json::Value`].
    /// Non-negative integers come back unsigned.
    pub fn from_json_value(value: &Value, max_depth: usize) -> RpcResult<Variant> {
        if max_depth == 0 {
            return Err(RpcError::depth_exceeded());
        }
        let variant = match value {
            Value::Null => Variant::Null,
            Value::Bool(v) => Variant::Bool(*v),
            Value::Number(number) => {
                if let Some(v) = number.as_u64() {
                    Variant::UInt64(v)
                } else if let Some(v) = number.as_i64() {
                    Variant::Int64(v)
                } else if let Some(v) = number.as_f64() {
                    Variant::Double(v)
                } else {
                    return Err(RpcError::bad_cast(format!("unsupported number {number}")));
                }
            }
            Value::String(v) => Variant::String(v.clone()),
            Value::Array(items) => Variant::Array(
                items
                    .iter()
                    .map(|item| Variant::from_json_value(item, max_depth - 1))
                    .collect::<RpcResult<Vec<_>>>()?,
            ),
            Value::Object(map) => {
                let mut object = VariantObject::new();
                for (key, value) in map.iter() {
                    object.insert(key.clone(), Variant::from_json_value(value, max_depth - 1)?);
                }
                Variant::Object(object)
            }
        };
        Ok(variant)
    }
}

impl From<bool> for Variant {
    fn from(v: bool) -> Variant {
        Variant::Bool(v)
    }
}

impl From<i32> for Variant {
    fn from(v: i32) -> Variant {
        Variant::Int64(v as i64)
    }
}

impl From<i64> for Variant {
    fn from(v: i64) -> Variant {
        Variant::Int64(v)
    }
}

impl From<u32> for Variant {
    fn from(v: u32) -> Variant {
        Variant::UInt64(v as u64)
    }
}

impl From<u64> for Variant {
    fn from(v: u64) -> Variant {
        Variant::UInt64(v)
    }
}

impl From<f64> for Variant {
    fn from(v: f64) -> Variant {
        Variant::Double(v)
    }
}

impl From<&str> for Variant {
    fn from(v: &str) -> Variant {
        Variant::String(v.to_string())
    }
}

impl From<String> for Variant {
    fn from(v: String) -> Variant {
        Variant::String(v)
    }
}

impl From<Vec<Variant>> for Variant {
    fn from(v: Vec<Variant>) -> Variant {
        Variant::Array(v)
    }
}

impl From<VariantObject> for Variant {
    fn from(v: VariantObject) -> Variant {
        Variant::Object(v)
    }
}

/// Convert any serializable value into a [`Variant`], bounded by
/// `max_depth`.
pub fn to_variant<T: Serialize>(value: &T, max_depth: usize) -> RpcResult<Variant> {
    let json = serde_json::to_value(value).map_err(|err| RpcError::bad_cast(err.to_string()))?;
    Variant::from_json_value(&json, max_depth)
}

/// Convert a [`Variant`] into any deserializable value, bounded by
/// `max_depth`. Numeric narrowing is performed only when exact.
pub fn from_variant<T: DeserializeOwned>(variant: &Variant, max_depth: usize) -> RpcResult<T> {
    let json = variant.to_json_value(max_depth)?;
    serde_json::from_value(json).map_err(|err| RpcError::bad_cast(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::json;

    #[test]
    fn object_preserves_insertion_order_and_key_uniqueness() {
        let mut object = VariantObject::new();
        object.insert("z", Variant::from(1u64));
        object.insert("a", Variant::from(2u64));
        object.insert("z", Variant::from(3u64));

        let keys: Vec<&str> = object.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["z", "a"]);
        assert_eq!(object.get("z"), Some(&Variant::UInt64(3)));
    }

    #[test]
    fn exact_numeric_narrowing() {
        assert_eq!(from_variant::<i32>(&Variant::UInt64(41), 8).unwrap(), 41);
        assert!(from_variant::<i32>(&Variant::UInt64(u64::MAX), 8).is_err());
        assert!(from_variant::<u32>(&Variant::Int64(-1), 8).is_err());
        assert!(from_variant::<i32>(&Variant::Double(1.5), 8).is_err());
    }

    #[test]
    fn blob_encodes_as_base64() {
        let blob = Variant::Blob(vec![0xde, 0xad, 0xbe, 0xef]);
        let text = json::to_string(&blob, 8).unwrap();
        assert_eq!(text, "\"3q2+7w==\"");
    }

    #[test]
    fn typed_conversion_depth_bound() {
        let mut value = Variant::Null;
        for _ in 0..4 {
            value = Variant::Array(vec![value]);
        }
        assert!(value.to_json_value(5).is_ok());
        let err = value.to_json_value(4).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::DepthExceeded);
    }
}
