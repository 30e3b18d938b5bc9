//! Rich-value codec.
//!
//! # Responsibilities
//! - Serialize handler results into a JSON envelope plus sidecar type metadata
//! - Reconstruct non-JSON-native values (dates, maps, sets, errors, undefined)
//!   symmetrically on decode
//! - Emit no metadata key for payloads restricted to JSON-native values
//!
//! # Design Decisions
//! - Metadata lives under one reserved top-level key so plain-JSON consumers
//!   can ignore it
//! - Metadata paths are dot-joined key/index segments; dots inside object keys
//!   are escaped with a backslash
//! - A non-object root that needs metadata is wrapped under `__richValue` so
//!   the envelope stays a JSON object; decode unwraps exactly once

use std::collections::BTreeMap;

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Number, Value};

use crate::error::Error;

/// Reserved envelope key holding the type metadata map.
pub const META_KEY: &str = "__richValueMeta";

/// Reserved key wrapping a non-object root value when metadata is present.
pub const ROOT_KEY: &str = "__richValue";

/// A value from the supported rich type set.
///
/// Objects and maps preserve entry order so encoding is deterministic.
#[derive(Debug, Clone, PartialEq)]
pub enum RichValue {
    Null,
    Undefined,
    Bool(bool),
    Number(Number),
    String(String),
    Date(DateTime<Utc>),
    Array(Vec<RichValue>),
    Object(Vec<(String, RichValue)>),
    Map(Vec<(RichValue, RichValue)>),
    Set(Vec<RichValue>),
    Error { message: String },
}

impl RichValue {
    /// Convert any serializable value into a rich value via its JSON form.
    pub fn from_serialize<T: serde::Serialize>(value: &T) -> Result<RichValue, Error> {
        let json = serde_json::to_value(value).map_err(|e| Error::Internal(e.to_string()))?;
        Ok(RichValue::from(json))
    }

    /// Look up a field of an object value.
    pub fn get(&self, key: &str) -> Option<&RichValue> {
        match self {
            RichValue::Object(fields) => fields.iter().find(|(k, _)| k == key).map(|(_, v)| v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            RichValue::String(s) => Some(s),
            _ => None,
        }
    }

    fn type_name(&self) -> &'static str {
        match self {
            RichValue::Null => "null",
            RichValue::Undefined => "undefined",
            RichValue::Bool(_) => "bool",
            RichValue::Number(_) => "number",
            RichValue::String(_) => "string",
            RichValue::Date(_) => "date",
            RichValue::Array(_) => "array",
            RichValue::Object(_) => "object",
            RichValue::Map(_) => "map",
            RichValue::Set(_) => "set",
            RichValue::Error { .. } => "error",
        }
    }
}

impl From<Value> for RichValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => RichValue::Null,
            Value::Bool(b) => RichValue::Bool(b),
            Value::Number(n) => RichValue::Number(n),
            Value::String(s) => RichValue::String(s),
            Value::Array(items) => {
                RichValue::Array(items.into_iter().map(RichValue::from).collect())
            }
            Value::Object(map) => {
                RichValue::Object(map.into_iter().map(|(k, v)| (k, RichValue::from(v))).collect())
            }
        }
    }
}

impl From<&str> for RichValue {
    fn from(s: &str) -> Self {
        RichValue::String(s.to_string())
    }
}

impl From<String> for RichValue {
    fn from(s: String) -> Self {
        RichValue::String(s)
    }
}

impl From<bool> for RichValue {
    fn from(b: bool) -> Self {
        RichValue::Bool(b)
    }
}

impl From<i64> for RichValue {
    fn from(n: i64) -> Self {
        RichValue::Number(Number::from(n))
    }
}

impl From<u64> for RichValue {
    fn from(n: u64) -> Self {
        RichValue::Number(Number::from(n))
    }
}

impl From<f64> for RichValue {
    fn from(n: f64) -> Self {
        Number::from_f64(n).map(RichValue::Number).unwrap_or(RichValue::Null)
    }
}

/// Encode a rich value into its wire envelope.
///
/// The metadata key appears only when at least one subtree required a type
/// annotation. If no annotation is needed the output is exactly the value's
/// plain JSON form.
pub fn encode_envelope(value: &RichValue) -> Value {
    encode_envelope_with(value, true)
}

/// Encode, optionally suppressing the metadata key entirely.
///
/// Used by apps configured to serve plain JSON to non-RPC callers.
pub fn encode_envelope_with(value: &RichValue, with_meta: bool) -> Value {
    let mut meta = BTreeMap::new();
    let json = encode_at(value, String::new(), &mut meta);
    if meta.is_empty() || !with_meta {
        return json;
    }
    let values: Map<String, Value> = meta
        .into_iter()
        .map(|(path, tag)| (path, Value::Array(vec![Value::String(tag.to_string())])))
        .collect();
    let meta_value = {
        let mut m = Map::new();
        m.insert("values".to_string(), Value::Object(values));
        Value::Object(m)
    };
    match json {
        Value::Object(mut map) if !map.contains_key(ROOT_KEY) => {
            map.insert(META_KEY.to_string(), meta_value);
            Value::Object(map)
        }
        other => {
            let mut map = Map::new();
            map.insert(ROOT_KEY.to_string(), other);
            map.insert(META_KEY.to_string(), meta_value);
            Value::Object(map)
        }
    }
}

/// Decode a wire envelope back into a rich value.
///
/// An envelope without the metadata key decodes as plain JSON.
pub fn decode_envelope(value: &Value) -> Result<RichValue, Error> {
    let Value::Object(map) = value else {
        return Ok(RichValue::from(value.clone()));
    };
    let Some(meta_value) = map.get(META_KEY) else {
        return Ok(RichValue::from(value.clone()));
    };
    let meta = parse_meta(meta_value)?;
    let mut stripped = map.clone();
    stripped.remove(META_KEY);
    // A wrapped non-object root holds exactly the one reserved key.
    if stripped.len() == 1 {
        if let Some(root) = stripped.get(ROOT_KEY) {
            return decode_at(root, String::new(), &meta);
        }
    }
    decode_at(&Value::Object(stripped), String::new(), &meta)
}

/// String serialization of the wire envelope.
pub fn encode_to_string(value: &RichValue, with_meta: bool) -> String {
    encode_envelope_with(value, with_meta).to_string()
}

/// Parse and decode a wire envelope from raw JSON text.
pub fn decode_from_slice(bytes: &[u8]) -> Result<RichValue, Error> {
    let value: Value =
        serde_json::from_slice(bytes).map_err(|e| Error::Parse(e.to_string()))?;
    decode_envelope(&value)
}

fn join(path: &str, segment: &str) -> String {
    if path.is_empty() {
        segment.to_string()
    } else {
        format!("{path}.{segment}")
    }
}

fn escape_key(key: &str) -> String {
    key.replace('.', "\\.")
}

fn encode_at(value: &RichValue, path: String, meta: &mut BTreeMap<String, &'static str>) -> Value {
    match value {
        RichValue::Null => Value::Null,
        RichValue::Bool(b) => Value::Bool(*b),
        RichValue::Number(n) => Value::Number(n.clone()),
        RichValue::String(s) => Value::String(s.clone()),
        RichValue::Undefined => {
            meta.insert(path, "undefined");
            Value::Null
        }
        RichValue::Date(d) => {
            meta.insert(path, "Date");
            Value::String(d.to_rfc3339_opts(SecondsFormat::Millis, true))
        }
        RichValue::Error { message } => {
            meta.insert(path, "Error");
            let mut map = Map::new();
            map.insert("message".to_string(), Value::String(message.clone()));
            Value::Object(map)
        }
        RichValue::Array(items) => Value::Array(
            items
                .iter()
                .enumerate()
                .map(|(i, item)| encode_at(item, join(&path, &i.to_string()), meta))
                .collect(),
        ),
        RichValue::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(k, v)| (k.clone(), encode_at(v, join(&path, &escape_key(k)), meta)))
                .collect(),
        ),
        RichValue::Set(items) => {
            meta.insert(path.clone(), "Set");
            Value::Array(
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| encode_at(item, join(&path, &i.to_string()), meta))
                    .collect(),
            )
        }
        RichValue::Map(entries) => {
            meta.insert(path.clone(), "Map");
            Value::Array(
                entries
                    .iter()
                    .enumerate()
                    .map(|(i, (k, v))| {
                        let entry_path = join(&path, &i.to_string());
                        Value::Array(vec![
                            encode_at(k, join(&entry_path, "0"), meta),
                            encode_at(v, join(&entry_path, "1"), meta),
                        ])
                    })
                    .collect(),
            )
        }
    }
}

fn parse_meta(meta: &Value) -> Result<BTreeMap<String, String>, Error> {
    let values = meta
        .get("values")
        .and_then(Value::as_object)
        .ok_or_else(|| Error::Parse("malformed rich-value metadata".to_string()))?;
    let mut out = BTreeMap::new();
    for (path, tag) in values {
        let tag = match tag {
            Value::String(s) => s.clone(),
            Value::Array(items) => items
                .first()
                .and_then(Value::as_str)
                .ok_or_else(|| Error::Parse(format!("empty metadata tag at '{path}'")))?
                .to_string(),
            _ => return Err(Error::Parse(format!("malformed metadata tag at '{path}'"))),
        };
        out.insert(path.clone(), tag);
    }
    Ok(out)
}

fn decode_at(
    value: &Value,
    path: String,
    meta: &BTreeMap<String, String>,
) -> Result<RichValue, Error> {
    if let Some(tag) = meta.get(&path) {
        return match tag.as_str() {
            "undefined" => Ok(RichValue::Undefined),
            "Date" => {
                let raw = value
                    .as_str()
                    .ok_or_else(|| Error::Parse(format!("expected date string at '{path}'")))?;
                let parsed = DateTime::parse_from_rfc3339(raw)
                    .map_err(|e| Error::Parse(format!("invalid date at '{path}': {e}")))?;
                Ok(RichValue::Date(parsed.with_timezone(&Utc)))
            }
            "Error" => {
                let message = value
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                Ok(RichValue::Error { message })
            }
            "Set" => {
                let items = value
                    .as_array()
                    .ok_or_else(|| Error::Parse(format!("expected array at '{path}'")))?;
                items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| decode_at(item, join(&path, &i.to_string()), meta))
                    .collect::<Result<Vec<_>, _>>()
                    .map(RichValue::Set)
            }
            "Map" => {
                let entries = value
                    .as_array()
                    .ok_or_else(|| Error::Parse(format!("expected array at '{path}'")))?;
                let mut out = Vec::with_capacity(entries.len());
                for (i, entry) in entries.iter().enumerate() {
                    let pair = entry.as_array().filter(|p| p.len() == 2).ok_or_else(|| {
                        Error::Parse(format!("expected [key, value] pair at '{path}.{i}'"))
                    })?;
                    let entry_path = join(&path, &i.to_string());
                    out.push((
                        decode_at(&pair[0], join(&entry_path, "0"), meta)?,
                        decode_at(&pair[1], join(&entry_path, "1"), meta)?,
                    ));
                }
                Ok(RichValue::Map(out))
            }
            other => Err(Error::Parse(format!("unknown metadata tag '{other}' at '{path}'"))),
        };
    }
    match value {
        Value::Null => Ok(RichValue::Null),
        Value::Bool(b) => Ok(RichValue::Bool(*b)),
        Value::Number(n) => Ok(RichValue::Number(n.clone())),
        Value::String(s) => Ok(RichValue::String(s.clone())),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, item)| decode_at(item, join(&path, &i.to_string()), meta))
            .collect::<Result<Vec<_>, _>>()
            .map(RichValue::Array),
        Value::Object(map) => map
            .iter()
            .map(|(k, v)| Ok((k.clone(), decode_at(v, join(&path, &escape_key(k)), meta)?)))
            .collect::<Result<Vec<_>, Error>>()
            .map(RichValue::Object),
    }
}
