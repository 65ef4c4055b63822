//! MongoDB extended JSON conversion.
//!
//! Two output modes, selected explicitly by the caller:
//! - canonical: every value carries its type wrapper
//!   (`{"$numberInt": "1"}`, `{"$date": {"$numberLong": "..."}}`)
//! - relaxed: the most native-looking JSON that still round-trips; values
//!   plain JSON cannot represent faithfully (non-finite doubles, 64-bit
//!   integers beyond safe f64 precision) stay wrapped even here
//!
//! Parsing accepts both modes plus plain JSON and is a construction entry
//! point independent of the builder API.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Number, Value};

use crate::bson::{Binary, Bson, Document, ObjectId, Regex, Timestamp};
use crate::error::{BsonError, Result};

/// Largest integer magnitude exactly representable in an f64.
const MAX_SAFE_INTEGER: i64 = 1 << 53;

/* ========================= output ========================= */

/// Render a document as extended JSON text.
pub fn to_json(doc: &Document, canonical: bool) -> String {
    Value::Object(document_to_value(doc, canonical)).to_string()
}

fn document_to_value(doc: &Document, canonical: bool) -> Map<String, Value> {
    let mut map = Map::new();
    for (key, value) in doc.iter() {
        map.insert(key.to_string(), bson_to_value(value, canonical));
    }
    map
}

fn wrap(key: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    Value::Object(map)
}

fn bson_to_value(value: &Bson, canonical: bool) -> Value {
    match value {
        Bson::Double(v) => {
            if canonical || !v.is_finite() {
                wrap("$numberDouble", Value::String(format_double(*v)))
            } else {
                // Finite doubles always have a JSON representation.
                Value::Number(Number::from_f64(*v).unwrap_or_else(|| Number::from(0)))
            }
        }
        Bson::String(s) => Value::String(s.clone()),
        Bson::Document(d) => Value::Object(document_to_value(d, canonical)),
        Bson::Array(items) => Value::Array(
            items
                .iter()
                .map(|item| bson_to_value(item, canonical))
                .collect(),
        ),
        Bson::Binary(bin) => {
            let mut inner = Map::new();
            inner.insert(
                "base64".to_string(),
                Value::String(BASE64.encode(&bin.bytes)),
            );
            inner.insert(
                "subType".to_string(),
                Value::String(format!("{:02x}", bin.subtype)),
            );
            wrap("$binary", Value::Object(inner))
        }
        Bson::ObjectId(oid) => wrap("$oid", Value::String(oid.to_hex())),
        Bson::Boolean(v) => Value::Bool(*v),
        Bson::DateTime(millis) => {
            if canonical {
                wrap(
                    "$date",
                    wrap("$numberLong", Value::String(millis.to_string())),
                )
            } else {
                match DateTime::<Utc>::from_timestamp_millis(*millis) {
                    Some(dt) if (0..=253_402_300_799_999).contains(millis) => wrap(
                        "$date",
                        Value::String(dt.to_rfc3339_opts(SecondsFormat::Millis, true)),
                    ),
                    // Pre-epoch and far-future dates stay numeric.
                    _ => wrap(
                        "$date",
                        wrap("$numberLong", Value::String(millis.to_string())),
                    ),
                }
            }
        }
        Bson::Null => Value::Null,
        Bson::Regex(re) => {
            let mut inner = Map::new();
            inner.insert("pattern".to_string(), Value::String(re.pattern.clone()));
            inner.insert("options".to_string(), Value::String(re.options.clone()));
            wrap("$regularExpression", Value::Object(inner))
        }
        Bson::JavaScript(code) => wrap("$code", Value::String(code.clone())),
        Bson::Int32(v) => {
            if canonical {
                wrap("$numberInt", Value::String(v.to_string()))
            } else {
                Value::Number(Number::from(*v))
            }
        }
        Bson::Timestamp(ts) => {
            let mut inner = Map::new();
            inner.insert("t".to_string(), Value::Number(Number::from(ts.time)));
            inner.insert("i".to_string(), Value::Number(Number::from(ts.increment)));
            wrap("$timestamp", Value::Object(inner))
        }
        Bson::Int64(v) => {
            // Values past safe f64 precision stay wrapped even in relaxed
            // mode so consumers never read a rounded number.
            if canonical || v.abs() > MAX_SAFE_INTEGER {
                wrap("$numberLong", Value::String(v.to_string()))
            } else {
                Value::Number(Number::from(*v))
            }
        }
        Bson::MinKey => wrap("$minKey", Value::Number(Number::from(1))),
        Bson::MaxKey => wrap("$maxKey", Value::Number(Number::from(1))),
    }
}

fn format_double(v: f64) -> String {
    if v.is_nan() {
        "NaN".to_string()
    } else if v.is_infinite() {
        if v > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if v == v.trunc() && v.abs() < 1e15 {
        format!("{v:.1}")
    } else {
        v.to_string()
    }
}

/* ========================= input ========================= */

/// Parse extended JSON text into a document.
pub fn parse_json(text: &str) -> Result<Document> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| BsonError::MalformedDocument(format!("JSON parse: {e}")))?;
    match value {
        Value::Object(map) => object_to_document(map),
        other => Err(BsonError::MalformedDocument(format!(
            "top-level JSON value must be an object, got {other}"
        ))
        .into()),
    }
}

fn object_to_document(map: Map<String, Value>) -> Result<Document> {
    let mut doc = Document::new();
    for (key, value) in map {
        doc.append(key, value_to_bson(value)?);
    }
    Ok(doc)
}

fn value_to_bson(value: Value) -> Result<Bson> {
    Ok(match value {
        Value::Null => Bson::Null,
        Value::Bool(v) => Bson::Boolean(v),
        Value::Number(n) => number_to_bson(&n)?,
        Value::String(s) => Bson::String(s),
        Value::Array(items) => Bson::Array(
            items
                .into_iter()
                .map(value_to_bson)
                .collect::<Result<Vec<_>>>()?,
        ),
        Value::Object(map) => {
            if let Some(special) = object_to_special(&map)? {
                special
            } else {
                Bson::Document(object_to_document(map)?)
            }
        }
    })
}

/// Plain JSON numbers: integers fitting i32 become Int32, wider integers
/// Int64, everything else Double. No silent narrowing beyond that rule.
fn number_to_bson(n: &Number) -> Result<Bson> {
    if let Some(v) = n.as_i64() {
        if v >= i32::MIN as i64 && v <= i32::MAX as i64 {
            return Ok(Bson::Int32(v as i32));
        }
        return Ok(Bson::Int64(v));
    }
    if let Some(v) = n.as_f64() {
        return Ok(Bson::Double(v));
    }
    Err(BsonError::MalformedDocument(format!("unrepresentable number {n}")).into())
}

/// Recognize `{"$oid": ...}`-style type wrappers. Returns `None` for plain
/// objects.
fn object_to_special(map: &Map<String, Value>) -> Result<Option<Bson>> {
    let Some(first_key) = map.keys().next() else {
        return Ok(None);
    };
    if !first_key.starts_with('$') {
        return Ok(None);
    }

    let get_str = |key: &str| -> Option<&str> { map.get(key).and_then(Value::as_str) };

    match first_key.as_str() {
        "$oid" if map.len() == 1 => {
            let hex = get_str("$oid")
                .ok_or_else(|| BsonError::MalformedDocument("$oid must be a string".into()))?;
            Ok(Some(Bson::ObjectId(ObjectId::parse_str(hex)?)))
        }
        "$numberInt" if map.len() == 1 => {
            let raw = get_str("$numberInt").ok_or_else(|| {
                BsonError::MalformedDocument("$numberInt must be a string".into())
            })?;
            let v = raw.parse::<i32>().map_err(|e| {
                BsonError::MalformedDocument(format!("$numberInt {raw:?}: {e}"))
            })?;
            Ok(Some(Bson::Int32(v)))
        }
        "$numberLong" if map.len() == 1 => {
            let raw = get_str("$numberLong").ok_or_else(|| {
                BsonError::MalformedDocument("$numberLong must be a string".into())
            })?;
            let v = raw.parse::<i64>().map_err(|e| {
                BsonError::MalformedDocument(format!("$numberLong {raw:?}: {e}"))
            })?;
            Ok(Some(Bson::Int64(v)))
        }
        "$numberDouble" if map.len() == 1 => {
            let raw = get_str("$numberDouble").ok_or_else(|| {
                BsonError::MalformedDocument("$numberDouble must be a string".into())
            })?;
            let v = match raw {
                "NaN" => f64::NAN,
                "Infinity" => f64::INFINITY,
                "-Infinity" => f64::NEG_INFINITY,
                other => other.parse::<f64>().map_err(|e| {
                    BsonError::MalformedDocument(format!("$numberDouble {other:?}: {e}"))
                })?,
            };
            Ok(Some(Bson::Double(v)))
        }
        "$date" if map.len() == 1 => match map.get("$date") {
            Some(Value::String(s)) => {
                let dt = DateTime::parse_from_rfc3339(s).map_err(|e| {
                    BsonError::MalformedDocument(format!("$date {s:?}: {e}"))
                })?;
                Ok(Some(Bson::DateTime(dt.timestamp_millis())))
            }
            Some(Value::Object(inner)) => {
                let raw = inner
                    .get("$numberLong")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        BsonError::MalformedDocument("$date object must hold $numberLong".into())
                    })?;
                let millis = raw.parse::<i64>().map_err(|e| {
                    BsonError::MalformedDocument(format!("$date {raw:?}: {e}"))
                })?;
                Ok(Some(Bson::DateTime(millis)))
            }
            _ => Err(BsonError::MalformedDocument("$date must be a string or object".into())
                .into()),
        },
        "$binary" if map.len() == 1 => {
            let inner = map
                .get("$binary")
                .and_then(Value::as_object)
                .ok_or_else(|| BsonError::MalformedDocument("$binary must be an object".into()))?;
            let payload = inner
                .get("base64")
                .and_then(Value::as_str)
                .ok_or_else(|| BsonError::MalformedDocument("$binary.base64 missing".into()))?;
            let subtype_hex = inner
                .get("subType")
                .and_then(Value::as_str)
                .unwrap_or("00");
            let bytes = BASE64.decode(payload).map_err(|e| {
                BsonError::MalformedDocument(format!("$binary.base64: {e}"))
            })?;
            let subtype = u8::from_str_radix(subtype_hex, 16).map_err(|e| {
                BsonError::MalformedDocument(format!("$binary.subType {subtype_hex:?}: {e}"))
            })?;
            Ok(Some(Bson::Binary(Binary { subtype, bytes })))
        }
        "$regularExpression" if map.len() == 1 => {
            let inner = map
                .get("$regularExpression")
                .and_then(Value::as_object)
                .ok_or_else(|| {
                    BsonError::MalformedDocument("$regularExpression must be an object".into())
                })?;
            Ok(Some(Bson::Regex(Regex {
                pattern: inner
                    .get("pattern")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string(),
                options: inner
                    .get("options")
                    .and_then(Value::as_str)
                    .unwrap_or("")
                    .to_string(),
            })))
        }
        "$code" if map.len() == 1 => {
            let code = get_str("$code")
                .ok_or_else(|| BsonError::MalformedDocument("$code must be a string".into()))?;
            Ok(Some(Bson::JavaScript(code.to_string())))
        }
        "$timestamp" if map.len() == 1 => {
            let inner = map
                .get("$timestamp")
                .and_then(Value::as_object)
                .ok_or_else(|| {
                    BsonError::MalformedDocument("$timestamp must be an object".into())
                })?;
            let time = inner.get("t").and_then(Value::as_u64).unwrap_or(0) as u32;
            let increment = inner.get("i").and_then(Value::as_u64).unwrap_or(0) as u32;
            Ok(Some(Bson::Timestamp(Timestamp { time, increment })))
        }
        "$minKey" if map.len() == 1 => Ok(Some(Bson::MinKey)),
        "$maxKey" if map.len() == 1 => Ok(Some(Bson::MaxKey)),
        // Unrecognized $-prefixed keys (query operators like $set, $gt)
        // pass through as plain embedded documents.
        _ => Ok(None),
    }
}
