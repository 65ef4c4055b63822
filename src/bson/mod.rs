//! BSON value model and codec.
//!
//! This module provides a from-scratch implementation of the BSON binary
//! format including:
//! - `Bson`: the closed set of representable value types
//! - `Document`: an ordered key/value mapping with builder-style construction
//! - Binary encode/decode, byte-exact against the BSON specification
//! - Zero-copy iteration over encoded buffers
//! - MongoDB extended JSON input and output (canonical and relaxed)
//!
//! # Example
//!
//! ```rust
//! use mongocore::bson::{Bson, Document};
//!
//! let mut doc = Document::new();
//! doc.append("name", "alice");
//! doc.append("age", 30i32);
//!
//! let bytes = doc.to_bytes().unwrap();
//! let decoded = Document::from_bytes(&bytes).unwrap();
//! assert_eq!(doc, decoded);
//! ```

pub mod decode;
pub mod encode;
pub mod extjson;
pub mod iter;
pub mod oid;


pub use decode::{DecodeOptions, DuplicateKeyPolicy};
pub use iter::RawIter;
pub use oid::ObjectId;

use crate::error::Result;

/// BSON element type tags as they appear on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ElementType {
    Double = 0x01,
    String = 0x02,
    Document = 0x03,
    Array = 0x04,
    Binary = 0x05,
    ObjectId = 0x07,
    Boolean = 0x08,
    DateTime = 0x09,
    Null = 0x0A,
    Regex = 0x0B,
    JavaScript = 0x0D,
    Int32 = 0x10,
    Timestamp = 0x11,
    Int64 = 0x12,
    MinKey = 0xFF,
    MaxKey = 0x7F,
}

impl ElementType {
    /// Map a wire tag byte to an element type.
    pub fn from_tag(tag: u8) -> Option<ElementType> {
        Some(match tag {
            0x01 => ElementType::Double,
            0x02 => ElementType::String,
            0x03 => ElementType::Document,
            0x04 => ElementType::Array,
            0x05 => ElementType::Binary,
            0x07 => ElementType::ObjectId,
            0x08 => ElementType::Boolean,
            0x09 => ElementType::DateTime,
            0x0A => ElementType::Null,
            0x0B => ElementType::Regex,
            0x0D => ElementType::JavaScript,
            0x10 => ElementType::Int32,
            0x11 => ElementType::Timestamp,
            0x12 => ElementType::Int64,
            0xFF => ElementType::MinKey,
            0x7F => ElementType::MaxKey,
            _ => return None,
        })
    }
}

/// A binary blob with a subtype byte.
#[derive(Debug, Clone, PartialEq)]
pub struct Binary {
    /// BSON binary subtype (0x00 generic, 0x04 UUID, ...).
    pub subtype: u8,

    /// Raw payload bytes.
    pub bytes: Vec<u8>,
}

impl Binary {
    /// Generic (subtype 0) binary from raw bytes.
    pub fn generic(bytes: Vec<u8>) -> Self {
        Binary { subtype: 0, bytes }
    }

    /// UUID (subtype 4) binary from a uuid value.
    pub fn from_uuid(uuid: uuid::Uuid) -> Self {
        Binary {
            subtype: 0x04,
            bytes: uuid.as_bytes().to_vec(),
        }
    }
}

/// A regular expression value: pattern plus option flags.
#[derive(Debug, Clone, PartialEq)]
pub struct Regex {
    pub pattern: String,
    pub options: String,
}

/// An internal MongoDB timestamp (not a wall-clock datetime).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
    pub time: u32,
    pub increment: u32,
}

/// A single BSON value.
///
/// This is the closed variant set of the BSON wire format supported by the
/// driver core. The three numeric kinds are distinct wire types and are
/// never coerced into one another.
#[derive(Debug, Clone, PartialEq)]
pub enum Bson {
    /// 64-bit IEEE 754 floating point.
    Double(f64),

    /// UTF-8 string.
    String(String),

    /// Embedded document.
    Document(Document),

    /// Embedded array (encoded as a document keyed "0", "1", ...).
    Array(Vec<Bson>),

    /// Binary blob with subtype.
    Binary(Binary),

    /// 12-byte object identifier.
    ObjectId(ObjectId),

    /// Boolean.
    Boolean(bool),

    /// UTC datetime, milliseconds since the Unix epoch.
    DateTime(i64),

    /// Null.
    Null,

    /// Regular expression.
    Regex(Regex),

    /// JavaScript code.
    JavaScript(String),

    /// 32-bit signed integer.
    Int32(i32),

    /// Internal timestamp.
    Timestamp(Timestamp),

    /// 64-bit signed integer.
    Int64(i64),

    /// Min-key sentinel, sorts before every other value.
    MinKey,

    /// Max-key sentinel, sorts after every other value.
    MaxKey,
}

impl Bson {
    /// The wire type tag of this value.
    pub fn element_type(&self) -> ElementType {
        match self {
            Bson::Double(_) => ElementType::Double,
            Bson::String(_) => ElementType::String,
            Bson::Document(_) => ElementType::Document,
            Bson::Array(_) => ElementType::Array,
            Bson::Binary(_) => ElementType::Binary,
            Bson::ObjectId(_) => ElementType::ObjectId,
            Bson::Boolean(_) => ElementType::Boolean,
            Bson::DateTime(_) => ElementType::DateTime,
            Bson::Null => ElementType::Null,
            Bson::Regex(_) => ElementType::Regex,
            Bson::JavaScript(_) => ElementType::JavaScript,
            Bson::Int32(_) => ElementType::Int32,
            Bson::Timestamp(_) => ElementType::Timestamp,
            Bson::Int64(_) => ElementType::Int64,
            Bson::MinKey => ElementType::MinKey,
            Bson::MaxKey => ElementType::MaxKey,
        }
    }

    /// Exact integer value for Int32/Int64, without coercing doubles.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Bson::Int32(v) => Some(*v as i64),
            Bson::Int64(v) => Some(*v),
            _ => None,
        }
    }
}

/// An ordered mapping from string keys to BSON values.
///
/// Insertion order is preserved and significant on the wire. Keys are not
/// required to be unique in an encoded document; lookup via [`Document::get`]
/// returns the first occurrence (see [`DuplicateKeyPolicy`] for decode-time
/// handling).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Document {
    entries: Vec<(String, Bson)>,
}

impl Document {
    /// Create an empty document.
    pub fn new() -> Self {
        Document {
            entries: Vec::new(),
        }
    }

    /// Append a key/value pair, preserving insertion order.
    pub fn append(&mut self, key: impl Into<String>, value: impl Into<Bson>) {
        self.entries.push((key.into(), value.into()));
    }

    /// Builder-style append, consuming and returning the document.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Bson>) -> Self {
        self.append(key, value);
        self
    }

    /// First value stored under `key`, if any.
    pub fn get(&self, key: &str) -> Option<&Bson> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Whether any entry uses `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Remove every entry under `key`, returning the first removed value.
    pub fn remove(&mut self, key: &str) -> Option<Bson> {
        let first = self
            .entries
            .iter()
            .position(|(k, _)| k == key)
            .map(|idx| self.entries.remove(idx).1);
        self.entries.retain(|(k, _)| k != key);
        first
    }

    /// Replace the first entry under `key`, or append when absent.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Bson>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the document has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Bson)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /* ---------------- typed accessors ---------------- */

    /// String value under `key`, when present and string-typed.
    pub fn get_str(&self, key: &str) -> Option<&str> {
        match self.get(key) {
            Some(Bson::String(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Int32 value under `key`.
    pub fn get_i32(&self, key: &str) -> Option<i32> {
        match self.get(key) {
            Some(Bson::Int32(v)) => Some(*v),
            _ => None,
        }
    }

    /// Int64 value under `key`.
    pub fn get_i64(&self, key: &str) -> Option<i64> {
        match self.get(key) {
            Some(Bson::Int64(v)) => Some(*v),
            _ => None,
        }
    }

    /// Integer value under `key`, accepting either integer wire type.
    ///
    /// Doubles are deliberately not accepted; int/double coercion is never
    /// implicit.
    pub fn get_as_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(Bson::as_integer)
    }

    /// Double value under `key`.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        match self.get(key) {
            Some(Bson::Double(v)) => Some(*v),
            _ => None,
        }
    }

    /// Boolean value under `key`.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key) {
            Some(Bson::Boolean(v)) => Some(*v),
            _ => None,
        }
    }

    /// Embedded document under `key`.
    pub fn get_document(&self, key: &str) -> Option<&Document> {
        match self.get(key) {
            Some(Bson::Document(d)) => Some(d),
            _ => None,
        }
    }

    /// Embedded array under `key`.
    pub fn get_array(&self, key: &str) -> Option<&[Bson]> {
        match self.get(key) {
            Some(Bson::Array(a)) => Some(a.as_slice()),
            _ => None,
        }
    }

    /// ObjectId under `key`.
    pub fn get_object_id(&self, key: &str) -> Option<ObjectId> {
        match self.get(key) {
            Some(Bson::ObjectId(oid)) => Some(*oid),
            _ => None,
        }
    }

    /* ---------------- codec entry points ---------------- */

    /// Encode to BSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        encode::encode_document(self)
    }

    /// Decode from BSON bytes with default options.
    pub fn from_bytes(bytes: &[u8]) -> Result<Document> {
        decode::decode_document(bytes, &DecodeOptions::default())
    }

    /// Decode from BSON bytes with explicit options.
    pub fn from_bytes_with(bytes: &[u8], options: &DecodeOptions) -> Result<Document> {
        decode::decode_document(bytes, options)
    }

    /// Parse a document from (extended) JSON text.
    pub fn from_json(text: &str) -> Result<Document> {
        extjson::parse_json(text)
    }

    /// Render as extended JSON text.
    ///
    /// With `canonical = true` every value carries an explicit type wrapper
    /// (`{"$numberInt": "1"}`); with `canonical = false` values use the most
    /// native-looking JSON representation that does not lose type
    /// information.
    pub fn as_json(&self, canonical: bool) -> String {
        extjson::to_json(self, canonical)
    }
}

impl<'a> IntoIterator for &'a Document {
    type Item = (&'a str, &'a Bson);
    type IntoIter = std::vec::IntoIter<(&'a str, &'a Bson)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries
            .iter()
            .map(|(k, v)| (k.as_str(), v))
            .collect::<Vec<_>>()
            .into_iter()
    }
}

impl FromIterator<(String, Bson)> for Document {
    fn from_iter<T: IntoIterator<Item = (String, Bson)>>(iter: T) -> Self {
        Document {
            entries: iter.into_iter().collect(),
        }
    }
}

/* ---------------- value conversions ---------------- */

impl From<f64> for Bson {
    fn from(v: f64) -> Self {
        Bson::Double(v)
    }
}

impl From<i32> for Bson {
    fn from(v: i32) -> Self {
        Bson::Int32(v)
    }
}

impl From<i64> for Bson {
    fn from(v: i64) -> Self {
        Bson::Int64(v)
    }
}

impl From<bool> for Bson {
    fn from(v: bool) -> Self {
        Bson::Boolean(v)
    }
}

impl From<&str> for Bson {
    fn from(v: &str) -> Self {
        Bson::String(v.to_string())
    }
}

impl From<String> for Bson {
    fn from(v: String) -> Self {
        Bson::String(v)
    }
}

impl From<Document> for Bson {
    fn from(v: Document) -> Self {
        Bson::Document(v)
    }
}

impl From<Vec<Bson>> for Bson {
    fn from(v: Vec<Bson>) -> Self {
        Bson::Array(v)
    }
}

impl From<ObjectId> for Bson {
    fn from(v: ObjectId) -> Self {
        Bson::ObjectId(v)
    }
}

impl From<Binary> for Bson {
    fn from(v: Binary) -> Self {
        Bson::Binary(v)
    }
}
