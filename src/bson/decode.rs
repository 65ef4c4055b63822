//! BSON binary decoding.
//!
//! Decodes wire bytes into a [`Document`] with defensive validation:
//! - every read is bounds-checked; truncation is `MalformedDocument`
//! - string values and keys must be valid UTF-8 (`InvalidEncoding`)
//! - nesting past the configured depth limit fails instead of recursing
//! - duplicate keys within one document are resolved by a configurable policy

use crate::bson::{Binary, Bson, Document, ElementType, ObjectId, Regex, Timestamp};
use crate::error::{BsonError, Result};

/// How duplicate keys within a single encoded document are canonicalized.
///
/// The wire format permits repeated keys; decoded semantics must pick one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicateKeyPolicy {
    /// Keep the first occurrence, drop later ones (default).
    #[default]
    FirstWins,

    /// Keep the last occurrence, dropping earlier ones.
    LastWins,

    /// Fail decoding with `MalformedDocument`.
    Reject,
}

/// Options controlling decode behavior.
#[derive(Debug, Clone)]
pub struct DecodeOptions {
    /// Maximum nesting depth of embedded documents/arrays. The top-level
    /// document is depth 0. Matches the server's own nesting limit.
    pub max_depth: usize,

    /// Duplicate key canonicalization.
    pub duplicate_keys: DuplicateKeyPolicy,
}

impl Default for DecodeOptions {
    fn default() -> Self {
        DecodeOptions {
            max_depth: 100,
            duplicate_keys: DuplicateKeyPolicy::FirstWins,
        }
    }
}

/// Decode a full BSON buffer into a document.
pub fn decode_document(bytes: &[u8], options: &DecodeOptions) -> Result<Document> {
    let mut reader = Reader { buf: bytes, pos: 0 };
    let doc = read_document(&mut reader, options, 0)?;
    if reader.pos != bytes.len() {
        return Err(malformed(format!(
            "{} trailing bytes after document end",
            bytes.len() - reader.pos
        )));
    }
    Ok(doc)
}

fn malformed(msg: impl Into<String>) -> crate::error::DriverError {
    BsonError::MalformedDocument(msg.into()).into()
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(malformed(format!(
                "truncated buffer: need {n} bytes at offset {}",
                self.pos
            )));
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_i32(&mut self) -> Result<i32> {
        let b = self.take(4)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_i64(&mut self) -> Result<i64> {
        let b = self.take(8)?;
        Ok(i64::from_le_bytes(b.try_into().unwrap()))
    }

    fn read_f64(&mut self) -> Result<f64> {
        let b = self.take(8)?;
        Ok(f64::from_le_bytes(b.try_into().unwrap()))
    }

    /// NUL-terminated cstring, validated as UTF-8.
    fn read_cstring(&mut self) -> Result<&'a str> {
        let rest = &self.buf[self.pos..];
        let nul = rest
            .iter()
            .position(|&b| b == 0x00)
            .ok_or_else(|| malformed("unterminated cstring"))?;
        let raw = &rest[..nul];
        self.pos += nul + 1;
        std::str::from_utf8(raw)
            .map_err(|e| BsonError::InvalidEncoding(format!("cstring: {e}")).into())
    }

    /// Length-prefixed string including its NUL terminator.
    fn read_string(&mut self) -> Result<String> {
        let len = self.read_i32()?;
        if len < 1 {
            return Err(malformed(format!("string length {len} out of range")));
        }
        let raw = self.take(len as usize)?;
        if raw[raw.len() - 1] != 0x00 {
            return Err(malformed("string missing NUL terminator"));
        }
        std::str::from_utf8(&raw[..raw.len() - 1])
            .map(str::to_string)
            .map_err(|e| BsonError::InvalidEncoding(format!("string: {e}")).into())
    }
}

fn read_document(reader: &mut Reader<'_>, options: &DecodeOptions, depth: usize) -> Result<Document> {
    if depth > options.max_depth {
        return Err(malformed(format!(
            "nesting depth exceeds limit of {}",
            options.max_depth
        )));
    }

    let start = reader.pos;
    let len = reader.read_i32()?;
    if len < 5 || start + len as usize > reader.buf.len() {
        return Err(malformed(format!("document length {len} out of range")));
    }
    let end = start + len as usize;

    let mut doc = Document::new();
    loop {
        if reader.pos >= end {
            return Err(malformed("document missing terminator"));
        }
        let tag = reader.read_u8()?;
        if tag == 0x00 {
            break;
        }
        let key = reader.read_cstring()?.to_string();
        let value = read_value(reader, tag, options, depth)?;

        if doc.contains_key(&key) {
            match options.duplicate_keys {
                DuplicateKeyPolicy::FirstWins => {} // drop the later occurrence
                DuplicateKeyPolicy::LastWins => doc.set(key, value),
                DuplicateKeyPolicy::Reject => {
                    return Err(malformed(format!("duplicate key {key:?}")));
                }
            }
        } else {
            doc.append(key, value);
        }
    }

    if reader.pos != end {
        return Err(malformed("document length does not match content"));
    }
    Ok(doc)
}

/// Arrays are encoded as documents keyed "0", "1", ...; restore them as an
/// ordered sequence and insist on the monotonic-index pattern.
fn read_array(reader: &mut Reader<'_>, options: &DecodeOptions, depth: usize) -> Result<Vec<Bson>> {
    if depth > options.max_depth {
        return Err(malformed(format!(
            "nesting depth exceeds limit of {}",
            options.max_depth
        )));
    }

    let start = reader.pos;
    let len = reader.read_i32()?;
    if len < 5 || start + len as usize > reader.buf.len() {
        return Err(malformed(format!("array length {len} out of range")));
    }
    let end = start + len as usize;

    let mut items = Vec::new();
    loop {
        if reader.pos >= end {
            return Err(malformed("array missing terminator"));
        }
        let tag = reader.read_u8()?;
        if tag == 0x00 {
            break;
        }
        let key = reader.read_cstring()?;
        if key != items.len().to_string() {
            return Err(malformed(format!(
                "array key {key:?} does not match index {}",
                items.len()
            )));
        }
        items.push(read_value(reader, tag, options, depth)?);
    }

    if reader.pos != end {
        return Err(malformed("array length does not match content"));
    }
    Ok(items)
}

fn read_value(
    reader: &mut Reader<'_>,
    tag: u8,
    options: &DecodeOptions,
    depth: usize,
) -> Result<Bson> {
    let element_type = ElementType::from_tag(tag)
        .ok_or_else(|| malformed(format!("unknown element tag 0x{tag:02X}")))?;

    Ok(match element_type {
        ElementType::Double => Bson::Double(reader.read_f64()?),
        ElementType::String => Bson::String(reader.read_string()?),
        ElementType::Document => Bson::Document(read_document(reader, options, depth + 1)?),
        ElementType::Array => Bson::Array(read_array(reader, options, depth + 1)?),
        ElementType::Binary => {
            let len = reader.read_i32()?;
            if len < 0 {
                return Err(malformed(format!("binary length {len} out of range")));
            }
            let subtype = reader.read_u8()?;
            let bytes = reader.take(len as usize)?.to_vec();
            Bson::Binary(Binary { subtype, bytes })
        }
        ElementType::ObjectId => {
            let raw = reader.take(12)?;
            let mut bytes = [0u8; 12];
            bytes.copy_from_slice(raw);
            Bson::ObjectId(ObjectId::from_bytes(bytes))
        }
        ElementType::Boolean => match reader.read_u8()? {
            0x00 => Bson::Boolean(false),
            0x01 => Bson::Boolean(true),
            other => return Err(malformed(format!("invalid boolean byte 0x{other:02X}"))),
        },
        ElementType::DateTime => Bson::DateTime(reader.read_i64()?),
        ElementType::Null => Bson::Null,
        ElementType::Regex => {
            let pattern = reader.read_cstring()?.to_string();
            let flags = reader.read_cstring()?.to_string();
            Bson::Regex(Regex {
                pattern,
                options: flags,
            })
        }
        ElementType::JavaScript => Bson::JavaScript(reader.read_string()?),
        ElementType::Int32 => Bson::Int32(reader.read_i32()?),
        ElementType::Timestamp => {
            let increment = reader.read_u32()?;
            let time = reader.read_u32()?;
            Bson::Timestamp(Timestamp { time, increment })
        }
        ElementType::Int64 => Bson::Int64(reader.read_i64()?),
        ElementType::MinKey => Bson::MinKey,
        ElementType::MaxKey => Bson::MaxKey,
    })
}
