//! Zero-copy iteration over an encoded BSON buffer.
//!
//! `RawIter` walks a document's wire bytes without decoding values it is not
//! asked for. It is a transient, forward-only, one-pass cursor:
//! - no heap ownership; it borrows the buffer for its whole lifetime
//! - `advance` moves strictly forward and returns `false` at the end
//! - typed accessors fail with `TypeMismatch` when the element's tag differs
//!
//! Iteration is read-only; any number of independent iterators may walk the
//! same buffer without coordination.

use crate::bson::{ElementType, ObjectId};
use crate::error::{BsonError, Result};

/// A forward-only cursor over one encoded document's bytes.
pub struct RawIter<'a> {
    buf: &'a [u8],
    /// Offset of the next unread element tag.
    pos: usize,
    /// Offset of the document's trailing 0x00.
    end: usize,
    current: Option<RawElement<'a>>,
}

struct RawElement<'a> {
    key: &'a str,
    element_type: ElementType,
    value: &'a [u8],
}

impl<'a> RawIter<'a> {
    /// Begin iterating over an encoded document.
    ///
    /// Validates only the length header; element validation happens as the
    /// iterator advances.
    pub fn new(buf: &'a [u8]) -> Result<Self> {
        if buf.len() < 5 {
            return Err(malformed("buffer shorter than minimal document"));
        }
        let len = i32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if len < 5 || len > buf.len() {
            return Err(malformed(format!("document length {len} out of range")));
        }
        if buf[len - 1] != 0x00 {
            return Err(malformed("document missing terminator"));
        }
        Ok(RawIter {
            buf,
            pos: 4,
            end: len - 1,
            current: None,
        })
    }

    /// Advance to the next element. Returns `false` at the end of the
    /// document; the current element is cleared once the end is reached.
    pub fn advance(&mut self) -> Result<bool> {
        if self.pos >= self.end {
            self.current = None;
            return Ok(false);
        }

        let tag = self.buf[self.pos];
        if tag == 0x00 {
            self.current = None;
            self.pos = self.end;
            return Ok(false);
        }
        let element_type = ElementType::from_tag(tag)
            .ok_or_else(|| malformed(format!("unknown element tag 0x{tag:02X}")))?;
        self.pos += 1;

        let key = self.read_cstring()?;
        let value_len = self.value_length(element_type)?;
        if self.pos + value_len > self.end {
            return Err(malformed("element value overruns document"));
        }
        let value = &self.buf[self.pos..self.pos + value_len];
        self.pos += value_len;

        self.current = Some(RawElement {
            key,
            element_type,
            value,
        });
        Ok(true)
    }

    /// Key of the current element.
    pub fn key(&self) -> Option<&'a str> {
        self.current.as_ref().map(|e| e.key)
    }

    /// Type tag of the current element.
    pub fn element_type(&self) -> Option<ElementType> {
        self.current.as_ref().map(|e| e.element_type)
    }

    /* ---------------- typed accessors ---------------- */

    /// Current element as a UTF-8 string.
    pub fn as_str(&self) -> Result<&'a str> {
        let value = self.expect(ElementType::String)?;
        read_string(value)
    }

    /// Current element as JavaScript code.
    pub fn as_javascript(&self) -> Result<&'a str> {
        let value = self.expect(ElementType::JavaScript)?;
        read_string(value)
    }

    /// Current element as an i32.
    pub fn as_i32(&self) -> Result<i32> {
        let value = self.expect(ElementType::Int32)?;
        Ok(i32::from_le_bytes(value.try_into().unwrap()))
    }

    /// Current element as an i64.
    pub fn as_i64(&self) -> Result<i64> {
        let value = self.expect(ElementType::Int64)?;
        Ok(i64::from_le_bytes(value.try_into().unwrap()))
    }

    /// Current element as an f64.
    pub fn as_f64(&self) -> Result<f64> {
        let value = self.expect(ElementType::Double)?;
        Ok(f64::from_le_bytes(value.try_into().unwrap()))
    }

    /// Current element as a boolean.
    pub fn as_bool(&self) -> Result<bool> {
        let value = self.expect(ElementType::Boolean)?;
        match value[0] {
            0x00 => Ok(false),
            0x01 => Ok(true),
            other => Err(malformed(format!("invalid boolean byte 0x{other:02X}"))),
        }
    }

    /// Current element as an ObjectId.
    pub fn as_object_id(&self) -> Result<ObjectId> {
        let value = self.expect(ElementType::ObjectId)?;
        let mut bytes = [0u8; 12];
        bytes.copy_from_slice(value);
        Ok(ObjectId::from_bytes(bytes))
    }

    /// Current element as a UTC datetime in milliseconds since the epoch.
    pub fn as_datetime(&self) -> Result<i64> {
        let value = self.expect(ElementType::DateTime)?;
        Ok(i64::from_le_bytes(value.try_into().unwrap()))
    }

    /// Encoded bytes of the current embedded document, suitable for a
    /// nested [`RawIter`].
    pub fn as_document_bytes(&self) -> Result<&'a [u8]> {
        self.expect(ElementType::Document)
    }

    /// Encoded bytes of the current embedded array.
    pub fn as_array_bytes(&self) -> Result<&'a [u8]> {
        self.expect(ElementType::Array)
    }

    /* ---------------- internals ---------------- */

    fn expect(&self, expected: ElementType) -> Result<&'a [u8]> {
        let element = self
            .current
            .as_ref()
            .ok_or_else(|| malformed("iterator is not positioned on an element"))?;
        if element.element_type != expected {
            return Err(BsonError::TypeMismatch {
                expected,
                actual: element.element_type,
            }
            .into());
        }
        Ok(element.value)
    }

    fn read_cstring(&mut self) -> Result<&'a str> {
        let rest = &self.buf[self.pos..self.end];
        let nul = rest
            .iter()
            .position(|&b| b == 0x00)
            .ok_or_else(|| malformed("unterminated key"))?;
        let raw = &rest[..nul];
        self.pos += nul + 1;
        std::str::from_utf8(raw)
            .map_err(|e| BsonError::InvalidEncoding(format!("key: {e}")).into())
    }

    /// Byte length of the value at `self.pos` for the given type.
    fn value_length(&mut self, element_type: ElementType) -> Result<usize> {
        Ok(match element_type {
            ElementType::Double | ElementType::DateTime | ElementType::Int64 => 8,
            ElementType::Timestamp => 8,
            ElementType::Int32 => 4,
            ElementType::Boolean => 1,
            ElementType::ObjectId => 12,
            ElementType::Null | ElementType::MinKey | ElementType::MaxKey => 0,
            ElementType::String | ElementType::JavaScript => {
                4 + self.peek_i32(0)?.max(0) as usize
            }
            ElementType::Document | ElementType::Array => self.peek_i32(0)?.max(0) as usize,
            ElementType::Binary => 4 + 1 + self.peek_i32(0)?.max(0) as usize,
            ElementType::Regex => {
                // Two consecutive cstrings; scan for both terminators.
                let rest = &self.buf[self.pos..self.end];
                let first = rest
                    .iter()
                    .position(|&b| b == 0x00)
                    .ok_or_else(|| malformed("unterminated regex pattern"))?;
                let second = rest[first + 1..]
                    .iter()
                    .position(|&b| b == 0x00)
                    .ok_or_else(|| malformed("unterminated regex options"))?;
                first + 1 + second + 1
            }
        })
    }

    fn peek_i32(&self, offset: usize) -> Result<i32> {
        let at = self.pos + offset;
        if at + 4 > self.end {
            return Err(malformed("truncated length prefix"));
        }
        Ok(i32::from_le_bytes([
            self.buf[at],
            self.buf[at + 1],
            self.buf[at + 2],
            self.buf[at + 3],
        ]))
    }
}

fn malformed(msg: impl Into<String>) -> crate::error::DriverError {
    BsonError::MalformedDocument(msg.into()).into()
}

/// Read a length-prefixed string value slice.
fn read_string(value: &[u8]) -> Result<&str> {
    if value.len() < 5 {
        return Err(malformed("truncated string value"));
    }
    let len = i32::from_le_bytes([value[0], value[1], value[2], value[3]]);
    if len < 1 || 4 + len as usize != value.len() {
        return Err(malformed(format!("string length {len} out of range")));
    }
    let raw = &value[4..value.len() - 1];
    if value[value.len() - 1] != 0x00 {
        return Err(malformed("string missing NUL terminator"));
    }
    std::str::from_utf8(raw)
        .map_err(|e| BsonError::InvalidEncoding(format!("string: {e}")).into())
}
