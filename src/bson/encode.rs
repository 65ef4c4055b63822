//! BSON binary encoding.
//!
//! Encodes a [`Document`] into the wire format: a little-endian i32 length
//! prefix, a sequence of type-tagged elements with NUL-terminated cstring
//! keys, and a trailing 0x00. Output is byte-exact against the BSON
//! specification so any MongoDB-compatible server can consume it.

use crate::bson::{Bson, Document};
use crate::error::{BsonError, Result};

/// Encode a document to its BSON byte representation.
pub fn encode_document(doc: &Document) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(64);
    write_document(&mut buf, doc)?;
    Ok(buf)
}

fn write_document(buf: &mut Vec<u8>, doc: &Document) -> Result<()> {
    let start = buf.len();
    buf.extend_from_slice(&[0u8; 4]);

    for (key, value) in doc.iter() {
        write_element(buf, key, value)?;
    }

    buf.push(0x00);
    patch_length(buf, start);
    Ok(())
}

fn write_array(buf: &mut Vec<u8>, items: &[Bson]) -> Result<()> {
    let start = buf.len();
    buf.extend_from_slice(&[0u8; 4]);

    // Arrays are documents keyed by decimal 0-based indices, in order.
    let mut key = String::with_capacity(4);
    for (index, item) in items.iter().enumerate() {
        key.clear();
        let mut n = index;
        // usize to decimal without a per-item allocation
        if n == 0 {
            key.push('0');
        } else {
            let mut digits = [0u8; 20];
            let mut len = 0;
            while n > 0 {
                digits[len] = b'0' + (n % 10) as u8;
                n /= 10;
                len += 1;
            }
            for d in digits[..len].iter().rev() {
                key.push(*d as char);
            }
        }
        write_element(buf, &key, item)?;
    }

    buf.push(0x00);
    patch_length(buf, start);
    Ok(())
}

fn write_element(buf: &mut Vec<u8>, key: &str, value: &Bson) -> Result<()> {
    buf.push(value.element_type() as u8);
    write_cstring(buf, key)?;

    match value {
        Bson::Double(v) => buf.extend_from_slice(&v.to_le_bytes()),
        Bson::String(s) | Bson::JavaScript(s) => write_string(buf, s),
        Bson::Document(d) => write_document(buf, d)?,
        Bson::Array(items) => write_array(buf, items)?,
        Bson::Binary(bin) => {
            buf.extend_from_slice(&(bin.bytes.len() as i32).to_le_bytes());
            buf.push(bin.subtype);
            buf.extend_from_slice(&bin.bytes);
        }
        Bson::ObjectId(oid) => buf.extend_from_slice(&oid.bytes()),
        Bson::Boolean(v) => buf.push(if *v { 0x01 } else { 0x00 }),
        Bson::DateTime(millis) => buf.extend_from_slice(&millis.to_le_bytes()),
        Bson::Null | Bson::MinKey | Bson::MaxKey => {}
        Bson::Regex(re) => {
            write_cstring(buf, &re.pattern)?;
            write_cstring(buf, &re.options)?;
        }
        Bson::Int32(v) => buf.extend_from_slice(&v.to_le_bytes()),
        Bson::Timestamp(ts) => {
            buf.extend_from_slice(&ts.increment.to_le_bytes());
            buf.extend_from_slice(&ts.time.to_le_bytes());
        }
        Bson::Int64(v) => buf.extend_from_slice(&v.to_le_bytes()),
    }

    Ok(())
}

/// Length-prefixed string: i32 byte count including the terminator, bytes, 0x00.
fn write_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&((s.len() + 1) as i32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
    buf.push(0x00);
}

/// NUL-terminated cstring; interior NUL bytes cannot be represented.
fn write_cstring(buf: &mut Vec<u8>, s: &str) -> Result<()> {
    if s.as_bytes().contains(&0x00) {
        return Err(
            BsonError::MalformedDocument(format!("key or pattern contains NUL: {s:?}")).into(),
        );
    }
    buf.extend_from_slice(s.as_bytes());
    buf.push(0x00);
    Ok(())
}

fn patch_length(buf: &mut Vec<u8>, start: usize) {
    let len = (buf.len() - start) as i32;
    buf[start..start + 4].copy_from_slice(&len.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use crate::bson::{Bson, Document};

    #[test]
    fn test_empty_document() {
        let doc = Document::new();
        // Smallest valid document: 5 bytes.
        assert_eq!(doc.to_bytes().unwrap(), vec![5, 0, 0, 0, 0]);
    }

    #[test]
    fn test_int32_element_layout() {
        let mut doc = Document::new();
        doc.append("a", 1i32);
        let bytes = doc.to_bytes().unwrap();
        assert_eq!(
            bytes,
            vec![
                0x0C, 0x00, 0x00, 0x00, // length 12
                0x10, b'a', 0x00, // int32 tag, key "a"
                0x01, 0x00, 0x00, 0x00, // value 1
                0x00, // terminator
            ]
        );
    }

    #[test]
    fn test_nul_in_key_is_rejected() {
        let mut doc = Document::new();
        doc.append("a\0b", 1i32);
        assert!(doc.to_bytes().is_err());
    }

    #[test]
    fn test_array_uses_index_keys() {
        let mut doc = Document::new();
        doc.append("xs", vec![Bson::Int32(7), Bson::Int32(8)]);
        let bytes = doc.to_bytes().unwrap();
        // The embedded array document must contain cstring keys "0" and "1".
        let needle0 = [0x10, b'0', 0x00, 0x07];
        let needle1 = [0x10, b'1', 0x00, 0x08];
        assert!(bytes.windows(4).any(|w| w == needle0));
        assert!(bytes.windows(4).any(|w| w == needle1));
    }
}
