//! ObjectId generation and formatting.
//!
//! A BSON ObjectId is 12 raw bytes:
//! - 4-byte big-endian seconds since the Unix epoch
//! - 5-byte per-process random value
//! - 3-byte big-endian monotonic counter, randomly seeded
//!
//! The per-process random value and counter seed are drawn once per process;
//! [`crate::init`] forces that draw eagerly.

use std::fmt;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU32, Ordering};

use crate::error::{BsonError, Result};

struct Generator {
    process_random: [u8; 5],
    counter: AtomicU32,
}

static GENERATOR: OnceLock<Generator> = OnceLock::new();

fn generator() -> &'static Generator {
    GENERATOR.get_or_init(|| {
        let seed = uuid::Uuid::new_v4();
        let bytes = seed.as_bytes();

        let mut process_random = [0u8; 5];
        process_random.copy_from_slice(&bytes[0..5]);

        let counter_seed =
            u32::from_be_bytes([0, bytes[5], bytes[6], bytes[7]]) & 0x00FF_FFFF;

        Generator {
            process_random,
            counter: AtomicU32::new(counter_seed),
        }
    })
}

/// Eagerly seed the process-wide generator. Idempotent.
pub(crate) fn seed_generator() {
    let _ = generator();
}

/// A 12-byte globally-unique-with-high-probability identifier.
///
/// Generated automatically at insert time for documents lacking an `_id`
/// field; immutable thereafter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
    /// Generate a fresh id from the current time and the process generator.
    pub fn new() -> Self {
        let seconds = chrono::Utc::now().timestamp().max(0) as u32;
        let generator = generator();
        let count = generator.counter.fetch_add(1, Ordering::Relaxed) & 0x00FF_FFFF;

        let mut bytes = [0u8; 12];
        bytes[0..4].copy_from_slice(&seconds.to_be_bytes());
        bytes[4..9].copy_from_slice(&generator.process_random);
        bytes[9..12].copy_from_slice(&count.to_be_bytes()[1..4]);
        ObjectId(bytes)
    }

    /// Wrap 12 raw bytes.
    pub fn from_bytes(bytes: [u8; 12]) -> Self {
        ObjectId(bytes)
    }

    /// The raw 12 bytes.
    pub fn bytes(&self) -> [u8; 12] {
        self.0
    }

    /// Parse from a 24-character hex string.
    pub fn parse_str(s: &str) -> Result<Self> {
        if s.len() != 24 {
            return Err(BsonError::InvalidEncoding(format!(
                "ObjectId hex string must be 24 characters, got {}",
                s.len()
            ))
            .into());
        }
        let raw = hex::decode(s).map_err(|e| {
            BsonError::InvalidEncoding(format!("ObjectId hex string: {e}"))
        })?;
        let mut bytes = [0u8; 12];
        bytes.copy_from_slice(&raw);
        Ok(ObjectId(bytes))
    }

    /// Render as a 24-character lowercase hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// The embedded creation time, seconds since the Unix epoch.
    pub fn timestamp(&self) -> i64 {
        u32::from_be_bytes([self.0[0], self.0[1], self.0[2], self.0[3]]) as i64
    }
}

impl Default for ObjectId {
    fn default() -> Self {
        ObjectId::new()
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_ids_are_unique() {
        let a = ObjectId::new();
        let b = ObjectId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_counter_increments() {
        let a = ObjectId::new();
        let b = ObjectId::new();
        // Same process random block.
        assert_eq!(a.bytes()[4..9], b.bytes()[4..9]);
        assert_ne!(a.bytes()[9..12], b.bytes()[9..12]);
    }

    #[test]
    fn test_hex_round_trip() {
        let oid = ObjectId::new();
        let parsed = ObjectId::parse_str(&oid.to_hex()).unwrap();
        assert_eq!(oid, parsed);
    }

    #[test]
    fn test_parse_rejects_bad_input() {
        assert!(ObjectId::parse_str("abc").is_err());
        assert!(ObjectId::parse_str("zzzzzzzzzzzzzzzzzzzzzzzz").is_err());
    }

    #[test]
    fn test_timestamp_is_recent() {
        let oid = ObjectId::new();
        let now = chrono::Utc::now().timestamp();
        assert!((now - oid.timestamp()).abs() < 5);
    }
}
