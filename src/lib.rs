//! MongoDB Driver Core Library
//!
//! This library provides the core building blocks of a MongoDB client
//! driver: a BSON codec, a command/result layer, cursors, sessions with
//! transactions, and a client handle bound to an injected transport.
//!
//! # Modules
//!
//! - `bson`: BSON value model, encoder/decoder, raw iterator, extended JSON
//! - `client`: Client/Database/Collection handles and URI parsing
//! - `cursor`: Batched server-side cursor state machine
//! - `error`: Error types and handling
//! - `ops`: High-level operations and their typed results
//! - `session`: Sessions and multi-statement transactions
//! - `transport`: The transport seam and an in-memory implementation
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use mongocore::{Client, Document, ops::FindOptions};
//! use mongocore::transport::mock::MockTransport;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = Arc::new(MockTransport::new());
//!     let client = Client::with_transport("mongodb://localhost:27017/app", transport)?;
//!
//!     let orders = client.database("app").collection("orders");
//!     orders.insert_one(Document::new().with("n", 1), None, None).await?;
//!
//!     let mut cursor = orders
//!         .find(Document::new(), FindOptions::default(), None, None)
//!         .await?;
//!     while let Some(doc) = cursor.try_next().await? {
//!         println!("{}", doc.as_json(false));
//!     }
//!     Ok(())
//! }
//! ```

pub mod bson;
pub mod client;
pub mod cursor;
pub mod error;
pub mod ops;
pub mod session;
pub mod transport;

// Re-export commonly used types
pub use bson::{Binary, Bson, Document, ObjectId, Regex, Timestamp};
pub use client::{Client, ClientOptions, ClientUri, Collection, Database};
pub use cursor::Cursor;
pub use error::{DriverError, Result};
pub use ops::{FindOptions, InsertManyResult, InsertOneResult, UpdateResult};
pub use session::{ClientSession, TransactionState};
pub use transport::Transport;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library version string
///
/// # Returns
/// * `&str` - Version string
pub fn version() -> &'static str {
    VERSION
}

/// Initialize process-wide driver state.
///
/// Seeds the [`ObjectId`] generator. Safe to call more than once; later
/// calls are no-ops.
pub fn init() {
    bson::oid::seed_generator();
    tracing::debug!(version = VERSION, "driver core initialized");
}

/// Tear down process-wide driver state.
///
/// The counterpart of [`init`]. The generator state is process-scoped and
/// has no resources to release, so this only marks the lifecycle boundary.
/// Idempotent.
pub fn cleanup() {
    tracing::debug!("driver core cleanup");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }

    #[test]
    fn test_init_is_idempotent() {
        init();
        init();
        assert!(!ObjectId::new().to_hex().is_empty());
    }
}
