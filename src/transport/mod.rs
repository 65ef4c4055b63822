//! Transport seam between the driver core and the network.
//!
//! The core never opens sockets, performs TLS, or speaks the auth handshake;
//! all of that lives behind the [`Transport`] trait, injected into the
//! [`crate::client::Client`]. The contract is a single command round trip:
//! send one command document, receive one reply document (or a transport
//! failure). Connection pooling is the transport's concern; the core uses a
//! connection for exactly one command or one batch fetch at a time.
//!
//! Deadlines: every call accepts an optional deadline. A transport must
//! abort the in-flight request once the deadline elapses and surface
//! [`crate::error::TransportError::Timeout`]; a timed-out command carries no
//! effect guarantee beyond at-most-once attempted. The core never retries.

pub mod mock;

use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use crate::bson::Document;
use crate::error::Result;

/// One-command-round-trip transport collaborator.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Execute one command against a database and return the raw reply.
    ///
    /// `session_id` identifies the logical session the command belongs to,
    /// when any; the command document itself already carries the session
    /// fields (`lsid`, `txnNumber`, ...) for the wire.
    async fn send_command(
        &self,
        database: &str,
        command: &Document,
        session_id: Option<Uuid>,
        deadline: Option<Duration>,
    ) -> Result<Document>;

    /// Fetch the next batch of a server-side cursor.
    ///
    /// Returns a `getMore`-shaped reply: `{ok, cursor: {id, nextBatch}}`.
    async fn fetch_more(
        &self,
        database: &str,
        collection: &str,
        cursor_id: i64,
        batch_size: Option<i64>,
        max_await_time: Option<Duration>,
        deadline: Option<Duration>,
    ) -> Result<Document>;
}
