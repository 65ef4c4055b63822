//! Typed operation results.
//!
//! Each write operation interprets the raw server reply into one of these
//! structures. Bulk results carry per-item identifiers and errors in the
//! caller's input order.

use crate::bson::Bson;
use crate::error::WriteError;

/// Result of `insert_one`.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertOneResult {
    /// The `_id` of the inserted document: caller-supplied when present,
    /// auto-generated otherwise.
    pub inserted_id: Bson,
}

/// Result of `insert_many`.
///
/// A partial failure is still an `Ok` result carrying both the successful
/// identifiers and the per-item errors; only command-level failures
/// (transport, `ok: 0`) are `Err`.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertManyResult {
    /// Number of documents the server stored.
    pub inserted_count: u64,

    /// Identifiers of the stored documents, in input order. In ordered
    /// mode this is the prefix before the first failure; in unordered mode
    /// every non-failing item appears.
    pub inserted_ids: Vec<Bson>,

    /// Per-item failures, indexed against the caller's input order.
    pub write_errors: Vec<WriteError>,
}

impl InsertManyResult {
    /// Whether every document was stored.
    pub fn is_complete(&self) -> bool {
        self.write_errors.is_empty()
    }
}

/// Result of `update_one`/`update_many`.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateResult {
    /// Documents matched by the selector.
    pub matched_count: u64,

    /// Documents actually changed.
    pub modified_count: u64,

    /// `_id` of the document inserted by an upsert, when one happened.
    pub upserted_id: Option<Bson>,
}

/// Result of `delete_one`/`delete_many`.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteResult {
    /// Documents removed.
    pub deleted_count: u64,
}
