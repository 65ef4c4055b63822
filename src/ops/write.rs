//! Write operations for collections.
//!
//! This module contains all write operations including:
//! - insertOne, insertMany (ordered and unordered)
//! - updateOne, updateMany (with upsert)
//! - deleteOne, deleteMany
//!
//! Each operation is a pure command builder plus a reply interpreter; the
//! round trip itself goes through the client's central dispatch.

use std::time::Duration;

use tracing::{debug, info};

use crate::bson::{Bson, Document, ObjectId};
use crate::client::Collection;
use crate::error::{Result, server::extract_write_errors};
use crate::ops::results::{DeleteResult, InsertManyResult, InsertOneResult, UpdateResult};
use crate::session::ClientSession;

/* ========================= command builders ========================= */

/// Give the document an `_id` when it lacks one; a caller-supplied `_id`
/// is never overwritten. Returns the id that will be stored.
pub(crate) fn ensure_id(document: &mut Document) -> Bson {
    match document.get("_id") {
        Some(id) => id.clone(),
        None => {
            let id = Bson::ObjectId(ObjectId::new());
            // _id leads the document on the wire, matching server output.
            let mut with_id = Document::new().with("_id", id.clone());
            for (key, value) in document.iter() {
                with_id.append(key, value.clone());
            }
            *document = with_id;
            id
        }
    }
}

pub(crate) fn build_insert_command(
    collection: &str,
    documents: Vec<Document>,
    ordered: bool,
) -> Document {
    let items = documents.into_iter().map(Bson::Document).collect::<Vec<_>>();
    Document::new()
        .with("insert", collection)
        .with("documents", items)
        .with("ordered", ordered)
}

pub(crate) fn build_update_command(
    collection: &str,
    filter: Document,
    update: Document,
    multi: bool,
    upsert: bool,
) -> Document {
    let statement = Document::new()
        .with("q", filter)
        .with("u", update)
        .with("multi", multi)
        .with("upsert", upsert);
    Document::new()
        .with("update", collection)
        .with("updates", vec![Bson::Document(statement)])
}

pub(crate) fn build_delete_command(collection: &str, filter: Document, limit: i32) -> Document {
    let statement = Document::new().with("q", filter).with("limit", limit);
    Document::new()
        .with("delete", collection)
        .with("deletes", vec![Bson::Document(statement)])
}

/* ========================= reply interpreters ========================= */

fn interpret_insert_reply(reply: &Document, ids: Vec<Bson>, ordered: bool) -> InsertManyResult {
    let write_errors = extract_write_errors(reply);
    let inserted_count = reply.get_as_i64("n").unwrap_or(0).max(0) as u64;

    let inserted_ids = if write_errors.is_empty() {
        ids
    } else if ordered {
        // The server stops at the first failure; later items were never
        // attempted.
        let first_failure = write_errors[0].index;
        ids.into_iter().take(first_failure).collect()
    } else {
        let failed: Vec<usize> = write_errors.iter().map(|e| e.index).collect();
        ids.into_iter()
            .enumerate()
            .filter(|(index, _)| !failed.contains(index))
            .map(|(_, id)| id)
            .collect()
    };

    InsertManyResult {
        inserted_count,
        inserted_ids,
        write_errors,
    }
}

fn interpret_update_reply(reply: &Document) -> UpdateResult {
    let upserted_id = reply
        .get_array("upserted")
        .and_then(|items| items.first())
        .and_then(|item| match item {
            Bson::Document(doc) => doc.get("_id").cloned(),
            _ => None,
        });
    // An upsert counts in `n` but matched nothing.
    let matched = reply.get_as_i64("n").unwrap_or(0).max(0) as u64;
    UpdateResult {
        matched_count: if upserted_id.is_some() {
            matched.saturating_sub(1)
        } else {
            matched
        },
        modified_count: reply.get_as_i64("nModified").unwrap_or(0).max(0) as u64,
        upserted_id,
    }
}

/* ========================= collection operations ========================= */

impl Collection {
    /// Insert one document.
    ///
    /// A missing `_id` is filled with a fresh [`ObjectId`] before
    /// transmission; a caller-supplied `_id` is never altered.
    pub async fn insert_one(
        &self,
        mut document: Document,
        session: Option<&mut ClientSession>,
        deadline: Option<Duration>,
    ) -> Result<InsertOneResult> {
        let inserted_id = ensure_id(&mut document);
        let command = build_insert_command(&self.name, vec![document], true);

        debug!(namespace = self.namespace(), "insertOne");
        let reply = self
            .database
            .client()
            .execute(self.database.name(), command, session, deadline)
            .await?;

        let result = interpret_insert_reply(&reply, vec![inserted_id.clone()], true);
        if let Some(error) = result.write_errors.into_iter().next() {
            return Err(crate::error::ServerError {
                domain: crate::error::ErrorDomain::Write,
                code: error.code,
                message: error.message,
            }
            .into());
        }
        Ok(InsertOneResult { inserted_id })
    }

    /// Insert a batch of documents.
    ///
    /// In ordered mode the server stops at the first failure: the result
    /// reports the successful prefix and the failing item. In unordered
    /// mode it continues past failures and the result aggregates every
    /// per-item error.
    pub async fn insert_many(
        &self,
        mut documents: Vec<Document>,
        ordered: bool,
        session: Option<&mut ClientSession>,
        deadline: Option<Duration>,
    ) -> Result<InsertManyResult> {
        let ids: Vec<Bson> = documents.iter_mut().map(ensure_id).collect();
        let count = documents.len();
        let command = build_insert_command(&self.name, documents, ordered);

        debug!(namespace = self.namespace(), count, ordered, "insertMany");
        let reply = self
            .database
            .client()
            .execute(self.database.name(), command, session, deadline)
            .await?;

        let result = interpret_insert_reply(&reply, ids, ordered);
        if !result.write_errors.is_empty() {
            info!(
                namespace = self.namespace(),
                inserted = result.inserted_count,
                failed = result.write_errors.len(),
                "insertMany completed with per-item failures"
            );
        }
        Ok(result)
    }

    /// Update the first document matching `filter`.
    pub async fn update_one(
        &self,
        filter: Document,
        update: Document,
        upsert: bool,
        session: Option<&mut ClientSession>,
        deadline: Option<Duration>,
    ) -> Result<UpdateResult> {
        self.update(filter, update, false, upsert, session, deadline)
            .await
    }

    /// Update every document matching `filter`.
    pub async fn update_many(
        &self,
        filter: Document,
        update: Document,
        upsert: bool,
        session: Option<&mut ClientSession>,
        deadline: Option<Duration>,
    ) -> Result<UpdateResult> {
        self.update(filter, update, true, upsert, session, deadline)
            .await
    }

    async fn update(
        &self,
        filter: Document,
        update: Document,
        multi: bool,
        upsert: bool,
        session: Option<&mut ClientSession>,
        deadline: Option<Duration>,
    ) -> Result<UpdateResult> {
        // Selector and update documents pass through unmodified.
        let command = build_update_command(&self.name, filter, update, multi, upsert);

        debug!(namespace = self.namespace(), multi, upsert, "update");
        let reply = self
            .database
            .client()
            .execute(self.database.name(), command, session, deadline)
            .await?;
        Ok(interpret_update_reply(&reply))
    }

    /// Delete the first document matching `filter`.
    pub async fn delete_one(
        &self,
        filter: Document,
        session: Option<&mut ClientSession>,
        deadline: Option<Duration>,
    ) -> Result<DeleteResult> {
        self.delete(filter, 1, session, deadline).await
    }

    /// Delete every document matching `filter`.
    pub async fn delete_many(
        &self,
        filter: Document,
        session: Option<&mut ClientSession>,
        deadline: Option<Duration>,
    ) -> Result<DeleteResult> {
        self.delete(filter, 0, session, deadline).await
    }

    async fn delete(
        &self,
        filter: Document,
        limit: i32,
        session: Option<&mut ClientSession>,
        deadline: Option<Duration>,
    ) -> Result<DeleteResult> {
        let command = build_delete_command(&self.name, filter, limit);

        debug!(namespace = self.namespace(), limit, "delete");
        let reply = self
            .database
            .client()
            .execute(self.database.name(), command, session, deadline)
            .await?;
        Ok(DeleteResult {
            deleted_count: reply.get_as_i64("n").unwrap_or(0).max(0) as u64,
        })
    }
}
