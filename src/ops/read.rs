//! Read operations for collections.
//!
//! This module contains all read operations including:
//! - find, findOne
//! - aggregate, mapReduce
//! - countDocuments
//!
//! `find` and `aggregate` return a [`Cursor`]; `findOne` returns an
//! `Option` so an empty result is never conflated with an error.

use std::time::Duration;

use tracing::debug;

use crate::bson::{Bson, Document};
use crate::client::Collection;
use crate::cursor::Cursor;
use crate::error::Result;
use crate::session::ClientSession;

/// Options for `find`/`findOne`.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    /// Field projection document.
    pub projection: Option<Document>,

    /// Sort specification document.
    pub sort: Option<Document>,

    /// Maximum number of documents to return (0 = no limit).
    pub limit: Option<i64>,

    /// Number of documents to skip before returning results.
    pub skip: Option<i64>,

    /// Documents per server batch.
    pub batch_size: Option<i64>,

    /// Open the cursor in tailable mode: on transient emptiness it
    /// suspends (awaiting new data up to `max_await_time`) rather than
    /// terminating.
    pub tailable: bool,

    /// How long a tailable `getMore` may wait for new data.
    pub max_await_time: Option<Duration>,
}

/// Options for `aggregate`.
#[derive(Debug, Clone, Default)]
pub struct AggregateOptions {
    /// Documents per server batch.
    pub batch_size: Option<i64>,
}

pub(crate) fn build_find_command(
    collection: &str,
    filter: Document,
    options: &FindOptions,
) -> Document {
    let mut command = Document::new()
        .with("find", collection)
        .with("filter", filter);
    if let Some(projection) = &options.projection {
        command.append("projection", projection.clone());
    }
    if let Some(sort) = &options.sort {
        command.append("sort", sort.clone());
    }
    if let Some(limit) = options.limit {
        command.append("limit", limit);
    }
    if let Some(skip) = options.skip {
        command.append("skip", skip);
    }
    if let Some(batch_size) = options.batch_size {
        command.append("batchSize", batch_size);
    }
    if options.tailable {
        command.append("tailable", true);
        command.append("awaitData", true);
        if let Some(wait) = options.max_await_time {
            command.append("maxAwaitTimeMS", wait.as_millis() as i64);
        }
    }
    command
}

pub(crate) fn build_aggregate_command(
    collection: &str,
    pipeline: Vec<Document>,
    options: &AggregateOptions,
) -> Document {
    let stages = pipeline.into_iter().map(Bson::Document).collect::<Vec<_>>();
    let mut cursor_options = Document::new();
    if let Some(batch_size) = options.batch_size {
        cursor_options.append("batchSize", batch_size);
    }
    Document::new()
        .with("aggregate", collection)
        .with("pipeline", stages)
        .with("cursor", cursor_options)
}

impl Collection {
    /// Run a query and return a lazy, batched cursor over the results.
    pub async fn find(
        &self,
        filter: Document,
        options: FindOptions,
        session: Option<&mut ClientSession>,
        deadline: Option<Duration>,
    ) -> Result<Cursor> {
        let command = build_find_command(&self.name, filter, &options);

        debug!(namespace = self.namespace(), "find");
        let reply = self
            .database
            .client()
            .execute(self.database.name(), command, session, deadline)
            .await?;

        Cursor::from_reply(
            self.database.client().clone(),
            &reply,
            options.tailable,
            options.batch_size,
            options.max_await_time,
        )
    }

    /// Return the first matching document, or `None` when nothing matches.
    ///
    /// An empty result is a normal outcome, not an error.
    pub async fn find_one(
        &self,
        filter: Document,
        mut options: FindOptions,
        session: Option<&mut ClientSession>,
        deadline: Option<Duration>,
    ) -> Result<Option<Document>> {
        options.limit = Some(1);
        options.tailable = false;
        let mut cursor = self.find(filter, options, session, deadline).await?;
        cursor.try_next().await
    }

    /// Run an aggregation pipeline and return a cursor over its output.
    ///
    /// Pipeline stages pass through as BSON untouched.
    pub async fn aggregate(
        &self,
        pipeline: Vec<Document>,
        options: AggregateOptions,
        session: Option<&mut ClientSession>,
        deadline: Option<Duration>,
    ) -> Result<Cursor> {
        let command = build_aggregate_command(&self.name, pipeline, &options);

        debug!(namespace = self.namespace(), "aggregate");
        let reply = self
            .database
            .client()
            .execute(self.database.name(), command, session, deadline)
            .await?;

        Cursor::from_reply(
            self.database.client().clone(),
            &reply,
            false,
            options.batch_size,
            None,
        )
    }

    /// Run a map-reduce job with inline output and return a cursor over
    /// the result documents.
    ///
    /// The map and reduce sources travel as JavaScript-code-typed values.
    pub async fn map_reduce(
        &self,
        map: &str,
        reduce: &str,
        query: Option<Document>,
        session: Option<&mut ClientSession>,
        deadline: Option<Duration>,
    ) -> Result<Cursor> {
        let mut command = Document::new()
            .with("mapReduce", self.name.as_str())
            .with("map", Bson::JavaScript(map.to_string()))
            .with("reduce", Bson::JavaScript(reduce.to_string()))
            .with("out", Document::new().with("inline", 1i32));
        if let Some(query) = query {
            command.append("query", query);
        }

        debug!(namespace = self.namespace(), "mapReduce");
        let reply = self
            .database
            .client()
            .execute(self.database.name(), command, session, deadline)
            .await?;

        let docs = reply
            .get_array("results")
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| match item {
                        Bson::Document(doc) => Some(doc.clone()),
                        _ => None,
                    })
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        Ok(Cursor::from_inline(
            self.database.client().clone(),
            self.database.name(),
            docs,
        ))
    }

    /// Count documents matching `filter`.
    pub async fn count_documents(
        &self,
        filter: Document,
        session: Option<&mut ClientSession>,
        deadline: Option<Duration>,
    ) -> Result<u64> {
        let command = Document::new()
            .with("count", self.name.as_str())
            .with("query", filter);

        debug!(namespace = self.namespace(), "count");
        let reply = self
            .database
            .client()
            .execute(self.database.name(), command, session, deadline)
            .await?;
        Ok(reply.get_as_i64("n").unwrap_or(0).max(0) as u64)
    }
}
