//! Lazy, batched iteration over a query result stream.
//!
//! A cursor owns the client-side half of a server cursor: the current batch
//! plus the server cursor id. Exhausting a batch triggers a `getMore` round
//! trip through the transport; a zero cursor id from the server is terminal
//! exhaustion. The sequence is forward-only and non-restartable.
//!
//! State machine:
//!
//! ```text
//! HasBatch --batch drained, id != 0--> (fetch) --> HasBatch | Exhausted
//! HasBatch --batch drained, id == 0--> Exhausted
//! any --close()--> Closed (reuse fails with UseAfterClose)
//! ```
//!
//! Advancing an exhausted cursor yields no elements and never errors.
//! Tailable cursors suspend instead of terminating when a batch comes back
//! empty with a live cursor id; the caller decides whether to poll again.

use std::collections::VecDeque;
use std::time::Duration;

use futures::Stream;
use futures::stream;
use tracing::debug;

use crate::bson::{Bson, Document};
use crate::client::Client;
use crate::error::{BsonError, DriverError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CursorState {
    /// Holding a batch (possibly drained) with a live or finished server id.
    Active,

    /// The server signalled no more results.
    Exhausted,

    /// Explicitly destroyed; any further use is an error.
    Closed,
}

/// Client-side handle over a paginated server result set.
pub struct Cursor {
    client: Client,
    database: String,
    collection: String,
    cursor_id: i64,
    batch: VecDeque<Document>,
    current: Option<Document>,
    state: CursorState,
    tailable: bool,
    batch_size: Option<i64>,
    max_await_time: Option<Duration>,
}

impl Cursor {
    /// Build a cursor from a `find`/`aggregate`-shaped reply
    /// (`{cursor: {id, ns, firstBatch}}`).
    pub(crate) fn from_reply(
        client: Client,
        reply: &Document,
        tailable: bool,
        batch_size: Option<i64>,
        max_await_time: Option<Duration>,
    ) -> Result<Cursor> {
        let cursor_doc = reply.get_document("cursor").ok_or_else(|| {
            DriverError::Bson(BsonError::MalformedDocument(
                "reply is missing the cursor document".into(),
            ))
        })?;
        let cursor_id = cursor_doc.get_i64("id").ok_or_else(|| {
            DriverError::Bson(BsonError::MalformedDocument(
                "cursor reply is missing an int64 id".into(),
            ))
        })?;
        let namespace = cursor_doc.get_str("ns").unwrap_or_default();
        let (database, collection) = namespace.split_once('.').unwrap_or((namespace, ""));

        let batch = batch_documents(cursor_doc, "firstBatch")?;
        let exhausted = cursor_id == 0 && batch.is_empty();

        Ok(Cursor {
            client,
            database: database.to_string(),
            collection: collection.to_string(),
            cursor_id,
            batch,
            current: None,
            state: if exhausted {
                CursorState::Exhausted
            } else {
                CursorState::Active
            },
            tailable,
            batch_size,
            max_await_time,
        })
    }

    /// Build an already-complete cursor over inline results (e.g. a
    /// `mapReduce` reply's `results` array).
    pub(crate) fn from_inline(client: Client, database: &str, docs: Vec<Document>) -> Cursor {
        Cursor {
            client,
            database: database.to_string(),
            collection: String::new(),
            cursor_id: 0,
            batch: docs.into(),
            current: None,
            state: CursorState::Active,
            tailable: false,
            batch_size: None,
            max_await_time: None,
        }
    }

    /// Whether the server signalled terminal exhaustion.
    pub fn is_exhausted(&self) -> bool {
        self.state == CursorState::Exhausted
    }

    /// Advance to the next document.
    ///
    /// Returns `true` when a document is available via [`Cursor::current`].
    /// Returns `false` at terminal exhaustion, and also when a tailable
    /// cursor is suspended awaiting new data (check [`Cursor::is_exhausted`]
    /// to tell the two apart).
    pub async fn advance(&mut self) -> Result<bool> {
        match self.state {
            CursorState::Closed => return Err(DriverError::UseAfterClose("cursor")),
            CursorState::Exhausted => {
                self.current = None;
                return Ok(false);
            }
            CursorState::Active => {}
        }

        loop {
            if let Some(doc) = self.batch.pop_front() {
                self.current = Some(doc);
                return Ok(true);
            }

            if self.cursor_id == 0 {
                self.state = CursorState::Exhausted;
                self.current = None;
                return Ok(false);
            }

            let fetched = self.fetch_next_batch().await?;
            if !fetched && self.batch.is_empty() && self.tailable {
                // Tailable cursor with no new data: suspended, not dead.
                self.current = None;
                return Ok(false);
            }
            // A non-tailable cursor may see an empty intermediate batch
            // with a live id; keep fetching until documents arrive or the
            // server closes the cursor.
        }
    }

    /// The document the cursor is positioned on.
    pub fn current(&self) -> Option<&Document> {
        self.current.as_ref()
    }

    /// Advance and take the next document, `None` at exhaustion (or when a
    /// tailable cursor is suspended).
    pub async fn try_next(&mut self) -> Result<Option<Document>> {
        if self.advance().await? {
            Ok(self.current.take())
        } else {
            Ok(None)
        }
    }

    /// Materialize the remaining documents, in order.
    ///
    /// A caller convenience implemented purely in terms of repeated
    /// advancement.
    pub async fn collect_all(mut self) -> Result<Vec<Document>> {
        let mut docs = Vec::new();
        while let Some(doc) = self.try_next().await? {
            docs.push(doc);
        }
        Ok(docs)
    }

    /// Consume the cursor as a `futures::Stream` of documents.
    pub fn into_stream(self) -> impl Stream<Item = Result<Document>> {
        stream::try_unfold(self, |mut cursor| async move {
            Ok(cursor.try_next().await?.map(|doc| (doc, cursor)))
        })
    }

    /// Destroy the cursor, killing the server-side half when still live.
    ///
    /// Idempotent; any later advancement fails with `UseAfterClose`.
    pub async fn close(&mut self) -> Result<()> {
        if self.state == CursorState::Closed {
            return Ok(());
        }
        let live_id = self.cursor_id;
        self.state = CursorState::Closed;
        self.batch.clear();
        self.current = None;

        if live_id != 0 {
            let command = Document::new()
                .with("killCursors", self.collection.as_str())
                .with("cursors", vec![Bson::Int64(live_id)]);
            self.client
                .execute(&self.database, command, None, None)
                .await?;
            self.cursor_id = 0;
        }
        Ok(())
    }

    /// One `getMore` round trip. Returns whether any documents arrived.
    async fn fetch_next_batch(&mut self) -> Result<bool> {
        debug!(
            namespace = format!("{}.{}", self.database, self.collection),
            cursor_id = self.cursor_id,
            "fetching next batch"
        );

        let reply = self
            .client
            .transport()
            .fetch_more(
                &self.database,
                &self.collection,
                self.cursor_id,
                self.batch_size,
                self.max_await_time,
                None,
            )
            .await?;

        if let Some(err) = crate::error::server::check_reply(&reply) {
            return Err(err.into());
        }

        let cursor_doc = reply.get_document("cursor").ok_or_else(|| {
            DriverError::Bson(BsonError::MalformedDocument(
                "getMore reply is missing the cursor document".into(),
            ))
        })?;
        self.cursor_id = cursor_doc.get_i64("id").unwrap_or(0);
        let batch = batch_documents(cursor_doc, "nextBatch")?;
        let got_docs = !batch.is_empty();
        self.batch = batch;

        if !got_docs && self.cursor_id == 0 {
            self.state = CursorState::Exhausted;
        }
        Ok(got_docs)
    }
}

fn batch_documents(cursor_doc: &Document, key: &str) -> Result<VecDeque<Document>> {
    let mut docs = VecDeque::new();
    if let Some(items) = cursor_doc.get_array(key) {
        for item in items {
            match item {
                Bson::Document(doc) => docs.push_back(doc.clone()),
                other => {
                    return Err(DriverError::Bson(BsonError::MalformedDocument(format!(
                        "cursor batch holds a non-document value of type {:?}",
                        other.element_type()
                    ))));
                }
            }
        }
    }
    Ok(docs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use uuid::Uuid;

    use crate::transport::Transport;

    /// Replays a fixed sequence of `getMore` replies, one per call.
    struct ScriptedTransport {
        get_more_replies: Mutex<VecDeque<Document>>,
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send_command(
            &self,
            _database: &str,
            _command: &Document,
            _session_id: Option<Uuid>,
            _deadline: Option<Duration>,
        ) -> Result<Document> {
            Ok(Document::new().with("ok", 1.0f64))
        }

        async fn fetch_more(
            &self,
            _database: &str,
            _collection: &str,
            _cursor_id: i64,
            _batch_size: Option<i64>,
            _max_await_time: Option<Duration>,
            _deadline: Option<Duration>,
        ) -> Result<Document> {
            Ok(self
                .get_more_replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("unscripted getMore"))
        }
    }

    fn cursor_reply(id: i64, batch_key: &str, batch: Vec<Document>) -> Document {
        let items = batch.into_iter().map(Bson::Document).collect::<Vec<_>>();
        let cursor = Document::new()
            .with("id", id)
            .with("ns", "db.c")
            .with(batch_key, items);
        Document::new().with("cursor", cursor).with("ok", 1.0f64)
    }

    fn numbered(n: i32) -> Document {
        Document::new().with("n", n)
    }

    fn scripted_cursor(
        first: Document,
        tailable: bool,
        get_more_replies: Vec<Document>,
    ) -> Cursor {
        let transport = Arc::new(ScriptedTransport {
            get_more_replies: Mutex::new(get_more_replies.into()),
        });
        let client = Client::with_transport("mongodb://localhost", transport).unwrap();
        Cursor::from_reply(client, &first, tailable, None, None).unwrap()
    }

    #[tokio::test]
    async fn test_empty_intermediate_batch_does_not_end_iteration() {
        // Servers may hand back an empty nextBatch while the cursor is
        // still live; the remaining documents must not be dropped.
        let cursor = scripted_cursor(
            cursor_reply(7, "firstBatch", vec![numbered(1)]),
            false,
            vec![
                cursor_reply(7, "nextBatch", vec![]),
                cursor_reply(0, "nextBatch", vec![numbered(2)]),
            ],
        );

        let docs = cursor.collect_all().await.unwrap();
        let ns: Vec<i32> = docs.iter().filter_map(|d| d.get_i32("n")).collect();
        assert_eq!(ns, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_repeated_empty_live_batches_are_retried() {
        let mut cursor = scripted_cursor(
            cursor_reply(7, "firstBatch", vec![]),
            false,
            vec![
                cursor_reply(7, "nextBatch", vec![]),
                cursor_reply(7, "nextBatch", vec![]),
                cursor_reply(0, "nextBatch", vec![numbered(1)]),
            ],
        );

        assert_eq!(cursor.try_next().await.unwrap().unwrap().get_i32("n"), Some(1));
        assert!(cursor.try_next().await.unwrap().is_none());
        assert!(cursor.is_exhausted());
    }

    #[tokio::test]
    async fn test_tailable_empty_live_batch_suspends() {
        let mut cursor = scripted_cursor(
            cursor_reply(7, "firstBatch", vec![numbered(1)]),
            true,
            vec![cursor_reply(7, "nextBatch", vec![])],
        );

        assert!(cursor.advance().await.unwrap());
        // No new data yet: suspended, not exhausted, no extra getMore.
        assert!(!cursor.advance().await.unwrap());
        assert!(!cursor.is_exhausted());
    }
}
