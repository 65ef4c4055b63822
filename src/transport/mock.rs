//! In-memory transport simulating a tiny single-node server.
//!
//! Backs the crate's tests with deterministic server behavior:
//! - insert/update/delete/find/aggregate/getMore with equality filters
//! - duplicate `_id` write errors, ordered and unordered
//! - per-session transaction staging with commit/abort visibility
//! - user management commands (createUser/dropUser/usersInfo)
//!
//! Filters match by top-level field equality only; that is all the tests
//! need. It is also a reference implementation of the [`Transport`] seam.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use uuid::Uuid;

use crate::bson::{Bson, Document, ObjectId};
use crate::error::{Result, TransportError};
use crate::transport::Transport;

#[derive(Default)]
struct ServerState {
    /// Committed data, keyed "db.coll".
    collections: HashMap<String, Vec<Document>>,

    /// Users per database.
    users: HashMap<String, Vec<Document>>,

    /// Live server-side cursors.
    cursors: HashMap<i64, MockCursor>,
    next_cursor_id: i64,

    /// Staged namespace views per in-progress transaction, copied from the
    /// committed store on first touch.
    transactions: HashMap<Uuid, HashMap<String, Vec<Document>>>,
}

struct MockCursor {
    namespace: String,
    docs: VecDeque<Document>,
    tailable: bool,
}

/// An in-memory [`Transport`] implementation.
#[derive(Default)]
pub struct MockTransport {
    state: Mutex<ServerState>,
    fail_next: Mutex<Option<TransportError>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call fail with the given transport error.
    pub fn inject_failure(&self, error: TransportError) {
        *self.fail_next.lock().unwrap() = Some(error);
    }

    /// Committed contents of a collection, for test assertions.
    pub fn committed_docs(&self, database: &str, collection: &str) -> Vec<Document> {
        let state = self.state.lock().unwrap();
        state
            .collections
            .get(&format!("{database}.{collection}"))
            .cloned()
            .unwrap_or_default()
    }

    fn take_injected(&self, deadline: Option<Duration>) -> Result<()> {
        if let Some(err) = self.fail_next.lock().unwrap().take() {
            return Err(err.into());
        }
        // A zero deadline deterministically simulates an elapsed deadline.
        if deadline == Some(Duration::ZERO) {
            return Err(TransportError::Timeout.into());
        }
        Ok(())
    }
}

/* ========================= reply helpers ========================= */

fn ok_reply() -> Document {
    Document::new().with("ok", 1.0f64)
}

fn error_reply(code: i32, message: &str) -> Document {
    Document::new()
        .with("ok", 0.0f64)
        .with("code", code)
        .with("errmsg", message)
}

fn cursor_reply(id: i64, namespace: &str, batch_key: &str, batch: Vec<Document>) -> Document {
    let items = batch.into_iter().map(Bson::Document).collect::<Vec<_>>();
    let cursor = Document::new()
        .with("id", id)
        .with("ns", namespace)
        .with(batch_key, items);
    Document::new().with("cursor", cursor).with("ok", 1.0f64)
}

/// Top-level field equality; `{}` matches everything.
fn matches_filter(doc: &Document, filter: &Document) -> bool {
    filter.iter().all(|(key, value)| doc.get(key) == Some(value))
}

fn documents_of(value: Option<&Bson>) -> Vec<Document> {
    match value {
        Some(Bson::Array(items)) => items
            .iter()
            .filter_map(|item| match item {
                Bson::Document(d) => Some(d.clone()),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

/* ========================= command handlers ========================= */

impl ServerState {
    /// Namespace view the command should operate on: the transaction's
    /// staged copy when the command is transactional, the committed store
    /// otherwise.
    fn view_mut(&mut self, namespace: &str, txn: Option<Uuid>) -> &mut Vec<Document> {
        match txn {
            Some(session_id) => {
                let committed = self
                    .collections
                    .get(namespace)
                    .cloned()
                    .unwrap_or_default();
                self.transactions
                    .entry(session_id)
                    .or_default()
                    .entry(namespace.to_string())
                    .or_insert(committed)
            }
            None => self.collections.entry(namespace.to_string()).or_default(),
        }
    }

    fn handle_insert(&mut self, database: &str, command: &Document, txn: Option<Uuid>) -> Document {
        let Some(collection) = command.get_str("insert") else {
            return error_reply(14, "insert requires a collection name");
        };
        let namespace = format!("{database}.{collection}");
        let documents = documents_of(command.get("documents"));
        let ordered = command.get_bool("ordered").unwrap_or(true);

        let view = self.view_mut(&namespace, txn);
        let mut inserted = 0i32;
        let mut write_errors: Vec<Bson> = Vec::new();

        for (index, doc) in documents.into_iter().enumerate() {
            let id = doc.get("_id").cloned();
            let duplicate = id
                .as_ref()
                .is_some_and(|id| view.iter().any(|existing| existing.get("_id") == Some(id)));
            if duplicate {
                let hex = match id {
                    Some(Bson::ObjectId(oid)) => oid.to_hex(),
                    other => format!("{other:?}"),
                };
                write_errors.push(Bson::Document(
                    Document::new()
                        .with("index", index as i32)
                        .with("code", 11000)
                        .with("errmsg", format!("E11000 duplicate key error, dup key: {hex}")),
                ));
                if ordered {
                    break;
                }
                continue;
            }
            view.push(doc);
            inserted += 1;
        }

        let mut reply = Document::new().with("n", inserted).with("ok", 1.0f64);
        if !write_errors.is_empty() {
            reply.append("writeErrors", write_errors);
        }
        reply
    }

    fn handle_update(&mut self, database: &str, command: &Document, txn: Option<Uuid>) -> Document {
        let Some(collection) = command.get_str("update") else {
            return error_reply(14, "update requires a collection name");
        };
        let namespace = format!("{database}.{collection}");
        let statements = documents_of(command.get("updates"));
        let Some(statement) = statements.first() else {
            return error_reply(14, "updates array is empty");
        };

        let filter = statement.get_document("q").cloned().unwrap_or_default();
        let update = statement.get_document("u").cloned().unwrap_or_default();
        let multi = statement.get_bool("multi").unwrap_or(false);
        let upsert = statement.get_bool("upsert").unwrap_or(false);
        let is_operator_update = update.keys().any(|k| k.starts_with('$'));

        let view = self.view_mut(&namespace, txn);
        let mut matched = 0i32;
        let mut modified = 0i32;

        for doc in view.iter_mut() {
            if !matches_filter(doc, &filter) {
                continue;
            }
            matched += 1;
            let before = doc.clone();
            if is_operator_update {
                if let Some(set) = update.get_document("$set") {
                    for (key, value) in set.iter() {
                        doc.set(key, value.clone());
                    }
                }
            } else {
                let id = doc.get("_id").cloned();
                *doc = update.clone();
                if let Some(id) = id {
                    if !doc.contains_key("_id") {
                        let mut with_id = Document::new().with("_id", id);
                        for (key, value) in doc.iter() {
                            with_id.append(key, value.clone());
                        }
                        *doc = with_id;
                    }
                }
            }
            if *doc != before {
                modified += 1;
            }
            if !multi {
                break;
            }
        }

        if matched == 0 && upsert {
            let mut new_doc = if is_operator_update {
                let mut base = filter.clone();
                if let Some(set) = update.get_document("$set") {
                    for (key, value) in set.iter() {
                        base.set(key, value.clone());
                    }
                }
                base
            } else {
                update.clone()
            };
            let id = new_doc
                .get("_id")
                .cloned()
                .unwrap_or_else(|| Bson::ObjectId(ObjectId::new()));
            if !new_doc.contains_key("_id") {
                new_doc.append("_id", id.clone());
            }
            view.push(new_doc);
            let upserted = Document::new().with("index", 0i32).with("_id", id);
            return Document::new()
                .with("n", 1i32)
                .with("nModified", 0i32)
                .with("upserted", vec![Bson::Document(upserted)])
                .with("ok", 1.0f64);
        }

        Document::new()
            .with("n", matched)
            .with("nModified", modified)
            .with("ok", 1.0f64)
    }

    fn handle_delete(&mut self, database: &str, command: &Document, txn: Option<Uuid>) -> Document {
        let Some(collection) = command.get_str("delete") else {
            return error_reply(14, "delete requires a collection name");
        };
        let namespace = format!("{database}.{collection}");
        let statements = documents_of(command.get("deletes"));
        let Some(statement) = statements.first() else {
            return error_reply(14, "deletes array is empty");
        };
        let filter = statement.get_document("q").cloned().unwrap_or_default();
        let limit = statement.get_as_i64("limit").unwrap_or(0);

        let view = self.view_mut(&namespace, txn);
        let mut removed = 0i32;
        view.retain(|doc| {
            if (limit == 0 || removed < limit as i32) && matches_filter(doc, &filter) {
                removed += 1;
                false
            } else {
                true
            }
        });

        Document::new().with("n", removed).with("ok", 1.0f64)
    }

    fn handle_find(&mut self, database: &str, command: &Document, txn: Option<Uuid>) -> Document {
        let Some(collection) = command.get_str("find") else {
            return error_reply(14, "find requires a collection name");
        };
        let namespace = format!("{database}.{collection}");
        let filter = command.get_document("filter").cloned().unwrap_or_default();
        let limit = command.get_as_i64("limit").unwrap_or(0);
        let batch_size = command.get_as_i64("batchSize").unwrap_or(101);
        let tailable = command.get_bool("tailable").unwrap_or(false);

        let view = self.view_mut(&namespace, txn);
        let mut results: Vec<Document> = view
            .iter()
            .filter(|doc| matches_filter(doc, &filter))
            .cloned()
            .collect();
        if limit > 0 {
            results.truncate(limit as usize);
        }

        self.open_cursor(&namespace, results, batch_size, tailable)
    }

    fn handle_aggregate(
        &mut self,
        database: &str,
        command: &Document,
        txn: Option<Uuid>,
    ) -> Document {
        let Some(collection) = command.get_str("aggregate") else {
            return error_reply(14, "aggregate requires a collection name");
        };
        let namespace = format!("{database}.{collection}");
        let pipeline = documents_of(command.get("pipeline"));
        let batch_size = command
            .get_document("cursor")
            .and_then(|c| c.get_as_i64("batchSize"))
            .unwrap_or(101);

        let view = self.view_mut(&namespace, txn);
        let mut results: Vec<Document> = view.clone();
        for stage in &pipeline {
            if let Some(filter) = stage.get_document("$match") {
                results.retain(|doc| matches_filter(doc, filter));
            }
            // Other stages are passed through untouched; the mock only
            // needs $match for the crate's tests.
        }

        self.open_cursor(&namespace, results, batch_size, false)
    }

    fn open_cursor(
        &mut self,
        namespace: &str,
        results: Vec<Document>,
        batch_size: i64,
        tailable: bool,
    ) -> Document {
        let batch_size = batch_size.max(1) as usize;
        let mut queue: VecDeque<Document> = results.into();
        let first: Vec<Document> = queue.drain(..batch_size.min(queue.len())).collect();

        let id = if queue.is_empty() && !tailable {
            0
        } else {
            self.next_cursor_id += 1;
            let id = self.next_cursor_id;
            self.cursors.insert(
                id,
                MockCursor {
                    namespace: namespace.to_string(),
                    docs: queue,
                    tailable,
                },
            );
            id
        };

        cursor_reply(id, namespace, "firstBatch", first)
    }

    fn handle_get_more(&mut self, cursor_id: i64, batch_size: Option<i64>) -> Document {
        let Some(cursor) = self.cursors.get_mut(&cursor_id) else {
            return error_reply(43, "cursor not found");
        };
        let take = batch_size
            .map(|n| n.max(1) as usize)
            .unwrap_or(cursor.docs.len().max(1));
        let batch: Vec<Document> = cursor.docs.drain(..take.min(cursor.docs.len())).collect();
        let namespace = cursor.namespace.clone();

        let id = if cursor.docs.is_empty() && !cursor.tailable {
            self.cursors.remove(&cursor_id);
            0
        } else {
            cursor_id
        };
        cursor_reply(id, &namespace, "nextBatch", batch)
    }

    fn handle_kill_cursors(&mut self, command: &Document) -> Document {
        let mut killed: Vec<Bson> = Vec::new();
        if let Some(Bson::Array(ids)) = command.get("cursors") {
            for id in ids {
                if let Bson::Int64(id) = id {
                    if self.cursors.remove(id).is_some() {
                        killed.push(Bson::Int64(*id));
                    }
                }
            }
        }
        Document::new()
            .with("cursorsKilled", killed)
            .with("ok", 1.0f64)
    }

    /// Push new documents into a live tailable cursor's pending queue,
    /// simulating an append-only collection gaining data.
    fn feed_cursor(&mut self, cursor_id: i64, docs: Vec<Document>) {
        if let Some(cursor) = self.cursors.get_mut(&cursor_id) {
            cursor.docs.extend(docs);
        }
    }

    fn handle_commit(&mut self, session_id: Option<Uuid>) -> Document {
        let Some(session_id) = session_id else {
            return error_reply(251, "no transaction for commit");
        };
        if let Some(view) = self.transactions.remove(&session_id) {
            for (namespace, docs) in view {
                self.collections.insert(namespace, docs);
            }
        }
        ok_reply()
    }

    fn handle_abort(&mut self, session_id: Option<Uuid>) -> Document {
        let Some(session_id) = session_id else {
            return error_reply(251, "no transaction to abort");
        };
        self.transactions.remove(&session_id);
        ok_reply()
    }

    fn handle_create_user(&mut self, database: &str, command: &Document) -> Document {
        let Some(name) = command.get_str("createUser") else {
            return error_reply(14, "createUser requires a user name");
        };
        let users = self.users.entry(database.to_string()).or_default();
        if users.iter().any(|u| u.get_str("user") == Some(name)) {
            return error_reply(51003, "User already exists");
        }
        let roles = command.get("roles").cloned().unwrap_or(Bson::Array(vec![]));
        users.push(Document::new().with("user", name).with("roles", roles));
        ok_reply()
    }

    fn handle_drop_user(&mut self, database: &str, command: &Document) -> Document {
        let Some(name) = command.get_str("dropUser") else {
            return error_reply(14, "dropUser requires a user name");
        };
        let users = self.users.entry(database.to_string()).or_default();
        let before = users.len();
        users.retain(|u| u.get_str("user") != Some(name));
        if users.len() == before {
            return error_reply(11, format!("User '{name}' not found").as_str());
        }
        ok_reply()
    }

    fn handle_users_info(&mut self, database: &str, command: &Document) -> Document {
        let users = self.users.entry(database.to_string()).or_default();
        let matching: Vec<Bson> = match command.get("usersInfo") {
            Some(Bson::String(name)) => users
                .iter()
                .filter(|u| u.get_str("user") == Some(name.as_str()))
                .cloned()
                .map(Bson::Document)
                .collect(),
            _ => users.iter().cloned().map(Bson::Document).collect(),
        };
        Document::new().with("users", matching).with("ok", 1.0f64)
    }

    fn handle_map_reduce(
        &mut self,
        database: &str,
        command: &Document,
        txn: Option<Uuid>,
    ) -> Document {
        let Some(collection) = command.get_str("mapReduce") else {
            return error_reply(14, "mapReduce requires a collection name");
        };
        let namespace = format!("{database}.{collection}");
        let filter = command.get_document("query").cloned().unwrap_or_default();
        let view = self.view_mut(&namespace, txn);
        let results: Vec<Bson> = view
            .iter()
            .filter(|doc| matches_filter(doc, &filter))
            .cloned()
            .map(Bson::Document)
            .collect();
        Document::new().with("results", results).with("ok", 1.0f64)
    }

    fn handle_count(&mut self, database: &str, command: &Document, txn: Option<Uuid>) -> Document {
        let Some(collection) = command.get_str("count") else {
            return error_reply(14, "count requires a collection name");
        };
        let namespace = format!("{database}.{collection}");
        let filter = command.get_document("query").cloned().unwrap_or_default();
        let view = self.view_mut(&namespace, txn);
        let n = view.iter().filter(|doc| matches_filter(doc, &filter)).count();
        Document::new().with("n", n as i32).with("ok", 1.0f64)
    }
}

impl MockTransport {
    /// Append documents to a live tailable cursor, simulating new writes
    /// arriving in an append-only collection.
    pub fn feed_tailable_cursor(&self, cursor_id: i64, docs: Vec<Document>) {
        self.state.lock().unwrap().feed_cursor(cursor_id, docs);
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send_command(
        &self,
        database: &str,
        command: &Document,
        session_id: Option<Uuid>,
        deadline: Option<Duration>,
    ) -> Result<Document> {
        self.take_injected(deadline)?;

        let Some(name) = command.keys().next() else {
            return Ok(error_reply(14, "empty command document"));
        };
        debug!(database, command = name, "mock transport command");

        // Commands carrying transaction fields operate on the session's
        // staged view instead of the committed store.
        let txn = if command.contains_key("txnNumber") {
            session_id
        } else {
            None
        };

        let mut state = self.state.lock().unwrap();
        let reply = match name {
            "insert" => state.handle_insert(database, command, txn),
            "update" => state.handle_update(database, command, txn),
            "delete" => state.handle_delete(database, command, txn),
            "find" => state.handle_find(database, command, txn),
            "aggregate" => state.handle_aggregate(database, command, txn),
            "mapReduce" => state.handle_map_reduce(database, command, txn),
            "count" => state.handle_count(database, command, txn),
            "killCursors" => state.handle_kill_cursors(command),
            "commitTransaction" => state.handle_commit(session_id),
            "abortTransaction" => state.handle_abort(session_id),
            "createUser" => state.handle_create_user(database, command),
            "dropUser" => state.handle_drop_user(database, command),
            "usersInfo" => state.handle_users_info(database, command),
            "ping" => ok_reply(),
            other => error_reply(59, &format!("no such command: '{other}'")),
        };
        Ok(reply)
    }

    async fn fetch_more(
        &self,
        _database: &str,
        _collection: &str,
        cursor_id: i64,
        batch_size: Option<i64>,
        _max_await_time: Option<Duration>,
        deadline: Option<Duration>,
    ) -> Result<Document> {
        self.take_injected(deadline)?;
        let mut state = self.state.lock().unwrap();
        Ok(state.handle_get_more(cursor_id, batch_size))
    }
}
