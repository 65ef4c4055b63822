use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;

use crate::bson::{Bson, Document, ObjectId};
use crate::client::{Client, Collection};
use crate::error::{DriverError, ErrorDomain, TransportError};
use crate::ops::read::{AggregateOptions, FindOptions, build_find_command};
use crate::ops::write::{build_delete_command, build_insert_command, build_update_command};
use crate::transport::mock::MockTransport;

fn setup() -> (Client, Arc<MockTransport>) {
    let transport = Arc::new(MockTransport::new());
    let client =
        Client::with_transport("mongodb://localhost/testdb", transport.clone()).unwrap();
    (client, transport)
}

fn orders(client: &Client) -> Collection {
    client.database("testdb").collection("orders")
}

fn order(n: i32) -> Document {
    Document::new().with("n", n).with("status", "open")
}

/* ========================= command builders ========================= */

#[test]
fn test_insert_command_shape() {
    let command = build_insert_command("orders", vec![order(1)], true);
    assert_eq!(command.keys().next(), Some("insert"));
    assert_eq!(command.get_str("insert"), Some("orders"));
    assert_eq!(command.get_bool("ordered"), Some(true));
    assert_eq!(command.get_array("documents").unwrap().len(), 1);
}

#[test]
fn test_update_command_passes_documents_through() {
    let filter = Document::new().with("n", 1i32);
    let update = Document::new().with("$set", Document::new().with("status", "done"));
    let command = build_update_command("orders", filter.clone(), update.clone(), true, false);

    let statements = command.get_array("updates").unwrap();
    let Bson::Document(statement) = &statements[0] else {
        panic!("update statement must be a document");
    };
    // Selector and update documents are not rewritten.
    assert_eq!(statement.get_document("q"), Some(&filter));
    assert_eq!(statement.get_document("u"), Some(&update));
    assert_eq!(statement.get_bool("multi"), Some(true));
}

#[test]
fn test_delete_command_shape() {
    let command = build_delete_command("orders", Document::new(), 1);
    let statements = command.get_array("deletes").unwrap();
    let Bson::Document(statement) = &statements[0] else {
        panic!("delete statement must be a document");
    };
    assert_eq!(statement.get_i32("limit"), Some(1));
}

#[test]
fn test_find_command_tailable_flags() {
    let options = FindOptions {
        tailable: true,
        max_await_time: Some(Duration::from_millis(250)),
        ..FindOptions::default()
    };
    let command = build_find_command("events", Document::new(), &options);
    assert_eq!(command.get_bool("tailable"), Some(true));
    assert_eq!(command.get_bool("awaitData"), Some(true));
    assert_eq!(command.get_i64("maxAwaitTimeMS"), Some(250));
}

/* ========================= inserts ========================= */

#[tokio::test]
async fn test_insert_one_generates_id() {
    let (client, transport) = setup();
    let coll = orders(&client);

    let result = coll.insert_one(order(1), None, None).await.unwrap();
    let Bson::ObjectId(_) = result.inserted_id else {
        panic!("auto-generated _id must be an ObjectId");
    };

    // The reported id is present in the document as stored.
    let stored = transport.committed_docs("testdb", "orders");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].get("_id"), Some(&result.inserted_id));
    // _id leads the stored document.
    assert_eq!(stored[0].keys().next(), Some("_id"));
}

#[tokio::test]
async fn test_insert_one_preserves_caller_id() {
    let (client, transport) = setup();
    let coll = orders(&client);

    let id = ObjectId::new();
    let doc = Document::new().with("_id", id).with("n", 1i32);
    let result = coll.insert_one(doc, None, None).await.unwrap();
    assert_eq!(result.inserted_id, Bson::ObjectId(id));

    let stored = transport.committed_docs("testdb", "orders");
    assert_eq!(stored[0].get_object_id("_id"), Some(id));
}

#[tokio::test]
async fn test_insert_one_duplicate_key_is_write_error() {
    let (client, _) = setup();
    let coll = orders(&client);

    let id = ObjectId::new();
    let doc = Document::new().with("_id", id).with("n", 1i32);
    coll.insert_one(doc.clone(), None, None).await.unwrap();

    let err = coll.insert_one(doc, None, None).await.unwrap_err();
    assert!(err.is_duplicate_key());
    let DriverError::Server(server_err) = err else {
        panic!("duplicate key must surface as a server error");
    };
    assert_eq!(server_err.domain, ErrorDomain::Write);
}

#[tokio::test]
async fn test_ordered_insert_many_stops_at_first_failure() {
    let (client, transport) = setup();
    let coll = orders(&client);

    let dup = ObjectId::new();
    coll.insert_one(Document::new().with("_id", dup).with("n", 0i32), None, None)
        .await
        .unwrap();

    let batch = vec![
        order(1),
        order(2),
        Document::new().with("_id", dup).with("n", 3i32),
        order(4),
    ];
    let result = coll.insert_many(batch, true, None, None).await.unwrap();

    // The prefix before the failing index was inserted, nothing after.
    assert_eq!(result.inserted_count, 2);
    assert_eq!(result.inserted_ids.len(), 2);
    assert_eq!(result.write_errors.len(), 1);
    assert_eq!(result.write_errors[0].index, 2);
    assert_eq!(result.write_errors[0].code, 11000);

    // 1 pre-existing + 2 inserted.
    assert_eq!(transport.committed_docs("testdb", "orders").len(), 3);
}

#[tokio::test]
async fn test_unordered_insert_many_continues_past_failure() {
    let (client, transport) = setup();
    let coll = orders(&client);

    let dup = ObjectId::new();
    coll.insert_one(Document::new().with("_id", dup).with("n", 0i32), None, None)
        .await
        .unwrap();

    let batch = vec![
        order(1),
        Document::new().with("_id", dup).with("n", 2i32),
        order(3),
    ];
    let result = coll.insert_many(batch, false, None, None).await.unwrap();

    // Every non-conflicting item was inserted despite the failure.
    assert_eq!(result.inserted_count, 2);
    assert_eq!(result.inserted_ids.len(), 2);
    assert_eq!(result.write_errors.len(), 1);
    assert_eq!(result.write_errors[0].index, 1);
    assert_eq!(transport.committed_docs("testdb", "orders").len(), 3);
}

/* ========================= updates & deletes ========================= */

#[tokio::test]
async fn test_update_one_and_many() {
    let (client, _) = setup();
    let coll = orders(&client);
    coll.insert_many(vec![order(1), order(2), order(3)], true, None, None)
        .await
        .unwrap();

    let set_done = Document::new().with("$set", Document::new().with("status", "done"));
    let one = coll
        .update_one(Document::new().with("n", 1i32), set_done.clone(), false, None, None)
        .await
        .unwrap();
    assert_eq!(one.matched_count, 1);
    assert_eq!(one.modified_count, 1);
    assert!(one.upserted_id.is_none());

    let many = coll
        .update_many(
            Document::new().with("status", "open"),
            set_done,
            false,
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(many.matched_count, 2);
    assert_eq!(many.modified_count, 2);
}

#[tokio::test]
async fn test_update_upsert_reports_upserted_id() {
    let (client, transport) = setup();
    let coll = orders(&client);

    let result = coll
        .update_one(
            Document::new().with("n", 9i32),
            Document::new().with("$set", Document::new().with("status", "new")),
            true,
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(result.matched_count, 0);
    assert_eq!(result.modified_count, 0);
    let upserted_id = result.upserted_id.expect("upsert must report an id");

    let stored = transport.committed_docs("testdb", "orders");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].get("_id"), Some(&upserted_id));
}

#[tokio::test]
async fn test_delete_one_and_many() {
    let (client, transport) = setup();
    let coll = orders(&client);
    coll.insert_many(vec![order(1), order(2), order(3)], true, None, None)
        .await
        .unwrap();

    let one = coll
        .delete_one(Document::new().with("status", "open"), None, None)
        .await
        .unwrap();
    assert_eq!(one.deleted_count, 1);

    let many = coll.delete_many(Document::new(), None, None).await.unwrap();
    assert_eq!(many.deleted_count, 2);
    assert!(transport.committed_docs("testdb", "orders").is_empty());
}

/* ========================= reads & cursors ========================= */

#[tokio::test]
async fn test_find_one_absence_is_none_not_error() {
    let (client, _) = setup();
    let coll = orders(&client);

    let found = coll
        .find_one(Document::new().with("n", 42i32), FindOptions::default(), None, None)
        .await
        .unwrap();
    assert!(found.is_none());

    coll.insert_one(order(42), None, None).await.unwrap();
    let found = coll
        .find_one(Document::new().with("n", 42i32), FindOptions::default(), None, None)
        .await
        .unwrap()
        .expect("document must be found");
    assert_eq!(found.get_i32("n"), Some(42));
}

#[tokio::test]
async fn test_find_batches_through_get_more() {
    let (client, _) = setup();
    let coll = orders(&client);
    let batch: Vec<Document> = (0..10).map(order).collect();
    coll.insert_many(batch, true, None, None).await.unwrap();

    let options = FindOptions {
        batch_size: Some(3),
        ..FindOptions::default()
    };
    let cursor = coll.find(Document::new(), options, None, None).await.unwrap();
    let docs = cursor.collect_all().await.unwrap();

    assert_eq!(docs.len(), 10);
    // Documents arrive in insertion order across batch boundaries.
    let ns: Vec<i32> = docs.iter().filter_map(|d| d.get_i32("n")).collect();
    assert_eq!(ns, (0..10).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_exhausted_cursor_yields_nothing_forever() {
    let (client, _) = setup();
    let coll = orders(&client);
    coll.insert_one(order(1), None, None).await.unwrap();

    let mut cursor = coll
        .find(Document::new(), FindOptions::default(), None, None)
        .await
        .unwrap();
    assert!(cursor.advance().await.unwrap());
    assert!(!cursor.advance().await.unwrap());
    assert!(cursor.is_exhausted());

    // Repeated advancement past exhaustion never errors, never yields.
    for _ in 0..3 {
        assert!(!cursor.advance().await.unwrap());
        assert!(cursor.try_next().await.unwrap().is_none());
        assert!(cursor.current().is_none());
    }
}

#[tokio::test]
async fn test_cursor_use_after_close_fails() {
    let (client, _) = setup();
    let coll = orders(&client);
    coll.insert_many((0..5).map(order).collect(), true, None, None)
        .await
        .unwrap();

    let options = FindOptions {
        batch_size: Some(2),
        ..FindOptions::default()
    };
    let mut cursor = coll.find(Document::new(), options, None, None).await.unwrap();
    assert!(cursor.advance().await.unwrap());

    cursor.close().await.unwrap();
    // close is idempotent; reuse is not.
    cursor.close().await.unwrap();
    let err = cursor.advance().await.unwrap_err();
    assert_eq!(err, DriverError::UseAfterClose("cursor"));
}

#[tokio::test]
async fn test_tailable_cursor_suspends_then_resumes() {
    let (client, transport) = setup();
    let coll = client.database("testdb").collection("events");
    coll.insert_one(order(1), None, None).await.unwrap();

    let options = FindOptions {
        tailable: true,
        max_await_time: Some(Duration::from_millis(10)),
        ..FindOptions::default()
    };
    let mut cursor = coll.find(Document::new(), options, None, None).await.unwrap();

    assert_eq!(cursor.try_next().await.unwrap().unwrap().get_i32("n"), Some(1));

    // Temporarily empty: suspended, not exhausted.
    assert!(cursor.try_next().await.unwrap().is_none());
    assert!(!cursor.is_exhausted());

    // New data arrives in the capped collection; polling again sees it.
    transport.feed_tailable_cursor(1, vec![order(2)]);
    assert_eq!(cursor.try_next().await.unwrap().unwrap().get_i32("n"), Some(2));
}

#[tokio::test]
async fn test_aggregate_match_stage() {
    let (client, _) = setup();
    let coll = orders(&client);
    coll.insert_many(vec![order(1), order(2), order(1)], true, None, None)
        .await
        .unwrap();

    let pipeline = vec![Document::new().with(
        "$match",
        Document::new().with("n", 1i32),
    )];
    let cursor = coll
        .aggregate(pipeline, AggregateOptions::default(), None, None)
        .await
        .unwrap();
    assert_eq!(cursor.collect_all().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_map_reduce_returns_inline_cursor() {
    let (client, _) = setup();
    let coll = orders(&client);
    coll.insert_many(vec![order(1), order(2)], true, None, None)
        .await
        .unwrap();

    let cursor = coll
        .map_reduce(
            "function() { emit(this.status, this.n); }",
            "function(key, values) { return Array.sum(values); }",
            None,
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(cursor.collect_all().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_count_documents() {
    let (client, _) = setup();
    let coll = orders(&client);
    coll.insert_many(vec![order(1), order(2), order(1)], true, None, None)
        .await
        .unwrap();

    let all = coll.count_documents(Document::new(), None, None).await.unwrap();
    assert_eq!(all, 3);
    let ones = coll
        .count_documents(Document::new().with("n", 1i32), None, None)
        .await
        .unwrap();
    assert_eq!(ones, 2);
}

/* ========================= transactions ========================= */

#[tokio::test]
async fn test_committed_transaction_is_visible_to_unbound_handle() {
    let (client, _) = setup();
    let coll = orders(&client);
    let observer = orders(&client);

    let mut session = client.start_session();
    session.start_transaction().unwrap();
    coll.insert_one(order(1), Some(&mut session), None).await.unwrap();

    // Not visible before commit.
    assert_eq!(observer.count_documents(Document::new(), None, None).await.unwrap(), 0);

    session.commit_transaction().await.unwrap();
    assert_eq!(observer.count_documents(Document::new(), None, None).await.unwrap(), 1);
}

#[tokio::test]
async fn test_aborted_transaction_leaves_no_effects() {
    let (client, _) = setup();
    let coll = orders(&client);
    let observer = orders(&client);

    coll.insert_one(order(0), None, None).await.unwrap();

    let mut session = client.start_session();
    session.start_transaction().unwrap();
    coll.insert_one(order(1), Some(&mut session), None).await.unwrap();
    coll.delete_many(Document::new(), Some(&mut session), None)
        .await
        .unwrap();
    session.abort_transaction().await.unwrap();

    // The pre-existing document survives; the staged writes vanished.
    let docs = observer
        .find(Document::new(), FindOptions::default(), None, None)
        .await
        .unwrap()
        .collect_all()
        .await
        .unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].get_i32("n"), Some(0));
}

#[tokio::test]
async fn test_with_transaction_commits_on_success() {
    let (client, transport) = setup();
    let coll = orders(&client);

    let mut session = client.start_session();
    let coll_for_body = coll.clone();
    session
        .with_transaction(move |session| {
            let coll = coll_for_body.clone();
            async move {
                coll.insert_one(order(1), Some(session), None).await?;
                coll.insert_one(order(2), Some(session), None).await?;
                Ok(())
            }
            .boxed()
        })
        .await
        .unwrap();

    assert_eq!(transport.committed_docs("testdb", "orders").len(), 2);
}

#[tokio::test]
async fn test_with_transaction_aborts_and_reraises_on_failure() {
    let (client, transport) = setup();
    let coll = orders(&client);

    let mut session = client.start_session();
    let coll_for_body = coll.clone();
    let err = session
        .with_transaction(move |session| {
            let coll = coll_for_body.clone();
            async move {
                coll.insert_one(order(1), Some(session), None).await?;
                Err::<(), _>(DriverError::Transport(TransportError::ConnectionFailed(
                    "boom".into(),
                )))
            }
            .boxed()
        })
        .await
        .unwrap_err();

    assert!(matches!(err, DriverError::Transport(_)));
    // No effects of the body's commands are visible afterwards.
    assert!(transport.committed_docs("testdb", "orders").is_empty());
}

/* ========================= deadlines & users ========================= */

#[tokio::test]
async fn test_elapsed_deadline_surfaces_timeout() {
    let (client, _) = setup();
    let coll = orders(&client);

    let err = coll
        .insert_one(order(1), None, Some(Duration::ZERO))
        .await
        .unwrap_err();
    assert_eq!(err, DriverError::Transport(TransportError::Timeout));
}

#[tokio::test]
async fn test_injected_transport_failure_propagates_unmodified() {
    let (client, transport) = setup();
    let coll = orders(&client);

    transport.inject_failure(TransportError::ConnectionFailed("reset by peer".into()));
    let err = coll.insert_one(order(1), None, None).await.unwrap_err();
    assert_eq!(
        err,
        DriverError::Transport(TransportError::ConnectionFailed("reset by peer".into()))
    );
}

#[tokio::test]
async fn test_user_management_round_trip() {
    let (client, _) = setup();
    let db = client.database("admin");

    assert!(!db.has_user("carol", None).await.unwrap());
    db.add_user("carol", "hunter2", &["readWrite"], None).await.unwrap();
    assert!(db.has_user("carol", None).await.unwrap());

    // Creating the same user twice is a server error.
    let err = db.add_user("carol", "hunter2", &[], None).await.unwrap_err();
    assert_eq!(err.server_code(), Some(51003));

    db.remove_user("carol", None).await.unwrap();
    assert!(!db.has_user("carol", None).await.unwrap());

    let err = db.remove_user("carol", None).await.unwrap_err();
    assert_eq!(err.server_code(), Some(11));
}
