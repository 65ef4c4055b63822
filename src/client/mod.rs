//! Client, database and collection handles.
//!
//! This module provides the handle hierarchy including:
//! - `Client`: owns the parsed URI/options and the injected transport
//! - `Database` / `Collection`: cheap, cloneable name-scoped handles
//! - The central command dispatch every operation funnels through
//!
//! Handles carry no session binding; commands run outside any transaction
//! unless a [`crate::session::ClientSession`] is passed explicitly.

pub mod uri;

use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::bson::Document;
use crate::error::{
    Result,
    server::{check_reply, error_info, extract_write_concern_error},
};
use crate::session::ClientSession;
use crate::transport::Transport;

pub use uri::{ClientOptions, ClientUri, Host};

struct ClientInner {
    uri: ClientUri,
    transport: Arc<dyn Transport>,
}

/// Handle to a MongoDB deployment.
///
/// Owns configuration and dispatches commands to the injected transport.
/// Cloning is cheap; clones share the same transport.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Build a client from a connection string and an injected transport.
    ///
    /// The core never opens sockets itself; all network concerns live in
    /// the transport collaborator.
    pub fn with_transport(uri: &str, transport: Arc<dyn Transport>) -> Result<Client> {
        let uri = ClientUri::parse(uri)?;
        Ok(Client {
            inner: Arc::new(ClientInner { uri, transport }),
        })
    }

    /// The parsed connection string.
    pub fn uri(&self) -> &ClientUri {
        &self.inner.uri
    }

    /// Client options merged from the URI query string.
    pub fn options(&self) -> &ClientOptions {
        &self.inner.uri.options
    }

    /// Handle to a database by name. Never bound to a session.
    pub fn database(&self, name: &str) -> Database {
        Database {
            client: self.clone(),
            name: name.to_string(),
        }
    }

    /// Handle to the database named in the connection string, if any.
    pub fn default_database(&self) -> Option<Database> {
        self.inner
            .uri
            .database
            .as_deref()
            .map(|name| self.database(name))
    }

    /// Start a new logical session against this client.
    pub fn start_session(&self) -> ClientSession {
        ClientSession::new(self.clone())
    }

    pub(crate) fn transport(&self) -> &Arc<dyn Transport> {
        &self.inner.transport
    }

    /// Central command dispatch.
    ///
    /// Stamps session fields when a session is given, performs the round
    /// trip, and converts `{ok: 0}` replies and `writeConcernError` blocks
    /// into [`crate::error::ServerError`]. Replies that are successful at
    /// the top level are returned raw; per-item write errors are
    /// interpreted by the calling operation.
    pub(crate) async fn execute(
        &self,
        database: &str,
        mut command: Document,
        session: Option<&mut ClientSession>,
        deadline: Option<Duration>,
    ) -> Result<Document> {
        let command_name = command.keys().next().unwrap_or("").to_string();

        let session_id = match session {
            Some(session) => {
                session.stamp(&mut command);
                Some(session.id())
            }
            None => None,
        };

        debug!(
            database,
            command = command_name.as_str(),
            in_session = session_id.is_some(),
            "dispatching command"
        );

        let reply = self
            .transport()
            .send_command(database, &command, session_id, deadline)
            .await?;

        if let Some(err) = check_reply(&reply) {
            let info = error_info(&err).to_json_compact().unwrap_or_default();
            debug!(
                database,
                command = command_name.as_str(),
                error = %info,
                "server reported failure"
            );
            return Err(err.into());
        }

        // A write-concern failure arrives alongside `ok: 1`; the write
        // itself may have happened, but its durability guarantee did not
        // hold.
        if let Some(err) = extract_write_concern_error(&reply) {
            let info = error_info(&err).to_json_compact().unwrap_or_default();
            debug!(
                database,
                command = command_name.as_str(),
                error = %info,
                "write concern failure"
            );
            return Err(err.into());
        }
        Ok(reply)
    }
}

/// Handle to a database.
#[derive(Clone)]
pub struct Database {
    client: Client,
    name: String,
}

impl Database {
    /// Database name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The owning client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    /// Handle to a collection by name.
    pub fn collection(&self, name: &str) -> Collection {
        Collection {
            database: self.clone(),
            name: name.to_string(),
        }
    }

    /// Execute an arbitrary command document and return the raw first
    /// reply. The escape hatch for operations not otherwise modeled.
    pub async fn run_command(
        &self,
        command: Document,
        session: Option<&mut ClientSession>,
        deadline: Option<Duration>,
    ) -> Result<Document> {
        self.client.execute(&self.name, command, session, deadline).await
    }

    /// Round-trip liveness check.
    pub async fn ping(&self, deadline: Option<Duration>) -> Result<()> {
        let command = Document::new().with("ping", 1i32);
        self.client.execute(&self.name, command, None, deadline).await?;
        Ok(())
    }
}

/// Handle to a collection.
///
/// Operation methods live in [`crate::ops`].
#[derive(Clone)]
pub struct Collection {
    pub(crate) database: Database,
    pub(crate) name: String,
}

impl Collection {
    /// Collection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The owning database handle.
    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Fully qualified `db.coll` namespace.
    pub fn namespace(&self) -> String {
        format!("{}.{}", self.database.name(), self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use uuid::Uuid;

    use crate::error::{DriverError, ErrorDomain};
    use crate::transport::mock::MockTransport;

    fn test_client() -> Client {
        Client::with_transport(
            "mongodb://localhost/app?appname=test",
            Arc::new(MockTransport::new()),
        )
        .unwrap()
    }

    /// Acknowledges every write but reports a write-concern failure.
    struct UnreplicatedTransport;

    #[async_trait]
    impl Transport for UnreplicatedTransport {
        async fn send_command(
            &self,
            _database: &str,
            _command: &Document,
            _session_id: Option<Uuid>,
            _deadline: Option<Duration>,
        ) -> Result<Document> {
            let concern = Document::new()
                .with("code", 64i32)
                .with("errmsg", "waiting for replication timed out");
            Ok(Document::new()
                .with("n", 1i32)
                .with("writeConcernError", concern)
                .with("ok", 1.0f64))
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
            Ok(Document::new().with("ok", 1.0f64))
        }
    }

    #[test]
    fn test_handles_are_name_scoped() {
        let client = test_client();
        let db = client.database("shop");
        let coll = db.collection("orders");
        assert_eq!(db.name(), "shop");
        assert_eq!(coll.name(), "orders");
        assert_eq!(coll.namespace(), "shop.orders");
    }

    #[test]
    fn test_default_database_comes_from_uri() {
        let client = test_client();
        assert_eq!(client.default_database().unwrap().name(), "app");
        assert_eq!(client.options().appname.as_deref(), Some("test"));
    }

    #[tokio::test]
    async fn test_ping() {
        let client = test_client();
        client.database("admin").ping(None).await.unwrap();
    }

    #[tokio::test]
    async fn test_run_command_returns_raw_reply() {
        let client = test_client();
        let reply = client
            .database("admin")
            .run_command(Document::new().with("ping", 1i32), None, None)
            .await
            .unwrap();
        assert_eq!(reply.get_f64("ok"), Some(1.0));
    }

    #[tokio::test]
    async fn test_write_concern_error_surfaces_as_server_error() {
        let client =
            Client::with_transport("mongodb://localhost", Arc::new(UnreplicatedTransport))
                .unwrap();
        let err = client
            .database("db")
            .run_command(Document::new().with("insert", "c"), None, None)
            .await
            .unwrap_err();

        let DriverError::Server(server_err) = err else {
            panic!("write concern failure must surface as a server error");
        };
        assert_eq!(server_err.domain, ErrorDomain::WriteConcern);
        assert_eq!(server_err.code, 64);
    }

    #[tokio::test]
    async fn test_unknown_command_is_server_error() {
        let client = test_client();
        let err = client
            .database("admin")
            .run_command(Document::new().with("borkbork", 1i32), None, None)
            .await
            .unwrap_err();
        assert_eq!(err.server_code(), Some(59));
    }
}
