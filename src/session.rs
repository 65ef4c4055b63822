//! Logical sessions and transactions.
//!
//! A [`ClientSession`] binds a server-tracked session identifier to a
//! sequence of commands. Transactions ride on sessions:
//!
//! ```text
//! NoTransaction --start--> Starting --first command--> InProgress
//! InProgress --commit--> Committed    InProgress --abort--> Aborted
//! ```
//!
//! Committed/Aborted are terminal for the transaction; the session itself
//! may start a fresh transaction afterwards. A session serves at most one
//! transaction at a time and must not be shared across concurrent
//! operations (`&mut self` receivers enforce this at compile time).

use futures::future::BoxFuture;
use tracing::debug;
use uuid::Uuid;

use crate::bson::{Binary, Bson, Document};
use crate::client::Client;
use crate::error::{Result, SessionError};

/// Transaction lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// No transaction has been started.
    NoTransaction,

    /// `start_transaction` was called; the first command has not yet been
    /// sent. The wire `startTransaction: true` flag rides on that command.
    Starting,

    /// At least one command has executed inside the transaction.
    InProgress,

    /// The transaction was committed (terminal for the transaction).
    Committed,

    /// The transaction was aborted (terminal for the transaction).
    Aborted,
}

/// A server-tracked logical session.
pub struct ClientSession {
    client: Client,
    id: Uuid,
    state: TransactionState,
    txn_number: i64,
}

impl ClientSession {
    pub(crate) fn new(client: Client) -> Self {
        ClientSession {
            client,
            id: Uuid::new_v4(),
            state: TransactionState::NoTransaction,
            txn_number: 0,
        }
    }

    /// The session identifier (`lsid`).
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Current transaction state.
    pub fn transaction_state(&self) -> TransactionState {
        self.state
    }

    /// Begin a transaction on this session.
    ///
    /// No command is sent; the transaction starts on the wire with the
    /// first command issued through this session.
    pub fn start_transaction(&mut self) -> Result<()> {
        match self.state {
            TransactionState::Starting | TransactionState::InProgress => {
                Err(SessionError::AlreadyInTransaction.into())
            }
            _ => {
                self.txn_number += 1;
                self.state = TransactionState::Starting;
                debug!(session = %self.id, txn = self.txn_number, "transaction started");
                Ok(())
            }
        }
    }

    /// Commit the active transaction.
    ///
    /// On failure the transaction stays `InProgress`: the caller may retry
    /// the commit or abort it.
    pub async fn commit_transaction(&mut self) -> Result<()> {
        match self.state {
            TransactionState::Starting => {
                // Nothing ran inside the transaction; there is nothing for
                // the server to commit.
                self.state = TransactionState::Committed;
                Ok(())
            }
            TransactionState::InProgress => {
                let command = self.finishing_command("commitTransaction");
                let session_id = self.id;
                self.client.execute_finish(session_id, command).await?;
                self.state = TransactionState::Committed;
                debug!(session = %self.id, txn = self.txn_number, "transaction committed");
                Ok(())
            }
            _ => Err(SessionError::NoActiveTransaction.into()),
        }
    }

    /// Abort the active transaction, discarding its effects.
    pub async fn abort_transaction(&mut self) -> Result<()> {
        match self.state {
            TransactionState::Starting => {
                self.state = TransactionState::Aborted;
                Ok(())
            }
            TransactionState::InProgress => {
                let command = self.finishing_command("abortTransaction");
                let session_id = self.id;
                let result = self.client.execute_finish(session_id, command).await;
                // Abort is terminal even when the round trip fails; the
                // server discards the transaction when the session expires.
                self.state = TransactionState::Aborted;
                debug!(session = %self.id, txn = self.txn_number, "transaction aborted");
                result
            }
            _ => Err(SessionError::NoActiveTransaction.into()),
        }
    }

    /// Run `body` inside a transaction scope.
    ///
    /// Starts a transaction, executes the body with this session bound, and
    /// commits on success; on any failure raised by the body the
    /// transaction is aborted and the error re-raised. Exactly one of
    /// commit/abort is attempted, never both, never neither.
    pub async fn with_transaction<T, F>(&mut self, mut body: F) -> Result<T>
    where
        F: for<'a> FnMut(&'a mut ClientSession) -> BoxFuture<'a, Result<T>>,
    {
        self.start_transaction()?;
        match body(self).await {
            Ok(value) => {
                self.commit_transaction().await?;
                Ok(value)
            }
            Err(err) => {
                // Abort failures must not mask the body's error.
                if let Err(abort_err) = self.abort_transaction().await {
                    debug!(session = %self.id, error = %abort_err, "abort after body failure also failed");
                }
                Err(err)
            }
        }
    }

    /// Append session (and transaction) fields to an outgoing command.
    pub(crate) fn stamp(&mut self, command: &mut Document) {
        let lsid = Document::new().with("id", Bson::Binary(Binary::from_uuid(self.id)));
        command.append("lsid", lsid);

        match self.state {
            TransactionState::Starting => {
                command.append("txnNumber", self.txn_number);
                command.append("startTransaction", true);
                command.append("autocommit", false);
                self.state = TransactionState::InProgress;
            }
            TransactionState::InProgress => {
                command.append("txnNumber", self.txn_number);
                command.append("autocommit", false);
            }
            _ => {}
        }
    }

    /// `commitTransaction`/`abortTransaction` command with session fields.
    fn finishing_command(&self, name: &str) -> Document {
        let lsid = Document::new().with("id", Bson::Binary(Binary::from_uuid(self.id)));
        Document::new()
            .with(name, 1i32)
            .with("lsid", lsid)
            .with("txnNumber", self.txn_number)
            .with("autocommit", false)
    }
}

impl Client {
    /// Dispatch a transaction-finishing command against `admin` without
    /// re-stamping session fields.
    async fn execute_finish(&self, session_id: Uuid, command: Document) -> Result<()> {
        let reply = self
            .transport()
            .send_command("admin", &command, Some(session_id), None)
            .await?;
        if let Some(err) = crate::error::server::check_reply(&reply) {
            return Err(err.into());
        }
        Ok(())
    }
}
