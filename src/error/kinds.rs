use std::fmt;

use crate::bson::ElementType;

/// Crate-wide `Result` type using [`DriverError`] as the error.
///
/// This alias is re-exported by the parent `error` module and is intended
/// to be used throughout the crate for fallible operations.
pub type Result<T> = std::result::Result<T, DriverError>;

/// Top-level error type for driver operations.
///
/// This type wraps more specific error kinds and provides a single
/// error type that can be used throughout the crate.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverError {
    /// BSON encoding/decoding/access errors.
    Bson(BsonError),

    /// Invalid connection string.
    ///
    /// The URI arm of the invalid-encoding family: the connection string
    /// failed to parse against the `mongodb://` grammar.
    InvalidUri(String),

    /// Server-reported command failure.
    Server(ServerError),

    /// Transport-level failures reported by the injected transport.
    Transport(TransportError),

    /// Session and transaction state violations.
    Session(SessionError),

    /// A destroyed resource (cursor, session) was used again.
    UseAfterClose(&'static str),
}

/// BSON-specific errors.
#[derive(Debug, Clone, PartialEq)]
pub enum BsonError {
    /// Structural violation while encoding or decoding a document.
    ///
    /// Covers truncated buffers, bad length prefixes, missing terminators,
    /// unknown element tags, nesting past the configured depth limit and
    /// rejected duplicate keys.
    MalformedDocument(String),

    /// A typed accessor was called on an element with a different type tag.
    TypeMismatch {
        expected: ElementType,
        actual: ElementType,
    },

    /// Invalid UTF-8 in a key or string value.
    InvalidEncoding(String),
}

/// Server-reported error extracted from a command reply.
///
/// Mirrors the domain/code/message triple of the C driver's `bson_error_t`.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerError {
    /// Where in the reply the error surfaced.
    pub domain: ErrorDomain,

    /// Numeric server error code (e.g. 11000 for duplicate key).
    pub code: i32,

    /// Human-readable server message.
    pub message: String,
}

/// The part of a server reply an error was reported in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorDomain {
    /// Top-level command failure (`ok: 0`).
    Command,

    /// Per-item write failure (`writeErrors`).
    Write,

    /// Write-concern failure (`writeConcernError`).
    WriteConcern,
}

/// Transport-specific errors surfaced by the injected collaborator.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportError {
    /// Failed to reach or converse with the server.
    ConnectionFailed(String),

    /// The command deadline elapsed before a reply arrived.
    ///
    /// A timed-out command was attempted at most once; retrying is the
    /// caller's responsibility.
    Timeout,

    /// The transport has been shut down.
    Closed,
}

/// Session and transaction state errors.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    /// `start_transaction` was called while one is already in progress.
    AlreadyInTransaction,

    /// Commit or abort was requested without an active transaction.
    NoActiveTransaction,
}

/* ========================= Display & Error impls ========================= */

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverError::Bson(e) => write!(f, "BSON error: {e}"),
            DriverError::InvalidUri(uri) => write!(f, "Invalid connection URI: {uri}"),
            DriverError::Server(e) => write!(f, "{e}"),
            DriverError::Transport(e) => write!(f, "Transport error: {e}"),
            DriverError::Session(e) => write!(f, "Session error: {e}"),
            DriverError::UseAfterClose(what) => {
                write!(f, "Operation on closed {what}")
            }
        }
    }
}

impl fmt::Display for BsonError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BsonError::MalformedDocument(msg) => write!(f, "Malformed document: {msg}"),
            BsonError::TypeMismatch { expected, actual } => {
                write!(f, "Type mismatch: expected {expected:?}, found {actual:?}")
            }
            BsonError::InvalidEncoding(msg) => write!(f, "Invalid encoding: {msg}"),
        }
    }
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Server error ({:?}, code {}): {}",
            self.domain, self.code, self.message
        )
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::ConnectionFailed(msg) => write!(f, "Failed to connect: {msg}"),
            TransportError::Timeout => write!(f, "Command deadline exceeded"),
            TransportError::Closed => write!(f, "Transport is closed"),
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::AlreadyInTransaction => {
                write!(f, "A transaction is already in progress on this session")
            }
            SessionError::NoActiveTransaction => {
                write!(f, "No transaction is in progress on this session")
            }
        }
    }
}

impl std::error::Error for DriverError {}
impl std::error::Error for BsonError {}
impl std::error::Error for ServerError {}
impl std::error::Error for TransportError {}
impl std::error::Error for SessionError {}

/* ========================= Conversions to DriverError ========================= */

impl From<BsonError> for DriverError {
    fn from(err: BsonError) -> Self {
        DriverError::Bson(err)
    }
}

impl From<ServerError> for DriverError {
    fn from(err: ServerError) -> Self {
        DriverError::Server(err)
    }
}

impl From<TransportError> for DriverError {
    fn from(err: TransportError) -> Self {
        DriverError::Transport(err)
    }
}

impl From<SessionError> for DriverError {
    fn from(err: SessionError) -> Self {
        DriverError::Session(err)
    }
}

impl DriverError {
    /// Server error code, when this error carries one.
    pub fn server_code(&self) -> Option<i32> {
        match self {
            DriverError::Server(e) => Some(e.code),
            _ => None,
        }
    }

    /// Whether this is a server-reported duplicate key error.
    pub fn is_duplicate_key(&self) -> bool {
        matches!(self.server_code(), Some(11000) | Some(11001))
    }
}
