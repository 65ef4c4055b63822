//! Error handling module for driver operations.
//!
//! This module provides comprehensive error handling for the driver core with:
//! - A closed error taxonomy covering BSON, server, transport and session failures
//! - Structured error information extraction from command replies
//! - Consistent JSON error formatting for APIs and logging
//!
//! # Example
//!
//! ```rust,no_run
//! use mongocore::error::{DriverError, Result};
//! use mongocore::error::server::error_info;
//!
//! fn handle_error(err: &DriverError) {
//!     if let DriverError::Server(server_err) = err {
//!         let info = error_info(server_err);
//!         println!("{}", info.to_json().unwrap());
//!     }
//! }
//! ```

pub mod kinds;
pub mod server;

// Re-export commonly used types
pub use kinds::{
    BsonError, DriverError, ErrorDomain, Result, ServerError, SessionError, TransportError,
};
pub use server::{ErrorInfo, WriteError};
