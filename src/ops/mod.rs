//! Command/result layer.
//!
//! Defines every high-level operation as a pure transformation from
//! (target identity, operation payload, options) to a wire command
//! document, plus a reply interpreter producing the operation's typed
//! result. The layer never retries; any retry policy belongs to the
//! transport collaborator.
//!
//! Operations are exposed as methods on [`crate::client::Collection`] and
//! [`crate::client::Database`]:
//! - `write`: insertOne/insertMany, updateOne/updateMany, deleteOne/deleteMany
//! - `read`: find/findOne, aggregate, mapReduce, countDocuments
//! - `users`: addUser/removeUser/hasUser

pub mod read;
pub mod results;
pub mod users;
pub mod write;

#[cfg(test)]
mod tests;

pub use read::{AggregateOptions, FindOptions};
pub use results::{DeleteResult, InsertManyResult, InsertOneResult, UpdateResult};
