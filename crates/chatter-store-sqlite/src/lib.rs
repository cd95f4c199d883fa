//! SQLite backend for the Chatter document store.
//!
//! Wraps [`tokio_rusqlite`] so all database access runs on a dedicated thread
//! without blocking the async runtime. Documents are stored as JSON bodies
//! keyed by `(collection, id)`; queries are evaluated over the collection's
//! rows with the shared reference semantics of [`chatter_core::query`].

mod encode;
mod schema;
mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;

#[cfg(test)]
mod tests;
