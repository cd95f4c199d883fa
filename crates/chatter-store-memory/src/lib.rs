//! In-memory backend for the Chatter document store.
//!
//! Everything lives behind one mutex, so commits and live-query deliveries
//! are totally ordered. Besides backing tests and ephemeral sessions, the
//! store can inject faults (denied collections, failing reads and writes,
//! write latency) and keeps a journal of every applied write.

mod store;

pub mod error;

pub use error::{Error, Result};
pub use store::{JournalEntry, MemoryStore};
