//! Core types and trait definitions for the Chatter document store.
//!
//! This crate is deliberately free of database dependencies. It defines the
//! records the chat application stores, the small query language used to
//! address them, the live-snapshot plumbing shared by every backend, and the
//! [`DocumentStore`](store::DocumentStore) trait the sync layer is written
//! against.

// We intentionally use native `async fn` in traits (stabilised in Rust 1.75).
// Suppress the advisory lint about `Send` bounds on the returned futures.
#![allow(async_fn_in_trait)]

pub mod chat;
pub mod document;
pub mod error;
pub mod live;
pub mod notepad;
pub mod query;
pub mod store;
pub mod user;

pub use error::{Error, Result};
