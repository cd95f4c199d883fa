//! The client-side sync layer of Chatter.
//!
//! Everything here is written against the
//! [`DocumentStore`](chatter_core::store::DocumentStore) trait:
//!
//! - [`subscription`]: keyed live queries with replacement and cancellation.
//! - [`join`]: enriching query results with the records they reference.
//! - [`feeds`]: the chat list, message, request and profile feeds.
//! - [`handshake`]: chat requests, personal and group chats, and messages.
//! - [`notify`]: the pending-request badge.
//! - [`notepad`]: the debounced per-user notepad.
//! - [`session`]: a signed-in viewer and the subscriptions they own.
//! - [`account`]: usernames, search, preferences and account deletion.

pub mod account;
pub mod config;
pub mod error;
pub mod feeds;
pub mod handshake;
pub mod join;
pub mod notepad;
pub mod notify;
pub mod session;
pub mod subscription;

pub use account::{AccountService, DeletionReport};
pub use config::SyncConfig;
pub use error::{BoxError, Error, Result};
pub use handshake::{ChatService, Relationship};
pub use notepad::{Notepad, SaveStatus};
pub use notify::{Badge, NotificationAggregator};
pub use session::Session;
pub use subscription::{
  Observer, SubscriptionHandle, SubscriptionKey, SubscriptionManager, SubscriptionSlot, observer,
};
