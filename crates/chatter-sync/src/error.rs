//! Error type for `chatter-sync`.
//!
//! Every fallible operation yields a distinguishable variant so callers can
//! render an actionable message. Nothing in this crate retries on its own.

use chatter_core::{
  document::DocPath,
  store::StoreError,
  user::UserId,
};
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
  /// A point lookup or precondition found no document.
  #[error("not found: {0}")]
  NotFound(DocPath),

  #[error("a personal chat between {0} and {1} already exists")]
  DuplicateChat(UserId, UserId),

  #[error("invalid input: {0}")]
  Validation(String),

  #[error("group chats are limited to {max} members, got {requested}")]
  GroupSize { requested: usize, max: usize },

  #[error("{user} is not the recipient of request {request}")]
  NotRecipient { user: UserId, request: String },

  #[error("{user} is not a member of chat {chat}")]
  NotMember { user: UserId, chat: String },

  #[error("{0} is not an administrator")]
  NotAdmin(UserId),

  #[error("username {0:?} is already taken")]
  UsernameTaken(String),

  /// A live query could not be opened or failed after opening.
  #[error("subscription failed: {0}")]
  Subscription(#[source] BoxError),

  /// Loading or saving a debounced document failed.
  #[error("persistence failed: {0}")]
  Persistence(#[source] BoxError),

  #[error("malformed record: {0}")]
  Decode(#[from] chatter_core::Error),

  #[error("store error: {0}")]
  Store(#[source] BoxError),
}

impl Error {
  /// Wrap a backend error, surfacing a missing document as [`Error::NotFound`].
  pub(crate) fn store<E: StoreError>(e: E) -> Self {
    match e.core() {
      Some(chatter_core::Error::NotFound(path)) => Error::NotFound(path.clone()),
      _ => Error::Store(Box::new(e)),
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
