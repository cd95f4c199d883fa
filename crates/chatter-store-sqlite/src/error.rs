//! Error type for `chatter-store-sqlite`.

use chatter_core::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] chatter_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  #[error("corrupt row: {0}")]
  Corrupt(String),

  /// Watching the database file for commits from other connections failed.
  #[error("change feed error: {0}")]
  ChangeFeed(String),
}

impl StoreError for Error {
  fn core(&self) -> Option<&chatter_core::Error> {
    match self {
      Error::Core(e) => Some(e),
      _ => None,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
