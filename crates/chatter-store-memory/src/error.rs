//! Error type for `chatter-store-memory`.

use chatter_core::store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] chatter_core::Error),

  /// An injected failure standing in for a transport or backend outage.
  #[error("store unavailable: {0}")]
  Unavailable(String),
}

impl StoreError for Error {
  fn core(&self) -> Option<&chatter_core::Error> {
    match self {
      Error::Core(e) => Some(e),
      Error::Unavailable(_) => None,
    }
  }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
