//! Error types for `chatter-core`.

use thiserror::Error;

use crate::document::DocPath;

#[derive(Debug, Error)]
pub enum Error {
  #[error("document not found: {0}")]
  NotFound(DocPath),

  #[error("document already exists: {0}")]
  AlreadyExists(DocPath),

  #[error("permission denied: {0}")]
  PermissionDenied(String),

  #[error("document data must be a JSON object: {0}")]
  NotAnObject(DocPath),

  #[error("invalid path: {0:?}")]
  InvalidPath(String),

  #[error("malformed document {path}: {source}")]
  Decode {
    path:   DocPath,
    #[source]
    source: serde_json::Error,
  },

  #[error("serialization error: {0}")]
  Serialization(#[from] serde_json::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
