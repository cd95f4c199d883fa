//! The `DocumentStore` trait and batched write operations.
//!
//! The trait is implemented by storage backends (`chatter-store-memory`,
//! `chatter-store-sqlite`). The sync layer depends on this abstraction, not
//! on any concrete backend.

use std::future::Future;

use serde_json::{Map, Value};

use crate::{
  Error, Result,
  document::{CollectionPath, DocPath, Document},
  live::LiveQuery,
  query::Query,
};

// ─── Write operations ────────────────────────────────────────────────────────

/// One write inside an atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
  /// Create a document; fails with [`Error::AlreadyExists`] if it exists.
  Create { path: DocPath, data: Value },
  /// Create or overwrite a document.
  Set { path: DocPath, data: Value },
  /// Overwrite the given top-level fields; fails with [`Error::NotFound`] if
  /// the document does not exist.
  Merge { path: DocPath, fields: Map<String, Value> },
  /// Delete a document. With `must_exist` a missing document fails the
  /// batch with [`Error::NotFound`]; otherwise deleting nothing succeeds.
  Delete { path: DocPath, must_exist: bool },
}

impl WriteOp {
  pub fn path(&self) -> &DocPath {
    match self {
      WriteOp::Create { path, .. }
      | WriteOp::Set { path, .. }
      | WriteOp::Merge { path, .. }
      | WriteOp::Delete { path, .. } => path,
    }
  }

  /// Compute the document body after this operation, given the body before
  /// it. `None` means the document does not exist.
  pub fn apply(&self, current: Option<Value>) -> Result<Option<Value>> {
    match self {
      WriteOp::Create { path, data } => {
        if current.is_some() {
          return Err(Error::AlreadyExists(path.clone()));
        }
        require_object(path, data)?;
        Ok(Some(data.clone()))
      }
      WriteOp::Set { path, data } => {
        require_object(path, data)?;
        Ok(Some(data.clone()))
      }
      WriteOp::Merge { path, fields } => {
        let mut body = current.ok_or_else(|| Error::NotFound(path.clone()))?;
        let object = body
          .as_object_mut()
          .ok_or_else(|| Error::NotAnObject(path.clone()))?;
        for (key, value) in fields {
          object.insert(key.clone(), value.clone());
        }
        Ok(Some(body))
      }
      WriteOp::Delete { path, must_exist } => {
        if *must_exist && current.is_none() {
          return Err(Error::NotFound(path.clone()));
        }
        Ok(None)
      }
    }
  }
}

fn require_object(path: &DocPath, data: &Value) -> Result<()> {
  if data.is_object() { Ok(()) } else { Err(Error::NotAnObject(path.clone())) }
}

// ─── Backend errors ──────────────────────────────────────────────────────────

/// A backend error type. Backends wrap domain-level failures (missing
/// documents, failed preconditions, denied access) in a [`crate::Error`] so
/// callers can tell them apart from I/O failures.
pub trait StoreError: std::error::Error + Send + Sync + 'static {
  fn core(&self) -> Option<&Error>;
}

// ─── Trait ───────────────────────────────────────────────────────────────────

/// Abstraction over a document store with live queries.
///
/// All methods return `Send` futures so the trait can be driven from
/// multi-threaded tokio runtimes and spawned tasks.
pub trait DocumentStore: Send + Sync + 'static {
  type Error: StoreError;

  // ── Reads ─────────────────────────────────────────────────────────────

  /// Point read. Returns `None` if the document does not exist.
  fn get<'a>(
    &'a self,
    path: &'a DocPath,
  ) -> impl Future<Output = Result<Option<Document>, Self::Error>> + Send + 'a;

  /// One-shot evaluation of `query`.
  fn fetch<'a>(
    &'a self,
    query: &'a Query,
  ) -> impl Future<Output = Result<Vec<Document>, Self::Error>> + Send + 'a;

  /// Open a live query. The first delivery is the initial result set.
  ///
  /// Failing to open (for example on [`Error::PermissionDenied`]) is reported
  /// here; failures after opening arrive in-band and close the query.
  fn subscribe(
    &self,
    query: Query,
  ) -> impl Future<Output = Result<LiveQuery<Self::Error>, Self::Error>> + Send + '_;

  // ── Single writes ─────────────────────────────────────────────────────

  /// Create or overwrite the document at `path`.
  fn set<'a>(
    &'a self,
    path: &'a DocPath,
    data: Value,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Create a document with a store-generated id and return its path.
  fn add<'a>(
    &'a self,
    collection: &'a CollectionPath,
    data: Value,
  ) -> impl Future<Output = Result<DocPath, Self::Error>> + Send + 'a;

  /// Delete the document at `path`; deleting a missing document succeeds.
  fn delete<'a>(
    &'a self,
    path: &'a DocPath,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  // ── Batches ───────────────────────────────────────────────────────────

  /// Apply `ops` in order as one all-or-nothing unit. If any operation fails
  /// nothing is written.
  fn commit(
    &self,
    ops: Vec<WriteOp>,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + '_;
}

#[cfg(test)]
mod tests {
  use serde_json::json;

  use super::*;

  fn path() -> DocPath { CollectionPath::root("users").doc("u1") }

  #[test]
  fn create_refuses_existing_documents() {
    let op = WriteOp::Create { path: path(), data: json!({ "a": 1 }) };
    assert!(matches!(op.apply(Some(json!({}))), Err(Error::AlreadyExists(_))));
    assert_eq!(op.apply(None).unwrap(), Some(json!({ "a": 1 })));
  }

  #[test]
  fn merge_overwrites_only_named_fields() {
    let mut fields = Map::new();
    fields.insert("color".into(), json!("#ff0000"));
    let op = WriteOp::Merge { path: path(), fields };

    let merged = op.apply(Some(json!({ "username": "ann", "color": null }))).unwrap();
    assert_eq!(merged, Some(json!({ "username": "ann", "color": "#ff0000" })));
    assert!(matches!(op.apply(None), Err(Error::NotFound(_))));
  }

  #[test]
  fn delete_precondition_is_opt_in() {
    let lenient = WriteOp::Delete { path: path(), must_exist: false };
    let strict = WriteOp::Delete { path: path(), must_exist: true };
    assert_eq!(lenient.apply(None).unwrap(), None);
    assert!(matches!(strict.apply(None), Err(Error::NotFound(_))));
  }
}
