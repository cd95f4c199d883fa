//! Document addressing and the stored document envelope.
//!
//! Paths follow the familiar document-store layout: a collection path is an
//! odd number of `/`-separated segments (`chats`, `chats/{id}/messages`) and
//! a document path appends one id segment to it.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use uuid::Uuid;

use crate::{Error, Result};

// ─── Paths ───────────────────────────────────────────────────────────────────

/// The path of a collection of documents.
#[derive(
  Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct CollectionPath(String);

impl CollectionPath {
  /// A top-level collection such as `users`.
  pub fn root(name: &str) -> Self { Self(name.to_owned()) }

  /// Parse a collection path, rejecting empty segments and paths that name a
  /// document rather than a collection.
  pub fn parse(path: &str) -> Result<Self> {
    let segments: Vec<&str> = path.split('/').collect();
    if segments.iter().any(|s| s.is_empty()) || segments.len() % 2 == 0 {
      return Err(Error::InvalidPath(path.to_owned()));
    }
    Ok(Self(path.to_owned()))
  }

  pub fn as_str(&self) -> &str { &self.0 }

  /// The document `id` within this collection.
  pub fn doc(&self, id: impl Into<String>) -> DocPath {
    DocPath { collection: self.clone(), id: id.into() }
  }

  /// A document in this collection with a freshly generated id.
  pub fn auto_doc(&self) -> DocPath { self.doc(Uuid::new_v4().simple().to_string()) }
}

impl fmt::Display for CollectionPath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// The path of a single document.
#[derive(
  Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct DocPath {
  pub collection: CollectionPath,
  pub id:         String,
}

impl DocPath {
  /// Parse `collection/.../id`.
  pub fn parse(path: &str) -> Result<Self> {
    let (collection, id) = path
      .rsplit_once('/')
      .ok_or_else(|| Error::InvalidPath(path.to_owned()))?;
    if id.is_empty() {
      return Err(Error::InvalidPath(path.to_owned()));
    }
    Ok(CollectionPath::parse(collection)?.doc(id))
  }

  /// A sub-collection nested under this document.
  pub fn child(&self, name: &str) -> CollectionPath {
    CollectionPath(format!("{self}/{name}"))
  }
}

impl fmt::Display for DocPath {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.collection, self.id)
  }
}

// ─── Document ────────────────────────────────────────────────────────────────

/// A stored document as delivered by a backend.
///
/// `created_at` and `seq` are assigned by the store when the document is
/// first written and never change afterwards; `seq` is a store-wide insertion
/// counter used to break timestamp ties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
  pub path:       DocPath,
  pub data:       Value,
  pub created_at: DateTime<Utc>,
  pub updated_at: DateTime<Utc>,
  pub seq:        u64,
}

impl Document {
  pub fn id(&self) -> &str { &self.path.id }

  /// A top-level field of the document body.
  pub fn field(&self, name: &str) -> Option<&Value> { self.data.get(name) }

  /// Deserialise the document body into a typed [`Record`].
  pub fn decode<T: DeserializeOwned>(&self) -> Result<Record<T>> {
    let data = T::deserialize(&self.data).map_err(|source| Error::Decode {
      path: self.path.clone(),
      source,
    })?;
    Ok(Record {
      id: self.path.id.clone(),
      created_at: self.created_at,
      data,
    })
  }
}

/// A typed document body together with its identity metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record<T> {
  pub id:         String,
  pub created_at: DateTime<Utc>,
  pub data:       T,
}

/// Serialise a record body, requiring a JSON object at the top level.
pub fn encode_body<T: Serialize>(path: &DocPath, body: &T) -> Result<Value> {
  let value = serde_json::to_value(body)?;
  if !value.is_object() {
    return Err(Error::NotAnObject(path.clone()));
  }
  Ok(value)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn nested_paths_render_and_parse() {
    let chat = CollectionPath::root("chats").doc("c1");
    let messages = chat.child("messages");
    assert_eq!(messages.as_str(), "chats/c1/messages");

    let msg = DocPath::parse("chats/c1/messages/m9").unwrap();
    assert_eq!(msg.collection, messages);
    assert_eq!(msg.id, "m9");
    assert_eq!(msg.to_string(), "chats/c1/messages/m9");
  }

  #[test]
  fn document_paths_are_not_collections() {
    assert!(CollectionPath::parse("chats/c1").is_err());
    assert!(CollectionPath::parse("chats//messages").is_err());
    assert!(DocPath::parse("chats").is_err());
    assert!(DocPath::parse("chats/").is_err());
  }

  #[test]
  fn encode_body_rejects_scalars() {
    let path = CollectionPath::root("notes").doc("n");
    assert!(matches!(encode_body(&path, &3), Err(Error::NotAnObject(_))));
  }
}
