//! Live queries: snapshots, change sets and the subscriber registry shared by
//! the store backends.
//!
//! A live query delivers the full initial result set first, then one
//! [`Snapshot`] per change to that result set, until the receiving
//! [`LiveQuery`] is dropped.

use std::{
  collections::{HashMap, HashSet},
  sync::Mutex,
};

use serde::de::DeserializeOwned;
use tokio::sync::mpsc;

use crate::{
  Result,
  document::{CollectionPath, Document, Record},
  query::Query,
};

// ─── Snapshot ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
  Added,
  Modified,
  Removed,
}

/// One document entering, changing within, or leaving a result set.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentChange {
  pub kind: ChangeKind,
  pub doc:  Document,
}

/// The current result set of a live query plus what changed since the
/// previous delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
  pub docs:    Vec<Document>,
  pub changes: Vec<DocumentChange>,
}

impl Snapshot {
  /// The first snapshot of a live query: every document is `Added`.
  pub fn initial(docs: Vec<Document>) -> Self {
    let changes = docs
      .iter()
      .map(|doc| DocumentChange { kind: ChangeKind::Added, doc: doc.clone() })
      .collect();
    Self { docs, changes }
  }

  /// Diff `docs` against the previous result set. Returns `None` when
  /// nothing changed.
  pub fn diff(previous: &[Document], docs: Vec<Document>) -> Option<Self> {
    let before: HashMap<&str, &Document> =
      previous.iter().map(|d| (d.id(), d)).collect();
    let now: HashSet<&str> = docs.iter().map(Document::id).collect();

    let mut changes = Vec::new();
    for doc in &docs {
      match before.get(doc.id()) {
        None => changes.push(DocumentChange { kind: ChangeKind::Added, doc: doc.clone() }),
        Some(old) if *old != doc => {
          changes.push(DocumentChange { kind: ChangeKind::Modified, doc: doc.clone() })
        }
        Some(_) => {}
      }
    }
    for old in previous {
      if !now.contains(old.id()) {
        changes.push(DocumentChange { kind: ChangeKind::Removed, doc: old.clone() });
      }
    }

    let reordered = previous.len() == docs.len()
      && previous.iter().zip(&docs).any(|(a, b)| a.id() != b.id());
    if changes.is_empty() && !reordered {
      return None;
    }
    Some(Self { docs, changes })
  }

  pub fn len(&self) -> usize { self.docs.len() }

  pub fn is_empty(&self) -> bool { self.docs.is_empty() }

  /// Decode every document of the snapshot, in order.
  pub fn decode<T: DeserializeOwned>(&self) -> Result<Vec<Record<T>>> {
    self.docs.iter().map(Document::decode).collect()
  }
}

// ─── Receiving end ───────────────────────────────────────────────────────────

/// The receiving end of a live query. Dropping it cancels the query.
#[derive(Debug)]
pub struct LiveQuery<E> {
  rx: mpsc::UnboundedReceiver<Result<Snapshot, E>>,
}

impl<E> LiveQuery<E> {
  /// Wait for the next delivery. `None` once the store has closed the query
  /// (for instance after reporting an error).
  pub async fn next(&mut self) -> Option<Result<Snapshot, E>> { self.rx.recv().await }
}

// ─── Subscriber registry ─────────────────────────────────────────────────────

struct Subscriber<E> {
  query: Query,
  last:  Vec<Document>,
  tx:    mpsc::UnboundedSender<Result<Snapshot, E>>,
}

/// Registry of open live queries for one backend.
///
/// Backends call [`register`](Self::register) with the initial result set
/// and [`publish`](Self::publish) with the fresh contents of every collection
/// touched by a commit. Subscribers whose receiver was dropped are pruned on
/// every access.
pub struct SubscriberSet<E> {
  inner: Mutex<Vec<Subscriber<E>>>,
}

impl<E> Default for SubscriberSet<E> {
  fn default() -> Self { Self { inner: Mutex::new(Vec::new()) } }
}

impl<E> SubscriberSet<E> {
  pub fn new() -> Self { Self::default() }

  fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Subscriber<E>>> {
    // A panic while holding the lock cannot leave the registry half-updated:
    // every mutation is a single push, retain or field assignment.
    let mut guard = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    guard.retain(|s| !s.tx.is_closed());
    guard
  }

  /// Open a live query whose initial result set is `initial`.
  pub fn register(&self, query: Query, initial: Vec<Document>) -> LiveQuery<E> {
    let (tx, rx) = mpsc::unbounded_channel();
    let initial = query.apply(initial);
    // The receiver is alive, so the send cannot fail.
    let _ = tx.send(Ok(Snapshot::initial(initial.clone())));
    self.lock().push(Subscriber { query, last: initial, tx });
    LiveQuery { rx }
  }

  /// Number of open live queries.
  pub fn len(&self) -> usize { self.lock().len() }

  pub fn is_empty(&self) -> bool { self.len() == 0 }

  /// Distinct collections that at least one open live query watches.
  pub fn collections(&self) -> Vec<CollectionPath> {
    let mut out: Vec<CollectionPath> =
      self.lock().iter().map(|s| s.query.collection.clone()).collect();
    out.sort();
    out.dedup();
    out
  }

  /// Re-evaluate every live query over the given collection contents and
  /// deliver a snapshot to those whose result set changed.
  pub fn publish(&self, contents: &HashMap<CollectionPath, Vec<Document>>) {
    for sub in self.lock().iter_mut() {
      let Some(docs) = contents.get(&sub.query.collection) else {
        continue;
      };
      let fresh = sub.query.apply(docs.iter().cloned());
      if let Some(snapshot) = Snapshot::diff(&sub.last, fresh) {
        sub.last = snapshot.docs.clone();
        let _ = sub.tx.send(Ok(snapshot));
      }
    }
  }

  /// Deliver an error to every open live query and close them all.
  pub fn fail_all(&self, mut make_error: impl FnMut() -> E) {
    let mut guard = self.lock();
    for sub in guard.drain(..) {
      let _ = sub.tx.send(Err(make_error()));
    }
  }
}
