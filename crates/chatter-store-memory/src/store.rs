//! [`MemoryStore`], the in-memory implementation of [`DocumentStore`].

use std::{
  collections::{BTreeMap, HashMap, HashSet},
  sync::{Arc, Mutex, MutexGuard},
  time::Duration,
};

use chatter_core::{
  document::{CollectionPath, DocPath, Document},
  live::{LiveQuery, SubscriberSet},
  query::Query,
  store::{DocumentStore, WriteOp},
};
use chrono::Utc;
use serde_json::Value;
use tokio::time::Instant;

use crate::{Error, Result};

// ─── Journal ─────────────────────────────────────────────────────────────────

/// One applied write, in commit order.
#[derive(Debug, Clone)]
pub struct JournalEntry {
  /// Commit instant on the tokio clock (so paused-clock tests see virtual
  /// time).
  pub at:    Instant,
  /// Writes from the same `commit` share a batch number.
  pub batch: u64,
  pub op:    WriteOp,
}

// ─── State ───────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Faults {
  denied:        HashSet<CollectionPath>,
  unreadable:    HashSet<DocPath>,
  fail_writes:   bool,
  write_latency: Option<Duration>,
}

#[derive(Default)]
struct State {
  docs:       BTreeMap<CollectionPath, BTreeMap<String, Document>>,
  next_seq:   u64,
  next_batch: u64,
  faults:     Faults,
  journal:    Vec<JournalEntry>,
}

impl State {
  fn collection_docs(&self, collection: &CollectionPath) -> Vec<Document> {
    self
      .docs
      .get(collection)
      .map(|docs| docs.values().cloned().collect())
      .unwrap_or_default()
  }

  fn current(&self, path: &DocPath) -> Option<&Document> {
    self.docs.get(&path.collection)?.get(&path.id)
  }
}

#[derive(Default)]
struct Inner {
  state: Mutex<State>,
  live:  SubscriberSet<Error>,
}

// ─── Store ───────────────────────────────────────────────────────────────────

/// A document store held entirely in process memory.
///
/// Cloning is cheap; clones share the same documents and live queries.
#[derive(Clone, Default)]
pub struct MemoryStore {
  inner: Arc<Inner>,
}

impl MemoryStore {
  pub fn new() -> Self { Self::default() }

  fn state(&self) -> MutexGuard<'_, State> {
    self.inner.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  // ── Fault injection ───────────────────────────────────────────────────────

  /// Reject reads and live queries on `collection` with
  /// [`chatter_core::Error::PermissionDenied`].
  pub fn deny(&self, collection: CollectionPath) {
    self.state().faults.denied.insert(collection);
  }

  /// Make point reads of `path` fail with [`Error::Unavailable`].
  pub fn fail_reads_of(&self, path: DocPath) {
    self.state().faults.unreadable.insert(path);
  }

  /// Make every write fail with [`Error::Unavailable`] until reset.
  pub fn fail_writes(&self, fail: bool) { self.state().faults.fail_writes = fail; }

  /// Delay every write by `latency` before it is applied.
  pub fn set_write_latency(&self, latency: Option<Duration>) {
    self.state().faults.write_latency = latency;
  }

  // ── Introspection ─────────────────────────────────────────────────────────

  /// Every write applied so far, in commit order.
  pub fn journal(&self) -> Vec<JournalEntry> { self.state().journal.clone() }

  /// Number of open live queries.
  pub fn live_queries(&self) -> usize { self.inner.live.len() }

  // ── Internals ─────────────────────────────────────────────────────────────

  fn check_readable(state: &State, collection: &CollectionPath) -> Result<()> {
    if state.faults.denied.contains(collection) {
      return Err(chatter_core::Error::PermissionDenied(collection.to_string()).into());
    }
    Ok(())
  }

  /// Apply `ops` atomically and publish the touched collections.
  async fn apply(&self, ops: Vec<WriteOp>) -> Result<()> {
    let latency = self.state().faults.write_latency;
    if let Some(latency) = latency {
      tokio::time::sleep(latency).await;
    }

    let mut guard = self.state();
    let state = &mut *guard;
    if state.faults.fail_writes {
      return Err(Error::Unavailable("writes are failing".into()));
    }

    // Stage every result first so a failing op leaves the store untouched.
    let mut staged: HashMap<DocPath, Option<Value>> = HashMap::new();
    let mut order: Vec<DocPath> = Vec::new();
    for op in &ops {
      let path = op.path();
      let before = match staged.get(path) {
        Some(value) => value.clone(),
        None => {
          order.push(path.clone());
          state.current(path).map(|d| d.data.clone())
        }
      };
      let after = op.apply(before)?;
      staged.insert(path.clone(), after);
    }

    let now = Utc::now();
    let mut touched: HashSet<CollectionPath> = HashSet::new();
    for path in order {
      let Some(value) = staged.remove(&path) else {
        continue;
      };
      touched.insert(path.collection.clone());
      match value {
        Some(data) => {
          let seq = state.next_seq;
          let collection = state.docs.entry(path.collection.clone()).or_default();
          match collection.get_mut(&path.id) {
            Some(existing) => {
              existing.data = data;
              existing.updated_at = now;
            }
            None => {
              collection.insert(path.id.clone(), Document {
                path,
                data,
                created_at: now,
                updated_at: now,
                seq,
              });
              state.next_seq += 1;
            }
          }
        }
        None => {
          if let Some(collection) = state.docs.get_mut(&path.collection) {
            collection.remove(&path.id);
          }
        }
      }
    }

    let batch = state.next_batch;
    state.next_batch += 1;
    let at = Instant::now();
    state
      .journal
      .extend(ops.into_iter().map(|op| JournalEntry { at, batch, op }));

    let watched: HashSet<CollectionPath> = self.inner.live.collections().into_iter().collect();
    let contents: HashMap<CollectionPath, Vec<Document>> = touched
      .into_iter()
      .filter(|c| watched.contains(c))
      .map(|c| {
        let docs = state.collection_docs(&c);
        (c, docs)
      })
      .collect();
    // Publishing under the state lock keeps deliveries in commit order.
    self.inner.live.publish(&contents);
    tracing::trace!(batch, collections = contents.len(), "memory store commit");
    Ok(())
  }
}

// ─── DocumentStore impl ──────────────────────────────────────────────────────

impl DocumentStore for MemoryStore {
  type Error = Error;

  async fn get(&self, path: &DocPath) -> Result<Option<Document>> {
    let state = self.state();
    Self::check_readable(&state, &path.collection)?;
    if state.faults.unreadable.contains(path) {
      return Err(Error::Unavailable(format!("read of {path} failed")));
    }
    Ok(state.current(path).cloned())
  }

  async fn fetch(&self, query: &Query) -> Result<Vec<Document>> {
    let state = self.state();
    Self::check_readable(&state, &query.collection)?;
    Ok(query.apply(state.collection_docs(&query.collection)))
  }

  async fn subscribe(&self, query: Query) -> Result<LiveQuery<Error>> {
    let state = self.state();
    Self::check_readable(&state, &query.collection)?;
    let initial = state.collection_docs(&query.collection);
    Ok(self.inner.live.register(query, initial))
  }

  async fn set(&self, path: &DocPath, data: Value) -> Result<()> {
    self.apply(vec![WriteOp::Set { path: path.clone(), data }]).await
  }

  async fn add(&self, collection: &CollectionPath, data: Value) -> Result<DocPath> {
    let path = collection.auto_doc();
    self
      .apply(vec![WriteOp::Create { path: path.clone(), data }])
      .await?;
    Ok(path)
  }

  async fn delete(&self, path: &DocPath) -> Result<()> {
    self
      .apply(vec![WriteOp::Delete { path: path.clone(), must_exist: false }])
      .await
  }

  async fn commit(&self, ops: Vec<WriteOp>) -> Result<()> { self.apply(ops).await }
}
