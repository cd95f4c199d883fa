//! [`SqliteStore`], the SQLite implementation of [`DocumentStore`].

use std::{
  collections::HashMap,
  path::Path,
  sync::{Arc, Weak},
  time::Duration,
};

use chatter_core::{
  document::{CollectionPath, DocPath, Document},
  live::{LiveQuery, SubscriberSet},
  query::{Filter, Query},
  store::{DocumentStore, WriteOp},
};
use chrono::Utc;
use rusqlite::OptionalExtension as _;
use serde_json::Value;
use tokio::{task::JoinHandle, time::MissedTickBehavior};

use crate::{
  Error, Result,
  encode::{DOCUMENT_COLUMNS, RawDocument, encode_dt},
  schema::SCHEMA,
};

// ─── Store ───────────────────────────────────────────────────────────────────

struct Inner {
  conn:    tokio_rusqlite::Connection,
  live:    SubscriberSet<Error>,
  /// Held across a commit and its publication, and across the initial read
  /// and registration of a live query, so no live query misses a commit.
  publish: tokio::sync::Mutex<()>,
}

/// A Chatter document store backed by a single SQLite file.
///
/// Cloning is cheap; clones share the connection and the live queries.
/// Commits made through this handle are published to live queries
/// immediately; commits made by other connections to the same file are
/// picked up by [`watch_external`](Self::watch_external).
#[derive(Clone)]
pub struct SqliteStore {
  inner: Arc<Inner>,
}

impl SqliteStore {
  /// Open (or create) a store at `path` and run schema initialisation.
  pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    Self::with_connection(conn).await
  }

  /// Open an in-memory store, for tests.
  pub async fn open_in_memory() -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::with_connection(conn).await
  }

  async fn with_connection(conn: tokio_rusqlite::Connection) -> Result<Self> {
    conn
      .call(|conn| {
        conn.execute_batch(SCHEMA)?;
        Ok(())
      })
      .await?;
    Ok(Self {
      inner: Arc::new(Inner {
        conn,
        live: SubscriberSet::new(),
        publish: tokio::sync::Mutex::new(()),
      }),
    })
  }

  /// Number of open live queries.
  pub fn live_queries(&self) -> usize { self.inner.live.len() }

  /// Poll the database every `every` for commits made by other connections
  /// and publish them to open live queries.
  ///
  /// The task ends when the last clone of the store is dropped. If polling
  /// fails every open live query receives [`Error::ChangeFeed`] and is
  /// closed, and the task ends.
  pub fn watch_external(&self, every: Duration) -> JoinHandle<()> {
    let weak: Weak<Inner> = Arc::downgrade(&self.inner);
    tokio::spawn(async move {
      let mut ticker = tokio::time::interval(every);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
      let mut last_version = None;
      loop {
        ticker.tick().await;
        let Some(inner) = weak.upgrade() else {
          break;
        };
        let store = SqliteStore { inner };
        if let Err(e) = store.poll_external(&mut last_version).await {
          let message = e.to_string();
          tracing::warn!(error = %message, "external change polling failed");
          store.inner.live.fail_all(|| Error::ChangeFeed(message.clone()));
          break;
        }
      }
    })
  }

  async fn poll_external(&self, last_version: &mut Option<i64>) -> Result<()> {
    let version: i64 = self
      .inner
      .conn
      .call(|conn| Ok(conn.query_row("PRAGMA data_version", [], |r| r.get(0))?))
      .await?;
    // `data_version` only moves when a *different* connection commits.
    let changed = last_version.is_some_and(|prev| prev != version);
    *last_version = Some(version);

    if changed {
      let _guard = self.inner.publish.lock().await;
      tracing::debug!(version, "external commit detected");
      self.republish(self.inner.live.collections()).await?;
    }
    Ok(())
  }

  async fn load_collection(&self, collection: &CollectionPath) -> Result<Vec<Document>> {
    let collection = collection.as_str().to_owned();
    let raws: Vec<RawDocument> = self
      .inner
      .conn
      .call(move |conn| {
        let mut stmt = conn.prepare(&format!(
          "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE collection = ?1"
        ))?;
        let rows = stmt
          .query_map(rusqlite::params![collection], RawDocument::from_row)?
          .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
      })
      .await?;

    raws.into_iter().map(RawDocument::into_document).collect()
  }

  /// Re-evaluate live queries over the watched subset of `touched`.
  async fn republish(&self, touched: Vec<CollectionPath>) -> Result<()> {
    let watched = self.inner.live.collections();
    let mut contents = HashMap::new();
    for collection in touched.into_iter().filter(|c| watched.contains(c)) {
      let docs = self.load_collection(&collection).await?;
      contents.insert(collection, docs);
    }
    if !contents.is_empty() {
      self.inner.live.publish(&contents);
    }
    Ok(())
  }

  /// Apply `ops` in a single SQLite transaction, then publish.
  async fn apply(&self, ops: Vec<WriteOp>) -> Result<()> {
    let _guard = self.inner.publish.lock().await;
    let now = encode_dt(Utc::now());

    let outcome = self
      .inner
      .conn
      .call(move |conn| {
        let tx = conn.transaction()?;
        let outcome = write_batch(&tx, &ops, &now)?;
        // Dropping an uncommitted transaction rolls it back.
        if outcome.is_ok() {
          tx.commit()?;
        }
        Ok(outcome)
      })
      .await?;
    let touched = outcome?;

    if let Err(e) = self.republish(touched).await {
      // The commit itself is durable; only the live views are now stale.
      let message = e.to_string();
      tracing::warn!(error = %message, "failed to publish commit to live queries");
      self.inner.live.fail_all(|| Error::ChangeFeed(message.clone()));
    }
    Ok(())
  }
}

/// Stage and write `ops` inside `tx`.
///
/// The outer result carries SQLite failures; the inner one carries domain
/// failures (failed preconditions, malformed bodies) which abort the batch.
fn write_batch(
  tx: &rusqlite::Transaction<'_>,
  ops: &[WriteOp],
  now: &str,
) -> rusqlite::Result<Result<Vec<CollectionPath>, chatter_core::Error>> {
  let mut staged: HashMap<DocPath, Option<Value>> = HashMap::new();
  let mut order: Vec<DocPath> = Vec::new();

  for op in ops {
    let path = op.path();
    let before = match staged.get(path) {
      Some(value) => value.clone(),
      None => {
        order.push(path.clone());
        let raw: Option<String> = tx
          .query_row(
            "SELECT data_json FROM documents WHERE collection = ?1 AND doc_id = ?2",
            rusqlite::params![path.collection.as_str(), path.id],
            |r| r.get(0),
          )
          .optional()?;
        match raw.map(|s| serde_json::from_str::<Value>(&s)).transpose() {
          Ok(value) => value,
          Err(e) => return Ok(Err(e.into())),
        }
      }
    };
    match op.apply(before) {
      Ok(after) => {
        staged.insert(path.clone(), after);
      }
      Err(e) => return Ok(Err(e)),
    }
  }

  let mut touched: Vec<CollectionPath> = Vec::new();
  for path in order {
    let Some(value) = staged.remove(&path) else {
      continue;
    };
    let collection = path.collection.as_str();
    match value {
      Some(data) => {
        let body = data.to_string();
        let updated = tx.execute(
          "UPDATE documents SET data_json = ?3, updated_at = ?4
           WHERE collection = ?1 AND doc_id = ?2",
          rusqlite::params![collection, path.id, body, now],
        )?;
        if updated == 0 {
          let seq: i64 =
            tx.query_row("SELECT next_seq FROM sequence WHERE id = 0", [], |r| r.get(0))?;
          tx.execute("UPDATE sequence SET next_seq = next_seq + 1 WHERE id = 0", [])?;
          tx.execute(
            "INSERT INTO documents (collection, doc_id, data_json, created_at, updated_at, seq)
             VALUES (?1, ?2, ?3, ?4, ?4, ?5)",
            rusqlite::params![collection, path.id, body, now, seq],
          )?;
        }
      }
      None => {
        tx.execute(
          "DELETE FROM documents WHERE collection = ?1 AND doc_id = ?2",
          rusqlite::params![collection, path.id],
        )?;
      }
    }
    if !touched.contains(&path.collection) {
      touched.push(path.collection.clone());
    }
  }

  Ok(Ok(touched))
}

// ─── DocumentStore impl ──────────────────────────────────────────────────────

impl DocumentStore for SqliteStore {
  type Error = Error;

  async fn get(&self, path: &DocPath) -> Result<Option<Document>> {
    let collection = path.collection.as_str().to_owned();
    let id = path.id.clone();

    let raw: Option<RawDocument> = self
      .inner
      .conn
      .call(move |conn| {
        Ok(conn
          .query_row(
            &format!(
              "SELECT {DOCUMENT_COLUMNS} FROM documents WHERE collection = ?1 AND doc_id = ?2"
            ),
            rusqlite::params![collection, id],
            RawDocument::from_row,
          )
          .optional()?)
      })
      .await?;

    raw.map(RawDocument::into_document).transpose()
  }

  async fn fetch(&self, query: &Query) -> Result<Vec<Document>> {
    // A document query only needs the one row.
    let by_id = query.filters.iter().find_map(|f| match f {
      Filter::IdEq { id } => Some(id.clone()),
      _ => None,
    });
    let docs = match by_id {
      Some(id) => self
        .get(&query.collection.doc(id))
        .await?
        .into_iter()
        .collect(),
      None => self.load_collection(&query.collection).await?,
    };
    Ok(query.apply(docs))
  }

  async fn subscribe(&self, query: Query) -> Result<LiveQuery<Error>> {
    let _guard = self.inner.publish.lock().await;
    let initial = self.load_collection(&query.collection).await?;
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
