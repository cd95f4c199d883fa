//! The per-user notepad: one free-text document saved after a quiet period.
//!
//! Edits are coalesced; only the content present when the quiet period
//! elapses is written. At most one write is in flight at a time. An edit that
//! settles while a write is running is queued, so the newest content is always
//! the last one written. Closing the notepad cancels any pending write.

use std::{
  sync::{
    Arc,
    atomic::{AtomicBool, AtomicU64, Ordering},
  },
  time::Duration,
};

use chatter_core::{
  document::{DocPath, encode_body},
  notepad::NotepadDocument,
  store::DocumentStore,
  user::UserId,
};
use futures::future::BoxFuture;
use tokio::{
  sync::{mpsc, watch},
  task::JoinHandle,
  time::Instant,
};

use crate::{BoxError, Error, Result};

/// Where the latest edit stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveStatus {
  /// Loaded and not edited since.
  Idle,
  /// The latest edit is waiting for its quiet period or being written.
  Saving,
  /// The latest edit is stored.
  Saved,
  /// Writing the latest edit failed. The next edit tries again.
  SaveError(String),
}

struct Edit {
  content: String,
  /// Sequence number of this edit, starting at 1.
  number:  u64,
  at:      Instant,
}

/// An open notepad. Dropping it closes it.
pub struct Notepad {
  owner:   UserId,
  loaded:  String,
  edits:   mpsc::UnboundedSender<Edit>,
  counter: Arc<AtomicU64>,
  status:  Arc<watch::Sender<SaveStatus>>,
  closed:  AtomicBool,
  task:    JoinHandle<()>,
}

impl Notepad {
  /// Load `owner`'s notepad and start accepting edits.
  ///
  /// Resolves once the stored content is known, so no edit can race the
  /// initial load. A missing notepad loads as empty.
  pub async fn open<S: DocumentStore>(
    store: Arc<S>,
    owner: UserId,
    quiet_period: Duration,
  ) -> Result<Self> {
    let path = NotepadDocument::path(&owner);
    let loaded = match store.get(&path).await {
      Ok(Some(doc)) => doc.decode::<NotepadDocument>()?.data.content,
      Ok(None) => String::new(),
      Err(e) => return Err(Error::Persistence(Box::new(e))),
    };
    tracing::debug!(%owner, len = loaded.len(), "notepad loaded");

    let (edits, rx) = mpsc::unbounded_channel();
    let counter = Arc::new(AtomicU64::new(0));
    let (status, _) = watch::channel(SaveStatus::Idle);
    let status = Arc::new(status);
    let task = tokio::spawn(
      Writer {
        store,
        path,
        quiet_period,
        counter: counter.clone(),
        status: status.clone(),
      }
      .run(rx),
    );

    Ok(Self { owner, loaded, edits, counter, status, closed: AtomicBool::new(false), task })
  }

  pub fn owner(&self) -> &UserId { &self.owner }

  /// The content stored when the notepad was opened.
  pub fn loaded(&self) -> &str { &self.loaded }

  pub fn status(&self) -> SaveStatus { self.status.borrow().clone() }

  pub fn watch_status(&self) -> watch::Receiver<SaveStatus> { self.status.subscribe() }

  pub fn is_closed(&self) -> bool { self.closed.load(Ordering::Acquire) }

  /// Replace the notepad content. The status moves to
  /// [`SaveStatus::Saving`] before this returns. Ignored once closed.
  pub fn edit(&self, content: impl Into<String>) {
    if self.is_closed() {
      tracing::debug!(owner = %self.owner, "edit after close ignored");
      return;
    }
    let at = Instant::now();
    let mut number = 0;
    // Numbering inside the status lock orders it against write completions.
    self.status.send_modify(|status| {
      number = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
      *status = SaveStatus::Saving;
    });
    let _ = self.edits.send(Edit { content: content.into(), number, at });
  }

  /// Stop saving. A pending edit that has not been written is discarded.
  /// Idempotent.
  pub fn close(&self) {
    if !self.closed.swap(true, Ordering::AcqRel) {
      self.task.abort();
      tracing::debug!(owner = %self.owner, "notepad closed");
    }
  }
}

impl Drop for Notepad {
  fn drop(&mut self) { self.close(); }
}

// ─── Writer task ─────────────────────────────────────────────────────────────

type Write = BoxFuture<'static, (u64, std::result::Result<(), BoxError>)>;

struct Writer<S> {
  store:        Arc<S>,
  path:         DocPath,
  quiet_period: Duration,
  counter:      Arc<AtomicU64>,
  status:       Arc<watch::Sender<SaveStatus>>,
}

impl<S: DocumentStore> Writer<S> {
  async fn run(self, mut rx: mpsc::UnboundedReceiver<Edit>) {
    // The settling edit and when its quiet period ends.
    let mut pending: Option<(Edit, Instant)> = None;
    // Settled while a write was in flight.
    let mut queued: Option<Edit> = None;
    let mut in_flight: Option<Write> = None;

    loop {
      let deadline = pending.as_ref().map_or_else(Instant::now, |(_, d)| *d);
      tokio::select! {
        edit = rx.recv() => match edit {
          Some(edit) => {
            let deadline = edit.at + self.quiet_period;
            pending = Some((edit, deadline));
          }
          None => break,
        },
        _ = tokio::time::sleep_until(deadline), if pending.is_some() => {
          if let Some((edit, _)) = pending.take() {
            if in_flight.is_some() {
              queued = Some(edit);
            } else {
              in_flight = Some(self.write(edit));
            }
          }
        }
        (number, result) = async {
          match in_flight.as_mut() {
            Some(write) => write.await,
            None => std::future::pending().await,
          }
        }, if in_flight.is_some() => {
          in_flight = None;
          self.finish(number, result);
          if let Some(edit) = queued.take() {
            in_flight = Some(self.write(edit));
          }
        }
      }
    }
  }

  fn write(&self, edit: Edit) -> Write {
    let store = self.store.clone();
    let path = self.path.clone();
    Box::pin(async move {
      let doc = NotepadDocument { content: edit.content };
      let result = match encode_body(&path, &doc) {
        Ok(data) => store.set(&path, data).await.map_err(|e| Box::new(e) as BoxError),
        Err(e) => Err(Box::new(e) as BoxError),
      };
      (edit.number, result)
    })
  }

  /// Report a completed write, unless a newer edit has been made since.
  fn finish(&self, number: u64, result: std::result::Result<(), BoxError>) {
    if let Err(e) = &result {
      tracing::warn!(path = %self.path, error = %e, "notepad save failed");
    }
    self.status.send_if_modified(|status| {
      if self.counter.load(Ordering::SeqCst) != number {
        return false;
      }
      *status = match &result {
        Ok(()) => SaveStatus::Saved,
        Err(e) => SaveStatus::SaveError(e.to_string()),
      };
      true
    });
  }
}

#[cfg(test)]
mod tests {
  use chatter_core::store::WriteOp;
  use chatter_store_memory::MemoryStore;
  use serde_json::json;

  use super::*;

  const QUIET: Duration = Duration::from_secs(1);

  fn ann() -> UserId { "ann".into() }

  /// Contents written so far and when, relative to `start`.
  fn writes(store: &MemoryStore, start: Instant) -> Vec<(Duration, String)> {
    store
      .journal()
      .into_iter()
      .filter_map(|entry| match entry.op {
        WriteOp::Set { data, .. } => {
          Some((entry.at - start, data["content"].as_str()?.to_owned()))
        }
        _ => None,
      })
      .collect()
  }

  #[tokio::test(start_paused = true)]
  async fn rapid_edits_collapse_into_one_write() {
    let store = Arc::new(MemoryStore::new());
    let pad = Notepad::open(store.clone(), ann(), QUIET).await.unwrap();
    let start = Instant::now();

    pad.edit("a");
    tokio::time::sleep(Duration::from_millis(300)).await;
    pad.edit("ab");
    tokio::time::sleep(Duration::from_millis(300)).await;
    pad.edit("abc");
    assert_eq!(pad.status(), SaveStatus::Saving);
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert_eq!(writes(&store, start), [(Duration::from_millis(1600), "abc".to_owned())]);
    assert_eq!(pad.status(), SaveStatus::Saved);
  }

  #[tokio::test(start_paused = true)]
  async fn open_loads_existing_content() {
    let store = Arc::new(MemoryStore::new());
    store
      .set(&NotepadDocument::path(&ann()), json!({ "content": "remember milk" }))
      .await
      .unwrap();
    let pad = Notepad::open(store.clone(), ann(), QUIET).await.unwrap();
    assert_eq!(pad.loaded(), "remember milk");
    assert_eq!(pad.status(), SaveStatus::Idle);

    let empty = Notepad::open(store.clone(), "bob".into(), QUIET).await.unwrap();
    assert_eq!(empty.loaded(), "");
  }

  #[tokio::test(start_paused = true)]
  async fn edit_during_slow_write_is_written_after_it() {
    let store = Arc::new(MemoryStore::new());
    store.set_write_latency(Some(Duration::from_secs(2)));
    let pad = Notepad::open(store.clone(), ann(), QUIET).await.unwrap();
    let start = Instant::now();

    pad.edit("first");
    tokio::time::sleep(Duration::from_millis(1500)).await;
    pad.edit("second");
    tokio::time::sleep(Duration::from_millis(2000)).await;
    // "first" has landed but "second" is still outstanding.
    assert_eq!(pad.status(), SaveStatus::Saving);
    tokio::time::sleep(Duration::from_millis(2000)).await;

    assert_eq!(writes(&store, start), [
      (Duration::from_millis(3000), "first".to_owned()),
      (Duration::from_millis(5000), "second".to_owned()),
    ]);
    assert_eq!(pad.status(), SaveStatus::Saved);
  }

  #[tokio::test(start_paused = true)]
  async fn close_discards_pending_edit() {
    let store = Arc::new(MemoryStore::new());
    let pad = Notepad::open(store.clone(), ann(), QUIET).await.unwrap();
    pad.edit("never saved");
    pad.close();
    pad.close();
    pad.edit("ignored");
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(store.journal().is_empty());
    assert!(pad.is_closed());
  }

  #[tokio::test(start_paused = true)]
  async fn failed_save_is_reported_and_next_edit_retries() {
    let store = Arc::new(MemoryStore::new());
    let pad = Notepad::open(store.clone(), ann(), QUIET).await.unwrap();
    store.fail_writes(true);
    pad.edit("draft");
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(matches!(pad.status(), SaveStatus::SaveError(_)));

    store.fail_writes(false);
    pad.edit("draft 2");
    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(pad.status(), SaveStatus::Saved);
    let stored = store.get(&NotepadDocument::path(&ann())).await.unwrap().unwrap();
    assert_eq!(stored.data["content"], "draft 2");
  }

  #[tokio::test]
  async fn load_failure_is_a_persistence_error() {
    let store = Arc::new(MemoryStore::new());
    store.fail_reads_of(NotepadDocument::path(&ann()));
    let err = Notepad::open(store, ann(), QUIET).await.err().unwrap();
    assert!(matches!(err, Error::Persistence(_)));
  }
}
