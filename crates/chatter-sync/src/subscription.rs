//! The subscription manager: keyed live queries with exactly-once
//! replacement and synchronous cancellation.
//!
//! Every subscription is identified by a [`SubscriptionKey`]. Opening a new
//! subscription under a key that is already active cancels the old one first,
//! and the new live query is only opened once the old task has finished, so at
//! most one underlying query exists per key. Once
//! [`SubscriptionHandle::cancel`] returns, the observer receives nothing
//! further, even if the store is still tearing the query down.

use std::{
  cell::Cell,
  collections::HashMap,
  fmt,
  future::Future,
  sync::{
    Arc, Mutex, MutexGuard, Weak,
    atomic::{AtomicBool, Ordering},
  },
};

use chatter_core::{live::Snapshot, query::Query, store::DocumentStore};
use tokio::task::JoinHandle;

use crate::Error;

// ─── Keys and observers ──────────────────────────────────────────────────────

/// Identifies a subscription by what it watches: a topic such as
/// `"messages-in-chat"` plus the input it was opened for.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionKey {
  pub topic: &'static str,
  pub input: String,
}

impl SubscriptionKey {
  pub fn new(topic: &'static str, input: impl Into<String>) -> Self {
    Self { topic, input: input.into() }
  }
}

impl fmt::Display for SubscriptionKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}({})", self.topic, self.input)
  }
}

/// Receives the deliveries of one subscription.
///
/// Calls are serialized and arrive in store order.
pub trait Observer<T>: Send + 'static {
  fn on_snapshot(&mut self, snapshot: T);

  /// The live query failed to open or failed later. No further calls follow.
  fn on_error(&mut self, error: Error);
}

/// An [`Observer`] built from a pair of closures. See [`observer`].
pub struct FnObserver<F, G> {
  on_snapshot: F,
  on_error:    G,
}

/// Build an [`Observer`] from a snapshot callback and an error callback.
pub fn observer<T, F, G>(on_snapshot: F, on_error: G) -> FnObserver<F, G>
where
  F: FnMut(T) + Send + 'static,
  G: FnMut(Error) + Send + 'static,
{
  FnObserver { on_snapshot, on_error }
}

impl<T, F, G> Observer<T> for FnObserver<F, G>
where
  F: FnMut(T) + Send + 'static,
  G: FnMut(Error) + Send + 'static,
{
  fn on_snapshot(&mut self, snapshot: T) { (self.on_snapshot)(snapshot) }

  fn on_error(&mut self, error: Error) { (self.on_error)(error) }
}

// ─── Delivery gate ───────────────────────────────────────────────────────────

thread_local! {
  /// Set while this thread is running an observer callback.
  static DELIVERING: Cell<bool> = const { Cell::new(false) };
}

/// Restores [`DELIVERING`] even if a callback panics.
struct DeliveringGuard(bool);

impl Drop for DeliveringGuard {
  fn drop(&mut self) { DELIVERING.with(|d| d.set(self.0)); }
}

/// Decides whether a delivery may still reach the observer.
///
/// `open` is checked under `delivery`, and closing takes `delivery` once
/// after clearing `open`, so a delivery is either complete before
/// [`Gate::close`] returns or never starts.
struct Gate {
  open:     AtomicBool,
  delivery: Mutex<()>,
}

impl Gate {
  fn new() -> Self { Self { open: AtomicBool::new(true), delivery: Mutex::new(()) } }

  fn lock(&self) -> MutexGuard<'_, ()> {
    self.delivery.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
  }

  fn is_open(&self) -> bool { self.open.load(Ordering::Acquire) }

  /// Run `deliver` unless the gate is closed. Returns whether it ran.
  fn deliver(&self, deliver: impl FnOnce()) -> bool {
    let _held = self.lock();
    if !self.is_open() {
      return false;
    }
    let _restore = DeliveringGuard(DELIVERING.with(|d| d.replace(true)));
    deliver();
    true
  }

  fn close(&self) {
    self.open.store(false, Ordering::Release);
    // A callback closing a gate must not wait on a delivery that is waiting
    // on it, including its own.
    if !DELIVERING.with(Cell::get) {
      drop(self.lock());
    }
  }
}

// ─── Registry ────────────────────────────────────────────────────────────────

struct Slot {
  generation: u64,
  gate:       Arc<Gate>,
  task:       JoinHandle<()>,
}

impl Slot {
  fn shut(&self) {
    self.gate.close();
    self.task.abort();
  }
}

#[derive(Default)]
struct Registry {
  slots:           HashMap<SubscriptionKey, Slot>,
  next_generation: u64,
}

type SharedRegistry = Arc<Mutex<Registry>>;

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
  registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Remove the slot for `key` if it still belongs to `generation`.
fn release(registry: &Mutex<Registry>, key: &SubscriptionKey, generation: u64) -> Option<Slot> {
  let mut registry = lock(registry);
  match registry.slots.get(key) {
    Some(slot) if slot.generation == generation => registry.slots.remove(key),
    _ => None,
  }
}

// ─── Manager ─────────────────────────────────────────────────────────────────

/// Opens and tracks live queries against one store.
///
/// Cloning is cheap; clones share the same set of active subscriptions.
pub struct SubscriptionManager<S> {
  store:    Arc<S>,
  registry: SharedRegistry,
}

impl<S> Clone for SubscriptionManager<S> {
  fn clone(&self) -> Self {
    Self { store: self.store.clone(), registry: self.registry.clone() }
  }
}

impl<S: DocumentStore> SubscriptionManager<S> {
  pub fn new(store: Arc<S>) -> Self { Self { store, registry: SharedRegistry::default() } }

  pub fn store(&self) -> &Arc<S> { &self.store }

  /// Keys with a live subscription, sorted.
  pub fn active_keys(&self) -> Vec<SubscriptionKey> {
    let mut keys: Vec<_> = lock(&self.registry).slots.keys().cloned().collect();
    keys.sort();
    keys
  }

  pub fn is_active(&self, key: &SubscriptionKey) -> bool {
    lock(&self.registry).slots.contains_key(key)
  }

  /// Open `query` under `key`, replacing any active subscription with the
  /// same key.
  ///
  /// Each snapshot is passed through `transform` (where joins happen) and the
  /// result handed to `observer`. Snapshots are processed one at a time in
  /// store order. A failure to open is reported through
  /// [`Observer::on_error`] and not retried.
  pub fn subscribe<T, F, Fut, O>(
    &self,
    key: SubscriptionKey,
    query: Query,
    transform: F,
    observer: O,
  ) -> SubscriptionHandle
  where
    T: Send + 'static,
    F: FnMut(Snapshot) -> Fut + Send + 'static,
    Fut: Future<Output = T> + Send + 'static,
    O: Observer<T>,
  {
    let gate = Arc::new(Gate::new());
    let (generation, previous) = {
      let mut registry = lock(&self.registry);
      let generation = registry.next_generation;
      registry.next_generation += 1;
      (generation, registry.slots.remove(&key))
    };
    // Closing may wait on an in-flight delivery, so never under the registry
    // lock.
    let previous = previous.map(|slot| {
      tracing::debug!(%key, generation = slot.generation, "replacing subscription");
      slot.shut();
      slot.task
    });

    // The slot is registered before the task can reach `release`, which
    // waits on this lock.
    let displaced = {
      let mut registry = lock(&self.registry);
      let task = tokio::spawn(dispatch(Dispatch {
        store: self.store.clone(),
        registry: Arc::downgrade(&self.registry),
        key: key.clone(),
        generation,
        gate: gate.clone(),
        previous,
        query,
        transform,
        observer,
      }));
      registry.slots.insert(key.clone(), Slot { generation, gate: gate.clone(), task })
    };
    if let Some(displaced) = displaced {
      // A concurrent subscribe under the same key got in between.
      displaced.shut();
    }

    SubscriptionHandle { key, generation, gate, registry: Arc::downgrade(&self.registry) }
  }

  /// Cancel whatever is active under `key`.
  pub fn cancel(&self, key: &SubscriptionKey) {
    let slot = lock(&self.registry).slots.remove(key);
    if let Some(slot) = slot {
      slot.shut();
      tracing::debug!(%key, "subscription cancelled");
    }
  }
}

struct Dispatch<S, F, O> {
  store:      Arc<S>,
  registry:   Weak<Mutex<Registry>>,
  key:        SubscriptionKey,
  generation: u64,
  gate:       Arc<Gate>,
  previous:   Option<JoinHandle<()>>,
  query:      Query,
  transform:  F,
  observer:   O,
}

async fn dispatch<S, T, F, Fut, O>(task: Dispatch<S, F, O>)
where
  S: DocumentStore,
  F: FnMut(Snapshot) -> Fut,
  Fut: Future<Output = T>,
  O: Observer<T>,
{
  let Dispatch {
    store,
    registry,
    key,
    generation,
    gate,
    previous,
    query,
    mut transform,
    mut observer,
  } = task;

  if let Some(previous) = previous {
    // Aborted above; this only waits for its live query to be dropped.
    let _ = previous.await;
  }

  match store.subscribe(query).await {
    Ok(mut live) => {
      tracing::debug!(%key, generation, "subscription opened");
      while let Some(delivery) = live.next().await {
        match delivery {
          Ok(snapshot) => {
            let view = transform(snapshot).await;
            if !gate.deliver(|| observer.on_snapshot(view)) {
              break;
            }
          }
          Err(e) => {
            tracing::warn!(%key, error = %e, "live query failed");
            gate.deliver(|| observer.on_error(Error::Subscription(Box::new(e))));
            break;
          }
        }
      }
    }
    Err(e) => {
      tracing::warn!(%key, error = %e, "failed to open live query");
      gate.deliver(|| observer.on_error(Error::Subscription(Box::new(e))));
    }
  }

  gate.close();
  if let Some(registry) = registry.upgrade() {
    // Dropping our own JoinHandle only detaches it.
    drop(release(&registry, &key, generation));
  }
}

// ─── Handles ─────────────────────────────────────────────────────────────────

/// Owns one subscription. Dropping the handle cancels it.
#[must_use = "dropping a SubscriptionHandle cancels the subscription"]
pub struct SubscriptionHandle {
  key:        SubscriptionKey,
  generation: u64,
  gate:       Arc<Gate>,
  registry:   Weak<Mutex<Registry>>,
}

impl SubscriptionHandle {
  pub fn key(&self) -> &SubscriptionKey { &self.key }

  /// Whether deliveries can still arrive. False after cancellation,
  /// replacement, or a failure.
  pub fn is_active(&self) -> bool { self.gate.is_open() }

  /// Stop deliveries and release the live query. Idempotent.
  ///
  /// When this returns the observer will not be called again. A handle that
  /// was replaced under the same key never cancels its replacement.
  pub fn cancel(&self) {
    self.gate.close();
    let Some(registry) = self.registry.upgrade() else {
      return;
    };
    if let Some(slot) = release(&registry, &self.key, self.generation) {
      slot.task.abort();
      tracing::debug!(key = %self.key, "subscription cancelled");
    }
  }
}

impl Drop for SubscriptionHandle {
  fn drop(&mut self) { self.cancel(); }
}

impl fmt::Debug for SubscriptionHandle {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("SubscriptionHandle")
      .field("key", &self.key)
      .field("generation", &self.generation)
      .field("active", &self.is_active())
      .finish()
  }
}

/// Holds at most one subscription and swaps it when its input changes.
///
/// Inputs are compared by key, so retargeting to the key already held is a
/// no-op.
#[derive(Debug, Default)]
pub struct SubscriptionSlot {
  current: Option<SubscriptionHandle>,
}

impl SubscriptionSlot {
  pub fn key(&self) -> Option<&SubscriptionKey> { self.current.as_ref().map(|h| h.key()) }

  /// Point the slot at `key`, cancelling the held subscription first and
  /// calling `open` for the new one. Returns whether anything changed.
  pub fn retarget(
    &mut self,
    key: Option<SubscriptionKey>,
    open: impl FnOnce(SubscriptionKey) -> SubscriptionHandle,
  ) -> bool {
    if self.key() == key.as_ref() {
      return false;
    }
    if let Some(old) = self.current.take() {
      old.cancel();
    }
    self.current = key.map(open);
    true
  }

  pub fn clear(&mut self) {
    if let Some(old) = self.current.take() {
      old.cancel();
    }
  }
}
