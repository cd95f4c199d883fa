//! The pending-request badge: whether the viewer has chat requests waiting.

use std::sync::Arc;

use chatter_core::{chat::ChatRequest, query::Query, store::DocumentStore, user::UserId};
use tokio::sync::watch;

use crate::{
  feeds::topic,
  subscription::{SubscriptionKey, SubscriptionManager, SubscriptionSlot, observer},
};

/// What the badge currently shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Badge {
  /// No viewer, or the first snapshot has not arrived.
  Unknown,
  Pending(usize),
  /// The live query failed; the count is no longer maintained.
  Failed(String),
}

impl Badge {
  pub fn has_pending(&self) -> bool { self.count() > 0 }

  pub fn count(&self) -> usize {
    match self {
      Badge::Pending(n) => *n,
      Badge::Unknown | Badge::Failed(_) => 0,
    }
  }
}

/// Follows the number of requests addressed to the current viewer.
///
/// The badge is updated from inside each snapshot delivery, so it never lags
/// the underlying query.
pub struct NotificationAggregator<S> {
  manager: SubscriptionManager<S>,
  slot:    SubscriptionSlot,
  badge:   Arc<watch::Sender<Badge>>,
}

impl<S: DocumentStore> NotificationAggregator<S> {
  pub fn new(manager: SubscriptionManager<S>) -> Self {
    let (badge, _) = watch::channel(Badge::Unknown);
    Self { manager, slot: SubscriptionSlot::default(), badge: Arc::new(badge) }
  }

  pub fn badge(&self) -> Badge { self.badge.borrow().clone() }

  pub fn has_pending(&self) -> bool { self.badge.borrow().has_pending() }

  /// A receiver that observes every badge change.
  pub fn watch(&self) -> watch::Receiver<Badge> { self.badge.subscribe() }

  /// Follow `viewer`'s requests, or stop following anything.
  ///
  /// Switching viewers resets the badge to [`Badge::Unknown`] until the new
  /// viewer's first snapshot arrives.
  pub fn set_viewer(&mut self, viewer: Option<&UserId>) {
    let key = viewer.map(|v| SubscriptionKey::new(topic::PENDING, v.as_str()));
    let manager = &self.manager;
    let badge = &self.badge;
    let changed = self.slot.retarget(key, |key| {
      let query = Query::collection(ChatRequest::collection()).where_eq("to", key.input.as_str());
      let on_count = badge.clone();
      let on_failure = badge.clone();
      // The previous feed is cancelled by now and the new one cannot have
      // delivered yet.
      badge.send_replace(Badge::Unknown);
      manager.subscribe(
        key,
        query,
        |snapshot| std::future::ready(snapshot.len()),
        observer(
          move |n| {
            on_count.send_replace(Badge::Pending(n));
          },
          move |e| {
            on_failure.send_replace(Badge::Failed(e.to_string()));
          },
        ),
      )
    });
    if changed && self.slot.key().is_none() {
      self.badge.send_replace(Badge::Unknown);
    }
  }
}

#[cfg(test)]
mod tests {
  use std::time::Duration;

  use chatter_store_memory::MemoryStore;
  use serde_json::json;

  use super::*;

  async fn next_badge(rx: &mut watch::Receiver<Badge>) -> Badge {
    tokio::time::timeout(Duration::from_secs(5), rx.changed())
      .await
      .expect("badge change within timeout")
      .expect("aggregator alive");
    rx.borrow_and_update().clone()
  }

  #[tokio::test]
  async fn badge_tracks_requests_for_viewer() {
    let store = Arc::new(MemoryStore::new());
    let mut agg = NotificationAggregator::new(SubscriptionManager::new(store.clone()));
    let mut rx = agg.watch();
    agg.set_viewer(Some(&"bob".into()));
    rx.borrow_and_update();

    assert_eq!(next_badge(&mut rx).await, Badge::Pending(0));
    let request = store
      .add(&ChatRequest::collection(), json!({ "from": "ann", "to": "bob" }))
      .await
      .unwrap();
    assert_eq!(next_badge(&mut rx).await, Badge::Pending(1));
    assert!(agg.has_pending());

    store.delete(&request).await.unwrap();
    assert_eq!(next_badge(&mut rx).await, Badge::Pending(0));
  }

  #[tokio::test]
  async fn switching_viewer_resets_then_counts_new_viewer() {
    let store = Arc::new(MemoryStore::new());
    store
      .add(&ChatRequest::collection(), json!({ "from": "ann", "to": "cy" }))
      .await
      .unwrap();
    let manager = SubscriptionManager::new(store.clone());
    let mut agg = NotificationAggregator::new(manager.clone());
    let mut rx = agg.watch();

    agg.set_viewer(Some(&"bob".into()));
    assert_eq!(next_badge(&mut rx).await, Badge::Unknown);
    assert_eq!(next_badge(&mut rx).await, Badge::Pending(0));

    agg.set_viewer(Some(&"cy".into()));
    assert_eq!(agg.badge(), Badge::Unknown);
    rx.borrow_and_update();
    assert_eq!(next_badge(&mut rx).await, Badge::Pending(1));
    assert_eq!(manager.active_keys().len(), 1);

    agg.set_viewer(None);
    assert_eq!(agg.badge(), Badge::Unknown);
    assert!(manager.active_keys().is_empty());
  }

  #[tokio::test]
  async fn failed_query_is_reported() {
    let store = Arc::new(MemoryStore::new());
    store.deny(ChatRequest::collection());
    let mut agg = NotificationAggregator::new(SubscriptionManager::new(store.clone()));
    let mut rx = agg.watch();
    agg.set_viewer(Some(&"bob".into()));
    rx.borrow_and_update();

    assert!(matches!(next_badge(&mut rx).await, Badge::Failed(_)));
    assert!(!agg.has_pending());
  }
}
