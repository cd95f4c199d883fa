//! A signed-in viewer: who they are, their live profile, and their
//! notification badge, torn down together.

use chatter_core::{
  document::Record,
  store::DocumentStore,
  user::{User, UserId},
};
use tokio::sync::watch;

use crate::{
  notify::NotificationAggregator,
  subscription::{SubscriptionHandle, SubscriptionManager, observer},
};

pub struct Session<S> {
  viewer:        UserId,
  profile:       watch::Receiver<Option<Record<User>>>,
  profile_feed:  Option<SubscriptionHandle>,
  notifications: NotificationAggregator<S>,
}

impl<S: DocumentStore> Session<S> {
  /// Begin a session for an already authenticated `viewer`.
  pub fn start(manager: SubscriptionManager<S>, viewer: UserId) -> Self {
    let (tx, profile) = watch::channel(None);
    let profile_feed = manager.watch_profile(
      &viewer,
      observer(
        move |p| {
          tx.send_replace(p);
        },
        |e| tracing::warn!(error = %e, "profile feed failed"),
      ),
    );

    let mut notifications = NotificationAggregator::new(manager);
    notifications.set_viewer(Some(&viewer));
    tracing::info!(%viewer, "session started");

    Self { viewer, profile, profile_feed: Some(profile_feed), notifications }
  }

  pub fn viewer(&self) -> &UserId { &self.viewer }

  /// The viewer's profile as last delivered; `None` before the first
  /// snapshot or if the profile does not exist.
  pub fn profile(&self) -> Option<Record<User>> { self.profile.borrow().clone() }

  pub fn watch_profile(&self) -> watch::Receiver<Option<Record<User>>> { self.profile.clone() }

  pub fn is_admin(&self) -> bool {
    self.profile.borrow().as_ref().is_some_and(|p| p.data.is_admin)
  }

  pub fn notifications(&self) -> &NotificationAggregator<S> { &self.notifications }

  pub fn is_active(&self) -> bool { self.profile_feed.is_some() }

  /// Cancel every subscription this session opened. Idempotent.
  pub fn end(&mut self) {
    if let Some(feed) = self.profile_feed.take() {
      feed.cancel();
      self.notifications.set_viewer(None);
      tracing::info!(viewer = %self.viewer, "session ended");
    }
  }
}
