//! The live feeds a chat client renders: the viewer's chats, the messages of
//! one chat, incoming chat requests, and single documents.
//!
//! Each feed is an ordinary keyed subscription whose transform decodes the
//! snapshot and joins in the referenced user profiles.

use std::sync::Arc;

use chatter_core::{
  chat::{Chat, ChatKind, ChatRequest, Message},
  document::Record,
  live::Snapshot,
  query::{OrderBy, Query},
  store::DocumentStore,
  user::{User, UserId},
};
use serde::de::DeserializeOwned;

use crate::{
  Error, Result,
  join::join,
  subscription::{Observer, SubscriptionHandle, SubscriptionKey, SubscriptionManager},
};

/// Subscription topics used by the feeds.
pub mod topic {
  pub const CHATS: &str = "chats-for-user";
  pub const CHAT: &str = "chat";
  pub const MESSAGES: &str = "messages-in-chat";
  pub const REQUESTS: &str = "requests-for-user";
  pub const PENDING: &str = "pending-requests";
  pub const PROFILE: &str = "profile";
}

// ─── Views ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct MessageView {
  pub message: Record<Message>,
  /// `None` when the sender's profile is gone or could not be read.
  pub sender:  Option<Record<User>>,
}

impl MessageView {
  pub fn sender_name(&self) -> &str {
    self.sender.as_ref().map_or("Unknown user", |u| u.data.username.as_str())
  }
}

/// One row of the chat list.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatSummary {
  pub chat:  Record<Chat>,
  /// The other member of a personal chat, when resolvable.
  pub other: Option<Record<User>>,
}

impl ChatSummary {
  pub fn title(&self) -> String {
    match self.chat.data.kind {
      ChatKind::Group => self.chat.data.name.clone().unwrap_or_else(|| "Unnamed group".into()),
      ChatKind::Personal => self
        .other
        .as_ref()
        .map_or_else(|| "Personal Chat".into(), |u| u.data.username.clone()),
    }
  }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestView {
  pub request: Record<ChatRequest>,
  pub from:    Option<Record<User>>,
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

/// Decode every document of `snapshot`, skipping malformed ones.
pub(crate) fn decode_all<T: DeserializeOwned>(snapshot: &Snapshot) -> Vec<Record<T>> {
  snapshot
    .docs
    .iter()
    .filter_map(|doc| match doc.decode() {
      Ok(record) => Some(record),
      Err(e) => {
        tracing::warn!(path = %doc.path, error = %e, "skipping malformed document");
        None
      }
    })
    .collect()
}

pub(crate) async fn fetch_user<S: DocumentStore>(
  store: &S,
  uid: UserId,
) -> Result<Option<Record<User>>> {
  match store.get(&User::path(&uid)).await.map_err(Error::store)? {
    Some(doc) => Ok(Some(doc.decode()?)),
    None => Ok(None),
  }
}

fn first_of<T: DeserializeOwned>(snapshot: &Snapshot) -> Option<Record<T>> {
  decode_all(snapshot).into_iter().next()
}

async fn enrich_chats<S: DocumentStore>(
  store: Arc<S>,
  viewer: UserId,
  snapshot: Snapshot,
) -> Vec<ChatSummary> {
  let chats = decode_all::<Chat>(&snapshot);
  join(
    chats,
    |chat| chat.data.other_member(&viewer).cloned().into_iter().collect(),
    |uid| fetch_user(&*store, uid),
  )
  .await
  .into_iter()
  .map(|e| ChatSummary { other: e.first().cloned(), chat: e.record })
  .collect()
}

async fn enrich_messages<S: DocumentStore>(store: Arc<S>, snapshot: Snapshot) -> Vec<MessageView> {
  let messages = decode_all::<Message>(&snapshot);
  join(
    messages,
    |message| vec![message.data.sender_id.clone()],
    |uid| fetch_user(&*store, uid),
  )
  .await
  .into_iter()
  .map(|e| MessageView { sender: e.first().cloned(), message: e.record })
  .collect()
}

async fn enrich_requests<S: DocumentStore>(store: Arc<S>, snapshot: Snapshot) -> Vec<RequestView> {
  let requests = decode_all::<ChatRequest>(&snapshot);
  join(
    requests,
    |request| vec![request.data.from.clone()],
    |uid| fetch_user(&*store, uid),
  )
  .await
  .into_iter()
  .map(|e| RequestView { from: e.first().cloned(), request: e.record })
  .collect()
}

// ─── Feeds ───────────────────────────────────────────────────────────────────

impl<S: DocumentStore> SubscriptionManager<S> {
  /// Every chat `viewer` is a member of, oldest first.
  pub fn watch_chats(
    &self,
    viewer: &UserId,
    observer: impl Observer<Vec<ChatSummary>>,
  ) -> SubscriptionHandle {
    let store = self.store().clone();
    let me = viewer.clone();
    self.subscribe(
      SubscriptionKey::new(topic::CHATS, viewer.as_str()),
      Query::collection(Chat::collection())
        .where_contains("members", viewer)
        .order_by(OrderBy::created()),
      move |snapshot| enrich_chats(store.clone(), me.clone(), snapshot),
      observer,
    )
  }

  /// The messages of one chat in send order, each with its sender.
  pub fn watch_messages(
    &self,
    chat_id: &str,
    observer: impl Observer<Vec<MessageView>>,
  ) -> SubscriptionHandle {
    let store = self.store().clone();
    self.subscribe(
      SubscriptionKey::new(topic::MESSAGES, chat_id),
      Query::collection(Message::collection(chat_id)).order_by(OrderBy::created()),
      move |snapshot| enrich_messages(store.clone(), snapshot),
      observer,
    )
  }

  /// Chat requests addressed to `viewer`, each with its sender.
  pub fn watch_requests(
    &self,
    viewer: &UserId,
    observer: impl Observer<Vec<RequestView>>,
  ) -> SubscriptionHandle {
    let store = self.store().clone();
    self.subscribe(
      SubscriptionKey::new(topic::REQUESTS, viewer.as_str()),
      Query::collection(ChatRequest::collection())
        .where_eq("to", viewer)
        .order_by(OrderBy::created()),
      move |snapshot| enrich_requests(store.clone(), snapshot),
      observer,
    )
  }

  /// One chat document; `None` once it is deleted.
  pub fn watch_chat(
    &self,
    chat_id: &str,
    observer: impl Observer<Option<Record<Chat>>>,
  ) -> SubscriptionHandle {
    self.subscribe(
      SubscriptionKey::new(topic::CHAT, chat_id),
      Query::document(&Chat::path(chat_id)),
      |snapshot| std::future::ready(first_of(&snapshot)),
      observer,
    )
  }

  /// One user profile; `None` until it is created or after it is deleted.
  pub fn watch_profile(
    &self,
    uid: &UserId,
    observer: impl Observer<Option<Record<User>>>,
  ) -> SubscriptionHandle {
    self.subscribe(
      SubscriptionKey::new(topic::PROFILE, uid.as_str()),
      Query::document(&User::path(uid)),
      |snapshot| std::future::ready(first_of(&snapshot)),
      observer,
    )
  }
}
