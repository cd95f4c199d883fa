//! The chat handshake and chat creation: proposing, accepting and declining
//! personal chat requests, creating group chats, and sending messages.
//!
//! For an unordered pair of users the relationship moves from no
//! relationship, to a pending request, to exactly one personal chat. Accepting
//! writes the chat and removes the request in one batch, and the chat lives at
//! a document id derived from the pair, so two accepts racing for the same
//! pair cannot both create a chat.

use std::sync::Arc;

use chatter_core::{
  chat::{Chat, ChatKind, ChatRequest, Message},
  document::{CollectionPath, DocPath, Record, encode_body},
  query::Query,
  store::{DocumentStore, StoreError, WriteOp},
  user::{User, UserId},
};
use serde::{Serialize, de::DeserializeOwned};

use crate::{Error, Result, SyncConfig};

/// Where an unordered pair of users stands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Relationship {
  None,
  RequestPending { request_id: String, from: UserId },
  Chat { chat_id: String },
}

/// Chat operations against one store.
pub struct ChatService<S> {
  store:  Arc<S>,
  config: SyncConfig,
}

impl<S> Clone for ChatService<S> {
  fn clone(&self) -> Self { Self { store: self.store.clone(), config: self.config.clone() } }
}

impl<S: DocumentStore> ChatService<S> {
  pub fn new(store: Arc<S>, config: SyncConfig) -> Self { Self { store, config } }

  // ── Reads ─────────────────────────────────────────────────────────────────

  async fn load<T: DeserializeOwned>(&self, path: &DocPath) -> Result<Record<T>> {
    let doc = self
      .store
      .get(path)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| Error::NotFound(path.clone()))?;
    Ok(doc.decode()?)
  }

  async fn fetch<T: DeserializeOwned>(&self, query: &Query) -> Result<Vec<Record<T>>> {
    let docs = self.store.fetch(query).await.map_err(Error::store)?;
    docs.iter().map(|d| d.decode().map_err(Error::from)).collect()
  }

  /// Create a document with a fresh id in `collection`.
  async fn insert<T: Serialize>(&self, collection: &CollectionPath, body: &T) -> Result<DocPath> {
    let path = collection.auto_doc();
    let data = encode_body(&path, body)?;
    self
      .store
      .commit(vec![WriteOp::Create { path: path.clone(), data }])
      .await
      .map_err(Error::store)?;
    Ok(path)
  }

  /// The personal chat between `a` and `b`, if any.
  ///
  /// Chats written by this crate live at [`Chat::personal_id`]; the member
  /// scan also finds personal chats created under other ids.
  pub async fn personal_chat(&self, a: &UserId, b: &UserId) -> Result<Option<Record<Chat>>> {
    let path = Chat::path(&Chat::personal_id(a, b));
    if let Some(doc) = self.store.get(&path).await.map_err(Error::store)? {
      let chat: Record<Chat> = doc.decode()?;
      if chat.data.is_personal_between(a, b) {
        return Ok(Some(chat));
      }
    }
    let query = Query::collection(Chat::collection())
      .where_eq("type", "personal")
      .where_contains("members", a);
    let chats: Vec<Record<Chat>> = self.fetch(&query).await?;
    Ok(chats.into_iter().find(|c| c.data.is_personal_between(a, b)))
  }

  /// A pending request between `a` and `b`, in either direction.
  pub async fn pending_request(
    &self,
    a: &UserId,
    b: &UserId,
  ) -> Result<Option<Record<ChatRequest>>> {
    for (from, to) in [(a, b), (b, a)] {
      let query = Query::collection(ChatRequest::collection())
        .where_eq("from", from)
        .where_eq("to", to)
        .limit(1);
      let mut found: Vec<Record<ChatRequest>> = self.fetch(&query).await?;
      if let Some(request) = found.pop() {
        return Ok(Some(request));
      }
    }
    Ok(None)
  }

  pub async fn relationship(&self, a: &UserId, b: &UserId) -> Result<Relationship> {
    if let Some(chat) = self.personal_chat(a, b).await? {
      return Ok(Relationship::Chat { chat_id: chat.id });
    }
    Ok(match self.pending_request(a, b).await? {
      Some(request) => {
        Relationship::RequestPending { request_id: request.id, from: request.data.from }
      }
      None => Relationship::None,
    })
  }

  // ── Handshake ─────────────────────────────────────────────────────────────

  /// Ask `recipient` for a personal chat.
  ///
  /// Fails with [`Error::DuplicateChat`] if the pair already has a personal
  /// chat. Pending requests are not checked: proposing twice leaves two
  /// requests, and accepting either one settles the pair.
  pub async fn propose(&self, sender: &UserId, recipient: &UserId) -> Result<Record<ChatRequest>> {
    if sender == recipient {
      return Err(Error::Validation("cannot request a chat with yourself".into()));
    }
    self.load::<User>(&User::path(recipient)).await?;
    if self.personal_chat(sender, recipient).await?.is_some() {
      return Err(Error::DuplicateChat(sender.clone(), recipient.clone()));
    }

    let body = ChatRequest { from: sender.clone(), to: recipient.clone() };
    let path = self.insert(&ChatRequest::collection(), &body).await?;
    tracing::info!(request = %path.id, %sender, %recipient, "chat request sent");
    self.load(&path).await
  }

  /// Accept a pending request as its recipient, creating the personal chat.
  ///
  /// The chat is created and the request removed atomically. If the pair
  /// already has a personal chat nothing is written and
  /// [`Error::DuplicateChat`] is returned.
  pub async fn accept(&self, viewer: &UserId, request_id: &str) -> Result<Record<Chat>> {
    let request_path = ChatRequest::path(request_id);
    let request: Record<ChatRequest> = self.load(&request_path).await?;
    let ChatRequest { from, to } = request.data;
    if to != *viewer {
      return Err(Error::NotRecipient { user: viewer.clone(), request: request_id.to_owned() });
    }
    if self.personal_chat(&from, &to).await?.is_some() {
      return Err(Error::DuplicateChat(from, to));
    }

    let chat_path = Chat::path(&Chat::personal_id(&from, &to));
    let chat = Chat::personal(from.clone(), to.clone());
    let ops = vec![
      WriteOp::Create { path: chat_path.clone(), data: encode_body(&chat_path, &chat)? },
      WriteOp::Delete { path: request_path, must_exist: true },
    ];
    self.store.commit(ops).await.map_err(|e| {
      if let Some(chatter_core::Error::AlreadyExists(_)) = e.core() {
        Error::DuplicateChat(from.clone(), to.clone())
      } else {
        Error::store(e)
      }
    })?;
    tracing::info!(chat = %chat_path.id, request = request_id, "chat request accepted");
    self.load(&chat_path).await
  }

  /// Decline a pending request as its recipient.
  pub async fn decline(&self, viewer: &UserId, request_id: &str) -> Result<()> {
    let request_path = ChatRequest::path(request_id);
    let request: Record<ChatRequest> = self.load(&request_path).await?;
    if request.data.to != *viewer {
      return Err(Error::NotRecipient { user: viewer.clone(), request: request_id.to_owned() });
    }
    self
      .store
      .commit(vec![WriteOp::Delete { path: request_path, must_exist: true }])
      .await
      .map_err(Error::store)?;
    tracing::info!(request = request_id, "chat request declined");
    Ok(())
  }

  // ── Groups and messages ───────────────────────────────────────────────────

  /// Create a group chat named `name` with `creator` and `members`.
  ///
  /// Duplicate members and the creator are dropped from `members` before the
  /// size limits apply.
  pub async fn create_group(
    &self,
    creator: &UserId,
    name: &str,
    members: &[UserId],
  ) -> Result<Record<Chat>> {
    let name = name.trim();
    if name.is_empty() {
      return Err(Error::Validation("group name must not be empty".into()));
    }
    let mut everyone: Vec<UserId> = Vec::with_capacity(members.len() + 1);
    for member in members {
      if member != creator && !everyone.contains(member) {
        everyone.push(member.clone());
      }
    }
    if everyone.is_empty() {
      return Err(Error::Validation("a group needs at least one member besides its creator".into()));
    }
    let max = self.config.max_group_members;
    if everyone.len() + 1 > max {
      return Err(Error::GroupSize { requested: everyone.len() + 1, max });
    }
    everyone.push(creator.clone());

    let chat = Chat {
      kind:       ChatKind::Group,
      members:    everyone,
      name:       Some(name.to_owned()),
      created_by: Some(creator.clone()),
    };
    let path = self.insert(&Chat::collection(), &chat).await?;
    tracing::info!(chat = %path.id, members = chat.members.len(), "group chat created");
    self.load(&path).await
  }

  /// Append a message to a chat `sender` belongs to.
  pub async fn send_message(
    &self,
    chat_id: &str,
    sender: &UserId,
    text: &str,
  ) -> Result<Record<Message>> {
    let text = text.trim();
    if text.is_empty() {
      return Err(Error::Validation("message text must not be empty".into()));
    }
    let chat: Record<Chat> = self.load(&Chat::path(chat_id)).await?;
    if !chat.data.has_member(sender) {
      return Err(Error::NotMember { user: sender.clone(), chat: chat_id.to_owned() });
    }

    let message = Message { sender_id: sender.clone(), text: text.to_owned() };
    let path = self.insert(&Message::collection(chat_id), &message).await?;
    tracing::debug!(chat = chat_id, message = %path.id, "message sent");
    self.load(&path).await
  }
}

#[cfg(test)]
mod tests {
  use chatter_store_memory::MemoryStore;
  use serde_json::json;

  use super::*;

  fn uid(s: &str) -> UserId { s.into() }

  async fn service() -> (ChatService<MemoryStore>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    for name in ["ann", "bob", "cy"] {
      store
        .set(&User::path(&uid(name)), json!({ "username": name }))
        .await
        .unwrap();
    }
    (ChatService::new(store.clone(), SyncConfig::default()), store)
  }

  #[tokio::test]
  async fn propose_then_accept_creates_one_personal_chat() {
    let (svc, store) = service().await;
    let request = svc.propose(&uid("ann"), &uid("bob")).await.unwrap();
    assert!(matches!(
      svc.relationship(&uid("bob"), &uid("ann")).await.unwrap(),
      Relationship::RequestPending { .. }
    ));

    let chat = svc.accept(&uid("bob"), &request.id).await.unwrap();
    assert_eq!(chat.data.kind, ChatKind::Personal);
    assert!(chat.data.is_personal_between(&uid("bob"), &uid("ann")));
    assert!(store.get(&ChatRequest::path(&request.id)).await.unwrap().is_none());
    assert_eq!(
      svc.relationship(&uid("ann"), &uid("bob")).await.unwrap(),
      Relationship::Chat { chat_id: chat.id }
    );
  }

  #[tokio::test]
  async fn ids_containing_colons_get_distinct_personal_chats() {
    let (svc, store) = service().await;
    for name in ["a", "b:c", "a:b", "c"] {
      store.set(&User::path(&uid(name)), json!({ "username": name })).await.unwrap();
    }
    let first = svc.propose(&uid("a:b"), &uid("c")).await.unwrap();
    let first_chat = svc.accept(&uid("c"), &first.id).await.unwrap();

    assert_eq!(svc.relationship(&uid("a"), &uid("b:c")).await.unwrap(), Relationship::None);
    let second = svc.propose(&uid("a"), &uid("b:c")).await.unwrap();
    let second_chat = svc.accept(&uid("b:c"), &second.id).await.unwrap();

    assert_ne!(first_chat.id, second_chat.id);
    assert!(second_chat.data.is_personal_between(&uid("a"), &uid("b:c")));
  }

  #[tokio::test]
  async fn accept_writes_chat_and_deletes_request_in_one_batch() {
    let (svc, store) = service().await;
    let request = svc.propose(&uid("ann"), &uid("bob")).await.unwrap();
    let before = store.journal().len();
    svc.accept(&uid("bob"), &request.id).await.unwrap();

    let journal = store.journal();
    let batches: Vec<u64> = journal[before..].iter().map(|e| e.batch).collect();
    assert_eq!(batches.len(), 2);
    assert_eq!(batches[0], batches[1]);
  }

  #[tokio::test]
  async fn second_proposal_after_chat_exists_is_rejected() {
    let (svc, _store) = service().await;
    let request = svc.propose(&uid("ann"), &uid("bob")).await.unwrap();
    svc.accept(&uid("bob"), &request.id).await.unwrap();

    let err = svc.propose(&uid("bob"), &uid("ann")).await.unwrap_err();
    assert!(matches!(err, Error::DuplicateChat(..)));
  }

  #[tokio::test]
  async fn crossing_requests_yield_a_single_chat() {
    let (svc, store) = service().await;
    let one = svc.propose(&uid("ann"), &uid("bob")).await.unwrap();
    // A request in the other direction written directly, as a second client
    // racing the first would.
    let other = store
      .add(&ChatRequest::collection(), json!({ "from": "bob", "to": "ann" }))
      .await
      .unwrap();

    svc.accept(&uid("bob"), &one.id).await.unwrap();
    let err = svc.accept(&uid("ann"), &other.id).await.unwrap_err();
    assert!(matches!(err, Error::DuplicateChat(..)));

    let chats = store.fetch(&Query::collection(Chat::collection())).await.unwrap();
    assert_eq!(chats.len(), 1);
    // The losing request is left for the recipient to decline.
    assert!(store.get(&other).await.unwrap().is_some());
  }

  #[tokio::test]
  async fn only_the_recipient_may_accept_or_decline() {
    let (svc, _store) = service().await;
    let request = svc.propose(&uid("ann"), &uid("bob")).await.unwrap();
    assert!(matches!(
      svc.accept(&uid("ann"), &request.id).await,
      Err(Error::NotRecipient { .. })
    ));
    assert!(matches!(
      svc.decline(&uid("cy"), &request.id).await,
      Err(Error::NotRecipient { .. })
    ));
  }

  #[tokio::test]
  async fn declining_removes_request_and_repeat_is_not_found() {
    let (svc, _store) = service().await;
    let request = svc.propose(&uid("ann"), &uid("bob")).await.unwrap();
    svc.decline(&uid("bob"), &request.id).await.unwrap();
    assert_eq!(svc.relationship(&uid("ann"), &uid("bob")).await.unwrap(), Relationship::None);
    assert!(matches!(
      svc.decline(&uid("bob"), &request.id).await,
      Err(Error::NotFound(_))
    ));
  }

  #[tokio::test]
  async fn proposing_to_yourself_or_a_stranger_fails() {
    let (svc, _store) = service().await;
    assert!(matches!(
      svc.propose(&uid("ann"), &uid("ann")).await,
      Err(Error::Validation(_))
    ));
    assert!(matches!(
      svc.propose(&uid("ann"), &uid("nobody")).await,
      Err(Error::NotFound(_))
    ));
  }

  #[tokio::test]
  async fn repeated_proposal_leaves_two_requests_and_one_accept_settles_both() {
    let (svc, store) = service().await;
    let first = svc.propose(&uid("ann"), &uid("bob")).await.unwrap();
    let again = svc.propose(&uid("ann"), &uid("bob")).await.unwrap();
    assert_ne!(first.id, again.id);
    let pending = store.fetch(&Query::collection(ChatRequest::collection())).await.unwrap();
    assert_eq!(pending.len(), 2);

    svc.accept(&uid("bob"), &again.id).await.unwrap();
    assert!(matches!(
      svc.accept(&uid("bob"), &first.id).await,
      Err(Error::DuplicateChat(..))
    ));
  }

  #[tokio::test]
  async fn group_appends_creator_and_enforces_limits() {
    let (svc, _store) = service().await;
    let chat = svc
      .create_group(&uid("ann"), "  trio ", &[uid("bob"), uid("cy"), uid("bob"), uid("ann")])
      .await
      .unwrap();
    assert_eq!(chat.data.name.as_deref(), Some("trio"));
    assert_eq!(chat.data.members, [uid("bob"), uid("cy"), uid("ann")]);
    assert_eq!(chat.data.created_by, Some(uid("ann")));

    assert!(matches!(
      svc.create_group(&uid("ann"), "   ", &[uid("bob")]).await,
      Err(Error::Validation(_))
    ));
    assert!(matches!(
      svc.create_group(&uid("ann"), "solo", &[uid("ann")]).await,
      Err(Error::Validation(_))
    ));

    let crowd: Vec<UserId> = (0..20).map(|i| uid(&format!("u{i}"))).collect();
    assert!(matches!(
      svc.create_group(&uid("ann"), "crowd", &crowd).await,
      Err(Error::GroupSize { requested: 21, max: 20 })
    ));
    assert!(svc.create_group(&uid("ann"), "full", &crowd[..19]).await.is_ok());
  }

  #[tokio::test]
  async fn messages_require_text_and_membership() {
    let (svc, _store) = service().await;
    let chat = svc.create_group(&uid("ann"), "g", &[uid("bob")]).await.unwrap();

    let sent = svc.send_message(&chat.id, &uid("bob"), " hi ").await.unwrap();
    assert_eq!(sent.data.text, "hi");
    assert!(matches!(
      svc.send_message(&chat.id, &uid("bob"), "  \n").await,
      Err(Error::Validation(_))
    ));
    assert!(matches!(
      svc.send_message(&chat.id, &uid("cy"), "let me in").await,
      Err(Error::NotMember { .. })
    ));
    assert!(matches!(
      svc.send_message("missing", &uid("bob"), "hello?").await,
      Err(Error::NotFound(_))
    ));
  }
}
