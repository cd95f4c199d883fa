//! Profiles and accounts: claiming a username on first sign-in, searching
//! users, display preferences, administrator rights, and account deletion.

use std::sync::Arc;

use chatter_core::{
  chat::{Chat, ChatKind, ChatRequest, Message},
  document::{DocPath, Record, encode_body},
  notepad::NotepadDocument,
  query::{OrderBy, Query},
  store::{DocumentStore, StoreError, WriteOp},
  user::{User, UserId, UsernameClaim},
};
use serde_json::{Map, Value, json};

use crate::{Error, Result};

const MAX_USERNAME_LEN: usize = 32;

/// What [`AccountService::delete_account`] removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletionReport {
  /// Personal chats, plus group chats left with fewer than two members.
  pub chats_deleted:    usize,
  pub messages_deleted: usize,
  /// Group chats the user was removed from.
  pub groups_left:      usize,
  pub requests_deleted: usize,
}

fn validate_username(username: &str) -> Result<&str> {
  let username = username.trim();
  if username.is_empty() {
    return Err(Error::Validation("username must not be empty".into()));
  }
  if username.chars().count() > MAX_USERNAME_LEN {
    return Err(Error::Validation(format!(
      "username must be at most {MAX_USERNAME_LEN} characters"
    )));
  }
  if username.contains('/') || username.chars().any(char::is_whitespace) {
    return Err(Error::Validation("username must not contain '/' or whitespace".into()));
  }
  Ok(username)
}

fn validate_color(color: &str) -> Result<()> {
  let hex = color.strip_prefix('#').filter(|h| h.len() == 6);
  match hex {
    Some(h) if h.chars().all(|c| c.is_ascii_hexdigit()) => Ok(()),
    _ => Err(Error::Validation(format!("{color:?} is not a #RRGGBB color"))),
  }
}

pub struct AccountService<S> {
  store: Arc<S>,
}

impl<S> Clone for AccountService<S> {
  fn clone(&self) -> Self { Self { store: self.store.clone() } }
}

impl<S: DocumentStore> AccountService<S> {
  pub fn new(store: Arc<S>) -> Self { Self { store } }

  async fn fetch<T: serde::de::DeserializeOwned>(&self, query: &Query) -> Result<Vec<Record<T>>> {
    let docs = self.store.fetch(query).await.map_err(Error::store)?;
    docs.iter().map(|d| d.decode().map_err(Error::from)).collect()
  }

  pub async fn profile(&self, uid: &UserId) -> Result<Option<Record<User>>> {
    match self.store.get(&User::path(uid)).await.map_err(Error::store)? {
      Some(doc) => Ok(Some(doc.decode()?)),
      None => Ok(None),
    }
  }

  /// The identity that holds `username`.
  pub async fn resolve_username(&self, username: &str) -> Result<UserId> {
    let path = UsernameClaim::path(username.trim());
    let doc = self
      .store
      .get(&path)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| Error::NotFound(path.clone()))?;
    Ok(doc.decode::<UsernameClaim>()?.data.uid)
  }

  async fn require_admin(&self, actor: &UserId) -> Result<()> {
    match self.profile(actor).await? {
      Some(p) if p.data.is_admin => Ok(()),
      _ => Err(Error::NotAdmin(actor.clone())),
    }
  }

  // ── Profiles ──────────────────────────────────────────────────────────────

  /// Create `uid`'s profile and reserve its username in one batch.
  pub async fn claim_username(
    &self,
    uid: &UserId,
    username: &str,
    email: Option<String>,
    photo_url: Option<String>,
  ) -> Result<Record<User>> {
    let username = validate_username(username)?;
    let claim_path = UsernameClaim::path(username);
    let user_path = User::path(uid);
    let user = User {
      username: username.to_owned(),
      email,
      photo_url,
      color: None,
      is_admin: false,
    };
    let ops = vec![
      WriteOp::Create {
        path: claim_path.clone(),
        data: encode_body(&claim_path, &UsernameClaim { uid: uid.clone() })?,
      },
      WriteOp::Create { path: user_path.clone(), data: encode_body(&user_path, &user)? },
    ];
    self.store.commit(ops).await.map_err(|e| match e.core() {
      Some(chatter_core::Error::AlreadyExists(p)) if *p == claim_path => {
        Error::UsernameTaken(username.to_owned())
      }
      Some(chatter_core::Error::AlreadyExists(_)) => {
        Error::Validation(format!("{uid} already has a profile"))
      }
      _ => Error::store(e),
    })?;
    tracing::info!(%uid, username, "username claimed");

    let doc = self
      .store
      .get(&user_path)
      .await
      .map_err(Error::store)?
      .ok_or_else(|| Error::NotFound(user_path.clone()))?;
    Ok(doc.decode()?)
  }

  /// Users whose username starts with `prefix`, excluding `viewer`, in
  /// username order.
  pub async fn search_users(&self, viewer: &UserId, prefix: &str) -> Result<Vec<Record<User>>> {
    let prefix = prefix.trim();
    if prefix.is_empty() {
      return Ok(Vec::new());
    }
    let query = Query::collection(User::collection())
      .where_prefix("username", prefix)
      .order_by(OrderBy::field("username"));
    let users: Vec<Record<User>> = self.fetch(&query).await?;
    Ok(users.into_iter().filter(|u| u.id != viewer.as_str()).collect())
  }

  /// Set or clear `uid`'s display color.
  pub async fn set_color(&self, uid: &UserId, color: Option<&str>) -> Result<()> {
    if let Some(color) = color {
      validate_color(color)?;
    }
    let value = color.map_or(Value::Null, |c| json!(c.to_ascii_lowercase()));
    let path = User::path(uid);
    self
      .store
      .commit(vec![WriteOp::Merge { path, fields: Map::from_iter([("color".to_owned(), value)]) }])
      .await
      .map_err(Error::store)
  }

  // ── Administration ────────────────────────────────────────────────────────

  /// Every profile, for administrators.
  pub async fn list_users(&self, actor: &UserId) -> Result<Vec<Record<User>>> {
    self.require_admin(actor).await?;
    self
      .fetch(&Query::collection(User::collection()).order_by(OrderBy::field("username")))
      .await
  }

  /// Grant or revoke administrator rights. Only administrators may do this.
  pub async fn set_admin(&self, actor: &UserId, target: &UserId, is_admin: bool) -> Result<()> {
    self.require_admin(actor).await?;
    self
      .store
      .commit(vec![WriteOp::Merge {
        path:   User::path(target),
        fields: Map::from_iter([("is_admin".to_owned(), Value::Bool(is_admin))]),
      }])
      .await
      .map_err(Error::store)?;
    tracing::info!(%actor, %target, is_admin, "administrator rights changed");
    Ok(())
  }

  // ── Deletion ──────────────────────────────────────────────────────────────

  async fn message_paths(&self, chat_id: &str) -> Result<Vec<DocPath>> {
    let docs = self
      .store
      .fetch(&Query::collection(Message::collection(chat_id)))
      .await
      .map_err(Error::store)?;
    Ok(docs.into_iter().map(|d| d.path).collect())
  }

  /// Remove everything `uid` owns in one batch.
  ///
  /// Personal chats are deleted with their messages. `uid` is removed from
  /// group chats, and a group left with fewer than two members is deleted.
  /// Deleting the identity at the authentication provider is up to the
  /// caller.
  pub async fn delete_account(&self, uid: &UserId) -> Result<DeletionReport> {
    self.delete_footprint(uid).await
  }

  /// Delete another user's account. Only administrators may do this.
  pub async fn remove_user(&self, actor: &UserId, target: &UserId) -> Result<DeletionReport> {
    self.require_admin(actor).await?;
    if self.profile(target).await?.is_none() {
      return Err(Error::NotFound(User::path(target)));
    }
    let report = self.delete_footprint(target).await?;
    tracing::info!(%actor, %target, "user removed by administrator");
    Ok(report)
  }

  async fn delete_footprint(&self, uid: &UserId) -> Result<DeletionReport> {
    let mut report = DeletionReport::default();
    let mut ops = Vec::new();

    if let Some(profile) = self.profile(uid).await? {
      let claim_path = UsernameClaim::path(&profile.data.username);
      // Only release a claim that is really ours.
      if let Some(claim) = self.store.get(&claim_path).await.map_err(Error::store)?
        && claim.decode::<UsernameClaim>()?.data.uid == *uid
      {
        ops.push(WriteOp::Delete { path: claim_path, must_exist: true });
      }
      ops.push(WriteOp::Delete { path: User::path(uid), must_exist: true });
    }

    let chats: Vec<Record<Chat>> = self
      .fetch(&Query::collection(Chat::collection()).where_contains("members", uid))
      .await?;
    for chat in chats {
      let remaining: Vec<UserId> =
        chat.data.members.iter().filter(|m| *m != uid).cloned().collect();
      let dissolve = chat.data.kind == ChatKind::Personal || remaining.len() < 2;
      if dissolve {
        for path in self.message_paths(&chat.id).await? {
          ops.push(WriteOp::Delete { path, must_exist: false });
          report.messages_deleted += 1;
        }
        ops.push(WriteOp::Delete { path: Chat::path(&chat.id), must_exist: false });
        report.chats_deleted += 1;
      } else {
        let members = remaining.into_iter().map(Value::from).collect();
        ops.push(WriteOp::Merge {
          path:   Chat::path(&chat.id),
          fields: Map::from_iter([("members".to_owned(), Value::Array(members))]),
        });
        report.groups_left += 1;
      }
    }

    for field in ["from", "to"] {
      let query = Query::collection(ChatRequest::collection()).where_eq(field, uid);
      for doc in self.store.fetch(&query).await.map_err(Error::store)? {
        ops.push(WriteOp::Delete { path: doc.path, must_exist: false });
        report.requests_deleted += 1;
      }
    }

    ops.push(WriteOp::Delete { path: NotepadDocument::path(uid), must_exist: false });

    self.store.commit(ops).await.map_err(Error::store)?;
    tracing::info!(
      %uid,
      chats = report.chats_deleted,
      groups = report.groups_left,
      requests = report.requests_deleted,
      "account deleted"
    );
    Ok(report)
  }
}

#[cfg(test)]
mod tests {
  use chatter_store_memory::MemoryStore;

  use super::*;
  use crate::{ChatService, SyncConfig};

  fn uid(s: &str) -> UserId { s.into() }

  async fn accounts() -> (AccountService<MemoryStore>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let svc = AccountService::new(store.clone());
    for name in ["ann", "anna", "bob"] {
      svc.claim_username(&uid(name), name, None, None).await.unwrap();
    }
    (svc, store)
  }

  #[tokio::test]
  async fn usernames_are_claimed_once() {
    let (svc, store) = accounts().await;
    let err = svc.claim_username(&uid("imposter"), "ann", None, None).await.unwrap_err();
    assert!(matches!(err, Error::UsernameTaken(name) if name == "ann"));
    assert!(svc.profile(&uid("imposter")).await.unwrap().is_none());

    let err = svc.claim_username(&uid("ann"), "second-name", None, None).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(store.get(&UsernameClaim::path("second-name")).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn usernames_resolve_to_their_owner() {
    let (svc, _store) = accounts().await;
    assert_eq!(svc.resolve_username("bob").await.unwrap(), uid("bob"));
    assert!(matches!(svc.resolve_username("zed").await, Err(Error::NotFound(_))));
  }

  #[tokio::test]
  async fn malformed_usernames_are_rejected() {
    let (svc, _store) = accounts().await;
    let long = "x".repeat(33);
    for bad in ["", "   ", "a/b", "two words", long.as_str()] {
      assert!(
        matches!(svc.claim_username(&uid("new"), bad, None, None).await, Err(Error::Validation(_))),
        "{bad:?} accepted"
      );
    }
  }

  #[tokio::test]
  async fn search_matches_prefix_and_skips_viewer() {
    let (svc, _store) = accounts().await;
    let found = svc.search_users(&uid("ann"), "an").await.unwrap();
    let names: Vec<_> = found.iter().map(|u| u.data.username.as_str()).collect();
    assert_eq!(names, ["anna"]);

    let found = svc.search_users(&uid("bob"), "an").await.unwrap();
    assert_eq!(found.len(), 2);
    assert!(svc.search_users(&uid("bob"), "  ").await.unwrap().is_empty());
  }

  #[tokio::test]
  async fn color_must_be_hex() {
    let (svc, _store) = accounts().await;
    svc.set_color(&uid("ann"), Some("#A1B2C3")).await.unwrap();
    let profile = svc.profile(&uid("ann")).await.unwrap().unwrap();
    assert_eq!(profile.data.color.as_deref(), Some("#a1b2c3"));

    for bad in ["red", "#12345", "#GGGGGG", "123456"] {
      assert!(matches!(svc.set_color(&uid("ann"), Some(bad)).await, Err(Error::Validation(_))));
    }
    svc.set_color(&uid("ann"), None).await.unwrap();
    assert_eq!(svc.profile(&uid("ann")).await.unwrap().unwrap().data.color, None);
  }

  #[tokio::test]
  async fn only_admins_manage_admins() {
    let (svc, store) = accounts().await;
    assert!(matches!(
      svc.set_admin(&uid("ann"), &uid("ann"), true).await,
      Err(Error::NotAdmin(_))
    ));
    assert!(matches!(svc.list_users(&uid("ann")).await, Err(Error::NotAdmin(_))));

    store
      .set(&User::path(&uid("root")), json!({ "username": "root", "is_admin": true }))
      .await
      .unwrap();
    svc.set_admin(&uid("root"), &uid("ann"), true).await.unwrap();
    assert_eq!(svc.list_users(&uid("ann")).await.unwrap().len(), 4);
  }

  #[tokio::test]
  async fn only_admins_remove_other_users() {
    let (svc, store) = accounts().await;
    let chats = ChatService::new(store.clone(), SyncConfig::default());
    let request = chats.propose(&uid("anna"), &uid("bob")).await.unwrap();
    let personal = chats.accept(&uid("bob"), &request.id).await.unwrap();

    assert!(matches!(
      svc.remove_user(&uid("ann"), &uid("bob")).await,
      Err(Error::NotAdmin(_))
    ));
    assert!(svc.profile(&uid("bob")).await.unwrap().is_some());

    store
      .set(&User::path(&uid("root")), json!({ "username": "root", "is_admin": true }))
      .await
      .unwrap();
    assert!(matches!(
      svc.remove_user(&uid("root"), &uid("ghost")).await,
      Err(Error::NotFound(_))
    ));

    let report = svc.remove_user(&uid("root"), &uid("bob")).await.unwrap();
    assert_eq!(report.chats_deleted, 1);
    assert!(svc.profile(&uid("bob")).await.unwrap().is_none());
    assert!(store.get(&UsernameClaim::path("bob")).await.unwrap().is_none());
    assert!(store.get(&Chat::path(&personal.id)).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn deleting_an_account_removes_its_footprint() {
    let (svc, store) = accounts().await;
    let chats = ChatService::new(store.clone(), SyncConfig::default());

    let request = chats.propose(&uid("ann"), &uid("bob")).await.unwrap();
    let personal = chats.accept(&uid("bob"), &request.id).await.unwrap();
    chats.send_message(&personal.id, &uid("ann"), "hi bob").await.unwrap();
    let pair = chats.create_group(&uid("ann"), "pair", &[uid("bob")]).await.unwrap();
    let trio = chats
      .create_group(&uid("bob"), "trio", &[uid("ann"), uid("anna")])
      .await
      .unwrap();
    chats.propose(&uid("anna"), &uid("ann")).await.unwrap();
    store
      .set(&NotepadDocument::path(&uid("ann")), json!({ "content": "secret" }))
      .await
      .unwrap();

    let batches_before = store.journal().last().map(|e| e.batch);
    let report = svc.delete_account(&uid("ann")).await.unwrap();
    assert_eq!(report, DeletionReport {
      chats_deleted:    2,
      messages_deleted: 1,
      groups_left:      1,
      requests_deleted: 1,
    });
    // One batch for the whole deletion.
    let batches: Vec<u64> = store
      .journal()
      .iter()
      .map(|e| e.batch)
      .filter(|b| Some(*b) > batches_before)
      .collect();
    assert!(batches.windows(2).all(|w| w[0] == w[1]));

    assert!(svc.profile(&uid("ann")).await.unwrap().is_none());
    assert!(store.get(&UsernameClaim::path("ann")).await.unwrap().is_none());
    assert!(store.get(&Chat::path(&personal.id)).await.unwrap().is_none());
    assert!(store.get(&Chat::path(&pair.id)).await.unwrap().is_none());
    assert!(store.get(&NotepadDocument::path(&uid("ann"))).await.unwrap().is_none());
    let trio = store.get(&Chat::path(&trio.id)).await.unwrap().unwrap();
    assert_eq!(trio.data["members"], json!(["anna", "bob"]));

    // The name is free again.
    svc.claim_username(&uid("new-ann"), "ann", None, None).await.unwrap();
  }
}
