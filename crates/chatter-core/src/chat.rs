//! Chats, their messages, and pending personal-chat requests.

use serde::{Deserialize, Serialize};

use crate::{
  document::{CollectionPath, DocPath},
  user::UserId,
};

pub const CHATS: &str = "chats";
pub const MESSAGES: &str = "messages";
pub const CHAT_REQUESTS: &str = "chat_requests";

// ─── Chat ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatKind {
  /// Exactly two members, unique per unordered pair.
  Personal,
  /// Two to twenty members and a display name.
  Group,
}

/// A conversation, stored at `chats/{id}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
  #[serde(rename = "type")]
  pub kind:       ChatKind,
  /// Member identities; order carries no meaning.
  pub members:    Vec<UserId>,
  /// Display name; group chats only.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name:       Option<String>,
  /// Group chats only.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub created_by: Option<UserId>,
}

impl Chat {
  pub fn collection() -> CollectionPath { CollectionPath::root(CHATS) }

  pub fn path(chat_id: &str) -> DocPath { Self::collection().doc(chat_id) }

  pub fn personal(a: UserId, b: UserId) -> Self {
    Self { kind: ChatKind::Personal, members: vec![a, b], name: None, created_by: None }
  }

  /// The id of the personal chat between `a` and `b`, independent of
  /// argument order. Personal chats are always stored under this id so the
  /// store itself rejects a second chat for the same pair.
  ///
  /// The first id is length-prefixed, so distinct pairs never share an id
  /// even when the user ids contain `:`.
  pub fn personal_id(a: &UserId, b: &UserId) -> String {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    format!("{}:{lo}:{hi}", lo.as_str().len())
  }

  pub fn has_member(&self, uid: &UserId) -> bool { self.members.contains(uid) }

  /// For a personal chat, the member that is not `viewer`.
  pub fn other_member(&self, viewer: &UserId) -> Option<&UserId> {
    match self.kind {
      ChatKind::Personal => self.members.iter().find(|m| *m != viewer),
      ChatKind::Group => None,
    }
  }

  /// Whether this is a personal chat between exactly `a` and `b`.
  pub fn is_personal_between(&self, a: &UserId, b: &UserId) -> bool {
    self.kind == ChatKind::Personal && self.has_member(a) && self.has_member(b)
  }
}

// ─── Message ─────────────────────────────────────────────────────────────────

/// A chat message, stored at `chats/{chat_id}/messages/{id}`. Immutable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
  pub sender_id: UserId,
  pub text:      String,
}

impl Message {
  pub fn collection(chat_id: &str) -> CollectionPath { Chat::path(chat_id).child(MESSAGES) }
}

// ─── Chat request ────────────────────────────────────────────────────────────

/// A pending personal-chat proposal, stored at `chat_requests/{id}`.
///
/// There is no status field: the record exists exactly while the request is
/// pending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
  pub from: UserId,
  pub to:   UserId,
}

impl ChatRequest {
  pub fn collection() -> CollectionPath { CollectionPath::root(CHAT_REQUESTS) }

  pub fn path(request_id: &str) -> DocPath { Self::collection().doc(request_id) }
}
