//! Users and the username reservation records that keep display names unique.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::document::{CollectionPath, DocPath};

pub const USERS: &str = "users";
pub const USERNAMES: &str = "usernames";

/// The opaque identity issued by the authentication provider.
#[derive(
  Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
  pub fn new(id: impl Into<String>) -> Self { Self(id.into()) }

  pub fn as_str(&self) -> &str { &self.0 }
}

impl fmt::Display for UserId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

impl From<&str> for UserId {
  fn from(id: &str) -> Self { Self(id.to_owned()) }
}

impl From<UserId> for serde_json::Value {
  fn from(id: UserId) -> Self { serde_json::Value::String(id.0) }
}

impl From<&UserId> for serde_json::Value {
  fn from(id: &UserId) -> Self { serde_json::Value::String(id.0.clone()) }
}

/// A user profile, stored at `users/{uid}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
  /// Unique display name, reserved through a [`UsernameClaim`].
  pub username:  String,
  #[serde(default)]
  pub email:     Option<String>,
  /// Avatar reference supplied by the authentication provider.
  #[serde(default)]
  pub photo_url: Option<String>,
  /// Preferred display color as `#RRGGBB`.
  #[serde(default)]
  pub color:     Option<String>,
  #[serde(default)]
  pub is_admin:  bool,
}

impl User {
  pub fn collection() -> CollectionPath { CollectionPath::root(USERS) }

  pub fn path(uid: &UserId) -> DocPath { Self::collection().doc(uid.as_str()) }
}

/// Reservation of a username, stored at `usernames/{username}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsernameClaim {
  pub uid: UserId,
}

impl UsernameClaim {
  pub fn path(username: &str) -> DocPath { CollectionPath::root(USERNAMES).doc(username) }
}
