//! The per-user free-text notepad.

use serde::{Deserialize, Serialize};

use crate::{
  document::{CollectionPath, DocPath},
  user::UserId,
};

pub const NOTEPADS: &str = "notepads";

/// Stored at `notepads/{uid}` and overwritten in place on every save.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotepadDocument {
  pub content: String,
}

impl NotepadDocument {
  pub fn path(owner: &UserId) -> DocPath { CollectionPath::root(NOTEPADS).doc(owner.as_str()) }
}
