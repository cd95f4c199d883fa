//! Runtime configuration for the sync layer.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Largest group chat, creator included.
pub const MAX_GROUP_MEMBERS: usize = 20;

/// Tunables for the sync layer. Every field has a default, so an empty
/// configuration source is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Quiet period after the last notepad edit before it is written.
  pub notepad_quiet_period_ms: u64,
  /// Largest group chat, creator included.
  pub max_group_members:       usize,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self { notepad_quiet_period_ms: 1000, max_group_members: MAX_GROUP_MEMBERS }
  }
}

impl SyncConfig {
  pub fn notepad_quiet_period(&self) -> Duration {
    Duration::from_millis(self.notepad_quiet_period_ms)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn missing_fields_fall_back_to_defaults() {
    let cfg: SyncConfig = serde_json::from_str(r#"{ "max_group_members": 8 }"#).unwrap();
    assert_eq!(cfg.max_group_members, 8);
    assert_eq!(cfg.notepad_quiet_period(), Duration::from_secs(1));
  }
}
