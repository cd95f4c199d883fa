//! Configuration for the `chatter` binary.

use std::{
  path::{Path, PathBuf},
  time::Duration,
};

use anyhow::Context as _;
use chatter_sync::SyncConfig;
use serde::Deserialize;

/// Shape of `chatter.toml`. Every key is optional.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CliConfig {
  /// SQLite database shared by every client on this machine.
  pub store_path:       PathBuf,
  /// How often `watch` checks the database for other clients' commits.
  pub poll_interval_ms: u64,
  pub sync:             SyncConfig,
}

impl Default for CliConfig {
  fn default() -> Self {
    Self {
      store_path:       PathBuf::from("~/.local/share/chatter/chatter.db"),
      poll_interval_ms: 250,
      sync:             SyncConfig::default(),
    }
  }
}

impl CliConfig {
  /// Read `file` if it exists, then `CHATTER_*` environment overrides
  /// (`CHATTER_STORE_PATH`, `CHATTER_SYNC__MAX_GROUP_MEMBERS`, ...).
  pub fn load(file: &Path) -> anyhow::Result<Self> {
    let settings = config::Config::builder()
      .add_source(config::File::from(file).required(false))
      .add_source(
        config::Environment::with_prefix("CHATTER")
          .prefix_separator("_")
          .separator("__")
          .try_parsing(true),
      )
      .build()
      .context("failed to read config file")?;

    let mut cfg: CliConfig = settings
      .try_deserialize()
      .context("failed to deserialise CliConfig")?;
    cfg.store_path = expand_tilde(&cfg.store_path);
    Ok(cfg)
  }

  pub fn poll_interval(&self) -> Duration { Duration::from_millis(self.poll_interval_ms) }
}

/// Expand a leading `~` to the user's home directory.
fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn tilde_expands_against_home() {
    let Ok(home) = std::env::var("HOME") else {
      return;
    };
    assert_eq!(expand_tilde(Path::new("~/x/y.db")), PathBuf::from(home).join("x/y.db"));
    assert_eq!(expand_tilde(Path::new("/abs.db")), PathBuf::from("/abs.db"));
  }

  #[test]
  fn missing_file_yields_defaults() {
    let cfg = CliConfig::load(Path::new("/nonexistent/chatter.toml")).unwrap();
    assert_eq!(cfg.poll_interval(), Duration::from_millis(250));
    assert_eq!(cfg.sync, SyncConfig::default());
  }
}
