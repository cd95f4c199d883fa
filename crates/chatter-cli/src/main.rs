//! `chatter`: command-line client for a Chatter store.
//!
//! Authentication happens elsewhere; pass the identity it issued with
//! `--as` (or `CHATTER_USER`).
//!
//! # Usage
//!
//! ```text
//! chatter --as u1 signup ann
//! chatter --as u2 signup bob
//! chatter --as u2 request ann
//! chatter --as u1 requests
//! chatter --as u1 accept <request-id>
//! chatter --as u1 watch <chat-id>
//! ```

mod commands;
mod config;

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use chatter_core::user::UserId;
use chatter_store_sqlite::SqliteStore;
use clap::{Parser, Subcommand};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::{commands::Client, config::CliConfig};

#[derive(Parser)]
#[command(name = "chatter", version, about = "Command-line client for the Chatter store")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, value_name = "FILE", default_value = "chatter.toml")]
  config: PathBuf,

  /// Identity issued by the authentication provider.
  #[arg(long = "as", env = "CHATTER_USER", value_name = "UID")]
  user: String,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand)]
pub enum Command {
  /// Create your profile and claim a username.
  Signup {
    username: String,
    #[arg(long)]
    email:    Option<String>,
  },
  /// Find users whose username starts with a prefix.
  Search { prefix: String },
  /// Ask a user for a personal chat.
  Request { username: String },
  /// List chat requests sent to you.
  Requests,
  /// Accept a chat request.
  Accept { request_id: String },
  /// Decline a chat request.
  Decline { request_id: String },
  /// Create a group chat with the given members.
  Group {
    name:    String,
    #[arg(required = true)]
    members: Vec<String>,
  },
  /// Send a message to a chat.
  Send {
    chat_id: String,
    #[arg(required = true, num_args = 1..)]
    text:    Vec<String>,
  },
  /// List your chats.
  Chats,
  /// Print the messages of a chat.
  Messages { chat_id: String },
  /// Show your notepad, or replace its content.
  Note { text: Option<String> },
  /// Follow a chat and your pending requests until interrupted.
  Watch { chat_id: String },
  /// Set your display color (#RRGGBB), or clear it.
  Color { color: Option<String> },
  /// Administrator commands.
  #[command(subcommand)]
  Admin(AdminCommand),
  /// Delete your profile, personal chats, requests and notepad.
  DeleteAccount {
    /// Required; deletion cannot be undone.
    #[arg(long)]
    yes: bool,
  },
}

#[derive(Subcommand)]
pub enum AdminCommand {
  /// List every user.
  Users,
  /// Make a user an administrator.
  Grant { username: String },
  /// Revoke a user's administrator rights.
  Revoke { username: String },
  /// Delete another user's account.
  Delete {
    username: String,
    /// Required; deletion cannot be undone.
    #[arg(long)]
    yes:      bool,
  },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  tracing_subscriber::fmt()
    .with_writer(std::io::stderr)
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .init();

  let cli = Cli::parse();
  let cfg = CliConfig::load(&cli.config)?;

  if let Some(parent) = cfg.store_path.parent() {
    std::fs::create_dir_all(parent)
      .with_context(|| format!("failed to create {}", parent.display()))?;
  }
  let store = SqliteStore::open(&cfg.store_path)
    .await
    .with_context(|| format!("failed to open store at {:?}", cfg.store_path))?;

  let client = Client::new(Arc::new(store), UserId::new(cli.user), cfg);
  client.run(cli.command).await
}
