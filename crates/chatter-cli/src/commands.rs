//! Subcommand implementations.

use std::{collections::HashSet, sync::Arc};

use anyhow::{Context as _, bail};
use chatter_core::{document::Record, user::UserId};
use chatter_store_sqlite::SqliteStore;
use chatter_sync::{
  AccountService, ChatService, DeletionReport, Notepad, Observer, SaveStatus, Session,
  SubscriptionManager, feeds::MessageView, observer,
};
use chrono::{DateTime, Local, Utc};
use tokio::sync::mpsc;

use crate::{AdminCommand, Command, config::CliConfig};

/// An observer that forwards deliveries and errors to a channel.
fn forward<T: Send + 'static>()
-> (impl Observer<T>, mpsc::UnboundedReceiver<chatter_sync::Result<T>>) {
  let (tx, rx) = mpsc::unbounded_channel();
  let on_error = tx.clone();
  let obs = observer(
    move |v| {
      let _ = tx.send(Ok(v));
    },
    move |e| {
      let _ = on_error.send(Err(e));
    },
  );
  (obs, rx)
}

async fn next<T>(rx: &mut mpsc::UnboundedReceiver<chatter_sync::Result<T>>) -> anyhow::Result<T> {
  Ok(rx.recv().await.context("feed closed")??)
}

fn when(at: DateTime<Utc>) -> String { at.with_timezone(&Local).format("%Y-%m-%d %H:%M").to_string() }

fn print_message(view: &MessageView) {
  println!(
    "[{}] {}: {}",
    when(view.message.created_at),
    view.sender_name(),
    view.message.data.text
  );
}

fn print_report(report: &DeletionReport) {
  println!(
    "deleted {} chats, {} messages and {} requests; left {} groups",
    report.chats_deleted, report.messages_deleted, report.requests_deleted, report.groups_left
  );
}

pub struct Client {
  store:    Arc<SqliteStore>,
  manager:  SubscriptionManager<SqliteStore>,
  chats:    ChatService<SqliteStore>,
  accounts: AccountService<SqliteStore>,
  me:       UserId,
  config:   CliConfig,
}

impl Client {
  pub fn new(store: Arc<SqliteStore>, me: UserId, config: CliConfig) -> Self {
    Self {
      manager: SubscriptionManager::new(store.clone()),
      chats: ChatService::new(store.clone(), config.sync.clone()),
      accounts: AccountService::new(store.clone()),
      store,
      me,
      config,
    }
  }

  pub async fn run(&self, command: Command) -> anyhow::Result<()> {
    match command {
      Command::Signup { username, email } => {
        let user = self.accounts.claim_username(&self.me, &username, email, None).await?;
        println!("signed up as {}", user.data.username);
      }
      Command::Search { prefix } => {
        for user in self.accounts.search_users(&self.me, &prefix).await? {
          println!("{}", user.data.username);
        }
      }
      Command::Request { username } => {
        let recipient = self.accounts.resolve_username(&username).await?;
        let request = self.chats.propose(&self.me, &recipient).await?;
        println!("request {} sent to {username}", request.id);
      }
      Command::Requests => self.requests().await?,
      Command::Accept { request_id } => {
        let chat = self.chats.accept(&self.me, &request_id).await?;
        println!("chat {} created", chat.id);
      }
      Command::Decline { request_id } => {
        self.chats.decline(&self.me, &request_id).await?;
        println!("request {request_id} declined");
      }
      Command::Group { name, members } => {
        let mut ids = Vec::with_capacity(members.len());
        for username in &members {
          let uid = self
            .accounts
            .resolve_username(username)
            .await
            .with_context(|| format!("unknown user {username:?}"))?;
          ids.push(uid);
        }
        let chat = self.chats.create_group(&self.me, &name, &ids).await?;
        println!("group {} created with {} members", chat.id, chat.data.members.len());
      }
      Command::Send { chat_id, text } => {
        self.chats.send_message(&chat_id, &self.me, &text.join(" ")).await?;
      }
      Command::Chats => self.list_chats().await?,
      Command::Messages { chat_id } => {
        let (obs, mut rx) = forward();
        let _feed = self.manager.watch_messages(&chat_id, obs);
        for view in next(&mut rx).await? {
          print_message(&view);
        }
      }
      Command::Note { text } => self.note(text).await?,
      Command::Watch { chat_id } => self.watch(&chat_id).await?,
      Command::Color { color } => {
        self.accounts.set_color(&self.me, color.as_deref()).await?;
      }
      Command::Admin(admin) => self.admin(admin).await?,
      Command::DeleteAccount { yes } => {
        if !yes {
          bail!("refusing to delete the account without --yes");
        }
        print_report(&self.accounts.delete_account(&self.me).await?);
      }
    }
    Ok(())
  }

  async fn requests(&self) -> anyhow::Result<()> {
    let (obs, mut rx) = forward();
    let _feed = self.manager.watch_requests(&self.me, obs);
    let requests = next(&mut rx).await?;
    if requests.is_empty() {
      println!("no pending requests");
    }
    for view in requests {
      let from = view.from.as_ref().map_or("unknown user", |u| u.data.username.as_str());
      println!("{}  from {from}  ({})", view.request.id, when(view.request.created_at));
    }
    Ok(())
  }

  async fn list_chats(&self) -> anyhow::Result<()> {
    let (obs, mut rx) = forward();
    let _feed = self.manager.watch_chats(&self.me, obs);
    for summary in next(&mut rx).await? {
      println!("{}  {}", summary.chat.id, summary.title());
    }
    Ok(())
  }

  async fn note(&self, text: Option<String>) -> anyhow::Result<()> {
    let pad = Notepad::open(
      self.store.clone(),
      self.me.clone(),
      self.config.sync.notepad_quiet_period(),
    )
    .await?;
    let Some(text) = text else {
      println!("{}", pad.loaded());
      return Ok(());
    };

    let mut status = pad.watch_status();
    pad.edit(text);
    let settled = status
      .wait_for(|s| matches!(s, SaveStatus::Saved | SaveStatus::SaveError(_)))
      .await
      .context("notepad closed before saving")?
      .clone();
    match settled {
      SaveStatus::SaveError(message) => bail!("failed to save notepad: {message}"),
      _ => println!("saved"),
    }
    Ok(())
  }

  async fn watch(&self, chat_id: &str) -> anyhow::Result<()> {
    let _external = self.store.watch_external(self.config.poll_interval());
    let session = Session::start(self.manager.clone(), self.me.clone());
    let mut badge = session.notifications().watch();

    let (obs, mut rx) = forward();
    let _feed = self.manager.watch_messages(chat_id, obs);
    let mut printed: HashSet<String> = HashSet::new();

    loop {
      tokio::select! {
        batch = rx.recv() => match batch {
          Some(Ok(views)) => {
            for view in views.iter().filter(|v| printed.insert(v.message.id.clone())) {
              print_message(view);
            }
          }
          Some(Err(e)) => return Err(e).context("message feed failed"),
          None => break,
        },
        changed = badge.changed() => {
          if changed.is_err() {
            break;
          }
          let current = badge.borrow_and_update().clone();
          if current.has_pending() {
            eprintln!("({} pending chat request(s))", current.count());
          }
        }
        _ = tokio::signal::ctrl_c() => break,
      }
    }
    Ok(())
  }

  async fn admin(&self, command: AdminCommand) -> anyhow::Result<()> {
    match command {
      AdminCommand::Users => {
        let users: Vec<Record<_>> = self.accounts.list_users(&self.me).await?;
        for user in users {
          let role = if user.data.is_admin { "admin" } else { "" };
          println!("{}  {}  {role}", user.id, user.data.username);
        }
      }
      AdminCommand::Grant { username } => self.set_admin(&username, true).await?,
      AdminCommand::Revoke { username } => self.set_admin(&username, false).await?,
      AdminCommand::Delete { username, yes } => {
        if !yes {
          bail!("refusing to delete {username} without --yes");
        }
        let target = self.accounts.resolve_username(&username).await?;
        print_report(&self.accounts.remove_user(&self.me, &target).await?);
      }
    }
    Ok(())
  }

  async fn set_admin(&self, username: &str, is_admin: bool) -> anyhow::Result<()> {
    let target = self.accounts.resolve_username(username).await?;
    self.accounts.set_admin(&self.me, &target, is_admin).await?;
    let verb = if is_admin { "granted to" } else { "revoked from" };
    println!("administrator rights {verb} {username}");
    Ok(())
  }
}
