//! Integration tests for `SqliteStore` against in-memory and on-disk
//! databases.

use std::time::Duration;

use chatter_core::{
  document::CollectionPath,
  live::ChangeKind,
  query::{OrderBy, Query},
  store::{DocumentStore, StoreError, WriteOp},
};
use serde_json::json;

use crate::SqliteStore;

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory()
    .await
    .expect("in-memory store")
}

fn chats() -> CollectionPath { CollectionPath::root("chats") }

// ─── Documents ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn set_and_get_document() {
  let s = store().await;
  let path = chats().doc("c1");
  s.set(&path, json!({ "type": "personal", "members": ["a", "b"] }))
    .await
    .unwrap();

  let doc = s.get(&path).await.unwrap().unwrap();
  assert_eq!(doc.path, path);
  assert_eq!(doc.data["members"], json!(["a", "b"]));
}

#[tokio::test]
async fn get_missing_returns_none() {
  let s = store().await;
  assert!(s.get(&chats().doc("nope")).await.unwrap().is_none());
}

#[tokio::test]
async fn nested_collections_are_isolated() {
  let s = store().await;
  let a = chats().doc("a").child("messages");
  let b = chats().doc("b").child("messages");
  s.add(&a, json!({ "text": "to a" })).await.unwrap();
  s.add(&b, json!({ "text": "to b" })).await.unwrap();
  s.add(&b, json!({ "text": "to b again" })).await.unwrap();

  assert_eq!(s.fetch(&Query::collection(a)).await.unwrap().len(), 1);
  assert_eq!(s.fetch(&Query::collection(b)).await.unwrap().len(), 2);
}

#[tokio::test]
async fn fetch_orders_by_insertion_for_equal_timestamps() {
  let s = store().await;
  let msgs = chats().doc("c").child("messages");
  s.commit(vec![
    WriteOp::Create { path: msgs.doc("zz"), data: json!({ "text": "1" }) },
    WriteOp::Create { path: msgs.doc("aa"), data: json!({ "text": "2" }) },
  ])
  .await
  .unwrap();

  let docs = s
    .fetch(&Query::collection(msgs).order_by(OrderBy::created()))
    .await
    .unwrap();
  let texts: Vec<_> = docs.iter().map(|d| d.data["text"].clone()).collect();
  assert_eq!(texts, [json!("1"), json!("2")]);
}

#[tokio::test]
async fn document_query_reads_single_row() {
  let s = store().await;
  s.set(&chats().doc("a"), json!({})).await.unwrap();
  s.set(&chats().doc("b"), json!({})).await.unwrap();
  let docs = s.fetch(&Query::document(&chats().doc("b"))).await.unwrap();
  assert_eq!(docs.len(), 1);
  assert_eq!(docs[0].id(), "b");
}

// ─── Batches ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn batch_with_missing_delete_target_rolls_back() {
  let s = store().await;
  let request = CollectionPath::root("chat_requests").doc("r1");

  let err = s
    .commit(vec![
      WriteOp::Create { path: chats().doc("c1"), data: json!({ "type": "personal" }) },
      WriteOp::Delete { path: request, must_exist: true },
    ])
    .await
    .unwrap_err();

  assert!(matches!(err.core(), Some(chatter_core::Error::NotFound(_))));
  assert!(s.get(&chats().doc("c1")).await.unwrap().is_none());
}

#[tokio::test]
async fn merge_preserves_other_fields() {
  let s = store().await;
  let path = CollectionPath::root("users").doc("u1");
  s.set(&path, json!({ "username": "ann", "is_admin": false }))
    .await
    .unwrap();
  s.commit(vec![WriteOp::Merge {
    path:   path.clone(),
    fields: serde_json::Map::from_iter([("is_admin".to_owned(), json!(true))]),
  }])
  .await
  .unwrap();

  let doc = s.get(&path).await.unwrap().unwrap();
  assert_eq!(doc.data, json!({ "username": "ann", "is_admin": true }));
}

// ─── Live queries ────────────────────────────────────────────────────────────

#[tokio::test]
async fn live_query_sees_own_commits() {
  let s = store().await;
  let requests = CollectionPath::root("chat_requests");
  let mut live = s
    .subscribe(Query::collection(requests.clone()).where_eq("to", "bob"))
    .await
    .unwrap();
  assert!(live.next().await.unwrap().unwrap().is_empty());

  let path = s
    .add(&requests, json!({ "from": "ann", "to": "bob" }))
    .await
    .unwrap();
  let snap = live.next().await.unwrap().unwrap();
  assert_eq!(snap.len(), 1);

  s.delete(&path).await.unwrap();
  let snap = live.next().await.unwrap().unwrap();
  assert!(snap.is_empty());
  assert_eq!(snap.changes[0].kind, ChangeKind::Removed);
}

#[tokio::test]
async fn live_query_sees_commits_from_other_connections() {
  let dir = tempfile::tempdir().unwrap();
  let file = dir.path().join("chatter.db");
  let watcher = SqliteStore::open(&file).await.unwrap();
  let writer = SqliteStore::open(&file).await.unwrap();
  let _feed = watcher.watch_external(Duration::from_millis(10));

  let mut live = watcher.subscribe(Query::collection(chats())).await.unwrap();
  assert!(live.next().await.unwrap().unwrap().is_empty());

  writer.set(&chats().doc("c1"), json!({ "type": "group" })).await.unwrap();

  let snap = tokio::time::timeout(Duration::from_secs(5), live.next())
    .await
    .expect("external commit observed")
    .unwrap()
    .unwrap();
  assert_eq!(snap.docs[0].id(), "c1");
}

#[tokio::test]
async fn documents_survive_reopen() {
  let dir = tempfile::tempdir().unwrap();
  let file = dir.path().join("chatter.db");
  {
    let s = SqliteStore::open(&file).await.unwrap();
    s.set(&chats().doc("keep"), json!({ "name": "kept" })).await.unwrap();
  }
  let s = SqliteStore::open(&file).await.unwrap();
  let doc = s.get(&chats().doc("keep")).await.unwrap().unwrap();
  assert_eq!(doc.data["name"], "kept");
}
