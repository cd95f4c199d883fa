//! Joining records from one live query with point lookups of the records
//! they reference, such as the sender of each message.
//!
//! Lookups run concurrently and each distinct key is read once per batch. A
//! lookup that fails or finds nothing leaves its slot empty; it never fails
//! the batch.

use std::{
  collections::{HashMap, HashSet},
  fmt,
  future::Future,
  hash::Hash,
};

use futures::future::join_all;

/// A primary record together with the records it references.
#[derive(Debug, Clone, PartialEq)]
pub struct Enriched<P, K, F> {
  pub record:   P,
  /// One entry per reference, in the order the references were listed.
  pub resolved: Vec<(K, Option<F>)>,
}

impl<P, K: PartialEq, F> Enriched<P, K, F> {
  pub fn get(&self, key: &K) -> Option<&F> {
    self
      .resolved
      .iter()
      .find(|(k, _)| k == key)
      .and_then(|(_, v)| v.as_ref())
  }

  /// The first resolved reference, for records with a single reference.
  pub fn first(&self) -> Option<&F> { self.resolved.first().and_then(|(_, v)| v.as_ref()) }
}

/// Enrich every record in `records` with the lookups of its references.
///
/// `refs` lists the keys a record points at. `fetch` resolves one key.
/// Results keep the order of `records`, and the whole batch is returned at
/// once so callers can publish it as a single snapshot.
pub async fn join<P, K, F, E, R, L, Fut>(records: Vec<P>, refs: R, fetch: L) -> Vec<Enriched<P, K, F>>
where
  K: Clone + Eq + Hash + fmt::Debug,
  F: Clone,
  E: fmt::Display,
  R: Fn(&P) -> Vec<K>,
  L: Fn(K) -> Fut,
  Fut: Future<Output = Result<Option<F>, E>>,
{
  let keys: Vec<Vec<K>> = records.iter().map(&refs).collect();

  let mut seen = HashSet::new();
  let distinct: Vec<K> = keys
    .iter()
    .flatten()
    .filter(|k| seen.insert((*k).clone()))
    .cloned()
    .collect();

  let results = join_all(distinct.iter().cloned().map(&fetch)).await;
  let lookups: HashMap<K, Option<F>> = distinct
    .into_iter()
    .zip(results)
    .map(|(key, result)| {
      let value = result.unwrap_or_else(|e| {
        tracing::warn!(?key, error = %e, "reference lookup failed");
        None
      });
      (key, value)
    })
    .collect();

  records
    .into_iter()
    .zip(keys)
    .map(|(record, keys)| Enriched {
      record,
      resolved: keys
        .into_iter()
        .map(|key| {
          let value = lookups.get(&key).cloned().flatten();
          (key, value)
        })
        .collect(),
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
  };

  use super::*;

  #[tokio::test]
  async fn each_distinct_key_is_fetched_once() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let joined = join(
      vec![("m1", "ann"), ("m2", "bob"), ("m3", "ann")],
      |(_, sender)| vec![sender.to_string()],
      move |key: String| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move { Ok::<_, String>(Some(key.to_uppercase())) }
      },
    )
    .await;

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    let names: Vec<_> = joined.iter().map(|e| e.first().cloned()).collect();
    let expected = ["ANN", "BOB", "ANN"].map(|n| Some(n.to_owned()));
    assert_eq!(names, expected);
  }

  #[tokio::test]
  async fn failed_lookup_leaves_gap_without_failing_batch() {
    let joined = join(
      vec!["ok", "broken", "missing"],
      |id| vec![*id],
      |key| async move {
        match key {
          "ok" => Ok(Some(1)),
          "missing" => Ok(None),
          _ => Err("read failed"),
        }
      },
    )
    .await;

    assert_eq!(joined.len(), 3);
    assert_eq!(joined[0].get(&"ok"), Some(&1));
    assert_eq!(joined[1].first(), None);
    assert_eq!(joined[2].first(), None);
  }

  #[tokio::test]
  async fn records_without_references_pass_through() {
    let joined = join(
      vec![1, 2],
      |_| Vec::<u8>::new(),
      |_| async { Ok::<Option<()>, String>(None) },
    )
    .await;
    assert_eq!(joined.iter().map(|e| e.record).collect::<Vec<_>>(), [1, 2]);
    assert!(joined.iter().all(|e| e.resolved.is_empty()));
  }
}
