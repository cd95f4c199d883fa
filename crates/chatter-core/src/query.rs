//! The query language understood by every [`DocumentStore`](crate::store::DocumentStore).
//!
//! Queries are plain values: backends may translate them into native filters
//! but must produce the same result as [`Query::apply`], which is the
//! reference evaluation used by the in-process backends and by live-query
//! re-evaluation.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::{CollectionPath, DocPath, Document};

// ─── Filters ─────────────────────────────────────────────────────────────────

/// A predicate over a single document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Filter {
  /// The document id equals the given id.
  IdEq { id: String },
  /// A top-level field equals `value`.
  Eq { field: String, value: Value },
  /// A top-level array field contains `value`.
  ArrayContains { field: String, value: Value },
  /// A top-level field compares `>=` to `value` (same JSON type only).
  Gte { field: String, value: Value },
  /// A top-level field compares `<=` to `value` (same JSON type only).
  Lte { field: String, value: Value },
}

impl Filter {
  pub fn matches(&self, doc: &Document) -> bool {
    match self {
      Filter::IdEq { id } => doc.id() == id,
      Filter::Eq { field, value } => doc.field(field) == Some(value),
      Filter::ArrayContains { field, value } => doc
        .field(field)
        .and_then(Value::as_array)
        .is_some_and(|items| items.contains(value)),
      Filter::Gte { field, value } => doc
        .field(field)
        .and_then(|v| compare_same_type(v, value))
        .is_some_and(Ordering::is_ge),
      Filter::Lte { field, value } => doc
        .field(field)
        .and_then(|v| compare_same_type(v, value))
        .is_some_and(Ordering::is_le),
    }
  }
}

// ─── Ordering ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
  #[default]
  Ascending,
  Descending,
}

/// Result ordering. Ties are always broken by store insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "by", rename_all = "snake_case")]
pub enum OrderBy {
  /// Store-assigned creation time.
  Created { direction: Direction },
  /// A top-level field; documents missing the field sort first.
  Field { name: String, direction: Direction },
}

impl OrderBy {
  pub fn created() -> Self { OrderBy::Created { direction: Direction::Ascending } }

  pub fn field(name: impl Into<String>) -> Self {
    OrderBy::Field { name: name.into(), direction: Direction::Ascending }
  }

  fn compare(&self, a: &Document, b: &Document) -> Ordering {
    let (primary, direction) = match self {
      OrderBy::Created { direction } => (a.created_at.cmp(&b.created_at), *direction),
      OrderBy::Field { name, direction } => {
        (compare_values(a.field(name), b.field(name)), *direction)
      }
    };
    let ordered = primary.then(a.seq.cmp(&b.seq));
    match direction {
      Direction::Ascending => ordered,
      Direction::Descending => ordered.reverse(),
    }
  }
}

// ─── Query ───────────────────────────────────────────────────────────────────

/// A predicate query over one collection.
///
/// Without an explicit [`OrderBy`] results are ordered by document id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
  pub collection: CollectionPath,
  pub filters:    Vec<Filter>,
  pub order_by:   Option<OrderBy>,
  pub limit:      Option<usize>,
}

impl Query {
  pub fn collection(collection: CollectionPath) -> Self {
    Self { collection, filters: Vec::new(), order_by: None, limit: None }
  }

  /// A query matching exactly one document; used for live document watches.
  pub fn document(path: &DocPath) -> Self {
    Self::collection(path.collection.clone())
      .filter(Filter::IdEq { id: path.id.clone() })
  }

  pub fn filter(mut self, filter: Filter) -> Self {
    self.filters.push(filter);
    self
  }

  pub fn where_eq(self, field: &str, value: impl Into<Value>) -> Self {
    self.filter(Filter::Eq { field: field.to_owned(), value: value.into() })
  }

  pub fn where_contains(self, field: &str, value: impl Into<Value>) -> Self {
    self.filter(Filter::ArrayContains { field: field.to_owned(), value: value.into() })
  }

  /// Restrict a string field to values starting with `prefix`.
  pub fn where_prefix(self, field: &str, prefix: &str) -> Self {
    self
      .filter(Filter::Gte { field: field.to_owned(), value: prefix.into() })
      .filter(Filter::Lte {
        field: field.to_owned(),
        value: format!("{prefix}\u{f8ff}").into(),
      })
  }

  pub fn order_by(mut self, order: OrderBy) -> Self {
    self.order_by = Some(order);
    self
  }

  pub fn limit(mut self, limit: usize) -> Self {
    self.limit = Some(limit);
    self
  }

  pub fn matches(&self, doc: &Document) -> bool {
    doc.path.collection == self.collection && self.filters.iter().all(|f| f.matches(doc))
  }

  /// Filter, order and truncate `docs` according to this query.
  pub fn apply(&self, docs: impl IntoIterator<Item = Document>) -> Vec<Document> {
    let mut out: Vec<Document> = docs.into_iter().filter(|d| self.matches(d)).collect();
    match &self.order_by {
      Some(order) => out.sort_by(|a, b| order.compare(a, b)),
      None => out.sort_by(|a, b| a.path.id.cmp(&b.path.id)),
    }
    if let Some(limit) = self.limit {
      out.truncate(limit);
    }
    out
  }
}

// ─── Value comparison ────────────────────────────────────────────────────────

fn type_rank(v: &Value) -> u8 {
  match v {
    Value::Null => 0,
    Value::Bool(_) => 1,
    Value::Number(_) => 2,
    Value::String(_) => 3,
    Value::Array(_) => 4,
    Value::Object(_) => 5,
  }
}

fn compare_same_type(a: &Value, b: &Value) -> Option<Ordering> {
  match (a, b) {
    (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
    (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
    (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
    _ => None,
  }
}

/// Total order over optional JSON values: missing < null < bool < number <
/// string < array < object.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
  match (a, b) {
    (None, None) => Ordering::Equal,
    (None, Some(_)) => Ordering::Less,
    (Some(_), None) => Ordering::Greater,
    (Some(a), Some(b)) => type_rank(a)
      .cmp(&type_rank(b))
      .then_with(|| compare_same_type(a, b).unwrap_or(Ordering::Equal)),
  }
}

#[cfg(test)]
mod tests {
  use chrono::{TimeZone, Utc};
  use serde_json::json;

  use super::*;

  fn doc(id: &str, seq: u64, secs: i64, data: Value) -> Document {
    let at = Utc.timestamp_opt(secs, 0).unwrap();
    Document {
      path: CollectionPath::root("users").doc(id),
      data,
      created_at: at,
      updated_at: at,
      seq,
    }
  }

  #[test]
  fn array_contains_and_eq_compose() {
    let docs = vec![
      doc("a", 1, 0, json!({ "type": "personal", "members": ["u1", "u2"] })),
      doc("b", 2, 0, json!({ "type": "group", "members": ["u1", "u3"] })),
      doc("c", 3, 0, json!({ "type": "personal", "members": ["u2", "u3"] })),
    ];
    let q = Query::collection(CollectionPath::root("users"))
      .where_eq("type", "personal")
      .where_contains("members", "u1");
    let ids: Vec<_> = q.apply(docs).into_iter().map(|d| d.path.id).collect();
    assert_eq!(ids, ["a"]);
  }

  #[test]
  fn prefix_range_matches_strings_only() {
    let docs = vec![
      doc("1", 1, 0, json!({ "username": "alice" })),
      doc("2", 2, 0, json!({ "username": "alfred" })),
      doc("3", 3, 0, json!({ "username": "bob" })),
      doc("4", 4, 0, json!({ "username": 42 })),
    ];
    let q = Query::collection(CollectionPath::root("users")).where_prefix("username", "al");
    let ids: Vec<_> = q.apply(docs).into_iter().map(|d| d.path.id).collect();
    assert_eq!(ids, ["1", "2"]);
  }

  #[test]
  fn created_order_breaks_ties_by_insertion() {
    let docs = vec![
      doc("z", 3, 10, json!({})),
      doc("y", 2, 10, json!({})),
      doc("x", 1, 20, json!({})),
    ];
    let q = Query::collection(CollectionPath::root("users")).order_by(OrderBy::created());
    let ids: Vec<_> = q.apply(docs).into_iter().map(|d| d.path.id).collect();
    assert_eq!(ids, ["y", "z", "x"]);
  }

  #[test]
  fn limit_applies_after_ordering() {
    let docs = vec![
      doc("a", 1, 0, json!({ "n": 3 })),
      doc("b", 2, 0, json!({ "n": 1 })),
      doc("c", 3, 0, json!({ "n": 2 })),
    ];
    let q = Query::collection(CollectionPath::root("users"))
      .order_by(OrderBy::Field { name: "n".into(), direction: Direction::Descending })
      .limit(2);
    let ids: Vec<_> = q.apply(docs).into_iter().map(|d| d.path.id).collect();
    assert_eq!(ids, ["a", "c"]);
  }

  #[test]
  fn document_query_selects_by_id_within_collection() {
    let path = CollectionPath::root("users").doc("b");
    let q = Query::document(&path);
    assert!(q.matches(&doc("b", 1, 0, json!({}))));
    assert!(!q.matches(&doc("a", 2, 0, json!({}))));
  }
}
