//! Encoding and decoding helpers between document types and the plain-text
//! representations stored in SQLite columns.
//!
//! All timestamps are stored as RFC 3339 strings and bodies as compact JSON.

use chatter_core::document::{CollectionPath, Document};
use chrono::{DateTime, Utc};

use crate::{Error, Result};

// ─── DateTime<Utc> ──────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── Row types ───────────────────────────────────────────────────────────────

/// Column list matching [`RawDocument::from_row`].
pub const DOCUMENT_COLUMNS: &str =
  "collection, doc_id, data_json, created_at, updated_at, seq";

/// Raw values read directly from a `documents` row.
pub struct RawDocument {
  pub collection: String,
  pub doc_id:     String,
  pub data_json:  String,
  pub created_at: String,
  pub updated_at: String,
  pub seq:        i64,
}

impl RawDocument {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      collection: row.get(0)?,
      doc_id:     row.get(1)?,
      data_json:  row.get(2)?,
      created_at: row.get(3)?,
      updated_at: row.get(4)?,
      seq:        row.get(5)?,
    })
  }

  pub fn into_document(self) -> Result<Document> {
    Ok(Document {
      path:       CollectionPath::parse(&self.collection)?.doc(self.doc_id),
      data:       serde_json::from_str(&self.data_json)?,
      created_at: decode_dt(&self.created_at)?,
      updated_at: decode_dt(&self.updated_at)?,
      seq:        u64::try_from(self.seq)
        .map_err(|_| Error::Corrupt(format!("negative sequence {}", self.seq)))?,
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn timestamps_roundtrip_through_rfc3339() {
    let now = Utc::now();
    assert_eq!(decode_dt(&encode_dt(now)).unwrap(), now);
    assert!(matches!(decode_dt("yesterday"), Err(Error::DateParse(_))));
  }
}
