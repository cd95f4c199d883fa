//! SQL schema for the Chatter SQLite store.
//!
//! Executed once at connection startup. Future migrations will be gated on
//! `PRAGMA user_version`.

/// Full schema DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

-- One row per document. `created_at` and `seq` are assigned on first insert
-- and never rewritten.
CREATE TABLE IF NOT EXISTS documents (
    collection  TEXT    NOT NULL,   -- e.g. 'chats' or 'chats/{id}/messages'
    doc_id      TEXT    NOT NULL,
    data_json   TEXT    NOT NULL,   -- JSON object body
    created_at  TEXT    NOT NULL,   -- RFC 3339 UTC; store-assigned
    updated_at  TEXT    NOT NULL,
    seq         INTEGER NOT NULL,   -- store-wide insertion counter
    PRIMARY KEY (collection, doc_id)
);

-- Single-row counter backing `documents.seq`.
CREATE TABLE IF NOT EXISTS sequence (
    id       INTEGER PRIMARY KEY CHECK (id = 0),
    next_seq INTEGER NOT NULL
);
INSERT OR IGNORE INTO sequence (id, next_seq) VALUES (0, 0);

CREATE INDEX IF NOT EXISTS documents_seq_idx ON documents(seq);

PRAGMA user_version = 1;
";
