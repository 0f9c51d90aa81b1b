//! SQL DDL for the auth key table.

pub const AUTH_KEYS_TABLE: &str = "auth_keys";

/// SQLite schema with:
/// - `id` INTEGER PRIMARY KEY AUTOINCREMENT
/// - `(session_id, key_id)` UNIQUE, which backs the upsert and point lookups
/// - timestamps stored as RFC3339 text
pub const SQLITE_INIT: &str = r#"
CREATE TABLE IF NOT EXISTS auth_keys (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    key_id TEXT NOT NULL,
    key_json TEXT NOT NULL,
    created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    updated_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now')),
    UNIQUE (session_id, key_id)
);
"#;

/// Catalog lookup used to report whether the table had to be created.
pub const TABLE_EXISTS: &str =
    "SELECT EXISTS (SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?)";
