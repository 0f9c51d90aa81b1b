//! Database module: models and schema for the key-row store.
//!
//! Layout:
//! - `models.rs`: Rust structs mirroring DB rows
//! - `schema.rs`: SQL DDL for initializing the database (SQLite)
//! - `sqlite.rs`: connection handle and row operations

pub mod models;
pub mod schema;
pub mod sqlite;

pub use models::{AuthKeyRecord, SessionSummary};
pub use schema::SQLITE_INIT;
pub use sqlite::{AuthKeyStorage, SqlitePool};
