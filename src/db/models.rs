use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One stored key of one session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthKeyRecord {
    pub id: i64,
    pub session_id: String,
    pub key_id: String,
    pub key_json: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-session summary used by the `--list` command.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct SessionSummary {
    pub session_id: String,
    pub key_count: i64,
}
