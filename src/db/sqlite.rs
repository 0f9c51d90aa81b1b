use crate::db::models::{AuthKeyRecord, SessionSummary};
use crate::db::schema::{AUTH_KEYS_TABLE, SQLITE_INIT, TABLE_EXISTS};
use crate::error::AuthStoreError;
use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

pub type SqlitePool = Pool<Sqlite>;

/// Owned handle to the key-row store.
///
/// Clones share the pool and the schema guard, so the table is provisioned
/// at most once per handle no matter how many tasks race on first use.
#[derive(Clone)]
pub struct AuthKeyStorage {
    pool: SqlitePool,
    schema: Arc<OnceCell<()>>,
}

impl AuthKeyStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            schema: Arc::new(OnceCell::new()),
        }
    }

    /// Open (creating if missing) the database at `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, AuthStoreError> {
        info!(database_url, max_connections, "Opening auth key database");
        let connect_opts = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(connect_opts)
            .await?;
        debug!("Auth key database connection established");
        Ok(Self::new(pool))
    }

    /// In-memory database on a single pinned connection (for testing).
    pub async fn open_in_memory() -> Result<Self, AuthStoreError> {
        let connect_opts = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(connect_opts)
            .await?;
        Ok(Self::new(pool))
    }

    pub async fn close(&self) {
        self.pool.close().await;
        info!("Auth key database closed");
    }

    /// Provision the table once for this handle.
    ///
    /// A failed attempt leaves the guard empty so the next caller retries.
    pub async fn ensure_schema(&self) -> Result<(), AuthStoreError> {
        self.schema
            .get_or_try_init(|| self.init_schema())
            .await
            .map(|_| ())
    }

    async fn init_schema(&self) -> Result<(), AuthStoreError> {
        debug!(table = AUTH_KEYS_TABLE, "Checking whether table exists");
        if self.table_exists().await? {
            debug!(table = AUTH_KEYS_TABLE, "Table already present");
        } else {
            info!(table = AUTH_KEYS_TABLE, "Creating table");
        }

        // sqlx::query runs one statement at a time
        for stmt in SQLITE_INIT.split(';') {
            let s = stmt.trim();
            if s.is_empty() {
                continue;
            }
            sqlx::query(s).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Catalog query for the backing table.
    pub async fn table_exists(&self) -> Result<bool, AuthStoreError> {
        let (exists,): (i64,) = sqlx::query_as(TABLE_EXISTS)
            .bind(AUTH_KEYS_TABLE)
            .fetch_one(&self.pool)
            .await?;
        Ok(exists != 0)
    }

    /// Insert or replace the value of `(session_id, key_id)` in one statement.
    pub async fn upsert(
        &self,
        session_id: &str,
        key_id: &str,
        key_json: &str,
    ) -> Result<(), AuthStoreError> {
        self.ensure_schema().await?;
        let now = now_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO auth_keys (session_id, key_id, key_json, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(session_id, key_id) DO UPDATE SET
                key_json = excluded.key_json,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(session_id)
        .bind(key_id)
        .bind(key_json)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn fetch(
        &self,
        session_id: &str,
        key_id: &str,
    ) -> Result<Option<String>, AuthStoreError> {
        self.ensure_schema().await?;
        let json = sqlx::query_scalar::<_, String>(
            "SELECT key_json FROM auth_keys WHERE session_id = ? AND key_id = ?",
        )
        .bind(session_id)
        .bind(key_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(json)
    }

    pub async fn fetch_record(
        &self,
        session_id: &str,
        key_id: &str,
    ) -> Result<Option<AuthKeyRecord>, AuthStoreError> {
        self.ensure_schema().await?;
        let row = sqlx::query(
            r#"SELECT id, session_id, key_id, key_json, created_at, updated_at
               FROM auth_keys WHERE session_id = ? AND key_id = ?"#,
        )
        .bind(session_id)
        .bind(key_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Self::row_to_model).transpose()
    }

    /// Remove the key; returns the number of rows removed (0 when absent).
    pub async fn delete(&self, session_id: &str, key_id: &str) -> Result<u64, AuthStoreError> {
        self.ensure_schema().await?;
        let result = sqlx::query("DELETE FROM auth_keys WHERE session_id = ? AND key_id = ?")
            .bind(session_id)
            .bind(key_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn list_key_ids(&self, session_id: &str) -> Result<Vec<String>, AuthStoreError> {
        self.ensure_schema().await?;
        let ids = sqlx::query_scalar::<_, String>(
            "SELECT key_id FROM auth_keys WHERE session_id = ? ORDER BY key_id",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    /// Drop every key of a session.
    pub async fn delete_session(&self, session_id: &str) -> Result<u64, AuthStoreError> {
        self.ensure_schema().await?;
        let result = sqlx::query("DELETE FROM auth_keys WHERE session_id = ?")
            .bind(session_id)
            .execute(&self.pool)
            .await?;
        let deleted = result.rows_affected();
        if deleted > 0 {
            debug!(session_id, deleted, "Deleted session keys");
        }
        Ok(deleted)
    }

    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>, AuthStoreError> {
        self.ensure_schema().await?;
        let rows = sqlx::query_as::<_, SessionSummary>(
            r#"SELECT session_id, COUNT(*) AS key_count
               FROM auth_keys GROUP BY session_id ORDER BY session_id"#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    fn row_to_model(row: SqliteRow) -> Result<AuthKeyRecord, AuthStoreError> {
        let id: i64 = row.try_get("id")?;
        let session_id: String = row.try_get("session_id")?;
        let key_id: String = row.try_get("key_id")?;
        let key_json: String = row.try_get("key_json")?;
        let created_at: String = row.try_get("created_at")?;
        let updated_at: String = row.try_get("updated_at")?;

        Ok(AuthKeyRecord {
            id,
            session_id,
            key_id,
            key_json,
            created_at: parse_timestamp(&created_at)?,
            updated_at: parse_timestamp(&updated_at)?,
        })
    }
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, AuthStoreError> {
    let dt = DateTime::parse_from_rfc3339(s)
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?
        .with_timezone(&Utc);
    Ok(dt)
}
