use crate::db::sqlite::AuthKeyStorage;
use crate::error::AuthStoreError;
use crate::service::key_files::KeyFileStore;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

/// Storage key of the credential blob.
pub const CREDS_KEY: &str = "creds";

/// Where the credential blob and the signal keys are persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyRouting {
    /// Everything in the `auth_keys` table.
    #[default]
    Database,
    /// Credential blob on disk, signal keys in the table.
    CredsOnFile,
    /// Credential blob in the table, signal keys on disk.
    KeysOnFile,
}

impl KeyRouting {
    pub fn uses_files(&self) -> bool {
        !matches!(self, KeyRouting::Database)
    }

    fn is_file_backed(&self, key: &str) -> bool {
        match self {
            KeyRouting::Database => false,
            KeyRouting::CredsOnFile => key == CREDS_KEY,
            KeyRouting::KeysOnFile => key != CREDS_KEY,
        }
    }
}

enum Backend<'a> {
    Rows(&'a AuthKeyStorage),
    File(&'a KeyFileStore),
}

/// Dispatches raw JSON reads and writes of one session to its backend.
#[derive(Clone)]
pub struct KeyRouter {
    session_id: String,
    routing: KeyRouting,
    rows: AuthKeyStorage,
    files: Option<KeyFileStore>,
}

impl KeyRouter {
    pub async fn new(
        rows: AuthKeyStorage,
        session_id: impl Into<String>,
        routing: KeyRouting,
        sessions_dir: &Path,
    ) -> Result<Self, AuthStoreError> {
        let session_id = session_id.into();
        let files = if routing.uses_files() {
            Some(KeyFileStore::open(sessions_dir, &session_id).await?)
        } else {
            None
        };
        Ok(Self {
            session_id,
            routing,
            rows,
            files,
        })
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn routing(&self) -> KeyRouting {
        self.routing
    }

    fn backend(&self, key: &str) -> Backend<'_> {
        match &self.files {
            Some(files) if self.routing.is_file_backed(key) => Backend::File(files),
            _ => Backend::Rows(&self.rows),
        }
    }

    pub async fn read(&self, key: &str) -> Result<Option<String>, AuthStoreError> {
        match self.backend(key) {
            Backend::Rows(rows) => rows.fetch(&self.session_id, key).await,
            Backend::File(files) => files.read(key).await,
        }
    }

    pub async fn write(&self, key: &str, json: &str) -> Result<(), AuthStoreError> {
        match self.backend(key) {
            Backend::Rows(rows) => rows.upsert(&self.session_id, key, json).await,
            Backend::File(files) => files.write(key, json).await,
        }
    }

    pub async fn remove(&self, key: &str) -> Result<(), AuthStoreError> {
        match self.backend(key) {
            Backend::Rows(rows) => rows.delete(&self.session_id, key).await.map(|_| ()),
            Backend::File(files) => files.remove(key).await,
        }
    }

    /// Remove the credential blob and every key of the session.
    pub async fn clear(&self) -> Result<(), AuthStoreError> {
        let rows = self.rows.delete_session(&self.session_id).await?;
        if let Some(files) = &self.files {
            files.clear().await?;
        }
        debug!(session_id = %self.session_id, rows, "Session storage cleared");
        Ok(())
    }
}
