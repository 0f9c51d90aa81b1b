use crate::error::AuthStoreError;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;
use tracing::debug;

/// Map a key id to a file stem: `/` becomes `__` and `:` becomes `-`.
///
/// Returns `None` for an empty key.
pub fn fix_file_name(key: &str) -> Option<String> {
    if key.is_empty() {
        return None;
    }
    Some(key.replace('/', "__").replace(':', "-"))
}

static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

/// One JSON file per key under `<root>/<session_id>/`.
#[derive(Debug, Clone)]
pub struct KeyFileStore {
    folder: PathBuf,
}

impl KeyFileStore {
    /// Create the session folder if needed.
    pub async fn open(root: &Path, session_id: &str) -> Result<Self, AuthStoreError> {
        let folder = root.join(session_id);
        fs::create_dir_all(&folder).await?;
        debug!(path = %folder.display(), "Key file folder ready");
        Ok(Self { folder })
    }

    fn path_for(&self, key: &str) -> Option<PathBuf> {
        fix_file_name(key).map(|name| self.folder.join(format!("{name}.json")))
    }

    /// Written to a sibling temp file, then renamed over the target.
    pub async fn write(&self, key: &str, json: &str) -> Result<(), AuthStoreError> {
        let path = self.path_for(key).ok_or_else(|| {
            AuthStoreError::Io(std::io::Error::new(
                ErrorKind::InvalidInput,
                "empty key has no file name",
            ))
        })?;
        let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
        let tmp = path.with_extension(format!("json.{}.{seq}.tmp", std::process::id()));

        if let Err(e) = fs::write(&tmp, json).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    /// Missing files and empty keys read as `None`.
    pub async fn read(&self, key: &str) -> Result<Option<String>, AuthStoreError> {
        let Some(path) = self.path_for(key) else {
            return Ok(None);
        };
        match fs::read_to_string(path).await {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Removing a missing file is a no-op.
    pub async fn remove(&self, key: &str) -> Result<(), AuthStoreError> {
        let Some(path) = self.path_for(key) else {
            return Ok(());
        };
        match fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete the whole session folder.
    pub async fn clear(&self) -> Result<(), AuthStoreError> {
        match fs::remove_dir_all(&self.folder).await {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        fs::create_dir_all(&self.folder).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::buffer::Bytes;
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;

    #[test]
    fn fix_file_name_replaces_separators() {
        assert_eq!(fix_file_name("creds").as_deref(), Some("creds"));
        assert_eq!(
            fix_file_name("session-123:4@s/x").as_deref(),
            Some("session-123-4@s__x")
        );
        assert_eq!(fix_file_name(""), None);
    }

    #[test]
    fn fix_file_name_is_idempotent() {
        for key in ["a/b:c", "pre-key-1", "//::", "plain"] {
            let once = fix_file_name(key).unwrap();
            assert_eq!(fix_file_name(&once).unwrap(), once);
        }
    }

    #[test]
    fn fix_file_name_is_injective_over_library_alphabet() {
        let alphabet = ['a', 'Z', '0', '9', '/', ':'];
        let mut keys = vec![String::new()];
        for _ in 0..4 {
            keys = keys
                .iter()
                .flat_map(|k| alphabet.iter().map(move |c| format!("{k}{c}")))
                .collect();
        }

        let mut seen: HashMap<String, String> = HashMap::new();
        for key in keys {
            let name = fix_file_name(&key).unwrap();
            if let Some(prev) = seen.insert(name.clone(), key.clone()) {
                panic!("{prev} and {key} both map to {name}");
            }
        }
    }

    #[tokio::test]
    async fn write_read_remove() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyFileStore::open(dir.path(), "bot").await.unwrap();

        assert_eq!(store.read("pre-key-1").await.unwrap(), None);
        store.write("pre-key-1", "{}").await.unwrap();
        assert_eq!(store.read("pre-key-1").await.unwrap().as_deref(), Some("{}"));
        assert!(dir.path().join("bot").join("pre-key-1.json").exists());

        store.remove("pre-key-1").await.unwrap();
        store.remove("pre-key-1").await.unwrap();
        assert_eq!(store.read("pre-key-1").await.unwrap(), None);
        assert_eq!(store.read("").await.unwrap(), None);
    }

    #[tokio::test]
    async fn overwrite_replaces_file_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyFileStore::open(dir.path(), "bot").await.unwrap();

        store.write("session-1:2", r#"{"v":1}"#).await.unwrap();
        store.write("session-1:2", r#"{"v":2}"#).await.unwrap();
        assert_eq!(
            store.read("session-1:2").await.unwrap().as_deref(),
            Some(r#"{"v":2}"#)
        );

        let names: Vec<String> = std::fs::read_dir(dir.path().join("bot"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["session-1-2.json".to_string()]);
    }

    #[tokio::test]
    async fn concurrent_writes_to_one_key_end_with_a_whole_value() {
        let dir = tempfile::tempdir().unwrap();
        let store = KeyFileStore::open(dir.path(), "bot").await.unwrap();

        let values: Vec<String> = (0..16).map(|i| format!(r#"{{"n":{i}}}"#)).collect();
        let writes = values.iter().map(|v| store.write("pre-key-1", v));
        for result in futures::future::join_all(writes).await {
            result.unwrap();
        }

        let got = store.read("pre-key-1").await.unwrap().unwrap();
        assert!(values.contains(&got));
        assert_eq!(std::fs::read_dir(dir.path().join("bot")).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn binary_payload_survives_roundtrip() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Record {
            public: Bytes,
            private: Bytes,
        }

        let dir = tempfile::tempdir().unwrap();
        let store = KeyFileStore::open(dir.path(), "bot").await.unwrap();
        let record = Record {
            public: Bytes::new((0u8..=255).collect::<Vec<_>>()),
            private: Bytes::new(vec![0u8; 32]),
        };

        let key = "session-123.0:1";
        store
            .write(key, &serde_json::to_string(&record).unwrap())
            .await
            .unwrap();
        let raw = store.read(key).await.unwrap().unwrap();
        let back: Record = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, record);
    }
}
