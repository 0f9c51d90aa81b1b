use crate::config::Config;
use crate::db::sqlite::AuthKeyStorage;
use crate::error::{AuthResult, AuthStoreError};
use crate::service::key_router::{CREDS_KEY, KeyRouter, KeyRouting};
use crate::types::creds::InitCreds;
use crate::types::keys::{KeyCategory, KeyValue, SignalDataSet, SignalKeyStore};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// How read and delete failures are reported to the client library.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorPolicy {
    /// Storage and parse errors are returned to the caller.
    #[default]
    Propagate,
    /// Failed reads count as "no value" and failed deletes are ignored.
    /// Write errors are still returned.
    Absent,
}

#[derive(Debug, Clone)]
pub struct AuthStateOptions {
    pub session_id: String,
    pub routing: KeyRouting,
    pub sessions_dir: PathBuf,
    pub error_policy: ErrorPolicy,
}

impl AuthStateOptions {
    pub fn new(session_id: impl Into<String>) -> Self {
        let defaults = Config::default();
        Self {
            session_id: session_id.into(),
            routing: defaults.routing,
            sessions_dir: defaults.sessions_dir,
            error_policy: defaults.error_policy,
        }
    }

    pub fn from_config(cfg: &Config) -> Self {
        Self {
            session_id: cfg.session_id.clone(),
            routing: cfg.routing,
            sessions_dir: cfg.sessions_dir.clone(),
            error_policy: cfg.error_policy,
        }
    }

    pub fn routing(mut self, routing: KeyRouting) -> Self {
        self.routing = routing;
        self
    }

    pub fn sessions_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.sessions_dir = dir.into();
        self
    }

    pub fn error_policy(mut self, policy: ErrorPolicy) -> Self {
        self.error_policy = policy;
        self
    }
}

/// Credential blob plus signal key store for one session.
pub struct AuthState<C> {
    router: KeyRouter,
    creds: Arc<RwLock<C>>,
    policy: ErrorPolicy,
    fresh: bool,
}

impl<C> Clone for AuthState<C> {
    fn clone(&self) -> Self {
        Self {
            router: self.router.clone(),
            creds: self.creds.clone(),
            policy: self.policy,
            fresh: self.fresh,
        }
    }
}

impl<C: InitCreds> AuthState<C> {
    /// Load the stored credentials of the session, creating and persisting
    /// new ones when none exist.
    pub async fn load(storage: AuthKeyStorage, options: AuthStateOptions) -> AuthResult<Self> {
        let AuthStateOptions {
            session_id,
            routing,
            sessions_dir,
            error_policy: policy,
        } = options;
        let router = KeyRouter::new(storage, session_id, routing, &sessions_dir).await?;

        let stored = read_json(&router, policy, CREDS_KEY).await?;
        let stored: Option<C> = match stored {
            Some(v) => absorb(
                policy,
                CREDS_KEY,
                serde_json::from_value(v).map(Some).map_err(AuthStoreError::from),
            )?,
            None => None,
        };

        let (creds, fresh) = match stored {
            Some(creds) => {
                info!(session_id = router.session_id(), ?routing, "Resumed stored credentials");
                (creds, false)
            }
            None => {
                let creds = C::init_creds();
                router
                    .write(CREDS_KEY, &serde_json::to_string(&creds)?)
                    .await?;
                info!(session_id = router.session_id(), ?routing, "Initialized new credentials");
                (creds, true)
            }
        };

        Ok(Self {
            router,
            creds: Arc::new(RwLock::new(creds)),
            policy,
            fresh,
        })
    }

    /// Shared credential handle; mutate it, then call [`Self::save_creds`].
    pub fn creds(&self) -> Arc<RwLock<C>> {
        self.creds.clone()
    }

    /// True when the credentials were created by [`Self::load`].
    pub fn is_fresh(&self) -> bool {
        self.fresh
    }

    pub fn session_id(&self) -> &str {
        self.router.session_id()
    }

    pub fn routing(&self) -> KeyRouting {
        self.router.routing()
    }

    /// Persist the current in-memory credentials.
    pub async fn save_creds(&self) -> AuthResult<()> {
        let json = {
            let creds = self.creds.read().await;
            serde_json::to_string(&*creds)?
        };
        self.router.write(CREDS_KEY, &json).await?;
        debug!(session_id = self.session_id(), "Credentials saved");
        Ok(())
    }

    /// Remove the credentials and every key of the session.
    pub async fn clear(&self) -> AuthResult<()> {
        self.router.clear().await?;
        info!(session_id = self.session_id(), "Session cleared");
        Ok(())
    }

    pub async fn get_keys(
        &self,
        category: KeyCategory,
        ids: &[String],
    ) -> AuthResult<HashMap<String, KeyValue>> {
        let reads: Vec<_> = ids
            .iter()
            .map(|id| async move {
                let key = category.key_for(id);
                let value = match read_json(&self.router, self.policy, &key).await? {
                    Some(raw) => absorb(self.policy, &key, category.decode(raw).map(Some))?,
                    None => None,
                };
                Ok::<_, AuthStoreError>((id, value))
            })
            .collect();

        let mut found = HashMap::with_capacity(ids.len());
        for result in join_all(reads).await {
            if let (id, Some(value)) = result? {
                found.insert(id.clone(), value);
            }
        }
        Ok(found)
    }

    /// Apply every write and delete concurrently; the first error is
    /// returned once all of them have finished.
    pub async fn set_keys(&self, data: SignalDataSet) -> AuthResult<()> {
        let mut tasks = Vec::new();
        for (category, entries) in data {
            for (id, value) in entries {
                let key = category.key_for(&id);
                tasks.push(async move {
                    match value.filter(|v| !is_cleared(v)) {
                        Some(v) => self.write_value(&key, &v).await,
                        None => self.remove_value(&key).await,
                    }
                });
            }
        }

        let count = tasks.len();
        let results = join_all(tasks).await;
        debug!(session_id = self.session_id(), count, "Applied key updates");
        results.into_iter().collect()
    }

    async fn write_value(&self, key: &str, value: &Value) -> AuthResult<()> {
        let json = serde_json::to_string(value)?;
        self.router.write(key, &json).await
    }

    async fn remove_value(&self, key: &str) -> AuthResult<()> {
        match (self.router.remove(key).await, self.policy) {
            (Err(e), ErrorPolicy::Absent) => {
                warn!(key, error = %e, "Ignoring failed delete");
                Ok(())
            }
            (r, _) => r,
        }
    }
}

impl<C: InitCreds> SignalKeyStore for AuthState<C> {
    async fn get(
        &self,
        category: KeyCategory,
        ids: &[String],
    ) -> AuthResult<HashMap<String, KeyValue>> {
        self.get_keys(category, ids).await
    }

    async fn set(&self, data: SignalDataSet) -> AuthResult<()> {
        self.set_keys(data).await
    }
}

fn is_cleared(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

async fn read_json(
    router: &KeyRouter,
    policy: ErrorPolicy,
    key: &str,
) -> AuthResult<Option<Value>> {
    let parsed = match router.read(key).await {
        Ok(Some(raw)) => serde_json::from_str(&raw)
            .map(Some)
            .map_err(AuthStoreError::from),
        Ok(None) => Ok(None),
        Err(e) => Err(e),
    };
    absorb(policy, key, parsed)
}

fn absorb<T>(policy: ErrorPolicy, key: &str, result: AuthResult<Option<T>>) -> AuthResult<Option<T>> {
    match (result, policy) {
        (Err(e), ErrorPolicy::Absent) => {
            warn!(key, error = %e, "Treating failed read as absent");
            Ok(None)
        }
        (r, _) => r,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestCreds {
        registration_id: u32,
        registered: bool,
    }

    impl InitCreds for TestCreds {
        fn init_creds() -> Self {
            Self {
                registration_id: 42,
                registered: false,
            }
        }
    }

    async fn load(
        storage: &AuthKeyStorage,
        dir: &std::path::Path,
        routing: KeyRouting,
    ) -> AuthState<TestCreds> {
        let opts = AuthStateOptions::new("bot")
            .routing(routing)
            .sessions_dir(dir);
        AuthState::load(storage.clone(), opts).await.unwrap()
    }

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn fresh_creds_are_persisted_immediately() {
        let storage = AuthKeyStorage::open_in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();

        let state = load(&storage, dir.path(), KeyRouting::Database).await;
        assert!(state.is_fresh());
        assert!(storage.fetch("bot", CREDS_KEY).await.unwrap().is_some());

        let again = load(&storage, dir.path(), KeyRouting::Database).await;
        assert!(!again.is_fresh());
    }

    #[tokio::test]
    async fn saved_creds_are_resumed() {
        let storage = AuthKeyStorage::open_in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();

        let state = load(&storage, dir.path(), KeyRouting::CredsOnFile).await;
        state.creds().write().await.registered = true;
        state.save_creds().await.unwrap();

        let again = load(&storage, dir.path(), KeyRouting::CredsOnFile).await;
        assert!(again.creds().read().await.registered);
    }

    #[tokio::test]
    async fn set_upserts_present_and_deletes_cleared() {
        let storage = AuthKeyStorage::open_in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let state = load(&storage, dir.path(), KeyRouting::Database).await;

        for id in 2..=6 {
            storage
                .upsert("bot", &format!("pre-key-{id}"), "{}")
                .await
                .unwrap();
        }

        let mut data = SignalDataSet::new();
        data.insert(
            KeyCategory::PreKey,
            HashMap::from([
                ("1".to_string(), Some(json!({"public": "AQ=="}))),
                ("2".to_string(), None),
                ("3".to_string(), Some(Value::Null)),
                ("4".to_string(), Some(json!(""))),
                ("5".to_string(), Some(json!(false))),
                ("6".to_string(), Some(json!(0))),
                ("7".to_string(), Some(json!(true))),
                ("8".to_string(), Some(json!([]))),
            ]),
        );
        state.set(data).await.unwrap();

        assert!(storage.fetch("bot", "pre-key-1").await.unwrap().is_some());
        for id in 2..=6 {
            let key = format!("pre-key-{id}");
            assert_eq!(storage.fetch("bot", &key).await.unwrap(), None, "{key}");
        }
        assert_eq!(
            storage.fetch("bot", "pre-key-7").await.unwrap().as_deref(),
            Some("true")
        );
        assert_eq!(
            storage.fetch("bot", "pre-key-8").await.unwrap().as_deref(),
            Some("[]")
        );
    }

    #[tokio::test]
    async fn failed_delete_depends_on_policy() {
        let storage = AuthKeyStorage::open_in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        // A directory where the key file should be makes remove_file fail.
        std::fs::create_dir_all(dir.path().join("bot").join("pre-key-1.json")).unwrap();

        let delete = || {
            let mut data = SignalDataSet::new();
            data.insert(
                KeyCategory::PreKey,
                HashMap::from([("1".to_string(), None)]),
            );
            data
        };

        let opts = AuthStateOptions::new("bot")
            .routing(KeyRouting::KeysOnFile)
            .sessions_dir(dir.path());

        let strict = AuthState::<TestCreds>::load(storage.clone(), opts.clone())
            .await
            .unwrap();
        let err = strict.set(delete()).await.unwrap_err();
        assert!(matches!(err, AuthStoreError::Io(_)));

        let lenient =
            AuthState::<TestCreds>::load(storage.clone(), opts.error_policy(ErrorPolicy::Absent))
                .await
                .unwrap();
        lenient.set(delete()).await.unwrap();
        assert!(dir.path().join("bot").join("pre-key-1.json").is_dir());
    }

    #[tokio::test]
    async fn get_omits_missing_ids() {
        let storage = AuthKeyStorage::open_in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        let state = load(&storage, dir.path(), KeyRouting::KeysOnFile).await;

        let mut data = SignalDataSet::new();
        data.insert(
            KeyCategory::Session,
            HashMap::from([("a:1".to_string(), Some(json!({"n": 1})))]),
        );
        state.set(data).await.unwrap();

        let got = state
            .get(KeyCategory::Session, &ids(&["a:1", "b:2"]))
            .await
            .unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got["a:1"], KeyValue::Json(json!({"n": 1})));
        assert!(!got.contains_key("b:2"));
    }

    #[tokio::test]
    async fn corrupt_value_depends_on_policy() {
        let storage = AuthKeyStorage::open_in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        storage.upsert("bot", "session-x", "not json").await.unwrap();

        let strict = load(&storage, dir.path(), KeyRouting::Database).await;
        let err = strict
            .get(KeyCategory::Session, &ids(&["x"]))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthStoreError::Json(_)));

        let opts = AuthStateOptions::new("bot")
            .sessions_dir(dir.path())
            .error_policy(ErrorPolicy::Absent);
        let lenient: AuthState<TestCreds> = AuthState::load(storage.clone(), opts).await.unwrap();
        let got = lenient
            .get(KeyCategory::Session, &ids(&["x"]))
            .await
            .unwrap();
        assert!(got.is_empty());
    }

    #[tokio::test]
    async fn corrupt_creds_are_reinitialized_only_when_absent_policy() {
        let storage = AuthKeyStorage::open_in_memory().await.unwrap();
        let dir = tempfile::tempdir().unwrap();
        storage.upsert("bot", CREDS_KEY, "{").await.unwrap();

        let opts = AuthStateOptions::new("bot").sessions_dir(dir.path());
        let strict = AuthState::<TestCreds>::load(storage.clone(), opts.clone()).await;
        assert!(strict.is_err());

        let lenient = AuthState::<TestCreds>::load(storage.clone(), opts.error_policy(ErrorPolicy::Absent))
            .await
            .unwrap();
        assert!(lenient.is_fresh());
    }
}
