use crate::error::{AuthResult, AuthStoreError};
use crate::types::buffer::Bytes;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;

/// Categories of signal material the client library asks the store for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyCategory {
    PreKey,
    Session,
    SenderKey,
    SenderKeyMemory,
    AppStateSyncKey,
    AppStateSyncVersion,
    LidMapping,
}

impl KeyCategory {
    pub const ALL: [KeyCategory; 7] = [
        KeyCategory::PreKey,
        KeyCategory::Session,
        KeyCategory::SenderKey,
        KeyCategory::SenderKeyMemory,
        KeyCategory::AppStateSyncKey,
        KeyCategory::AppStateSyncVersion,
        KeyCategory::LidMapping,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            KeyCategory::PreKey => "pre-key",
            KeyCategory::Session => "session",
            KeyCategory::SenderKey => "sender-key",
            KeyCategory::SenderKeyMemory => "sender-key-memory",
            KeyCategory::AppStateSyncKey => "app-state-sync-key",
            KeyCategory::AppStateSyncVersion => "app-state-sync-version",
            KeyCategory::LidMapping => "lid-mapping",
        }
    }

    /// Storage key for one id of this category, e.g. `pre-key-1`.
    pub fn key_for(&self, id: &str) -> String {
        format!("{}-{}", self.as_str(), id)
    }

    /// Decode a parsed payload into the value handed back to the library.
    pub fn decode(&self, raw: Value) -> AuthResult<KeyValue> {
        match self {
            KeyCategory::AppStateSyncKey => Ok(KeyValue::AppStateSyncKey(
                serde_json::from_value(raw)?,
            )),
            _ => Ok(KeyValue::Json(raw)),
        }
    }
}

impl fmt::Display for KeyCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyCategory {
    type Err = AuthStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        KeyCategory::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| AuthStoreError::UnknownCategory(s.to_string()))
    }
}

/// A value returned by [`SignalKeyStore::get`].
#[derive(Debug, Clone, PartialEq)]
pub enum KeyValue {
    Json(Value),
    AppStateSyncKey(AppStateSyncKeyData),
}

impl KeyValue {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            KeyValue::Json(v) => Some(v),
            KeyValue::AppStateSyncKey(_) => None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStateSyncKeyFingerprint {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_index: Option<u32>,
    #[serde(default)]
    pub device_indexes: Vec<u32>,
}

/// Typed form of an app-state sync key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStateSyncKeyData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_data: Option<Bytes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<AppStateSyncKeyFingerprint>,
    #[serde(
        default,
        deserialize_with = "deserialize_long",
        skip_serializing_if = "Option::is_none"
    )]
    pub timestamp: Option<i64>,
}

/// 64-bit integers arrive as JSON numbers, decimal strings, or protobuf
/// `Long` objects split into signed 32-bit `low`/`high` halves.
fn deserialize_long<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Long {
        Num(i64),
        Text(String),
        Parts { low: i32, high: i32 },
    }

    match Option::<Long>::deserialize(d)? {
        None => Ok(None),
        Some(Long::Num(n)) => Ok(Some(n)),
        Some(Long::Text(s)) => s.parse().map(Some).map_err(serde::de::Error::custom),
        // `unsigned` is ignored: values above i64::MAX wrap.
        Some(Long::Parts { low, high }) => Ok(Some(((high as i64) << 32) | (low as u32 as i64))),
    }
}

/// Values to write, grouped by category then id. `None` and the falsy JSON
/// values (`null`, `false`, `0`, `""`) remove the key.
pub type SignalDataSet = HashMap<KeyCategory, HashMap<String, Option<Value>>>;

/// Storage contract expected by the messaging client.
pub trait SignalKeyStore: Send + Sync {
    /// Fetch the given ids of one category. Ids with no stored value are
    /// left out of the returned map.
    fn get(
        &self,
        category: KeyCategory,
        ids: &[String],
    ) -> impl Future<Output = AuthResult<HashMap<String, KeyValue>>> + Send;

    /// Write or remove every entry of `data`.
    fn set(&self, data: SignalDataSet) -> impl Future<Output = AuthResult<()>> + Send;
}
