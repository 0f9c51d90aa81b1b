pub mod buffer;
pub mod creds;
pub mod keys;

pub use buffer::Bytes;
pub use creds::{AuthCreds, InitCreds, KeyPair, SignedKeyPair};
pub use keys::{AppStateSyncKeyData, KeyCategory, KeyValue, SignalDataSet, SignalKeyStore};
