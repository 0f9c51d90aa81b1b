pub mod config;
pub mod db;
pub mod error;
pub mod service;
pub mod types;

pub use db::AuthKeyStorage;
pub use error::{AuthResult, AuthStoreError};
pub use service::{AuthState, AuthStateOptions, ErrorPolicy, KeyRouting};
pub use types::{AuthCreds, InitCreds, KeyCategory, KeyValue, SignalDataSet, SignalKeyStore};
