//! The long-lived credential blob and its initializer.

use crate::types::buffer::Bytes;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::{Map, Value};
use x25519_dalek::{PublicKey, StaticSecret};
use xeddsa::{Sign, xed25519};

/// Version byte prepended to Curve25519 public keys before signing.
pub const KEY_BUNDLE_TYPE: u8 = 5;

/// Credentials that can be freshly created when none are stored.
pub trait InitCreds: Serialize + DeserializeOwned + Send + Sync + 'static {
    fn init_creds() -> Self;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyPair {
    pub public: Bytes,
    pub private: Bytes,
}

impl KeyPair {
    pub fn generate() -> Self {
        Self::from_secret(&StaticSecret::random_from_rng(OsRng))
    }

    pub fn from_secret(secret: &StaticSecret) -> Self {
        Self {
            public: Bytes::from(PublicKey::from(secret).to_bytes()),
            private: Bytes::from(secret.to_bytes()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedKeyPair {
    pub key_pair: KeyPair,
    pub signature: Bytes,
    pub key_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_s: Option<u64>,
}

impl SignedKeyPair {
    /// New pre-key signed by `identity` over its prefixed public key.
    pub fn generate(identity: &StaticSecret, key_id: u32) -> Self {
        let key_pair = KeyPair::generate();
        let signer = xed25519::PrivateKey::from(identity);
        let message = prefixed_public(&key_pair.public);
        let signature: [u8; 64] = signer.sign(message.as_slice(), &mut OsRng);
        Self {
            key_pair,
            signature: Bytes::from(signature),
            key_id,
            timestamp_s: None,
        }
    }
}

pub fn prefixed_public(public: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(public.len() + 1);
    out.push(KEY_BUNDLE_TYPE);
    out.extend_from_slice(public);
    out
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSettings {
    pub unarchive_chats: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthCreds {
    pub noise_key: KeyPair,
    pub pairing_ephemeral_key_pair: KeyPair,
    pub signed_identity_key: KeyPair,
    pub signed_pre_key: SignedKeyPair,
    pub registration_id: u16,
    pub adv_secret_key: String,
    #[serde(default)]
    pub processed_history_messages: Vec<Value>,
    pub next_pre_key_id: u32,
    pub first_unuploaded_pre_key_id: u32,
    pub account_sync_counter: u32,
    #[serde(default)]
    pub account_settings: AccountSettings,
    pub registered: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pairing_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_prop_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_info: Option<Bytes>,
    /// Fields added by the client after pairing (`me`, `account`, ...), kept as-is.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl InitCreds for AuthCreds {
    fn init_creds() -> Self {
        let identity = StaticSecret::random_from_rng(OsRng);
        let signed_pre_key = SignedKeyPair::generate(&identity, 1);

        let mut adv_secret = [0u8; 32];
        OsRng.fill_bytes(&mut adv_secret);

        Self {
            noise_key: KeyPair::generate(),
            pairing_ephemeral_key_pair: KeyPair::generate(),
            signed_identity_key: KeyPair::from_secret(&identity),
            signed_pre_key,
            registration_id: generate_registration_id(),
            adv_secret_key: STANDARD.encode(adv_secret),
            processed_history_messages: Vec::new(),
            next_pre_key_id: 1,
            first_unuploaded_pre_key_id: 1,
            account_sync_counter: 0,
            account_settings: AccountSettings::default(),
            registered: false,
            pairing_code: None,
            last_prop_hash: None,
            routing_info: None,
            extra: Map::new(),
        }
    }
}

/// Registration ids are 14-bit.
pub fn generate_registration_id() -> u16 {
    let mut buf = [0u8; 2];
    OsRng.fill_bytes(&mut buf);
    u16::from_be_bytes(buf) & 0x3fff
}

#[cfg(test)]
mod tests {
    use super::*;
    use xeddsa::Verify;

    #[test]
    fn fresh_creds_are_unregistered_and_counters_start_at_one() {
        let creds = AuthCreds::init_creds();
        assert!(!creds.registered);
        assert_eq!(creds.next_pre_key_id, 1);
        assert_eq!(creds.first_unuploaded_pre_key_id, 1);
        assert_eq!(creds.account_sync_counter, 0);
        assert_eq!(creds.signed_pre_key.key_id, 1);
        assert!(creds.registration_id <= 0x3fff);
        assert_eq!(STANDARD.decode(&creds.adv_secret_key).unwrap().len(), 32);
        assert_eq!(creds.noise_key.public.len(), 32);
        assert_eq!(creds.noise_key.private.len(), 32);
    }

    #[test]
    fn signed_pre_key_verifies_against_identity() {
        let creds = AuthCreds::init_creds();
        let identity: [u8; 32] = creds.signed_identity_key.public.as_ref().try_into().unwrap();
        let verifier = xed25519::PublicKey::from(&PublicKey::from(identity));
        let signature: [u8; 64] = creds.signed_pre_key.signature.as_ref().try_into().unwrap();

        let message = prefixed_public(&creds.signed_pre_key.key_pair.public);
        assert!(verifier.verify(message.as_slice(), &signature).is_ok());
    }

    #[test]
    fn signed_pre_key_always_carries_a_full_signature() {
        let identity = StaticSecret::random_from_rng(OsRng);
        let pair = KeyPair::from_secret(&identity);
        assert_eq!(pair.private.as_ref(), identity.to_bytes().as_slice());

        let signed = SignedKeyPair::generate(&identity, 7);
        assert_eq!(signed.key_id, 7);
        assert_eq!(signed.signature.len(), 64);
        assert!(signed.signature.iter().any(|b| *b != 0));

        let public: [u8; 32] = pair.public.as_ref().try_into().unwrap();
        let verifier = xed25519::PublicKey::from(&PublicKey::from(public));
        let signature: [u8; 64] = signed.signature.as_ref().try_into().unwrap();
        let message = prefixed_public(&signed.key_pair.public);
        assert!(verifier.verify(message.as_slice(), &signature).is_ok());
    }

    #[test]
    fn serializes_in_library_shape_and_keeps_unknown_fields() {
        let mut creds = AuthCreds::init_creds();
        creds
            .extra
            .insert("me".to_string(), serde_json::json!({"id": "123@s.whatsapp.net"}));

        let v = serde_json::to_value(&creds).unwrap();
        assert_eq!(v["noiseKey"]["public"]["type"], "Buffer");
        assert_eq!(v["signedPreKey"]["keyId"], 1);
        assert_eq!(v["me"]["id"], "123@s.whatsapp.net");
        assert!(v.get("pairingCode").is_none());

        let back: AuthCreds = serde_json::from_value(v).unwrap();
        assert_eq!(back, creds);
    }
}
