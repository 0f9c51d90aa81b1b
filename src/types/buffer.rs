//! Binary payloads in the library's JSON dialect.
//!
//! Buffers are written as `{"type":"Buffer","data":"<base64>"}`. On read the
//! `data` field may also be a plain byte array, and a bare base64 string or
//! bare byte array is accepted in place of the tagged object.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};
use std::fmt;
use std::ops::Deref;

pub const BUFFER_TAG: &str = "Buffer";

#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Bytes(pub Vec<u8>);

impl Bytes {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }
}

// Key material ends up in logs otherwise.
impl fmt::Debug for Bytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bytes(len={})", self.0.len())
    }
}

impl Deref for Bytes {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl AsRef<[u8]> for Bytes {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl From<Vec<u8>> for Bytes {
    fn from(v: Vec<u8>) -> Self {
        Self(v)
    }
}

impl<const N: usize> From<[u8; N]> for Bytes {
    fn from(v: [u8; N]) -> Self {
        Self(v.to_vec())
    }
}

impl From<&[u8]> for Bytes {
    fn from(v: &[u8]) -> Self {
        Self(v.to_vec())
    }
}

impl Serialize for Bytes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut st = serializer.serialize_struct("Buffer", 2)?;
        st.serialize_field("type", BUFFER_TAG)?;
        st.serialize_field("data", &self.to_base64())?;
        st.end()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BufferData {
    Base64(String),
    Raw(Vec<u8>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum BufferRepr {
    Tagged {
        #[serde(rename = "type")]
        kind: String,
        data: BufferData,
    },
    Bare(BufferData),
}

impl BufferData {
    fn into_bytes<E: de::Error>(self) -> Result<Vec<u8>, E> {
        match self {
            BufferData::Base64(s) => STANDARD
                .decode(s.as_bytes())
                .map_err(|e| E::custom(format!("invalid base64 buffer: {e}"))),
            BufferData::Raw(v) => Ok(v),
        }
    }
}

impl<'de> Deserialize<'de> for Bytes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match BufferRepr::deserialize(deserializer)? {
            BufferRepr::Tagged { kind, data } => {
                if kind != BUFFER_TAG {
                    return Err(de::Error::custom(format!(
                        "expected tagged {BUFFER_TAG}, got {kind}"
                    )));
                }
                data.into_bytes().map(Bytes)
            }
            BufferRepr::Bare(data) => data.into_bytes().map(Bytes),
        }
    }
}
