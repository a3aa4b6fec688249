//! Base64url (RFC 4648 §5) without padding.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use super::CodecError;

/// Minimum challenge size WebAuthn accepts, in bytes. Encoded strings that
/// decode to fewer bytes are treated as plain UTF-8 text.
const MIN_ENCODED_CHALLENGE_LEN: usize = 16;

/// Encode bytes as unpadded base64url (`+`→`-`, `/`→`_`).
pub fn encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode base64url, tolerating missing padding.
///
/// The URL-safe alphabet is translated back to the standard one and the input
/// is right-padded with `=` to a multiple of 4 before standard decoding.
pub fn decode(input: &str) -> Result<Vec<u8>, CodecError> {
    let mut standard: String = input
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            other => other,
        })
        .collect();
    while standard.len() % 4 != 0 {
        standard.push('=');
    }

    STANDARD
        .decode(standard.as_bytes())
        .map_err(|e| CodecError::InvalidBase64(format!("{e}")))
}

/// Byte buffer that serializes as an unpadded base64url string.
#[derive(Clone, Default, PartialEq, Eq, Hash)]
pub struct Base64Url(pub Vec<u8>);

impl Base64Url {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Vec<u8>> for Base64Url {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&[u8]> for Base64Url {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl std::str::FromStr for Base64Url {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode(s).map(Self)
    }
}

impl std::fmt::Display for Base64Url {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&encode(&self.0))
    }
}

impl std::fmt::Debug for Base64Url {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Base64Url({})", encode(&self.0))
    }
}

impl Serialize for Base64Url {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&encode(&self.0))
    }
}

impl<'de> Deserialize<'de> for Base64Url {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        decode(&text).map(Self).map_err(serde::de::Error::custom)
    }
}

/// A challenge as supplied by the caller.
///
/// Text challenges are auto-detected: base64url first, then standard base64,
/// and finally the raw UTF-8 bytes of the string.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ChallengeInput {
    Bytes(Vec<u8>),
    Text(String),
}

impl ChallengeInput {
    /// Resolve to the challenge bytes embedded in client data.
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Self::Bytes(bytes) => bytes.clone(),
            Self::Text(text) => detect_challenge(text),
        }
    }
}

impl From<Vec<u8>> for ChallengeInput {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<&str> for ChallengeInput {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for ChallengeInput {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl std::fmt::Debug for ChallengeInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bytes(bytes) => write!(f, "ChallengeInput::Bytes({} bytes)", bytes.len()),
            Self::Text(text) => write!(f, "ChallengeInput::Text({} chars)", text.len()),
        }
    }
}

fn detect_challenge(text: &str) -> Vec<u8> {
    let url_safe = !text.is_empty()
        && text
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if url_safe {
        if let Ok(bytes) = URL_SAFE_NO_PAD.decode(text) {
            if bytes.len() >= MIN_ENCODED_CHALLENGE_LEN {
                return bytes;
            }
        }
    }

    let standard = !text.is_empty()
        && text
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'=');
    if standard {
        if let Ok(bytes) = STANDARD.decode(text) {
            if bytes.len() >= MIN_ENCODED_CHALLENGE_LEN {
                return bytes;
            }
        }
    }

    text.as_bytes().to_vec()
}
