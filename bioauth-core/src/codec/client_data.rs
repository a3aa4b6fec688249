//! Client data JSON (`clientDataJSON`).

use serde::{Deserialize, Serialize};

use super::{base64url, CodecError};

/// WebAuthn ceremony type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CeremonyType {
    #[serde(rename = "webauthn.create")]
    Create,
    #[serde(rename = "webauthn.get")]
    Get,
}

/// Client data as hashed into every signature.
///
/// Field order is significant: serialization emits exactly
/// `type, challenge, origin, crossOrigin`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientData {
    #[serde(rename = "type")]
    pub ceremony: CeremonyType,
    /// base64url of the raw challenge bytes
    pub challenge: String,
    pub origin: String,
    pub cross_origin: bool,
}

impl ClientData {
    pub fn new(ceremony: CeremonyType, challenge: &[u8], origin: impl Into<String>) -> Self {
        Self {
            ceremony,
            challenge: base64url::encode(challenge),
            origin: origin.into(),
            cross_origin: false,
        }
    }

    /// UTF-8 JSON bytes, exactly as transmitted and hashed.
    pub fn to_json(&self) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(self).map_err(|e| CodecError::Json(e.to_string()))
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Json(e.to_string()))
    }

    pub fn challenge_bytes(&self) -> Result<Vec<u8>, CodecError> {
        base64url::decode(&self.challenge)
    }
}

/// Encode client data for a ceremony.
pub fn encode_client_data(
    ceremony: CeremonyType,
    challenge: &[u8],
    origin: &str,
) -> Result<Vec<u8>, CodecError> {
    ClientData::new(ceremony, challenge, origin).to_json()
}
