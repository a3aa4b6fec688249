//! Caller-facing response types.
//!
//! Binary fields serialize as unpadded base64url. Shapes follow the JSON form
//! of a WebAuthn `PublicKeyCredential`.

use serde::{Deserialize, Serialize};

use crate::codec::Base64Url;
use crate::error::AuthError;
use crate::platform::BiometryKind;
use crate::session::Session;

pub const PUBLIC_KEY_CREDENTIAL_TYPE: &str = "public-key";
pub const PLATFORM_ATTACHMENT: &str = "platform";
pub const INTERNAL_TRANSPORT: &str = "internal";

/// `response` member of a registration credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationResponse {
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: Base64Url,
    pub attestation_object: Base64Url,
    pub authenticator_data: Base64Url,
    pub transports: Vec<String>,
    /// SEC1 public key, when the platform exported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<Base64Url>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key_algorithm: Option<i64>,
}

/// A newly created credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationResponse {
    pub id: String,
    pub raw_id: Base64Url,
    #[serde(rename = "type")]
    pub credential_type: String,
    pub response: AttestationResponse,
    pub authenticator_attachment: String,
    pub client_extension_results: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_fingerprint: Option<String>,
}

impl RegistrationResponse {
    pub fn new(raw_id: Vec<u8>, response: AttestationResponse) -> Self {
        let raw_id = Base64Url(raw_id);
        Self {
            id: raw_id.to_string(),
            raw_id,
            credential_type: PUBLIC_KEY_CREDENTIAL_TYPE.to_string(),
            response,
            authenticator_attachment: PLATFORM_ATTACHMENT.to_string(),
            client_extension_results: serde_json::Map::new(),
            device_fingerprint: None,
        }
    }
}

/// `response` member of an assertion credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionResponseData {
    #[serde(rename = "clientDataJSON")]
    pub client_data_json: Base64Url,
    pub authenticator_data: Base64Url,
    pub signature: Base64Url,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_handle: Option<Base64Url>,
}

/// A signed assertion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssertionResponse {
    pub id: String,
    pub raw_id: Base64Url,
    #[serde(rename = "type")]
    pub credential_type: String,
    pub response: AssertionResponseData,
    pub authenticator_attachment: String,
    pub client_extension_results: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_fingerprint: Option<String>,
}

impl AssertionResponse {
    pub fn new(raw_id: Vec<u8>, response: AssertionResponseData) -> Self {
        let raw_id = Base64Url(raw_id);
        Self {
            id: raw_id.to_string(),
            raw_id,
            credential_type: PUBLIC_KEY_CREDENTIAL_TYPE.to_string(),
            response,
            authenticator_attachment: PLATFORM_ATTACHMENT.to_string(),
            client_extension_results: serde_json::Map::new(),
            device_fingerprint: None,
        }
    }
}

/// Either credential shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CredentialResponse {
    Registration(RegistrationResponse),
    Assertion(AssertionResponse),
}

impl CredentialResponse {
    pub fn id(&self) -> &str {
        match self {
            Self::Registration(r) => &r.id,
            Self::Assertion(a) => &a.id,
        }
    }

    pub fn is_registration(&self) -> bool {
        matches!(self, Self::Registration(_))
    }
}

/// A successful `authenticate` or `register` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSuccess {
    pub session: Session,
    pub credential: CredentialResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub biometry: Option<BiometryKind>,
}

/// Wire envelope: `{success, session?, credential?, error?}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<Session>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential: Option<CredentialResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub biometry: Option<BiometryKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<AuthError>,
}

impl From<Result<AuthSuccess, AuthError>> for AuthResult {
    fn from(result: Result<AuthSuccess, AuthError>) -> Self {
        match result {
            Ok(success) => Self {
                success: true,
                session: Some(success.session),
                credential: Some(success.credential),
                biometry: success.biometry,
                error: None,
            },
            Err(error) => Self {
                success: false,
                session: None,
                credential: None,
                biometry: None,
                error: Some(error),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorCode;

    #[test]
    fn test_registration_envelope() {
        let response = RegistrationResponse::new(
            vec![0xfb, 0xff],
            AttestationResponse {
                client_data_json: Base64Url(b"{}".to_vec()),
                attestation_object: Base64Url(vec![1]),
                authenticator_data: Base64Url(vec![2]),
                transports: vec![INTERNAL_TRANSPORT.to_string()],
                public_key: None,
                public_key_algorithm: None,
            },
        );
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["id"], "-_8");
        assert_eq!(json["rawId"], "-_8");
        assert_eq!(json["type"], "public-key");
        assert_eq!(json["authenticatorAttachment"], "platform");
        assert_eq!(json["clientExtensionResults"], serde_json::json!({}));
        assert_eq!(json["response"]["clientDataJSON"], "e30");
        assert_eq!(json["response"]["transports"], serde_json::json!(["internal"]));
        assert!(json["response"].get("publicKey").is_none());
    }

    #[test]
    fn test_failure_envelope() {
        let result = AuthResult::from(Err(AuthError::locked_out(30)));
        let json = serde_json::to_value(&result).unwrap();

        assert_eq!(json["success"], false);
        assert_eq!(json["error"]["code"], "LOCKED_OUT");
        assert!(json.get("session").is_none());
        assert_eq!(result.error.map(|e| e.code), Some(ErrorCode::LockedOut));
    }
}
