//! Binary and JSON encodings for WebAuthn-shaped artifacts.
//!
//! Every binary-to-text boundary in this crate goes through [`base64url`]
//! (RFC 4648 §5, unpadded). Remote verifiers parse these artifacts
//! bit-for-bit, so encoders here return [`CodecError`] instead of coercing
//! malformed input.
//!
//! - [`authenticator_data`]: rpIdHash ‖ flags ‖ signCount ‖ attested credential data
//! - [`client_data`]: `{type, challenge, origin, crossOrigin}` JSON
//! - [`attestation`]: `{fmt, attStmt, authData}` as JSON or CBOR
//! - [`cose`]: COSE_Key encoding of P-256 public keys

pub mod attestation;
pub mod authenticator_data;
pub mod base64url;
pub mod client_data;
pub mod cose;

pub use attestation::{
    encode_attestation_object, AttestationEncoding, AttestationObject, AttestationStatement,
};
pub use authenticator_data::{
    encode_authenticator_data, AttestedCredentialData, AuthenticatorData, AuthenticatorFlags,
    AUTHENTICATOR_DATA_MIN_LEN,
};
pub use base64url::{Base64Url, ChallengeInput};
pub use client_data::{encode_client_data, CeremonyType, ClientData};

use sha2::{Digest, Sha256};
use thiserror::Error;

/// Structural encoding failures. These indicate programming errors or
/// corrupted input, never user-facing authentication outcomes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Invalid base64url: {0}")]
    InvalidBase64(String),

    #[error("Invalid length for {field}: expected {expected}, got {actual}")]
    InvalidLength {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("Truncated {0}")]
    Truncated(&'static str),

    #[error("Credential ID too long: {0} bytes")]
    CredentialIdTooLong(usize),

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("CBOR error: {0}")]
    Cbor(String),

    #[error("JSON error: {0}")]
    Json(String),
}

/// SHA-256 digest as a fixed-size array.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let digest = Sha256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// The message an assertion signs: `authenticatorData ‖ SHA-256(clientDataJSON)`.
pub fn signed_message(authenticator_data: &[u8], client_data_json: &[u8]) -> Vec<u8> {
    let client_data_hash = sha256(client_data_json);
    let mut message = Vec::with_capacity(authenticator_data.len() + client_data_hash.len());
    message.extend_from_slice(authenticator_data);
    message.extend_from_slice(&client_data_hash);
    message
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            hex::encode(sha256(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_signed_message_layout() {
        let auth_data = [7u8; 37];
        let client_data = br#"{"type":"webauthn.get"}"#;
        let message = signed_message(&auth_data, client_data);

        assert_eq!(message.len(), 37 + 32);
        assert_eq!(&message[..37], &auth_data);
        assert_eq!(&message[37..], &sha256(client_data));
    }
}
