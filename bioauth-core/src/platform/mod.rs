//! Platform authenticator capabilities.
//!
//! Each host (Android keystore, Apple Secure Enclave, Windows Hello, a browser
//! credential manager) exposes the same small set of primitives: report
//! biometric availability, hold a hardware-backed key under an alias, sign
//! with it after a user-verification prompt and optionally export the public
//! half. Implementations must be thread-safe (`Send + Sync`).
//!
//! ## Implementations
//!
//! - [`SoftwareAuthenticator`]: P-256 keys held in process memory with a
//!   scripted prompt, for tests and hosts without secure hardware
//!
//! Platform failures are reported as [`PlatformError`] carrying the raw
//! platform code or name; [`crate::normalize`] maps them onto the caller
//! taxonomy.

#[cfg(feature = "software-authenticator")]
mod software;

#[cfg(feature = "software-authenticator")]
pub use software::{PromptOutcome, SoftwareAuthenticator};

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Alias prefix for credential keys in platform storage.
pub const KEY_ALIAS_PREFIX: &str = "bioauth.credential.";

/// Opaque handle to a key held by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyRef(String);

impl KeyRef {
    pub fn new(alias: impl Into<String>) -> Self {
        Self(alias.into())
    }

    /// Key alias for a credential identifier.
    pub fn for_credential(credential_id: &str) -> Self {
        Self(format!("{KEY_ALIAS_PREFIX}{credential_id}"))
    }

    pub fn alias(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for KeyRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Biometric and device-credential modalities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BiometryKind {
    Fingerprint,
    FaceAuthentication,
    IrisAuthentication,
    TouchId,
    FaceId,
    Passcode,
    Pattern,
    Pin,
}

impl BiometryKind {
    /// Passcode, pattern and PIN are device credentials, not biometrics.
    pub fn is_device_credential(self) -> bool {
        matches!(self, Self::Passcode | Self::Pattern | Self::Pin)
    }
}

impl std::fmt::Display for BiometryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Fingerprint => "fingerprint",
            Self::FaceAuthentication => "faceAuthentication",
            Self::IrisAuthentication => "irisAuthentication",
            Self::TouchId => "touchId",
            Self::FaceId => "faceId",
            Self::Passcode => "passcode",
            Self::Pattern => "pattern",
            Self::Pin => "pin",
        };
        f.write_str(name)
    }
}

/// Why biometrics cannot be used right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UnavailableReason {
    NoHardware,
    HardwareUnavailable,
    NoEnrolledBiometrics,
    SecurityUpdateRequired,
    NotSupported,
    Unknown,
}

/// Result of an availability probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Availability {
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<UnavailableReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Availability {
    pub fn available() -> Self {
        Self {
            available: true,
            reason: None,
            error_message: None,
        }
    }

    pub fn unavailable(reason: UnavailableReason, message: impl Into<String>) -> Self {
        Self {
            available: false,
            reason: Some(reason),
            error_message: Some(message.into()),
        }
    }
}

/// Text and policy for a user-verification prompt.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PromptRequest {
    pub reason: String,
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub cancel_label: Option<String>,
    pub fallback_label: Option<String>,
    /// Accept passcode/PIN/pattern in place of a biometric.
    pub allow_device_credential: bool,
    pub timeout: Option<Duration>,
}

impl PromptRequest {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            allow_device_credential: true,
            ..Default::default()
        }
    }
}

/// Which platform a failure came from; selects the normalization table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorSource {
    /// `BiometricPrompt` error codes
    AndroidBiometric,
    /// `LAError` codes
    AppleLocalAuthentication,
    /// `DOMException` names
    WebAuthnDom,
    /// `UserConsentVerificationResult` values
    WindowsHello,
    /// The in-process software authenticator
    Software,
    Other,
}

/// A raw platform failure, before normalization.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{platform:?} error (code: {code:?}, name: {name:?}): {message}")]
pub struct PlatformError {
    pub platform: ErrorSource,
    pub code: Option<i64>,
    pub name: Option<String>,
    pub message: String,
}

impl PlatformError {
    pub fn new(platform: ErrorSource, message: impl Into<String>) -> Self {
        Self {
            platform,
            code: None,
            name: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: i64) -> Self {
        self.code = Some(code);
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn android(code: i64, message: impl Into<String>) -> Self {
        Self::new(ErrorSource::AndroidBiometric, message).with_code(code)
    }

    pub fn apple(code: i64, message: impl Into<String>) -> Self {
        Self::new(ErrorSource::AppleLocalAuthentication, message).with_code(code)
    }

    pub fn dom(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(ErrorSource::WebAuthnDom, message).with_name(name)
    }

    pub fn windows(code: i64, message: impl Into<String>) -> Self {
        Self::new(ErrorSource::WindowsHello, message).with_code(code)
    }
}

/// Platform authenticator primitives.
#[async_trait]
pub trait PlatformAuthenticator: Send + Sync {
    /// Probe biometric hardware and enrollment.
    async fn is_biometric_available(&self) -> Result<Availability, PlatformError>;

    /// Modalities the device offers, device credentials included.
    async fn supported_biometry_kinds(&self) -> Result<Vec<BiometryKind>, PlatformError>;

    /// Generate a P-256 key under `alias`, or return the existing one.
    async fn generate_or_get_key(&self, alias: &str) -> Result<KeyRef, PlatformError>;

    /// Whether secure storage still holds the key. Keys can vanish when the
    /// OS invalidates them or when an in-memory keystore restarts.
    async fn key_exists(&self, key: &KeyRef) -> Result<bool, PlatformError>;

    /// Sign `message` with the key, returning a DER-encoded ECDSA signature.
    async fn sign(&self, key: &KeyRef, message: &[u8]) -> Result<Vec<u8>, PlatformError>;

    /// Show the user-verification prompt. Returns the modality the user
    /// verified with.
    async fn prompt_user_verification(
        &self,
        request: &PromptRequest,
    ) -> Result<BiometryKind, PlatformError>;

    /// SEC1 public key bytes, when the platform allows export.
    async fn export_public_key(&self, key: &KeyRef) -> Result<Option<Vec<u8>>, PlatformError>;

    /// Delete the key under `alias`. Deleting a missing key is not an error.
    async fn delete_key(&self, alias: &str) -> Result<(), PlatformError>;
}
