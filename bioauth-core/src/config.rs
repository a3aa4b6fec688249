//! Authenticator configuration
//!
//! Loaded from environment variables or JSON, with defaults matching the
//! behaviour expected by relying parties.

use serde::{Deserialize, Serialize};

use crate::codec::AttestationEncoding;

/// Default session lifetime (1 hour)
pub const DEFAULT_SESSION_DURATION_SECS: u64 = 3600;
/// Default failed attempts before lockout
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default lockout window
pub const DEFAULT_LOCKOUT_DURATION_SECS: u64 = 30;

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    MustBePositive { field: &'static str },
    #[error("Invalid configuration JSON: {0}")]
    InvalidJson(String),
    #[error("Invalid origin: {0}")]
    InvalidOrigin(String),
}

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthConfig {
    /// Session lifetime in seconds (default: 3600)
    #[serde(alias = "sessionDuration")]
    pub session_duration_secs: u64,
    /// Failed attempts before lockout (default: 3)
    pub max_attempts: u32,
    /// Lockout window in seconds (default: 30)
    #[serde(alias = "lockoutDuration")]
    pub lockout_duration_secs: u64,
    /// Accept the device passcode/PIN/pattern as a fallback (default: true)
    pub allow_device_credential: bool,
    /// Attestation object wire encoding (default: JSON)
    pub attestation_encoding: AttestationEncoding,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_duration_secs: DEFAULT_SESSION_DURATION_SECS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            lockout_duration_secs: DEFAULT_LOCKOUT_DURATION_SECS,
            allow_device_credential: true,
            attestation_encoding: AttestationEncoding::default(),
        }
    }
}

/// Fallback methods that count as a device credential.
const DEVICE_CREDENTIAL_METHODS: [&str; 3] = ["passcode", "pattern", "pin"];

impl AuthConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `BIOAUTH_SESSION_DURATION_SECS` (default: 3600)
    /// - `BIOAUTH_MAX_ATTEMPTS` (default: 3)
    /// - `BIOAUTH_LOCKOUT_DURATION_SECS` (default: 30)
    /// - `BIOAUTH_ALLOW_DEVICE_CREDENTIAL` (default: true)
    /// - `BIOAUTH_ATTESTATION_ENCODING` - `json` or `cbor` (default: json)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let session_duration_secs = std::env::var("BIOAUTH_SESSION_DURATION_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.session_duration_secs);

        let max_attempts = std::env::var("BIOAUTH_MAX_ATTEMPTS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.max_attempts);

        let lockout_duration_secs = std::env::var("BIOAUTH_LOCKOUT_DURATION_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.lockout_duration_secs);

        let allow_device_credential = std::env::var("BIOAUTH_ALLOW_DEVICE_CREDENTIAL")
            .map(|v| v.to_lowercase() != "false")
            .unwrap_or(defaults.allow_device_credential);

        let attestation_encoding = std::env::var("BIOAUTH_ATTESTATION_ENCODING")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.attestation_encoding);

        Self {
            session_duration_secs,
            max_attempts,
            lockout_duration_secs,
            allow_device_credential,
            attestation_encoding,
        }
    }

    /// Merge a partial JSON document over this configuration.
    ///
    /// Unknown keys are ignored. A non-empty `fallbackMethods` array enables
    /// the device credential only if it names `passcode`, `pattern` or `pin`.
    pub fn merged_with_json(&self, json: &str) -> Result<Self, ConfigError> {
        let patch: serde_json::Value =
            serde_json::from_str(json).map_err(|e| ConfigError::InvalidJson(e.to_string()))?;
        let object = patch
            .as_object()
            .ok_or_else(|| ConfigError::InvalidJson("expected a JSON object".into()))?;

        let mut merged = serde_json::to_value(self)
            .map_err(|e| ConfigError::InvalidJson(e.to_string()))?;
        if let Some(target) = merged.as_object_mut() {
            for (key, value) in object {
                let key = match key.as_str() {
                    "sessionDuration" => "sessionDurationSecs",
                    "lockoutDuration" => "lockoutDurationSecs",
                    other => other,
                };
                if target.contains_key(key) {
                    target.insert(key.to_string(), value.clone());
                }
            }
        }

        let mut config: Self =
            serde_json::from_value(merged).map_err(|e| ConfigError::InvalidJson(e.to_string()))?;

        if let Some(methods) = object.get("fallbackMethods").and_then(|v| v.as_array()) {
            if !methods.is_empty() {
                config.allow_device_credential = methods
                    .iter()
                    .filter_map(|m| m.as_str())
                    .any(|m| DEVICE_CREDENTIAL_METHODS.contains(&m));
            }
        }

        Ok(config)
    }

    /// Reject configurations that would disable lockout or sessions.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.session_duration_secs == 0 {
            return Err(ConfigError::MustBePositive {
                field: "session_duration_secs",
            });
        }
        if self.max_attempts == 0 {
            return Err(ConfigError::MustBePositive {
                field: "max_attempts",
            });
        }
        if self.lockout_duration_secs == 0 {
            return Err(ConfigError::MustBePositive {
                field: "lockout_duration_secs",
            });
        }
        Ok(())
    }
}
