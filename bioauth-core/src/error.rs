use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::CodecError;
use crate::config::ConfigError;
use crate::engine::EngineError;
use crate::store::StoreError;

/// Closed error taxonomy surfaced to callers.
///
/// Every platform, browser and engine failure is translated into exactly one
/// of these codes before it leaves the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    UserCancelled,
    SystemCancelled,
    AuthenticationFailed,
    NotAvailable,
    NotEnrolled,
    LockedOut,
    Timeout,
    InvalidContext,
    PlatformNotSupported,
    Unknown,
}

impl ErrorCode {
    /// Only genuine verification failures count toward lockout.
    ///
    /// Cancellation, interruption, timeouts and OS-reported lockouts leave the
    /// failed-attempt counter untouched.
    pub fn counts_toward_lockout(self) -> bool {
        matches!(self, Self::AuthenticationFailed)
    }

    /// Whether the user or the system aborted the ceremony.
    pub fn is_cancellation(self) -> bool {
        matches!(self, Self::UserCancelled | Self::SystemCancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::UserCancelled => "USER_CANCELLED",
            Self::SystemCancelled => "SYSTEM_CANCELLED",
            Self::AuthenticationFailed => "AUTHENTICATION_FAILED",
            Self::NotAvailable => "NOT_AVAILABLE",
            Self::NotEnrolled => "NOT_ENROLLED",
            Self::LockedOut => "LOCKED_OUT",
            Self::Timeout => "TIMEOUT",
            Self::InvalidContext => "INVALID_CONTEXT",
            Self::PlatformNotSupported => "PLATFORM_NOT_SUPPORTED",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed authentication failure as returned to callers.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[error("{code}: {message}")]
pub struct AuthError {
    pub code: ErrorCode,
    pub message: String,
    /// Original platform signal, kept verbatim for unmatched errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Seconds until a lockout window closes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

impl AuthError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: None,
            retry_after_secs: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Lockout rejection carrying the remaining wait.
    pub fn locked_out(retry_after_secs: u64) -> Self {
        Self {
            code: ErrorCode::LockedOut,
            message: format!("Too many failed attempts, try again in {retry_after_secs} seconds"),
            detail: None,
            retry_after_secs: Some(retry_after_secs),
        }
    }

    pub fn not_enrolled(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotEnrolled, message)
    }

    pub fn invalid_context(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidContext, message)
    }

    pub fn platform_not_supported(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PlatformNotSupported, message)
    }
}

/// Crate-level error.
///
/// `Auth` carries taxonomy failures. The remaining variants are structural
/// faults (malformed encodings, storage I/O, engine defects) that callers
/// should treat as bugs rather than as user-facing outcomes.
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Credential store error: {0}")]
    Store(#[from] StoreError),

    #[error("Signing engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

impl Error {
    /// Project this error onto the caller taxonomy.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Auth(e) => e.code,
            Self::Engine(e) => e.code(),
            Self::Codec(_) | Self::Store(_) | Self::Config(_) => ErrorCode::Unknown,
        }
    }

    /// Collapse into an [`AuthError`], preserving the structural message as detail.
    pub fn into_auth_error(self) -> AuthError {
        match self {
            Self::Auth(e) => e,
            other => AuthError::new(other.code(), "Internal authenticator error")
                .with_detail(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::LockedOut).unwrap();
        assert_eq!(json, "\"LOCKED_OUT\"");
        let json = serde_json::to_string(&ErrorCode::PlatformNotSupported).unwrap();
        assert_eq!(json, "\"PLATFORM_NOT_SUPPORTED\"");
    }

    #[test]
    fn test_only_authentication_failures_count_toward_lockout() {
        assert!(ErrorCode::AuthenticationFailed.counts_toward_lockout());
        assert!(!ErrorCode::UserCancelled.counts_toward_lockout());
        assert!(!ErrorCode::SystemCancelled.counts_toward_lockout());
        assert!(!ErrorCode::Timeout.counts_toward_lockout());
        assert!(!ErrorCode::LockedOut.counts_toward_lockout());
    }

    #[test]
    fn test_locked_out_carries_retry_after() {
        let err = AuthError::locked_out(12);
        assert_eq!(err.code, ErrorCode::LockedOut);
        assert_eq!(err.retry_after_secs, Some(12));

        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["code"], "LOCKED_OUT");
        assert_eq!(json["retryAfterSecs"], 12);
        assert!(json.get("detail").is_none());
    }

    #[test]
    fn test_structural_errors_project_to_unknown() {
        let err = Error::from(CodecError::InvalidBase64("!!".into()));
        assert_eq!(err.code(), ErrorCode::Unknown);

        let auth = err.into_auth_error();
        assert_eq!(auth.code, ErrorCode::Unknown);
        assert!(auth.detail.unwrap().contains("Codec error"));
    }
}
