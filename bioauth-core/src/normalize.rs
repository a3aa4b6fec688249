//! Platform error normalization.
//!
//! Android `BiometricPrompt` codes, Apple `LAError` codes, browser
//! `DOMException` names and Windows Hello results are mapped onto the closed
//! [`ErrorCode`] taxonomy. Codes are matched first, then the message text.
//! Anything unmatched becomes [`ErrorCode::Unknown`] with the original error
//! kept in [`AuthError::detail`].

use crate::error::{AuthError, ErrorCode};
use crate::platform::{ErrorSource, PlatformError};

/// Maps platform failures onto [`ErrorCode`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorNormalizer;

impl ErrorNormalizer {
    pub fn new() -> Self {
        Self
    }

    pub fn normalize(&self, error: &PlatformError) -> AuthError {
        match self.classify(error) {
            Some(code) => AuthError::new(code, message_or_default(error, code)),
            None => {
                tracing::debug!(error = %error, "Unmatched platform error");
                AuthError::new(ErrorCode::Unknown, message_or_default(error, ErrorCode::Unknown))
                    .with_detail(error.to_string())
            }
        }
    }

    /// The taxonomy code for `error`, if any rule matches.
    pub fn classify(&self, error: &PlatformError) -> Option<ErrorCode> {
        let by_identity = match error.platform {
            ErrorSource::AndroidBiometric => error.code.and_then(android_code),
            ErrorSource::AppleLocalAuthentication => error.code.and_then(apple_code),
            ErrorSource::WindowsHello => error.code.and_then(windows_code),
            ErrorSource::WebAuthnDom => error.name.as_deref().and_then(dom_exception),
            ErrorSource::Software => error.name.as_deref().and_then(taxonomy_name),
            ErrorSource::Other => error
                .name
                .as_deref()
                .and_then(|name| taxonomy_name(name).or_else(|| dom_exception(name))),
        };

        by_identity.or_else(|| match_message(&error.message))
    }
}

fn message_or_default(error: &PlatformError, code: ErrorCode) -> String {
    if error.message.trim().is_empty() {
        default_message(code).to_string()
    } else {
        error.message.clone()
    }
}

fn default_message(code: ErrorCode) -> &'static str {
    match code {
        ErrorCode::UserCancelled => "Authentication was cancelled by the user",
        ErrorCode::SystemCancelled => "Authentication was cancelled by the system",
        ErrorCode::AuthenticationFailed => "Biometric not recognized",
        ErrorCode::NotAvailable => "Biometric authentication is not available",
        ErrorCode::NotEnrolled => "No biometrics enrolled",
        ErrorCode::LockedOut => "Too many failed attempts",
        ErrorCode::Timeout => "Authentication timed out",
        ErrorCode::InvalidContext => "Invalid authentication context",
        ErrorCode::PlatformNotSupported => "Platform not supported",
        ErrorCode::Unknown => "Unknown authentication error",
    }
}

/// `BiometricPrompt.ERROR_*` values.
fn android_code(code: i64) -> Option<ErrorCode> {
    match code {
        // HW_UNAVAILABLE, NO_SPACE, HW_NOT_PRESENT, SECURITY_UPDATE_REQUIRED
        1 | 4 | 12 | 15 => Some(ErrorCode::NotAvailable),
        3 => Some(ErrorCode::Timeout),
        5 => Some(ErrorCode::SystemCancelled),
        // LOCKOUT, LOCKOUT_PERMANENT
        7 | 9 => Some(ErrorCode::LockedOut),
        // USER_CANCELED, NEGATIVE_BUTTON
        10 | 13 => Some(ErrorCode::UserCancelled),
        // NO_BIOMETRICS, NO_DEVICE_CREDENTIAL
        11 | 14 => Some(ErrorCode::NotEnrolled),
        _ => None,
    }
}

/// `LAError.Code` values.
fn apple_code(code: i64) -> Option<ErrorCode> {
    match code {
        -1 => Some(ErrorCode::AuthenticationFailed),
        // userCancel, userFallback
        -2 | -3 => Some(ErrorCode::UserCancelled),
        // systemCancel, appCancel
        -4 | -9 => Some(ErrorCode::SystemCancelled),
        // passcodeNotSet, biometryNotEnrolled
        -5 | -7 => Some(ErrorCode::NotEnrolled),
        -6 => Some(ErrorCode::NotAvailable),
        -8 => Some(ErrorCode::LockedOut),
        // invalidContext, notInteractive
        -10 | -1004 => Some(ErrorCode::InvalidContext),
        _ => None,
    }
}

/// `UserConsentVerificationResult` values.
fn windows_code(code: i64) -> Option<ErrorCode> {
    match code {
        // DeviceNotPresent, DisabledByPolicy, DeviceBusy
        1 | 3 | 4 => Some(ErrorCode::NotAvailable),
        2 => Some(ErrorCode::NotEnrolled),
        5 => Some(ErrorCode::LockedOut),
        6 => Some(ErrorCode::UserCancelled),
        _ => None,
    }
}

fn dom_exception(name: &str) -> Option<ErrorCode> {
    match name {
        "NotAllowedError" => Some(ErrorCode::UserCancelled),
        "AbortError" => Some(ErrorCode::SystemCancelled),
        "SecurityError" | "InvalidStateError" => Some(ErrorCode::InvalidContext),
        "NotSupportedError" => Some(ErrorCode::PlatformNotSupported),
        "TimeoutError" => Some(ErrorCode::Timeout),
        "ConstraintError" => Some(ErrorCode::NotAvailable),
        _ => None,
    }
}

/// Names that already are taxonomy codes (`"USER_CANCELLED"`, ...).
fn taxonomy_name(name: &str) -> Option<ErrorCode> {
    serde_json::from_value(serde_json::Value::String(name.to_string())).ok()
}

/// Free-text fallback, checked in order.
const MESSAGE_PATTERNS: &[(&[&str], ErrorCode)] = &[
    (
        &["system cancel", "cancelled by system", "canceled by system", "interrupted"],
        ErrorCode::SystemCancelled,
    ),
    (&["cancel"], ErrorCode::UserCancelled),
    (
        &["lockout", "locked out", "too many attempts", "too many failed"],
        ErrorCode::LockedOut,
    ),
    (&["timeout", "timed out"], ErrorCode::Timeout),
    (
        &["not enrolled", "no enrolled", "none enrolled", "no biometrics", "not set up"],
        ErrorCode::NotEnrolled,
    ),
    (&["not supported", "unsupported"], ErrorCode::PlatformNotSupported),
    (
        &["unavailable", "not available", "no hardware"],
        ErrorCode::NotAvailable,
    ),
    (
        &["invalid context", "invalid state", "security error"],
        ErrorCode::InvalidContext,
    ),
    (
        &["not recognized", "not recognised", "failed", "mismatch"],
        ErrorCode::AuthenticationFailed,
    ),
];

fn match_message(message: &str) -> Option<ErrorCode> {
    let message = message.to_lowercase();
    MESSAGE_PATTERNS
        .iter()
        .find(|(needles, _)| needles.iter().any(|needle| message.contains(needle)))
        .map(|(_, code)| *code)
}
