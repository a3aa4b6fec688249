//! In-process software authenticator.
//!
//! WARNING: keys live in process memory. Use only for tests and for hosts
//! without secure hardware where that trade-off is accepted.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use dashmap::DashMap;
use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey};
use rand_core::OsRng;

use super::{
    Availability, BiometryKind, ErrorSource, KeyRef, PlatformAuthenticator, PlatformError,
    PromptRequest, UnavailableReason,
};
use crate::error::ErrorCode;

/// Scripted result of the next user-verification prompt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptOutcome {
    /// The user verified with the given modality.
    Verified(BiometryKind),
    /// The prompt fails with the given platform error.
    Error(PlatformError),
}

impl PromptOutcome {
    /// A failure already expressed in the caller taxonomy.
    pub fn fail(code: ErrorCode) -> Self {
        Self::Error(software_error(code, format!("Scripted {code}")))
    }

    pub fn cancelled() -> Self {
        Self::fail(ErrorCode::UserCancelled)
    }

    pub fn not_recognized() -> Self {
        Self::fail(ErrorCode::AuthenticationFailed)
    }
}

fn software_error(code: ErrorCode, message: impl Into<String>) -> PlatformError {
    PlatformError::new(ErrorSource::Software, message).with_name(code.as_str())
}

/// Software P-256 authenticator with a scripted prompt.
///
/// Prompts consume queued [`PromptOutcome`]s in order; once the queue is
/// empty every prompt verifies with the first supported modality.
pub struct SoftwareAuthenticator {
    keys: DashMap<String, SigningKey>,
    outcomes: Mutex<VecDeque<PromptOutcome>>,
    kinds: Vec<BiometryKind>,
    available: AtomicBool,
    signing_available: AtomicBool,
    key_export: AtomicBool,
    prompts: AtomicUsize,
    signatures: AtomicUsize,
}

impl SoftwareAuthenticator {
    pub fn new() -> Self {
        Self::with_kinds(vec![BiometryKind::Fingerprint, BiometryKind::Pin])
    }

    pub fn with_kinds(kinds: Vec<BiometryKind>) -> Self {
        Self {
            keys: DashMap::new(),
            outcomes: Mutex::new(VecDeque::new()),
            kinds,
            available: AtomicBool::new(true),
            signing_available: AtomicBool::new(true),
            key_export: AtomicBool::new(true),
            prompts: AtomicUsize::new(0),
            signatures: AtomicUsize::new(0),
        }
    }

    /// Queue the result of a future prompt.
    pub fn push_outcome(&self, outcome: PromptOutcome) {
        self.outcomes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(outcome);
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Simulate a platform whose signing primitive is missing.
    pub fn set_signing_available(&self, available: bool) {
        self.signing_available.store(available, Ordering::SeqCst);
    }

    /// Simulate a platform that refuses to export public keys.
    pub fn set_key_export(&self, allowed: bool) {
        self.key_export.store(allowed, Ordering::SeqCst);
    }

    /// Number of prompts shown so far.
    pub fn prompt_count(&self) -> usize {
        self.prompts.load(Ordering::SeqCst)
    }

    /// Number of signatures produced so far.
    pub fn signature_count(&self) -> usize {
        self.signatures.load(Ordering::SeqCst)
    }

    pub fn key_count(&self) -> usize {
        self.keys.len()
    }

    pub fn has_key(&self, alias: &str) -> bool {
        self.keys.contains_key(alias)
    }

    fn default_kind(&self) -> BiometryKind {
        self.kinds
            .iter()
            .copied()
            .find(|kind| !kind.is_device_credential())
            .or_else(|| self.kinds.first().copied())
            .unwrap_or(BiometryKind::Fingerprint)
    }
}

impl Default for SoftwareAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SoftwareAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SoftwareAuthenticator")
            .field("keys", &self.keys.len())
            .field("kinds", &self.kinds)
            .field("prompts", &self.prompt_count())
            .finish()
    }
}

#[async_trait]
impl PlatformAuthenticator for SoftwareAuthenticator {
    async fn is_biometric_available(&self) -> Result<Availability, PlatformError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(Availability::available())
        } else {
            Ok(Availability::unavailable(
                UnavailableReason::HardwareUnavailable,
                "Software authenticator disabled",
            ))
        }
    }

    async fn supported_biometry_kinds(&self) -> Result<Vec<BiometryKind>, PlatformError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(self.kinds.clone())
        } else {
            Ok(Vec::new())
        }
    }

    async fn generate_or_get_key(&self, alias: &str) -> Result<KeyRef, PlatformError> {
        self.keys
            .entry(alias.to_string())
            .or_insert_with(|| SigningKey::random(&mut OsRng));
        Ok(KeyRef::new(alias))
    }

    async fn key_exists(&self, key: &KeyRef) -> Result<bool, PlatformError> {
        Ok(self.keys.contains_key(key.alias()))
    }

    async fn sign(&self, key: &KeyRef, message: &[u8]) -> Result<Vec<u8>, PlatformError> {
        if !self.signing_available.load(Ordering::SeqCst) {
            return Err(software_error(
                ErrorCode::NotAvailable,
                "Signing primitive unavailable",
            ));
        }

        let signing_key = self.keys.get(key.alias()).ok_or_else(|| {
            software_error(ErrorCode::NotEnrolled, format!("No key under {key}"))
        })?;
        let signature: Signature = signing_key.sign(message);
        self.signatures.fetch_add(1, Ordering::SeqCst);
        Ok(signature.to_der().as_bytes().to_vec())
    }

    async fn prompt_user_verification(
        &self,
        request: &PromptRequest,
    ) -> Result<BiometryKind, PlatformError> {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(reason = %request.reason, "Software prompt shown");

        if !self.available.load(Ordering::SeqCst) {
            return Err(software_error(
                ErrorCode::NotAvailable,
                "Software authenticator disabled",
            ));
        }

        let outcome = self
            .outcomes
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();

        match outcome {
            Some(PromptOutcome::Verified(kind)) => {
                if kind.is_device_credential() && !request.allow_device_credential {
                    return Err(software_error(
                        ErrorCode::NotAvailable,
                        "Device credential fallback disabled",
                    ));
                }
                Ok(kind)
            }
            Some(PromptOutcome::Error(err)) => Err(err),
            None => Ok(self.default_kind()),
        }
    }

    async fn export_public_key(&self, key: &KeyRef) -> Result<Option<Vec<u8>>, PlatformError> {
        if !self.key_export.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(self.keys.get(key.alias()).map(|signing_key| {
            signing_key
                .verifying_key()
                .to_encoded_point(false)
                .as_bytes()
                .to_vec()
        }))
    }

    async fn delete_key(&self, alias: &str) -> Result<(), PlatformError> {
        self.keys.remove(alias);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::signature::Verifier;
    use p256::ecdsa::VerifyingKey;

    #[tokio::test]
    async fn test_signature_verifies_with_exported_key() {
        let authenticator = SoftwareAuthenticator::new();
        let key = authenticator.generate_or_get_key("alias").await.unwrap();

        let der = authenticator.sign(&key, b"message").await.unwrap();
        let public = authenticator.export_public_key(&key).await.unwrap().unwrap();
        assert_eq!(public.len(), 65);

        let verifying_key = VerifyingKey::from_sec1_bytes(&public).unwrap();
        let signature = Signature::from_der(&der).unwrap();
        assert!(verifying_key.verify(b"message", &signature).is_ok());
        assert_eq!(authenticator.signature_count(), 1);
    }

    #[tokio::test]
    async fn test_generate_is_idempotent() {
        let authenticator = SoftwareAuthenticator::new();
        let key = authenticator.generate_or_get_key("alias").await.unwrap();
        let first = authenticator.export_public_key(&key).await.unwrap();
        authenticator.generate_or_get_key("alias").await.unwrap();
        let second = authenticator.export_public_key(&key).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(authenticator.key_count(), 1);
    }

    #[tokio::test]
    async fn test_scripted_outcomes_then_default() {
        let authenticator = SoftwareAuthenticator::new();
        authenticator.push_outcome(PromptOutcome::cancelled());
        authenticator.push_outcome(PromptOutcome::Verified(BiometryKind::Pin));

        let request = PromptRequest::new("test");
        let err = authenticator
            .prompt_user_verification(&request)
            .await
            .unwrap_err();
        assert_eq!(err.name.as_deref(), Some("USER_CANCELLED"));

        assert_eq!(
            authenticator.prompt_user_verification(&request).await.unwrap(),
            BiometryKind::Pin
        );
        assert_eq!(
            authenticator.prompt_user_verification(&request).await.unwrap(),
            BiometryKind::Fingerprint
        );
        assert_eq!(authenticator.prompt_count(), 3);
    }

    #[tokio::test]
    async fn test_device_credential_rejected_when_disallowed() {
        let authenticator = SoftwareAuthenticator::new();
        authenticator.push_outcome(PromptOutcome::Verified(BiometryKind::Passcode));

        let request = PromptRequest {
            allow_device_credential: false,
            ..PromptRequest::new("test")
        };
        assert!(authenticator.prompt_user_verification(&request).await.is_err());
    }

    #[tokio::test]
    async fn test_signing_unavailable() {
        let authenticator = SoftwareAuthenticator::new();
        let key = authenticator.generate_or_get_key("alias").await.unwrap();
        authenticator.set_signing_available(false);

        let err = authenticator.sign(&key, b"m").await.unwrap_err();
        assert_eq!(err.name.as_deref(), Some("NOT_AVAILABLE"));
    }

    #[tokio::test]
    async fn test_delete_key() {
        let authenticator = SoftwareAuthenticator::new();
        let key = authenticator.generate_or_get_key("alias").await.unwrap();
        authenticator.delete_key("alias").await.unwrap();
        authenticator.delete_key("alias").await.unwrap();

        assert!(!authenticator.has_key("alias"));
        assert!(!authenticator.key_exists(&key).await.unwrap());
        assert!(authenticator.sign(&key, b"m").await.is_err());
    }
}
