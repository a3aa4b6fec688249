//! Native adapter: platform prompt followed by the signing engine.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use super::{AdapterSuccess, AuthenticatorAdapter};
use crate::engine::SigningEngine;
use crate::error::AuthError;
use crate::normalize::ErrorNormalizer;
use crate::options::{AssertionRequest, RegistrationRequest};
use crate::platform::{Availability, BiometryKind, PlatformAuthenticator};
use crate::store::StoredCredential;
use crate::types::CredentialResponse;

/// Prompts through a [`PlatformAuthenticator`] and signs with its keys.
pub struct EmulatedAdapter {
    name: String,
    platform: Arc<dyn PlatformAuthenticator>,
    engine: Arc<SigningEngine>,
    normalizer: ErrorNormalizer,
}

impl EmulatedAdapter {
    pub fn new(
        name: impl Into<String>,
        platform: Arc<dyn PlatformAuthenticator>,
        engine: Arc<SigningEngine>,
    ) -> Self {
        Self {
            name: name.into(),
            platform,
            engine,
            normalizer: ErrorNormalizer::new(),
        }
    }
}

impl std::fmt::Debug for EmulatedAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmulatedAdapter")
            .field("name", &self.name)
            .finish()
    }
}

#[async_trait]
impl AuthenticatorAdapter for EmulatedAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn is_available(&self) -> Result<Availability, AuthError> {
        self.platform
            .is_biometric_available()
            .await
            .map_err(|e| self.normalizer.normalize(&e))
    }

    async fn supported_biometrics(&self) -> Result<Vec<BiometryKind>, AuthError> {
        self.platform
            .supported_biometry_kinds()
            .await
            .map_err(|e| self.normalizer.normalize(&e))
    }

    #[instrument(skip(self, request), fields(adapter = %self.name, rp_id = %request.rp_id))]
    async fn register(&self, request: &RegistrationRequest) -> Result<AdapterSuccess, AuthError> {
        let biometry = self
            .platform
            .prompt_user_verification(&request.prompt)
            .await
            .map_err(|e| self.normalizer.normalize(&e))?;

        let registration = self
            .engine
            .register(request)
            .await
            .map_err(|e| e.into_auth_error())?;

        Ok(AdapterSuccess {
            credential_id: registration.credential.id,
            credential: CredentialResponse::Registration(registration.response),
            biometry: Some(biometry),
        })
    }

    #[instrument(skip(self, request), fields(adapter = %self.name, credential_id = %request.credential.id))]
    async fn authenticate(&self, request: &AssertionRequest) -> Result<AdapterSuccess, AuthError> {
        let credential = &request.credential;
        let key_present = self
            .platform
            .key_exists(&credential.key_ref)
            .await
            .map_err(|e| self.normalizer.normalize(&e))?;
        if !key_present {
            // Forget the record so the next call registers afresh.
            tracing::warn!(key = %credential.key_ref, "Credential key missing from secure storage");
            if let Err(e) = self.engine.store().remove(&credential.id) {
                tracing::warn!(error = %e, "Failed to drop stale credential");
            }
            return Err(AuthError::not_enrolled(format!(
                "Key for credential {} is no longer available",
                credential.id
            )));
        }

        let biometry = self
            .platform
            .prompt_user_verification(&request.prompt)
            .await
            .map_err(|e| self.normalizer.normalize(&e))?;

        let assertion = self
            .engine
            .assert(request)
            .await
            .map_err(|e| e.into_auth_error())?;

        Ok(AdapterSuccess {
            credential_id: request.credential.id.clone(),
            credential: CredentialResponse::Assertion(assertion.response),
            biometry: Some(biometry),
        })
    }

    async fn delete_credentials(&self, credentials: &[StoredCredential]) -> Result<(), AuthError> {
        for credential in credentials {
            self.platform
                .delete_key(credential.key_ref.alias())
                .await
                .map_err(|e| self.normalizer.normalize(&e))?;
        }
        Ok(())
    }
}

#[cfg(all(test, feature = "software-authenticator"))]
mod tests {
    use super::*;
    use crate::codec::AttestationEncoding;
    use crate::error::ErrorCode;
    use crate::identity::AppIdentity;
    use crate::options::{AttestationConveyance, UserVerification};
    use crate::platform::{PromptOutcome, PromptRequest, SoftwareAuthenticator};
    use crate::store::CredentialStore;

    fn adapter() -> (Arc<SoftwareAuthenticator>, EmulatedAdapter) {
        let platform = Arc::new(SoftwareAuthenticator::new());
        let engine = Arc::new(SigningEngine::new(
            platform.clone(),
            Arc::new(CredentialStore::in_memory()),
            AppIdentity::desktop("test"),
        ));
        (platform.clone(), EmulatedAdapter::new("software", platform, engine))
    }

    fn registration() -> RegistrationRequest {
        RegistrationRequest {
            rp_id: "example.com".into(),
            rp_name: None,
            user: None,
            challenge: vec![7; 32],
            user_verification: UserVerification::Required,
            attestation: AttestationConveyance::None,
            attestation_encoding: AttestationEncoding::Json,
            exclude_credentials: Vec::new(),
            prompt: PromptRequest::new("register"),
        }
    }

    #[tokio::test]
    async fn test_prompt_failure_skips_engine() {
        let (platform, adapter) = adapter();
        platform.push_outcome(PromptOutcome::cancelled());

        let err = adapter.register(&registration()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::UserCancelled);
        assert_eq!(platform.key_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_key_drops_credential_without_prompt() {
        let (platform, adapter) = adapter();
        let success = adapter.register(&registration()).await.unwrap();
        let credential = adapter.engine.store().get(&success.credential_id).unwrap();
        platform.delete_key(credential.key_ref.alias()).await.unwrap();
        let prompts = platform.prompt_count();

        let request = AssertionRequest {
            rp_id: credential.rp_id.clone(),
            credential: credential.clone(),
            challenge: vec![1; 32],
            user_verification: UserVerification::Required,
            prompt: PromptRequest::new("assert"),
        };
        let err = adapter.authenticate(&request).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NotEnrolled);
        assert_eq!(platform.prompt_count(), prompts);
        assert!(adapter.engine.store().get(&credential.id).is_none());
        assert_eq!(adapter.engine.store().get_counter(&credential.id), 0);
    }

    #[tokio::test]
    async fn test_register_then_delete_keys() {
        let (platform, adapter) = adapter();
        let success = adapter.register(&registration()).await.unwrap();
        assert!(success.credential.is_registration());
        assert_eq!(success.biometry, Some(BiometryKind::Fingerprint));
        assert_eq!(platform.key_count(), 1);

        let credentials = adapter.engine.store().clear().unwrap();
        adapter.delete_credentials(&credentials).await.unwrap();
        assert_eq!(platform.key_count(), 0);
    }
}
