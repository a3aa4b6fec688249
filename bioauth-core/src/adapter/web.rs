//! Browser credential-manager adapter.
//!
//! The browser builds and signs the WebAuthn artifacts itself; this adapter
//! passes requests through, normalizes `DOMException` failures and records
//! created credential IDs so later calls route to assertion.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::instrument;

use super::{AdapterSuccess, AuthenticatorAdapter};
use crate::codec::Base64Url;
use crate::error::{AuthError, ErrorCode};
use crate::normalize::ErrorNormalizer;
use crate::options::{AssertionRequest, RegistrationRequest};
use crate::platform::{Availability, BiometryKind, KeyRef, PlatformError, UnavailableReason};
use crate::store::{CredentialStore, StoredCredential};
use crate::types::{AssertionResponse, CredentialResponse, RegistrationResponse};

/// Key alias prefix for credentials whose keys live in the browser.
const WEB_KEY_PREFIX: &str = "webauthn:";

/// `navigator.credentials` boundary.
#[async_trait]
pub trait WebCredentials: Send + Sync {
    /// `PublicKeyCredential.isUserVerifyingPlatformAuthenticatorAvailable()`
    async fn is_platform_authenticator_available(&self) -> Result<bool, PlatformError>;

    /// `navigator.credentials.create()`
    async fn create(&self, request: &RegistrationRequest)
        -> Result<RegistrationResponse, PlatformError>;

    /// `navigator.credentials.get()`
    async fn get(&self, request: &AssertionRequest) -> Result<AssertionResponse, PlatformError>;
}

/// Pass-through adapter over [`WebCredentials`].
pub struct WebCredentialAdapter {
    credentials: Arc<dyn WebCredentials>,
    store: Arc<CredentialStore>,
    normalizer: ErrorNormalizer,
}

impl WebCredentialAdapter {
    pub fn new(credentials: Arc<dyn WebCredentials>, store: Arc<CredentialStore>) -> Self {
        Self {
            credentials,
            store,
            normalizer: ErrorNormalizer::new(),
        }
    }
}

#[async_trait]
impl AuthenticatorAdapter for WebCredentialAdapter {
    fn name(&self) -> &str {
        "web"
    }

    async fn is_available(&self) -> Result<Availability, AuthError> {
        let available = self
            .credentials
            .is_platform_authenticator_available()
            .await
            .map_err(|e| self.normalizer.normalize(&e))?;

        if available {
            Ok(Availability::available())
        } else {
            Ok(Availability::unavailable(
                UnavailableReason::NotSupported,
                "No user-verifying platform authenticator",
            ))
        }
    }

    async fn supported_biometrics(&self) -> Result<Vec<BiometryKind>, AuthError> {
        // Browsers do not disclose the modality.
        if self.is_available().await?.available {
            Ok(vec![
                BiometryKind::Fingerprint,
                BiometryKind::FaceAuthentication,
            ])
        } else {
            Ok(Vec::new())
        }
    }

    #[instrument(skip(self, request), fields(rp_id = %request.rp_id))]
    async fn register(&self, request: &RegistrationRequest) -> Result<AdapterSuccess, AuthError> {
        let response = self
            .credentials
            .create(request)
            .await
            .map_err(|e| self.normalizer.normalize(&e))?;

        let credential = StoredCredential {
            id: response.id.clone(),
            raw_id: response.raw_id.clone(),
            rp_id: request.rp_id.clone(),
            user_handle: request.user.as_ref().map(|u| Base64Url(u.handle())),
            user_name: request.user.as_ref().map(|u| u.name.clone()),
            key_ref: KeyRef::new(format!("{WEB_KEY_PREFIX}{}", response.id)),
            public_key: response.response.public_key.clone(),
            created_at: Utc::now(),
        };
        self.store.insert(credential).map_err(|e| {
            AuthError::new(ErrorCode::Unknown, "Failed to record credential")
                .with_detail(e.to_string())
        })?;

        tracing::info!(credential_id = %response.id, "Browser credential recorded");
        Ok(AdapterSuccess {
            credential_id: response.id.clone(),
            credential: CredentialResponse::Registration(response),
            biometry: None,
        })
    }

    #[instrument(skip(self, request), fields(credential_id = %request.credential.id))]
    async fn authenticate(&self, request: &AssertionRequest) -> Result<AdapterSuccess, AuthError> {
        let response = self
            .credentials
            .get(request)
            .await
            .map_err(|e| self.normalizer.normalize(&e))?;

        Ok(AdapterSuccess {
            credential_id: response.id.clone(),
            credential: CredentialResponse::Assertion(response),
            biometry: None,
        })
    }

    async fn delete_credentials(&self, _credentials: &[StoredCredential]) -> Result<(), AuthError> {
        // Browser-held keys cannot be deleted from script.
        Ok(())
    }
}
