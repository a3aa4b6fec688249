//! Signing and attestation engine.
//!
//! Builds WebAuthn registration and assertion artifacts from platform key
//! operations. Signatures are ECDSA P-256/SHA-256 over
//! `authenticatorData ‖ SHA-256(clientDataJSON)`. A missing signing primitive
//! fails the call; an empty signature is an engine defect. No placeholder
//! output is ever produced.

use std::sync::Arc;

use chrono::Utc;
use rand_core::{OsRng, RngCore};
use tracing::instrument;

use crate::codec::{
    self, cose, AttestationStatement, AttestedCredentialData, Base64Url, CeremonyType, ClientData,
    CodecError,
};
use crate::error::{AuthError, ErrorCode};
use crate::identity::AppIdentity;
use crate::normalize::ErrorNormalizer;
use crate::options::{AssertionRequest, RegistrationRequest, UserVerification};
use crate::platform::{KeyRef, PlatformAuthenticator, PlatformError};
use crate::store::{CredentialStore, StoreError, StoredCredential};
use crate::types::{
    AssertionResponse, AssertionResponseData, AttestationResponse, RegistrationResponse,
    INTERNAL_TRANSPORT,
};

/// Length of generated credential identifiers.
pub const CREDENTIAL_ID_LEN: usize = 16;

/// Engine failures.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Signing returned empty output for {0}")]
    EmptySignature(String),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl EngineError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Platform(e) => ErrorNormalizer::new()
                .classify(e)
                .unwrap_or(ErrorCode::Unknown),
            Self::EmptySignature(_) | Self::Codec(_) | Self::Store(_) => ErrorCode::Unknown,
        }
    }

    /// Platform errors are normalized; everything else is a defect.
    pub fn into_auth_error(self) -> AuthError {
        match self {
            Self::Platform(e) => ErrorNormalizer::new().normalize(&e),
            other => AuthError::new(ErrorCode::Unknown, "Internal authenticator error")
                .with_detail(other.to_string()),
        }
    }
}

/// A registration's caller response plus the record to keep.
#[derive(Debug, Clone)]
pub struct Registration {
    pub response: RegistrationResponse,
    pub credential: StoredCredential,
    pub sign_count: u32,
}

/// An assertion's caller response.
#[derive(Debug, Clone)]
pub struct Assertion {
    pub response: AssertionResponse,
    pub sign_count: u32,
}

/// Produces attestation objects and signed assertions.
pub struct SigningEngine {
    platform: Arc<dyn PlatformAuthenticator>,
    store: Arc<CredentialStore>,
    identity: AppIdentity,
    device_fingerprint: Option<String>,
}

impl SigningEngine {
    pub fn new(
        platform: Arc<dyn PlatformAuthenticator>,
        store: Arc<CredentialStore>,
        identity: AppIdentity,
    ) -> Self {
        Self {
            platform,
            store,
            identity,
            device_fingerprint: None,
        }
    }

    /// Attach an advisory device fingerprint to every response.
    pub fn with_device_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.device_fingerprint = Some(fingerprint.into());
        self
    }

    pub fn identity(&self) -> &AppIdentity {
        &self.identity
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// Create a credential key, build the attestation and store the record.
    ///
    /// The counter embedded is the credential's current value (0 for a new
    /// credential); registration does not consume a counter value. If any
    /// step after key creation fails, the key is deleted again.
    #[instrument(skip(self, request), fields(rp_id = %request.rp_id))]
    pub async fn register(&self, request: &RegistrationRequest) -> Result<Registration, EngineError> {
        let mut raw_id = vec![0u8; CREDENTIAL_ID_LEN];
        OsRng.fill_bytes(&mut raw_id);
        let credential_id = codec::base64url::encode(&raw_id);

        let key_ref = self
            .platform
            .generate_or_get_key(KeyRef::for_credential(&credential_id).alias())
            .await?;

        match self.attest(request, raw_id, key_ref.clone()).await {
            Ok(registration) => Ok(registration),
            Err(e) => {
                if let Err(cleanup) = self.platform.delete_key(key_ref.alias()).await {
                    tracing::warn!(
                        key = %key_ref,
                        error = %cleanup,
                        "Failed to delete key of abandoned registration"
                    );
                }
                Err(e)
            }
        }
    }

    async fn attest(
        &self,
        request: &RegistrationRequest,
        raw_id: Vec<u8>,
        key_ref: KeyRef,
    ) -> Result<Registration, EngineError> {
        let credential_id = codec::base64url::encode(&raw_id);
        let public_key = self.platform.export_public_key(&key_ref).await?;
        let cose_key = match public_key.as_deref().map(cose::encode_p256_public_key) {
            Some(Ok(cose_key)) => Some(cose_key),
            Some(Err(e)) => {
                tracing::debug!(error = %e, "Exported key is not P-256, omitting attested data");
                None
            }
            None => None,
        };

        let sign_count = self.store.get_counter(&credential_id);
        let attested = cose_key.map(|key| AttestedCredentialData::new(raw_id.clone(), key));
        let auth_data = codec::encode_authenticator_data(
            &request.rp_id,
            sign_count,
            true,
            user_verified(request.user_verification),
            attested,
        )?;

        let client_data_json =
            ClientData::new(CeremonyType::Create, &request.challenge, self.identity.origin())
                .to_json()?;

        let statement = if request.attestation.wants_statement() {
            let message = codec::signed_message(&auth_data, &client_data_json);
            let sig = self.sign(&key_ref, &message).await?;
            AttestationStatement::Packed {
                alg: cose::COSE_ALG_ES256,
                sig,
            }
        } else {
            AttestationStatement::None
        };
        let format = statement.format();
        let attestation_object = codec::encode_attestation_object(
            statement,
            &auth_data,
            request.attestation_encoding,
        )?;

        let credential = StoredCredential {
            id: credential_id.clone(),
            raw_id: Base64Url(raw_id.clone()),
            rp_id: request.rp_id.clone(),
            user_handle: request.user.as_ref().map(|u| Base64Url(u.handle())),
            user_name: request.user.as_ref().map(|u| u.name.clone()),
            key_ref,
            public_key: public_key.clone().map(Base64Url),
            created_at: Utc::now(),
        };
        self.store.insert(credential.clone())?;

        let public_key_algorithm = public_key.as_ref().map(|_| cose::COSE_ALG_ES256);
        let mut response = RegistrationResponse::new(
            raw_id,
            AttestationResponse {
                client_data_json: Base64Url(client_data_json),
                attestation_object: Base64Url(attestation_object),
                authenticator_data: Base64Url(auth_data),
                transports: vec![INTERNAL_TRANSPORT.to_string()],
                public_key: public_key.map(Base64Url),
                public_key_algorithm,
            },
        );
        response.device_fingerprint = self.device_fingerprint.clone();

        tracing::info!(
            credential_id = %credential_id,
            sign_count,
            fmt = format,
            "Credential registered"
        );

        Ok(Registration {
            response,
            credential,
            sign_count,
        })
    }

    /// Sign an assertion for a stored credential.
    ///
    /// The counter is incremented atomically and the pre-increment value is
    /// embedded, so consecutive assertions carry strictly increasing counts.
    #[instrument(skip(self, request), fields(rp_id = %request.rp_id, credential_id = %request.credential.id))]
    pub async fn assert(&self, request: &AssertionRequest) -> Result<Assertion, EngineError> {
        let credential = &request.credential;

        let sign_count = self.store.increment_and_get(&credential.id)?;
        let auth_data = codec::encode_authenticator_data(
            &request.rp_id,
            sign_count,
            true,
            user_verified(request.user_verification),
            None,
        )?;

        let client_data_json =
            ClientData::new(CeremonyType::Get, &request.challenge, self.identity.origin())
                .to_json()?;
        let message = codec::signed_message(&auth_data, &client_data_json);
        let signature = self.sign(&credential.key_ref, &message).await?;

        let mut response = AssertionResponse::new(
            credential.raw_id.as_bytes().to_vec(),
            AssertionResponseData {
                client_data_json: Base64Url(client_data_json),
                authenticator_data: Base64Url(auth_data),
                signature: Base64Url(signature),
                user_handle: credential.user_handle.clone(),
            },
        );
        response.device_fingerprint = self.device_fingerprint.clone();

        tracing::info!(sign_count, "Assertion signed");
        Ok(Assertion {
            response,
            sign_count,
        })
    }

    async fn sign(&self, key_ref: &KeyRef, message: &[u8]) -> Result<Vec<u8>, EngineError> {
        let signature = self.platform.sign(key_ref, message).await?;
        if signature.is_empty() {
            tracing::error!(key = %key_ref, "Platform signing returned empty output");
            return Err(EngineError::EmptySignature(key_ref.to_string()));
        }
        Ok(signature)
    }
}

impl std::fmt::Debug for SigningEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningEngine")
            .field("identity", &self.identity)
            .field("store", &self.store)
            .finish()
    }
}

/// `discouraged` leaves the UV flag clear.
fn user_verified(requirement: UserVerification) -> bool {
    !matches!(requirement, UserVerification::Discouraged)
}

#[cfg(all(test, feature = "software-authenticator"))]
mod tests {
    use super::*;
    use crate::codec::{AttestationEncoding, AttestationObject, AuthenticatorData};
    use crate::options::{AttestationConveyance, UserEntity};
    use crate::platform::{PromptRequest, SoftwareAuthenticator};
    use p256::ecdsa::signature::Verifier;
    use p256::ecdsa::{Signature, VerifyingKey};

    fn engine() -> (Arc<SoftwareAuthenticator>, SigningEngine) {
        let platform = Arc::new(SoftwareAuthenticator::new());
        let engine = SigningEngine::new(
            platform.clone(),
            Arc::new(CredentialStore::in_memory()),
            AppIdentity::desktop("com.example.test"),
        );
        (platform, engine)
    }

    fn registration(attestation: AttestationConveyance) -> RegistrationRequest {
        RegistrationRequest {
            rp_id: "example.com".into(),
            rp_name: None,
            user: Some(UserEntity::named("alice")),
            challenge: b"register-challenge".to_vec(),
            user_verification: UserVerification::Required,
            attestation,
            attestation_encoding: AttestationEncoding::Json,
            exclude_credentials: Vec::new(),
            prompt: PromptRequest::new("test"),
        }
    }

    fn assertion(credential: StoredCredential) -> AssertionRequest {
        AssertionRequest {
            rp_id: credential.rp_id.clone(),
            credential,
            challenge: b"assert-challenge".to_vec(),
            user_verification: UserVerification::Required,
            prompt: PromptRequest::new("test"),
        }
    }

    #[tokio::test]
    async fn test_registration_artifacts() {
        let (_, engine) = engine();
        let registration = engine
            .register(&registration(AttestationConveyance::None))
            .await
            .unwrap();
        let response = &registration.response.response;

        let auth_data = AuthenticatorData::parse(response.authenticator_data.as_bytes()).unwrap();
        assert_eq!(auth_data.rp_id_hash, codec::sha256(b"example.com"));
        assert_eq!(auth_data.sign_count, 0);
        assert!(auth_data.user_present());
        assert!(auth_data.user_verified());
        let attested = auth_data.attested_credential_data.unwrap();
        assert_eq!(attested.credential_id, registration.response.raw_id.as_bytes());

        let client_data = ClientData::parse(response.client_data_json.as_bytes()).unwrap();
        assert_eq!(client_data.ceremony, CeremonyType::Create);
        assert_eq!(client_data.origin, "app:com.example.test");
        assert_eq!(client_data.challenge_bytes().unwrap(), b"register-challenge");

        let object = AttestationObject::decode(
            response.attestation_object.as_bytes(),
            AttestationEncoding::Json,
        )
        .unwrap();
        assert_eq!(object.statement, AttestationStatement::None);
        assert_eq!(object.auth_data, response.authenticator_data.as_bytes());

        assert_eq!(engine.store().stats().credentials, 1);
        assert_eq!(registration.credential.user_name.as_deref(), Some("alice"));
    }

    #[tokio::test]
    async fn test_packed_self_attestation_verifies() {
        let (_, engine) = engine();
        let registration = engine
            .register(&registration(AttestationConveyance::Direct))
            .await
            .unwrap();
        let response = &registration.response.response;

        let object = AttestationObject::decode(
            response.attestation_object.as_bytes(),
            AttestationEncoding::Json,
        )
        .unwrap();
        let AttestationStatement::Packed { alg, sig } = object.statement else {
            panic!("expected packed attestation");
        };
        assert_eq!(alg, -7);

        let key = VerifyingKey::from_sec1_bytes(response.public_key.as_ref().unwrap().as_bytes())
            .unwrap();
        let message =
            codec::signed_message(&object.auth_data, response.client_data_json.as_bytes());
        assert!(key.verify(&message, &Signature::from_der(&sig).unwrap()).is_ok());
    }

    #[tokio::test]
    async fn test_assertion_counter_and_signature() {
        let (_, engine) = engine();
        let registration = engine
            .register(&registration(AttestationConveyance::None))
            .await
            .unwrap();
        let public_key = registration.credential.public_key.clone().unwrap();
        let key = VerifyingKey::from_sec1_bytes(public_key.as_bytes()).unwrap();

        for expected in 0..3u32 {
            let assertion = engine
                .assert(&assertion(registration.credential.clone()))
                .await
                .unwrap();
            assert_eq!(assertion.sign_count, expected);

            let data = &assertion.response.response;
            assert_eq!(data.authenticator_data.as_bytes().len(), 37);
            let auth_data = AuthenticatorData::parse(data.authenticator_data.as_bytes()).unwrap();
            assert_eq!(auth_data.sign_count, expected);
            assert!(!auth_data.has_attested_credential_data());

            let message = codec::signed_message(
                data.authenticator_data.as_bytes(),
                data.client_data_json.as_bytes(),
            );
            let signature = Signature::from_der(data.signature.as_bytes()).unwrap();
            assert!(key.verify(&message, &signature).is_ok());
            assert_eq!(data.user_handle.as_ref().unwrap().as_bytes(), b"alice");
        }

        assert_eq!(engine.store().get_counter(&registration.credential.id), 3);
    }

    #[tokio::test]
    async fn test_signing_unavailable_fails_the_call() {
        let (platform, engine) = engine();
        let registration = engine
            .register(&registration(AttestationConveyance::None))
            .await
            .unwrap();
        platform.set_signing_available(false);

        let err = engine
            .assert(&assertion(registration.credential))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotAvailable);
        assert_eq!(err.into_auth_error().code, ErrorCode::NotAvailable);
    }

    #[tokio::test]
    async fn test_failed_registration_deletes_key() {
        let (platform, engine) = engine();
        platform.set_signing_available(false);

        let err = engine
            .register(&registration(AttestationConveyance::Direct))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotAvailable);
        assert_eq!(platform.key_count(), 0);
        assert_eq!(engine.store().stats().credentials, 0);
    }

    #[tokio::test]
    async fn test_no_exported_key_omits_attested_data() {
        let (platform, engine) = engine();
        platform.set_key_export(false);

        let registration = engine
            .register(&registration(AttestationConveyance::None))
            .await
            .unwrap();
        let response = &registration.response.response;
        let auth_data = AuthenticatorData::parse(response.authenticator_data.as_bytes()).unwrap();

        assert!(!auth_data.has_attested_credential_data());
        assert_eq!(response.authenticator_data.as_bytes().len(), 37);
        assert!(response.public_key.is_none());
    }

    #[tokio::test]
    async fn test_discouraged_clears_uv() {
        let (_, engine) = engine();
        let mut request = registration(AttestationConveyance::None);
        request.user_verification = UserVerification::Discouraged;

        let registration = engine.register(&request).await.unwrap();
        let auth_data = AuthenticatorData::parse(
            registration.response.response.authenticator_data.as_bytes(),
        )
        .unwrap();
        assert!(auth_data.user_present());
        assert!(!auth_data.user_verified());
    }

    #[tokio::test]
    async fn test_credential_ids_are_unique() {
        let (_, engine) = engine();
        let mut ids = std::collections::HashSet::new();
        for _ in 0..20 {
            let registration = engine
                .register(&registration(AttestationConveyance::None))
                .await
                .unwrap();
            let id = registration.response.id.clone();
            assert_eq!(
                codec::base64url::decode(&id).unwrap(),
                registration.response.raw_id.as_bytes()
            );
            assert!(ids.insert(id));
        }
    }
}
