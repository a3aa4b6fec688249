//! Per-call options and the requests adapters receive.

use std::time::Duration;

use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};

use crate::codec::{AttestationEncoding, Base64Url, ChallengeInput};
use crate::platform::PromptRequest;
use crate::store::StoredCredential;

/// Length of generated challenges.
pub const GENERATED_CHALLENGE_LEN: usize = 32;

const DEFAULT_REASON: &str = "Authenticate to continue";

/// User-verification requirement.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserVerification {
    #[default]
    Required,
    Preferred,
    Discouraged,
}

/// Attestation conveyance preference.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttestationConveyance {
    #[default]
    None,
    Indirect,
    Direct,
    Enterprise,
}

impl AttestationConveyance {
    /// `direct` and `enterprise` get a packed self-attestation.
    pub fn wants_statement(self) -> bool {
        matches!(self, Self::Direct | Self::Enterprise)
    }
}

/// User account the credential is created for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserEntity {
    /// Opaque user handle. Generated from `name` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Base64Url>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl UserEntity {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            id: None,
            name: name.into(),
            display_name: None,
        }
    }

    /// The user handle, defaulting to the UTF-8 bytes of the name.
    pub fn handle(&self) -> Vec<u8> {
        self.id
            .as_ref()
            .map(|id| id.as_bytes().to_vec())
            .unwrap_or_else(|| self.name.as_bytes().to_vec())
    }
}

/// Options accepted by `authenticate` and `register`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthOptions {
    /// Prompt reason shown to the user.
    pub reason: Option<String>,
    pub title: Option<String>,
    pub subtitle: Option<String>,
    pub cancel_title: Option<String>,
    pub fallback_title: Option<String>,

    pub rp_id: Option<String>,
    pub rp_name: Option<String>,
    pub user: Option<UserEntity>,
    pub challenge: Option<ChallengeInput>,
    /// Prompt timeout in milliseconds.
    pub timeout: Option<u64>,
    pub user_verification: UserVerification,
    pub attestation: AttestationConveyance,

    /// Credential IDs (base64url) acceptable for assertion. Non-empty makes
    /// the call assertion-only.
    pub allow_credentials: Vec<String>,
    /// Credential IDs (base64url) that must not be registered again.
    pub exclude_credentials: Vec<String>,

    /// Caller asked for the credential to be kept for later assertions.
    pub persist_credential: bool,
    /// Fail with `NOT_ENROLLED` instead of bootstrapping a registration.
    pub assertion_only: bool,
    /// Biometric only, no device-credential fallback for this call.
    pub disable_fallback: bool,

    pub max_attempts: Option<u32>,
    #[serde(alias = "lockoutDuration")]
    pub lockout_duration_secs: Option<u64>,
    #[serde(alias = "sessionDuration")]
    pub session_duration_secs: Option<u64>,
}

impl AuthOptions {
    pub fn for_rp(rp_id: impl Into<String>) -> Self {
        Self {
            rp_id: Some(rp_id.into()),
            ..Default::default()
        }
    }

    pub fn with_user(mut self, user: UserEntity) -> Self {
        self.user = Some(user);
        self
    }

    pub fn with_challenge(mut self, challenge: impl Into<ChallengeInput>) -> Self {
        self.challenge = Some(challenge.into());
        self
    }

    /// Whether only an assertion may satisfy this call.
    pub fn requires_assertion(&self) -> bool {
        self.assertion_only || !self.allow_credentials.is_empty()
    }

    /// Caller challenge bytes, or fresh random bytes when none was given.
    pub fn challenge_bytes(&self) -> Vec<u8> {
        match &self.challenge {
            Some(challenge) => challenge.to_bytes(),
            None => {
                let mut challenge = vec![0u8; GENERATED_CHALLENGE_LEN];
                OsRng.fill_bytes(&mut challenge);
                challenge
            }
        }
    }

    pub fn timeout_duration(&self) -> Option<Duration> {
        self.timeout.map(Duration::from_millis)
    }

    pub fn prompt_request(&self, allow_device_credential: bool) -> PromptRequest {
        PromptRequest {
            reason: self
                .reason
                .clone()
                .unwrap_or_else(|| DEFAULT_REASON.to_string()),
            title: self.title.clone(),
            subtitle: self.subtitle.clone(),
            cancel_label: self.cancel_title.clone(),
            fallback_label: self.fallback_title.clone(),
            allow_device_credential: allow_device_credential && !self.disable_fallback,
            timeout: self.timeout_duration(),
        }
    }
}

/// A registration handed to an adapter.
#[derive(Clone)]
pub struct RegistrationRequest {
    pub rp_id: String,
    pub rp_name: Option<String>,
    pub user: Option<UserEntity>,
    pub challenge: Vec<u8>,
    pub user_verification: UserVerification,
    pub attestation: AttestationConveyance,
    pub attestation_encoding: AttestationEncoding,
    pub exclude_credentials: Vec<String>,
    pub prompt: PromptRequest,
}

/// An assertion handed to an adapter, for a credential already selected
/// from the store.
#[derive(Clone)]
pub struct AssertionRequest {
    pub rp_id: String,
    pub credential: StoredCredential,
    pub challenge: Vec<u8>,
    pub user_verification: UserVerification,
    pub prompt: PromptRequest,
}

impl std::fmt::Debug for RegistrationRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistrationRequest")
            .field("rp_id", &self.rp_id)
            .field("user", &self.user.as_ref().map(|u| &u.name))
            .field("challenge", &format_args!("[{} bytes]", self.challenge.len()))
            .field("user_verification", &self.user_verification)
            .field("attestation", &self.attestation)
            .field("exclude_credentials", &self.exclude_credentials.len())
            .finish()
    }
}

impl std::fmt::Debug for AssertionRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssertionRequest")
            .field("rp_id", &self.rp_id)
            .field("credential_id", &self.credential.id)
            .field("challenge", &format_args!("[{} bytes]", self.challenge.len()))
            .field("user_verification", &self.user_verification)
            .finish()
    }
}
