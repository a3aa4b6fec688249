//! Caller-facing authenticator.
//!
//! [`BiometricAuth`] owns the process-wide state (credential store, lockout
//! accountant, session manager, adapter registry) and runs each call through
//! the same pipeline:
//!
//! 1. resolve the adapter for the current platform (cached)
//! 2. decide between registration and assertion from the credential store
//! 3. reject early while a lockout window is open, before any prompt
//! 4. run the adapter
//! 5. on success reset lockout and issue a session; on failure count only
//!    genuine verification failures toward lockout
//!
//! Construct it once at startup with [`BiometricAuth::builder`] and share it.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use tracing::instrument;

use crate::adapter::{
    AdapterRegistry, AdapterSuccess, AuthenticatorAdapter, EmulatedAdapter, Platform,
    WebCredentialAdapter, WebCredentials,
};
use crate::clock::{Clock, SystemClock};
use crate::config::{AuthConfig, ConfigError};
use crate::engine::SigningEngine;
use crate::error::{AuthError, Result};
use crate::identity::{AppIdentity, DeviceProfile};
use crate::lockout::{LockoutAccountant, LockoutPolicy};
use crate::observer::{AuthState, Observer, Observers, Subscription};
use crate::options::{AssertionRequest, AuthOptions, RegistrationRequest};
use crate::platform::{Availability, BiometryKind, PlatformAuthenticator, UnavailableReason};
use crate::session::{SessionKind, SessionManager};
use crate::store::{CredentialScope, CredentialStore, StoredCredential};
use crate::types::AuthSuccess;

/// Native platforms served by the platform authenticator.
const NATIVE_PLATFORMS: [Platform; 5] = [
    Platform::Ios,
    Platform::Android,
    Platform::MacOs,
    Platform::Windows,
    Platform::Linux,
];

/// Which ceremony a call runs.
#[derive(Debug)]
enum Route {
    Register,
    Assert(StoredCredential),
}

/// Builder for [`BiometricAuth`].
pub struct BiometricAuthBuilder {
    identity: AppIdentity,
    config: AuthConfig,
    clock: Arc<dyn Clock>,
    store: Option<Arc<CredentialStore>>,
    platform_authenticator: Option<Arc<dyn PlatformAuthenticator>>,
    web_credentials: Option<Arc<dyn WebCredentials>>,
    fallback_adapter: Option<Arc<dyn AuthenticatorAdapter>>,
    platform: Platform,
    device_profile: Option<DeviceProfile>,
}

impl BiometricAuthBuilder {
    fn new(identity: AppIdentity) -> Self {
        Self {
            identity,
            config: AuthConfig::default(),
            clock: Arc::new(SystemClock),
            store: None,
            platform_authenticator: None,
            web_credentials: None,
            fallback_adapter: None,
            platform: Platform::current(),
            device_profile: None,
        }
    }

    pub fn config(mut self, config: AuthConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Credential store (default: in-memory).
    pub fn store(mut self, store: Arc<CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Platform authenticator for native platforms (default: the software
    /// authenticator, when that feature is enabled).
    pub fn platform_authenticator(mut self, platform: Arc<dyn PlatformAuthenticator>) -> Self {
        self.platform_authenticator = Some(platform);
        self
    }

    /// Browser credential manager for [`Platform::Web`].
    pub fn web_credentials(mut self, credentials: Arc<dyn WebCredentials>) -> Self {
        self.web_credentials = Some(credentials);
        self
    }

    /// Adapter for platforms with no built-in or custom adapter.
    pub fn fallback_adapter(mut self, adapter: Arc<dyn AuthenticatorAdapter>) -> Self {
        self.fallback_adapter = Some(adapter);
        self
    }

    /// Override platform detection.
    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Attach an advisory device fingerprint to responses.
    pub fn device_profile(mut self, profile: DeviceProfile) -> Self {
        self.device_profile = Some(profile);
        self
    }

    pub fn build(self) -> Result<BiometricAuth> {
        self.config.validate()?;

        let store = self
            .store
            .unwrap_or_else(|| Arc::new(CredentialStore::in_memory()));
        let lockout = Arc::new(LockoutAccountant::new(self.clock.clone()));
        let sessions = SessionManager::new(self.clock.clone(), lockout.clone(), Observers::new());

        let mut adapters = AdapterRegistry::new(self.platform);

        let platform_authenticator = self.platform_authenticator.or_else(default_platform_authenticator);
        if let Some(platform_authenticator) = platform_authenticator {
            let mut engine = SigningEngine::new(
                platform_authenticator.clone(),
                store.clone(),
                self.identity.clone(),
            );
            if let Some(profile) = &self.device_profile {
                engine = engine.with_device_fingerprint(profile.fingerprint());
            }
            let native: Arc<dyn AuthenticatorAdapter> = Arc::new(EmulatedAdapter::new(
                "platform",
                platform_authenticator,
                Arc::new(engine),
            ));
            for platform in NATIVE_PLATFORMS {
                adapters = adapters.with_builtin(platform, native.clone());
            }
        }

        if let Some(web_credentials) = self.web_credentials {
            adapters = adapters.with_builtin(
                Platform::Web,
                Arc::new(WebCredentialAdapter::new(web_credentials, store.clone())),
            );
        }

        if let Some(fallback) = self.fallback_adapter {
            adapters = adapters.with_fallback(fallback);
        }

        tracing::info!(
            platform = %self.platform,
            persistent_store = store.is_persistent(),
            "Biometric authenticator initialized"
        );

        Ok(BiometricAuth {
            config: RwLock::new(self.config),
            identity: self.identity,
            store,
            lockout,
            sessions,
            adapters,
        })
    }
}

#[cfg(feature = "software-authenticator")]
fn default_platform_authenticator() -> Option<Arc<dyn PlatformAuthenticator>> {
    Some(Arc::new(crate::platform::SoftwareAuthenticator::new()))
}

#[cfg(not(feature = "software-authenticator"))]
fn default_platform_authenticator() -> Option<Arc<dyn PlatformAuthenticator>> {
    None
}

/// Biometric authenticator facade.
pub struct BiometricAuth {
    config: RwLock<AuthConfig>,
    identity: AppIdentity,
    store: Arc<CredentialStore>,
    lockout: Arc<LockoutAccountant>,
    sessions: SessionManager,
    adapters: AdapterRegistry,
}

impl BiometricAuth {
    pub fn builder(identity: AppIdentity) -> BiometricAuthBuilder {
        BiometricAuthBuilder::new(identity)
    }

    /// Current configuration.
    pub fn config(&self) -> AuthConfig {
        self.config
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Replace the configuration. Existing sessions keep their expiry.
    pub fn configure(&self, config: AuthConfig) -> std::result::Result<(), ConfigError> {
        config.validate()?;
        tracing::info!(
            session_duration_secs = config.session_duration_secs,
            max_attempts = config.max_attempts,
            lockout_duration_secs = config.lockout_duration_secs,
            allow_device_credential = config.allow_device_credential,
            "Configuration updated"
        );
        *self.config.write().unwrap_or_else(|e| e.into_inner()) = config;
        Ok(())
    }

    /// Merge a partial JSON document over the current configuration.
    pub fn configure_from_json(&self, json: &str) -> std::result::Result<AuthConfig, ConfigError> {
        let merged = self.config().merged_with_json(json)?;
        self.configure(merged.clone())?;
        Ok(merged)
    }

    pub fn identity(&self) -> &AppIdentity {
        &self.identity
    }

    pub fn store(&self) -> &Arc<CredentialStore> {
        &self.store
    }

    /// Register a custom adapter; it wins over the built-in for `platform`.
    pub fn register_adapter(&self, platform: Platform, adapter: Arc<dyn AuthenticatorAdapter>) {
        self.adapters.register(platform, adapter);
    }

    pub async fn is_available(&self) -> Availability {
        let adapter = match self.adapters.resolve() {
            Ok(adapter) => adapter,
            Err(e) => return Availability::unavailable(UnavailableReason::NotSupported, e.message),
        };
        match adapter.is_available().await {
            Ok(availability) => availability,
            Err(e) => Availability::unavailable(UnavailableReason::Unknown, e.message),
        }
    }

    /// Supported modalities. Device credentials are omitted when the
    /// configuration disallows them.
    pub async fn supported_biometrics(&self) -> std::result::Result<Vec<BiometryKind>, AuthError> {
        let allow_device_credential = self.config().allow_device_credential;
        let kinds = self.adapters.resolve()?.supported_biometrics().await?;
        Ok(kinds
            .into_iter()
            .filter(|kind| allow_device_credential || !kind.is_device_credential())
            .collect())
    }

    /// Authenticate, registering a credential first if none exists and the
    /// options allow it.
    #[instrument(skip(self, options), fields(rp_id = tracing::field::Empty))]
    pub async fn authenticate(&self, options: AuthOptions) -> std::result::Result<AuthSuccess, AuthError> {
        self.run(options, false).await
    }

    /// Create a new credential.
    #[instrument(skip(self, options), fields(rp_id = tracing::field::Empty))]
    pub async fn register(&self, options: AuthOptions) -> std::result::Result<AuthSuccess, AuthError> {
        self.run(options, true).await
    }

    /// Delete every platform key, then the stored credentials, then log out.
    /// Records are kept when key deletion fails.
    #[instrument(skip(self))]
    pub async fn delete_credentials(&self) -> std::result::Result<(), AuthError> {
        let adapter = self.adapters.resolve()?;
        adapter.delete_credentials(&self.store.all_credentials()).await?;
        let removed = self
            .store
            .clear()
            .map_err(|e| crate::error::Error::from(e).into_auth_error())?;

        tracing::info!(count = removed.len(), "Credentials deleted");
        self.sessions.logout();
        Ok(())
    }

    /// End the current session. Safe to call repeatedly.
    pub fn logout(&self) -> bool {
        self.sessions.logout()
    }

    pub fn is_authenticated(&self) -> bool {
        self.sessions.is_authenticated()
    }

    pub fn state(&self) -> AuthState {
        self.sessions.state()
    }

    pub fn subscribe(&self, observer: Observer) -> Subscription {
        self.sessions.subscribe(observer)
    }

    async fn run(
        &self,
        options: AuthOptions,
        force_registration: bool,
    ) -> std::result::Result<AuthSuccess, AuthError> {
        let config = self.config();
        let rp_id = options
            .rp_id
            .clone()
            .unwrap_or_else(|| self.identity.default_rp_id());
        tracing::Span::current().record("rp_id", rp_id.as_str());

        let effective = AuthConfig {
            session_duration_secs: options
                .session_duration_secs
                .unwrap_or(config.session_duration_secs),
            max_attempts: options.max_attempts.unwrap_or(config.max_attempts),
            lockout_duration_secs: options
                .lockout_duration_secs
                .unwrap_or(config.lockout_duration_secs),
            ..config
        };
        let policy = LockoutPolicy::new(effective.max_attempts, effective.lockout_duration_secs);
        let session_duration = Duration::from_secs(effective.session_duration_secs);

        let result = match effective.validate() {
            Ok(()) => {
                self.dispatch(&options, &effective, &rp_id, force_registration)
                    .await
            }
            Err(e) => Err(AuthError::invalid_context(format!("Invalid call options: {e}"))),
        };

        match result {
            Ok((kind, success)) => {
                self.lockout.record_success();
                let session = self.sessions.issue(
                    kind,
                    success.biometry,
                    Some(success.credential_id.clone()),
                    session_duration,
                );
                tracing::info!(
                    credential_id = %success.credential_id,
                    kind = ?kind,
                    "Authentication succeeded"
                );
                Ok(AuthSuccess {
                    session,
                    credential: success.credential,
                    biometry: success.biometry,
                })
            }
            Err(error) => {
                if error.code.counts_toward_lockout() {
                    self.lockout.record_failure(&policy);
                }
                tracing::warn!(code = %error.code, message = %error.message, "Authentication failed");
                self.sessions.record_failure(error.clone());
                Err(error)
            }
        }
    }

    async fn dispatch(
        &self,
        options: &AuthOptions,
        config: &AuthConfig,
        rp_id: &str,
        force_registration: bool,
    ) -> std::result::Result<(SessionKind, AdapterSuccess), AuthError> {
        let adapter = self.adapters.resolve()?;
        let route = self.route(options, rp_id, force_registration)?;

        self.lockout.check()?;

        let prompt = options.prompt_request(config.allow_device_credential);
        let challenge = options.challenge_bytes();

        match route {
            Route::Register => {
                let request = RegistrationRequest {
                    rp_id: rp_id.to_string(),
                    rp_name: options.rp_name.clone(),
                    user: options.user.clone(),
                    challenge,
                    user_verification: options.user_verification,
                    attestation: options.attestation,
                    attestation_encoding: config.attestation_encoding,
                    exclude_credentials: options.exclude_credentials.clone(),
                    prompt,
                };
                let success = adapter.register(&request).await?;
                Ok((SessionKind::Registration, success))
            }
            Route::Assert(credential) => {
                let request = AssertionRequest {
                    rp_id: rp_id.to_string(),
                    credential,
                    challenge,
                    user_verification: options.user_verification,
                    prompt,
                };
                let success = adapter.authenticate(&request).await?;
                Ok((SessionKind::Authentication, success))
            }
        }
    }

    /// Decide between registration and assertion for `rp_id`.
    fn route(
        &self,
        options: &AuthOptions,
        rp_id: &str,
        force_registration: bool,
    ) -> std::result::Result<Route, AuthError> {
        let mut scope = CredentialScope::relying_party(rp_id);
        if let Some(user) = &options.user {
            scope = scope.with_user(user.handle());
        }
        let credentials = self.store.credentials_in(&scope);

        if force_registration {
            if let Some(excluded) = credentials
                .iter()
                .find(|c| options.exclude_credentials.contains(&c.id))
            {
                return Err(AuthError::invalid_context(format!(
                    "Credential {} is already registered",
                    excluded.id
                )));
            }
            return Ok(Route::Register);
        }

        let candidate = if options.allow_credentials.is_empty() {
            credentials.into_iter().next()
        } else {
            credentials
                .into_iter()
                .find(|c| options.allow_credentials.contains(&c.id))
        };
        if let Some(credential) = candidate {
            return Ok(Route::Assert(credential));
        }

        if options.requires_assertion() {
            return Err(AuthError::not_enrolled(format!(
                "No matching credentials for {rp_id}"
            )));
        }

        tracing::debug!(
            persist_credential = options.persist_credential,
            "No credentials, registering"
        );
        Ok(Route::Register)
    }
}

impl std::fmt::Debug for BiometricAuth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BiometricAuth")
            .field("identity", &self.identity)
            .field("adapters", &self.adapters)
            .field("store", &self.store)
            .finish()
    }
}

#[cfg(all(test, feature = "software-authenticator"))]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::ErrorCode;
    use crate::options::UserEntity;
    use crate::platform::{PromptOutcome, SoftwareAuthenticator};
    use crate::types::CredentialResponse;
    use async_trait::async_trait;

    /// Adapter that reports availability but cannot touch keys.
    struct LockedKeystore;

    #[async_trait]
    impl AuthenticatorAdapter for LockedKeystore {
        fn name(&self) -> &str {
            "locked"
        }

        async fn is_available(&self) -> std::result::Result<Availability, AuthError> {
            Ok(Availability::available())
        }

        async fn supported_biometrics(&self) -> std::result::Result<Vec<BiometryKind>, AuthError> {
            Ok(vec![BiometryKind::FaceAuthentication])
        }

        async fn register(
            &self,
            _: &RegistrationRequest,
        ) -> std::result::Result<AdapterSuccess, AuthError> {
            Err(AuthError::new(ErrorCode::NotAvailable, "Keystore locked"))
        }

        async fn authenticate(
            &self,
            _: &AssertionRequest,
        ) -> std::result::Result<AdapterSuccess, AuthError> {
            Err(AuthError::new(ErrorCode::NotAvailable, "Keystore locked"))
        }

        async fn delete_credentials(
            &self,
            _: &[StoredCredential],
        ) -> std::result::Result<(), AuthError> {
            Err(AuthError::new(ErrorCode::NotAvailable, "Keystore locked"))
        }
    }

    fn setup() -> (Arc<SoftwareAuthenticator>, Arc<ManualClock>, BiometricAuth) {
        let platform = Arc::new(SoftwareAuthenticator::new());
        let clock = Arc::new(ManualClock::default());
        let auth = BiometricAuth::builder(AppIdentity::desktop("com.example.test"))
            .platform(Platform::Linux)
            .platform_authenticator(platform.clone())
            .clock(clock.clone())
            .build()
            .unwrap();
        (platform, clock, auth)
    }

    #[tokio::test]
    async fn test_first_call_registers_then_asserts() {
        let (_, _, auth) = setup();

        let first = auth.authenticate(AuthOptions::for_rp("app.example")).await.unwrap();
        assert!(first.credential.is_registration());

        let second = auth.authenticate(AuthOptions::for_rp("app.example")).await.unwrap();
        assert!(matches!(second.credential, CredentialResponse::Assertion(_)));
        assert_eq!(second.credential.id(), first.credential.id());
        assert!(auth.is_authenticated());
    }

    #[tokio::test]
    async fn test_assertion_only_without_credentials() {
        let (platform, _, auth) = setup();
        let options = AuthOptions {
            assertion_only: true,
            ..AuthOptions::for_rp("app.example")
        };

        let err = auth.authenticate(options).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NotEnrolled);
        assert_eq!(platform.prompt_count(), 0);
        assert_eq!(auth.state().failed_attempts, 0);
    }

    #[tokio::test]
    async fn test_allow_list_selects_credential() {
        let (_, _, auth) = setup();
        let first = auth.register(AuthOptions::for_rp("rp")).await.unwrap();
        let second = auth.register(AuthOptions::for_rp("rp")).await.unwrap();

        let options = AuthOptions {
            allow_credentials: vec![second.credential.id().to_string()],
            ..AuthOptions::for_rp("rp")
        };
        let assertion = auth.authenticate(options).await.unwrap();
        assert_eq!(assertion.credential.id(), second.credential.id());
        assert_ne!(assertion.credential.id(), first.credential.id());

        let options = AuthOptions {
            allow_credentials: vec!["unknown".into()],
            ..AuthOptions::for_rp("rp")
        };
        assert_eq!(
            auth.authenticate(options).await.unwrap_err().code,
            ErrorCode::NotEnrolled
        );
    }

    #[tokio::test]
    async fn test_exclude_list_blocks_registration() {
        let (platform, _, auth) = setup();
        let existing = auth.register(AuthOptions::for_rp("rp")).await.unwrap();
        let prompts = platform.prompt_count();

        let options = AuthOptions {
            exclude_credentials: vec![existing.credential.id().to_string()],
            ..AuthOptions::for_rp("rp")
        };
        let err = auth.register(options).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidContext);
        assert_eq!(platform.prompt_count(), prompts);
    }

    #[tokio::test]
    async fn test_cancellation_does_not_count() {
        let (platform, _, auth) = setup();
        for _ in 0..5 {
            platform.push_outcome(PromptOutcome::cancelled());
            platform.push_outcome(PromptOutcome::fail(ErrorCode::SystemCancelled));
        }

        for _ in 0..10 {
            let err = auth.authenticate(AuthOptions::for_rp("rp")).await.unwrap_err();
            assert!(err.code.is_cancellation());
        }
        let state = auth.state();
        assert_eq!(state.failed_attempts, 0);
        assert!(state.locked_until.is_none());
        assert!(!state.authenticated);
    }

    #[tokio::test]
    async fn test_per_call_lockout_override() {
        let (platform, clock, auth) = setup();
        platform.push_outcome(PromptOutcome::not_recognized());

        let options = AuthOptions {
            max_attempts: Some(1),
            lockout_duration_secs: Some(5),
            ..AuthOptions::for_rp("rp")
        };
        auth.authenticate(options.clone()).await.unwrap_err();

        let err = auth.authenticate(options.clone()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::LockedOut);
        assert_eq!(err.retry_after_secs, Some(5));

        clock.advance_secs(5);
        assert!(auth.authenticate(options).await.is_ok());
    }

    #[tokio::test]
    async fn test_supported_biometrics_respects_device_credential() {
        let (_, _, auth) = setup();
        assert_eq!(
            auth.supported_biometrics().await.unwrap(),
            vec![BiometryKind::Fingerprint, BiometryKind::Pin]
        );

        auth.configure_from_json(r#"{"fallbackMethods": ["biometric"]}"#)
            .unwrap();
        assert_eq!(
            auth.supported_biometrics().await.unwrap(),
            vec![BiometryKind::Fingerprint]
        );
    }

    #[tokio::test]
    async fn test_configure_rejects_invalid() {
        let (_, _, auth) = setup();
        let err = auth
            .configure(AuthConfig {
                session_duration_secs: 0,
                ..Default::default()
            })
            .unwrap_err();
        assert!(matches!(err, ConfigError::MustBePositive { .. }));
        assert_eq!(auth.config().session_duration_secs, 3600);
    }

    #[tokio::test]
    async fn test_delete_credentials_wipes_and_logs_out() {
        let (platform, _, auth) = setup();
        auth.authenticate(
            AuthOptions::for_rp("rp").with_user(UserEntity::named("alice")),
        )
        .await
        .unwrap();
        assert!(auth.is_authenticated());

        auth.delete_credentials().await.unwrap();
        assert!(!auth.is_authenticated());
        assert_eq!(auth.store().stats().credentials, 0);
        assert_eq!(platform.key_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_credentials_keeps_records_when_keys_survive() {
        let (platform, _, auth) = setup();
        auth.authenticate(AuthOptions::for_rp("rp")).await.unwrap();
        auth.register_adapter(Platform::Linux, Arc::new(LockedKeystore));

        let err = auth.delete_credentials().await.unwrap_err();
        assert_eq!(err.code, ErrorCode::NotAvailable);
        assert_eq!(auth.store().stats().credentials, 1);
        assert_eq!(platform.key_count(), 1);
        assert!(auth.is_authenticated());
    }

    #[tokio::test]
    async fn test_zero_session_override_rejected() {
        let (platform, _, auth) = setup();
        let options = AuthOptions {
            session_duration_secs: Some(0),
            ..AuthOptions::for_rp("rp")
        };

        let err = auth.authenticate(options).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidContext);
        assert!(err.message.contains("session_duration_secs"));
        assert_eq!(platform.prompt_count(), 0);
        assert!(!auth.is_authenticated());
        assert_eq!(auth.state().failed_attempts, 0);
    }

    #[tokio::test]
    async fn test_fallback_adapter_serves_unmapped_platform() {
        let auth = BiometricAuth::builder(AppIdentity::web("https://example.com").unwrap())
            .platform(Platform::Web)
            .fallback_adapter(Arc::new(LockedKeystore))
            .build()
            .unwrap();

        assert!(auth.is_available().await.available);
        assert_eq!(
            auth.supported_biometrics().await.unwrap(),
            vec![BiometryKind::FaceAuthentication]
        );
    }

    #[tokio::test]
    async fn test_unsupported_platform() {
        let auth = BiometricAuth::builder(AppIdentity::web("https://example.com").unwrap())
            .platform(Platform::Web)
            .build()
            .unwrap();

        let availability = auth.is_available().await;
        assert!(!availability.available);
        assert_eq!(availability.reason, Some(UnavailableReason::NotSupported));

        let err = auth.authenticate(AuthOptions::default()).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::PlatformNotSupported);
    }

    #[tokio::test]
    async fn test_default_rp_id_from_identity() {
        let (_, _, auth) = setup();
        auth.authenticate(AuthOptions::default()).await.unwrap();
        assert_eq!(
            auth.store()
                .list_credentials(&CredentialScope::relying_party("com.example.test"))
                .len(),
            1
        );
    }
}
