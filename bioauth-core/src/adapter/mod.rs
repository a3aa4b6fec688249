//! Authenticator adapters.
//!
//! An adapter turns a registration or assertion request into a credential
//! response using one platform family, and reports failures already mapped
//! onto the caller taxonomy.
//!
//! ## Adapters
//!
//! - [`EmulatedAdapter`] - native platforms: prompt through a
//!   [`PlatformAuthenticator`](crate::platform::PlatformAuthenticator), then
//!   build artifacts with the [`SigningEngine`](crate::engine::SigningEngine)
//! - [`WebCredentialAdapter`] - pass-through to a browser credential manager
//! - custom adapters registered on the [`AdapterRegistry`]

mod emulated;
mod registry;
mod web;

pub use emulated::EmulatedAdapter;
pub use registry::AdapterRegistry;
pub use web::{WebCredentialAdapter, WebCredentials};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::options::{AssertionRequest, RegistrationRequest};
use crate::platform::{Availability, BiometryKind};
use crate::store::StoredCredential;
use crate::types::CredentialResponse;

/// Platform identity used to select an adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Web,
    Ios,
    Android,
    #[serde(rename = "macos")]
    MacOs,
    Windows,
    Linux,
}

impl Platform {
    /// The platform this binary was built for.
    pub fn current() -> Self {
        if cfg!(target_arch = "wasm32") {
            Self::Web
        } else if cfg!(target_os = "ios") {
            Self::Ios
        } else if cfg!(target_os = "android") {
            Self::Android
        } else if cfg!(target_os = "macos") {
            Self::MacOs
        } else if cfg!(target_os = "windows") {
            Self::Windows
        } else {
            Self::Linux
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Web => "web",
            Self::Ios => "ios",
            Self::Android => "android",
            Self::MacOs => "macos",
            Self::Windows => "windows",
            Self::Linux => "linux",
        };
        f.write_str(name)
    }
}

/// A completed ceremony, before session issuance.
#[derive(Debug, Clone)]
pub struct AdapterSuccess {
    pub credential: CredentialResponse,
    pub credential_id: String,
    pub biometry: Option<BiometryKind>,
}

/// Capability interface every adapter implements.
///
/// Errors are returned as [`AuthError`]; implementations normalize platform
/// failures before returning.
#[async_trait]
pub trait AuthenticatorAdapter: Send + Sync {
    /// Adapter name for logging.
    fn name(&self) -> &str;

    async fn is_available(&self) -> Result<Availability, AuthError>;

    async fn supported_biometrics(&self) -> Result<Vec<BiometryKind>, AuthError>;

    /// Create a credential. The adapter records it in the credential store.
    async fn register(&self, request: &RegistrationRequest) -> Result<AdapterSuccess, AuthError>;

    /// Produce an assertion for `request.credential`.
    async fn authenticate(&self, request: &AssertionRequest) -> Result<AdapterSuccess, AuthError>;

    /// Release platform resources held for `credentials`.
    async fn delete_credentials(&self, credentials: &[StoredCredential]) -> Result<(), AuthError>;
}
