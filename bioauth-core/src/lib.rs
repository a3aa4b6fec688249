//! bioauth-core - Cross-platform biometric authenticator emulation
//!
//! This crate turns a successful biometric prompt into WebAuthn-shaped
//! credentials (client data, authenticator data, attestation objects and
//! signed assertions) that a standard WebAuthn relying party can verify.
//!
//! # Features
//!
//! - One call surface over native platform authenticators and browser
//!   credential managers, selected per platform and overridable at runtime
//! - Byte-exact authenticator data and client data encoders
//! - Monotonic per-credential signature counters, optionally file-backed
//! - Failed-attempt lockout and expiring sessions with change notifications
//! - A closed error taxonomy for every platform failure
//! - A software P-256 authenticator for hosts without biometric hardware
//!   (`software-authenticator` feature, on by default)
//!
//! # Example
//!
//! ```no_run
//! use bioauth_core::{AppIdentity, AuthOptions, BiometricAuth};
//!
//! # async fn example() -> bioauth_core::Result<()> {
//! let auth = BiometricAuth::builder(AppIdentity::apple("com.example.wallet")).build()?;
//!
//! // First call registers a credential, later calls assert with it
//! let success = auth
//!     .authenticate(AuthOptions::for_rp("wallet.example.com"))
//!     .await?;
//! println!("signed in with {}", success.credential.id());
//!
//! auth.logout();
//! # Ok(())
//! # }
//! ```

pub mod adapter;
pub mod auth;
pub mod clock;
pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod identity;
pub mod lockout;
pub mod normalize;
pub mod observer;
pub mod options;
pub mod platform;
pub mod session;
pub mod store;
pub mod types;

// Re-export main types for convenience
pub use adapter::{AuthenticatorAdapter, Platform, WebCredentials};
pub use auth::{BiometricAuth, BiometricAuthBuilder};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::AuthConfig;
pub use error::{AuthError, Error, ErrorCode, Result};
pub use identity::{AppIdentity, DeviceProfile};
pub use observer::{AuthState, Observer, Subscription};
pub use options::{AttestationConveyance, AuthOptions, UserEntity, UserVerification};
pub use platform::{
    Availability, BiometryKind, KeyRef, PlatformAuthenticator, PlatformError, PromptRequest,
};
pub use session::{Session, SessionKind};
pub use store::{CredentialStore, StoredCredential};
pub use types::{AuthResult, AuthSuccess, CredentialResponse};

#[cfg(feature = "software-authenticator")]
pub use platform::{PromptOutcome, SoftwareAuthenticator};
