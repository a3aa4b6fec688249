//! Calling-application identity and device profile.
//!
//! The client-data origin is derived from verifiable app identity fixed at
//! construction, never from per-call options.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::codec::{base64url, sha256};
use crate::config::ConfigError;

/// Verifiable identity of the calling application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppIdentity {
    /// Android package with its signing certificate (DER).
    Android {
        package_name: String,
        signing_cert: Vec<u8>,
    },
    /// iOS/macOS bundle.
    Apple { bundle_id: String },
    /// Desktop application identifier.
    Desktop { app_id: String },
    /// Browser origin.
    Web { origin: Url },
}

impl AppIdentity {
    pub fn android(package_name: impl Into<String>, signing_cert: Vec<u8>) -> Self {
        Self::Android {
            package_name: package_name.into(),
            signing_cert,
        }
    }

    pub fn apple(bundle_id: impl Into<String>) -> Self {
        Self::Apple {
            bundle_id: bundle_id.into(),
        }
    }

    pub fn desktop(app_id: impl Into<String>) -> Self {
        Self::Desktop {
            app_id: app_id.into(),
        }
    }

    /// Parse a web origin. Opaque origins (`data:`, `file:`) are rejected.
    pub fn web(origin: &str) -> Result<Self, ConfigError> {
        let url = Url::parse(origin).map_err(|e| ConfigError::InvalidOrigin(e.to_string()))?;
        if !url.origin().is_tuple() {
            return Err(ConfigError::InvalidOrigin(format!(
                "{origin} has no tuple origin"
            )));
        }
        Ok(Self::Web { origin: url })
    }

    /// The `origin` member of client data.
    pub fn origin(&self) -> String {
        match self {
            Self::Android { signing_cert, .. } => {
                format!("android:apk-key-hash:{}", base64url::encode(&sha256(signing_cert)))
            }
            Self::Apple { bundle_id } => format!("ios:bundle-id:{bundle_id}"),
            Self::Desktop { app_id } => format!("app:{app_id}"),
            Self::Web { origin } => origin.origin().ascii_serialization(),
        }
    }

    /// Relying-party ID used when a call does not name one.
    pub fn default_rp_id(&self) -> String {
        match self {
            Self::Android { package_name, .. } => package_name.clone(),
            Self::Apple { bundle_id } => bundle_id.clone(),
            Self::Desktop { app_id } => app_id.clone(),
            Self::Web { origin } => origin.host_str().unwrap_or_default().to_string(),
        }
    }
}

/// Device attributes for the advisory fingerprint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceProfile {
    pub platform: String,
    pub model: Option<String>,
    pub os_version: Option<String>,
    pub app_id: Option<String>,
}

impl DeviceProfile {
    /// Profile of the current process: OS and architecture only.
    pub fn current() -> Self {
        Self {
            platform: std::env::consts::OS.to_string(),
            model: Some(std::env::consts::ARCH.to_string()),
            os_version: None,
            app_id: None,
        }
    }

    /// First 32 hex characters of SHA-256 over the profile JSON.
    ///
    /// Advisory only: attached to responses, never used for decisions.
    pub fn fingerprint(&self) -> String {
        let json = serde_json::to_vec(self).unwrap_or_default();
        let mut digest = hex::encode(sha256(&json));
        digest.truncate(32);
        digest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_origins() {
        assert_eq!(AppIdentity::apple("com.example.app").origin(), "ios:bundle-id:com.example.app");
        assert_eq!(AppIdentity::desktop("example").origin(), "app:example");
        assert_eq!(
            AppIdentity::web("https://example.com:443/login?x=1").unwrap().origin(),
            "https://example.com"
        );
        assert_eq!(
            AppIdentity::web("http://localhost:8080/").unwrap().origin(),
            "http://localhost:8080"
        );
    }

    #[test]
    fn test_android_origin_hashes_certificate() {
        let identity = AppIdentity::android("com.example", b"cert".to_vec());
        let expected = format!("android:apk-key-hash:{}", base64url::encode(&sha256(b"cert")));
        assert_eq!(identity.origin(), expected);
        assert!(!identity.origin().contains('='));
    }

    #[test]
    fn test_default_rp_id() {
        assert_eq!(
            AppIdentity::web("https://login.example.com").unwrap().default_rp_id(),
            "login.example.com"
        );
        assert_eq!(AppIdentity::apple("com.example.app").default_rp_id(), "com.example.app");
    }

    #[test]
    fn test_rejects_opaque_origin() {
        assert!(matches!(
            AppIdentity::web("data:text/plain,hi"),
            Err(ConfigError::InvalidOrigin(_))
        ));
        assert!(AppIdentity::web("not a url").is_err());
    }

    #[test]
    fn test_fingerprint_is_stable() {
        let profile = DeviceProfile {
            platform: "android".into(),
            model: Some("Pixel".into()),
            ..Default::default()
        };
        let fingerprint = profile.fingerprint();
        assert_eq!(fingerprint.len(), 32);
        assert_eq!(fingerprint, profile.clone().fingerprint());
        assert_ne!(fingerprint, DeviceProfile::current().fingerprint());
    }
}
