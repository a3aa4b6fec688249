//! Adapter selection by platform identity.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::{AuthenticatorAdapter, Platform};
use crate::error::AuthError;

/// Built-in and custom adapters keyed by [`Platform`].
///
/// Resolution order for the current platform:
/// 1. a custom adapter registered for it
/// 2. the built-in adapter for it
/// 3. the fallback adapter, if one was set
///
/// The result is cached until the next registration.
pub struct AdapterRegistry {
    platform: Platform,
    builtins: HashMap<Platform, Arc<dyn AuthenticatorAdapter>>,
    fallback: Option<Arc<dyn AuthenticatorAdapter>>,
    custom: RwLock<HashMap<Platform, Arc<dyn AuthenticatorAdapter>>>,
    resolved: RwLock<Option<Arc<dyn AuthenticatorAdapter>>>,
}

impl AdapterRegistry {
    pub fn new(platform: Platform) -> Self {
        Self {
            platform,
            builtins: HashMap::new(),
            fallback: None,
            custom: RwLock::new(HashMap::new()),
            resolved: RwLock::new(None),
        }
    }

    pub fn with_builtin(mut self, platform: Platform, adapter: Arc<dyn AuthenticatorAdapter>) -> Self {
        self.builtins.insert(platform, adapter);
        self
    }

    /// Adapter used when nothing is registered for the current platform.
    pub fn with_fallback(mut self, adapter: Arc<dyn AuthenticatorAdapter>) -> Self {
        self.fallback = Some(adapter);
        self
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Register a custom adapter. It takes precedence over the built-in one
    /// for the same platform.
    pub fn register(&self, platform: Platform, adapter: Arc<dyn AuthenticatorAdapter>) {
        tracing::info!(%platform, adapter = adapter.name(), "Custom adapter registered");
        self.custom
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(platform, adapter);
        *self.resolved.write().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// The adapter for the current platform.
    pub fn resolve(&self) -> Result<Arc<dyn AuthenticatorAdapter>, AuthError> {
        if let Some(adapter) = self
            .resolved
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
        {
            return Ok(adapter.clone());
        }

        let custom = self
            .custom
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&self.platform)
            .cloned();

        let adapter = custom
            .or_else(|| self.builtins.get(&self.platform).cloned())
            .or_else(|| self.fallback.clone())
            .ok_or_else(|| {
                AuthError::platform_not_supported(format!(
                    "No authenticator adapter for {}",
                    self.platform
                ))
            })?;

        tracing::debug!(platform = %self.platform, adapter = adapter.name(), "Adapter resolved");
        *self.resolved.write().unwrap_or_else(|e| e.into_inner()) = Some(adapter.clone());
        Ok(adapter)
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("platform", &self.platform)
            .field("builtins", &self.builtins.keys().collect::<Vec<_>>())
            .field("fallback", &self.fallback.as_ref().map(|a| a.name().to_string()))
            .finish()
    }
}
