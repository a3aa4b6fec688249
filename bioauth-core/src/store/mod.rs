//! Credential and sign-counter storage
//!
//! Provides storage for:
//! - **Credentials**: identifiers, relying-party scope, user handle and the
//!   platform key reference (never raw key material)
//! - **Sign counters**: per-credential monotonic counters used for replay
//!   detection by verifiers
//!
//! Credentials are listed per relying party in insertion order, so two relying
//! parties never share a fallback credential set. With a file backend the
//! whole store is persisted after every mutation and counters survive process
//! restarts; the in-memory backend loses everything on drop.

mod file;

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::codec::Base64Url;
use crate::platform::KeyRef;
use file::{FileSnapshot, StoreSnapshot};

/// Storage errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Credential already exists: {0}")]
    DuplicateCredential(String),

    #[error("Sign counter exhausted for credential {0}")]
    CounterExhausted(String),
}

/// A registered credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredCredential {
    /// base64url of `raw_id`
    pub id: String,
    pub raw_id: Base64Url,
    pub rp_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_handle: Option<Base64Url>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    /// Handle into platform secure storage.
    pub key_ref: KeyRef,
    /// SEC1 public key, when the platform exported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_key: Option<Base64Url>,
    pub created_at: DateTime<Utc>,
}

/// Relying-party scope, optionally narrowed to one user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialScope {
    pub rp_id: String,
    pub user_handle: Option<Vec<u8>>,
}

impl CredentialScope {
    pub fn relying_party(rp_id: impl Into<String>) -> Self {
        Self {
            rp_id: rp_id.into(),
            user_handle: None,
        }
    }

    pub fn with_user(mut self, user_handle: Vec<u8>) -> Self {
        self.user_handle = Some(user_handle);
        self
    }

    fn contains(&self, credential: &StoredCredential) -> bool {
        credential.rp_id == self.rp_id
            && match &self.user_handle {
                Some(handle) => credential
                    .user_handle
                    .as_ref()
                    .is_some_and(|h| h.as_bytes() == handle.as_slice()),
                None => true,
            }
    }
}

/// Storage backend
enum StoreBackend {
    /// In-memory only (tests, ephemeral hosts)
    Memory,
    /// JSON snapshot file, rewritten atomically after each mutation
    File(FileSnapshot),
}

/// Thread-safe credential and counter store
pub struct CredentialStore {
    /// Registered credentials (credential_id -> credential)
    credentials: DashMap<String, StoredCredential>,
    /// Credential ids per relying party, in insertion order
    scopes: DashMap<String, Vec<String>>,
    /// Sign counters (credential_id -> next value to embed)
    counters: DashMap<String, u32>,
    backend: StoreBackend,
}

impl CredentialStore {
    /// Create an in-memory store
    pub fn in_memory() -> Self {
        Self {
            credentials: DashMap::new(),
            scopes: DashMap::new(),
            counters: DashMap::new(),
            backend: StoreBackend::Memory,
        }
    }

    /// Open (or create) a store persisted at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let file = FileSnapshot::new(path.as_ref());
        let snapshot = file.load()?;

        let store = Self {
            credentials: DashMap::new(),
            scopes: DashMap::new(),
            counters: DashMap::new(),
            backend: StoreBackend::File(file),
        };

        if let Some(snapshot) = snapshot {
            store.restore(&snapshot);
            tracing::info!(
                credentials = store.credentials.len(),
                "Loaded persisted credential store"
            );
        }

        Ok(store)
    }

    /// Check if using persistent storage
    pub fn is_persistent(&self) -> bool {
        matches!(self.backend, StoreBackend::File(_))
    }

    /// Path of the backing file, if any
    pub fn path(&self) -> Option<&PathBuf> {
        match &self.backend {
            StoreBackend::File(file) => Some(file.path()),
            StoreBackend::Memory => None,
        }
    }

    /// Store a newly registered credential
    pub fn insert(&self, credential: StoredCredential) -> Result<(), StoreError> {
        if self.credentials.contains_key(&credential.id) {
            return Err(StoreError::DuplicateCredential(credential.id));
        }

        let id = credential.id.clone();
        let rp_id = credential.rp_id.clone();
        self.scopes.entry(rp_id.clone()).or_default().push(id.clone());
        let fresh_counter = !self.counters.contains_key(&id);
        self.counters.entry(id.clone()).or_insert(0);
        self.credentials.insert(id.clone(), credential);

        self.commit(|| {
            self.credentials.remove(&id);
            if let Some(mut ids) = self.scopes.get_mut(&rp_id) {
                ids.retain(|existing| existing != &id);
            }
            self.scopes.retain(|_, ids| !ids.is_empty());
            if fresh_counter {
                self.counters.remove(&id);
            }
        })
    }

    /// Get a credential by ID
    pub fn get(&self, credential_id: &str) -> Option<StoredCredential> {
        self.credentials
            .get(credential_id)
            .map(|entry| entry.value().clone())
    }

    /// Credential identifiers in `scope`, in insertion order
    pub fn list_credentials(&self, scope: &CredentialScope) -> Vec<String> {
        self.credentials_in(scope)
            .into_iter()
            .map(|credential| credential.id)
            .collect()
    }

    /// Credentials in `scope`, in insertion order
    pub fn credentials_in(&self, scope: &CredentialScope) -> Vec<StoredCredential> {
        let Some(ids) = self.scopes.get(&scope.rp_id).map(|ids| ids.value().clone()) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| self.get(id))
            .filter(|credential| scope.contains(credential))
            .collect()
    }

    /// Every credential, grouped by relying party
    pub fn all_credentials(&self) -> Vec<StoredCredential> {
        self.snapshot().credentials
    }

    /// Current counter value (0 for unknown credentials)
    pub fn get_counter(&self, credential_id: &str) -> u32 {
        self.counters
            .get(credential_id)
            .map(|count| *count)
            .unwrap_or(0)
    }

    /// Atomically increment the counter and return the pre-increment value.
    ///
    /// The returned value is what gets embedded in authenticator data; two
    /// calls never observe the same value.
    pub fn increment_and_get(&self, credential_id: &str) -> Result<u32, StoreError> {
        let previous = {
            let mut entry = self.counters.entry(credential_id.to_string()).or_insert(0);
            let previous = *entry;
            *entry = previous
                .checked_add(1)
                .ok_or_else(|| StoreError::CounterExhausted(credential_id.to_string()))?;
            previous
        };

        self.persist()?;
        Ok(previous)
    }

    /// Remove a single credential and its counter
    pub fn remove(&self, credential_id: &str) -> Result<Option<StoredCredential>, StoreError> {
        let Some((_, credential)) = self.credentials.remove(credential_id) else {
            return Ok(None);
        };
        let position = self.scopes.get_mut(&credential.rp_id).and_then(|mut ids| {
            let position = ids.iter().position(|id| id == credential_id)?;
            ids.remove(position);
            Some(position)
        });
        self.scopes.retain(|_, ids| !ids.is_empty());
        let counter = self.counters.remove(credential_id).map(|(_, count)| count);

        self.commit(|| {
            {
                let mut ids = self.scopes.entry(credential.rp_id.clone()).or_default();
                let position = position.unwrap_or(ids.len()).min(ids.len());
                ids.insert(position, credential_id.to_string());
            }
            if let Some(count) = counter {
                self.counters.insert(credential_id.to_string(), count);
            }
            self.credentials
                .insert(credential_id.to_string(), credential.clone());
        })?;
        Ok(Some(credential))
    }

    /// Remove every credential and counter, returning what was removed
    pub fn clear(&self) -> Result<Vec<StoredCredential>, StoreError> {
        let removed = self.snapshot();
        self.credentials.clear();
        self.scopes.clear();
        self.counters.clear();
        self.commit(|| self.restore(&removed))?;
        Ok(removed.credentials)
    }

    /// Get storage statistics
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            credentials: self.credentials.len(),
            relying_parties: self.scopes.len(),
            persistent: self.is_persistent(),
        }
    }

    fn snapshot(&self) -> StoreSnapshot {
        let mut rp_ids: Vec<String> = self.scopes.iter().map(|e| e.key().clone()).collect();
        rp_ids.sort();

        let credentials = rp_ids
            .iter()
            .flat_map(|rp_id| self.credentials_in(&CredentialScope::relying_party(rp_id.clone())))
            .collect();
        let counters = self
            .counters
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();

        StoreSnapshot::new(credentials, counters)
    }

    /// Load `snapshot` into the in-memory maps, keeping per-RP order.
    fn restore(&self, snapshot: &StoreSnapshot) {
        for credential in &snapshot.credentials {
            self.scopes
                .entry(credential.rp_id.clone())
                .or_default()
                .push(credential.id.clone());
            self.credentials
                .insert(credential.id.clone(), credential.clone());
        }
        for (id, count) in &snapshot.counters {
            self.counters.insert(id.clone(), *count);
        }
    }

    /// Persist a mutation, undoing it in memory if the write fails.
    fn commit(&self, rollback: impl FnOnce()) -> Result<(), StoreError> {
        match self.persist() {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!(error = %e, "Store write failed, mutation rolled back");
                rollback();
                Err(e)
            }
        }
    }

    fn persist(&self) -> Result<(), StoreError> {
        match &self.backend {
            StoreBackend::Memory => Ok(()),
            StoreBackend::File(file) => file.write_with(|| self.snapshot()),
        }
    }
}

/// Storage statistics for monitoring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreStats {
    pub credentials: usize,
    pub relying_parties: usize,
    pub persistent: bool,
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backend = match &self.backend {
            StoreBackend::File(_) => "File",
            StoreBackend::Memory => "Memory",
        };
        f.debug_struct("CredentialStore")
            .field("backend", &backend)
            .field("credentials", &self.credentials.len())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn credential(id: &str, rp_id: &str, user: Option<&[u8]>) -> StoredCredential {
        StoredCredential {
            id: id.to_string(),
            raw_id: Base64Url(id.as_bytes().to_vec()),
            rp_id: rp_id.to_string(),
            user_handle: user.map(Base64Url::from),
            user_name: None,
            key_ref: KeyRef::for_credential(id),
            public_key: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_in_memory_storage() {
        let store = CredentialStore::in_memory();
        assert!(!store.is_persistent());
        assert_eq!(
            store.stats(),
            StoreStats {
                credentials: 0,
                relying_parties: 0,
                persistent: false
            }
        );
    }

    #[test]
    fn test_list_preserves_insertion_order() {
        let store = CredentialStore::in_memory();
        for id in ["c", "a", "b"] {
            store.insert(credential(id, "example.com", None)).unwrap();
        }
        assert_eq!(
            store.list_credentials(&CredentialScope::relying_party("example.com")),
            vec!["c", "a", "b"]
        );
    }

    #[test]
    fn test_relying_parties_do_not_share_credentials() {
        let store = CredentialStore::in_memory();
        store.insert(credential("one", "a.example", None)).unwrap();
        store.insert(credential("two", "b.example", None)).unwrap();

        assert_eq!(
            store.list_credentials(&CredentialScope::relying_party("a.example")),
            vec!["one"]
        );
        assert!(store
            .list_credentials(&CredentialScope::relying_party("c.example"))
            .is_empty());
    }

    #[test]
    fn test_user_scope_filters() {
        let store = CredentialStore::in_memory();
        store
            .insert(credential("alice-key", "rp", Some(b"alice")))
            .unwrap();
        store.insert(credential("bob-key", "rp", Some(b"bob"))).unwrap();

        let scope = CredentialScope::relying_party("rp").with_user(b"bob".to_vec());
        assert_eq!(store.list_credentials(&scope), vec!["bob-key"]);
    }

    #[test]
    fn test_increment_returns_pre_increment_value() {
        let store = CredentialStore::in_memory();
        store.insert(credential("cred", "rp", None)).unwrap();

        assert_eq!(store.get_counter("cred"), 0);
        assert_eq!(store.increment_and_get("cred").unwrap(), 0);
        assert_eq!(store.increment_and_get("cred").unwrap(), 1);
        assert_eq!(store.get_counter("cred"), 2);
    }

    #[test]
    fn test_counter_exhaustion_is_an_error() {
        let store = CredentialStore::in_memory();
        store.counters.insert("cred".into(), u32::MAX);
        assert_eq!(
            store.increment_and_get("cred"),
            Err(StoreError::CounterExhausted("cred".into()))
        );
        assert_eq!(store.get_counter("cred"), u32::MAX);
    }

    #[test]
    fn test_concurrent_increments_never_repeat() {
        let store = std::sync::Arc::new(CredentialStore::in_memory());
        store.insert(credential("cred", "rp", None)).unwrap();

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    (0..100)
                        .map(|_| store.increment_and_get("cred").unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen: Vec<u32> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 800);
        assert_eq!(store.get_counter("cred"), 800);
    }

    #[test]
    fn test_duplicate_insert_rejected() {
        let store = CredentialStore::in_memory();
        store.insert(credential("cred", "rp", None)).unwrap();
        assert_eq!(
            store.insert(credential("cred", "rp", None)),
            Err(StoreError::DuplicateCredential("cred".into()))
        );
    }

    #[test]
    fn test_remove_and_clear() {
        let store = CredentialStore::in_memory();
        store.insert(credential("a", "rp", None)).unwrap();
        store.insert(credential("b", "rp", None)).unwrap();
        store.increment_and_get("a").unwrap();

        let removed = store.remove("a").unwrap().unwrap();
        assert_eq!(removed.id, "a");
        assert_eq!(store.get_counter("a"), 0);
        assert!(store.remove("a").unwrap().is_none());

        let cleared = store.clear().unwrap();
        assert_eq!(cleared.len(), 1);
        assert_eq!(store.stats().credentials, 0);
        assert_eq!(store.stats().relying_parties, 0);
    }
}
