//! Authentication state observers.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::AuthError;
use crate::session::Session;

/// Snapshot delivered to observers after every state change.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthState {
    pub authenticated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<Session>,
    pub failed_attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub locked_until: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<AuthError>,
}

/// State-change callback.
pub type Observer = Arc<dyn Fn(&AuthState) + Send + Sync>;

/// Observer set. The same `Arc` registered twice is delivered to once.
#[derive(Default)]
pub struct Observers {
    entries: Mutex<Vec<(u64, Observer)>>,
    next_id: AtomicU64,
}

impl Observers {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn subscribe(self: &Arc<Self>, observer: Observer) -> Subscription {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        let existing = entries
            .iter()
            .find(|(_, registered)| same_observer(registered, &observer))
            .map(|(id, _)| *id);

        let id = match existing {
            Some(id) => id,
            None => {
                let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                entries.push((id, observer));
                id
            }
        };

        Subscription {
            id,
            registry: Arc::downgrade(self),
        }
    }

    /// Deliver `state` to every observer. The lock is released first so
    /// observers may subscribe or unsubscribe from inside the callback.
    pub fn notify(&self, state: &AuthState) {
        let observers: Vec<Observer> = self
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, observer)| observer.clone())
            .collect();

        for observer in observers {
            observer(state);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, id: u64) -> bool {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let before = entries.len();
        entries.retain(|(entry_id, _)| *entry_id != id);
        entries.len() != before
    }
}

impl std::fmt::Debug for Observers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers").field("len", &self.len()).finish()
    }
}

fn same_observer(a: &Observer, b: &Observer) -> bool {
    std::ptr::eq(
        Arc::as_ptr(a) as *const (),
        Arc::as_ptr(b) as *const (),
    )
}

/// Handle returned by `subscribe`. Dropping it keeps the observer registered.
#[derive(Debug)]
#[must_use = "keep the subscription to be able to unsubscribe"]
pub struct Subscription {
    id: u64,
    registry: Weak<Observers>,
}

impl Subscription {
    /// Stop delivery. Returns false if the observer was already removed.
    pub fn unsubscribe(self) -> bool {
        self.registry
            .upgrade()
            .map(|registry| registry.remove(self.id))
            .unwrap_or(false)
    }
}
