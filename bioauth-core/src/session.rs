//! Session issuance and scheduled expiry.
//!
//! At most one session and one expiry timer exist per [`SessionManager`].
//! Issuing a new session or logging out cancels the previous timer before
//! touching state. Expiry is enforced twice: a tokio timer logs out at the
//! deadline, and [`SessionManager::is_authenticated`] logs out lazily if it
//! observes an expired session first (or when no runtime was available to
//! schedule the timer).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::clock::Clock;
use crate::codec::base64url;
use crate::error::AuthError;
use crate::lockout::{duration_from_secs, LockoutAccountant};
use crate::observer::{AuthState, Observer, Observers, Subscription};
use crate::platform::BiometryKind;

/// Ceremony that produced a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionKind {
    Registration,
    Authentication,
}

/// An authenticated session.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub id: Uuid,
    /// Opaque bearer token.
    pub token: String,
    pub kind: SessionKind,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub biometry: Option<BiometryKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credential_id: Option<String>,
}

impl Session {
    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("token", &"[REDACTED]")
            .field("kind", &self.kind)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .field("biometry", &self.biometry)
            .field("credential_id", &self.credential_id)
            .finish()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TokenClaims<'a> {
    session_id: Uuid,
    credential_id: Option<&'a str>,
    #[serde(rename = "type")]
    kind: SessionKind,
    issued_at: i64,
}

fn mint_token(
    id: Uuid,
    credential_id: Option<&str>,
    kind: SessionKind,
    issued_at: DateTime<Utc>,
) -> String {
    let claims = TokenClaims {
        session_id: id,
        credential_id,
        kind,
        issued_at: issued_at.timestamp_millis(),
    };
    match serde_json::to_vec(&claims) {
        Ok(json) => base64url::encode(&json),
        // Claims are plain data; fall back to the bare session id.
        Err(_) => base64url::encode(id.as_bytes()),
    }
}

/// Handle to a scheduled expiry task.
struct ExpiryTimer {
    session_id: Uuid,
    handle: JoinHandle<()>,
}

impl ExpiryTimer {
    fn cancel(self) {
        self.handle.abort();
    }
}

/// Decrements the live-timer count when the task finishes or is aborted.
struct LiveTimer(Arc<AtomicUsize>);

impl LiveTimer {
    fn new(count: Arc<AtomicUsize>) -> Self {
        count.fetch_add(1, Ordering::SeqCst);
        Self(count)
    }
}

impl Drop for LiveTimer {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Default)]
struct SessionSlot {
    session: Option<Session>,
    timer: Option<ExpiryTimer>,
    last_error: Option<AuthError>,
}

struct SessionShared {
    clock: Arc<dyn Clock>,
    lockout: Arc<LockoutAccountant>,
    observers: Arc<Observers>,
    slot: Mutex<SessionSlot>,
    live_timers: Arc<AtomicUsize>,
}

impl SessionShared {
    fn slot(&self) -> std::sync::MutexGuard<'_, SessionSlot> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn snapshot(&self) -> AuthState {
        let now = self.clock.now();
        let lockout = self.lockout.status();
        let slot = self.slot();
        let session = slot
            .session
            .as_ref()
            .filter(|session| session.is_valid_at(now))
            .cloned();

        AuthState {
            authenticated: session.is_some(),
            session,
            failed_attempts: lockout.failed_attempts,
            locked_until: lockout.locked_until,
            last_error: slot.last_error.clone(),
        }
    }

    fn publish(&self) {
        let state = self.snapshot();
        self.observers.notify(&state);
    }

    /// Clear the session, cancelling its timer. Returns whether one existed.
    fn logout(&self) -> bool {
        let (session, timer) = {
            let mut slot = self.slot();
            (slot.session.take(), slot.timer.take())
        };
        if let Some(timer) = timer {
            timer.cancel();
        }

        match session {
            Some(session) => {
                tracing::info!(session_id = %session.id, "Session ended");
                self.publish();
                true
            }
            None => false,
        }
    }

    /// Log out only if `session_id` is still current. A session issued in
    /// the meantime keeps its state and its timer.
    fn expire(&self, session_id: Uuid) {
        let (expired, timer) = {
            let mut slot = self.slot();
            if slot.session.as_ref().map(|s| s.id) != Some(session_id) {
                return;
            }
            let timer = if slot.timer.as_ref().map(|t| t.session_id) == Some(session_id) {
                slot.timer.take()
            } else {
                None
            };
            (slot.session.take(), timer)
        };
        // From the timer task itself this is a no-op: it never yields again.
        if let Some(timer) = timer {
            timer.cancel();
        }

        if let Some(session) = expired {
            tracing::info!(session_id = %session.id, "Session expired");
            self.publish();
        }
    }
}

impl Drop for SessionShared {
    fn drop(&mut self) {
        let slot = self.slot.get_mut().unwrap_or_else(|e| e.into_inner());
        if let Some(timer) = slot.timer.take() {
            timer.cancel();
        }
    }
}

/// Issues sessions and publishes [`AuthState`] snapshots.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<SessionShared>,
}

impl SessionManager {
    pub fn new(
        clock: Arc<dyn Clock>,
        lockout: Arc<LockoutAccountant>,
        observers: Arc<Observers>,
    ) -> Self {
        Self {
            inner: Arc::new(SessionShared {
                clock,
                lockout,
                observers,
                slot: Mutex::new(SessionSlot::default()),
                live_timers: Arc::new(AtomicUsize::new(0)),
            }),
        }
    }

    /// Start a new session, replacing (and un-scheduling) any current one.
    pub fn issue(
        &self,
        kind: SessionKind,
        biometry: Option<BiometryKind>,
        credential_id: Option<String>,
        duration: Duration,
    ) -> Session {
        let now = self.inner.clock.now();
        let id = Uuid::new_v4();
        let expires_at = now
            .checked_add_signed(duration_from_secs(duration.as_secs()))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);

        let session = Session {
            id,
            token: mint_token(id, credential_id.as_deref(), kind, now),
            kind,
            created_at: now,
            expires_at,
            biometry,
            credential_id,
        };

        {
            let mut slot = self.inner.slot();
            if let Some(previous) = slot.timer.take() {
                previous.cancel();
            }
            slot.session = Some(session.clone());
            slot.last_error = None;
            slot.timer = self.schedule_expiry(id, duration);
        }

        tracing::info!(
            session_id = %id,
            kind = ?kind,
            expires_at = %expires_at,
            "Session issued"
        );
        self.inner.publish();
        session
    }

    fn schedule_expiry(&self, session_id: Uuid, duration: Duration) -> Option<ExpiryTimer> {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                tracing::warn!("No tokio runtime; session expiry will be checked lazily");
                return None;
            }
        };

        let shared: Weak<SessionShared> = Arc::downgrade(&self.inner);
        let live = LiveTimer::new(self.inner.live_timers.clone());
        let handle = runtime.spawn(async move {
            let _live = live;
            tokio::time::sleep(duration).await;
            if let Some(shared) = shared.upgrade() {
                shared.expire(session_id);
            }
        });

        Some(ExpiryTimer { session_id, handle })
    }

    /// End the current session. Safe to call repeatedly; only the call that
    /// actually clears a session notifies observers.
    pub fn logout(&self) -> bool {
        self.inner.logout()
    }

    /// True only while a session exists and has not reached its expiry.
    /// An expired session is logged out on the spot.
    pub fn is_authenticated(&self) -> bool {
        self.current_session().is_some()
    }

    /// The current session, if still valid.
    pub fn current_session(&self) -> Option<Session> {
        let now = self.inner.clock.now();
        let expired = {
            let slot = self.inner.slot();
            match &slot.session {
                Some(session) if session.is_valid_at(now) => return Some(session.clone()),
                Some(session) => Some(session.id),
                None => None,
            }
        };

        if let Some(session_id) = expired {
            self.inner.expire(session_id);
        }
        None
    }

    /// Record a failed call and notify observers.
    pub fn record_failure(&self, error: AuthError) {
        self.inner.slot().last_error = Some(error);
        self.inner.publish();
    }

    pub fn state(&self) -> AuthState {
        self.inner.snapshot()
    }

    pub fn subscribe(&self, observer: Observer) -> Subscription {
        self.inner.observers.subscribe(observer)
    }

    /// Whether an expiry timer is scheduled.
    pub fn has_pending_timer(&self) -> bool {
        self.inner.slot().timer.is_some()
    }

    /// Expiry tasks still alive (scheduled and not yet finished or reaped).
    pub fn live_timers(&self) -> usize {
        self.inner.live_timers.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let slot = self.inner.slot();
        f.debug_struct("SessionManager")
            .field("session", &slot.session)
            .field("timer_scheduled", &slot.timer.is_some())
            .finish()
    }
}
