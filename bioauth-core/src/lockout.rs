//! Failed-attempt accounting and lockout windows.
//!
//! Two states: unlocked, and locked out until an instant. Reaching the
//! threshold opens a lockout window and resets the counter; any success
//! closes the window and zeroes the counter. [`LockoutAccountant::check`]
//! must run before any platform prompt is shown.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};

use crate::clock::Clock;
use crate::error::AuthError;

/// Threshold and window length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockoutPolicy {
    pub max_attempts: u32,
    pub lockout_duration: Duration,
}

impl LockoutPolicy {
    pub fn new(max_attempts: u32, lockout_duration_secs: u64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            lockout_duration: duration_from_secs(lockout_duration_secs),
        }
    }
}

/// Snapshot of lockout state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LockoutStatus {
    pub failed_attempts: u32,
    pub locked_until: Option<DateTime<Utc>>,
}

impl LockoutStatus {
    pub fn is_locked(&self) -> bool {
        self.locked_until.is_some()
    }
}

/// Tracks failed attempts across calls.
pub struct LockoutAccountant {
    clock: Arc<dyn Clock>,
    state: Mutex<LockoutStatus>,
}

impl LockoutAccountant {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(LockoutStatus::default()),
        }
    }

    /// Reject while a lockout window is open; expired windows are cleared.
    pub fn check(&self) -> Result<(), AuthError> {
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        match state.locked_until {
            Some(until) if now < until => {
                let remaining = until - now;
                Err(AuthError::locked_out(ceil_secs(remaining)))
            }
            Some(_) => {
                tracing::info!("Lockout window elapsed");
                state.locked_until = None;
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Count a genuine verification failure.
    pub fn record_failure(&self, policy: &LockoutPolicy) -> LockoutStatus {
        let now = self.clock.now();
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());

        state.failed_attempts += 1;
        if state.failed_attempts >= policy.max_attempts {
            let until = now
                .checked_add_signed(policy.lockout_duration)
                .unwrap_or(DateTime::<Utc>::MAX_UTC);
            tracing::warn!(
                attempts = state.failed_attempts,
                locked_until = %until,
                "Failed attempt threshold reached, locking out"
            );
            state.locked_until = Some(until);
            state.failed_attempts = 0;
        } else {
            tracing::debug!(attempts = state.failed_attempts, "Failed attempt recorded");
        }

        *state
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *state = LockoutStatus::default();
    }

    pub fn status(&self) -> LockoutStatus {
        *self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl std::fmt::Debug for LockoutAccountant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LockoutAccountant")
            .field("status", &self.status())
            .finish()
    }
}

/// Seconds as a chrono duration, saturating instead of panicking.
pub(crate) fn duration_from_secs(secs: u64) -> Duration {
    let secs = i64::try_from(secs).unwrap_or(i64::MAX).min(i64::MAX / 1000);
    Duration::seconds(secs)
}

fn ceil_secs(duration: Duration) -> u64 {
    let millis = duration.num_milliseconds().max(0);
    u64::try_from(millis.saturating_add(999) / 1000).unwrap_or(0)
}
