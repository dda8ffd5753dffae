//! Failed-login throttling keyed by normalized email.
//!
//! After `max_attempts` failures inside one window the key is locked for the
//! lockout duration. Locked keys fail fast, before any directory lookup or
//! hash verification. Attempts are reserved before verification starts, so
//! guesses still in flight count against the limit.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, warn};

use super::AuthError;
use crate::clock::Clock;

/// Failures allowed before lockout.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Lockout duration, also the counting window.
pub const DEFAULT_LOCKOUT: Duration = Duration::from_secs(15 * 60);

/// Entry count above which a failure triggers a sweep of stale entries.
const PURGE_THRESHOLD: usize = 1024;

#[derive(Debug, Clone, Copy)]
struct Attempts {
    count: u32,
    in_flight: u32,
    window_start: DateTime<Utc>,
    locked_until: Option<DateTime<Utc>>,
}

impl Attempts {
    fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            count: 0,
            in_flight: 0,
            window_start: now,
            locked_until: None,
        }
    }

    fn is_idle(&self) -> bool {
        self.count == 0 && self.in_flight == 0 && self.locked_until.is_none()
    }
}

pub struct LoginThrottle {
    entries: DashMap<String, Attempts>,
    max_attempts: u32,
    lockout: chrono::Duration,
    clock: Arc<dyn Clock>,
}

/// A reserved login attempt.
///
/// Settle it with [`Attempt::failed`] or [`Attempt::succeeded`]; dropping it
/// unsettled gives the slot back without counting a failure.
#[must_use]
pub struct Attempt<'a> {
    throttle: &'a LoginThrottle,
    key: String,
    settled: bool,
}

impl Attempt<'_> {
    pub fn failed(mut self) {
        self.settled = true;
        self.throttle.settle_failure(&self.key);
    }

    pub fn succeeded(mut self) {
        self.settled = true;
        self.throttle.settle_success(&self.key);
    }
}

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.throttle.release(&self.key);
        }
    }
}

impl LoginThrottle {
    pub fn new(max_attempts: u32, lockout: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            max_attempts: max_attempts.max(1),
            lockout: chrono::Duration::from_std(lockout).unwrap_or(chrono::Duration::MAX),
            clock,
        }
    }

    fn is_stale(&self, attempts: &Attempts, now: DateTime<Utc>) -> bool {
        match attempts.locked_until {
            Some(until) => until <= now,
            None => now - attempts.window_start > self.lockout,
        }
    }

    fn window_end(&self, attempts: &Attempts) -> DateTime<Utc> {
        attempts
            .locked_until
            .or_else(|| attempts.window_start.checked_add_signed(self.lockout))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    fn locked(until: DateTime<Utc>, now: DateTime<Utc>) -> AuthError {
        let remaining = (until - now).num_milliseconds().max(0) as u64;
        AuthError::AccountLocked {
            retry_after_secs: remaining.div_ceil(1000).max(1),
        }
    }

    /// Fails with `AccountLocked` while `key` is locked out. Reserves nothing.
    pub fn check(&self, key: &str) -> Result<(), AuthError> {
        let now = self.clock.now();
        if self
            .entries
            .remove_if(key, |_, a| a.in_flight == 0 && self.is_stale(a, now))
            .is_some()
        {
            return Ok(());
        }
        match self.entries.get(key).and_then(|a| a.locked_until) {
            Some(until) if until > now => Err(Self::locked(until, now)),
            _ => Ok(()),
        }
    }

    /// Reserve one attempt for `key`.
    ///
    /// Failures already counted plus attempts still being verified never
    /// exceed `max_attempts`, so concurrent guesses cannot outrun the lockout.
    pub fn admit(&self, key: &str) -> Result<Attempt<'_>, AuthError> {
        let now = self.clock.now();
        if self.entries.len() > PURGE_THRESHOLD {
            self.purge_expired();
        }

        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Attempts::fresh(now));
        if self.is_stale(&entry, now) {
            let in_flight = entry.in_flight;
            *entry = Attempts {
                in_flight,
                ..Attempts::fresh(now)
            };
        }
        if let Some(until) = entry.locked_until {
            return Err(Self::locked(until, now));
        }
        if entry.count.saturating_add(entry.in_flight) >= self.max_attempts {
            debug!(in_flight = entry.in_flight, "login attempt refused, slots exhausted");
            return Err(Self::locked(self.window_end(&entry), now));
        }
        entry.in_flight += 1;
        drop(entry);

        Ok(Attempt {
            throttle: self,
            key: key.to_string(),
            settled: false,
        })
    }

    fn settle_failure(&self, key: &str) {
        let now = self.clock.now();
        let mut entry = self
            .entries
            .entry(key.to_string())
            .or_insert_with(|| Attempts::fresh(now));
        entry.in_flight = entry.in_flight.saturating_sub(1);
        if self.is_stale(&entry, now) {
            let in_flight = entry.in_flight;
            *entry = Attempts {
                in_flight,
                ..Attempts::fresh(now)
            };
        }
        entry.count = entry.count.saturating_add(1);
        if entry.count >= self.max_attempts && entry.locked_until.is_none() {
            entry.locked_until = Some(
                now.checked_add_signed(self.lockout)
                    .unwrap_or(DateTime::<Utc>::MAX_UTC),
            );
            warn!(attempts = entry.count, "login locked out after repeated failures");
        }
    }

    fn settle_success(&self, key: &str) {
        let now = self.clock.now();
        if let Some(mut entry) = self.entries.get_mut(key) {
            let in_flight = entry.in_flight.saturating_sub(1);
            *entry = Attempts {
                in_flight,
                ..Attempts::fresh(now)
            };
        }
        self.entries.remove_if(key, |_, a| a.is_idle());
    }

    fn release(&self, key: &str) {
        if let Some(mut entry) = self.entries.get_mut(key) {
            entry.in_flight = entry.in_flight.saturating_sub(1);
        }
        self.entries.remove_if(key, |_, a| a.is_idle());
    }

    /// Drop entries whose window or lockout has passed.
    pub fn purge_expired(&self) {
        let now = self.clock.now();
        self.entries.retain(|_, a| a.in_flight > 0 || !self.is_stale(a, now));
    }

    pub fn tracked(&self) -> usize {
        self.entries.len()
    }
}
