//! Progressive lockout for PIN guessing
//!
//! Failures are counted across sessions for the whole unit:
//!
//! - 1-4 failures: no lockout (allow typos)
//! - 5 failures: 30 second lockout
//! - 6 failures: 2 minute lockout
//! - 7 failures: 10 minute lockout
//! - 8+ failures: 1 hour lockout
//!
//! Failures older than the window are forgotten; a correct PIN resets the
//! counter.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use portcullis_core::{Error, Result};

/// Progressive lockout policy
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockoutPolicy {
    /// Consecutive failures before the first lockout
    pub threshold: u32,
    /// Lockout durations for each level (in seconds)
    pub lockout_durations: Vec<u64>,
    /// Failures older than this no longer count (in seconds)
    pub window_secs: u64,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            threshold: 5,
            lockout_durations: vec![
                30,   // 5 failures: 30 seconds
                120,  // 6 failures: 2 minutes
                600,  // 7 failures: 10 minutes
                3600, // 8+ failures: 1 hour
            ],
            window_secs: 15 * 60,
        }
    }
}

impl LockoutPolicy {
    /// Get the lockout duration for the given number of failed attempts
    /// Returns None if not yet locked out
    pub fn lockout_duration(&self, failed_attempts: u32) -> Option<Duration> {
        if failed_attempts < self.threshold || self.lockout_durations.is_empty() {
            return None;
        }

        let lockout_level = (failed_attempts - self.threshold) as usize;
        let duration_index = lockout_level.min(self.lockout_durations.len() - 1);

        Some(Duration::from_secs(self.lockout_durations[duration_index]))
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Get a human-readable description of the current lockout state
    pub fn describe_lockout(&self, failed_attempts: u32) -> String {
        if let Some(duration) = self.lockout_duration(failed_attempts) {
            let secs = duration.as_secs();
            if secs < 60 {
                format!("Locked for {} seconds", secs)
            } else if secs < 3600 {
                format!("Locked for {} minutes", secs / 60)
            } else {
                format!("Locked for {} hours", secs / 3600)
            }
        } else {
            format!(
                "{} attempts remaining",
                self.threshold.saturating_sub(failed_attempts)
            )
        }
    }
}

/// Failure counter and lockout clock for one unit
///
/// In memory only: a restart clears the counter, which a physical unit
/// cannot trigger remotely.
#[derive(Debug)]
pub struct PinThrottle {
    policy: LockoutPolicy,
    consecutive_failures: u32,
    last_failure: Option<Instant>,
    locked_until: Option<Instant>,
}

impl PinThrottle {
    pub fn new(policy: LockoutPolicy) -> Self {
        Self {
            policy,
            consecutive_failures: 0,
            last_failure: None,
            locked_until: None,
        }
    }

    pub fn policy(&self) -> &LockoutPolicy {
        &self.policy
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Check whether an attempt may run at `now`
    ///
    /// Returns `LockedOut` while a lockout is active, whatever PIN the caller
    /// is holding.
    pub fn check(&mut self, now: Instant) -> Result<()> {
        if let Some(until) = self.locked_until {
            if now < until {
                let remaining = until.duration_since(now);
                return Err(Error::LockedOut {
                    remaining_secs: remaining.as_secs().max(1),
                });
            }
            self.locked_until = None;
        }

        if let Some(last) = self.last_failure {
            if now.saturating_duration_since(last) >= self.policy.window() {
                self.consecutive_failures = 0;
                self.last_failure = None;
            }
        }

        Ok(())
    }

    /// Record a failed attempt; returns the lockout it triggered, if any
    pub fn record_failure(&mut self, now: Instant) -> Option<Duration> {
        if let Some(last) = self.last_failure {
            if now.saturating_duration_since(last) >= self.policy.window() {
                self.consecutive_failures = 0;
            }
        }

        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_failure = Some(now);

        let lockout = self.policy.lockout_duration(self.consecutive_failures);
        if let Some(duration) = lockout {
            self.locked_until = Some(now + duration);
        }
        lockout
    }

    /// Record a successful attempt
    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.last_failure = None;
        self.locked_until = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_no_lockout_initially() {
        let policy = LockoutPolicy::default();
        for failures in 0..5 {
            assert!(policy.lockout_duration(failures).is_none());
        }
    }

    #[test]
    fn test_default_policy_progressive_lockout() {
        let policy = LockoutPolicy::default();

        assert_eq!(policy.lockout_duration(5).unwrap().as_secs(), 30);
        assert_eq!(policy.lockout_duration(6).unwrap().as_secs(), 120);
        assert_eq!(policy.lockout_duration(7).unwrap().as_secs(), 600);
        assert_eq!(policy.lockout_duration(8).unwrap().as_secs(), 3600);

        // Caps at the last level
        assert_eq!(policy.lockout_duration(100).unwrap().as_secs(), 3600);
    }

    #[test]
    fn test_describe_lockout() {
        let policy = LockoutPolicy::default();
        assert_eq!(policy.describe_lockout(2), "3 attempts remaining");
        assert_eq!(policy.describe_lockout(5), "Locked for 30 seconds");
        assert_eq!(policy.describe_lockout(7), "Locked for 10 minutes");
    }

    #[test]
    fn test_throttle_locks_after_threshold() {
        let mut throttle = PinThrottle::new(LockoutPolicy::default());
        let start = Instant::now();

        for i in 0..4 {
            let now = start + Duration::from_secs(i);
            throttle.check(now).unwrap();
            assert!(throttle.record_failure(now).is_none());
        }

        let now = start + Duration::from_secs(4);
        throttle.check(now).unwrap();
        assert_eq!(throttle.record_failure(now), Some(Duration::from_secs(30)));

        let err = throttle.check(now + Duration::from_secs(10)).unwrap_err();
        assert!(matches!(err, Error::LockedOut { remaining_secs: 20 }));

        // Lockout expires, next failure escalates
        let after = now + Duration::from_secs(31);
        throttle.check(after).unwrap();
        assert_eq!(throttle.record_failure(after), Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_success_resets() {
        let mut throttle = PinThrottle::new(LockoutPolicy::default());
        let now = Instant::now();
        for _ in 0..4 {
            throttle.record_failure(now);
        }
        throttle.record_success();
        assert_eq!(throttle.consecutive_failures(), 0);
        assert!(throttle.record_failure(now).is_none());
    }

    #[test]
    fn test_window_forgets_old_failures() {
        let mut throttle = PinThrottle::new(LockoutPolicy::default());
        let start = Instant::now();
        for _ in 0..4 {
            throttle.record_failure(start);
        }

        let later = start + Duration::from_secs(15 * 60);
        throttle.check(later).unwrap();
        assert_eq!(throttle.consecutive_failures(), 0);
        assert!(throttle.record_failure(later).is_none());
    }
}
