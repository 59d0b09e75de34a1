//! Reconnect policy and backoff.
//!
//! The policy bounds reconnection by attempt count, by total elapsed time,
//! or both. Delays grow exponentially from `base_delay` and are capped at
//! `max_delay`.

// ============================================================================
// Imports
// ============================================================================

use std::time::Duration;

use crate::error::{Error, Result};

// ============================================================================
// Constants
// ============================================================================

/// Default number of reconnect attempts.
const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Default first backoff delay.
const DEFAULT_BASE_DELAY: Duration = Duration::from_secs(1);

/// Default cap on the backoff delay.
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Exponent cap so the multiplier never overflows.
const MAX_BACKOFF_EXPONENT: u32 = 16;

// ============================================================================
// PendingPolicy
// ============================================================================

/// What happens to unanswered invocations when the transport drops.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PendingPolicy {
    /// Keep them pending; they resolve if the same session resumes.
    #[default]
    KeepAcrossReconnect,
    /// Fail them as soon as the drop is detected.
    FailOnDrop,
}

// ============================================================================
// ReconnectPolicy
// ============================================================================

/// Bounded reconnection with exponential backoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Whether drops are retried at all.
    pub enabled: bool,

    /// Maximum number of attempts.
    pub max_attempts: Option<u32>,

    /// Maximum total time spent reconnecting.
    pub max_elapsed: Option<Duration>,

    /// Delay before the first attempt.
    pub base_delay: Duration,

    /// Cap on any single delay.
    pub max_delay: Duration,

    /// Treatment of pending invocations across a drop.
    pub pending: PendingPolicy,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: Some(DEFAULT_MAX_ATTEMPTS),
            max_elapsed: None,
            base_delay: DEFAULT_BASE_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            pending: PendingPolicy::default(),
        }
    }
}

// ============================================================================
// Constructors & Builder Methods
// ============================================================================

impl ReconnectPolicy {
    /// Creates a policy that never reconnects.
    #[inline]
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Sets the attempt bound.
    #[inline]
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: Option<u32>) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Sets the elapsed-time bound.
    #[inline]
    #[must_use]
    pub fn with_max_elapsed(mut self, elapsed: Option<Duration>) -> Self {
        self.max_elapsed = elapsed;
        self
    }

    /// Sets the first backoff delay.
    #[inline]
    #[must_use]
    pub fn with_base_delay(mut self, delay: Duration) -> Self {
        self.base_delay = delay;
        self
    }

    /// Sets the backoff cap.
    #[inline]
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the pending-invocation policy.
    #[inline]
    #[must_use]
    pub fn with_pending(mut self, pending: PendingPolicy) -> Self {
        self.pending = pending;
        self
    }
}

// ============================================================================
// Backoff
// ============================================================================

impl ReconnectPolicy {
    /// Returns the delay before attempt number `attempt` (zero-based).
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(MAX_BACKOFF_EXPONENT);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Returns `true` if another attempt is allowed.
    ///
    /// `attempts` is the number of attempts already made.
    #[must_use]
    pub fn allows(&self, attempts: u32, elapsed: Duration) -> bool {
        if !self.enabled {
            return false;
        }
        if let Some(max) = self.max_attempts
            && attempts >= max
        {
            return false;
        }
        if let Some(max) = self.max_elapsed
            && elapsed >= max
        {
            return false;
        }
        true
    }

    /// Checks the policy is bounded and consistent.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if an enabled policy has no bound or
    /// `base_delay` exceeds `max_delay`.
    pub fn validate(&self) -> Result<()> {
        if !self.enabled {
            return Ok(());
        }
        if self.max_attempts.is_none() && self.max_elapsed.is_none() {
            return Err(Error::config(
                "reconnect policy needs an attempt or elapsed-time bound",
            ));
        }
        if self.base_delay > self.max_delay {
            return Err(Error::config("reconnect base delay exceeds max delay"));
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use proptest::prelude::*;

    #[test]
    fn test_default_policy() {
        let policy = ReconnectPolicy::default();
        assert!(policy.enabled);
        assert_eq!(policy.max_attempts, Some(5));
        assert_eq!(policy.pending, PendingPolicy::KeepAcrossReconnect);
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_delay_doubles_until_cap() {
        let policy = ReconnectPolicy::default()
            .with_base_delay(Duration::from_millis(100))
            .with_max_delay(Duration::from_millis(500));

        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(500));
        assert_eq!(policy.delay_for(40), Duration::from_millis(500));
    }

    #[test]
    fn test_allows_attempt_bound() {
        let policy = ReconnectPolicy::default().with_max_attempts(Some(2));
        assert!(policy.allows(0, Duration::ZERO));
        assert!(policy.allows(1, Duration::ZERO));
        assert!(!policy.allows(2, Duration::ZERO));
    }

    #[test]
    fn test_allows_elapsed_bound() {
        let policy = ReconnectPolicy::default()
            .with_max_attempts(None)
            .with_max_elapsed(Some(Duration::from_secs(1)));
        assert!(policy.allows(100, Duration::from_millis(999)));
        assert!(!policy.allows(0, Duration::from_secs(1)));
    }

    #[test]
    fn test_disabled_never_allows() {
        let policy = ReconnectPolicy::disabled();
        assert!(!policy.allows(0, Duration::ZERO));
        assert!(policy.validate().is_ok());
    }

    #[test]
    fn test_unbounded_policy_rejected() {
        let policy = ReconnectPolicy::default().with_max_attempts(None);
        assert!(matches!(policy.validate(), Err(Error::Config { .. })));
    }

    #[test]
    fn test_inverted_delays_rejected() {
        let policy = ReconnectPolicy::default()
            .with_base_delay(Duration::from_secs(10))
            .with_max_delay(Duration::from_secs(1));
        assert!(policy.validate().is_err());
    }

    proptest! {
        #[test]
        fn prop_delay_never_exceeds_cap(
            base_ms in 1u64..5_000,
            cap_ms in 1u64..60_000,
            attempt in 0u32..100,
        ) {
            let policy = ReconnectPolicy::default()
                .with_base_delay(Duration::from_millis(base_ms))
                .with_max_delay(Duration::from_millis(cap_ms));
            prop_assert!(policy.delay_for(attempt) <= Duration::from_millis(cap_ms));
        }

        #[test]
        fn prop_delay_is_monotonic(base_ms in 1u64..5_000, attempt in 0u32..30) {
            let policy = ReconnectPolicy::default()
                .with_base_delay(Duration::from_millis(base_ms))
                .with_max_delay(Duration::from_secs(3_600));
            prop_assert!(policy.delay_for(attempt) <= policy.delay_for(attempt + 1));
        }
    }
}
