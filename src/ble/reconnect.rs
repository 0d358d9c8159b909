//! Bounded reconnection policy.
//!
//! Applied after an unsolicited link loss or a failed connection attempt.
//! Caller-requested disconnects and scan failures never reach it.

use std::time::Duration;

/// Maximum number of reconnection attempts before giving up.
pub const MAX_CONNECTION_ATTEMPTS: u32 = 3;

/// Default delay before each reconnection attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// What to do after a connection failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectDecision {
    /// Reconnect after `delay`; `attempt` is the new counter value.
    Retry {
        /// 1-based attempt number.
        attempt: u32,
        /// Delay before reconnecting.
        delay: Duration,
    },
    /// The bound is exhausted; tear everything down.
    GiveUp {
        /// Attempts made.
        attempts: u32,
    },
}

/// Fixed-delay, bounded retry policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReconnectPolicy {
    /// Maximum attempts.
    pub max_attempts: u32,
    /// Delay before each attempt.
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: MAX_CONNECTION_ATTEMPTS,
            delay: DEFAULT_RECONNECT_DELAY,
        }
    }
}

impl ReconnectPolicy {
    /// Create a policy.
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay,
        }
    }

    /// Decide given the counter value before this failure.
    pub fn evaluate(&self, attempts: u32) -> ReconnectDecision {
        if attempts < self.max_attempts {
            ReconnectDecision::Retry {
                attempt: attempts + 1,
                delay: self.delay,
            }
        } else {
            ReconnectDecision::GiveUp { attempts }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_policy() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay, Duration::from_secs(1));
    }

    #[test]
    fn test_retry_until_bound() {
        let policy = ReconnectPolicy::default();
        assert_eq!(
            policy.evaluate(0),
            ReconnectDecision::Retry {
                attempt: 1,
                delay: Duration::from_secs(1)
            }
        );
        assert_eq!(
            policy.evaluate(MAX_CONNECTION_ATTEMPTS - 1),
            ReconnectDecision::Retry {
                attempt: MAX_CONNECTION_ATTEMPTS,
                delay: Duration::from_secs(1)
            }
        );
        assert_eq!(
            policy.evaluate(MAX_CONNECTION_ATTEMPTS),
            ReconnectDecision::GiveUp {
                attempts: MAX_CONNECTION_ATTEMPTS
            }
        );
    }

    #[test]
    fn test_zero_attempts_never_retries() {
        let policy = ReconnectPolicy::new(0, Duration::ZERO);
        assert_eq!(policy.evaluate(0), ReconnectDecision::GiveUp { attempts: 0 });
    }

    proptest! {
        #[test]
        fn prop_counter_never_exceeds_bound(max in 0u32..10, start in 0u32..10) {
            let policy = ReconnectPolicy::new(max, Duration::from_millis(10));
            let mut attempts = start.min(max);
            loop {
                match policy.evaluate(attempts) {
                    ReconnectDecision::Retry { attempt, .. } => {
                        prop_assert!(attempt <= max);
                        attempts = attempt;
                    }
                    ReconnectDecision::GiveUp { attempts: made } => {
                        prop_assert_eq!(made, max);
                        break;
                    }
                }
            }
        }
    }
}
