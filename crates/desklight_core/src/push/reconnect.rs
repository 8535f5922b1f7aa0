//! Reconnect policy for the push subscription.

use std::time::Duration;
use uuid::Uuid;

const DEFAULT_INITIAL_DELAY: Duration = Duration::from_millis(500);
const DEFAULT_MAX_DELAY: Duration = Duration::from_secs(30);
const DEFAULT_JITTER_PERCENT: u32 = 20;

/// What the channel does after losing its connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconnectPolicy {
    /// Stay disconnected.
    Never,
    /// Retry with exponential backoff.
    Backoff(BackoffConfig),
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::Backoff(BackoffConfig::default())
    }
}

impl ReconnectPolicy {
    pub fn backoff(&self) -> Backoff {
        Backoff {
            policy: self.clone(),
            attempt: 0,
        }
    }
}

/// Exponential backoff parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    /// Upper bound of the random extra delay, as a percentage of the base delay.
    pub jitter_percent: u32,
    /// `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: DEFAULT_INITIAL_DELAY,
            max_delay: DEFAULT_MAX_DELAY,
            jitter_percent: DEFAULT_JITTER_PERCENT,
            max_attempts: None,
        }
    }
}

/// Per-channel backoff state.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    attempt: u32,
}

impl Backoff {
    /// Delay before the next attempt, or `None` when the channel should give up.
    pub fn next_delay(&mut self) -> Option<Duration> {
        let ReconnectPolicy::Backoff(config) = &self.policy else {
            return None;
        };
        if config
            .max_attempts
            .is_some_and(|limit| self.attempt >= limit)
        {
            return None;
        }

        let base = base_delay(config, self.attempt);
        self.attempt = self.attempt.saturating_add(1);
        Some(base + jitter(base, config.jitter_percent))
    }

    /// Called after a successful subscription.
    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

fn base_delay(config: &BackoffConfig, attempt: u32) -> Duration {
    let factor = 1u32.checked_shl(attempt.min(31)).unwrap_or(u32::MAX);
    config
        .initial_delay
        .checked_mul(factor)
        .unwrap_or(config.max_delay)
        .min(config.max_delay)
}

fn jitter(base: Duration, percent: u32) -> Duration {
    if percent == 0 {
        return Duration::ZERO;
    }
    let max_extra = base.as_millis() as u64 * u64::from(percent) / 100;
    if max_extra == 0 {
        return Duration::ZERO;
    }
    // v4 UUIDs carry 122 random bits, enough for a jitter sample.
    let sample = (Uuid::new_v4().as_u128() % u128::from(max_extra + 1)) as u64;
    Duration::from_millis(sample)
}

#[cfg(test)]
mod tests {
    use super::{BackoffConfig, ReconnectPolicy};
    use std::time::Duration;

    fn config(jitter_percent: u32, max_attempts: Option<u32>) -> ReconnectPolicy {
        ReconnectPolicy::Backoff(BackoffConfig {
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(1_000),
            jitter_percent,
            max_attempts,
        })
    }

    #[test]
    fn never_policy_gives_up_immediately() {
        assert_eq!(ReconnectPolicy::Never.backoff().next_delay(), None);
    }

    #[test]
    fn delays_double_until_capped() {
        let mut backoff = config(0, None).backoff();
        let delays: Vec<u128> = (0..6)
            .map(|_| backoff.next_delay().unwrap().as_millis())
            .collect();
        assert_eq!(delays, vec![100, 200, 400, 800, 1_000, 1_000]);
    }

    #[test]
    fn jitter_stays_within_percentage() {
        let mut backoff = config(20, None).backoff();
        for _ in 0..50 {
            backoff.reset();
            let delay = backoff.next_delay().unwrap();
            assert!(delay >= Duration::from_millis(100));
            assert!(delay <= Duration::from_millis(120));
        }
    }

    #[test]
    fn attempt_cap_and_reset() {
        let mut backoff = config(0, Some(2)).backoff();
        assert!(backoff.next_delay().is_some());
        assert!(backoff.next_delay().is_some());
        assert_eq!(backoff.next_delay(), None);
        backoff.reset();
        assert_eq!(backoff.next_delay(), Some(Duration::from_millis(100)));
    }

    #[test]
    fn large_attempt_counts_do_not_overflow() {
        let ReconnectPolicy::Backoff(config) = config(0, None) else {
            unreachable!();
        };
        assert_eq!(super::base_delay(&config, 40), Duration::from_millis(1_000));
    }
}
