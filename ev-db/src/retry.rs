//! Job retry backoff

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Delay before a failed job becomes due again
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackoffPolicy {
    /// Retry immediately
    None,
    /// Fixed delay between retries
    Fixed { delay_secs: u64 },
    /// `base^attempts` units: 1, 3, 9, 27, 81 minutes with the defaults
    Exponential { base: u32, unit_secs: u64 },
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::Exponential {
            base: 3,
            unit_secs: 60,
        }
    }
}

impl BackoffPolicy {
    /// Delay for a job that has failed `attempts` times before this failure
    pub fn delay_for_attempt(&self, attempts: u32) -> Duration {
        match self {
            BackoffPolicy::None => Duration::ZERO,
            BackoffPolicy::Fixed { delay_secs } => Duration::from_secs(*delay_secs),
            BackoffPolicy::Exponential { base, unit_secs } => {
                let factor = (*base as u64).saturating_pow(attempts);
                Duration::from_secs(factor.saturating_mul(*unit_secs))
            }
        }
    }

    /// Absolute time the job becomes due again
    pub fn next_run_at(&self, now: DateTime<Utc>, attempts: u32) -> DateTime<Utc> {
        let delay = self.delay_for_attempt(attempts);
        chrono::Duration::from_std(delay)
            .ok()
            .and_then(|d| now.checked_add_signed(d))
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_sequence() {
        let policy = BackoffPolicy::default();
        let minutes: Vec<u64> = (0..5)
            .map(|n| policy.delay_for_attempt(n).as_secs() / 60)
            .collect();
        assert_eq!(minutes, vec![1, 3, 9, 27, 81]);
    }

    #[test]
    fn test_fixed_and_none() {
        assert_eq!(BackoffPolicy::None.delay_for_attempt(4), Duration::ZERO);
        assert_eq!(
            BackoffPolicy::Fixed { delay_secs: 30 }.delay_for_attempt(7),
            Duration::from_secs(30)
        );
    }

    #[test]
    fn test_huge_attempts_saturate() {
        let policy = BackoffPolicy::default();
        let now = Utc::now();
        assert!(policy.next_run_at(now, 200) > now);
    }

    #[test]
    fn test_next_run_at() {
        let now = Utc::now();
        let at = BackoffPolicy::default().next_run_at(now, 2);
        assert_eq!((at - now).num_minutes(), 9);
    }
}
