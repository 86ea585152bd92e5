//! Offline-first synchronization: pull, merge, push, cursor advance.
//!
//! [`SyncOrchestrator`] performs one run for an owner; [`Scheduler`] decides
//! when runs happen.

mod orchestrator;
mod push;
mod scheduler;

pub use orchestrator::{PushFailure, SyncOrchestrator, SyncOutcome, SyncReport};
pub use push::{push_label, push_note, PushOutcome};
pub use scheduler::{Scheduler, SchedulerHandle, SchedulerStatus, SyncRunner, TriggerOutcome};

use std::time::Duration;

/// Delay between scheduled runs, stretched linearly after failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub period: Duration,
    /// Added once per consecutive failed run
    pub step: Duration,
    pub max_delay: Duration,
}

impl BackoffPolicy {
    /// `period + failures * step`, capped at `max_delay`
    #[must_use]
    pub fn delay_after(&self, consecutive_failures: u32) -> Duration {
        self.step
            .checked_mul(consecutive_failures)
            .and_then(|extra| self.period.checked_add(extra))
            .map_or(self.max_delay, |delay| delay.min(self.max_delay))
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        crate::config::SyncSettings::default().backoff()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_linearly_until_capped() {
        let policy = BackoffPolicy {
            period: Duration::from_secs(900),
            step: Duration::from_secs(900),
            max_delay: Duration::from_secs(3600),
        };
        assert_eq!(policy.delay_after(0), Duration::from_secs(900));
        assert_eq!(policy.delay_after(1), Duration::from_secs(1800));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2700));
        assert_eq!(policy.delay_after(3), Duration::from_secs(3600));
        assert_eq!(policy.delay_after(50), Duration::from_secs(3600));
        assert_eq!(policy.delay_after(u32::MAX), Duration::from_secs(3600));
    }

    #[test]
    fn default_policy_matches_settings() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.period, Duration::from_secs(15 * 60));
        assert_eq!(policy.max_delay, Duration::from_secs(6 * 60 * 60));
    }
}
