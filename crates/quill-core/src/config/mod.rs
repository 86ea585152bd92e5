//! Sync engine settings.
//!
//! Defaults mirror a mobile background scheduler: a run every 15 minutes while
//! the network is up, stretched linearly by another 15 minutes per failed run.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::sync::BackoffPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// What pull does with a remote record whose local row still has unpushed edits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PullPolicy {
    /// Keep the local edit; push then overwrites the remote copy
    #[default]
    ProtectPending,
    /// Remote state always wins during pull
    Overwrite,
}

impl fmt::Display for PullPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::ProtectPending => "protect-pending",
            Self::Overwrite => "overwrite",
        })
    }
}

impl FromStr for PullPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "protect-pending" | "protect_pending" => Ok(Self::ProtectPending),
            "overwrite" => Ok(Self::Overwrite),
            other => Err(ConfigError::Invalid(format!(
                "QUILL_PULL_POLICY must be protect-pending or overwrite, got '{other}'"
            ))),
        }
    }
}

/// Tunables for the orchestrator and scheduler
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
    /// Interval between periodic runs
    pub period: Duration,
    /// Extra delay added per consecutive failed run
    pub backoff_step: Duration,
    /// Upper bound for the delay between runs
    pub max_delay: Duration,
    /// Bound on every remote call; exceeding it is a transient failure
    pub call_timeout: Duration,
    pub pull_policy: PullPolicy,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(15 * 60),
            backoff_step: Duration::from_secs(15 * 60),
            max_delay: Duration::from_secs(6 * 60 * 60),
            call_timeout: Duration::from_secs(30),
            pull_policy: PullPolicy::ProtectPending,
        }
    }
}

impl SyncSettings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let values: HashMap<String, String> = env::vars().collect();
        Self::from_lookup(|name| values.get(name).cloned())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let period = seconds(&lookup, "QUILL_SYNC_PERIOD_SECS", 900, 10..=86_400)?;
        let backoff_step = seconds(&lookup, "QUILL_SYNC_BACKOFF_STEP_SECS", 900, 0..=86_400)?;
        let max_delay = seconds(&lookup, "QUILL_SYNC_MAX_DELAY_SECS", 21_600, 10..=604_800)?;
        if max_delay < period {
            return Err(ConfigError::Invalid(
                "QUILL_SYNC_MAX_DELAY_SECS must be >= QUILL_SYNC_PERIOD_SECS".to_string(),
            ));
        }
        let call_timeout = seconds(&lookup, "QUILL_REMOTE_TIMEOUT_SECS", 30, 1..=300)?;
        let pull_policy = optional_trimmed(&lookup, "QUILL_PULL_POLICY")
            .map_or(Ok(PullPolicy::default()), |value| value.parse())?;

        Ok(Self {
            period,
            backoff_step,
            max_delay,
            call_timeout,
            pull_policy,
        })
    }

    pub const fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            period: self.period,
            step: self.backoff_step,
            max_delay: self.max_delay,
        }
    }
}

fn seconds(
    lookup: impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: u64,
    range: std::ops::RangeInclusive<u64>,
) -> Result<Duration, ConfigError> {
    let Some(raw) = optional_trimmed(lookup, name) else {
        return Ok(Duration::from_secs(default));
    };
    let value = raw.parse::<u64>().map_err(|_| {
        ConfigError::Invalid(format!(
            "{name} must be an integer in [{}, {}]",
            range.start(),
            range.end()
        ))
    })?;
    if !range.contains(&value) {
        return Err(ConfigError::Invalid(format!(
            "{name} must be in [{}, {}]",
            range.start(),
            range.end()
        )));
    }
    Ok(Duration::from_secs(value))
}

pub(crate) fn optional_trimmed(
    lookup: impl Fn(&str) -> Option<String>,
    name: &str,
) -> Option<String> {
    lookup(name).and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn settings(pairs: &[(&str, &str)]) -> Result<SyncSettings, ConfigError> {
        let map: HashMap<&str, &str> = pairs.iter().copied().collect();
        SyncSettings::from_lookup(|key| map.get(key).map(|value| (*value).to_string()))
    }

    #[test]
    fn defaults_apply_without_variables() {
        assert_eq!(settings(&[]).unwrap(), SyncSettings::default());
    }

    #[test]
    fn overrides_are_parsed() {
        let parsed = settings(&[
            ("QUILL_SYNC_PERIOD_SECS", "60"),
            ("QUILL_SYNC_BACKOFF_STEP_SECS", " 30 "),
            ("QUILL_REMOTE_TIMEOUT_SECS", "5"),
            ("QUILL_PULL_POLICY", "overwrite"),
        ])
        .unwrap();
        assert_eq!(parsed.period, Duration::from_secs(60));
        assert_eq!(parsed.backoff_step, Duration::from_secs(30));
        assert_eq!(parsed.call_timeout, Duration::from_secs(5));
        assert_eq!(parsed.pull_policy, PullPolicy::Overwrite);
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let err = settings(&[("QUILL_SYNC_PERIOD_SECS", "1")]).unwrap_err();
        assert!(err.to_string().contains("QUILL_SYNC_PERIOD_SECS"));

        let err = settings(&[("QUILL_REMOTE_TIMEOUT_SECS", "abc")]).unwrap_err();
        assert!(err.to_string().contains("integer"));
    }

    #[test]
    fn max_delay_must_cover_period() {
        let err = settings(&[
            ("QUILL_SYNC_PERIOD_SECS", "600"),
            ("QUILL_SYNC_MAX_DELAY_SECS", "300"),
        ])
        .unwrap_err();
        assert!(err.to_string().contains("QUILL_SYNC_MAX_DELAY_SECS"));
    }

    #[test]
    fn unknown_pull_policy_is_rejected() {
        assert!(settings(&[("QUILL_PULL_POLICY", "merge")]).is_err());
    }
}
