//! Dispatcher tuning knobs

use serde::Deserialize;
use std::time::Duration;

/// Limits and delays for `Dispatcher` and `StickySession`.
///
/// Deserializes from the `[dispatch]` table of the service config; every
/// field has a default so an empty table is valid.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Global cap on in-flight rotating calls
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    /// Total attempts per rotating call
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First rotating backoff; doubles per retry
    #[serde(default = "default_initial_backoff_secs")]
    pub initial_backoff_secs: u64,
    /// Cooldown applied to a key after a rotating rate-limit failure
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Total attempts per sticky call
    #[serde(default = "default_sticky_max_attempts")]
    pub sticky_max_attempts: u32,
    /// Delay between status polls of an uploaded resource
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
}

const MAX_BACKOFF_SECS: u64 = 3_600;
const MAX_COOLDOWN_SECS: u64 = 86_400;

fn default_concurrency() -> usize {
    3
}

fn default_max_attempts() -> u32 {
    4
}

fn default_initial_backoff_secs() -> u64 {
    2
}

fn default_cooldown_secs() -> u64 {
    crate::pool::DEFAULT_COOLDOWN.as_secs()
}

fn default_sticky_max_attempts() -> u32 {
    10
}

fn default_poll_interval_secs() -> u64 {
    2
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            initial_backoff_secs: default_initial_backoff_secs(),
            cooldown_secs: default_cooldown_secs(),
            sticky_max_attempts: default_sticky_max_attempts(),
            poll_interval_secs: default_poll_interval_secs(),
        }
    }
}

impl DispatchConfig {
    /// Reject values that would make dispatch impossible.
    pub fn validate(&self) -> common::Result<()> {
        if self.concurrency == 0 {
            return Err(common::Error::Config(
                "concurrency must be greater than 0".into(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(common::Error::Config(
                "max_attempts must be greater than 0".into(),
            ));
        }
        if self.sticky_max_attempts == 0 {
            return Err(common::Error::Config(
                "sticky_max_attempts must be greater than 0".into(),
            ));
        }
        if self.initial_backoff_secs > MAX_BACKOFF_SECS {
            return Err(common::Error::Config(format!(
                "initial_backoff_secs must be at most {MAX_BACKOFF_SECS}"
            )));
        }
        if self.cooldown_secs > MAX_COOLDOWN_SECS {
            return Err(common::Error::Config(format!(
                "cooldown_secs must be at most {MAX_COOLDOWN_SECS}"
            )));
        }
        Ok(())
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_secs(self.initial_backoff_secs)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}
