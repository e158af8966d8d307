use std::time::Duration;

use serde::Deserialize;

use crate::{DispatchError, rate::WINDOW_MILLIS};

const fn default_safety_margin_millis() -> u64 {
    100
}

const fn default_provider_batch_limit() -> usize {
    courier_queue::DEFAULT_FETCH_LIMIT
}

const fn default_send_timeout_millis() -> u64 {
    800
}

const fn default_fetch_timeout_millis() -> u64 {
    800
}

/// What consumes a cycle's send budget
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub enum RateAccounting {
    /// Every send attempt counts, failed or not
    #[default]
    Attempted,
    /// Only sends the provider accepted count
    Delivered,
}

/// What happens to a message the provider will never accept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum PermanentFailurePolicy {
    /// Leave it queued; it is retried on every run
    Retain,
    /// Acknowledge and discard it once it has been received this many times
    Drop { after_attempts: u32 },
}

impl Default for PermanentFailurePolicy {
    fn default() -> Self {
        Self::Drop { after_attempts: 3 }
    }
}

impl PermanentFailurePolicy {
    #[must_use]
    pub const fn should_drop(self, receive_count: u32) -> bool {
        match self {
            Self::Retain => false,
            Self::Drop { after_attempts } => receive_count >= after_attempts,
        }
    }
}

/// Dispatcher settings
///
/// `max_run_duration_secs` and `per_second_send_cap` have no defaults: a
/// config that leaves them out is rejected at startup.
///
/// ```ron
/// dispatcher: (
///     max_run_duration_secs: 840,
///     per_second_send_cap: 14,
///     permanent_failures: Drop(after_attempts: 3),
/// ),
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DispatcherConfig {
    /// Wall-clock budget for one run
    pub max_run_duration_secs: u64,
    /// Provider's sustained send-rate ceiling
    pub per_second_send_cap: u32,
    /// Headroom kept at the end of each window for the last batch to finish
    #[serde(default = "default_safety_margin_millis")]
    pub safety_margin_millis: u64,
    /// Most messages the queue hands out per fetch
    #[serde(default = "default_provider_batch_limit")]
    pub provider_batch_limit: usize,
    #[serde(default = "default_send_timeout_millis")]
    pub send_timeout_millis: u64,
    /// Bounds fetch, acknowledge and release calls
    #[serde(default = "default_fetch_timeout_millis")]
    pub fetch_timeout_millis: u64,
    #[serde(default)]
    pub rate_accounting: RateAccounting,
    #[serde(default)]
    pub permanent_failures: PermanentFailurePolicy,
}

impl DispatcherConfig {
    /// Settings with every optional value at its default
    #[must_use]
    pub fn new(per_second_send_cap: u32, max_run_duration: Duration) -> Self {
        Self {
            max_run_duration_secs: max_run_duration.as_secs(),
            per_second_send_cap,
            safety_margin_millis: default_safety_margin_millis(),
            provider_batch_limit: default_provider_batch_limit(),
            send_timeout_millis: default_send_timeout_millis(),
            fetch_timeout_millis: default_fetch_timeout_millis(),
            rate_accounting: RateAccounting::default(),
            permanent_failures: PermanentFailurePolicy::default(),
        }
    }

    #[must_use]
    pub const fn max_run_duration(&self) -> Duration {
        Duration::from_secs(self.max_run_duration_secs)
    }

    #[must_use]
    pub const fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_millis)
    }

    #[must_use]
    pub const fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_millis)
    }

    /// Reject settings the run loop cannot honour
    ///
    /// # Errors
    /// [`DispatchError::Configuration`] naming the first bad setting
    pub fn validate(&self) -> Result<(), DispatchError> {
        let fail = |message: &str| Err(DispatchError::Configuration(message.to_string()));

        if self.max_run_duration_secs == 0 {
            return fail("max_run_duration_secs must be greater than zero");
        }
        if self.per_second_send_cap == 0 {
            return fail("per_second_send_cap must be greater than zero");
        }
        if self.safety_margin_millis >= WINDOW_MILLIS {
            return fail("safety_margin_millis must be below 1000");
        }
        if self.provider_batch_limit == 0 {
            return fail("provider_batch_limit must be greater than zero");
        }
        if self.send_timeout_millis == 0 || self.fetch_timeout_millis == 0 {
            return fail("send and fetch timeouts must be greater than zero");
        }
        if let PermanentFailurePolicy::Drop { after_attempts: 0 } = self.permanent_failures {
            return fail("permanent_failures: after_attempts must be at least 1");
        }

        Ok(())
    }
}
