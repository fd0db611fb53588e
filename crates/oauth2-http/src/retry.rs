//! Retry policy for the request pipeline

use std::time::Duration;

use reqwest::StatusCode;

/// Statuses retried by default: the gateway family.
pub const DEFAULT_RETRY_STATUSES: [u16; 3] = [502, 503, 504];

/// Bounded retry with a fixed delay between attempts.
///
/// `max_retries` counts retries after the first attempt, so a policy with
/// `max_retries = 2` sends at most three requests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub delay: Duration,
    /// Response statuses that trigger another attempt
    pub retry_statuses: Vec<u16>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            delay: Duration::from_millis(100),
            retry_statuses: DEFAULT_RETRY_STATUSES.to_vec(),
        }
    }
}

impl RetryPolicy {
    /// Single attempt, no retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            delay: Duration::ZERO,
            retry_statuses: Vec::new(),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    pub fn retries_status(&self, status: StatusCode) -> bool {
        self.retry_statuses.contains(&status.as_u16())
    }

    /// Transport failures worth another attempt: timeouts and failed
    /// connects or sends. Builder and redirect errors are not.
    pub(crate) fn retries_error(&self, error: &reqwest::Error) -> bool {
        error.is_timeout() || error.is_connect() || error.is_request()
    }
}
