// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Retry policy for the request executor.

use std::time::Duration;

/// Immutable retry configuration, built once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Transport failures tolerated per logical call before giving up.
    pub max_retries: u32,
    /// Delay before the first transport retry. Retry `n` (counting from 1)
    /// waits `base_delay * 2^(n-1)`, capped at `max_backoff`.
    pub base_delay: Duration,
    /// Upper bound on a single backoff delay.
    pub max_backoff: Duration,
    /// Wait applied to a 429 without a usable `Retry-After`.
    pub rate_limit_default_delay: Duration,
    /// Per-attempt HTTP timeout.
    pub request_timeout: Duration,
    /// Pause the gate once the transport budget is spent.
    pub escalate_on_exhaustion: bool,
    /// A caller whose own failure paused the gate waits for the reopen and
    /// retries once with the new credential.
    pub resume_after_reauth: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
            max_backoff: Duration::from_secs(60),
            rate_limit_default_delay: Duration::from_secs(60),
            request_timeout: Duration::from_secs(30),
            escalate_on_exhaustion: true,
            resume_after_reauth: true,
        }
    }
}

impl RetryPolicy {
    /// Backoff before retry number `retry` (0-based): `base_delay * 2^retry`,
    /// capped at `max_backoff`.
    pub fn backoff_delay(&self, retry: u32) -> Duration {
        let factor = 2u32.checked_pow(retry).unwrap_or(u32::MAX);
        self.base_delay.checked_mul(factor).unwrap_or(self.max_backoff).min(self.max_backoff)
    }

    /// Policy with no transport retries.
    pub fn no_retry() -> Self {
        Self { max_retries: 0, ..Self::default() }
    }
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
