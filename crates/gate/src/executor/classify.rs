// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pure mapping from one attempt's outcome to what the executor does next.

use std::time::Duration;

use crate::executor::transport::{HttpResponse, TransportError};

/// Next step after a single attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// 2xx: hand the response to the caller.
    Succeed,
    /// 429: wait the given duration, then retry without spending budget.
    RetryAfter(Duration),
    /// Transport failure: back off and retry against the budget.
    RetryBackoff,
    /// 401: the token may have been revoked early; refresh and retry.
    Reauthenticate,
    /// 403: credentials are unusable; pause the gate.
    Escalate,
    /// Any other status: surface to the caller.
    Fail,
}

/// Classify an attempt. `rate_limit_default` applies to a 429 whose
/// `Retry-After` is missing or not delta-seconds.
pub fn classify(
    outcome: &Result<HttpResponse, TransportError>,
    rate_limit_default: Duration,
) -> RetryDecision {
    match outcome {
        Ok(response) => classify_response(response, rate_limit_default),
        Err(_) => RetryDecision::RetryBackoff,
    }
}

/// Classify a received response; never yields `RetryBackoff`.
pub fn classify_response(response: &HttpResponse, rate_limit_default: Duration) -> RetryDecision {
    match response.status {
        200..=299 => RetryDecision::Succeed,
        401 => RetryDecision::Reauthenticate,
        403 => RetryDecision::Escalate,
        429 => RetryDecision::RetryAfter(
            response.header("retry-after").and_then(parse_retry_after).unwrap_or(rate_limit_default),
        ),
        _ => RetryDecision::Fail,
    }
}

/// Parse a `Retry-After` value given in delta-seconds.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
#[path = "classify_tests.rs"]
mod tests;
