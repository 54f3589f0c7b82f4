// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resilient execution of one logical API call.
//!
//! Each call carries the current bearer token, is classified by status, and
//! is retried, refreshed, or escalated to the authentication gate according
//! to the [`RetryPolicy`].

pub mod classify;
pub mod retry;
pub mod transport;

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use reqwest::Url;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use crate::error::{AuthError, ExecError};
use crate::gate::{AuthenticationGate, Escalation, Observed};

pub use classify::{classify, classify_response, RetryDecision};
pub use retry::RetryPolicy;
pub use transport::{HttpMethod, HttpRequest, HttpResponse, Transport, TransportError};

/// Response handed back to callers.
pub type ApiResponse = HttpResponse;

/// Caller-facing description of an API call, relative to the API base URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiRequest {
    method: HttpMethod,
    target: String,
    query: Vec<(String, String)>,
    headers: BTreeMap<String, String>,
    body: Option<Bytes>,
}

impl ApiRequest {
    /// `target` is a path under the base URL or an absolute `http(s)` URL.
    pub fn new(method: HttpMethod, target: impl Into<String>) -> Self {
        Self {
            method,
            target: target.into(),
            query: Vec::new(),
            headers: BTreeMap::new(),
            body: None,
        }
    }

    pub fn get(target: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, target)
    }

    pub fn post(target: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, target)
    }

    pub fn put(target: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, target)
    }

    pub fn delete(target: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, target)
    }

    pub fn query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into().to_ascii_lowercase(), value.into());
        self
    }

    /// Serialize `payload` as the JSON body.
    pub fn json<T: Serialize>(mut self, payload: &T) -> Result<Self, serde_json::Error> {
        self.body = Some(Bytes::from(serde_json::to_vec(payload)?));
        Ok(self.header("content-type", "application/json"))
    }

    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn method(&self) -> HttpMethod {
        self.method
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    /// Absolute URL with the query string applied.
    pub fn resolve(&self, base_url: &str) -> Result<String, ExecError> {
        let raw = if self.target.starts_with("http://") || self.target.starts_with("https://") {
            self.target.clone()
        } else {
            format!("{}/{}", base_url.trim_end_matches('/'), self.target.trim_start_matches('/'))
        };
        let mut url =
            Url::parse(&raw).map_err(|e| ExecError::InvalidRequest(format!("{raw}: {e}")))?;
        if !self.query.is_empty() {
            url.query_pairs_mut().extend_pairs(&self.query);
        }
        Ok(url.into())
    }
}

/// Per-call retry bookkeeping. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestAttempt {
    pub attempt_number: u32,
    pub last_error_kind: Option<&'static str>,
    pub backoff_until: Option<Instant>,
    /// Transport failures charged against the budget so far.
    pub failures: u32,
    /// The previous response was a 401 already answered by a forced refresh.
    pub unauthorized_once: bool,
}

/// How an attempt loop ended.
enum Step {
    Done(Result<ApiResponse, ExecError>),
    /// This call paused the gate (or found it pausing) through its own failure.
    Escalated,
}

pub struct ResilientRequestExecutor {
    base_url: String,
    transport: Arc<dyn Transport>,
    gate: Arc<AuthenticationGate>,
    policy: RetryPolicy,
}

impl ResilientRequestExecutor {
    pub fn new(
        base_url: impl Into<String>,
        transport: Arc<dyn Transport>,
        gate: Arc<AuthenticationGate>,
        policy: RetryPolicy,
    ) -> Self {
        Self { base_url: base_url.into(), transport, gate, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn gate(&self) -> &Arc<AuthenticationGate> {
        &self.gate
    }

    pub fn is_paused(&self) -> bool {
        self.gate.is_paused()
    }

    pub async fn execute(
        &self,
        request: &ApiRequest,
        operation: &str,
    ) -> Result<ApiResponse, ExecError> {
        self.execute_with(request, operation, &self.policy).await
    }

    /// Execute with a per-call policy instead of the configured one.
    pub async fn execute_with(
        &self,
        request: &ApiRequest,
        operation: &str,
        policy: &RetryPolicy,
    ) -> Result<ApiResponse, ExecError> {
        let span = tracing::info_span!("api_call", operation, request_id = %Uuid::new_v4());
        async {
            let url = request.resolve(&self.base_url)?;
            let mut resumed = false;
            loop {
                match self.attempt_loop(&url, request, operation, policy).await {
                    Step::Done(result) => return result,
                    Step::Escalated if policy.resume_after_reauth && !resumed => {
                        resumed = true;
                        info!("waiting for reauthorization before retrying");
                        if !self.gate.wait_reopened().await {
                            return Err(ExecError::Paused);
                        }
                    }
                    Step::Escalated => return Err(ExecError::Paused),
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn attempt_loop(
        &self,
        url: &str,
        request: &ApiRequest,
        operation: &str,
        policy: &RetryPolicy,
    ) -> Step {
        let lifecycle = self.gate.lifecycle();
        let mut attempt = RequestAttempt::default();
        loop {
            if self.gate.is_paused() {
                debug!(attempt = attempt.attempt_number, "gate paused, request not sent");
                return Step::Done(Err(ExecError::Paused));
            }
            attempt.attempt_number += 1;
            let generation = Observed::Generation(lifecycle.generation());

            let bundle = match lifecycle.get_valid_token().await {
                Ok(bundle) => bundle,
                Err(AuthError::ReauthorizationRequired) => {
                    if let Some(step) =
                        self.escalate(operation, "no usable credential", generation)
                    {
                        return step;
                    }
                    continue;
                }
                Err(e) => {
                    if let Some(step) = self
                        .back_off(&mut attempt, operation, policy, e.to_string(), generation)
                        .await
                    {
                        return step;
                    }
                    continue;
                }
            };
            let held = Observed::Token(&bundle.access_token);
            let issued = Observed::Generation(lifecycle.generation());

            let http = self.build(url, request, &bundle.access_token, policy);
            let response = match self.transport.send(http).await {
                Ok(response) => response,
                Err(e) => {
                    attempt.unauthorized_once = false;
                    if let Some(step) =
                        self.back_off(&mut attempt, operation, policy, e.to_string(), held).await
                    {
                        return step;
                    }
                    continue;
                }
            };

            let status = response.status;
            match classify_response(&response, policy.rate_limit_default_delay) {
                RetryDecision::Succeed => {
                    info!(attempt = attempt.attempt_number, status, "request succeeded");
                    return Step::Done(Ok(response));
                }
                RetryDecision::RetryAfter(delay) => {
                    attempt.unauthorized_once = false;
                    attempt.last_error_kind = Some("rate_limited");
                    attempt.backoff_until = Some(Instant::now() + delay);
                    warn!(
                        attempt = attempt.attempt_number,
                        delay_ms = delay.as_millis() as u64,
                        "rate limited, waiting"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::Reauthenticate if attempt.unauthorized_once => {
                    attempt.unauthorized_once = false;
                    attempt.last_error_kind = Some("unauthorized");
                    warn!(attempt = attempt.attempt_number, "second consecutive 401");
                    if let Some(step) = self.escalate(operation, "401 after token refresh", held) {
                        return step;
                    }
                }
                RetryDecision::Reauthenticate => {
                    attempt.unauthorized_once = true;
                    attempt.last_error_kind = Some("unauthorized");
                    info!(attempt = attempt.attempt_number, "401, forcing token refresh");
                    match lifecycle.force_refresh(&bundle.access_token).await {
                        Ok(_) => {}
                        Err(AuthError::ReauthorizationRequired) => {
                            if let Some(step) = self.escalate(
                                operation,
                                "token refresh rejected after 401",
                                issued,
                            ) {
                                return step;
                            }
                        }
                        Err(e) => {
                            if let Some(step) = self
                                .back_off(&mut attempt, operation, policy, e.to_string(), held)
                                .await
                            {
                                return step;
                            }
                        }
                    }
                }
                RetryDecision::Escalate => {
                    attempt.unauthorized_once = false;
                    attempt.last_error_kind = Some("forbidden");
                    if let Some(step) = self.escalate(operation, "403 from API", held) {
                        return step;
                    }
                }
                RetryDecision::Fail | RetryDecision::RetryBackoff => {
                    warn!(attempt = attempt.attempt_number, status, "request rejected");
                    return Step::Done(Err(ExecError::Rejected { status, body: response.text() }));
                }
            }
        }
    }

    /// Escalate a failure seen with `observed`. `None` means the credential
    /// was already replaced and the caller should simply retry.
    fn escalate(&self, operation: &str, reason: &str, observed: Observed<'_>) -> Option<Step> {
        let reason = format!("{operation}: {reason}");
        match self.gate.escalate(&reason, Some(observed)) {
            Escalation::Superseded => {
                debug!("credential already replaced, retrying");
                None
            }
            Escalation::Paused => Some(Step::Escalated),
        }
    }

    /// Charge one transport failure and sleep, or end the call once the
    /// budget is spent.
    async fn back_off(
        &self,
        attempt: &mut RequestAttempt,
        operation: &str,
        policy: &RetryPolicy,
        err: String,
        observed: Observed<'_>,
    ) -> Option<Step> {
        attempt.failures += 1;
        attempt.last_error_kind = Some("transport");
        if attempt.failures > policy.max_retries {
            warn!(attempts = attempt.failures, err = %err, "retry budget exhausted");
            if policy.escalate_on_exhaustion {
                let reason = format!("retry budget exhausted: {err}");
                if let Some(step) = self.escalate(operation, &reason, observed) {
                    return Some(step);
                }
            }
            return Some(Step::Done(Err(ExecError::TransportExhausted {
                attempts: attempt.failures,
                last_error: err,
            })));
        }
        let delay = policy.backoff_delay(attempt.failures - 1);
        attempt.backoff_until = Some(Instant::now() + delay);
        warn!(
            attempt = attempt.attempt_number,
            delay_ms = delay.as_millis() as u64,
            err = %err,
            "transport failure, backing off"
        );
        tokio::time::sleep(delay).await;
        None
    }

    fn build(
        &self,
        url: &str,
        request: &ApiRequest,
        access_token: &str,
        policy: &RetryPolicy,
    ) -> HttpRequest {
        let mut http = HttpRequest::new(request.method, url);
        http.headers = request.headers.clone();
        http.headers.insert("authorization".to_owned(), format!("Bearer {access_token}"));
        http.body = request.body.clone();
        http.timeout = policy.request_timeout;
        http
    }
}

#[cfg(test)]
#[path = "executor_tests.rs"]
mod tests;
