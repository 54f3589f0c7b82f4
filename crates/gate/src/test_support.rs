// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: scripted fakes for every I/O seam.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;

use crate::clock::Clock;
use crate::credential::oauth::TokenGrant;
use crate::credential::reauth::InteractiveReauthFlow;
use crate::credential::CredentialBundle;
use crate::error::AuthError;
use crate::executor::transport::{HttpRequest, HttpResponse, Transport, TransportError};

/// Assert that an expression returns `Err` whose message contains `substr`.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}

/// Lifetime given to bundles minted by the fakes.
pub const FAKE_EXPIRES_IN: u64 = 1800;

type Handler = dyn Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync;

/// Transport answering from a handler closure, recording every request.
pub struct FakeTransport {
    handler: Box<Handler>,
    latency: Duration,
    calls: AtomicU32,
    requests: Mutex<Vec<HttpRequest>>,
}

impl FakeTransport {
    pub fn new(
        handler: impl Fn(&HttpRequest) -> Result<HttpResponse, TransportError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            handler: Box::new(handler),
            latency: Duration::ZERO,
            calls: AtomicU32::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Always answer with `status` and `body`.
    pub fn fixed(status: u16, body: &'static str) -> Self {
        Self::new(move |_| Ok(HttpResponse::new(status, body)))
    }

    /// Answer from a queue, one entry per call; the last entry repeats.
    pub fn scripted(script: Vec<Result<HttpResponse, TransportError>>) -> Self {
        let queue = Mutex::new(VecDeque::from(script));
        Self::new(move |_| {
            let mut queue = queue.lock();
            match queue.len() {
                0 => Err(TransportError::Other("script exhausted".to_owned())),
                1 => queue.front().cloned().unwrap_or(Err(TransportError::Timeout)),
                _ => queue.pop_front().unwrap_or(Err(TransportError::Timeout)),
            }
        })
    }

    /// 200 for requests bearing `good_token`, `status` for anything else.
    pub fn accepting_token(good_token: &'static str, status: u16) -> Self {
        Self::new(move |req| {
            if req.bearer() == Some(good_token) {
                Ok(HttpResponse::new(200, format!("{{\"token\":\"{good_token}\"}}")))
            } else {
                Ok(HttpResponse::new(status, "denied"))
            }
        })
    }

    /// Delay every answer, so concurrent callers overlap.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().clone()
    }

    /// Bearer tokens seen, in call order.
    pub fn bearers(&self) -> Vec<Option<String>> {
        self.requests.lock().iter().map(|r| r.bearer().map(str::to_owned)).collect()
    }
}

impl Transport for FakeTransport {
    fn send<'a>(
        &'a self,
        request: HttpRequest,
    ) -> BoxFuture<'a, Result<HttpResponse, TransportError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            let result = (self.handler)(&request);
            self.requests.lock().push(request);
            result
        })
    }
}

/// Token grant that mints sequentially numbered bundles.
///
/// Refresh #n yields `refreshed-n`; exchange #n yields `exchanged-n`. Scripted
/// results, when queued, take precedence.
pub struct FakeGrant {
    clock: Arc<dyn Clock>,
    latency: Duration,
    refreshes: AtomicU32,
    exchanges: AtomicU32,
    refresh_script: Mutex<VecDeque<Result<CredentialBundle, AuthError>>>,
    exchange_script: Mutex<VecDeque<Result<CredentialBundle, AuthError>>>,
}

impl FakeGrant {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            latency: Duration::ZERO,
            refreshes: AtomicU32::new(0),
            exchanges: AtomicU32::new(0),
            refresh_script: Mutex::new(VecDeque::new()),
            exchange_script: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn push_refresh(&self, result: Result<CredentialBundle, AuthError>) {
        self.refresh_script.lock().push_back(result);
    }

    pub fn push_exchange(&self, result: Result<CredentialBundle, AuthError>) {
        self.exchange_script.lock().push_back(result);
    }

    pub fn refreshes(&self) -> u32 {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub fn exchanges(&self) -> u32 {
        self.exchanges.load(Ordering::SeqCst)
    }

    fn mint(&self, prefix: &str, n: u32) -> CredentialBundle {
        CredentialBundle::new(
            format!("{prefix}-{n}"),
            format!("{prefix}-refresh-{n}"),
            self.clock.now(),
            FAKE_EXPIRES_IN,
        )
    }
}

impl TokenGrant for FakeGrant {
    fn exchange_code<'a>(
        &'a self,
        _code: &'a str,
    ) -> BoxFuture<'a, Result<CredentialBundle, AuthError>> {
        Box::pin(async move {
            let n = self.exchanges.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            let scripted = self.exchange_script.lock().pop_front();
            scripted.unwrap_or_else(|| Ok(self.mint("exchanged", n)))
        })
    }

    fn refresh<'a>(
        &'a self,
        _refresh_token: &'a str,
    ) -> BoxFuture<'a, Result<CredentialBundle, AuthError>> {
        Box::pin(async move {
            let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            let scripted = self.refresh_script.lock().pop_front();
            scripted.unwrap_or_else(|| Ok(self.mint("refreshed", n)))
        })
    }
}

/// Reauthorization flow that counts invocations and mints `reauth-n` bundles.
pub struct ScriptedReauthFlow {
    clock: Arc<dyn Clock>,
    latency: Duration,
    calls: AtomicU32,
    script: Mutex<VecDeque<Result<CredentialBundle, AuthError>>>,
}

impl ScriptedReauthFlow {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            latency: Duration::ZERO,
            calls: AtomicU32::new(0),
            script: Mutex::new(VecDeque::new()),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn push(&self, result: Result<CredentialBundle, AuthError>) {
        self.script.lock().push_back(result);
    }

    /// Queue `n` failures ahead of anything else.
    pub fn fail_times(&self, n: u32) {
        let mut script = self.script.lock();
        for _ in 0..n {
            script.push_back(Err(AuthError::Interaction("operator did not respond".to_owned())));
        }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl InteractiveReauthFlow for ScriptedReauthFlow {
    fn obtain_new_bundle<'a>(&'a self) -> BoxFuture<'a, Result<CredentialBundle, AuthError>> {
        Box::pin(async move {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            let scripted = self.script.lock().pop_front();
            scripted.unwrap_or_else(|| {
                Ok(CredentialBundle::new(
                    format!("reauth-{n}"),
                    format!("reauth-refresh-{n}"),
                    self.clock.now(),
                    FAKE_EXPIRES_IN,
                ))
            })
        })
    }
}
