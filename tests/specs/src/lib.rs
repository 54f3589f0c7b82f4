// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end gateway scenarios.
//!
//! Runs an in-process OAuth2 provider and protected API over real HTTP, so
//! the gateway is exercised with its production transport and grant client.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Form, Json, Router};
use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::net::TcpListener;

use authgate::clock::{Clock, SystemClock};
use authgate::credential::oauth::{OAuthClient, OAuthSettings, TokenGrant};
use authgate::credential::reauth::InteractiveReauthFlow;
use authgate::credential::CredentialBundle;
use authgate::error::AuthError;
pub use authgate::executor::transport::ensure_crypto;

/// Authorization code the provider accepts.
pub const GOOD_CODE: &str = "good-code";

/// Access-token lifetime granted by the provider.
pub const TOKEN_LIFETIME: u64 = 3600;

#[derive(Default)]
struct ProviderState {
    issued: u32,
    access: HashSet<String>,
    refresh: HashSet<String>,
    reject_refresh: bool,
    rate_limited: u32,
}

#[derive(Default)]
struct Counters {
    exchanges: AtomicU32,
    refreshes: AtomicU32,
    api_calls: AtomicU32,
}

#[derive(Clone)]
struct Shared {
    state: Arc<Mutex<ProviderState>>,
    counters: Arc<Counters>,
    token_latency: Duration,
}

/// OAuth2 provider plus protected API, listening on a loopback port.
///
/// Tokens are `at-N` / `rt-N`. Refresh tokens rotate on every grant. The API
/// answers `GET /api/me` with 200 for a currently valid access token and 401
/// otherwise, and `GET /api/limited` with 429 while a rate limit is armed.
pub struct MockProvider {
    addr: SocketAddr,
    shared: Shared,
}

impl MockProvider {
    pub async fn start() -> anyhow::Result<Self> {
        Self::with_token_latency(Duration::from_millis(50)).await
    }

    /// Delay every token grant, so concurrent refreshes would overlap.
    pub async fn with_token_latency(token_latency: Duration) -> anyhow::Result<Self> {
        ensure_crypto();
        let shared = Shared {
            state: Arc::new(Mutex::new(ProviderState::default())),
            counters: Arc::new(Counters::default()),
            token_latency,
        };
        let app = Router::new()
            .route("/oauth/token", post(token))
            .route("/api/me", get(me))
            .route("/api/limited", get(limited))
            .with_state(shared.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        Ok(Self { addr, shared })
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn token_url(&self) -> String {
        format!("{}/oauth/token", self.base_url())
    }

    pub fn settings(&self) -> OAuthSettings {
        OAuthSettings {
            token_url: self.token_url(),
            authorize_url: Some(format!("{}/oauth/authorize", self.base_url())),
            client_id: "spec-client".to_owned(),
            client_secret: "spec-secret".to_owned(),
            redirect_uri: "https://127.0.0.1".to_owned(),
            scope: None,
            timeout: Duration::from_secs(5),
        }
    }

    /// A grant client pointed at this provider, using the system clock.
    pub fn oauth_client(&self) -> Arc<OAuthClient> {
        Arc::new(OAuthClient::new(self.settings(), Arc::new(SystemClock)))
    }

    /// Accept `refresh_token` as if the provider had issued it earlier.
    pub fn trust_refresh_token(&self, refresh_token: &str) {
        self.shared.state.lock().refresh.insert(refresh_token.to_owned());
    }

    /// Invalidate every access token issued so far (refresh tokens survive).
    pub fn revoke_access_tokens(&self) {
        self.shared.state.lock().access.clear();
    }

    /// Answer refresh grants with `invalid_grant` while set.
    pub fn reject_refresh(&self, reject: bool) {
        self.shared.state.lock().reject_refresh = reject;
    }

    /// Answer the next `count` calls to `/api/limited` with 429.
    pub fn rate_limit(&self, count: u32) {
        self.shared.state.lock().rate_limited = count;
    }

    pub fn exchanges(&self) -> u32 {
        self.shared.counters.exchanges.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> u32 {
        self.shared.counters.refreshes.load(Ordering::SeqCst)
    }

    pub fn api_calls(&self) -> u32 {
        self.shared.counters.api_calls.load(Ordering::SeqCst)
    }
}

fn token_error(error: &str) -> Response {
    (StatusCode::BAD_REQUEST, Json(serde_json::json!({ "error": error }))).into_response()
}

async fn token(State(shared): State<Shared>, Form(form): Form<HashMap<String, String>>) -> Response {
    tokio::time::sleep(shared.token_latency).await;
    let grant_type = form.get("grant_type").map(String::as_str).unwrap_or_default();

    let mut state = shared.state.lock();
    match grant_type {
        "authorization_code" => {
            shared.counters.exchanges.fetch_add(1, Ordering::SeqCst);
            if form.get("code").map(String::as_str) != Some(GOOD_CODE) {
                return token_error("invalid_grant");
            }
        }
        "refresh_token" => {
            shared.counters.refreshes.fetch_add(1, Ordering::SeqCst);
            let presented = form.get("refresh_token").cloned().unwrap_or_default();
            if state.reject_refresh || !state.refresh.remove(&presented) {
                return token_error("invalid_grant");
            }
        }
        _ => return token_error("unsupported_grant_type"),
    }

    state.issued += 1;
    let n = state.issued;
    let access_token = format!("at-{n}");
    let refresh_token = format!("rt-{n}");
    state.access.insert(access_token.clone());
    state.refresh.insert(refresh_token.clone());
    Json(serde_json::json!({
        "access_token": access_token,
        "refresh_token": refresh_token,
        "token_type": "Bearer",
        "expires_in": TOKEN_LIFETIME,
    }))
    .into_response()
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_owned)
}

async fn me(State(shared): State<Shared>, headers: HeaderMap) -> Response {
    shared.counters.api_calls.fetch_add(1, Ordering::SeqCst);
    let token = bearer(&headers).unwrap_or_default();
    if !shared.state.lock().access.contains(&token) {
        return (StatusCode::UNAUTHORIZED, "invalid_token").into_response();
    }
    Json(serde_json::json!({ "user": "spec-user", "token": token })).into_response()
}

async fn limited(State(shared): State<Shared>, headers: HeaderMap) -> Response {
    shared.counters.api_calls.fetch_add(1, Ordering::SeqCst);
    let mut state = shared.state.lock();
    if !state.access.contains(&bearer(&headers).unwrap_or_default()) {
        return (StatusCode::UNAUTHORIZED, "invalid_token").into_response();
    }
    if state.rate_limited > 0 {
        state.rate_limited -= 1;
        return (StatusCode::TOO_MANY_REQUESTS, [("retry-after", "1")], "slow down").into_response();
    }
    (StatusCode::OK, "within limits").into_response()
}

/// Reauthorization flow standing in for a human who approves access with
/// [`GOOD_CODE`] on every prompt.
pub struct ApprovingFlow {
    grant: Arc<dyn TokenGrant>,
    calls: AtomicU32,
}

impl ApprovingFlow {
    pub fn new(grant: Arc<dyn TokenGrant>) -> Self {
        Self { grant, calls: AtomicU32::new(0) }
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

impl InteractiveReauthFlow for ApprovingFlow {
    fn obtain_new_bundle<'a>(&'a self) -> BoxFuture<'a, Result<CredentialBundle, AuthError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.grant.exchange_code(GOOD_CODE).await
        })
    }
}

/// A bundle issued `age` ago with the given lifetime, for seeding stores.
pub fn bundle_issued_ago(
    access_token: &str,
    refresh_token: &str,
    age: Duration,
    expires_in: u64,
) -> CredentialBundle {
    CredentialBundle::new(access_token, refresh_token, SystemClock.now() - age, expires_in)
}
