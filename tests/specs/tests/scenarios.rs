// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end scenarios over real HTTP: reqwest transport, token endpoint
//! grants, and credentials persisted to a file store.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;

use authgate::config::GatewayConfig;
use authgate::credential::persist::FileBackend;
use authgate::credential::store::CredentialStore;
use authgate::credential::DEFAULT_CREDENTIAL_KEY;
use authgate::error::ExecError;
use authgate::executor::ApiRequest;
use authgate::gate::GateState;
use authgate::{Gateway, GatewayBuilder};
use authgate_specs::{bundle_issued_ago, ApprovingFlow, MockProvider};

#[derive(Debug, Parser)]
struct Cli {
    #[command(flatten)]
    config: GatewayConfig,
}

fn file_store(dir: &Path) -> CredentialStore {
    CredentialStore::new(DEFAULT_CREDENTIAL_KEY, Arc::new(FileBackend::new(dir)))
}

fn gateway(provider: &MockProvider, dir: &Path) -> (Gateway, Arc<ApprovingFlow>) {
    let oauth = provider.oauth_client();
    let flow = Arc::new(ApprovingFlow::new(oauth.clone()));
    let gateway = GatewayBuilder::new(provider.base_url(), oauth, flow.clone(), file_store(dir)).build();
    (gateway, flow)
}

async fn seed(dir: &Path, age: Duration, expires_in: u64) -> anyhow::Result<()> {
    file_store(dir).save(&bundle_issued_ago("seed-at", "seed-rt", age, expires_in)).await?;
    Ok(())
}

#[tokio::test]
async fn configured_gateway_authorizes_then_reuses_stored_credential() -> anyhow::Result<()> {
    let provider = MockProvider::start().await?;
    let dir = tempfile::tempdir()?;
    let config = Cli::parse_from([
        "authgate".to_owned(),
        "--token-url".to_owned(),
        provider.token_url(),
        "--api-base-url".to_owned(),
        provider.base_url(),
        "--client-id".to_owned(),
        "spec-client".to_owned(),
        "--client-secret".to_owned(),
        "spec-secret".to_owned(),
        "--credential-dir".to_owned(),
        dir.path().display().to_string(),
    ])
    .config;

    let first = Gateway::from_config(&config)?;
    first.lifecycle().exchange_code(authgate_specs::GOOD_CODE).await?;
    let body: serde_json::Value = first.execute(&ApiRequest::get("/api/me"), "me").await?.json()?;
    assert_eq!(body["token"], "at-1");
    assert!(dir.path().join("oauth_credentials.json").exists());

    let second = Gateway::from_config(&config)?;
    let body: serde_json::Value = second.execute(&ApiRequest::get("/api/me"), "me").await?.json()?;

    assert_eq!(body["token"], "at-1");
    assert_eq!(provider.exchanges(), 1);
    assert_eq!(provider.refreshes(), 0);
    Ok(())
}

#[tokio::test]
async fn expired_stored_credential_is_refreshed_once_for_concurrent_callers() -> anyhow::Result<()> {
    let provider = MockProvider::start().await?;
    provider.trust_refresh_token("seed-rt");
    let dir = tempfile::tempdir()?;
    seed(dir.path(), Duration::from_secs(7200), 3600).await?;
    let (gateway, flow) = gateway(&provider, dir.path());
    let gateway = Arc::new(gateway);

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let gateway = Arc::clone(&gateway);
        tasks.push(tokio::spawn(async move {
            gateway.execute(&ApiRequest::get("/api/me"), "me").await
        }));
    }
    for task in tasks {
        let body: serde_json::Value = task.await??.json()?;
        assert_eq!(body["token"], "at-1");
    }

    assert_eq!(provider.refreshes(), 1);
    assert_eq!(flow.calls(), 0);
    let stored = file_store(dir.path()).load().await?;
    assert_eq!(stored.map(|b| b.access_token).as_deref(), Some("at-1"));
    Ok(())
}

#[tokio::test]
async fn revoked_access_token_recovers_through_refresh() -> anyhow::Result<()> {
    let provider = MockProvider::start().await?;
    provider.trust_refresh_token("seed-rt");
    let dir = tempfile::tempdir()?;
    seed(dir.path(), Duration::ZERO, 3600).await?;
    let (gateway, flow) = gateway(&provider, dir.path());

    let body: serde_json::Value = gateway.execute(&ApiRequest::get("/api/me"), "me").await?.json()?;

    assert_eq!(body["token"], "at-1", "seed-at was never valid at the provider");
    assert_eq!(provider.refreshes(), 1);
    assert_eq!(provider.api_calls(), 2);
    assert_eq!(flow.calls(), 0);
    Ok(())
}

#[tokio::test]
async fn rejected_refresh_falls_back_to_reauthorization() -> anyhow::Result<()> {
    let provider = MockProvider::start().await?;
    provider.reject_refresh(true);
    let dir = tempfile::tempdir()?;
    seed(dir.path(), Duration::from_secs(7200), 3600).await?;
    let (gateway, flow) = gateway(&provider, dir.path());
    let mut events = gateway.subscribe();

    let body: serde_json::Value = gateway.execute(&ApiRequest::get("/api/me"), "me").await?.json()?;

    assert_eq!(body["token"], "at-1");
    assert_eq!(flow.calls(), 1);
    assert_eq!(provider.exchanges(), 1);
    assert_eq!(gateway.status().state, GateState::Open);

    let mut names = Vec::new();
    while let Ok(event) = events.try_recv() {
        names.push(event.name());
    }
    assert_eq!(names, ["refresh_failed", "paused", "reauthenticating", "reopened"]);

    let stored = file_store(dir.path()).load().await?;
    assert_eq!(stored.map(|b| b.access_token).as_deref(), Some("at-1"));
    Ok(())
}

#[tokio::test]
async fn rate_limited_call_waits_for_retry_after() -> anyhow::Result<()> {
    let provider = MockProvider::start().await?;
    let dir = tempfile::tempdir()?;
    let (gateway, _flow) = gateway(&provider, dir.path());
    gateway.lifecycle().exchange_code(authgate_specs::GOOD_CODE).await?;
    provider.rate_limit(1);

    let started = Instant::now();
    let response = gateway.execute(&ApiRequest::get("/api/limited"), "limited").await?;

    assert_eq!(response.text(), "within limits");
    assert!(started.elapsed() >= Duration::from_secs(1));
    assert_eq!(provider.api_calls(), 2);
    Ok(())
}

#[tokio::test]
async fn unknown_route_is_rejected_without_retry() -> anyhow::Result<()> {
    let provider = MockProvider::start().await?;
    let dir = tempfile::tempdir()?;
    let (gateway, _flow) = gateway(&provider, dir.path());
    gateway.lifecycle().exchange_code(authgate_specs::GOOD_CODE).await?;

    let result = gateway.execute(&ApiRequest::get("/api/missing"), "missing").await;

    assert!(matches!(result, Err(ExecError::Rejected { status: 404, .. })), "{result:?}");
    assert!(!gateway.is_paused());
    Ok(())
}
