// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use yare::parameterized;

use super::*;
use crate::clock::ManualClock;
use crate::test_support::FakeGrant;

#[parameterized(
    bare = { "abc123", "abc123" },
    bare_with_newline = { "abc123\n", "abc123" },
    full_redirect = { "https://127.0.0.1/callback?code=xyz&state=s1", "xyz" },
    encoded = { "https://127.0.0.1/callback?code=a%2Fb%3Dc", "a/b=c" },
    code_not_first = { "https://127.0.0.1/callback?state=1&code=later", "later" },
    relative = { "/callback?code=rel", "rel" },
    query_only = { "?code=q", "q" },
)]
fn extracts_code(input: &str, expected: &str) {
    assert_eq!(extract_code(input).ok().as_deref(), Some(expected));
}

#[parameterized(
    empty = { "   ", "empty" },
    no_code = { "https://127.0.0.1/callback?state=1", "no code parameter" },
    blank_code = { "https://127.0.0.1/callback?code=", "no code parameter" },
    denied = { "https://127.0.0.1/callback?error=access_denied", "denied: access_denied" },
)]
fn rejects_unusable_input(input: &str, fragment: &str) {
    crate::assert_err_contains!(extract_code(input), fragment);
}

fn flow_with_input(input: &'static [u8]) -> (ConsoleReauthFlow, Arc<FakeGrant>) {
    let grant = Arc::new(FakeGrant::new(Arc::new(ManualClock::starting_now())));
    let flow = ConsoleReauthFlow::with_input(
        grant.clone(),
        Some("https://auth.example.test/authorize?client_id=c".to_owned()),
        input,
        Duration::from_secs(5),
    );
    (flow, grant)
}

#[tokio::test]
async fn console_flow_exchanges_pasted_code() -> anyhow::Result<()> {
    let (flow, grant) = flow_with_input(b"https://127.0.0.1/callback?code=pasted\n");

    let bundle = flow.obtain_new_bundle().await?;

    assert_eq!(bundle.access_token, "exchanged-1");
    assert_eq!(grant.exchanges(), 1);
    Ok(())
}

#[tokio::test]
async fn console_flow_reads_one_line_per_attempt() -> anyhow::Result<()> {
    let (flow, grant) = flow_with_input(b"?error=access_denied\nsecond-code\n");

    assert!(flow.obtain_new_bundle().await.is_err());
    assert_eq!(grant.exchanges(), 0, "no exchange for a denied redirect");

    flow.obtain_new_bundle().await?;
    assert_eq!(grant.exchanges(), 1);
    Ok(())
}

#[tokio::test]
async fn console_flow_closed_input_fails() {
    let (flow, _grant) = flow_with_input(b"");
    crate::assert_err_contains!(flow.obtain_new_bundle().await, "input closed");
}

#[tokio::test(start_paused = true)]
async fn console_flow_times_out_waiting_for_input() {
    let grant = Arc::new(FakeGrant::new(Arc::new(ManualClock::starting_now())));
    let (_writer, reader) = tokio::io::duplex(64);
    let flow = ConsoleReauthFlow::with_input(
        grant.clone(),
        Some("https://auth.example.test/authorize".to_owned()),
        BufReader::new(reader),
        Duration::from_secs(5),
    );

    crate::assert_err_contains!(flow.obtain_new_bundle().await, "no authorization response");
    assert_eq!(grant.exchanges(), 0);
}

#[tokio::test]
async fn console_flow_surfaces_provider_rejection() {
    let (flow, grant) = flow_with_input(b"bad-code\n");
    grant.push_exchange(Err(AuthError::ProviderRejected {
        status: 400,
        body: "invalid_grant".to_owned(),
    }));

    let result = flow.obtain_new_bundle().await;
    assert!(matches!(result, Err(AuthError::ProviderRejected { status: 400, .. })), "{result:?}");
}

#[tokio::test]
async fn console_flow_without_authorize_url_fails_fast() {
    let grant = Arc::new(FakeGrant::new(Arc::new(ManualClock::starting_now())));
    let flow =
        ConsoleReauthFlow::with_input(grant.clone(), None, &b"code\n"[..], Duration::from_secs(5));

    crate::assert_err_contains!(flow.obtain_new_bundle().await, "no authorization URL");
    assert_eq!(grant.exchanges(), 0);
}
