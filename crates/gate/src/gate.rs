// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide authentication circuit breaker.
//!
//! While the gate is not Open no request leaves the process. Tripping it
//! starts a single reauthorization run; every other caller that trips it
//! joins that run instead of starting another.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::clock::Clock;
use crate::credential::lifecycle::TokenLifecycle;
use crate::credential::reauth::InteractiveReauthFlow;
use crate::credential::CredentialBundle;
use crate::error::{AuthError, StorageError};
use crate::events::GatewayEvent;
use crate::singleflight::{Flight, SingleFlight};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GateState {
    Open,
    Paused,
    Reauthenticating,
}

impl GateState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Paused => "paused",
            Self::Reauthenticating => "reauthenticating",
        }
    }
}

impl std::fmt::Display for GateState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Automatic reauthorization attempts per outage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReauthPolicy {
    pub max_attempts: u32,
    pub retry_delay: Duration,
}

impl Default for ReauthPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, retry_delay: Duration::from_secs(5) }
    }
}

/// Point-in-time view of the gate for operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GateStatus {
    pub state: GateState,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_failure_time: Option<OffsetDateTime>,
    pub last_failure_reason: Option<String>,
    /// Automatic attempts are exhausted; only an operator can reopen.
    pub fatal: bool,
    pub reauth_attempts: u32,
}

/// What an escalation did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Escalation {
    /// The failing token had already been replaced; nothing was paused.
    Superseded,
    /// The gate is paused (by this call or an earlier one).
    Paused,
}

/// What an escalating caller last saw of the credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observed<'a> {
    /// The access token the failing request carried.
    Token(&'a str),
    /// [`TokenLifecycle::generation`] captured before the failing attempt.
    Generation(u64),
}

struct GateInner {
    state: GateState,
    last_failure_time: Option<OffsetDateTime>,
    last_failure_reason: Option<String>,
    fatal: bool,
    reauth_attempts: u32,
    run: SingleFlight<(), AuthError>,
}

/// Sole writer of [`GateState`].
///
/// Lock order: gate, then token lifecycle. The lifecycle never calls back in.
pub struct AuthenticationGate {
    inner: Mutex<GateInner>,
    lifecycle: Arc<TokenLifecycle>,
    flow: Arc<dyn InteractiveReauthFlow>,
    policy: ReauthPolicy,
    clock: Arc<dyn Clock>,
    event_tx: broadcast::Sender<GatewayEvent>,
}

impl AuthenticationGate {
    pub fn new(
        lifecycle: Arc<TokenLifecycle>,
        flow: Arc<dyn InteractiveReauthFlow>,
        policy: ReauthPolicy,
        clock: Arc<dyn Clock>,
        event_tx: broadcast::Sender<GatewayEvent>,
    ) -> Self {
        Self {
            inner: Mutex::new(GateInner {
                state: GateState::Open,
                last_failure_time: None,
                last_failure_reason: None,
                fatal: false,
                reauth_attempts: 0,
                run: SingleFlight::new(),
            }),
            lifecycle,
            flow,
            policy,
            clock,
            event_tx,
        }
    }

    pub fn state(&self) -> GateState {
        self.inner.lock().state
    }

    /// True unless the gate is Open.
    pub fn is_paused(&self) -> bool {
        self.state() != GateState::Open
    }

    pub fn lifecycle(&self) -> &Arc<TokenLifecycle> {
        &self.lifecycle
    }

    pub fn status(&self) -> GateStatus {
        let inner = self.inner.lock();
        GateStatus {
            state: inner.state,
            last_failure_time: inner.last_failure_time,
            last_failure_reason: inner.last_failure_reason.clone(),
            fatal: inner.fatal,
            reauth_attempts: inner.reauth_attempts,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.event_tx.subscribe()
    }

    /// Report that credentials are unusable.
    ///
    /// `observed` is what the failing caller saw of the credential. If the
    /// gate is Open and the lifecycle has moved past it (a different token,
    /// or a newer generation), the failure is stale and nothing is paused.
    /// `None` pauses unconditionally. Otherwise Open moves to Paused in the
    /// same critical section that blocks new requests, and the single
    /// reauthorization run is started (or joined) unless the gate is fatal.
    pub fn escalate(self: &Arc<Self>, reason: &str, observed: Option<Observed<'_>>) -> Escalation {
        let mut inner = self.inner.lock();
        if inner.state == GateState::Open {
            let superseded = match observed {
                Some(Observed::Token(failed)) => {
                    let current = self.lifecycle.current_access_token();
                    current.as_deref().is_some_and(|t| t != failed)
                }
                Some(Observed::Generation(seen)) => self.lifecycle.generation() != seen,
                None => false,
            };
            if superseded {
                return Escalation::Superseded;
            }
            self.pause(&mut inner, reason);
        }
        if !inner.fatal {
            let this = Arc::clone(self);
            inner.run.join_or_start(move || this.run_reauth());
        }
        Escalation::Paused
    }

    /// Wait for the in-flight reauthorization run, if any, and report
    /// whether the gate is Open afterwards. Dropping the future leaves the
    /// run untouched.
    pub async fn wait_reopened(&self) -> bool {
        let flight = self.inner.lock().run.in_flight();
        if let Some(flight) = flight {
            let _ = flight.wait().await;
        }
        !self.is_paused()
    }

    /// Run the reauthorization flow on operator request, even when the gate
    /// is fatal. Joins a run already in flight.
    pub async fn operator_reauthorize(self: &Arc<Self>) -> Result<(), AuthError> {
        let flight: Flight<(), AuthError> = {
            let mut inner = self.inner.lock();
            if inner.state == GateState::Open {
                self.pause(&mut inner, "operator requested reauthorization");
            }
            let this = Arc::clone(self);
            inner.run.join_or_start(move || this.run_reauth())
        };
        info!("operator reauthorization requested");
        flight.wait().await
    }

    /// Install a bundle obtained out of band and reopen.
    ///
    /// The gate reopens even if persisting fails; the error is returned.
    pub async fn operator_install(&self, bundle: CredentialBundle) -> Result<(), StorageError> {
        let persisted = self.lifecycle.install(bundle).await;
        if let Err(ref e) = persisted {
            warn!(err = %e, "operator credential could not be persisted");
        }
        self.reopen();
        persisted
    }

    async fn run_reauth(self: Arc<Self>) -> Result<(), AuthError> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut last_err = AuthError::ReauthorizationRequired;

        for attempt in 1..=max_attempts {
            {
                let mut inner = self.inner.lock();
                inner.state = GateState::Reauthenticating;
                inner.reauth_attempts += 1;
            }
            info!(attempt, max_attempts, "reauthorization attempt started");
            let _ = self.event_tx.send(GatewayEvent::Reauthenticating { attempt });

            match self.flow.obtain_new_bundle().await {
                Ok(bundle) => {
                    if let Err(e) = self.lifecycle.install(bundle).await {
                        warn!(err = %e, "reauthorized credential could not be persisted");
                    }
                    self.reopen();
                    return Ok(());
                }
                Err(e) => {
                    {
                        let mut inner = self.inner.lock();
                        inner.state = GateState::Paused;
                        inner.last_failure_time = Some(self.clock.now());
                        inner.last_failure_reason = Some(e.to_string());
                    }
                    warn!(attempt, max_attempts, err = %e, "reauthorization attempt failed");
                    let _ = self
                        .event_tx
                        .send(GatewayEvent::ReauthFailed { attempt, error: e.to_string() });
                    last_err = e;
                    if attempt < max_attempts {
                        tokio::time::sleep(self.policy.retry_delay).await;
                    }
                }
            }
        }

        self.inner.lock().fatal = true;
        error!(
            attempts = max_attempts,
            err = %last_err,
            "reauthorization exhausted, gate stays paused until an operator intervenes"
        );
        let _ = self.event_tx.send(GatewayEvent::ReauthExhausted { attempts: max_attempts });
        Err(last_err)
    }

    fn pause(&self, inner: &mut GateInner, reason: &str) {
        inner.state = GateState::Paused;
        inner.last_failure_time = Some(self.clock.now());
        inner.last_failure_reason = Some(reason.to_owned());
        warn!(reason, state = %inner.state, "authentication gate paused");
        let _ = self.event_tx.send(GatewayEvent::Paused { reason: reason.to_owned() });
    }

    fn reopen(&self) {
        {
            let mut inner = self.inner.lock();
            inner.state = GateState::Open;
            inner.fatal = false;
            inner.reauth_attempts = 0;
        }
        info!("authentication gate reopened");
        let _ = self.event_tx.send(GatewayEvent::Reopened);
    }
}

#[cfg(test)]
#[path = "gate_tests.rs"]
mod tests;
