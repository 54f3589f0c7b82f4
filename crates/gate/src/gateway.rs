// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wiring of store, lifecycle, gate, and executor into one handle.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::clock::{Clock, SystemClock};
use crate::config::GatewayConfig;
use crate::credential::lifecycle::TokenLifecycle;
use crate::credential::oauth::{OAuthClient, TokenGrant};
use crate::credential::reauth::{ConsoleReauthFlow, InteractiveReauthFlow};
use crate::credential::store::CredentialStore;
use crate::credential::DEFAULT_REFRESH_BUFFER;
use crate::error::ExecError;
use crate::events::{self, GatewayEvent};
use crate::executor::transport::{ReqwestTransport, Transport};
use crate::executor::{ApiRequest, ApiResponse, ResilientRequestExecutor, RetryPolicy};
use crate::gate::{AuthenticationGate, GateStatus, ReauthPolicy};

/// Builder for [`Gateway`] with production defaults for every seam.
pub struct GatewayBuilder {
    api_base_url: String,
    grant: Arc<dyn TokenGrant>,
    flow: Arc<dyn InteractiveReauthFlow>,
    store: CredentialStore,
    transport: Option<Arc<dyn Transport>>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    reauth: ReauthPolicy,
    refresh_buffer: Duration,
    log_events: bool,
}

impl GatewayBuilder {
    pub fn new(
        api_base_url: impl Into<String>,
        grant: Arc<dyn TokenGrant>,
        flow: Arc<dyn InteractiveReauthFlow>,
        store: CredentialStore,
    ) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            grant,
            flow,
            store,
            transport: None,
            clock: Arc::new(SystemClock),
            retry: RetryPolicy::default(),
            reauth: ReauthPolicy::default(),
            refresh_buffer: DEFAULT_REFRESH_BUFFER,
            log_events: false,
        }
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn reauth_policy(mut self, reauth: ReauthPolicy) -> Self {
        self.reauth = reauth;
        self
    }

    pub fn refresh_buffer(mut self, buffer: Duration) -> Self {
        self.refresh_buffer = buffer;
        self
    }

    /// Forward every [`GatewayEvent`] to the log.
    pub fn log_events(mut self, enabled: bool) -> Self {
        self.log_events = enabled;
        self
    }

    /// Assemble the gateway. Must be called inside a tokio runtime when
    /// event logging is enabled.
    pub fn build(self) -> Gateway {
        let (event_tx, _) = events::channel();
        if self.log_events {
            events::spawn_event_logger(event_tx.subscribe());
        }
        let lifecycle = Arc::new(
            TokenLifecycle::new(
                self.grant,
                self.store,
                Arc::clone(&self.clock),
                event_tx.clone(),
            )
            .with_refresh_buffer(self.refresh_buffer),
        );
        let gate = Arc::new(AuthenticationGate::new(
            Arc::clone(&lifecycle),
            self.flow,
            self.reauth,
            self.clock,
            event_tx,
        ));
        let transport = self.transport.unwrap_or_else(|| Arc::new(ReqwestTransport::new()));
        let executor =
            ResilientRequestExecutor::new(self.api_base_url, transport, Arc::clone(&gate), self.retry);
        Gateway { executor, gate, lifecycle }
    }
}

/// Entry point for callers: shared credential, shared gate, resilient calls.
pub struct Gateway {
    executor: ResilientRequestExecutor,
    gate: Arc<AuthenticationGate>,
    lifecycle: Arc<TokenLifecycle>,
}

impl Gateway {
    /// Production wiring: reqwest transport, system clock, console flow on stdin.
    ///
    /// Relative request paths additionally need `api_base_url`; see
    /// [`GatewayConfig::validate_api`].
    pub fn from_config(config: &GatewayConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let oauth = Arc::new(OAuthClient::new(config.oauth_settings(), Arc::clone(&clock)));
        let flow = Arc::new(ConsoleReauthFlow::stdin(
            oauth.clone(),
            oauth.authorize_url(),
            config.reauth_input_timeout(),
        ));
        let base_url = config.api_base_url.clone().unwrap_or_default();
        Ok(GatewayBuilder::new(base_url, oauth, flow, config.build_store())
            .clock(clock)
            .retry_policy(config.retry_policy())
            .reauth_policy(config.reauth_policy())
            .refresh_buffer(config.refresh_buffer())
            .log_events(true)
            .build())
    }

    pub async fn execute(
        &self,
        request: &ApiRequest,
        operation: &str,
    ) -> Result<ApiResponse, ExecError> {
        self.executor.execute(request, operation).await
    }

    pub async fn execute_with(
        &self,
        request: &ApiRequest,
        operation: &str,
        policy: &RetryPolicy,
    ) -> Result<ApiResponse, ExecError> {
        self.executor.execute_with(request, operation, policy).await
    }

    pub fn is_paused(&self) -> bool {
        self.gate.is_paused()
    }

    pub fn status(&self) -> GateStatus {
        self.gate.status()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.gate.subscribe()
    }

    pub fn gate(&self) -> &Arc<AuthenticationGate> {
        &self.gate
    }

    pub fn lifecycle(&self) -> &Arc<TokenLifecycle> {
        &self.lifecycle
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        self.executor.policy()
    }
}
