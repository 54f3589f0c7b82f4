// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Operator-visible gateway events.
//!
//! Every gate transition and credential renewal is broadcast so dashboards or
//! alerting hooks can follow along; the same transitions are also logged.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events emitted by the token lifecycle and the authentication gate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// The access token was renewed through the refresh grant.
    TokenRefreshed { expires_in: u64 },
    /// The refresh grant failed; the bundle was discarded.
    RefreshFailed { error: String },
    /// Traffic is suspended.
    Paused { reason: String },
    /// An interactive reauthorization attempt started.
    Reauthenticating { attempt: u32 },
    /// A reauthorization attempt failed.
    ReauthFailed { attempt: u32, error: String },
    /// All automatic reauthorization attempts failed; operator action required.
    ReauthExhausted { attempts: u32 },
    /// Traffic resumed with a fresh credential.
    Reopened,
}

impl GatewayEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::TokenRefreshed { .. } => "token_refreshed",
            Self::RefreshFailed { .. } => "refresh_failed",
            Self::Paused { .. } => "paused",
            Self::Reauthenticating { .. } => "reauthenticating",
            Self::ReauthFailed { .. } => "reauth_failed",
            Self::ReauthExhausted { .. } => "reauth_exhausted",
            Self::Reopened => "reopened",
        }
    }
}

/// Create the shared event channel.
pub fn channel() -> (broadcast::Sender<GatewayEvent>, broadcast::Receiver<GatewayEvent>) {
    broadcast::channel(64)
}

/// Forward events to the log until the channel closes.
pub fn spawn_event_logger(mut rx: broadcast::Receiver<GatewayEvent>) {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(event) => match serde_json::to_string(&event) {
                    Ok(json) => tracing::info!(event = event.name(), payload = %json, "gateway event"),
                    Err(e) => tracing::debug!(err = %e, "unserializable gateway event"),
                },
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!(skipped = n, "event logger lagged");
                    continue;
                }
                Err(_) => break,
            }
        }
    });
}
