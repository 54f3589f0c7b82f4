// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy for the gateway.
//!
//! All three enums are `Clone` because a single refresh or reauthorization
//! result is fanned out to every caller waiting on it.

use thiserror::Error;

/// Failures while obtaining or renewing a credential.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The token endpoint answered with a non-success status (or an unusable body).
    #[error("provider rejected grant ({status}): {body}")]
    ProviderRejected { status: u16, body: String },
    /// The token endpoint could not be reached.
    #[error("token endpoint transport failure: {0}")]
    Transport(String),
    /// No usable credential remains; a human must authorize again.
    #[error("reauthorization required")]
    ReauthorizationRequired,
    /// The interactive authorization step did not produce a code.
    #[error("interactive authorization failed: {0}")]
    Interaction(String),
}

impl AuthError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ProviderRejected { .. } => "PROVIDER_REJECTED",
            Self::Transport(_) => "TRANSPORT",
            Self::ReauthorizationRequired => "REAUTHORIZATION_REQUIRED",
            Self::Interaction(_) => "INTERACTION",
        }
    }
}

impl From<tokio::task::JoinError> for AuthError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Transport(format!("background task aborted: {err}"))
    }
}

/// Failures surfaced to callers of the request executor.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ExecError {
    /// The authentication gate is not open; no request was sent.
    #[error("gateway paused: credentials are being reauthorized")]
    Paused,
    /// The API answered with a status that is not retried.
    #[error("request rejected with status {status}")]
    Rejected { status: u16, body: String },
    /// Transport failures consumed the whole retry budget.
    #[error("transport failed after {attempts} attempts: {last_error}")]
    TransportExhausted { attempts: u32, last_error: String },
    /// The request could not be turned into a URL.
    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl ExecError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Paused => "PAUSED",
            Self::Rejected { .. } => "REJECTED",
            Self::TransportExhausted { .. } => "TRANSPORT_EXHAUSTED",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
        }
    }

    /// HTTP status a front-end server would report for this failure.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Paused => 503,
            Self::Rejected { status, .. } => *status,
            Self::TransportExhausted { .. } => 502,
            Self::InvalidRequest(_) => 400,
        }
    }
}

/// Failures of a credential storage backend.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("credential storage unavailable: {0}")]
    Unavailable(String),
    #[error("stored credential is corrupt: {0}")]
    Corrupt(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        Self::Unavailable(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        Self::Corrupt(err.to_string())
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
