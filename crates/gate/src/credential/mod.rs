// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential handling: the bundle type, its storage, the OAuth grants that
//! produce it, and the in-memory lifecycle that keeps it fresh.

pub mod lifecycle;
pub mod oauth;
pub mod persist;
pub mod reauth;
pub mod remote;
pub mod store;

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::error::StorageError;

/// Logical name under which the bundle is stored.
pub const DEFAULT_CREDENTIAL_KEY: &str = "oauth_credentials";

/// Refresh this long before the access token actually expires.
pub const DEFAULT_REFRESH_BUFFER: Duration = Duration::from_secs(120);

/// Standard OAuth2 token response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_owned()
}

/// The credential currently used to call the API.
///
/// Always replaced wholesale; `expires_at` is derived from `issued_at` and
/// `expires_in` whenever a bundle is built.
#[derive(Clone, PartialEq, Eq)]
pub struct CredentialBundle {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub issued_at: OffsetDateTime,
    pub expires_in: u64,
    pub expires_at: OffsetDateTime,
    pub scope: Option<String>,
}

impl CredentialBundle {
    /// A bundle expiring `expires_in` seconds after `issued_at`.
    ///
    /// A lifetime past the representable date range yields a bundle that is
    /// already expired; [`CredentialBundle::issue`] and
    /// [`CredentialBundle::from_bytes`] reject such lifetimes instead.
    pub fn new(
        access_token: impl Into<String>,
        refresh_token: impl Into<String>,
        issued_at: OffsetDateTime,
        expires_in: u64,
    ) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
            token_type: default_token_type(),
            issued_at,
            expires_in,
            expires_at: expiry_of(issued_at, expires_in).unwrap_or(issued_at),
            scope: None,
        }
    }

    /// Build a bundle from a token endpoint response.
    ///
    /// Providers may omit `refresh_token` on a refresh grant; `previous_refresh`
    /// carries the old one forward in that case. Returns `None` when
    /// `expires_in` puts the expiry outside the representable date range.
    pub fn issue(
        token: TokenResponse,
        issued_at: OffsetDateTime,
        previous_refresh: Option<&str>,
    ) -> Option<Self> {
        expiry_of(issued_at, token.expires_in)?;
        let refresh_token = token
            .refresh_token
            .filter(|rt| !rt.is_empty())
            .or_else(|| previous_refresh.map(str::to_owned))
            .unwrap_or_default();
        Some(Self {
            token_type: token.token_type,
            scope: token.scope,
            ..Self::new(token.access_token, refresh_token, issued_at, token.expires_in)
        })
    }

    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    /// True while `now` is earlier than `expires_at - buffer`.
    pub fn is_fresh(&self, now: OffsetDateTime, buffer: Duration) -> bool {
        now < self.expires_at - buffer
    }

    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.is_empty()
    }

    /// Seconds until expiry, or `None` once expired.
    pub fn expires_in_secs(&self, now: OffsetDateTime) -> Option<u64> {
        let remaining = (self.expires_at - now).whole_seconds();
        u64::try_from(remaining).ok().filter(|s| *s > 0)
    }

    /// Serialize for storage, with `expires_at` recomputed from `issued_at`.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StorageError> {
        let format = |t: OffsetDateTime| {
            t.format(&Rfc3339).map_err(|e| StorageError::Corrupt(e.to_string()))
        };
        let expires_at = expiry_of(self.issued_at, self.expires_in).ok_or_else(|| {
            StorageError::Corrupt(format!("expires_in {} out of range", self.expires_in))
        })?;
        let stored = StoredBundle {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            token_type: self.token_type.clone(),
            issued_at: format(self.issued_at)?,
            expires_in: self.expires_in,
            expires_at: Some(format(expires_at)?),
            scope: self.scope.clone(),
        };
        Ok(serde_json::to_vec_pretty(&stored)?)
    }

    /// Parse a stored bundle.
    ///
    /// A missing or unparseable `expires_at` makes the bundle corrupt. The
    /// stored value is never trusted on its own: expiry is recomputed from
    /// `issued_at + expires_in` and the earlier of the two wins.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let stored: StoredBundle = serde_json::from_slice(bytes)?;
        let parse = |field: &str, value: &str| {
            OffsetDateTime::parse(value, &Rfc3339)
                .map_err(|e| StorageError::Corrupt(format!("{field}: {e}")))
        };
        let issued_at = parse("issued_at", &stored.issued_at)?;
        let stored_expiry = match stored.expires_at.as_deref() {
            Some(value) => parse("expires_at", value)?,
            None => return Err(StorageError::Corrupt("expires_at missing".to_owned())),
        };
        if stored.access_token.is_empty() {
            return Err(StorageError::Corrupt("access_token empty".to_owned()));
        }
        if expiry_of(issued_at, stored.expires_in).is_none() {
            return Err(StorageError::Corrupt(format!(
                "expires_in {} out of range",
                stored.expires_in
            )));
        }

        let mut bundle =
            Self::new(stored.access_token, stored.refresh_token, issued_at, stored.expires_in);
        bundle.token_type = stored.token_type;
        bundle.scope = stored.scope;
        if stored_expiry < bundle.expires_at {
            tracing::debug!("stored expires_at earlier than derived expiry, using stored value");
            bundle.expires_at = stored_expiry;
        }
        Ok(bundle)
    }
}

/// `issued_at + expires_in`, or `None` past the representable date range.
fn expiry_of(issued_at: OffsetDateTime, expires_in: u64) -> Option<OffsetDateTime> {
    let secs = i64::try_from(expires_in).ok()?;
    issued_at.checked_add(time::Duration::seconds(secs))
}

impl fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .field("token_type", &self.token_type)
            .field("issued_at", &self.issued_at)
            .field("expires_in", &self.expires_in)
            .field("expires_at", &self.expires_at)
            .field("scope", &self.scope)
            .finish()
    }
}

fn redact(token: &str) -> String {
    let prefix: String = token.chars().take(4).collect();
    format!("{prefix}…({} chars)", token.chars().count())
}

/// On-disk / remote representation of a bundle.
#[derive(Debug, Serialize, Deserialize)]
struct StoredBundle {
    access_token: String,
    #[serde(default)]
    refresh_token: String,
    #[serde(default = "default_token_type")]
    token_type: String,
    issued_at: String,
    expires_in: u64,
    #[serde(default)]
    expires_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    scope: Option<String>,
}

/// Resolve the state directory for gateway data.
///
/// Checks `AUTHGATE_STATE_DIR`, then `$XDG_STATE_HOME/authgate`,
/// then `$HOME/.local/state/authgate`.
pub fn state_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("AUTHGATE_STATE_DIR") {
        return PathBuf::from(dir);
    }
    if let Ok(xdg) = std::env::var("XDG_STATE_HOME") {
        return PathBuf::from(xdg).join("authgate");
    }
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".local/state/authgate");
    }
    PathBuf::from(".authgate")
}

#[cfg(test)]
#[path = "bundle_tests.rs"]
mod tests;
