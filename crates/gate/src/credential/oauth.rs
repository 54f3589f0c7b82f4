// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Client side of the OAuth2 authorization-code and refresh-token grants.

use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use futures_util::future::BoxFuture;
use reqwest::{Client, Url};

use crate::clock::Clock;
use crate::credential::{CredentialBundle, TokenResponse};
use crate::error::AuthError;

/// The two grant exchanges the gateway needs from a provider.
pub trait TokenGrant: Send + Sync {
    /// Exchange a one-time authorization code for a new bundle.
    fn exchange_code<'a>(&'a self, code: &'a str)
        -> BoxFuture<'a, Result<CredentialBundle, AuthError>>;

    /// Exchange a refresh token for a new bundle.
    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> BoxFuture<'a, Result<CredentialBundle, AuthError>>;
}

/// Provider endpoints and client credentials.
#[derive(Debug, Clone)]
pub struct OAuthSettings {
    pub token_url: String,
    pub authorize_url: Option<String>,
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scope: Option<String>,
    pub timeout: Duration,
}

/// Performs grant exchanges against the provider's token endpoint.
///
/// One POST per call; retry policy belongs to the caller.
pub struct OAuthClient {
    settings: OAuthSettings,
    http: Client,
    clock: Arc<dyn Clock>,
}

impl OAuthClient {
    pub fn new(settings: OAuthSettings, clock: Arc<dyn Clock>) -> Self {
        crate::executor::transport::ensure_crypto();
        let http = Client::builder().timeout(settings.timeout).build().unwrap_or_default();
        Self { settings, http, clock }
    }

    pub fn settings(&self) -> &OAuthSettings {
        &self.settings
    }

    /// URL a human opens to grant access, or `None` if no authorize endpoint
    /// is configured.
    pub fn authorize_url(&self) -> Option<String> {
        let base = self.settings.authorize_url.as_deref()?;
        let mut url = Url::parse(base)
            .inspect_err(|e| tracing::warn!(url = base, err = %e, "invalid authorize url"))
            .ok()?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("client_id", &self.settings.client_id)
                .append_pair("redirect_uri", &self.settings.redirect_uri)
                .append_pair("response_type", "code");
            if let Some(ref scope) = self.settings.scope {
                query.append_pair("scope", scope);
            }
        }
        Some(url.into())
    }

    fn basic_credentials(&self) -> String {
        let raw = format!("{}:{}", self.settings.client_id, self.settings.client_secret);
        format!("Basic {}", STANDARD.encode(raw))
    }

    async fn grant(
        &self,
        grant_type: &'static str,
        form: &[(&str, &str)],
        previous_refresh: Option<&str>,
    ) -> Result<CredentialBundle, AuthError> {
        let resp = self
            .http
            .post(&self.settings.token_url)
            .header("Authorization", self.basic_credentials())
            .form(form)
            .send()
            .await
            .map_err(|e| AuthError::Transport(format!("{grant_type} grant: {e}")))?;

        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| AuthError::Transport(format!("{grant_type} grant: read body: {e}")))?;

        if status != 200 {
            tracing::warn!(grant = grant_type, status, "token endpoint rejected grant");
            return Err(AuthError::ProviderRejected { status, body });
        }

        let token: TokenResponse = serde_json::from_str(&body).map_err(|e| {
            tracing::warn!(grant = grant_type, err = %e, "unparseable token response");
            AuthError::ProviderRejected { status, body: format!("unparseable token response: {e}") }
        })?;

        let expires_in = token.expires_in;
        let bundle = CredentialBundle::issue(token, self.clock.now(), previous_refresh)
            .ok_or_else(|| {
                tracing::warn!(grant = grant_type, expires_in, "token lifetime out of range");
                AuthError::ProviderRejected {
                    status,
                    body: format!("expires_in {expires_in} out of range"),
                }
            })?;
        tracing::debug!(grant = grant_type, expires_in, "grant succeeded");
        Ok(bundle)
    }
}

impl TokenGrant for OAuthClient {
    fn exchange_code<'a>(
        &'a self,
        code: &'a str,
    ) -> BoxFuture<'a, Result<CredentialBundle, AuthError>> {
        Box::pin(async move {
            let form = [
                ("grant_type", "authorization_code"),
                ("code", code),
                ("redirect_uri", self.settings.redirect_uri.as_str()),
            ];
            self.grant("authorization_code", &form, None).await
        })
    }

    fn refresh<'a>(
        &'a self,
        refresh_token: &'a str,
    ) -> BoxFuture<'a, Result<CredentialBundle, AuthError>> {
        Box::pin(async move {
            let form = [("grant_type", "refresh_token"), ("refresh_token", refresh_token)];
            self.grant("refresh_token", &form, Some(refresh_token)).await
        })
    }
}

#[cfg(test)]
#[path = "oauth_tests.rs"]
mod tests;
