// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;

use crate::credential::oauth::OAuthSettings;
use crate::credential::persist::FileBackend;
use crate::credential::remote::RemoteBackend;
use crate::credential::store::CredentialStore;
use crate::credential::{state_dir, DEFAULT_CREDENTIAL_KEY};
use crate::executor::RetryPolicy;
use crate::gate::ReauthPolicy;

/// Provider, storage, and retry settings for the gateway.
#[derive(Debug, Clone, Args)]
pub struct GatewayConfig {
    /// OAuth token endpoint.
    #[arg(long, env = "AUTHGATE_TOKEN_URL")]
    pub token_url: Option<String>,

    /// OAuth authorization endpoint a human opens to grant access.
    #[arg(long, env = "AUTHGATE_AUTHORIZE_URL")]
    pub authorize_url: Option<String>,

    /// Base URL relative API paths are resolved against.
    #[arg(long, env = "AUTHGATE_API_BASE_URL")]
    pub api_base_url: Option<String>,

    #[arg(long, env = "AUTHGATE_CLIENT_ID")]
    pub client_id: Option<String>,

    #[arg(long, env = "AUTHGATE_CLIENT_SECRET", hide_env_values = true)]
    pub client_secret: Option<String>,

    /// Redirect URI registered with the provider.
    #[arg(long, env = "AUTHGATE_REDIRECT_URI", default_value = "https://127.0.0.1")]
    pub redirect_uri: String,

    /// Space-separated scopes requested at authorization.
    #[arg(long, env = "AUTHGATE_SCOPE")]
    pub scope: Option<String>,

    /// Directory for the credential file [default: state dir].
    #[arg(long, env = "AUTHGATE_CREDENTIAL_DIR")]
    pub credential_dir: Option<PathBuf>,

    /// Logical key the credential bundle is stored under.
    #[arg(long, env = "AUTHGATE_CREDENTIAL_KEY", default_value = DEFAULT_CREDENTIAL_KEY)]
    pub credential_key: String,

    /// Durable key/value store used as primary, with the file as fallback.
    #[arg(long, env = "AUTHGATE_REMOTE_STORE_URL")]
    pub remote_store_url: Option<String>,

    #[arg(long, env = "AUTHGATE_REMOTE_STORE_TOKEN", hide_env_values = true)]
    pub remote_store_token: Option<String>,

    /// Transport failures tolerated per call.
    #[arg(long, env = "AUTHGATE_MAX_RETRIES", default_value = "3")]
    pub max_retries: u32,

    /// Delay before the first transport retry, in milliseconds. Doubles on
    /// each further retry (`base * 2^(n-1)`) up to --max-backoff-ms.
    #[arg(long, env = "AUTHGATE_BASE_DELAY_MS", default_value = "2000")]
    pub base_delay_ms: u64,

    /// Cap on any single backoff, in milliseconds.
    #[arg(long, env = "AUTHGATE_MAX_BACKOFF_MS", default_value = "60000")]
    pub max_backoff_ms: u64,

    /// Wait for a 429 without `Retry-After`, in milliseconds.
    #[arg(long, env = "AUTHGATE_RATE_LIMIT_DELAY_MS", default_value = "60000")]
    pub rate_limit_delay_ms: u64,

    /// Per-attempt HTTP timeout, in milliseconds.
    #[arg(long, env = "AUTHGATE_REQUEST_TIMEOUT_MS", default_value = "30000")]
    pub request_timeout_ms: u64,

    /// Refresh this many seconds before the access token expires.
    #[arg(long, env = "AUTHGATE_REFRESH_BUFFER_SECS", default_value = "120")]
    pub refresh_buffer_secs: u64,

    /// Automatic reauthorization attempts before the gate turns fatal.
    #[arg(long, env = "AUTHGATE_REAUTH_ATTEMPTS", default_value = "3")]
    pub reauth_attempts: u32,

    #[arg(long, env = "AUTHGATE_REAUTH_DELAY_MS", default_value = "5000")]
    pub reauth_delay_ms: u64,

    /// How long the console flow waits for a pasted redirect.
    #[arg(long, env = "AUTHGATE_REAUTH_INPUT_TIMEOUT_SECS", default_value = "300")]
    pub reauth_input_timeout_secs: u64,

    /// Pause the gate when a call spends its whole retry budget.
    #[arg(
        long,
        env = "AUTHGATE_ESCALATE_ON_EXHAUSTION",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub escalate_on_exhaustion: bool,

    /// Let a call that paused the gate wait for reauthorization and retry.
    #[arg(
        long,
        env = "AUTHGATE_RESUME_AFTER_REAUTH",
        default_value_t = true,
        action = clap::ArgAction::Set
    )]
    pub resume_after_reauth: bool,

    /// Log format (json or text).
    #[arg(long, env = "AUTHGATE_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "AUTHGATE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl GatewayConfig {
    /// Reject configurations the gateway cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.token_url.as_deref().is_none_or(str::is_empty) {
            anyhow::bail!("--token-url is required");
        }
        if self.client_id.as_deref().is_none_or(str::is_empty) {
            anyhow::bail!("--client-id is required");
        }
        if self.client_secret.as_deref().is_none_or(str::is_empty) {
            anyhow::bail!("--client-secret is required");
        }
        if self.request_timeout_ms == 0 {
            anyhow::bail!("--request-timeout-ms must be greater than zero");
        }
        if self.max_backoff_ms < self.base_delay_ms {
            anyhow::bail!("--max-backoff-ms must not be below --base-delay-ms");
        }
        if self.credential_key.is_empty() || self.credential_key.contains('/') {
            anyhow::bail!("--credential-key must be a non-empty name without '/'");
        }
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid log format: {other}"),
        }
        Ok(())
    }

    /// `validate` plus the API base URL needed to issue requests.
    pub fn validate_api(&self) -> anyhow::Result<()> {
        self.validate()?;
        if self.api_base_url.as_deref().is_none_or(str::is_empty) {
            anyhow::bail!("--api-base-url is required");
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.max_retries,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            rate_limit_default_delay: Duration::from_millis(self.rate_limit_delay_ms),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            escalate_on_exhaustion: self.escalate_on_exhaustion,
            resume_after_reauth: self.resume_after_reauth,
        }
    }

    pub fn reauth_policy(&self) -> ReauthPolicy {
        ReauthPolicy {
            max_attempts: self.reauth_attempts,
            retry_delay: Duration::from_millis(self.reauth_delay_ms),
        }
    }

    pub fn refresh_buffer(&self) -> Duration {
        Duration::from_secs(self.refresh_buffer_secs)
    }

    pub fn reauth_input_timeout(&self) -> Duration {
        Duration::from_secs(self.reauth_input_timeout_secs)
    }

    pub fn oauth_settings(&self) -> OAuthSettings {
        OAuthSettings {
            token_url: self.token_url.clone().unwrap_or_default(),
            authorize_url: self.authorize_url.clone(),
            client_id: self.client_id.clone().unwrap_or_default(),
            client_secret: self.client_secret.clone().unwrap_or_default(),
            redirect_uri: self.redirect_uri.clone(),
            scope: self.scope.clone(),
            timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }

    pub fn credential_dir(&self) -> PathBuf {
        self.credential_dir.clone().unwrap_or_else(state_dir)
    }

    /// Remote primary with file fallback when a remote URL is set, else file only.
    pub fn build_store(&self) -> CredentialStore {
        let file = Arc::new(FileBackend::new(self.credential_dir()));
        match self.remote_store_url {
            Some(ref url) => {
                let remote = RemoteBackend::new(
                    url.clone(),
                    self.remote_store_token.clone(),
                    Duration::from_millis(self.request_timeout_ms),
                );
                CredentialStore::new(self.credential_key.clone(), Arc::new(remote))
                    .with_fallback(file)
            }
            None => CredentialStore::new(self.credential_key.clone(), file),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
