// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Human-in-the-loop reauthorization.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use reqwest::Url;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::credential::oauth::TokenGrant;
use crate::credential::CredentialBundle;
use crate::error::AuthError;

/// Obtains a brand-new bundle when refresh is no longer possible.
///
/// Implementations must leave stored credentials untouched on failure; the
/// gate installs the returned bundle itself.
pub trait InteractiveReauthFlow: Send + Sync {
    fn obtain_new_bundle<'a>(&'a self) -> BoxFuture<'a, Result<CredentialBundle, AuthError>>;
}

type LineSource = Box<dyn AsyncBufRead + Send + Unpin>;

/// Prints the authorization URL and reads the redirect (or bare code) back
/// from a line source, then runs the authorization-code grant.
pub struct ConsoleReauthFlow {
    grant: Arc<dyn TokenGrant>,
    authorize_url: Option<String>,
    input: tokio::sync::Mutex<LineSource>,
    input_timeout: Duration,
}

impl ConsoleReauthFlow {
    /// Read from the process's stdin.
    pub fn stdin(
        grant: Arc<dyn TokenGrant>,
        authorize_url: Option<String>,
        input_timeout: Duration,
    ) -> Self {
        Self::with_input(grant, authorize_url, BufReader::new(tokio::io::stdin()), input_timeout)
    }

    pub fn with_input(
        grant: Arc<dyn TokenGrant>,
        authorize_url: Option<String>,
        input: impl AsyncBufRead + Send + Unpin + 'static,
        input_timeout: Duration,
    ) -> Self {
        Self {
            grant,
            authorize_url,
            input: tokio::sync::Mutex::new(Box::new(input)),
            input_timeout,
        }
    }

    async fn read_response(&self) -> Result<String, AuthError> {
        let mut input = self.input.lock().await;
        let mut line = String::new();
        match tokio::time::timeout(self.input_timeout, input.read_line(&mut line)).await {
            Err(_) => Err(AuthError::Interaction(format!(
                "no authorization response within {}s",
                self.input_timeout.as_secs()
            ))),
            Ok(Err(e)) => Err(AuthError::Interaction(format!("read authorization response: {e}"))),
            Ok(Ok(0)) => Err(AuthError::Interaction("input closed".to_owned())),
            Ok(Ok(_)) => Ok(line),
        }
    }
}

impl InteractiveReauthFlow for ConsoleReauthFlow {
    fn obtain_new_bundle<'a>(&'a self) -> BoxFuture<'a, Result<CredentialBundle, AuthError>> {
        Box::pin(async move {
            let Some(ref url) = self.authorize_url else {
                return Err(AuthError::Interaction("no authorization URL configured".to_owned()));
            };
            info!(url = %url, "waiting for interactive authorization");
            eprintln!("Authorization required. Open this URL and approve access:");
            eprintln!();
            eprintln!("  {url}");
            eprintln!();
            eprintln!("Then paste the full redirect URL (or just the code):");

            let line = self.read_response().await?;
            let code = extract_code(&line).inspect_err(|e| {
                warn!(err = %e, "unusable authorization response");
            })?;
            self.grant.exchange_code(&code).await
        })
    }
}

/// Pull the authorization code out of a pasted redirect URL or bare code.
///
/// The `code` query parameter is percent-decoded. A redirect carrying an
/// `error` parameter is reported as a denial.
pub fn extract_code(input: &str) -> Result<String, AuthError> {
    let input = input.trim();
    if input.is_empty() {
        return Err(AuthError::Interaction("empty authorization response".to_owned()));
    }
    if !input.contains('?') && !input.contains("://") {
        return Ok(input.to_owned());
    }

    let url = match Url::parse(input) {
        Ok(url) => url,
        Err(_) => Url::parse(&format!("http://localhost/{}", input.trim_start_matches('/')))
            .map_err(|e| AuthError::Interaction(format!("unparseable redirect: {e}")))?,
    };
    let mut code = None;
    for (name, value) in url.query_pairs() {
        match name.as_ref() {
            "error" => {
                return Err(AuthError::Interaction(format!("authorization denied: {value}")));
            }
            "code" if !value.is_empty() => code = Some(value.into_owned()),
            _ => {}
        }
    }
    code.ok_or_else(|| AuthError::Interaction("redirect has no code parameter".to_owned()))
}

#[cfg(test)]
#[path = "reauth_tests.rs"]
mod tests;
