// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory owner of the credential bundle.
//!
//! Hands out a currently valid bundle, refreshing it shortly before expiry.
//! Concurrent callers that all find the bundle stale share a single refresh.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::credential::oauth::TokenGrant;
use crate::credential::store::CredentialStore;
use crate::credential::{CredentialBundle, DEFAULT_REFRESH_BUFFER};
use crate::error::{AuthError, StorageError};
use crate::events::GatewayEvent;
use crate::singleflight::SingleFlight;

struct LifecycleInner {
    bundle: Option<CredentialBundle>,
    /// Whether the store has been consulted yet.
    loaded: bool,
    /// Bumped every time a bundle is put in place.
    generation: u64,
    refresh: SingleFlight<CredentialBundle, AuthError>,
}

impl LifecycleInner {
    fn set(&mut self, bundle: CredentialBundle) {
        self.bundle = Some(bundle);
        self.generation += 1;
    }
}

/// Sole owner and writer of the current credential bundle.
pub struct TokenLifecycle {
    inner: Mutex<LifecycleInner>,
    grant: Arc<dyn TokenGrant>,
    store: CredentialStore,
    clock: Arc<dyn Clock>,
    refresh_buffer: Duration,
    /// Serializes store writes so an older bundle never lands after a newer one.
    persist_lock: tokio::sync::Mutex<()>,
    event_tx: broadcast::Sender<GatewayEvent>,
}

impl TokenLifecycle {
    pub fn new(
        grant: Arc<dyn TokenGrant>,
        store: CredentialStore,
        clock: Arc<dyn Clock>,
        event_tx: broadcast::Sender<GatewayEvent>,
    ) -> Self {
        Self {
            inner: Mutex::new(LifecycleInner {
                bundle: None,
                loaded: false,
                generation: 0,
                refresh: SingleFlight::new(),
            }),
            grant,
            store,
            clock,
            refresh_buffer: DEFAULT_REFRESH_BUFFER,
            persist_lock: tokio::sync::Mutex::new(()),
            event_tx,
        }
    }

    pub fn with_refresh_buffer(mut self, buffer: Duration) -> Self {
        self.refresh_buffer = buffer;
        self
    }

    pub fn refresh_buffer(&self) -> Duration {
        self.refresh_buffer
    }

    /// Return a bundle that stays valid for at least the refresh buffer.
    ///
    /// A fresh in-memory bundle is returned without I/O. Otherwise the store
    /// is consulted once (first use) and the refresh grant runs; every caller
    /// arriving while that is in flight waits on the same result.
    ///
    /// # Errors
    ///
    /// - [`AuthError::ReauthorizationRequired`] when there is no credential,
    ///   it carries no refresh token, or the provider rejected the refresh.
    ///   The bundle is discarded.
    /// - [`AuthError::Transport`] when the token endpoint could not be
    ///   reached. The bundle is kept and a later call tries again.
    pub async fn get_valid_token(self: &Arc<Self>) -> Result<CredentialBundle, AuthError> {
        let flight = {
            let mut inner = self.inner.lock();
            if let Some(ref bundle) = inner.bundle {
                if bundle.is_fresh(self.clock.now(), self.refresh_buffer) {
                    return Ok(bundle.clone());
                }
            }
            let this = Arc::clone(self);
            inner.refresh.join_or_start(move || this.renew(None))
        };
        flight.wait().await
    }

    /// Refresh regardless of expiry because the API rejected `stale_access_token`.
    ///
    /// If the in-memory bundle already carries a different token, another
    /// caller has renewed it and that bundle is returned without a grant.
    pub async fn force_refresh(
        self: &Arc<Self>,
        stale_access_token: &str,
    ) -> Result<CredentialBundle, AuthError> {
        let flight = {
            let mut inner = self.inner.lock();
            if let Some(ref bundle) = inner.bundle {
                if bundle.access_token != stale_access_token {
                    return Ok(bundle.clone());
                }
            }
            let this = Arc::clone(self);
            let stale = stale_access_token.to_owned();
            inner.refresh.join_or_start(move || this.renew(Some(stale)))
        };
        flight.wait().await
    }

    /// Replace the bundle wholesale (after reauthorization) and persist it.
    pub async fn install(&self, bundle: CredentialBundle) -> Result<(), StorageError> {
        {
            let mut inner = self.inner.lock();
            inner.set(bundle.clone());
            inner.loaded = true;
        }
        info!(expires_at = %bundle.expires_at, "credential installed");
        self.persist(&bundle).await
    }

    /// Run the authorization-code grant and install the result.
    pub async fn exchange_code(&self, code: &str) -> Result<CredentialBundle, AuthError> {
        let bundle = self.grant.exchange_code(code).await?;
        if let Err(e) = self.install(bundle.clone()).await {
            warn!(err = %e, "authorized credential could not be persisted");
        }
        Ok(bundle)
    }

    /// The in-memory bundle, without any I/O.
    pub fn snapshot(&self) -> Option<CredentialBundle> {
        self.inner.lock().bundle.clone()
    }

    pub fn current_access_token(&self) -> Option<String> {
        self.inner.lock().bundle.as_ref().map(|b| b.access_token.clone())
    }

    /// Counter bumped whenever a bundle is installed, refreshed or loaded.
    ///
    /// A caller that captured it before failing can tell whether the
    /// credential was replaced since.
    pub fn generation(&self) -> u64 {
        self.inner.lock().generation
    }

    /// Number of refresh operations started so far.
    pub fn refreshes_started(&self) -> u64 {
        self.inner.lock().refresh.started()
    }

    /// Body of the shared refresh operation.
    ///
    /// `stale` is `Some` for a forced refresh: any bundle whose access token
    /// differs from it is already good enough.
    async fn renew(self: Arc<Self>, stale: Option<String>) -> Result<CredentialBundle, AuthError> {
        let (bundle, loaded) = {
            let inner = self.inner.lock();
            (inner.bundle.clone(), inner.loaded)
        };

        let current = match bundle {
            Some(bundle) => Some(bundle),
            None if loaded => None,
            None => {
                let stored = self.load_stored().await;
                if let Some(ref bundle) = stored {
                    let usable = match stale {
                        Some(ref token) => bundle.access_token != *token,
                        None => bundle.is_fresh(self.clock.now(), self.refresh_buffer),
                    };
                    if usable {
                        self.inner.lock().set(bundle.clone());
                        info!(expires_at = %bundle.expires_at, "loaded stored credential");
                        return Ok(bundle.clone());
                    }
                }
                stored
            }
        };

        let Some(current) = current else {
            debug!("no credential available");
            return Err(AuthError::ReauthorizationRequired);
        };
        if !current.has_refresh_token() {
            warn!("credential has no refresh token");
            self.discard(&current.access_token);
            return Err(AuthError::ReauthorizationRequired);
        }

        match self.grant.refresh(&current.refresh_token).await {
            Ok(fresh) => {
                {
                    let mut inner = self.inner.lock();
                    if let Some(ref installed) = inner.bundle {
                        if installed.access_token != current.access_token {
                            debug!("credential replaced during refresh, keeping newer bundle");
                            return Ok(installed.clone());
                        }
                    }
                    inner.set(fresh.clone());
                }
                info!(expires_at = %fresh.expires_at, "access token refreshed");
                let _ = self
                    .event_tx
                    .send(GatewayEvent::TokenRefreshed { expires_in: fresh.expires_in });
                if let Err(e) = self.persist(&fresh).await {
                    warn!(err = %e, "refreshed credential could not be persisted");
                }
                Ok(fresh)
            }
            // Unreachable provider says nothing about the refresh token itself.
            Err(AuthError::Transport(msg)) => {
                warn!(err = %msg, "token refresh could not reach provider");
                Err(AuthError::Transport(msg))
            }
            Err(e) => {
                warn!(err = %e, "token refresh rejected, discarding credential");
                self.discard(&current.access_token);
                let _ = self.event_tx.send(GatewayEvent::RefreshFailed { error: e.to_string() });
                Err(AuthError::ReauthorizationRequired)
            }
        }
    }

    async fn load_stored(&self) -> Option<CredentialBundle> {
        let result = self.store.load().await;
        self.inner.lock().loaded = true;
        match result {
            Ok(found) => found,
            Err(e) => {
                warn!(err = %e, "credential store unavailable, treating as empty");
                None
            }
        }
    }

    /// Drop the in-memory bundle if it still carries `access_token`.
    fn discard(&self, access_token: &str) {
        let mut inner = self.inner.lock();
        if inner.bundle.as_ref().is_some_and(|b| b.access_token == access_token) {
            inner.bundle = None;
        }
    }

    async fn persist(&self, bundle: &CredentialBundle) -> Result<(), StorageError> {
        let _guard = self.persist_lock.lock().await;
        let still_current =
            self.inner.lock().bundle.as_ref().is_some_and(|b| b.access_token == bundle.access_token);
        if !still_current {
            debug!("skipping persist of superseded credential");
            return Ok(());
        }
        self.store.save(bundle).await
    }
}

#[cfg(test)]
#[path = "lifecycle_tests.rs"]
mod tests;
