// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential store with a pluggable primary backend and optional fallback.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;

use crate::credential::CredentialBundle;
use crate::error::StorageError;

/// Byte-level persistence keyed by a logical name.
pub trait StoreBackend: Send + Sync {
    /// Short name used in logs ("file", "remote", ...).
    fn name(&self) -> &str;

    /// Overwrite the value stored under `key`.
    fn save<'a>(&'a self, key: &'a str, bytes: &'a [u8]) -> BoxFuture<'a, Result<(), StorageError>>;

    /// Fetch the value stored under `key`, `None` if nothing was ever saved.
    fn load<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>, StorageError>>;
}

/// In-process backend, for tests and ephemeral deployments.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    values: Mutex<HashMap<String, Vec<u8>>>,
    fail: Mutex<bool>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with `Unavailable`.
    pub fn set_failing(&self, failing: bool) {
        *self.fail.lock() = failing;
    }

    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.values.lock().get(key).cloned()
    }

    pub fn put(&self, key: &str, bytes: Vec<u8>) {
        self.values.lock().insert(key.to_owned(), bytes);
    }

    fn check(&self) -> Result<(), StorageError> {
        if *self.fail.lock() {
            return Err(StorageError::Unavailable("memory backend set to fail".to_owned()));
        }
        Ok(())
    }
}

impl StoreBackend for MemoryBackend {
    fn name(&self) -> &str {
        "memory"
    }

    fn save<'a>(&'a self, key: &'a str, bytes: &'a [u8]) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            self.check()?;
            self.put(key, bytes.to_vec());
            Ok(())
        })
    }

    fn load<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>, StorageError>> {
        Box::pin(async move {
            self.check()?;
            Ok(self.get(key))
        })
    }
}

/// Persists the credential bundle through a primary backend, falling back to
/// a secondary one when the primary fails.
#[derive(Clone)]
pub struct CredentialStore {
    key: String,
    primary: Arc<dyn StoreBackend>,
    secondary: Option<Arc<dyn StoreBackend>>,
}

impl CredentialStore {
    pub fn new(key: impl Into<String>, primary: Arc<dyn StoreBackend>) -> Self {
        Self { key: key.into(), primary, secondary: None }
    }

    pub fn with_fallback(mut self, secondary: Arc<dyn StoreBackend>) -> Self {
        self.secondary = Some(secondary);
        self
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Backend names, primary first.
    pub fn backends(&self) -> Vec<&str> {
        let mut names = vec![self.primary.name()];
        if let Some(ref secondary) = self.secondary {
            names.push(secondary.name());
        }
        names
    }

    /// Persist the full bundle (never a partial update).
    ///
    /// Succeeds if at least one backend accepted the write.
    pub async fn save(&self, bundle: &CredentialBundle) -> Result<(), StorageError> {
        let bytes = bundle.to_bytes()?;
        let primary_err = match self.primary.save(&self.key, &bytes).await {
            Ok(()) => {
                tracing::debug!(backend = self.primary.name(), "credentials saved");
                return Ok(());
            }
            Err(e) => e,
        };
        let Some(ref secondary) = self.secondary else {
            tracing::warn!(backend = self.primary.name(), err = %primary_err, "failed to save credentials");
            return Err(primary_err);
        };
        tracing::warn!(
            backend = self.primary.name(),
            fallback = secondary.name(),
            err = %primary_err,
            "primary credential store failed, saving to fallback"
        );
        secondary.save(&self.key, &bytes).await.inspect_err(|e| {
            tracing::warn!(backend = secondary.name(), err = %e, "fallback credential store failed");
        })
    }

    /// Load the stored bundle. `Ok(None)` means no backend holds one.
    ///
    /// With a secondary configured both backends are read, since a save made
    /// while the primary was down lands only on the secondary. When both hold
    /// a bundle the one issued later wins. A failing secondary never hides a
    /// primary result; the primary's error is returned only when both fail.
    pub async fn load(&self) -> Result<Option<CredentialBundle>, StorageError> {
        let primary = load_from(self.primary.as_ref(), &self.key).await;
        let Some(ref secondary) = self.secondary else {
            return primary;
        };
        if let Err(ref e) = primary {
            tracing::warn!(
                backend = self.primary.name(),
                fallback = secondary.name(),
                err = %e,
                "primary credential store failed, loading from fallback"
            );
        }
        let fallback = load_from(secondary.as_ref(), &self.key).await;
        match (primary, fallback) {
            (Ok(Some(a)), Ok(Some(b))) => {
                if b.issued_at > a.issued_at {
                    tracing::info!(backend = secondary.name(), "fallback holds the newer credentials");
                    Ok(Some(b))
                } else {
                    Ok(Some(a))
                }
            }
            (Ok(found), Ok(None)) => Ok(found),
            (Ok(None), Ok(found)) => Ok(found),
            (Err(_), Ok(found)) => Ok(found),
            (Ok(found), Err(e)) => {
                tracing::warn!(backend = secondary.name(), err = %e, "fallback credential store failed");
                Ok(found)
            }
            (Err(primary_err), Err(e)) => {
                tracing::warn!(backend = secondary.name(), err = %e, "fallback credential store failed");
                Err(primary_err)
            }
        }
    }
}

async fn load_from(
    backend: &dyn StoreBackend,
    key: &str,
) -> Result<Option<CredentialBundle>, StorageError> {
    match backend.load(key).await? {
        Some(bytes) => Ok(Some(CredentialBundle::from_bytes(&bytes)?)),
        None => Ok(None),
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
