// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable remote backend: a plain HTTP key/value store.
//!
//! `GET {base}/{key}` returns the stored bytes (404 when absent) and
//! `PUT {base}/{key}` overwrites them.

use std::time::Duration;

use futures_util::future::BoxFuture;
use reqwest::{Client, StatusCode};

use crate::credential::store::StoreBackend;
use crate::error::StorageError;

pub struct RemoteBackend {
    base_url: String,
    auth_token: Option<String>,
    client: Client,
}

impl RemoteBackend {
    pub fn new(base_url: impl Into<String>, auth_token: Option<String>, timeout: Duration) -> Self {
        crate::executor::transport::ensure_crypto();
        let client = Client::builder().timeout(timeout).build().unwrap_or_default();
        Self { base_url: base_url.into().trim_end_matches('/').to_owned(), auth_token, client }
    }

    fn url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }

    fn apply_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

impl StoreBackend for RemoteBackend {
    fn name(&self) -> &str {
        "remote"
    }

    fn save<'a>(&'a self, key: &'a str, bytes: &'a [u8]) -> BoxFuture<'a, Result<(), StorageError>> {
        Box::pin(async move {
            let req = self
                .client
                .put(self.url(key))
                .header("Content-Type", "application/json")
                .body(bytes.to_vec());
            let resp = self.apply_auth(req).send().await.map_err(unavailable)?;
            if !resp.status().is_success() {
                return Err(StorageError::Unavailable(format!(
                    "remote store rejected write ({})",
                    resp.status()
                )));
            }
            Ok(())
        })
    }

    fn load<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<Option<Vec<u8>>, StorageError>> {
        Box::pin(async move {
            let req = self.client.get(self.url(key));
            let resp = self.apply_auth(req).send().await.map_err(unavailable)?;
            match resp.status() {
                StatusCode::NOT_FOUND => Ok(None),
                status if status.is_success() => {
                    let bytes = resp.bytes().await.map_err(unavailable)?;
                    if bytes.is_empty() {
                        return Ok(None);
                    }
                    Ok(Some(bytes.to_vec()))
                }
                status => Err(StorageError::Unavailable(format!(
                    "remote store rejected read ({status})"
                ))),
            }
        })
    }
}

fn unavailable(err: reqwest::Error) -> StorageError {
    StorageError::Unavailable(format!("remote store: {err}"))
}
