// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::HashMap;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use time::macros::datetime;
use tokio::net::TcpListener;

use super::*;
use crate::credential::persist::FileBackend;
use crate::credential::remote::RemoteBackend;
use crate::credential::DEFAULT_CREDENTIAL_KEY;

fn bundle() -> CredentialBundle {
    CredentialBundle::new("access-1", "refresh-1", datetime!(2026-03-02 14:00:00 UTC), 1800)
        .with_scope("api")
}

fn memory_store() -> (CredentialStore, Arc<MemoryBackend>) {
    let backend = Arc::new(MemoryBackend::new());
    let store = CredentialStore::new(DEFAULT_CREDENTIAL_KEY, backend.clone());
    (store, backend)
}

#[tokio::test]
async fn load_returns_none_when_never_saved() -> anyhow::Result<()> {
    let (store, _) = memory_store();
    assert!(store.load().await?.is_none());
    Ok(())
}

#[tokio::test]
async fn save_then_load_returns_same_bundle() -> anyhow::Result<()> {
    let (store, _) = memory_store();
    store.save(&bundle()).await?;
    assert_eq!(store.load().await?, Some(bundle()));
    Ok(())
}

#[tokio::test]
async fn save_overwrites_previous_bundle() -> anyhow::Result<()> {
    let (store, _) = memory_store();
    store.save(&bundle()).await?;
    let newer = CredentialBundle::new("access-2", "refresh-2", datetime!(2026-03-02 15:00:00 UTC), 60);
    store.save(&newer).await?;
    assert_eq!(store.load().await?, Some(newer));
    Ok(())
}

#[tokio::test]
async fn failing_primary_falls_back_on_save_and_load() -> anyhow::Result<()> {
    let primary = Arc::new(MemoryBackend::new());
    let secondary = Arc::new(MemoryBackend::new());
    let store = CredentialStore::new("creds", primary.clone()).with_fallback(secondary.clone());

    primary.set_failing(true);
    store.save(&bundle()).await?;
    assert!(secondary.get("creds").is_some());
    assert_eq!(store.load().await?, Some(bundle()));
    Ok(())
}

#[tokio::test]
async fn save_during_primary_outage_is_loaded_after_recovery() -> anyhow::Result<()> {
    let primary = Arc::new(MemoryBackend::new());
    let secondary = Arc::new(MemoryBackend::new());
    let store = CredentialStore::new("creds", primary.clone()).with_fallback(secondary.clone());

    primary.set_failing(true);
    store.save(&bundle()).await?;
    primary.set_failing(false);

    assert!(primary.get("creds").is_none());
    assert_eq!(store.load().await?, Some(bundle()));
    Ok(())
}

#[tokio::test]
async fn newer_bundle_wins_across_backends() -> anyhow::Result<()> {
    let primary = Arc::new(MemoryBackend::new());
    let secondary = Arc::new(MemoryBackend::new());
    let newer = CredentialBundle::new("access-2", "refresh-2", datetime!(2026-03-02 15:00:00 UTC), 1800);
    primary.put("creds", bundle().to_bytes()?);
    secondary.put("creds", newer.to_bytes()?);
    let store = CredentialStore::new("creds", primary.clone()).with_fallback(secondary.clone());
    assert_eq!(store.load().await?, Some(newer.clone()));

    primary.put("creds", newer.to_bytes()?);
    secondary.put("creds", bundle().to_bytes()?);
    assert_eq!(store.load().await?, Some(newer));
    Ok(())
}

#[tokio::test]
async fn failing_secondary_does_not_hide_primary_bundle() -> anyhow::Result<()> {
    let primary = Arc::new(MemoryBackend::new());
    let secondary = Arc::new(MemoryBackend::new());
    primary.put("creds", bundle().to_bytes()?);
    secondary.set_failing(true);
    let store = CredentialStore::new("creds", primary).with_fallback(secondary);

    assert_eq!(store.load().await?, Some(bundle()));
    Ok(())
}

#[tokio::test]
async fn both_backends_failing_surfaces_primary_error() {
    let primary = Arc::new(MemoryBackend::new());
    let secondary = Arc::new(MemoryBackend::new());
    let store = CredentialStore::new("creds", primary.clone()).with_fallback(secondary.clone());
    primary.set_failing(true);
    secondary.set_failing(true);

    assert!(matches!(store.save(&bundle()).await, Err(StorageError::Unavailable(_))));
    assert!(matches!(store.load().await, Err(StorageError::Unavailable(_))));
}

#[tokio::test]
async fn corrupt_primary_falls_back_to_secondary() -> anyhow::Result<()> {
    let primary = Arc::new(MemoryBackend::new());
    let secondary = Arc::new(MemoryBackend::new());
    primary.put("creds", b"{\"access_token\":".to_vec());
    secondary.put("creds", bundle().to_bytes()?);
    let store = CredentialStore::new("creds", primary).with_fallback(secondary);

    assert_eq!(store.load().await?, Some(bundle()));
    Ok(())
}

#[tokio::test]
async fn file_backend_round_trip() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let backend = Arc::new(FileBackend::new(dir.path().join("nested")));
    let store = CredentialStore::new(DEFAULT_CREDENTIAL_KEY, backend.clone());

    assert!(store.load().await?.is_none());
    store.save(&bundle()).await?;
    assert!(backend.path_for(DEFAULT_CREDENTIAL_KEY).exists());

    let loaded = store.load().await?.expect("bundle stored");
    let drift = (loaded.expires_at - bundle().expires_at).abs();
    assert!(drift <= time::Duration::seconds(1));
    assert_eq!(loaded, bundle());
    Ok(())
}

#[cfg(unix)]
#[tokio::test]
async fn file_backend_restricts_permissions() -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir()?;
    let backend = FileBackend::new(dir.path());
    backend.save("creds", b"{}").await?;
    let mode = std::fs::metadata(backend.path_for("creds"))?.permissions().mode();
    assert_eq!(mode & 0o777, 0o600);
    Ok(())
}

type Kv = Arc<parking_lot::Mutex<HashMap<String, Vec<u8>>>>;

/// Helper: start a mock key/value server.
async fn mock_kv_server() -> (String, Kv) {
    let kv: Kv = Arc::new(parking_lot::Mutex::new(HashMap::new()));
    let app = Router::new()
        .route(
            "/kv/{key}",
            get(|State(kv): State<Kv>, Path(key): Path<String>| async move {
                match kv.lock().get(&key) {
                    Some(v) => (StatusCode::OK, v.clone()),
                    None => (StatusCode::NOT_FOUND, Vec::new()),
                }
            })
            .put(|State(kv): State<Kv>, Path(key): Path<String>, body: Bytes| async move {
                kv.lock().insert(key, body.to_vec());
                StatusCode::NO_CONTENT
            }),
        )
        .with_state(Arc::clone(&kv));

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    (format!("http://{addr}/kv"), kv)
}

#[tokio::test]
async fn remote_backend_round_trip() -> anyhow::Result<()> {
    let (base, kv) = mock_kv_server().await;
    let backend = Arc::new(RemoteBackend::new(base, None, Duration::from_secs(5)));
    let store = CredentialStore::new(DEFAULT_CREDENTIAL_KEY, backend);

    assert!(store.load().await?.is_none());
    store.save(&bundle()).await?;
    assert!(kv.lock().contains_key(DEFAULT_CREDENTIAL_KEY));
    assert_eq!(store.load().await?, Some(bundle()));
    Ok(())
}

#[tokio::test]
async fn unreachable_remote_falls_back_to_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let dead = format!("http://{}/kv", listener.local_addr()?);
    drop(listener);

    let remote = Arc::new(RemoteBackend::new(dead, None, Duration::from_secs(2)));
    let file = Arc::new(FileBackend::new(dir.path()));
    let store = CredentialStore::new("creds", remote).with_fallback(file.clone());

    store.save(&bundle()).await?;
    assert!(file.path_for("creds").exists());
    assert_eq!(store.load().await?, Some(bundle()));
    Ok(())
}
