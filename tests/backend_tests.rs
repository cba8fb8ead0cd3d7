#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Integration tests for backend bootstrap and how readiness gates the
//! room coordinator.

mod common;

use std::time::Duration;

use room_sync::room::{RoomRecord, Timestamp};
use room_sync::store::CURRENT_ROOM_PATH;
use room_sync::{
    BackendConfig, BackendInit, CoordinatorPhase, DependencyStatus, KeyValueStore, MemoryBackend,
    MemoryStore, RoomSyncError, Status,
};
use serde_json::json;

use common::{
    is_default_room, next_room, next_status, settle, start_coordinator, wait_for_room,
    ScriptedBackend, ScriptedStore, SessionCall,
};

// ── Bootstrap ───────────────────────────────────────────────────────

#[tokio::test]
async fn memory_backend_bootstraps_and_publishes_context() {
    let backend = MemoryBackend::new();
    let init = BackendInit::new(BackendConfig::new().with_database_url("memory://lobby"));
    let readiness = init.readiness();
    assert!(!readiness.is_ready());

    let context = init.initialize(&backend).await.unwrap();

    assert!(init.is_ready());
    assert!(readiness.is_ready());
    assert!(context.user_id().starts_with("anon-"));
    assert_eq!(context.endpoint(), Some("memory://lobby"));
    let published = readiness.ready().await.unwrap();
    assert_eq!(published.user_id(), context.user_id());
}

#[tokio::test]
async fn initialize_runs_at_most_once() {
    let backend = MemoryBackend::new();
    let init = BackendInit::new(BackendConfig::new());

    let first = init.initialize(&backend).await.unwrap();
    let second = init.initialize(&backend).await;

    assert!(matches!(second, Err(RoomSyncError::AlreadyInitialized)));
    assert_eq!(init.readiness().context().unwrap().user_id(), first.user_id());
}

#[tokio::test]
async fn missing_dependency_fails_without_signing_in() {
    let backend = MemoryBackend::new().with_dependency_status(DependencyStatus::UnavailableMissing);
    let init = BackendInit::new(BackendConfig::new());

    let result = init.initialize(&backend).await;

    assert!(matches!(
        result,
        Err(RoomSyncError::DependencyUnavailable(
            DependencyStatus::UnavailableMissing
        ))
    ));
    assert!(!init.is_ready());

    // A failed bootstrap is not retried on the same initializer.
    let retry = init.initialize(&MemoryBackend::new()).await;
    assert!(matches!(retry, Err(RoomSyncError::AlreadyInitialized)));
    assert!(!init.is_ready());
}

#[test]
fn config_keeps_only_non_empty_database_urls() {
    let config = BackendConfig::new().with_database_url("memory://lobby");
    assert_eq!(config.database_url.as_deref(), Some("memory://lobby"));

    assert_eq!(BackendConfig::new().database_url, None);
    assert_eq!(BackendConfig::new().with_database_url("").database_url, None);
}

// ── Readiness gating the coordinator ────────────────────────────────

#[tokio::test]
async fn coordinator_started_first_waits_for_readiness() {
    let store = ScriptedStore::with_value(CURRENT_ROOM_PATH, json!("Lobby1")).await;
    let init = BackendInit::new(BackendConfig::new());
    let (mut coordinator, mut events, _session) = start_coordinator(init.readiness());

    settle().await;
    assert_eq!(coordinator.phase().await, CoordinatorPhase::Unsubscribed);
    assert!(store.journal().is_empty());

    init.initialize(&ScriptedBackend::new(&store)).await.unwrap();
    next_status(&mut events, |s| *s == Status::Subscribing).await;
    wait_for_room(&mut events, "Lobby1").await;
    assert_eq!(coordinator.phase().await, CoordinatorPhase::Synchronized);

    coordinator.shutdown().await;
}

#[tokio::test]
async fn coordinator_started_after_readiness_still_syncs() {
    let store = ScriptedStore::new();
    let init = BackendInit::new(BackendConfig::new());
    init.initialize(&ScriptedBackend::new(&store)).await.unwrap();

    // Readiness already resolved before anyone listened.
    tokio::time::sleep(Duration::from_millis(10)).await;
    let (mut coordinator, mut events, _session) = start_coordinator(init.readiness());

    let room = next_room(&mut events).await;
    assert!(is_default_room(&room));

    coordinator.shutdown().await;
}

#[tokio::test]
async fn dependency_failure_leaves_coordinator_unsubscribed() {
    let store = ScriptedStore::new();
    let init = BackendInit::new(BackendConfig::new());
    let (mut coordinator, mut events, session) = start_coordinator(init.readiness());

    let mut backend = ScriptedBackend::new(&store);
    backend.dependency_status = DependencyStatus::UnavailableUpdating;
    assert!(init.initialize(&backend).await.is_err());

    coordinator.create_room().unwrap();
    next_status(&mut events, |s| *s == Status::BackendNotReady).await;
    settle().await;

    assert_eq!(coordinator.phase().await, CoordinatorPhase::Unsubscribed);
    assert!(store.journal().is_empty());
    assert!(session.calls().is_empty());

    coordinator.shutdown().await;
}

#[tokio::test]
async fn sign_in_failure_leaves_coordinator_unsubscribed() {
    let store = ScriptedStore::new();
    let init = BackendInit::new(BackendConfig::new());
    let (mut coordinator, mut events, _session) = start_coordinator(init.readiness());

    let mut backend = ScriptedBackend::new(&store);
    backend.user_id = None;
    let result = init.initialize(&backend).await;
    assert!(matches!(result, Err(RoomSyncError::AuthFailure(_))));

    coordinator
        .set_network("Arena", room_sync::SessionLaunch::Join)
        .unwrap();
    next_status(&mut events, |s| *s == Status::BackendNotReady).await;
    settle().await;

    assert_eq!(coordinator.phase().await, CoordinatorPhase::Unsubscribed);
    assert!(store.journal().is_empty());

    coordinator.shutdown().await;
}

// ── End to end over the memory backend ──────────────────────────────

#[tokio::test]
async fn memory_backend_create_room_end_to_end() {
    let store = MemoryStore::new();
    let backend = MemoryBackend::with_store(store.clone());
    let init = BackendInit::new(BackendConfig::new());
    let context = init.initialize(&backend).await.unwrap();
    let (mut coordinator, mut events, session) = start_coordinator(init.readiness());

    let default_room = next_room(&mut events).await;
    assert!(is_default_room(&default_room));

    coordinator.create_room().unwrap();
    let room = match next_status(&mut events, |s| matches!(s, Status::RoomCreated(_))).await {
        Status::RoomCreated(room) => room,
        other => panic!("expected RoomCreated, got {other:?}"),
    };
    wait_for_room(&mut events, &room).await;
    settle().await;

    let snapshot = store.snapshot().await;
    assert_eq!(snapshot[CURRENT_ROOM_PATH], json!(room));
    let record: RoomRecord = serde_json::from_value(snapshot["rooms"][&room].clone()).unwrap();
    assert_eq!(record.owner, context.user_id());
    assert!(matches!(record.created_at, Timestamp::Millis(_)));
    assert_eq!(session.calls(), vec![SessionCall::Create(room.clone())]);
    assert_eq!(
        store.read(CURRENT_ROOM_PATH).await.unwrap(),
        Some(json!(room))
    );

    coordinator.shutdown().await;
}
