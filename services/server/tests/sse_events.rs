//! Integration tests for the SSE handler (spec §4.2): initial snapshot,
//! live delivery, resume, and permission-denied error frames.

use std::time::Duration;

use async_trait::async_trait;
use server::config::ServerConfig;
use server::state::AppState;
use stream_core::snapshot::{Snapshot, SnapshotBuilder, SnapshotError};
use stream_core::ManagerConfig;
use stream_protocol::{EventEntry, PermissionDeniedDetails, ScopeKey, SubScope};

fn spawn_server(state: AppState) -> std::net::SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let addr = listener.local_addr().unwrap();
    let listener = tokio::net::TcpListener::from_std(listener).unwrap();
    tokio::spawn(async move {
        axum::serve(listener, server::build_router(state)).await.unwrap();
    });
    addr
}

fn event(name: &str) -> EventEntry {
    EventEntry {
        kind: "Event".to_owned(),
        name: name.to_owned(),
        namespace: None,
        event_type: "Normal".to_owned(),
        source: "kubelet".to_owned(),
        reason: "Started".to_owned(),
        message: format!("{name} started"),
        age: "0s".to_owned(),
        created_at_ms: 0,
        cluster_id: String::new(),
        cluster_name: String::new(),
    }
}

/// Collects SSE `event:`/`data:` frames out of raw chunks until `want`
/// "event:" lines have been seen or the deadline passes.
async fn collect_frames(
    response: &mut reqwest::Response,
    want: usize,
    timeout: Duration,
) -> Vec<String> {
    let mut collected = String::new();
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        match tokio::time::timeout(Duration::from_millis(500), response.chunk()).await {
            Ok(Ok(Some(chunk))) => {
                collected.push_str(&String::from_utf8_lossy(&chunk));
                if collected.matches("event:").count() >= want {
                    break;
                }
            }
            Ok(Ok(None)) => break,
            Ok(Err(e)) => panic!("error reading SSE chunk: {e}"),
            Err(_) => continue,
        }
    }
    collected
        .split("\n\n")
        .filter(|frame| !frame.trim().is_empty())
        .map(str::to_owned)
        .collect()
}

fn data_line(frame: &str) -> &str {
    frame
        .lines()
        .find_map(|l| l.strip_prefix("data:"))
        .map(str::trim)
        .unwrap_or_default()
}

#[tokio::test]
async fn initial_snapshot_then_live_events() {
    let builder = std::sync::Arc::new(stream_core_test_snapshot_builder());
    let scope = ScopeKey::new("", &SubScope::Cluster);
    builder.seed(&scope, vec![event("seed-1")]);

    let config = ServerConfig {
        manager: ManagerConfig::default(),
        sse_heartbeat_timeout: Duration::from_secs(30),
        ..ServerConfig::from_env()
    };
    let manager = stream_core::Manager::new(config.manager);
    let state = AppState {
        manager: manager.clone(),
        snapshot_builder: builder.clone(),
        cluster_directory: std::sync::Arc::new(server::cluster::InMemoryClusterDirectory::new()),
        permission_checker: std::sync::Arc::new(stream_core::AllowAll),
        telemetry: std::sync::Arc::new(stream_core::NoopTelemetry),
        config,
    };
    let addr = spawn_server(state);

    let url = format!("http://{addr}/api/v1/events?scope=cluster");
    let mut response = reqwest::get(&url).await.unwrap();
    assert_eq!(response.status(), 200);

    let frames = collect_frames(&mut response, 1, Duration::from_secs(5)).await;
    assert!(!frames.is_empty(), "expected at least the initial reset frame");
    let payload: serde_json::Value = serde_json::from_str(data_line(&frames[0])).unwrap();
    assert_eq!(payload["reset"], true);
    assert_eq!(payload["total"], 1);
    assert_eq!(payload["events"][0]["name"], "seed-1");

    // Give the subscription a moment to register before broadcasting.
    tokio::time::sleep(Duration::from_millis(100)).await;
    manager.broadcast(&scope, event("live-1"));

    let frames = collect_frames(&mut response, 2, Duration::from_secs(5)).await;
    let live = frames
        .iter()
        .map(|f| serde_json::from_str::<serde_json::Value>(data_line(f)).unwrap())
        .find(|p| p["events"][0]["name"] == "live-1");
    assert!(live.is_some(), "expected live-1 to be delivered, got: {frames:?}");
}

#[tokio::test]
async fn resume_with_fresh_buffer_skips_snapshot_reset() {
    let builder = std::sync::Arc::new(stream_core_test_snapshot_builder());
    let scope = ScopeKey::new("", &SubScope::Cluster);

    let config = ServerConfig {
        manager: ManagerConfig::default(),
        sse_heartbeat_timeout: Duration::from_secs(30),
        ..ServerConfig::from_env()
    };
    let manager = stream_core::Manager::new(config.manager);
    // Warm the scope first: broadcasting before any subscriber exists is a
    // no-op (the manager's cold-scope rule), so nothing would land in the
    // ring buffer otherwise.
    let (_warm_sub, _warm_cancel) = manager.subscribe(&scope).unwrap();
    manager.broadcast(&scope, event("buffered-1"));
    manager.broadcast(&scope, event("buffered-2"));

    let state = AppState {
        manager: manager.clone(),
        snapshot_builder: builder,
        cluster_directory: std::sync::Arc::new(server::cluster::InMemoryClusterDirectory::new()),
        permission_checker: std::sync::Arc::new(stream_core::AllowAll),
        telemetry: std::sync::Arc::new(stream_core::NoopTelemetry),
        config,
    };
    let addr = spawn_server(state);

    let url = format!("http://{addr}/api/v1/events?scope=cluster&since=1");
    let mut response = reqwest::get(&url).await.unwrap();
    assert_eq!(response.status(), 200);

    let frames = collect_frames(&mut response, 1, Duration::from_secs(5)).await;
    assert_eq!(frames.len(), 1, "only the sequence-2 backlog entry should replay");
    let payload: serde_json::Value = serde_json::from_str(data_line(&frames[0])).unwrap();
    assert!(
        payload.get("reset").is_none(),
        "a successful resume must not carry a reset flag: {payload:?}"
    );
    assert_eq!(payload["events"][0]["name"], "buffered-2");
}

#[tokio::test]
async fn resume_too_old_falls_back_to_snapshot() {
    let builder = std::sync::Arc::new(stream_core_test_snapshot_builder());
    let scope = ScopeKey::new("", &SubScope::Cluster);
    builder.seed(&scope, vec![event("current-state")]);

    let config = ServerConfig {
        manager: ManagerConfig {
            ring_capacity: 1,
            ..ManagerConfig::default()
        },
        sse_heartbeat_timeout: Duration::from_secs(30),
        ..ServerConfig::from_env()
    };
    let manager = stream_core::Manager::new(config.manager);
    manager.broadcast(&scope, event("evicted-1"));
    manager.broadcast(&scope, event("evicted-2"));

    let state = AppState {
        manager,
        snapshot_builder: builder,
        cluster_directory: std::sync::Arc::new(server::cluster::InMemoryClusterDirectory::new()),
        permission_checker: std::sync::Arc::new(stream_core::AllowAll),
        telemetry: std::sync::Arc::new(stream_core::NoopTelemetry),
        config,
    };
    let addr = spawn_server(state);

    let url = format!("http://{addr}/api/v1/events?scope=cluster&since=1");
    let mut response = reqwest::get(&url).await.unwrap();
    assert_eq!(response.status(), 200);

    let frames = collect_frames(&mut response, 1, Duration::from_secs(5)).await;
    let payload: serde_json::Value = serde_json::from_str(data_line(&frames[0])).unwrap();
    assert_eq!(payload["reset"], true, "a too-old resume must fall back to a fresh snapshot");
    assert_eq!(payload["events"][0]["name"], "current-state");
}

#[tokio::test]
async fn permission_denied_surfaces_structured_error_and_no_further_stream() {
    struct DenyingBuilder;

    #[async_trait]
    impl SnapshotBuilder for DenyingBuilder {
        async fn build(&self, _scope: &ScopeKey) -> Result<Snapshot, SnapshotError> {
            Err(SnapshotError::PermissionDenied(PermissionDeniedDetails {
                domain: "cluster_events".to_owned(),
                resource: "events".to_owned(),
            }))
        }
    }

    let config = ServerConfig::from_env();
    let manager = stream_core::Manager::new(config.manager);
    let state = AppState {
        manager,
        snapshot_builder: std::sync::Arc::new(DenyingBuilder),
        cluster_directory: std::sync::Arc::new(server::cluster::InMemoryClusterDirectory::new()),
        permission_checker: std::sync::Arc::new(stream_core::AllowAll),
        telemetry: std::sync::Arc::new(stream_core::NoopTelemetry),
        config,
    };
    let addr = spawn_server(state);

    let url = format!("http://{addr}/api/v1/events?scope=cluster");
    let mut response = reqwest::get(&url).await.unwrap();
    assert_eq!(response.status(), 200);

    let frames = collect_frames(&mut response, 1, Duration::from_secs(5)).await;
    assert_eq!(frames.len(), 1);
    let payload: serde_json::Value = serde_json::from_str(data_line(&frames[0])).unwrap();
    assert_eq!(payload["errorDetails"]["resource"], "events");
}

fn stream_core_test_snapshot_builder() -> server::demo::DemoSnapshotBuilder {
    server::demo::DemoSnapshotBuilder::new()
}
