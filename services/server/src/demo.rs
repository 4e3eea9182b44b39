//! In-memory stand-ins for the out-of-scope collaborators the core
//! depends on: a Kubernetes informer (here, a synthetic ticker that
//! manufactures `EventEntry`s) and a snapshot builder (here, a static
//! seed list per scope). Real deployments would replace both with
//! clients of the Kubernetes API.

use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use stream_core::snapshot::{Snapshot, SnapshotBuilder, SnapshotError};
use stream_core::Manager;
use stream_protocol::{EventEntry, ScopeKey};
use tracing::debug;

pub struct DemoSnapshotBuilder {
    seeds: RwLock<HashMap<String, Vec<EventEntry>>>,
}

impl DemoSnapshotBuilder {
    pub fn new() -> Self {
        Self {
            seeds: RwLock::new(HashMap::new()),
        }
    }

    pub fn seed(&self, scope: &ScopeKey, events: Vec<EventEntry>) {
        self.seeds
            .write()
            .expect("demo snapshot seeds lock poisoned")
            .insert(scope.as_str().to_owned(), events);
    }
}

impl Default for DemoSnapshotBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SnapshotBuilder for DemoSnapshotBuilder {
    async fn build(&self, scope: &ScopeKey) -> Result<Snapshot, SnapshotError> {
        let events = self
            .seeds
            .read()
            .expect("demo snapshot seeds lock poisoned")
            .get(scope.as_str())
            .cloned()
            .unwrap_or_default();
        Ok(Snapshot {
            total: events.len(),
            truncated: false,
            events,
        })
    }
}

/// Spawns a task that periodically broadcasts a synthetic event into
/// `scope`, standing in for an upstream cluster informer's change feed.
/// Demo/test wiring only; not part of the fan-out core.
pub fn spawn_demo_change_source(manager: Manager, scope: ScopeKey, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(interval);
        let mut counter: u64 = 0;
        loop {
            tick.tick().await;
            counter += 1;
            let entry = EventEntry {
                kind: "Event".to_owned(),
                name: format!("demo-event-{counter}"),
                namespace: None,
                event_type: "Normal".to_owned(),
                source: "demo-change-source".to_owned(),
                reason: "Synthetic".to_owned(),
                message: format!("synthetic event #{counter}"),
                age: "0s".to_owned(),
                created_at_ms: now_ms(),
                cluster_id: scope
                    .cluster_id()
                    .map(ToOwned::to_owned)
                    .unwrap_or_default(),
                cluster_name: scope
                    .cluster_id()
                    .map(ToOwned::to_owned)
                    .unwrap_or_default(),
            };
            let outcome = manager.broadcast(&scope, entry);
            debug!(?outcome, "demo change source broadcast");
        }
    })
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
