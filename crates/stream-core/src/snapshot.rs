//! The snapshot-builder seam (spec §1, §4.2): the manager relays live
//! events, but the initial state for a scope comes from an external
//! collaborator the core only depends on through this trait.

use async_trait::async_trait;
use stream_protocol::{EventEntry, PermissionDeniedDetails, ScopeKey};

#[derive(Debug, Clone)]
pub struct Snapshot {
    pub events: Vec<EventEntry>,
    pub total: usize,
    pub truncated: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("permission denied for {0:?}")]
    PermissionDenied(PermissionDeniedDetails),
    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait SnapshotBuilder: Send + Sync {
    async fn build(&self, scope: &ScopeKey) -> Result<Snapshot, SnapshotError>;
}
