use std::sync::Arc;

use stream_core::snapshot::SnapshotBuilder;
use stream_core::{AllowAll, Manager, NoopTelemetry, PermissionChecker, Telemetry};

use crate::cluster::{ClusterDirectory, InMemoryClusterDirectory};
use crate::config::ServerConfig;
use crate::demo::DemoSnapshotBuilder;

#[derive(Clone)]
pub struct AppState {
    pub manager: Manager,
    pub snapshot_builder: Arc<dyn SnapshotBuilder>,
    pub permission_checker: Arc<dyn PermissionChecker>,
    pub cluster_directory: Arc<dyn ClusterDirectory>,
    pub telemetry: Arc<dyn Telemetry>,
    pub config: ServerConfig,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            manager: Manager::new(config.manager),
            snapshot_builder: Arc::new(DemoSnapshotBuilder::new()),
            permission_checker: Arc::new(AllowAll),
            cluster_directory: Arc::new(InMemoryClusterDirectory::new()),
            telemetry: Arc::new(NoopTelemetry),
            config,
        }
    }
}
