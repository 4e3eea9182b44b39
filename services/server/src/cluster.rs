//! Cluster-name resolution for WS cluster-identity annotation (spec §4.3
//! "Cluster identity annotation"). Kubernetes cluster registration is out
//! of scope for the streaming core, so this is a thin adapter seam.

use std::collections::HashMap;
use std::sync::RwLock;

pub trait ClusterDirectory: Send + Sync {
    fn resolve_cluster_name(&self, cluster_id: &str) -> Option<String>;
}

/// In-memory demo directory standing in for a real cluster registry.
pub struct InMemoryClusterDirectory {
    names: RwLock<HashMap<String, String>>,
}

impl InMemoryClusterDirectory {
    pub fn new() -> Self {
        Self {
            names: RwLock::new(HashMap::new()),
        }
    }

    pub fn register(&self, cluster_id: impl Into<String>, name: impl Into<String>) {
        self.names
            .write()
            .expect("cluster directory lock poisoned")
            .insert(cluster_id.into(), name.into());
    }
}

impl Default for InMemoryClusterDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl ClusterDirectory for InMemoryClusterDirectory {
    fn resolve_cluster_name(&self, cluster_id: &str) -> Option<String> {
        self.names
            .read()
            .expect("cluster directory lock poisoned")
            .get(cluster_id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_registered_clusters_and_none_for_unknown() {
        let directory = InMemoryClusterDirectory::new();
        directory.register("c1", "production");
        assert_eq!(
            directory.resolve_cluster_name("c1"),
            Some("production".to_owned())
        );
        assert_eq!(directory.resolve_cluster_name("c2"), None);
    }
}
