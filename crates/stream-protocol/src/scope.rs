//! Scope keys: the routing identity events and subscriptions are keyed on.
//!
//! Grammar (spec §3, §6):
//! ```text
//! scope       := [cluster-id "|"] sub-scope
//! sub-scope   := "cluster" | "namespace:" name | empty
//! ```
//! `empty` or `"cluster"` normalizes to the cluster-scoped domain;
//! `"namespace:<name>"` normalizes to the namespace-scoped domain. Any other
//! sub-scope is rejected.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The two event domains a sub-scope can resolve to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Domain {
    ClusterEvents,
    NamespaceEvents,
}

impl Domain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Domain::ClusterEvents => "cluster_events",
            Domain::NamespaceEvents => "namespace_events",
        }
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed, normalized sub-scope: `cluster` or `namespace:<name>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SubScope {
    Cluster,
    Namespace(String),
}

impl SubScope {
    pub fn domain(&self) -> Domain {
        match self {
            SubScope::Cluster => Domain::ClusterEvents,
            SubScope::Namespace(_) => Domain::NamespaceEvents,
        }
    }

    /// Render back to wire form: `"cluster"` or `"namespace:<name>"`.
    pub fn as_wire(&self) -> String {
        match self {
            SubScope::Cluster => "cluster".to_owned(),
            SubScope::Namespace(name) => format!("namespace:{name}"),
        }
    }
}

impl fmt::Display for SubScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.as_wire())
    }
}

/// Raised when a `scope` parameter doesn't match the grammar in spec §6.
#[derive(Debug, Clone, thiserror::Error)]
#[error("invalid scope: {0}")]
pub struct InvalidScope(pub String);

/// Parse and normalize a sub-scope string (the part after any `cluster-id|`
/// prefix has already been split off). Empty string normalizes to `cluster`.
pub fn parse_sub_scope(raw: &str) -> Result<SubScope, InvalidScope> {
    if raw.is_empty() || raw == "cluster" {
        return Ok(SubScope::Cluster);
    }
    if let Some(name) = raw.strip_prefix("namespace:") {
        if name.is_empty() {
            return Err(InvalidScope(raw.to_owned()));
        }
        return Ok(SubScope::Namespace(name.to_owned()));
    }
    Err(InvalidScope(raw.to_owned()))
}

/// Split `cluster-id|sub-scope` into its two parts. Scopes with no `|` have
/// no cluster id (single-cluster session context supplies it separately).
pub fn split_cluster_id(raw: &str) -> (Option<&str>, &str) {
    match raw.split_once('|') {
        Some((cluster_id, rest)) => (Some(cluster_id), rest),
        None => (None, raw),
    }
}

/// Opaque routing key: `cluster-id "|" sub-scope`. Equality, hashing, and
/// splitting off the cluster id are the only operations the fan-out manager
/// performs on it (spec §3): it never inspects a key's structure otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeKey(String);

impl ScopeKey {
    pub fn new(cluster_id: &str, sub_scope: &SubScope) -> Self {
        Self(format!("{cluster_id}|{}", sub_scope.as_wire()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The cluster id this scope key was built with, if any.
    pub fn cluster_id(&self) -> Option<&str> {
        split_cluster_id(&self.0).0
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_cluster_normalize_to_cluster_domain() {
        assert_eq!(parse_sub_scope("").unwrap(), SubScope::Cluster);
        assert_eq!(parse_sub_scope("cluster").unwrap(), SubScope::Cluster);
        assert_eq!(parse_sub_scope("cluster").unwrap().domain(), Domain::ClusterEvents);
    }

    #[test]
    fn namespace_scope_parses_name_and_domain() {
        let s = parse_sub_scope("namespace:kube-system").unwrap();
        assert_eq!(s, SubScope::Namespace("kube-system".to_owned()));
        assert_eq!(s.domain(), Domain::NamespaceEvents);
        assert_eq!(s.as_wire(), "namespace:kube-system");
    }

    #[test]
    fn other_sub_scopes_are_rejected() {
        assert!(parse_sub_scope("namespace:").is_err());
        assert!(parse_sub_scope("pods").is_err());
        assert!(parse_sub_scope("namespace").is_err());
    }

    #[test]
    fn split_cluster_id_handles_presence_and_absence() {
        assert_eq!(split_cluster_id("c1|cluster"), (Some("c1"), "cluster"));
        assert_eq!(
            split_cluster_id("c1|namespace:default"),
            (Some("c1"), "namespace:default")
        );
        assert_eq!(split_cluster_id("cluster"), (None, "cluster"));
    }

    #[test]
    fn scope_key_equality_and_cluster_id_extraction() {
        let sub = parse_sub_scope("namespace:default").unwrap();
        let key_a = ScopeKey::new("c1", &sub);
        let key_b = ScopeKey::new("c1", &sub);
        assert_eq!(key_a, key_b);
        assert_eq!(key_a.cluster_id(), Some("c1"));
        assert_eq!(key_a.as_str(), "c1|namespace:default");
    }
}
