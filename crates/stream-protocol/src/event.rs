//! Event entries and the envelopes they travel in.

use serde::{Deserialize, Serialize};

/// An immutable change-notification record, adapted from an upstream cluster
/// informer (spec §3). Never mutated after publication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEntry {
    pub kind: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    /// Severity/type, e.g. "Normal", "Warning".
    #[serde(rename = "type")]
    pub event_type: String,
    pub source: String,
    pub reason: String,
    pub message: String,
    pub age: String,
    pub created_at_ms: i64,
    pub cluster_id: String,
    pub cluster_name: String,
}

/// `(sequence, entry)` — sequence is strictly increasing within its scope,
/// allocated under the manager lock (spec §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferedEvent {
    pub sequence: u64,
    pub entry: EventEntry,
}

/// Structured detail for a `PermissionDenied` error (spec §6, §7): rendered
/// by the client UI, never retried by the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionDeniedDetails {
    pub domain: String,
    pub resource: String,
}

/// The SSE JSON payload schema (spec §6).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SsePayload {
    pub domain: String,
    pub scope: String,
    pub sequence: u64,
    pub generated_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reset: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub events: Option<Vec<EventEntry>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncated: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<PermissionDeniedDetails>,
}

/// Frozen HTTP error envelope used by non-2xx responses, grounded in the
/// teacher's `rt_protocol::HttpErrorEnvelope`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpErrorEnvelope {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}
