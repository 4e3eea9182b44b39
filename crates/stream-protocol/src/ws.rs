//! WebSocket multiplexer wire messages (spec §4.3, §6).

use serde::{Deserialize, Serialize};

use crate::event::{EventEntry, PermissionDeniedDetails};

/// Client -> server messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    Request {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cluster_id: Option<String>,
        domain: String,
        scope: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resource_version: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        resume_token: Option<u64>,
    },
    Cancel {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cluster_id: Option<String>,
        domain: String,
        scope: String,
    },
    /// Present in the closed message-type set (spec §6) but not otherwise
    /// acted upon by the multiplexer; reserved for client-side flow control.
    Ack {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cluster_id: Option<String>,
        domain: String,
        scope: String,
        sequence: u64,
    },
}

/// Server -> client messages. Every variant carries cluster identity,
/// annotated on the outbound path if the producer didn't already set it
/// (spec §4.3 "Cluster identity annotation").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Added(ServerEnvelope),
    Modified(ServerEnvelope),
    Deleted(ServerEnvelope),
    Reset(ServerEnvelope),
    Complete(ServerEnvelope),
    Error(ServerEnvelope),
    Heartbeat(ServerEnvelope),
}

impl ServerMessage {
    pub fn envelope(&self) -> &ServerEnvelope {
        match self {
            ServerMessage::Added(e)
            | ServerMessage::Modified(e)
            | ServerMessage::Deleted(e)
            | ServerMessage::Reset(e)
            | ServerMessage::Complete(e)
            | ServerMessage::Error(e)
            | ServerMessage::Heartbeat(e) => e,
        }
    }

    pub fn envelope_mut(&mut self) -> &mut ServerEnvelope {
        match self {
            ServerMessage::Added(e)
            | ServerMessage::Modified(e)
            | ServerMessage::Deleted(e)
            | ServerMessage::Reset(e)
            | ServerMessage::Complete(e)
            | ServerMessage::Error(e)
            | ServerMessage::Heartbeat(e) => e,
        }
    }

    /// `true` for the variants a RESET/backpressure policy treats as
    /// resynchronizable payloads tied to one `(domain, scope)`.
    pub fn domain_scope(&self) -> (&str, &str) {
        let e = self.envelope();
        (&e.domain, &e.scope)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ServerEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,
    pub domain: String,
    pub scope: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row: Option<EventEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<PermissionDeniedDetails>,
}

impl ServerEnvelope {
    pub fn for_scope(domain: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            scope: scope.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_request_round_trips_through_json() {
        let msg = ClientMessage::Request {
            cluster_id: Some("c1".to_owned()),
            domain: "pods".to_owned(),
            scope: "default".to_owned(),
            resource_version: None,
            resume_token: Some(42),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"REQUEST\""));
        let back: ClientMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(msg, back);
    }

    #[test]
    fn server_message_envelope_accessors_find_domain_scope() {
        let msg = ServerMessage::Reset(ServerEnvelope::for_scope("pods", "default"));
        assert_eq!(msg.domain_scope(), ("pods", "default"));
    }
}
