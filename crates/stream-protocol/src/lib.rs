//! Wire types shared by the fan-out core and its transports: scope keys,
//! event entries, SSE/WS envelopes, and the HTTP error envelope. No I/O.

pub mod event;
pub mod scope;
pub mod ws;

pub use event::{BufferedEvent, EventEntry, HttpErrorEnvelope, PermissionDeniedDetails, SsePayload};
pub use scope::{parse_sub_scope, split_cluster_id, Domain, InvalidScope, ScopeKey, SubScope};
pub use ws::{ClientMessage, ServerEnvelope, ServerMessage};
