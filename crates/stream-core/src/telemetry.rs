//! Fire-and-forget counters (spec §1 "telemetry recorder" is an external
//! collaborator; the core only needs a sink to report into).

use stream_protocol::ScopeKey;

pub trait Telemetry: Send + Sync {
    fn broadcast(&self, _scope: &ScopeKey, _delivered: usize, _backlog_dropped: usize, _closed: usize) {}
    fn subscriber_limit_exceeded(&self, _scope: &ScopeKey) {}
    fn poller_refresh(&self, _success: bool) {}
}

/// Default sink used when the caller doesn't wire up a real recorder.
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {}
