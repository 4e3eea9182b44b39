//! The fan-out core: ring buffer, bounded delivery channel, the fan-out
//! manager itself, the demand poller, and the client-side fallback state
//! machine. No HTTP or WebSocket wiring lives here — see `services/server`.

pub mod access;
pub mod channel;
pub mod fallback;
pub mod manager;
pub mod poller;
pub mod ring;
pub mod snapshot;
pub mod telemetry;

pub use access::{AllowAll, PermissionChecker};
pub use manager::{
    BroadcastOutcome, CancelHandle, Manager, ManagerConfig, ResumeSubscribeResult, Subscription,
    SubscriberLimitExceeded,
};
pub use ring::RingBuffer;
pub use snapshot::{Snapshot, SnapshotBuilder, SnapshotError};
pub use telemetry::{NoopTelemetry, Telemetry};
