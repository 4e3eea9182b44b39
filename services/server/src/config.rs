//! Construction-time configuration. Values are read once from the
//! environment at startup, never polled again.

use std::time::Duration;

use stream_core::ManagerConfig;

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub manager: ManagerConfig,
    pub sse_keep_alive_interval: Duration,
    pub sse_heartbeat_timeout: Duration,
    pub ws_heartbeat_interval: Duration,
    pub ws_write_timeout: Duration,
    pub ws_outgoing_queue_capacity: usize,
    pub ws_handshake_timeout: Duration,
    pub ws_max_message_size: usize,
    pub ws_max_frame_size: usize,
    /// Empty means "no origin policy configured" — every origin is admitted.
    pub ws_allowed_origins: Vec<String>,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            manager: ManagerConfig {
                ring_capacity: env_or("STREAM_RING_CAPACITY", 200),
                subscriber_channel_capacity: env_or("STREAM_SUBSCRIBER_CHANNEL_CAPACITY", 64),
                max_subscribers_per_scope: env_or("STREAM_MAX_SUBSCRIBERS_PER_SCOPE", 256),
            },
            sse_keep_alive_interval: Duration::from_secs(env_or("SSE_KEEP_ALIVE_SECS", 15)),
            sse_heartbeat_timeout: Duration::from_secs(env_or("SSE_HEARTBEAT_TIMEOUT_SECS", 45)),
            ws_heartbeat_interval: Duration::from_secs(env_or("WS_HEARTBEAT_INTERVAL_SECS", 20)),
            ws_write_timeout: Duration::from_secs(env_or("WS_WRITE_TIMEOUT_SECS", 10)),
            ws_outgoing_queue_capacity: env_or("WS_OUTGOING_QUEUE_CAPACITY", 128),
            ws_handshake_timeout: Duration::from_secs(env_or("WS_HANDSHAKE_TIMEOUT_SECS", 10)),
            ws_max_message_size: env_or("WS_MAX_MESSAGE_SIZE_BYTES", 16 * 1024 * 1024),
            ws_max_frame_size: env_or("WS_MAX_FRAME_SIZE_BYTES", 1024 * 1024),
            ws_allowed_origins: std::env::var("WS_ALLOWED_ORIGINS")
                .ok()
                .map(|v| v.split(',').map(|o| o.trim().to_owned()).filter(|o| !o.is_empty()).collect())
                .unwrap_or_default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
