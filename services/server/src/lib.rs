pub mod cluster;
pub mod config;
pub mod demo;
pub mod error;
pub mod http;
pub mod state;
pub mod ws;

pub use state::AppState;

use axum::error_handling::HandleErrorLayer;
use axum::routing::get;
use axum::{BoxError, Router};
use tower::ServiceBuilder;

pub fn build_router(state: AppState) -> Router {
    let ws_handshake_timeout = state.config.ws_handshake_timeout;
    Router::new()
        .route("/api/v1/events", get(http::sse::handler))
        .route(
            "/ws/v1/events",
            get(ws::handler).layer(
                ServiceBuilder::new()
                    .layer(HandleErrorLayer::new(handshake_timed_out))
                    .timeout(ws_handshake_timeout),
            ),
        )
        .route("/healthz", get(health::healthz))
        .route("/readyz", get(health::readyz))
        .with_state(state)
}

async fn handshake_timed_out(_err: BoxError) -> crate::error::HttpResponse {
    crate::error::bad_request("websocket handshake timed out")
}

mod health {
    use axum::response::IntoResponse;

    pub async fn healthz() -> impl IntoResponse {
        "ok"
    }

    pub async fn readyz() -> impl IntoResponse {
        "ok"
    }
}
