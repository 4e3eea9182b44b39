pub mod queue;
pub mod session;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::IntoResponse;

use crate::error::{bad_request, HttpResponse};
use crate::state::AppState;

/// Handshake hardening (spec §4.3): bounded message/frame sizes and an
/// origin check before accepting the upgrade. The handshake timeout itself
/// is applied as a `tower::timeout` layer on the route in `build_router`.
pub async fn handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, HttpResponse> {
    if !state.config.ws_allowed_origins.is_empty() {
        let origin = headers
            .get(axum::http::header::ORIGIN)
            .and_then(|v| v.to_str().ok());
        let admitted = origin.is_some_and(|o| state.config.ws_allowed_origins.iter().any(|allowed| allowed == o));
        if !admitted {
            return Err(bad_request("origin not allowed"));
        }
    }

    let ws = ws
        .max_message_size(state.config.ws_max_message_size)
        .max_frame_size(state.config.ws_max_frame_size);

    Ok(ws.on_upgrade(move |socket| {
        session::run(
            socket,
            state.manager,
            state.cluster_directory,
            state.permission_checker,
            state.config,
        )
    }))
}
