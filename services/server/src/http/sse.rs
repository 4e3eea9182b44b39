//! The SSE handler (spec §4.2): single-scope one-way delivery with an
//! initial snapshot and resume.

use std::convert::Infallible;
use std::pin::Pin;

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures_util::Stream;
use serde::Deserialize;
use stream_core::snapshot::SnapshotError;
use stream_core::manager::ResumeSubscribeResult;
use stream_protocol::{parse_sub_scope, split_cluster_id, BufferedEvent, ScopeKey, SsePayload};
use tracing::warn;

use crate::error::{bad_request, internal_error, HttpResponse};
use crate::state::AppState;

/// Every branch of the SSE handler assembles its own `async_stream::stream!`
/// generator; boxing here is what lets them share one return type.
type EventStream = Pin<Box<dyn Stream<Item = Result<Event, Infallible>> + Send>>;

#[derive(Debug, Deserialize)]
pub struct SseQuery {
    scope: String,
    since: Option<String>,
}

pub async fn handler(
    State(state): State<AppState>,
    Query(query): Query<SseQuery>,
    headers: HeaderMap,
) -> Result<Sse<EventStream>, HttpResponse> {
    let (cluster_id, sub_scope_raw) = split_cluster_id(&query.scope);
    let sub_scope = parse_sub_scope(sub_scope_raw).map_err(|e| bad_request(e.to_string()))?;
    let scope_key = ScopeKey::new(cluster_id.unwrap_or(""), &sub_scope);
    let domain = sub_scope.domain();

    let since = resume_token(&query, &headers);

    let (replay, subscription, cancel) = if since > 0 {
        match state.manager.subscribe_with_resume(&scope_key, since) {
            ResumeSubscribeResult::Ok {
                replay,
                subscription,
                cancel,
            } => (replay, subscription, cancel),
            ResumeSubscribeResult::TooOld | ResumeSubscribeResult::LimitExceeded(_) => {
                return build_from_snapshot(state, scope_key, domain).await
            }
        }
    } else {
        return build_from_snapshot(state, scope_key, domain).await;
    };

    let domain = domain.to_string();
    let scope_str = scope_key.as_str().to_owned();
    let heartbeat_timeout = state.config.sse_heartbeat_timeout;
    let initial_frames: Vec<Event> = replay
        .into_iter()
        .map(|buffered| buffered_event(&domain, &scope_str, buffered))
        .collect();

    let stream: EventStream = Box::pin(async_stream::stream! {
        // Held for the stream's lifetime: dropping it unsubscribes.
        let _cancel = cancel;
        for frame in initial_frames {
            yield Ok(frame);
        }
        let mut subscription = subscription;
        loop {
            match tokio::time::timeout(heartbeat_timeout, subscription.receiver.recv()).await {
                Ok(Some(buffered)) => yield Ok(buffered_event(&domain, &scope_str, buffered)),
                Ok(None) => break,
                Err(_elapsed) => {
                    let payload = SsePayload {
                        domain: domain.clone(),
                        scope: scope_str.clone(),
                        sequence: 0,
                        generated_at: now_ms(),
                        error: Some("no events delivered within heartbeat timeout".to_owned()),
                        ..Default::default()
                    };
                    yield Ok(payload_event("event", 0, &payload));
                }
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(state.config.sse_keep_alive_interval)
            .text("keep-alive"),
    ))
}

async fn build_from_snapshot(
    state: AppState,
    scope_key: ScopeKey,
    domain: stream_protocol::Domain,
) -> Result<Sse<EventStream>, HttpResponse> {
    let (subscription, cancel) = state
        .manager
        .subscribe(&scope_key)
        .map_err(internal_error)?;

    let snapshot = match state.snapshot_builder.build(&scope_key).await {
        Ok(snapshot) => snapshot,
        Err(SnapshotError::PermissionDenied(details)) => {
            let domain = domain.to_string();
            let scope_str = scope_key.as_str().to_owned();
            let payload = SsePayload {
                domain: domain.clone(),
                scope: scope_str.clone(),
                sequence: 0,
                generated_at: now_ms(),
                error: Some("permission denied".to_owned()),
                error_details: Some(details),
                ..Default::default()
            };
            let frame = payload_event("event", 0, &payload);
            let stream: EventStream = Box::pin(async_stream::stream! {
                yield Ok(frame);
            });
            return Ok(Sse::new(stream).keep_alive(
                KeepAlive::new()
                    .interval(state.config.sse_keep_alive_interval)
                    .text("keep-alive"),
            ));
        }
        Err(SnapshotError::Other(message)) => {
            warn!(%message, "snapshot builder failed");
            return Err(internal_error(message));
        }
    };

    let sequence = state.manager.next_sequence(&scope_key);
    let domain_str = domain.to_string();
    let scope_str = scope_key.as_str().to_owned();
    let heartbeat_timeout = state.config.sse_heartbeat_timeout;
    let reset_payload = SsePayload {
        domain: domain_str.clone(),
        scope: scope_str.clone(),
        sequence,
        generated_at: now_ms(),
        reset: Some(true),
        total: Some(snapshot.total),
        truncated: Some(snapshot.truncated),
        events: Some(snapshot.events),
        ..Default::default()
    };
    let reset_frame = payload_event("event", sequence, &reset_payload);

    let stream: EventStream = Box::pin(async_stream::stream! {
        let _cancel = cancel;
        yield Ok(reset_frame);
        let mut subscription = subscription;
        loop {
            match tokio::time::timeout(heartbeat_timeout, subscription.receiver.recv()).await {
                Ok(Some(buffered)) => yield Ok(buffered_event(&domain_str, &scope_str, buffered)),
                Ok(None) => break,
                Err(_elapsed) => {
                    let payload = SsePayload {
                        domain: domain_str.clone(),
                        scope: scope_str.clone(),
                        sequence: 0,
                        generated_at: now_ms(),
                        error: Some("no events delivered within heartbeat timeout".to_owned()),
                        ..Default::default()
                    };
                    yield Ok(payload_event("event", 0, &payload));
                }
            }
        }
    });

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(state.config.sse_keep_alive_interval)
            .text("keep-alive"),
    ))
}

fn resume_token(query: &SseQuery, headers: &HeaderMap) -> u64 {
    query
        .since
        .as_deref()
        .and_then(|v| v.parse().ok())
        .or_else(|| {
            headers
                .get("last-event-id")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
        })
        .unwrap_or(0)
}

fn buffered_event(domain: &str, scope: &str, buffered: BufferedEvent) -> Event {
    let payload = SsePayload {
        domain: domain.to_owned(),
        scope: scope.to_owned(),
        sequence: buffered.sequence,
        generated_at: now_ms(),
        events: Some(vec![buffered.entry]),
        ..Default::default()
    };
    payload_event("event", buffered.sequence, &payload)
}

fn payload_event(event_type: &str, sequence: u64, payload: &SsePayload) -> Event {
    let json = serde_json::to_string(payload).unwrap_or_else(|_| "{}".to_owned());
    Event::default()
        .event(event_type)
        .id(sequence.to_string())
        .data(json)
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
