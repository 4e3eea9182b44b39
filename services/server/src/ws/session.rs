//! The WebSocket multiplexer session (spec §4.3): many `(cluster, domain,
//! scope)` subscriptions over one connection, per-scope backpressure reset,
//! heartbeats, and per-subscription resume.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::SinkExt;
use stream_core::manager::ResumeSubscribeResult;
use stream_core::{Manager, PermissionChecker};
use stream_protocol::{parse_sub_scope, ClientMessage, ScopeKey, ServerEnvelope, ServerMessage};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cluster::ClusterDirectory;
use crate::config::ServerConfig;
use crate::ws::queue::OutgoingQueue;

type SubKey = (Option<String>, String, String);

struct SubscriptionHandle {
    cancel: stream_core::CancelHandle,
    forwarder: JoinHandle<()>,
}

/// Whether to emit a `RESET` after a failed resume attempt (spec §4.3:
/// "If `sendReset` is configured and no resume succeeded, emit `RESET`").
const SEND_RESET_ON_FAILED_RESUME: bool = true;

pub struct Session {
    manager: Manager,
    cluster_directory: Arc<dyn ClusterDirectory>,
    permission_checker: Arc<dyn PermissionChecker>,
    default_cluster_id: Option<String>,
    subs: Mutex<HashMap<SubKey, SubscriptionHandle>>,
    outgoing: Arc<OutgoingQueue>,
    config: ServerConfig,
}

impl Session {
    pub fn new(
        manager: Manager,
        cluster_directory: Arc<dyn ClusterDirectory>,
        permission_checker: Arc<dyn PermissionChecker>,
        config: ServerConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            manager,
            cluster_directory,
            permission_checker,
            default_cluster_id: None,
            subs: Mutex::new(HashMap::new()),
            outgoing: Arc::new(OutgoingQueue::new(config.ws_outgoing_queue_capacity)),
            config,
        })
    }

    fn annotate(&self, mut msg: ServerMessage, cluster_id: &Option<String>) -> ServerMessage {
        let envelope = msg.envelope_mut();
        if envelope.cluster_id.is_none() {
            envelope.cluster_id = cluster_id.clone().or_else(|| self.default_cluster_id.clone());
        }
        if envelope.cluster_name.is_none() {
            if let Some(id) = envelope.cluster_id.as_deref() {
                envelope.cluster_name = self.cluster_directory.resolve_cluster_name(id);
            }
        }
        msg
    }

    async fn handle_request(
        self: &Arc<Self>,
        cluster_id: Option<String>,
        domain: String,
        scope: String,
        resume_token: Option<u64>,
    ) {
        let sub_scope = match parse_sub_scope(&scope) {
            Ok(s) => s,
            Err(err) => {
                self.outgoing.push(self.annotate(
                    ServerMessage::Error(ServerEnvelope {
                        error: Some(err.to_string()),
                        ..ServerEnvelope::for_scope(domain, scope)
                    }),
                    &cluster_id,
                ));
                return;
            }
        };
        let scope_key = ScopeKey::new(cluster_id.as_deref().unwrap_or(""), &sub_scope);
        let key: SubKey = (cluster_id.clone(), domain.clone(), scope_key.as_str().to_owned());

        if let Err(details) = self.permission_checker.check(&scope_key).await {
            self.outgoing.push(self.annotate(
                ServerMessage::Error(ServerEnvelope {
                    error: Some("permission denied".to_owned()),
                    error_details: Some(details),
                    ..ServerEnvelope::for_scope(domain, scope)
                }),
                &cluster_id,
            ));
            return;
        }

        let token = resume_token.unwrap_or(0);
        let (replay, subscription, cancel, resume_high_water, send_reset) = if token > 0 {
            match self.manager.subscribe_with_resume(&scope_key, token) {
                ResumeSubscribeResult::Ok {
                    replay,
                    subscription,
                    cancel,
                } => {
                    let high_water = replay
                        .iter()
                        .map(|e| e.sequence)
                        .max()
                        .unwrap_or(token)
                        .max(token);
                    (replay, subscription, cancel, high_water, false)
                }
                ResumeSubscribeResult::TooOld => {
                    match self.manager.subscribe(&scope_key) {
                        Ok((subscription, cancel)) => {
                            (Vec::new(), subscription, cancel, 0, SEND_RESET_ON_FAILED_RESUME)
                        }
                        Err(err) => {
                            self.send_error(&cluster_id, &domain, &scope, &err.to_string());
                            return;
                        }
                    }
                }
                ResumeSubscribeResult::LimitExceeded(err) => {
                    self.send_error(&cluster_id, &domain, &scope, &err.to_string());
                    return;
                }
            }
        } else {
            match self.manager.subscribe(&scope_key) {
                Ok((subscription, cancel)) => (Vec::new(), subscription, cancel, 0, false),
                Err(err) => {
                    self.send_error(&cluster_id, &domain, &scope, &err.to_string());
                    return;
                }
            }
        };

        if send_reset {
            self.outgoing.push(
                self.annotate(ServerMessage::Reset(ServerEnvelope::for_scope(domain.clone(), scope.clone())), &cluster_id),
            );
        }

        for buffered in replay {
            let envelope = ServerEnvelope {
                sequence: Some(buffered.sequence),
                row: Some(buffered.entry),
                ..ServerEnvelope::for_scope(domain.clone(), scope.clone())
            };
            self.outgoing
                .push(self.annotate(ServerMessage::Added(envelope), &cluster_id));
        }

        let forwarder = self.spawn_forwarder(
            subscription,
            cluster_id.clone(),
            domain.clone(),
            scope.clone(),
            resume_high_water,
        );

        let mut subs = self.subs.lock().await;
        if let Some(previous) = subs.insert(key, SubscriptionHandle { cancel, forwarder }) {
            previous.forwarder.abort();
        }
    }

    fn spawn_forwarder(
        self: &Arc<Self>,
        mut subscription: stream_core::Subscription,
        cluster_id: Option<String>,
        domain: String,
        scope: String,
        resume_high_water: u64,
    ) -> JoinHandle<()> {
        let session = self.clone();
        tokio::spawn(async move {
            while let Some(buffered) = subscription.receiver.recv().await {
                if buffered.sequence <= resume_high_water {
                    continue;
                }
                let envelope = ServerEnvelope {
                    sequence: Some(buffered.sequence),
                    row: Some(buffered.entry),
                    ..ServerEnvelope::for_scope(domain.clone(), scope.clone())
                };
                session
                    .outgoing
                    .push(session.annotate(ServerMessage::Added(envelope), &cluster_id));
            }
        })
    }

    fn send_error(&self, cluster_id: &Option<String>, domain: &str, scope: &str, message: &str) {
        self.outgoing.push(self.annotate(
            ServerMessage::Error(ServerEnvelope {
                error: Some(message.to_owned()),
                ..ServerEnvelope::for_scope(domain, scope)
            }),
            cluster_id,
        ));
    }

    async fn handle_cancel(&self, cluster_id: Option<String>, domain: String, scope: String) {
        let sub_scope = match parse_sub_scope(&scope) {
            Ok(s) => s,
            Err(_) => return,
        };
        let scope_key = ScopeKey::new(cluster_id.as_deref().unwrap_or(""), &sub_scope);
        let key: SubKey = (cluster_id, domain, scope_key.as_str().to_owned());
        if let Some(handle) = self.subs.lock().await.remove(&key) {
            handle.cancel.cancel();
            handle.forwarder.abort();
        }
    }

    async fn shutdown(&self) {
        self.outgoing.close();
        let mut subs = self.subs.lock().await;
        for (_key, handle) in subs.drain() {
            handle.cancel.cancel();
            handle.forwarder.abort();
        }
    }
}

/// Messages axum's close codes report that don't represent a real error
/// (spec §4.3 "on write error, the session shuts down unless the error is
/// an expected close").
fn is_expected_close(err: &axum::Error) -> bool {
    let text = err.to_string().to_lowercase();
    text.contains("connection closed normally")
        || text.contains("going away")
        || text.contains("already sent")
        || text.contains("no status received")
        || text.contains("closed connection")
}

pub async fn run(
    socket: WebSocket,
    manager: Manager,
    cluster_directory: Arc<dyn ClusterDirectory>,
    permission_checker: Arc<dyn PermissionChecker>,
    config: ServerConfig,
) {
    let session = Session::new(manager, cluster_directory, permission_checker, config);
    let (mut sink, mut stream) = futures_util::StreamExt::split(socket);

    let write_session = session.clone();
    let write_handle: JoinHandle<()> = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(write_session.config.ws_heartbeat_interval);
        loop {
            tokio::select! {
                popped = write_session.outgoing.pop() => {
                    let Some(msg) = popped else { break };
                    let json = match serde_json::to_string(&msg) {
                        Ok(j) => j,
                        Err(_) => continue,
                    };
                    let send = tokio::time::timeout(
                        write_session.config.ws_write_timeout,
                        sink.send(Message::Text(json)),
                    )
                    .await;
                    match send {
                        Ok(Ok(())) => {}
                        Ok(Err(err)) => {
                            if is_expected_close(&err) {
                                debug!("session write loop closing on expected close");
                            } else {
                                warn!(%err, "session write error");
                            }
                            break;
                        }
                        Err(_elapsed) => {
                            warn!("session write timed out");
                            break;
                        }
                    }
                }
                _ = heartbeat.tick() => {
                    let msg = write_session.annotate(
                        ServerMessage::Heartbeat(ServerEnvelope::for_scope("", "")),
                        &None,
                    );
                    write_session.outgoing.push_heartbeat(msg);
                }
            }
        }
    });

    loop {
        match stream.next_message().await {
            Some(ClientEvent::Request {
                cluster_id,
                domain,
                scope,
                resume_token,
            }) => {
                session
                    .handle_request(cluster_id, domain, scope, resume_token)
                    .await;
            }
            Some(ClientEvent::Cancel {
                cluster_id,
                domain,
                scope,
            }) => {
                session.handle_cancel(cluster_id, domain, scope).await;
            }
            Some(ClientEvent::Ack) => {}
            Some(ClientEvent::Malformed) => {
                session.send_error(&None, "", "", "malformed client message");
            }
            None => {
                info!("session read loop ended");
                break;
            }
        }
    }

    session.shutdown().await;
    write_handle.abort();
}

enum ClientEvent {
    Request {
        cluster_id: Option<String>,
        domain: String,
        scope: String,
        resume_token: Option<u64>,
    },
    Cancel {
        cluster_id: Option<String>,
        domain: String,
        scope: String,
    },
    Ack,
    Malformed,
}

trait NextClientEvent {
    async fn next_message(&mut self) -> Option<ClientEvent>;
}

impl NextClientEvent for futures_util::stream::SplitStream<WebSocket> {
    async fn next_message(&mut self) -> Option<ClientEvent> {
        loop {
            match futures_util::StreamExt::next(self).await {
                Some(Ok(Message::Text(text))) => {
                    return Some(match serde_json::from_str::<ClientMessage>(&text) {
                        Ok(ClientMessage::Request {
                            cluster_id,
                            domain,
                            scope,
                            resource_version: _,
                            resume_token,
                        }) => ClientEvent::Request {
                            cluster_id,
                            domain,
                            scope,
                            resume_token,
                        },
                        Ok(ClientMessage::Cancel {
                            cluster_id,
                            domain,
                            scope,
                        }) => ClientEvent::Cancel {
                            cluster_id,
                            domain,
                            scope,
                        },
                        Ok(ClientMessage::Ack { .. }) => ClientEvent::Ack,
                        Err(_) => ClientEvent::Malformed,
                    });
                }
                Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                Some(Ok(Message::Close(_))) | None => return None,
                Some(Ok(_)) => continue,
                Some(Err(_)) => return None,
            }
        }
    }
}
