//! The demand poller (spec §4.4): runs an expensive periodic fetch only
//! while something is reading, and lets it go idle.
//!
//! `runToken` is a plain monotonic `u64`, not pointer/task identity — a run
//! that finishes after it was superseded compares its token against the
//! poller's current one and discards its own results if they don't match.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A "not found" distinguished from a transient failure (spec §4.4,
/// §7 `UpstreamUnavailable`): the upstream API doesn't exist here, so
/// retrying it is pointless.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnavailableApi(pub String);

#[derive(Debug, Clone)]
pub enum FetchOutcome<T> {
    Ok(T),
    Unavailable(UnavailableApi),
    Transient(String),
}

/// The two datasets a refresh fetches, sequentially, per spec §4.4.
#[async_trait::async_trait]
pub trait MetricsSource: Send + Sync {
    async fn fetch_nodes(&self) -> FetchOutcome<serde_json::Value>;
    async fn fetch_pods(&self) -> FetchOutcome<serde_json::Value>;
}

#[derive(Debug, Clone, Copy)]
pub struct PollerConfig {
    pub poll_interval: Duration,
    pub idle_timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    /// Clamped to `[0, 1]`.
    pub jitter_factor: f64,
    pub max_retries: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
            idle_timeout: Duration::from_secs(60),
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
            jitter_factor: 0.2,
            max_retries: 5,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct PollerMetadata {
    pub success_count: u64,
    pub failure_count: u64,
    pub consecutive_failures: u64,
    pub last_error: Option<String>,
    pub last_success_ms: Option<i64>,
}

struct Counters(Mutex<PollerMetadata>);

/// Demand-driven background poller.
///
/// Cloning shares state; the poller is meant to be held behind an `Arc` or
/// cloned freely since its fields are already `Arc`-backed internally.
pub struct DemandPoller<S: MetricsSource + 'static> {
    source: Arc<S>,
    config: PollerConfig,
    active: AtomicBool,
    running: AtomicBool,
    run_token: AtomicU64,
    last_demand_ms: AtomicU64,
    counters: Arc<Counters>,
    latest_nodes: Arc<Mutex<Option<serde_json::Value>>>,
    latest_pods: Arc<Mutex<Option<serde_json::Value>>>,
    shutdown: watch::Sender<bool>,
    run_handle: Mutex<Option<JoinHandle<()>>>,
}

impl<S: MetricsSource + 'static> DemandPoller<S> {
    pub fn new(source: S, config: PollerConfig) -> Arc<Self> {
        let (shutdown, _) = watch::channel(false);
        Arc::new(Self {
            source: Arc::new(source),
            config,
            active: AtomicBool::new(false),
            running: AtomicBool::new(false),
            run_token: AtomicU64::new(0),
            last_demand_ms: AtomicU64::new(0),
            counters: Arc::new(Counters(Mutex::new(PollerMetadata::default()))),
            latest_nodes: Arc::new(Mutex::new(None)),
            latest_pods: Arc::new(Mutex::new(None)),
            shutdown,
            run_handle: Mutex::new(None),
        })
    }

    /// `Start(ctx)`: begins polling immediately if already `active`.
    pub async fn start(self: &Arc<Self>) {
        if self.active.load(Ordering::Acquire) {
            self.spawn_run().await;
        }
    }

    /// `SetActive(true/false)`.
    pub async fn set_active(self: &Arc<Self>, active: bool) {
        self.active.store(active, Ordering::Release);
        if active {
            self.spawn_run().await;
        } else {
            self.schedule_idle_check();
        }
    }

    /// A read touches the poller: bump demand, ensure a run is live, and if
    /// not declared `active`, keep the idle timer fed so bursts of reads
    /// don't let polling lapse mid-burst.
    pub async fn touch(self: &Arc<Self>) {
        self.last_demand_ms.store(now_ms(), Ordering::Relaxed);
        self.spawn_run().await;
        if !self.active.load(Ordering::Acquire) {
            self.schedule_idle_check();
        }
    }

    pub async fn latest_node_usage(self: &Arc<Self>) -> Option<serde_json::Value> {
        self.touch().await;
        self.latest_nodes.lock().await.clone()
    }

    pub async fn latest_pod_usage(self: &Arc<Self>) -> Option<serde_json::Value> {
        self.touch().await;
        self.latest_pods.lock().await.clone()
    }

    pub async fn metadata(self: &Arc<Self>) -> PollerMetadata {
        self.touch().await;
        self.counters.0.lock().await.clone()
    }

    /// `Stop(ctx)`.
    pub async fn stop(self: &Arc<Self>) {
        self.active.store(false, Ordering::Release);
        self.run_token.fetch_add(1, Ordering::AcqRel);
        let _ = self.shutdown.send(true);
        if let Some(handle) = self.run_handle.lock().await.take() {
            handle.abort();
        }
        self.running.store(false, Ordering::Release);
    }

    fn schedule_idle_check(self: &Arc<Self>) {
        let this = self.clone();
        let idle_timeout = this.config.idle_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(idle_timeout).await;
            let idle_for = now_ms().saturating_sub(this.last_demand_ms.load(Ordering::Relaxed));
            if !this.active.load(Ordering::Acquire)
                && this.running.load(Ordering::Acquire)
                && idle_for >= idle_timeout.as_millis() as u64
            {
                debug!("demand poller idling out after {idle_for}ms without demand");
                this.run_token.fetch_add(1, Ordering::AcqRel);
                let _ = this.shutdown.send(true);
                this.running.store(false, Ordering::Release);
            } else if !this.active.load(Ordering::Acquire) && this.running.load(Ordering::Acquire)
            {
                this.schedule_idle_check();
            }
        });
    }

    async fn spawn_run(self: &Arc<Self>) {
        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let token = self.run_token.fetch_add(1, Ordering::AcqRel) + 1;
        let mut shutdown = self.shutdown.subscribe();
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(this.config.poll_interval);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if this.run_token.load(Ordering::Acquire) != token {
                            return;
                        }
                        this.refresh_once(token).await;
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                }
            }
        });
        *self.run_handle.lock().await = Some(handle);
    }

    async fn refresh_once(&self, token: u64) {
        let nodes_outcome = self.fetch_with_retry(token, |s| {
            let s = s.clone();
            Box::pin(async move { s.fetch_nodes().await })
        })
        .await;

        if self.run_token.load(Ordering::Acquire) != token {
            return;
        }

        let mut nodes_ok = false;
        if let Some(FetchOutcome::Ok(value)) = nodes_outcome {
            *self.latest_nodes.lock().await = Some(value);
            nodes_ok = true;
        }

        let pods_outcome = self.fetch_with_retry(token, |s| {
            let s = s.clone();
            Box::pin(async move { s.fetch_pods().await })
        })
        .await;

        if self.run_token.load(Ordering::Acquire) != token {
            return;
        }

        let pods_ok = matches!(pods_outcome, Some(FetchOutcome::Ok(_)));
        if let Some(FetchOutcome::Ok(value)) = pods_outcome {
            *self.latest_pods.lock().await = Some(value);
        }

        let mut counters = self.counters.0.lock().await;
        if nodes_ok || pods_ok {
            counters.success_count += 1;
            counters.consecutive_failures = 0;
            counters.last_success_ms = Some(now_ms() as i64);
        } else {
            counters.failure_count += 1;
            counters.consecutive_failures += 1;
            counters.last_error = Some("refresh failed".to_owned());
        }
    }

    async fn fetch_with_retry<F>(&self, token: u64, fetch: F) -> Option<FetchOutcome<serde_json::Value>>
    where
        F: Fn(&Arc<S>) -> std::pin::Pin<Box<dyn std::future::Future<Output = FetchOutcome<serde_json::Value>> + Send>>,
    {
        let mut attempt = 0u32;
        loop {
            if self.run_token.load(Ordering::Acquire) != token {
                return None;
            }
            match fetch(&self.source).await {
                FetchOutcome::Ok(v) => return Some(FetchOutcome::Ok(v)),
                FetchOutcome::Unavailable(reason) => {
                    warn!(reason = %reason.0, "upstream API unavailable, not retrying");
                    return Some(FetchOutcome::Unavailable(reason));
                }
                FetchOutcome::Transient(err) => {
                    attempt += 1;
                    if attempt > self.config.max_retries {
                        return Some(FetchOutcome::Transient(err));
                    }
                    let delay = backoff_with_jitter(
                        self.config.initial_backoff,
                        self.config.max_backoff,
                        self.config.jitter_factor,
                        attempt,
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

fn backoff_with_jitter(initial: Duration, max: Duration, jitter_factor: f64, attempt: u32) -> Duration {
    let jitter_factor = jitter_factor.clamp(0.0, 1.0);
    let base = initial.as_secs_f64() * 2f64.powi(attempt as i32 - 1);
    let base = base.min(max.as_secs_f64());
    let jitter = rand::thread_rng().gen_range(-jitter_factor..=jitter_factor);
    let jittered = (base * (1.0 + jitter)).max(0.0);
    Duration::from_secs_f64(jittered)
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct CountingSource {
        node_calls: AtomicUsize,
        pod_calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl MetricsSource for CountingSource {
        async fn fetch_nodes(&self) -> FetchOutcome<serde_json::Value> {
            self.node_calls.fetch_add(1, Ordering::Relaxed);
            FetchOutcome::Ok(serde_json::json!({"nodes": 1}))
        }
        async fn fetch_pods(&self) -> FetchOutcome<serde_json::Value> {
            self.pod_calls.fetch_add(1, Ordering::Relaxed);
            FetchOutcome::Unavailable(UnavailableApi("pods API missing".to_owned()))
        }
    }

    #[tokio::test]
    async fn partial_success_still_stores_nodes() {
        let poller = DemandPoller::new(
            CountingSource {
                node_calls: AtomicUsize::new(0),
                pod_calls: AtomicUsize::new(0),
            },
            PollerConfig {
                poll_interval: Duration::from_millis(20),
                ..PollerConfig::default()
            },
        );
        poller.set_active(true).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(poller.latest_node_usage().await.is_some());
        assert!(poller.latest_pod_usage().await.is_none());
        poller.stop().await;
    }

    #[tokio::test]
    async fn backoff_respects_max_cap() {
        let d = backoff_with_jitter(
            Duration::from_millis(500),
            Duration::from_secs(1),
            0.0,
            10,
        );
        assert!(d <= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn stop_prevents_further_refresh_from_stale_run() {
        let poller = DemandPoller::new(
            CountingSource {
                node_calls: AtomicUsize::new(0),
                pod_calls: AtomicUsize::new(0),
            },
            PollerConfig {
                poll_interval: Duration::from_millis(10),
                ..PollerConfig::default()
            },
        );
        poller.set_active(true).await;
        tokio::time::sleep(Duration::from_millis(15)).await;
        poller.stop().await;
        let meta_before = poller.counters.0.lock().await.success_count;
        tokio::time::sleep(Duration::from_millis(40)).await;
        let meta_after = poller.counters.0.lock().await.success_count;
        assert_eq!(meta_before, meta_after);
    }
}
