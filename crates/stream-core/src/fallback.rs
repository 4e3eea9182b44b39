//! The client-side fallback controller (spec §4.5): classifies stream
//! errors, drops to polling when streaming fails, and attempts to restore
//! streaming on an exponential backoff schedule.

use std::time::Duration;

/// Case-insensitive substring set recognized as "data unavailable" rather
/// than a real error (spec §4.5 "Classification").
const DATA_UNAVAILABLE_PATTERNS: &[&str] = &[
    "waiting to start",
    "podinitializing",
    "container not found",
    "previous terminated container",
    "is not valid for pod",
    "no pods found",
    "has no logs",
    "no logs available",
];

pub fn is_data_unavailable(message: &str) -> bool {
    let lower = message.to_lowercase();
    DATA_UNAVAILABLE_PATTERNS
        .iter()
        .any(|pattern| lower.contains(pattern))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackState {
    Streaming,
    Fallback,
    Recovering,
}

#[derive(Debug, Clone, Copy)]
pub struct FallbackConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_recovery_attempts: u32,
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(3),
            max_delay: Duration::from_secs(30),
            max_recovery_attempts: 5,
        }
    }
}

/// Outcome of a driving event, telling the caller what to actually do
/// (stop the stream, schedule a timer, request a restart, ...). The
/// controller itself never performs I/O.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Stop the stream (no reset), disable the domain, register a polling
    /// fetcher, and perform one immediate fetch.
    EnterFallback,
    /// Wait `delay`, then attempt recovery.
    ScheduleRecovery { delay: Duration },
    /// Set status `loading`, re-enable streaming, request a domain restart.
    AttemptRecovery,
    /// Recovery succeeded: fall back inactive, resume streaming.
    MarkStreaming,
    /// Error was "data unavailable": mark ready, no error, no further retry.
    MarkReadyNoRetry,
    /// Recovery attempts exhausted: stay in fallback, stop scheduling.
    GiveUp,
}

/// Drives `Streaming → Fallback → Recovering → Streaming`.
#[derive(Debug)]
pub struct FallbackController {
    config: FallbackConfig,
    state: FallbackState,
    attempt: u32,
    auto_refresh: bool,
}

impl FallbackController {
    pub fn new(config: FallbackConfig) -> Self {
        Self {
            config,
            state: FallbackState::Streaming,
            attempt: 0,
            auto_refresh: true,
        }
    }

    pub fn state(&self) -> FallbackState {
        self.state
    }

    pub fn set_auto_refresh(&mut self, enabled: bool) {
        self.auto_refresh = enabled;
    }

    /// A snapshot-status `error` arrived while streaming.
    pub fn on_stream_error(&mut self) -> Option<Action> {
        if self.state != FallbackState::Streaming || !self.auto_refresh {
            return None;
        }
        self.state = FallbackState::Fallback;
        self.attempt = 0;
        Some(Action::EnterFallback)
    }

    /// Called once `EnterFallback`'s immediate fetch has settled; schedules
    /// the first recovery attempt.
    pub fn schedule_next_recovery(&mut self) -> Action {
        let delay = backoff_delay(self.config.initial_delay, self.config.max_delay, self.attempt);
        Action::ScheduleRecovery { delay }
    }

    /// The scheduled delay elapsed: `Fallback -> Recovering`.
    pub fn on_recovery_timer_fired(&mut self) -> Action {
        self.state = FallbackState::Recovering;
        Action::AttemptRecovery
    }

    /// The recovery attempt (`restartStreamingDomain`) succeeded.
    pub fn on_recovery_succeeded(&mut self) -> Action {
        self.state = FallbackState::Streaming;
        self.attempt = 0;
        Action::MarkStreaming
    }

    /// The recovery attempt failed with `message`.
    pub fn on_recovery_failed(&mut self, message: &str) -> Action {
        self.state = FallbackState::Fallback;
        if is_data_unavailable(message) {
            Action::MarkReadyNoRetry
        } else {
            self.attempt += 1;
            if self.attempt >= self.config.max_recovery_attempts {
                Action::GiveUp
            } else {
                self.schedule_next_recovery()
            }
        }
    }
}

fn backoff_delay(initial: Duration, max: Duration, attempt: u32) -> Duration {
    let scaled = initial.as_secs_f64() * 2f64.powi(attempt as i32);
    Duration::from_secs_f64(scaled.min(max.as_secs_f64()))
}
