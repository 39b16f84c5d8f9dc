//! Liveness monitor for the realtime collaboration transport.
//!
//! The monitor owns the `healthy`/`degraded` signal. Consumers get a read-only
//! [`watch::Receiver`] and can never write it.
//!
//! ## Probing
//!
//! A probe runs on every interval tick and whenever the host reports that
//! the window regained focus or the network reconnected. Each probe takes a
//! monotonically increasing sequence number. A result is applied only if its
//! sequence is newer than the last applied one, so a slow stale success can't
//! flip the state back to healthy after a newer failure.
//!
//! ## State machine
//!
//! ```text
//!   Healthy ──(failure_threshold consecutive failures)──▶ Degraded
//!   Degraded ──(one successful probe)──────────────────▶ Healthy
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::MissedTickBehavior;

use crate::errors::SyncError;

/// Consecutive failures before the transport is considered down.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// Default probe cadence.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(10);

/// Health endpoint path on the realtime collaboration server.
pub const HEALTH_PATH: &str = "/collaboration/health";

/// Current liveness of the realtime transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LivenessState {
    /// Realtime channel is up (initial, optimistic)
    #[default]
    Healthy,
    /// Realtime channel presumed down; HTTP fallback is active
    Degraded,
}

impl std::fmt::Display for LivenessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LivenessState::Healthy => write!(f, "healthy"),
            LivenessState::Degraded => write!(f, "degraded"),
        }
    }
}

/// What caused a probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeTrigger {
    Interval,
    FocusRegained,
    NetworkReconnected,
}

/// One health check against the realtime transport.
#[async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self) -> Result<(), SyncError>;
}

/// Probe that issues `GET {live_url}/collaboration/health`.
pub struct HttpHealthProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpHealthProbe {
    pub fn new(live_url: &str, timeout: Duration) -> Result<Self, SyncError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(SyncError::Http)?;
        Ok(Self {
            client,
            url: format!("{}{}", live_url.trim_end_matches('/'), HEALTH_PATH),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl HealthProbe for HttpHealthProbe {
    async fn probe(&self) -> Result<(), SyncError> {
        let resp = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|e| SyncError::Probe {
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(SyncError::Probe {
                reason: format!("health endpoint returned {}", status),
            })
        }
    }
}

/// Probe cadence and degradation threshold.
#[derive(Debug, Clone)]
pub struct LivenessConfig {
    pub interval: Duration,
    pub failure_threshold: u32,
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_PROBE_INTERVAL,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
        }
    }
}

#[derive(Debug, Default)]
struct ProbeLedger {
    consecutive_failures: u32,
    last_applied: u64,
    stopped: bool,
}

/// Maintains the up/down signal for the realtime transport.
pub struct LivenessMonitor {
    probe: Arc<dyn HealthProbe>,
    config: LivenessConfig,
    next_sequence: AtomicU64,
    ledger: Mutex<ProbeLedger>,
    state_tx: watch::Sender<LivenessState>,
    triggers: Mutex<Option<mpsc::UnboundedSender<ProbeTrigger>>>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl LivenessMonitor {
    pub fn new(probe: Arc<dyn HealthProbe>, config: LivenessConfig) -> Arc<Self> {
        let (state_tx, _) = watch::channel(LivenessState::Healthy);
        Arc::new(Self {
            probe,
            config,
            next_sequence: AtomicU64::new(0),
            ledger: Mutex::new(ProbeLedger::default()),
            state_tx,
            triggers: Mutex::new(None),
            shutdown_tx: Mutex::new(None),
        })
    }

    /// Start interval and event-driven probing. Calling it twice is a no-op.
    pub fn start(self: &Arc<Self>) {
        let mut shutdown = lock(&self.shutdown_tx);
        if shutdown.is_some() {
            return;
        }
        {
            let mut ledger = lock(&self.ledger);
            ledger.stopped = false;
            // Probes sequenced before this start belong to the previous run
            let floor = self.next_sequence.load(Ordering::SeqCst);
            ledger.last_applied = ledger.last_applied.max(floor);
        }

        let (trigger_tx, mut trigger_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        *lock(&self.triggers) = Some(trigger_tx);
        *shutdown = Some(shutdown_tx);

        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(monitor.config.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                let trigger = tokio::select! {
                    _ = &mut shutdown_rx => break,
                    _ = ticker.tick() => ProbeTrigger::Interval,
                    Some(trigger) = trigger_rx.recv() => trigger,
                };
                // Probes run concurrently; sequence numbers order their results
                let monitor = Arc::clone(&monitor);
                tokio::spawn(async move {
                    monitor.probe_now(trigger).await;
                });
            }
            tracing::debug!("liveness monitor stopped");
        });
        tracing::debug!(
            interval_ms = self.config.interval.as_millis() as u64,
            threshold = self.config.failure_threshold,
            "liveness monitor started"
        );
    }

    /// Stop probing. Results of probes still in flight are ignored.
    pub fn stop(&self) {
        lock(&self.ledger).stopped = true;
        lock(&self.triggers).take();
        if let Some(tx) = lock(&self.shutdown_tx).take() {
            let _ = tx.send(());
        }
    }

    /// Window regained focus.
    pub fn notify_focus(&self) {
        self.send_trigger(ProbeTrigger::FocusRegained);
    }

    /// Network connectivity came back.
    pub fn notify_reconnect(&self) {
        self.send_trigger(ProbeTrigger::NetworkReconnected);
    }

    fn send_trigger(&self, trigger: ProbeTrigger) {
        match lock(&self.triggers).as_ref() {
            Some(tx) => {
                let _ = tx.send(trigger);
            }
            None => tracing::debug!(?trigger, "liveness monitor not running, ignoring trigger"),
        }
    }

    /// Run one probe now and apply its result.
    pub async fn probe_now(&self, trigger: ProbeTrigger) -> LivenessState {
        let sequence = self.next_sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let outcome = self.probe.probe().await;
        if let Err(e) = &outcome {
            tracing::debug!(sequence, ?trigger, error = %e, "health probe failed");
        }
        self.apply_probe_result(sequence, outcome.is_ok())
    }

    pub(crate) fn apply_probe_result(&self, sequence: u64, healthy: bool) -> LivenessState {
        let mut ledger = lock(&self.ledger);
        if ledger.stopped || sequence <= ledger.last_applied {
            tracing::debug!(
                sequence,
                last_applied = ledger.last_applied,
                "discarding stale probe result"
            );
            return self.state();
        }
        ledger.last_applied = sequence;

        if healthy {
            ledger.consecutive_failures = 0;
        } else {
            ledger.consecutive_failures = ledger.consecutive_failures.saturating_add(1);
        }
        let next = if ledger.consecutive_failures >= self.config.failure_threshold.max(1) {
            LivenessState::Degraded
        } else {
            LivenessState::Healthy
        };

        let previous = self.state_tx.send_replace(next);
        if previous != next {
            match next {
                LivenessState::Degraded => tracing::warn!(
                    failures = ledger.consecutive_failures,
                    "realtime transport degraded, HTTP fallback active"
                ),
                LivenessState::Healthy => tracing::info!("realtime transport healthy again"),
            }
        }
        next
    }

    pub fn state(&self) -> LivenessState {
        *self.state_tx.borrow()
    }

    pub fn is_degraded(&self) -> bool {
        self.state() == LivenessState::Degraded
    }

    /// Read-only view of the liveness signal.
    pub fn subscribe(&self) -> watch::Receiver<LivenessState> {
        self.state_tx.subscribe()
    }

    pub fn consecutive_failures(&self) -> u32 {
        lock(&self.ledger).consecutive_failures
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
