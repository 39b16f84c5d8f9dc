//! Autosave scheduler.
//!
//! Drives a [`SyncTask`] from three sources: a fixed interval timer, a
//! debounce window after local edits, and explicit flushes (blur or
//! navigating away). At most one attempt runs at a time. Triggers that arrive
//! during a flight collapse into a single follow-up run.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::sync::SyncTask;

pub const DEFAULT_AUTOSAVE_INTERVAL: Duration = Duration::from_secs(10);
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutosaveConfig {
    pub interval: Duration,
    /// Quiet period after the last local edit before an attempt starts
    pub debounce: Duration,
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_AUTOSAVE_INTERVAL,
            debounce: DEFAULT_DEBOUNCE,
        }
    }
}

/// What a trigger did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// A new attempt was spawned
    Started,
    /// An attempt is running; one follow-up run is queued
    Coalesced,
    /// Scheduler has been stopped
    Stopped,
}

#[derive(Debug, Default)]
struct Flight {
    in_flight: bool,
    rerun_requested: bool,
    stopped: bool,
}

struct Shared {
    task: Arc<dyn SyncTask>,
    flight: Mutex<Flight>,
    /// Mirrors `Flight::in_flight`; only sent while `flight` is locked
    busy_tx: watch::Sender<bool>,
    attempts: AtomicU64,
    failures: AtomicU64,
}

impl Shared {
    fn trigger(self: &Arc<Self>) -> TriggerOutcome {
        {
            let mut flight = lock(&self.flight);
            if flight.stopped {
                return TriggerOutcome::Stopped;
            }
            if flight.in_flight {
                flight.rerun_requested = true;
                return TriggerOutcome::Coalesced;
            }
            flight.in_flight = true;
            self.busy_tx.send_replace(true);
        }

        let shared = Arc::clone(self);
        tokio::spawn(async move { shared.run_flight().await });
        TriggerOutcome::Started
    }

    async fn run_flight(self: Arc<Self>) {
        loop {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
            match self.task.run_sync().await {
                Ok(outcome) => tracing::debug!(attempt, ?outcome, "autosave attempt finished"),
                Err(e) => {
                    self.failures.fetch_add(1, Ordering::SeqCst);
                    tracing::warn!(
                        attempt,
                        error = %e,
                        retryable = e.is_retryable(),
                        "autosave attempt failed, will retry on next trigger"
                    );
                }
            }

            let rerun = {
                let mut flight = lock(&self.flight);
                let rerun = flight.rerun_requested && !flight.stopped;
                flight.rerun_requested = false;
                if !rerun {
                    flight.in_flight = false;
                    self.busy_tx.send_replace(false);
                }
                rerun
            };
            if !rerun {
                break;
            }
        }
    }
}

/// Coalescing autosave driver for one session.
pub struct AutosaveScheduler {
    shared: Arc<Shared>,
    config: AutosaveConfig,
    edits_tx: Mutex<Option<mpsc::UnboundedSender<()>>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AutosaveScheduler {
    pub fn new(task: Arc<dyn SyncTask>, config: AutosaveConfig) -> Self {
        let (busy_tx, _) = watch::channel(false);
        Self {
            shared: Arc::new(Shared {
                task,
                flight: Mutex::new(Flight::default()),
                busy_tx,
                attempts: AtomicU64::new(0),
                failures: AtomicU64::new(0),
            }),
            config,
            edits_tx: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Start the interval timer and the edit debouncer.
    pub fn start(&self) {
        let mut tasks = lock(&self.tasks);
        if !tasks.is_empty() {
            return;
        }

        let shared = Arc::clone(&self.shared);
        let interval = self.config.interval;
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // first tick completes immediately
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if shared.trigger() == TriggerOutcome::Stopped {
                    break;
                }
            }
        }));

        let (edits_tx, mut edits_rx) = mpsc::unbounded_channel::<()>();
        *lock(&self.edits_tx) = Some(edits_tx);
        let shared = Arc::clone(&self.shared);
        let debounce = self.config.debounce;
        tasks.push(tokio::spawn(async move {
            while edits_rx.recv().await.is_some() {
                // Each further edit restarts the quiet period
                loop {
                    match tokio::time::timeout(debounce, edits_rx.recv()).await {
                        Ok(Some(())) => continue,
                        Ok(None) => return,
                        Err(_) => break,
                    }
                }
                shared.trigger();
            }
        }));

        tracing::debug!(
            interval_ms = interval.as_millis() as u64,
            debounce_ms = debounce.as_millis() as u64,
            "autosave scheduler started"
        );
    }

    /// Request an attempt now.
    pub fn trigger(&self) -> TriggerOutcome {
        self.shared.trigger()
    }

    /// Record a local edit; an attempt follows once edits go quiet.
    pub fn note_edit(&self) {
        if let Some(tx) = lock(&self.edits_tx).as_ref() {
            let _ = tx.send(());
        }
    }

    /// Blur or navigation away: attempt immediately.
    pub fn flush(&self) -> TriggerOutcome {
        let outcome = self.shared.trigger();
        tracing::debug!(?outcome, "autosave flush requested");
        outcome
    }

    /// Resolve once no attempt is running or queued.
    pub async fn wait_idle(&self) {
        let mut rx = self.shared.busy_tx.subscribe();
        let _ = rx.wait_for(|busy| !*busy).await;
    }

    /// Stop timers and refuse further triggers. A running attempt is not
    /// cancelled but gets no follow-up.
    pub fn stop(&self) {
        lock(&self.shared.flight).stopped = true;
        lock(&self.edits_tx).take();
        for task in lock(&self.tasks).drain(..) {
            task.abort();
        }
    }

    pub fn is_busy(&self) -> bool {
        *self.shared.busy_tx.borrow()
    }

    /// Attempts run so far, including failed ones.
    pub fn attempts(&self) -> u64 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    pub fn failures(&self) -> u64 {
        self.shared.failures.load(Ordering::SeqCst)
    }
}

impl Drop for AutosaveScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SyncError;
    use crate::sync::{SkipReason, SyncOutcome};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Semaphore;

    /// Task that counts runs and optionally blocks on a gate.
    struct CountingTask {
        started: AtomicUsize,
        finished: AtomicUsize,
        gate: Option<Arc<Semaphore>>,
        fail: bool,
    }

    impl CountingTask {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                started: AtomicUsize::new(0),
                finished: AtomicUsize::new(0),
                gate: None,
                fail: false,
            })
        }

        fn gated(gate: Arc<Semaphore>) -> Arc<Self> {
            Arc::new(Self {
                started: AtomicUsize::new(0),
                finished: AtomicUsize::new(0),
                gate: Some(gate),
                fail: false,
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                started: AtomicUsize::new(0),
                finished: AtomicUsize::new(0),
                gate: None,
                fail: true,
            })
        }

        fn started(&self) -> usize {
            self.started.load(Ordering::SeqCst)
        }

        fn finished(&self) -> usize {
            self.finished.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl SyncTask for CountingTask {
        async fn run_sync(&self) -> Result<SyncOutcome, SyncError> {
            self.started.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = &self.gate {
                gate.acquire().await.unwrap().forget();
            }
            self.finished.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(SyncError::Persist {
                    document: "ws/p/page:1".to_string(),
                    reason: "store returned 500".to_string(),
                });
            }
            Ok(SyncOutcome::Skipped(SkipReason::Healthy))
        }
    }

    fn fast_config() -> AutosaveConfig {
        AutosaveConfig {
            interval: Duration::from_secs(3600),
            debounce: Duration::from_millis(30),
        }
    }

    async fn wait_until(condition: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_triggers_during_flight_coalesce_into_one_rerun() {
        let gate = Arc::new(Semaphore::new(0));
        let task = CountingTask::gated(gate.clone());
        let scheduler = AutosaveScheduler::new(task.clone(), fast_config());

        assert_eq!(scheduler.trigger(), TriggerOutcome::Started);
        wait_until(|| task.started() == 1).await;

        assert_eq!(scheduler.trigger(), TriggerOutcome::Coalesced);
        assert_eq!(scheduler.trigger(), TriggerOutcome::Coalesced);
        assert!(scheduler.is_busy());

        gate.add_permits(2);
        scheduler.wait_idle().await;

        assert_eq!(task.finished(), 2);
        assert_eq!(scheduler.attempts(), 2);
        assert!(!scheduler.is_busy());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_wait_idle_covers_trigger_racing_flight_end() {
        let task = CountingTask::new();
        let scheduler = Arc::new(AutosaveScheduler::new(task.clone(), fast_config()));

        for _ in 0..500 {
            scheduler.trigger();
            let racer = {
                let scheduler = scheduler.clone();
                tokio::spawn(async move {
                    tokio::task::yield_now().await;
                    scheduler.trigger();
                })
            };
            racer.await.unwrap();
            scheduler.wait_idle().await;
            assert_eq!(task.started(), task.finished(), "wait_idle returned mid-attempt");
        }
    }

    #[tokio::test]
    async fn test_idle_trigger_starts_a_fresh_attempt() {
        let task = CountingTask::new();
        let scheduler = AutosaveScheduler::new(task.clone(), fast_config());

        assert_eq!(scheduler.trigger(), TriggerOutcome::Started);
        wait_until(|| task.finished() == 1).await;
        scheduler.wait_idle().await;

        assert_eq!(scheduler.trigger(), TriggerOutcome::Started);
        wait_until(|| task.finished() == 2).await;
    }

    #[tokio::test]
    async fn test_failed_attempt_does_not_wedge_scheduler() {
        let task = CountingTask::failing();
        let scheduler = AutosaveScheduler::new(task.clone(), fast_config());

        scheduler.trigger();
        wait_until(|| task.finished() == 1).await;
        scheduler.wait_idle().await;
        assert_eq!(scheduler.failures(), 1);

        assert_eq!(scheduler.trigger(), TriggerOutcome::Started);
        wait_until(|| task.finished() == 2).await;
        scheduler.wait_idle().await;
        assert_eq!(scheduler.failures(), 2);
    }

    #[tokio::test]
    async fn test_stopped_scheduler_refuses_triggers() {
        let task = CountingTask::new();
        let scheduler = AutosaveScheduler::new(task.clone(), fast_config());
        scheduler.stop();
        assert_eq!(scheduler.trigger(), TriggerOutcome::Stopped);
        assert_eq!(scheduler.flush(), TriggerOutcome::Stopped);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(task.started(), 0);
    }

    #[tokio::test]
    async fn test_stop_during_flight_drops_queued_rerun() {
        let gate = Arc::new(Semaphore::new(0));
        let task = CountingTask::gated(gate.clone());
        let scheduler = AutosaveScheduler::new(task.clone(), fast_config());

        scheduler.trigger();
        wait_until(|| task.started() == 1).await;
        assert_eq!(scheduler.trigger(), TriggerOutcome::Coalesced);
        scheduler.stop();

        gate.add_permits(1);
        scheduler.wait_idle().await;
        assert_eq!(task.started(), 1);
    }

    #[tokio::test]
    async fn test_burst_of_edits_runs_once_after_quiet_period() {
        let task = CountingTask::new();
        let scheduler = AutosaveScheduler::new(task.clone(), fast_config());
        scheduler.start();

        for _ in 0..5 {
            scheduler.note_edit();
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        wait_until(|| task.finished() == 1).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(task.finished(), 1);
        scheduler.stop();
    }

    #[tokio::test]
    async fn test_interval_timer_triggers_repeatedly() {
        let task = CountingTask::new();
        let scheduler = AutosaveScheduler::new(
            task.clone(),
            AutosaveConfig {
                interval: Duration::from_millis(20),
                debounce: Duration::from_secs(3600),
            },
        );
        scheduler.start();
        wait_until(|| task.finished() >= 2).await;
        scheduler.stop();
    }

    #[test]
    fn test_default_config() {
        let config = AutosaveConfig::default();
        assert_eq!(config.interval, Duration::from_secs(10));
        assert_eq!(config.debounce, Duration::from_millis(1500));
    }
}
