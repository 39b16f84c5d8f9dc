//! Editing session.
//!
//! Owns the liveness monitor, fallback synchronizer and autosave scheduler for
//! one open document. Every piece of async work started by the session checks
//! the session generation before touching shared state, so nothing is written
//! or applied to the editor once the session is torn down.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::codec;
use crate::editor::EditorSurface;
use crate::liveness::{HealthProbe, LivenessConfig, LivenessMonitor, LivenessState};
use crate::merge::UpdateMerger;
use crate::scheduler::{AutosaveConfig, AutosaveScheduler, TriggerOutcome};
use crate::store::{DocumentId, DocumentStore};
use crate::sync::{FallbackSynchronizer, SessionGeneration};

/// Tunables for one session.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub liveness: LivenessConfig,
    pub autosave: AutosaveConfig,
}

/// Point-in-time view of a session, for status output.
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub id: Uuid,
    pub document: DocumentId,
    pub liveness: LivenessState,
    pub consecutive_failures: u32,
    pub autosave_attempts: u64,
    pub autosave_failures: u64,
    pub started_at: DateTime<Utc>,
    pub last_synced_at: Option<DateTime<Utc>>,
}

pub struct SyncSession {
    id: Uuid,
    document: DocumentId,
    editor: Arc<dyn EditorSurface>,
    store: Arc<dyn DocumentStore>,
    monitor: Arc<LivenessMonitor>,
    synchronizer: Arc<FallbackSynchronizer>,
    scheduler: Arc<AutosaveScheduler>,
    generation: SessionGeneration,
    watcher: Mutex<Option<JoinHandle<()>>>,
    started_at: DateTime<Utc>,
}

impl SyncSession {
    pub fn new(
        document: DocumentId,
        editor: Arc<dyn EditorSurface>,
        store: Arc<dyn DocumentStore>,
        probe: Arc<dyn HealthProbe>,
        merger: Arc<dyn UpdateMerger>,
        config: SessionConfig,
    ) -> Self {
        let generation = SessionGeneration::new();
        let monitor = LivenessMonitor::new(probe, config.liveness);
        let synchronizer = Arc::new(FallbackSynchronizer::new(
            document.clone(),
            Arc::clone(&editor),
            Arc::clone(&store),
            merger,
            monitor.subscribe(),
            generation.clone(),
        ));
        let scheduler = Arc::new(AutosaveScheduler::new(
            synchronizer.clone(),
            config.autosave,
        ));

        Self {
            id: Uuid::new_v4(),
            document,
            editor,
            store,
            monitor,
            synchronizer,
            scheduler,
            generation,
            watcher: Mutex::new(None),
            started_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn document(&self) -> &DocumentId {
        &self.document
    }

    pub fn monitor(&self) -> &Arc<LivenessMonitor> {
        &self.monitor
    }

    pub fn liveness(&self) -> LivenessState {
        self.monitor.state()
    }

    /// Start probing, autosave timers and the liveness watcher.
    pub fn start(&self) {
        let mut watcher = lock(&self.watcher);
        if watcher.is_some() {
            return;
        }
        self.monitor.start();
        self.scheduler.start();

        let mut rx = self.monitor.subscribe();
        let mut previous = *rx.borrow_and_update();
        let session_generation = self.generation.current();
        let reconcile = Reconcile {
            generation: self.generation.clone(),
            synchronizer: Arc::clone(&self.synchronizer),
            editor: Arc::clone(&self.editor),
        };
        let scheduler = Arc::clone(&self.scheduler);

        *watcher = Some(tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let current = *rx.borrow_and_update();
                match (previous, current) {
                    (LivenessState::Healthy, LivenessState::Degraded) => {
                        scheduler.trigger();
                    }
                    (LivenessState::Degraded, LivenessState::Healthy) => {
                        reconcile.after_reconnect(session_generation);
                    }
                    _ => {}
                }
                previous = current;
            }
        }));

        tracing::info!(session = %self.id, document = %self.document, "sync session started");
    }

    /// Record a local edit for debounced autosave.
    pub fn note_local_edit(&self) {
        self.scheduler.note_edit();
    }

    /// Blur or navigation away.
    pub fn flush(&self) -> TriggerOutcome {
        self.scheduler.flush()
    }

    /// Resolve once no autosave attempt is running.
    pub async fn wait_idle(&self) {
        self.scheduler.wait_idle().await;
    }

    /// Submit the editor's state for server-side conflict resolution and apply
    /// the conflict-free result to the editor.
    ///
    /// Failures are logged and reported as `false`, never propagated.
    pub async fn resolve_conflicts(&self) -> bool {
        let session_generation = self.generation.current();
        let Some(local) = self.editor.get_document().binary else {
            tracing::debug!(document = %self.document, "editor not ready, skipping conflict resolution");
            return false;
        };
        let encoded = codec::encode_persisted(&local);
        let resolved = match self.store.resolve_conflicts(&self.document, &encoded).await {
            Ok(resolved) => resolved,
            Err(e) => {
                tracing::warn!(document = %self.document, error = %e, "conflict resolution failed");
                return false;
            }
        };
        if !self.generation.is_current(session_generation) {
            tracing::debug!(document = %self.document, "session ended, discarding resolved state");
            return false;
        }
        match self.editor.set_document(&resolved) {
            Ok(()) => {
                tracing::info!(document = %self.document, bytes = resolved.len(), "applied conflict-free state");
                true
            }
            Err(e) => {
                tracing::warn!(document = %self.document, error = %e, "editor rejected resolved state");
                false
            }
        }
    }

    /// Flush pending work, wait for it, then tear down.
    pub async fn close(&self) {
        self.flush();
        self.wait_idle().await;
        self.stop();
    }

    /// Tear down immediately. In-flight results are discarded.
    pub fn stop(&self) {
        let generation = self.generation.advance();
        self.scheduler.stop();
        self.monitor.stop();
        if let Some(watcher) = lock(&self.watcher).take() {
            watcher.abort();
        }
        tracing::info!(session = %self.id, generation, "sync session stopped");
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            id: self.id,
            document: self.document.clone(),
            liveness: self.monitor.state(),
            consecutive_failures: self.monitor.consecutive_failures(),
            autosave_attempts: self.scheduler.attempts(),
            autosave_failures: self.scheduler.failures(),
            started_at: self.started_at,
            last_synced_at: self.synchronizer.last_synced_at(),
        }
    }
}

/// Realigns the editor with what the fallback path persisted once the
/// realtime transport returns.
///
/// The editor applies the persisted state as an update under its own lock, so
/// local edits made since the fallback write are kept.
struct Reconcile {
    generation: SessionGeneration,
    synchronizer: Arc<FallbackSynchronizer>,
    editor: Arc<dyn EditorSurface>,
}

impl Reconcile {
    fn after_reconnect(&self, session_generation: u64) -> bool {
        if !self.generation.is_current(session_generation) {
            return false;
        }
        let Some(persisted) = self.synchronizer.take_last_persisted() else {
            return false;
        };
        match self.editor.set_document(&persisted) {
            Ok(()) => {
                tracing::info!(bytes = persisted.len(), "editor realigned with persisted state");
                true
            }
            Err(e) => {
                tracing::warn!(error = %e, "editor rejected reconciled state");
                false
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
