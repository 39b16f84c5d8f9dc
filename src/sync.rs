//! Fallback synchronizer.
//!
//! Runs only while the realtime transport is degraded. One attempt performs
//! fetch → merge → persist in strict order against the document store:
//!
//! 1. healthy transport ⇒ no-op
//! 2. read the editor snapshot; abort if binary or JSON is missing
//! 3. fetch the latest persisted binary
//! 4. treat a missing snapshot as an empty buffer
//! 5. merge (remote, local)
//! 6. persist `{merged, local html, local json}`
//!
//! A failed fetch never reaches the merge, and a failed persist fails the
//! whole attempt. The editor is only read here.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;

use crate::editor::{DocumentSnapshot, EditorSurface};
use crate::errors::SyncError;
use crate::liveness::LivenessState;
use crate::merge::UpdateMerger;
use crate::store::{DocumentId, DocumentStore, PersistedEnvelope};

/// Per-session generation counter.
///
/// Work captures the generation when it starts and drops its result if the
/// session was torn down (generation advanced) in the meantime.
#[derive(Debug, Clone, Default)]
pub struct SessionGeneration(Arc<AtomicU64>);

impl SessionGeneration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.current() == generation
    }

    /// Invalidate all work started under the current generation.
    pub fn advance(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Why an attempt did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// Realtime transport is the writer
    Healthy,
    /// Editor has not loaded binary/JSON state yet
    EditorNotReady,
}

/// Result of one synchronization attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Skipped(SkipReason),
    Persisted { merged: Vec<u8> },
    /// Session ended mid-flight; result dropped without writing
    Discarded,
}

/// Unit of work driven by the autosave scheduler.
#[async_trait]
pub trait SyncTask: Send + Sync {
    async fn run_sync(&self) -> Result<SyncOutcome, SyncError>;
}

/// Reconciles local editor state with the document store over HTTP.
pub struct FallbackSynchronizer {
    document: DocumentId,
    editor: Arc<dyn EditorSurface>,
    store: Arc<dyn DocumentStore>,
    merger: Arc<dyn UpdateMerger>,
    liveness: watch::Receiver<LivenessState>,
    generation: SessionGeneration,
    last_persisted: Mutex<Option<Vec<u8>>>,
    last_synced_at: Mutex<Option<DateTime<Utc>>>,
}

impl FallbackSynchronizer {
    pub fn new(
        document: DocumentId,
        editor: Arc<dyn EditorSurface>,
        store: Arc<dyn DocumentStore>,
        merger: Arc<dyn UpdateMerger>,
        liveness: watch::Receiver<LivenessState>,
        generation: SessionGeneration,
    ) -> Self {
        Self {
            document,
            editor,
            store,
            merger,
            liveness,
            generation,
            last_persisted: Mutex::new(None),
            last_synced_at: Mutex::new(None),
        }
    }

    pub fn document(&self) -> &DocumentId {
        &self.document
    }

    /// Run one fetch → merge → persist attempt.
    pub async fn sync_once(&self) -> Result<SyncOutcome, SyncError> {
        if *self.liveness.borrow() == LivenessState::Healthy {
            return Ok(SyncOutcome::Skipped(SkipReason::Healthy));
        }

        let generation = self.generation.current();
        let DocumentSnapshot { binary, html, json } = self.editor.get_document();
        let (Some(local), Some(json)) = (binary, json) else {
            tracing::debug!(document = %self.document, "editor not ready, skipping fallback sync");
            return Ok(SyncOutcome::Skipped(SkipReason::EditorNotReady));
        };

        let remote = self.store.fetch_binary(&self.document).await?;
        if !self.generation.is_current(generation) {
            return Ok(self.discard("fetch"));
        }

        let remote = remote.unwrap_or_default();
        let merged = self.merger.merge(&remote, &local)?;
        let envelope = PersistedEnvelope::new(&merged, html, json);

        if !self.generation.is_current(generation) {
            return Ok(self.discard("merge"));
        }
        self.store.persist(&self.document, &envelope).await?;

        *lock(&self.last_persisted) = Some(merged.clone());
        *lock(&self.last_synced_at) = Some(Utc::now());
        tracing::info!(
            document = %self.document,
            remote_bytes = remote.len(),
            local_bytes = local.len(),
            merged_bytes = merged.len(),
            "fallback sync persisted merged document"
        );
        Ok(SyncOutcome::Persisted { merged })
    }

    fn discard(&self, stage: &str) -> SyncOutcome {
        tracing::debug!(document = %self.document, stage, "session ended mid-sync, discarding result");
        SyncOutcome::Discarded
    }

    /// Merged binary from the most recent successful persist, cleared on read.
    pub fn take_last_persisted(&self) -> Option<Vec<u8>> {
        lock(&self.last_persisted).take()
    }

    pub fn last_synced_at(&self) -> Option<DateTime<Utc>> {
        *lock(&self.last_synced_at)
    }
}

#[async_trait]
impl SyncTask for FallbackSynchronizer {
    async fn run_sync(&self) -> Result<SyncOutcome, SyncError> {
        self.sync_once().await
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
