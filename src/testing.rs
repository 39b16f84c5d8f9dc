//! Test doubles shared by the unit tests of the sync pipeline.

use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Semaphore;

use crate::editor::{DocumentSnapshot, EditorSurface};
use crate::errors::SyncError;
use crate::merge::UpdateMerger;
use crate::store::{DocumentId, DocumentStore, PersistedEnvelope};

/// In-memory document store that records every call.
pub struct FakeStore {
    remote: Mutex<Option<Vec<u8>>>,
    fail_fetch: bool,
    fail_persist: bool,
    gate: Option<Arc<Semaphore>>,
    fetches: AtomicUsize,
    persisted: Mutex<Vec<PersistedEnvelope>>,
    resolved: Mutex<Option<Vec<u8>>>,
    resolutions: Mutex<Vec<String>>,
}

impl FakeStore {
    pub fn with_remote(remote: Option<Vec<u8>>) -> Self {
        Self {
            remote: Mutex::new(remote),
            fail_fetch: false,
            fail_persist: false,
            gate: None,
            fetches: AtomicUsize::new(0),
            persisted: Mutex::new(Vec::new()),
            resolved: Mutex::new(None),
            resolutions: Mutex::new(Vec::new()),
        }
    }

    /// Answer conflict resolution requests with `binary`.
    pub fn resolving_to(self, binary: Vec<u8>) -> Self {
        *self.resolved.lock().unwrap() = Some(binary);
        self
    }

    /// Base64 payloads submitted for conflict resolution.
    pub fn resolutions(&self) -> Vec<String> {
        self.resolutions.lock().unwrap().clone()
    }

    pub fn failing_fetch(mut self) -> Self {
        self.fail_fetch = true;
        self
    }

    pub fn failing_persist(mut self) -> Self {
        self.fail_persist = true;
        self
    }

    /// Block every fetch until a permit is added to [`FakeStore::fetch_gate`].
    pub fn gated_fetch(mut self) -> Self {
        self.gate = Some(Arc::new(Semaphore::new(0)));
        self
    }

    pub fn fetch_gate(&self) -> Arc<Semaphore> {
        self.gate.clone().expect("store was not built with gated_fetch")
    }

    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn persisted(&self) -> Vec<PersistedEnvelope> {
        self.persisted.lock().unwrap().clone()
    }
}

#[async_trait]
impl DocumentStore for FakeStore {
    async fn fetch_binary(&self, document: &DocumentId) -> Result<Option<Vec<u8>>, SyncError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
        if self.fail_fetch {
            return Err(SyncError::Fetch {
                document: document.to_string(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(self.remote.lock().unwrap().clone())
    }

    async fn persist(
        &self,
        document: &DocumentId,
        envelope: &PersistedEnvelope,
    ) -> Result<(), SyncError> {
        if self.fail_persist {
            return Err(SyncError::Persist {
                document: document.to_string(),
                reason: "store returned 500".to_string(),
            });
        }
        *self.remote.lock().unwrap() = Some(envelope.binary()?);
        self.persisted.lock().unwrap().push(envelope.clone());
        Ok(())
    }

    /// Echoes `resolved` when set, otherwise the submitted state.
    async fn resolve_conflicts(
        &self,
        document: &DocumentId,
        encoded: &str,
    ) -> Result<Vec<u8>, SyncError> {
        self.resolutions.lock().unwrap().push(encoded.to_string());
        if self.fail_persist {
            return Err(SyncError::Persist {
                document: document.to_string(),
                reason: "store returned 500".to_string(),
            });
        }
        match self.resolved.lock().unwrap().clone() {
            Some(resolved) => Ok(resolved),
            None => crate::codec::decode_persisted(Some(encoded)),
        }
    }
}

/// Editor returning a fixed snapshot and recording replacements.
pub struct FixedEditor {
    snapshot: DocumentSnapshot,
    sets: Mutex<Vec<Vec<u8>>>,
}

impl FixedEditor {
    pub fn ready(binary: Vec<u8>) -> Self {
        Self {
            snapshot: DocumentSnapshot {
                binary: Some(binary),
                html: "<p>local</p>".to_string(),
                json: Some(json!({"type": "doc"})),
            },
            sets: Mutex::new(Vec::new()),
        }
    }

    pub fn not_ready() -> Self {
        Self {
            snapshot: DocumentSnapshot::default(),
            sets: Mutex::new(Vec::new()),
        }
    }

    pub fn without_json(binary: Vec<u8>) -> Self {
        let mut editor = Self::ready(binary);
        editor.snapshot.json = None;
        editor
    }

    pub fn sets(&self) -> Vec<Vec<u8>> {
        self.sets.lock().unwrap().clone()
    }
}

impl EditorSurface for FixedEditor {
    fn get_document(&self) -> DocumentSnapshot {
        self.snapshot.clone()
    }

    fn set_document(&self, binary: &[u8]) -> Result<(), SyncError> {
        self.sets.lock().unwrap().push(binary.to_vec());
        Ok(())
    }
}

/// Merger that records its inputs and returns a fixed result.
pub struct RecordingMerger {
    result: Vec<u8>,
    calls: Mutex<Vec<(Vec<u8>, Vec<u8>)>>,
}

impl RecordingMerger {
    pub fn returning(result: Vec<u8>) -> Self {
        Self {
            result,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.calls.lock().unwrap().clone()
    }
}

impl UpdateMerger for RecordingMerger {
    fn merge(&self, remote_snapshot: &[u8], local_delta: &[u8]) -> Result<Vec<u8>, SyncError> {
        self.calls
            .lock()
            .unwrap()
            .push((remote_snapshot.to_vec(), local_delta.to_vec()));
        Ok(self.result.clone())
    }
}
