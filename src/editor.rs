//! Editor surface capability.
//!
//! The editing surface owns the live document. The synchronizer only reads it
//! through [`EditorSurface::get_document`]. The session's reconnect and
//! conflict-resolution paths are the only callers of
//! [`EditorSurface::set_document`].

use serde_json::Value;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use yrs::{Transact, XmlElementPrelim, XmlFragment, XmlTextPrelim};

use crate::codec;
use crate::errors::SyncError;
use crate::html;

/// Synchronous snapshot of the editor's in-memory document state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentSnapshot {
    /// Full binary state; `None` until the editor has loaded a document.
    pub binary: Option<Vec<u8>>,
    pub html: String,
    /// Structured rendering; `None` until the editor has loaded a document.
    pub json: Option<Value>,
}

impl DocumentSnapshot {
    /// Whether the snapshot carries enough state to synchronize.
    pub fn is_ready(&self) -> bool {
        self.binary.is_some() && self.json.is_some()
    }
}

/// Capability interface for the editing surface.
pub trait EditorSurface: Send + Sync {
    fn get_document(&self) -> DocumentSnapshot;

    /// Apply `binary` onto the live document, keeping local edits it does
    /// not contain. An empty update leaves the document unchanged.
    fn set_document(&self, binary: &[u8]) -> Result<(), SyncError>;
}

/// In-process editor backed by a `yrs` document.
///
/// Holds the encoded state and materializes a document per operation, so
/// edits are attributed to this editor's own client id.
pub struct MemoryEditor {
    client_id: u64,
    state: Mutex<Option<Vec<u8>>>,
    resets: AtomicU64,
}

impl Default for MemoryEditor {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryEditor {
    /// Create an editor that has not loaded a document yet.
    pub fn new() -> Self {
        Self {
            client_id: random_client_id(),
            state: Mutex::new(None),
            resets: AtomicU64::new(0),
        }
    }

    /// Create an editor already holding `binary`.
    pub fn with_binary(binary: Vec<u8>) -> Self {
        let editor = Self::new();
        *editor.lock_state() = Some(binary);
        editor
    }

    /// Create an editor for a session, loading the saved blob or deriving state
    /// from saved HTML.
    pub fn from_saved(saved_base64: Option<&str>, saved_html: Option<&str>) -> Self {
        Self::with_binary(codec::initial_binary(saved_base64, saved_html))
    }

    /// Client id this editor writes under.
    pub fn client_id(&self) -> u64 {
        self.client_id
    }

    /// Number of updates applied through `set_document`.
    pub fn reset_count(&self) -> u64 {
        self.resets.load(Ordering::SeqCst)
    }

    /// Append a paragraph as a local edit.
    pub fn append_paragraph(&self, text: &str) -> Result<(), SyncError> {
        let mut state = self.lock_state();
        let base = state.as_deref().unwrap_or_default();
        let doc = codec::load_doc(base, self.client_id)?;
        let fragment = doc.get_or_insert_xml_fragment(codec::FRAGMENT_NAME);
        {
            let mut txn = doc.transact_mut();
            let paragraph = fragment.push_back(&mut txn, XmlElementPrelim::empty("p"));
            paragraph.push_back(&mut txn, XmlTextPrelim::new(text));
        }
        *state = Some(codec::encode_doc(&doc));
        Ok(())
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, Option<Vec<u8>>> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl EditorSurface for MemoryEditor {
    fn get_document(&self) -> DocumentSnapshot {
        let Some(binary) = self.lock_state().clone() else {
            return DocumentSnapshot::default();
        };
        match codec::load_doc(&binary, self.client_id) {
            Ok(doc) => {
                let html = codec::doc_html(&doc);
                let json = html::to_prosemirror_json(&html);
                DocumentSnapshot {
                    binary: Some(binary),
                    html,
                    json: Some(json),
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "editor holds unreadable binary state");
                DocumentSnapshot {
                    binary: Some(binary),
                    html: String::new(),
                    json: None,
                }
            }
        }
    }

    fn set_document(&self, binary: &[u8]) -> Result<(), SyncError> {
        if binary.is_empty() {
            return Ok(());
        }
        // Held across read and write so concurrent local edits are not lost
        let mut state = self.lock_state();
        let base = state.as_deref().unwrap_or_default();
        let doc = codec::load_doc(base, self.client_id)
            .map_err(|e| SyncError::Editor(e.to_string()))?;
        codec::apply_update(&doc, binary).map_err(|e| SyncError::Editor(e.to_string()))?;
        *state = Some(codec::encode_doc(&doc));
        self.resets.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Random non-zero client id, disjoint from the HTML derivation id.
fn random_client_id() -> u64 {
    let id = (uuid::Uuid::new_v4().as_u128() as u64) & 0xFFFF_FFFF;
    id.max(codec::HTML_DERIVATION_CLIENT_ID + 1)
}
