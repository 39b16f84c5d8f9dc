//! Update merging.
//!
//! The conflict resolution itself belongs to the CRDT library; this module only
//! decides what gets merged. Empty inputs mean "no information" and are never
//! handed to the decoder.

use crate::errors::SyncError;

/// Combines a remote binary snapshot with a local binary delta.
///
/// Real implementation: [`YrsMerger`]. Tests substitute recording doubles.
pub trait UpdateMerger: Send + Sync {
    fn merge(&self, remote_snapshot: &[u8], local_delta: &[u8]) -> Result<Vec<u8>, SyncError>;
}

/// Merger backed by `yrs` v1 update merging.
#[derive(Debug, Clone, Copy, Default)]
pub struct YrsMerger;

impl UpdateMerger for YrsMerger {
    fn merge(&self, remote_snapshot: &[u8], local_delta: &[u8]) -> Result<Vec<u8>, SyncError> {
        match (remote_snapshot.is_empty(), local_delta.is_empty()) {
            (true, true) => Ok(Vec::new()),
            (false, true) => normalize(remote_snapshot),
            (true, false) => normalize(local_delta),
            (false, false) => merge_all(&[remote_snapshot, local_delta]),
        }
    }
}

/// Canonical encoding of a single update. Empty stays empty.
pub fn normalize(update: &[u8]) -> Result<Vec<u8>, SyncError> {
    if update.is_empty() {
        return Ok(Vec::new());
    }
    merge_all(&[update])
}

fn merge_all(updates: &[&[u8]]) -> Result<Vec<u8>, SyncError> {
    yrs::merge_updates_v1(updates).map_err(|e| SyncError::Merge(e.to_string()))
}
