//! HTTP fallback synchronization for realtime collaborative documents.
//!
//! While the realtime transport is healthy it owns persistence and this crate
//! stays out of the way. When health probes keep failing, the session falls
//! back to reconciling the editor's binary CRDT state with the document store
//! over plain HTTP: fetch the stored snapshot, merge, persist.

pub mod codec;
pub mod config;
pub mod editor;
pub mod errors;
pub mod html;
pub mod liveness;
pub mod logging;
pub mod merge;
pub mod scheduler;
pub mod server;
pub mod session;
pub mod store;
pub mod sync;

#[cfg(test)]
pub(crate) mod testing;

pub use errors::SyncError;
