//! Interfaces consumed by the snapshot lifecycle
//!
//! The snapshotter orchestrates three collaborators it does not
//! implement: the log database that indexes snapshot metadata, the
//! application state machine that produces and consumes payload bytes,
//! and the session loader that decodes the session block. These traits
//! are the seams; swapping an implementation must not disturb the
//! lifecycle logic.

use std::io::{Read, Write};
use std::path::PathBuf;

use crate::error::Result;
use crate::types::{
    CancelToken, SnapshotFile, SnapshotMeta, SnapshotRecord, SnapshotUpdate, SnapshotVersion,
};

/// Snapshot metadata index kept by the log database.
///
/// Implementations must keep the snapshot list for each
/// `(cluster_id, node_id)` pair ordered by strictly increasing index.
/// Errors are propagated to callers unchanged.
pub trait LogStore: Send + Sync {
    /// List snapshots for a replica with index at most `max_index`,
    /// ordered ascending by index.
    fn list_snapshots(
        &self,
        cluster_id: u64,
        node_id: u64,
        max_index: u64,
    ) -> Result<Vec<SnapshotRecord>>;

    /// Atomically append snapshot metadata records.
    fn save_snapshots(&self, updates: &[SnapshotUpdate]) -> Result<()>;

    /// Delete the metadata record for one snapshot.
    fn delete_snapshot(&self, cluster_id: u64, node_id: u64, index: u64) -> Result<()>;
}

/// Destination for auxiliary files a state machine attaches to a
/// snapshot while saving.
///
/// `file_id` must be unique within the snapshot and stable across
/// restarts; registering a duplicate id is a caller bug and panics.
pub trait FileRegistry {
    /// Attach the file at `path` to the snapshot under `file_id`,
    /// carrying `metadata` opaque bytes along with it.
    fn add_file(&mut self, file_id: u64, path: PathBuf, metadata: Vec<u8>);
}

/// A state machine that can materialize its applied state into a
/// snapshot writer.
pub trait SnapshotSavable {
    /// Write the captured state into `writer`, after writing the
    /// supplied session bytes. Attach any auxiliary files through
    /// `files`. Returns `true` for a dummy snapshot that advances the
    /// applied index without persisting state.
    ///
    /// Implementations must observe `meta.cancel` and return
    /// [`crate::SnapshotError::Stopped`] promptly once it fires.
    fn save_snapshot(
        &self,
        meta: &SnapshotMeta,
        writer: &mut dyn Write,
        session: &[u8],
        files: &mut dyn FileRegistry,
    ) -> Result<bool>;
}

/// A state machine that can stream a consistent checkpoint directly to
/// a peer, bypassing the local filesystem.
pub trait SnapshotStreamable {
    /// Write the checkpoint bytes into `writer`, observing `cancel`.
    fn stream_snapshot(&self, cancel: &CancelToken, writer: &mut dyn Write) -> Result<()>;
}

/// A state machine that can rebuild itself from a snapshot reader.
pub trait SnapshotRecoverable {
    /// Consume the payload stream and the staged auxiliary files.
    fn recover_from_snapshot(
        &mut self,
        reader: &mut dyn Read,
        files: &[SnapshotFile],
    ) -> Result<()>;
}

/// Decoder for the session block that precedes the state machine data.
pub trait SessionLoader {
    /// Decode the session block; `version` gates its layout.
    fn load_sessions(&mut self, reader: &mut dyn Read, version: SnapshotVersion) -> Result<()>;
}
