//! # keel
//!
//! Snapshot lifecycle manager for Raft-replicated state machines.
//!
//! Each replica, identified by a `(cluster_id, node_id)` pair,
//! periodically materializes the committed prefix of its state machine
//! into an immutable, self-describing on-disk snapshot so that log
//! prefixes can be truncated, slow followers can be bootstrapped, and
//! crashed nodes can recover without replaying the full log.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use keel::{
//!     SnapshotConfig, SnapshotMeta, SnapshotRequest, Snapshotter,
//!     testing::MemLogStore,
//! };
//! # use keel::testing::ReferenceStateMachine;
//!
//! fn main() -> keel::Result<()> {
//!     let logdb = Arc::new(MemLogStore::new());
//!     let snapshotter =
//!         Snapshotter::new("/var/lib/keel", 1, 1, logdb, SnapshotConfig::default());
//!
//!     // Reconcile filesystem and log database after a restart.
//!     snapshotter.process_orphans()?;
//!
//!     // Stage a snapshot, then publish it atomically.
//!     # let state_machine = ReferenceStateMachine::new(vec![1, 2, 3]);
//!     let meta = SnapshotMeta { index: 100, term: 3, ..Default::default() };
//!     let (record, _env) = snapshotter.save(&state_machine, &meta)?;
//!     snapshotter.commit(record, &SnapshotRequest::periodic())?;
//!
//!     // Reclaim space: keep the three most recent snapshots.
//!     snapshotter.compact(100)?;
//!     Ok(())
//! }
//! ```
//!
//! # Lifecycle
//!
//! | State | Meaning |
//! |-------|---------|
//! | generating | writing into the scratch directory |
//! | staged | renamed to `snapshot-<index>`, flag file still present |
//! | committed | flag file removed, record in the log database |
//! | compacted | deleted by retention |
//!
//! The flag file (`snapshot.message`) is the durability barrier: a
//! crash at any point leaves either a zombie scratch directory or an
//! orphaned final directory, and
//! [`Snapshotter::process_orphans`] reconciles both on the next start.
//!
//! The Raft consensus protocol, the state machine's own save/restore
//! logic, the log database's storage layout, and the network transport
//! for snapshot chunks all live outside this crate; `keel` consumes
//! their interfaces ([`LogStore`], [`SnapshotSavable`], [`ChunkSink`],
//! and so on) and orchestrates the lifecycle between them.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub use keel_core::{
    CancelToken, CompressionKind, FileRegistry, LogStore, Membership, Result, SessionLoader,
    SnapshotConfig, SnapshotError, SnapshotFile, SnapshotKind, SnapshotMeta, SnapshotRecord,
    SnapshotRecoverable, SnapshotRequest, SnapshotRequestKind, SnapshotSavable,
    SnapshotStreamable, SnapshotUpdate, SnapshotVersion, DEFAULT_CHUNK_SIZE, RETENTION_FLOOR,
};
pub use keel_durability::{
    replace_snapshot_file, shrink_snapshot, ChunkSink, ChunkWriter, Compressor, CountedWriter,
    Decompressor, EnvMode, FileCollection, SnapshotChunk, SnapshotEnv, SnapshotFileInfo,
    SnapshotReader, SnapshotWriter, Snapshotter,
};

/// Container format constants and naming helpers; directory names are
/// part of the public interface.
pub mod format {
    pub use keel_durability::format::*;
}

/// Filesystem helpers carrying the lifecycle's fsync discipline.
pub mod fileutil {
    pub use keel_durability::fileutil::*;
}

/// Test support: in-memory log store, reference state machine, and
/// corruption helpers.
pub mod testing {
    pub use keel_durability::testing::*;
}
