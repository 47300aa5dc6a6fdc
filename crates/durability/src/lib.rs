//! Crash-safe snapshot storage for the keel runtime
//!
//! This crate implements the snapshot lifecycle:
//! - Framed, checksummed, optionally snappy-compressed payload
//!   containers (`disk_snapshot`, `format`)
//! - Crash-safe directory transitions with an explicit fsync discipline
//!   and a flag-file durability barrier (`env`, `fileutil`)
//! - Fixed-size chunk streaming to peers (`chunk`)
//! - Auxiliary file staging (`files`)
//! - The orchestrator tying filesystem and log database together
//!   (`snapshotter`)
//!
//! # Crash Model
//!
//! Every partial on-disk state a crash can leave behind is recoverable
//! by [`Snapshotter::process_orphans`] on the next start; no in-memory
//! bookkeeping survives a restart. The flag file acts as the durable
//! barrier between filesystem and log-database state: a directory is
//! complete exactly when its flag file is gone and its payload
//! checksum validates.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod chunk;
pub mod disk_snapshot;
pub mod env;
pub mod fileutil;
pub mod files;
pub mod format;
pub mod snapshotter;
pub mod testing;

pub use chunk::{ChunkSink, ChunkWriter, SnapshotChunk};
pub use disk_snapshot::{
    replace_snapshot_file, shrink_snapshot, Compressor, CountedWriter, Decompressor,
    SnapshotFileInfo, SnapshotReader, SnapshotWriter,
};
pub use env::{EnvMode, SnapshotEnv};
pub use files::FileCollection;
pub use snapshotter::Snapshotter;
