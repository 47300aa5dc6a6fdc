//! Snapshot container I/O
//!
//! - `writer`: streaming checksummed container writer and the
//!   compression/counting pipeline stages
//! - `reader`: eager header validation, deferred payload validation
//! - `shrink`: payload replacement for obsolete snapshots

pub mod reader;
pub mod shrink;
pub mod writer;

pub use reader::{Decompressor, SnapshotReader};
pub use shrink::{replace_snapshot_file, shrink_snapshot};
pub use writer::{Compressor, CountedWriter, SnapshotFileInfo, SnapshotWriter};
