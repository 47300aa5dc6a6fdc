//! Shrinking obsolete snapshots
//!
//! When an on-disk state machine has made a snapshot's payload
//! redundant, the payload is replaced with an empty placeholder while
//! the surrounding metadata (log database record, directory, auxiliary
//! files) stays intact. The shrunk container is written next to the
//! original and swapped in with a rename, so a crash at any point
//! leaves either the full or the shrunk payload, never a torn one.

use std::fs;
use std::path::Path;

use keel_core::{CompressionKind, Result};
use tracing::debug;

use crate::disk_snapshot::reader::SnapshotReader;
use crate::disk_snapshot::writer::SnapshotWriter;
use crate::fileutil::sync_dir;

/// Write an empty-payload placeholder for the container at `src`.
///
/// The source header is validated first; its session-block version is
/// preserved, compression is dropped along with the payload.
pub fn shrink_snapshot(src: &Path, dst: &Path) -> Result<()> {
    let reader = SnapshotReader::open(src)?;
    let version = reader.header().version;
    drop(reader);

    let writer = SnapshotWriter::create(dst, version, CompressionKind::None)?;
    let info = writer.finish(0)?;
    debug!(
        src = %src.display(),
        dst = %dst.display(),
        file_size = info.file_size,
        "wrote shrunk snapshot placeholder"
    );
    Ok(())
}

/// Atomically replace `original` with `shrunk` and fsync the directory.
pub fn replace_snapshot_file(shrunk: &Path, original: &Path) -> Result<()> {
    fs::rename(shrunk, original)?;
    if let Some(parent) = original.parent() {
        sync_dir(parent)?;
    }
    Ok(())
}
