//! Filesystem helpers with explicit fsync discipline
//!
//! Every rename in the snapshot lifecycle is preceded by an fsync of the
//! data it publishes and followed by an fsync of the parent directory;
//! these helpers keep that discipline in one place.
//!
//! The flag file (`snapshot.message`) holds the JSON-encoded
//! [`SnapshotRecord`] followed by a CRC32 of the JSON bytes. Its
//! presence marks a snapshot directory as incomplete or uncommitted.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use keel_core::{Result, SnapshotError, SnapshotRecord};

/// Fsync a directory so renames and removals inside it are durable.
pub fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)?.sync_all()?;
    Ok(())
}

/// Create a directory (and parents), then fsync the immediate parent.
pub fn create_dir_and_sync(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir)?;
    if let Some(parent) = dir.parent() {
        sync_dir(parent)?;
    }
    Ok(())
}

/// Write or overwrite the flag file `name` inside `dir` and fsync it.
pub fn create_flag_file(dir: &Path, name: &str, record: &SnapshotRecord) -> Result<()> {
    let mut body = serde_json::to_vec(record)
        .map_err(|e| SnapshotError::InvalidFlagFile(e.to_string()))?;
    let crc = crc32fast::hash(&body);
    body.extend_from_slice(&crc.to_le_bytes());

    let path = dir.join(name);
    let mut file = File::create(&path)?;
    file.write_all(&body)?;
    file.sync_all()?;
    Ok(())
}

/// True when the flag file `name` exists inside `dir`.
pub fn has_flag_file(dir: &Path, name: &str) -> bool {
    dir.join(name).is_file()
}

/// Read and verify the flag file `name` inside `dir`.
pub fn read_flag_file(dir: &Path, name: &str) -> Result<SnapshotRecord> {
    let path = dir.join(name);
    let data = fs::read(&path)?;
    if data.len() <= 4 {
        return Err(SnapshotError::InvalidFlagFile(format!(
            "{} is truncated at {} bytes",
            path.display(),
            data.len()
        )));
    }
    let (body, crc_bytes) = data.split_at(data.len() - 4);
    let stored = u32::from_le_bytes(crc_bytes.try_into().expect("slice length is fixed"));
    let computed = crc32fast::hash(body);
    if stored != computed {
        return Err(SnapshotError::ChecksumMismatch { stored, computed });
    }
    serde_json::from_slice(body).map_err(|e| SnapshotError::InvalidFlagFile(e.to_string()))
}

/// Remove the flag file `name` from `dir` and fsync the directory.
pub fn remove_flag_file(dir: &Path, name: &str) -> Result<()> {
    fs::remove_file(dir.join(name))?;
    sync_dir(dir)
}
