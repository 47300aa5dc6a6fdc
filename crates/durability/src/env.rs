//! Per-attempt snapshot directory environment
//!
//! A `SnapshotEnv` owns the filesystem transitions for one snapshot
//! index: scratch directory in, flag file written, rename to the final
//! name, flag file removed once the log database has the record. The
//! flag file is the durability barrier between filesystem and
//! log-database state: a directory is complete only when the flag file
//! is gone and its payload validates.
//!
//! # Crash Safety
//!
//! 1. Payload and auxiliary files are written into the scratch dir
//! 2. The flag file (serialized metadata) is written and the scratch
//!    dir fsynced
//! 3. Scratch renames to `snapshot-<index>`; the parent is fsynced
//! 4. After the log database records the snapshot, the flag file is
//!    removed and the final dir fsynced
//!
//! A crash before step 3 leaves a zombie scratch dir; a crash between
//! steps 3 and 4 leaves an orphan with its flag file intact. Both are
//! collected by the snapshotter's orphan sweep on the next start.

use std::fs;
use std::path::{Path, PathBuf};

use keel_core::{Result, SnapshotError, SnapshotRecord};
use tracing::debug;

use crate::fileutil::{self, sync_dir};
use crate::format::{
    generating_dir_name, payload_filename, receiving_dir_name, shrunk_filename,
    snapshot_dir_name, FLAG_FILENAME,
};

/// Which scratch-directory family an env uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvMode {
    /// Local save: scratch dirs are named `generating-*`.
    Snapshotting,
    /// Inbound stream: scratch dirs are named `receiving-*`.
    Receiving,
}

/// Filesystem layout for a single snapshot attempt.
#[derive(Debug)]
pub struct SnapshotEnv {
    root: PathBuf,
    index: u64,
    writer_id: u64,
    temp_dir: PathBuf,
    final_dir: PathBuf,
}

impl SnapshotEnv {
    /// Create an env rooted at the replica's snapshot directory.
    ///
    /// `writer_id` distinguishes concurrent producers for the same
    /// index: the local node id for saves, the sender's node id for
    /// inbound streams.
    pub fn new(root: &Path, index: u64, writer_id: u64, mode: EnvMode) -> Self {
        let temp_name = match mode {
            EnvMode::Snapshotting => generating_dir_name(index, writer_id),
            EnvMode::Receiving => receiving_dir_name(index, writer_id),
        };
        SnapshotEnv {
            root: root.to_path_buf(),
            index,
            writer_id,
            temp_dir: root.join(temp_name),
            final_dir: root.join(snapshot_dir_name(index)),
        }
    }

    /// Snapshot index this env serves.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Scratch directory for this attempt.
    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    /// Committed location for this index.
    pub fn final_dir(&self) -> &Path {
        &self.final_dir
    }

    /// Payload path inside the scratch directory.
    pub fn temp_filepath(&self) -> PathBuf {
        self.temp_dir.join(payload_filename(self.index))
    }

    /// Payload path inside the final directory.
    pub fn final_filepath(&self) -> PathBuf {
        self.final_dir.join(payload_filename(self.index))
    }

    /// Scratch path used while shrinking this snapshot's payload.
    pub fn shrunk_filepath(&self) -> PathBuf {
        self.final_dir.join(shrunk_filename(self.index))
    }

    /// Create the scratch directory, creating parents as needed, and
    /// fsync its parent. A leftover scratch dir from an earlier failed
    /// attempt at the same index is discarded first.
    pub fn create_temp_dir(&self) -> Result<()> {
        if self.temp_dir.exists() {
            fs::remove_dir_all(&self.temp_dir)?;
        }
        fileutil::create_dir_and_sync(&self.temp_dir)
    }

    /// Write or overwrite the flag file inside the scratch directory.
    pub fn save_metadata(&self, record: &SnapshotRecord) -> Result<()> {
        fileutil::create_flag_file(&self.temp_dir, FLAG_FILENAME, record)
    }

    /// Publish the scratch directory at the final name.
    ///
    /// Writes the flag file, fsyncs the scratch dir, renames it to the
    /// final name, and fsyncs the parent. Fails with
    /// [`SnapshotError::OutOfDate`] when the final directory already
    /// exists.
    pub fn finalize(&self, record: &SnapshotRecord) -> Result<()> {
        self.save_metadata(record)?;
        sync_dir(&self.temp_dir)?;
        if self.final_dir.exists() {
            return Err(SnapshotError::OutOfDate);
        }
        fs::rename(&self.temp_dir, &self.final_dir)?;
        sync_dir(&self.root)?;
        debug!(dir = %self.final_dir.display(), "snapshot directory finalized");
        Ok(())
    }

    /// True while the final directory still carries its flag file.
    pub fn has_flag_file(&self) -> bool {
        fileutil::has_flag_file(&self.final_dir, FLAG_FILENAME)
    }

    /// Read and verify the flag file inside the final directory.
    pub fn read_flag_file(&self) -> Result<SnapshotRecord> {
        fileutil::read_flag_file(&self.final_dir, FLAG_FILENAME)
    }

    /// Remove the flag file from the final directory and fsync it.
    /// Called once the log database has durably recorded the snapshot;
    /// the directory counts as committed afterwards.
    pub fn remove_flag_file(&self) -> Result<()> {
        fileutil::remove_flag_file(&self.final_dir, FLAG_FILENAME)
    }

    /// Remove the final directory.
    ///
    /// The directory is first renamed to a scratch (`receiving-*`) name
    /// so a crash mid-removal leaves a zombie the orphan sweep will
    /// collect, then deleted; the parent is fsynced around both steps.
    /// Absent final dir is a no-op.
    pub fn remove_final_dir(&self) -> Result<()> {
        if !self.final_dir.exists() {
            return Ok(());
        }
        let zombie = self.root.join(receiving_dir_name(self.index, self.writer_id));
        if zombie.exists() {
            fs::remove_dir_all(&zombie)?;
        }
        fs::rename(&self.final_dir, &zombie)?;
        sync_dir(&self.root)?;
        fs::remove_dir_all(&zombie)?;
        sync_dir(&self.root)?;
        debug!(dir = %self.final_dir.display(), "snapshot directory removed");
        Ok(())
    }

    /// Remove the scratch directory, if present, and fsync the parent.
    pub fn remove_temp_dir(&self) -> Result<()> {
        if !self.temp_dir.exists() {
            return Ok(());
        }
        fs::remove_dir_all(&self.temp_dir)?;
        sync_dir(&self.root)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(index: u64) -> SnapshotRecord {
        SnapshotRecord {
            cluster_id: 1,
            node_id: 2,
            index,
            term: 5,
            ..Default::default()
        }
    }

    #[test]
    fn test_path_layout() {
        let env = SnapshotEnv::new(Path::new("/data/1/2"), 100, 2, EnvMode::Snapshotting);
        assert_eq!(
            env.temp_dir(),
            Path::new("/data/1/2/generating-0000000000000064-2")
        );
        assert_eq!(
            env.final_dir(),
            Path::new("/data/1/2/snapshot-0000000000000064")
        );
        assert_eq!(
            env.temp_filepath(),
            Path::new("/data/1/2/generating-0000000000000064-2/snapshot-0000000000000064.gbsnap")
        );
        assert_eq!(
            env.final_filepath(),
            Path::new("/data/1/2/snapshot-0000000000000064/snapshot-0000000000000064.gbsnap")
        );
        assert_eq!(
            env.shrunk_filepath(),
            Path::new("/data/1/2/snapshot-0000000000000064/snapshot-0000000000000064.gbsnap.shrunk")
        );
    }

    #[test]
    fn test_receiving_mode_prefix() {
        let env = SnapshotEnv::new(Path::new("/data"), 100, 7, EnvMode::Receiving);
        assert_eq!(
            env.temp_dir(),
            Path::new("/data/receiving-0000000000000064-7")
        );
    }

    #[test]
    fn test_finalize_lifecycle() {
        let root = tempfile::tempdir().unwrap();
        let env = SnapshotEnv::new(root.path(), 100, 1, EnvMode::Snapshotting);

        env.create_temp_dir().unwrap();
        std::fs::write(env.temp_filepath(), b"payload").unwrap();

        env.finalize(&record(100)).unwrap();
        assert!(!env.temp_dir().exists());
        assert!(env.final_dir().is_dir());
        assert!(env.final_filepath().is_file());

        // Staged: flag file present until the log database has the record.
        assert!(env.has_flag_file());
        assert_eq!(env.read_flag_file().unwrap().index, 100);

        env.remove_flag_file().unwrap();
        assert!(!env.has_flag_file());
    }

    #[test]
    fn test_finalize_out_of_date() {
        let root = tempfile::tempdir().unwrap();
        let env = SnapshotEnv::new(root.path(), 100, 1, EnvMode::Snapshotting);

        env.create_temp_dir().unwrap();
        env.finalize(&record(100)).unwrap();

        // A second attempt at the same index must be rejected.
        let retry = SnapshotEnv::new(root.path(), 100, 1, EnvMode::Snapshotting);
        retry.create_temp_dir().unwrap();
        assert!(matches!(
            retry.finalize(&record(100)),
            Err(SnapshotError::OutOfDate)
        ));
        // The loser's scratch dir stays for the orphan sweep.
        assert!(retry.temp_dir().exists());
    }

    #[test]
    fn test_create_temp_dir_discards_stale_attempt() {
        let root = tempfile::tempdir().unwrap();
        let env = SnapshotEnv::new(root.path(), 100, 1, EnvMode::Snapshotting);

        env.create_temp_dir().unwrap();
        std::fs::write(env.temp_dir().join("external-9"), b"stale").unwrap();

        env.create_temp_dir().unwrap();
        assert!(env.temp_dir().is_dir());
        assert!(!env.temp_dir().join("external-9").exists());
    }

    #[test]
    fn test_remove_final_dir() {
        let root = tempfile::tempdir().unwrap();
        let env = SnapshotEnv::new(root.path(), 100, 1, EnvMode::Snapshotting);

        env.create_temp_dir().unwrap();
        env.finalize(&record(100)).unwrap();
        assert!(env.final_dir().exists());

        env.remove_final_dir().unwrap();
        assert!(!env.final_dir().exists());
        // No zombie left behind either.
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);

        // Removing an absent dir is a no-op.
        env.remove_final_dir().unwrap();
    }
}
