//! Snapshot lifecycle orchestration
//!
//! The `Snapshotter` mediates between the log database and the
//! filesystem for one replica: it drives save, load, peer streaming,
//! atomic commit, retention compaction, payload shrinking, and the
//! orphan sweep that reconciles both worlds after a crash.
//!
//! One snapshotter is owned by its replica's task; its mutating
//! operations are never called concurrently for the same
//! `(cluster_id, node_id)`. There is no internal lock; the `OutOfDate`
//! checks exist to catch logic bugs, not to serialize writers.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use keel_core::{
    LogStore, Result, SessionLoader, SnapshotConfig, SnapshotError, SnapshotFile, SnapshotMeta,
    SnapshotRecord, SnapshotRecoverable, SnapshotRequest, SnapshotSavable, SnapshotStreamable,
    SnapshotUpdate, SnapshotVersion,
};
use tracing::{debug, info, warn};

use crate::chunk::{ChunkSink, ChunkWriter};
use crate::disk_snapshot::{
    replace_snapshot_file, shrink_snapshot, Compressor, CountedWriter, Decompressor,
    SnapshotReader, SnapshotWriter,
};
use crate::env::{EnvMode, SnapshotEnv};
use crate::fileutil;
use crate::format::{
    is_generating_dir_name, is_receiving_dir_name, is_snapshot_dir_name, FLAG_FILENAME,
};

/// Snapshot lifecycle manager for one replica.
pub struct Snapshotter {
    dir: PathBuf,
    cluster_id: u64,
    node_id: u64,
    logdb: Arc<dyn LogStore>,
    config: SnapshotConfig,
}

impl Snapshotter {
    /// Create the manager for `(cluster_id, node_id)` under `root`.
    ///
    /// The replica's snapshots live in `<root>/<cluster>/<node>/`,
    /// both segments zero-padded lowercase hex.
    pub fn new(
        root: impl AsRef<Path>,
        cluster_id: u64,
        node_id: u64,
        logdb: Arc<dyn LogStore>,
        config: SnapshotConfig,
    ) -> Self {
        let dir = root
            .as_ref()
            .join(format!("{cluster_id:016x}"))
            .join(format!("{node_id:016x}"));
        Snapshotter {
            dir,
            cluster_id,
            node_id,
            logdb,
            config,
        }
    }

    /// The replica's snapshot root directory.
    pub fn root_dir(&self) -> &Path {
        &self.dir
    }

    /// Payload path for a committed snapshot at `index`.
    pub fn file_path(&self, index: u64) -> PathBuf {
        self.env(index).final_filepath()
    }

    fn env(&self, index: u64) -> SnapshotEnv {
        SnapshotEnv::new(&self.dir, index, self.node_id, EnvMode::Snapshotting)
    }

    fn env_for_request(&self, index: u64, request: &SnapshotRequest) -> SnapshotEnv {
        match request.exported_path() {
            Some(path) => SnapshotEnv::new(path, index, self.node_id, EnvMode::Snapshotting),
            None => self.env(index),
        }
    }

    /// Materialize the state machine into a staged snapshot.
    ///
    /// Creates the scratch directory, streams the state machine through
    /// the compression and checksum pipeline, stages auxiliary files,
    /// and returns the populated record together with the env. Nothing
    /// is published: the caller invokes [`Snapshotter::commit`] once the
    /// Raft layer accepts the snapshot. On error the scratch directory
    /// is left behind for the next orphan sweep.
    pub fn save(
        &self,
        state_machine: &dyn SnapshotSavable,
        meta: &SnapshotMeta,
    ) -> Result<(SnapshotRecord, SnapshotEnv)> {
        let env = self.env_for_request(meta.index, &meta.request);
        env.create_temp_dir()?;

        let mut files = crate::files::FileCollection::new();
        let temp_filepath = env.temp_filepath();
        let mut file_writer =
            SnapshotWriter::create(&temp_filepath, SnapshotVersion::CURRENT, meta.compression)?;

        let (dummy, uncompressed) = {
            let mut body = CountedWriter::new(Compressor::new(meta.compression, &mut file_writer));
            let dummy = state_machine.save_snapshot(meta, &mut body, &meta.session, &mut files)?;
            let uncompressed = body.bytes_written();
            body.into_inner().finish()?;
            (dummy, uncompressed)
        };

        let prepared = files.prepare_files(env.temp_dir(), env.final_dir())?;
        let file_info = file_writer.finish(uncompressed)?;

        let record = SnapshotRecord {
            cluster_id: self.cluster_id,
            node_id: self.node_id,
            index: meta.index,
            term: meta.term,
            on_disk_index: meta.on_disk_index,
            membership: meta.membership.clone(),
            file_path: env.final_filepath(),
            files: prepared,
            kind: meta.kind,
            dummy,
            checksum: file_info.payload_checksum,
            file_size: file_info.file_size,
            compression: meta.compression,
            witness: false,
        };
        info!(
            cluster_id = self.cluster_id,
            node_id = self.node_id,
            index = meta.index,
            term = meta.term,
            file_size = record.file_size,
            dummy,
            "snapshot staged"
        );
        Ok((record, env))
    }

    /// Recover a state machine from the snapshot at `file_path`.
    ///
    /// Validates the header on open, decodes the session block by the
    /// header version, replays the payload into the state machine, and
    /// then verifies the payload checksum. An integrity failure means
    /// the recovery must be discarded.
    pub fn load(
        &self,
        sessions: &mut dyn SessionLoader,
        state_machine: &mut dyn SnapshotRecoverable,
        file_path: &Path,
        files: &[SnapshotFile],
    ) -> Result<()> {
        let mut reader = SnapshotReader::open(file_path)?;
        let header = *reader.header();
        {
            let mut payload = Decompressor::new(header.compression, &mut reader);
            sessions.load_sessions(&mut payload, header.version)?;
            state_machine.recover_from_snapshot(&mut payload, files)?;
        }
        let uncompressed = reader.validate_payload()?;
        debug!(
            cluster_id = self.cluster_id,
            node_id = self.node_id,
            path = %file_path.display(),
            uncompressed,
            "snapshot recovered"
        );
        Ok(())
    }

    /// Stream a state machine checkpoint to a peer.
    ///
    /// Uses the same encoding pipeline as [`Snapshotter::save`] with the
    /// file sink replaced by a chunk writer; the local filesystem and
    /// the log database are untouched. On any error the sink is stopped
    /// before the error propagates, so the receiver abandons the
    /// transfer.
    pub fn stream(
        &self,
        state_machine: &dyn SnapshotStreamable,
        meta: &SnapshotMeta,
        sink: &mut dyn ChunkSink,
    ) -> Result<()> {
        let mut chunk_writer = ChunkWriter::new(
            sink,
            self.cluster_id,
            self.node_id,
            meta,
            self.config.chunk_size(),
        );
        let streamed = {
            let mut body = Compressor::new(meta.compression, &mut chunk_writer);
            state_machine
                .stream_snapshot(&meta.cancel, &mut body)
                .and_then(|()| body.finish().map_err(SnapshotError::from))
        };
        match streamed {
            Ok(()) => chunk_writer.close(),
            Err(e) => {
                warn!(
                    cluster_id = self.cluster_id,
                    node_id = self.node_id,
                    index = meta.index,
                    error = %e,
                    "snapshot stream aborted"
                );
                chunk_writer.fail();
                Err(e)
            }
        }
    }

    /// Publish a staged snapshot.
    ///
    /// Writes the flag file, renames scratch → final, records the
    /// snapshot in the log database, and only then removes the flag
    /// file. That ordering is what makes a crash at any point
    /// recoverable: the flag file stays until the log database is
    /// durable, so the orphan sweep can tell a half-committed directory
    /// from a committed one.
    ///
    /// Returns [`SnapshotError::OutOfDate`] when a snapshot at this or
    /// a higher index is already committed. Exported snapshots skip the
    /// log database; dummy snapshots skip the filesystem.
    pub fn commit(&self, snapshot: SnapshotRecord, request: &SnapshotRequest) -> Result<()> {
        let env = self.env_for_request(snapshot.index, request);
        if !request.is_exported() {
            match self.most_recent_snapshot() {
                Ok(most_recent) if snapshot.index <= most_recent.index => {
                    return Err(SnapshotError::OutOfDate);
                }
                Ok(_) | Err(SnapshotError::NoSnapshot) => {}
                Err(e) => return Err(e),
            }
        }

        if snapshot.dummy {
            // Metadata-only: record it and drop the staged artifacts.
            if !request.is_exported() {
                self.save_to_logdb(snapshot)?;
            }
            return env.remove_temp_dir();
        }

        env.save_metadata(&snapshot)?;
        env.finalize(&snapshot)?;
        let index = snapshot.index;
        if !request.is_exported() {
            self.save_to_logdb(snapshot)?;
        }
        env.remove_flag_file()?;
        info!(
            cluster_id = self.cluster_id,
            node_id = self.node_id,
            index,
            exported = request.is_exported(),
            "snapshot committed"
        );
        Ok(())
    }

    /// Remove the flag file of the snapshot directory at `index`,
    /// marking it committed. Used by restart paths that re-drive a
    /// commit whose log-database write already survived.
    pub fn remove_flag_file(&self, index: u64) -> Result<()> {
        self.env(index).remove_flag_file()
    }

    /// Fetch the metadata record for `index`.
    pub fn get_snapshot(&self, index: u64) -> Result<SnapshotRecord> {
        let snapshots = self
            .logdb
            .list_snapshots(self.cluster_id, self.node_id, index)?;
        snapshots
            .into_iter()
            .find(|ss| ss.index == index)
            .ok_or(SnapshotError::NoSnapshot)
    }

    /// Fetch the most recent committed snapshot.
    pub fn most_recent_snapshot(&self) -> Result<SnapshotRecord> {
        let snapshots = self
            .logdb
            .list_snapshots(self.cluster_id, self.node_id, u64::MAX)?;
        snapshots.into_iter().last().ok_or(SnapshotError::NoSnapshot)
    }

    /// Replace the payloads of snapshots at or below `shrink_to` with
    /// empty placeholders, reclaiming space once an on-disk state
    /// machine has made them redundant. Metadata, directories, and
    /// auxiliary files stay intact.
    pub fn shrink(&self, shrink_to: u64) -> Result<()> {
        let snapshots = self
            .logdb
            .list_snapshots(self.cluster_id, self.node_id, shrink_to)?;
        info!(
            cluster_id = self.cluster_id,
            node_id = self.node_id,
            count = snapshots.len(),
            shrink_to,
            "snapshots to shrink"
        );
        for snapshot in snapshots {
            if snapshot.index > shrink_to {
                panic!(
                    "snapshot {} listed above shrink bound {shrink_to}",
                    snapshot.index
                );
            }
            if snapshot.dummy {
                continue;
            }
            let env = self.env(snapshot.index);
            let filepath = env.final_filepath();
            let shrunk = env.shrunk_filepath();
            debug!(index = snapshot.index, "shrinking snapshot");
            shrink_snapshot(&filepath, &shrunk)?;
            replace_snapshot_file(&shrunk, &filepath)?;
        }
        Ok(())
    }

    /// Delete obsolete snapshots with index at most `remove_up_to`,
    /// always retaining the configured number of most recent ones.
    ///
    /// The log-database record is deleted before the directory so a
    /// crash in between leaves a directory the orphan sweep will
    /// collect, never a dangling record.
    pub fn compact(&self, remove_up_to: u64) -> Result<()> {
        let snapshots = self
            .logdb
            .list_snapshots(self.cluster_id, self.node_id, remove_up_to)?;
        let keep = self.config.snapshots_to_keep();
        if snapshots.len() <= keep {
            return Ok(());
        }
        let selected = &snapshots[..snapshots.len() - keep];
        info!(
            cluster_id = self.cluster_id,
            node_id = self.node_id,
            count = selected.len(),
            "snapshots to compact"
        );
        for snapshot in selected {
            debug!(index = snapshot.index, "compacting snapshot");
            self.logdb
                .delete_snapshot(self.cluster_id, self.node_id, snapshot.index)?;
            if !snapshot.dummy {
                self.env(snapshot.index).remove_final_dir()?;
            }
        }
        Ok(())
    }

    /// Reconcile the filesystem with the log database after a restart.
    ///
    /// Orphans (final-named directories still carrying their flag
    /// file) are kept, flag removed, only when they are the log database's
    /// most recent snapshot, the state a crash between the log-database
    /// write and the flag removal leaves behind; otherwise they are
    /// deleted. Zombie scratch directories from interrupted saves or
    /// inbound streams are always deleted. Calling this twice in a row
    /// makes the second call a no-op.
    pub fn process_orphans(&self) -> Result<()> {
        if !self.dir.exists() {
            return Ok(());
        }
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            let dir_path = entry.path();
            if is_snapshot_dir_name(&name) && fileutil::has_flag_file(&dir_path, FLAG_FILENAME) {
                info!(dir = %dir_path.display(), "found an orphaned snapshot directory");
                let record = fileutil::read_flag_file(&dir_path, FLAG_FILENAME)?;
                if record.is_empty() {
                    panic!("empty snapshot record in {}", dir_path.display());
                }
                let delete_dir = match self.most_recent_snapshot() {
                    Ok(most_recent) => most_recent.index != record.index,
                    Err(SnapshotError::NoSnapshot) => true,
                    Err(e) => return Err(e),
                };
                let env = self.env(record.index);
                if delete_dir {
                    info!(dir = %dir_path.display(), index = record.index, "deleting orphaned snapshot");
                    env.remove_final_dir()?;
                } else {
                    info!(dir = %dir_path.display(), index = record.index, "keeping committed snapshot, removing flag file");
                    env.remove_flag_file()?;
                }
            } else if is_generating_dir_name(&name) || is_receiving_dir_name(&name) {
                info!(dir = %dir_path.display(), "deleting zombie snapshot directory");
                fs::remove_dir_all(&dir_path)?;
                fileutil::sync_dir(&self.dir)?;
            }
        }
        Ok(())
    }

    fn save_to_logdb(&self, snapshot: SnapshotRecord) -> Result<()> {
        let update = SnapshotUpdate {
            cluster_id: self.cluster_id,
            node_id: self.node_id,
            snapshot,
        };
        self.logdb.save_snapshots(std::slice::from_ref(&update))
    }
}
