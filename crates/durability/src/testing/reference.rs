//! Reference state machine for round-trip tests
//!
//! Holds a byte blob as its entire state. The session block is written
//! length-prefixed (u32 LE) ahead of the state so the session loader
//! can find its end without a delimiter.

use std::io::{Read, Write};
use std::path::PathBuf;

use keel_core::{
    CancelToken, FileRegistry, Result, SessionLoader, SnapshotError, SnapshotFile, SnapshotMeta,
    SnapshotRecoverable, SnapshotSavable, SnapshotStreamable, SnapshotVersion,
};

/// State machine whose state is a single byte blob.
#[derive(Debug, Clone, Default)]
pub struct ReferenceStateMachine {
    state: Vec<u8>,
    external_files: Vec<(u64, PathBuf, Vec<u8>)>,
    dummy: bool,
    recovered_files: Vec<SnapshotFile>,
}

impl ReferenceStateMachine {
    /// State machine holding `state`.
    pub fn new(state: Vec<u8>) -> Self {
        ReferenceStateMachine {
            state,
            ..Default::default()
        }
    }

    /// State machine with no state, ready to recover.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Attach an external file to every snapshot this machine saves.
    pub fn with_file(mut self, file_id: u64, path: impl Into<PathBuf>, metadata: Vec<u8>) -> Self {
        self.external_files.push((file_id, path.into(), metadata));
        self
    }

    /// Report every snapshot as a dummy.
    pub fn with_dummy(mut self) -> Self {
        self.dummy = true;
        self
    }

    /// Current state blob.
    pub fn state(&self) -> &[u8] {
        &self.state
    }

    /// Auxiliary files seen by the last recovery.
    pub fn recovered_files(&self) -> &[SnapshotFile] {
        &self.recovered_files
    }
}

impl SnapshotSavable for ReferenceStateMachine {
    fn save_snapshot(
        &self,
        meta: &SnapshotMeta,
        writer: &mut dyn Write,
        session: &[u8],
        files: &mut dyn FileRegistry,
    ) -> Result<bool> {
        if meta.cancel.is_cancelled() {
            return Err(SnapshotError::Stopped);
        }
        writer.write_all(&(session.len() as u32).to_le_bytes())?;
        writer.write_all(session)?;
        writer.write_all(&self.state)?;
        for (file_id, path, metadata) in &self.external_files {
            files.add_file(*file_id, path.clone(), metadata.clone());
        }
        Ok(self.dummy)
    }
}

impl SnapshotStreamable for ReferenceStateMachine {
    fn stream_snapshot(&self, cancel: &CancelToken, writer: &mut dyn Write) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(SnapshotError::Stopped);
        }
        writer.write_all(&self.state)?;
        Ok(())
    }
}

impl SnapshotRecoverable for ReferenceStateMachine {
    fn recover_from_snapshot(
        &mut self,
        reader: &mut dyn Read,
        files: &[SnapshotFile],
    ) -> Result<()> {
        self.state.clear();
        reader.read_to_end(&mut self.state)?;
        self.recovered_files = files.to_vec();
        Ok(())
    }
}

/// Session loader matching [`ReferenceStateMachine`]'s session framing.
#[derive(Debug, Default)]
pub struct ReferenceSessionLoader {
    loaded: Vec<u8>,
    seen_version: Option<SnapshotVersion>,
}

impl ReferenceSessionLoader {
    /// Session bytes decoded by the last load.
    pub fn loaded(&self) -> &[u8] {
        &self.loaded
    }

    /// Version the last load was dispatched with.
    pub fn seen_version(&self) -> Option<SnapshotVersion> {
        self.seen_version
    }
}

impl SessionLoader for ReferenceSessionLoader {
    fn load_sessions(&mut self, reader: &mut dyn Read, version: SnapshotVersion) -> Result<()> {
        self.seen_version = Some(version);
        let mut len_bytes = [0u8; 4];
        reader.read_exact(&mut len_bytes)?;
        let len = u32::from_le_bytes(len_bytes) as usize;
        self.loaded = vec![0u8; len];
        reader.read_exact(&mut self.loaded)?;
        Ok(())
    }
}
