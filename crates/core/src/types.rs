//! Snapshot metadata vocabulary
//!
//! These types describe a snapshot as both the log database and the
//! filesystem see it: Raft coordinates, membership at capture time, the
//! payload artifact, and any auxiliary files the state machine attached.
//!
//! `SnapshotRecord` is the persisted form. It is written into the log
//! database and, JSON-encoded, into the flag file inside a snapshot
//! directory, so all members derive `Serialize`/`Deserialize`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SnapshotError};

/// Layout version of the session block that follows the container header.
///
/// The version is a single byte in the header; the session loader
/// dispatches on it when decoding the session block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotVersion {
    /// Original session block layout.
    V1,
    /// Current session block layout.
    V2,
}

impl SnapshotVersion {
    /// Version written by this build.
    pub const CURRENT: SnapshotVersion = SnapshotVersion::V2;

    /// Wire byte for this version.
    pub fn as_u8(self) -> u8 {
        match self {
            SnapshotVersion::V1 => 1,
            SnapshotVersion::V2 => 2,
        }
    }

    /// Decode a version byte read from a header.
    pub fn from_u8(v: u8) -> Result<Self> {
        match v {
            1 => Ok(SnapshotVersion::V1),
            2 => Ok(SnapshotVersion::V2),
            other => Err(SnapshotError::UnsupportedVersion(other)),
        }
    }
}

/// Compression applied to the snapshot payload stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompressionKind {
    /// Payload bytes are stored as written.
    #[default]
    None,
    /// Payload bytes pass through a snappy frame encoder.
    Snappy,
}

impl CompressionKind {
    /// Wire byte for this compression kind.
    pub fn as_tag(self) -> u8 {
        match self {
            CompressionKind::None => 0,
            CompressionKind::Snappy => 1,
        }
    }

    /// Decode a compression byte read from a header.
    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(CompressionKind::None),
            1 => Ok(CompressionKind::Snappy),
            other => Err(SnapshotError::UnknownCompression(other)),
        }
    }
}

/// What the snapshot artifact represents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotKind {
    /// A regular snapshot carrying materialized state.
    #[default]
    Regular,
    /// A pointer snapshot for on-disk state machines; the payload is a
    /// placeholder and the state lives in the state machine's own files.
    OnDiskPointer,
}

/// Cluster configuration captured alongside a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    /// Id of the config-change entry this membership derives from.
    pub config_change_id: u64,
    /// Voting members, node id to address.
    pub voters: BTreeMap<u64, String>,
    /// Non-voting observers.
    pub observers: BTreeMap<u64, String>,
    /// Witness members.
    pub witnesses: BTreeMap<u64, String>,
    /// Node ids removed from the cluster.
    pub removed: BTreeSet<u64>,
}

/// An auxiliary file attached to a snapshot by the state machine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotFile {
    /// Stable id, unique within the snapshot.
    pub file_id: u64,
    /// Location of the staged copy, inside the final snapshot directory.
    pub path: PathBuf,
    /// Opaque metadata supplied by the state machine.
    pub metadata: Vec<u8>,
    /// Length of the staged copy in bytes.
    pub file_size: u64,
}

/// Persisted description of one snapshot.
///
/// Stored in the log database and, JSON-encoded with a trailing CRC32,
/// in the `snapshot.message` flag file of the snapshot directory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    /// Owning cluster.
    pub cluster_id: u64,
    /// Owning replica within the cluster.
    pub node_id: u64,
    /// Raft index of the last applied entry captured.
    pub index: u64,
    /// Raft term of the last applied entry captured.
    pub term: u64,
    /// Advisory watermark for on-disk state machines.
    pub on_disk_index: u64,
    /// Cluster configuration at snapshot time.
    pub membership: Membership,
    /// Absolute path of the payload file; empty for dummy snapshots.
    pub file_path: PathBuf,
    /// Auxiliary files, ordered by registration.
    pub files: Vec<SnapshotFile>,
    /// What the artifact represents.
    pub kind: SnapshotKind,
    /// A dummy snapshot carries metadata but no payload.
    pub dummy: bool,
    /// CRC32 over the on-disk payload bytes and the trailer size field.
    pub checksum: u32,
    /// Total size of the payload file in bytes.
    pub file_size: u64,
    /// Compression applied to the payload stream.
    pub compression: CompressionKind,
    /// Reserved flag for non-voting observers.
    pub witness: bool,
}

impl SnapshotRecord {
    /// True when the record carries no Raft coordinates at all. Such a
    /// record must never reach the filesystem or the log database.
    pub fn is_empty(&self) -> bool {
        self.index == 0 && self.term == 0
    }
}

/// Why a snapshot is being taken, and where an exported one goes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SnapshotRequestKind {
    /// Routine snapshot driven by the runtime's snapshot policy.
    #[default]
    Periodic,
    /// Snapshot explicitly requested by a user API call.
    UserTriggered,
    /// Snapshot produced for streaming to a peer.
    Streaming,
    /// Snapshot written to a caller-supplied path and kept out of the
    /// log database.
    Exported {
        /// Destination directory supplied by the caller.
        path: PathBuf,
    },
}

/// A request to take a snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotRequest {
    /// What kind of request this is.
    pub kind: SnapshotRequestKind,
}

impl SnapshotRequest {
    /// Request for a routine snapshot.
    pub fn periodic() -> Self {
        SnapshotRequest {
            kind: SnapshotRequestKind::Periodic,
        }
    }

    /// Request for an exported snapshot rooted at `path`.
    pub fn exported(path: impl Into<PathBuf>) -> Self {
        SnapshotRequest {
            kind: SnapshotRequestKind::Exported { path: path.into() },
        }
    }

    /// True for exported requests.
    pub fn is_exported(&self) -> bool {
        matches!(self.kind, SnapshotRequestKind::Exported { .. })
    }

    /// Destination directory of an exported request.
    pub fn exported_path(&self) -> Option<&PathBuf> {
        match &self.kind {
            SnapshotRequestKind::Exported { path } => Some(path),
            _ => None,
        }
    }
}

/// Everything the state machine and the snapshotter need to agree on for
/// one snapshot attempt.
#[derive(Debug, Clone, Default)]
pub struct SnapshotMeta {
    /// Raft index of the last applied entry to capture.
    pub index: u64,
    /// Raft term of that entry.
    pub term: u64,
    /// Advisory watermark for on-disk state machines.
    pub on_disk_index: u64,
    /// Cluster configuration at capture time.
    pub membership: Membership,
    /// What the artifact will represent.
    pub kind: SnapshotKind,
    /// Compression for the payload stream.
    pub compression: CompressionKind,
    /// The request that triggered this attempt.
    pub request: SnapshotRequest,
    /// Serialized session state, written ahead of the state machine data.
    pub session: Vec<u8>,
    /// Stop signal observed by the state machine while saving.
    pub cancel: CancelToken,
}

/// Snapshot metadata update destined for the log database.
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotUpdate {
    /// Owning cluster.
    pub cluster_id: u64,
    /// Owning replica.
    pub node_id: u64,
    /// The record to append.
    pub snapshot: SnapshotRecord,
}

/// Shared stop signal for long-running snapshot work.
///
/// The owning node holds one token and cancels it on shutdown; state
/// machines poll it inside `save_snapshot`/`stream_snapshot` and bail out
/// with [`SnapshotError::Stopped`] when it fires.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a token in the not-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation to every clone of this token.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    /// True once any clone has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_bytes() {
        assert_eq!(SnapshotVersion::V1.as_u8(), 1);
        assert_eq!(SnapshotVersion::V2.as_u8(), 2);
        assert_eq!(SnapshotVersion::from_u8(2).unwrap(), SnapshotVersion::V2);
        assert!(matches!(
            SnapshotVersion::from_u8(9),
            Err(SnapshotError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn test_compression_tags() {
        assert_eq!(CompressionKind::None.as_tag(), 0);
        assert_eq!(CompressionKind::Snappy.as_tag(), 1);
        assert_eq!(
            CompressionKind::from_tag(1).unwrap(),
            CompressionKind::Snappy
        );
        assert!(matches!(
            CompressionKind::from_tag(7),
            Err(SnapshotError::UnknownCompression(7))
        ));
    }

    #[test]
    fn test_record_roundtrip_json() {
        let mut membership = Membership::default();
        membership.config_change_id = 4;
        membership.voters.insert(1, "10.0.0.1:9090".to_string());

        let record = SnapshotRecord {
            cluster_id: 7,
            node_id: 2,
            index: 100,
            term: 3,
            membership,
            file_path: PathBuf::from("/data/snapshot-0000000000000064.gbsnap"),
            checksum: 0xdead_beef,
            file_size: 4096,
            compression: CompressionKind::Snappy,
            ..Default::default()
        };

        let encoded = serde_json::to_vec(&record).unwrap();
        let decoded: SnapshotRecord = serde_json::from_slice(&encoded).unwrap();
        assert_eq!(record, decoded);
        assert!(!record.is_empty());
    }

    #[test]
    fn test_empty_record() {
        assert!(SnapshotRecord::default().is_empty());
    }

    #[test]
    fn test_exported_request() {
        let req = SnapshotRequest::exported("/backup/cluster-7");
        assert!(req.is_exported());
        assert_eq!(
            req.exported_path().unwrap(),
            &PathBuf::from("/backup/cluster-7")
        );
        assert!(!SnapshotRequest::periodic().is_exported());
    }

    #[test]
    fn test_cancel_token_is_shared() {
        let token = CancelToken::new();
        let observer = token.clone();
        assert!(!observer.is_cancelled());
        token.cancel();
        assert!(observer.is_cancelled());
    }
}
