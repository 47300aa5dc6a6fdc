//! Error types for the keel snapshot runtime
//!
//! A single `SnapshotError` enum covers every failure the snapshot
//! lifecycle can surface. We use `thiserror` for automatic `Display`
//! and `Error` trait implementations.
//!
//! ## Error Classification
//!
//! | Kind | Variants | Meaning |
//! |------|----------|---------|
//! | NotFound | `NoSnapshot` | No snapshot matches the query |
//! | OutOfDate | `OutOfDate` | A newer snapshot already exists for this replica |
//! | Integrity | `TooShort`, `InvalidMagic`, `UnsupportedVersion`, `UnknownCompression`, `HeaderChecksumMismatch`, `ChecksumMismatch`, `FileSizeMismatch`, `InvalidFlagFile` | The on-disk artifact cannot be trusted |
//! | Cancelled | `Stopped` | The state machine observed the stop signal |
//! | Propagated | `Io`, `LogStore` | Filesystem or log-database failure, unchanged |
//!
//! Integrity failures mean the caller must not proceed with recovery
//! from the affected snapshot; a fresh transfer from a peer is the
//! usual remedy. No retries happen at this layer.

use std::io;
use thiserror::Error;

/// Result alias used throughout the snapshot runtime.
pub type Result<T> = std::result::Result<T, SnapshotError>;

/// Unified error type for all snapshot lifecycle operations.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// No snapshot is available for the requested replica or index.
    #[error("no snapshot available")]
    NoSnapshot,

    /// A newer snapshot has already been committed for this replica; the
    /// current attempt is abandoned and its temp directory left for the
    /// next orphan sweep.
    #[error("snapshot being generated is out of date")]
    OutOfDate,

    /// The file is too small to hold a snapshot header and trailer.
    #[error("snapshot file too small: {size} bytes")]
    TooShort {
        /// Actual file size in bytes.
        size: u64,
    },

    /// The header does not start with the snapshot magic bytes.
    #[error("invalid magic bytes: expected {expected:?}, got {actual:?}")]
    InvalidMagic {
        /// Expected magic bytes.
        expected: [u8; 4],
        /// Actual magic bytes found.
        actual: [u8; 4],
    },

    /// The header carries a version this build does not understand.
    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u8),

    /// The header carries a compression tag this build does not understand.
    #[error("unknown compression tag {0}")]
    UnknownCompression(u8),

    /// The header checksum does not match the header bytes.
    #[error("header checksum mismatch: stored={stored:#010x}, computed={computed:#010x}")]
    HeaderChecksumMismatch {
        /// Checksum stored in the header.
        stored: u32,
        /// Checksum computed over the header bytes.
        computed: u32,
    },

    /// The payload checksum in the trailer does not match the payload.
    #[error("payload checksum mismatch: stored={stored:#010x}, computed={computed:#010x}")]
    ChecksumMismatch {
        /// Checksum stored in the trailer.
        stored: u32,
        /// Checksum computed over the payload bytes.
        computed: u32,
    },

    /// An auxiliary file changed size while being staged.
    #[error("external file size mismatch for {path}: expected {expected} bytes, got {actual}")]
    FileSizeMismatch {
        /// Path of the staged copy.
        path: String,
        /// Source length at registration time.
        expected: u64,
        /// Length observed after the copy.
        actual: u64,
    },

    /// The flag file inside a snapshot directory could not be decoded.
    #[error("invalid flag file: {0}")]
    InvalidFlagFile(String),

    /// The state machine observed the stop signal and aborted.
    #[error("snapshot operation stopped")]
    Stopped,

    /// Log database failure, propagated verbatim.
    #[error("log store failure: {0}")]
    LogStore(String),

    /// Filesystem failure, propagated verbatim.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

impl SnapshotError {
    /// True when the error means "no snapshot matches the query".
    pub fn is_no_snapshot(&self) -> bool {
        matches!(self, SnapshotError::NoSnapshot)
    }

    /// True when the error means a newer snapshot shadowed this attempt.
    pub fn is_out_of_date(&self) -> bool {
        matches!(self, SnapshotError::OutOfDate)
    }

    /// True when the on-disk artifact failed validation and must not be
    /// used for recovery.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            SnapshotError::TooShort { .. }
                | SnapshotError::InvalidMagic { .. }
                | SnapshotError::UnsupportedVersion(_)
                | SnapshotError::UnknownCompression(_)
                | SnapshotError::HeaderChecksumMismatch { .. }
                | SnapshotError::ChecksumMismatch { .. }
                | SnapshotError::FileSizeMismatch { .. }
                | SnapshotError::InvalidFlagFile(_)
        )
    }
}
