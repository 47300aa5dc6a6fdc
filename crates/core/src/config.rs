//! Snapshot lifecycle tuning knobs
//!
//! Process-level configuration loading lives outside this crate; callers
//! construct a `SnapshotConfig` however they obtain their settings and
//! hand it to the snapshotter.

/// Fewest snapshots ever retained per replica.
///
/// Compaction never deletes below this floor regardless of
/// configuration, so a replica always keeps enough history to serve a
/// slow follower while a fresh snapshot is being generated.
pub const RETENTION_FLOOR: usize = 3;

/// Default unit of transfer when streaming a snapshot to a peer.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Smallest permitted streaming chunk.
const MIN_CHUNK_SIZE: usize = 4 * 1024;

/// Tuning for snapshot retention and streaming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotConfig {
    snapshots_to_keep: usize,
    chunk_size: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        SnapshotConfig {
            snapshots_to_keep: RETENTION_FLOOR,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl SnapshotConfig {
    /// Set how many snapshots compaction retains; values below the
    /// retention floor are raised to it.
    pub fn with_snapshots_to_keep(mut self, count: usize) -> Self {
        self.snapshots_to_keep = count.max(RETENTION_FLOOR);
        self
    }

    /// Set the streaming chunk size; values below 4 KiB are raised to it.
    pub fn with_chunk_size(mut self, bytes: usize) -> Self {
        self.chunk_size = bytes.max(MIN_CHUNK_SIZE);
        self
    }

    /// Number of snapshots compaction retains per replica.
    pub fn snapshots_to_keep(&self) -> usize {
        self.snapshots_to_keep
    }

    /// Unit of transfer for snapshot streaming.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SnapshotConfig::default();
        assert_eq!(config.snapshots_to_keep(), RETENTION_FLOOR);
        assert_eq!(config.chunk_size(), DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_retention_floor_enforced() {
        let config = SnapshotConfig::default().with_snapshots_to_keep(1);
        assert_eq!(config.snapshots_to_keep(), RETENTION_FLOOR);

        let config = SnapshotConfig::default().with_snapshots_to_keep(8);
        assert_eq!(config.snapshots_to_keep(), 8);
    }

    #[test]
    fn test_chunk_size_floor() {
        let config = SnapshotConfig::default().with_chunk_size(16);
        assert_eq!(config.chunk_size(), 4 * 1024);
    }
}
