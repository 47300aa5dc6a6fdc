//! In-memory log database

use std::collections::BTreeMap;

use keel_core::{LogStore, Result, SnapshotRecord, SnapshotUpdate};
use parking_lot::RwLock;

type ReplicaKey = (u64, u64);

/// In-memory [`LogStore`] holding snapshot metadata per replica.
///
/// Records are keyed by index inside a `BTreeMap`, so listings come out
/// ordered ascending the way the interface requires.
#[derive(Default)]
pub struct MemLogStore {
    snapshots: RwLock<BTreeMap<ReplicaKey, BTreeMap<u64, SnapshotRecord>>>,
}

impl MemLogStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records held for one replica.
    pub fn snapshot_count(&self, cluster_id: u64, node_id: u64) -> usize {
        self.snapshots
            .read()
            .get(&(cluster_id, node_id))
            .map_or(0, BTreeMap::len)
    }
}

impl LogStore for MemLogStore {
    fn list_snapshots(
        &self,
        cluster_id: u64,
        node_id: u64,
        max_index: u64,
    ) -> Result<Vec<SnapshotRecord>> {
        Ok(self
            .snapshots
            .read()
            .get(&(cluster_id, node_id))
            .map(|by_index| {
                by_index
                    .range(..=max_index)
                    .map(|(_, record)| record.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    fn save_snapshots(&self, updates: &[SnapshotUpdate]) -> Result<()> {
        let mut snapshots = self.snapshots.write();
        for update in updates {
            snapshots
                .entry((update.cluster_id, update.node_id))
                .or_default()
                .insert(update.snapshot.index, update.snapshot.clone());
        }
        Ok(())
    }

    fn delete_snapshot(&self, cluster_id: u64, node_id: u64, index: u64) -> Result<()> {
        let mut snapshots = self.snapshots.write();
        if let Some(by_index) = snapshots.get_mut(&(cluster_id, node_id)) {
            by_index.remove(&index);
        }
        Ok(())
    }
}
