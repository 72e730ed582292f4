//! Snapshot retention tracking for quota accounting.
//!
//! Creating a snapshot is a zero-cost logical reference; nothing is copied
//! and no counters move. The quota-relevant part of snapshotting is
//! retention: content deleted while a covering snapshot is alive must keep
//! charging the ancestor chain until the last referencing snapshot is gone.
//!
//! Retention is bookkept as an append-only diff log per directory of
//! (child identity, retained counts) entries, reference-counted by snapshot
//! id. The subtree is never duplicated.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::counts::QuotaCounts;
use crate::tree::{FsTree, InodeKind};
use crate::types::{InodeId, QuotaError, SnapshotId};

/// A single snapshot of a directory.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotInfo {
    /// Administrator-chosen snapshot name, unique per directory.
    pub name: String,
    /// Engine transaction at which the snapshot was taken. The snapshot
    /// covers exactly the nodes created before this transaction.
    pub created_tx: u64,
}

/// A deletion retained by one or more live snapshots.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetainedEntry {
    /// Name the deleted child had in this directory.
    pub name: String,
    /// The child's full quota contribution at deletion time.
    pub counts: QuotaCounts,
    /// Snapshots still referencing the deleted content. The entry is
    /// released when this set becomes empty.
    pub refs: BTreeSet<SnapshotId>,
}

/// Snapshot registry and retained-deletion log of one directory.
///
/// Present on a directory once it has taken a snapshot or holds retained
/// deletions for a snapshot on an ancestor.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotState {
    /// Live snapshots taken on this directory.
    pub snapshots: BTreeMap<SnapshotId, SnapshotInfo>,
    /// Deletions retained on behalf of live snapshots.
    pub diffs: Vec<RetainedEntry>,
}

impl SnapshotState {
    /// Creates empty snapshot state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Finds a snapshot id by name.
    pub fn find_by_name(&self, name: &str) -> Option<SnapshotId> {
        self.snapshots
            .iter()
            .find(|(_, info)| info.name == name)
            .map(|(id, _)| *id)
    }

    /// Sums the retained contribution of every diff entry.
    pub fn retained_counts(&self) -> QuotaCounts {
        let mut total = QuotaCounts::zero();
        for entry in &self.diffs {
            total.add(&entry.counts);
        }
        total
    }

    /// Returns true if the state carries neither snapshots nor diffs.
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty() && self.diffs.is_empty()
    }
}

/// Collects the live snapshots covering `node`: snapshots on any ancestor
/// that were taken after the node was created.
pub fn covering_snapshots(
    tree: &FsTree,
    node: InodeId,
) -> Result<BTreeSet<SnapshotId>, QuotaError> {
    let created_tx = tree.get(node)?.created_tx;
    let mut covering = BTreeSet::new();
    let mut current = tree.get(node)?.parent;
    while let Some(id) = current {
        let ancestor = tree.get(id)?;
        if let InodeKind::Directory(dir) = &ancestor.kind {
            if let Some(state) = &dir.snapshots {
                for (sid, info) in &state.snapshots {
                    if info.created_tx > created_tx {
                        covering.insert(*sid);
                    }
                }
            }
        }
        current = ancestor.parent;
    }
    Ok(covering)
}

/// Returns true if any directory in the subtree rooted at `root` has a live
/// snapshot. Such a subtree must not be deleted.
pub fn subtree_has_live_snapshots(tree: &FsTree, root: InodeId) -> Result<bool, QuotaError> {
    for id in tree.subtree_ids(root)? {
        if let InodeKind::Directory(dir) = &tree.get(id)?.kind {
            if let Some(state) = &dir.snapshots {
                if !state.snapshots.is_empty() {
                    return Ok(true);
                }
            }
        }
    }
    Ok(false)
}

/// Records a retained deletion on `parent`: the deleted child's counts stay
/// charged to the ancestor chain and are released only when every snapshot
/// in `refs` is gone.
pub fn record_retained(
    tree: &mut FsTree,
    parent: InodeId,
    name: String,
    counts: QuotaCounts,
    refs: BTreeSet<SnapshotId>,
) -> Result<(), QuotaError> {
    let dir = tree.dir_mut(parent)?;
    let state = dir.snapshots.get_or_insert_with(SnapshotState::new);
    tracing::debug!(
        "Retaining deletion of '{}' under directory {} for {} snapshot(s)",
        name,
        parent,
        refs.len()
    );
    state.diffs.push(RetainedEntry { name, counts, refs });
    Ok(())
}

/// Drops `snapshot` from every diff entry in the subtree rooted at `root`.
///
/// Entries whose reference set becomes empty are removed, and their retained
/// counts are returned as (owning directory, counts) pairs for the caller to
/// release through the propagator — exactly once per entry.
pub fn release_for_snapshot(
    tree: &mut FsTree,
    root: InodeId,
    snapshot: SnapshotId,
) -> Result<Vec<(InodeId, QuotaCounts)>, QuotaError> {
    let mut released = Vec::new();
    for id in tree.subtree_ids(root)? {
        let node = tree.get_mut(id)?;
        let dir = match &mut node.kind {
            InodeKind::Directory(d) => d,
            InodeKind::File(_) => continue,
        };
        let Some(state) = dir.snapshots.as_mut() else {
            continue;
        };
        let mut kept = Vec::with_capacity(state.diffs.len());
        for mut entry in state.diffs.drain(..) {
            entry.refs.remove(&snapshot);
            if entry.refs.is_empty() {
                released.push((id, entry.counts));
            } else {
                kept.push(entry);
            }
        }
        state.diffs = kept;
        if state.is_empty() {
            dir.snapshots = None;
        }
    }
    Ok(released)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{DirNode, FileNode, Inode};
    use crate::types::StoragePolicyId;

    fn dir_node(id: u64, name: &str, created_tx: u64) -> Inode {
        Inode {
            id: InodeId::new(id),
            parent: None,
            name: name.to_string(),
            created_tx,
            kind: InodeKind::Directory(DirNode::new()),
        }
    }

    fn file_node(id: u64, name: &str, created_tx: u64) -> Inode {
        Inode {
            id: InodeId::new(id),
            parent: None,
            name: name.to_string(),
            created_tx,
            kind: InodeKind::File(FileNode {
                length: 1024,
                replication: 3,
                policy: StoragePolicyId::HOT,
            }),
        }
    }

    fn snapshot_on(tree: &mut FsTree, dir: InodeId, sid: u64, name: &str, tx: u64) {
        let state = tree
            .dir_mut(dir)
            .unwrap()
            .snapshots
            .get_or_insert_with(SnapshotState::new);
        state.snapshots.insert(
            SnapshotId::new(sid),
            SnapshotInfo {
                name: name.to_string(),
                created_tx: tx,
            },
        );
    }

    #[test]
    fn test_covering_requires_later_snapshot() {
        let mut tree = FsTree::new();
        tree.insert_child(InodeId::ROOT, dir_node(2, "sub", 1)).unwrap();
        tree.insert_child(InodeId::new(2), file_node(3, "f", 2)).unwrap();

        // Snapshot taken before the file existed does not cover it.
        snapshot_on(&mut tree, InodeId::new(2), 1, "s0", 2);
        let covering = covering_snapshots(&tree, InodeId::new(3)).unwrap();
        assert!(covering.is_empty());

        // Snapshot taken afterwards does.
        snapshot_on(&mut tree, InodeId::new(2), 2, "s1", 5);
        let covering = covering_snapshots(&tree, InodeId::new(3)).unwrap();
        assert_eq!(covering.len(), 1);
        assert!(covering.contains(&SnapshotId::new(2)));
    }

    #[test]
    fn test_covering_walks_all_ancestors() {
        let mut tree = FsTree::new();
        tree.insert_child(InodeId::ROOT, dir_node(2, "a", 1)).unwrap();
        tree.insert_child(InodeId::new(2), dir_node(3, "b", 2)).unwrap();
        tree.insert_child(InodeId::new(3), file_node(4, "f", 3)).unwrap();

        snapshot_on(&mut tree, InodeId::new(2), 1, "up", 10);
        snapshot_on(&mut tree, InodeId::new(3), 2, "down", 10);

        let covering = covering_snapshots(&tree, InodeId::new(4)).unwrap();
        assert_eq!(covering.len(), 2);
    }

    #[test]
    fn test_subtree_has_live_snapshots() {
        let mut tree = FsTree::new();
        tree.insert_child(InodeId::ROOT, dir_node(2, "a", 1)).unwrap();
        tree.insert_child(InodeId::new(2), dir_node(3, "b", 2)).unwrap();
        assert!(!subtree_has_live_snapshots(&tree, InodeId::new(2)).unwrap());

        snapshot_on(&mut tree, InodeId::new(3), 1, "s", 5);
        assert!(subtree_has_live_snapshots(&tree, InodeId::new(2)).unwrap());
    }

    #[test]
    fn test_release_only_when_last_reference_drops() {
        let mut tree = FsTree::new();
        tree.insert_child(InodeId::ROOT, dir_node(2, "sub", 1)).unwrap();
        snapshot_on(&mut tree, InodeId::new(2), 1, "s1", 5);
        snapshot_on(&mut tree, InodeId::new(2), 2, "s2", 6);

        let mut counts = QuotaCounts::zero();
        counts.name_space = 1;
        counts.storage_space = 3072;
        let refs: BTreeSet<SnapshotId> =
            [SnapshotId::new(1), SnapshotId::new(2)].into_iter().collect();
        record_retained(&mut tree, InodeId::new(2), "f".to_string(), counts, refs).unwrap();

        // Dropping the first snapshot releases nothing.
        let released =
            release_for_snapshot(&mut tree, InodeId::new(2), SnapshotId::new(1)).unwrap();
        assert!(released.is_empty());

        // Dropping the second releases the entry exactly once.
        let released =
            release_for_snapshot(&mut tree, InodeId::new(2), SnapshotId::new(2)).unwrap();
        assert_eq!(released.len(), 1);
        assert_eq!(released[0].0, InodeId::new(2));
        assert_eq!(released[0].1.storage_space, 3072);

        // And never again.
        let released =
            release_for_snapshot(&mut tree, InodeId::new(2), SnapshotId::new(2)).unwrap();
        assert!(released.is_empty());
    }

    #[test]
    fn test_retained_counts_sum() {
        let mut state = SnapshotState::new();
        let mut c1 = QuotaCounts::zero();
        c1.name_space = 1;
        let mut c2 = QuotaCounts::zero();
        c2.name_space = 2;
        state.diffs.push(RetainedEntry {
            name: "a".to_string(),
            counts: c1,
            refs: BTreeSet::new(),
        });
        state.diffs.push(RetainedEntry {
            name: "b".to_string(),
            counts: c2,
            refs: BTreeSet::new(),
        });
        assert_eq!(state.retained_counts().name_space, 3);
    }

    #[test]
    fn test_find_by_name() {
        let mut state = SnapshotState::new();
        state.snapshots.insert(
            SnapshotId::new(9),
            SnapshotInfo {
                name: "nightly".to_string(),
                created_tx: 4,
            },
        );
        assert_eq!(state.find_by_name("nightly"), Some(SnapshotId::new(9)));
        assert_eq!(state.find_by_name("missing"), None);
    }
}
