//! Full recursive recomputation of quota usage.
//!
//! The aggregator is the ground truth: a deterministic, side-effect-free
//! walk that recomputes what the incrementally maintained counters should
//! be. It backs consistency verification, counter initialization when a
//! quota is first set, and recovery integrity checks.

use crate::counts::QuotaCounts;
use crate::policy::StoragePolicyResolver;
use crate::tree::{FileNode, FsTree, InodeKind};
use crate::types::{InodeId, QuotaError, StoragePolicyId};

/// Computes the space charged for `length` bytes written with the given
/// replication and policy: `length × replication` of storage space plus
/// `length` per replica on its resolved storage type (quota-supporting
/// types only). Namespace is not charged here.
pub fn usage_for_length(
    length: u64,
    replication: u16,
    policy: StoragePolicyId,
    resolver: &dyn StoragePolicyResolver,
) -> Result<QuotaCounts, QuotaError> {
    let mut counts = QuotaCounts::zero();
    counts.storage_space = length as i64 * replication as i64;
    for t in resolver.resolve(policy, replication)? {
        if t.supports_quota() {
            counts.type_spaces.add(t, length as i64);
        }
    }
    Ok(counts)
}

/// Computes the full contribution of a file: one namespace unit plus its
/// space usage.
pub fn file_counts(
    file: &FileNode,
    resolver: &dyn StoragePolicyResolver,
) -> Result<QuotaCounts, QuotaError> {
    let mut counts = usage_for_length(file.length, file.replication, file.policy, resolver)?;
    counts.name_space += 1;
    Ok(counts)
}

/// Recursively recomputes the consumed counts of the subtree rooted at
/// `node`: one namespace unit per inode, per-file space and type space, and
/// every reachable snapshot-diff retained contribution folded in exactly
/// once.
pub fn compute_quota_usage(
    tree: &FsTree,
    resolver: &dyn StoragePolicyResolver,
    node: InodeId,
) -> Result<QuotaCounts, QuotaError> {
    let inode = tree.get(node)?;
    match &inode.kind {
        InodeKind::File(f) => file_counts(f, resolver),
        InodeKind::Directory(dir) => {
            let mut counts = QuotaCounts::zero();
            counts.name_space = 1;
            for child in dir.children.values() {
                let child_counts = compute_quota_usage(tree, resolver, *child)?;
                counts.add(&child_counts);
            }
            if let Some(state) = &dir.snapshots {
                counts.add(&state.retained_counts());
            }
            Ok(counts)
        }
    }
}

/// A recorded-versus-recomputed disagreement on one quota-bearing
/// directory.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuotaMismatch {
    /// The directory whose counters disagree.
    pub dir: InodeId,
    /// Absolute path of the directory.
    pub path: String,
    /// The incrementally maintained counters.
    pub recorded: QuotaCounts,
    /// The aggregator's recomputation.
    pub computed: QuotaCounts,
}

/// Verifies every quota-bearing directory against the aggregator.
///
/// Returns one mismatch per disagreeing directory; an empty list means the
/// incremental counters are consistent.
pub fn verify_quota_usage(
    tree: &FsTree,
    resolver: &dyn StoragePolicyResolver,
) -> Result<Vec<QuotaMismatch>, QuotaError> {
    let mut mismatches = Vec::new();
    for dir in tree.dirs_with_quota() {
        let computed = compute_quota_usage(tree, resolver, dir)?;
        let recorded = match tree.quota_feature(dir)? {
            Some(feature) => feature.consumed.clone(),
            None => continue,
        };
        if recorded != computed {
            let path = tree.path_of(dir)?;
            tracing::debug!(
                "Quota mismatch on {}: recorded {:?}, computed {:?}",
                path,
                recorded,
                computed
            );
            mismatches.push(QuotaMismatch {
                dir,
                path,
                recorded,
                computed,
            });
        }
    }
    Ok(mismatches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::StoragePolicySuite;
    use crate::tree::{DirNode, Inode};
    use crate::types::{StoragePolicyId, StorageType};

    fn file(id: u64, name: &str, len: u64, policy: StoragePolicyId) -> Inode {
        Inode {
            id: InodeId::new(id),
            parent: None,
            name: name.to_string(),
            created_tx: 0,
            kind: InodeKind::File(FileNode {
                length: len,
                replication: 3,
                policy,
            }),
        }
    }

    fn dir(id: u64, name: &str) -> Inode {
        Inode {
            id: InodeId::new(id),
            parent: None,
            name: name.to_string(),
            created_tx: 0,
            kind: InodeKind::Directory(DirNode::new()),
        }
    }

    #[test]
    fn test_usage_for_length_one_ssd() {
        let suite = StoragePolicySuite::new();
        let counts = usage_for_length(1024, 3, StoragePolicyId::ONE_SSD, &suite).unwrap();
        assert_eq!(counts.name_space, 0);
        assert_eq!(counts.storage_space, 3072);
        assert_eq!(counts.type_spaces.get(StorageType::Ssd), 1024);
        assert_eq!(counts.type_spaces.get(StorageType::Disk), 2048);
    }

    #[test]
    fn test_usage_for_length_all_ssd() {
        let suite = StoragePolicySuite::new();
        let counts = usage_for_length(1024, 3, StoragePolicyId::ALL_SSD, &suite).unwrap();
        assert_eq!(counts.type_spaces.get(StorageType::Ssd), 3072);
        assert_eq!(counts.type_spaces.get(StorageType::Disk), 0);
    }

    #[test]
    fn test_compute_quota_usage_subtree() {
        let suite = StoragePolicySuite::new();
        let mut tree = FsTree::new();
        tree.insert_child(InodeId::ROOT, dir(2, "a")).unwrap();
        tree.insert_child(InodeId::new(2), file(3, "f1", 1024, StoragePolicyId::ONE_SSD))
            .unwrap();
        tree.insert_child(InodeId::new(2), file(4, "f2", 512, StoragePolicyId::HOT))
            .unwrap();

        let counts = compute_quota_usage(&tree, &suite, InodeId::new(2)).unwrap();
        assert_eq!(counts.name_space, 3);
        assert_eq!(counts.storage_space, (1024 + 512) * 3);
        assert_eq!(counts.type_spaces.get(StorageType::Ssd), 1024);
        assert_eq!(counts.type_spaces.get(StorageType::Disk), 2048 + 512 * 3);
    }

    #[test]
    fn test_compute_is_side_effect_free() {
        let suite = StoragePolicySuite::new();
        let mut tree = FsTree::new();
        tree.insert_child(InodeId::ROOT, file(2, "f", 1024, StoragePolicyId::HOT))
            .unwrap();
        let a = compute_quota_usage(&tree, &suite, InodeId::ROOT).unwrap();
        let b = compute_quota_usage(&tree, &suite, InodeId::ROOT).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_verify_detects_mismatch() {
        let suite = StoragePolicySuite::new();
        let mut tree = FsTree::new();
        tree.insert_child(InodeId::ROOT, file(2, "f", 1024, StoragePolicyId::HOT))
            .unwrap();

        // Root's incremental counter was never updated for the file, so the
        // report must flag exactly the root.
        let mismatches = verify_quota_usage(&tree, &suite).unwrap();
        assert_eq!(mismatches.len(), 1);
        assert_eq!(mismatches[0].dir, InodeId::ROOT);
        assert_eq!(mismatches[0].path, "/");
        assert_eq!(mismatches[0].computed.name_space, 2);
        assert_eq!(mismatches[0].recorded.name_space, 1);
    }

    #[test]
    fn test_verify_clean_tree() {
        let suite = StoragePolicySuite::new();
        let tree = FsTree::new();
        assert!(verify_quota_usage(&tree, &suite).unwrap().is_empty());
    }
}
