//! Admission control and incremental delta propagation.
//!
//! A pending delta is validated against every quota-bearing ancestor before
//! anything is committed ([`verify_quota`]); once approved, the same chain
//! is walked again to commit it ([`apply_delta`]). `apply_delta` is the
//! single point of mutation for consumed counters.
//!
//! The check walks bottom-up and stops at the first violation, so the
//! ancestor nearest to the mutation reports first. Within one ancestor the
//! order is namespace, then storage space, then storage type: when a write
//! breaks both a traditional limit and a type limit, the traditional
//! failure is the one surfaced.

use crate::counts::QuotaCounts;
use crate::tree::{FsTree, InodeKind};
use crate::types::{InodeId, QuotaError};

/// Validates `delta` against the chain from `start` (inclusive) to the
/// root, or up to `stop` (exclusive) when the caller has already
/// established that the chain above `stop` is unaffected (rename within a
/// common ancestor).
///
/// Only positive delta components are checked; a shrinking mutation is
/// always admitted.
pub fn verify_quota(
    tree: &FsTree,
    start: InodeId,
    delta: &QuotaCounts,
    stop: Option<InodeId>,
) -> Result<(), QuotaError> {
    let mut current = Some(start);
    while let Some(id) = current {
        if Some(id) == stop {
            break;
        }
        let node = tree.get(id)?;
        if let InodeKind::Directory(dir) = &node.kind {
            if let Some(feature) = &dir.quota {
                if delta.name_space > 0 {
                    if let Some(limit) = feature.limits.name_space {
                        let projected = feature.consumed.name_space + delta.name_space;
                        if projected > limit as i64 {
                            tracing::warn!(
                                "Directory {} would exceed namespace quota: {} > {}",
                                id,
                                projected,
                                limit
                            );
                            return Err(QuotaError::NamespaceQuotaExceeded {
                                dir: id,
                                quota: limit,
                                count: projected.max(0) as u64,
                            });
                        }
                    }
                }
                if delta.storage_space > 0 {
                    if let Some(limit) = feature.limits.storage_space {
                        let projected = feature.consumed.storage_space + delta.storage_space;
                        if projected > limit as i64 {
                            tracing::warn!(
                                "Directory {} would exceed storage space quota: {} > {}",
                                id,
                                projected,
                                limit
                            );
                            return Err(QuotaError::StorageSpaceQuotaExceeded {
                                dir: id,
                                quota: limit,
                                consumed: projected.max(0) as u64,
                            });
                        }
                    }
                }
                for (t, type_delta) in delta.type_spaces.iter() {
                    if type_delta <= 0 {
                        continue;
                    }
                    if let Some(limit) = feature.limits.type_limit(t) {
                        let projected = feature.consumed.type_spaces.get(t) + type_delta;
                        if projected > limit as i64 {
                            tracing::warn!(
                                "Directory {} would exceed {} quota: {} > {}",
                                id,
                                t,
                                projected,
                                limit
                            );
                            return Err(QuotaError::StorageTypeQuotaExceeded {
                                dir: id,
                                storage_type: t,
                                quota: limit,
                                consumed: projected.max(0) as u64,
                            });
                        }
                    }
                }
            }
        }
        current = node.parent;
    }
    Ok(())
}

/// Commits an approved delta: adds it to the consumed counters of every
/// quota-bearing ancestor on the chain from `start` (inclusive) to the
/// root, or up to `stop` (exclusive).
pub fn apply_delta(
    tree: &mut FsTree,
    start: InodeId,
    delta: &QuotaCounts,
    stop: Option<InodeId>,
) -> Result<(), QuotaError> {
    let mut current = Some(start);
    while let Some(id) = current {
        if Some(id) == stop {
            break;
        }
        let node = tree.get_mut(id)?;
        let parent = node.parent;
        if let InodeKind::Directory(dir) = &mut node.kind {
            if let Some(feature) = &mut dir.quota {
                feature.consumed.add(delta);
                if feature.consumed.any_negative() {
                    tracing::warn!(
                        "Consumed counters of directory {} went negative after delta {:?}",
                        id,
                        delta
                    );
                }
            }
        }
        current = parent;
    }
    Ok(())
}
