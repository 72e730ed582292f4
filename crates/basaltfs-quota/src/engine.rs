//! The quota engine: mutation API, single-writer coordination, recovery.
//!
//! [`QuotaEngine`] owns the namespace tree behind one `RwLock`. Every
//! namespace-mutating operation (including quota configuration) runs in the
//! writer-exclusive critical section: admission check and counter commit
//! happen atomically with respect to all other mutations. Read-only
//! operations (queries, aggregator verification) share the read side.
//!
//! Each committed admission unit is journaled before the call returns;
//! recovery loads the last checkpoint and replays the edit log tail through
//! the same deterministic operations. A rejected operation is a terminal
//! synchronous failure; the engine never retries.

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::admission::{apply_delta, verify_quota};
use crate::aggregate::{compute_quota_usage, usage_for_length, verify_quota_usage, QuotaMismatch};
use crate::checkpoint;
use crate::config::EngineConfig;
use crate::counts::{QuotaCounts, QuotaLimits, QuotaValue};
use crate::journal::{EditLog, EditOp};
use crate::policy::{StoragePolicyResolver, StoragePolicySuite};
use crate::snapshot::{
    covering_snapshots, record_retained, release_for_snapshot, subtree_has_live_snapshots,
    SnapshotInfo, SnapshotState,
};
use crate::tree::{DirNode, FileNode, FsTree, Inode, InodeKind, QuotaFeature};
use crate::types::{InodeId, QuotaError, SnapshotId, StoragePolicyId, StorageType};

/// Limits and consumption of one quota-bearing directory, as returned by
/// [`QuotaEngine::quota_status`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuotaStatus {
    /// Configured limits.
    pub limits: QuotaLimits,
    /// Incrementally maintained consumption.
    pub consumed: QuotaCounts,
}

/// The complete durable engine state: the tree plus allocation cursors.
/// This is the checkpoint payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct FsState {
    tree: FsTree,
    next_inode: u64,
    next_snapshot: u64,
    next_tx: u64,
}

impl FsState {
    fn new() -> Self {
        Self {
            tree: FsTree::new(),
            next_inode: 2,
            next_snapshot: 1,
            next_tx: 1,
        }
    }

    /// Allocators run only after an operation's checks have passed, so a
    /// rejected operation never advances a cursor and replay stays aligned.
    fn alloc_inode(&mut self) -> InodeId {
        let id = InodeId::new(self.next_inode);
        self.next_inode += 1;
        id
    }

    fn alloc_snapshot(&mut self) -> SnapshotId {
        let id = SnapshotId::new(self.next_snapshot);
        self.next_snapshot += 1;
        id
    }

    fn alloc_tx(&mut self) -> u64 {
        let tx = self.next_tx;
        self.next_tx += 1;
        tx
    }

    fn mkdir(&mut self, path: &str) -> Result<InodeId, QuotaError> {
        let (parent, name) = self.tree.resolve_parent(path)?;
        if self.tree.dir(parent)?.children.contains_key(&name) {
            return Err(QuotaError::EntryExists { parent, name });
        }
        let mut delta = QuotaCounts::zero();
        delta.name_space = 1;
        verify_quota(&self.tree, parent, &delta, None)?;

        let id = self.alloc_inode();
        let tx = self.alloc_tx();
        self.tree.insert_child(
            parent,
            Inode {
                id,
                parent: None,
                name,
                created_tx: tx,
                kind: InodeKind::Directory(DirNode::new()),
            },
        )?;
        apply_delta(&mut self.tree, parent, &delta, None)?;
        Ok(id)
    }

    fn create_file(
        &mut self,
        path: &str,
        replication: u16,
        resolver: &dyn StoragePolicyResolver,
    ) -> Result<InodeId, QuotaError> {
        if replication == 0 {
            return Err(QuotaError::InvalidArgument(
                "replication factor must be at least 1".to_string(),
            ));
        }
        let (parent, name) = self.tree.resolve_parent(path)?;
        if self.tree.dir(parent)?.children.contains_key(&name) {
            return Err(QuotaError::EntryExists { parent, name });
        }
        // Capture the policy in effect now; it fixes the file's storage-type
        // distribution for its whole lifetime.
        let policy = self.tree.effective_policy(parent)?;
        resolver.resolve(policy, replication)?;

        let mut delta = QuotaCounts::zero();
        delta.name_space = 1;
        verify_quota(&self.tree, parent, &delta, None)?;

        let id = self.alloc_inode();
        let tx = self.alloc_tx();
        self.tree.insert_child(
            parent,
            Inode {
                id,
                parent: None,
                name,
                created_tx: tx,
                kind: InodeKind::File(FileNode {
                    length: 0,
                    replication,
                    policy,
                }),
            },
        )?;
        apply_delta(&mut self.tree, parent, &delta, None)?;
        Ok(id)
    }

    fn add_block(
        &mut self,
        path: &str,
        len: u64,
        resolver: &dyn StoragePolicyResolver,
    ) -> Result<(), QuotaError> {
        let id = self.tree.resolve(path)?;
        let node = self.tree.get(id)?;
        let file = node.as_file()?;
        let parent = node
            .parent
            .ok_or_else(|| QuotaError::Internal(format!("file {id} has no parent")))?;
        let (replication, policy) = (file.replication, file.policy);

        let delta = usage_for_length(len, replication, policy, resolver)?;
        verify_quota(&self.tree, parent, &delta, None)?;
        apply_delta(&mut self.tree, parent, &delta, None)?;
        self.tree.file_mut(id)?.length += len;
        Ok(())
    }

    fn truncate(
        &mut self,
        path: &str,
        new_length: u64,
        resolver: &dyn StoragePolicyResolver,
    ) -> Result<(), QuotaError> {
        let id = self.tree.resolve(path)?;
        let node = self.tree.get(id)?;
        let file = node.as_file()?;
        let parent = node
            .parent
            .ok_or_else(|| QuotaError::Internal(format!("file {id} has no parent")))?;
        if new_length > file.length {
            return Err(QuotaError::InvalidArgument(format!(
                "cannot truncate '{}' from {} to larger length {}",
                path, file.length, new_length
            )));
        }
        let shrink = file.length - new_length;
        if shrink == 0 {
            return Ok(());
        }
        let delta = usage_for_length(shrink, file.replication, file.policy, resolver)?.negated();
        apply_delta(&mut self.tree, parent, &delta, None)?;
        self.tree.file_mut(id)?.length = new_length;
        Ok(())
    }

    fn delete(&mut self, path: &str, resolver: &dyn StoragePolicyResolver) -> Result<(), QuotaError> {
        let id = self.tree.resolve(path)?;
        if id == InodeId::ROOT {
            return Err(QuotaError::InvalidArgument(
                "cannot delete the root directory".to_string(),
            ));
        }
        if subtree_has_live_snapshots(&self.tree, id)? {
            return Err(QuotaError::HasSnapshots(id));
        }
        let counts = compute_quota_usage(&self.tree, resolver, id)?;
        let covering = covering_snapshots(&self.tree, id)?;
        let node = self.tree.get(id)?;
        let parent = node
            .parent
            .ok_or_else(|| QuotaError::Internal(format!("inode {id} has no parent")))?;
        let name = node.name.clone();

        self.tree.remove_subtree(id)?;
        if covering.is_empty() {
            apply_delta(&mut self.tree, parent, &counts.negated(), None)?;
            tracing::debug!("Deleted '{}', released {:?}", path, counts);
        } else {
            // Still referenced by a snapshot: the contribution stays charged
            // until the last covering snapshot is deleted.
            record_retained(&mut self.tree, parent, name, counts, covering)?;
            tracing::debug!("Deleted '{}', contribution retained by snapshot(s)", path);
        }
        Ok(())
    }

    fn rename(
        &mut self,
        src: &str,
        dst: &str,
        resolver: &dyn StoragePolicyResolver,
    ) -> Result<(), QuotaError> {
        let src_id = self.tree.resolve(src)?;
        if src_id == InodeId::ROOT {
            return Err(QuotaError::InvalidArgument(
                "cannot rename the root directory".to_string(),
            ));
        }
        let (dst_parent, dst_name) = self.tree.resolve_parent(dst)?;
        if self.tree.is_ancestor(src_id, dst_parent)? {
            return Err(QuotaError::InvalidArgument(format!(
                "cannot move '{src}' under its own subtree"
            )));
        }
        if self.tree.dir(dst_parent)?.children.contains_key(&dst_name) {
            return Err(QuotaError::EntryExists {
                parent: dst_parent,
                name: dst_name,
            });
        }
        let src_parent = self
            .tree
            .get(src_id)?
            .parent
            .ok_or_else(|| QuotaError::Internal(format!("inode {src_id} has no parent")))?;
        let src_name = self.tree.get(src_id)?.name.clone();

        // The chains share everything at and above the lowest common
        // ancestor, where the net delta is zero; check and commit only the
        // disjoint parts.
        let counts = compute_quota_usage(&self.tree, resolver, src_id)?;
        let lca = self.tree.lowest_common_ancestor(src_parent, dst_parent)?;
        verify_quota(&self.tree, dst_parent, &counts, Some(lca))?;

        self.tree.unlink_child(src_parent, &src_name)?;
        apply_delta(&mut self.tree, src_parent, &counts.negated(), Some(lca))?;
        {
            let node = self.tree.get_mut(src_id)?;
            node.parent = Some(dst_parent);
            node.name = dst_name.clone();
        }
        self.tree.dir_mut(dst_parent)?.children.insert(dst_name, src_id);
        apply_delta(&mut self.tree, dst_parent, &counts, Some(lca))?;
        tracing::debug!("Renamed '{}' to '{}'", src, dst);
        Ok(())
    }

    fn set_storage_policy(
        &mut self,
        path: &str,
        policy: StoragePolicyId,
        resolver: &dyn StoragePolicyResolver,
    ) -> Result<(), QuotaError> {
        resolver.resolve(policy, 1)?;
        let id = self.tree.resolve(path)?;
        match &mut self.tree.get_mut(id)?.kind {
            InodeKind::Directory(dir) => dir.policy = Some(policy),
            InodeKind::File(file) => file.policy = policy,
        }
        tracing::debug!("Set storage policy {} on '{}'", policy, path);
        Ok(())
    }

    fn set_space_quota(
        &mut self,
        path: &str,
        name_space: QuotaValue,
        storage_space: QuotaValue,
        resolver: &dyn StoragePolicyResolver,
    ) -> Result<(), QuotaError> {
        let name_space = name_space.validate()?;
        let storage_space = storage_space.validate()?;
        let id = self.tree.resolve(path)?;
        let dir = self.tree.dir(id)?;
        if dir.quota.is_none()
            && name_space == QuotaValue::Reset
            && storage_space == QuotaValue::Reset
        {
            return Ok(());
        }
        // First limit on this directory: initialize consumed from the
        // aggregator before attaching the feature.
        let initial = if dir.quota.is_none() {
            compute_quota_usage(&self.tree, resolver, id)?
        } else {
            QuotaCounts::zero()
        };
        let dir = self.tree.dir_mut(id)?;
        let feature = dir.quota.get_or_insert_with(|| QuotaFeature::new(initial));
        name_space.apply(&mut feature.limits.name_space);
        storage_space.apply(&mut feature.limits.storage_space);
        if feature.limits.is_unlimited() && id != InodeId::ROOT {
            dir.quota = None;
        }
        tracing::debug!(
            "Set space quota on '{}': namespace={:?} storage={:?}",
            path,
            name_space,
            storage_space
        );
        Ok(())
    }

    fn set_type_quota(
        &mut self,
        path: &str,
        storage_type: StorageType,
        value: QuotaValue,
        resolver: &dyn StoragePolicyResolver,
    ) -> Result<(), QuotaError> {
        let value = value.validate()?;
        if !storage_type.supports_quota() {
            return Err(QuotaError::InvalidQuotaValue(format!(
                "storage type {storage_type} does not support quota"
            )));
        }
        let id = self.tree.resolve(path)?;
        let dir = self.tree.dir(id)?;
        if dir.quota.is_none() && value == QuotaValue::Reset {
            return Ok(());
        }
        let initial = if dir.quota.is_none() {
            compute_quota_usage(&self.tree, resolver, id)?
        } else {
            QuotaCounts::zero()
        };
        let dir = self.tree.dir_mut(id)?;
        let feature = dir.quota.get_or_insert_with(|| QuotaFeature::new(initial));
        match value {
            QuotaValue::Limit(n) => {
                feature.limits.type_spaces.insert(storage_type, n);
            }
            QuotaValue::Reset => {
                feature.limits.type_spaces.remove(&storage_type);
            }
        }
        if feature.limits.is_unlimited() && id != InodeId::ROOT {
            dir.quota = None;
        }
        tracing::debug!(
            "Set {} quota on '{}': {:?}",
            storage_type,
            path,
            value
        );
        Ok(())
    }

    fn create_snapshot(&mut self, path: &str, name: &str) -> Result<SnapshotId, QuotaError> {
        let id = self.tree.resolve(path)?;
        let dir = self.tree.dir(id)?;
        if let Some(state) = &dir.snapshots {
            if state.find_by_name(name).is_some() {
                return Err(QuotaError::SnapshotExists {
                    dir: id,
                    name: name.to_string(),
                });
            }
        }
        let sid = self.alloc_snapshot();
        let tx = self.alloc_tx();
        let dir = self.tree.dir_mut(id)?;
        dir.snapshots
            .get_or_insert_with(SnapshotState::new)
            .snapshots
            .insert(
                sid,
                SnapshotInfo {
                    name: name.to_string(),
                    created_tx: tx,
                },
            );
        tracing::info!("Created snapshot '{}' ({}) on '{}'", name, sid, path);
        Ok(sid)
    }

    fn delete_snapshot(&mut self, path: &str, name: &str) -> Result<(), QuotaError> {
        let id = self.tree.resolve(path)?;
        let sid = self
            .tree
            .dir(id)?
            .snapshots
            .as_ref()
            .and_then(|s| s.find_by_name(name))
            .ok_or_else(|| QuotaError::SnapshotNotFound {
                dir: id,
                name: name.to_string(),
            })?;
        if let Some(state) = self.tree.dir_mut(id)?.snapshots.as_mut() {
            state.snapshots.remove(&sid);
        }
        let released = release_for_snapshot(&mut self.tree, id, sid)?;
        let released_count = released.len();
        for (owner, counts) in released {
            apply_delta(&mut self.tree, owner, &counts.negated(), None)?;
        }
        tracing::info!(
            "Deleted snapshot '{}' on '{}', released {} retained entr{}",
            name,
            path,
            released_count,
            if released_count == 1 { "y" } else { "ies" }
        );
        Ok(())
    }

    /// Replays one journaled op through the regular code paths.
    fn apply_edit(
        &mut self,
        op: &EditOp,
        resolver: &dyn StoragePolicyResolver,
    ) -> Result<(), QuotaError> {
        match op {
            EditOp::Mkdir { path } => self.mkdir(path).map(|_| ()),
            EditOp::CreateFile { path, replication } => {
                self.create_file(path, *replication, resolver).map(|_| ())
            }
            EditOp::AddBlock { path, len } => self.add_block(path, *len, resolver),
            EditOp::Truncate { path, new_length } => self.truncate(path, *new_length, resolver),
            EditOp::Delete { path } => self.delete(path, resolver),
            EditOp::Rename { src, dst } => self.rename(src, dst, resolver),
            EditOp::SetStoragePolicy { path, policy } => {
                self.set_storage_policy(path, *policy, resolver)
            }
            EditOp::SetSpaceQuota {
                path,
                name_space,
                storage_space,
            } => self.set_space_quota(path, *name_space, *storage_space, resolver),
            EditOp::SetTypeQuota {
                path,
                storage_type,
                value,
            } => self.set_type_quota(path, *storage_type, *value, resolver),
            EditOp::CreateSnapshot { path, name } => self.create_snapshot(path, name).map(|_| ()),
            EditOp::DeleteSnapshot { path, name } => self.delete_snapshot(path, name),
        }
    }

    /// Checks invariant: consumed counters are never negative. Run after
    /// recovery; a violation means the persisted state is unusable.
    fn validate_consumed(&self) -> Result<(), QuotaError> {
        for dir in self.tree.dirs_with_quota() {
            if let Some(feature) = self.tree.quota_feature(dir)? {
                if feature.consumed.any_negative() {
                    return Err(QuotaError::CorruptPersistedQuotaState(format!(
                        "directory {} has negative consumed counters",
                        dir
                    )));
                }
            }
        }
        Ok(())
    }
}

/// The hierarchical quota enforcement engine.
pub struct QuotaEngine {
    state: RwLock<FsState>,
    journal: Mutex<EditLog>,
    resolver: Box<dyn StoragePolicyResolver>,
    config: EngineConfig,
}

impl std::fmt::Debug for QuotaEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuotaEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl QuotaEngine {
    /// Opens the engine with the built-in storage policy suite, recovering
    /// state from the data directory.
    pub fn open(config: EngineConfig) -> Result<Self, QuotaError> {
        Self::open_with_resolver(config, Box::new(StoragePolicySuite::new()))
    }

    /// Opens the engine with a caller-supplied storage policy resolver.
    ///
    /// Recovery loads the last checkpoint image (if any) and replays the
    /// edit log over it. Any replay failure is fatal: the engine refuses to
    /// start with counters it cannot trust.
    pub fn open_with_resolver(
        config: EngineConfig,
        resolver: Box<dyn StoragePolicyResolver>,
    ) -> Result<Self, QuotaError> {
        std::fs::create_dir_all(&config.data_dir)?;

        let checkpoint_path = config.checkpoint_path();
        let mut state: FsState = if checkpoint_path.exists() {
            checkpoint::load(&checkpoint_path)?
        } else {
            FsState::new()
        };

        let ops = EditLog::read_all(&config.edit_log_path())?;
        let replayed = ops.len();
        for op in &ops {
            state.apply_edit(op, resolver.as_ref()).map_err(|e| match e {
                QuotaError::CorruptPersistedQuotaState(_) => e,
                other => QuotaError::CorruptPersistedQuotaState(format!(
                    "edit log replay failed on {:?}: {}",
                    op, other
                )),
            })?;
        }
        state.validate_consumed()?;

        let journal = EditLog::open(&config.edit_log_path(), config.sync_on_append)?;
        tracing::info!(
            "Quota engine recovered: {} inode(s), {} edit(s) replayed",
            state.tree.len(),
            replayed
        );
        Ok(Self {
            state: RwLock::new(state),
            journal: Mutex::new(journal),
            resolver,
            config,
        })
    }

    fn write_state(&self) -> Result<RwLockWriteGuard<'_, FsState>, QuotaError> {
        self.state
            .write()
            .map_err(|e| QuotaError::Internal(format!("state lock poisoned: {e}")))
    }

    fn read_state(&self) -> Result<RwLockReadGuard<'_, FsState>, QuotaError> {
        self.state
            .read()
            .map_err(|e| QuotaError::Internal(format!("state lock poisoned: {e}")))
    }

    fn journal_op(&self, op: &EditOp) -> Result<(), QuotaError> {
        self.journal
            .lock()
            .map_err(|e| QuotaError::Internal(format!("journal lock poisoned: {e}")))?
            .append(op)?;
        Ok(())
    }

    /// Creates a directory. The parent must already exist.
    pub fn mkdir(&self, path: &str) -> Result<InodeId, QuotaError> {
        let mut state = self.write_state()?;
        let id = state.mkdir(path)?;
        self.journal_op(&EditOp::Mkdir {
            path: path.to_string(),
        })?;
        Ok(id)
    }

    /// Creates an empty file with the given replication factor, capturing
    /// the storage policy in effect at its parent.
    pub fn create_file(&self, path: &str, replication: u16) -> Result<InodeId, QuotaError> {
        let mut state = self.write_state()?;
        let id = state.create_file(path, replication, self.resolver.as_ref())?;
        self.journal_op(&EditOp::CreateFile {
            path: path.to_string(),
            replication,
        })?;
        Ok(id)
    }

    /// Appends `len` bytes to a file, admitting and committing block by
    /// block. A mid-write rejection leaves the already-committed prefix in
    /// place and is returned to the caller; nothing from the rejected block
    /// onward is admitted.
    pub fn append(&self, path: &str, len: u64) -> Result<(), QuotaError> {
        if len == 0 {
            return Ok(());
        }
        let mut state = self.write_state()?;
        let mut remaining = len;
        while remaining > 0 {
            let file = state.tree.file(state.tree.resolve(path)?)?;
            let filled = file.length % self.config.block_size;
            let unit = if filled != 0 {
                (self.config.block_size - filled).min(remaining)
            } else {
                remaining.min(self.config.block_size)
            };
            state.add_block(path, unit, self.resolver.as_ref())?;
            self.journal_op(&EditOp::AddBlock {
                path: path.to_string(),
                len: unit,
            })?;
            remaining -= unit;
        }
        Ok(())
    }

    /// Creates a file and writes `len` bytes into it. Convenience wrapper
    /// over [`QuotaEngine::create_file`] and [`QuotaEngine::append`]; the
    /// two remain independent admission units.
    pub fn write_file(&self, path: &str, len: u64, replication: u16) -> Result<InodeId, QuotaError> {
        let id = self.create_file(path, replication)?;
        self.append(path, len)?;
        Ok(id)
    }

    /// Truncates a file to a shorter length, releasing the difference.
    pub fn truncate(&self, path: &str, new_length: u64) -> Result<(), QuotaError> {
        let mut state = self.write_state()?;
        state.truncate(path, new_length, self.resolver.as_ref())?;
        self.journal_op(&EditOp::Truncate {
            path: path.to_string(),
            new_length,
        })?;
        Ok(())
    }

    /// Deletes a file or directory subtree. Content covered by a live
    /// snapshot stays charged to the ancestor chain until the last covering
    /// snapshot is deleted.
    pub fn delete(&self, path: &str) -> Result<(), QuotaError> {
        let mut state = self.write_state()?;
        state.delete(path, self.resolver.as_ref())?;
        self.journal_op(&EditOp::Delete {
            path: path.to_string(),
        })?;
        Ok(())
    }

    /// Renames a node. The destination chain admits the subtree's full
    /// counts as one unit: on rejection nothing moves and the source is
    /// untouched.
    pub fn rename(&self, src: &str, dst: &str) -> Result<(), QuotaError> {
        let mut state = self.write_state()?;
        state.rename(src, dst, self.resolver.as_ref())?;
        self.journal_op(&EditOp::Rename {
            src: src.to_string(),
            dst: dst.to_string(),
        })?;
        Ok(())
    }

    /// Sets the storage policy on a directory (for content created below)
    /// or a file (for its future blocks).
    pub fn set_storage_policy(&self, path: &str, policy: StoragePolicyId) -> Result<(), QuotaError> {
        let mut state = self.write_state()?;
        state.set_storage_policy(path, policy, self.resolver.as_ref())?;
        self.journal_op(&EditOp::SetStoragePolicy {
            path: path.to_string(),
            policy,
        })?;
        Ok(())
    }

    /// Sets or resets the namespace and storage space limits of a
    /// directory. The first limit set attaches a quota feature initialized
    /// from the aggregator; clearing the last limit detaches it.
    pub fn set_space_quota(
        &self,
        path: &str,
        name_space: QuotaValue,
        storage_space: QuotaValue,
    ) -> Result<(), QuotaError> {
        let mut state = self.write_state()?;
        state.set_space_quota(path, name_space, storage_space, self.resolver.as_ref())?;
        self.journal_op(&EditOp::SetSpaceQuota {
            path: path.to_string(),
            name_space,
            storage_space,
        })?;
        Ok(())
    }

    /// Sets or resets one storage type limit of a directory.
    pub fn set_type_quota(
        &self,
        path: &str,
        storage_type: StorageType,
        value: QuotaValue,
    ) -> Result<(), QuotaError> {
        let mut state = self.write_state()?;
        state.set_type_quota(path, storage_type, value, self.resolver.as_ref())?;
        self.journal_op(&EditOp::SetTypeQuota {
            path: path.to_string(),
            storage_type,
            value,
        })?;
        Ok(())
    }

    /// Clears both space limits of a directory.
    pub fn clear_space_quota(&self, path: &str) -> Result<(), QuotaError> {
        self.set_space_quota(path, QuotaValue::Reset, QuotaValue::Reset)
    }

    /// Clears one storage type limit of a directory.
    pub fn clear_type_quota(&self, path: &str, storage_type: StorageType) -> Result<(), QuotaError> {
        self.set_type_quota(path, storage_type, QuotaValue::Reset)
    }

    /// Takes a snapshot of a directory. Zero-cost: consumed counters do not
    /// move.
    pub fn create_snapshot(&self, path: &str, name: &str) -> Result<SnapshotId, QuotaError> {
        let mut state = self.write_state()?;
        let id = state.create_snapshot(path, name)?;
        self.journal_op(&EditOp::CreateSnapshot {
            path: path.to_string(),
            name: name.to_string(),
        })?;
        Ok(id)
    }

    /// Deletes a snapshot, releasing retained deletions whose last
    /// reference it was.
    pub fn delete_snapshot(&self, path: &str, name: &str) -> Result<(), QuotaError> {
        let mut state = self.write_state()?;
        state.delete_snapshot(path, name)?;
        self.journal_op(&EditOp::DeleteSnapshot {
            path: path.to_string(),
            name: name.to_string(),
        })?;
        Ok(())
    }

    /// Returns the limits and consumption of a directory's quota feature,
    /// or `None` if the directory has no feature.
    pub fn quota_status(&self, path: &str) -> Result<Option<QuotaStatus>, QuotaError> {
        let state = self.read_state()?;
        let id = state.tree.resolve(path)?;
        Ok(state.tree.quota_feature(id)?.map(|f| QuotaStatus {
            limits: f.limits.clone(),
            consumed: f.consumed.clone(),
        }))
    }

    /// Recomputes the subtree usage of a path with the aggregator.
    pub fn compute_usage(&self, path: &str) -> Result<QuotaCounts, QuotaError> {
        let state = self.read_state()?;
        let id = state.tree.resolve(path)?;
        compute_quota_usage(&state.tree, self.resolver.as_ref(), id)
    }

    /// Verifies every quota-bearing directory against the aggregator.
    pub fn verify_usage(&self) -> Result<Vec<QuotaMismatch>, QuotaError> {
        let state = self.read_state()?;
        verify_quota_usage(&state.tree, self.resolver.as_ref())
    }

    /// Returns the current length of a file.
    pub fn file_length(&self, path: &str) -> Result<u64, QuotaError> {
        let state = self.read_state()?;
        let id = state.tree.resolve(path)?;
        Ok(state.tree.file(id)?.length)
    }

    /// Returns true if the path resolves to an existing node.
    pub fn exists(&self, path: &str) -> Result<bool, QuotaError> {
        let state = self.read_state()?;
        match state.tree.resolve(path) {
            Ok(_) => Ok(true),
            Err(QuotaError::EntryNotFound { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Writes a checkpoint image of the full state and truncates the edit
    /// log it supersedes.
    pub fn checkpoint(&self) -> Result<(), QuotaError> {
        // Exclusive access so the image is a consistent cut.
        let state = self.write_state()?;
        checkpoint::save(&*state, &self.config.checkpoint_path())?;
        self.journal
            .lock()
            .map_err(|e| QuotaError::Internal(format!("journal lock poisoned: {e}")))?
            .truncate()?;
        Ok(())
    }

    /// The engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }
}
