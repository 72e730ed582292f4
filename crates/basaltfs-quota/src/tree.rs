//! The in-memory namespace tree.
//!
//! Nodes live in an arena keyed by [`InodeId`]. A directory owns its
//! children exclusively through a name-ordered map; every node carries a
//! non-owning back-reference to its parent that is used only for upward
//! quota propagation, never for ownership or lifetime decisions.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::counts::{QuotaCounts, QuotaLimits};
use crate::snapshot::SnapshotState;
use crate::types::{InodeId, QuotaError, StoragePolicyId};

/// The optional quota attachment of a directory: configured limits plus the
/// incrementally maintained consumption of its subtree (itself included).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaFeature {
    /// Configured limits; absent dimensions are unlimited.
    pub limits: QuotaLimits,
    /// Consumption of the subtree, kept in sync by the propagator.
    pub consumed: QuotaCounts,
}

impl QuotaFeature {
    /// Creates a feature with no limits and the given initial consumption.
    pub fn new(consumed: QuotaCounts) -> Self {
        Self {
            limits: QuotaLimits::unlimited(),
            consumed,
        }
    }
}

/// A regular file: block length, replication factor, and the storage policy
/// captured when the file was created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileNode {
    /// Total length in bytes.
    pub length: u64,
    /// Replication factor applied to every block.
    pub replication: u16,
    /// Storage policy in effect at write time; fixes the per-replica
    /// storage-type distribution for quota accounting.
    pub policy: StoragePolicyId,
}

/// A directory: named children, optional storage policy for new content,
/// optional quota feature, and optional snapshot state.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DirNode {
    /// Children by name, name-ordered.
    pub children: BTreeMap<String, InodeId>,
    /// Storage policy inherited by content created below, if set.
    pub policy: Option<StoragePolicyId>,
    /// Quota limits and consumption, present once a limit has been set.
    pub quota: Option<QuotaFeature>,
    /// Snapshot registry and retained-deletion diff log.
    pub snapshots: Option<SnapshotState>,
}

impl DirNode {
    /// Creates an empty directory with no policy, quota, or snapshots.
    pub fn new() -> Self {
        Self {
            children: BTreeMap::new(),
            policy: None,
            quota: None,
            snapshots: None,
        }
    }
}

impl Default for DirNode {
    fn default() -> Self {
        Self::new()
    }
}

/// Node payload, polymorphic over file and directory.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum InodeKind {
    /// A regular file.
    File(FileNode),
    /// A directory.
    Directory(DirNode),
}

/// A node in the namespace tree.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Inode {
    /// This node's id.
    pub id: InodeId,
    /// Parent directory; `None` only for the root.
    pub parent: Option<InodeId>,
    /// Name of this node within its parent.
    pub name: String,
    /// Engine transaction at which the node was created. Snapshots compare
    /// against this to decide coverage.
    pub created_tx: u64,
    /// File or directory payload.
    pub kind: InodeKind,
}

impl Inode {
    /// Returns true if this node is a directory.
    pub fn is_directory(&self) -> bool {
        matches!(self.kind, InodeKind::Directory(_))
    }

    /// Returns the directory payload, or `NotADirectory`.
    pub fn as_dir(&self) -> Result<&DirNode, QuotaError> {
        match &self.kind {
            InodeKind::Directory(d) => Ok(d),
            InodeKind::File(_) => Err(QuotaError::NotADirectory(self.id)),
        }
    }

    /// Returns the mutable directory payload, or `NotADirectory`.
    pub fn as_dir_mut(&mut self) -> Result<&mut DirNode, QuotaError> {
        match &mut self.kind {
            InodeKind::Directory(d) => Ok(d),
            InodeKind::File(_) => Err(QuotaError::NotADirectory(self.id)),
        }
    }

    /// Returns the file payload, or `NotAFile`.
    pub fn as_file(&self) -> Result<&FileNode, QuotaError> {
        match &self.kind {
            InodeKind::File(f) => Ok(f),
            InodeKind::Directory(_) => Err(QuotaError::NotAFile(self.id)),
        }
    }

    /// Returns the mutable file payload, or `NotAFile`.
    pub fn as_file_mut(&mut self) -> Result<&mut FileNode, QuotaError> {
        match &mut self.kind {
            InodeKind::File(f) => Ok(f),
            InodeKind::Directory(_) => Err(QuotaError::NotAFile(self.id)),
        }
    }
}

/// Splits an absolute path into validated components.
pub fn path_components(path: &str) -> Result<Vec<&str>, QuotaError> {
    if !path.starts_with('/') {
        return Err(QuotaError::InvalidPath(path.to_string()));
    }
    if path == "/" {
        return Ok(Vec::new());
    }
    let mut components = Vec::new();
    for part in path[1..].split('/') {
        if part.is_empty() || part == "." || part == ".." {
            return Err(QuotaError::InvalidPath(path.to_string()));
        }
        components.push(part);
    }
    Ok(components)
}

/// The namespace tree arena.
///
/// The root directory always exists and always carries a quota feature with
/// no limits: it is the catch-all aggregator that directories without their
/// own feature delegate to.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct FsTree {
    nodes: HashMap<InodeId, Inode>,
}

impl FsTree {
    /// Creates a tree holding only the root directory. The root's implicit
    /// feature starts with a namespace count of one (the root itself).
    pub fn new() -> Self {
        let mut consumed = QuotaCounts::zero();
        consumed.name_space = 1;
        let mut root_dir = DirNode::new();
        root_dir.quota = Some(QuotaFeature::new(consumed));
        let root = Inode {
            id: InodeId::ROOT,
            parent: None,
            name: String::new(),
            created_tx: 0,
            kind: InodeKind::Directory(root_dir),
        };
        let mut nodes = HashMap::new();
        nodes.insert(InodeId::ROOT, root);
        Self { nodes }
    }

    /// Returns the number of nodes in the tree.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if only the root exists.
    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    /// Fetches a node by id.
    pub fn get(&self, id: InodeId) -> Result<&Inode, QuotaError> {
        self.nodes.get(&id).ok_or(QuotaError::InodeNotFound(id))
    }

    /// Fetches a node by id, mutably.
    pub fn get_mut(&mut self, id: InodeId) -> Result<&mut Inode, QuotaError> {
        self.nodes.get_mut(&id).ok_or(QuotaError::InodeNotFound(id))
    }

    /// Fetches a directory payload by id.
    pub fn dir(&self, id: InodeId) -> Result<&DirNode, QuotaError> {
        self.get(id)?.as_dir()
    }

    /// Fetches a directory payload by id, mutably.
    pub fn dir_mut(&mut self, id: InodeId) -> Result<&mut DirNode, QuotaError> {
        self.get_mut(id)?.as_dir_mut()
    }

    /// Fetches a file payload by id.
    pub fn file(&self, id: InodeId) -> Result<&FileNode, QuotaError> {
        self.get(id)?.as_file()
    }

    /// Fetches a file payload by id, mutably.
    pub fn file_mut(&mut self, id: InodeId) -> Result<&mut FileNode, QuotaError> {
        self.get_mut(id)?.as_file_mut()
    }

    /// Looks up a child by name in a directory.
    pub fn lookup(&self, parent: InodeId, name: &str) -> Result<InodeId, QuotaError> {
        self.dir(parent)?
            .children
            .get(name)
            .copied()
            .ok_or_else(|| QuotaError::EntryNotFound {
                parent,
                name: name.to_string(),
            })
    }

    /// Inserts a new node as a child of `parent`, linking both directions.
    /// Fails if an entry with the same name already exists.
    pub fn insert_child(&mut self, parent: InodeId, mut node: Inode) -> Result<(), QuotaError> {
        let name = node.name.clone();
        let dir = self.dir(parent)?;
        if dir.children.contains_key(&name) {
            return Err(QuotaError::EntryExists { parent, name });
        }
        node.parent = Some(parent);
        let id = node.id;
        self.nodes.insert(id, node);
        // dir_mut cannot fail after the dir() check above
        self.dir_mut(parent)?.children.insert(name, id);
        Ok(())
    }

    /// Removes the link from `parent` to the named child without touching
    /// the child node itself. Returns the unlinked child's id.
    pub fn unlink_child(&mut self, parent: InodeId, name: &str) -> Result<InodeId, QuotaError> {
        let dir = self.dir_mut(parent)?;
        dir.children
            .remove(name)
            .ok_or_else(|| QuotaError::EntryNotFound {
                parent,
                name: name.to_string(),
            })
    }

    /// Collects the ids of a subtree (root first, depth-first).
    pub fn subtree_ids(&self, root: InodeId) -> Result<Vec<InodeId>, QuotaError> {
        let mut ids = Vec::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            let node = self.get(id)?;
            ids.push(id);
            if let InodeKind::Directory(dir) = &node.kind {
                stack.extend(dir.children.values().copied());
            }
        }
        Ok(ids)
    }

    /// Unlinks `root` from its parent and removes the whole subtree from
    /// the arena.
    pub fn remove_subtree(&mut self, root: InodeId) -> Result<(), QuotaError> {
        if root == InodeId::ROOT {
            return Err(QuotaError::InvalidArgument(
                "cannot remove the root directory".to_string(),
            ));
        }
        let ids = self.subtree_ids(root)?;
        let node = self.get(root)?;
        let (parent, name) = (node.parent, node.name.clone());
        if let Some(parent) = parent {
            self.unlink_child(parent, &name)?;
        }
        for id in ids {
            self.nodes.remove(&id);
        }
        Ok(())
    }

    /// Resolves an absolute path to an inode id.
    pub fn resolve(&self, path: &str) -> Result<InodeId, QuotaError> {
        let mut current = InodeId::ROOT;
        for part in path_components(path)? {
            current = self.lookup(current, part)?;
        }
        Ok(current)
    }

    /// Resolves the parent directory of an absolute path, returning the
    /// parent's id and the final path component.
    pub fn resolve_parent(&self, path: &str) -> Result<(InodeId, String), QuotaError> {
        let components = path_components(path)?;
        let (last, prefix) = components
            .split_last()
            .ok_or_else(|| QuotaError::InvalidPath(path.to_string()))?;
        let mut current = InodeId::ROOT;
        for part in prefix {
            current = self.lookup(current, part)?;
        }
        // The parent must be a directory even when it has no children yet.
        self.dir(current)?;
        Ok((current, (*last).to_string()))
    }

    /// Reconstructs the absolute path of a node, for logging and reports.
    pub fn path_of(&self, id: InodeId) -> Result<String, QuotaError> {
        let mut parts = Vec::new();
        let mut current = id;
        loop {
            let node = self.get(current)?;
            match node.parent {
                Some(parent) => {
                    parts.push(node.name.clone());
                    current = parent;
                }
                None => break,
            }
        }
        if parts.is_empty() {
            return Ok("/".to_string());
        }
        parts.reverse();
        Ok(format!("/{}", parts.join("/")))
    }

    /// Returns the chain of ancestors from `start` (inclusive) to the root.
    pub fn ancestor_chain(&self, start: InodeId) -> Result<Vec<InodeId>, QuotaError> {
        let mut chain = Vec::new();
        let mut current = Some(start);
        while let Some(id) = current {
            chain.push(id);
            current = self.get(id)?.parent;
        }
        Ok(chain)
    }

    /// Returns true if `ancestor` lies on `node`'s chain to the root
    /// (a node is considered its own ancestor).
    pub fn is_ancestor(&self, ancestor: InodeId, node: InodeId) -> Result<bool, QuotaError> {
        let mut current = Some(node);
        while let Some(id) = current {
            if id == ancestor {
                return Ok(true);
            }
            current = self.get(id)?.parent;
        }
        Ok(false)
    }

    /// Returns the lowest common ancestor of two nodes.
    pub fn lowest_common_ancestor(
        &self,
        a: InodeId,
        b: InodeId,
    ) -> Result<InodeId, QuotaError> {
        let chain_a: std::collections::HashSet<InodeId> =
            self.ancestor_chain(a)?.into_iter().collect();
        for id in self.ancestor_chain(b)? {
            if chain_a.contains(&id) {
                return Ok(id);
            }
        }
        // Both chains end at the root, so this is unreachable on a
        // well-formed tree.
        Err(QuotaError::Internal(format!(
            "no common ancestor for inodes {a} and {b}"
        )))
    }

    /// Determines the storage policy in effect at a node: the node's own
    /// policy if set, else the nearest ancestor directory's, else HOT.
    pub fn effective_policy(&self, id: InodeId) -> Result<StoragePolicyId, QuotaError> {
        let mut current = Some(id);
        while let Some(node_id) = current {
            let node = self.get(node_id)?;
            match &node.kind {
                InodeKind::File(f) => return Ok(f.policy),
                InodeKind::Directory(d) => {
                    if let Some(policy) = d.policy {
                        return Ok(policy);
                    }
                }
            }
            current = node.parent;
        }
        Ok(StoragePolicyId::HOT)
    }

    /// Returns the quota feature of a directory, if present.
    pub fn quota_feature(&self, id: InodeId) -> Result<Option<&QuotaFeature>, QuotaError> {
        Ok(self.dir(id)?.quota.as_ref())
    }

    /// Returns the ids of every directory carrying a quota feature.
    pub fn dirs_with_quota(&self) -> Vec<InodeId> {
        let mut ids: Vec<InodeId> = self
            .nodes
            .values()
            .filter(|n| matches!(&n.kind, InodeKind::Directory(d) if d.quota.is_some()))
            .map(|n| n.id)
            .collect();
        ids.sort();
        ids
    }
}

impl Default for FsTree {
    fn default() -> Self {
        Self::new()
    }
}
