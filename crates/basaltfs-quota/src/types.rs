//! Core identifiers, storage types, and the crate-wide error type.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents a unique identifier for an inode in the namespace tree
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InodeId(u64);

impl InodeId {
    /// The root inode ID (always 1)
    pub const ROOT: InodeId = InodeId(1);

    /// Creates a new InodeId from a raw u64 value
    pub fn new(id: u64) -> Self {
        InodeId(id)
    }

    /// Returns the raw u64 value of this inode ID
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for InodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Represents a unique identifier for a directory snapshot
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SnapshotId(u64);

impl SnapshotId {
    /// Creates a new SnapshotId from a raw u64 value
    pub fn new(id: u64) -> Self {
        SnapshotId(id)
    }

    /// Returns the raw u64 value of this snapshot ID
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for SnapshotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a block storage policy.
///
/// The numeric values of the well-known policies match the suite shipped by
/// the block management layer; the engine only passes them through to the
/// [`crate::policy::StoragePolicyResolver`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StoragePolicyId(u8);

impl StoragePolicyId {
    /// All replicas on archival storage.
    pub const COLD: StoragePolicyId = StoragePolicyId(2);
    /// First replica on disk, remaining replicas archived.
    pub const WARM: StoragePolicyId = StoragePolicyId(5);
    /// All replicas on disk. The default policy.
    pub const HOT: StoragePolicyId = StoragePolicyId(7);
    /// First replica on SSD, remaining replicas on disk.
    pub const ONE_SSD: StoragePolicyId = StoragePolicyId(10);
    /// All replicas on SSD.
    pub const ALL_SSD: StoragePolicyId = StoragePolicyId(12);

    /// Creates a new StoragePolicyId from a raw u8 value
    pub fn new(id: u8) -> Self {
        StoragePolicyId(id)
    }

    /// Returns the raw u8 value of this policy ID
    pub fn as_u8(&self) -> u8 {
        self.0
    }
}

impl fmt::Display for StoragePolicyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Storage media classes a block replica can occupy.
///
/// The set is fixed; only a subset supports quota accounting. Transient
/// media (RAM_DISK) is excluded from quota enforcement because its content
/// does not survive a datanode restart.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StorageType {
    /// Transient in-memory storage. Does not support quota.
    RamDisk,
    /// Solid-state storage.
    Ssd,
    /// Rotational disk storage. The default medium.
    Disk,
    /// High-density archival storage.
    Archive,
}

impl StorageType {
    /// Returns true if this storage type participates in quota accounting.
    pub fn supports_quota(&self) -> bool {
        !matches!(self, StorageType::RamDisk)
    }

    /// The storage types that support quota, in canonical order.
    pub fn types_supporting_quota() -> [StorageType; 3] {
        [StorageType::Ssd, StorageType::Disk, StorageType::Archive]
    }
}

impl fmt::Display for StorageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageType::RamDisk => write!(f, "RAM_DISK"),
            StorageType::Ssd => write!(f, "SSD"),
            StorageType::Disk => write!(f, "DISK"),
            StorageType::Archive => write!(f, "ARCHIVE"),
        }
    }
}

/// Error types for quota and namespace operations
#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    /// The requested inode does not exist.
    #[error("inode {0} not found")]
    InodeNotFound(InodeId),

    /// The specified inode is not a directory when a directory was required.
    #[error("inode {0} is not a directory")]
    NotADirectory(InodeId),

    /// The specified inode is not a regular file when a file was required.
    #[error("inode {0} is not a file")]
    NotAFile(InodeId),

    /// A directory entry with the given name already exists.
    #[error("entry '{name}' already exists in directory {parent}")]
    EntryExists {
        /// Parent directory inode
        parent: InodeId,
        /// Existing entry name
        name: String,
    },

    /// A directory entry with the given name was not found.
    #[error("entry '{name}' not found in directory {parent}")]
    EntryNotFound {
        /// Parent directory inode
        parent: InodeId,
        /// Entry name that was not found
        name: String,
    },

    /// The supplied path is not a valid absolute path.
    #[error("invalid path '{0}'")]
    InvalidPath(String),

    /// A malformed argument that is not a quota limit (e.g. zero replication).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The namespace (inode count) quota of an ancestor would be exceeded.
    #[error("namespace quota of directory {dir} exceeded: quota={quota} count={count}")]
    NamespaceQuotaExceeded {
        /// The quota-bearing ancestor whose limit would be exceeded
        dir: InodeId,
        /// The configured namespace limit
        quota: u64,
        /// The projected inode count after the rejected mutation
        count: u64,
    },

    /// The aggregate storage space quota of an ancestor would be exceeded.
    #[error("storage space quota of directory {dir} exceeded: quota={quota} consumed={consumed}")]
    StorageSpaceQuotaExceeded {
        /// The quota-bearing ancestor whose limit would be exceeded
        dir: InodeId,
        /// The configured storage space limit in bytes
        quota: u64,
        /// The projected consumption after the rejected mutation
        consumed: u64,
    },

    /// A per-storage-type space quota of an ancestor would be exceeded.
    #[error(
        "storage type quota of directory {dir} exceeded for {storage_type}: \
         quota={quota} consumed={consumed}"
    )]
    StorageTypeQuotaExceeded {
        /// The quota-bearing ancestor whose limit would be exceeded
        dir: InodeId,
        /// The storage type whose limit would be exceeded
        storage_type: StorageType,
        /// The configured limit for the storage type in bytes
        quota: u64,
        /// The projected consumption after the rejected mutation
        consumed: u64,
    },

    /// A quota limit value that is rejected at configuration time.
    #[error("invalid quota value: {0}")]
    InvalidQuotaValue(String),

    /// A snapshot with the given name already exists on the directory.
    #[error("snapshot '{name}' already exists on directory {dir}")]
    SnapshotExists {
        /// The snapshottable directory
        dir: InodeId,
        /// The duplicate snapshot name
        name: String,
    },

    /// No snapshot with the given name exists on the directory.
    #[error("snapshot '{name}' not found on directory {dir}")]
    SnapshotNotFound {
        /// The snapshottable directory
        dir: InodeId,
        /// The missing snapshot name
        name: String,
    },

    /// The directory (or a descendant) still has live snapshots.
    #[error("directory {0} has live snapshots")]
    HasSnapshots(InodeId),

    /// The storage policy is not known to the resolver.
    #[error("storage policy {0} not found")]
    PolicyNotFound(StoragePolicyId),

    /// Persisted quota state failed to parse or violates an invariant.
    #[error("corrupt persisted quota state: {0}")]
    CorruptPersistedQuotaState(String),

    /// A record could not be serialized for the journal or checkpoint.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Internal invariant failure (e.g. a poisoned lock).
    #[error("internal error: {0}")]
    Internal(String),

    /// A lower-level I/O error occurred.
    #[error(transparent)]
    IoError(#[from] std::io::Error),
}

impl QuotaError {
    /// Returns true for the expected, operation-scoped quota rejections.
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(
            self,
            QuotaError::NamespaceQuotaExceeded { .. }
                | QuotaError::StorageSpaceQuotaExceeded { .. }
                | QuotaError::StorageTypeQuotaExceeded { .. }
        )
    }
}
