//! The durable edit log.
//!
//! Every committed admission unit appends one [`EditOp`] record before the
//! operation returns to its caller. Replaying the log over the last
//! checkpoint re-executes the same deterministic operations and
//! reconstructs limits and consumed counters bit-for-bit, without an
//! aggregator pass.
//!
//! Record layout: `[payload_len: u32 le][blake3(payload): 32 bytes][payload]`
//! where the payload is the bincode encoding of the op. Any checksum
//! mismatch, truncated record, or undecodable payload aborts recovery with
//! `CorruptPersistedQuotaState`.

use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::counts::QuotaValue;
use crate::types::{QuotaError, StoragePolicyId, StorageType};

/// Upper bound on a single record's payload; anything larger is treated as
/// a corrupt length field.
const MAX_RECORD_LEN: u32 = 64 * 1024 * 1024;

/// A quota-affecting namespace operation, as journaled.
///
/// Ops carry paths rather than inode ids: replay resolves them against the
/// reconstructed tree exactly as the original call did.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EditOp {
    /// Create a directory.
    Mkdir {
        /// Absolute path of the new directory.
        path: String,
    },
    /// Create an empty file.
    CreateFile {
        /// Absolute path of the new file.
        path: String,
        /// Replication factor for the file's blocks.
        replication: u16,
    },
    /// Append one admitted block (or partial block) to a file.
    AddBlock {
        /// Absolute path of the file.
        path: String,
        /// Admitted length in bytes.
        len: u64,
    },
    /// Truncate a file to a shorter length.
    Truncate {
        /// Absolute path of the file.
        path: String,
        /// New length in bytes.
        new_length: u64,
    },
    /// Delete a file or directory subtree.
    Delete {
        /// Absolute path of the deleted node.
        path: String,
    },
    /// Rename a node to a new parent and/or name.
    Rename {
        /// Source absolute path.
        src: String,
        /// Destination absolute path.
        dst: String,
    },
    /// Set the storage policy of a file or directory.
    SetStoragePolicy {
        /// Absolute path of the target node.
        path: String,
        /// The policy to apply.
        policy: StoragePolicyId,
    },
    /// Set or reset the namespace and storage space limits.
    SetSpaceQuota {
        /// Absolute path of the directory.
        path: String,
        /// Namespace limit value.
        name_space: QuotaValue,
        /// Storage space limit value.
        storage_space: QuotaValue,
    },
    /// Set or reset one storage type limit.
    SetTypeQuota {
        /// Absolute path of the directory.
        path: String,
        /// The storage type whose limit changes.
        storage_type: StorageType,
        /// Limit value.
        value: QuotaValue,
    },
    /// Take a snapshot of a directory.
    CreateSnapshot {
        /// Absolute path of the directory.
        path: String,
        /// Snapshot name.
        name: String,
    },
    /// Delete a snapshot from a directory.
    DeleteSnapshot {
        /// Absolute path of the directory.
        path: String,
        /// Snapshot name.
        name: String,
    },
}

/// Append-only, checksummed, file-backed operation log.
pub struct EditLog {
    path: PathBuf,
    file: File,
    sync_on_append: bool,
    records: u64,
}

impl EditLog {
    /// Opens (creating if necessary) the edit log for appending. An
    /// existing log is scanned once to validate it and count its records.
    pub fn open(path: &Path, sync_on_append: bool) -> Result<Self, QuotaError> {
        let records = Self::read_all(path)?.len() as u64;
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        tracing::info!(
            "Opened edit log {} with {} existing record(s)",
            path.display(),
            records
        );
        Ok(Self {
            path: path.to_path_buf(),
            file,
            sync_on_append,
            records,
        })
    }

    /// Appends one op. Returns the record ordinal (1-based).
    pub fn append(&mut self, op: &EditOp) -> Result<u64, QuotaError> {
        let payload = bincode::serialize(op).map_err(|e| QuotaError::Serialization(e.to_string()))?;
        let hash = blake3::hash(&payload);
        self.file.write_all(&(payload.len() as u32).to_le_bytes())?;
        self.file.write_all(hash.as_bytes())?;
        self.file.write_all(&payload)?;
        if self.sync_on_append {
            self.file.sync_data()?;
        }
        self.records += 1;
        Ok(self.records)
    }

    /// Number of records currently in the log.
    pub fn record_count(&self) -> u64 {
        self.records
    }

    /// Discards every record. Called after a successful checkpoint, which
    /// supersedes the log.
    pub fn truncate(&mut self) -> Result<(), QuotaError> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        self.file.sync_data()?;
        tracing::info!(
            "Truncated edit log {} after checkpoint ({} record(s) discarded)",
            self.path.display(),
            self.records
        );
        self.records = 0;
        Ok(())
    }

    /// Reads and validates every record of a log file. A missing file is an
    /// empty log; any malformed byte is `CorruptPersistedQuotaState`.
    pub fn read_all(path: &Path) -> Result<Vec<EditOp>, QuotaError> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let mut reader = BufReader::new(File::open(path)?);
        let mut ops = Vec::new();
        loop {
            let mut len_buf = [0u8; 4];
            match reader.read_exact(&mut len_buf) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e.into()),
            }
            let len = u32::from_le_bytes(len_buf);
            if len > MAX_RECORD_LEN {
                return Err(QuotaError::CorruptPersistedQuotaState(format!(
                    "edit log record {} claims implausible length {}",
                    ops.len() + 1,
                    len
                )));
            }
            let mut hash_buf = [0u8; 32];
            let mut payload = vec![0u8; len as usize];
            let read_rest = reader
                .read_exact(&mut hash_buf)
                .and_then(|_| reader.read_exact(&mut payload));
            if let Err(e) = read_rest {
                return Err(QuotaError::CorruptPersistedQuotaState(format!(
                    "edit log record {} is truncated: {}",
                    ops.len() + 1,
                    e
                )));
            }
            if blake3::hash(&payload).as_bytes() != &hash_buf {
                return Err(QuotaError::CorruptPersistedQuotaState(format!(
                    "edit log record {} failed checksum validation",
                    ops.len() + 1
                )));
            }
            let op: EditOp = bincode::deserialize(&payload).map_err(|e| {
                QuotaError::CorruptPersistedQuotaState(format!(
                    "edit log record {} does not decode: {}",
                    ops.len() + 1,
                    e
                ))
            })?;
            ops.push(op);
        }
        Ok(ops)
    }
}
