//! Checkpoint images.
//!
//! A checkpoint is a full bincode image of the engine state, written
//! atomically (temp file + rename) with a magic/version header and a blake3
//! checksum over the payload. Restart loads the last image and replays the
//! edit log tail over it, bounding replay time.

use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use crate::types::QuotaError;

/// File magic identifying a checkpoint image.
const MAGIC: &[u8; 8] = b"BFSQIMG\0";
/// Current image format version.
const VERSION: u32 = 1;
/// Upper bound on a plausible image payload.
const MAX_IMAGE_LEN: u64 = 4 * 1024 * 1024 * 1024;

/// Serializes `state` into an image file at `path`.
///
/// The image is written to a sibling temp file, synced, then renamed over
/// the destination so a crash can never leave a half-written image behind.
pub fn save<T: Serialize>(state: &T, path: &Path) -> Result<(), QuotaError> {
    let payload =
        bincode::serialize(state).map_err(|e| QuotaError::Serialization(e.to_string()))?;
    let hash = blake3::hash(&payload);

    let tmp_path = path.with_extension("tmp");
    let mut file = File::create(&tmp_path)?;
    file.write_all(MAGIC)?;
    file.write_all(&VERSION.to_le_bytes())?;
    file.write_all(&(payload.len() as u64).to_le_bytes())?;
    file.write_all(hash.as_bytes())?;
    file.write_all(&payload)?;
    file.sync_all()?;
    drop(file);
    std::fs::rename(&tmp_path, path)?;
    tracing::info!(
        "Wrote checkpoint image {} ({} payload bytes)",
        path.display(),
        payload.len()
    );
    Ok(())
}

/// Loads and validates an image file written by [`save`].
pub fn load<T: DeserializeOwned>(path: &Path) -> Result<T, QuotaError> {
    let mut file = File::open(path)?;

    let mut magic = [0u8; 8];
    let mut version = [0u8; 4];
    let mut len = [0u8; 8];
    let mut hash = [0u8; 32];
    let header = file
        .read_exact(&mut magic)
        .and_then(|_| file.read_exact(&mut version))
        .and_then(|_| file.read_exact(&mut len))
        .and_then(|_| file.read_exact(&mut hash));
    if let Err(e) = header {
        return Err(QuotaError::CorruptPersistedQuotaState(format!(
            "checkpoint {} has a truncated header: {}",
            path.display(),
            e
        )));
    }
    if &magic != MAGIC {
        return Err(QuotaError::CorruptPersistedQuotaState(format!(
            "checkpoint {} has wrong magic",
            path.display()
        )));
    }
    let version = u32::from_le_bytes(version);
    if version != VERSION {
        return Err(QuotaError::CorruptPersistedQuotaState(format!(
            "checkpoint {} has unsupported version {}",
            path.display(),
            version
        )));
    }
    let len = u64::from_le_bytes(len);
    if len > MAX_IMAGE_LEN {
        return Err(QuotaError::CorruptPersistedQuotaState(format!(
            "checkpoint {} claims implausible payload length {}",
            path.display(),
            len
        )));
    }
    let mut payload = vec![0u8; len as usize];
    if let Err(e) = file.read_exact(&mut payload) {
        return Err(QuotaError::CorruptPersistedQuotaState(format!(
            "checkpoint {} payload is truncated: {}",
            path.display(),
            e
        )));
    }
    if blake3::hash(&payload).as_bytes() != &hash {
        return Err(QuotaError::CorruptPersistedQuotaState(format!(
            "checkpoint {} failed checksum validation",
            path.display()
        )));
    }
    let state = bincode::deserialize(&payload).map_err(|e| {
        QuotaError::CorruptPersistedQuotaState(format!(
            "checkpoint {} does not decode: {}",
            path.display(),
            e
        ))
    })?;
    tracing::info!("Loaded checkpoint image {}", path.display());
    Ok(state)
}
