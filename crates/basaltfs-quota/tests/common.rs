//! Common fixtures for quota integration tests.
//!
//! Scenarios run against a small block size so multi-block admission is
//! cheap to exercise: every write is admitted in units of at most one
//! block.

#![allow(dead_code)]

use basaltfs_quota::config::EngineConfig;
use basaltfs_quota::engine::QuotaEngine;
use basaltfs_quota::types::StorageType;
use tempfile::TempDir;

/// Block size for all scenarios.
pub const BLOCK_SIZE: u64 = 1024;

/// Default replication factor for all scenarios.
pub const REPLICATION: u16 = 3;

/// Engine configuration rooted in the given temp directory.
pub fn test_config(dir: &TempDir) -> EngineConfig {
    EngineConfig::new(dir.path())
        .with_block_size(BLOCK_SIZE)
        .with_sync_on_append(false)
}

/// Creates an engine over a fresh data directory.
pub fn test_engine() -> (TempDir, QuotaEngine) {
    let dir = tempfile::tempdir().expect("create temp dir");
    let engine = QuotaEngine::open(test_config(&dir)).expect("open engine");
    (dir, engine)
}

/// Reopens an engine over an existing data directory (simulates a restart).
pub fn restart(dir: &TempDir) -> QuotaEngine {
    QuotaEngine::open(test_config(dir)).expect("reopen engine")
}

/// SSD bytes currently consumed according to the quota feature at `path`.
pub fn ssd_consumed(engine: &QuotaEngine, path: &str) -> i64 {
    engine
        .quota_status(path)
        .expect("quota status")
        .expect("directory has a quota feature")
        .consumed
        .type_spaces
        .get(StorageType::Ssd)
}
