//! End-to-end admission scenarios: per-type enforcement, delegation,
//! ancestor precedence, rename, and the priority between quota kinds.

mod common;

use basaltfs_quota::counts::QuotaValue;
use basaltfs_quota::types::{QuotaError, StoragePolicyId, StorageType};
use common::{ssd_consumed, test_engine, BLOCK_SIZE, REPLICATION};

#[test]
fn ssd_admission_sequence() {
    let (_dir, engine) = test_engine();
    engine.mkdir("/q").unwrap();
    engine.mkdir("/q/foo").unwrap();
    engine
        .set_storage_policy("/q/foo", StoragePolicyId::ONE_SSD)
        .unwrap();
    engine
        .set_type_quota("/q/foo", StorageType::Ssd, QuotaValue::Limit(BLOCK_SIZE * 4))
        .unwrap();

    // 2 blocks fit.
    engine
        .write_file("/q/foo/a.data", BLOCK_SIZE * 2, REPLICATION)
        .unwrap();
    assert_eq!(ssd_consumed(&engine, "/q/foo"), (BLOCK_SIZE * 2) as i64);

    // 1.5 more blocks still fit.
    engine
        .write_file("/q/foo/b.data", BLOCK_SIZE + BLOCK_SIZE / 2, REPLICATION)
        .unwrap();
    assert_eq!(
        ssd_consumed(&engine, "/q/foo"),
        (BLOCK_SIZE * 3 + BLOCK_SIZE / 2) as i64
    );

    // One further block would cross the 4-block limit.
    let err = engine
        .write_file("/q/foo/c.data", BLOCK_SIZE, REPLICATION)
        .unwrap_err();
    match err {
        QuotaError::StorageTypeQuotaExceeded { storage_type, .. } => {
            assert_eq!(storage_type, StorageType::Ssd);
        }
        other => panic!("unexpected error {other}"),
    }
    assert_eq!(
        ssd_consumed(&engine, "/q/foo"),
        (BLOCK_SIZE * 3 + BLOCK_SIZE / 2) as i64
    );
}

#[test]
fn one_ssd_charges_a_single_replica() {
    let (_dir, engine) = test_engine();
    engine.mkdir("/foo").unwrap();
    engine
        .set_storage_policy("/foo", StoragePolicyId::ONE_SSD)
        .unwrap();
    engine
        .set_type_quota("/foo", StorageType::Ssd, QuotaValue::Limit(BLOCK_SIZE * 10))
        .unwrap();

    let len = BLOCK_SIZE * 2 + BLOCK_SIZE / 2;
    engine.write_file("/foo/f.data", len, REPLICATION).unwrap();

    let status = engine.quota_status("/foo").unwrap().unwrap();
    assert_eq!(status.consumed.type_spaces.get(StorageType::Ssd), len as i64);
    assert_eq!(
        status.consumed.type_spaces.get(StorageType::Disk),
        (len * (REPLICATION as u64 - 1)) as i64
    );
}

#[test]
fn all_ssd_charges_every_replica() {
    let (_dir, engine) = test_engine();
    engine.mkdir("/foo").unwrap();
    engine
        .set_storage_policy("/foo", StoragePolicyId::ALL_SSD)
        .unwrap();
    engine
        .set_type_quota("/foo", StorageType::Ssd, QuotaValue::Limit(BLOCK_SIZE * 10))
        .unwrap();

    let len = BLOCK_SIZE * 2 + BLOCK_SIZE / 2;
    engine.write_file("/foo/f.data", len, REPLICATION).unwrap();

    assert_eq!(
        ssd_consumed(&engine, "/foo"),
        (len * REPLICATION as u64) as i64
    );
}

#[test]
fn append_grows_type_consumption() {
    let (_dir, engine) = test_engine();
    engine.mkdir("/foo").unwrap();
    engine
        .set_storage_policy("/foo", StoragePolicyId::ONE_SSD)
        .unwrap();
    engine
        .set_type_quota("/foo", StorageType::Ssd, QuotaValue::Limit(BLOCK_SIZE * 4))
        .unwrap();

    engine
        .write_file("/foo/f.data", BLOCK_SIZE * 2, REPLICATION)
        .unwrap();
    assert_eq!(ssd_consumed(&engine, "/foo"), (BLOCK_SIZE * 2) as i64);

    engine.append("/foo/f.data", BLOCK_SIZE * 2).unwrap();
    assert_eq!(ssd_consumed(&engine, "/foo"), (BLOCK_SIZE * 4) as i64);
}

#[test]
fn delete_reclaims_type_space() {
    let (_dir, engine) = test_engine();
    engine.mkdir("/foo").unwrap();
    engine
        .set_storage_policy("/foo", StoragePolicyId::ONE_SSD)
        .unwrap();
    engine
        .set_type_quota("/foo", StorageType::Ssd, QuotaValue::Limit(BLOCK_SIZE * 10))
        .unwrap();

    let len = BLOCK_SIZE * 2 + BLOCK_SIZE / 2;
    engine.write_file("/foo/f.data", len, REPLICATION).unwrap();
    assert_eq!(ssd_consumed(&engine, "/foo"), len as i64);

    engine.delete("/foo/f.data").unwrap();
    assert_eq!(ssd_consumed(&engine, "/foo"), 0);
    // The aggregator agrees with the incremental counters.
    let computed = engine.compute_usage("/foo").unwrap();
    assert_eq!(computed.type_spaces.get(StorageType::Ssd), 0);
    assert!(engine.verify_usage().unwrap().is_empty());
}

#[test]
fn truncate_releases_the_difference() {
    let (_dir, engine) = test_engine();
    engine.mkdir("/foo").unwrap();
    engine
        .set_storage_policy("/foo", StoragePolicyId::ONE_SSD)
        .unwrap();
    engine
        .set_type_quota("/foo", StorageType::Ssd, QuotaValue::Limit(BLOCK_SIZE * 4))
        .unwrap();

    engine
        .write_file("/foo/f.data", BLOCK_SIZE * 2, REPLICATION)
        .unwrap();
    assert_eq!(ssd_consumed(&engine, "/foo"), (BLOCK_SIZE * 2) as i64);

    engine.truncate("/foo/f.data", BLOCK_SIZE).unwrap();
    assert_eq!(ssd_consumed(&engine, "/foo"), BLOCK_SIZE as i64);
    assert_eq!(engine.file_length("/foo/f.data").unwrap(), BLOCK_SIZE);
}

#[test]
fn traditional_quota_tracks_namespace_and_space() {
    let (_dir, engine) = test_engine();
    engine.mkdir("/foo").unwrap();
    engine
        .set_storage_policy("/foo", StoragePolicyId::ONE_SSD)
        .unwrap();
    engine
        .set_type_quota("/foo", StorageType::Ssd, QuotaValue::Limit(BLOCK_SIZE * 10))
        .unwrap();
    engine
        .set_space_quota(
            "/foo",
            QuotaValue::Limit(1 << 40),
            QuotaValue::Limit(REPLICATION as u64 * BLOCK_SIZE * 10),
        )
        .unwrap();

    let len = BLOCK_SIZE * 2 + BLOCK_SIZE / 2;
    engine.write_file("/foo/f.data", len, REPLICATION).unwrap();

    let status = engine.quota_status("/foo").unwrap().unwrap();
    assert_eq!(status.consumed.name_space, 2);
    assert_eq!(
        status.consumed.storage_space,
        (len * REPLICATION as u64) as i64
    );

    engine.delete("/foo/f.data").unwrap();
    let status = engine.quota_status("/foo").unwrap().unwrap();
    assert_eq!(status.consumed.name_space, 1);
    assert_eq!(status.consumed.storage_space, 0);

    let computed = engine.compute_usage("/foo").unwrap();
    assert_eq!(computed.name_space, 1);
    assert_eq!(computed.storage_space, 0);
}

#[test]
fn delegation_to_root_when_no_feature_on_path() {
    let (_dir, engine) = test_engine();
    engine.mkdir("/parent").unwrap();
    engine.mkdir("/parent/child").unwrap();
    engine
        .set_storage_policy("/parent", StoragePolicyId::ONE_SSD)
        .unwrap();

    // Neither parent nor child has a feature; the write lands on the
    // root's implicit catch-all.
    let len = BLOCK_SIZE * 2 + BLOCK_SIZE / 2;
    engine
        .write_file("/parent/child/f.data", len, REPLICATION)
        .unwrap();

    assert!(engine.quota_status("/parent").unwrap().is_none());
    assert!(engine.quota_status("/parent/child").unwrap().is_none());
    assert_eq!(ssd_consumed(&engine, "/"), len as i64);
}

#[test]
fn child_quota_enforced_when_parent_has_none() {
    let (_dir, engine) = test_engine();
    engine.mkdir("/parent").unwrap();
    engine.mkdir("/parent/child").unwrap();
    engine
        .set_storage_policy("/parent", StoragePolicyId::ONE_SSD)
        .unwrap();
    engine
        .set_type_quota(
            "/parent/child",
            StorageType::Ssd,
            QuotaValue::Limit(2 * BLOCK_SIZE),
        )
        .unwrap();

    let err = engine
        .write_file(
            "/parent/child/f.data",
            BLOCK_SIZE * 2 + BLOCK_SIZE / 2,
            REPLICATION,
        )
        .unwrap_err();
    assert!(matches!(err, QuotaError::StorageTypeQuotaExceeded { .. }));
}

#[test]
fn parent_quota_applies_to_writes_under_child() {
    let (_dir, engine) = test_engine();
    engine.mkdir("/parent").unwrap();
    engine.mkdir("/parent/child").unwrap();
    engine
        .set_storage_policy("/parent", StoragePolicyId::ONE_SSD)
        .unwrap();
    engine
        .set_type_quota("/parent", StorageType::Ssd, QuotaValue::Limit(3 * BLOCK_SIZE))
        .unwrap();

    let len = BLOCK_SIZE * 2 + BLOCK_SIZE / 2;
    engine.write_file("/parent/child/f1.data", len, 1).unwrap();
    assert_eq!(ssd_consumed(&engine, "/parent"), len as i64);

    // The next block would cross the parent's limit.
    let err = engine
        .write_file("/parent/child/f2.data", BLOCK_SIZE, 1)
        .unwrap_err();
    assert!(matches!(err, QuotaError::StorageTypeQuotaExceeded { .. }));
    assert_eq!(ssd_consumed(&engine, "/parent"), len as i64);
}

#[test]
fn stricter_parent_reported_over_looser_child() {
    let (_dir, engine) = test_engine();
    let parent_id = engine.mkdir("/parent").unwrap();
    engine.mkdir("/parent/child").unwrap();
    engine
        .set_storage_policy("/parent", StoragePolicyId::ONE_SSD)
        .unwrap();
    engine
        .set_type_quota("/parent", StorageType::Ssd, QuotaValue::Limit(2 * BLOCK_SIZE))
        .unwrap();
    engine
        .set_type_quota(
            "/parent/child",
            StorageType::Ssd,
            QuotaValue::Limit(3 * BLOCK_SIZE),
        )
        .unwrap();

    // 2.5 blocks fit under the child's limit but not the parent's; the
    // error must name the parent, the true limiting ancestor.
    let err = engine
        .write_file(
            "/parent/child/f.data",
            BLOCK_SIZE * 2 + BLOCK_SIZE / 2,
            REPLICATION,
        )
        .unwrap_err();
    match err {
        QuotaError::StorageTypeQuotaExceeded {
            dir,
            storage_type,
            quota,
            ..
        } => {
            assert_eq!(dir, parent_id);
            assert_eq!(storage_type, StorageType::Ssd);
            assert_eq!(quota, 2 * BLOCK_SIZE);
        }
        other => panic!("unexpected error {other}"),
    }
}

#[test]
fn rename_rejected_by_destination_quota() {
    let (_dir, engine) = test_engine();
    engine.mkdir("/q").unwrap();
    engine.mkdir("/q/foo").unwrap();
    engine.mkdir("/q/bar").unwrap();
    engine
        .set_storage_policy("/q/foo", StoragePolicyId::ONE_SSD)
        .unwrap();
    engine
        .set_storage_policy("/q/bar", StoragePolicyId::ONE_SSD)
        .unwrap();
    engine
        .set_type_quota("/q/foo", StorageType::Ssd, QuotaValue::Limit(BLOCK_SIZE * 4))
        .unwrap();
    engine
        .set_type_quota("/q/bar", StorageType::Ssd, QuotaValue::Limit(BLOCK_SIZE * 2))
        .unwrap();

    engine
        .write_file("/q/foo/f.data", BLOCK_SIZE * 3, REPLICATION)
        .unwrap();
    assert_eq!(ssd_consumed(&engine, "/q/foo"), (BLOCK_SIZE * 3) as i64);

    // 3 blocks cannot move under bar's 2-block limit; the rename fails as
    // a whole and the source is untouched.
    let err = engine.rename("/q/foo/f.data", "/q/bar/f.data").unwrap_err();
    assert!(matches!(err, QuotaError::StorageTypeQuotaExceeded { .. }));

    assert!(engine.exists("/q/foo/f.data").unwrap());
    assert!(!engine.exists("/q/bar/f.data").unwrap());
    assert_eq!(ssd_consumed(&engine, "/q/foo"), (BLOCK_SIZE * 3) as i64);
    assert_eq!(ssd_consumed(&engine, "/q/bar"), 0);
    assert!(engine.verify_usage().unwrap().is_empty());
}

#[test]
fn rename_within_limits_moves_consumption() {
    let (_dir, engine) = test_engine();
    engine.mkdir("/q").unwrap();
    engine.mkdir("/q/foo").unwrap();
    engine.mkdir("/q/bar").unwrap();
    engine
        .set_storage_policy("/q", StoragePolicyId::ONE_SSD)
        .unwrap();
    engine
        .set_type_quota("/q/foo", StorageType::Ssd, QuotaValue::Limit(BLOCK_SIZE * 4))
        .unwrap();
    engine
        .set_type_quota("/q/bar", StorageType::Ssd, QuotaValue::Limit(BLOCK_SIZE * 4))
        .unwrap();

    engine
        .write_file("/q/foo/f.data", BLOCK_SIZE * 2, REPLICATION)
        .unwrap();
    engine.rename("/q/foo/f.data", "/q/bar/f.data").unwrap();

    assert_eq!(ssd_consumed(&engine, "/q/foo"), 0);
    assert_eq!(ssd_consumed(&engine, "/q/bar"), (BLOCK_SIZE * 2) as i64);
    assert!(engine.verify_usage().unwrap().is_empty());
}

/// Runs one mixed-kind scenario: both a storage space quota and an SSD
/// quota are set, a file too large for at least one of them is written, and
/// the consumption left behind equals
/// `min(ssd_quota, space_quota / replication)`.
fn mixed_kind_case(
    space_quota_in_blocks: u64,
    ssd_quota_in_blocks: u64,
    file_len_in_blocks: u64,
    expect_space_error: bool,
) {
    let (_dir, engine) = test_engine();
    engine.mkdir("/t").unwrap();
    engine
        .set_storage_policy("/t", StoragePolicyId::ONE_SSD)
        .unwrap();
    engine
        .set_space_quota(
            "/t",
            QuotaValue::Limit(1 << 40),
            QuotaValue::Limit(space_quota_in_blocks * BLOCK_SIZE),
        )
        .unwrap();
    engine
        .set_type_quota(
            "/t",
            StorageType::Ssd,
            QuotaValue::Limit(ssd_quota_in_blocks * BLOCK_SIZE),
        )
        .unwrap();

    let err = engine
        .write_file("/t/f.data", file_len_in_blocks * BLOCK_SIZE, REPLICATION)
        .unwrap_err();
    if expect_space_error {
        assert!(
            matches!(err, QuotaError::StorageSpaceQuotaExceeded { .. }),
            "expected storage space error, got {err}"
        );
    } else {
        assert!(
            matches!(err, QuotaError::StorageTypeQuotaExceeded { .. }),
            "expected storage type error, got {err}"
        );
    }

    let expected =
        (ssd_quota_in_blocks.min(space_quota_in_blocks / REPLICATION as u64) * BLOCK_SIZE) as i64;
    assert_eq!(ssd_consumed(&engine, "/t"), expected);
    assert!(engine.verify_usage().unwrap().is_empty());
}

#[test]
fn mixed_kind_precedence_both_exceeded_reports_space() {
    // Space and SSD limits both run out on the same block; the traditional
    // check runs first.
    mixed_kind_case(4 * REPLICATION as u64, 4, 5, true);
}

#[test]
fn mixed_kind_precedence_only_ssd_exceeded() {
    mixed_kind_case(5 * REPLICATION as u64, 4, 5, false);
}

#[test]
fn mixed_kind_precedence_only_space_exceeded() {
    mixed_kind_case(4 * REPLICATION as u64, 5, 5, true);
}

#[test]
fn mixed_kind_precedence_across_depths_child_space_wins() {
    let (_dir, engine) = test_engine();
    engine.mkdir("/p").unwrap();
    engine.mkdir("/p/c").unwrap();
    engine
        .set_storage_policy("/p", StoragePolicyId::ONE_SSD)
        .unwrap();
    // The parent's type limit and the child's space limit are both smaller
    // than one block's worth of usage.
    engine
        .set_type_quota("/p", StorageType::Ssd, QuotaValue::Limit(BLOCK_SIZE / 2))
        .unwrap();
    engine
        .set_space_quota("/p/c", QuotaValue::Reset, QuotaValue::Limit(BLOCK_SIZE))
        .unwrap();

    // A single block violates both; the nearer ancestor (child, space
    // kind) is the one reported.
    let err = engine
        .write_file("/p/c/f.data", BLOCK_SIZE, REPLICATION)
        .unwrap_err();
    assert!(matches!(err, QuotaError::StorageSpaceQuotaExceeded { .. }));
}

#[test]
fn mixed_kind_precedence_across_depths_child_type_wins() {
    let (_dir, engine) = test_engine();
    engine.mkdir("/p").unwrap();
    engine.mkdir("/p/c").unwrap();
    engine
        .set_storage_policy("/p", StoragePolicyId::ONE_SSD)
        .unwrap();
    engine
        .set_space_quota("/p", QuotaValue::Reset, QuotaValue::Limit(BLOCK_SIZE))
        .unwrap();
    engine
        .set_type_quota("/p/c", StorageType::Ssd, QuotaValue::Limit(BLOCK_SIZE / 2))
        .unwrap();

    let err = engine
        .write_file("/p/c/f.data", BLOCK_SIZE, REPLICATION)
        .unwrap_err();
    assert!(matches!(err, QuotaError::StorageTypeQuotaExceeded { .. }));
}

#[test]
fn earlier_files_survive_later_rejection() {
    let (_dir, engine) = test_engine();
    engine.mkdir("/foo").unwrap();
    engine
        .set_storage_policy("/foo", StoragePolicyId::ONE_SSD)
        .unwrap();
    engine
        .set_type_quota("/foo", StorageType::Ssd, QuotaValue::Limit(BLOCK_SIZE * 2))
        .unwrap();

    engine
        .write_file("/foo/a.data", BLOCK_SIZE * 2, REPLICATION)
        .unwrap();
    let err = engine
        .write_file("/foo/b.data", BLOCK_SIZE, REPLICATION)
        .unwrap_err();
    assert!(err.is_quota_exceeded());

    // The committed first file is never rolled back by the later
    // rejection.
    assert!(engine.exists("/foo/a.data").unwrap());
    assert_eq!(engine.file_length("/foo/a.data").unwrap(), BLOCK_SIZE * 2);
    assert_eq!(ssd_consumed(&engine, "/foo"), (BLOCK_SIZE * 2) as i64);
}
