//! Quota counter and limit value types.
//!
//! [`QuotaCounts`] is used for signed consumption counters and for deltas;
//! [`QuotaLimits`] holds configured limits, with "no limit" represented as an
//! absent value rather than a numeric sentinel so that unlimited dimensions
//! cannot be confused with real limits in comparisons.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{QuotaError, StorageType};

/// Signed per-storage-type space counters.
///
/// Only quota-supporting storage types are tracked; transient media never
/// appears in the map.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeSpaces {
    counters: BTreeMap<StorageType, i64>,
}

impl TypeSpaces {
    /// Creates an empty (all-zero) counter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the counter for a storage type (zero if never touched).
    pub fn get(&self, t: StorageType) -> i64 {
        self.counters.get(&t).copied().unwrap_or(0)
    }

    /// Adds a signed value to the counter for a storage type.
    pub fn add(&mut self, t: StorageType, delta: i64) {
        if delta == 0 {
            return;
        }
        let entry = self.counters.entry(t).or_insert(0);
        *entry += delta;
    }

    /// Adds another counter set into this one, per type.
    pub fn add_counts(&mut self, other: &TypeSpaces) {
        for (t, v) in &other.counters {
            self.add(*t, *v);
        }
    }

    /// Subtracts another counter set from this one, per type.
    pub fn subtract_counts(&mut self, other: &TypeSpaces) {
        for (t, v) in &other.counters {
            self.add(*t, -*v);
        }
    }

    /// Iterates over (type, counter) pairs in canonical type order.
    pub fn iter(&self) -> impl Iterator<Item = (StorageType, i64)> + '_ {
        self.counters.iter().map(|(t, v)| (*t, *v))
    }

    /// Returns true if every counter is zero.
    pub fn is_zero(&self) -> bool {
        self.counters.values().all(|v| *v == 0)
    }

    /// Returns true if any counter is negative.
    pub fn any_negative(&self) -> bool {
        self.counters.values().any(|v| *v < 0)
    }
}

/// Namespace, storage space, and per-type space counters.
///
/// Used both as consumption state on a quota-bearing directory and as the
/// signed delta of a pending mutation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaCounts {
    /// Number of inodes in the subtree (files and directories).
    pub name_space: i64,
    /// Aggregate bytes multiplied by replication.
    pub storage_space: i64,
    /// Bytes attributable to each storage type.
    pub type_spaces: TypeSpaces,
}

impl QuotaCounts {
    /// Creates an all-zero counter set.
    pub fn zero() -> Self {
        Self::default()
    }

    /// Adds another set of counts into this one, per dimension.
    pub fn add(&mut self, other: &QuotaCounts) {
        self.name_space += other.name_space;
        self.storage_space += other.storage_space;
        self.type_spaces.add_counts(&other.type_spaces);
    }

    /// Subtracts another set of counts from this one, per dimension.
    pub fn subtract(&mut self, other: &QuotaCounts) {
        self.name_space -= other.name_space;
        self.storage_space -= other.storage_space;
        self.type_spaces.subtract_counts(&other.type_spaces);
    }

    /// Returns the negation of these counts.
    pub fn negated(&self) -> QuotaCounts {
        let mut out = QuotaCounts::zero();
        out.subtract(self);
        out
    }

    /// Returns true if all dimensions are zero.
    pub fn is_zero(&self) -> bool {
        self.name_space == 0 && self.storage_space == 0 && self.type_spaces.is_zero()
    }

    /// Returns true if any dimension is negative.
    pub fn any_negative(&self) -> bool {
        self.name_space < 0 || self.storage_space < 0 || self.type_spaces.any_negative()
    }
}

/// Configured limits for a quota-bearing directory.
///
/// An absent value means the dimension is unlimited. The persisted record
/// keeps the same shape, so unconfigured storage types load back as unset.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaLimits {
    /// Maximum number of inodes in the subtree, if limited.
    pub name_space: Option<u64>,
    /// Maximum aggregate bytes × replication in the subtree, if limited.
    pub storage_space: Option<u64>,
    /// Per-storage-type byte limits; a missing key means unlimited.
    pub type_spaces: BTreeMap<StorageType, u64>,
}

impl QuotaLimits {
    /// Creates limits with every dimension unset.
    pub fn unlimited() -> Self {
        Self::default()
    }

    /// Returns the limit for a storage type, if one is configured.
    pub fn type_limit(&self, t: StorageType) -> Option<u64> {
        self.type_spaces.get(&t).copied()
    }

    /// Returns true if no dimension carries a limit.
    pub fn is_unlimited(&self) -> bool {
        self.name_space.is_none() && self.storage_space.is_none() && self.type_spaces.is_empty()
    }
}

/// A quota limit value supplied through the configuration surface.
///
/// Zero is not a valid limit: an administrator clearing a quota must use
/// [`QuotaValue::Reset`], which restores the unlimited state.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuotaValue {
    /// Set the dimension to the given positive limit.
    Limit(u64),
    /// Clear the dimension back to unlimited.
    Reset,
}

impl QuotaValue {
    /// Validates the value, rejecting a zero limit.
    pub fn validate(self) -> Result<Self, QuotaError> {
        match self {
            QuotaValue::Limit(0) => Err(QuotaError::InvalidQuotaValue(
                "limit must be a positive integer (use reset to clear)".to_string(),
            )),
            other => Ok(other),
        }
    }

    /// Applies the value to an optional limit slot.
    pub fn apply(self, slot: &mut Option<u64>) {
        match self {
            QuotaValue::Limit(n) => *slot = Some(n),
            QuotaValue::Reset => *slot = None,
        }
    }
}
