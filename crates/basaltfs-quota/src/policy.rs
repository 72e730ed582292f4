//! Storage policy resolution.
//!
//! The engine never decides which storage types a block occupies; it asks a
//! [`StoragePolicyResolver`]. [`StoragePolicySuite`] is the built-in table
//! used in production and tests; deployments with a custom block manager can
//! plug in their own resolver at engine construction time.

use std::collections::BTreeMap;

use crate::types::{QuotaError, StoragePolicyId, StorageType};

/// Maps a storage policy to the storage types its replicas occupy.
pub trait StoragePolicyResolver: Send + Sync {
    /// Resolves a policy to one storage type per replica, in replica order.
    fn resolve(
        &self,
        policy: StoragePolicyId,
        replication: u16,
    ) -> Result<Vec<StorageType>, QuotaError>;
}

/// A named storage policy: an ordered preference list of storage types.
///
/// Replica `i` is placed on `storage_types[i]`; once the list is exhausted
/// the last type repeats for the remaining replicas.
#[derive(Clone, Debug)]
pub struct StoragePolicy {
    /// Policy identifier.
    pub id: StoragePolicyId,
    /// Human-readable policy name.
    pub name: &'static str,
    /// Preferred storage types, in replica order.
    pub storage_types: Vec<StorageType>,
}

impl StoragePolicy {
    /// Chooses the storage type for each of `replication` replicas.
    pub fn choose_storage_types(&self, replication: u16) -> Vec<StorageType> {
        let mut chosen = Vec::with_capacity(replication as usize);
        for i in 0..replication as usize {
            let idx = i.min(self.storage_types.len() - 1);
            chosen.push(self.storage_types[idx]);
        }
        chosen
    }
}

/// The built-in policy table.
pub struct StoragePolicySuite {
    policies: BTreeMap<StoragePolicyId, StoragePolicy>,
}

impl StoragePolicySuite {
    /// Creates the suite with the standard policies (HOT, WARM, COLD,
    /// ONE_SSD, ALL_SSD).
    pub fn new() -> Self {
        let mut policies = BTreeMap::new();
        for policy in [
            StoragePolicy {
                id: StoragePolicyId::HOT,
                name: "HOT",
                storage_types: vec![StorageType::Disk],
            },
            StoragePolicy {
                id: StoragePolicyId::WARM,
                name: "WARM",
                storage_types: vec![StorageType::Disk, StorageType::Archive],
            },
            StoragePolicy {
                id: StoragePolicyId::COLD,
                name: "COLD",
                storage_types: vec![StorageType::Archive],
            },
            StoragePolicy {
                id: StoragePolicyId::ONE_SSD,
                name: "ONE_SSD",
                storage_types: vec![StorageType::Ssd, StorageType::Disk],
            },
            StoragePolicy {
                id: StoragePolicyId::ALL_SSD,
                name: "ALL_SSD",
                storage_types: vec![StorageType::Ssd],
            },
        ] {
            policies.insert(policy.id, policy);
        }
        Self { policies }
    }

    /// Looks up a policy by id.
    pub fn get(&self, id: StoragePolicyId) -> Result<&StoragePolicy, QuotaError> {
        self.policies.get(&id).ok_or(QuotaError::PolicyNotFound(id))
    }

    /// Returns true if the suite knows the policy.
    pub fn contains(&self, id: StoragePolicyId) -> bool {
        self.policies.contains_key(&id)
    }
}

impl Default for StoragePolicySuite {
    fn default() -> Self {
        Self::new()
    }
}

impl StoragePolicyResolver for StoragePolicySuite {
    fn resolve(
        &self,
        policy: StoragePolicyId,
        replication: u16,
    ) -> Result<Vec<StorageType>, QuotaError> {
        Ok(self.get(policy)?.choose_storage_types(replication))
    }
}
