//! Generation tracking for subordinate resources
//!
//! After each successful apply the controller records the
//! `metadata.generation` the store reported. A later mismatch between the
//! recorded and the observed generation means someone else changed the
//! object, which generation-gated kinds treat as drift.

use dashmap::DashMap;
use ocm_common::crd::GenerationStatus;

use crate::store::StoreObject;

/// Identity of a tracked subordinate
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GenerationKey {
    /// API group
    pub group: String,
    /// API version
    pub version: String,
    /// Plural resource name
    pub resource: String,
    /// Namespace ("" for cluster-scoped)
    pub namespace: String,
    /// Object name
    pub name: String,
}

impl GenerationKey {
    /// Key for an object of kind `K`
    pub fn of<K: StoreObject>(namespace: Option<&str>, name: &str) -> Self {
        Self {
            group: K::group(&()).to_string(),
            version: K::version(&()).to_string(),
            resource: K::plural(&()).to_string(),
            namespace: namespace.unwrap_or_default().to_string(),
            name: name.to_string(),
        }
    }

    fn from_status(status: &GenerationStatus) -> Self {
        Self {
            group: status.group.clone(),
            version: status.version.clone(),
            resource: status.resource.clone(),
            namespace: status.namespace.clone(),
            name: status.name.clone(),
        }
    }

    fn to_status(&self, last_generation: i64) -> GenerationStatus {
        GenerationStatus {
            group: self.group.clone(),
            version: self.version.clone(),
            resource: self.resource.clone(),
            namespace: self.namespace.clone(),
            name: self.name.clone(),
            last_generation,
        }
    }
}

/// Last generation produced per subordinate
///
/// One tracker per controller instance; entries are updated concurrently by
/// reconciles of different owners.
#[derive(Debug, Default)]
pub struct GenerationTracker {
    records: DashMap<GenerationKey, i64>,
}

impl GenerationTracker {
    /// Create an empty tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the generation produced by the last apply
    pub fn record(&self, key: GenerationKey, generation: i64) {
        self.records.insert(key, generation);
    }

    /// Last recorded generation, if any
    pub fn observe(&self, key: &GenerationKey) -> Option<i64> {
        self.records.get(key).map(|g| *g)
    }

    /// Drop the record of a removed subordinate
    pub fn forget(&self, key: &GenerationKey) {
        self.records.remove(key);
    }

    /// Seed records persisted in an owner's status
    ///
    /// Only keys without a record are seeded, so a restarted controller
    /// resumes drift detection without overriding fresher in-memory state.
    pub fn hydrate(&self, persisted: &[GenerationStatus]) {
        for status in persisted {
            self.records
                .entry(GenerationKey::from_status(status))
                .or_insert(status.last_generation);
        }
    }

    /// Status entries for the given keys, skipping untracked ones
    pub fn records_for<'a>(
        &self,
        keys: impl IntoIterator<Item = &'a GenerationKey>,
    ) -> Vec<GenerationStatus> {
        keys.into_iter()
            .filter_map(|key| self.observe(key).map(|g| key.to_status(g)))
            .collect()
    }
}
