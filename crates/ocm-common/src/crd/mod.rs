//! Custom Resource Definitions used by the OCM operators

mod cluster_manager;
mod klusterlet;
mod migration;
mod types;

pub use cluster_manager::{ClusterManager, ClusterManagerSpec, ClusterManagerStatus};
pub use klusterlet::{Klusterlet, KlusterletSpec, KlusterletStatus, ServerUrl};
pub use migration::{
    GroupVersionResource, MigrationCondition, StorageVersionMigration,
    StorageVersionMigrationSpec, StorageVersionMigrationStatus, STORAGE_VERSION_MIGRATION_CRD,
};
pub use types::{
    find_condition, is_condition_true, Condition, ConditionStatus, GenerationStatus,
    CONDITION_APPLIED, CONDITION_AVAILABLE,
};
