//! StorageVersionMigration CRD from the kube-storage-version-migrator
//!
//! The operator does not own this CRD. It only creates migrations when the
//! CRD `storageversionmigrations.migration.k8s.io` is installed.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Name of the CRD that must exist before migrations are created
pub const STORAGE_VERSION_MIGRATION_CRD: &str = "storageversionmigrations.migration.k8s.io";

/// Requests that every stored object of a resource is rewritten at the
/// current storage version.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "migration.k8s.io",
    version = "v1alpha1",
    kind = "StorageVersionMigration",
    plural = "storageversionmigrations",
    status = "StorageVersionMigrationStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct StorageVersionMigrationSpec {
    /// Resource being migrated
    pub resource: GroupVersionResource,

    /// Token used by the migrator to resume a partial migration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub continue_token: Option<String>,
}

/// Group, version and plural resource name
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub struct GroupVersionResource {
    /// API group
    #[serde(default)]
    pub group: String,
    /// API version
    #[serde(default)]
    pub version: String,
    /// Plural resource name
    #[serde(default)]
    pub resource: String,
}

/// Progress reported by the migrator
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StorageVersionMigrationStatus {
    /// Migration conditions (Running, Succeeded, Failed)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<MigrationCondition>,
}

/// Condition in the migrator's own shape
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MigrationCondition {
    /// Condition type
    #[serde(rename = "type")]
    pub type_: String,
    /// "True", "False" or "Unknown"
    pub status: String,
    /// Last time the condition was updated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_update_time: Option<String>,
    /// Machine-readable reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Human-readable message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
