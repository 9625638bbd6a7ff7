//! ClusterManager CRD: the hub control plane

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, GenerationStatus};

/// ClusterManager declares the hub components managing a fleet.
///
/// Example:
/// ```yaml
/// apiVersion: operator.open-cluster-management.io/v1
/// kind: ClusterManager
/// metadata:
///   name: cluster-manager
/// spec:
///   registrationImagePullSpec: quay.io/open-cluster-management/registration
///   workImagePullSpec: quay.io/open-cluster-management/work
///   placementImagePullSpec: quay.io/open-cluster-management/placement
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "operator.open-cluster-management.io",
    version = "v1",
    kind = "ClusterManager",
    plural = "clustermanagers",
    status = "ClusterManagerStatus",
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterManagerSpec {
    /// Image of the hub registration controller
    #[serde(default)]
    pub registration_image_pull_spec: String,

    /// Image of the hub work webhook
    #[serde(default)]
    pub work_image_pull_spec: String,

    /// Image of the placement controller
    #[serde(default)]
    pub placement_image_pull_spec: String,
}

/// Status written by the cluster-manager controllers
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterManagerStatus {
    /// Last spec generation the controller reconciled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// Health conditions, one per type
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Generations of the subordinate resources the controller produced
    #[serde(default)]
    pub generations: Vec<GenerationStatus>,
}

impl ClusterManager {
    /// Conditions from status, empty when no status was written yet
    pub fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }
}
