//! Klusterlet CRD: the agent side of a managed cluster
//!
//! A Klusterlet declares the registration and work agents that connect a
//! managed cluster to its hub. The operator renders both agents as
//! Deployments in `spec.namespace` and reports their health as conditions.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::types::{Condition, GenerationStatus};
use crate::DEFAULT_AGENT_NAMESPACE;

/// Klusterlet declares the agents installed on a managed cluster.
///
/// Example:
/// ```yaml
/// apiVersion: operator.open-cluster-management.io/v1
/// kind: Klusterlet
/// metadata:
///   name: klusterlet
/// spec:
///   namespace: open-cluster-management-agent
///   registrationImagePullSpec: quay.io/open-cluster-management/registration
///   workImagePullSpec: quay.io/open-cluster-management/work
///   clusterName: cluster1
/// ```
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "operator.open-cluster-management.io",
    version = "v1",
    kind = "Klusterlet",
    plural = "klusterlets",
    status = "KlusterletStatus",
    printcolumn = r#"{"name":"Namespace","type":"string","jsonPath":".spec.namespace"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct KlusterletSpec {
    /// Namespace the agents are deployed into
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Image of the registration agent
    pub registration_image_pull_spec: String,

    /// Image of the work agent
    pub work_image_pull_spec: String,

    /// Name this cluster registers with on the hub
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,

    /// URLs the hub can reach this cluster's API server on
    #[serde(
        rename = "externalServerURLs",
        default,
        skip_serializing_if = "Vec::is_empty"
    )]
    pub external_server_urls: Vec<ServerUrl>,
}

/// API server URL advertised to the hub
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerUrl {
    /// Server URL
    pub url: String,

    /// Base64 CA bundle for the URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_bundle: Option<String>,
}

/// Status written by the klusterlet controllers
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct KlusterletStatus {
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

impl KlusterletSpec {
    /// Namespace the agents run in, falling back to the default agent namespace
    pub fn agent_namespace(&self) -> &str {
        match self.namespace.as_deref() {
            Some(ns) if !ns.is_empty() => ns,
            _ => DEFAULT_AGENT_NAMESPACE,
        }
    }
}

impl Klusterlet {
    /// Conditions from status, empty when no status was written yet
    pub fn conditions(&self) -> &[Condition] {
        self.status
            .as_ref()
            .map(|s| s.conditions.as_slice())
            .unwrap_or_default()
    }
}
