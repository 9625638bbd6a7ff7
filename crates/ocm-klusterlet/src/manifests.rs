//! Agent manifests and the values they are rendered with

use kube::ResourceExt;
use ocm_common::crd::Klusterlet;
use ocm_reconcile::manifest::ManifestTemplates;
use serde::Serialize;

use crate::secrets::{BOOTSTRAP_HUB_KUBECONFIG, HUB_KUBECONFIG_SECRET};

/// Namespace the agents run in
pub const NAMESPACE_ARTIFACT: &str = "klusterlet/namespace.yaml";
/// Registration agent deployment
pub const REGISTRATION_ARTIFACT: &str = "klusterlet/registration-deployment.yaml";
/// Work agent deployment
pub const WORK_ARTIFACT: &str = "klusterlet/work-deployment.yaml";

/// Everything applied for a Klusterlet, namespace first
pub const AGENT_ARTIFACTS: &[&str] = &[NAMESPACE_ARTIFACT, REGISTRATION_ARTIFACT, WORK_ARTIFACT];
/// The agent deployments, removed when the Klusterlet is deleted
pub const DEPLOYMENT_ARTIFACTS: &[&str] = &[REGISTRATION_ARTIFACT, WORK_ARTIFACT];

const SOURCES: &[(&str, &str)] = &[
    (
        NAMESPACE_ARTIFACT,
        include_str!("../manifests/klusterlet/namespace.yaml"),
    ),
    (
        REGISTRATION_ARTIFACT,
        include_str!("../manifests/klusterlet/registration-deployment.yaml"),
    ),
    (
        WORK_ARTIFACT,
        include_str!("../manifests/klusterlet/work-deployment.yaml"),
    ),
];

/// Compile the embedded klusterlet manifests
pub fn templates() -> ocm_reconcile::Result<ManifestTemplates> {
    ManifestTemplates::new(SOURCES)
}

/// Deployment name of the registration agent
pub fn registration_agent(klusterlet: &str) -> String {
    format!("{klusterlet}-registration-agent")
}

/// Deployment name of the work agent
pub fn work_agent(klusterlet: &str) -> String {
    format!("{klusterlet}-work-agent")
}

/// Template values derived from a Klusterlet
#[derive(Clone, Debug, Serialize)]
pub struct AgentValues {
    klusterlet_name: String,
    agent_namespace: String,
    registration_image: String,
    work_image: String,
    cluster_name: String,
    external_server_urls: Vec<String>,
    bootstrap_secret: &'static str,
    hub_kubeconfig_secret: &'static str,
    replicas: i32,
}

impl AgentValues {
    /// Values for `klusterlet` running `replicas` copies of each agent
    pub fn new(klusterlet: &Klusterlet, replicas: i32) -> Self {
        let spec = &klusterlet.spec;
        Self {
            klusterlet_name: klusterlet.name_any(),
            agent_namespace: spec.agent_namespace().to_string(),
            registration_image: spec.registration_image_pull_spec.clone(),
            work_image: spec.work_image_pull_spec.clone(),
            cluster_name: spec.cluster_name.clone().unwrap_or_default(),
            external_server_urls: spec
                .external_server_urls
                .iter()
                .map(|u| u.url.clone())
                .collect(),
            bootstrap_secret: BOOTSTRAP_HUB_KUBECONFIG,
            hub_kubeconfig_secret: HUB_KUBECONFIG_SECRET,
            replicas,
        }
    }
}
