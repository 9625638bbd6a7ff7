//! Kubernetes helpers shared by the controllers

use std::path::Path;
use std::time::Duration;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config, Resource, ResourceExt};

use crate::Error;

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a kube client from an optional kubeconfig path, inferring the
/// in-cluster or `KUBECONFIG` configuration otherwise
pub async fn create_client(kubeconfig: Option<&Path>) -> Result<Client, Error> {
    let mut config = match kubeconfig {
        Some(path) => {
            let kubeconfig = Kubeconfig::read_from(path).map_err(|e| {
                Error::internal_with_context(
                    "create_client",
                    format!("failed to read kubeconfig: {}", e),
                )
            })?;
            Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .map_err(|e| {
                    Error::internal_with_context(
                        "create_client",
                        format!("failed to load kubeconfig: {}", e),
                    )
                })?
        }
        None => Config::infer().await.map_err(|e| {
            Error::internal_with_context("create_client", format!("failed to infer config: {}", e))
        })?,
    };
    config.connect_timeout = Some(DEFAULT_CONNECT_TIMEOUT);
    config.read_timeout = Some(DEFAULT_READ_TIMEOUT);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

/// Server URL of the first cluster in a serialized kubeconfig
///
/// Returns `Ok(None)` when the kubeconfig parses but names no cluster server.
pub fn kubeconfig_server(kubeconfig: &[u8]) -> Result<Option<String>, Error> {
    let text = std::str::from_utf8(kubeconfig)
        .map_err(|e| Error::serialization_for_kind("Kubeconfig", e.to_string()))?;
    let parsed = Kubeconfig::from_yaml(text)
        .map_err(|e| Error::serialization_for_kind("Kubeconfig", e.to_string()))?;
    Ok(parsed
        .clusters
        .into_iter()
        .find_map(|named| named.cluster.and_then(|c| c.server)))
}

/// Human-readable `Kind/namespace/name` (or `Kind/name` when cluster-scoped)
pub fn format_resource(kind: &str, namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) if !ns.is_empty() => format!("{}/{}/{}", kind, ns, name),
        _ => format!("{}/{}", kind, name),
    }
}

/// Whether a kube error is an API 404
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(e) if e.code == 404)
}

/// Whether a kube error is an API 409 (resourceVersion or name conflict)
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(e) if e.code == 409)
}

/// Whether the object carries the given finalizer
pub fn has_finalizer<K: Resource>(obj: &K, finalizer: &str) -> bool {
    obj.finalizers().iter().any(|f| f == finalizer)
}

/// Whether deletion of the object has been requested
pub fn is_deleting<K: Resource>(obj: &K) -> bool {
    obj.meta().deletion_timestamp.is_some()
}

/// Compute a deterministic hash of the input string, returning a 16-char hex digest.
///
/// Uses truncated SHA-256 so the value is stable across toolchains and can be
/// persisted in annotations.
pub fn deterministic_hash(input: &str) -> String {
    use aws_lc_rs::digest;
    let hash = digest::digest(&digest::SHA256, input.as_bytes());
    hash.as_ref()[..8]
        .iter()
        .fold(String::with_capacity(16), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
            s
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::Deployment;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
    use kube::error::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "test".to_string(),
            reason: "test".to_string(),
            code,
        })
    }

    #[test]
    fn format_resource_omits_empty_namespace() {
        assert_eq!(
            format_resource("Deployment", Some("agent"), "work"),
            "Deployment/agent/work"
        );
        assert_eq!(
            format_resource("StorageVersionMigration", None, "sets"),
            "StorageVersionMigration/sets"
        );
        assert_eq!(format_resource("Node", Some(""), "n1"), "Node/n1");
    }

    #[test]
    fn status_code_helpers() {
        assert!(is_not_found(&api_error(404)));
        assert!(!is_not_found(&api_error(409)));
        assert!(is_conflict(&api_error(409)));
        assert!(!is_conflict(&api_error(500)));
    }

    #[test]
    fn deterministic_hash_is_stable_and_short() {
        let a = deterministic_hash("spec");
        assert_eq!(a, deterministic_hash("spec"));
        assert_ne!(a, deterministic_hash("spec2"));
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn finalizer_and_deletion_helpers() {
        let mut deploy = Deployment {
            metadata: ObjectMeta {
                name: Some("d".to_string()),
                finalizers: Some(vec!["example.io/cleanup".to_string()]),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(has_finalizer(&deploy, "example.io/cleanup"));
        assert!(!has_finalizer(&deploy, "other"));
        assert!(!is_deleting(&deploy));

        deploy.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        assert!(is_deleting(&deploy));
    }

    #[test]
    fn kubeconfig_server_reads_first_cluster() {
        let kubeconfig = br#"
apiVersion: v1
kind: Config
clusters:
- name: hub
  cluster:
    server: https://hub.example.com:6443
contexts: []
users: []
"#;
        assert_eq!(
            kubeconfig_server(kubeconfig).unwrap().as_deref(),
            Some("https://hub.example.com:6443")
        );
        assert!(kubeconfig_server(b"::not yaml::").is_err());
    }
}
