//! Hub connection secrets in the agent namespace
//!
//! The bootstrap secret is provided by the user and lets the registration
//! agent register with the hub. The registration agent then writes the hub
//! kubeconfig secret, including a client certificate with an expiry.

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Secret;
use kube::ResourceExt;
use ocm_common::kube_utils::kubeconfig_server;
use x509_parser::pem::parse_x509_pem;

use crate::error::{KlusterletError, Result};

/// Secret holding the bootstrap kubeconfig
pub const BOOTSTRAP_HUB_KUBECONFIG: &str = "bootstrap-hub-kubeconfig";
/// Secret holding the kubeconfig the agents use against the hub
pub const HUB_KUBECONFIG_SECRET: &str = "hub-kubeconfig-secret";
/// Data key of a serialized kubeconfig
pub const KUBECONFIG_KEY: &str = "kubeconfig";
/// Data key of the hub client certificate
pub const TLS_CERT_KEY: &str = "tls.crt";

/// Non-empty value of `key` in the secret's data
pub fn secret_data<'a>(secret: &'a Secret, key: &str) -> Option<&'a [u8]> {
    secret
        .data
        .as_ref()
        .and_then(|data| data.get(key))
        .map(|bytes| bytes.0.as_slice())
        .filter(|bytes| !bytes.is_empty())
}

fn secret_id(secret: &Secret) -> String {
    format!(
        "{}/{}",
        secret.namespace().unwrap_or_default(),
        secret.name_any()
    )
}

/// Server URL of the kubeconfig stored in the secret, if any
pub fn kubeconfig_server_of(secret: &Secret) -> Result<Option<String>> {
    match secret_data(secret, KUBECONFIG_KEY) {
        Some(kubeconfig) => Ok(kubeconfig_server(kubeconfig)?),
        None => Ok(None),
    }
}

/// Expiry of the client certificate stored in the secret, if any
pub fn client_certificate_expiry(secret: &Secret) -> Result<Option<DateTime<Utc>>> {
    let Some(pem) = secret_data(secret, TLS_CERT_KEY) else {
        return Ok(None);
    };
    certificate_not_after(pem)
        .map(Some)
        .map_err(|message| KlusterletError::certificate(secret_id(secret), message))
}

/// `notAfter` of the first certificate in a PEM bundle
pub fn certificate_not_after(pem: &[u8]) -> std::result::Result<DateTime<Utc>, String> {
    let (_, pem) = parse_x509_pem(pem).map_err(|e| format!("failed to parse PEM: {e}"))?;
    let (_, cert) = x509_parser::parse_x509_certificate(&pem.contents)
        .map_err(|e| format!("failed to parse certificate: {e}"))?;
    let timestamp = cert.validity().not_after.timestamp();
    DateTime::from_timestamp(timestamp, 0)
        .ok_or_else(|| format!("notAfter {timestamp} is out of range"))
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn empty_values_count_as_missing() {
        let secret = secret("agents", BOOTSTRAP_HUB_KUBECONFIG, &[(KUBECONFIG_KEY, vec![])]);
        assert!(secret_data(&secret, KUBECONFIG_KEY).is_none());
        assert_eq!(kubeconfig_server_of(&secret).unwrap(), None);
    }

    #[test]
    fn reads_kubeconfig_server() {
        let secret = secret(
            "agents",
            HUB_KUBECONFIG_SECRET,
            &[(KUBECONFIG_KEY, kubeconfig("https://hub.example.com:6443"))],
        );
        assert_eq!(
            kubeconfig_server_of(&secret).unwrap().as_deref(),
            Some("https://hub.example.com:6443")
        );
    }

    #[test]
    fn reads_client_certificate_expiry() {
        let secret = secret(
            "agents",
            HUB_KUBECONFIG_SECRET,
            &[(TLS_CERT_KEY, certificate(time::Duration::hours(2)))],
        );
        let expiry = client_certificate_expiry(&secret).unwrap().unwrap();
        let remaining = expiry - Utc::now();
        assert!(remaining > chrono::TimeDelta::minutes(110));
        assert!(remaining <= chrono::TimeDelta::minutes(120));
    }

    #[test]
    fn garbage_certificate_is_an_error() {
        let secret = secret(
            "agents",
            HUB_KUBECONFIG_SECRET,
            &[(TLS_CERT_KEY, b"not a certificate".to_vec())],
        );
        let err = client_certificate_expiry(&secret).unwrap_err();
        assert!(err.to_string().contains("agents/hub-kubeconfig-secret"));
    }

    #[test]
    fn missing_certificate_is_not_an_error() {
        let secret = secret("agents", HUB_KUBECONFIG_SECRET, &[]);
        assert_eq!(client_certificate_expiry(&secret).unwrap(), None);
    }
}
