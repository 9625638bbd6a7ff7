//! Typed decoding of rendered manifests

use std::collections::HashMap;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Namespace;
use kube::{Resource, ResourceExt};
use ocm_common::crd::StorageVersionMigration;
use serde::Deserialize;

use crate::{Error, Result};

/// A decoded desired object, one variant per kind the controllers manage
#[derive(Clone, Debug)]
pub enum DesiredObject {
    /// `v1/Namespace`
    Namespace(Box<Namespace>),
    /// `apps/v1/Deployment`
    Deployment(Box<Deployment>),
    /// `migration.k8s.io/v1alpha1/StorageVersionMigration`
    StorageVersionMigration(Box<StorageVersionMigration>),
}

impl DesiredObject {
    /// Kind name
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Namespace(_) => "Namespace",
            Self::Deployment(_) => "Deployment",
            Self::StorageVersionMigration(_) => "StorageVersionMigration",
        }
    }

    /// Object name
    pub fn name(&self) -> String {
        match self {
            Self::Namespace(o) => o.name_any(),
            Self::Deployment(o) => o.name_any(),
            Self::StorageVersionMigration(o) => o.name_any(),
        }
    }
}

type Decoder = fn(serde_json::Value) -> serde_json::Result<DesiredObject>;

fn decode_namespace(value: serde_json::Value) -> serde_json::Result<DesiredObject> {
    serde_json::from_value(value).map(|o| DesiredObject::Namespace(Box::new(o)))
}

fn decode_deployment(value: serde_json::Value) -> serde_json::Result<DesiredObject> {
    serde_json::from_value(value).map(|o| DesiredObject::Deployment(Box::new(o)))
}

fn decode_migration(value: serde_json::Value) -> serde_json::Result<DesiredObject> {
    serde_json::from_value(value).map(|o| DesiredObject::StorageVersionMigration(Box::new(o)))
}

/// Maps `apiVersion` + `kind` to a typed decoder
///
/// Constructed once at startup and shared by reference.
#[derive(Default)]
pub struct SchemeRegistry {
    decoders: HashMap<(String, String), Decoder>,
}

impl SchemeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry knowing every [`DesiredObject`] kind
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register::<Namespace>(decode_namespace);
        registry.register::<Deployment>(decode_deployment);
        registry.register::<StorageVersionMigration>(decode_migration);
        registry
    }

    /// Register the decoder for kind `K`
    pub fn register<K: Resource<DynamicType = ()>>(&mut self, decoder: Decoder) {
        self.decoders.insert(
            (K::api_version(&()).to_string(), K::kind(&()).to_string()),
            decoder,
        );
    }

    /// Whether `apiVersion`/`kind` is known
    pub fn recognizes(&self, api_version: &str, kind: &str) -> bool {
        self.decoders
            .contains_key(&(api_version.to_string(), kind.to_string()))
    }

    /// Decode `bytes` rendered for `artifact` into exactly one object
    ///
    /// Multi-document payloads and unregistered kinds are decode errors.
    pub fn decode(&self, artifact: &str, bytes: &[u8]) -> Result<DesiredObject> {
        let mut documents = Vec::new();
        for document in serde_yaml::Deserializer::from_slice(bytes) {
            let value = serde_json::Value::deserialize(document)
                .map_err(|e| Error::decode(artifact, e.to_string()))?;
            if !value.is_null() {
                documents.push(value);
            }
        }
        if documents.len() != 1 {
            return Err(Error::decode(
                artifact,
                format!("expected exactly one object, found {}", documents.len()),
            ));
        }
        let value = documents.remove(0);

        let field = |name: &str| {
            value
                .get(name)
                .and_then(serde_json::Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| Error::decode(artifact, format!("missing {name}")))
        };
        let api_version = field("apiVersion")?;
        let kind = field("kind")?;

        let decoder = self
            .decoders
            .get(&(api_version.clone(), kind.clone()))
            .ok_or_else(|| {
                Error::decode(artifact, format!("unrecognized kind {api_version}/{kind}"))
            })?;
        decoder(value).map_err(|e| Error::decode(artifact, e.to_string()))
    }
}
