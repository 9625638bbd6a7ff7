//! Object store abstraction
//!
//! Controllers read and write every resource through [`ObjectStore`], so the
//! same reconcile code runs against the Kubernetes API ([`KubeStore`]) and an
//! in-memory fake that records every call ([`MemoryStore`]).

mod api;
mod memory;

use std::fmt::Debug;

use async_trait::async_trait;
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::{Error, Result};
use ocm_common::kube_utils::format_resource;

pub use api::KubeStore;
pub use memory::{Failure, MemoryStore, StoreAction, Verb};

/// Types that can be kept in an [`ObjectStore`]
pub trait StoreObject:
    Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned + Debug + Send + Sync + 'static
{
}

impl<T> StoreObject for T where
    T: Resource<DynamicType = ()>
        + Clone
        + Serialize
        + DeserializeOwned
        + Debug
        + Send
        + Sync
        + 'static
{
}

/// Typed access to one kind of object
///
/// `namespace` is `None` for cluster-scoped kinds and for listing across all
/// namespaces. Writes carry the object's `resourceVersion`; a stale one
/// fails with [`Error::Conflict`].
#[async_trait]
pub trait ObjectStore<K: StoreObject>: Send + Sync {
    /// Fetch one object; [`Error::NotFound`] when absent
    async fn get(&self, namespace: Option<&str>, name: &str) -> Result<K>;

    /// List objects in a namespace, or across the cluster
    async fn list(&self, namespace: Option<&str>) -> Result<Vec<K>>;

    /// Create the object; [`Error::Conflict`] when the name is taken
    async fn create(&self, obj: &K) -> Result<K>;

    /// Replace the object (status is not written)
    async fn update(&self, obj: &K) -> Result<K>;

    /// Write only the status of the object
    async fn update_status(&self, obj: &K) -> Result<K>;

    /// Delete by name; [`Error::NotFound`] when absent
    async fn delete(&self, namespace: Option<&str>, name: &str) -> Result<()>;
}

/// Fetch an object, mapping absence to `None`
pub async fn get_if_exists<K, S>(store: &S, namespace: Option<&str>, name: &str) -> Result<Option<K>>
where
    K: StoreObject,
    S: ObjectStore<K> + ?Sized,
{
    match store.get(namespace, name).await {
        Ok(obj) => Ok(Some(obj)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Delete an object, returning whether it existed
pub async fn delete_if_exists<K, S>(store: &S, namespace: Option<&str>, name: &str) -> Result<bool>
where
    K: StoreObject,
    S: ObjectStore<K> + ?Sized,
{
    match store.delete(namespace, name).await {
        Ok(()) => Ok(true),
        Err(e) if e.is_not_found() => Ok(false),
        Err(e) => Err(e),
    }
}

/// `Kind/namespace/name` of a typed object
pub fn resource_id<K: StoreObject>(obj: &K) -> String {
    format_resource(&K::kind(&()), obj.namespace().as_deref(), &obj.name_any())
}

/// `Kind/namespace/name` from parts
pub fn resource_id_of<K: StoreObject>(namespace: Option<&str>, name: &str) -> String {
    format_resource(&K::kind(&()), namespace, name)
}

/// Name of a desired object, which must be set
pub fn required_name<K: StoreObject>(obj: &K) -> Result<String> {
    obj.meta()
        .name
        .clone()
        .filter(|n| !n.is_empty())
        .ok_or_else(|| Error::invalid(K::kind(&()).to_string(), "metadata.name is required"))
}
