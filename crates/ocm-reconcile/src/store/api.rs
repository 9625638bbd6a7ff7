//! [`ObjectStore`] backed by the Kubernetes API

use std::marker::PhantomData;

use async_trait::async_trait;
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams,
};
use kube::{Client, ResourceExt};
use tracing::debug;

use super::{required_name, resource_id, resource_id_of, ObjectStore, StoreObject};
use crate::{Error, Result};

/// Typed store over `Api<DynamicObject>`
///
/// Going through `DynamicObject` with an erased `ApiResource` lets one
/// implementation serve namespaced and cluster-scoped kinds alike.
pub struct KubeStore<K> {
    client: Client,
    resource: ApiResource,
    field_manager: String,
    _kind: PhantomData<fn() -> K>,
}

impl<K: StoreObject> KubeStore<K> {
    /// Create a store for `K`; status writes are attributed to `field_manager`
    pub fn new(client: Client, field_manager: &str) -> Self {
        Self {
            client,
            resource: ApiResource::erase::<K>(&()),
            field_manager: field_manager.to_string(),
            _kind: PhantomData,
        }
    }

    fn api(&self, namespace: Option<&str>) -> Api<DynamicObject> {
        match namespace {
            Some(ns) if !ns.is_empty() => {
                Api::namespaced_with(self.client.clone(), ns, &self.resource)
            }
            _ => Api::all_with(self.client.clone(), &self.resource),
        }
    }
}

fn to_dynamic<K: StoreObject>(obj: &K) -> Result<DynamicObject> {
    let value = serde_json::to_value(obj).map_err(|e| {
        ocm_common::Error::serialization_for_kind(K::kind(&()).to_string(), e.to_string())
    })?;
    serde_json::from_value(value).map_err(|e| {
        Error::from(ocm_common::Error::serialization_for_kind(
            K::kind(&()).to_string(),
            e.to_string(),
        ))
    })
}

fn from_dynamic<K: StoreObject>(obj: DynamicObject) -> Result<K> {
    let value = serde_json::to_value(obj).map_err(|e| {
        ocm_common::Error::serialization_for_kind(K::kind(&()).to_string(), e.to_string())
    })?;
    serde_json::from_value(value).map_err(|e| {
        Error::from(ocm_common::Error::serialization_for_kind(
            K::kind(&()).to_string(),
            e.to_string(),
        ))
    })
}

#[async_trait]
impl<K: StoreObject> ObjectStore<K> for KubeStore<K> {
    async fn get(&self, namespace: Option<&str>, name: &str) -> Result<K> {
        let obj = self
            .api(namespace)
            .get(name)
            .await
            .map_err(|e| Error::from_kube(resource_id_of::<K>(namespace, name), e))?;
        from_dynamic(obj)
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<K>> {
        let list = self
            .api(namespace)
            .list(&ListParams::default())
            .await
            .map_err(|e| Error::from_kube(resource_id_of::<K>(namespace, "*"), e))?;
        list.items.into_iter().map(from_dynamic).collect()
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let id = resource_id(obj);
        let data = to_dynamic(obj)?;
        let created = self
            .api(obj.namespace().as_deref())
            .create(&PostParams::default(), &data)
            .await
            .map_err(|e| Error::from_kube(&id, e))?;
        debug!(resource = %id, "created");
        from_dynamic(created)
    }

    async fn update(&self, obj: &K) -> Result<K> {
        let id = resource_id(obj);
        let name = required_name(obj)?;
        let data = to_dynamic(obj)?;
        let updated = self
            .api(obj.namespace().as_deref())
            .replace(&name, &PostParams::default(), &data)
            .await
            .map_err(|e| Error::from_kube(&id, e))?;
        debug!(resource = %id, "updated");
        from_dynamic(updated)
    }

    async fn update_status(&self, obj: &K) -> Result<K> {
        let id = resource_id(obj);
        let name = required_name(obj)?;
        let status = serde_json::to_value(obj)
            .map_err(ocm_common::Error::from)?
            .get("status")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        // resourceVersion in a merge patch makes the write conditional
        let patch = serde_json::json!({
            "metadata": { "resourceVersion": obj.resource_version() },
            "status": status,
        });
        let updated = self
            .api(obj.namespace().as_deref())
            .patch_status(
                &name,
                &PatchParams::apply(&self.field_manager),
                &Patch::Merge(&patch),
            )
            .await
            .map_err(|e| Error::from_kube(&id, e))?;
        debug!(resource = %id, "status updated");
        from_dynamic(updated)
    }

    async fn delete(&self, namespace: Option<&str>, name: &str) -> Result<()> {
        let id = resource_id_of::<K>(namespace, name);
        self.api(namespace)
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| Error::from_kube(&id, e))?;
        debug!(resource = %id, "deleted");
        Ok(())
    }
}
