//! In-memory [`ObjectStore`] for tests
//!
//! Behaves like a minimal API server for one kind: resourceVersions are
//! checked on writes, `metadata.generation` moves when anything outside
//! metadata and status changes, status is only written through
//! `update_status`, and deleting an object with finalizers marks it as
//! deleting instead of removing it. Every call is recorded in order, and
//! failures can be injected per verb and name.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use kube::ResourceExt;
use parking_lot::Mutex;

use super::{required_name, resource_id_of, ObjectStore, StoreObject};
use crate::{Error, Result};

/// Store operation kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Verb {
    /// Fetch by name
    Get,
    /// List a namespace or the cluster
    List,
    /// Create
    Create,
    /// Replace
    Update,
    /// Status write
    UpdateStatus,
    /// Delete by name
    Delete,
}

impl Verb {
    /// Lower-case verb name as used by Kubernetes audit logs
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::List => "list",
            Self::Create => "create",
            Self::Update => "update",
            Self::UpdateStatus => "update-status",
            Self::Delete => "delete",
        }
    }

    /// Whether the verb changes stored state
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Self::Get | Self::List)
    }
}

/// One recorded call
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoreAction {
    /// What was attempted
    pub verb: Verb,
    /// Namespace passed with the call
    pub namespace: Option<String>,
    /// Object name ("" for list)
    pub name: String,
}

/// Failure to inject into a call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Failure {
    /// Fail with [`Error::Conflict`]
    Conflict,
    /// Fail with [`Error::Unavailable`]
    Unavailable,
    /// Fail with [`Error::NotFound`]
    NotFound,
}

struct Injected {
    verb: Verb,
    name: Option<String>,
    failure: Failure,
    remaining: Option<usize>,
}

struct State<K> {
    objects: BTreeMap<(String, String), K>,
    actions: Vec<StoreAction>,
    injected: Vec<Injected>,
    next_version: u64,
}

impl<K> State<K> {
    fn bump(&mut self) -> String {
        self.next_version += 1;
        self.next_version.to_string()
    }

    fn record(&mut self, verb: Verb, namespace: Option<&str>, name: &str) {
        self.actions.push(StoreAction {
            verb,
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
        });
    }

    fn take_failure(&mut self, verb: Verb, name: &str) -> Option<Failure> {
        let idx = self.injected.iter().position(|i| {
            i.verb == verb && i.name.as_deref().is_none_or(|n| n == name)
        })?;
        let failure = self.injected[idx].failure;
        if let Some(remaining) = self.injected[idx].remaining.as_mut() {
            *remaining -= 1;
            if *remaining == 0 {
                self.injected.remove(idx);
            }
        }
        Some(failure)
    }
}

/// In-memory store for one kind
pub struct MemoryStore<K> {
    state: Mutex<State<K>>,
}

impl<K: StoreObject> Default for MemoryStore<K> {
    fn default() -> Self {
        Self::new()
    }
}

fn key(namespace: Option<&str>, name: &str) -> (String, String) {
    (namespace.unwrap_or_default().to_string(), name.to_string())
}

fn key_of<K: StoreObject>(obj: &K) -> (String, String) {
    (obj.namespace().unwrap_or_default(), obj.name_any())
}

fn injected_error<K: StoreObject>(failure: Failure, namespace: Option<&str>, name: &str) -> Error {
    let id = resource_id_of::<K>(namespace, name);
    match failure {
        Failure::Conflict => Error::conflict(id, "injected conflict"),
        Failure::Unavailable => Error::unavailable(id, "injected failure"),
        Failure::NotFound => Error::not_found(id),
    }
}

fn to_value<K: StoreObject>(obj: &K) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(obj).map_err(ocm_common::Error::from)?)
}

fn from_value<K: StoreObject>(value: serde_json::Value) -> Result<K> {
    Ok(serde_json::from_value(value).map_err(ocm_common::Error::from)?)
}

/// Everything except metadata and status
fn content<K: StoreObject>(obj: &K) -> Result<serde_json::Value> {
    let mut value = to_value(obj)?;
    if let Some(map) = value.as_object_mut() {
        map.remove("metadata");
        map.remove("status");
    }
    Ok(value)
}

/// `obj` with the status of `source`
fn with_status_of<K: StoreObject>(obj: &K, source: &K) -> Result<K> {
    let mut value = to_value(obj)?;
    let status = to_value(source)?.get("status").cloned();
    if let Some(map) = value.as_object_mut() {
        match status {
            Some(status) => map.insert("status".to_string(), status),
            None => map.remove("status"),
        };
    }
    from_value(value)
}

impl<K: StoreObject> MemoryStore<K> {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State {
                objects: BTreeMap::new(),
                actions: Vec::new(),
                injected: Vec::new(),
                next_version: 0,
            }),
        }
    }

    /// Create a store seeded with objects (seeding is not recorded)
    pub fn with_objects(objects: impl IntoIterator<Item = K>) -> Self {
        let store = Self::new();
        for obj in objects {
            store.insert(obj);
        }
        store
    }

    /// Seed or overwrite an object without recording an action
    ///
    /// Fills in `resourceVersion`, `uid` and `generation` when unset.
    pub fn insert(&self, mut obj: K) -> K {
        let mut state = self.state.lock();
        let rv = state.bump();
        let meta = obj.meta_mut();
        meta.resource_version = Some(rv.clone());
        if meta.uid.is_none() {
            meta.uid = Some(format!("uid-{}", rv));
        }
        if meta.generation.is_none() {
            meta.generation = Some(1);
        }
        state.objects.insert(key_of(&obj), obj.clone());
        obj
    }

    /// Current copy of an object without recording an action
    pub fn snapshot(&self, namespace: Option<&str>, name: &str) -> Option<K> {
        self.state.lock().objects.get(&key(namespace, name)).cloned()
    }

    /// All stored objects, ordered by namespace and name
    pub fn objects(&self) -> Vec<K> {
        self.state.lock().objects.values().cloned().collect()
    }

    /// Every call made so far, in order
    pub fn actions(&self) -> Vec<StoreAction> {
        self.state.lock().actions.clone()
    }

    /// Verbs of every call made so far, in order
    pub fn verbs(&self) -> Vec<&'static str> {
        self.state.lock().actions.iter().map(|a| a.verb.as_str()).collect()
    }

    /// Number of calls that mutate state
    pub fn mutation_count(&self) -> usize {
        self.state
            .lock()
            .actions
            .iter()
            .filter(|a| a.verb.is_mutation())
            .count()
    }

    /// Number of calls with the given verb
    pub fn count(&self, verb: Verb) -> usize {
        self.state
            .lock()
            .actions
            .iter()
            .filter(|a| a.verb == verb)
            .count()
    }

    /// Forget recorded calls
    pub fn clear_actions(&self) {
        self.state.lock().actions.clear();
    }

    /// Fail the next call with `verb` on `name` (any name when `None`)
    pub fn fail_once(&self, verb: Verb, name: Option<&str>, failure: Failure) {
        self.inject(verb, name, failure, Some(1));
    }

    /// Fail every call with `verb` on `name` until cleared
    pub fn fail_always(&self, verb: Verb, name: Option<&str>, failure: Failure) {
        self.inject(verb, name, failure, None);
    }

    /// Remove all injected failures
    pub fn clear_failures(&self) {
        self.state.lock().injected.clear();
    }

    fn inject(&self, verb: Verb, name: Option<&str>, failure: Failure, remaining: Option<usize>) {
        self.state.lock().injected.push(Injected {
            verb,
            name: name.map(str::to_string),
            failure,
            remaining,
        });
    }

    /// Record the call and return the injected failure, if any
    fn begin(&self, verb: Verb, namespace: Option<&str>, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.record(verb, namespace, name);
        match state.take_failure(verb, name) {
            Some(failure) => Err(injected_error::<K>(failure, namespace, name)),
            None => Ok(()),
        }
    }

    fn check_version(stored: &K, obj: &K, namespace: Option<&str>, name: &str) -> Result<()> {
        match obj.resource_version() {
            Some(rv) if Some(&rv) != stored.meta().resource_version.as_ref() => {
                Err(Error::conflict(
                    resource_id_of::<K>(namespace, name),
                    "the object has been modified; please apply your changes to the latest version",
                ))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl<K: StoreObject> ObjectStore<K> for MemoryStore<K> {
    async fn get(&self, namespace: Option<&str>, name: &str) -> Result<K> {
        self.begin(Verb::Get, namespace, name)?;
        self.snapshot(namespace, name)
            .ok_or_else(|| Error::not_found(resource_id_of::<K>(namespace, name)))
    }

    async fn list(&self, namespace: Option<&str>) -> Result<Vec<K>> {
        self.begin(Verb::List, namespace, "")?;
        let state = self.state.lock();
        Ok(state
            .objects
            .iter()
            .filter(|((ns, _), _)| namespace.is_none_or(|want| want == ns.as_str()))
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    async fn create(&self, obj: &K) -> Result<K> {
        let name = required_name(obj)?;
        let namespace = obj.namespace();
        self.begin(Verb::Create, namespace.as_deref(), &name)?;

        let mut state = self.state.lock();
        let k = key(namespace.as_deref(), &name);
        if state.objects.contains_key(&k) {
            return Err(Error::conflict(
                resource_id_of::<K>(namespace.as_deref(), &name),
                "already exists",
            ));
        }
        let rv = state.bump();
        let mut created = obj.clone();
        let meta = created.meta_mut();
        meta.resource_version = Some(rv.clone());
        meta.uid = Some(format!("uid-{}", rv));
        meta.generation = Some(1);
        meta.creation_timestamp = Some(Time(Utc::now()));
        state.objects.insert(k, created.clone());
        Ok(created)
    }

    async fn update(&self, obj: &K) -> Result<K> {
        let name = required_name(obj)?;
        let namespace = obj.namespace();
        let ns = namespace.as_deref();
        self.begin(Verb::Update, ns, &name)?;

        let mut state = self.state.lock();
        let k = key(ns, &name);
        let stored = state
            .objects
            .get(&k)
            .cloned()
            .ok_or_else(|| Error::not_found(resource_id_of::<K>(ns, &name)))?;
        Self::check_version(&stored, obj, ns, &name)?;

        let mut updated = with_status_of(obj, &stored)?;
        let generation = stored.meta().generation.unwrap_or(1);
        let spec_changed = content(&stored)? != content(&updated)?;
        let rv = state.bump();
        let meta = updated.meta_mut();
        meta.resource_version = Some(rv);
        meta.uid = stored.meta().uid.clone();
        meta.creation_timestamp = stored.meta().creation_timestamp.clone();
        meta.deletion_timestamp = stored.meta().deletion_timestamp.clone();
        meta.generation = Some(if spec_changed { generation + 1 } else { generation });

        let finalized = updated.meta().deletion_timestamp.is_some()
            && updated.finalizers().is_empty();
        if finalized {
            state.objects.remove(&k);
        } else {
            state.objects.insert(k, updated.clone());
        }
        Ok(updated)
    }

    async fn update_status(&self, obj: &K) -> Result<K> {
        let name = required_name(obj)?;
        let namespace = obj.namespace();
        let ns = namespace.as_deref();
        self.begin(Verb::UpdateStatus, ns, &name)?;

        let mut state = self.state.lock();
        let k = key(ns, &name);
        let stored = state
            .objects
            .get(&k)
            .cloned()
            .ok_or_else(|| Error::not_found(resource_id_of::<K>(ns, &name)))?;
        Self::check_version(&stored, obj, ns, &name)?;

        let mut updated = with_status_of(&stored, obj)?;
        let rv = state.bump();
        updated.meta_mut().resource_version = Some(rv);
        state.objects.insert(k, updated.clone());
        Ok(updated)
    }

    async fn delete(&self, namespace: Option<&str>, name: &str) -> Result<()> {
        self.begin(Verb::Delete, namespace, name)?;

        let mut state = self.state.lock();
        let k = key(namespace, name);
        let Some(mut stored) = state.objects.remove(&k) else {
            return Err(Error::not_found(resource_id_of::<K>(namespace, name)));
        };
        if !stored.finalizers().is_empty() {
            let rv = state.bump();
            let meta = stored.meta_mut();
            if meta.deletion_timestamp.is_none() {
                meta.deletion_timestamp = Some(Time(Utc::now()));
            }
            meta.resource_version = Some(rv);
            state.objects.insert(k, stored);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use std::collections::BTreeMap;

    fn deployment(name: &str, replicas: i32) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some("agent".to_string()),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(replicas),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn get_missing_is_not_found_and_recorded() {
        let store = MemoryStore::<Deployment>::new();
        let err = store.get(Some("agent"), "nope").await.unwrap_err();
        assert!(err.is_not_found());
        assert_eq!(store.verbs(), vec!["get"]);
        assert_eq!(store.mutation_count(), 0);
    }

    #[tokio::test]
    async fn create_assigns_metadata_and_rejects_duplicates() {
        let store = MemoryStore::new();
        let created = store.create(&deployment("a", 1)).await.unwrap();
        assert_eq!(created.metadata.generation, Some(1));
        assert!(created.metadata.resource_version.is_some());
        assert!(created.metadata.uid.is_some());

        let err = store.create(&deployment("a", 1)).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn update_bumps_generation_only_on_content_change() {
        let store = MemoryStore::new();
        let created = store.create(&deployment("a", 1)).await.unwrap();

        let mut labeled = created.clone();
        labeled.metadata.labels = Some(BTreeMap::from([("k".to_string(), "v".to_string())]));
        let labeled = store.update(&labeled).await.unwrap();
        assert_eq!(labeled.metadata.generation, Some(1));

        let mut scaled = labeled.clone();
        scaled.spec = Some(DeploymentSpec {
            replicas: Some(3),
            ..Default::default()
        });
        let scaled = store.update(&scaled).await.unwrap();
        assert_eq!(scaled.metadata.generation, Some(2));
    }

    #[tokio::test]
    async fn stale_resource_version_conflicts() {
        let store = MemoryStore::new();
        let created = store.create(&deployment("a", 1)).await.unwrap();
        store.update(&created).await.unwrap();

        let err = store.update(&created).await.unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn update_does_not_write_status_and_update_status_only_writes_status() {
        let store = MemoryStore::new();
        let created = store.create(&deployment("a", 1)).await.unwrap();

        let mut with_status = created.clone();
        with_status.status = Some(Default::default());
        with_status.status.as_mut().unwrap().available_replicas = Some(1);
        let after_update = store.update(&with_status).await.unwrap();
        assert!(after_update.status.is_none());

        let mut status_write = after_update.clone();
        status_write.status = Some(Default::default());
        status_write.status.as_mut().unwrap().available_replicas = Some(1);
        status_write.spec.as_mut().unwrap().replicas = Some(9);
        let after_status = store.update_status(&status_write).await.unwrap();
        assert_eq!(
            after_status.status.and_then(|s| s.available_replicas),
            Some(1)
        );
        assert_eq!(after_status.spec.and_then(|s| s.replicas), Some(1));
    }

    /// Story: an owner with a finalizer is deleted
    ///
    /// Deletion only marks the object; it disappears once the controller
    /// removes its finalizer, like the real API server.
    #[tokio::test]
    async fn story_finalizers_delay_deletion() {
        let store = MemoryStore::new();
        let mut obj = deployment("owner", 1);
        obj.metadata.finalizers = Some(vec!["example.io/cleanup".to_string()]);
        store.create(&obj).await.unwrap();

        store.delete(Some("agent"), "owner").await.unwrap();
        let deleting = store.snapshot(Some("agent"), "owner").unwrap();
        assert!(deleting.metadata.deletion_timestamp.is_some());

        let mut released = deleting.clone();
        released.metadata.finalizers = None;
        store.update(&released).await.unwrap();
        assert!(store.snapshot(Some("agent"), "owner").is_none());
    }

    #[tokio::test]
    async fn injected_failures_fire_once_or_always() {
        let store = MemoryStore::new();
        store.fail_once(Verb::Create, Some("a"), Failure::Unavailable);

        let err = store.create(&deployment("a", 1)).await.unwrap_err();
        assert!(matches!(err, Error::Unavailable { .. }));
        store.create(&deployment("a", 1)).await.unwrap();

        store.fail_always(Verb::Get, None, Failure::Conflict);
        assert!(store.get(Some("agent"), "a").await.unwrap_err().is_conflict());
        assert!(store.get(Some("agent"), "b").await.unwrap_err().is_conflict());
        store.clear_failures();
        assert!(store.get(Some("agent"), "a").await.is_ok());

        assert_eq!(store.count(Verb::Create), 2);
    }

    #[tokio::test]
    async fn list_filters_by_namespace() {
        let mut other = deployment("b", 1);
        other.metadata.namespace = Some("other".to_string());
        let store = MemoryStore::with_objects([deployment("a", 1), other]);

        assert_eq!(store.list(Some("agent")).await.unwrap().len(), 1);
        assert_eq!(store.list(None).await.unwrap().len(), 2);
        assert!(store.actions().iter().all(|a| a.verb == Verb::List));
    }

    #[tokio::test]
    async fn delete_if_exists_tolerates_absence() {
        let store = MemoryStore::with_objects([deployment("a", 1)]);
        assert!(crate::store::delete_if_exists::<Deployment, _>(&store, Some("agent"), "a").await.unwrap());
        assert!(!crate::store::delete_if_exists::<Deployment, _>(&store, Some("agent"), "a").await.unwrap());
        assert_eq!(store.verbs(), vec!["delete", "delete"]);
    }
}
