//! Applying and removing many rendered artifacts at once

use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Namespace;
use ocm_common::crd::StorageVersionMigration;
use ocm_common::events::EventRecorder;
use tracing::warn;

use super::{apply, remove, Subordinate};
use crate::generation::{GenerationKey, GenerationTracker};
use crate::manifest::{DesiredObject, ManifestSource, SchemeRegistry};
use crate::store::{required_name, resource_id, ObjectStore};
use crate::{Error, Result};

/// Stores for each kind a [`DesiredObject`] can be
///
/// Controllers only register the kinds they render; applying an object
/// of an unregistered kind fails for that artifact.
#[derive(Clone, Default)]
pub struct StoreSet {
    namespaces: Option<Arc<dyn ObjectStore<Namespace>>>,
    deployments: Option<Arc<dyn ObjectStore<Deployment>>>,
    migrations: Option<Arc<dyn ObjectStore<StorageVersionMigration>>>,
}

impl StoreSet {
    /// Create a set without any stores
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the Namespace store
    pub fn with_namespaces(mut self, store: Arc<dyn ObjectStore<Namespace>>) -> Self {
        self.namespaces = Some(store);
        self
    }

    /// Register the Deployment store
    pub fn with_deployments(mut self, store: Arc<dyn ObjectStore<Deployment>>) -> Self {
        self.deployments = Some(store);
        self
    }

    /// Register the StorageVersionMigration store
    pub fn with_migrations(mut self, store: Arc<dyn ObjectStore<StorageVersionMigration>>) -> Self {
        self.migrations = Some(store);
        self
    }
}

fn store_for<'a, K>(
    store: &'a Option<Arc<dyn ObjectStore<K>>>,
    obj: &DesiredObject,
) -> Result<&'a dyn ObjectStore<K>>
where
    K: Subordinate,
{
    store
        .as_deref()
        .ok_or_else(|| Error::invalid(obj.name(), format!("no store for kind {}", obj.kind())))
}

/// Summary of one applied object
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppliedArtifact {
    /// `Kind/namespace/name`
    pub resource: String,
    /// Generation tracking key
    pub key: GenerationKey,
    /// Whether a create or update was issued
    pub changed: bool,
}

impl AppliedArtifact {
    fn of<K: Subordinate>(obj: &K, changed: bool) -> Result<Self> {
        let name = required_name(obj)?;
        Ok(Self {
            resource: resource_id(obj),
            key: GenerationKey::of::<K>(obj.meta().namespace.as_deref(), &name),
            changed,
        })
    }
}

/// Applies decoded desired objects through the matching store
///
/// Borrowed for the duration of one reconcile.
pub struct Applier<'a> {
    registry: &'a SchemeRegistry,
    stores: &'a StoreSet,
    tracker: &'a GenerationTracker,
    recorder: &'a EventRecorder,
}

impl<'a> Applier<'a> {
    /// Bundle the collaborators of one reconcile
    pub fn new(
        registry: &'a SchemeRegistry,
        stores: &'a StoreSet,
        tracker: &'a GenerationTracker,
        recorder: &'a EventRecorder,
    ) -> Self {
        Self {
            registry,
            stores,
            tracker,
            recorder,
        }
    }

    /// Apply one decoded object
    pub async fn apply_object(&self, obj: &DesiredObject) -> Result<AppliedArtifact> {
        match obj {
            DesiredObject::Namespace(desired) => {
                let store = store_for(&self.stores.namespaces, obj)?;
                let applied = apply(store, desired.as_ref(), self.tracker, self.recorder).await?;
                AppliedArtifact::of(&applied.object, applied.changed)
            }
            DesiredObject::Deployment(desired) => {
                let store = store_for(&self.stores.deployments, obj)?;
                let applied = apply(store, desired.as_ref(), self.tracker, self.recorder).await?;
                AppliedArtifact::of(&applied.object, applied.changed)
            }
            DesiredObject::StorageVersionMigration(desired) => {
                let store = store_for(&self.stores.migrations, obj)?;
                let applied = apply(store, desired.as_ref(), self.tracker, self.recorder).await?;
                AppliedArtifact::of(&applied.object, applied.changed)
            }
        }
    }

    /// Remove one decoded object; absence is success
    pub async fn remove_object(&self, obj: &DesiredObject) -> Result<bool> {
        match obj {
            DesiredObject::Namespace(desired) => {
                let store = store_for(&self.stores.namespaces, obj)?;
                remove(store, desired.as_ref(), self.tracker, self.recorder).await
            }
            DesiredObject::Deployment(desired) => {
                let store = store_for(&self.stores.deployments, obj)?;
                remove(store, desired.as_ref(), self.tracker, self.recorder).await
            }
            DesiredObject::StorageVersionMigration(desired) => {
                let store = store_for(&self.stores.migrations, obj)?;
                remove(store, desired.as_ref(), self.tracker, self.recorder).await
            }
        }
    }

    fn load(&self, source: &dyn ManifestSource, artifact: &str) -> Result<DesiredObject> {
        let bytes = source.render(artifact)?;
        self.registry.decode(artifact, &bytes)
    }

    /// Render, decode and apply every artifact
    ///
    /// Each artifact is attempted independently; a failure (render and
    /// decode failures included) does not stop its siblings. Failures come
    /// back as one aggregate error, one line per failed artifact.
    pub async fn apply_all(
        &self,
        source: &dyn ManifestSource,
        artifacts: &[&str],
    ) -> Result<Vec<AppliedArtifact>> {
        let mut applied = Vec::with_capacity(artifacts.len());
        let mut errors = Vec::new();
        for artifact in artifacts {
            let result = match self.load(source, artifact) {
                Ok(obj) => self.apply_object(&obj).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(summary) => applied.push(summary),
                Err(e) => {
                    warn!(artifact, error = %e, "failed to apply artifact");
                    errors.push(e);
                }
            }
        }
        Error::aggregate(errors)?;
        Ok(applied)
    }

    /// Render, decode and remove every artifact, with the same failure
    /// handling as [`Applier::apply_all`]
    pub async fn remove_all(&self, source: &dyn ManifestSource, artifacts: &[&str]) -> Result<()> {
        let mut errors = Vec::new();
        for artifact in artifacts {
            let result = match self.load(source, artifact) {
                Ok(obj) => self.remove_object(&obj).await.map(|_| ()),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                warn!(artifact, error = %e, "failed to remove artifact");
                errors.push(e);
            }
        }
        Error::aggregate(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::MockManifestSource;
    use crate::store::{MemoryStore, Verb};
    use mockall::predicate::eq;

    const SETS: &str = r#"
apiVersion: migration.k8s.io/v1alpha1
kind: StorageVersionMigration
metadata:
  name: managedclustersets.cluster.open-cluster-management.io
spec:
  resource:
    group: cluster.open-cluster-management.io
    version: v1beta1
    resource: managedclustersets
"#;

    const BINDINGS: &str = r#"
apiVersion: migration.k8s.io/v1alpha1
kind: StorageVersionMigration
metadata:
  name: managedclustersetbindings.cluster.open-cluster-management.io
spec:
  resource:
    group: cluster.open-cluster-management.io
    version: v1beta1
    resource: managedclustersetbindings
"#;

    fn fixture() -> (Arc<MemoryStore<StorageVersionMigration>>, StoreSet) {
        let store = Arc::new(MemoryStore::new());
        let stores = StoreSet::new().with_migrations(store.clone());
        (store, stores)
    }

    /// Story: one artifact is broken
    ///
    /// The broken artifact must not stop its sibling from being applied,
    /// and the returned error names the broken one.
    #[tokio::test]
    async fn story_failures_do_not_stop_siblings() {
        let (store, stores) = fixture();
        let registry = SchemeRegistry::with_defaults();
        let tracker = GenerationTracker::new();
        let recorder = EventRecorder::noop();
        let applier = Applier::new(&registry, &stores, &tracker, &recorder);

        let mut source = MockManifestSource::new();
        source
            .expect_render()
            .with(eq("broken.yaml"))
            .returning(|_| Ok(b"kind: [".to_vec()));
        source
            .expect_render()
            .with(eq("bindings.yaml"))
            .returning(|_| Ok(BINDINGS.as_bytes().to_vec()));

        let err = applier
            .apply_all(&source, &["broken.yaml", "bindings.yaml"])
            .await
            .unwrap_err();

        assert!(err.to_string().contains("broken.yaml"));
        assert_eq!(store.count(Verb::Create), 1);
    }

    #[tokio::test]
    async fn multiple_failures_aggregate_into_multi_line_error() {
        let (_, stores) = fixture();
        let registry = SchemeRegistry::with_defaults();
        let tracker = GenerationTracker::new();
        let recorder = EventRecorder::noop();
        let applier = Applier::new(&registry, &stores, &tracker, &recorder);

        let mut source = MockManifestSource::new();
        source
            .expect_render()
            .returning(|artifact| Err(Error::not_found(format!("manifest {artifact}"))));

        let err = applier
            .apply_all(&source, &["a.yaml", "b.yaml"])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Aggregate { ref errors } if errors.len() == 2));
        assert_eq!(err.to_string().lines().count(), 2);
    }

    #[tokio::test]
    async fn apply_all_reports_changes_then_none() {
        let (store, stores) = fixture();
        let registry = SchemeRegistry::with_defaults();
        let tracker = GenerationTracker::new();
        let recorder = EventRecorder::noop();
        let applier = Applier::new(&registry, &stores, &tracker, &recorder);

        let mut source = MockManifestSource::new();
        source.expect_render().returning(|artifact| match artifact {
            "sets.yaml" => Ok(SETS.as_bytes().to_vec()),
            _ => Ok(BINDINGS.as_bytes().to_vec()),
        });

        let first = applier
            .apply_all(&source, &["sets.yaml", "bindings.yaml"])
            .await
            .unwrap();
        assert!(first.iter().all(|a| a.changed));
        assert_eq!(
            first[0].resource,
            "StorageVersionMigration/managedclustersets.cluster.open-cluster-management.io"
        );

        let second = applier
            .apply_all(&source, &["sets.yaml", "bindings.yaml"])
            .await
            .unwrap();
        assert!(second.iter().all(|a| !a.changed));
        assert_eq!(store.count(Verb::Create), 2);
        assert_eq!(store.count(Verb::Update), 0);
    }

    #[tokio::test]
    async fn kind_without_store_fails_for_that_artifact() {
        let stores = StoreSet::new();
        let registry = SchemeRegistry::with_defaults();
        let tracker = GenerationTracker::new();
        let recorder = EventRecorder::noop();
        let applier = Applier::new(&registry, &stores, &tracker, &recorder);

        let mut source = MockManifestSource::new();
        source
            .expect_render()
            .returning(|_| Ok(SETS.as_bytes().to_vec()));

        let err = applier.apply_all(&source, &["sets.yaml"]).await.unwrap_err();
        assert!(matches!(err, Error::Invalid { .. }));
    }

    #[tokio::test]
    async fn remove_all_deletes_present_and_ignores_absent() {
        let (store, stores) = fixture();
        let registry = SchemeRegistry::with_defaults();
        let tracker = GenerationTracker::new();
        let recorder = EventRecorder::noop();
        let applier = Applier::new(&registry, &stores, &tracker, &recorder);

        let mut source = MockManifestSource::new();
        source.expect_render().returning(|artifact| match artifact {
            "sets.yaml" => Ok(SETS.as_bytes().to_vec()),
            _ => Ok(BINDINGS.as_bytes().to_vec()),
        });
        applier.apply_all(&source, &["sets.yaml"]).await.unwrap();

        applier
            .remove_all(&source, &["sets.yaml", "bindings.yaml"])
            .await
            .unwrap();
        assert!(store.objects().is_empty());
        assert_eq!(store.count(Verb::Delete), 1);
    }
}
