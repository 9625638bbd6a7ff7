//! Idempotent apply of rendered subordinates
//!
//! [`apply`] turns one desired object into the minimal mutation against the
//! store: create when absent, update when the merge reports a difference (or
//! the tracked generation says someone else changed it), nothing otherwise.
//! [`remove`] deletes and treats absence as success. [`Applier`] runs these
//! over many rendered artifacts and aggregates failures.

mod batch;
mod merge;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Namespace;
use kube::ResourceExt;
use ocm_common::crd::StorageVersionMigration;
use ocm_common::events::{actions, EventRecorder};
use ocm_common::kube_utils::deterministic_hash;
use tracing::{debug, info};

use crate::generation::{GenerationKey, GenerationTracker};
use crate::store::{required_name, resource_id_of, ObjectStore, StoreObject};
use crate::Result;

pub use batch::{AppliedArtifact, Applier, StoreSet};
pub use merge::{ensure_object_meta, merge, Merged};

/// Annotation carrying the hash of a generation-gated object's desired spec
pub const SPEC_HASH_ANNOTATION: &str = "operator.open-cluster-management.io/spec-hash";

/// How a kind decides that its live object drifted from desired state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DriftPolicy {
    /// Any metadata or spec difference is drift
    Semantic,
    /// Metadata differences (including the spec-hash annotation) or a
    /// mismatch between the tracked and observed generation are drift
    GenerationGated,
}

/// A kind the applier can manage
pub trait Subordinate: StoreObject {
    /// Drift detection used for this kind
    const DRIFT_POLICY: DriftPolicy;

    /// Whether the user-controlled fields of `self` equal those of `desired`
    fn spec_matches(&self, desired: &Self) -> bool;

    /// Replace the user-controlled fields of `self` with those of `desired`
    fn overlay_spec(&mut self, desired: &Self);

    /// Stable digest of everything outside metadata and status
    fn spec_fingerprint(&self) -> Result<String> {
        let mut value = serde_json::to_value(self).map_err(ocm_common::Error::from)?;
        if let Some(map) = value.as_object_mut() {
            map.remove("metadata");
            map.remove("status");
        }
        Ok(deterministic_hash(&value.to_string()))
    }
}

impl Subordinate for StorageVersionMigration {
    const DRIFT_POLICY: DriftPolicy = DriftPolicy::Semantic;

    fn spec_matches(&self, desired: &Self) -> bool {
        self.spec == desired.spec
    }

    fn overlay_spec(&mut self, desired: &Self) {
        self.spec = desired.spec.clone();
    }
}

impl Subordinate for Deployment {
    const DRIFT_POLICY: DriftPolicy = DriftPolicy::GenerationGated;

    fn spec_matches(&self, desired: &Self) -> bool {
        self.spec == desired.spec
    }

    fn overlay_spec(&mut self, desired: &Self) {
        self.spec = desired.spec.clone();
    }
}

impl Subordinate for Namespace {
    const DRIFT_POLICY: DriftPolicy = DriftPolicy::Semantic;

    // Only metadata is managed; finalizers in spec belong to the server.
    fn spec_matches(&self, _desired: &Self) -> bool {
        true
    }

    fn overlay_spec(&mut self, _desired: &Self) {}
}

/// Outcome of a successful [`apply`]
#[derive(Clone, Debug)]
pub struct Applied<K> {
    /// The object as stored after the apply
    pub object: K,
    /// Whether a create or update was issued
    pub changed: bool,
}

fn record_generation<K: StoreObject>(tracker: &GenerationTracker, key: GenerationKey, obj: &K) {
    if let Some(generation) = obj.meta().generation {
        tracker.record(key, generation);
    }
}

/// Stamp the spec-hash annotation on a generation-gated desired object
pub fn stamp_spec_hash<K: Subordinate>(desired: &mut K) -> Result<()> {
    let hash = desired.spec_fingerprint()?;
    desired
        .annotations_mut()
        .insert(SPEC_HASH_ANNOTATION.to_string(), hash);
    Ok(())
}

/// Create or update `desired` so the store matches it
///
/// Emits `<Kind>Created`/`<Kind>Updated` on success and
/// `<Kind>CreateFailed`/`<Kind>UpdateFailed` (Warning) on failure; failures
/// are also returned. A conflict on update is returned as is: the next
/// reconcile re-reads and tries again.
pub async fn apply<K, S>(
    store: &S,
    desired: &K,
    tracker: &GenerationTracker,
    recorder: &EventRecorder,
) -> Result<Applied<K>>
where
    K: Subordinate,
    S: ObjectStore<K> + ?Sized,
{
    let name = required_name(desired)?;
    let namespace = desired.namespace();
    let ns = namespace.as_deref();
    let id = resource_id_of::<K>(ns, &name);
    let key = GenerationKey::of::<K>(ns, &name);
    let kind = K::kind(&());

    let mut desired = desired.clone();
    if K::DRIFT_POLICY == DriftPolicy::GenerationGated {
        stamp_spec_hash(&mut desired)?;
    }

    let existing = match store.get(ns, &name).await {
        Ok(existing) => existing,
        Err(e) if e.is_not_found() => {
            return match store.create(&desired).await {
                Ok(created) => {
                    record_generation(tracker, key, &created);
                    info!(resource = %id, "created");
                    recorder
                        .normal(
                            &format!("{kind}Created"),
                            actions::APPLY,
                            format!("{id} is created"),
                        )
                        .await;
                    Ok(Applied {
                        object: created,
                        changed: true,
                    })
                }
                Err(e) => {
                    recorder
                        .warning(
                            &format!("{kind}CreateFailed"),
                            actions::APPLY,
                            format!("Failed to create {id}: {e}"),
                        )
                        .await;
                    Err(e)
                }
            };
        }
        Err(e) => return Err(e),
    };

    let merged = merge(&existing, &desired);
    let drifted = K::DRIFT_POLICY == DriftPolicy::GenerationGated
        && tracker.observe(&key) != existing.meta().generation;
    if !merged.modified && !drifted {
        record_generation(tracker, key, &existing);
        return Ok(Applied {
            object: existing,
            changed: false,
        });
    }

    debug!(resource = %id, modified = merged.modified, drifted, "updating");
    match store.update(&merged.object).await {
        Ok(updated) => {
            record_generation(tracker, key, &updated);
            info!(resource = %id, "updated");
            recorder
                .normal(
                    &format!("{kind}Updated"),
                    actions::APPLY,
                    format!("{id} is updated"),
                )
                .await;
            Ok(Applied {
                object: updated,
                changed: true,
            })
        }
        Err(e) => {
            recorder
                .warning(
                    &format!("{kind}UpdateFailed"),
                    actions::APPLY,
                    format!("Failed to update {id}: {e}"),
                )
                .await;
            Err(e)
        }
    }
}

/// Delete the object named by `desired`; absence is success
///
/// Returns whether a delete was issued. Nothing is mutated when the object
/// is already gone.
pub async fn remove<K, S>(
    store: &S,
    desired: &K,
    tracker: &GenerationTracker,
    recorder: &EventRecorder,
) -> Result<bool>
where
    K: StoreObject,
    S: ObjectStore<K> + ?Sized,
{
    let name = required_name(desired)?;
    let namespace = desired.namespace();
    let ns = namespace.as_deref();
    let id = resource_id_of::<K>(ns, &name);
    let key = GenerationKey::of::<K>(ns, &name);

    match store.get(ns, &name).await {
        Ok(_) => {}
        Err(e) if e.is_not_found() => {
            tracker.forget(&key);
            return Ok(false);
        }
        Err(e) => return Err(e),
    }

    match store.delete(ns, &name).await {
        Ok(()) => {
            tracker.forget(&key);
            info!(resource = %id, "deleted");
            recorder
                .normal(
                    &format!("{}Deleted", K::kind(&())),
                    actions::DELETE,
                    format!("{id} is deleted"),
                )
                .await;
            Ok(true)
        }
        Err(e) if e.is_not_found() => {
            tracker.forget(&key);
            Ok(false)
        }
        Err(e) => {
            recorder
                .warning(
                    &format!("{}DeleteFailed", K::kind(&())),
                    actions::DELETE,
                    format!("Failed to delete {id}: {e}"),
                )
                .await;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Failure, MemoryStore, Verb};
    use k8s_openapi::api::apps::v1::DeploymentSpec;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
    use ocm_common::crd::{GroupVersionResource, StorageVersionMigrationSpec};
    use ocm_common::events::RecordingEventPublisher;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    fn recorder() -> (Arc<RecordingEventPublisher>, EventRecorder) {
        let publisher = Arc::new(RecordingEventPublisher::new());
        let recorder = EventRecorder::new(publisher.clone(), Default::default());
        (publisher, recorder)
    }

    fn migration(resource: &str) -> StorageVersionMigration {
        StorageVersionMigration::new(
            "managedclustersets.cluster.open-cluster-management.io",
            StorageVersionMigrationSpec {
                resource: GroupVersionResource {
                    group: "cluster.open-cluster-management.io".to_string(),
                    version: "v1beta1".to_string(),
                    resource: resource.to_string(),
                },
                continue_token: None,
            },
        )
    }

    fn deployment(replicas: i32) -> Deployment {
        Deployment {
            metadata: ObjectMeta {
                name: Some("klusterlet-work-agent".to_string()),
                namespace: Some("agent".to_string()),
                labels: Some(BTreeMap::from([("app".to_string(), "work".to_string())])),
                ..Default::default()
            },
            spec: Some(DeploymentSpec {
                replicas: Some(replicas),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// Story: applying the same desired object twice
    ///
    /// The first apply creates it; the second finds nothing to do and must
    /// not issue any write.
    #[tokio::test]
    async fn story_apply_twice_creates_once() {
        let store = MemoryStore::new();
        let tracker = GenerationTracker::new();
        let (events, recorder) = recorder();
        let desired = migration("managedclustersets");

        let first = apply(&store, &desired, &tracker, &recorder).await.unwrap();
        let second = apply(&store, &desired, &tracker, &recorder).await.unwrap();

        assert!(first.changed);
        assert!(!second.changed);
        assert_eq!(store.count(Verb::Create), 1);
        assert_eq!(store.count(Verb::Update), 0);
        assert_eq!(events.reasons(), vec!["StorageVersionMigrationCreated"]);
    }

    /// Story: someone edits the spec of a managed object by hand
    ///
    /// The next apply restores the spec with exactly one update, and keeps
    /// metadata the store or other writers added.
    #[tokio::test]
    async fn story_manual_spec_drift_is_restored() {
        let store = MemoryStore::new();
        let tracker = GenerationTracker::new();
        let (events, recorder) = recorder();
        let desired = migration("managedclustersets");
        apply(&store, &desired, &tracker, &recorder).await.unwrap();

        let mut edited = store.snapshot(None, &desired.name_any()).unwrap();
        edited.spec.resource.resource = "edited".to_string();
        edited
            .labels_mut()
            .insert("added-by".to_string(), "someone".to_string());
        store.insert(edited);
        store.clear_actions();

        let applied = apply(&store, &desired, &tracker, &recorder).await.unwrap();

        assert!(applied.changed);
        assert_eq!(store.verbs(), vec!["get", "update"]);
        let stored = store.snapshot(None, &desired.name_any()).unwrap();
        assert_eq!(stored.spec, desired.spec);
        assert_eq!(
            stored.labels().get("added-by").map(String::as_str),
            Some("someone")
        );
        assert_eq!(
            events.reasons(),
            vec![
                "StorageVersionMigrationCreated",
                "StorageVersionMigrationUpdated"
            ]
        );
    }

    #[tokio::test]
    async fn generation_gated_kind_is_stamped_and_tracked() {
        let store = MemoryStore::new();
        let tracker = GenerationTracker::new();
        let (_, recorder) = recorder();

        let created = apply(&store, &deployment(1), &tracker, &recorder)
            .await
            .unwrap();
        assert!(created
            .object
            .annotations()
            .contains_key(SPEC_HASH_ANNOTATION));
        let key = GenerationKey::of::<Deployment>(Some("agent"), "klusterlet-work-agent");
        assert_eq!(tracker.observe(&key), Some(1));

        let again = apply(&store, &deployment(1), &tracker, &recorder)
            .await
            .unwrap();
        assert!(!again.changed);
    }

    #[tokio::test]
    async fn generation_gated_desired_change_updates_through_hash() {
        let store = MemoryStore::new();
        let tracker = GenerationTracker::new();
        let (_, recorder) = recorder();
        apply(&store, &deployment(1), &tracker, &recorder)
            .await
            .unwrap();

        let scaled = apply(&store, &deployment(3), &tracker, &recorder)
            .await
            .unwrap();
        assert!(scaled.changed);
        assert_eq!(scaled.object.spec.and_then(|s| s.replicas), Some(3));
    }

    /// Story: an external writer scales a generation-gated Deployment
    ///
    /// The spec hash still matches, but the server bumped the generation
    /// past the tracked one, so the applier restores the desired spec.
    #[tokio::test]
    async fn story_external_generation_bump_is_drift() {
        let store = MemoryStore::new();
        let tracker = GenerationTracker::new();
        let (_, recorder) = recorder();
        apply(&store, &deployment(1), &tracker, &recorder)
            .await
            .unwrap();

        let mut live = store
            .snapshot(Some("agent"), "klusterlet-work-agent")
            .unwrap();
        live.spec.as_mut().unwrap().replicas = Some(5);
        store.update(&live).await.unwrap();
        store.clear_actions();

        let restored = apply(&store, &deployment(1), &tracker, &recorder)
            .await
            .unwrap();
        assert!(restored.changed);
        assert_eq!(store.verbs(), vec!["get", "update"]);
        assert_eq!(restored.object.spec.and_then(|s| s.replicas), Some(1));
    }

    #[tokio::test]
    async fn create_failure_emits_warning_and_propagates() {
        let store = MemoryStore::new();
        store.fail_once(Verb::Create, None, Failure::Unavailable);
        let tracker = GenerationTracker::new();
        let (events, recorder) = recorder();

        let err = apply(&store, &migration("sets"), &tracker, &recorder)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        let recorded = events.events();
        assert_eq!(recorded.len(), 1);
        assert!(recorded[0].warning);
        assert_eq!(recorded[0].reason, "StorageVersionMigrationCreateFailed");
    }

    #[tokio::test]
    async fn update_conflict_is_surfaced() {
        let store = MemoryStore::new();
        let tracker = GenerationTracker::new();
        let (events, recorder) = recorder();
        apply(&store, &migration("a"), &tracker, &recorder)
            .await
            .unwrap();
        store.fail_once(Verb::Update, None, Failure::Conflict);

        let err = apply(&store, &migration("b"), &tracker, &recorder)
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(
            events.reasons().last().map(String::as_str),
            Some("StorageVersionMigrationUpdateFailed")
        );
    }

    #[tokio::test]
    async fn remove_absent_is_success_without_mutation() {
        let store = MemoryStore::<StorageVersionMigration>::new();
        let tracker = GenerationTracker::new();
        let (events, recorder) = recorder();

        let deleted = remove(&store, &migration("a"), &tracker, &recorder)
            .await
            .unwrap();
        assert!(!deleted);
        assert_eq!(store.mutation_count(), 0);
        assert!(events.events().is_empty());
    }

    #[tokio::test]
    async fn remove_existing_deletes_and_forgets() {
        let store = MemoryStore::new();
        let tracker = GenerationTracker::new();
        let (_, recorder) = recorder();
        apply(&store, &deployment(1), &tracker, &recorder)
            .await
            .unwrap();

        let deleted = remove(&store, &deployment(1), &tracker, &recorder)
            .await
            .unwrap();
        assert!(deleted);
        assert!(store.objects().is_empty());
        let key = GenerationKey::of::<Deployment>(Some("agent"), "klusterlet-work-agent");
        assert_eq!(tracker.observe(&key), None);
    }

    #[tokio::test]
    async fn desired_without_name_is_invalid() {
        let store = MemoryStore::<Deployment>::new();
        let tracker = GenerationTracker::new();
        let (_, recorder) = recorder();
        let err = apply(&store, &Deployment::default(), &tracker, &recorder)
            .await
            .unwrap_err();
        assert!(matches!(err, crate::Error::Invalid { .. }));
        assert!(store.actions().is_empty());
    }
}
