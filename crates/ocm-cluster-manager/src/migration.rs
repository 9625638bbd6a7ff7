//! Storage version migration for the hub's cluster-set resources
//!
//! Once the ClusterManager reports `Applied`, the controller asks the
//! storage version migrator to rewrite `managedclustersets` and
//! `managedclustersetbindings` at their storage version. Clusters without
//! the migrator CRD are left alone. When the ClusterManager is deleted the
//! migration requests are removed.

use std::sync::Arc;
use std::time::Duration;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::Resource;
use ocm_common::crd::{
    is_condition_true, ClusterManager, StorageVersionMigration, CONDITION_APPLIED,
    STORAGE_VERSION_MIGRATION_CRD,
};
use ocm_common::events::{EventPublisher, EventRecorder};
use ocm_common::kube_utils::is_deleting;
use ocm_reconcile::apply::{Applier, StoreSet};
use ocm_reconcile::generation::GenerationTracker;
use ocm_reconcile::manifest::{ManifestTemplates, SchemeRegistry};
use ocm_reconcile::scheduler::Action;
use ocm_reconcile::store::{get_if_exists, ObjectStore};
use tracing::{debug, info, instrument};

use crate::error::Result;
use crate::manifests::{self, MIGRATION_ARTIFACTS};

/// How long to wait for the ClusterManager to become `Applied`
pub const APPLIED_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Collaborators of the migration controller
pub struct MigrationContext {
    cluster_managers: Arc<dyn ObjectStore<ClusterManager>>,
    crds: Arc<dyn ObjectStore<CustomResourceDefinition>>,
    stores: StoreSet,
    registry: Arc<SchemeRegistry>,
    templates: ManifestTemplates,
    tracker: GenerationTracker,
    events: Arc<dyn EventPublisher>,
}

impl MigrationContext {
    /// Build the context, compiling the embedded manifests
    pub fn new(
        cluster_managers: Arc<dyn ObjectStore<ClusterManager>>,
        crds: Arc<dyn ObjectStore<CustomResourceDefinition>>,
        migrations: Arc<dyn ObjectStore<StorageVersionMigration>>,
        registry: Arc<SchemeRegistry>,
        events: Arc<dyn EventPublisher>,
    ) -> Result<Self> {
        Ok(Self {
            cluster_managers,
            crds,
            stores: StoreSet::new().with_migrations(migrations),
            registry,
            templates: manifests::templates()?,
            tracker: GenerationTracker::new(),
            events,
        })
    }
}

/// Whether the StorageVersionMigration CRD is installed
pub async fn supports_storage_version_migration(
    crds: &dyn ObjectStore<CustomResourceDefinition>,
) -> Result<bool> {
    let crd = get_if_exists::<CustomResourceDefinition, _>(crds, None, STORAGE_VERSION_MIGRATION_CRD)
        .await?;
    Ok(crd.is_some())
}

/// Reconcile the migration requests of one ClusterManager
#[instrument(skip_all, fields(cluster_manager = %name))]
pub async fn reconcile(name: String, ctx: Arc<MigrationContext>) -> Result<Action> {
    let Some(cluster_manager) =
        get_if_exists::<ClusterManager, _>(ctx.cluster_managers.as_ref(), None, &name).await?
    else {
        debug!("ClusterManager not found, nothing to do");
        return Ok(Action::await_change());
    };

    if !supports_storage_version_migration(ctx.crds.as_ref()).await? {
        debug!(crd = STORAGE_VERSION_MIGRATION_CRD, "migration CRD not installed");
        return Ok(Action::await_change());
    }

    let recorder = EventRecorder::new(ctx.events.clone(), cluster_manager.object_ref(&()));
    let values = serde_json::json!({});
    let source = ctx.templates.bind(&values);
    let applier = Applier::new(&ctx.registry, &ctx.stores, &ctx.tracker, &recorder);

    if is_deleting(&cluster_manager) {
        applier.remove_all(&source, MIGRATION_ARTIFACTS).await?;
        info!("removed storage version migrations");
        return Ok(Action::await_change());
    }

    if !is_condition_true(cluster_manager.conditions(), CONDITION_APPLIED) {
        debug!("ClusterManager not applied yet, waiting");
        return Ok(Action::requeue(APPLIED_POLL_INTERVAL));
    }

    let applied = applier.apply_all(&source, MIGRATION_ARTIFACTS).await?;
    let changed = applied.iter().filter(|a| a.changed).count();
    if changed > 0 {
        info!(changed, "applied storage version migrations");
    }
    Ok(Action::await_change())
}
