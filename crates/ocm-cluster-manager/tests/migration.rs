//! Sync scenarios for the storage version migration controller
//!
//! Every scenario runs the real reconcile against in-memory stores and
//! asserts on the exact calls made against the migration store.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, Time};
use ocm_cluster_manager::migration::{reconcile, MigrationContext, APPLIED_POLL_INTERVAL};
use ocm_common::crd::{
    ClusterManager, ClusterManagerSpec, ClusterManagerStatus, Condition, ConditionStatus,
    GroupVersionResource, StorageVersionMigration, StorageVersionMigrationSpec,
    CONDITION_APPLIED, STORAGE_VERSION_MIGRATION_CRD,
};
use ocm_common::events::RecordingEventPublisher;
use ocm_reconcile::manifest::SchemeRegistry;
use ocm_reconcile::scheduler::Action;
use ocm_reconcile::store::{Failure, MemoryStore, Verb};

const SETS: &str = "managedclustersets.cluster.open-cluster-management.io";
const BINDINGS: &str = "managedclustersetbindings.cluster.open-cluster-management.io";

struct Harness {
    cluster_managers: Arc<MemoryStore<ClusterManager>>,
    crds: Arc<MemoryStore<CustomResourceDefinition>>,
    migrations: Arc<MemoryStore<StorageVersionMigration>>,
    events: Arc<RecordingEventPublisher>,
    ctx: Arc<MigrationContext>,
}

impl Harness {
    fn new() -> Self {
        let cluster_managers = Arc::new(MemoryStore::new());
        let crds = Arc::new(MemoryStore::new());
        let migrations = Arc::new(MemoryStore::new());
        let events = Arc::new(RecordingEventPublisher::new());
        let ctx = MigrationContext::new(
            cluster_managers.clone(),
            crds.clone(),
            migrations.clone(),
            Arc::new(SchemeRegistry::with_defaults()),
            events.clone(),
        )
        .expect("embedded manifests compile");
        Self {
            cluster_managers,
            crds,
            migrations,
            events,
            ctx: Arc::new(ctx),
        }
    }

    fn with_migration_crd(self) -> Self {
        self.crds.insert(CustomResourceDefinition {
            metadata: ObjectMeta {
                name: Some(STORAGE_VERSION_MIGRATION_CRD.to_string()),
                ..Default::default()
            },
            ..Default::default()
        });
        self
    }

    fn with_cluster_manager(self, applied: bool, deleting: bool) -> Self {
        let mut cm = ClusterManager::new("cluster-manager", ClusterManagerSpec::default());
        let status = if applied {
            ConditionStatus::True
        } else {
            ConditionStatus::False
        };
        cm.status = Some(ClusterManagerStatus {
            conditions: vec![Condition::new(CONDITION_APPLIED, status, "ClusterManagerApplied", "")],
            ..Default::default()
        });
        if deleting {
            cm.metadata.deletion_timestamp = Some(Time(Utc::now()));
            cm.metadata.finalizers = Some(vec!["operator.open-cluster-management.io/cleanup".into()]);
        }
        self.cluster_managers.insert(cm);
        self
    }

    fn with_existing_migration(self, name: &str) -> Self {
        self.migrations.insert(StorageVersionMigration::new(
            name,
            StorageVersionMigrationSpec::default(),
        ));
        self
    }

    async fn sync(&self) -> Action {
        reconcile("cluster-manager".to_string(), self.ctx.clone())
            .await
            .expect("sync succeeds")
    }
}

fn migration_spec(resource: &str) -> StorageVersionMigrationSpec {
    StorageVersionMigrationSpec {
        resource: GroupVersionResource {
            group: "cluster.open-cluster-management.io".to_string(),
            version: "v1beta1".to_string(),
            resource: resource.to_string(),
        },
        ..Default::default()
    }
}

#[tokio::test]
async fn missing_cluster_manager_is_a_no_op() {
    let h = Harness::new().with_migration_crd();
    assert_eq!(h.sync().await, Action::await_change());
    assert!(h.migrations.actions().is_empty());
    assert!(h.crds.actions().is_empty());
}

/// Scenario 1: the storage version migrator is not installed
#[tokio::test]
async fn without_migration_crd_nothing_is_applied() {
    let h = Harness::new().with_cluster_manager(true, false);

    assert_eq!(h.sync().await, Action::await_change());
    assert!(h.migrations.actions().is_empty());
    assert_eq!(h.cluster_managers.mutation_count(), 0);
    assert!(h.events.events().is_empty());
}

/// Scenario 2: the hub is not applied yet
#[tokio::test]
async fn waits_for_applied_before_migrating() {
    let h = Harness::new()
        .with_migration_crd()
        .with_cluster_manager(false, false);

    let action = h.sync().await;
    assert_eq!(action, Action::requeue(APPLIED_POLL_INTERVAL));
    assert_eq!(action.requeue_after(), Some(Duration::from_secs(5)));
    assert!(h.migrations.actions().is_empty());
}

/// Scenario 3: both migration requests are missing
#[tokio::test]
async fn creates_missing_migrations_then_settles() {
    let h = Harness::new()
        .with_migration_crd()
        .with_cluster_manager(true, false);

    assert_eq!(h.sync().await, Action::await_change());
    assert_eq!(h.migrations.verbs(), vec!["get", "create", "get", "create"]);
    let created: Vec<String> = h
        .migrations
        .actions()
        .into_iter()
        .filter(|a| a.verb == Verb::Create)
        .map(|a| a.name)
        .collect();
    assert_eq!(created, vec![SETS.to_string(), BINDINGS.to_string()]);
    assert_eq!(
        h.migrations.snapshot(None, SETS).unwrap().spec,
        migration_spec("managedclustersets")
    );
    assert_eq!(
        h.events.reasons(),
        vec!["StorageVersionMigrationCreated", "StorageVersionMigrationCreated"]
    );

    h.migrations.clear_actions();
    h.sync().await;
    assert_eq!(h.migrations.verbs(), vec!["get", "get"]);
    assert_eq!(h.migrations.mutation_count(), 0);
}

/// Scenario 4: one request already exists with a stale spec
#[tokio::test]
async fn creates_one_and_updates_the_existing_one() {
    let h = Harness::new()
        .with_migration_crd()
        .with_cluster_manager(true, false)
        .with_existing_migration(BINDINGS);

    h.sync().await;
    assert_eq!(h.migrations.verbs(), vec!["get", "create", "get", "update"]);
    let actions = h.migrations.actions();
    assert_eq!(actions[1].name, SETS);
    assert_eq!(actions[3].name, BINDINGS);

    let bindings = h.migrations.snapshot(None, BINDINGS).unwrap();
    assert_eq!(bindings.spec, migration_spec("managedclustersetbindings"));
    assert_eq!(
        h.events.reasons(),
        vec!["StorageVersionMigrationCreated", "StorageVersionMigrationUpdated"]
    );
}

/// Scenario 5: the ClusterManager is being deleted before it was applied
#[tokio::test]
async fn deletion_removes_migrations_without_waiting_for_applied() {
    let h = Harness::new()
        .with_migration_crd()
        .with_cluster_manager(false, true)
        .with_existing_migration(SETS)
        .with_existing_migration(BINDINGS);

    assert_eq!(h.sync().await, Action::await_change());
    assert_eq!(h.migrations.verbs(), vec!["get", "delete", "get", "delete"]);
    assert!(h.migrations.objects().is_empty());
    assert_eq!(
        h.events.reasons(),
        vec!["StorageVersionMigrationDeleted", "StorageVersionMigrationDeleted"]
    );
}

#[tokio::test]
async fn deletion_with_nothing_left_issues_no_deletes() {
    let h = Harness::new()
        .with_migration_crd()
        .with_cluster_manager(true, true);

    h.sync().await;
    assert_eq!(h.migrations.verbs(), vec!["get", "get"]);
    assert_eq!(h.migrations.mutation_count(), 0);
}

/// Story: the store rejects one of the two creates
///
/// The sibling is still created, the failure is reported as a warning
/// event, and the returned error names the failed object so the scheduler
/// retries. The retry only creates what is still missing.
#[tokio::test]
async fn story_one_failed_create_is_retried_alone() {
    let h = Harness::new()
        .with_migration_crd()
        .with_cluster_manager(true, false);
    h.migrations
        .fail_once(Verb::Create, Some(SETS), Failure::Unavailable);

    let err = reconcile("cluster-manager".to_string(), h.ctx.clone())
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert!(err.to_string().contains(SETS));
    assert!(h.migrations.snapshot(None, BINDINGS).is_some());
    assert!(h.migrations.snapshot(None, SETS).is_none());
    assert_eq!(
        h.events.reasons(),
        vec!["StorageVersionMigrationCreateFailed", "StorageVersionMigrationCreated"]
    );

    h.migrations.clear_actions();
    h.sync().await;
    assert_eq!(h.migrations.verbs(), vec!["get", "create", "get"]);
}

#[tokio::test]
async fn crd_lookup_failure_is_returned() {
    let h = Harness::new()
        .with_migration_crd()
        .with_cluster_manager(true, false);
    h.crds.fail_once(Verb::Get, None, Failure::Unavailable);

    let err = reconcile("cluster-manager".to_string(), h.ctx.clone())
        .await
        .unwrap_err();
    assert!(err.is_retryable());
    assert!(h.migrations.actions().is_empty());
}
