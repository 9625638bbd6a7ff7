//! Wires the controllers to the Kubernetes API
//!
//! Each `build_*` function returns the futures of one operator mode. Every
//! controller gets its own queue fed by watch streams; a change to a
//! subordinate is mapped back to the name of its owning object.

use std::fmt::Debug;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Node, Secret};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::runtime::reflector::{self, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, Client, Resource, ResourceExt};
use ocm_cluster_manager::migration::{self, MigrationContext};
use ocm_cluster_manager::status as hub_status;
use ocm_common::crd::{ClusterManager, Klusterlet, StorageVersionMigration};
use ocm_common::events::{EventPublisher, KubeEventPublisher};
use ocm_common::HUB_NAMESPACE;
use ocm_klusterlet::bootstrap::{self, BootstrapContext};
use ocm_klusterlet::controller::{self as agents, KlusterletContext};
use ocm_klusterlet::secrets::{BOOTSTRAP_HUB_KUBECONFIG, HUB_KUBECONFIG_SECRET};
use ocm_klusterlet::status as agent_status;
use ocm_reconcile::manifest::SchemeRegistry;
use ocm_reconcile::scheduler::Controller;
use ocm_reconcile::store::{KubeStore, ObjectStore, StoreObject};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::OperatorConfig;

/// Boxed controller future
pub type ControllerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Field manager for every write the operator makes
pub const FIELD_MANAGER: &str = "ocm-operator";

/// Label the agent deployments carry, valued with the Klusterlet name
pub const KLUSTERLET_LABEL: &str = "operator.open-cluster-management.io/klusterlet";

/// Label on the migration requests the hub controller manages
const MANAGED_BY_SELECTOR: &str = "app.kubernetes.io/managed-by=ocm-operator";

/// Watch timeout (seconds), below the client read timeout so idle watches
/// are closed by the API server first
const WATCH_TIMEOUT_SECS: u32 = 25;

fn watch_config() -> watcher::Config {
    watcher::Config::default().timeout(WATCH_TIMEOUT_SECS)
}

fn kube_store<K: StoreObject>(client: &Client) -> Arc<dyn ObjectStore<K>> {
    Arc::new(KubeStore::<K>::new(client.clone(), FIELD_MANAGER))
}

fn publisher(client: &Client, controller: &str) -> Arc<dyn EventPublisher> {
    Arc::new(KubeEventPublisher::new(client.clone(), controller))
}

/// Changes (deletions included) of every object `api` sees
fn changes<K>(api: Api<K>, config: watcher::Config) -> impl Stream<Item = Result<K, watcher::Error>>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + 'static,
{
    watcher(api, config).touched_objects()
}

/// Names of all owning objects, kept current by a reflector
#[derive(Clone)]
struct Owners<K: Resource<DynamicType = ()> + 'static> {
    store: Store<K>,
}

impl<K> Owners<K>
where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static,
{
    /// Start the reflector; it runs until `token` is cancelled
    fn spawn(api: Api<K>, token: CancellationToken) -> Self {
        let (store, writer) = reflector::store();
        let stream = reflector::reflector(writer, watcher(api, watch_config())).applied_objects();
        tokio::spawn(async move {
            let mut stream = std::pin::pin!(stream);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    next = stream.next() => if next.is_none() { break },
                }
            }
        });
        Self { store }
    }

    fn names(&self) -> Vec<String> {
        self.store.state().iter().map(|o| o.name_any()).collect()
    }
}

fn owner_of_hub_deployment(deployment: &Deployment) -> Vec<String> {
    let name = deployment.name_any();
    ["-registration-controller", "-placement-controller"]
        .iter()
        .find_map(|suffix| name.strip_suffix(suffix))
        .map(|owner| vec![owner.to_string()])
        .unwrap_or_default()
}

fn owner_of_agent_deployment(deployment: &Deployment) -> Vec<String> {
    deployment
        .labels()
        .get(KLUSTERLET_LABEL)
        .map(|owner| vec![owner.clone()])
        .unwrap_or_default()
}

fn is_hub_connection_secret(secret: &Secret) -> bool {
    matches!(
        secret.name_any().as_str(),
        BOOTSTRAP_HUB_KUBECONFIG | HUB_KUBECONFIG_SECRET
    )
}

/// Controllers run by `ocm-operator hub`
pub fn build_hub_controllers(
    client: Client,
    config: &OperatorConfig,
    token: CancellationToken,
) -> anyhow::Result<Vec<ControllerFuture>> {
    let cluster_managers_api: Api<ClusterManager> = Api::all(client.clone());
    let owners = Owners::spawn(cluster_managers_api.clone(), token.clone());
    let cluster_managers = kube_store::<ClusterManager>(&client);
    let deployments = kube_store::<Deployment>(&client);
    let registry = Arc::new(SchemeRegistry::with_defaults());

    info!("- ClusterManager migration controller");
    let migration_ctx = Arc::new(MigrationContext::new(
        cluster_managers.clone(),
        kube_store::<CustomResourceDefinition>(&client),
        kube_store::<StorageVersionMigration>(&client),
        registry,
        publisher(&client, "cluster-manager-migration-controller"),
    )?);
    let crd_owners = owners.clone();
    let migration_owners = owners.clone();
    let migration_ctrl = Controller::new("cluster-manager-migration")
        .workers(config.workers)
        .shutdown_on(token.clone())
        .watches(
            changes(cluster_managers_api.clone(), watch_config()),
            |cm: ClusterManager| vec![cm.name_any()],
        )
        .watches(
            changes(
                Api::<CustomResourceDefinition>::all(client.clone()),
                watch_config().fields(&format!(
                    "metadata.name={}",
                    ocm_common::crd::STORAGE_VERSION_MIGRATION_CRD
                )),
            ),
            move |_: CustomResourceDefinition| crd_owners.names(),
        )
        .watches(
            changes(
                Api::<StorageVersionMigration>::all(client.clone()),
                watch_config().labels(MANAGED_BY_SELECTOR),
            ),
            move |_: StorageVersionMigration| migration_owners.names(),
        );

    info!("- ClusterManager status controller");
    let status_ctx = Arc::new(hub_status::StatusContext::new(cluster_managers, deployments));
    let status_ctrl = Controller::new("cluster-manager-status")
        .workers(config.workers)
        .shutdown_on(token)
        .watches(
            changes(cluster_managers_api, watch_config()),
            |cm: ClusterManager| vec![cm.name_any()],
        )
        .watches(
            changes(
                Api::<Deployment>::namespaced(client, HUB_NAMESPACE),
                watch_config(),
            ),
            |d: Deployment| owner_of_hub_deployment(&d),
        );

    Ok(vec![
        Box::pin(migration_ctrl.run(migration::reconcile, migration_ctx)),
        Box::pin(status_ctrl.run(hub_status::reconcile, status_ctx)),
    ])
}

/// Controllers run by `ocm-operator klusterlet`
pub fn build_klusterlet_controllers(
    client: Client,
    config: &OperatorConfig,
    token: CancellationToken,
) -> anyhow::Result<Vec<ControllerFuture>> {
    let klusterlets_api: Api<Klusterlet> = Api::all(client.clone());
    let owners = Owners::spawn(klusterlets_api.clone(), token.clone());
    let klusterlets = kube_store::<Klusterlet>(&client);
    let secrets = kube_store::<Secret>(&client);
    let deployments = kube_store::<Deployment>(&client);
    let agent_deployments = || {
        changes(
            Api::<Deployment>::all(client.clone()),
            watch_config().labels(KLUSTERLET_LABEL),
        )
    };
    let connection_secrets = || changes(Api::<Secret>::all(client.clone()), watch_config());

    info!("- Klusterlet controller");
    let agents_ctx = Arc::new(KlusterletContext::new(
        klusterlets.clone(),
        kube_store::<Node>(&client),
        kube_store::<Namespace>(&client),
        deployments.clone(),
        Arc::new(SchemeRegistry::with_defaults()),
        publisher(&client, "klusterlet-controller"),
    )?);
    let node_owners = owners.clone();
    let agents_ctrl = Controller::new("klusterlet")
        .workers(config.workers)
        .shutdown_on(token.clone())
        .watches(
            changes(klusterlets_api.clone(), watch_config()),
            |k: Klusterlet| vec![k.name_any()],
        )
        .watches(agent_deployments(), |d: Deployment| {
            owner_of_agent_deployment(&d)
        })
        .watches(
            changes(Api::<Node>::all(client.clone()), watch_config()),
            move |_: Node| node_owners.names(),
        );

    info!("- Klusterlet status controller");
    let status_ctx = Arc::new(agent_status::StatusContext::new(
        klusterlets.clone(),
        secrets.clone(),
        deployments.clone(),
    ));
    let status_owners = owners.clone();
    let status_ctrl = Controller::new("klusterlet-status")
        .workers(config.workers)
        .shutdown_on(token.clone())
        .watches(
            changes(klusterlets_api.clone(), watch_config()),
            |k: Klusterlet| vec![k.name_any()],
        )
        .watches(agent_deployments(), |d: Deployment| {
            owner_of_agent_deployment(&d)
        })
        .watches(connection_secrets(), move |s: Secret| {
            if is_hub_connection_secret(&s) {
                status_owners.names()
            } else {
                vec![]
            }
        });

    info!("- Bootstrap reload controller");
    let bootstrap_ctx = Arc::new(BootstrapContext::new(
        klusterlets,
        secrets,
        deployments,
        publisher(&client, "bootstrap-controller"),
    ));
    let bootstrap_owners = owners;
    let bootstrap_ctrl = Controller::new("klusterlet-bootstrap")
        .workers(config.workers)
        .shutdown_on(token)
        .watches(
            changes(klusterlets_api, watch_config()),
            |k: Klusterlet| vec![k.name_any()],
        )
        .watches(connection_secrets(), move |s: Secret| {
            if is_hub_connection_secret(&s) {
                bootstrap_owners.names()
            } else {
                vec![]
            }
        });

    Ok(vec![
        Box::pin(agents_ctrl.run(agents::reconcile, agents_ctx)),
        Box::pin(status_ctrl.run(agent_status::reconcile, status_ctx)),
        Box::pin(bootstrap_ctrl.run(bootstrap::reconcile, bootstrap_ctx)),
    ])
}
