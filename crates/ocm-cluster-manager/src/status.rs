//! ClusterManager health conditions
//!
//! Folds the replica counts of the hub registration and placement
//! controllers into `HubRegistrationDegraded`, `HubPlacementDegraded` and
//! `Available`. Status is only written when a condition changed.

use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use ocm_common::crd::{ClusterManager, Condition, CONDITION_AVAILABLE};
use ocm_common::HUB_NAMESPACE;
use ocm_reconcile::conditions::{
    availability, deployment_signal, set_condition, DegradedCategory, DEPLOYMENTS_FUNCTIONAL,
};
use ocm_reconcile::scheduler::Action;
use ocm_reconcile::store::{get_if_exists, ObjectStore};
use tracing::{debug, info, instrument};

use crate::error::Result;

/// Registration controller health on the hub
pub const HUB_REGISTRATION_DEGRADED: &str = "HubRegistrationDegraded";
/// Placement controller health on the hub
pub const HUB_PLACEMENT_DEGRADED: &str = "HubPlacementDegraded";
/// `Available` reason when a hub controller pod is up
pub const CLUSTER_MANAGER_AVAILABLE: &str = "ClusterManagerAvailable";

/// Deployment name of the hub registration controller
pub fn registration_deployment(cluster_manager: &str) -> String {
    format!("{cluster_manager}-registration-controller")
}

/// Deployment name of the placement controller
pub fn placement_deployment(cluster_manager: &str) -> String {
    format!("{cluster_manager}-placement-controller")
}

/// Collaborators of the status controller
pub struct StatusContext {
    cluster_managers: Arc<dyn ObjectStore<ClusterManager>>,
    deployments: Arc<dyn ObjectStore<Deployment>>,
}

impl StatusContext {
    /// Bundle the stores the status controller reads and writes
    pub fn new(
        cluster_managers: Arc<dyn ObjectStore<ClusterManager>>,
        deployments: Arc<dyn ObjectStore<Deployment>>,
    ) -> Self {
        Self {
            cluster_managers,
            deployments,
        }
    }
}

fn desired_replicas(deployment: Option<&Deployment>) -> i32 {
    deployment
        .and_then(|d| d.spec.as_ref())
        .and_then(|s| s.replicas)
        .unwrap_or(1)
}

/// Conditions for a ClusterManager given its hub deployments
pub fn hub_conditions(
    name: &str,
    registration: Option<&Deployment>,
    placement: Option<&Deployment>,
) -> Vec<Condition> {
    let registration_signal = deployment_signal(
        &registration_deployment(name),
        registration,
        desired_replicas(registration),
    );
    let placement_signal = deployment_signal(
        &placement_deployment(name),
        placement,
        desired_replicas(placement),
    );

    vec![
        DegradedCategory::new(HUB_REGISTRATION_DEGRADED, DEPLOYMENTS_FUNCTIONAL)
            .aggregate(&[registration_signal]),
        DegradedCategory::new(HUB_PLACEMENT_DEGRADED, DEPLOYMENTS_FUNCTIONAL)
            .aggregate(&[placement_signal]),
        availability(
            CONDITION_AVAILABLE,
            CLUSTER_MANAGER_AVAILABLE,
            &[registration, placement],
        ),
    ]
}

/// Refresh the health conditions of one ClusterManager
#[instrument(skip_all, fields(cluster_manager = %name))]
pub async fn reconcile(name: String, ctx: Arc<StatusContext>) -> Result<Action> {
    let Some(cluster_manager) =
        get_if_exists::<ClusterManager, _>(ctx.cluster_managers.as_ref(), None, &name).await?
    else {
        debug!("ClusterManager not found, nothing to do");
        return Ok(Action::await_change());
    };

    let registration = get_if_exists::<Deployment, _>(
        ctx.deployments.as_ref(),
        Some(HUB_NAMESPACE),
        &registration_deployment(&name),
    )
    .await?;
    let placement = get_if_exists::<Deployment, _>(
        ctx.deployments.as_ref(),
        Some(HUB_NAMESPACE),
        &placement_deployment(&name),
    )
    .await?;

    let generation = cluster_manager.metadata.generation;
    let mut status = cluster_manager.status.clone().unwrap_or_default();
    let mut changed = false;
    for condition in hub_conditions(&name, registration.as_ref(), placement.as_ref()) {
        changed |= set_condition(
            &mut status.conditions,
            condition.with_observed_generation(generation),
        );
    }

    if changed {
        let mut updated = cluster_manager;
        updated.status = Some(status);
        ctx.cluster_managers.update_status(&updated).await?;
        info!("updated ClusterManager conditions");
    }
    Ok(Action::await_change())
}
