//! Klusterlet health conditions
//!
//! Reports whether the agents can reach the hub (`HubConnectionDegraded`),
//! whether the agent deployments run their desired replicas
//! (`RegistrationDesiredDegraded`, `WorkDesiredDegraded`) and `Available`.
//! The hub client certificate expiry is turned into a requeue so the
//! condition flips when the certificate runs out.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Secret;
use ocm_common::crd::{Condition, Klusterlet, CONDITION_AVAILABLE};
use ocm_reconcile::conditions::{
    availability, deployment_signal, expiry_signal, next_expiry, set_condition, DegradedCategory,
    ReasonPolicy, Signal, DEPLOYMENTS_FUNCTIONAL,
};
use ocm_reconcile::scheduler::Action;
use ocm_reconcile::store::{get_if_exists, ObjectStore};
use tracing::{debug, info, instrument};

use crate::error::Result;
use crate::manifests::{registration_agent, work_agent};
use crate::secrets::{
    client_certificate_expiry, secret_data, BOOTSTRAP_HUB_KUBECONFIG, HUB_KUBECONFIG_SECRET,
    KUBECONFIG_KEY,
};

/// Whether the agents can connect to the hub
pub const HUB_CONNECTION_DEGRADED: &str = "HubConnectionDegraded";
/// Registration agent health
pub const REGISTRATION_DESIRED_DEGRADED: &str = "RegistrationDesiredDegraded";
/// Work agent health
pub const WORK_DESIRED_DEGRADED: &str = "WorkDesiredDegraded";

/// `HubConnectionDegraded` reason when the hub is reachable
pub const HUB_CONNECTION_FUNCTIONAL: &str = "HubConnectionFunctional";
/// Bootstrap secret absent or without a kubeconfig
pub const BOOTSTRAP_SECRET_MISSING: &str = "BootstrapSecretMissing";
/// Bootstrap secret carries a kubeconfig
pub const BOOTSTRAP_SECRET_FUNCTIONAL: &str = "BootstrapSecretFunctional";
/// Hub kubeconfig secret absent, incomplete or unreadable
pub const HUB_KUBECONFIG_MISSING: &str = "HubKubeConfigMissing";
/// Hub client certificate past its `notAfter`
pub const HUB_KUBECONFIG_EXPIRED: &str = "HubKubeConfigExpired";
/// Hub kubeconfig secret usable
pub const HUB_KUBECONFIG_FUNCTIONAL: &str = "HubKubeConfigFunctional";
/// `Available` reason when an agent pod is up
pub const KLUSTERLET_AVAILABLE: &str = "klusterletAvailable";

/// Observed inputs of the status conditions
#[derive(Clone, Debug, Default)]
pub struct AgentObservation {
    /// Bootstrap kubeconfig secret
    pub bootstrap_secret: Option<Secret>,
    /// Hub kubeconfig secret written by the registration agent
    pub hub_secret: Option<Secret>,
    /// Registration agent deployment
    pub registration: Option<Deployment>,
    /// Work agent deployment
    pub work: Option<Deployment>,
}

fn bootstrap_signal(secret: Option<&Secret>) -> Signal {
    match secret.and_then(|s| secret_data(s, KUBECONFIG_KEY)) {
        Some(_) => Signal::healthy(
            BOOTSTRAP_SECRET_FUNCTIONAL,
            format!("bootstrap secret {BOOTSTRAP_HUB_KUBECONFIG} is present"),
        ),
        None => Signal::failing(
            BOOTSTRAP_SECRET_MISSING,
            format!("bootstrap secret {BOOTSTRAP_HUB_KUBECONFIG} has no kubeconfig"),
        ),
    }
}

fn hub_signal(now: DateTime<Utc>, secret: Option<&Secret>) -> (Signal, Option<DateTime<Utc>>) {
    let missing = |message: String| (Signal::failing(HUB_KUBECONFIG_MISSING, message), None);

    let Some(secret) = secret.filter(|s| secret_data(s, KUBECONFIG_KEY).is_some()) else {
        return missing(format!(
            "hub kubeconfig secret {HUB_KUBECONFIG_SECRET} has no kubeconfig"
        ));
    };
    match client_certificate_expiry(secret) {
        Ok(Some(not_after)) => (
            expiry_signal(
                now,
                not_after,
                "hub client certificate",
                HUB_KUBECONFIG_EXPIRED,
                HUB_KUBECONFIG_FUNCTIONAL,
            ),
            Some(not_after),
        ),
        // Token or exec credentials: nothing expires that we can see.
        Ok(None) => (
            Signal::healthy(
                HUB_KUBECONFIG_FUNCTIONAL,
                format!("hub kubeconfig {HUB_KUBECONFIG_SECRET} carries no client certificate"),
            ),
            None,
        ),
        Err(e) => missing(e.to_string()),
    }
}

fn desired_replicas(deployment: Option<&Deployment>) -> i32 {
    deployment
        .and_then(|d| d.spec.as_ref())
        .and_then(|s| s.replicas)
        .unwrap_or(1)
}

/// Conditions for a Klusterlet and the expiry of its hub certificate
///
/// Once the hub kubeconfig works the bootstrap secret no longer matters,
/// so it only contributes to the reason while the hub side is failing.
pub fn agent_conditions(
    now: DateTime<Utc>,
    klusterlet: &str,
    observed: &AgentObservation,
) -> (Vec<Condition>, Option<DateTime<Utc>>) {
    let (hub, expiry) = hub_signal(now, observed.hub_secret.as_ref());
    let connection = if hub.is_failing() {
        vec![bootstrap_signal(observed.bootstrap_secret.as_ref()), hub]
    } else {
        vec![hub]
    };

    let registration = observed.registration.as_ref();
    let work = observed.work.as_ref();
    let conditions = vec![
        DegradedCategory::new(HUB_CONNECTION_DEGRADED, HUB_CONNECTION_FUNCTIONAL)
            .with_reason_policy(ReasonPolicy::AllSignals)
            .aggregate(&connection),
        DegradedCategory::new(REGISTRATION_DESIRED_DEGRADED, DEPLOYMENTS_FUNCTIONAL).aggregate(&[
            deployment_signal(
                &registration_agent(klusterlet),
                registration,
                desired_replicas(registration),
            ),
        ]),
        DegradedCategory::new(WORK_DESIRED_DEGRADED, DEPLOYMENTS_FUNCTIONAL).aggregate(&[
            deployment_signal(&work_agent(klusterlet), work, desired_replicas(work)),
        ]),
        availability(CONDITION_AVAILABLE, KLUSTERLET_AVAILABLE, &[registration, work]),
    ];
    (conditions, expiry)
}

/// Collaborators of the status controller
pub struct StatusContext {
    klusterlets: Arc<dyn ObjectStore<Klusterlet>>,
    secrets: Arc<dyn ObjectStore<Secret>>,
    deployments: Arc<dyn ObjectStore<Deployment>>,
}

impl StatusContext {
    /// Bundle the stores the status controller reads and writes
    pub fn new(
        klusterlets: Arc<dyn ObjectStore<Klusterlet>>,
        secrets: Arc<dyn ObjectStore<Secret>>,
        deployments: Arc<dyn ObjectStore<Deployment>>,
    ) -> Self {
        Self {
            klusterlets,
            secrets,
            deployments,
        }
    }

    async fn observe(&self, klusterlet: &Klusterlet, name: &str) -> Result<AgentObservation> {
        let namespace = Some(klusterlet.spec.agent_namespace());
        let secrets = self.secrets.as_ref();
        let deployments = self.deployments.as_ref();
        Ok(AgentObservation {
            bootstrap_secret: get_if_exists::<Secret, _>(secrets, namespace, BOOTSTRAP_HUB_KUBECONFIG)
                .await?,
            hub_secret: get_if_exists::<Secret, _>(secrets, namespace, HUB_KUBECONFIG_SECRET).await?,
            registration: get_if_exists::<Deployment, _>(
                deployments,
                namespace,
                &registration_agent(name),
            )
            .await?,
            work: get_if_exists::<Deployment, _>(deployments, namespace, &work_agent(name)).await?,
        })
    }
}

/// Refresh the health conditions of one Klusterlet
#[instrument(skip_all, fields(klusterlet = %name))]
pub async fn reconcile(name: String, ctx: Arc<StatusContext>) -> Result<Action> {
    let Some(klusterlet) =
        get_if_exists::<Klusterlet, _>(ctx.klusterlets.as_ref(), None, &name).await?
    else {
        debug!("Klusterlet not found, nothing to do");
        return Ok(Action::await_change());
    };

    let observed = ctx.observe(&klusterlet, &name).await?;
    let now = Utc::now();
    let (conditions, expiry) = agent_conditions(now, &name, &observed);

    let generation = klusterlet.metadata.generation;
    let mut status = klusterlet.status.clone().unwrap_or_default();
    let mut changed = false;
    for condition in conditions {
        changed |= set_condition(
            &mut status.conditions,
            condition.with_observed_generation(generation),
        );
    }

    if changed {
        let mut updated = klusterlet;
        updated.status = Some(status);
        ctx.klusterlets.update_status(&updated).await?;
        info!("updated Klusterlet conditions");
    }

    let expiries: Vec<DateTime<Utc>> = expiry.into_iter().collect();
    Ok(match next_expiry(now, &expiries) {
        Some(delay) => Action::requeue(delay),
        None => Action::await_change(),
    })
}
