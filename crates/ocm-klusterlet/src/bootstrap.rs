//! Bootstrap reload
//!
//! The registration agent only reads the bootstrap kubeconfig at start-up.
//! When the user points the bootstrap secret at a different hub, or the
//! hub client certificate has run out, the hub kubeconfig secret and the
//! agent deployments are deleted. The klusterlet controller then recreates
//! the agents, which bootstrap again.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Secret;
use kube::Resource;
use ocm_common::crd::Klusterlet;
use ocm_common::events::{actions, reasons, EventPublisher, EventRecorder};
use ocm_common::kube_utils::is_deleting;
use ocm_reconcile::scheduler::Action;
use ocm_reconcile::store::{delete_if_exists, get_if_exists, ObjectStore};
use tracing::{debug, info, instrument, warn};

use crate::error::Result;
use crate::manifests::{registration_agent, work_agent};
use crate::secrets::{
    client_certificate_expiry, kubeconfig_server_of, BOOTSTRAP_HUB_KUBECONFIG,
    HUB_KUBECONFIG_SECRET,
};

/// Outcome of comparing the bootstrap and hub kubeconfig secrets
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReloadDecision {
    /// Leave the agents alone, checking again after the delay if set
    Keep {
        /// Time until the hub client certificate expires
        recheck_after: Option<Duration>,
    },
    /// Delete the hub kubeconfig and the agents
    Reload(String),
}

impl ReloadDecision {
    fn keep() -> Self {
        Self::Keep {
            recheck_after: None,
        }
    }
}

fn server_of(secret: &Secret) -> Option<String> {
    kubeconfig_server_of(secret).unwrap_or_else(|e| {
        warn!(error = %e, "ignoring unreadable kubeconfig");
        None
    })
}

/// Decide whether the agents must bootstrap again
///
/// Nothing is reloaded while either secret lacks a readable kubeconfig,
/// since the agents are still bootstrapping. A new secret triggers another
/// reconcile.
pub fn decide(
    now: DateTime<Utc>,
    bootstrap: Option<&Secret>,
    hub: Option<&Secret>,
) -> ReloadDecision {
    let (Some(bootstrap), Some(hub)) = (bootstrap, hub) else {
        return ReloadDecision::keep();
    };
    let (Some(bootstrap_server), Some(hub_server)) = (server_of(bootstrap), server_of(hub)) else {
        return ReloadDecision::keep();
    };

    if bootstrap_server != hub_server {
        return ReloadDecision::Reload(format!(
            "bootstrap server changed from {hub_server} to {bootstrap_server}"
        ));
    }

    match client_certificate_expiry(hub) {
        Ok(Some(not_after)) if not_after <= now => ReloadDecision::Reload(format!(
            "hub client certificate expired at {}",
            not_after.to_rfc3339()
        )),
        Ok(Some(not_after)) => ReloadDecision::Keep {
            recheck_after: (not_after - now).to_std().ok(),
        },
        Ok(None) => ReloadDecision::keep(),
        Err(e) => {
            warn!(error = %e, "ignoring unreadable hub client certificate");
            ReloadDecision::keep()
        }
    }
}

/// Collaborators of the bootstrap reload controller
pub struct BootstrapContext {
    klusterlets: Arc<dyn ObjectStore<Klusterlet>>,
    secrets: Arc<dyn ObjectStore<Secret>>,
    deployments: Arc<dyn ObjectStore<Deployment>>,
    events: Arc<dyn EventPublisher>,
}

impl BootstrapContext {
    /// Bundle the stores the reload controller reads and deletes from
    pub fn new(
        klusterlets: Arc<dyn ObjectStore<Klusterlet>>,
        secrets: Arc<dyn ObjectStore<Secret>>,
        deployments: Arc<dyn ObjectStore<Deployment>>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            klusterlets,
            secrets,
            deployments,
            events,
        }
    }
}

/// Reload the agents of one Klusterlet when its hub connection went stale
#[instrument(skip_all, fields(klusterlet = %name))]
pub async fn reconcile(name: String, ctx: Arc<BootstrapContext>) -> Result<Action> {
    let Some(klusterlet) =
        get_if_exists::<Klusterlet, _>(ctx.klusterlets.as_ref(), None, &name).await?
    else {
        debug!("Klusterlet not found, nothing to do");
        return Ok(Action::await_change());
    };
    if is_deleting(&klusterlet) {
        return Ok(Action::await_change());
    }

    let namespace = Some(klusterlet.spec.agent_namespace());
    let secrets = ctx.secrets.as_ref();
    let bootstrap =
        get_if_exists::<Secret, _>(secrets, namespace, BOOTSTRAP_HUB_KUBECONFIG).await?;
    let hub = get_if_exists::<Secret, _>(secrets, namespace, HUB_KUBECONFIG_SECRET).await?;

    let reason = match decide(Utc::now(), bootstrap.as_ref(), hub.as_ref()) {
        ReloadDecision::Keep {
            recheck_after: Some(delay),
        } => return Ok(Action::requeue(delay)),
        ReloadDecision::Keep { recheck_after: None } => return Ok(Action::await_change()),
        ReloadDecision::Reload(reason) => reason,
    };

    info!(%reason, "reloading bootstrap kubeconfig");
    delete_if_exists::<Secret, _>(secrets, namespace, HUB_KUBECONFIG_SECRET).await?;
    let deployments = ctx.deployments.as_ref();
    for agent in [registration_agent(&name), work_agent(&name)] {
        if delete_if_exists::<Deployment, _>(deployments, namespace, &agent).await? {
            debug!(deployment = %agent, "deleted agent deployment");
        }
    }

    EventRecorder::new(ctx.events.clone(), klusterlet.object_ref(&()))
        .normal(reasons::BOOTSTRAP_RELOAD, actions::RECONCILE, reason)
        .await;
    Ok(Action::await_change())
}
