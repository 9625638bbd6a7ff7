//! Klusterlet deployment controller
//!
//! Renders the agent namespace and the registration and work agent
//! deployments for each Klusterlet, keeps them in sync with the spec and
//! reports the outcome as the `Applied` condition. A finalizer makes sure
//! the agent deployments are removed before the Klusterlet goes away.

use std::sync::Arc;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Node};
use kube::{Resource, ResourceExt};
use ocm_common::crd::{Condition, ConditionStatus, Klusterlet, CONDITION_APPLIED};
use ocm_common::events::{actions, reasons, EventPublisher, EventRecorder};
use ocm_common::kube_utils::{has_finalizer, is_deleting};
use ocm_reconcile::apply::{Applier, StoreSet};
use ocm_reconcile::conditions::set_condition;
use ocm_reconcile::generation::GenerationTracker;
use ocm_reconcile::manifest::{ManifestTemplates, SchemeRegistry};
use ocm_reconcile::scheduler::Action;
use ocm_reconcile::store::{get_if_exists, ObjectStore};
use tracing::{debug, info, instrument, warn};

use crate::error::Result;
use crate::manifests::{self, AgentValues, AGENT_ARTIFACTS, DEPLOYMENT_ARTIFACTS};

/// Finalizer guarding removal of the agent deployments
pub const KLUSTERLET_FINALIZER: &str = "operator.open-cluster-management.io/klusterlet-cleanup";
/// `Applied` reason after a successful apply
pub const KLUSTERLET_APPLIED: &str = "KlusterletApplied";
/// `Applied` reason when at least one artifact failed
pub const MANIFEST_APPLY_FAILED: &str = "ManifestApplyFailed";

const CONTROL_PLANE_LABELS: &[&str] = &[
    "node-role.kubernetes.io/control-plane",
    "node-role.kubernetes.io/master",
];

/// Agent replicas for a cluster: 3 with an HA control plane, otherwise 1
pub fn agent_replicas(nodes: &[Node]) -> i32 {
    let control_plane = nodes
        .iter()
        .filter(|node| {
            let labels = node.labels();
            CONTROL_PLANE_LABELS.iter().any(|l| labels.contains_key(*l))
        })
        .count();
    if control_plane > 1 {
        3
    } else {
        1
    }
}

/// Collaborators of the klusterlet controller
pub struct KlusterletContext {
    klusterlets: Arc<dyn ObjectStore<Klusterlet>>,
    nodes: Arc<dyn ObjectStore<Node>>,
    stores: StoreSet,
    registry: Arc<SchemeRegistry>,
    templates: ManifestTemplates,
    tracker: GenerationTracker,
    events: Arc<dyn EventPublisher>,
}

impl KlusterletContext {
    /// Build the context, compiling the embedded manifests
    pub fn new(
        klusterlets: Arc<dyn ObjectStore<Klusterlet>>,
        nodes: Arc<dyn ObjectStore<Node>>,
        namespaces: Arc<dyn ObjectStore<Namespace>>,
        deployments: Arc<dyn ObjectStore<Deployment>>,
        registry: Arc<SchemeRegistry>,
        events: Arc<dyn EventPublisher>,
    ) -> Result<Self> {
        Ok(Self {
            klusterlets,
            nodes,
            stores: StoreSet::new()
                .with_namespaces(namespaces)
                .with_deployments(deployments),
            registry,
            templates: manifests::templates()?,
            tracker: GenerationTracker::new(),
            events,
        })
    }

    /// Tracker holding the generations this controller produced
    pub fn tracker(&self) -> &GenerationTracker {
        &self.tracker
    }
}

/// Reconcile the agents of one Klusterlet
#[instrument(skip_all, fields(klusterlet = %name))]
pub async fn reconcile(name: String, ctx: Arc<KlusterletContext>) -> Result<Action> {
    let Some(klusterlet) =
        get_if_exists::<Klusterlet, _>(ctx.klusterlets.as_ref(), None, &name).await?
    else {
        debug!("Klusterlet not found, nothing to do");
        return Ok(Action::await_change());
    };

    let recorder = EventRecorder::new(ctx.events.clone(), klusterlet.object_ref(&()));

    if is_deleting(&klusterlet) {
        if has_finalizer(&klusterlet, KLUSTERLET_FINALIZER) {
            cleanup(klusterlet, &ctx, &recorder).await?;
        }
        return Ok(Action::await_change());
    }

    let klusterlet = if has_finalizer(&klusterlet, KLUSTERLET_FINALIZER) {
        klusterlet
    } else {
        let mut updated = klusterlet;
        updated
            .finalizers_mut()
            .push(KLUSTERLET_FINALIZER.to_string());
        debug!("adding finalizer");
        ctx.klusterlets.update(&updated).await?
    };

    let mut status = klusterlet.status.clone().unwrap_or_default();
    ctx.tracker.hydrate(&status.generations);

    let nodes = ctx.nodes.list(None).await?;
    let values = AgentValues::new(&klusterlet, agent_replicas(&nodes));
    let source = ctx.templates.bind(&values);
    let applier = Applier::new(&ctx.registry, &ctx.stores, &ctx.tracker, &recorder);
    let result = applier.apply_all(&source, AGENT_ARTIFACTS).await;

    let generation = klusterlet.metadata.generation;
    let applied = match &result {
        Ok(artifacts) => {
            status.generations = ctx.tracker.records_for(artifacts.iter().map(|a| &a.key));
            status.observed_generation = generation;
            Condition::new(
                CONDITION_APPLIED,
                ConditionStatus::True,
                KLUSTERLET_APPLIED,
                "Klusterlet Component Applied",
            )
        }
        Err(e) => {
            warn!(error = %e, "failed to apply agent manifests");
            Condition::new(
                CONDITION_APPLIED,
                ConditionStatus::False,
                MANIFEST_APPLY_FAILED,
                e.to_string(),
            )
        }
    };

    let before = klusterlet.status.clone().unwrap_or_default();
    set_condition(
        &mut status.conditions,
        applied.with_observed_generation(generation),
    );
    if status != before {
        let mut updated = klusterlet;
        updated.status = Some(status);
        ctx.klusterlets.update_status(&updated).await?;
        debug!("updated Klusterlet status");
    }

    let artifacts = result?;
    let changed = artifacts.iter().filter(|a| a.changed).count();
    if changed > 0 {
        info!(changed, "applied agent manifests");
    }
    Ok(Action::await_change())
}

async fn cleanup(
    klusterlet: Klusterlet,
    ctx: &KlusterletContext,
    recorder: &EventRecorder,
) -> Result<()> {
    let values = AgentValues::new(&klusterlet, 1);
    let source = ctx.templates.bind(&values);
    let applier = Applier::new(&ctx.registry, &ctx.stores, &ctx.tracker, recorder);
    applier.remove_all(&source, DEPLOYMENT_ARTIFACTS).await?;

    let mut updated = klusterlet;
    updated
        .finalizers_mut()
        .retain(|f| f != KLUSTERLET_FINALIZER);
    ctx.klusterlets.update(&updated).await?;

    recorder
        .normal(
            reasons::CLEANUP_COMPLETE,
            actions::DELETE,
            "removed the agent deployments",
        )
        .await;
    info!("removed agent deployments");
    Ok(())
}
