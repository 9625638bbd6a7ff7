//! Events reported against ClusterManagers and Klusterlets
//!
//! Controllers talk to an [`EventPublisher`]; in a cluster that is
//! [`KubeEventPublisher`], in tests a [`RecordingEventPublisher`].
//! Publishing never fails from the caller's point of view: a rejected
//! event is logged and dropped.

use std::sync::Arc;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::Client;
use parking_lot::Mutex;
use tracing::warn;

/// Sink for events about a single object
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Report `reason` (e.g. `DeploymentCreated`) for the referenced object
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    );
}

/// Publisher backed by the events API
pub struct KubeEventPublisher {
    recorder: Recorder,
}

impl KubeEventPublisher {
    /// Events are reported by `component`, e.g. `klusterlet-controller`
    pub fn new(client: Client, component: &str) -> Self {
        let reporter = Reporter {
            controller: component.to_owned(),
            instance: None,
        };
        Self {
            recorder: Recorder::new(client, reporter),
        }
    }
}

#[async_trait]
impl EventPublisher for KubeEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        let event = Event {
            type_,
            reason: reason.to_owned(),
            note,
            action: action.to_owned(),
            secondary: None,
        };
        if let Err(error) = self.recorder.publish(&event, resource_ref).await {
            warn!(reason, action, %error, "dropping event");
        }
    }
}

/// Publisher that discards everything
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(
        &self,
        _: &ObjectReference,
        _: EventType,
        _: &str,
        _: &str,
        _: Option<String>,
    ) {
    }
}

/// An event captured by [`RecordingEventPublisher`]
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RecordedEvent {
    /// Name of the object the event regards
    pub regarding: Option<String>,
    /// Whether the event was a Warning
    pub warning: bool,
    /// Reason token
    pub reason: String,
    /// Action token
    pub action: String,
    /// Human-readable note
    pub note: Option<String>,
}

/// Publisher that keeps every event in memory so tests can assert on them.
#[derive(Default)]
pub struct RecordingEventPublisher {
    events: Mutex<Vec<RecordedEvent>>,
}

impl RecordingEventPublisher {
    /// Create an empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// All events published so far, in order
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    /// Reasons of all events published so far, in order
    pub fn reasons(&self) -> Vec<String> {
        self.events.lock().iter().map(|e| e.reason.clone()).collect()
    }

    /// Drop everything recorded so far
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

#[async_trait]
impl EventPublisher for RecordingEventPublisher {
    async fn publish(
        &self,
        resource_ref: &ObjectReference,
        type_: EventType,
        reason: &str,
        action: &str,
        note: Option<String>,
    ) {
        self.events.lock().push(RecordedEvent {
            regarding: resource_ref.name.clone(),
            warning: matches!(type_, EventType::Warning),
            reason: reason.to_string(),
            action: action.to_string(),
            note,
        });
    }
}

/// A publisher bound to the object events are reported against.
///
/// Reconcilers build one per run from the owning object so lower layers
/// (the applier) can report without knowing what owns them.
#[derive(Clone)]
pub struct EventRecorder {
    publisher: Arc<dyn EventPublisher>,
    regarding: ObjectReference,
}

impl EventRecorder {
    /// Bind `publisher` to the object referenced by `regarding`
    pub fn new(publisher: Arc<dyn EventPublisher>, regarding: ObjectReference) -> Self {
        Self {
            publisher,
            regarding,
        }
    }

    /// Recorder that drops every event
    pub fn noop() -> Self {
        Self::new(Arc::new(NoopEventPublisher), ObjectReference::default())
    }

    /// Publish a Normal event
    pub async fn normal(&self, reason: &str, action: &str, note: impl Into<String>) {
        self.publisher
            .publish(
                &self.regarding,
                EventType::Normal,
                reason,
                action,
                Some(note.into()),
            )
            .await;
    }

    /// Publish a Warning event
    pub async fn warning(&self, reason: &str, action: &str, note: impl Into<String>) {
        self.publisher
            .publish(
                &self.regarding,
                EventType::Warning,
                reason,
                action,
                Some(note.into()),
            )
            .await;
    }
}

/// Reasons not tied to a subordinate kind
///
/// Applier events are derived from the subordinate kind instead
/// (`<Kind>Created`, `<Kind>UpdateFailed`, ...).
pub mod reasons {
    /// Subordinates of a deleted owner were removed
    pub const CLEANUP_COMPLETE: &str = "CleanupComplete";
    /// Hub kubeconfig was discarded so the agents bootstrap again
    pub const BOOTSTRAP_RELOAD: &str = "BootstrapReload";
}

/// Actions attached to events
pub mod actions {
    /// Creating or updating a subordinate
    pub const APPLY: &str = "Apply";
    /// Deleting a subordinate
    pub const DELETE: &str = "Delete";
    /// Controller-level work on the owner
    pub const RECONCILE: &str = "Reconcile";
}
