//! Aggregation of health signals into status conditions
//!
//! Controllers gather independent [`Signal`]s (secret present, deployment
//! replicas available, certificate not expired) and fold them into named
//! conditions. Reasons are deterministic: the same signals in the same
//! order always give the same reason string.

use std::time::Duration;

use chrono::{DateTime, Utc};
use k8s_openapi::api::apps::v1::Deployment;
use ocm_common::crd::{Condition, ConditionStatus};

/// Healthy deployments
pub const DEPLOYMENTS_FUNCTIONAL: &str = "DeploymentsFunctional";
/// A deployment is missing or has fewer available replicas than desired
pub const UNAVAILABLE_PODS: &str = "UnavailablePods";
/// No deployment has an available replica
pub const NO_AVAILABLE_PODS: &str = "NoAvailablePods";
/// Reason used when no signal failed but some could not be evaluated
pub const UNKNOWN_REASON: &str = "Unknown";

/// Health of one input
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignalState {
    /// The input is fine
    Healthy,
    /// The input is broken
    Failing,
    /// The input could not be evaluated
    Unknown,
}

/// One health input with its reason token
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signal {
    /// Health of the input
    pub state: SignalState,
    /// Machine-readable reason (e.g. "BootstrapSecretMissing")
    pub reason: String,
    /// Human-readable detail
    pub message: String,
}

impl Signal {
    /// A healthy signal
    pub fn healthy(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_state(SignalState::Healthy, reason, message)
    }

    /// A failing signal
    pub fn failing(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_state(SignalState::Failing, reason, message)
    }

    /// A signal that could not be evaluated
    pub fn unknown(reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self::with_state(SignalState::Unknown, reason, message)
    }

    fn with_state(state: SignalState, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            state,
            reason: reason.into(),
            message: message.into(),
        }
    }

    /// Whether the signal is failing
    pub fn is_failing(&self) -> bool {
        self.state == SignalState::Failing
    }
}

/// Which signals contribute to a degraded reason
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReasonPolicy {
    /// Only failing signals
    #[default]
    Failing,
    /// Every signal, healthy ones included
    AllSignals,
}

/// A `*Degraded` condition computed from ordered signals
#[derive(Clone, Debug)]
pub struct DegradedCategory {
    condition_type: String,
    functional_reason: String,
    reason_policy: ReasonPolicy,
}

impl DegradedCategory {
    /// Category reporting `condition_type`, with `functional_reason` when healthy
    pub fn new(condition_type: impl Into<String>, functional_reason: impl Into<String>) -> Self {
        Self {
            condition_type: condition_type.into(),
            functional_reason: functional_reason.into(),
            reason_policy: ReasonPolicy::default(),
        }
    }

    /// Change which signals make up the degraded reason
    pub fn with_reason_policy(mut self, policy: ReasonPolicy) -> Self {
        self.reason_policy = policy;
        self
    }

    /// Condition type this category reports
    pub fn condition_type(&self) -> &str {
        &self.condition_type
    }

    /// Fold `signals` into the category's condition
    ///
    /// - any failing: `True`, reasons comma-joined in declaration order
    /// - none failing, some unknown: `Unknown` with reason `Unknown`
    /// - all healthy: `False` with the functional reason
    pub fn aggregate(&self, signals: &[Signal]) -> Condition {
        if signals.iter().any(Signal::is_failing) {
            let chosen: Vec<&Signal> = match self.reason_policy {
                ReasonPolicy::Failing => signals.iter().filter(|s| s.is_failing()).collect(),
                ReasonPolicy::AllSignals => signals.iter().collect(),
            };
            return Condition::new(
                &self.condition_type,
                ConditionStatus::True,
                join_reasons(&chosen),
                join_messages(&chosen),
            );
        }

        let unknown: Vec<&Signal> = signals
            .iter()
            .filter(|s| s.state == SignalState::Unknown)
            .collect();
        if !unknown.is_empty() {
            return Condition::new(
                &self.condition_type,
                ConditionStatus::Unknown,
                UNKNOWN_REASON,
                join_messages(&unknown),
            );
        }

        let all: Vec<&Signal> = signals.iter().collect();
        Condition::new(
            &self.condition_type,
            ConditionStatus::False,
            &self.functional_reason,
            join_messages(&all),
        )
    }
}

fn join_reasons(signals: &[&Signal]) -> String {
    signals
        .iter()
        .map(|s| s.reason.as_str())
        .collect::<Vec<_>>()
        .join(",")
}

fn join_messages(signals: &[&Signal]) -> String {
    signals
        .iter()
        .map(|s| s.message.as_str())
        .filter(|m| !m.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn available_replicas(deployment: &Deployment) -> i32 {
    deployment
        .status
        .as_ref()
        .and_then(|s| s.available_replicas)
        .unwrap_or(0)
}

/// Signal for one deployment against its desired replica count
pub fn deployment_signal(name: &str, deployment: Option<&Deployment>, desired_replicas: i32) -> Signal {
    let Some(deployment) = deployment else {
        return Signal::failing(UNAVAILABLE_PODS, format!("deployment {name} is not found"));
    };
    let available = available_replicas(deployment);
    if available < desired_replicas {
        Signal::failing(
            UNAVAILABLE_PODS,
            format!("{available} of requested {desired_replicas} pods are available for deployment {name}"),
        )
    } else {
        Signal::healthy(
            DEPLOYMENTS_FUNCTIONAL,
            format!("{available} of requested {desired_replicas} pods are available for deployment {name}"),
        )
    }
}

/// `True` with `available_reason` when at least one deployment has an
/// available replica, `False` with `NoAvailablePods` otherwise
pub fn availability(
    condition_type: &str,
    available_reason: &str,
    deployments: &[Option<&Deployment>],
) -> Condition {
    let available = deployments
        .iter()
        .flatten()
        .any(|d| available_replicas(d) >= 1);
    if available {
        Condition::new(
            condition_type,
            ConditionStatus::True,
            available_reason,
            "at least one pod is available",
        )
    } else {
        Condition::new(
            condition_type,
            ConditionStatus::False,
            NO_AVAILABLE_PODS,
            "no pods are available",
        )
    }
}

/// Signal for something that stops being valid at `not_after`
///
/// Evaluated against the caller's `now`, so the result only changes when
/// the controller re-aggregates after the expiry.
pub fn expiry_signal(
    now: DateTime<Utc>,
    not_after: DateTime<Utc>,
    subject: &str,
    expired_reason: &str,
    functional_reason: &str,
) -> Signal {
    if not_after <= now {
        Signal::failing(
            expired_reason,
            format!("{subject} expired at {}", not_after.to_rfc3339()),
        )
    } else {
        Signal::healthy(
            functional_reason,
            format!("{subject} is valid until {}", not_after.to_rfc3339()),
        )
    }
}

/// Delay until the earliest expiry still in the future
pub fn next_expiry(now: DateTime<Utc>, expiries: &[DateTime<Utc>]) -> Option<Duration> {
    expiries
        .iter()
        .filter(|t| **t > now)
        .min()
        .and_then(|t| (*t - now).to_std().ok())
}

/// Upsert `condition` by type
///
/// Keeps `lastTransitionTime` when the status did not change. Returns
/// whether anything in `conditions` changed, so callers can skip status
/// writes.
pub fn set_condition(conditions: &mut Vec<Condition>, condition: Condition) -> bool {
    let Some(existing) = conditions.iter_mut().find(|c| c.type_ == condition.type_) else {
        conditions.push(condition);
        return true;
    };

    if existing.status != condition.status {
        *existing = condition;
        return true;
    }

    let mut changed = false;
    if existing.reason != condition.reason {
        existing.reason = condition.reason;
        changed = true;
    }
    if existing.message != condition.message {
        existing.message = condition.message;
        changed = true;
    }
    if existing.observed_generation != condition.observed_generation {
        existing.observed_generation = condition.observed_generation;
        changed = true;
    }
    changed
}
