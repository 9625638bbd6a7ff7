//! Status types shared by the operator CRDs

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition set once every subordinate of the owner was applied
pub const CONDITION_APPLIED: &str = "Applied";

/// Condition set while at least one agent or controller pod is available
pub const CONDITION_AVAILABLE: &str = "Available";

/// Tri-state value of a condition
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Not yet determined
    #[default]
    Unknown,
}

impl ConditionStatus {
    /// Wire form of the status
    pub fn as_str(self) -> &'static str {
        match self {
            Self::True => "True",
            Self::False => "False",
            Self::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One entry of an operator resource's `status.conditions`
///
/// Conditions are keyed by `type_`; a status holds at most one entry per type.
/// `last_transition_time` only moves when `status` changes.
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g., Applied, HubConnectionDegraded)
    #[serde(rename = "type")]
    pub type_: String,

    /// Current value
    pub status: ConditionStatus,

    /// CamelCase token explaining the value
    pub reason: String,

    /// Details for humans
    #[serde(default)]
    pub message: String,

    /// When `status` last changed
    pub last_transition_time: DateTime<Utc>,

    /// Generation of the owning object this condition was computed for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Condition stamped with the current time
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: Utc::now(),
            observed_generation: None,
        }
    }

    /// Stamp the generation of the owning object
    pub fn with_observed_generation(mut self, generation: Option<i64>) -> Self {
        self.observed_generation = generation;
        self
    }

    /// Whether the condition reports `True`
    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Find the condition of the given type
pub fn find_condition<'a>(conditions: &'a [Condition], type_: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.type_ == type_)
}

/// Whether a condition of the given type exists and is `True`
pub fn is_condition_true(conditions: &[Condition], type_: &str) -> bool {
    find_condition(conditions, type_).is_some_and(Condition::is_true)
}

/// Last generation the controller produced for one subordinate resource
///
/// Identified by group/version/resource plus namespace and name so that
/// subordinates of different kinds sharing a name do not collide.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationStatus {
    /// API group ("" for core, "apps" for Deployments)
    #[serde(default)]
    pub group: String,

    /// API version
    pub version: String,

    /// Plural resource name
    pub resource: String,

    /// Namespace ("" for cluster-scoped resources)
    #[serde(default)]
    pub namespace: String,

    /// Resource name
    pub name: String,

    /// `metadata.generation` observed right after the last apply
    pub last_generation: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_status_default_is_unknown() {
        assert_eq!(ConditionStatus::default(), ConditionStatus::Unknown);
        assert_eq!(ConditionStatus::False.to_string(), "False");
    }

    #[test]
    fn condition_new_sets_fields() {
        let before = Utc::now();
        let condition = Condition::new("Applied", ConditionStatus::True, "KlusterletApplied", "ok");
        let after = Utc::now();

        assert_eq!(condition.type_, "Applied");
        assert!(condition.is_true());
        assert_eq!(condition.reason, "KlusterletApplied");
        assert!(condition.last_transition_time >= before);
        assert!(condition.last_transition_time <= after);
        assert_eq!(condition.observed_generation, None);
    }

    #[test]
    fn condition_serializes_with_kubernetes_field_names() {
        let condition = Condition::new("Applied", ConditionStatus::False, "Failed", "boom")
            .with_observed_generation(Some(3));
        let json = serde_json::to_value(&condition).unwrap();

        assert_eq!(json["type"], "Applied");
        assert_eq!(json["status"], "False");
        assert_eq!(json["observedGeneration"], 3);
        assert!(json.get("lastTransitionTime").is_some());
    }

    #[test]
    fn is_condition_true_requires_matching_type_and_status() {
        let conditions = vec![
            Condition::new("Applied", ConditionStatus::True, "Done", ""),
            Condition::new("Available", ConditionStatus::False, "NoAvailablePods", ""),
        ];
        assert!(is_condition_true(&conditions, "Applied"));
        assert!(!is_condition_true(&conditions, "Available"));
        assert!(!is_condition_true(&conditions, "Missing"));
        assert_eq!(
            find_condition(&conditions, "Available").map(|c| c.reason.as_str()),
            Some("NoAvailablePods")
        );
    }

    #[test]
    fn generation_status_round_trips_camel_case() {
        let json = serde_json::json!({
            "group": "apps",
            "version": "v1",
            "resource": "deployments",
            "namespace": "agent",
            "name": "klusterlet-work-agent",
            "lastGeneration": 4
        });
        let status: GenerationStatus = serde_json::from_value(json).unwrap();
        assert_eq!(status.last_generation, 4);
        assert_eq!(status.resource, "deployments");
    }
}
