//! Status conditions
//!
//! Conditions are keyed by type: setting a condition whose type already exists
//! replaces it in place instead of appending a duplicate. The transition time
//! only moves when the condition's status actually changes, which is what
//! generic condition tooling (`kubectl wait`, dashboards) expects.

use chrono::{SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition represents one observation of an OSArtifact's state
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition
    pub r#type: String,

    /// Status of the condition
    pub status: ConditionStatus,

    /// Last time the status changed (RFC3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,

    /// Machine readable reason for the last transition
    #[serde(default)]
    pub reason: String,

    /// Human readable detail
    #[serde(default)]
    pub message: String,

    /// Generation of the artifact this condition was computed from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
}

impl Condition {
    /// Create a condition without a transition time; one is stamped when it is set
    pub fn new(
        condition_type: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            r#type: condition_type.into(),
            status,
            last_transition_time: None,
            reason: reason.into(),
            message: message.into(),
            observed_generation: None,
        }
    }

    /// Attach the artifact generation this condition reflects
    #[must_use]
    pub fn observed_at(mut self, generation: Option<i64>) -> Self {
        self.observed_generation = generation;
        self
    }
}

/// Tri-state condition status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, JsonSchema, PartialEq, Eq, Default)]
pub enum ConditionStatus {
    /// The condition holds
    True,
    /// The condition does not hold
    False,
    /// The controller cannot tell yet
    #[default]
    Unknown,
}

/// Find the condition of the given type
#[must_use]
pub fn find_condition<'a>(conditions: &'a [Condition], condition_type: &str) -> Option<&'a Condition> {
    conditions.iter().find(|c| c.r#type == condition_type)
}

/// Merge `new` into `conditions` by type.
///
/// Returns `true` when anything changed. An existing condition keeps its
/// `last_transition_time` unless its status flips.
pub fn set_status_condition(conditions: &mut Vec<Condition>, new: Condition) -> bool {
    let now = || Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);

    let Some(existing) = conditions.iter_mut().find(|c| c.r#type == new.r#type) else {
        let mut new = new;
        if new.last_transition_time.is_none() {
            new.last_transition_time = Some(now());
        }
        conditions.push(new);
        return true;
    };

    let mut changed = false;
    if existing.status != new.status {
        existing.status = new.status;
        existing.last_transition_time = new.last_transition_time.or_else(|| Some(now()));
        changed = true;
    }
    if existing.reason != new.reason {
        existing.reason = new.reason;
        changed = true;
    }
    if existing.message != new.message {
        existing.message = new.message;
        changed = true;
    }
    if existing.observed_generation != new.observed_generation {
        existing.observed_generation = new.observed_generation;
        changed = true;
    }
    changed
}
