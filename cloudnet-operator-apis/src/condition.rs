use k8s_openapi::chrono::{SecondsFormat, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition type signalling whether the resource is usable.
pub const READY: &str = "Ready";

/// Condition type signalling whether the external resource matches the desired state.
pub const SYNCED: &str = "Synced";

/// Condition type signalling whether the ProviderConfig and all dependencies are resolved.
pub const DEPENDENCIES_READY: &str = "DependenciesReady";

/// We maintain our own copy of Condition as the one from k8s_openapi does not implement JsonSchema.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize, JsonSchema)]
pub struct Condition {
    /// lastTransitionTime is the last time the condition transitioned from one status to another.
    #[serde(rename = "lastTransitionTime", skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,

    /// message is a human readable message indicating details about the transition. This may be an empty string.
    pub message: String,

    /// observedGeneration represents the .metadata.generation that the condition was set based upon.
    #[serde(rename = "observedGeneration", skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,

    /// reason contains a programmatic identifier indicating the reason for the condition's last transition.
    pub reason: String,

    /// status of the condition, one of True, False, Unknown.
    pub status: String,

    /// type of condition in CamelCase.
    #[serde(rename = "type")]
    pub type_: String,
}

impl Condition {
    pub fn new(tpe: &str, status: Option<bool>, reason: &str, message: String) -> Self {
        Self {
            last_transition_time: None,
            message,
            reason: reason.to_string(),
            status: status
                .map(|v| if v { "True" } else { "False" })
                .unwrap_or("Unknown")
                .to_string(),
            type_: tpe.to_string(),
            observed_generation: None,
        }
    }

    pub fn with_observed_generation(mut self, generation: Option<i64>) -> Self {
        self.observed_generation = generation;
        self
    }

    pub fn is_true(&self) -> bool {
        self.status == "True"
    }
}

/// Ordered set of [`Condition`]s holding at most one entry per condition type.
///
/// Updates are upserts: an existing entry keeps its position, new types are appended.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(transparent)]
pub struct ConditionSet(Vec<Condition>);

impl ConditionSet {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Condition> {
        self.0.iter()
    }

    pub fn get(&self, tpe: &str) -> Option<&Condition> {
        self.0.iter().find(|c| c.type_ == tpe)
    }

    pub fn is_true(&self, tpe: &str) -> bool {
        self.get(tpe).map(Condition::is_true).unwrap_or(false)
    }

    /// Upsert `condition` and return the resulting set.
    ///
    /// `lastTransitionTime` is only moved forward if the status of the condition changed.
    pub fn with(mut self, mut condition: Condition) -> Self {
        if let Some(existing) = self.0.iter_mut().find(|c| c.type_ == condition.type_) {
            condition.last_transition_time = if existing.status == condition.status {
                existing.last_transition_time.take().or_else(|| Some(now()))
            } else {
                Some(now())
            };
            *existing = condition;
        } else {
            condition.last_transition_time = Some(now());
            self.0.push(condition);
        }
        self
    }
}

impl From<Vec<Condition>> for ConditionSet {
    fn from(conditions: Vec<Condition>) -> Self {
        let mut set = ConditionSet::default();
        for c in conditions {
            set = set.with(c);
        }
        set
    }
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
