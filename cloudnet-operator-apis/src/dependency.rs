use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Reference to another object of a known kind in the same namespace.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, JsonSchema)]
pub struct LocalObjectReference {
    /// The Kubernetes object's name (`metadata.name`).
    pub name: String,
}

/// Label based selection of exactly one object.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Eq, Clone, JsonSchema)]
pub struct LabelSelector {
    /// Labels the selected object must carry, all of them must match.
    #[serde(rename = "matchLabels", default)]
    pub match_labels: BTreeMap<String, String>,
}

impl LabelSelector {
    pub fn new<K: Into<String>, V: Into<String>>(labels: impl IntoIterator<Item = (K, V)>) -> Self {
        Self {
            match_labels: labels
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

impl std::fmt::Display for LabelSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let labels: Vec<String> = self
            .match_labels
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        write!(f, "{{{}}}", labels.join(","))
    }
}

/// Logical reference to an external resource another resource depends on.
///
/// Exactly one variant is populated, `{"id": ..}`, `{"ref": ..}` or `{"selector": ..}`.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum Dependency {
    /// The external ID of an already existing resource.
    Id(String),
    /// Direct reference to a managed resource in the same namespace.
    Ref(LocalObjectReference),
    /// Label selector matching exactly one managed resource in the same namespace.
    Selector(LabelSelector),
}

impl Dependency {
    pub fn id<S: Into<String>>(id: S) -> Self {
        Dependency::Id(id.into())
    }

    pub fn reference<S: Into<String>>(name: S) -> Self {
        Dependency::Ref(LocalObjectReference { name: name.into() })
    }
}
