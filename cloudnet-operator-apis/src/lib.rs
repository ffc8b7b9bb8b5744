use std::fmt::Debug;

use kube::{Resource, ResourceExt};
use schemars::JsonSchema;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

mod condition;
mod dependency;
mod nat;
mod network;
mod provider_config;
mod security_group;

pub use condition::*;
pub use dependency::*;
pub use nat::*;
pub use network::*;
pub use provider_config::*;
pub use security_group::*;

pub const API_GROUP: &str = "cloudnet.io";

/// Reference to the [`ProviderConfig`] holding the connection details and credentials
/// to use for a managed resource.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, JsonSchema)]
pub struct ProviderConfigReference {
    /// Name of the ProviderConfig.
    pub name: String,
    /// Namespace of the ProviderConfig, defaults to the namespace of the referencing object.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ProviderConfigReference {
    pub fn new<S: Into<String>>(name: S) -> Self {
        Self {
            name: name.into(),
            namespace: None,
        }
    }
}

/// Resolved dependencies of kinds which do not depend on other resources.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Eq, Clone, JsonSchema)]
pub struct NoDependencies {}

/// Observed state shared by all managed cloud resources.
#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, JsonSchema)]
pub struct ManagedStatus<S, R> {
    /// Latest available observations of the resource's state.
    #[serde(default, skip_serializing_if = "ConditionSet::is_empty")]
    pub conditions: ConditionSet,
    /// The provider's ID of the external resource, empty until it was created.
    #[serde(rename = "externalID", default, skip_serializing_if = "String::is_empty")]
    pub external_id: String,
    /// External IDs materialized from the resource's dependency references.
    #[serde(
        rename = "resolvedDependencies",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub resolved_dependencies: Option<R>,
    /// The generation of the most recently observed spec.
    #[serde(rename = "observedGeneration", skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// Timestamp of the last successful sync with the provider.
    #[serde(rename = "lastSyncTime", skip_serializing_if = "Option::is_none")]
    pub last_sync_time: Option<String>,
    /// The last spec successfully applied to the external resource, used to detect drift.
    #[serde(rename = "lastAppliedSpec", skip_serializing_if = "Option::is_none")]
    pub last_applied_spec: Option<S>,
}

impl<S, R> Default for ManagedStatus<S, R> {
    fn default() -> Self {
        Self {
            conditions: Default::default(),
            external_id: Default::default(),
            resolved_dependencies: None,
            observed_generation: None,
            last_sync_time: None,
            last_applied_spec: None,
        }
    }
}

/// Uniform access to the desired and observed state of a managed cloud resource.
pub trait Managed: Resource<DynamicType = ()> + Sized {
    type Spec: Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static;
    type Resolved: Clone + Debug + PartialEq + Serialize + DeserializeOwned + Send + Sync + 'static;

    fn desired_spec(&self) -> &Self::Spec;

    fn managed_status(&self) -> Option<&ManagedStatus<Self::Spec, Self::Resolved>>;

    /// Mutable access to the status, initializing an empty one if missing.
    fn managed_status_mut(&mut self) -> &mut ManagedStatus<Self::Spec, Self::Resolved>;

    fn provider_config_ref(&self) -> &ProviderConfigReference;

    fn orphan_on_delete(&self) -> bool;

    fn external_id(&self) -> &str {
        self.managed_status()
            .map(|s| s.external_id.as_str())
            .unwrap_or("")
    }

    fn resolved_dependencies(&self) -> Option<&Self::Resolved> {
        self.managed_status()
            .and_then(|s| s.resolved_dependencies.as_ref())
    }

    fn conditions(&self) -> Option<&ConditionSet> {
        self.managed_status().map(|s| &s.conditions)
    }

    /// `{namespace}/{name}` of the object.
    fn id(&self) -> String {
        format!(
            "{}/{}",
            self.namespace().as_deref().unwrap_or(""),
            self.name_any()
        )
    }
}

macro_rules! managed {
    ($kind:ty, $spec:ty, $resolved:ty) => {
        impl $crate::Managed for $kind {
            type Spec = $spec;
            type Resolved = $resolved;

            fn desired_spec(&self) -> &$spec {
                &self.spec
            }

            fn managed_status(&self) -> Option<&$crate::ManagedStatus<$spec, $resolved>> {
                self.status.as_ref()
            }

            fn managed_status_mut(&mut self) -> &mut $crate::ManagedStatus<$spec, $resolved> {
                self.status.get_or_insert_with(Default::default)
            }

            fn provider_config_ref(&self) -> &$crate::ProviderConfigReference {
                &self.spec.provider_config_ref
            }

            fn orphan_on_delete(&self) -> bool {
                self.spec.orphan_on_delete
            }
        }
    };
}
pub(crate) use managed;
