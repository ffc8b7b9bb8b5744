use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::ConditionSet;

/// Reference to the Secret holding the provider credentials.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, JsonSchema)]
pub struct SecretReference {
    pub name: String,
    /// Defaults to the namespace of the ProviderConfig.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Connection coordinates and credentials of a cloud provider account.
///
/// The referenced Secret must contain one of the key combinations
/// `username` and `password`, `accessKey` and `secretKey` or `token`.
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cloudnet.io",
    version = "v1alpha1",
    kind = "ProviderConfig",
    derive = "PartialEq",
    status = "ProviderConfigStatus",
    namespaced,
    printcolumn = r#"{
        "name":"Ready",
        "type": "string",
        "jsonPath": ".status.conditions[?(@.type==\"Ready\")].status"
    }"#,
    printcolumn = r#"{
        "name":"Region",
        "type": "string",
        "jsonPath": ".spec.region"
    }"#
)]
#[serde(rename_all = "camelCase")]
pub struct ProviderConfigSpec {
    /// The identity (IAM) endpoint.
    pub identity_endpoint: String,
    pub region: String,
    #[serde(rename = "projectID", default, skip_serializing_if = "String::is_empty")]
    pub project_id: String,
    pub domain_name: String,
    pub credentials_secret_ref: SecretReference,
}

#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Clone, JsonSchema)]
pub struct ProviderConfigStatus {
    #[serde(default, skip_serializing_if = "ConditionSet::is_empty")]
    pub conditions: ConditionSet,
    #[serde(rename = "observedGeneration", skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    /// Timestamp of the last successful credential validation.
    #[serde(rename = "lastValidationTime", skip_serializing_if = "Option::is_none")]
    pub last_validation_time: Option<String>,
}

impl ProviderConfig {
    pub fn conditions(&self) -> Option<&ConditionSet> {
        self.status.as_ref().map(|s| &s.conditions)
    }

    pub fn status_mut(&mut self) -> &mut ProviderConfigStatus {
        self.status.get_or_insert_with(Default::default)
    }
}
