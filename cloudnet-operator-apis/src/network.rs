use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{Dependency, ManagedStatus, NoDependencies, ProviderConfigReference};

/// Virtual private network (VPC) specification.
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cloudnet.io",
    version = "v1alpha1",
    kind = "Network",
    derive = "PartialEq",
    status = "NetworkStatus",
    namespaced,
    printcolumn = r#"{
        "name":"Ready",
        "type": "string",
        "jsonPath": ".status.conditions[?(@.type==\"Ready\")].status"
    }"#,
    printcolumn = r#"{
        "name":"Synced",
        "type": "string",
        "jsonPath": ".status.conditions[?(@.type==\"Synced\")].status"
    }"#,
    printcolumn = r#"{
        "name":"ExternalID",
        "type": "string",
        "jsonPath": ".status.externalID"
    }"#
)]
#[serde(rename_all = "camelCase")]
pub struct NetworkSpec {
    /// The ProviderConfig to use for authentication.
    pub provider_config_ref: ProviderConfigReference,
    /// Optional human-readable description.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// The network's address range, immutable after creation.
    pub cidr: String,
    /// Keep the external resource when this object is deleted.
    #[serde(default)]
    pub orphan_on_delete: bool,
}

pub type NetworkStatus = ManagedStatus<NetworkSpec, NoDependencies>;

crate::managed!(Network, NetworkSpec, NoDependencies);

/// Subnet within a [`Network`].
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cloudnet.io",
    version = "v1alpha1",
    kind = "Subnet",
    derive = "PartialEq",
    status = "SubnetStatus",
    namespaced,
    printcolumn = r#"{
        "name":"Ready",
        "type": "string",
        "jsonPath": ".status.conditions[?(@.type==\"Ready\")].status"
    }"#,
    printcolumn = r#"{
        "name":"ExternalID",
        "type": "string",
        "jsonPath": ".status.externalID"
    }"#
)]
#[serde(rename_all = "camelCase")]
pub struct SubnetSpec {
    pub provider_config_ref: ProviderConfigReference,
    /// The network this subnet belongs to.
    pub network: Dependency,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// The subnet's address range, must be within the network's range.
    pub cidr: String,
    /// The gateway address, must be within `cidr`.
    #[serde(rename = "gatewayIP")]
    pub gateway_ip: String,
    #[serde(default)]
    pub orphan_on_delete: bool,
}

#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Eq, Clone, JsonSchema)]
pub struct SubnetResolved {
    #[serde(rename = "networkID", default, skip_serializing_if = "String::is_empty")]
    pub network_id: String,
}

pub type SubnetStatus = ManagedStatus<SubnetSpec, SubnetResolved>;

crate::managed!(Subnet, SubnetSpec, SubnetResolved);
