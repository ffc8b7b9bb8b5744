use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{Dependency, ManagedStatus, NoDependencies, ProviderConfigReference};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum PublicIpType {
    #[serde(rename = "BGP")]
    Bgp,
    Mail,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
pub enum BandwidthShareType {
    Dedicated,
    Shared,
}

/// Elastic public IP address with its bandwidth.
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cloudnet.io",
    version = "v1alpha1",
    kind = "PublicIP",
    root = "PublicIp",
    derive = "PartialEq",
    status = "PublicIpStatus",
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
pub struct PublicIpSpec {
    pub provider_config_ref: ProviderConfigReference,
    #[serde(rename = "type")]
    pub type_: PublicIpType,
    /// Bandwidth in Mbit/s.
    pub bandwidth_size: i32,
    pub bandwidth_share_type: BandwidthShareType,
    #[serde(default)]
    pub orphan_on_delete: bool,
}

pub type PublicIpStatus = ManagedStatus<PublicIpSpec, NoDependencies>;

crate::managed!(PublicIp, PublicIpSpec, NoDependencies);

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum NatGatewayType {
    Micro,
    Small,
    Medium,
    Large,
    ExtraLarge,
}

/// NAT gateway attached to a [`crate::Network`] and [`crate::Subnet`].
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cloudnet.io",
    version = "v1alpha1",
    kind = "NATGateway",
    root = "NatGateway",
    derive = "PartialEq",
    status = "NatGatewayStatus",
    namespaced,
    printcolumn = r#"{
        "name":"Ready",
        "type": "string",
        "jsonPath": ".status.conditions[?(@.type==\"Ready\")].status"
    }"#,
    printcolumn = r#"{
        "name":"Type",
        "type": "string",
        "jsonPath": ".spec.type"
    }"#
)]
#[serde(rename_all = "camelCase")]
pub struct NatGatewaySpec {
    pub provider_config_ref: ProviderConfigReference,
    pub network: Dependency,
    pub subnet: Dependency,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(rename = "type")]
    pub type_: NatGatewayType,
    #[serde(default)]
    pub orphan_on_delete: bool,
}

#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Eq, Clone, JsonSchema)]
pub struct NatGatewayResolved {
    #[serde(rename = "networkID", default, skip_serializing_if = "String::is_empty")]
    pub network_id: String,
    #[serde(rename = "subnetID", default, skip_serializing_if = "String::is_empty")]
    pub subnet_id: String,
}

pub type NatGatewayStatus = ManagedStatus<NatGatewaySpec, NatGatewayResolved>;

crate::managed!(NatGateway, NatGatewaySpec, NatGatewayResolved);

/// Source NAT rule translating a subnet's traffic to a public IP through a NAT gateway.
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cloudnet.io",
    version = "v1alpha1",
    kind = "SNATRule",
    root = "SnatRule",
    derive = "PartialEq",
    status = "SnatRuleStatus",
    namespaced,
    printcolumn = r#"{
        "name":"Ready",
        "type": "string",
        "jsonPath": ".status.conditions[?(@.type==\"Ready\")].status"
    }"#
)]
#[serde(rename_all = "camelCase")]
pub struct SnatRuleSpec {
    pub provider_config_ref: ProviderConfigReference,
    pub nat_gateway: Dependency,
    pub subnet: Dependency,
    #[serde(rename = "publicIP")]
    pub public_ip: Dependency,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub orphan_on_delete: bool,
}

#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Eq, Clone, JsonSchema)]
pub struct SnatRuleResolved {
    #[serde(
        rename = "natGatewayID",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub nat_gateway_id: String,
    #[serde(rename = "subnetID", default, skip_serializing_if = "String::is_empty")]
    pub subnet_id: String,
    #[serde(rename = "publicIPID", default, skip_serializing_if = "String::is_empty")]
    pub public_ip_id: String,
}

pub type SnatRuleStatus = ManagedStatus<SnatRuleSpec, SnatRuleResolved>;

crate::managed!(SnatRule, SnatRuleSpec, SnatRuleResolved);
