use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::{Dependency, ManagedStatus, NoDependencies, ProviderConfigReference};

/// Security group, a named set of firewall rules.
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cloudnet.io",
    version = "v1alpha1",
    kind = "SecurityGroup",
    derive = "PartialEq",
    status = "SecurityGroupStatus",
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
pub struct SecurityGroupSpec {
    pub provider_config_ref: ProviderConfigReference,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default)]
    pub orphan_on_delete: bool,
}

pub type SecurityGroupStatus = ManagedStatus<SecurityGroupSpec, NoDependencies>;

crate::managed!(SecurityGroup, SecurityGroupSpec, NoDependencies);

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Ingress,
    Egress,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    All,
    Icmp,
    Tcp,
    Udp,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
pub enum Ethertype {
    #[default]
    IPv4,
    IPv6,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum RuleAction {
    #[default]
    Allow,
    Deny,
}

/// Single firewall rule of a [`SecurityGroup`].
#[derive(CustomResource, Debug, Clone, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "cloudnet.io",
    version = "v1alpha1",
    kind = "SecurityGroupRule",
    derive = "PartialEq",
    status = "SecurityGroupRuleStatus",
    namespaced,
    printcolumn = r#"{
        "name":"Ready",
        "type": "string",
        "jsonPath": ".status.conditions[?(@.type==\"Ready\")].status"
    }"#,
    printcolumn = r#"{
        "name":"Direction",
        "type": "string",
        "jsonPath": ".spec.direction"
    }"#
)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroupRuleSpec {
    pub provider_config_ref: ProviderConfigReference,
    /// The security group this rule belongs to.
    pub security_group: Dependency,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    pub direction: Direction,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub ethertype: Ethertype,
    /// Port ranges, e.g. `80,443` or `8000-9000`.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub multiport: String,
    #[serde(default)]
    pub action: RuleAction,
    /// Rule priority between 1 and 100.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schemars(range(min = 1, max = 100))]
    pub priority: Option<i32>,
    #[serde(default)]
    pub orphan_on_delete: bool,
}

#[derive(Serialize, Deserialize, Debug, Default, PartialEq, Eq, Clone, JsonSchema)]
pub struct SecurityGroupRuleResolved {
    #[serde(
        rename = "securityGroupID",
        default,
        skip_serializing_if = "String::is_empty"
    )]
    pub security_group_id: String,
}

pub type SecurityGroupRuleStatus = ManagedStatus<SecurityGroupRuleSpec, SecurityGroupRuleResolved>;

crate::managed!(
    SecurityGroupRule,
    SecurityGroupRuleSpec,
    SecurityGroupRuleResolved
);
