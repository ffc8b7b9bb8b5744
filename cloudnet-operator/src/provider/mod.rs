//! The boundary to the cloud provider's networking API.

use std::{collections::BTreeMap, sync::Arc};

use async_trait::async_trait;
use cloudnet_operator_apis::{
    BandwidthShareType, Direction, Ethertype, NatGatewayType, ProviderConfigSpec, Protocol,
    PublicIpType, RuleAction,
};
use k8s_openapi::api::core::v1::Secret;

use crate::retry::RetryError;

pub(crate) mod simulated;

/// Lifecycle state of an external resource, derived from its raw provider status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum State {
    Unknown,
    Provisioning,
    Ready,
    Stopped,
    Failed,
}

/// State and human readable status of an external resource.
pub(crate) trait ResourceInfo {
    fn state(&self) -> State;
    fn message(&self) -> String;
}

/// Maps a raw status to a [`State`] through per kind lists of raw values.
struct StatusTable {
    label: &'static str,
    ready: &'static [&'static str],
    failed: &'static [&'static str],
    provisioning: &'static [&'static str],
    stopped: &'static [&'static str],
}

impl StatusTable {
    fn state(&self, raw: &str) -> State {
        if self.ready.contains(&raw) {
            State::Ready
        } else if self.failed.contains(&raw) {
            State::Failed
        } else if self.provisioning.contains(&raw) {
            State::Provisioning
        } else if self.stopped.contains(&raw) {
            State::Stopped
        } else {
            State::Unknown
        }
    }

    fn message(&self, raw: &str) -> String {
        match self.state(raw) {
            State::Ready => format!("{} is active", self.label),
            State::Failed => format!("{} is in a failed state: {}", self.label, raw),
            State::Provisioning => format!("{} busy with status: {}", self.label, raw),
            State::Stopped => format!("{} is inactive.", self.label),
            State::Unknown => format!("{} is in an unhandled state: {}", self.label, raw),
        }
    }
}

const NETWORK_STATUS: StatusTable = StatusTable {
    label: "Network",
    ready: &["ACTIVE", "OK"],
    failed: &["DOWN", "ERROR", "error"],
    provisioning: &["CREATING"],
    stopped: &[],
};

const SUBNET_STATUS: StatusTable = StatusTable {
    label: "Subnet",
    ready: &["ACTIVE", "OK"],
    failed: &["DOWN", "ERROR", "error"],
    provisioning: &["CREATING", "UNKNOWN"],
    stopped: &[],
};

const NAT_GATEWAY_STATUS: StatusTable = StatusTable {
    label: "NAT gateway",
    ready: &["ACTIVE"],
    failed: &["INACTIVE", "DOWN", "ERROR"],
    provisioning: &["PENDING_CREATE", "PENDING_UPDATE", "PENDING_DELETE"],
    stopped: &[],
};

const SNAT_RULE_STATUS: StatusTable = StatusTable {
    label: "SNAT rule",
    ready: &["ACTIVE"],
    failed: &["INACTIVE", "DOWN", "ERROR"],
    provisioning: &["PENDING_CREATE", "PENDING_UPDATE", "PENDING_DELETE"],
    stopped: &[],
};

const PUBLIC_IP_STATUS: StatusTable = StatusTable {
    label: "Public IP",
    ready: &["ACTIVE", "OK", "ELB", "VPN"],
    failed: &["ERROR", "error"],
    provisioning: &[
        "BINDING",
        "NOTIFYING",
        "NOTIFY_DELETE",
        "PENDING_CREATE",
        "PENDING_UPDATE",
        "PENDING_DELETE",
    ],
    stopped: &["DOWN", "FREEZED"],
};

#[derive(thiserror::Error, Debug)]
pub(crate) enum ProviderError {
    /// The provider rejected the credentials.
    #[error("authentication failed: {0}")]
    Authentication(String),
    /// The credentials could not be read from the Secret.
    #[error("{0}")]
    Credentials(String),
    /// Provider API call failed.
    #[error("{0}")]
    Api(String),
    /// The resource reached a failed state while waiting for it to become ready.
    #[error("failed to create")]
    FailedToCreate,
    /// The request can not be expressed in the provider's API.
    #[error("{0}")]
    Invalid(String),
    /// The resource reached a state it will not recover from on its own.
    #[error("{0}")]
    Terminal(String),
    /// Waiting for the resource was cancelled or exceeded its attempts.
    #[error("{what}: {source}")]
    Wait {
        what: String,
        #[source]
        source: Box<RetryError<ProviderError>>,
    },
    /// The resource was created as `id` but did not become ready.
    #[error("{source}")]
    NotReady {
        id: String,
        #[source]
        source: Box<ProviderError>,
    },
}

impl ProviderError {
    /// ID of a resource which exists although its creation failed.
    pub(crate) fn created_id(&self) -> Option<&str> {
        match self {
            ProviderError::NotReady { id, .. } => Some(id.as_str()),
            _ => None,
        }
    }

    /// Flatten the result of a wait loop, keeping the operation's own error as is.
    pub(crate) fn from_wait(what: &str, e: RetryError<ProviderError>) -> Self {
        match e {
            RetryError::Operation(e) => e,
            e => ProviderError::Wait {
                what: what.to_string(),
                source: Box::new(e),
            },
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct NetworkInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    pub cidr: String,
    pub status: String,
}

impl ResourceInfo for NetworkInfo {
    fn state(&self) -> State {
        NETWORK_STATUS.state(&self.status)
    }

    fn message(&self) -> String {
        NETWORK_STATUS.message(&self.status)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct CreateNetworkRequest {
    pub name: String,
    pub description: String,
    pub cidr: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct NetworkUpdate {
    pub description: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct SubnetInfo {
    pub id: String,
    pub name: String,
    pub network_id: String,
    pub description: String,
    pub cidr: String,
    pub gateway_ip: String,
    pub status: String,
}

impl ResourceInfo for SubnetInfo {
    fn state(&self) -> State {
        SUBNET_STATUS.state(&self.status)
    }

    fn message(&self) -> String {
        SUBNET_STATUS.message(&self.status)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct CreateSubnetRequest {
    pub name: String,
    pub description: String,
    pub cidr: String,
    pub gateway_ip: String,
    pub network_id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct SubnetUpdate {
    pub description: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct SecurityGroupInfo {
    pub id: String,
    pub name: String,
    pub description: String,
}

/// Security groups have no status, they are ready as long as they exist.
impl ResourceInfo for SecurityGroupInfo {
    fn state(&self) -> State {
        State::Ready
    }

    fn message(&self) -> String {
        "Security Group is active".to_string()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct CreateSecurityGroupRequest {
    pub name: String,
    pub description: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct SecurityGroupUpdate {
    pub description: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct SecurityGroupRuleInfo {
    pub id: String,
    pub security_group_id: String,
    pub description: String,
    pub direction: Direction,
    pub protocol: Protocol,
    pub ethertype: Ethertype,
    pub multiport: String,
    pub action: RuleAction,
    pub priority: Option<i32>,
}

/// Security group rules have no status, they are ready as long as they exist.
impl ResourceInfo for SecurityGroupRuleInfo {
    fn state(&self) -> State {
        State::Ready
    }

    fn message(&self) -> String {
        "Security Group Rule is active".to_string()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct CreateSecurityGroupRuleRequest {
    pub security_group_id: String,
    pub description: String,
    pub direction: Direction,
    pub protocol: Protocol,
    pub ethertype: Ethertype,
    pub multiport: String,
    pub action: RuleAction,
    pub priority: Option<i32>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct SecurityGroupRuleUpdate {
    pub description: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct PublicIpInfo {
    pub id: String,
    pub name: String,
    pub address: String,
    /// Raw provider type, see [`public_ip_type`].
    pub ip_type: String,
    pub bandwidth_name: String,
    pub bandwidth_size: i32,
    /// Raw provider share type, see [`bandwidth_share_type`].
    pub bandwidth_share_type: String,
    pub status: String,
}

impl ResourceInfo for PublicIpInfo {
    fn state(&self) -> State {
        PUBLIC_IP_STATUS.state(&self.status)
    }

    fn message(&self) -> String {
        PUBLIC_IP_STATUS.message(&self.status)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct CreatePublicIpRequest {
    pub name: String,
    pub ip_type: String,
    pub bandwidth_name: String,
    pub bandwidth_size: i32,
    pub bandwidth_share_type: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct PublicIpUpdate {
    pub bandwidth_size: Option<i32>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct NatGatewayInfo {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Raw provider size, see [`nat_gateway_spec`].
    pub spec: String,
    pub network_id: String,
    pub subnet_id: String,
    pub status: String,
}

impl ResourceInfo for NatGatewayInfo {
    fn state(&self) -> State {
        NAT_GATEWAY_STATUS.state(&self.status)
    }

    fn message(&self) -> String {
        NAT_GATEWAY_STATUS.message(&self.status)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct CreateNatGatewayRequest {
    pub name: String,
    pub description: String,
    pub spec: String,
    pub network_id: String,
    pub subnet_id: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct NatGatewayUpdate {
    pub description: Option<String>,
    pub spec: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct SnatRuleInfo {
    pub id: String,
    pub nat_gateway_id: String,
    pub subnet_id: String,
    pub public_ip_id: String,
    pub description: String,
    pub status: String,
}

impl ResourceInfo for SnatRuleInfo {
    fn state(&self) -> State {
        SNAT_RULE_STATUS.state(&self.status)
    }

    fn message(&self) -> String {
        SNAT_RULE_STATUS.message(&self.status)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct CreateSnatRuleRequest {
    pub nat_gateway_id: String,
    pub subnet_id: String,
    pub public_ip_id: String,
    pub description: String,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct SnatRuleUpdate {
    pub description: Option<String>,
}

/// Raw NAT gateway size.
pub(crate) fn nat_gateway_spec(t: NatGatewayType) -> &'static str {
    match t {
        NatGatewayType::Micro => "0",
        NatGatewayType::Small => "1",
        NatGatewayType::Medium => "2",
        NatGatewayType::Large => "3",
        NatGatewayType::ExtraLarge => "4",
    }
}

/// Raw public IP type.
pub(crate) fn public_ip_type(t: PublicIpType) -> &'static str {
    match t {
        PublicIpType::Bgp => "5_bgp",
        PublicIpType::Mail => "5_mailbgp",
    }
}

/// Raw bandwidth share type.
pub(crate) fn bandwidth_share_type(t: BandwidthShareType) -> &'static str {
    match t {
        BandwidthShareType::Dedicated => "PER",
        BandwidthShareType::Shared => "WHOLE",
    }
}

pub(crate) fn bandwidth_name(public_ip_name: &str) -> String {
    format!("bandwidth-{}", public_ip_name)
}

/// CRUD operations of every supported resource kind.
///
/// `get_*` returns `Ok(None)` if the resource does not exist, `delete_*` treats
/// a missing resource as success. `create_*` returns once the resource is ready.
#[async_trait]
pub(crate) trait Provider: Send + Sync {
    /// Prove that the credentials and permissions are usable.
    async fn validate(&self) -> Result<(), ProviderError>;

    async fn create_network(&self, request: &CreateNetworkRequest) -> Result<String, ProviderError>;
    async fn get_network(&self, id: &str) -> Result<Option<NetworkInfo>, ProviderError>;
    async fn update_network(&self, id: &str, update: &NetworkUpdate) -> Result<(), ProviderError>;
    async fn delete_network(&self, id: &str) -> Result<(), ProviderError>;

    async fn create_subnet(&self, request: &CreateSubnetRequest) -> Result<String, ProviderError>;
    async fn get_subnet(&self, id: &str) -> Result<Option<SubnetInfo>, ProviderError>;
    async fn update_subnet(
        &self,
        network_id: &str,
        id: &str,
        update: &SubnetUpdate,
    ) -> Result<(), ProviderError>;
    async fn delete_subnet(&self, network_id: &str, id: &str) -> Result<(), ProviderError>;

    async fn create_security_group(
        &self,
        request: &CreateSecurityGroupRequest,
    ) -> Result<String, ProviderError>;
    async fn get_security_group(&self, id: &str) -> Result<Option<SecurityGroupInfo>, ProviderError>;
    async fn update_security_group(
        &self,
        id: &str,
        update: &SecurityGroupUpdate,
    ) -> Result<(), ProviderError>;
    async fn delete_security_group(&self, id: &str) -> Result<(), ProviderError>;

    async fn create_security_group_rule(
        &self,
        request: &CreateSecurityGroupRuleRequest,
    ) -> Result<String, ProviderError>;
    async fn get_security_group_rule(
        &self,
        id: &str,
    ) -> Result<Option<SecurityGroupRuleInfo>, ProviderError>;
    async fn update_security_group_rule(
        &self,
        id: &str,
        update: &SecurityGroupRuleUpdate,
    ) -> Result<(), ProviderError>;
    async fn delete_security_group_rule(&self, id: &str) -> Result<(), ProviderError>;

    async fn create_public_ip(&self, request: &CreatePublicIpRequest) -> Result<String, ProviderError>;
    async fn get_public_ip(&self, id: &str) -> Result<Option<PublicIpInfo>, ProviderError>;
    async fn update_public_ip(&self, id: &str, update: &PublicIpUpdate) -> Result<(), ProviderError>;
    async fn delete_public_ip(&self, id: &str) -> Result<(), ProviderError>;

    async fn create_nat_gateway(
        &self,
        request: &CreateNatGatewayRequest,
    ) -> Result<String, ProviderError>;
    async fn get_nat_gateway(&self, id: &str) -> Result<Option<NatGatewayInfo>, ProviderError>;
    async fn update_nat_gateway(
        &self,
        id: &str,
        update: &NatGatewayUpdate,
    ) -> Result<(), ProviderError>;
    async fn delete_nat_gateway(&self, id: &str) -> Result<(), ProviderError>;

    async fn create_snat_rule(&self, request: &CreateSnatRuleRequest) -> Result<String, ProviderError>;
    async fn get_snat_rule(&self, id: &str) -> Result<Option<SnatRuleInfo>, ProviderError>;
    async fn update_snat_rule(&self, id: &str, update: &SnatRuleUpdate) -> Result<(), ProviderError>;
    async fn delete_snat_rule(&self, id: &str) -> Result<(), ProviderError>;
}

/// Credentials read from a ProviderConfig's Secret.
#[derive(Clone, PartialEq, Eq)]
pub(crate) enum Credentials {
    Password { username: String, password: String },
    AccessKey { access_key: String, secret_key: String },
    Token(String),
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Password { username, .. } => f
                .debug_struct("Password")
                .field("username", username)
                .finish_non_exhaustive(),
            Credentials::AccessKey { access_key, .. } => f
                .debug_struct("AccessKey")
                .field("access_key", access_key)
                .finish_non_exhaustive(),
            Credentials::Token(_) => f.write_str("Token(..)"),
        }
    }
}

impl Credentials {
    /// Read the credentials from `secret`, checking the key combinations in order
    /// `username`/`password`, `accessKey`/`secretKey` and `token`.
    pub fn from_secret(secret: Option<&Secret>, name: &str) -> Result<Self, ProviderError> {
        let secret = secret
            .ok_or_else(|| ProviderError::Credentials(format!("secret {} not found", name)))?;
        let mut values: BTreeMap<String, String> = BTreeMap::new();
        for (k, v) in secret.string_data.iter().flatten() {
            values.insert(k.clone(), v.clone());
        }
        let keys = ["username", "password", "accessKey", "secretKey", "token"];
        for (k, v) in secret.data.iter().flatten() {
            if !keys.contains(&k.as_str()) {
                continue;
            }
            let v = String::from_utf8(v.0.clone()).map_err(|_| {
                ProviderError::Credentials(format!("secret {} key {} is not valid UTF-8", name, k))
            })?;
            values.insert(k.clone(), v);
        }
        let value = |k: &str| values.get(k).filter(|v| !v.is_empty()).cloned();
        if let (Some(username), Some(password)) = (value("username"), value("password")) {
            Ok(Credentials::Password { username, password })
        } else if let (Some(access_key), Some(secret_key)) = (value("accessKey"), value("secretKey")) {
            Ok(Credentials::AccessKey {
                access_key,
                secret_key,
            })
        } else if let Some(token) = value("token") {
            Ok(Credentials::Token(token))
        } else {
            Err(ProviderError::Credentials(format!(
                "secret {} must contain one of the following combinations: ('username' and 'password'), ('accessKey' and 'secretKey') or 'token'",
                name
            )))
        }
    }
}

/// Where and as whom to connect.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ConnectionOptions {
    pub endpoint: String,
    pub region: String,
    pub domain: String,
    pub project: Option<String>,
}

impl From<&ProviderConfigSpec> for ConnectionOptions {
    fn from(spec: &ProviderConfigSpec) -> Self {
        Self {
            endpoint: spec.identity_endpoint.clone(),
            region: spec.region.clone(),
            domain: spec.domain_name.clone(),
            project: Some(spec.project_id.clone()).filter(|p| !p.is_empty()),
        }
    }
}

/// Creates authenticated [`Provider`] clients.
#[async_trait]
pub(crate) trait ProviderFactory: Send + Sync {
    async fn connect(
        &self,
        options: ConnectionOptions,
        credentials: Credentials,
    ) -> Result<Arc<dyn Provider>, ProviderError>;
}
