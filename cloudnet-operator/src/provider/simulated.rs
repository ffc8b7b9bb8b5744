//! In-process cloud backend implementing the full [`Provider`] contract.
//!
//! Resources are kept in memory. New resources report a provisioning status
//! for a configurable number of reads before they settle, so create calls go
//! through the same wait loop a remote API requires.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use async_trait::async_trait;
use tokio::sync::{Mutex, MutexGuard};

use super::*;
use crate::retry::{retry, Attempt, Cancellation, RetryOptions};

enum Record {
    Network(NetworkInfo),
    Subnet(SubnetInfo),
    SecurityGroup(SecurityGroupInfo),
    SecurityGroupRule(SecurityGroupRuleInfo),
    PublicIp(PublicIpInfo),
    NatGateway(NatGatewayInfo),
    SnatRule(SnatRuleInfo),
}

impl Record {
    fn info(&self) -> &dyn ResourceInfo {
        match self {
            Record::Network(r) => r,
            Record::Subnet(r) => r,
            Record::SecurityGroup(r) => r,
            Record::SecurityGroupRule(r) => r,
            Record::PublicIp(r) => r,
            Record::NatGateway(r) => r,
            Record::SnatRule(r) => r,
        }
    }

    fn set_status(&mut self, status: &str) {
        let target = match self {
            Record::Network(r) => &mut r.status,
            Record::Subnet(r) => &mut r.status,
            Record::PublicIp(r) => &mut r.status,
            Record::NatGateway(r) => &mut r.status,
            Record::SnatRule(r) => &mut r.status,
            Record::SecurityGroup(_) | Record::SecurityGroupRule(_) => return,
        };
        *target = status.to_string();
    }
}

/// Status a new resource settles to after `reads` more reads.
struct Pending {
    reads: u32,
    status: String,
}

#[derive(Default)]
struct CloudState {
    next_id: u64,
    records: BTreeMap<String, Record>,
    pending: HashMap<String, Pending>,
    provisioning_reads: u32,
    calls: HashMap<String, usize>,
    faults: HashMap<String, String>,
    next_settle_status: Option<String>,
    rejected_credentials: Option<String>,
    validation_error: Option<String>,
}

impl CloudState {
    fn allocate(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    /// Register a new record, reporting `provisioning` until it settles to `ready`.
    fn add(&mut self, id: &str, mut record: Record, provisioning: &str, ready: &str) {
        let status = self.next_settle_status.take().unwrap_or_else(|| ready.to_string());
        if self.provisioning_reads == 0 {
            record.set_status(&status);
        } else {
            record.set_status(provisioning);
            self.pending.insert(
                id.to_string(),
                Pending {
                    reads: self.provisioning_reads,
                    status,
                },
            );
        }
        self.records.insert(id.to_string(), record);
    }

    /// Read a record, advancing its provisioning progress.
    fn observe(&mut self, id: &str) -> Option<&Record> {
        if let Some(p) = self.pending.get_mut(id) {
            p.reads = p.reads.saturating_sub(1);
            if p.reads == 0 {
                if let Some(p) = self.pending.remove(id) {
                    if let Some(r) = self.records.get_mut(id) {
                        r.set_status(&p.status);
                    }
                }
            }
        }
        self.records.get(id)
    }

    fn remove(&mut self, id: &str) -> Option<Record> {
        self.pending.remove(id);
        self.records.remove(id)
    }
}

fn not_found(what: &str, id: &str) -> ProviderError {
    ProviderError::Api(format!("{} {} not found", what, id))
}

/// The simulated cloud, cheap to clone, clones share their state.
#[derive(Clone)]
pub(crate) struct SimulatedCloud {
    state: Arc<Mutex<CloudState>>,
    wait: RetryOptions,
    cancel: Cancellation,
}

impl SimulatedCloud {
    pub fn new(wait: RetryOptions, cancel: Cancellation) -> Self {
        let state = CloudState {
            provisioning_reads: 1,
            ..Default::default()
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            wait,
            cancel,
        }
    }

    /// Record the call and fail it if a fault was injected for `method`.
    async fn enter(&self, method: &str) -> Result<MutexGuard<'_, CloudState>, ProviderError> {
        let mut state = self.state.lock().await;
        *state.calls.entry(method.to_string()).or_default() += 1;
        let fault = state.faults.remove(method);
        match fault {
            Some(message) => Err(ProviderError::Api(message)),
            None => Ok(state),
        }
    }

    async fn await_ready(&self, what: &str, id: &str) -> Result<(), ProviderError> {
        let state = &self.state;
        retry(&self.cancel, self.wait, move || async move {
            let mut state = state.lock().await;
            match state.observe(id).map(|r| (r.info().state(), r.info().message())) {
                None => Attempt::Failed(not_found(what, id)),
                Some((State::Ready, _)) => Attempt::Done(()),
                Some((State::Failed, _)) => Attempt::Failed(ProviderError::FailedToCreate),
                Some((State::Stopped, message)) => Attempt::Failed(ProviderError::Terminal(message)),
                Some(_) => Attempt::Retry,
            }
        })
        .await
        .map_err(|e| ProviderError::NotReady {
            id: id.to_string(),
            source: Box::new(ProviderError::from_wait(
                &format!("failed to wait for {} creation", what),
                e,
            )),
        })
    }
}

#[cfg(test)]
impl SimulatedCloud {
    /// A cloud whose resources are ready right away and whose waits never sleep.
    pub fn instant() -> Self {
        Self::new(RetryOptions::new(std::time::Duration::ZERO, 5), Cancellation::never())
    }

    pub async fn set_provisioning_reads(&self, reads: u32) {
        self.state.lock().await.provisioning_reads = reads;
    }

    /// The next created resource settles to `status` instead of its ready status.
    pub async fn settle_next_create(&self, status: &str) {
        self.state.lock().await.next_settle_status = Some(status.to_string());
    }

    pub async fn fail_next(&self, method: &str, message: &str) {
        self.state
            .lock()
            .await
            .faults
            .insert(method.to_string(), message.to_string());
    }

    pub async fn calls(&self, method: &str) -> usize {
        self.state.lock().await.calls.get(method).copied().unwrap_or(0)
    }

    /// Number of create, update and delete calls.
    pub async fn mutating_calls(&self) -> usize {
        self.state
            .lock()
            .await
            .calls
            .iter()
            .filter(|(m, _)| m.starts_with("create_") || m.starts_with("update_") || m.starts_with("delete_"))
            .map(|(_, n)| n)
            .sum()
    }

    /// Delete a resource behind the controller's back.
    pub async fn remove(&self, id: &str) {
        self.state.lock().await.remove(id);
    }

    pub async fn set_status(&self, id: &str, status: &str) {
        let mut state = self.state.lock().await;
        state.pending.remove(id);
        if let Some(r) = state.records.get_mut(id) {
            r.set_status(status);
        }
    }

    /// Number of resources of any kind.
    pub async fn records(&self) -> usize {
        self.state.lock().await.records.len()
    }

    pub async fn exists(&self, id: &str) -> bool {
        self.state.lock().await.records.contains_key(id)
    }

    pub async fn reject_credentials(&self, reason: Option<&str>) {
        self.state.lock().await.rejected_credentials = reason.map(|r| r.to_string());
    }

    pub async fn reject_validation(&self, reason: Option<&str>) {
        self.state.lock().await.validation_error = reason.map(|r| r.to_string());
    }

    pub async fn network(&self, id: &str) -> Option<NetworkInfo> {
        match self.state.lock().await.records.get(id) {
            Some(Record::Network(r)) => Some(r.clone()),
            _ => None,
        }
    }

    pub async fn nat_gateway(&self, id: &str) -> Option<NatGatewayInfo> {
        match self.state.lock().await.records.get(id) {
            Some(Record::NatGateway(r)) => Some(r.clone()),
            _ => None,
        }
    }

    pub async fn public_ip(&self, id: &str) -> Option<PublicIpInfo> {
        match self.state.lock().await.records.get(id) {
            Some(Record::PublicIp(r)) => Some(r.clone()),
            _ => None,
        }
    }
}

macro_rules! get_record {
    ($self:ident, $method:literal, $id:ident, $variant:ident) => {{
        let mut state = $self.enter($method).await?;
        match state.observe($id) {
            Some(Record::$variant(r)) => Ok(Some(r.clone())),
            _ => Ok(None),
        }
    }};
}

macro_rules! update_record {
    ($self:ident, $method:literal, $what:literal, $id:ident, $variant:ident, |$r:ident| $body:block) => {{
        let mut state = $self.enter($method).await?;
        match state.records.get_mut($id) {
            Some(Record::$variant($r)) => {
                $body;
                Ok(())
            }
            _ => Err(not_found($what, $id)),
        }
    }};
}

macro_rules! delete_record {
    ($self:ident, $method:literal, $id:ident, $variant:ident) => {{
        let mut state = $self.enter($method).await?;
        if let Some(Record::$variant(_)) = state.records.get($id) {
            state.remove($id);
        }
        Ok(())
    }};
}

#[async_trait]
impl Provider for SimulatedCloud {
    async fn validate(&self) -> Result<(), ProviderError> {
        let state = self.enter("validate").await?;
        match &state.validation_error {
            Some(reason) => Err(ProviderError::Api(format!("failed to list networks: {}", reason))),
            None => Ok(()),
        }
    }

    async fn create_network(&self, request: &CreateNetworkRequest) -> Result<String, ProviderError> {
        let id = {
            let mut state = self.enter("create_network").await?;
            let id = state.allocate("net");
            let record = Record::Network(NetworkInfo {
                id: id.clone(),
                name: request.name.clone(),
                description: request.description.clone(),
                cidr: request.cidr.clone(),
                status: String::new(),
            });
            state.add(&id, record, "CREATING", "ACTIVE");
            id
        };
        self.await_ready("network", &id).await?;
        Ok(id)
    }

    async fn get_network(&self, id: &str) -> Result<Option<NetworkInfo>, ProviderError> {
        get_record!(self, "get_network", id, Network)
    }

    async fn update_network(&self, id: &str, update: &NetworkUpdate) -> Result<(), ProviderError> {
        update_record!(self, "update_network", "network", id, Network, |r| {
            if let Some(d) = &update.description {
                r.description = d.clone();
            }
        })
    }

    async fn delete_network(&self, id: &str) -> Result<(), ProviderError> {
        let mut state = self.enter("delete_network").await?;
        let in_use = state
            .records
            .values()
            .any(|r| matches!(r, Record::Subnet(s) if s.network_id == id));
        if in_use {
            return Err(ProviderError::Api(format!("network {} still has subnets", id)));
        }
        if let Some(Record::Network(_)) = state.records.get(id) {
            state.remove(id);
        }
        Ok(())
    }

    async fn create_subnet(&self, request: &CreateSubnetRequest) -> Result<String, ProviderError> {
        let id = {
            let mut state = self.enter("create_subnet").await?;
            if !matches!(state.records.get(&request.network_id), Some(Record::Network(_))) {
                return Err(not_found("network", &request.network_id));
            }
            let id = state.allocate("sub");
            let record = Record::Subnet(SubnetInfo {
                id: id.clone(),
                name: request.name.clone(),
                network_id: request.network_id.clone(),
                description: request.description.clone(),
                cidr: request.cidr.clone(),
                gateway_ip: request.gateway_ip.clone(),
                status: String::new(),
            });
            state.add(&id, record, "CREATING", "ACTIVE");
            id
        };
        self.await_ready("subnet", &id).await?;
        Ok(id)
    }

    async fn get_subnet(&self, id: &str) -> Result<Option<SubnetInfo>, ProviderError> {
        get_record!(self, "get_subnet", id, Subnet)
    }

    async fn update_subnet(
        &self,
        network_id: &str,
        id: &str,
        update: &SubnetUpdate,
    ) -> Result<(), ProviderError> {
        update_record!(self, "update_subnet", "subnet", id, Subnet, |r| {
            if r.network_id != network_id {
                return Err(not_found("subnet", id));
            }
            if let Some(d) = &update.description {
                r.description = d.clone();
            }
        })
    }

    async fn delete_subnet(&self, network_id: &str, id: &str) -> Result<(), ProviderError> {
        let mut state = self.enter("delete_subnet").await?;
        match state.records.get(id) {
            Some(Record::Subnet(s)) if s.network_id != network_id => Err(ProviderError::Api(format!(
                "subnet {} does not belong to network {}",
                id, network_id
            ))),
            Some(Record::Subnet(_)) => {
                state.remove(id);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn create_security_group(
        &self,
        request: &CreateSecurityGroupRequest,
    ) -> Result<String, ProviderError> {
        let mut state = self.enter("create_security_group").await?;
        let id = state.allocate("sg");
        let record = Record::SecurityGroup(SecurityGroupInfo {
            id: id.clone(),
            name: request.name.clone(),
            description: request.description.clone(),
        });
        state.add(&id, record, "", "");
        Ok(id)
    }

    async fn get_security_group(&self, id: &str) -> Result<Option<SecurityGroupInfo>, ProviderError> {
        get_record!(self, "get_security_group", id, SecurityGroup)
    }

    async fn update_security_group(
        &self,
        id: &str,
        update: &SecurityGroupUpdate,
    ) -> Result<(), ProviderError> {
        update_record!(self, "update_security_group", "security group", id, SecurityGroup, |r| {
            if let Some(d) = &update.description {
                r.description = d.clone();
            }
        })
    }

    async fn delete_security_group(&self, id: &str) -> Result<(), ProviderError> {
        delete_record!(self, "delete_security_group", id, SecurityGroup)
    }

    async fn create_security_group_rule(
        &self,
        request: &CreateSecurityGroupRuleRequest,
    ) -> Result<String, ProviderError> {
        let mut state = self.enter("create_security_group_rule").await?;
        if !matches!(
            state.records.get(&request.security_group_id),
            Some(Record::SecurityGroup(_))
        ) {
            return Err(not_found("security group", &request.security_group_id));
        }
        let id = state.allocate("sgr");
        let record = Record::SecurityGroupRule(SecurityGroupRuleInfo {
            id: id.clone(),
            security_group_id: request.security_group_id.clone(),
            description: request.description.clone(),
            direction: request.direction,
            protocol: request.protocol,
            ethertype: request.ethertype,
            multiport: request.multiport.clone(),
            action: request.action,
            priority: request.priority,
        });
        state.add(&id, record, "", "");
        Ok(id)
    }

    async fn get_security_group_rule(
        &self,
        id: &str,
    ) -> Result<Option<SecurityGroupRuleInfo>, ProviderError> {
        get_record!(self, "get_security_group_rule", id, SecurityGroupRule)
    }

    async fn update_security_group_rule(
        &self,
        id: &str,
        update: &SecurityGroupRuleUpdate,
    ) -> Result<(), ProviderError> {
        update_record!(self, "update_security_group_rule", "security group rule", id, SecurityGroupRule, |r| {
            if let Some(d) = &update.description {
                r.description = d.clone();
            }
        })
    }

    async fn delete_security_group_rule(&self, id: &str) -> Result<(), ProviderError> {
        delete_record!(self, "delete_security_group_rule", id, SecurityGroupRule)
    }

    async fn create_public_ip(&self, request: &CreatePublicIpRequest) -> Result<String, ProviderError> {
        let id = {
            let mut state = self.enter("create_public_ip").await?;
            if request.bandwidth_size <= 0 {
                return Err(ProviderError::Invalid(format!(
                    "invalid bandwidth size {}",
                    request.bandwidth_size
                )));
            }
            let id = state.allocate("eip");
            let address = format!("80.158.{}.{}", state.next_id / 256, state.next_id % 256);
            let record = Record::PublicIp(PublicIpInfo {
                id: id.clone(),
                name: request.name.clone(),
                address,
                ip_type: request.ip_type.clone(),
                bandwidth_name: request.bandwidth_name.clone(),
                bandwidth_size: request.bandwidth_size,
                bandwidth_share_type: request.bandwidth_share_type.clone(),
                status: String::new(),
            });
            state.add(&id, record, "PENDING_CREATE", "ACTIVE");
            id
        };
        self.await_ready("public IP", &id).await?;
        Ok(id)
    }

    async fn get_public_ip(&self, id: &str) -> Result<Option<PublicIpInfo>, ProviderError> {
        get_record!(self, "get_public_ip", id, PublicIp)
    }

    async fn update_public_ip(&self, id: &str, update: &PublicIpUpdate) -> Result<(), ProviderError> {
        update_record!(self, "update_public_ip", "public IP", id, PublicIp, |r| {
            if let Some(size) = update.bandwidth_size {
                r.bandwidth_size = size;
            }
        })
    }

    async fn delete_public_ip(&self, id: &str) -> Result<(), ProviderError> {
        delete_record!(self, "delete_public_ip", id, PublicIp)
    }

    async fn create_nat_gateway(
        &self,
        request: &CreateNatGatewayRequest,
    ) -> Result<String, ProviderError> {
        let id = {
            let mut state = self.enter("create_nat_gateway").await?;
            if !matches!(state.records.get(&request.subnet_id), Some(Record::Subnet(_))) {
                return Err(not_found("subnet", &request.subnet_id));
            }
            let id = state.allocate("nat");
            let record = Record::NatGateway(NatGatewayInfo {
                id: id.clone(),
                name: request.name.clone(),
                description: request.description.clone(),
                spec: request.spec.clone(),
                network_id: request.network_id.clone(),
                subnet_id: request.subnet_id.clone(),
                status: String::new(),
            });
            state.add(&id, record, "PENDING_CREATE", "ACTIVE");
            id
        };
        self.await_ready("NAT gateway", &id).await?;
        Ok(id)
    }

    async fn get_nat_gateway(&self, id: &str) -> Result<Option<NatGatewayInfo>, ProviderError> {
        get_record!(self, "get_nat_gateway", id, NatGateway)
    }

    async fn update_nat_gateway(
        &self,
        id: &str,
        update: &NatGatewayUpdate,
    ) -> Result<(), ProviderError> {
        update_record!(self, "update_nat_gateway", "NAT gateway", id, NatGateway, |r| {
            if let Some(d) = &update.description {
                r.description = d.clone();
            }
            if let Some(s) = &update.spec {
                r.spec = s.clone();
            }
        })
    }

    async fn delete_nat_gateway(&self, id: &str) -> Result<(), ProviderError> {
        delete_record!(self, "delete_nat_gateway", id, NatGateway)
    }

    async fn create_snat_rule(&self, request: &CreateSnatRuleRequest) -> Result<String, ProviderError> {
        let id = {
            let mut state = self.enter("create_snat_rule").await?;
            if !matches!(state.records.get(&request.nat_gateway_id), Some(Record::NatGateway(_))) {
                return Err(not_found("NAT gateway", &request.nat_gateway_id));
            }
            if !matches!(state.records.get(&request.public_ip_id), Some(Record::PublicIp(_))) {
                return Err(not_found("public IP", &request.public_ip_id));
            }
            let id = state.allocate("snat");
            let record = Record::SnatRule(SnatRuleInfo {
                id: id.clone(),
                nat_gateway_id: request.nat_gateway_id.clone(),
                subnet_id: request.subnet_id.clone(),
                public_ip_id: request.public_ip_id.clone(),
                description: request.description.clone(),
                status: String::new(),
            });
            state.add(&id, record, "PENDING_CREATE", "ACTIVE");
            id
        };
        self.await_ready("SNAT rule", &id).await?;
        Ok(id)
    }

    async fn get_snat_rule(&self, id: &str) -> Result<Option<SnatRuleInfo>, ProviderError> {
        get_record!(self, "get_snat_rule", id, SnatRule)
    }

    async fn update_snat_rule(&self, id: &str, update: &SnatRuleUpdate) -> Result<(), ProviderError> {
        update_record!(self, "update_snat_rule", "SNAT rule", id, SnatRule, |r| {
            if let Some(d) = &update.description {
                r.description = d.clone();
            }
        })
    }

    async fn delete_snat_rule(&self, id: &str) -> Result<(), ProviderError> {
        delete_record!(self, "delete_snat_rule", id, SnatRule)
    }
}

/// Hands out clients of one shared [`SimulatedCloud`].
pub(crate) struct SimulatedFactory {
    cloud: SimulatedCloud,
}

impl SimulatedFactory {
    pub fn new(cloud: SimulatedCloud) -> Self {
        Self { cloud }
    }
}

#[async_trait]
impl ProviderFactory for SimulatedFactory {
    async fn connect(
        &self,
        options: ConnectionOptions,
        credentials: Credentials,
    ) -> Result<Arc<dyn Provider>, ProviderError> {
        let state = self.cloud.enter("connect").await?;
        if let Some(reason) = &state.rejected_credentials {
            return Err(ProviderError::Authentication(reason.clone()));
        }
        if options.region.is_empty() {
            return Err(ProviderError::Invalid("region must not be empty".to_string()));
        }
        debug!(
            "connected to {} (region {}, domain {}) with {:?}",
            options.endpoint, options.region, options.domain, credentials
        );
        Ok(Arc::new(self.cloud.clone()))
    }
}
