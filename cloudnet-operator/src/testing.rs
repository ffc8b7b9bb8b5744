//! Shared fixtures for unit tests.

use std::{
    collections::{BTreeMap, HashSet},
    sync::Mutex,
};

use async_trait::async_trait;
use cloudnet_operator_apis::*;
use k8s_openapi::{
    api::core::v1::Secret,
    apimachinery::pkg::apis::meta::v1::Time,
    chrono::Utc,
    ByteString,
};
use kube::{
    api::{ApiResource, DynamicObject},
    Resource,
};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;

use crate::{
    errors::StoreError,
    store::{api_resource, ObjectStore},
};

type Key = (String, String, String);

#[derive(Default)]
struct Inner {
    objects: BTreeMap<Key, Value>,
    version: u64,
    failing_lists: HashSet<String>,
}

impl Inner {
    fn bump(&mut self, object: &mut Value) {
        self.version += 1;
        object["metadata"]["resourceVersion"] = Value::String(self.version.to_string());
    }
}

/// In-memory [`ObjectStore`] mimicking the API server's patch semantics.
#[derive(Default)]
pub(crate) struct MemoryStore {
    inner: Mutex<Inner>,
}

fn key(resource: &ApiResource, namespace: &str, name: &str) -> Key {
    (
        resource.plural.clone(),
        namespace.to_string(),
        name.to_string(),
    )
}

fn to_object(value: &Value) -> Result<DynamicObject, StoreError> {
    Ok(serde_json::from_value(value.clone())?)
}

fn is_released(object: &Value) -> bool {
    let metadata = &object["metadata"];
    !metadata["deletionTimestamp"].is_null()
        && metadata["finalizers"]
            .as_array()
            .map(|f| f.is_empty())
            .unwrap_or(true)
}

impl MemoryStore {
    /// Create or replace an object, bumping its generation on replacement.
    pub fn insert<K: Resource<DynamicType = ()> + Serialize>(&self, object: &K) {
        let mut value = serde_json::to_value(object).unwrap();
        let namespace = object.meta().namespace.clone().unwrap_or_default();
        let name = object.meta().name.clone().unwrap_or_default();
        let k = key(&api_resource::<K>(), &namespace, &name);
        let mut inner = self.inner.lock().unwrap();
        let generation = inner
            .objects
            .get(&k)
            .and_then(|o| o["metadata"]["generation"].as_i64())
            .map(|g| g + 1)
            .unwrap_or(1);
        value["metadata"]["generation"] = generation.into();
        inner.bump(&mut value);
        inner.objects.insert(k, value);
    }

    pub fn get_typed<K: Resource<DynamicType = ()> + DeserializeOwned>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Option<K> {
        let inner = self.inner.lock().unwrap();
        inner
            .objects
            .get(&key(&api_resource::<K>(), namespace, name))
            .map(|v| serde_json::from_value(v.clone()).unwrap())
    }

    /// Request deletion the way the API server does: set the deletion timestamp
    /// and remove the object once no finalizers remain.
    pub fn delete<K: Resource<DynamicType = ()>>(&self, namespace: &str, name: &str) {
        let k = key(&api_resource::<K>(), namespace, name);
        let mut inner = self.inner.lock().unwrap();
        if let Some(mut value) = inner.objects.remove(&k) {
            value["metadata"]["deletionTimestamp"] = serde_json::to_value(Time(Utc::now())).unwrap();
            if !is_released(&value) {
                inner.bump(&mut value);
                inner.objects.insert(k, value);
            }
        }
    }

    /// Merge `status` into the object's status as a concurrent writer would.
    pub fn merge_status<K: Resource<DynamicType = ()>>(&self, namespace: &str, name: &str, status: Value) {
        let k = key(&api_resource::<K>(), namespace, name);
        let mut inner = self.inner.lock().unwrap();
        let mut value = inner.objects.remove(&k).unwrap();
        json_patch::merge(&mut value, &serde_json::json!({ "status": status }));
        inner.bump(&mut value);
        inner.objects.insert(k, value);
    }

    /// Make every following list of `K` fail.
    pub fn fail_list<K: Resource<DynamicType = ()>>(&self) {
        self.inner
            .lock()
            .unwrap()
            .failing_lists
            .insert(api_resource::<K>().plural);
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, StoreError> {
        let inner = self.inner.lock().unwrap();
        inner
            .objects
            .get(&key(resource, namespace, name))
            .map(to_object)
            .transpose()
    }

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>, StoreError> {
        let inner = self.inner.lock().unwrap();
        if inner.failing_lists.contains(&resource.plural) {
            return Err(StoreError::Invalid(format!("listing {} failed", resource.plural)));
        }
        inner
            .objects
            .iter()
            .filter(|((plural, ns, _), _)| plural == &resource.plural && ns == namespace)
            .filter(|(_, v)| {
                labels
                    .iter()
                    .all(|(k, l)| v["metadata"]["labels"][k].as_str() == Some(l.as_str()))
            })
            .map(|(_, v)| to_object(v))
            .collect()
    }

    async fn patch(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        patch: &json_patch::Patch,
    ) -> Result<DynamicObject, StoreError> {
        let k = key(resource, namespace, name);
        let mut inner = self.inner.lock().unwrap();
        let mut value = inner.objects.get(&k).cloned().ok_or(StoreError::NotFound)?;
        json_patch::patch(&mut value, &patch.0).map_err(|e| StoreError::Conflict(e.to_string()))?;
        inner.bump(&mut value);
        let object = to_object(&value)?;
        if is_released(&value) {
            inner.objects.remove(&k);
        } else {
            inner.objects.insert(k, value);
        }
        Ok(object)
    }

    async fn patch_status(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        patch: &Value,
    ) -> Result<DynamicObject, StoreError> {
        let k = key(resource, namespace, name);
        let mut inner = self.inner.lock().unwrap();
        let mut value = inner.objects.get(&k).cloned().ok_or(StoreError::NotFound)?;
        let status = serde_json::json!({ "status": patch["status"].clone() });
        json_patch::merge(&mut value, &status);
        inner.bump(&mut value);
        let object = to_object(&value)?;
        inner.objects.insert(k, value);
        Ok(object)
    }
}

pub(crate) fn provider_config(namespace: &str, name: &str) -> ProviderConfig {
    let mut pc = ProviderConfig::new(
        name,
        ProviderConfigSpec {
            identity_endpoint: "https://iam.example.com/v3".to_string(),
            region: "eu-de".to_string(),
            project_id: String::new(),
            domain_name: "acme".to_string(),
            credentials_secret_ref: SecretReference {
                name: "credentials".to_string(),
                namespace: None,
            },
        },
    );
    pc.metadata.namespace = Some(namespace.to_string());
    pc
}

/// A ProviderConfig with a `Ready=True` condition.
pub(crate) fn ready_provider_config(namespace: &str, name: &str) -> ProviderConfig {
    let mut pc = provider_config(namespace, name);
    pc.status_mut().conditions = ConditionSet::default().with(Condition::new(
        READY,
        Some(true),
        "ValidationSuccessful",
        String::new(),
    ));
    pc
}

pub(crate) fn secret(namespace: &str, name: &str, data: &[(&str, &str)]) -> Secret {
    let mut s = Secret::default();
    s.metadata.name = Some(name.to_string());
    s.metadata.namespace = Some(namespace.to_string());
    s.data = Some(
        data.iter()
            .map(|(k, v)| (k.to_string(), ByteString(v.as_bytes().to_vec())))
            .collect(),
    );
    s
}

pub(crate) fn password_secret(namespace: &str) -> Secret {
    secret(namespace, "credentials", &[("username", "admin"), ("password", "secret")])
}

pub(crate) fn network(namespace: &str, name: &str) -> Network {
    let mut n = Network::new(
        name,
        NetworkSpec {
            provider_config_ref: ProviderConfigReference::new("otc"),
            description: String::new(),
            cidr: "10.0.0.0/16".to_string(),
            orphan_on_delete: false,
        },
    );
    n.metadata.namespace = Some(namespace.to_string());
    n
}

pub(crate) fn subnet(namespace: &str, name: &str, network: Dependency) -> Subnet {
    let mut s = Subnet::new(
        name,
        SubnetSpec {
            provider_config_ref: ProviderConfigReference::new("otc"),
            network,
            description: String::new(),
            cidr: "10.0.1.0/24".to_string(),
            gateway_ip: "10.0.1.1".to_string(),
            orphan_on_delete: false,
        },
    );
    s.metadata.namespace = Some(namespace.to_string());
    s
}

pub(crate) fn security_group(namespace: &str, name: &str) -> SecurityGroup {
    let mut sg = SecurityGroup::new(
        name,
        SecurityGroupSpec {
            provider_config_ref: ProviderConfigReference::new("otc"),
            description: "web servers".to_string(),
            orphan_on_delete: false,
        },
    );
    sg.metadata.namespace = Some(namespace.to_string());
    sg
}

pub(crate) fn security_group_rule(namespace: &str, name: &str, group: Dependency) -> SecurityGroupRule {
    let mut r = SecurityGroupRule::new(
        name,
        SecurityGroupRuleSpec {
            provider_config_ref: ProviderConfigReference::new("otc"),
            security_group: group,
            description: "https".to_string(),
            direction: Direction::Ingress,
            protocol: Protocol::Tcp,
            ethertype: Ethertype::IPv4,
            multiport: "443".to_string(),
            action: RuleAction::Allow,
            priority: Some(1),
            orphan_on_delete: false,
        },
    );
    r.metadata.namespace = Some(namespace.to_string());
    r
}

pub(crate) fn public_ip(namespace: &str, name: &str) -> PublicIp {
    let mut ip = PublicIp::new(
        name,
        PublicIpSpec {
            provider_config_ref: ProviderConfigReference::new("otc"),
            type_: PublicIpType::Bgp,
            bandwidth_size: 10,
            bandwidth_share_type: BandwidthShareType::Dedicated,
            orphan_on_delete: false,
        },
    );
    ip.metadata.namespace = Some(namespace.to_string());
    ip
}

pub(crate) fn nat_gateway(namespace: &str, name: &str, network: Dependency, subnet: Dependency) -> NatGateway {
    let mut gw = NatGateway::new(
        name,
        NatGatewaySpec {
            provider_config_ref: ProviderConfigReference::new("otc"),
            network,
            subnet,
            description: String::new(),
            type_: NatGatewayType::Small,
            orphan_on_delete: false,
        },
    );
    gw.metadata.namespace = Some(namespace.to_string());
    gw
}

pub(crate) fn snat_rule(
    namespace: &str,
    name: &str,
    nat_gateway: Dependency,
    subnet: Dependency,
    public_ip: Dependency,
) -> SnatRule {
    let mut r = SnatRule::new(
        name,
        SnatRuleSpec {
            provider_config_ref: ProviderConfigReference::new("otc"),
            nat_gateway,
            subnet,
            public_ip,
            description: String::new(),
            orphan_on_delete: false,
        },
    );
    r.metadata.namespace = Some(namespace.to_string());
    r
}

/// Mark `object` as provisioned with `external_id`.
pub(crate) fn provisioned<K: Managed>(mut object: K, external_id: &str) -> K {
    let status = object.managed_status_mut();
    status.external_id = external_id.to_string();
    status.conditions = ConditionSet::default().with(Condition::new(
        READY,
        Some(true),
        "Provisioned",
        String::new(),
    ));
    object
}
