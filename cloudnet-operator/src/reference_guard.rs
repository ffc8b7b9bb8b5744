use std::{collections::BTreeMap, marker::PhantomData};

use async_trait::async_trait;
use cloudnet_operator_apis::Managed;
use kube::ResourceExt;
use serde::de::DeserializeOwned;

use crate::{
    errors::StoreError,
    store::{self, ObjectStore},
};

/// Finds objects of one kind which depend on a given external resource.
#[async_trait]
pub(crate) trait ReferenceCheck: Send + Sync {
    /// Plural name of the checked kind, e.g. `Subnets`.
    fn resource(&self) -> &'static str;

    /// Names of the objects in `namespace` referencing `external_id`.
    async fn referencing(
        &self,
        store: &dyn ObjectStore,
        namespace: &str,
        external_id: &str,
    ) -> Result<Vec<String>, StoreError>;
}

/// [`ReferenceCheck`] matching one resolved dependency field of `K`.
pub(crate) struct BackReference<K: Managed> {
    resource: &'static str,
    field: fn(&K::Resolved) -> &str,
    kind: PhantomData<fn() -> K>,
}

impl<K: Managed> BackReference<K> {
    pub fn new(resource: &'static str, field: fn(&K::Resolved) -> &str) -> Self {
        Self {
            resource,
            field,
            kind: PhantomData,
        }
    }
}

#[async_trait]
impl<K> ReferenceCheck for BackReference<K>
where
    K: Managed + DeserializeOwned + Send + Sync + 'static,
{
    fn resource(&self) -> &'static str {
        self.resource
    }

    async fn referencing(
        &self,
        store: &dyn ObjectStore,
        namespace: &str,
        external_id: &str,
    ) -> Result<Vec<String>, StoreError> {
        let objects: Vec<K> = store::list(store, namespace, &BTreeMap::new()).await?;
        Ok(objects
            .iter()
            .filter(|o| {
                o.resolved_dependencies()
                    .map(|r| (self.field)(r) == external_id)
                    .unwrap_or(false)
            })
            .map(|o| o.name_any())
            .collect())
    }
}

#[derive(thiserror::Error, Debug)]
#[error("Failed reference check ({resource}): {source}")]
pub(crate) struct GuardError {
    pub resource: &'static str,
    #[source]
    pub source: StoreError,
}

/// Run every check and collect the names of all objects still referencing
/// `external_id`. A failing check aborts the whole guard.
pub(crate) async fn referencing_objects(
    store: &dyn ObjectStore,
    namespace: &str,
    external_id: &str,
    checks: &[Box<dyn ReferenceCheck>],
) -> Result<Vec<String>, GuardError> {
    let mut blockers = Vec::new();
    for check in checks {
        let names = check
            .referencing(store, namespace, external_id)
            .await
            .map_err(|source| GuardError {
                resource: check.resource(),
                source,
            })?;
        if !names.is_empty() {
            debug!(
                "{} {:?} in namespace {} reference {}",
                check.resource(),
                names,
                namespace,
                external_id
            );
            blockers.extend(names);
        }
    }
    Ok(blockers)
}

pub(crate) fn blocked_message(blockers: &[String]) -> String {
    format!("Still referenced by {}", blockers.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use cloudnet_operator_apis::{Dependency, NatGateway, NatGatewayResolved, Subnet, SubnetResolved};

    fn checks() -> Vec<Box<dyn ReferenceCheck>> {
        vec![
            Box::new(BackReference::<Subnet>::new("Subnets", |r| r.network_id.as_str()))
                as Box<dyn ReferenceCheck>,
            Box::new(BackReference::<NatGateway>::new("NATGateways", |r| {
                r.network_id.as_str()
            })),
        ]
    }

    fn resolved_subnet(name: &str, network_id: &str) -> Subnet {
        let mut s = subnet("default", name, Dependency::id(network_id));
        s.managed_status_mut().resolved_dependencies = Some(SubnetResolved {
            network_id: network_id.to_string(),
        });
        s
    }

    #[tokio::test]
    async fn aggregates_across_kinds() {
        let store = MemoryStore::default();
        store.insert(&resolved_subnet("a", "net-1"));
        store.insert(&resolved_subnet("b", "net-2"));
        store.insert(&subnet("default", "unresolved", Dependency::id("net-1")));
        let mut gw = nat_gateway("default", "gw", Dependency::id("net-1"), Dependency::id("sub-1"));
        gw.managed_status_mut().resolved_dependencies = Some(NatGatewayResolved {
            network_id: "net-1".to_string(),
            subnet_id: "sub-1".to_string(),
        });
        store.insert(&gw);

        let blockers = referencing_objects(&store, "default", "net-1", &checks())
            .await
            .unwrap();
        assert_eq!(vec!["a".to_string(), "gw".to_string()], blockers);
        assert_eq!("Still referenced by a, gw", blocked_message(&blockers));

        let blockers = referencing_objects(&store, "other", "net-1", &checks())
            .await
            .unwrap();
        assert!(blockers.is_empty());
    }

    #[tokio::test]
    async fn failing_check_is_an_error() {
        let store = MemoryStore::default();
        store.insert(&resolved_subnet("a", "net-1"));
        store.fail_list::<NatGateway>();
        let err = referencing_objects(&store, "default", "net-1", &checks())
            .await
            .unwrap_err();
        assert_eq!("NATGateways", err.resource);
        assert!(err.to_string().starts_with("Failed reference check (NATGateways): "));
    }
}
