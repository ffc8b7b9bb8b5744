use async_trait::async_trait;
use cloudnet_operator_apis::{NatGateway, Network, NetworkSpec, NoDependencies, Subnet};
use kube::ResourceExt;

use super::changed;
use crate::{
    provider::{CreateNetworkRequest, NetworkInfo, NetworkUpdate, Provider, ProviderError},
    reconciler::ManagedKind,
    reference_guard::{BackReference, ReferenceCheck},
    resolver::{ResolveError, Resolver},
};

#[async_trait]
impl ManagedKind for Network {
    const FINALIZER: &'static str = "network.cloudnet.io/finalizer";

    type Info = NetworkInfo;
    type Update = NetworkUpdate;

    async fn resolve(&self, _: &Resolver<'_>) -> Result<NoDependencies, ResolveError> {
        Ok(NoDependencies {})
    }

    async fn create_external(
        &self,
        provider: &dyn Provider,
        _: &NoDependencies,
    ) -> Result<String, ProviderError> {
        provider
            .create_network(&CreateNetworkRequest {
                name: self.name_any(),
                description: self.spec.description.clone(),
                cidr: self.spec.cidr.clone(),
            })
            .await
    }

    async fn get_external(
        &self,
        provider: &dyn Provider,
        id: &str,
    ) -> Result<Option<NetworkInfo>, ProviderError> {
        provider.get_network(id).await
    }

    fn detect_drift(&self, baseline: &NetworkSpec) -> Option<NetworkUpdate> {
        changed(&self.spec.description, &baseline.description).map(|description| NetworkUpdate {
            description: Some(description),
        })
    }

    async fn update_external(
        &self,
        provider: &dyn Provider,
        id: &str,
        _: &NetworkInfo,
        update: &NetworkUpdate,
    ) -> Result<(), ProviderError> {
        provider.update_network(id, update).await
    }

    async fn delete_external(&self, provider: &dyn Provider, id: &str) -> Result<(), ProviderError> {
        provider.delete_network(id).await
    }

    fn reference_checks() -> Vec<Box<dyn ReferenceCheck>> {
        vec![
            Box::new(BackReference::<Subnet>::new("Subnets", |r| r.network_id.as_str()))
                as Box<dyn ReferenceCheck>,
            Box::new(BackReference::<NatGateway>::new("NATGateways", |r| {
                r.network_id.as_str()
            })),
        ]
    }
}
