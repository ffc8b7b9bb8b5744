use async_trait::async_trait;
use cloudnet_operator_apis::{
    NatGateway, NatGatewayResolved, NatGatewaySpec, Network, SnatRule, Subnet,
};
use kube::ResourceExt;

use super::changed;
use crate::{
    provider::{
        nat_gateway_spec, CreateNatGatewayRequest, NatGatewayInfo, NatGatewayUpdate, Provider,
        ProviderError,
    },
    reconciler::ManagedKind,
    reference_guard::{BackReference, ReferenceCheck},
    resolver::{ResolveError, Resolver},
};

#[async_trait]
impl ManagedKind for NatGateway {
    const FINALIZER: &'static str = "natgateway.cloudnet.io/finalizer";

    type Info = NatGatewayInfo;
    type Update = NatGatewayUpdate;

    async fn resolve(&self, resolver: &Resolver<'_>) -> Result<NatGatewayResolved, ResolveError> {
        let network_id = resolver.resolve::<Network>(&self.spec.network).await?;
        let subnet_id = resolver.resolve::<Subnet>(&self.spec.subnet).await?;
        Ok(NatGatewayResolved {
            network_id,
            subnet_id,
        })
    }

    async fn create_external(
        &self,
        provider: &dyn Provider,
        resolved: &NatGatewayResolved,
    ) -> Result<String, ProviderError> {
        provider
            .create_nat_gateway(&CreateNatGatewayRequest {
                name: self.name_any(),
                description: self.spec.description.clone(),
                spec: nat_gateway_spec(self.spec.type_).to_string(),
                network_id: resolved.network_id.clone(),
                subnet_id: resolved.subnet_id.clone(),
            })
            .await
    }

    async fn get_external(
        &self,
        provider: &dyn Provider,
        id: &str,
    ) -> Result<Option<NatGatewayInfo>, ProviderError> {
        provider.get_nat_gateway(id).await
    }

    fn detect_drift(&self, baseline: &NatGatewaySpec) -> Option<NatGatewayUpdate> {
        let update = NatGatewayUpdate {
            description: changed(&self.spec.description, &baseline.description),
            spec: changed(&self.spec.type_, &baseline.type_).map(|t| nat_gateway_spec(t).to_string()),
        };
        (update != NatGatewayUpdate::default()).then_some(update)
    }

    async fn update_external(
        &self,
        provider: &dyn Provider,
        id: &str,
        _: &NatGatewayInfo,
        update: &NatGatewayUpdate,
    ) -> Result<(), ProviderError> {
        provider.update_nat_gateway(id, update).await
    }

    async fn delete_external(&self, provider: &dyn Provider, id: &str) -> Result<(), ProviderError> {
        provider.delete_nat_gateway(id).await
    }

    fn reference_checks() -> Vec<Box<dyn ReferenceCheck>> {
        vec![Box::new(BackReference::<SnatRule>::new("SNATRules", |r| {
            r.nat_gateway_id.as_str()
        })) as Box<dyn ReferenceCheck>]
    }
}
