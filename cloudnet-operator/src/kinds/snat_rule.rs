use async_trait::async_trait;
use cloudnet_operator_apis::{NatGateway, PublicIp, SnatRule, SnatRuleResolved, SnatRuleSpec, Subnet};

use super::changed;
use crate::{
    provider::{CreateSnatRuleRequest, Provider, ProviderError, SnatRuleInfo, SnatRuleUpdate},
    reconciler::ManagedKind,
    resolver::{ResolveError, Resolver},
};

#[async_trait]
impl ManagedKind for SnatRule {
    const FINALIZER: &'static str = "snatrule.cloudnet.io/finalizer";

    type Info = SnatRuleInfo;
    type Update = SnatRuleUpdate;

    async fn resolve(&self, resolver: &Resolver<'_>) -> Result<SnatRuleResolved, ResolveError> {
        let nat_gateway_id = resolver.resolve::<NatGateway>(&self.spec.nat_gateway).await?;
        let subnet_id = resolver.resolve::<Subnet>(&self.spec.subnet).await?;
        let public_ip_id = resolver.resolve::<PublicIp>(&self.spec.public_ip).await?;
        Ok(SnatRuleResolved {
            nat_gateway_id,
            subnet_id,
            public_ip_id,
        })
    }

    async fn create_external(
        &self,
        provider: &dyn Provider,
        resolved: &SnatRuleResolved,
    ) -> Result<String, ProviderError> {
        provider
            .create_snat_rule(&CreateSnatRuleRequest {
                nat_gateway_id: resolved.nat_gateway_id.clone(),
                subnet_id: resolved.subnet_id.clone(),
                public_ip_id: resolved.public_ip_id.clone(),
                description: self.spec.description.clone(),
            })
            .await
    }

    async fn get_external(
        &self,
        provider: &dyn Provider,
        id: &str,
    ) -> Result<Option<SnatRuleInfo>, ProviderError> {
        provider.get_snat_rule(id).await
    }

    fn detect_drift(&self, baseline: &SnatRuleSpec) -> Option<SnatRuleUpdate> {
        changed(&self.spec.description, &baseline.description).map(|description| SnatRuleUpdate {
            description: Some(description),
        })
    }

    async fn update_external(
        &self,
        provider: &dyn Provider,
        id: &str,
        _: &SnatRuleInfo,
        update: &SnatRuleUpdate,
    ) -> Result<(), ProviderError> {
        provider.update_snat_rule(id, update).await
    }

    async fn delete_external(&self, provider: &dyn Provider, id: &str) -> Result<(), ProviderError> {
        provider.delete_snat_rule(id).await
    }
}
