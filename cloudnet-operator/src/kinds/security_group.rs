use async_trait::async_trait;
use cloudnet_operator_apis::{NoDependencies, SecurityGroup, SecurityGroupRule, SecurityGroupSpec};
use kube::ResourceExt;

use super::changed;
use crate::{
    provider::{
        CreateSecurityGroupRequest, Provider, ProviderError, SecurityGroupInfo, SecurityGroupUpdate,
    },
    reconciler::ManagedKind,
    reference_guard::{BackReference, ReferenceCheck},
    resolver::{ResolveError, Resolver},
};

#[async_trait]
impl ManagedKind for SecurityGroup {
    const FINALIZER: &'static str = "securitygroup.cloudnet.io/finalizer";

    type Info = SecurityGroupInfo;
    type Update = SecurityGroupUpdate;

    async fn resolve(&self, _: &Resolver<'_>) -> Result<NoDependencies, ResolveError> {
        Ok(NoDependencies {})
    }

    async fn create_external(
        &self,
        provider: &dyn Provider,
        _: &NoDependencies,
    ) -> Result<String, ProviderError> {
        provider
            .create_security_group(&CreateSecurityGroupRequest {
                name: self.name_any(),
                description: self.spec.description.clone(),
            })
            .await
    }

    async fn get_external(
        &self,
        provider: &dyn Provider,
        id: &str,
    ) -> Result<Option<SecurityGroupInfo>, ProviderError> {
        provider.get_security_group(id).await
    }

    fn detect_drift(&self, baseline: &SecurityGroupSpec) -> Option<SecurityGroupUpdate> {
        changed(&self.spec.description, &baseline.description).map(|description| {
            SecurityGroupUpdate {
                description: Some(description),
            }
        })
    }

    async fn update_external(
        &self,
        provider: &dyn Provider,
        id: &str,
        _: &SecurityGroupInfo,
        update: &SecurityGroupUpdate,
    ) -> Result<(), ProviderError> {
        provider.update_security_group(id, update).await
    }

    async fn delete_external(&self, provider: &dyn Provider, id: &str) -> Result<(), ProviderError> {
        provider.delete_security_group(id).await
    }

    fn reference_checks() -> Vec<Box<dyn ReferenceCheck>> {
        vec![Box::new(BackReference::<SecurityGroupRule>::new(
            "SecurityGroupRules",
            |r| r.security_group_id.as_str(),
        )) as Box<dyn ReferenceCheck>]
    }
}
