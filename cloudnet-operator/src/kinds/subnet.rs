use async_trait::async_trait;
use cloudnet_operator_apis::{
    Managed, NatGateway, Network, SnatRule, Subnet, SubnetResolved, SubnetSpec,
};
use kube::ResourceExt;

use super::changed;
use crate::{
    provider::{CreateSubnetRequest, Provider, ProviderError, SubnetInfo, SubnetUpdate},
    reconciler::ManagedKind,
    reference_guard::{BackReference, ReferenceCheck},
    resolver::{ResolveError, Resolver},
};

#[async_trait]
impl ManagedKind for Subnet {
    const FINALIZER: &'static str = "subnet.cloudnet.io/finalizer";

    type Info = SubnetInfo;
    type Update = SubnetUpdate;

    async fn resolve(&self, resolver: &Resolver<'_>) -> Result<SubnetResolved, ResolveError> {
        Ok(SubnetResolved {
            network_id: resolver.resolve::<Network>(&self.spec.network).await?,
        })
    }

    async fn create_external(
        &self,
        provider: &dyn Provider,
        resolved: &SubnetResolved,
    ) -> Result<String, ProviderError> {
        provider
            .create_subnet(&CreateSubnetRequest {
                name: self.name_any(),
                description: self.spec.description.clone(),
                cidr: self.spec.cidr.clone(),
                gateway_ip: self.spec.gateway_ip.clone(),
                network_id: resolved.network_id.clone(),
            })
            .await
    }

    async fn get_external(
        &self,
        provider: &dyn Provider,
        id: &str,
    ) -> Result<Option<SubnetInfo>, ProviderError> {
        provider.get_subnet(id).await
    }

    fn detect_drift(&self, baseline: &SubnetSpec) -> Option<SubnetUpdate> {
        changed(&self.spec.description, &baseline.description).map(|description| SubnetUpdate {
            description: Some(description),
        })
    }

    async fn update_external(
        &self,
        provider: &dyn Provider,
        id: &str,
        live: &SubnetInfo,
        update: &SubnetUpdate,
    ) -> Result<(), ProviderError> {
        provider.update_subnet(&live.network_id, id, update).await
    }

    /// Subnets are deleted through their network. Without a resolved network
    /// ID the network is taken from the live subnet.
    async fn delete_external(&self, provider: &dyn Provider, id: &str) -> Result<(), ProviderError> {
        let resolved = self
            .resolved_dependencies()
            .map(|r| r.network_id.clone())
            .filter(|network_id| !network_id.is_empty());
        let network_id = match resolved {
            Some(network_id) => network_id,
            None => match provider.get_subnet(id).await? {
                Some(live) => {
                    debug!(
                        "recovered network {} of subnet {} from the provider",
                        live.network_id, id
                    );
                    live.network_id
                }
                None => {
                    debug!("subnet {} is already gone", id);
                    return Ok(());
                }
            },
        };
        provider.delete_subnet(&network_id, id).await
    }

    fn reference_checks() -> Vec<Box<dyn ReferenceCheck>> {
        vec![
            Box::new(BackReference::<NatGateway>::new("NATGateways", |r| {
                r.subnet_id.as_str()
            })) as Box<dyn ReferenceCheck>,
            Box::new(BackReference::<SnatRule>::new("SNATRules", |r| r.subnet_id.as_str())),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        reconciler::tests::{condition, converge, run, setup},
        testing::*,
    };
    use cloudnet_operator_apis::{Dependency, LabelSelector, SnatRuleResolved, READY};

    #[tokio::test]
    async fn resolves_network_by_selector() {
        let (store, cloud, ctx) = setup();
        let mut n = network("default", "main");
        n.metadata.labels = Some([("role".to_string(), "core".to_string())].into());
        store.insert(&n);
        let network_id = converge::<Network>(&ctx, "main").await;

        store.insert(&subnet(
            "default",
            "web",
            Dependency::Selector(LabelSelector::new([("role", "core")])),
        ));
        let subnet_id = converge::<Subnet>(&ctx, "web").await;
        assert!(cloud.exists(&subnet_id).await);
        let s: Subnet = store.get_typed("default", "web").unwrap();
        assert_eq!(network_id, s.resolved_dependencies().unwrap().network_id);
    }

    #[tokio::test]
    async fn description_drift_is_applied_through_the_network() {
        let (store, cloud, ctx) = setup();
        store.insert(&network("default", "main"));
        converge::<Network>(&ctx, "main").await;
        store.insert(&subnet("default", "web", Dependency::reference("main")));
        converge::<Subnet>(&ctx, "web").await;

        let mut s: Subnet = store.get_typed("default", "web").unwrap();
        s.spec.description = "frontend".to_string();
        store.insert(&s);
        run::<Subnet>(&ctx, "web").await.unwrap();
        assert_eq!(1, cloud.calls("update_subnet").await);
        let s: Subnet = store.get_typed("default", "web").unwrap();
        assert_eq!(
            "frontend",
            s.status.unwrap().last_applied_spec.unwrap().description
        );
    }

    #[tokio::test]
    async fn deletion_recovers_missing_network_id() {
        let (store, cloud, ctx) = setup();
        store.insert(&network("default", "main"));
        converge::<Network>(&ctx, "main").await;
        store.insert(&subnet("default", "web", Dependency::reference("main")));
        let subnet_id = converge::<Subnet>(&ctx, "web").await;

        store.merge_status::<Subnet>("default", "web", serde_json::json!({ "resolvedDependencies": null }));
        store.delete::<Subnet>("default", "web");
        run::<Subnet>(&ctx, "web").await.unwrap();
        assert!(!cloud.exists(&subnet_id).await);
        assert_eq!(1, cloud.calls("delete_subnet").await);
        assert!(store.get_typed::<Subnet>("default", "web").is_none());
    }

    #[tokio::test]
    async fn deletion_waits_for_snat_rules() {
        let (store, cloud, ctx) = setup();
        store.insert(&network("default", "main"));
        converge::<Network>(&ctx, "main").await;
        store.insert(&subnet("default", "web", Dependency::reference("main")));
        let subnet_id = converge::<Subnet>(&ctx, "web").await;
        let mut rule = snat_rule(
            "default",
            "egress",
            Dependency::id("nat-1"),
            Dependency::id(&subnet_id),
            Dependency::id("eip-1"),
        );
        rule.managed_status_mut().resolved_dependencies = Some(SnatRuleResolved {
            nat_gateway_id: "nat-1".to_string(),
            subnet_id: subnet_id.clone(),
            public_ip_id: "eip-1".to_string(),
        });
        store.insert(&rule);

        store.delete::<Subnet>("default", "web");
        run::<Subnet>(&ctx, "web").await.unwrap();
        let s: Subnet = store.get_typed("default", "web").unwrap();
        assert_eq!("Still referenced by egress", condition(s.conditions(), READY).2);
        assert!(cloud.exists(&subnet_id).await);
    }
}
