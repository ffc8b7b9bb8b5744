use async_trait::async_trait;
use cloudnet_operator_apis::{NoDependencies, PublicIp, PublicIpSpec, SnatRule};
use kube::ResourceExt;

use super::changed;
use crate::{
    provider::{
        bandwidth_name, bandwidth_share_type, public_ip_type, CreatePublicIpRequest, Provider,
        ProviderError, PublicIpInfo, PublicIpUpdate,
    },
    reconciler::ManagedKind,
    reference_guard::{BackReference, ReferenceCheck},
    resolver::{ResolveError, Resolver},
};

#[async_trait]
impl ManagedKind for PublicIp {
    const FINALIZER: &'static str = "publicip.cloudnet.io/finalizer";

    type Info = PublicIpInfo;
    type Update = PublicIpUpdate;

    async fn resolve(&self, _: &Resolver<'_>) -> Result<NoDependencies, ResolveError> {
        Ok(NoDependencies {})
    }

    async fn create_external(
        &self,
        provider: &dyn Provider,
        _: &NoDependencies,
    ) -> Result<String, ProviderError> {
        let name = self.name_any();
        provider
            .create_public_ip(&CreatePublicIpRequest {
                ip_type: public_ip_type(self.spec.type_).to_string(),
                bandwidth_name: bandwidth_name(&name),
                bandwidth_size: self.spec.bandwidth_size,
                bandwidth_share_type: bandwidth_share_type(self.spec.bandwidth_share_type)
                    .to_string(),
                name,
            })
            .await
    }

    async fn get_external(
        &self,
        provider: &dyn Provider,
        id: &str,
    ) -> Result<Option<PublicIpInfo>, ProviderError> {
        provider.get_public_ip(id).await
    }

    /// Only the bandwidth size can be changed in place.
    fn detect_drift(&self, baseline: &PublicIpSpec) -> Option<PublicIpUpdate> {
        changed(&self.spec.bandwidth_size, &baseline.bandwidth_size).map(|size| PublicIpUpdate {
            bandwidth_size: Some(size),
        })
    }

    async fn update_external(
        &self,
        provider: &dyn Provider,
        id: &str,
        _: &PublicIpInfo,
        update: &PublicIpUpdate,
    ) -> Result<(), ProviderError> {
        provider.update_public_ip(id, update).await
    }

    async fn delete_external(&self, provider: &dyn Provider, id: &str) -> Result<(), ProviderError> {
        provider.delete_public_ip(id).await
    }

    fn reference_checks() -> Vec<Box<dyn ReferenceCheck>> {
        vec![Box::new(BackReference::<SnatRule>::new("SNATRules", |r| {
            r.public_ip_id.as_str()
        })) as Box<dyn ReferenceCheck>]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        reconciler::tests::{condition, converge, run, setup},
        testing::*,
    };
    use cloudnet_operator_apis::{BandwidthShareType, Managed, PublicIpType, READY};
    use kube_runtime::controller::Action;

    #[tokio::test]
    async fn creates_with_mapped_types() {
        let (store, cloud, ctx) = setup();
        let mut ip = public_ip("default", "egress");
        ip.spec.type_ = PublicIpType::Mail;
        ip.spec.bandwidth_share_type = BandwidthShareType::Shared;
        store.insert(&ip);
        let id = converge::<PublicIp>(&ctx, "egress").await;
        let live = cloud.public_ip(&id).await.unwrap();
        assert_eq!("egress", live.name);
        assert_eq!("5_mailbgp", live.ip_type);
        assert_eq!("bandwidth-egress", live.bandwidth_name);
        assert_eq!("WHOLE", live.bandwidth_share_type);
        assert_eq!(10, live.bandwidth_size);
    }

    #[tokio::test]
    async fn bandwidth_is_resized() {
        let (store, cloud, ctx) = setup();
        store.insert(&public_ip("default", "egress"));
        let id = converge::<PublicIp>(&ctx, "egress").await;

        let mut ip: PublicIp = store.get_typed("default", "egress").unwrap();
        ip.spec.type_ = PublicIpType::Mail;
        store.insert(&ip);
        run::<PublicIp>(&ctx, "egress").await.unwrap();
        assert_eq!(0, cloud.calls("update_public_ip").await);

        let mut ip: PublicIp = store.get_typed("default", "egress").unwrap();
        ip.spec.bandwidth_size = 50;
        store.insert(&ip);
        run::<PublicIp>(&ctx, "egress").await.unwrap();
        assert_eq!(50, cloud.public_ip(&id).await.unwrap().bandwidth_size);
        assert_eq!("5_bgp", cloud.public_ip(&id).await.unwrap().ip_type);
    }

    #[tokio::test]
    async fn frozen_address_is_stopped() {
        let (store, cloud, ctx) = setup();
        store.insert(&public_ip("default", "egress"));
        let id = converge::<PublicIp>(&ctx, "egress").await;
        cloud.set_status(&id, "FREEZED").await;
        assert_eq!(
            Action::requeue(ctx.timings.error),
            run::<PublicIp>(&ctx, "egress").await.unwrap()
        );
        let ip: PublicIp = store.get_typed("default", "egress").unwrap();
        assert_eq!(
            ("False".into(), "Stopped".into(), "Public IP is inactive.".into()),
            condition(ip.conditions(), READY)
        );
    }

    #[tokio::test]
    async fn invalid_bandwidth_fails_creation() {
        let (store, cloud, ctx) = setup();
        let mut ip = public_ip("default", "egress");
        ip.spec.bandwidth_size = 0;
        store.insert(&ip);
        run::<PublicIp>(&ctx, "egress").await.unwrap();
        run::<PublicIp>(&ctx, "egress").await.unwrap();
        let ip: PublicIp = store.get_typed("default", "egress").unwrap();
        assert_eq!(
            (
                "False".into(),
                "ProvisioningFailed".into(),
                "Failed to create resource: invalid bandwidth size 0".into()
            ),
            condition(ip.conditions(), READY)
        );
        assert_eq!("", ip.external_id());
        assert_eq!(1, cloud.calls("create_public_ip").await);
    }
}
