use async_trait::async_trait;
use cloudnet_operator_apis::{
    SecurityGroup, SecurityGroupRule, SecurityGroupRuleResolved, SecurityGroupRuleSpec,
};

use super::changed;
use crate::{
    provider::{
        CreateSecurityGroupRuleRequest, Provider, ProviderError, SecurityGroupRuleInfo,
        SecurityGroupRuleUpdate,
    },
    reconciler::ManagedKind,
    resolver::{ResolveError, Resolver},
};

#[async_trait]
impl ManagedKind for SecurityGroupRule {
    const FINALIZER: &'static str = "securitygrouprule.cloudnet.io/finalizer";

    type Info = SecurityGroupRuleInfo;
    type Update = SecurityGroupRuleUpdate;

    async fn resolve(
        &self,
        resolver: &Resolver<'_>,
    ) -> Result<SecurityGroupRuleResolved, ResolveError> {
        Ok(SecurityGroupRuleResolved {
            security_group_id: resolver
                .resolve::<SecurityGroup>(&self.spec.security_group)
                .await?,
        })
    }

    async fn create_external(
        &self,
        provider: &dyn Provider,
        resolved: &SecurityGroupRuleResolved,
    ) -> Result<String, ProviderError> {
        let spec = &self.spec;
        provider
            .create_security_group_rule(&CreateSecurityGroupRuleRequest {
                security_group_id: resolved.security_group_id.clone(),
                description: spec.description.clone(),
                direction: spec.direction,
                protocol: spec.protocol,
                ethertype: spec.ethertype,
                multiport: spec.multiport.clone(),
                action: spec.action,
                priority: spec.priority,
            })
            .await
    }

    async fn get_external(
        &self,
        provider: &dyn Provider,
        id: &str,
    ) -> Result<Option<SecurityGroupRuleInfo>, ProviderError> {
        provider.get_security_group_rule(id).await
    }

    fn detect_drift(&self, baseline: &SecurityGroupRuleSpec) -> Option<SecurityGroupRuleUpdate> {
        changed(&self.spec.description, &baseline.description).map(|description| {
            SecurityGroupRuleUpdate {
                description: Some(description),
            }
        })
    }

    async fn update_external(
        &self,
        provider: &dyn Provider,
        id: &str,
        _: &SecurityGroupRuleInfo,
        update: &SecurityGroupRuleUpdate,
    ) -> Result<(), ProviderError> {
        provider.update_security_group_rule(id, update).await
    }

    async fn delete_external(&self, provider: &dyn Provider, id: &str) -> Result<(), ProviderError> {
        provider.delete_security_group_rule(id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        reconciler::tests::{condition, converge, run, setup},
        testing::*,
    };
    use cloudnet_operator_apis::{
        Dependency, Direction, Managed, Protocol, RuleAction, READY, SYNCED,
    };

    #[tokio::test]
    async fn rule_follows_its_group() {
        let (store, cloud, ctx) = setup();
        store.insert(&security_group("default", "web"));
        store.insert(&security_group_rule("default", "https", Dependency::reference("web")));

        run::<SecurityGroupRule>(&ctx, "https").await.unwrap();
        run::<SecurityGroupRule>(&ctx, "https").await.unwrap();
        let r: SecurityGroupRule = store.get_typed("default", "https").unwrap();
        assert_eq!(
            "Waiting for dependencies: SecurityGroup dependency 'web' is not ready: external ID is not yet set",
            condition(r.conditions(), READY).2
        );

        let group_id = converge::<SecurityGroup>(&ctx, "web").await;
        let rule_id = converge::<SecurityGroupRule>(&ctx, "https").await;
        assert_eq!(1, cloud.calls("create_security_group_rule").await);
        assert!(cloud.exists(&rule_id).await);
        let r: SecurityGroupRule = store.get_typed("default", "https").unwrap();
        assert_eq!(group_id, r.resolved_dependencies().unwrap().security_group_id);
    }

    #[test]
    fn only_description_drifts() {
        let r = security_group_rule("default", "https", Dependency::id("sg-1"));
        let mut baseline = r.spec.clone();
        baseline.direction = Direction::Egress;
        baseline.protocol = Protocol::Udp;
        baseline.action = RuleAction::Deny;
        assert_eq!(None, r.detect_drift(&baseline));
        baseline.description = "http".to_string();
        assert_eq!(
            Some(SecurityGroupRuleUpdate {
                description: Some("https".to_string())
            }),
            r.detect_drift(&baseline)
        );
    }

    #[tokio::test]
    async fn group_deletion_waits_for_rules() {
        let (store, cloud, ctx) = setup();
        store.insert(&security_group("default", "web"));
        let group_id = converge::<SecurityGroup>(&ctx, "web").await;
        store.insert(&security_group_rule("default", "https", Dependency::reference("web")));
        let rule_id = converge::<SecurityGroupRule>(&ctx, "https").await;

        store.delete::<SecurityGroup>("default", "web");
        run::<SecurityGroup>(&ctx, "web").await.unwrap();
        let sg: SecurityGroup = store.get_typed("default", "web").unwrap();
        assert_eq!(
            ("False".into(), "DeletionBlocked".into(), "Still referenced by https".into()),
            condition(sg.conditions(), READY)
        );
        assert_eq!("DeletionBlocked", condition(sg.conditions(), SYNCED).1);

        store.delete::<SecurityGroupRule>("default", "https");
        run::<SecurityGroupRule>(&ctx, "https").await.unwrap();
        assert!(!cloud.exists(&rule_id).await);
        run::<SecurityGroup>(&ctx, "web").await.unwrap();
        assert!(!cloud.exists(&group_id).await);
        assert!(store.get_typed::<SecurityGroup>("default", "web").is_none());
    }
}
