//! Validation of ProviderConfig credentials.

use std::sync::Arc;

use cloudnet_operator_apis::{ProviderConfig, ProviderConfigReference};
use k8s_openapi::{api::core::v1::Secret, chrono::Utc};
use kube::ResourceExt;
use kube_runtime::{controller::Action, reflector::ObjectRef};

use crate::{
    conditions::{reason, Overrides, Transition},
    errors::ControllerError,
    modifications::Modifications,
    reconciler::Context,
};

const FINALIZER: &str = "providerconfig.cloudnet.io/finalizer";

fn transition(config: &mut ProviderConfig, transition: Transition) {
    let generation = config.metadata.generation;
    let status = config.status_mut();
    let conditions = std::mem::take(&mut status.conditions);
    status.conditions = transition.apply(conditions, generation);
}

/// Validate the credentials of `config`, re-validating periodically.
pub(crate) async fn reconcile(
    config: Arc<ProviderConfig>,
    ctx: Arc<Context>,
) -> Result<Action, ControllerError> {
    let store = ctx.store.as_ref();
    let namespace = config.namespace().unwrap_or_default();
    let name = config.name_any();
    let reference = ProviderConfigReference {
        name: name.clone(),
        namespace: Some(namespace.clone()),
    };
    let mut object = Modifications::new(config.as_ref().clone());

    if object.is_deleted() {
        ctx.providers.invalidate(&reference, &namespace).await;
        if object.remove_finalizer(store, FINALIZER).await? {
            info!("released ProviderConfig {}/{}", namespace, name);
        }
        return Ok(Action::await_change());
    }
    if object.add_finalizer(store, FINALIZER).await? {
        debug!("added finalizer {} to ProviderConfig {}/{}", FINALIZER, namespace, name);
        return Ok(Action::requeue(ctx.timings.immediate));
    }

    let interval = ctx.timings.validation;
    let generation = object.metadata.generation;
    object.status_mut().observed_generation = generation;
    match ctx.providers.get_or_create(&reference, &namespace).await {
        Err(e) => {
            error!(
                "failed to initialize provider client for ProviderConfig {}/{}: {}",
                namespace, name, e
            );
            transition(
                &mut object,
                Transition::NotReady(
                    Overrides::reason(reason::PROVIDER_INITIALIZATION_FAILED)
                        .with_message(format!("Failed to initialize provider client: {}", e)),
                ),
            );
        }
        Ok((provider, _)) => match provider.validate().await {
            Err(e) => {
                warn!("validation of ProviderConfig {}/{} failed: {}", namespace, name, e);
                transition(
                    &mut object,
                    Transition::ValidationFailed(Overrides::message(format!(
                        "Provider validation failed: {}",
                        e
                    ))),
                );
                ctx.providers.invalidate(&reference, &namespace).await;
            }
            Ok(()) => {
                debug!("ProviderConfig {}/{} is valid", namespace, name);
                transition(&mut object, Transition::ValidationSuccessful);
                object.status_mut().last_validation_time = Some(Utc::now().to_rfc3339());
            }
        },
    }
    object.patch_status(store).await?;
    Ok(Action::requeue(interval))
}

/// ProviderConfigs using `secret` as their credentials.
pub(crate) fn provider_configs_for_secret(
    secret: &Secret,
    configs: &[Arc<ProviderConfig>],
) -> Vec<ObjectRef<ProviderConfig>> {
    let secret_namespace = secret.namespace().unwrap_or_default();
    let secret_name = secret.name_any();
    configs
        .iter()
        .filter(|config| {
            let secret_ref = &config.spec.credentials_secret_ref;
            let namespace = secret_ref
                .namespace
                .clone()
                .filter(|ns| !ns.is_empty())
                .or_else(|| config.namespace())
                .unwrap_or_default();
            secret_ref.name == secret_name && namespace == secret_namespace
        })
        .map(|config| ObjectRef::from_obj(config.as_ref()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        reconciler::tests::{condition, setup},
        store,
        testing::*,
    };
    use cloudnet_operator_apis::{SecretReference, READY};

    async fn run(ctx: &Arc<Context>) -> Result<Action, ControllerError> {
        let config: ProviderConfig = store::get(ctx.store.as_ref(), "default", "otc")
            .await
            .unwrap()
            .unwrap();
        reconcile(Arc::new(config), ctx.clone()).await
    }

    #[tokio::test]
    async fn validates_credentials() {
        let (store, cloud, ctx) = setup();
        store.insert(&provider_config("default", "otc"));
        assert_eq!(Action::requeue(ctx.timings.immediate), run(&ctx).await.unwrap());
        assert_eq!(Action::requeue(ctx.timings.validation), run(&ctx).await.unwrap());
        let pc: ProviderConfig = store.get_typed("default", "otc").unwrap();
        assert_eq!(vec![FINALIZER.to_string()], pc.finalizers().to_vec());
        assert_eq!(
            (
                "True".into(),
                "ValidationSuccessful".into(),
                "Provider credentials and permissions are valid".into()
            ),
            condition(pc.conditions(), READY)
        );
        let generation = pc.metadata.generation;
        let status = pc.status.unwrap();
        assert!(status.last_validation_time.is_some());
        assert_eq!(generation, status.observed_generation);
        assert_eq!(1, cloud.calls("validate").await);
    }

    #[tokio::test]
    async fn failed_validation_drops_client() {
        let (store, cloud, ctx) = setup();
        store.insert(&provider_config("default", "otc"));
        run(&ctx).await.unwrap();
        cloud.reject_validation(Some("forbidden")).await;
        assert_eq!(Action::requeue(ctx.timings.validation), run(&ctx).await.unwrap());
        let pc: ProviderConfig = store.get_typed("default", "otc").unwrap();
        assert_eq!(
            (
                "False".into(),
                "ValidationFailed".into(),
                "Provider validation failed: failed to list networks: forbidden".into()
            ),
            condition(pc.conditions(), READY)
        );
        assert_eq!(None, pc.status.unwrap().last_validation_time);

        cloud.reject_validation(None).await;
        run(&ctx).await.unwrap();
        assert_eq!(2, cloud.calls("connect").await);
        let pc: ProviderConfig = store.get_typed("default", "otc").unwrap();
        assert_eq!("True", condition(pc.conditions(), READY).0);
    }

    #[tokio::test]
    async fn missing_secret_fails_initialization() {
        let (store, _cloud, ctx) = setup();
        let mut pc = provider_config("default", "otc");
        pc.spec.credentials_secret_ref.name = "absent".to_string();
        store.insert(&pc);
        run(&ctx).await.unwrap();
        assert_eq!(Action::requeue(ctx.timings.validation), run(&ctx).await.unwrap());
        let pc: ProviderConfig = store.get_typed("default", "otc").unwrap();
        let (status, reason, message) = condition(pc.conditions(), READY);
        assert_eq!(("False", "ProviderInitializationFailed"), (status.as_str(), reason.as_str()));
        assert!(message.starts_with("Failed to initialize provider client: "));
    }

    #[tokio::test]
    async fn deletion_releases_client() {
        let (store, cloud, ctx) = setup();
        store.insert(&provider_config("default", "otc"));
        run(&ctx).await.unwrap();
        run(&ctx).await.unwrap();
        store.delete::<ProviderConfig>("default", "otc");
        assert_eq!(Action::await_change(), run(&ctx).await.unwrap());
        assert!(store.get_typed::<ProviderConfig>("default", "otc").is_none());

        store.insert(&provider_config("default", "otc"));
        run(&ctx).await.unwrap();
        run(&ctx).await.unwrap();
        assert_eq!(2, cloud.calls("connect").await);
    }

    #[test]
    fn secret_maps_to_its_configs() {
        let mut shared = provider_config("infra", "shared");
        shared.spec.credentials_secret_ref = SecretReference {
            name: "credentials".to_string(),
            namespace: Some("default".to_string()),
        };
        let configs: Vec<Arc<ProviderConfig>> = vec![
            Arc::new(provider_config("default", "otc")),
            Arc::new(provider_config("other", "otc")),
            Arc::new(shared),
        ];
        let refs = provider_configs_for_secret(&password_secret("default"), &configs);
        let names: Vec<String> = refs
            .iter()
            .map(|r| format!("{}/{}", r.namespace.as_deref().unwrap_or(""), r.name))
            .collect();
        assert_eq!(vec!["default/otc".to_string(), "infra/shared".to_string()], names);
        assert!(provider_configs_for_secret(&secret("default", "unrelated", &[]), &configs).is_empty());
    }
}
