//! Wiring of the reconcilers into kube-runtime controllers.

use std::{
    future::Future,
    sync::Arc,
    time::{Duration, Instant},
};

use cloudnet_operator_apis::{
    NatGateway, Network, ProviderConfig, PublicIp, SecurityGroup, SecurityGroupRule, SnatRule,
    Subnet,
};
use futures::StreamExt;
use k8s_openapi::{api::core::v1::Secret, NamespaceResourceScope};
use kube::{Api, Client, Resource, ResourceExt};
use kube_runtime::{
    controller::{self, Action},
    reflector::ObjectRef,
    watcher::{self, Config},
    Controller,
};
use opentelemetry::{
    global,
    metrics::{Counter, Histogram, Meter},
    KeyValue,
};
use serde::de::DeserializeOwned;
use tokio::{task::JoinHandle, time::sleep};

use crate::{
    errors::ControllerError,
    kinds::provider_config::{self, provider_configs_for_secret},
    reconciler::{self, Context, ManagedKind},
    utils::metric_name,
};

const CLOUDNET_CONTROLLER: &str = "cloudnet_controller";

/// Reconcile duration buckets in milliseconds.
const DURATION_BUCKETS: [f64; 9] = [
    200.0, 400.0, 800.0, 1600.0, 3200.0, 6400.0, 12800.0, 25600.0, 51200.0,
];

/// The reconciler context of one controller, adding per kind metrics.
pub(crate) struct ControllerContext {
    ctx: Arc<Context>,
    kind: String,
    reconcile_count: Counter<u64>,
    reconcile_duration: Histogram<u64>,
}

impl ControllerContext {
    pub fn new(ctx: Arc<Context>, kind: &str) -> Self {
        let meter: Meter = global::meter(CLOUDNET_CONTROLLER);
        let reconcile_count = meter
            .u64_counter(metric_name("reconcile_count"))
            .with_description("Count of reconcile invocations")
            .build();
        let reconcile_duration = meter
            .u64_histogram(metric_name("reconcile_duration_ms"))
            .with_description("Reconcile duration in milliseconds")
            .with_unit("ms")
            .with_boundaries(DURATION_BUCKETS.to_vec())
            .build();
        Self {
            ctx,
            kind: kind.to_string(),
            reconcile_count,
            reconcile_duration,
        }
    }

    fn labels<K: Resource>(&self, object: &K) -> [KeyValue; 3] {
        [
            KeyValue::new("kind", self.kind.clone()),
            KeyValue::new("object_name", object.name_any()),
            KeyValue::new("object_namespace", object.namespace().unwrap_or_default()),
        ]
    }

    /// Run `reconcile` on `object`, counting and timing the invocation.
    async fn measure<K, F>(&self, object: Arc<K>, reconcile: F) -> Result<Action, ControllerError>
    where
        K: Resource,
        F: Future<Output = Result<Action, ControllerError>>,
    {
        let labels = self.labels(object.as_ref());
        let start = Instant::now();
        let result = reconcile.await;
        let duration = Instant::now() - start;
        self.reconcile_count.add(1, &labels);
        self.reconcile_duration
            .record(duration.as_millis() as u64, &labels);
        result
    }
}

async fn reconcile_managed<K: ManagedKind>(
    object: Arc<K>,
    me: Arc<ControllerContext>,
) -> Result<Action, ControllerError> {
    me.measure(
        object.clone(),
        reconciler::reconcile(object, me.ctx.clone()),
    )
    .await
}

async fn reconcile_provider_config(
    object: Arc<ProviderConfig>,
    me: Arc<ControllerContext>,
) -> Result<Action, ControllerError> {
    me.measure(
        object.clone(),
        provider_config::reconcile(object, me.ctx.clone()),
    )
    .await
}

/// The controller triggers this on reconcile errors
fn error_policy<K>(_object: Arc<K>, error: &ControllerError, _ctx: Arc<ControllerContext>) -> Action {
    if error.is_temporary() {
        Action::requeue(Duration::from_secs(30))
    } else {
        Action::requeue(Duration::from_secs(300))
    }
}

async fn report<K>(
    kind: &str,
    res: Result<(ObjectRef<K>, Action), controller::Error<ControllerError, watcher::Error>>,
) where
    K: Resource,
    K::DynamicType: std::fmt::Debug,
{
    match res {
        Ok(o) => {
            debug!("reconciled {:?}", o);
        }
        Err(e) => {
            let meter: Meter = global::meter(CLOUDNET_CONTROLLER);
            let reconcile_errors = meter
                .u64_counter(metric_name("reconcile_errors"))
                .with_description("Count of reconcile invocation errors")
                .build();
            let labels = &[KeyValue::new("kind", kind.to_string())];
            match e {
                a @ controller::Error::QueueError { .. } => {
                    debug!("reconcile of {} failed: {:?}", kind, a);
                    reconcile_errors.add(1, labels);
                    // Slow down on errors caused by missing CRDs or permissions.
                    sleep(Duration::from_secs(30)).await;
                }
                a @ controller::Error::ObjectNotFound { .. } => {
                    debug!("reconcile of {} failed: {:?}", kind, a);
                }
                e => {
                    warn!("reconcile of {} failed: {:?}", kind, e);
                    reconcile_errors.add(1, labels);
                }
            }
        }
    }
}

/// The API of `K` in `namespace`, or across all namespaces if `None`.
fn api<K>(client: &Client, namespace: Option<&str>) -> Api<K>
where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope> + DeserializeOwned,
{
    match namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    }
}

/// Run the controller of managed resource kind `K`.
pub(crate) fn managed<K>(
    client: &Client,
    namespace: Option<&str>,
    ctx: Arc<Context>,
) -> impl Future<Output = ()> + use<K>
where
    K: ManagedKind + Resource<Scope = NamespaceResourceScope>,
{
    let kind = K::kind(&()).to_string();
    info!("starting {} controller", kind);
    let me = Arc::new(ControllerContext::new(ctx, &kind));
    Controller::new(api::<K>(client, namespace), Config::default())
        .run(reconcile_managed::<K>, error_policy, me)
        .for_each(move |res| {
            let kind = kind.clone();
            async move { report(&kind, res).await }
        })
}

/// Run the ProviderConfig controller, re-validating configs when their
/// credentials Secret changes.
pub(crate) fn provider_configs(
    client: &Client,
    namespace: Option<&str>,
    ctx: Arc<Context>,
) -> impl Future<Output = ()> + use<> {
    let kind = ProviderConfig::kind(&()).to_string();
    info!("starting {} controller", kind);
    let me = Arc::new(ControllerContext::new(ctx, &kind));
    let controller = Controller::new(api::<ProviderConfig>(client, namespace), Config::default());
    let configs = controller.store();
    controller
        .watches(
            api::<Secret>(client, namespace),
            Config::default(),
            move |secret| provider_configs_for_secret(&secret, &configs.state()),
        )
        .run(reconcile_provider_config, error_policy, me)
        .for_each(move |res| {
            let kind = kind.clone();
            async move { report(&kind, res).await }
        })
}

/// Spawn the ProviderConfig controller and one controller per managed kind
/// onto the runtime's worker threads.
pub(crate) fn spawn_all(
    client: &Client,
    namespace: Option<&str>,
    ctx: Arc<Context>,
) -> Vec<JoinHandle<()>> {
    vec![
        tokio::spawn(provider_configs(client, namespace, ctx.clone())),
        tokio::spawn(managed::<Network>(client, namespace, ctx.clone())),
        tokio::spawn(managed::<Subnet>(client, namespace, ctx.clone())),
        tokio::spawn(managed::<SecurityGroup>(client, namespace, ctx.clone())),
        tokio::spawn(managed::<SecurityGroupRule>(client, namespace, ctx.clone())),
        tokio::spawn(managed::<PublicIp>(client, namespace, ctx.clone())),
        tokio::spawn(managed::<NatGateway>(client, namespace, ctx.clone())),
        tokio::spawn(managed::<SnatRule>(client, namespace, ctx)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{reconciler::tests::setup, testing::*};

    fn spawnable<F, R>(_: F)
    where
        F: Fn(&Client, Option<&str>, Arc<Context>) -> R,
        R: Future<Output = ()> + Send + 'static,
    {
    }

    #[test]
    fn controllers_can_run_on_worker_threads() {
        spawnable(provider_configs);
        spawnable(managed::<Network>);
        spawnable(managed::<Subnet>);
        spawnable(managed::<SecurityGroup>);
        spawnable(managed::<SecurityGroupRule>);
        spawnable(managed::<PublicIp>);
        spawnable(managed::<NatGateway>);
        spawnable(managed::<SnatRule>);
    }

    #[test]
    fn requeue_depends_on_error_kind() {
        let (_store, _cloud, ctx) = setup();
        let me = Arc::new(ControllerContext::new(ctx, "Network"));
        let object = Arc::new(network("default", "main"));
        assert_eq!(
            Action::requeue(Duration::from_secs(30)),
            error_policy(
                object.clone(),
                &ControllerError::ReferenceCheck("busy".to_string()),
                me.clone()
            )
        );
        let invalid = serde_json::from_str::<Network>("{").unwrap_err();
        assert_eq!(
            Action::requeue(Duration::from_secs(300)),
            error_policy(object, &ControllerError::Serde(invalid), me)
        );
    }

    #[test]
    fn labels_name_the_object() {
        let (_store, _cloud, ctx) = setup();
        let me = ControllerContext::new(ctx, "Network");
        let labels = me.labels(&network("default", "main"));
        assert_eq!(KeyValue::new("kind", "Network"), labels[0]);
        assert_eq!(KeyValue::new("object_name", "main"), labels[1]);
        assert_eq!(KeyValue::new("object_namespace", "default"), labels[2]);
    }

    #[tokio::test]
    async fn measure_passes_the_result_through() {
        let (store, _cloud, ctx) = setup();
        store.insert(&network("default", "main"));
        let me = ControllerContext::new(ctx, "Network");
        let object = Arc::new(network("default", "main"));
        let result = me
            .measure(object, async { Ok(Action::await_change()) })
            .await;
        assert_eq!(Action::await_change(), result.unwrap());
    }
}
