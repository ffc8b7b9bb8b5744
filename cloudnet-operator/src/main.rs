#[macro_use]
extern crate log;

use std::sync::{atomic::Ordering, Arc};

use kube::Client;
use opentelemetry::global;
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus_exporter::{start_prometheus_metrics_server, ServerState};

mod conditions;
mod config;
mod controller;
mod errors;
mod kinds;
mod modifications;
mod prometheus_exporter;
mod provider;
mod provider_cache;
mod reconciler;
mod reference_guard;
mod resolver;
mod retry;
mod store;
#[cfg(test)]
mod testing;
mod utils;

use config::Configuration;
use provider::simulated::{SimulatedCloud, SimulatedFactory};
use provider_cache::ProviderCache;
use reconciler::Context;
use store::KubeStore;

/// The K8s field manager name.
const MANAGER: &str = "cloudnet-operator";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        debug!("rustls crypto provider already installed");
    }
    let configuration = Configuration::from_env()?;

    let registry = prometheus::Registry::new();
    let exporter = opentelemetry_prometheus::exporter()
        .with_registry(registry.clone())
        .build()?;
    let meter_provider = SdkMeterProvider::builder().with_reader(exporter).build();
    global::set_meter_provider(meter_provider.clone());
    let server_state = Arc::new(ServerState {
        registry,
        ready: Default::default(),
    });
    let prometheus_metrics_exporter =
        start_prometheus_metrics_server(configuration.metrics_addr, server_state.clone());

    let client = Client::try_default().await?;
    let (cancel, cancellation) = retry::cancellation();
    warn!("using the in-process simulated cloud backend");
    let cloud = SimulatedCloud::new(configuration.provider_wait, cancellation);
    let store = Arc::new(KubeStore::new(client.clone()));
    let providers = ProviderCache::new(store.clone(), Arc::new(SimulatedFactory::new(cloud)));
    let ctx = Arc::new(Context {
        store,
        providers: Arc::new(providers),
        timings: configuration.timings,
    });

    let namespace = configuration.watch_namespace.as_deref();
    match namespace {
        Some(ns) => info!("Controller is only watching resources in namespace {}", ns),
        None => info!("Controller is watching resources in all namespaces"),
    }
    let controllers = controller::spawn_all(&client, namespace, ctx);
    info!("start controllers ...");
    server_state.ready.store(true, Ordering::Relaxed);
    tokio::select! {
        (r, _, _) = futures::future::select_all(controllers) => {
            r?;
            warn!("a controller stopped unexpectedly");
        }
        r = prometheus_metrics_exporter => r?,
        r = tokio::signal::ctrl_c() => {
            r?;
            info!("shutting down");
        }
    };
    cancel.cancel();
    if let Err(e) = meter_provider.shutdown() {
        warn!("failed to shut down meter provider: {}", e);
    }
    Ok(())
}
