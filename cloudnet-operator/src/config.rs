use std::{net::SocketAddr, str::FromStr, time::Duration};

use anyhow::Context;

use crate::retry::RetryOptions;

/// Requeue delays of the reconcilers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Timings {
    /// Retry while dependencies are not ready.
    pub dependency: Duration,
    /// Steady-state and error retry.
    pub error: Duration,
    /// Re-validation of ProviderConfigs.
    pub validation: Duration,
    /// First readiness poll after a create.
    pub create_poll: Duration,
    /// Requeue to continue with the next step right away.
    pub immediate: Duration,
    /// Periodic re-check of converged objects.
    pub resync: Duration,
}

impl Default for Timings {
    fn default() -> Self {
        Self {
            dependency: Duration::from_secs(10),
            error: Duration::from_secs(30),
            validation: Duration::from_secs(300),
            create_poll: Duration::from_secs(5),
            immediate: Duration::from_secs(1),
            resync: Duration::from_secs(3600),
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct Configuration {
    /// Namespace to watch, all namespaces if `None`.
    pub watch_namespace: Option<String>,
    pub metrics_addr: SocketAddr,
    pub timings: Timings,
    /// Polling of provider operations until the resource is ready.
    pub provider_wait: RetryOptions,
}

/// Value of the environment variable `name`, treating blank values as unset.
pub(crate) fn env_var(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Configuration {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(env_var)
    }

    fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> anyhow::Result<Self> {
        let number = |name: &str, default: u64| -> anyhow::Result<u64> {
            parse(&lookup, name).map(|v| v.unwrap_or(default))
        };
        let seconds = |name: &str, default: Duration| -> anyhow::Result<Duration> {
            number(name, default.as_secs()).map(Duration::from_secs)
        };
        let defaults = Timings::default();
        let timings = Timings {
            dependency: seconds("REQUEUE_DEPENDENCY_SECS", defaults.dependency)?,
            error: seconds("REQUEUE_ERROR_SECS", defaults.error)?,
            validation: seconds("REQUEUE_VALIDATION_SECS", defaults.validation)?,
            create_poll: seconds("REQUEUE_CREATE_POLL_SECS", defaults.create_poll)?,
            immediate: seconds("REQUEUE_IMMEDIATE_SECS", defaults.immediate)?,
            resync: seconds("RESYNC_SECS", defaults.resync)?,
        };
        let provider_wait = RetryOptions::new(
            seconds("PROVIDER_POLL_DELAY_SECS", Duration::from_secs(5))?,
            parse(&lookup, "PROVIDER_POLL_MAX_ATTEMPTS")?.unwrap_or(60),
        );
        let metrics_addr = format!(
            "{}:{}",
            lookup("METRICS_LISTEN_ADDR").unwrap_or_else(|| "0.0.0.0".to_string()),
            lookup("METRICS_LISTEN_PORT").unwrap_or_else(|| "9000".to_string()),
        );
        let metrics_addr = metrics_addr
            .parse()
            .with_context(|| format!("invalid metrics listen address {}", metrics_addr))?;
        Ok(Self {
            watch_namespace: lookup("WATCH_NAMESPACE"),
            metrics_addr,
            timings,
            provider_wait,
        })
    }
}

fn parse<T, F>(lookup: &F, name: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|v| {
            v.parse::<T>()
                .with_context(|| format!("invalid value {:?} for {}", v, name))
        })
        .transpose()
}
