use std::{collections::HashMap, sync::Arc};

use cloudnet_operator_apis::{ProviderConfig, ProviderConfigReference};
use k8s_openapi::{api::core::v1::Secret, chrono::Utc};
use kube::ResourceExt;
use tokio::sync::RwLock;

use crate::{
    errors::StoreError,
    provider::{ConnectionOptions, Credentials, Provider, ProviderError, ProviderFactory},
    store::{self, ObjectStore},
};

/// Identity of a [`ProviderConfig`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct ProviderKey {
    pub namespace: String,
    pub name: String,
}

impl ProviderKey {
    /// Key of `reference`, whose namespace defaults to `namespace`.
    pub fn new(reference: &ProviderConfigReference, namespace: &str) -> Self {
        Self {
            namespace: reference
                .namespace
                .clone()
                .filter(|ns| !ns.is_empty())
                .unwrap_or_else(|| namespace.to_string()),
            name: reference.name.clone(),
        }
    }
}

impl std::fmt::Display for ProviderKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

#[derive(thiserror::Error, Debug)]
pub(crate) enum CacheError {
    #[error("ProviderConfig {0} not found")]
    NotFound(ProviderKey),
    #[error("failed to get ProviderConfig {key}: {source}")]
    Store {
        key: ProviderKey,
        #[source]
        source: StoreError,
    },
    #[error("{0}")]
    Provider(#[from] ProviderError),
}

struct Entry {
    provider: Arc<dyn Provider>,
    created_at: String,
    /// `metadata.generation` of the ProviderConfig the client was built from.
    generation: Option<i64>,
    /// `metadata.resourceVersion` of the credentials Secret the client was built from.
    secret_version: Option<String>,
}

/// Authenticated provider clients, one per ProviderConfig.
///
/// An entry is only reused while the ProviderConfig's generation and the
/// credentials Secret's resourceVersion are unchanged.
pub(crate) struct ProviderCache {
    store: Arc<dyn ObjectStore>,
    factory: Arc<dyn ProviderFactory>,
    entries: RwLock<HashMap<ProviderKey, Entry>>,
}

impl ProviderCache {
    pub fn new(store: Arc<dyn ObjectStore>, factory: Arc<dyn ProviderFactory>) -> Self {
        Self {
            store,
            factory,
            entries: Default::default(),
        }
    }

    /// Client and current ProviderConfig for `reference`, `namespace` being the
    /// namespace of the referencing object.
    pub async fn get_or_create(
        &self,
        reference: &ProviderConfigReference,
        namespace: &str,
    ) -> Result<(Arc<dyn Provider>, ProviderConfig), CacheError> {
        let key = ProviderKey::new(reference, namespace);
        let config: ProviderConfig =
            match store::get(self.store.as_ref(), &key.namespace, &key.name).await {
                Ok(Some(config)) => config,
                Ok(None) => {
                    self.evict(&key).await;
                    return Err(CacheError::NotFound(key));
                }
                Err(source) => return Err(CacheError::Store { key, source }),
            };

        let secret_ref = &config.spec.credentials_secret_ref;
        let secret_namespace = secret_ref
            .namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| key.namespace.clone());
        // The secret is optional here, building the credentials reports a missing secret.
        let secret: Option<Secret> =
            match store::get(self.store.as_ref(), &secret_namespace, &secret_ref.name).await {
                Ok(secret) => secret,
                Err(e) => {
                    debug!(
                        "unable to read credentials secret {}/{} of ProviderConfig {}: {}",
                        secret_namespace, secret_ref.name, key, e
                    );
                    None
                }
            };
        let generation = config.metadata.generation;
        let secret_version = secret.as_ref().and_then(|s| s.resource_version());

        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(&key) {
                if entry.generation == generation && entry.secret_version == secret_version {
                    return Ok((entry.provider.clone(), config));
                }
            }
        }

        let credentials = Credentials::from_secret(secret.as_ref(), &secret_ref.name)?;
        let provider = self
            .factory
            .connect(ConnectionOptions::from(&config.spec), credentials)
            .await?;
        info!(
            "created provider client for ProviderConfig {} (generation {:?})",
            key, generation
        );
        let mut entries = self.entries.write().await;
        if let Some(previous) = entries.get(&key) {
            debug!(
                "replacing provider client for ProviderConfig {} created at {}",
                key, previous.created_at
            );
        }
        entries.insert(
            key,
            Entry {
                provider: provider.clone(),
                created_at: Utc::now().to_rfc3339(),
                generation,
                secret_version,
            },
        );
        Ok((provider, config))
    }

    /// Unconditionally drop the cached client of `reference`.
    pub async fn invalidate(&self, reference: &ProviderConfigReference, namespace: &str) {
        self.evict(&ProviderKey::new(reference, namespace)).await;
    }

    async fn evict(&self, key: &ProviderKey) {
        if self.entries.write().await.remove(key).is_some() {
            debug!("evicted provider client for ProviderConfig {}", key);
        }
    }
}
