use cloudnet_operator_apis::{
    Dependency, LabelSelector, Managed, ProviderConfig, ProviderConfigReference, READY,
};
use kube::ResourceExt;
use serde::de::DeserializeOwned;

use crate::{
    errors::StoreError,
    store::{self, ObjectStore},
};

#[derive(thiserror::Error, Debug)]
pub(crate) enum ResolveError {
    #[error("no {0} specified")]
    Malformed(String),
    #[error("matchLabels cannot be empty for selector")]
    EmptySelector,
    #[error("{kind} '{name}' not found in namespace '{namespace}'")]
    NotFound {
        kind: String,
        name: String,
        namespace: String,
    },
    #[error("no {kind} found matching selector {selector} in namespace {namespace}")]
    NoMatch {
        kind: String,
        selector: LabelSelector,
        namespace: String,
    },
    #[error("expected exactly one {kind} to match selector {selector}, but found {count}")]
    Ambiguous {
        kind: String,
        selector: LabelSelector,
        count: usize,
    },
    #[error("{kind} dependency '{name}' is not ready: external ID is not yet set")]
    NoExternalId { kind: String, name: String },
    #[error("{kind} dependency '{name}' is not ready: 'Ready' condition is not true")]
    NotReady { kind: String, name: String },
    #[error("ProviderConfig '{name}' not found in namespace '{namespace}'")]
    ProviderConfigNotFound { name: String, namespace: String },
    #[error("referenced ProviderConfig '{name}' is not ready{}", .message.as_ref().map(|m| format!(": {}", m)).unwrap_or_default())]
    ProviderConfigNotReady {
        name: String,
        message: Option<String>,
    },
    #[error("failed to look up {kind}: {source}")]
    Store {
        kind: String,
        #[source]
        source: StoreError,
    },
}

/// Resolves [`Dependency`] references of objects in one namespace to external IDs.
pub(crate) struct Resolver<'a> {
    store: &'a dyn ObjectStore,
    namespace: &'a str,
}

impl<'a> Resolver<'a> {
    pub fn new(store: &'a dyn ObjectStore, namespace: &'a str) -> Self {
        Self { store, namespace }
    }

    /// External ID of the `K` object `dependency` refers to.
    ///
    /// Explicit IDs are returned as is, referenced and selected objects must
    /// have an external ID and a true `Ready` condition.
    pub async fn resolve<K>(&self, dependency: &Dependency) -> Result<String, ResolveError>
    where
        K: Managed + DeserializeOwned,
    {
        let kind = K::kind(&()).to_string();
        let lookup_error = |source| ResolveError::Store {
            kind: kind.clone(),
            source,
        };
        let object: K = match dependency {
            Dependency::Id(id) if !id.is_empty() => return Ok(id.clone()),
            Dependency::Id(_) => return Err(ResolveError::Malformed(kind)),
            Dependency::Ref(r) => store::get::<K>(self.store, self.namespace, &r.name)
                .await
                .map_err(lookup_error)?
                .ok_or_else(|| ResolveError::NotFound {
                    kind: kind.clone(),
                    name: r.name.clone(),
                    namespace: self.namespace.to_string(),
                })?,
            Dependency::Selector(selector) => {
                if selector.match_labels.is_empty() {
                    return Err(ResolveError::EmptySelector);
                }
                let mut matches: Vec<K> =
                    store::list(self.store, self.namespace, &selector.match_labels)
                        .await
                        .map_err(lookup_error)?;
                match matches.len() {
                    1 => matches.remove(0),
                    0 => {
                        return Err(ResolveError::NoMatch {
                            kind,
                            selector: selector.clone(),
                            namespace: self.namespace.to_string(),
                        });
                    }
                    count => {
                        return Err(ResolveError::Ambiguous {
                            kind,
                            selector: selector.clone(),
                            count,
                        });
                    }
                }
            }
        };
        ready_external_id(&object)
    }

    /// The referenced ProviderConfig, which must have a true `Ready` condition.
    pub async fn provider_config(
        &self,
        reference: &ProviderConfigReference,
    ) -> Result<ProviderConfig, ResolveError> {
        let namespace = reference
            .namespace
            .as_deref()
            .filter(|ns| !ns.is_empty())
            .unwrap_or(self.namespace);
        let config: ProviderConfig = store::get(self.store, namespace, &reference.name)
            .await
            .map_err(|source| ResolveError::Store {
                kind: "ProviderConfig".to_string(),
                source,
            })?
            .ok_or_else(|| ResolveError::ProviderConfigNotFound {
                name: reference.name.clone(),
                namespace: namespace.to_string(),
            })?;
        let ready = config.conditions().and_then(|c| c.get(READY));
        match ready {
            Some(c) if c.is_true() => Ok(config),
            Some(c) => Err(ResolveError::ProviderConfigNotReady {
                name: config.name_any(),
                message: Some(c.message.clone()),
            }),
            None => Err(ResolveError::ProviderConfigNotReady {
                name: config.name_any(),
                message: None,
            }),
        }
    }
}

fn ready_external_id<K: Managed>(object: &K) -> Result<String, ResolveError> {
    let kind = K::kind(&()).to_string();
    if object.external_id().is_empty() {
        return Err(ResolveError::NoExternalId {
            kind,
            name: object.name_any(),
        });
    }
    if !object.conditions().map(|c| c.is_true(READY)).unwrap_or(false) {
        return Err(ResolveError::NotReady {
            kind,
            name: object.name_any(),
        });
    }
    Ok(object.external_id().to_string())
}
