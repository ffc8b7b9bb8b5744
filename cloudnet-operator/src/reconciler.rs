//! The lifecycle state machine shared by all managed resource kinds.

use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;
use cloudnet_operator_apis::Managed;
use k8s_openapi::chrono::Utc;
use kube::ResourceExt;
use kube_runtime::controller::Action;
use serde::{de::DeserializeOwned, Serialize};

use crate::{
    config::Timings,
    conditions::{reason, Overrides, Transition},
    errors::{ControllerError, StoreError},
    modifications::Modifications,
    provider::{Provider, ProviderError, ResourceInfo, State},
    provider_cache::{CacheError, ProviderCache},
    reference_guard::{blocked_message, referencing_objects, ReferenceCheck},
    resolver::{ResolveError, Resolver},
    store::ObjectStore,
};

/// Shared state of all reconcilers.
pub(crate) struct Context {
    pub store: Arc<dyn ObjectStore>,
    pub providers: Arc<ProviderCache>,
    pub timings: Timings,
}

/// The per kind part of the reconciliation: how to resolve dependencies, and
/// how to create, read, update and delete the external resource.
#[async_trait]
pub(crate) trait ManagedKind:
    Managed + Clone + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const FINALIZER: &'static str;

    type Info: ResourceInfo + Send + Sync;
    type Update: Debug + Send + Sync;

    /// Resolve every dependency, failing on the first unresolved one.
    async fn resolve(&self, resolver: &Resolver<'_>) -> Result<Self::Resolved, ResolveError>;

    async fn create_external(
        &self,
        provider: &dyn Provider,
        resolved: &Self::Resolved,
    ) -> Result<String, ProviderError>;

    async fn get_external(
        &self,
        provider: &dyn Provider,
        id: &str,
    ) -> Result<Option<Self::Info>, ProviderError>;

    /// The update turning `baseline` into the desired spec, `None` without drift.
    fn detect_drift(&self, baseline: &Self::Spec) -> Option<Self::Update>;

    async fn update_external(
        &self,
        provider: &dyn Provider,
        id: &str,
        live: &Self::Info,
        update: &Self::Update,
    ) -> Result<(), ProviderError>;

    async fn delete_external(&self, provider: &dyn Provider, id: &str) -> Result<(), ProviderError>;

    /// Checks for objects which must be gone before this one can be deleted.
    fn reference_checks() -> Vec<Box<dyn ReferenceCheck>> {
        Vec::new()
    }
}

/// Working state of a single reconcile invocation.
struct Reconciliation<'a, K: ManagedKind> {
    ctx: &'a Context,
    object: Modifications<K>,
    namespace: String,
    id: String,
    generation: Option<i64>,
}

impl<'a, K: ManagedKind> Reconciliation<'a, K> {
    fn new(object: K, ctx: &'a Context) -> Self {
        let namespace = object.namespace().unwrap_or_default();
        let id = object.id();
        let generation = object.meta().generation;
        Self {
            ctx,
            object: Modifications::new(object),
            namespace,
            id,
            generation,
        }
    }

    fn kind() -> String {
        K::kind(&()).to_string()
    }

    fn store(&self) -> &'a dyn ObjectStore {
        self.ctx.store.as_ref()
    }

    fn timings(&self) -> Timings {
        self.ctx.timings
    }

    fn transition(&mut self, transition: Transition) {
        let generation = self.generation;
        let status = self.object.managed_status_mut();
        let conditions = std::mem::take(&mut status.conditions);
        status.conditions = transition.apply(conditions, generation);
    }

    fn failed(&mut self, reason: &str, message: String) {
        self.transition(Transition::ReconciliationFailed(
            Overrides::reason(reason).with_message(message),
        ));
    }

    async fn apply(&mut self) -> Result<Action, ControllerError> {
        let store = self.store();
        let timings = self.timings();
        if self.object.add_finalizer(store, K::FINALIZER).await? {
            debug!("added finalizer {} to {} {}", K::FINALIZER, Self::kind(), self.id);
            return Ok(Action::requeue(timings.immediate));
        }
        self.object.managed_status_mut().observed_generation = self.generation;

        let provider_ref = self.object.provider_config_ref().clone();
        let checked = Resolver::new(store, &self.namespace)
            .provider_config(&provider_ref)
            .await;
        if let Err(e) = checked {
            warn!("dependency check of {} {} failed: {}", Self::kind(), self.id, e);
            self.transition(Transition::ProviderConfigNotReady(e.to_string()));
            return Ok(Action::requeue(timings.error));
        }
        self.transition(Transition::ProviderConfigReady);

        let provider = match self
            .ctx
            .providers
            .get_or_create(&provider_ref, &self.namespace)
            .await
        {
            Ok((provider, _)) => provider,
            Err(e) => {
                error!(
                    "failed to get provider client for {} {}: {}",
                    Self::kind(),
                    self.id,
                    e
                );
                self.failed(reason::PROVIDER_CONFIG_ERROR, e.to_string());
                return Ok(Action::requeue(timings.error));
            }
        };

        if self.object.external_id().is_empty() {
            self.create(provider.as_ref()).await
        } else {
            self.update(provider.as_ref()).await
        }
    }

    async fn create(&mut self, provider: &dyn Provider) -> Result<Action, ControllerError> {
        let timings = self.timings();
        let resolved = self
            .object
            .resolve(&Resolver::new(self.store(), &self.namespace))
            .await;
        let resolved = match resolved {
            Ok(resolved) => resolved,
            Err(e) => {
                debug!("dependencies of {} {} not ready: {}", Self::kind(), self.id, e);
                self.transition(Transition::DependenciesNotReady(e.to_string()));
                self.transition(Transition::NotReady(
                    Overrides::reason(reason::DEPENDENCIES_NOT_RESOLVED)
                        .with_message(format!("Waiting for dependencies: {}", e)),
                ));
                return Ok(Action::requeue(timings.dependency));
            }
        };
        self.transition(Transition::DependenciesReady);
        self.object.managed_status_mut().resolved_dependencies = Some(resolved.clone());

        info!("creating {} {}", Self::kind(), self.id);
        self.transition(Transition::Creating);
        match self.object.create_external(provider, &resolved).await {
            Ok(external_id) => {
                info!("created {} {} as {}", Self::kind(), self.id, external_id);
                let spec = self.object.desired_spec().clone();
                let status = self.object.managed_status_mut();
                status.external_id = external_id;
                status.last_applied_spec = Some(spec);
                Ok(Action::requeue(timings.create_poll))
            }
            Err(e) => {
                error!("failed to create {} {}: {}", Self::kind(), self.id, e);
                if let Some(external_id) = e.created_id() {
                    info!(
                        "{} {} was created as {} but is not ready",
                        Self::kind(),
                        self.id,
                        external_id
                    );
                    let spec = self.object.desired_spec().clone();
                    let status = self.object.managed_status_mut();
                    status.external_id = external_id.to_string();
                    status.last_applied_spec = Some(spec);
                }
                self.failed(
                    reason::PROVISIONING_FAILED,
                    format!("Failed to create resource: {}", e),
                );
                Ok(Action::requeue(timings.error))
            }
        }
    }

    async fn update(&mut self, provider: &dyn Provider) -> Result<Action, ControllerError> {
        let timings = self.timings();
        let baseline = self
            .object
            .managed_status()
            .and_then(|s| s.last_applied_spec.clone());
        let baseline = match baseline {
            Some(baseline) => baseline,
            None => {
                warn!(
                    "lastAppliedSpec of {} {} is not set, establishing baseline from current spec",
                    Self::kind(),
                    self.id
                );
                let spec = self.object.desired_spec().clone();
                self.object.managed_status_mut().last_applied_spec = Some(spec);
                return Ok(Action::requeue(timings.immediate));
            }
        };

        let external_id = self.object.external_id().to_string();
        let live = match self.object.get_external(provider, &external_id).await {
            Ok(Some(live)) => live,
            Ok(None) => {
                warn!(
                    "external resource {} of {} {} not found, resetting external ID to trigger creation",
                    external_id,
                    Self::kind(),
                    self.id
                );
                self.transition(Transition::NotSynced(
                    Overrides::reason(reason::NOT_FOUND).with_message(format!(
                        "External resource with ID {} was not found and will be recreated",
                        external_id
                    )),
                ));
                self.transition(Transition::NotReady(
                    Overrides::reason(reason::NOT_FOUND).with_message("Resource needs to be recreated"),
                ));
                let status = self.object.managed_status_mut();
                status.external_id.clear();
                status.last_applied_spec = None;
                return Ok(Action::requeue(timings.immediate));
            }
            Err(e) => {
                error!("failed to check existing {} {}: {}", Self::kind(), self.id, e);
                self.failed(
                    reason::PROVIDER_ERROR,
                    format!("Failed to check existing {}: {}", Self::kind(), e),
                );
                return Ok(Action::requeue(timings.error));
            }
        };

        if let Some(update) = self.object.detect_drift(&baseline) {
            info!("applying {:?} to {} {}", update, Self::kind(), self.id);
            self.transition(Transition::Updating);
            if let Err(e) = self
                .object
                .update_external(provider, &external_id, &live, &update)
                .await
            {
                error!("failed to update {} {}: {}", Self::kind(), self.id, e);
                self.failed(
                    reason::UPDATE_FAILED,
                    format!("Failed to update resource: {}", e),
                );
                return Ok(Action::requeue(timings.error));
            }
            let spec = self.object.desired_spec().clone();
            self.object.managed_status_mut().last_applied_spec = Some(spec);
            info!("updated {} {}", Self::kind(), self.id);
            return Ok(Action::requeue(timings.immediate));
        }

        Ok(self.check_readiness(&live))
    }

    fn check_readiness(&mut self, live: &K::Info) -> Action {
        let timings = self.timings();
        match live.state() {
            State::Ready => {
                let status = self.object.managed_status_mut();
                let first = status.last_sync_time.is_none();
                status.last_sync_time = Some(Utc::now().to_rfc3339());
                if first {
                    info!("{} {} is provisioned", Self::kind(), self.id);
                    self.transition(Transition::Provisioned);
                } else {
                    self.transition(Transition::SyncedAndReady);
                }
                Action::requeue(timings.resync)
            }
            State::Failed => {
                self.failed(reason::FAILED, live.message());
                Action::requeue(timings.error)
            }
            State::Provisioning => {
                self.transition(Transition::Provisioning(Overrides::message(live.message())));
                Action::requeue(timings.error)
            }
            State::Stopped => {
                self.transition(Transition::Stopped(Overrides::message(live.message())));
                Action::requeue(timings.error)
            }
            State::Unknown => {
                self.failed(reason::UNKNOWN, live.message());
                Action::requeue(timings.error)
            }
        }
    }

    async fn delete(&mut self) -> Result<Action, ControllerError> {
        let store = self.store();
        let timings = self.timings();
        if !self.object.has_finalizer(K::FINALIZER) {
            return Ok(Action::await_change());
        }
        let external_id = self.object.external_id().to_string();
        let orphan = self.object.orphan_on_delete();
        info!(
            "deleting {} {} (external ID '{}', orphanOnDelete {})",
            Self::kind(),
            self.id,
            external_id,
            orphan
        );
        self.transition(Transition::Terminating);
        if let Err(e) = self.object.patch_status(store).await {
            warn!("failed to update status of {} {}: {}", Self::kind(), self.id, e);
        }

        let provider_ref = self.object.provider_config_ref().clone();
        let provider = match self
            .ctx
            .providers
            .get_or_create(&provider_ref, &self.namespace)
            .await
        {
            Ok((provider, _)) => provider,
            Err(CacheError::NotFound(key)) => {
                warn!(
                    "ProviderConfig {} not found during deletion of {} {}, removing finalizer to orphan the external resource",
                    key,
                    Self::kind(),
                    self.id
                );
                self.transition(Transition::Orphaned(Overrides::message(
                    "Resource was orphaned because ProviderConfig was not found",
                )));
                self.object.remove_finalizer(store, K::FINALIZER).await?;
                return Ok(Action::await_change());
            }
            Err(e) => {
                error!(
                    "provider access failed during deletion of {} {}: {}",
                    Self::kind(),
                    self.id,
                    e
                );
                self.transition(Transition::NotSynced(
                    Overrides::reason(reason::DELETION_FAILED)
                        .with_message(format!("Cannot access provider: {}", e)),
                ));
                self.transition(Transition::NotReady(
                    Overrides::reason(reason::DELETION_FAILED)
                        .with_message("Deletion blocked by provider error"),
                ));
                return Ok(Action::requeue(timings.error));
            }
        };

        if !external_id.is_empty() {
            let checks = K::reference_checks();
            match referencing_objects(store, &self.namespace, &external_id, &checks).await {
                Ok(blockers) if !blockers.is_empty() => {
                    info!(
                        "deletion of {} {} blocked by {:?}",
                        Self::kind(),
                        self.id,
                        blockers
                    );
                    self.transition(Transition::DeletionBlocked(Overrides::message(
                        blocked_message(&blockers),
                    )));
                    return Ok(Action::requeue(timings.error));
                }
                Ok(_) => {}
                Err(e) => {
                    self.transition(Transition::ReconciliationFailed(Overrides::message(
                        e.to_string(),
                    )));
                    return Err(ControllerError::ReferenceCheck(e.to_string()));
                }
            }
        }

        if !orphan && !external_id.is_empty() {
            if let Err(e) = self
                .object
                .delete_external(provider.as_ref(), &external_id)
                .await
            {
                error!(
                    "failed to delete external resource {} of {} {}: {}",
                    external_id,
                    Self::kind(),
                    self.id,
                    e
                );
                self.transition(Transition::NotSynced(
                    Overrides::reason(reason::DELETION_FAILED).with_message(e.to_string()),
                ));
                self.transition(Transition::NotReady(
                    Overrides::reason(reason::DELETION_FAILED)
                        .with_message("External resource deletion failed"),
                ));
                return Err(e.into());
            }
            info!("deleted external resource {} of {} {}", external_id, Self::kind(), self.id);
            self.transition(Transition::Deleted);
        } else if orphan {
            info!(
                "skipping deletion of external resource {} of {} {} (orphanOnDelete)",
                external_id,
                Self::kind(),
                self.id
            );
            self.transition(Transition::Orphaned(Overrides::default()));
        }

        self.object.remove_finalizer(store, K::FINALIZER).await?;
        Ok(Action::await_change())
    }

    async fn persist(&mut self) -> Result<(), StoreError> {
        let store = self.store();
        self.object.patch_status(store).await
    }
}

/// Reconcile `object`, always persisting the resulting status.
pub(crate) async fn reconcile<K: ManagedKind>(
    object: Arc<K>,
    ctx: Arc<Context>,
) -> Result<Action, ControllerError> {
    let mut r = Reconciliation::new(object.as_ref().clone(), ctx.as_ref());
    let result = if r.object.is_deleted() {
        r.delete().await
    } else {
        r.apply().await
    };
    match (result, r.persist().await) {
        (Ok(action), Ok(())) => {
            debug!("reconciled {} {}: {:?}", Reconciliation::<K>::kind(), r.id, action);
            Ok(action)
        }
        (Ok(_), Err(e)) => Err(e.into()),
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(persist)) => {
            warn!(
                "failed to update status of {} {}: {}",
                Reconciliation::<K>::kind(),
                r.id,
                persist
            );
            Err(e)
        }
    }
}
