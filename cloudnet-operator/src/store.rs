use std::collections::BTreeMap;

use async_trait::async_trait;
use kube::{
    api::{ApiResource, DynamicObject, ListParams, Patch, PatchParams},
    Api, Client, Resource,
};
use serde::de::DeserializeOwned;

use crate::{errors::StoreError, MANAGER};

/// Namespaced access to the Kubernetes objects the controllers read and write.
#[async_trait]
pub(crate) trait ObjectStore: Send + Sync {
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, StoreError>;

    /// List all objects in `namespace` carrying all of `labels`.
    async fn list(
        &self,
        resource: &ApiResource,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>, StoreError>;

    /// Apply a JSON patch to the object (excluding its status).
    async fn patch(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        patch: &json_patch::Patch,
    ) -> Result<DynamicObject, StoreError>;

    /// Apply a JSON merge patch to the status subresource.
    async fn patch_status(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<DynamicObject, StoreError>;
}

/// [`ObjectStore`] backed by the Kubernetes API server.
pub(crate) struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api(&self, resource: &ApiResource, namespace: &str) -> Api<DynamicObject> {
        Api::namespaced_with(self.client.clone(), namespace, resource)
    }

    fn patch_params() -> PatchParams {
        let mut pp = PatchParams::default();
        pp.field_manager = Some(MANAGER.to_string());
        pp
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
    ) -> Result<Option<DynamicObject>, StoreError> {
        Ok(self.api(resource, namespace).get_opt(name).await?)
    }

    async fn list(
        &self,
        resource: &ApiResource,
        namespace: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<Vec<DynamicObject>, StoreError> {
        let mut lp = ListParams::default();
        if !labels.is_empty() {
            let selector: Vec<String> = labels.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
            lp = lp.labels(selector.join(",").as_str());
        }
        Ok(self.api(resource, namespace).list(&lp).await?.items)
    }

    async fn patch(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        patch: &json_patch::Patch,
    ) -> Result<DynamicObject, StoreError> {
        Ok(self
            .api(resource, namespace)
            .patch(name, &Self::patch_params(), &Patch::<()>::Json(patch.clone()))
            .await?)
    }

    async fn patch_status(
        &self,
        resource: &ApiResource,
        namespace: &str,
        name: &str,
        patch: &serde_json::Value,
    ) -> Result<DynamicObject, StoreError> {
        Ok(self
            .api(resource, namespace)
            .patch_status(name, &Self::patch_params(), &Patch::Merge(patch))
            .await?)
    }
}

pub(crate) fn api_resource<K: Resource<DynamicType = ()>>() -> ApiResource {
    ApiResource::erase::<K>(&())
}

pub(crate) fn from_dynamic<K: DeserializeOwned>(object: DynamicObject) -> Result<K, StoreError> {
    Ok(serde_json::from_value(serde_json::to_value(object)?)?)
}

/// Typed [`ObjectStore::get`].
pub(crate) async fn get<K>(
    store: &dyn ObjectStore,
    namespace: &str,
    name: &str,
) -> Result<Option<K>, StoreError>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    match store.get(&api_resource::<K>(), namespace, name).await? {
        Some(o) => Ok(Some(from_dynamic(o)?)),
        None => Ok(None),
    }
}

/// Typed [`ObjectStore::list`].
pub(crate) async fn list<K>(
    store: &dyn ObjectStore,
    namespace: &str,
    labels: &BTreeMap<String, String>,
) -> Result<Vec<K>, StoreError>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    store
        .list(&api_resource::<K>(), namespace, labels)
        .await?
        .into_iter()
        .map(from_dynamic)
        .collect()
}
