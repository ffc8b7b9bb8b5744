use std::ops::{Deref, DerefMut};

use json_patch::{diff, PatchOperation};
use kube::{Resource, ResourceExt};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Map, Value};

use crate::{
    errors::StoreError,
    store::{api_resource, from_dynamic, ObjectStore},
};

/// Helper construct to simplify patching objects against their pre-reconcile snapshot.
///
/// `original` is the last state known to be persisted, `modified` the working
/// copy the reconciler mutates.
pub(crate) struct Modifications<K> {
    original: K,
    modified: K,
}

impl<K> Deref for Modifications<K> {
    type Target = K;

    fn deref(&self) -> &Self::Target {
        &self.modified
    }
}

impl<K> DerefMut for Modifications<K> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.modified
    }
}

impl<K> Modifications<K>
where
    K: Resource<DynamicType = ()> + Clone + Serialize + DeserializeOwned,
{
    pub fn new(original: K) -> Self {
        let modified = original.clone();
        Self { original, modified }
    }

    pub fn is_deleted(&self) -> bool {
        self.modified.meta().deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.modified.finalizers().iter().any(|f| f == finalizer)
    }

    fn namespace_and_name(&self) -> (String, String) {
        (
            self.original.namespace().unwrap_or_default(),
            self.original.name_any(),
        )
    }

    /// Returns `true` if the finalizer was added.
    pub async fn add_finalizer(
        &mut self,
        store: &dyn ObjectStore,
        finalizer: &str,
    ) -> Result<bool, StoreError> {
        if self.has_finalizer(finalizer) {
            return Ok(false);
        }
        let mut target = self.original.clone();
        target.finalizers_mut().push(finalizer.to_string());
        self.patch_metadata(store, &target).await?;
        Ok(true)
    }

    /// Returns `true` if the finalizer was removed (or the object is already gone).
    pub async fn remove_finalizer(
        &mut self,
        store: &dyn ObjectStore,
        finalizer: &str,
    ) -> Result<bool, StoreError> {
        if !self.has_finalizer(finalizer) {
            return Ok(false);
        }
        let mut target = self.original.clone();
        target.finalizers_mut().retain(|f| f != finalizer);
        match self.patch_metadata(store, &target).await {
            Ok(()) => Ok(true),
            Err(StoreError::NotFound) => {
                self.modified.finalizers_mut().retain(|f| f != finalizer);
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    /// JSON patch from `original` to `target` (status excluded), guarded by the
    /// original's resourceVersion.
    fn guarded_patch(&self, target: &K) -> Result<json_patch::Patch, StoreError> {
        let mut from = serde_json::to_value(&self.original)?;
        let mut to = serde_json::to_value(target)?;
        for v in [&mut from, &mut to] {
            if let Value::Object(o) = v {
                o.remove("status");
            }
        }
        let mut patch = diff(&from, &to);
        if let Some(rv) = self.original.resource_version() {
            let test: PatchOperation = serde_json::from_value(json!({
                "op": "test",
                "path": "/metadata/resourceVersion",
                "value": rv,
            }))?;
            patch.0.insert(0, test);
        }
        Ok(patch)
    }

    async fn patch_metadata(&mut self, store: &dyn ObjectStore, target: &K) -> Result<(), StoreError> {
        let patch = self.guarded_patch(target)?;
        let (namespace, name) = self.namespace_and_name();
        let updated = store
            .patch(&api_resource::<K>(), &namespace, &name, &patch)
            .await?;
        let updated: K = from_dynamic(updated)?;
        *self.original.meta_mut() = updated.meta().clone();
        *self.modified.meta_mut() = updated.meta().clone();
        Ok(())
    }

    /// Persist status changes as a JSON merge patch against the original snapshot.
    ///
    /// A vanished object is not an error.
    pub async fn patch_status(&mut self, store: &dyn ObjectStore) -> Result<(), StoreError> {
        let before = status_of(&self.original)?;
        let after = status_of(&self.modified)?;
        let patch = match merge_diff(&before, &after) {
            Some(diff) => json!({ "status": diff }),
            None => return Ok(()),
        };
        let (namespace, name) = self.namespace_and_name();
        match store
            .patch_status(&api_resource::<K>(), &namespace, &name, &patch)
            .await
        {
            Ok(updated) => {
                let updated: K = from_dynamic(updated)?;
                self.modified.meta_mut().resource_version = updated.meta().resource_version.clone();
                self.original = self.modified.clone();
                Ok(())
            }
            Err(StoreError::NotFound) => {
                debug!(
                    "{} {}/{} vanished before its status could be written",
                    K::kind(&()),
                    namespace,
                    name
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn status_of<K: Serialize>(object: &K) -> Result<Value, StoreError> {
    Ok(serde_json::to_value(object)?
        .get("status")
        .cloned()
        .unwrap_or(Value::Null))
}

/// RFC 7386 merge patch turning `before` into `after`, `None` if they are equal.
pub(crate) fn merge_diff(before: &Value, after: &Value) -> Option<Value> {
    if before == after {
        return None;
    }
    match (before, after) {
        (Value::Object(b), Value::Object(a)) => {
            let mut patch = Map::new();
            for (k, v) in a {
                match b.get(k) {
                    Some(old) => {
                        if let Some(d) = merge_diff(old, v) {
                            patch.insert(k.clone(), d);
                        }
                    }
                    None => {
                        patch.insert(k.clone(), v.clone());
                    }
                }
            }
            for k in b.keys() {
                if !a.contains_key(k) {
                    patch.insert(k.clone(), Value::Null);
                }
            }
            Some(Value::Object(patch))
        }
        _ => Some(after.clone()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{network, MemoryStore};
    use cloudnet_operator_apis::{Managed, Network};

    #[test]
    fn merge_diff_nulls_removed_keys() {
        let before = json!({"externalID": "net-1", "lastAppliedSpec": {"cidr": "10.0.0.0/16"}, "conditions": []});
        let after = json!({"conditions": [{"type": "Ready"}], "lastSyncTime": "now"});
        assert_eq!(
            Some(json!({
                "externalID": null,
                "lastAppliedSpec": null,
                "conditions": [{"type": "Ready"}],
                "lastSyncTime": "now",
            })),
            merge_diff(&before, &after)
        );
        assert_eq!(None, merge_diff(&after, &after));
        assert_eq!(
            Some(json!({"a": {"b": 2}})),
            merge_diff(&json!({"a": {"b": 1, "c": 1}}), &json!({"a": {"b": 2, "c": 1}}))
        );
    }

    #[tokio::test]
    async fn finalizer_round_trip() {
        let store = MemoryStore::default();
        store.insert(&network("default", "main"));
        let current: Network = store.get_typed("default", "main").unwrap();
        let mut m = Modifications::new(current);
        assert!(m.add_finalizer(&store, "f").await.unwrap());
        assert!(!m.add_finalizer(&store, "f").await.unwrap());
        let persisted: Network = store.get_typed("default", "main").unwrap();
        assert_eq!(vec!["f".to_string()], persisted.finalizers().to_vec());

        assert!(m.remove_finalizer(&store, "f").await.unwrap());
        let persisted: Network = store.get_typed("default", "main").unwrap();
        assert!(persisted.finalizers().is_empty());
    }

    #[tokio::test]
    async fn stale_snapshot_conflicts() {
        let store = MemoryStore::default();
        store.insert(&network("default", "main"));
        let stale: Network = store.get_typed("default", "main").unwrap();
        let mut other = Modifications::new(stale.clone());
        other.add_finalizer(&store, "other").await.unwrap();

        let mut m = Modifications::new(stale);
        assert!(matches!(
            m.add_finalizer(&store, "f").await,
            Err(StoreError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn status_is_merged_not_replaced() {
        let store = MemoryStore::default();
        store.insert(&network("default", "main"));
        let current: Network = store.get_typed("default", "main").unwrap();
        let mut m = Modifications::new(current);
        m.managed_status_mut().external_id = "net-1".to_string();
        m.patch_status(&store).await.unwrap();

        // a concurrent writer touching a field we do not manage
        store.merge_status::<Network>("default", "main", json!({"lastSyncTime": "other"}));

        m.managed_status_mut().observed_generation = Some(7);
        m.patch_status(&store).await.unwrap();
        let persisted: Network = store.get_typed("default", "main").unwrap();
        let status = persisted.status.unwrap();
        assert_eq!("net-1", status.external_id);
        assert_eq!(Some(7), status.observed_generation);
        assert_eq!(Some("other".to_string()), status.last_sync_time);
    }

    #[tokio::test]
    async fn status_of_vanished_object_is_tolerated() {
        let store = MemoryStore::default();
        let mut m = Modifications::new(network("default", "gone"));
        m.managed_status_mut().external_id = "net-1".to_string();
        m.patch_status(&store).await.unwrap();
    }
}
