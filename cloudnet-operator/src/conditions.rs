use cloudnet_operator_apis::{Condition, ConditionSet, DEPENDENCIES_READY, READY, SYNCED};

/// Condition reasons.
pub(crate) mod reason {
    pub const CREATING: &str = "Creating";
    pub const PROVISIONING: &str = "Provisioning";
    pub const PROVISIONED: &str = "Provisioned";
    pub const SYNCED: &str = "Synced";
    pub const READY: &str = "Ready";
    pub const STOPPED: &str = "Stopped";
    pub const RECONCILING: &str = "Reconciling";
    pub const DELETING: &str = "Deleting";
    pub const DELETED: &str = "Deleted";
    pub const DELETION_BLOCKED: &str = "DeletionBlocked";
    pub const ORPHANED: &str = "Orphaned";
    pub const UNKNOWN: &str = "Unknown";
    pub const FAILED: &str = "Failed";
    pub const VALIDATION_SUCCESSFUL: &str = "ValidationSuccessful";
    pub const VALIDATION_FAILED: &str = "ValidationFailed";
    pub const DEPENDENCIES_RESOLVED: &str = "DependenciesResolved";
    pub const DEPENDENCIES_NOT_RESOLVED: &str = "DependenciesNotResolved";
    pub const PROVIDER_CONFIG_READY: &str = "ProviderConfigReady";
    pub const PROVIDER_CONFIG_NOT_READY: &str = "ProviderConfigNotReady";
    pub const PROVIDER_CONFIG_ERROR: &str = "ProviderConfigError";
    pub const PROVIDER_INITIALIZATION_FAILED: &str = "ProviderInitializationFailed";
    pub const PROVIDER_ERROR: &str = "ProviderError";
    pub const PROVISIONING_FAILED: &str = "ProvisioningFailed";
    pub const UPDATE_FAILED: &str = "UpdateFailed";
    pub const DELETION_FAILED: &str = "DeletionFailed";
    pub const NOT_FOUND: &str = "NotFound";
}

/// Call-site overrides of a transition's default reason and message.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct Overrides {
    reason: Option<String>,
    message: Option<String>,
}

impl Overrides {
    pub fn reason(reason: &str) -> Self {
        Self::default().with_reason(reason)
    }

    pub fn message<S: Into<String>>(message: S) -> Self {
        Self::default().with_message(message)
    }

    pub fn with_reason(mut self, reason: &str) -> Self {
        self.reason = Some(reason.to_string());
        self
    }

    pub fn with_message<S: Into<String>>(mut self, message: S) -> Self {
        self.message = Some(message.into());
        self
    }

    fn resolve(&self, reason: &str, message: &str) -> (String, String) {
        (
            self.reason.clone().unwrap_or_else(|| reason.to_string()),
            self.message.clone().unwrap_or_else(|| message.to_string()),
        )
    }
}

/// Lifecycle events of a managed resource.
///
/// Each event is an upsert of one or two of the `Synced`, `Ready` and
/// `DependenciesReady` conditions.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Transition {
    Synced(Overrides),
    NotSynced(Overrides),
    Ready(Overrides),
    NotReady(Overrides),
    /// NotSynced and NotReady sharing the same overrides.
    ReconciliationFailed(Overrides),
    SyncedAndReady,
    Creating,
    Provisioning(Overrides),
    Provisioned,
    Updating,
    Stopped(Overrides),
    DependenciesReady,
    DependenciesNotReady(String),
    ProviderConfigReady,
    ProviderConfigNotReady(String),
    ValidationSuccessful,
    ValidationFailed(Overrides),
    Terminating,
    DeletionBlocked(Overrides),
    Deleted,
    Orphaned(Overrides),
}

struct Stamp(Option<i64>);

impl Stamp {
    fn set(
        &self,
        set: ConditionSet,
        tpe: &str,
        status: bool,
        (reason, message): (String, String),
    ) -> ConditionSet {
        set.with(Condition::new(tpe, Some(status), &reason, message).with_observed_generation(self.0))
    }

    fn synced(&self, set: ConditionSet, o: &Overrides) -> ConditionSet {
        self.set(
            set,
            SYNCED,
            true,
            o.resolve(reason::SYNCED, "External resource matches desired state"),
        )
    }

    fn not_synced(&self, set: ConditionSet, o: &Overrides) -> ConditionSet {
        self.set(
            set,
            SYNCED,
            false,
            o.resolve(reason::RECONCILING, "Resource is being reconciled"),
        )
    }

    fn ready(&self, set: ConditionSet, o: &Overrides) -> ConditionSet {
        self.set(set, READY, true, o.resolve(reason::READY, "Resource is ready"))
    }

    fn not_ready(&self, set: ConditionSet, o: &Overrides) -> ConditionSet {
        self.set(
            set,
            READY,
            false,
            o.resolve(reason::FAILED, "Resource is not ready"),
        )
    }

    /// NotSynced and NotReady with the same reason and message.
    fn both_false(&self, set: ConditionSet, reason: String, message: String) -> ConditionSet {
        let o = Overrides {
            reason: Some(reason),
            message: Some(message),
        };
        let set = self.not_synced(set, &o);
        self.not_ready(set, &o)
    }

    fn dependencies(&self, set: ConditionSet, status: bool, reason: &str, message: String) -> ConditionSet {
        self.set(set, DEPENDENCIES_READY, status, (reason.to_string(), message))
    }
}

impl Transition {
    /// Apply this transition to `conditions`, stamping each touched condition with `generation`.
    pub fn apply(self, conditions: ConditionSet, generation: Option<i64>) -> ConditionSet {
        let s = Stamp(generation);
        let set = conditions;
        match self {
            Transition::Synced(o) => s.synced(set, &o),
            Transition::NotSynced(o) => s.not_synced(set, &o),
            Transition::Ready(o) => s.ready(set, &o),
            Transition::NotReady(o) => s.not_ready(set, &o),
            Transition::ReconciliationFailed(o) => {
                let set = s.not_synced(set, &o);
                s.not_ready(set, &o)
            }
            Transition::SyncedAndReady => {
                let set = s.synced(set, &Overrides::default());
                s.ready(set, &Overrides::default())
            }
            Transition::Creating => {
                let set = s.not_synced(
                    set,
                    &Overrides::reason(reason::CREATING).with_message("Creating external resource"),
                );
                s.not_ready(
                    set,
                    &Overrides::reason(reason::CREATING)
                        .with_message("Resource is being created and is not yet available"),
                )
            }
            Transition::Provisioning(o) => {
                let (r, m) = o.resolve(reason::PROVISIONING, "Resource is provisioning");
                s.both_false(set, r, m)
            }
            Transition::Provisioned => {
                let set = s.synced(
                    set,
                    &Overrides::reason(reason::PROVISIONED)
                        .with_message("External resource has been successfully provisioned"),
                );
                s.ready(
                    set,
                    &Overrides::reason(reason::PROVISIONED).with_message("Resource is ready for use"),
                )
            }
            Transition::Updating => {
                let set = s.not_synced(
                    set,
                    &Overrides::reason(reason::RECONCILING)
                        .with_message("Updating external resource to match desired state"),
                );
                s.not_ready(
                    set,
                    &Overrides::reason(reason::RECONCILING).with_message("Resource is being updated"),
                )
            }
            Transition::Stopped(o) => {
                let (r, m) = o.resolve(reason::STOPPED, "Resource is stopped");
                s.both_false(set, r, m)
            }
            Transition::DependenciesReady => s.dependencies(
                set,
                true,
                reason::DEPENDENCIES_RESOLVED,
                "All dependencies are ready".to_string(),
            ),
            Transition::DependenciesNotReady(message) => {
                s.dependencies(set, false, reason::DEPENDENCIES_NOT_RESOLVED, message)
            }
            Transition::ProviderConfigReady => s.dependencies(
                set,
                true,
                reason::PROVIDER_CONFIG_READY,
                "ProviderConfig is ready and available".to_string(),
            ),
            Transition::ProviderConfigNotReady(message) => {
                s.dependencies(set, false, reason::PROVIDER_CONFIG_NOT_READY, message)
            }
            Transition::ValidationSuccessful => s.ready(
                set,
                &Overrides::reason(reason::VALIDATION_SUCCESSFUL)
                    .with_message("Provider credentials and permissions are valid"),
            ),
            Transition::ValidationFailed(o) => {
                let o = Overrides {
                    reason: o.reason.or_else(|| Some(reason::VALIDATION_FAILED.to_string())),
                    message: o.message,
                };
                s.not_ready(set, &o)
            }
            Transition::Terminating => {
                let set = s.not_synced(
                    set,
                    &Overrides::reason(reason::DELETING).with_message("Resource deletion is in progress"),
                );
                s.not_ready(
                    set,
                    &Overrides::reason(reason::DELETING).with_message("Resource is being deleted"),
                )
            }
            Transition::DeletionBlocked(o) => {
                let (r, m) = o.resolve(
                    reason::DELETION_BLOCKED,
                    "Resource deletion is blocked by dependencies",
                );
                s.both_false(set, r, m)
            }
            Transition::Deleted => {
                let set = s.synced(
                    set,
                    &Overrides::reason(reason::DELETED)
                        .with_message("External resource has been successfully deleted"),
                );
                s.not_ready(
                    set,
                    &Overrides::reason(reason::DELETED).with_message("Resource is terminated"),
                )
            }
            Transition::Orphaned(o) => {
                let (r, m) = o.resolve(
                    reason::ORPHANED,
                    "External resource was preserved due to orphanOnDelete policy",
                );
                let set = s.synced(set, &Overrides::reason(&r).with_message(m));
                s.not_ready(
                    set,
                    &Overrides::reason(&r)
                        .with_message("Resource orphaned, no longer managed by operator"),
                )
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overrides() -> Vec<Overrides> {
        vec![
            Overrides::default(),
            Overrides::reason("Custom"),
            Overrides::message("custom message"),
            Overrides::reason(reason::FAILED).with_message("x"),
            Overrides::reason(reason::READY).with_message(""),
        ]
    }

    fn status(set: &ConditionSet, tpe: &str) -> (String, String, String) {
        let c = set.get(tpe).unwrap();
        (c.status.clone(), c.reason.clone(), c.message.clone())
    }

    #[test]
    fn provisioned_is_always_synced_and_ready() {
        for o in overrides() {
            let set = Transition::DeletionBlocked(o).apply(Default::default(), Some(1));
            let set = Transition::Provisioned.apply(set, Some(2));
            assert!(set.is_true(SYNCED));
            assert!(set.is_true(READY));
            assert_eq!(Some(2), set.get(READY).unwrap().observed_generation);
        }
    }

    #[test]
    fn deletion_blocked_is_never_synced_or_ready() {
        for o in overrides() {
            let set = Transition::SyncedAndReady.apply(Default::default(), Some(1));
            let set = Transition::DeletionBlocked(o.clone()).apply(set, Some(1));
            assert!(!set.is_true(SYNCED));
            assert!(!set.is_true(READY));
            assert_eq!("False", set.get(SYNCED).unwrap().status);
            assert_eq!("False", set.get(READY).unwrap().status);
        }
    }

    #[test]
    fn defaults_and_overrides() {
        let set = Transition::DeletionBlocked(Overrides::message("Still referenced by a, b"))
            .apply(Default::default(), None);
        assert_eq!(
            (
                "False".to_string(),
                reason::DELETION_BLOCKED.to_string(),
                "Still referenced by a, b".to_string()
            ),
            status(&set, READY)
        );

        let set = Transition::ReconciliationFailed(Overrides::reason(reason::PROVIDER_ERROR))
            .apply(Default::default(), None);
        assert_eq!(
            (
                "False".to_string(),
                reason::PROVIDER_ERROR.to_string(),
                "Resource is being reconciled".to_string()
            ),
            status(&set, SYNCED)
        );
        assert_eq!(
            (
                "False".to_string(),
                reason::PROVIDER_ERROR.to_string(),
                "Resource is not ready".to_string()
            ),
            status(&set, READY)
        );
    }

    #[test]
    fn terminal_states() {
        let set = Transition::Deleted.apply(Default::default(), None);
        assert!(set.is_true(SYNCED));
        assert!(!set.is_true(READY));

        let set = Transition::Orphaned(Overrides::message("kept")).apply(Default::default(), None);
        assert!(set.is_true(SYNCED));
        assert!(!set.is_true(READY));
        assert_eq!("kept", set.get(SYNCED).unwrap().message);
        assert_eq!(
            "Resource orphaned, no longer managed by operator",
            set.get(READY).unwrap().message
        );
    }

    #[test]
    fn dependency_conditions_are_separate() {
        let set = Transition::SyncedAndReady.apply(Default::default(), None);
        let set = Transition::DependenciesNotReady("waiting".into()).apply(set, None);
        assert!(set.is_true(READY));
        assert!(!set.is_true(DEPENDENCIES_READY));
        assert_eq!(
            reason::DEPENDENCIES_NOT_RESOLVED,
            set.get(DEPENDENCIES_READY).unwrap().reason
        );
        let set = Transition::ProviderConfigReady.apply(set, None);
        assert!(set.is_true(DEPENDENCIES_READY));
        assert_eq!(3, set.len());
    }

    #[test]
    fn validation_failed_defaults_reason() {
        let set = Transition::ValidationFailed(Overrides::message("bad credentials"))
            .apply(Default::default(), None);
        assert_eq!(
            (
                "False".to_string(),
                reason::VALIDATION_FAILED.to_string(),
                "bad credentials".to_string()
            ),
            status(&set, READY)
        );
        assert!(set.get(SYNCED).is_none());
    }
}
