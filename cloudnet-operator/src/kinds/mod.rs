//! [`ManagedKind`](crate::reconciler::ManagedKind) implementations of the
//! managed resource kinds, and the ProviderConfig reconciler.

mod nat_gateway;
mod network;
pub(crate) mod provider_config;
mod public_ip;
mod security_group;
mod security_group_rule;
mod snat_rule;
mod subnet;

/// The desired value if it differs from the last applied one.
fn changed<T: Clone + PartialEq>(desired: &T, applied: &T) -> Option<T> {
    (desired != applied).then(|| desired.clone())
}
