//! Entity abstraction shared by the cache, the store and the gateways.

/// A record held in the cache.
///
/// Entities are addressed by a stable string id and updated through a
/// partial change (`Patch`) that can be merged over the current value.
/// `PartialEq` is used to decide whether an authoritative value from the
/// store actually differs from what is already cached.
pub trait Entity: Clone + PartialEq + Send + Sync + 'static {
    /// Partial change applied by `merge` and sent to the gateway on write.
    type Patch: Clone + Send + Sync + 'static;

    /// Stable unique id.
    fn id(&self) -> &str;

    /// Return a new value with `patch` applied over `self`.
    fn merge(&self, patch: &Self::Patch) -> Self;
}
