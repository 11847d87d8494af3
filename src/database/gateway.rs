//! Persistence gateway - the async boundary to durable storage.

use async_trait::async_trait;

use crate::entity::Entity;
use crate::error::GatewayError;

/// Async read/write access to the durable store.
///
/// The gateway gives no ordering guarantee across concurrent calls; the
/// store layer is responsible for whatever per-id ordering it needs.
#[async_trait]
pub trait Gateway<E: Entity>: Send + Sync {
    /// Fetch one entity, `None` if the store has no such id.
    async fn fetch_entity(&self, id: &str) -> Result<Option<E>, GatewayError>;

    /// Fetch the default entity. Fails with `NoDefault` if none is configured.
    async fn fetch_default_entity(&self) -> Result<E, GatewayError>;

    /// Apply `patch` to entity `id` and return the authoritative result.
    async fn write_entity(&self, id: &str, patch: &E::Patch) -> Result<E, GatewayError>;

    /// Fetch every entity, in the store's natural order.
    async fn list_entities(&self) -> Result<Vec<E>, GatewayError>;
}
