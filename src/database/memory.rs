//! In-process gateway backed by a concurrent map.
//!
//! Used by tests and by the CLI's `--memory` mode. Supports simulated
//! latency and per-id write rejection.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;

use super::Gateway;
use crate::entity::Entity;
use crate::error::GatewayError;

/// Call counters, for asserting how often the store hit the gateway.
#[derive(Debug, Default)]
pub struct GatewayStats {
    fetches: AtomicUsize,
    default_fetches: AtomicUsize,
    writes: AtomicUsize,
    lists: AtomicUsize,
}

impl GatewayStats {
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn default_fetches(&self) -> usize {
        self.default_fetches.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn lists(&self) -> usize {
        self.lists.load(Ordering::SeqCst)
    }
}

/// Gateway keeping entities in memory.
pub struct MemoryGateway<E: Entity> {
    entities: DashMap<String, E>,
    default_id: RwLock<Option<String>>,
    /// id -> rejection reason for writes
    rejections: DashMap<String, String>,
    latency: Option<Duration>,
    stats: GatewayStats,
}

impl<E: Entity> MemoryGateway<E> {
    /// Create an empty gateway.
    pub fn new() -> Self {
        Self {
            entities: DashMap::new(),
            default_id: RwLock::new(None),
            rejections: DashMap::new(),
            latency: None,
            stats: GatewayStats::default(),
        }
    }

    /// Create a gateway seeded with `entities`.
    pub fn with_entities(entities: impl IntoIterator<Item = E>) -> Self {
        let gateway = Self::new();
        for entity in entities {
            gateway.insert(entity);
        }
        gateway
    }

    /// Delay every call by `latency` (builder pattern).
    #[must_use]
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Insert or replace an entity directly in the store.
    pub fn insert(&self, entity: E) {
        self.entities.insert(entity.id().to_string(), entity);
    }

    /// Read the stored value, bypassing any cache.
    pub fn stored(&self, id: &str) -> Option<E> {
        self.entities.get(id).map(|entry| entry.value().clone())
    }

    /// Mark `id` as the default entity.
    pub fn set_default(&self, id: impl Into<String>) {
        *self.default_id.write() = Some(id.into());
    }

    /// Make every write to `id` fail with `reason`.
    pub fn reject_writes(&self, id: impl Into<String>, reason: impl Into<String>) {
        self.rejections.insert(id.into(), reason.into());
    }

    /// Let writes to `id` succeed again.
    pub fn accept_writes(&self, id: &str) {
        self.rejections.remove(id);
    }

    /// Get call counters.
    pub fn stats(&self) -> &GatewayStats {
        &self.stats
    }

    async fn pause(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

impl<E: Entity> Default for MemoryGateway<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E: Entity> Gateway<E> for MemoryGateway<E> {
    async fn fetch_entity(&self, id: &str) -> Result<Option<E>, GatewayError> {
        self.stats.fetches.fetch_add(1, Ordering::SeqCst);
        self.pause().await;
        Ok(self.stored(id))
    }

    async fn fetch_default_entity(&self) -> Result<E, GatewayError> {
        self.stats.default_fetches.fetch_add(1, Ordering::SeqCst);
        self.pause().await;

        let default_id = self.default_id.read().clone();
        default_id
            .and_then(|id| self.stored(&id))
            .ok_or(GatewayError::NoDefault)
    }

    async fn write_entity(&self, id: &str, patch: &E::Patch) -> Result<E, GatewayError> {
        self.stats.writes.fetch_add(1, Ordering::SeqCst);
        self.pause().await;

        if let Some(reason) = self.rejections.get(id) {
            return Err(GatewayError::Rejected(reason.value().clone()));
        }

        let mut entry = self
            .entities
            .get_mut(id)
            .ok_or_else(|| GatewayError::NotFound(id.to_string()))?;
        let next = entry.merge(patch);
        *entry = next.clone();

        debug!("Memory gateway wrote {}", id);
        Ok(next)
    }

    async fn list_entities(&self) -> Result<Vec<E>, GatewayError> {
        self.stats.lists.fetch_add(1, Ordering::SeqCst);
        self.pause().await;

        let mut entities: Vec<E> = self
            .entities
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        entities.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(entities)
    }
}
