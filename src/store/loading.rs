//! Per-id loading: read-miss handling and the load state machine.

use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt};
use tracing::{debug, warn};

use super::{EntityStore, SharedResult, detach};
use crate::entity::Entity;
use crate::error::CacheError;

/// Loading state of one entity, as seen by consumers.
///
/// `Uninitialized -> Loading -> Ready | Error`; a read after `Error` moves
/// back to `Loading`.
#[derive(Debug, Clone)]
pub enum LoadState {
    Uninitialized,
    Loading,
    Ready,
    /// The last load failed. Nothing was cached.
    Error(CacheError),
}

impl LoadState {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }
}

pub(super) enum LoadSlot<E> {
    Loading(SharedResult<E>),
    Failed(CacheError),
}

impl<E: Entity> EntityStore<E> {
    /// Get entity `id`, fetching it from the gateway on a cache miss.
    ///
    /// Concurrent loads of the same id share one gateway read, which runs to
    /// completion even if every caller stops waiting. On success
    /// the value is cached and subscribers notified; on failure nothing is
    /// cached and the error is returned to every waiter.
    pub fn load(&self, id: &str) -> BoxFuture<'static, Result<Arc<E>, CacheError>> {
        if let Some(value) = self.inner.cache.get(id) {
            debug!("Cache hit for {}", id);
            return future::ready(Ok(value)).boxed();
        }

        let mut loads = self.inner.loads.lock();
        if let Some(LoadSlot::Loading(shared)) = loads.get(id) {
            debug!("Joining in-flight load of {}", id);
            return shared.clone().boxed();
        }

        debug!("Cache miss for {}, loading", id);
        self.inner.cache.reserve(id);

        // Spawned while the map is locked, so the fetch cannot settle its
        // slot before the slot exists.
        let store = self.clone();
        let key = id.to_string();
        let shared = detach(async move { store.fetch_into_cache(key).await }.boxed()).shared();
        loads.insert(id.to_string(), LoadSlot::Loading(shared.clone()));
        drop(loads);

        shared.boxed()
    }

    /// Snapshot of `id`; on a miss, start a background load and return
    /// `None`. Subscribers are notified when the value arrives.
    pub fn snapshot_or_load(&self, id: &str) -> Option<Arc<E>> {
        if let Some(value) = self.get_snapshot(id) {
            return Some(value);
        }

        if tokio::runtime::Handle::try_current().is_err() {
            warn!("No async runtime available to load {}", id);
            return None;
        }

        // The load runs on its own task; failures land in the load state.
        let _ = self.load(id);
        None
    }

    /// Current loading state of `id`.
    pub fn load_state(&self, id: &str) -> LoadState {
        if self.inner.cache.get(id).is_some() {
            return LoadState::Ready;
        }

        match self.inner.loads.lock().get(id) {
            Some(LoadSlot::Loading(_)) => LoadState::Loading,
            Some(LoadSlot::Failed(err)) => LoadState::Error(err.clone()),
            None => LoadState::Uninitialized,
        }
    }

    async fn fetch_into_cache(self, id: String) -> Result<Arc<E>, CacheError> {
        let result = match self.inner.gateway.fetch_entity(&id).await {
            Ok(Some(entity)) => Ok(self.inner.cache.confirm(&id, entity)),
            Ok(None) => Err(CacheError::EntityNotFound(id.clone())),
            Err(err) => Err(CacheError::from(err)),
        };

        let mut loads = self.inner.loads.lock();
        match &result {
            Ok(_) => {
                loads.remove(&id);
            }
            Err(err) => {
                warn!("Failed to load {}: {}", id, err);
                loads.insert(id, LoadSlot::Failed(err.clone()));
            }
        }

        result
    }
}
