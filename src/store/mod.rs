//! Entity store - the consumer-facing access layer.
//!
//! Combines the entity cache, the subscription registry and a persistence
//! gateway:
//! - synchronous snapshots and change subscriptions
//! - optimistic updates reconciled or rolled back against the gateway
//! - idempotent default-entity initialization
//! - per-id loading with a small state machine
//!
//! The store is explicitly constructed and cheap to clone; clones share one
//! cache. No lock is held across a gateway call or while callbacks run.
//! Gateway work runs on spawned tasks, so a caller that stops waiting never
//! leaves the cache half-updated.

mod init;
mod loading;
mod pending;
mod update;

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::cache::{CacheConfig, EntityCache, Subscription};
use crate::database::Gateway;
use crate::entity::Entity;
use crate::error::{CacheError, GatewayError};

use loading::LoadSlot;
use pending::PendingWrites;

pub use loading::LoadState;
pub use pending::PendingWrite;

/// Gateway result shared by every caller awaiting the same operation.
type SharedResult<E> = Shared<BoxFuture<'static, Result<Arc<E>, CacheError>>>;

/// Run `task` as its own tokio task so it finishes even when the caller
/// drops the returned future. Outside a runtime the task runs inline.
fn detach<T>(
    task: BoxFuture<'static, Result<T, CacheError>>,
) -> BoxFuture<'static, Result<T, CacheError>>
where
    T: Send + 'static,
{
    let handle = match tokio::runtime::Handle::try_current() {
        Ok(handle) => handle,
        Err(_) => {
            warn!("No async runtime available, running store task inline");
            return task;
        }
    };

    let join = handle.spawn(task);
    async move {
        match join.await {
            Ok(result) => result,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(err) => Err(GatewayError::Backend(anyhow::Error::new(err)).into()),
        }
    }
    .boxed()
}

struct StoreInner<E: Entity> {
    gateway: Arc<dyn Gateway<E>>,
    cache: EntityCache<E>,
    pending: Mutex<PendingWrites<E>>,
    loads: Mutex<HashMap<String, LoadSlot<E>>>,
    init: Mutex<Option<SharedResult<E>>>,
}

/// Reactive entity store over a persistence gateway.
pub struct EntityStore<E: Entity> {
    inner: Arc<StoreInner<E>>,
}

impl<E: Entity> Clone for EntityStore<E> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<E: Entity> EntityStore<E> {
    /// Create a store reading and writing through `gateway`.
    pub fn new(gateway: Arc<dyn Gateway<E>>, config: CacheConfig) -> Self {
        let name = std::any::type_name::<E>()
            .rsplit("::")
            .next()
            .unwrap_or("entities");
        info!("Entity store for {} initialized ({:?})", name, config);

        Self {
            inner: Arc::new(StoreInner {
                gateway,
                cache: EntityCache::new(name, config),
                pending: Mutex::new(PendingWrites::default()),
                loads: Mutex::new(HashMap::new()),
                init: Mutex::new(None),
            }),
        }
    }

    /// Underlying cache.
    pub fn cache(&self) -> &EntityCache<E> {
        &self.inner.cache
    }

    /// Current cached value for `id`, without touching the gateway.
    pub fn get_snapshot(&self, id: &str) -> Option<Arc<E>> {
        self.inner.cache.get(id)
    }

    /// Watch entity `id`. The callback runs whenever its cached value changes.
    pub fn subscribe<F>(&self, id: &str, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.cache.registry().subscribe(id, callback)
    }

    /// Current default entity.
    ///
    /// Returns `UninitializedDefault` until `initialize` has succeeded.
    pub fn get_default_snapshot(&self) -> Result<Arc<E>, CacheError> {
        self.inner.cache.get_default()
    }

    /// Watch the default entity.
    pub fn subscribe_default<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.inner.cache.registry().subscribe_default(callback)
    }

    /// Fetch every entity and fold it into the cache, in gateway order.
    pub async fn list(&self) -> Result<Vec<Arc<E>>, CacheError> {
        let entities = self.inner.gateway.list_entities().await?;
        let mut values = Vec::with_capacity(entities.len());

        for entity in entities {
            let id = entity.id().to_string();
            // Writes in flight own the cached value until they resolve.
            let value = match self.inner.cache.get(&id) {
                Some(current) if self.pending_writes(&id) > 0 => current,
                _ => self.inner.cache.confirm(&id, entity),
            };
            values.push(value);
        }

        debug!("Listed {} entities", values.len());
        Ok(values)
    }

    /// Like `list`, stably sorted by `key`.
    pub async fn list_sorted_by<K, F>(&self, key: F) -> Result<Vec<Arc<E>>, CacheError>
    where
        K: Ord,
        F: Fn(&E) -> K,
    {
        let mut values = self.list().await?;
        values.sort_by_key(|value| key(value.as_ref()));
        Ok(values)
    }

    /// Drop the cached value for `id` so the next read reloads it.
    ///
    /// Entries with writes in flight are kept. Returns `true` if removed.
    pub fn invalidate(&self, id: &str) -> bool {
        let removed = self.inner.cache.invalidate(id);
        if removed {
            self.inner.loads.lock().remove(id);
        }
        removed
    }

    /// Number of optimistic writes in flight for `id`.
    pub fn pending_writes(&self, id: &str) -> usize {
        self.inner.pending.lock().count_for(id)
    }

    /// Drop all subscriptions, cached values, the default slot and load
    /// state. Gateway calls already in flight still run to completion and
    /// apply their result.
    pub fn teardown(&self) {
        self.inner.cache.registry().clear();
        self.inner.cache.clear();
        self.inner.pending.lock().clear();
        let loads = std::mem::take(&mut *self.inner.loads.lock());
        let init = self.inner.init.lock().take();
        drop((loads, init));
        info!("Entity store '{}' torn down", self.inner.cache.name());
    }
}

impl<E: Entity> std::fmt::Debug for EntityStore<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityStore")
            .field("cache", &self.inner.cache)
            .field("pending_writes", &self.inner.pending.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests;
