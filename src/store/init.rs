//! Default entity initialization.

use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt};
use tracing::{debug, info, warn};

use super::{EntityStore, detach};
use crate::entity::Entity;
use crate::error::CacheError;

impl<E: Entity> EntityStore<E> {
    /// Populate the default slot from the gateway, once.
    ///
    /// Resolves immediately when the slot is already populated. Callers
    /// arriving while a fetch is in flight await that same fetch, so the
    /// gateway is read once and default subscribers are notified once. On
    /// failure the slot stays empty, every waiter receives the same error,
    /// and a later call retries.
    pub fn initialize(&self) -> BoxFuture<'static, Result<Arc<E>, CacheError>> {
        if let Ok(value) = self.inner.cache.get_default() {
            return future::ready(Ok(value)).boxed();
        }

        let mut init = self.inner.init.lock();
        if let Some(shared) = init.as_ref() {
            debug!("Joining in-flight default initialization");
            return shared.clone().boxed();
        }

        let store = self.clone();
        let shared = detach(async move { store.fetch_default().await }.boxed()).shared();
        *init = Some(shared.clone());
        drop(init);

        shared.boxed()
    }

    /// Check if the default slot is populated.
    pub fn is_initialized(&self) -> bool {
        self.inner.cache.has_default()
    }

    async fn fetch_default(self) -> Result<Arc<E>, CacheError> {
        let result = match self.inner.gateway.fetch_default_entity().await {
            Ok(entity) => {
                let value = Arc::new(entity);
                self.inner.cache.set_default(Arc::clone(&value));
                info!("Default entity initialized: {}", value.id());
                Ok(value)
            }
            Err(err) => {
                warn!("Default entity initialization failed: {}", err);
                Err(CacheError::from(err))
            }
        };

        self.inner.init.lock().take();
        result
    }
}
