//! Optimistic updates.

use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use tracing::{debug, warn};

use super::{EntityStore, detach};
use super::pending::PendingWrite;
use crate::entity::Entity;
use crate::error::CacheError;

impl<E: Entity> EntityStore<E> {
    /// Apply `patch` to entity `id` optimistically, then persist it.
    ///
    /// When `id` is cached, the merged value is put into the cache and
    /// subscribers are notified before this function returns. The returned
    /// future sends the patch to the gateway and then either reconciles the
    /// cache with the authoritative value or rolls back to the last
    /// confirmed value and returns the failure.
    ///
    /// When `id` is not cached it is loaded first; the optimistic step then
    /// happens inside the future.
    ///
    /// The write and its reconciliation run on a spawned task: dropping the
    /// returned future stops the wait, not the write.
    ///
    /// Concurrent updates to one id each build on the latest applied value.
    /// Their results land in gateway completion order, so the last write to
    /// complete wins.
    pub fn update(
        &self,
        id: &str,
        patch: E::Patch,
    ) -> BoxFuture<'static, Result<Arc<E>, CacheError>> {
        let staged = self.stage_write(id, &patch);
        let store = self.clone();
        let id = id.to_string();

        detach(
            async move {
                let seq = match staged {
                    Some(seq) => seq,
                    None => {
                        store.load(&id).await?;
                        store
                            .stage_write(&id, &patch)
                            .ok_or_else(|| CacheError::EntityNotFound(id.clone()))?
                    }
                };
                store.commit(seq, id, patch).await
            }
            .boxed(),
        )
    }

    /// Merge `patch` over the cached value and publish it as optimistic.
    fn stage_write(&self, id: &str, patch: &E::Patch) -> Option<u64> {
        let cache = &self.inner.cache;
        let current = cache.get(id)?;
        let optimistic = Arc::new(current.merge(patch));

        let seq = self.inner.pending.lock().begin(PendingWrite {
            entity_id: id.to_string(),
            optimistic: Arc::clone(&optimistic),
            prior_confirmed: cache.confirmed(id),
        });
        cache.mark_pending(id);

        debug!("Optimistic write #{} to {}", seq, id);
        cache.put(id, optimistic, true);
        Some(seq)
    }

    async fn commit(&self, seq: u64, id: String, patch: E::Patch) -> Result<Arc<E>, CacheError> {
        let outcome = self.inner.gateway.write_entity(&id, &patch).await;

        let write = self.inner.pending.lock().finish(seq);
        let cache = &self.inner.cache;
        cache.clear_pending(&id);

        match outcome {
            Ok(authoritative) => {
                let value = cache.confirm(&id, authoritative);
                debug!("Reconciled write #{} to {}", seq, id);
                Ok(value)
            }
            Err(err) => {
                warn!("Write #{} to {} failed, rolling back: {}", seq, id, err);

                let restore = cache
                    .confirmed(&id)
                    .or_else(|| write.and_then(|write| write.prior_confirmed));
                match restore {
                    Some(previous) => {
                        cache.put(&id, previous, false);
                    }
                    None => {
                        cache.discard(&id);
                    }
                }

                Err(err.into())
            }
        }
    }
}
