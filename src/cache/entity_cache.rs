//! Entity cache - latest known value per id plus the default slot.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use super::{CacheConfig, SubscriptionRegistry};
use crate::entity::Entity;
use crate::error::CacheError;

/// Cached state for one entity id.
#[derive(Debug, Clone)]
pub struct CacheEntry<E> {
    value: Option<Arc<E>>,
    confirmed: Option<Arc<E>>,
    generation: u64,
    optimistic: bool,
    pending_writes: usize,
}

impl<E> CacheEntry<E> {
    fn absent() -> Self {
        Self {
            value: None,
            confirmed: None,
            generation: 0,
            optimistic: false,
            pending_writes: 0,
        }
    }

    /// Latest known value, `None` until loaded.
    pub fn value(&self) -> Option<&Arc<E>> {
        self.value.as_ref()
    }

    /// Last value confirmed by the store.
    pub fn confirmed(&self) -> Option<&Arc<E>> {
        self.confirmed.as_ref()
    }

    /// Cache-wide write clock at the last `put`.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether the current value still awaits confirmation.
    pub fn is_optimistic(&self) -> bool {
        self.optimistic
    }

    /// Number of writes in flight for this id.
    pub fn pending_writes(&self) -> usize {
        self.pending_writes
    }

    fn is_pinned(&self) -> bool {
        self.optimistic || self.pending_writes > 0
    }
}

struct CacheState<E> {
    entries: HashMap<String, CacheEntry<E>>,
    default: Option<Arc<E>>,
    clock: u64,
}

impl<E> CacheState<E> {
    fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }
}

/// In-memory entity cache.
///
/// Values are handed out as `Arc<E>`: re-reading an unchanged entry returns
/// the identical reference, and subscribers are notified only when an
/// entry moves to a value that is not reference-equal to the previous one.
///
/// Locks are released before any callback runs, so subscribers may read or
/// write the cache from inside a notification.
///
/// Cloning is cheap and shares the same state.
pub struct EntityCache<E: Entity> {
    state: Arc<Mutex<CacheState<E>>>,
    registry: SubscriptionRegistry,
    config: CacheConfig,
    name: Arc<str>,
}

impl<E: Entity> Clone for EntityCache<E> {
    fn clone(&self) -> Self {
        Self {
            state: Arc::clone(&self.state),
            registry: self.registry.clone(),
            config: self.config.clone(),
            name: Arc::clone(&self.name),
        }
    }
}

impl<E: Entity> EntityCache<E> {
    /// Create a new cache with the given name and config.
    pub fn new(name: impl Into<Arc<str>>, config: CacheConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(CacheState {
                entries: HashMap::new(),
                default: None,
                clock: 0,
            })),
            registry: SubscriptionRegistry::new(),
            config,
            name: name.into(),
        }
    }

    /// Get the name of this cache.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registry used to notify subscribers of this cache.
    pub fn registry(&self) -> &SubscriptionRegistry {
        &self.registry
    }

    /// Get the current value for `id`, or `None` if never loaded.
    pub fn get(&self, id: &str) -> Option<Arc<E>> {
        self.state
            .lock()
            .entries
            .get(id)
            .and_then(|entry| entry.value.clone())
    }

    /// Last value confirmed by the store for `id`.
    pub fn confirmed(&self, id: &str) -> Option<Arc<E>> {
        self.state
            .lock()
            .entries
            .get(id)
            .and_then(|entry| entry.confirmed.clone())
    }

    /// Copy of the entry metadata for `id`.
    pub fn entry(&self, id: &str) -> Option<CacheEntry<E>> {
        self.state.lock().entries.get(id).cloned()
    }

    /// Check if an entry (loaded or not) exists for `id`.
    pub fn contains(&self, id: &str) -> bool {
        self.state.lock().entries.contains_key(id)
    }

    /// Create an absent entry for `id` on a read miss.
    pub fn reserve(&self, id: &str) {
        self.state
            .lock()
            .entries
            .entry(id.to_string())
            .or_insert_with(CacheEntry::absent);
    }

    /// Replace the value for `id`.
    ///
    /// Bumps the generation and sets the optimism flag; a non-optimistic
    /// value also becomes the confirmed value. Subscribers of `id` are
    /// notified when `value` is not the reference already cached. If the
    /// default slot holds the same entity and `value` differs from it, the
    /// slot follows and default subscribers are notified.
    ///
    /// Returns `true` if subscribers were notified.
    pub fn put(&self, id: &str, value: Arc<E>, optimistic: bool) -> bool {
        let (changed, default_changed, evicted) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let generation = state.tick();

            let entry = state
                .entries
                .entry(id.to_string())
                .or_insert_with(CacheEntry::absent);

            let changed = !entry
                .value
                .as_ref()
                .is_some_and(|previous| Arc::ptr_eq(previous, &value));

            entry.value = Some(Arc::clone(&value));
            entry.generation = generation;
            entry.optimistic = optimistic;
            if !optimistic {
                entry.confirmed = Some(Arc::clone(&value));
            }

            // The default slot follows its entity, but keeps its reference
            // when the new value is equal.
            let default_changed = match &state.default {
                Some(current) if current.id() == id && **current != *value => {
                    state.default = Some(Arc::clone(&value));
                    true
                }
                _ => false,
            };

            let evicted = self.evict_over_capacity(state, id);
            (changed, default_changed, evicted)
        };

        for evicted_id in &evicted {
            debug!("Cache '{}' evicted {}", self.name, evicted_id);
        }

        debug!(
            "Cache '{}' put {} (optimistic: {}, changed: {})",
            self.name, id, optimistic, changed
        );

        if changed {
            self.registry.notify(id);
        }
        if default_changed {
            self.registry.notify_default();
        }

        changed
    }

    /// Accept an authoritative value from the store.
    ///
    /// If the cached value is equal by value, the cached reference is kept
    /// and only marked confirmed, so nobody is notified. Otherwise this is a
    /// non-optimistic `put`.
    pub fn confirm(&self, id: &str, value: E) -> Arc<E> {
        {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let generation = state.tick();

            if let Some(entry) = state.entries.get_mut(id)
                && let Some(current) = entry.value.clone()
                && *current == value
            {
                entry.generation = generation;
                entry.optimistic = false;
                entry.confirmed = Some(Arc::clone(&current));
                debug!("Cache '{}' confirmed {} without change", self.name, id);
                return current;
            }
        }

        let value = Arc::new(value);
        self.put(id, Arc::clone(&value), false);
        value
    }

    /// Record a write in flight for `id`. Pinned entries are never evicted
    /// or invalidated.
    pub fn mark_pending(&self, id: &str) {
        let mut state = self.state.lock();
        let entry = state
            .entries
            .entry(id.to_string())
            .or_insert_with(CacheEntry::absent);
        entry.pending_writes += 1;
    }

    /// Record that a write for `id` resolved.
    pub fn clear_pending(&self, id: &str) {
        if let Some(entry) = self.state.lock().entries.get_mut(id) {
            entry.pending_writes = entry.pending_writes.saturating_sub(1);
        }
    }

    /// Get the default entity.
    ///
    /// Returns `UninitializedDefault` until `set_default` was called.
    pub fn get_default(&self) -> Result<Arc<E>, CacheError> {
        self.state
            .lock()
            .default
            .clone()
            .ok_or(CacheError::UninitializedDefault)
    }

    /// Check if the default slot has been populated.
    pub fn has_default(&self) -> bool {
        self.state.lock().default.is_some()
    }

    /// Populate the default slot, notifying default subscribers on change.
    pub fn set_default(&self, value: Arc<E>) -> bool {
        let changed = {
            let mut state = self.state.lock();
            let changed = !state
                .default
                .as_ref()
                .is_some_and(|previous| Arc::ptr_eq(previous, &value));
            state.default = Some(value);
            changed
        };

        if changed {
            self.registry.notify_default();
        }
        changed
    }

    /// Remove the entry for `id`.
    ///
    /// Entries that are optimistic or have writes in flight are kept.
    /// The default slot is never touched. Returns `true` if removed.
    pub fn invalidate(&self, id: &str) -> bool {
        let removed = {
            let mut state = self.state.lock();
            match state.entries.get(id) {
                Some(entry) if entry.is_pinned() => {
                    debug!("Cache '{}' kept pinned entry {}", self.name, id);
                    None
                }
                Some(_) => state.entries.remove(id),
                None => None,
            }
        };
        removed.is_some()
    }

    /// Remove every regular entry that is not pinned by a pending write.
    ///
    /// Returns the number of entries removed.
    pub fn invalidate_all(&self) -> usize {
        let mut state = self.state.lock();
        let before = state.entries.len();
        state.entries.retain(|_, entry| entry.is_pinned());
        let removed = before - state.entries.len();
        debug!("Cache '{}' invalidated {} entries", self.name, removed);
        removed
    }

    /// Drop the entry for `id` unconditionally, notifying subscribers if it
    /// held a value.
    pub fn discard(&self, id: &str) -> bool {
        let removed = self.state.lock().entries.remove(id);
        let had_value = removed.is_some_and(|entry| entry.value.is_some());
        if had_value {
            self.registry.notify(id);
        }
        had_value
    }

    /// Remove all entries and the default slot. Subscriptions are kept.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.entries.clear();
        state.default = None;
    }

    /// Number of regular entries.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Check if the cache holds no regular entries.
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    fn evict_over_capacity(&self, state: &mut CacheState<E>, keep: &str) -> Vec<String> {
        let mut evicted = Vec::new();

        while self.config.is_over_capacity(state.entries.len()) {
            let candidate = state
                .entries
                .iter()
                .filter(|(id, entry)| {
                    id.as_str() != keep
                        && !entry.is_pinned()
                        && !self.registry.has_subscribers(id)
                })
                .min_by_key(|(_, entry)| entry.generation)
                .map(|(id, _)| id.clone());

            let Some(id) = candidate else {
                break;
            };
            state.entries.remove(&id);
            evicted.push(id);
        }

        evicted
    }
}

impl<E: Entity> std::fmt::Debug for EntityCache<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("EntityCache")
            .field("name", &self.name)
            .field("entry_count", &state.entries.len())
            .field("has_default", &state.default.is_some())
            .finish()
    }
}
