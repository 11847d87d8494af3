//! Subscription registry - change callbacks per entity id.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::debug;

/// Callback invoked when a watched value changes.
///
/// Callbacks receive no payload; they re-read the snapshot they care about.
pub type Callback = Arc<dyn Fn() + Send + Sync>;

/// Unique identifier for a registration.
pub type SubscriptionId = u64;

/// What a registration listens to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum Channel {
    Entity(String),
    Default,
}

struct Registration {
    id: SubscriptionId,
    callback: Callback,
}

#[derive(Default)]
struct RegistryInner {
    /// Registrations per channel, in insertion order.
    channels: Mutex<HashMap<Channel, Vec<Registration>>>,
    next_id: AtomicU64,
}

impl RegistryInner {
    fn remove(&self, channel: &Channel, id: SubscriptionId) -> bool {
        // Removed callbacks are dropped after the lock is released: a callback
        // may own another `Subscription` whose drop re-enters the registry.
        let removed: Vec<Registration> = {
            let mut channels = self.channels.lock();
            let Some(registrations) = channels.get_mut(channel) else {
                return false;
            };
            let (removed, kept): (Vec<Registration>, Vec<Registration>) = std::mem::take(registrations)
                .into_iter()
                .partition(|r| r.id == id);
            *registrations = kept;
            if registrations.is_empty() {
                channels.remove(channel);
            }
            removed
        };
        !removed.is_empty()
    }
}

/// Registry of change callbacks, keyed by entity id, plus a separate
/// channel for the default entity.
///
/// Dispatch is synchronous and works on a snapshot of the registrations
/// taken when `notify` starts. Callbacks may subscribe or unsubscribe
/// (themselves or others) while being dispatched; that only affects later
/// passes.
///
/// Cloning is cheap and shares the same registrations.
#[derive(Clone, Default)]
pub struct SubscriptionRegistry {
    inner: Arc<RegistryInner>,
}

impl SubscriptionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `callback` for changes to entity `id`.
    ///
    /// Subscribing the same callback twice creates two independent
    /// registrations.
    pub fn subscribe<F>(&self, id: &str, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.register(Channel::Entity(id.to_string()), Arc::new(callback))
    }

    /// Register `callback` for changes to the default entity.
    pub fn subscribe_default<F>(&self, callback: F) -> Subscription
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.register(Channel::Default, Arc::new(callback))
    }

    fn register(&self, channel: Channel, callback: Callback) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed) + 1;

        self.inner
            .channels
            .lock()
            .entry(channel.clone())
            .or_default()
            .push(Registration { id, callback });

        debug!("Subscribed #{} to {:?}", id, channel);

        Subscription {
            registry: Arc::downgrade(&self.inner),
            channel,
            id,
            active: AtomicBool::new(true),
        }
    }

    /// Invoke every callback registered for entity `id`.
    ///
    /// Returns the number of callbacks invoked.
    pub fn notify(&self, id: &str) -> usize {
        self.dispatch(&Channel::Entity(id.to_string()))
    }

    /// Invoke every callback registered for the default entity.
    pub fn notify_default(&self) -> usize {
        self.dispatch(&Channel::Default)
    }

    fn dispatch(&self, channel: &Channel) -> usize {
        let snapshot: Vec<Callback> = {
            let channels = self.inner.channels.lock();
            match channels.get(channel) {
                Some(registrations) => registrations
                    .iter()
                    .map(|r| Arc::clone(&r.callback))
                    .collect(),
                None => return 0,
            }
        };

        for callback in &snapshot {
            callback();
        }

        snapshot.len()
    }

    /// Number of live registrations for entity `id`.
    pub fn subscriber_count(&self, id: &str) -> usize {
        self.count(&Channel::Entity(id.to_string()))
    }

    /// Number of live registrations on the default channel.
    pub fn default_subscriber_count(&self) -> usize {
        self.count(&Channel::Default)
    }

    /// Check if anyone is watching entity `id`.
    pub fn has_subscribers(&self, id: &str) -> bool {
        self.subscriber_count(id) > 0
    }

    fn count(&self, channel: &Channel) -> usize {
        self.inner
            .channels
            .lock()
            .get(channel)
            .map_or(0, Vec::len)
    }

    /// Drop every registration. Outstanding handles become no-ops.
    pub fn clear(&self) {
        let drained = std::mem::take(&mut *self.inner.channels.lock());
        debug!("Cleared {} subscription channels", drained.len());
        drop(drained);
    }
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let channels = self.inner.channels.lock();
        f.debug_struct("SubscriptionRegistry")
            .field("channel_count", &channels.len())
            .field(
                "subscription_count",
                &channels.values().map(Vec::len).sum::<usize>(),
            )
            .finish()
    }
}

/// Handle to a single registration.
///
/// `unsubscribe` removes exactly this registration and is idempotent.
/// Dropping the handle unsubscribes as well.
#[must_use = "dropping a Subscription unsubscribes it"]
pub struct Subscription {
    registry: Weak<RegistryInner>,
    channel: Channel,
    id: SubscriptionId,
    active: AtomicBool,
}

impl Subscription {
    /// Get the registration id.
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Check if this handle has not been unsubscribed yet.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Remove the registration. Safe to call from inside a callback.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::AcqRel) {
            return;
        }

        if let Some(inner) = self.registry.upgrade()
            && inner.remove(&self.channel, self.id)
        {
            debug!("Unsubscribed #{} from {:?}", self.id, self.channel);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .field("active", &self.is_active())
            .finish()
    }
}
