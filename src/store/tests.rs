use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::{Notify, oneshot};

use super::*;
use crate::database::{MemoryGateway, ProviderConfig, ProviderPatch};
use crate::error::GatewayError;

fn provider(id: &str, name: &str, enabled: bool) -> ProviderConfig {
    let mut provider = ProviderConfig::new(id, name);
    provider.enabled = enabled;
    provider
}

fn seeded_gateway() -> MemoryGateway<ProviderConfig> {
    let mut local = provider("p3", "Local", true);
    local.sort_order = 1;
    MemoryGateway::with_entities([
        provider("p1", "OpenAI", false),
        provider("p2", "Anthropic", true),
        local,
    ])
}

fn store_over<G>(gateway: &Arc<G>) -> EntityStore<ProviderConfig>
where
    G: Gateway<ProviderConfig> + 'static,
{
    EntityStore::new(gateway.clone(), CacheConfig::default())
}

fn counter() -> (Arc<AtomicUsize>, impl Fn() + Send + Sync + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let handle = Arc::clone(&count);
    (count, move || {
        handle.fetch_add(1, Ordering::SeqCst);
    })
}

fn watch(store: &EntityStore<ProviderConfig>, id: &str) -> (Arc<AtomicUsize>, Subscription) {
    let (count, callback) = counter();
    (count, store.subscribe(id, callback))
}

/// Gateway whose writes wait for a release signal, keyed by the patched
/// model name. Writes without a gate go through immediately.
struct ScriptedGateway {
    inner: MemoryGateway<ProviderConfig>,
    gates: Mutex<HashMap<String, oneshot::Receiver<()>>>,
    failing: Mutex<HashSet<String>>,
}

impl ScriptedGateway {
    fn new(inner: MemoryGateway<ProviderConfig>) -> Self {
        Self {
            inner,
            gates: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
        }
    }

    fn gate(&self, model: &str) -> oneshot::Sender<()> {
        let (release, gate) = oneshot::channel();
        self.gates.lock().insert(model.to_string(), gate);
        release
    }

    /// Like `gate`, but the write is rejected once released.
    fn gate_failing(&self, model: &str) -> oneshot::Sender<()> {
        self.failing.lock().insert(model.to_string());
        self.gate(model)
    }
}

#[async_trait]
impl Gateway<ProviderConfig> for ScriptedGateway {
    async fn fetch_entity(&self, id: &str) -> Result<Option<ProviderConfig>, GatewayError> {
        self.inner.fetch_entity(id).await
    }

    async fn fetch_default_entity(&self) -> Result<ProviderConfig, GatewayError> {
        self.inner.fetch_default_entity().await
    }

    async fn write_entity(
        &self,
        id: &str,
        patch: &ProviderPatch,
    ) -> Result<ProviderConfig, GatewayError> {
        let gate = patch
            .model
            .as_ref()
            .and_then(|model| self.gates.lock().remove(model));
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        if let Some(model) = &patch.model
            && self.failing.lock().contains(model)
        {
            return Err(GatewayError::Rejected(format!("{model} is not available")));
        }
        self.inner.write_entity(id, patch).await
    }

    async fn list_entities(&self) -> Result<Vec<ProviderConfig>, GatewayError> {
        self.inner.list_entities().await
    }
}

#[tokio::test]
async fn test_update_is_visible_before_gateway_confirms() {
    let gateway = Arc::new(seeded_gateway());
    let store = store_over(&gateway);
    store.load("p1").await.unwrap();
    let (count, _sub) = watch(&store, "p1");

    let pending = store.update("p1", ProviderPatch::default().enabled(true));

    let optimistic = store.get_snapshot("p1").unwrap();
    assert!(optimistic.enabled);
    assert!(store.cache().entry("p1").unwrap().is_optimistic());
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(store.pending_writes("p1"), 1);

    let confirmed = pending.await.unwrap();
    assert!(confirmed.enabled);

    // The store agreed with the guess: same reference, no second notification.
    assert!(Arc::ptr_eq(&confirmed, &optimistic));
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert!(!store.cache().entry("p1").unwrap().is_optimistic());
    assert_eq!(store.pending_writes("p1"), 0);
}

#[tokio::test]
async fn test_reconciliation_converges_to_gateway_value() {
    let gateway = Arc::new(seeded_gateway());
    let store = store_over(&gateway);
    store.load("p1").await.unwrap();
    let (count, _sub) = watch(&store, "p1");

    // Someone else renamed the provider behind the cache's back.
    gateway.insert(provider("p1", "OpenAI (EU)", false));

    let result = store
        .update("p1", ProviderPatch::default().enabled(true))
        .await
        .unwrap();

    let stored = gateway.stored("p1").unwrap();
    assert_eq!(*result, stored);
    assert_eq!(*store.get_snapshot("p1").unwrap(), stored);
    assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_failed_update_rolls_back_exactly() {
    let gateway = Arc::new(seeded_gateway());
    let store = store_over(&gateway);
    let before = store.load("p1").await.unwrap();
    let (count, _sub) = watch(&store, "p1");
    gateway.reject_writes("p1", "quota exceeded");

    let pending = store.update("p1", ProviderPatch::default().enabled(true));
    assert!(store.get_snapshot("p1").unwrap().enabled);

    let err = pending.await.unwrap_err();
    assert!(matches!(err, CacheError::PersistenceFailure(_)));

    let after = store.get_snapshot("p1").unwrap();
    assert!(Arc::ptr_eq(&before, &after));
    assert_eq!(count.load(Ordering::SeqCst), 2);
    assert!(!store.cache().entry("p1").unwrap().is_optimistic());
    assert_eq!(store.pending_writes("p1"), 0);
}

#[tokio::test]
async fn test_update_loads_uncached_entity_first() {
    let gateway = Arc::new(seeded_gateway());
    let store = store_over(&gateway);

    let result = store
        .update("p2", ProviderPatch::default().model("claude"))
        .await
        .unwrap();

    assert_eq!(result.model.as_deref(), Some("claude"));
    assert_eq!(gateway.stats().fetches(), 1);
    assert_eq!(gateway.stats().writes(), 1);
}

#[tokio::test]
async fn test_update_missing_entity_fails_without_caching() {
    let gateway = Arc::new(seeded_gateway());
    let store = store_over(&gateway);

    let err = store
        .update("missing", ProviderPatch::default().enabled(true))
        .await
        .unwrap_err();

    assert!(err.is_not_found());
    assert!(store.get_snapshot("missing").is_none());
    assert!(matches!(store.load_state("missing"), LoadState::Error(_)));
    assert_eq!(gateway.stats().writes(), 0);
}

#[tokio::test]
async fn test_second_update_builds_on_optimistic_value() {
    let gateway = Arc::new(ScriptedGateway::new(seeded_gateway()));
    let release_first = gateway.gate("model-a");
    let store = store_over(&gateway);
    store.load("p1").await.unwrap();

    let first = tokio::spawn(store.update("p1", ProviderPatch::default().model("model-a")));
    let second = tokio::spawn(store.update("p1", ProviderPatch::default().enabled(true)));

    let snapshot = store.get_snapshot("p1").unwrap();
    assert_eq!(snapshot.model.as_deref(), Some("model-a"));
    assert!(snapshot.enabled);
    assert_eq!(store.pending_writes("p1"), 2);

    // The ungated write lands first and wins for now.
    second.await.unwrap().unwrap();
    let snapshot = store.get_snapshot("p1").unwrap();
    assert!(snapshot.enabled);
    assert_eq!(snapshot.model, None);

    release_first.send(()).unwrap();
    first.await.unwrap().unwrap();

    let snapshot = store.get_snapshot("p1").unwrap();
    assert_eq!(*snapshot, gateway.inner.stored("p1").unwrap());
    assert_eq!(snapshot.model.as_deref(), Some("model-a"));
    assert!(snapshot.enabled);
    assert_eq!(store.pending_writes("p1"), 0);
}

#[tokio::test]
async fn test_interleaved_updates_resolve_in_completion_order() {
    let gateway = Arc::new(ScriptedGateway::new(seeded_gateway()));
    let release_first = gateway.gate("model-a");
    let release_second = gateway.gate("model-b");
    let store = store_over(&gateway);
    store.load("p1").await.unwrap();

    let first = tokio::spawn(store.update("p1", ProviderPatch::default().model("model-a")));
    let second = tokio::spawn(store.update("p1", ProviderPatch::default().model("model-b")));
    assert_eq!(
        store.get_snapshot("p1").unwrap().model.as_deref(),
        Some("model-b")
    );

    release_second.send(()).unwrap();
    let second = second.await.unwrap().unwrap();
    assert_eq!(second.model.as_deref(), Some("model-b"));
    assert_eq!(
        store.get_snapshot("p1").unwrap().model.as_deref(),
        Some("model-b")
    );

    release_first.send(()).unwrap();
    let first = first.await.unwrap().unwrap();
    assert_eq!(first.model.as_deref(), Some("model-a"));

    // Completion order, not call order, decides the final value.
    let snapshot = store.get_snapshot("p1").unwrap();
    assert!(Arc::ptr_eq(&snapshot, &first));
    assert!(!store.cache().entry("p1").unwrap().is_optimistic());
}

#[tokio::test]
async fn test_concurrent_initialize_reads_gateway_once() {
    let gateway = Arc::new(seeded_gateway().latency(Duration::from_millis(10)));
    gateway.set_default("p2");
    let store = store_over(&gateway);
    let (count, callback) = counter();
    let _sub = store.subscribe_default(callback);

    let results = join_all((0..5).map(|_| store.initialize())).await;

    let first = results[0].as_ref().unwrap();
    assert_eq!(first.id, "p2");
    for result in &results {
        assert!(Arc::ptr_eq(result.as_ref().unwrap(), first));
    }
    assert_eq!(gateway.stats().default_fetches(), 1);
    assert_eq!(count.load(Ordering::SeqCst), 1);

    // Already populated: no gateway call.
    let again = store.initialize().await.unwrap();
    assert!(Arc::ptr_eq(&again, first));
    assert!(Arc::ptr_eq(&store.get_default_snapshot().unwrap(), first));
    assert_eq!(gateway.stats().default_fetches(), 1);
}

#[tokio::test]
async fn test_failed_initialize_rejects_everyone_and_allows_retry() {
    let gateway = Arc::new(seeded_gateway().latency(Duration::from_millis(5)));
    let store = store_over(&gateway);

    let results = join_all((0..3).map(|_| store.initialize())).await;
    assert!(
        results
            .iter()
            .all(|r| matches!(r, Err(CacheError::PersistenceFailure(_))))
    );
    assert_eq!(gateway.stats().default_fetches(), 1);
    assert!(!store.is_initialized());
    assert!(matches!(
        store.get_default_snapshot(),
        Err(CacheError::UninitializedDefault)
    ));

    gateway.set_default("p3");
    let value = store.initialize().await.unwrap();
    assert_eq!(value.id, "p3");
    assert_eq!(gateway.stats().default_fetches(), 2);
}

#[tokio::test]
async fn test_default_slot_follows_updates() {
    let gateway = Arc::new(seeded_gateway());
    gateway.set_default("p2");
    let store = store_over(&gateway);
    store.initialize().await.unwrap();
    let (count, callback) = counter();
    let _sub = store.subscribe_default(callback);

    store
        .update("p2", ProviderPatch::default().model("claude"))
        .await
        .unwrap();

    let default = store.get_default_snapshot().unwrap();
    assert_eq!(default.model.as_deref(), Some("claude"));
    assert_eq!(count.load(Ordering::SeqCst), 1);

    // Invalidation leaves the default slot alone.
    assert!(store.invalidate("p2"));
    assert!(store.get_default_snapshot().is_ok());
}

#[tokio::test]
async fn test_load_state_machine() {
    let gateway = Arc::new(seeded_gateway());
    let store = store_over(&gateway);
    assert!(matches!(store.load_state("p1"), LoadState::Uninitialized));

    let pending = store.load("p1");
    assert!(store.load_state("p1").is_loading());
    pending.await.unwrap();
    assert!(store.load_state("p1").is_ready());

    let err = store.load("p9").await.unwrap_err();
    assert!(err.is_not_found());
    assert!(matches!(store.load_state("p9"), LoadState::Error(CacheError::EntityNotFound(_))));

    gateway.insert(provider("p9", "Late", true));
    let pending = store.load("p9");
    assert!(store.load_state("p9").is_loading());
    assert_eq!(pending.await.unwrap().name, "Late");
    assert!(store.load_state("p9").is_ready());
}

#[tokio::test]
async fn test_concurrent_loads_share_one_read() {
    let gateway = Arc::new(seeded_gateway().latency(Duration::from_millis(10)));
    let store = store_over(&gateway);
    let (count, _sub) = watch(&store, "p1");

    let results = join_all((0..3).map(|_| store.load("p1"))).await;

    let first = results[0].as_ref().unwrap();
    assert!(results.iter().all(|r| Arc::ptr_eq(r.as_ref().unwrap(), first)));
    assert_eq!(gateway.stats().fetches(), 1);
    assert_eq!(count.load(Ordering::SeqCst), 1);

    // Cached now.
    store.load("p1").await.unwrap();
    assert_eq!(gateway.stats().fetches(), 1);
}

#[tokio::test]
async fn test_snapshot_or_load_notifies_on_arrival() {
    let gateway = Arc::new(seeded_gateway());
    let store = store_over(&gateway);
    let arrived = Arc::new(Notify::new());
    let signal = Arc::clone(&arrived);
    let _sub = store.subscribe("p2", move || signal.notify_one());

    assert!(store.snapshot_or_load("p2").is_none());

    tokio::time::timeout(Duration::from_secs(1), arrived.notified())
        .await
        .unwrap();
    assert_eq!(store.snapshot_or_load("p2").unwrap().name, "Anthropic");
    assert_eq!(gateway.stats().fetches(), 1);
}

#[tokio::test]
async fn test_subscribe_then_unsubscribe_never_fires() {
    let gateway = Arc::new(seeded_gateway());
    let store = store_over(&gateway);
    let (count, sub) = watch(&store, "p1");
    sub.unsubscribe();

    store.load("p1").await.unwrap();
    store
        .update("p1", ProviderPatch::default().enabled(true))
        .await
        .unwrap();

    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_unsubscribe_from_callback_during_update() {
    let gateway = Arc::new(seeded_gateway());
    let store = store_over(&gateway);
    store.load("p1").await.unwrap();

    let slot: Arc<Mutex<Option<Subscription>>> = Arc::new(Mutex::new(None));
    let (once_count, once_cb) = counter();
    let own = Arc::clone(&slot);
    let sub = store.subscribe("p1", move || {
        once_cb();
        if let Some(sub) = own.lock().take() {
            sub.unsubscribe();
        }
    });
    *slot.lock() = Some(sub);
    let (other_count, _other) = watch(&store, "p1");

    store
        .update("p1", ProviderPatch::default().enabled(true))
        .await
        .unwrap();
    store
        .update("p1", ProviderPatch::default().enabled(false))
        .await
        .unwrap();

    assert_eq!(once_count.load(Ordering::SeqCst), 1);
    assert_eq!(other_count.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_callback_may_reenter_store() {
    let gateway = Arc::new(seeded_gateway());
    let store = store_over(&gateway);
    store.load("p1").await.unwrap();

    let seen = Arc::new(Mutex::new(Vec::new()));
    let reader = store.clone();
    let sink = Arc::clone(&seen);
    let _sub = store.subscribe("p1", move || {
        let snapshot = reader.get_snapshot("p1").map(|p| p.enabled);
        sink.lock().push((snapshot, reader.pending_writes("p1")));
    });

    store
        .update("p1", ProviderPatch::default().enabled(true))
        .await
        .unwrap();

    assert_eq!(*seen.lock(), vec![(Some(true), 1)]);
}

#[tokio::test]
async fn test_list_sorted_by_keeps_cached_references() {
    let gateway = Arc::new(seeded_gateway());
    let store = store_over(&gateway);
    let cached = store.load("p2").await.unwrap();

    let providers = store
        .list_sorted_by(ProviderConfig::display_key)
        .await
        .unwrap();

    let ids: Vec<&str> = providers.iter().map(|p| p.id.as_str()).collect();
    assert_eq!(ids, vec!["p2", "p3", "p1"]);
    assert!(Arc::ptr_eq(&providers[0], &cached));
    assert!(store.get_snapshot("p3").is_some());
    assert_eq!(store.cache().len(), 3);
}

#[tokio::test]
async fn test_list_keeps_optimistic_value_of_pending_write() {
    let gateway = Arc::new(ScriptedGateway::new(seeded_gateway()));
    let release = gateway.gate("model-a");
    let store = store_over(&gateway);
    store.load("p1").await.unwrap();

    let pending = tokio::spawn(store.update("p1", ProviderPatch::default().model("model-a")));
    let listed = store.list().await.unwrap();

    let p1 = listed.iter().find(|p| p.id == "p1").unwrap();
    assert_eq!(p1.model.as_deref(), Some("model-a"));
    assert!(store.cache().entry("p1").unwrap().is_optimistic());

    release.send(()).unwrap();
    pending.await.unwrap().unwrap();
    assert!(!store.cache().entry("p1").unwrap().is_optimistic());
}

#[tokio::test]
async fn test_invalidate_and_teardown() {
    let gateway = Arc::new(seeded_gateway());
    gateway.set_default("p2");
    let store = store_over(&gateway);
    store.initialize().await.unwrap();
    store.load("p1").await.unwrap();
    let (count, _sub) = watch(&store, "p1");

    assert!(store.invalidate("p1"));
    assert!(store.get_snapshot("p1").is_none());
    assert!(matches!(store.load_state("p1"), LoadState::Uninitialized));
    assert!(store.is_initialized());

    store.load("p1").await.unwrap();
    assert_eq!(gateway.stats().fetches(), 2);
    assert_eq!(count.load(Ordering::SeqCst), 1);

    store.teardown();
    assert!(!store.is_initialized());
    assert!(store.get_snapshot("p1").is_none());
    assert_eq!(store.cache().registry().subscriber_count("p1"), 0);
}

#[tokio::test]
async fn test_update_completes_after_caller_times_out() {
    let gateway = Arc::new(seeded_gateway().latency(Duration::from_millis(50)));
    let store = store_over(&gateway);
    store.load("p1").await.unwrap();

    let waited = tokio::time::timeout(
        Duration::from_millis(5),
        store.update("p1", ProviderPatch::default().enabled(true)),
    )
    .await;
    assert!(waited.is_err());
    assert!(store.cache().entry("p1").unwrap().is_optimistic());

    tokio::time::sleep(Duration::from_millis(200)).await;

    let entry = store.cache().entry("p1").unwrap();
    assert!(!entry.is_optimistic());
    assert_eq!(store.pending_writes("p1"), 0);
    assert!(store.get_snapshot("p1").unwrap().enabled);
    assert!(gateway.stored("p1").unwrap().enabled);
    assert_eq!(gateway.stats().writes(), 1);
}

#[tokio::test]
async fn test_dropped_update_still_reaches_gateway() {
    let gateway = Arc::new(seeded_gateway());
    let store = store_over(&gateway);
    store.load("p1").await.unwrap();

    drop(store.update("p1", ProviderPatch::default().model("gpt-4o")));
    assert_eq!(store.pending_writes("p1"), 1);

    tokio::time::sleep(Duration::from_millis(20)).await;

    assert_eq!(gateway.stats().writes(), 1);
    assert_eq!(store.pending_writes("p1"), 0);
    assert!(!store.cache().entry("p1").unwrap().is_optimistic());
    assert_eq!(*store.get_snapshot("p1").unwrap(), gateway.stored("p1").unwrap());
}

#[tokio::test]
async fn test_dropped_load_and_initialize_settle_without_holding_store() {
    let gateway = Arc::new(seeded_gateway());
    gateway.set_default("p2");
    let store = store_over(&gateway);

    drop(store.load("p1"));
    drop(store.initialize());
    assert!(store.load_state("p1").is_loading());

    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(store.load_state("p1").is_ready());
    assert!(store.is_initialized());
    assert_eq!(Arc::strong_count(&store.inner), 1);
}

#[tokio::test]
async fn test_failed_write_keeps_newer_confirmed_value() {
    let gateway = Arc::new(ScriptedGateway::new(seeded_gateway()));
    let release_first = gateway.gate_failing("model-a");
    let release_second = gateway.gate("model-b");
    let store = store_over(&gateway);
    store.load("p1").await.unwrap();
    let (count, _sub) = watch(&store, "p1");

    let first = store.update("p1", ProviderPatch::default().model("model-a"));
    let second = store.update("p1", ProviderPatch::default().model("model-b"));
    assert_eq!(count.load(Ordering::SeqCst), 2);

    release_second.send(()).unwrap();
    let confirmed = second.await.unwrap();

    release_first.send(()).unwrap();
    let err = first.await.unwrap_err();
    assert!(matches!(err, CacheError::PersistenceFailure(_)));

    // The rollback target is the value the second write confirmed.
    let snapshot = store.get_snapshot("p1").unwrap();
    assert!(Arc::ptr_eq(&snapshot, &confirmed));
    assert_eq!(snapshot.model.as_deref(), Some("model-b"));
    assert_eq!(count.load(Ordering::SeqCst), 2);
    assert!(!store.cache().entry("p1").unwrap().is_optimistic());
    assert_eq!(store.pending_writes("p1"), 0);
}

#[tokio::test]
async fn test_failed_write_before_other_write_confirms() {
    let gateway = Arc::new(ScriptedGateway::new(seeded_gateway()));
    let release_first = gateway.gate_failing("model-a");
    let release_second = gateway.gate("model-b");
    let store = store_over(&gateway);
    let loaded = store.load("p1").await.unwrap();
    let (count, _sub) = watch(&store, "p1");

    let first = store.update("p1", ProviderPatch::default().model("model-a"));
    let second = store.update("p1", ProviderPatch::default().model("model-b"));

    release_first.send(()).unwrap();
    assert!(first.await.is_err());

    // Back to the last confirmed value while the second write is in flight.
    assert!(Arc::ptr_eq(&store.get_snapshot("p1").unwrap(), &loaded));
    assert_eq!(store.pending_writes("p1"), 1);
    assert_eq!(count.load(Ordering::SeqCst), 3);

    release_second.send(()).unwrap();
    second.await.unwrap();

    let snapshot = store.get_snapshot("p1").unwrap();
    assert_eq!(snapshot.model.as_deref(), Some("model-b"));
    assert_eq!(*snapshot, gateway.inner.stored("p1").unwrap());
    assert_eq!(count.load(Ordering::SeqCst), 4);
    assert_eq!(store.pending_writes("p1"), 0);
}

#[tokio::test]
async fn test_failed_write_without_confirmed_value_discards_entry() {
    let gateway = Arc::new(seeded_gateway());
    let store = store_over(&gateway);
    store
        .cache()
        .put("p4", Arc::new(provider("p4", "Draft", false)), true);
    let (count, _sub) = watch(&store, "p4");

    let err = store
        .update("p4", ProviderPatch::default().enabled(true))
        .await
        .unwrap_err();

    assert!(err.is_not_found());
    assert!(store.get_snapshot("p4").is_none());
    assert!(!store.cache().contains("p4"));
    assert_eq!(count.load(Ordering::SeqCst), 2);
    assert_eq!(store.pending_writes("p4"), 0);
}
