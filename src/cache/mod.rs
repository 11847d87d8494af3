//! Cache module - entity cache and change subscriptions.
//!
//! ## Architecture
//!
//! - `EntityCache` - latest known value per entity id plus the default slot
//! - `SubscriptionRegistry` - per-id callbacks, notified synchronously
//! - `CacheConfig` - optional capacity bound
//!
//! ## Usage
//!
//! ```rust,ignore
//! let cache: EntityCache<ProviderConfig> = EntityCache::new("providers", CacheConfig::default());
//! let _watch = cache.registry().subscribe("p1", || println!("p1 changed"));
//!
//! cache.put("p1", Arc::new(provider), false);
//! let provider = cache.get("p1");
//! ```

mod config;
mod entity_cache;
mod registry;

pub use config::CacheConfig;
pub use entity_cache::{CacheEntry, EntityCache};
pub use registry::{Callback, Subscription, SubscriptionId, SubscriptionRegistry};
