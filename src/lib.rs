//! Provider Cache - reactive entity cache with optimistic updates.
//!
//! Keeps provider configurations in memory in front of a slow, async store.
//! Reads are synchronous snapshots, writes are applied optimistically and
//! reconciled once the store answers, and subscribers hear about every
//! change to what they watch.
//!
//! ## Architecture
//!
//! - `cache` - entity cache, default slot and subscription registry
//! - `store` - consumer-facing store: snapshots, updates, initialization
//! - `database` - persistence gateway trait with MongoDB and memory backends
//! - `config` - environment configuration
//! - `error` - error types

pub mod cache;
pub mod config;
pub mod database;
pub mod entity;
pub mod error;
pub mod store;

pub use cache::{CacheConfig, EntityCache, Subscription, SubscriptionRegistry};
pub use database::{Gateway, MemoryGateway, MongoGateway, ProviderConfig, ProviderPatch};
pub use entity::Entity;
pub use error::{CacheError, GatewayError};
pub use store::{EntityStore, LoadState};
