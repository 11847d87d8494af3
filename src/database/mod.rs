//! Database module exports.
//!
//! - `Gateway` - the async persistence boundary consumed by the store
//! - `MongoGateway` - providers stored in MongoDB
//! - `MemoryGateway` - in-process store for tests and demos

mod gateway;
mod memory;
mod models;
mod mongo;
mod providers;

pub use gateway::Gateway;
pub use memory::{GatewayStats, MemoryGateway};
pub use models::*;
pub use mongo::Database;
pub use providers::MongoGateway;
