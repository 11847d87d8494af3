//! Database model exports.

pub mod provider;

pub use provider::{ProviderConfig, ProviderPatch};
