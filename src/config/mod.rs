//! Configuration module.
//!
//! Loads configuration from environment variables (and `.env`).

use std::env;

use anyhow::{Context, Result};

use crate::cache::CacheConfig;

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    // MongoDB
    pub mongodb_uri: Option<String>,
    pub mongodb_database: String,
    pub providers_collection: String,

    /// Cache bound (`CACHE_MAX_ENTRIES`, unbounded when unset)
    pub cache: CacheConfig,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    /// Returns error if a variable is set to an unparsable value.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let cache = match non_empty("CACHE_MAX_ENTRIES") {
            Some(raw) => {
                let max = raw
                    .parse::<usize>()
                    .with_context(|| format!("CACHE_MAX_ENTRIES must be a number, got '{raw}'"))?;
                CacheConfig::with_capacity(max)
            }
            None => CacheConfig::default(),
        };

        Ok(Self {
            mongodb_uri: non_empty("MONGODB_URI"),
            mongodb_database: non_empty("MONGODB_DATABASE")
                .unwrap_or_else(|| "provider_cache".to_string()),
            providers_collection: non_empty("PROVIDERS_COLLECTION")
                .unwrap_or_else(|| "providers".to_string()),
            cache,
        })
    }

    /// MongoDB URI, required when running against a real store.
    pub fn require_mongodb_uri(&self) -> Result<&str> {
        self.mongodb_uri
            .as_deref()
            .context("MONGODB_URI must be set (or pass --memory)")
    }
}
