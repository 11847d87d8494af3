//! MongoDB connection for the provider store.

use anyhow::Context;
use mongodb::{Client, Collection, bson::doc, options::ClientOptions};
use tracing::info;

use super::ProviderConfig;
use crate::config::Config;

/// Connected MongoDB database holding the provider collection.
#[derive(Debug, Clone)]
pub struct Database {
    db: mongodb::Database,
    providers_collection: String,
}

impl Database {
    /// Connect using the MongoDB settings in `config`.
    ///
    /// # Errors
    /// Returns error if `MONGODB_URI` is missing or invalid, or the server
    /// does not answer a ping.
    pub async fn connect(config: &Config) -> anyhow::Result<Self> {
        let uri = config.require_mongodb_uri()?;
        let mut options = ClientOptions::parse(uri)
            .await
            .context("invalid MongoDB connection string")?;
        options.app_name.get_or_insert_with(|| "provider-cache".to_string());
        let client = Client::with_options(options)?;

        let db = client.database(&config.mongodb_database);
        db.run_command(doc! { "ping": 1 })
            .await
            .with_context(|| format!("MongoDB database '{}' did not answer ping", config.mongodb_database))?;

        info!(
            "Connected to MongoDB database '{}' (providers in '{}')",
            config.mongodb_database, config.providers_collection
        );

        Ok(Self {
            db,
            providers_collection: config.providers_collection.clone(),
        })
    }

    /// Provider documents.
    pub fn providers(&self) -> Collection<ProviderConfig> {
        self.db.collection(&self.providers_collection)
    }
}
