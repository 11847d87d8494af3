//! MongoDB gateway for provider configurations.
//!
//! Providers live in one collection keyed by `_id`. The default provider is
//! the document flagged `is_default: true`.

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use mongodb::bson::{doc, to_bson, Document};
use mongodb::options::ReturnDocument;
use mongodb::Collection;
use tracing::debug;

use super::models::{ProviderConfig, ProviderPatch};
use super::{Database, Gateway};
use crate::error::GatewayError;

/// Gateway reading and writing `ProviderConfig` documents.
#[derive(Debug, Clone)]
pub struct MongoGateway {
    collection: Collection<ProviderConfig>,
}

impl MongoGateway {
    /// Create a gateway over the provider collection of `db`.
    pub fn new(db: &Database) -> Self {
        Self {
            collection: db.providers(),
        }
    }
}

/// Build the `$set` document for a patch.
fn set_document(patch: &ProviderPatch) -> anyhow::Result<Document> {
    let mut set = Document::new();
    if let Some(name) = &patch.name {
        set.insert("name", name.clone());
    }
    if let Some(base_url) = &patch.base_url {
        set.insert("base_url", base_url.clone());
    }
    if let Some(api_key) = &patch.api_key {
        set.insert("api_key", api_key.clone());
    }
    if let Some(model) = &patch.model {
        set.insert("model", model.clone());
    }
    if let Some(enabled) = patch.enabled {
        set.insert("enabled", enabled);
    }
    if let Some(sort_order) = patch.sort_order {
        set.insert("sort_order", sort_order);
    }
    set.insert("updated_at", to_bson(&Some(Utc::now()))?);
    Ok(set)
}

#[async_trait]
impl Gateway<ProviderConfig> for MongoGateway {
    async fn fetch_entity(&self, id: &str) -> Result<Option<ProviderConfig>, GatewayError> {
        let result = self
            .collection
            .find_one(doc! { "_id": id })
            .await
            .with_context(|| format!("failed to fetch provider {id}"))?;

        debug!("DB get provider {}: {:?}", id, result.is_some());
        Ok(result)
    }

    async fn fetch_default_entity(&self) -> Result<ProviderConfig, GatewayError> {
        let result = self
            .collection
            .find_one(doc! { "is_default": true })
            .await
            .context("failed to fetch default provider")?;

        result.ok_or(GatewayError::NoDefault)
    }

    async fn write_entity(
        &self,
        id: &str,
        patch: &ProviderPatch,
    ) -> Result<ProviderConfig, GatewayError> {
        let update = doc! { "$set": set_document(patch)? };

        let updated = self
            .collection
            .find_one_and_update(doc! { "_id": id }, update)
            .return_document(ReturnDocument::After)
            .await
            .with_context(|| format!("failed to update provider {id}"))?;

        debug!("Updated provider {}: {:?}", id, updated.is_some());
        updated.ok_or_else(|| GatewayError::NotFound(id.to_string()))
    }

    async fn list_entities(&self) -> Result<Vec<ProviderConfig>, GatewayError> {
        let mut cursor = self
            .collection
            .find(doc! {})
            .sort(doc! { "sort_order": 1, "name": 1 })
            .await
            .context("failed to list providers")?;

        let mut providers = Vec::new();
        while let Some(result) = cursor.next().await {
            providers.push(result.context("failed to decode provider")?);
        }

        debug!("DB listed {} providers", providers.len());
        Ok(providers)
    }
}
