//! Provider configuration model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::entity::Entity;

/// A configured provider (endpoint, credentials and model choice).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Stable provider ID (document `_id`)
    #[serde(rename = "_id")]
    pub id: String,

    /// Display name
    pub name: String,

    /// API endpoint override
    #[serde(default)]
    pub base_url: Option<String>,

    /// API key (never serialized when unset)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    /// Selected model
    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub enabled: bool,

    /// Position in provider lists (ascending)
    #[serde(default)]
    pub sort_order: i32,

    /// Whether this is the default provider
    #[serde(default)]
    pub is_default: bool,

    /// Last write time, set by the store
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProviderConfig {
    /// Create a new, disabled provider.
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            base_url: None,
            api_key: None,
            model: None,
            enabled: false,
            sort_order: 0,
            is_default: false,
            updated_at: None,
        }
    }

    /// Ordering key for provider lists: enabled first, then sort order,
    /// then name.
    pub fn display_key(&self) -> (bool, i32, String) {
        (!self.enabled, self.sort_order, self.name.to_lowercase())
    }

    /// Check if the provider has what it needs to be used.
    pub fn is_usable(&self) -> bool {
        self.enabled && self.model.is_some()
    }
}

/// Partial change to a provider. `None` leaves a field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_order: Option<i32>,
}

impl ProviderPatch {
    /// Set the display name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the endpoint.
    #[must_use]
    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Set the API key.
    #[must_use]
    pub fn api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    /// Set the model.
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Enable or disable the provider.
    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = Some(enabled);
        self
    }

    /// Set the list position.
    #[must_use]
    pub fn sort_order(mut self, sort_order: i32) -> Self {
        self.sort_order = Some(sort_order);
        self
    }

    /// Check if the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl Entity for ProviderConfig {
    type Patch = ProviderPatch;

    fn id(&self) -> &str {
        &self.id
    }

    fn merge(&self, patch: &ProviderPatch) -> Self {
        let mut next = self.clone();
        if let Some(name) = &patch.name {
            next.name = name.clone();
        }
        if let Some(base_url) = &patch.base_url {
            next.base_url = Some(base_url.clone());
        }
        if let Some(api_key) = &patch.api_key {
            next.api_key = Some(api_key.clone());
        }
        if let Some(model) = &patch.model {
            next.model = Some(model.clone());
        }
        if let Some(enabled) = patch.enabled {
            next.enabled = enabled;
        }
        if let Some(sort_order) = patch.sort_order {
            next.sort_order = sort_order;
        }
        next
    }
}
