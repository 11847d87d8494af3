//! Cache configuration.

/// Configuration for an entity cache.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheConfig {
    /// Maximum number of regular entries kept in memory.
    ///
    /// `None` keeps every entry until it is explicitly invalidated. When set,
    /// the least recently written confirmed entry without subscribers is
    /// evicted once the bound is exceeded. Optimistic entries and entries
    /// with writes in flight are never evicted.
    pub max_entries: Option<usize>,
}

impl CacheConfig {
    /// Create a new cache config bounded to `max_entries`.
    pub fn with_capacity(max_entries: usize) -> Self {
        Self {
            max_entries: Some(max_entries),
        }
    }

    /// Set max entries for cache (builder pattern).
    #[must_use]
    pub fn max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = Some(max_entries);
        self
    }

    /// Remove the capacity bound.
    #[must_use]
    pub fn unbounded(mut self) -> Self {
        self.max_entries = None;
        self
    }

    /// Check whether `len` entries exceed the configured bound.
    pub(crate) fn is_over_capacity(&self, len: usize) -> bool {
        self.max_entries.is_some_and(|max| len > max)
    }
}
