use crate::config::PipelineConfig;
use crate::error::Result;
use crate::schema::ProjectionCacheEntry;
use crate::store::DataStore;
use chrono::{NaiveDate, NaiveDateTime};
use log::{debug, info, warn};
use std::sync::Arc;

/// TTL-bounded store of serialized projection payloads, keyed by building
/// and date range. Invalidation is coarse: a single source change can affect
/// every cached range for a building, so invalidation always clears them all.
pub struct ProjectionCache {
    store: Arc<dyn DataStore>,
    config: PipelineConfig,
}

impl ProjectionCache {
    pub fn new(store: Arc<dyn DataStore>, config: PipelineConfig) -> Self {
        Self { store, config }
    }

    /// Cache key for a projection date range. Grouping is applied after
    /// retrieval, so monthly and yearly views share one key.
    pub fn range_key(start: NaiveDate, end: NaiveDate) -> String {
        format!("proj:{start}:{end}")
    }

    /// Returns the cached entry if present and unexpired. Callers read the
    /// payload and `created_at` from it; the latter is the true generation
    /// time of a hit.
    pub fn get(
        &self,
        building_id: &str,
        cache_key: &str,
        now: NaiveDateTime,
    ) -> Result<Option<ProjectionCacheEntry>> {
        match self.store.cache_entry(building_id, cache_key)? {
            Some(entry) if entry.expires_at > now => {
                debug!("Cache hit for building {building_id}, key {cache_key}");
                Ok(Some(entry))
            }
            Some(_) => {
                debug!("Cache entry expired for building {building_id}, key {cache_key}");
                Ok(None)
            }
            None => Ok(None),
        }
    }

    /// Writes a payload with a fresh TTL, overwriting any previous entry for
    /// the same key. Callers treat failures as best-effort and continue.
    pub fn put(
        &self,
        building_id: &str,
        cache_key: &str,
        payload: String,
        now: NaiveDateTime,
    ) -> Result<()> {
        self.store.put_cache_entry(ProjectionCacheEntry {
            building_id: building_id.to_string(),
            cache_key: cache_key.to_string(),
            payload,
            created_at: now,
            expires_at: now + self.config.cache_ttl(),
        })
    }

    /// Deletes every cached entry for a building, regardless of date range.
    pub fn invalidate(&self, building_id: &str, reason: Option<&str>) -> Result<usize> {
        let removed = self.store.delete_cache_entries_for_building(building_id)?;
        info!(
            "Invalidated {removed} cache entries for building {building_id} ({})",
            reason.unwrap_or("unspecified")
        );
        Ok(removed)
    }

    /// Removes expired entries, then evicts oldest-first down to the
    /// configured maximum entry count.
    pub fn reap(&self, now: NaiveDateTime) -> Result<usize> {
        let mut removed = 0;
        let mut live = Vec::new();
        for entry in self.store.cache_entries()? {
            if entry.expires_at <= now {
                self.store
                    .delete_cache_entry(&entry.building_id, &entry.cache_key)?;
                removed += 1;
            } else {
                live.push(entry);
            }
        }

        if live.len() > self.config.max_cache_entries {
            let excess = live.len() - self.config.max_cache_entries;
            warn!(
                "Cache over capacity ({} > {}); evicting {excess} oldest entries",
                live.len(),
                self.config.max_cache_entries
            );
            live.sort_by_key(|e| e.created_at);
            for entry in live.iter().take(excess) {
                self.store
                    .delete_cache_entry(&entry.building_id, &entry.cache_key)?;
                removed += 1;
            }
        }

        Ok(removed)
    }
}
