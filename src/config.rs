use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for the recomputation pipeline. The defaults match production
/// behavior; tests shrink the delay and caps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Debounce window between a source mutation and its cascade.
    pub debounce_delay_secs: u64,
    /// Lifetime of a cached projection payload.
    pub cache_ttl_hours: i64,
    /// Cache entries beyond this count are evicted oldest-first on reap.
    pub max_cache_entries: usize,
    /// How far past an open-ended obligation's start materialization reaches.
    pub projection_horizon_years: i32,
    /// Rows per bulk insert.
    pub insert_batch_size: usize,
    /// Hard stop for schedule expansion within one run.
    pub occurrence_cap: usize,
    /// Hard stop for generated instances within one materialization run.
    pub instance_cap: usize,
    /// Hard stop for aggregate rows written per building.
    pub aggregate_row_cap: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            debounce_delay_secs: 15 * 60,
            cache_ttl_hours: 24,
            max_cache_entries: 1000,
            projection_horizon_years: 3,
            insert_batch_size: 100,
            occurrence_cap: 10_000,
            instance_cap: 1_000,
            aggregate_row_cap: 5_000,
        }
    }
}

impl PipelineConfig {
    pub fn debounce_delay(&self) -> Duration {
        Duration::from_secs(self.debounce_delay_secs)
    }

    pub fn cache_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.cache_ttl_hours)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.debounce_delay(), Duration::from_secs(900));
        assert_eq!(config.cache_ttl_hours, 24);
        assert_eq!(config.occurrence_cap, 10_000);
    }

    #[test]
    fn test_partial_deserialization_fills_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"debounce_delay_secs": 1}"#).unwrap();
        assert_eq!(config.debounce_delay_secs, 1);
        assert_eq!(config.max_cache_entries, 1000);
    }
}
