use crate::cache::ProjectionCache;
use crate::config::PipelineConfig;
use crate::coordinator::{RecomputeCoordinator, SchedulerStatus};
use crate::error::{PipelineError, Result};
use crate::instantiator::{MaterializeOutcome, RecurringInstantiator};
use crate::projection::{to_rows, ProjectionCalculator, ProjectionPayload, ProjectionRow, ProjectionSummary};
use crate::schema::PaymentKind;
use crate::store::DataStore;
use crate::utils::validate_range;
use chrono::{Datelike, NaiveDate, NaiveDateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    Monthly,
    Yearly,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionMeta {
    pub cached: bool,
    pub generated_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionResponse {
    pub data: Vec<ProjectionRow>,
    pub summary: ProjectionSummary,
    pub meta: ProjectionMeta,
}

/// The query and trigger surface the surrounding API layer calls into.
/// Reads self-heal from currently active source rows, so a stale or missing
/// aggregate never fails a projection request; only malformed requests do.
pub struct CashflowService {
    store: Arc<dyn DataStore>,
    config: PipelineConfig,
    calculator: ProjectionCalculator,
    cache: ProjectionCache,
    instantiator: RecurringInstantiator,
    coordinator: RecomputeCoordinator,
}

impl CashflowService {
    pub fn new(store: Arc<dyn DataStore>, config: PipelineConfig) -> Self {
        Self {
            calculator: ProjectionCalculator::new(store.clone()),
            cache: ProjectionCache::new(store.clone(), config.clone()),
            instantiator: RecurringInstantiator::new(store.clone(), config.clone()),
            coordinator: RecomputeCoordinator::new(store.clone(), config.clone()),
            store,
            config,
        }
    }

    pub fn coordinator(&self) -> &RecomputeCoordinator {
        &self.coordinator
    }

    /// Fire-and-forget hook called after a recurring-obligation write
    /// commits. Must run inside a tokio runtime.
    pub fn on_obligation_written(&self, obligation_id: &str) {
        self.coordinator.schedule_bill_update(obligation_id);
    }

    /// Fire-and-forget hook called after a unit-fee write commits. Must run
    /// inside a tokio runtime.
    pub fn on_unit_fee_written(&self, unit_id: &str) {
        self.coordinator.schedule_unit_update(unit_id);
    }

    pub fn get_projection(
        &self,
        building_id: &str,
        start: NaiveDate,
        end: NaiveDate,
        group_by: GroupBy,
        force_refresh: bool,
    ) -> Result<ProjectionResponse> {
        validate_range(start, end)?;
        if self.store.building(building_id)?.is_none() {
            return Err(PipelineError::UnknownBuilding(building_id.to_string()));
        }

        let now = Utc::now().naive_utc();
        let cache_key = ProjectionCache::range_key(start, end);

        let hit = if force_refresh {
            None
        } else {
            self.cached_payload(building_id, &cache_key, now)
        };
        // A hit reports the time the payload was actually computed, so the
        // caller can judge freshness; only a miss reports the request time.
        let (payload, cached, generated_at) = match hit {
            Some((payload, created_at)) => (payload, true, created_at),
            None => (
                self.compute_and_cache(building_id, start, end, &cache_key, now)?,
                false,
                now,
            ),
        };

        Ok(ProjectionResponse {
            data: to_rows(&payload.monthly_data, group_by == GroupBy::Yearly),
            summary: payload.summary,
            meta: ProjectionMeta {
                cached,
                generated_at,
            },
        })
    }

    fn cached_payload(
        &self,
        building_id: &str,
        cache_key: &str,
        now: NaiveDateTime,
    ) -> Option<(ProjectionPayload, NaiveDateTime)> {
        let entry = match self.cache.get(building_id, cache_key, now) {
            Ok(entry) => entry?,
            Err(e) => {
                warn!("Cache read for building {building_id} failed: {e}; recomputing");
                return None;
            }
        };
        match serde_json::from_str(&entry.payload) {
            Ok(payload) => Some((payload, entry.created_at)),
            Err(e) => {
                warn!("Discarding undecodable cache payload for building {building_id}: {e}");
                None
            }
        }
    }

    fn compute_and_cache(
        &self,
        building_id: &str,
        start: NaiveDate,
        end: NaiveDate,
        cache_key: &str,
        now: NaiveDateTime,
    ) -> Result<ProjectionPayload> {
        let payload = self.calculator.compute(building_id, start, end)?;

        // Best effort: a failed cache write never fails the read.
        match serde_json::to_string(&payload) {
            Ok(raw) => {
                if let Err(e) = self.cache.put(building_id, cache_key, raw, now) {
                    warn!("Cache write for building {building_id} failed: {e}");
                }
            }
            Err(e) => warn!("Could not serialize projection for building {building_id}: {e}"),
        }

        Ok(payload)
    }

    /// Operator-triggered synchronous materialization. Unlike the cascade
    /// path, passing a one-off obligation here is a request error.
    pub fn generate_future_instances(&self, obligation_id: &str) -> Result<MaterializeOutcome> {
        let obligation = self
            .store
            .obligation(obligation_id)?
            .ok_or_else(|| PipelineError::UnknownObligation(obligation_id.to_string()))?;
        if obligation.payment_kind != PaymentKind::Recurrent {
            return Err(PipelineError::NotRecurrent(obligation_id.to_string()));
        }

        self.instantiator
            .materialize(&obligation, Utc::now().date_naive())
    }

    pub fn invalidate_cache(&self, building_id: &str) -> Result<usize> {
        self.cache.invalidate(building_id, Some("operator request"))
    }

    /// Invalidates and re-warms the cache with the default 12-month window
    /// starting at the current month.
    pub fn refresh_cache(&self, building_id: &str) -> Result<()> {
        self.cache.invalidate(building_id, Some("operator refresh"))?;

        let now = Utc::now().naive_utc();
        let today = now.date();
        let start = NaiveDate::from_ymd_opt(today.year(), today.month(), 1)
            .unwrap_or(today);
        let end = crate::utils::add_months(start, 12)
            .pred_opt()
            .unwrap_or(start);
        let cache_key = ProjectionCache::range_key(start, end);
        self.compute_and_cache(building_id, start, end, &cache_key, now)?;
        Ok(())
    }

    /// Removes expired cache entries and enforces the entry-count bound.
    /// Intended to run from a periodic background task.
    pub fn reap_cache(&self) -> Result<usize> {
        self.cache.reap(Utc::now().naive_utc())
    }

    pub fn scheduler_status(&self) -> SchedulerStatus {
        self.coordinator.status()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}
