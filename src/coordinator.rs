use crate::aggregator::BudgetAggregator;
use crate::cache::ProjectionCache;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::instantiator::RecurringInstantiator;
use crate::ledger;
use crate::store::DataStore;
use chrono::Utc;
use log::{debug, error, info};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Bill,
    Unit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecomputeState {
    Scheduled,
    Executing,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct SchedulerStatus {
    pub delay_minutes: u64,
    pub pending_bills: usize,
    pub pending_units: usize,
}

/// Debounces "source changed" signals and runs the recompute cascade
/// (instantiate, regenerate ledger, aggregate, invalidate cache) after a
/// fixed delay. A burst of edits to the same entity inside the delay window
/// collapses to one run.
///
/// Scheduling state lives in process memory only: a restart drops pending
/// intents, and running two coordinators against the same store is not safe
/// without an external lock. Schedule calls must be made from within a
/// tokio runtime. The handle is cheap to clone; clones share one pending
/// set.
#[derive(Clone)]
pub struct RecomputeCoordinator {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn DataStore>,
    config: PipelineConfig,
    instantiator: RecurringInstantiator,
    aggregator: BudgetAggregator,
    cache: ProjectionCache,
    pending: Mutex<HashMap<(SourceKind, String), RecomputeState>>,
}

impl RecomputeCoordinator {
    pub fn new(store: Arc<dyn DataStore>, config: PipelineConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                instantiator: RecurringInstantiator::new(store.clone(), config.clone()),
                aggregator: BudgetAggregator::new(store.clone(), config.clone()),
                cache: ProjectionCache::new(store.clone(), config.clone()),
                store,
                config,
                pending: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn schedule_bill_update(&self, obligation_id: &str) {
        self.schedule(SourceKind::Bill, obligation_id);
    }

    pub fn schedule_unit_update(&self, unit_id: &str) {
        self.schedule(SourceKind::Unit, unit_id);
    }

    fn schedule(&self, kind: SourceKind, id: &str) {
        let key = (kind, id.to_string());
        {
            let mut pending = self.inner.pending.lock().unwrap_or_else(|e| e.into_inner());
            if pending.contains_key(&key) {
                debug!("Recompute for {kind:?} {id} already pending; coalescing");
                return;
            }
            pending.insert(key.clone(), RecomputeState::Scheduled);
        }

        info!(
            "Scheduled recompute for {kind:?} {id} in {}s",
            self.inner.config.debounce_delay_secs
        );
        let inner = Arc::clone(&self.inner);
        let delay = self.inner.config.debounce_delay();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.execute(key);
        });
    }

    /// Runs the cascade for one bill now, bypassing the delay and the dedup
    /// state. For operator and test use.
    pub fn force_immediate_bill_update(&self, obligation_id: &str) -> Result<()> {
        self.inner.run_cascade(SourceKind::Bill, obligation_id)
    }

    /// Runs the cascade for one unit now, bypassing the delay and the dedup
    /// state. For operator and test use.
    pub fn force_immediate_unit_update(&self, unit_id: &str) -> Result<()> {
        self.inner.run_cascade(SourceKind::Unit, unit_id)
    }

    pub fn status(&self) -> SchedulerStatus {
        let pending = self.inner.pending.lock().unwrap_or_else(|e| e.into_inner());
        SchedulerStatus {
            delay_minutes: self.inner.config.debounce_delay_secs / 60,
            pending_bills: pending.keys().filter(|(k, _)| *k == SourceKind::Bill).count(),
            pending_units: pending.keys().filter(|(k, _)| *k == SourceKind::Unit).count(),
        }
    }
}

impl Inner {
    fn execute(&self, key: (SourceKind, String)) {
        {
            let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
            pending.insert(key.clone(), RecomputeState::Executing);
        }

        let (kind, id) = &key;
        if let Err(e) = self.run_cascade(*kind, id) {
            // No automatic retry; the next source mutation (or a
            // force-immediate call) corrects a failed cascade.
            error!("Recompute cascade for {kind:?} {id} failed: {e}");
        }

        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&key);
    }

    fn run_cascade(&self, kind: SourceKind, id: &str) -> Result<()> {
        let today = Utc::now().date_naive();

        let building_id = match kind {
            SourceKind::Bill => {
                let obligation = self
                    .store
                    .obligation(id)?
                    .ok_or_else(|| PipelineError::UnknownObligation(id.to_string()))?;
                self.instantiator.materialize(&obligation, today)?;
                ledger::regenerate_for_bill(self.store.as_ref(), &obligation, today, &self.config)?;
                obligation.building_id
            }
            SourceKind::Unit => {
                let fee = self
                    .store
                    .unit_fee_for_unit(id)?
                    .ok_or_else(|| PipelineError::UnknownUnit(id.to_string()))?;
                ledger::regenerate_for_unit_fee(self.store.as_ref(), &fee, today, &self.config)?;
                fee.building_id
            }
        };

        self.aggregator.repopulate(&building_id, today)?;
        self.cache
            .invalidate(&building_id, Some("source recompute cascade"))?;

        info!("Recompute cascade complete for {kind:?} {id} (building {building_id})");
        Ok(())
    }
}
