use crate::error::{PipelineError, Result};
use crate::schema::{
    Building, LedgerEntry, MonthlyAggregateEntry, Obligation, ProjectionCacheEntry, UnitFeeRecord,
};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::RwLock;

/// Persistence seam to the surrounding relational store. The pipeline only
/// ever talks to this trait; the HTTP/CRUD layers own the real backend.
pub trait DataStore: Send + Sync {
    fn building(&self, id: &str) -> Result<Option<Building>>;
    fn upsert_building(&self, building: Building) -> Result<()>;

    fn obligation(&self, id: &str) -> Result<Option<Obligation>>;
    fn upsert_obligation(&self, obligation: Obligation) -> Result<()>;
    /// Recurring parents for a building that are not cancelled and not
    /// themselves generated instances.
    fn active_recurring_obligations(&self, building_id: &str) -> Result<Vec<Obligation>>;
    /// Generated instances pointing at the given parent.
    fn instances_of(&self, parent_id: &str) -> Result<Vec<Obligation>>;
    fn insert_obligations(&self, batch: &[Obligation]) -> Result<usize>;

    fn unit_fee_for_unit(&self, unit_id: &str) -> Result<Option<UnitFeeRecord>>;
    fn upsert_unit_fee(&self, fee: UnitFeeRecord) -> Result<()>;
    fn active_unit_fees(&self, building_id: &str) -> Result<Vec<UnitFeeRecord>>;

    fn ledger_entries(
        &self,
        building_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<LedgerEntry>>;
    fn insert_ledger_entries(&self, batch: &[LedgerEntry]) -> Result<usize>;
    fn delete_ledger_entries_for_source(&self, source_ref: &str) -> Result<usize>;

    fn aggregates_for(&self, building_id: &str) -> Result<Vec<MonthlyAggregateEntry>>;
    fn delete_aggregates(&self, building_id: &str) -> Result<usize>;
    fn insert_aggregates(&self, batch: &[MonthlyAggregateEntry]) -> Result<usize>;

    fn cache_entry(
        &self,
        building_id: &str,
        cache_key: &str,
    ) -> Result<Option<ProjectionCacheEntry>>;
    fn put_cache_entry(&self, entry: ProjectionCacheEntry) -> Result<()>;
    fn delete_cache_entry(&self, building_id: &str, cache_key: &str) -> Result<bool>;
    fn delete_cache_entries_for_building(&self, building_id: &str) -> Result<usize>;
    fn cache_entries(&self) -> Result<Vec<ProjectionCacheEntry>>;
}

#[derive(Default)]
struct Tables {
    buildings: BTreeMap<String, Building>,
    obligations: BTreeMap<String, Obligation>,
    unit_fees: BTreeMap<String, UnitFeeRecord>,
    ledger: BTreeMap<String, LedgerEntry>,
    aggregates: Vec<MonthlyAggregateEntry>,
    cache: BTreeMap<(String, String), ProjectionCacheEntry>,
}

/// In-memory backend for tests and embedded use.
pub struct MemoryStore {
    tables: RwLock<Tables>,
    fail_cache_writes: AtomicBool,
    obligation_batches_before_failure: AtomicUsize,
    aggregate_rebuilds: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self {
            tables: RwLock::new(Tables::default()),
            fail_cache_writes: AtomicBool::new(false),
            obligation_batches_before_failure: AtomicUsize::new(usize::MAX),
            aggregate_rebuilds: AtomicUsize::new(0),
        }
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every subsequent cache write fail, for exercising the
    /// best-effort write path.
    pub fn fail_cache_writes(&self, fail: bool) {
        self.fail_cache_writes.store(fail, Ordering::SeqCst);
    }

    /// Makes obligation batch inserts fail after the first `batches`
    /// successful ones, for exercising the warn-and-continue insert path.
    pub fn fail_obligation_inserts_after(&self, batches: usize) {
        self.obligation_batches_before_failure
            .store(batches, Ordering::SeqCst);
    }

    /// How many times the aggregates for any building were torn down.
    /// Each recompute cascade tears down exactly once, which makes this a
    /// usable execution counter in coalescing tests.
    pub fn aggregate_rebuilds(&self) -> usize {
        self.aggregate_rebuilds.load(Ordering::SeqCst)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, Tables> {
        self.tables.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, Tables> {
        self.tables.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl DataStore for MemoryStore {
    fn building(&self, id: &str) -> Result<Option<Building>> {
        Ok(self.read().buildings.get(id).cloned())
    }

    fn upsert_building(&self, building: Building) -> Result<()> {
        self.write().buildings.insert(building.id.clone(), building);
        Ok(())
    }

    fn obligation(&self, id: &str) -> Result<Option<Obligation>> {
        Ok(self.read().obligations.get(id).cloned())
    }

    fn upsert_obligation(&self, obligation: Obligation) -> Result<()> {
        self.write()
            .obligations
            .insert(obligation.id.clone(), obligation);
        Ok(())
    }

    fn active_recurring_obligations(&self, building_id: &str) -> Result<Vec<Obligation>> {
        Ok(self
            .read()
            .obligations
            .values()
            .filter(|o| o.building_id == building_id && o.is_active_recurring())
            .cloned()
            .collect())
    }

    fn instances_of(&self, parent_id: &str) -> Result<Vec<Obligation>> {
        Ok(self
            .read()
            .obligations
            .values()
            .filter(|o| o.parent_reference.as_deref() == Some(parent_id))
            .cloned()
            .collect())
    }

    fn insert_obligations(&self, batch: &[Obligation]) -> Result<usize> {
        if self
            .obligation_batches_before_failure
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_err()
        {
            return Err(PipelineError::StoreError(
                "obligation insert rejected".to_string(),
            ));
        }
        let mut tables = self.write();
        for obligation in batch {
            tables
                .obligations
                .insert(obligation.id.clone(), obligation.clone());
        }
        Ok(batch.len())
    }

    fn unit_fee_for_unit(&self, unit_id: &str) -> Result<Option<UnitFeeRecord>> {
        Ok(self
            .read()
            .unit_fees
            .values()
            .find(|f| f.unit_id == unit_id)
            .cloned())
    }

    fn upsert_unit_fee(&self, fee: UnitFeeRecord) -> Result<()> {
        self.write().unit_fees.insert(fee.id.clone(), fee);
        Ok(())
    }

    fn active_unit_fees(&self, building_id: &str) -> Result<Vec<UnitFeeRecord>> {
        Ok(self
            .read()
            .unit_fees
            .values()
            .filter(|f| f.building_id == building_id && f.active)
            .cloned()
            .collect())
    }

    fn ledger_entries(
        &self,
        building_id: &str,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<LedgerEntry>> {
        Ok(self
            .read()
            .ledger
            .values()
            .filter(|e| e.building_id == building_id && e.date >= from && e.date <= to)
            .cloned()
            .collect())
    }

    fn insert_ledger_entries(&self, batch: &[LedgerEntry]) -> Result<usize> {
        let mut tables = self.write();
        for entry in batch {
            tables.ledger.insert(entry.id.clone(), entry.clone());
        }
        Ok(batch.len())
    }

    fn delete_ledger_entries_for_source(&self, source_ref: &str) -> Result<usize> {
        let mut tables = self.write();
        let before = tables.ledger.len();
        tables
            .ledger
            .retain(|_, e| e.source_ref.as_deref() != Some(source_ref));
        Ok(before - tables.ledger.len())
    }

    fn aggregates_for(&self, building_id: &str) -> Result<Vec<MonthlyAggregateEntry>> {
        Ok(self
            .read()
            .aggregates
            .iter()
            .filter(|a| a.building_id == building_id)
            .cloned()
            .collect())
    }

    fn delete_aggregates(&self, building_id: &str) -> Result<usize> {
        self.aggregate_rebuilds.fetch_add(1, Ordering::SeqCst);
        let mut tables = self.write();
        let before = tables.aggregates.len();
        tables.aggregates.retain(|a| a.building_id != building_id);
        Ok(before - tables.aggregates.len())
    }

    fn insert_aggregates(&self, batch: &[MonthlyAggregateEntry]) -> Result<usize> {
        self.write().aggregates.extend_from_slice(batch);
        Ok(batch.len())
    }

    fn cache_entry(
        &self,
        building_id: &str,
        cache_key: &str,
    ) -> Result<Option<ProjectionCacheEntry>> {
        Ok(self
            .read()
            .cache
            .get(&(building_id.to_string(), cache_key.to_string()))
            .cloned())
    }

    fn put_cache_entry(&self, entry: ProjectionCacheEntry) -> Result<()> {
        if self.fail_cache_writes.load(Ordering::SeqCst) {
            return Err(PipelineError::StoreError(
                "cache write rejected".to_string(),
            ));
        }
        self.write()
            .cache
            .insert((entry.building_id.clone(), entry.cache_key.clone()), entry);
        Ok(())
    }

    fn delete_cache_entry(&self, building_id: &str, cache_key: &str) -> Result<bool> {
        Ok(self
            .write()
            .cache
            .remove(&(building_id.to_string(), cache_key.to_string()))
            .is_some())
    }

    fn delete_cache_entries_for_building(&self, building_id: &str) -> Result<usize> {
        let mut tables = self.write();
        let before = tables.cache.len();
        tables.cache.retain(|(b, _), _| b != building_id);
        Ok(before - tables.cache.len())
    }

    fn cache_entries(&self) -> Result<Vec<ProjectionCacheEntry>> {
        Ok(self.read().cache.values().cloned().collect())
    }
}
