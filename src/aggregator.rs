use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::schema::{FlowDirection, MonthlyAggregateEntry, MONTHLY_FEES_CATEGORY};
use crate::store::DataStore;
use crate::utils::month_starts_in_range;
use chrono::{Datelike, NaiveDate};
use log::{info, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Shape fallback for a building whose ledger is still empty, so a fresh
/// building gets sane projection rows instead of none.
pub const DEFAULT_INCOME_CATEGORIES: &[&str] = &[MONTHLY_FEES_CATEGORY, "other_income"];
pub const DEFAULT_EXPENSE_CATEGORIES: &[&str] = &[
    "maintenance",
    "utilities",
    "insurance",
    "administration",
    "other",
];

/// Recomputes the persisted per-month category rollups for one building by
/// scanning its source ledger. Prior rows are deleted and fully replaced, so
/// categories that disappeared from the ledger cannot survive a run.
pub struct BudgetAggregator {
    store: Arc<dyn DataStore>,
    config: PipelineConfig,
}

impl BudgetAggregator {
    pub fn new(store: Arc<dyn DataStore>, config: PipelineConfig) -> Self {
        Self { store, config }
    }

    pub fn repopulate(&self, building_id: &str, today: NaiveDate) -> Result<usize> {
        let building = self
            .store
            .building(building_id)?
            .ok_or_else(|| PipelineError::UnknownBuilding(building_id.to_string()))?;

        let start_year = building.construction_year.unwrap_or_else(|| today.year());
        let window_start = NaiveDate::from_ymd_opt(start_year, 1, 1)
            .ok_or_else(|| PipelineError::DateError(format!("invalid start year {start_year}")))?;
        let end_year = today.year() + self.config.projection_horizon_years;
        let window_end = NaiveDate::from_ymd_opt(end_year, 12, 31)
            .ok_or_else(|| PipelineError::DateError(format!("invalid end year {end_year}")))?;

        let entries = self
            .store
            .ledger_entries(building_id, window_start, window_end)?;

        let mut income_categories: BTreeSet<String> = BTreeSet::new();
        let mut expense_categories: BTreeSet<String> = BTreeSet::new();
        // (year, month, category) -> summed amount, per direction.
        let mut income_sums: BTreeMap<(i32, u32, String), f64> = BTreeMap::new();
        let mut expense_sums: BTreeMap<(i32, u32, String), f64> = BTreeMap::new();

        for entry in &entries {
            let key = (entry.date.year(), entry.date.month(), entry.category.clone());
            match entry.direction {
                FlowDirection::Income => {
                    income_categories.insert(entry.category.clone());
                    *income_sums.entry(key).or_insert(0.0) += entry.amount;
                }
                FlowDirection::Expense => {
                    expense_categories.insert(entry.category.clone());
                    *expense_sums.entry(key).or_insert(0.0) += entry.amount;
                }
            }
        }

        let income_categories: Vec<String> = if income_categories.is_empty() {
            DEFAULT_INCOME_CATEGORIES.iter().map(|c| c.to_string()).collect()
        } else {
            income_categories.into_iter().collect()
        };
        let expense_categories: Vec<String> = if expense_categories.is_empty() {
            DEFAULT_EXPENSE_CATEGORIES.iter().map(|c| c.to_string()).collect()
        } else {
            expense_categories.into_iter().collect()
        };

        let mut rows = Vec::new();
        for month in month_starts_in_range(window_start, window_end) {
            if rows.len() >= self.config.aggregate_row_cap {
                warn!(
                    "Aggregate row cap ({}) hit for building {building_id}; \
                     window truncated at {month}",
                    self.config.aggregate_row_cap
                );
                break;
            }

            let (year, month) = (month.year(), month.month());
            let amounts_for = |sums: &BTreeMap<(i32, u32, String), f64>,
                              categories: &[String]| {
                categories
                    .iter()
                    .map(|c| {
                        sums.get(&(year, month, c.clone()))
                            .copied()
                            .unwrap_or(0.0)
                    })
                    .collect::<Vec<f64>>()
            };

            rows.push(MonthlyAggregateEntry {
                building_id: building_id.to_string(),
                year,
                month,
                income_amounts: amounts_for(&income_sums, &income_categories),
                income_categories: income_categories.clone(),
                expense_amounts: amounts_for(&expense_sums, &expense_categories),
                expense_categories: expense_categories.clone(),
                approved: false,
            });
        }

        let removed = self.store.delete_aggregates(building_id)?;
        let mut created = 0;
        for batch in rows.chunks(self.config.insert_batch_size) {
            created += self.store.insert_aggregates(batch)?;
        }

        info!(
            "Repopulated aggregates for building {building_id}: \
             {removed} rows removed, {created} rows written"
        );
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Building, LedgerEntry};
    use crate::store::MemoryStore;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn store_with_building(construction_year: Option<i32>) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_building(Building {
                id: "bld1".to_string(),
                name: "Riverside 12".to_string(),
                construction_year,
            })
            .unwrap();
        store
    }

    fn entry(id: &str, date: NaiveDate, category: &str, direction: FlowDirection, amount: f64) -> LedgerEntry {
        LedgerEntry {
            id: id.to_string(),
            building_id: "bld1".to_string(),
            date,
            category: category.to_string(),
            direction,
            amount,
            source_ref: None,
        }
    }

    #[test]
    fn test_sums_by_month_and_category() {
        let store = store_with_building(Some(2025));
        store
            .insert_ledger_entries(&[
                entry("l1", d(2025, 3, 1), "monthly_fees", FlowDirection::Income, 450.0),
                entry("l2", d(2025, 3, 15), "monthly_fees", FlowDirection::Income, 450.0),
                entry("l3", d(2025, 3, 5), "cleaning", FlowDirection::Expense, 300.0),
                entry("l4", d(2025, 4, 5), "cleaning", FlowDirection::Expense, 300.0),
            ])
            .unwrap();

        let aggregator = BudgetAggregator::new(store.clone(), PipelineConfig::default());
        aggregator.repopulate("bld1", d(2025, 6, 1)).unwrap();

        let rows = store.aggregates_for("bld1").unwrap();
        let march = rows.iter().find(|r| r.year == 2025 && r.month == 3).unwrap();
        assert_eq!(march.income_categories, vec!["monthly_fees"]);
        assert_eq!(march.income_amounts, vec![900.0]);
        assert_eq!(march.expense_categories, vec!["cleaning"]);
        assert_eq!(march.expense_amounts, vec![300.0]);

        let may = rows.iter().find(|r| r.year == 2025 && r.month == 5).unwrap();
        assert_eq!(may.income_amounts, vec![0.0]);
        assert_eq!(may.expense_amounts, vec![0.0]);
    }

    #[test]
    fn test_window_spans_construction_year_to_horizon() {
        let store = store_with_building(Some(2024));
        let aggregator = BudgetAggregator::new(store.clone(), PipelineConfig::default());

        let created = aggregator.repopulate("bld1", d(2025, 6, 1)).unwrap();
        // 2024 through 2028, every month.
        assert_eq!(created, 5 * 12);
    }

    #[test]
    fn test_empty_ledger_falls_back_to_default_categories() {
        let store = store_with_building(None);
        let aggregator = BudgetAggregator::new(store.clone(), PipelineConfig::default());
        aggregator.repopulate("bld1", d(2025, 6, 1)).unwrap();

        let rows = store.aggregates_for("bld1").unwrap();
        assert!(!rows.is_empty());
        assert_eq!(rows[0].income_categories, DEFAULT_INCOME_CATEGORIES);
        assert_eq!(rows[0].expense_categories, DEFAULT_EXPENSE_CATEGORIES);
        assert_eq!(rows[0].income_amounts.len(), rows[0].income_categories.len());
    }

    #[test]
    fn test_replace_not_merge() {
        let store = store_with_building(Some(2025));
        let aggregator = BudgetAggregator::new(store.clone(), PipelineConfig::default());

        let mut gardening = entry("l1", d(2025, 2, 1), "gardening", FlowDirection::Expense, 100.0);
        gardening.source_ref = Some("bill-g".to_string());
        store.insert_ledger_entries(&[gardening]).unwrap();
        aggregator.repopulate("bld1", d(2025, 6, 1)).unwrap();
        assert!(store
            .aggregates_for("bld1")
            .unwrap()
            .iter()
            .all(|r| r.expense_categories == vec!["gardening"]));

        // Swap the source category between runs; no stale category survives.
        store.delete_ledger_entries_for_source("bill-g").unwrap();
        store
            .insert_ledger_entries(&[entry(
                "l2",
                d(2025, 2, 1),
                "security",
                FlowDirection::Expense,
                80.0,
            )])
            .unwrap();
        aggregator.repopulate("bld1", d(2025, 6, 1)).unwrap();

        let rows = store.aggregates_for("bld1").unwrap();
        assert!(rows.iter().all(|r| r.expense_categories == vec!["security"]));
    }

    #[test]
    fn test_row_cap_truncates_window() {
        let store = store_with_building(Some(1990));
        let mut config = PipelineConfig::default();
        config.aggregate_row_cap = 24;

        let created = BudgetAggregator::new(store, config)
            .repopulate("bld1", d(2025, 6, 1))
            .unwrap();
        assert_eq!(created, 24);
    }

    #[test]
    fn test_unknown_building_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let aggregator = BudgetAggregator::new(store, PipelineConfig::default());
        assert!(matches!(
            aggregator.repopulate("nope", d(2025, 6, 1)),
            Err(PipelineError::UnknownBuilding(_))
        ));
    }
}
