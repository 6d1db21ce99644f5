use crate::config::PipelineConfig;
use crate::error::Result;
use crate::expander::{expand_occurrences, split_payment};
use crate::schema::{
    FlowDirection, LedgerEntry, Obligation, PaymentKind, UnitFeeRecord, MONTHLY_FEES_CATEGORY,
};
use crate::store::DataStore;
use crate::utils::{add_years, month_starts_in_range};
use chrono::{Datelike, NaiveDate};
use log::debug;

/// Rebuilds the money-flow ledger entries derived from one bill: existing
/// entries for the bill are deleted, then re-derived from its current
/// schedule. A cancelled bill contributes nothing (delete only).
pub fn regenerate_for_bill(
    store: &dyn DataStore,
    obligation: &Obligation,
    today: NaiveDate,
    config: &PipelineConfig,
) -> Result<usize> {
    let removed = store.delete_ledger_entries_for_source(&obligation.id)?;
    debug!(
        "Removed {removed} ledger entries for bill {} before regeneration",
        obligation.id
    );

    if !obligation.status.is_active() {
        return Ok(0);
    }

    let occurrences = match (obligation.payment_kind, obligation.schedule_rule) {
        (PaymentKind::Recurrent, Some(rule)) => {
            let window_end = obligation
                .end_date
                .unwrap_or_else(|| add_years(today, config.projection_horizon_years));
            expand_occurrences(
                rule,
                obligation.custom_dates.as_deref(),
                obligation.start_date,
                window_end,
                config.occurrence_cap,
            )?
        }
        _ => vec![obligation.start_date],
    };

    let mut entries = Vec::new();
    for occurrence in occurrences {
        for part in split_payment(&obligation.costs, occurrence) {
            entries.push(LedgerEntry {
                id: format!(
                    "mf-{}-{}-{}",
                    obligation.id,
                    part.due_date.format("%Y%m%d"),
                    part.part_index
                ),
                building_id: obligation.building_id.clone(),
                date: part.due_date,
                category: obligation.category.clone(),
                direction: FlowDirection::Expense,
                amount: part.amount,
                source_ref: Some(obligation.id.clone()),
            });
        }
    }

    insert_batched(store, &entries, config)
}

/// Rebuilds the monthly-fee income entries derived from one unit fee over
/// the building's aggregation window. An inactive fee contributes nothing.
pub fn regenerate_for_unit_fee(
    store: &dyn DataStore,
    fee: &UnitFeeRecord,
    today: NaiveDate,
    config: &PipelineConfig,
) -> Result<usize> {
    let removed = store.delete_ledger_entries_for_source(&fee.id)?;
    debug!(
        "Removed {removed} ledger entries for unit fee {} before regeneration",
        fee.id
    );

    if !fee.active {
        return Ok(0);
    }

    let start_year = store
        .building(&fee.building_id)?
        .and_then(|b| b.construction_year)
        .unwrap_or_else(|| today.year());
    let window_start = NaiveDate::from_ymd_opt(start_year, 1, 1)
        .unwrap_or(today);
    let window_end = add_years(today, config.projection_horizon_years);

    let entries: Vec<LedgerEntry> = month_starts_in_range(window_start, window_end)
        .into_iter()
        .map(|month| LedgerEntry {
            id: format!("mf-{}-{}", fee.id, month.format("%Y%m")),
            building_id: fee.building_id.clone(),
            date: month,
            category: MONTHLY_FEES_CATEGORY.to_string(),
            direction: FlowDirection::Income,
            amount: fee.monthly_fee,
            source_ref: Some(fee.id.clone()),
        })
        .collect();

    insert_batched(store, &entries, config)
}

fn insert_batched(
    store: &dyn DataStore,
    entries: &[LedgerEntry],
    config: &PipelineConfig,
) -> Result<usize> {
    let mut created = 0;
    for batch in entries.chunks(config.insert_batch_size) {
        created += store.insert_ledger_entries(batch)?;
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Building, ObligationStatus, ScheduleRule};
    use crate::store::MemoryStore;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn bill(rule: Option<ScheduleRule>, end: Option<NaiveDate>) -> Obligation {
        Obligation {
            id: "bill-1".to_string(),
            building_id: "bld1".to_string(),
            bill_number: "B-001".to_string(),
            title: "Cleaning".to_string(),
            category: "cleaning".to_string(),
            costs: vec![300.0],
            total_amount: 300.0,
            payment_kind: if rule.is_some() {
                PaymentKind::Recurrent
            } else {
                PaymentKind::Unique
            },
            schedule_rule: rule,
            custom_dates: None,
            start_date: d(2025, 1, 1),
            end_date: end,
            status: ObligationStatus::Pending,
            auto_generated: false,
            parent_reference: None,
            notes: None,
        }
    }

    fn all_entries(store: &MemoryStore) -> Vec<LedgerEntry> {
        store
            .ledger_entries("bld1", d(1990, 1, 1), d(2099, 12, 31))
            .unwrap()
    }

    #[test]
    fn test_recurring_bill_entries_span_schedule() {
        let store = MemoryStore::new();
        let config = PipelineConfig::default();
        let bill = bill(Some(ScheduleRule::Monthly), Some(d(2025, 6, 1)));

        let created = regenerate_for_bill(&store, &bill, d(2025, 1, 15), &config).unwrap();
        assert_eq!(created, 6);

        let entries = all_entries(&store);
        assert!(entries.iter().all(|e| e.direction == FlowDirection::Expense));
        assert!(entries.iter().all(|e| e.amount == 300.0));
        assert!(entries
            .iter()
            .all(|e| e.source_ref.as_deref() == Some("bill-1")));
    }

    #[test]
    fn test_one_off_bill_yields_single_entry() {
        let store = MemoryStore::new();
        let config = PipelineConfig::default();

        let created = regenerate_for_bill(&store, &bill(None, None), d(2025, 1, 15), &config)
            .unwrap();
        assert_eq!(created, 1);
        assert_eq!(all_entries(&store)[0].date, d(2025, 1, 1));
    }

    #[test]
    fn test_regeneration_replaces_not_appends() {
        let store = MemoryStore::new();
        let config = PipelineConfig::default();
        let mut bill = bill(Some(ScheduleRule::Monthly), Some(d(2025, 6, 1)));

        regenerate_for_bill(&store, &bill, d(2025, 1, 15), &config).unwrap();
        assert_eq!(all_entries(&store).len(), 6);

        bill.end_date = Some(d(2025, 3, 1));
        regenerate_for_bill(&store, &bill, d(2025, 1, 15), &config).unwrap();
        assert_eq!(all_entries(&store).len(), 3);
    }

    #[test]
    fn test_cancelled_bill_deletes_only() {
        let store = MemoryStore::new();
        let config = PipelineConfig::default();
        let mut bill = bill(Some(ScheduleRule::Monthly), Some(d(2025, 6, 1)));

        regenerate_for_bill(&store, &bill, d(2025, 1, 15), &config).unwrap();
        bill.status = ObligationStatus::Cancelled;
        let created = regenerate_for_bill(&store, &bill, d(2025, 1, 15), &config).unwrap();

        assert_eq!(created, 0);
        assert!(all_entries(&store).is_empty());
    }

    #[test]
    fn test_unit_fee_entries_cover_building_window() {
        let store = MemoryStore::new();
        let config = PipelineConfig::default();
        store
            .upsert_building(Building {
                id: "bld1".to_string(),
                name: "Riverside 12".to_string(),
                construction_year: Some(2024),
            })
            .unwrap();
        let fee = UnitFeeRecord {
            id: "fee-1".to_string(),
            building_id: "bld1".to_string(),
            unit_id: "unit-7".to_string(),
            monthly_fee: 450.0,
            active: true,
        };

        let created = regenerate_for_unit_fee(&store, &fee, d(2025, 3, 10), &config).unwrap();
        // 2024-01 through 2028-03 inclusive.
        assert_eq!(created, 51);

        let entries = all_entries(&store);
        assert!(entries.iter().all(|e| e.direction == FlowDirection::Income));
        assert!(entries.iter().all(|e| e.category == MONTHLY_FEES_CATEGORY));
    }

    #[test]
    fn test_inactive_fee_contributes_nothing() {
        let store = MemoryStore::new();
        let config = PipelineConfig::default();
        let fee = UnitFeeRecord {
            id: "fee-1".to_string(),
            building_id: "bld1".to_string(),
            unit_id: "unit-7".to_string(),
            monthly_fee: 450.0,
            active: false,
        };

        assert_eq!(
            regenerate_for_unit_fee(&store, &fee, d(2025, 3, 10), &config).unwrap(),
            0
        );
        assert!(all_entries(&store).is_empty());
    }
}
