use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::expander::{expand_occurrences, split_payment};
use crate::schema::{Obligation, ObligationStatus, PaymentKind};
use crate::store::DataStore;
use crate::utils::{add_years, month_name};
use chrono::{Datelike, NaiveDate};
use log::{debug, info, warn};
use serde::Serialize;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MaterializeOutcome {
    pub instances_created: usize,
    pub generated_until: Option<NaiveDate>,
}

impl MaterializeOutcome {
    fn nothing() -> Self {
        Self {
            instances_created: 0,
            generated_until: None,
        }
    }
}

/// Materializes a recurring obligation into concrete, independently payable
/// instance rows.
pub struct RecurringInstantiator {
    store: Arc<dyn DataStore>,
    config: PipelineConfig,
}

impl RecurringInstantiator {
    pub fn new(store: Arc<dyn DataStore>, config: PipelineConfig) -> Self {
        Self { store, config }
    }

    /// Generates future instances for one recurring obligation.
    ///
    /// The generation window is `[start_date + 1 year, end_date | today + 3
    /// years]`: the first year is assumed covered by manual entries. Any
    /// existing instance for this parent makes the whole run a no-op: prior
    /// generation is treated as authoritative, and extending `end_date` after
    /// the fact does not top the series up.
    pub fn materialize(
        &self,
        obligation: &Obligation,
        today: NaiveDate,
    ) -> Result<MaterializeOutcome> {
        if obligation.payment_kind != PaymentKind::Recurrent {
            debug!(
                "Obligation {} is not recurrent; skipping materialization",
                obligation.id
            );
            return Ok(MaterializeOutcome::nothing());
        }

        let rule = obligation.schedule_rule.ok_or_else(|| {
            PipelineError::InvalidScheduleRule(format!(
                "recurrent obligation {} has no schedule rule",
                obligation.id
            ))
        })?;

        let existing = self.store.instances_of(&obligation.id)?;
        if !existing.is_empty() {
            info!(
                "Obligation {} already has {} generated instances; skipping",
                obligation.id,
                existing.len()
            );
            return Ok(MaterializeOutcome::nothing());
        }

        let window_start = add_years(obligation.start_date, 1);
        let window_end = obligation
            .end_date
            .unwrap_or_else(|| add_years(today, self.config.projection_horizon_years));
        if window_end < window_start {
            debug!(
                "Obligation {} ends before its generation window opens; nothing to generate",
                obligation.id
            );
            return Ok(MaterializeOutcome::nothing());
        }

        // Stepping stays anchored at the series start so the phase of the
        // rule is preserved; the first year is filtered out afterwards.
        let occurrences = expand_occurrences(
            rule,
            obligation.custom_dates.as_deref(),
            obligation.start_date,
            window_end,
            self.config.occurrence_cap,
        )?;

        let mut instances = Vec::new();
        let mut generated_until = None;
        'occurrences: for occurrence in occurrences {
            if occurrence < window_start {
                continue;
            }
            let parts = split_payment(&obligation.costs, occurrence);
            let multi_part = parts.len() > 1;
            for part in parts {
                if instances.len() >= self.config.instance_cap {
                    warn!(
                        "Instance cap ({}) hit materializing obligation {}; \
                         stopping at {:?}",
                        self.config.instance_cap, obligation.id, generated_until
                    );
                    break 'occurrences;
                }
                instances.push(self.build_instance(obligation, occurrence, &part, multi_part));
                generated_until = generated_until.max(Some(part.due_date));
            }
        }

        let mut created = 0;
        for batch in instances.chunks(self.config.insert_batch_size) {
            match self.store.insert_obligations(batch) {
                Ok(n) => created += n,
                Err(e) => warn!(
                    "Batch insert of {} instances for obligation {} failed: {e}; \
                     continuing with remaining batches",
                    batch.len(),
                    obligation.id
                ),
            }
        }

        info!(
            "Materialized {} instances for obligation {} (through {:?})",
            created, obligation.id, generated_until
        );
        Ok(MaterializeOutcome {
            instances_created: created,
            generated_until,
        })
    }

    fn build_instance(
        &self,
        parent: &Obligation,
        occurrence: NaiveDate,
        part: &crate::expander::PaymentPart,
        multi_part: bool,
    ) -> Obligation {
        let part_suffix = if multi_part {
            format!("-{}", part.part_index + 1)
        } else {
            String::new()
        };

        Obligation {
            id: format!(
                "{}-{}-{}",
                parent.id,
                occurrence.format("%Y%m%d"),
                part.part_index
            ),
            building_id: parent.building_id.clone(),
            bill_number: format!(
                "{}-{:04}{:02}{}",
                parent.bill_number,
                occurrence.year(),
                occurrence.month(),
                part_suffix
            ),
            title: format!(
                "{} - {} {} (auto-generated)",
                parent.title,
                month_name(occurrence.month()),
                occurrence.year()
            ),
            category: parent.category.clone(),
            costs: vec![part.amount],
            total_amount: part.amount,
            // A generated instance is a plain one-off; it can never be
            // re-instantiated itself.
            payment_kind: PaymentKind::Unique,
            schedule_rule: None,
            custom_dates: None,
            start_date: part.due_date,
            end_date: None,
            status: ObligationStatus::Draft,
            auto_generated: true,
            parent_reference: Some(parent.id.clone()),
            notes: Some(format!(
                "Auto-generated from recurring bill {} ({})",
                parent.bill_number, parent.id
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::ScheduleRule;
    use crate::store::MemoryStore;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn recurring(costs: Vec<f64>, rule: ScheduleRule, end: Option<NaiveDate>) -> Obligation {
        let total = costs.iter().sum();
        Obligation {
            id: "bill-1".to_string(),
            building_id: "bld1".to_string(),
            bill_number: "B-2024-001".to_string(),
            title: "Elevator maintenance".to_string(),
            category: "maintenance".to_string(),
            costs,
            total_amount: total,
            payment_kind: PaymentKind::Recurrent,
            schedule_rule: Some(rule),
            custom_dates: None,
            start_date: d(2024, 1, 1),
            end_date: end,
            status: ObligationStatus::Pending,
            auto_generated: false,
            parent_reference: None,
            notes: None,
        }
    }

    fn instantiator(store: Arc<MemoryStore>) -> RecurringInstantiator {
        RecurringInstantiator::new(store, PipelineConfig::default())
    }

    #[test]
    fn test_skips_first_year() {
        let store = Arc::new(MemoryStore::new());
        let bill = recurring(vec![100.0], ScheduleRule::Monthly, Some(d(2025, 6, 1)));

        let outcome = instantiator(store.clone())
            .materialize(&bill, d(2024, 6, 1))
            .unwrap();

        // Window is [2025-01-01, 2025-06-01]: six monthly occurrences.
        assert_eq!(outcome.instances_created, 6);
        assert_eq!(outcome.generated_until, Some(d(2025, 6, 1)));

        let instances = store.instances_of("bill-1").unwrap();
        assert_eq!(instances.len(), 6);
        assert!(instances.iter().all(|i| i.start_date >= d(2025, 1, 1)));
        assert!(instances.iter().all(|i| i.auto_generated));
        assert!(instances
            .iter()
            .all(|i| i.payment_kind == PaymentKind::Unique));
    }

    #[test]
    fn test_open_ended_projects_three_years() {
        let store = Arc::new(MemoryStore::new());
        let bill = recurring(vec![100.0], ScheduleRule::Yearly, None);

        let outcome = instantiator(store)
            .materialize(&bill, d(2024, 1, 15))
            .unwrap();

        // Anniversaries 2025, 2026, 2027 fall inside [2025-01-01, 2027-01-15].
        assert_eq!(outcome.instances_created, 3);
        assert_eq!(outcome.generated_until, Some(d(2027, 1, 1)));
    }

    #[test]
    fn test_second_run_is_a_no_op() {
        let store = Arc::new(MemoryStore::new());
        let bill = recurring(vec![100.0], ScheduleRule::Monthly, Some(d(2025, 3, 1)));
        let instantiator = instantiator(store.clone());

        let first = instantiator.materialize(&bill, d(2024, 6, 1)).unwrap();
        assert!(first.instances_created > 0);

        let second = instantiator.materialize(&bill, d(2024, 6, 1)).unwrap();
        assert_eq!(second.instances_created, 0);
        assert_eq!(
            store.instances_of("bill-1").unwrap().len(),
            first.instances_created
        );
    }

    #[test]
    fn test_unique_obligation_is_a_no_op() {
        let store = Arc::new(MemoryStore::new());
        let mut bill = recurring(vec![100.0], ScheduleRule::Monthly, None);
        bill.payment_kind = PaymentKind::Unique;

        let outcome = instantiator(store.clone())
            .materialize(&bill, d(2024, 6, 1))
            .unwrap();
        assert_eq!(outcome, MaterializeOutcome::nothing());
        assert!(store.instances_of("bill-1").unwrap().is_empty());
    }

    #[test]
    fn test_missing_rule_is_rejected() {
        let store = Arc::new(MemoryStore::new());
        let mut bill = recurring(vec![100.0], ScheduleRule::Monthly, None);
        bill.schedule_rule = None;

        let result = instantiator(store).materialize(&bill, d(2024, 6, 1));
        assert!(matches!(result, Err(PipelineError::InvalidScheduleRule(_))));
    }

    #[test]
    fn test_multi_part_costs_stagger_and_suffix() {
        let store = Arc::new(MemoryStore::new());
        let bill = recurring(vec![600.0, 400.0], ScheduleRule::Yearly, Some(d(2025, 1, 1)));

        let outcome = instantiator(store.clone())
            .materialize(&bill, d(2024, 6, 1))
            .unwrap();
        assert_eq!(outcome.instances_created, 2);

        let mut instances = store.instances_of("bill-1").unwrap();
        instances.sort_by_key(|i| i.start_date);
        assert_eq!(instances[0].total_amount, 600.0);
        assert_eq!(instances[0].start_date, d(2025, 1, 1));
        assert!(instances[0].bill_number.ends_with("-202501-1"));
        assert_eq!(instances[1].total_amount, 400.0);
        assert_eq!(instances[1].start_date, d(2025, 2, 1));
        assert!(instances[1].bill_number.ends_with("-202501-2"));
    }

    #[test]
    fn test_instance_cap_bounds_generation() {
        let store = Arc::new(MemoryStore::new());
        let bill = recurring(vec![50.0], ScheduleRule::Weekly, None);
        let mut config = PipelineConfig::default();
        config.instance_cap = 20;

        let outcome = RecurringInstantiator::new(store, config)
            .materialize(&bill, d(2024, 6, 1))
            .unwrap();
        assert_eq!(outcome.instances_created, 20);
    }

    #[test]
    fn test_failed_batch_keeps_committed_batches() {
        let store = Arc::new(MemoryStore::new());
        // Weekly and open-ended: the window holds 126 occurrences, spanning
        // two insert batches of 100 and 26.
        let bill = recurring(vec![50.0], ScheduleRule::Weekly, None);
        store.fail_obligation_inserts_after(1);

        let outcome = instantiator(store.clone())
            .materialize(&bill, d(2024, 6, 1))
            .unwrap();

        // The second batch was rejected; the first survives and the count
        // reflects only committed rows.
        assert_eq!(outcome.instances_created, 100);
        assert_eq!(store.instances_of("bill-1").unwrap().len(), 100);
    }

    #[test]
    fn test_derived_fields() {
        let store = Arc::new(MemoryStore::new());
        let bill = recurring(vec![100.0], ScheduleRule::Yearly, Some(d(2025, 1, 1)));

        instantiator(store.clone())
            .materialize(&bill, d(2024, 6, 1))
            .unwrap();

        let instances = store.instances_of("bill-1").unwrap();
        assert_eq!(instances.len(), 1);
        let instance = &instances[0];
        assert_eq!(instance.bill_number, "B-2024-001-202501");
        assert_eq!(instance.title, "Elevator maintenance - January 2025 (auto-generated)");
        assert_eq!(instance.status, ObligationStatus::Draft);
        assert!(instance
            .notes
            .as_deref()
            .unwrap()
            .contains("B-2024-001"));
    }
}
