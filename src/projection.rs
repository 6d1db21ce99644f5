use crate::error::Result;
use crate::schema::{Obligation, ScheduleRule, MONTHLY_FEES_CATEGORY};
use crate::store::DataStore;
use crate::utils::{month_starts_in_range, months_between, validate_range};
use chrono::{Datelike, NaiveDate};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Average weeks per calendar month, used to attribute weekly obligations.
const WEEKS_PER_MONTH: f64 = 4.33;

/// Maps a free-form business category onto the fixed expense taxonomy the
/// projection reports against.
pub fn expense_taxonomy_category(business_category: &str) -> &'static str {
    match business_category.to_ascii_lowercase().as_str() {
        "cleaning" | "maintenance" | "repairs" | "gardening" | "elevator" => "maintenance",
        "electricity" | "water" | "gas" | "heating" | "waste" => "utilities",
        "insurance" => "insurance",
        "administration" | "management" | "accounting" | "legal" => "administration",
        _ => "other",
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonthlyProjection {
    pub year: i32,
    pub month: u32,
    pub income: BTreeMap<String, f64>,
    pub expenses: BTreeMap<String, f64>,
    pub total_income: f64,
    pub total_expenses: f64,
    pub net_cash_flow: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionSummary {
    pub total_income: f64,
    pub total_expenses: f64,
    pub net_cash_flow: f64,
    pub average_monthly_income: f64,
    pub average_monthly_expenses: f64,
}

/// The cacheable computation result: the monthly series plus its summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionPayload {
    pub monthly_data: Vec<MonthlyProjection>,
    pub summary: ProjectionSummary,
}

/// One row of the externally served projection, monthly ("2025-03") or
/// yearly ("2025") depending on the requested grouping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionRow {
    pub period: String,
    pub total_income: f64,
    pub total_expenses: f64,
    pub net_cash_flow: f64,
}

/// Computes live, non-persisted income/expense projections for a building
/// directly from currently active sources, independent of the materialized
/// aggregate path.
pub struct ProjectionCalculator {
    store: Arc<dyn DataStore>,
}

impl ProjectionCalculator {
    pub fn new(store: Arc<dyn DataStore>) -> Self {
        Self { store }
    }

    pub fn compute(
        &self,
        building_id: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<ProjectionPayload> {
        validate_range(start, end)?;

        let obligations = self.store.active_recurring_obligations(building_id)?;
        let fees = self.store.active_unit_fees(building_id)?;
        debug!(
            "Projecting building {building_id} over [{start}, {end}] from \
             {} obligations and {} unit fees",
            obligations.len(),
            fees.len()
        );

        let fee_income: f64 = fees.iter().map(|f| f.monthly_fee).sum();

        let mut monthly_data = Vec::new();
        for month in month_starts_in_range(start, end) {
            let mut income = BTreeMap::new();
            let mut expenses: BTreeMap<String, f64> = BTreeMap::new();

            if fee_income > 0.0 {
                income.insert(MONTHLY_FEES_CATEGORY.to_string(), fee_income);
            }

            for obligation in &obligations {
                let amount = month_attributable_amount(obligation, month);
                if amount > 0.0 {
                    let category = expense_taxonomy_category(&obligation.category);
                    *expenses.entry(category.to_string()).or_insert(0.0) += amount;
                }
            }

            let total_income: f64 = income.values().sum();
            let total_expenses: f64 = expenses.values().sum();
            monthly_data.push(MonthlyProjection {
                year: month.year(),
                month: month.month(),
                income,
                expenses,
                total_income,
                total_expenses,
                net_cash_flow: total_income - total_expenses,
            });
        }

        let summary = summarize(&monthly_data);
        Ok(ProjectionPayload {
            monthly_data,
            summary,
        })
    }
}

/// The amount a recurring obligation contributes to one calendar month:
/// its full amount on months implied by the schedule rule, a weekly-rate
/// approximation for weekly rules, and nothing outside the obligation's
/// own [start, end] span.
fn month_attributable_amount(obligation: &Obligation, month: NaiveDate) -> f64 {
    let elapsed = months_between(obligation.start_date, month);
    if elapsed < 0 {
        return 0.0;
    }
    if let Some(end) = obligation.end_date {
        if months_between(month, end) < 0 {
            return 0.0;
        }
    }

    match obligation.schedule_rule {
        Some(ScheduleRule::Monthly) => obligation.total_amount,
        Some(ScheduleRule::Quarterly) => {
            if elapsed % 3 == 0 {
                obligation.total_amount
            } else {
                0.0
            }
        }
        Some(ScheduleRule::Yearly) => {
            if month.month() == obligation.start_date.month() {
                obligation.total_amount
            } else {
                0.0
            }
        }
        Some(ScheduleRule::Weekly) => obligation.total_amount * WEEKS_PER_MONTH,
        Some(ScheduleRule::Custom) => {
            let matches = obligation
                .custom_dates
                .as_deref()
                .unwrap_or(&[])
                .iter()
                .filter(|d| d.month() == month.month())
                .count();
            obligation.total_amount * matches as f64
        }
        None => 0.0,
    }
}

fn summarize(monthly_data: &[MonthlyProjection]) -> ProjectionSummary {
    let months = monthly_data.len().max(1) as f64;
    let total_income: f64 = monthly_data.iter().map(|m| m.total_income).sum();
    let total_expenses: f64 = monthly_data.iter().map(|m| m.total_expenses).sum();

    ProjectionSummary {
        total_income,
        total_expenses,
        net_cash_flow: total_income - total_expenses,
        average_monthly_income: total_income / months,
        average_monthly_expenses: total_expenses / months,
    }
}

/// Collapses the monthly series into the externally served rows, either one
/// row per month or one per year.
pub fn to_rows(monthly_data: &[MonthlyProjection], yearly: bool) -> Vec<ProjectionRow> {
    if !yearly {
        return monthly_data
            .iter()
            .map(|m| ProjectionRow {
                period: format!("{:04}-{:02}", m.year, m.month),
                total_income: m.total_income,
                total_expenses: m.total_expenses,
                net_cash_flow: m.net_cash_flow,
            })
            .collect();
    }

    let mut by_year: BTreeMap<i32, (f64, f64)> = BTreeMap::new();
    for m in monthly_data {
        let entry = by_year.entry(m.year).or_insert((0.0, 0.0));
        entry.0 += m.total_income;
        entry.1 += m.total_expenses;
    }

    by_year
        .into_iter()
        .map(|(year, (income, expenses))| ProjectionRow {
            period: format!("{year:04}"),
            total_income: income,
            total_expenses: expenses,
            net_cash_flow: income - expenses,
        })
        .collect()
}
