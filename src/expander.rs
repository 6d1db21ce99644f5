use crate::error::{PipelineError, Result};
use crate::schema::ScheduleRule;
use crate::utils::{add_months, add_years, last_day_of_month};
use chrono::{Datelike, Days, NaiveDate};
use log::warn;

/// One payable part of a single occurrence. Multi-value cost lists split an
/// occurrence into staggered parts, one calendar month apart.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentPart {
    pub amount: f64,
    pub due_date: NaiveDate,
    pub part_index: usize,
}

/// Expands a recurrence rule into the ordered occurrence dates inside
/// [start, end], both bounds inclusive.
///
/// Custom rules repeat the configured dates every year of the window by
/// substituting the year. The occurrence cap aborts a runaway expansion:
/// the dates produced so far are returned and a warning is logged.
pub fn expand_occurrences(
    rule: ScheduleRule,
    custom_dates: Option<&[NaiveDate]>,
    start: NaiveDate,
    end: NaiveDate,
    cap: usize,
) -> Result<Vec<NaiveDate>> {
    if end < start {
        return Err(PipelineError::InvalidDateRange { start, end });
    }

    if rule == ScheduleRule::Custom {
        return expand_custom(custom_dates, start, end, cap);
    }

    let mut occurrences = Vec::new();
    let mut step = 0i32;
    loop {
        let occurrence = match rule {
            ScheduleRule::Weekly => start
                .checked_add_days(Days::new(7 * step as u64))
                .ok_or_else(|| {
                    PipelineError::DateError(format!("weekly step overflow from {start}"))
                })?,
            ScheduleRule::Monthly => add_months(start, step),
            ScheduleRule::Quarterly => add_months(start, 3 * step),
            ScheduleRule::Yearly => add_years(start, step),
            ScheduleRule::Custom => unreachable!(),
        };

        if occurrence > end {
            break;
        }
        if occurrences.len() >= cap {
            warn!(
                "Occurrence cap ({cap}) hit expanding {rule:?} schedule from {start}; \
                 aborting expansion"
            );
            break;
        }
        occurrences.push(occurrence);
        step += 1;
    }

    Ok(occurrences)
}

fn expand_custom(
    custom_dates: Option<&[NaiveDate]>,
    start: NaiveDate,
    end: NaiveDate,
    cap: usize,
) -> Result<Vec<NaiveDate>> {
    let dates = custom_dates.filter(|d| !d.is_empty()).ok_or_else(|| {
        PipelineError::InvalidScheduleRule(
            "custom schedule requires at least one configured date".to_string(),
        )
    })?;

    let mut occurrences = Vec::new();
    'years: for year in start.year()..=end.year() {
        for date in dates {
            // Feb 29 in a non-leap year lands on Feb 28.
            let day = date.day().min(last_day_of_month(year, date.month()));
            let occurrence = NaiveDate::from_ymd_opt(year, date.month(), day).ok_or_else(|| {
                PipelineError::DateError(format!("invalid custom date {date} in year {year}"))
            })?;

            if occurrence < start || occurrence > end {
                continue;
            }
            if occurrences.len() >= cap {
                warn!("Occurrence cap ({cap}) hit expanding custom schedule; aborting expansion");
                break 'years;
            }
            occurrences.push(occurrence);
        }
    }

    occurrences.sort();
    occurrences.dedup();
    Ok(occurrences)
}

/// Splits one occurrence into payment parts. A single-value cost list yields
/// one part due on the occurrence date; part i of a multi-value list is due
/// i months later, so `[600, 400]` means 600 due on the occurrence and 400
/// due one month after it.
pub fn split_payment(costs: &[f64], occurrence: NaiveDate) -> Vec<PaymentPart> {
    costs
        .iter()
        .enumerate()
        .map(|(part_index, &amount)| PaymentPart {
            amount,
            due_date: add_months(occurrence, part_index as i32),
            part_index,
        })
        .collect()
}
