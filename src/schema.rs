use chrono::{NaiveDate, NaiveDateTime};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub type BuildingId = String;
pub type EntityId = String;
pub type UnitId = String;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum PaymentKind {
    #[schemars(description = "A one-off bill paid once. Never participates in instantiation.")]
    Unique,

    #[schemars(
        description = "A repeating bill series. Future payable instances are materialized from it."
    )]
    Recurrent,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleRule {
    #[schemars(description = "Due every 7 days from the start date")]
    Weekly,

    #[schemars(description = "Due every calendar month from the start date")]
    Monthly,

    #[schemars(description = "Due every 3 calendar months from the start date")]
    Quarterly,

    #[schemars(description = "Due once a year on the start date's anniversary")]
    Yearly,

    #[schemars(
        description = "Due on an explicit list of dates, repeated every year by substituting the year"
    )]
    Custom,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ObligationStatus {
    Draft,
    Pending,
    Paid,
    Cancelled,
}

impl ObligationStatus {
    /// Cancelled obligations are excluded from projections and ledger regeneration.
    pub fn is_active(self) -> bool {
        self != Self::Cancelled
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FlowDirection {
    Income,
    Expense,
}

/// Income category for regenerated unit-fee entries and fee projections.
pub const MONTHLY_FEES_CATEGORY: &str = "monthly_fees";

/// One billable item. Recurring parents and their generated instances share
/// this shape: an instance is distinguished by `auto_generated = true` and a
/// populated `parent_reference`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Obligation {
    pub id: EntityId,
    pub building_id: BuildingId,

    #[schemars(description = "Human-facing bill number, e.g. 'B-2024-017'")]
    pub bill_number: String,

    pub title: String,

    #[schemars(description = "Business category, e.g. 'cleaning', 'electricity', 'insurance'")]
    pub category: String,

    #[schemars(
        description = "Ordered payment amounts. A single value is due on the occurrence date; \
                       additional values are due one further month out each (part i is due at \
                       occurrence + i months)."
    )]
    pub costs: Vec<f64>,

    pub total_amount: f64,
    pub payment_kind: PaymentKind,

    #[schemars(description = "Required for recurrent obligations, absent for one-offs")]
    pub schedule_rule: Option<ScheduleRule>,

    #[schemars(description = "Configured dates for the custom schedule rule")]
    pub custom_dates: Option<Vec<NaiveDate>>,

    pub start_date: NaiveDate,

    #[schemars(description = "Open-ended series when absent")]
    pub end_date: Option<NaiveDate>,

    pub status: ObligationStatus,

    pub auto_generated: bool,

    #[schemars(description = "Set only on materialized instances; points at the parent series")]
    pub parent_reference: Option<EntityId>,

    pub notes: Option<String>,
}

impl Obligation {
    /// A live recurring parent: recurrent kind, not cancelled, not itself a
    /// materialized instance.
    pub fn is_active_recurring(&self) -> bool {
        self.payment_kind == PaymentKind::Recurrent
            && self.status.is_active()
            && !self.auto_generated
    }
}

/// Recurring monthly fee charged to one unit. Feeds projections directly and
/// is never materialized into obligation rows.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UnitFeeRecord {
    pub id: EntityId,
    pub building_id: BuildingId,
    pub unit_id: UnitId,
    pub monthly_fee: f64,
    pub active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Building {
    pub id: BuildingId,
    pub name: String,

    #[schemars(description = "Start of the aggregation window; the current year when absent")]
    pub construction_year: Option<i32>,
}

/// One money-flow row in the source ledger the aggregator scans.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct LedgerEntry {
    pub id: EntityId,
    pub building_id: BuildingId,
    pub date: NaiveDate,
    pub category: String,
    pub direction: FlowDirection,
    pub amount: f64,

    #[schemars(description = "The bill or unit fee this entry was regenerated from")]
    pub source_ref: Option<EntityId>,
}

/// Precomputed monthly rollup for one building. Categories and amounts are
/// parallel arrays; readers must preserve positional correspondence.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct MonthlyAggregateEntry {
    pub building_id: BuildingId,
    pub year: i32,
    pub month: u32,
    pub income_categories: Vec<String>,
    pub income_amounts: Vec<f64>,
    pub expense_categories: Vec<String>,
    pub expense_amounts: Vec<f64>,
    pub approved: bool,
}

/// One cached projection payload, keyed by building and date range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectionCacheEntry {
    pub building_id: BuildingId,
    pub cache_key: String,
    /// Opaque serialized projection payload.
    pub payload: String,
    pub created_at: NaiveDateTime,
    pub expires_at: NaiveDateTime,
}
