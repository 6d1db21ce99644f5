//! # Property Cashflow
//!
//! A deferred financial-recomputation pipeline: turns mutable source records
//! (recurring obligations and per-unit fee schedules) into time-bucketed
//! financial projections, avoiding redundant recomputation and serving
//! consistent, freshness-bounded results.
//!
//! ## Core Concepts
//!
//! - **Obligation**: a billable item, one-off or recurring, from which
//!   monthly expense projections are derived
//! - **Instance**: a concrete, independently payable materialization of one
//!   occurrence (and payment part) of a recurring obligation
//! - **Aggregate entry**: a precomputed, persisted monthly income/expense
//!   rollup for a building
//! - **Projection**: an on-demand, non-persisted monthly estimate computed
//!   from currently active sources
//! - **Cascade**: the ordered sequence instantiate → aggregate → invalidate
//!   triggered by a deferred recompute
//!
//! ## Example
//!
//! ```rust,ignore
//! use property_cashflow::*;
//! use chrono::NaiveDate;
//! use std::sync::Arc;
//!
//! let store = Arc::new(MemoryStore::new());
//! let service = CashflowService::new(store.clone(), PipelineConfig::default());
//!
//! // Called by the CRUD layer after a bill write commits; the cascade runs
//! // after the debounce delay.
//! service.on_obligation_written("bill-42");
//!
//! // The read path is independent and always serves.
//! let projection = service.get_projection(
//!     "building-7",
//!     NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
//!     NaiveDate::from_ymd_opt(2025, 12, 31).unwrap(),
//!     GroupBy::Monthly,
//!     false,
//! )?;
//! ```
//!
//! The pipeline is single-process: scheduling state lives in memory and two
//! coordinators against one store need an external lock.

pub mod aggregator;
pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod expander;
pub mod instantiator;
pub mod ledger;
pub mod projection;
pub mod schema;
pub mod service;
pub mod store;
pub mod utils;

pub use aggregator::{BudgetAggregator, DEFAULT_EXPENSE_CATEGORIES, DEFAULT_INCOME_CATEGORIES};
pub use cache::ProjectionCache;
pub use config::PipelineConfig;
pub use coordinator::{RecomputeCoordinator, SchedulerStatus, SourceKind};
pub use error::{PipelineError, Result};
pub use expander::{expand_occurrences, split_payment, PaymentPart};
pub use instantiator::{MaterializeOutcome, RecurringInstantiator};
pub use ledger::{regenerate_for_bill, regenerate_for_unit_fee};
pub use projection::{
    expense_taxonomy_category, to_rows, MonthlyProjection, ProjectionCalculator,
    ProjectionPayload, ProjectionRow, ProjectionSummary,
};
pub use schema::*;
pub use service::{CashflowService, GroupBy, ProjectionMeta, ProjectionResponse};
pub use store::{DataStore, MemoryStore};
