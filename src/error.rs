use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Unknown building: {0}")]
    UnknownBuilding(String),

    #[error("Unknown obligation: {0}")]
    UnknownObligation(String),

    #[error("Unknown unit: {0}")]
    UnknownUnit(String),

    #[error("Obligation {0} is not recurrent and cannot be instantiated")]
    NotRecurrent(String),

    #[error("Invalid date range: start {start} is after end {end}")]
    InvalidDateRange {
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    },

    #[error("Invalid schedule rule: {0}")]
    InvalidScheduleRule(String),

    #[error("Date calculation error: {0}")]
    DateError(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
