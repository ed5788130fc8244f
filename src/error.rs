//! Error taxonomy for the analytics engine.
//!
//! Configuration problems and store failures abort a computation and are
//! returned to the caller. Per-record input problems never abort anything;
//! they are recorded as [`InputDiagnostic`]s inside the result that skipped
//! the record. "Not enough data" is not an error at all and is surfaced via
//! `hasSufficientData` on the rollup.

use serde::Serialize;
use thiserror::Error;

// ---

/// Invalid analytics configuration. Always fatal for the computation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("glycemic thresholds out of order: {0}")]
    ThresholdOrder(String),

    #[error("{name} must be positive, got {value}")]
    NonPositive { name: &'static str, value: f64 },

    #[error("exponential curve peak {peak} min must be below half of the {end} min action window")]
    PeakTooLate { peak: f64, end: f64 },

    #[error("invalid rollup period list: {0}")]
    Periods(String),

    #[error("unknown insulin curve '{0}' (expected 'bilinear' or 'exponential')")]
    UnknownCurve(String),
}

/// Failure reported by the store collaborator. Propagated unchanged.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("stored document for {what} could not be decoded: {source}")]
    Decode {
        what: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{what} could not be encoded for storage: {source}")]
    Encode {
        what: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Top-level error for analytics computations.
#[derive(Debug, Error)]
pub enum AnalyticsError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("upstream fetch failed: {0}")]
    Upstream(#[from] StoreError),

    #[error("computation cancelled before data was fetched")]
    Cancelled,
}

/// Problem with a single input record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InputError {
    #[error("record has no timestamp")]
    MissingTimestamp,

    #[error("unparseable timestamp '{0}'")]
    MalformedTimestamp(String),
}

/// Non-fatal record of a skipped input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InputDiagnostic {
    /// Position of the record in the input slice.
    pub index: usize,
    /// Record identifier when one was present.
    pub id: Option<String>,
    pub reason: String,
}

impl InputDiagnostic {
    pub fn new(index: usize, id: Option<&str>, err: &InputError) -> Self {
        // ---
        Self {
            index,
            id: id.map(str::to_owned),
            reason: err.to_string(),
        }
    }
}
