//! Fatal errors of a cross-matching run.

use thiserror::Error;

/// Everything that aborts a run.
///
/// Per-match edge cases (no candidates, scores below a threshold) are not errors; they simply
/// produce no match. Missing optional columns are not errors either, they are logged and
/// zero-filled.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CrossmatchError {
    /// A required column could not be found under any of the tried names.
    #[error("could not find column '{column}' (tried {tried:?})")]
    MissingColumn {
        /// Logical column name.
        column: String,
        /// Every physical name that was looked up.
        tried: Vec<String>,
    },
    /// Two records of the same catalog share an id.
    #[error("duplicate source id '{0}'")]
    DuplicateId(String),
    /// A column does not have one value per row.
    #[error("column '{column}' has {found} rows, expected {expected}")]
    ColumnLength {
        /// Physical column name.
        column: String,
        /// Number of ids in the table.
        expected: usize,
        /// Number of values in the column.
        found: usize,
    },
    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Not enough confirmed matches to model the positional offsets.
    #[error(
        "cannot model offsets from {found} match(es), at least {required} required; \
         consider relaxing the confidence thresholds or checking column units"
    )]
    TooFewMatches {
        /// Matches available.
        found: usize,
        /// Matches required.
        required: usize,
    },
    /// Not enough high signal-to-noise pairs to fit the flux correction surface.
    #[error("flux model needs at least {required} high-SNR matches, found {found}")]
    InsufficientFluxSamples {
        /// Usable samples.
        found: usize,
        /// Samples required for the polynomial degree.
        required: usize,
    },
    /// A surface could not be fit, e.g. because its linear system is singular.
    #[error("model fit failed: {0}")]
    ModelFit(&'static str),
}
