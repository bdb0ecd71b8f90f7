//! Error types for panel construction and merging.
//!
//! Every variant here is fatal: the panel layer refuses ambiguous or
//! malformed input rather than guessing (duplicate keys are never resolved
//! by "keep first", granularity mismatches are never silently resampled).

use thiserror::Error;

/// Result type for panel operations.
pub type Result<T> = std::result::Result<T, SchemaError>;

/// Errors raised while constructing or combining panel tables.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The same (entity_id, time_id) key appears more than once.
    #[error("duplicate key: entity {entity} at {time} appears {count} times")]
    DuplicateKey {
        /// Entity id of the offending key.
        entity: String,
        /// Month of the offending key, formatted YYYY-MM.
        time: String,
        /// Number of rows sharing the key.
        count: usize,
    },

    /// A required column is absent from the input frame.
    #[error("missing required column: {0}")]
    MissingColumn(String),

    /// A value column has a non-numeric dtype.
    #[error("column {column} has non-numeric dtype {dtype}")]
    NonNumericColumn {
        /// The offending column name.
        column: String,
        /// The dtype polars reported.
        dtype: String,
    },

    /// Two tables being merged share a non-key column name.
    #[error("column {0} exists on both sides of a merge; alias it explicitly")]
    ColumnOverlap(String),

    /// Tables with different time granularities cannot be merged.
    #[error("granularity mismatch: {left} vs {right}; aggregate explicitly before merging")]
    GranularityMismatch {
        /// Granularity of the left table.
        left: String,
        /// Granularity of the right table.
        right: String,
    },

    /// A key column contains a null value.
    #[error("null key in column {column} at row {row}")]
    NullKey {
        /// The key column containing the null.
        column: String,
        /// Zero-based row index of the first null.
        row: usize,
    },

    /// A calendar month outside 1..=12, or a similar invalid time key.
    #[error("invalid month: year {year}, month {month}")]
    InvalidMonth {
        /// The year component.
        year: i32,
        /// The (out of range) month component.
        month: u32,
    },

    /// An inclusive time range with start after end.
    #[error("invalid time range: {start} is after {end}")]
    InvalidTimeRange {
        /// Start of the requested range.
        start: String,
        /// End of the requested range.
        end: String,
    },

    /// An operation that only applies to one granularity was called on another.
    #[error("operation {op} requires {required} granularity, table is {actual}")]
    WrongGranularity {
        /// The operation that was refused.
        op: String,
        /// The granularity the operation requires.
        required: String,
        /// The table's actual granularity.
        actual: String,
    },

    /// Underlying polars error.
    #[error("polars error: {0}")]
    Polars(#[from] polars::prelude::PolarsError),
}
