//! Instrument-construction errors.

use thiserror::Error;

/// Result type for instrument construction.
pub type Result<T> = std::result::Result<T, InstrumentError>;

/// Errors raised while building exposures, shocks, or the instrument panel.
#[derive(Debug, Error)]
pub enum InstrumentError {
    /// A category weight observation carries a negative value.
    #[error("negative weight for entity {entity}, category {category}: {value}")]
    NegativeWeight {
        /// Entity whose observation is invalid.
        entity: String,
        /// Category index of the observation.
        category: usize,
        /// The offending value.
        value: f64,
    },

    /// A category index is outside the configured bucket range.
    #[error("category {category} out of range: {n_categories} categories configured")]
    CategoryOutOfRange {
        /// The offending category index.
        category: usize,
        /// Number of configured categories.
        n_categories: usize,
    },

    /// No entity has any observation inside the reference window.
    #[error("no weight observations fall inside the reference window")]
    EmptyWindow,

    /// Too few entities with non-zero weights to fit a principal component.
    #[error("too few entities for PCA: {n} with non-zero weights, need at least 2")]
    TooFewEntities {
        /// Number of entities with non-zero weight rows.
        n: usize,
    },

    /// Fewer than two weight categories configured.
    #[error("too few categories: {k}, need at least 2")]
    TooFewCategories {
        /// Configured category count.
        k: usize,
    },

    /// A matrix operation received incompatible shapes.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Actual dimension.
        actual: usize,
    },

    /// The outcome and control series share no observed months.
    #[error("series share no observed months")]
    NoOverlap,

    /// Too few overlapping observations for the shock regression.
    #[error("too few overlapping observations for the shock regression: {n}, need at least 3")]
    TooFewObservations {
        /// Number of overlapping months.
        n: usize,
    },

    /// The control series is constant over the joint range.
    #[error("control series has no variation over the joint range")]
    NoVariation,

    /// A panel-construction failure while assembling the instrument table.
    #[error(transparent)]
    Schema(#[from] bartik_panel::SchemaError),
}
