//! Estimation errors.
//!
//! Everything here is fatal for one estimation unit (one horizon, one spec
//! variant) and nothing more: the local-projection runner converts these
//! into failed table entries and keeps going.

use thiserror::Error;

/// Result type for estimation operations.
pub type Result<T> = std::result::Result<T, EstimationError>;

/// Errors raised while fitting one regression.
#[derive(Debug, Error)]
pub enum EstimationError {
    /// Regressors are perfectly collinear after demeaning.
    #[error("collinear design: column {column} is linearly dependent after demeaning")]
    Collinear {
        /// Name of the offending regressor column.
        column: String,
    },

    /// Fewer complete observations than parameters.
    #[error("too few observations: {n_obs} rows for {n_params} parameters")]
    TooFewObservations {
        /// Complete-case sample size.
        n_obs: usize,
        /// Number of parameters to estimate.
        n_params: usize,
    },

    /// Fewer instruments than endogenous regressors.
    #[error("underidentified: {n_instruments} instruments for {n_endogenous} endogenous regressors")]
    Underidentified {
        /// Number of instrument columns.
        n_instruments: usize,
        /// Number of endogenous columns.
        n_endogenous: usize,
    },

    /// The cluster column takes a single value in the sample.
    #[error("single cluster: clustered variance is undefined with one cluster ({cluster})")]
    SingleCluster {
        /// The lone cluster label.
        cluster: String,
    },

    /// A column required by the spec has no variation after demeaning.
    #[error("no variation in column {column} after demeaning")]
    NoVariation {
        /// The offending column name.
        column: String,
    },

    /// The spec references a column absent from the panel.
    #[error(transparent)]
    Schema(#[from] bartik_panel::SchemaError),

    /// An internal numeric failure (non-finite values, shape mismatch).
    #[error("numeric failure: {0}")]
    Numeric(String),
}
