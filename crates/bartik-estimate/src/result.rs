//! Estimation results.

use bartik_panel::CoverageReport;
use serde::{Deserialize, Serialize};

/// Two-sided 95% normal critical value used for confidence intervals.
pub const Z_95: f64 = 1.959_963_984_540_054;

/// One estimated coefficient with both variance flavors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoefficientEstimate {
    /// Regressor name.
    pub name: String,
    /// Point estimate.
    pub coefficient: f64,
    /// Cluster-robust standard error. What gets reported.
    pub std_error: f64,
    /// Homoskedastic standard error, labeled alternative only.
    pub naive_std_error: f64,
    /// Lower end of the 95% confidence interval (robust SE).
    pub ci_lower: f64,
    /// Upper end of the 95% confidence interval (robust SE).
    pub ci_upper: f64,
}

impl CoefficientEstimate {
    /// Build an estimate, deriving the CI from the robust SE.
    pub fn new(name: String, coefficient: f64, std_error: f64, naive_std_error: f64) -> Self {
        Self {
            name,
            coefficient,
            std_error,
            naive_std_error,
            ci_lower: coefficient - Z_95 * std_error,
            ci_upper: coefficient + Z_95 * std_error,
        }
    }
}

/// Whether an overidentification statistic could be computed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OveridStatus {
    /// A Sargan statistic with its p-value.
    Sargan {
        /// The test statistic, asymptotically chi-square.
        statistic: f64,
        /// Degrees of freedom (instruments minus endogenous regressors).
        df: usize,
        /// Upper-tail p-value.
        p_value: f64,
    },
    /// Not computable for this fit; the reason is always recorded.
    Unavailable {
        /// Why the statistic is missing (e.g. just-identified).
        reason: String,
    },
}

/// Per-fit diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Weak-instrument indicator: the (minimum) first-stage F statistic.
    /// `None` for OLS fits, which have no first stage, and for fits whose
    /// first-stage robust variance is too degenerate to invert.
    pub first_stage_f: Option<f64>,
    /// Overidentification check, or the reason it is unavailable.
    pub overid: OveridStatus,
    /// Alternating-projection sweeps used by the fixed-effects transform.
    pub fe_iterations: usize,
    /// Whether demeaning converged within its iteration budget.
    pub fe_converged: bool,
    /// Entity groups with one observation in the estimation sample.
    pub singleton_entity_groups: usize,
    /// Time groups with one observation in the estimation sample.
    pub singleton_time_groups: usize,
}

/// The output of one estimation unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EstimationResult {
    /// Estimated coefficients: endogenous regressors first, then controls.
    pub coefficients: Vec<CoefficientEstimate>,
    /// Complete-case sample size.
    pub n_obs: usize,
    /// Number of distinct clusters in the sample.
    pub n_clusters: usize,
    /// Fit diagnostics.
    pub diagnostics: Diagnostics,
    /// Coverage notes inherited from panel assembly plus this fit.
    pub coverage: CoverageReport,
}

impl EstimationResult {
    /// Look up a coefficient by regressor name.
    pub fn coefficient(&self, name: &str) -> Option<&CoefficientEstimate> {
        self.coefficients.iter().find(|c| c.name == name)
    }

    /// The leading coefficient (the first endogenous regressor for IV fits).
    pub fn primary(&self) -> Option<&CoefficientEstimate> {
        self.coefficients.first()
    }
}
