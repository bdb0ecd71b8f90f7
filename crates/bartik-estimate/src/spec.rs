//! Regression specifications.
//!
//! A `RegressionSpec` is a plain value object naming the columns of one
//! estimation. Robustness variants are different specs over the same panel,
//! not different code paths; the local-projection runner reapplies one spec
//! to horizon-shifted outcomes.

use crate::fixed_effects::FeSpec;
use serde::{Deserialize, Serialize};

/// Column names and fixed-effect choice for one regression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegressionSpec {
    /// Outcome column.
    pub outcome: String,
    /// Endogenous regressor column(s). Empty for reduced-form OLS runs.
    #[serde(default)]
    pub endogenous: Vec<String>,
    /// Instrument column(s); must be at least as many as endogenous columns.
    #[serde(default)]
    pub instruments: Vec<String>,
    /// Exogenous control columns.
    #[serde(default)]
    pub controls: Vec<String>,
    /// Fixed effects to absorb.
    pub fixed_effects: FeSpec,
    /// Column supplying cluster labels (commonly `entity_id`).
    pub cluster: String,
}

impl RegressionSpec {
    /// The same spec pointed at a different outcome column.
    ///
    /// This is what drives the local-projection loop: one spec, reapplied
    /// to each horizon-shifted outcome.
    pub fn with_outcome(&self, outcome: impl Into<String>) -> Self {
        Self {
            outcome: outcome.into(),
            ..self.clone()
        }
    }

    /// Every column the spec references, deduplicated, in usage order.
    pub fn columns(&self) -> Vec<&str> {
        let mut seen = Vec::new();
        let all = std::iter::once(self.outcome.as_str())
            .chain(self.endogenous.iter().map(String::as_str))
            .chain(self.instruments.iter().map(String::as_str))
            .chain(self.controls.iter().map(String::as_str));
        for name in all {
            if !seen.contains(&name) {
                seen.push(name);
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> RegressionSpec {
        RegressionSpec {
            outcome: "y".to_string(),
            endogenous: vec!["rate".to_string()],
            instruments: vec!["instrument".to_string()],
            controls: vec!["income".to_string()],
            fixed_effects: FeSpec::TwoWay,
            cluster: "entity_id".to_string(),
        }
    }

    #[test]
    fn test_with_outcome_keeps_everything_else() {
        let shifted = spec().with_outcome("y_lead3");
        assert_eq!(shifted.outcome, "y_lead3");
        assert_eq!(shifted.endogenous, spec().endogenous);
        assert_eq!(shifted.cluster, spec().cluster);
    }

    #[test]
    fn test_columns_deduplicated_in_order() {
        let mut s = spec();
        s.controls.push("rate".to_string()); // duplicate on purpose
        assert_eq!(s.columns(), vec!["y", "rate", "instrument", "income"]);
    }

    #[test]
    fn test_serde_round_trip() {
        let s = spec();
        let json = serde_json::to_string(&s).unwrap();
        let back: RegressionSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }
}
