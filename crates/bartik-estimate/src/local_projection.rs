//! Local projections: one IV fit per horizon.
//!
//! For horizon h the outcome is shifted forward h months within each entity
//! (`y_{t+h}`), rows past an entity's last observed month drop out as nulls,
//! and the same spec (instruments, controls, fixed effects, cluster)
//! is fit anchored at time t. Horizons share nothing but the read-only
//! panel, so they can run sequentially or in parallel with bit-identical
//! results, and a failure at one horizon never blocks the others.

use crate::error::EstimationError;
use crate::iv::IVEstimator;
use crate::result::EstimationResult;
use crate::spec::RegressionSpec;
use bartik_panel::PanelTable;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;

/// Outcome of one horizon: an estimate, or the reason it failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum HorizonEntry {
    /// The horizon estimated successfully.
    Estimate(EstimationResult),
    /// The horizon failed; the run continued without it.
    Failed {
        /// Why this horizon could not be estimated.
        reason: String,
    },
}

impl HorizonEntry {
    /// The estimate, if this horizon succeeded.
    pub const fn estimate(&self) -> Option<&EstimationResult> {
        match self {
            Self::Estimate(result) => Some(result),
            Self::Failed { .. } => None,
        }
    }
}

/// An impulse-response function: ordered horizon entries.
///
/// A table with some horizons marked failed is a valid, inspectable output;
/// failed horizons are never dropped or zero-filled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImpulseResponseTable {
    entries: Vec<(u32, HorizonEntry)>,
}

impl ImpulseResponseTable {
    /// Build from `(horizon, entry)` pairs; sorts by horizon.
    pub fn from_entries(mut entries: Vec<(u32, HorizonEntry)>) -> Self {
        entries.sort_by_key(|(h, _)| *h);
        Self { entries }
    }

    /// Entries in horizon order.
    pub fn entries(&self) -> &[(u32, HorizonEntry)] {
        &self.entries
    }

    /// The entry at a given horizon.
    pub fn at(&self, horizon: u32) -> Option<&HorizonEntry> {
        self.entries
            .iter()
            .find(|(h, _)| *h == horizon)
            .map(|(_, e)| e)
    }

    /// Number of horizons recorded (including failed ones).
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the table is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// How many horizons failed.
    pub fn n_failed(&self) -> usize {
        self.entries
            .iter()
            .filter(|(_, e)| matches!(e, HorizonEntry::Failed { .. }))
            .count()
    }
}

/// Drives [`IVEstimator`] across a horizon ladder.
#[derive(Debug, Clone, Default)]
pub struct LocalProjectionRunner {
    estimator: IVEstimator,
}

impl LocalProjectionRunner {
    /// Create a runner around a configured estimator.
    pub const fn new(estimator: IVEstimator) -> Self {
        Self { estimator }
    }

    /// Estimate the spec at every horizon in `horizons`, sequentially.
    ///
    /// # Errors
    /// Only schema-level failures (a missing outcome column, an outcome
    /// lead column colliding with an existing name) abort the run; any
    /// estimation failure is recorded as a [`HorizonEntry::Failed`].
    pub fn run(
        &self,
        spec: &RegressionSpec,
        panel: &PanelTable,
        horizons: RangeInclusive<u32>,
    ) -> Result<ImpulseResponseTable, EstimationError> {
        let entries = horizons
            .map(|h| Ok((h, self.fit_horizon(spec, panel, h)?)))
            .collect::<Result<Vec<_>, EstimationError>>()?;
        Ok(ImpulseResponseTable::from_entries(entries))
    }

    /// Estimate all horizons in parallel.
    ///
    /// Horizons only share the read-only panel, so this produces results
    /// bit-identical to [`LocalProjectionRunner::run`].
    pub fn run_par(
        &self,
        spec: &RegressionSpec,
        panel: &PanelTable,
        horizons: RangeInclusive<u32>,
    ) -> Result<ImpulseResponseTable, EstimationError> {
        let hs: Vec<u32> = horizons.collect();
        let entries = hs
            .into_par_iter()
            .map(|h| Ok((h, self.fit_horizon(spec, panel, h)?)))
            .collect::<Result<Vec<_>, EstimationError>>()?;
        Ok(ImpulseResponseTable::from_entries(entries))
    }

    /// Run a list of spec variants, each over the full horizon ladder,
    /// in parallel. Robustness variants are data, not code paths.
    pub fn run_many(
        &self,
        specs: &[RegressionSpec],
        panel: &PanelTable,
        horizons: RangeInclusive<u32>,
    ) -> Result<Vec<ImpulseResponseTable>, EstimationError> {
        specs
            .par_iter()
            .map(|spec| self.run(spec, panel, horizons.clone()))
            .collect()
    }

    fn fit_horizon(
        &self,
        spec: &RegressionSpec,
        panel: &PanelTable,
        horizon: u32,
    ) -> Result<HorizonEntry, EstimationError> {
        let (frame, spec_h);
        let (panel_h, effective_spec) = if horizon == 0 {
            (panel, spec)
        } else {
            frame = panel.lead(&spec.outcome, horizon)?;
            spec_h = spec.with_outcome(format!("{}_lead{horizon}", spec.outcome));
            (&frame, &spec_h)
        };

        Ok(match self.estimator.fit(effective_spec, panel_h) {
            Ok(result) => HorizonEntry::Estimate(result),
            Err(err) => HorizonEntry::Failed {
                reason: err.to_string(),
            },
        })
    }
}
