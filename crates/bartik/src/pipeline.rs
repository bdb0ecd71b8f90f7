//! End-to-end wiring of one shift-share study design.
//!
//! A `ShiftShareDesign` holds everything that varies between studies: the
//! exposure configuration, the cumulative gap policy, the regression spec
//! variants, and the horizon ladder. Robustness variants are entries in
//! `specs`, not copies of the pipeline.

use bartik_estimate::{
    EstimationError, ImpulseResponseTable, IvConfig, IVEstimator, LocalProjectionRunner,
    RegressionSpec,
};
use bartik_instrument::{
    CategoryObservation, ExposureBuilder, ExposureConfig, InstrumentBuilder, InstrumentError,
    InstrumentPanel, MissingResidual, residualize,
};
use bartik_panel::{MonthId, PanelTable, SchemaError};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use thiserror::Error;

/// Any failure along the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Table construction or merge failure.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// Exposure, shock, or assembly failure.
    #[error(transparent)]
    Instrument(#[from] InstrumentError),

    /// A failure that aborted a whole estimation run.
    #[error(transparent)]
    Estimation(#[from] EstimationError),
}

/// One study design: instrument configuration plus estimation plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShiftShareDesign {
    /// Exposure construction parameters.
    pub exposure: ExposureConfig,
    /// Gap policy for the cumulative shock.
    #[serde(default)]
    pub missing_residual: MissingResidual,
    /// Spec variants to estimate; the first is the headline spec.
    pub specs: Vec<RegressionSpec>,
    /// Highest horizon; the ladder is `0..=max_horizon`.
    pub max_horizon: u32,
    /// Estimator tuning.
    #[serde(default)]
    pub estimator: IvConfig,
}

impl ShiftShareDesign {
    /// The horizon ladder this design estimates.
    pub const fn horizons(&self) -> RangeInclusive<u32> {
        0..=self.max_horizon
    }

    /// Build the instrument panel from raw inputs.
    ///
    /// `observations` feed the exposure fit; `aggregate` and `control` are
    /// the shock regression's Y and X series.
    ///
    /// # Errors
    /// Propagates exposure and shock construction failures.
    pub fn build_instrument(
        &self,
        observations: &[CategoryObservation],
        aggregate: &[(MonthId, f64)],
        control: &[(MonthId, f64)],
    ) -> Result<InstrumentPanel, PipelineError> {
        let exposure = ExposureBuilder::new(self.exposure.clone()).fit(observations)?;
        let shock = residualize(aggregate, control)?;
        let panel = InstrumentBuilder::new(self.missing_residual).build(&exposure, &shock)?;
        Ok(panel)
    }

    /// Merge the instrument columns onto an outcome panel.
    ///
    /// # Errors
    /// Propagates merge failures (column overlap, granularity mismatch).
    pub fn attach(
        &self,
        outcomes: &PanelTable,
        instrument: &InstrumentPanel,
    ) -> Result<PanelTable, PipelineError> {
        Ok(outcomes.merge(instrument.table())?)
    }

    /// Estimate every spec over the full horizon ladder.
    ///
    /// Returns one table per spec, in spec order. Per-horizon failures are
    /// recorded inside the tables; only schema-level failures abort.
    ///
    /// # Errors
    /// Propagates schema failures (a spec naming a missing column).
    pub fn estimate(&self, panel: &PanelTable) -> Result<Vec<ImpulseResponseTable>, PipelineError> {
        let runner = LocalProjectionRunner::new(IVEstimator::new(self.estimator.clone()));
        Ok(runner.run_many(&self.specs, panel, self.horizons())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bartik_estimate::FeSpec;
    use bartik_panel::MonthId;

    fn m(mm: u32) -> MonthId {
        MonthId::from_ym(2019, 1).unwrap() + (mm as i32 - 1)
    }

    fn obs(entity: &str, category: usize, value: f64) -> CategoryObservation {
        CategoryObservation {
            entity_id: entity.to_string(),
            time_id: m(1),
            category,
            value,
        }
    }

    fn design() -> ShiftShareDesign {
        ShiftShareDesign {
            exposure: ExposureConfig {
                n_categories: 3,
                reference_month: m(6),
                window_months: 12,
                decay: None,
            },
            missing_residual: MissingResidual::TreatAsZero,
            specs: vec![RegressionSpec {
                outcome: "y".to_string(),
                endogenous: vec!["x".to_string()],
                instruments: vec!["instrument".to_string()],
                controls: vec![],
                fixed_effects: FeSpec::TwoWay,
                cluster: "entity_id".to_string(),
            }],
            max_horizon: 2,
            estimator: IvConfig::default(),
        }
    }

    /// Six entities spread over three buckets, 30 months of deterministic
    /// aggregate data.
    fn inputs() -> (
        Vec<CategoryObservation>,
        Vec<(MonthId, f64)>,
        Vec<(MonthId, f64)>,
    ) {
        let observations = vec![
            obs("e0", 0, 10.0),
            obs("e1", 0, 7.0),
            obs("e1", 1, 3.0),
            obs("e2", 1, 8.0),
            obs("e2", 0, 2.0),
            obs("e3", 1, 6.0),
            obs("e3", 2, 4.0),
            obs("e4", 2, 7.0),
            obs("e4", 1, 3.0),
            obs("e5", 2, 10.0),
        ];
        // deterministic wobble keeps the residual series non-trivial
        let control: Vec<(MonthId, f64)> =
            (1..=30).map(|t| (m(t), (t as f64) * 0.5)).collect();
        let aggregate: Vec<(MonthId, f64)> = (1..=30)
            .map(|t| {
                let wobble = (((t * 7) % 5) as f64) - 2.0;
                (m(t), 1.0 + 0.8 * (t as f64) * 0.5 + wobble)
            })
            .collect();
        (observations, aggregate, control)
    }

    #[test]
    fn test_pipeline_end_to_end() {
        let design = design();
        let (observations, aggregate, control) = inputs();
        let instrument = design
            .build_instrument(&observations, &aggregate, &control)
            .unwrap();
        assert_eq!(instrument.table().height(), 6 * 30);

        // outcome panel: x follows the instrument with a deterministic
        // wobble so the first stage is strong but not exact, and
        // y = 2x plus an entity shift that the fixed effects absorb
        let inst_keys = instrument.table().keys().unwrap();
        let inst_vals = instrument.table().column_f64("instrument").unwrap();
        let mut entities = Vec::new();
        let mut times = Vec::new();
        let mut x = Vec::new();
        let mut y = Vec::new();
        for ((entity, month), v) in inst_keys.iter().zip(&inst_vals) {
            let idx = (entity.as_bytes()[1] - b'0') as i32;
            let shift = idx as f64;
            let wobble = ((month.index() * 13 + idx * 7).rem_euclid(7) - 3) as f64;
            entities.push(entity.clone());
            times.push(*month);
            let xv = v.map(|iv| iv + 0.1 * shift + 0.05 * wobble);
            x.push(xv);
            y.push(xv.map(|xv| 2.0 * xv + shift));
        }
        let outcomes = PanelTable::from_parts(
            entities,
            times,
            vec![("x".to_string(), x), ("y".to_string(), y)],
        )
        .unwrap();

        let merged = design.attach(&outcomes, &instrument).unwrap();
        let tables = design.estimate(&merged).unwrap();
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].len(), 3);

        let h0 = tables[0].at(0).unwrap().estimate().unwrap();
        let beta = h0.primary().unwrap().coefficient;
        assert!((beta - 2.0).abs() < 1e-6, "beta = {beta}");
    }

    #[test]
    fn test_design_round_trips_through_json() {
        let design = design();
        let json = serde_json::to_string(&design).unwrap();
        let back: ShiftShareDesign = serde_json::from_str(&json).unwrap();
        assert_eq!(back.max_horizon, 2);
        assert_eq!(back.specs.len(), 1);
    }
}
