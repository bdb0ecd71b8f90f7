//! Instrument panel assembly.
//!
//! Crosses a time-invariant [`ExposureIndex`] with a [`ShockSeries`] over
//! the Cartesian product of entities and span months, producing a
//! [`PanelTable`] with `exposure`, `shock`, `instrument`, and
//! `instrument_cumulative` columns. A cell is missing whenever either
//! operand is missing; it is never coerced to zero.

use crate::error::Result;
use crate::exposure::ExposureIndex;
use crate::shock::{MissingResidual, ShockSeries};
use bartik_panel::{CoverageNote, MonthId, PanelTable};
use serde::{Deserialize, Serialize};

/// Exposure column name in the assembled panel.
pub const EXPOSURE: &str = "exposure";
/// Shock column name in the assembled panel.
pub const SHOCK: &str = "shock";
/// Instrument column name in the assembled panel.
pub const INSTRUMENT: &str = "instrument";
/// Cumulative-instrument column name in the assembled panel.
pub const INSTRUMENT_CUMULATIVE: &str = "instrument_cumulative";

/// Combines exposure and shock into the shift-share instrument panel.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstrumentBuilder {
    /// Gap policy for the cumulative shock.
    pub missing_residual: MissingResidual,
}

/// The assembled entity-by-month instrument table.
#[derive(Debug, Clone)]
pub struct InstrumentPanel {
    table: PanelTable,
}

impl InstrumentPanel {
    /// The underlying panel, ready to merge with outcome data.
    pub const fn table(&self) -> &PanelTable {
        &self.table
    }

    /// Consume the wrapper and take the panel.
    pub fn into_table(self) -> PanelTable {
        self.table
    }
}

impl InstrumentBuilder {
    /// Builder with the given cumulative gap policy.
    pub const fn new(missing_residual: MissingResidual) -> Self {
        Self { missing_residual }
    }

    /// Cross exposure and shock into the instrument panel.
    ///
    /// Rows cover every `(entity, month)` pair where the entity appears in
    /// the exposure source (scored or excluded) and the month lies in the
    /// shock span. Excluded entities appear with missing exposure and a
    /// [`CoverageNote::ExposureExcluded`] note on the table.
    pub fn build(&self, exposure: &ExposureIndex, shock: &ShockSeries) -> Result<InstrumentPanel> {
        let mut all_entities: Vec<&str> = exposure
            .entities()
            .iter()
            .chain(exposure.excluded())
            .map(String::as_str)
            .collect();
        all_entities.sort_unstable();

        let months: Vec<MonthId> = shock.months().collect();
        let cumulative = shock.cumulative(self.missing_residual);
        let n_rows = all_entities.len() * months.len();

        let mut entities = Vec::with_capacity(n_rows);
        let mut times = Vec::with_capacity(n_rows);
        let mut exposure_col = Vec::with_capacity(n_rows);
        let mut shock_col = Vec::with_capacity(n_rows);
        let mut instrument_col = Vec::with_capacity(n_rows);
        let mut cumulative_col = Vec::with_capacity(n_rows);

        for entity in &all_entities {
            let e = exposure.value(entity);
            for (i, month) in months.iter().enumerate() {
                let s = shock.value(*month);
                let c = cumulative[i];
                entities.push((*entity).to_string());
                times.push(*month);
                exposure_col.push(e);
                shock_col.push(s);
                instrument_col.push(match (e, s) {
                    (Some(ev), Some(sv)) => Some(ev * sv),
                    _ => None,
                });
                cumulative_col.push(match (e, c) {
                    (Some(ev), Some(cv)) => Some(ev * cv),
                    _ => None,
                });
            }
        }

        let mut table = PanelTable::from_parts(
            entities,
            times,
            vec![
                (EXPOSURE.to_string(), exposure_col),
                (SHOCK.to_string(), shock_col),
                (INSTRUMENT.to_string(), instrument_col),
                (INSTRUMENT_CUMULATIVE.to_string(), cumulative_col),
            ],
        )?;

        if !exposure.excluded().is_empty() {
            table.push_coverage(CoverageNote::ExposureExcluded {
                entities: exposure.excluded().to_vec(),
            });
        }

        Ok(InstrumentPanel { table })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exposure::{CategoryObservation, ExposureBuilder, ExposureConfig};
    use approx::assert_relative_eq;

    fn m(mm: u32) -> MonthId {
        MonthId::from_ym(2020, mm).unwrap()
    }

    /// Two entities at opposite ends of a two-bucket spread: after anchor
    /// orientation and centering their exposures are exactly +1 and -1.
    fn polar_exposure() -> ExposureIndex {
        let observations = vec![
            CategoryObservation {
                entity_id: "A".to_string(),
                time_id: m(1),
                category: 0,
                value: 1.0,
            },
            CategoryObservation {
                entity_id: "B".to_string(),
                time_id: m(1),
                category: 1,
                value: 1.0,
            },
        ];
        ExposureBuilder::new(ExposureConfig {
            n_categories: 2,
            reference_month: m(6),
            window_months: 12,
            decay: None,
        })
        .fit(&observations)
        .unwrap()
    }

    /// The exact shock values [0, 1, 0, -1, 0, 1] over 2020-01..2020-06.
    fn known_shock() -> ShockSeries {
        let values = [0.0, 1.0, 0.0, -1.0, 0.0, 1.0];
        ShockSeries::from_values(m(1), values.iter().map(|v| Some(*v)).collect())
    }

    #[test]
    fn test_concrete_polar_scenario() {
        let exposure = polar_exposure();
        assert_relative_eq!(exposure.value("A").unwrap(), 1.0, epsilon = 1e-9);
        assert_relative_eq!(exposure.value("B").unwrap(), -1.0, epsilon = 1e-9);

        let shock = known_shock();
        let panel = InstrumentBuilder::default()
            .build(&exposure, &shock)
            .unwrap();
        let table = panel.table();
        assert_eq!(table.height(), 12);

        let keys = table.keys().unwrap();
        let shocks = table.column_f64(SHOCK).unwrap();
        let instruments = table.column_f64(INSTRUMENT).unwrap();
        for ((entity, month), (s, inst)) in keys.iter().zip(shocks.iter().zip(&instruments)) {
            let expect = shock.value(*month).unwrap();
            assert_relative_eq!(s.unwrap(), expect, epsilon = 1e-9);
            let sign = if entity == "A" { 1.0 } else { -1.0 };
            assert_relative_eq!(inst.unwrap(), sign * expect, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_missing_operand_yields_missing_instrument() {
        let exposure = polar_exposure();
        let shock = ShockSeries::from_values(m(1), vec![Some(1.0), None, Some(2.0)]);
        let panel = InstrumentBuilder::default()
            .build(&exposure, &shock)
            .unwrap();
        let table = panel.table();
        let keys = table.keys().unwrap();
        let instruments = table.column_f64(INSTRUMENT).unwrap();
        for ((_, month), inst) in keys.iter().zip(&instruments) {
            if *month == m(2) {
                assert!(inst.is_none());
            } else {
                assert!(inst.is_some());
            }
        }
    }

    #[test]
    fn test_cumulative_column_uses_policy() {
        let exposure = polar_exposure();
        let shock = ShockSeries::from_values(m(1), vec![Some(1.0), None, Some(2.0)]);
        let panel = InstrumentBuilder::new(MissingResidual::TreatAsZero)
            .build(&exposure, &shock)
            .unwrap();
        let table = panel.table();
        let keys = table.keys().unwrap();
        let cumulative = table.column_f64(INSTRUMENT_CUMULATIVE).unwrap();
        for ((entity, month), c) in keys.iter().zip(&cumulative) {
            if entity == "A" && *month == m(2) {
                // gap contributes zero, the running sum carries forward
                assert_relative_eq!(c.unwrap(), 1.0, epsilon = 1e-9);
            }
            if entity == "A" && *month == m(3) {
                assert_relative_eq!(c.unwrap(), 3.0, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_excluded_entities_present_with_missing_exposure() {
        let mut observations = vec![
            CategoryObservation {
                entity_id: "A".to_string(),
                time_id: m(1),
                category: 0,
                value: 1.0,
            },
            CategoryObservation {
                entity_id: "B".to_string(),
                time_id: m(1),
                category: 1,
                value: 1.0,
            },
        ];
        observations.push(CategoryObservation {
            entity_id: "C".to_string(),
            time_id: MonthId::from_ym(2015, 1).unwrap(),
            category: 0,
            value: 1.0,
        });
        let exposure = ExposureBuilder::new(ExposureConfig {
            n_categories: 2,
            reference_month: m(6),
            window_months: 12,
            decay: None,
        })
        .fit(&observations)
        .unwrap();

        let shock = ShockSeries::from_values(m(1), vec![Some(1.0), Some(2.0)]);
        let panel = InstrumentBuilder::default()
            .build(&exposure, &shock)
            .unwrap();
        let table = panel.table();
        assert_eq!(table.height(), 6);
        assert!(!table.coverage().is_empty());

        let keys = table.keys().unwrap();
        let exposures = table.column_f64(EXPOSURE).unwrap();
        for ((entity, _), e) in keys.iter().zip(&exposures) {
            assert_eq!(e.is_none(), entity == "C");
        }
    }
}
