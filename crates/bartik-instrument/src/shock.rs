//! Shock series from a residualized aggregate regression.
//!
//! The shock at month t is the OLS residual of an aggregate series Y on a
//! control series X, fit over the months both series observe. The series
//! spans the full joint range; months inside the span where either input is
//! missing carry a missing residual, and the cumulative variant's treatment
//! of those gaps is an explicit [`MissingResidual`] policy.

use crate::error::{InstrumentError, Result};
use bartik_panel::MonthId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// How the cumulative shock treats a missing residual inside the span.
///
/// `TreatAsZero` is a deliberate modeling choice inherited from the original
/// study design, not a data-cleaning default: a month with no observed
/// residual contributes nothing to the running sum, and the sum carries
/// forward. `Propagate` is the conservative alternative that poisons the
/// cumulative series from the first gap onward.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingResidual {
    /// A missing residual contributes zero; the running sum carries forward.
    #[default]
    TreatAsZero,
    /// A missing residual makes every later cumulative value missing.
    Propagate,
}

/// A monthly residual series over a contiguous month span.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShockSeries {
    start: MonthId,
    values: Vec<Option<f64>>,
}

impl ShockSeries {
    /// Build a series directly from a span start and residual values.
    ///
    /// For collaborators that supply a precomputed shock instead of fitting
    /// the regression through [`residualize`].
    pub const fn from_values(start: MonthId, values: Vec<Option<f64>>) -> Self {
        Self { start, values }
    }

    /// First month of the span.
    pub const fn start(&self) -> MonthId {
        self.start
    }

    /// Last month of the span.
    pub fn end(&self) -> MonthId {
        self.start + (self.values.len() as i32 - 1)
    }

    /// Number of months in the span, gaps included.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the span is empty.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Every month in the span, in order.
    pub fn months(&self) -> impl Iterator<Item = MonthId> + '_ {
        (0..self.values.len() as i32).map(move |k| self.start + k)
    }

    /// The residual at one month; `None` outside the span or at a gap.
    pub fn value(&self, month: MonthId) -> Option<f64> {
        let offset = month - self.start;
        if offset < 0 {
            return None;
        }
        self.values.get(offset as usize).copied().flatten()
    }

    /// Residuals in span order, gaps as `None`.
    pub fn values(&self) -> &[Option<f64>] {
        &self.values
    }

    /// Running sum of residuals in time order under the given policy.
    pub fn cumulative(&self, policy: MissingResidual) -> Vec<Option<f64>> {
        let mut running = 0.0;
        let mut poisoned = false;
        self.values
            .iter()
            .map(|v| match (v, policy) {
                (Some(r), _) if !poisoned => {
                    running += r;
                    Some(running)
                }
                (None, MissingResidual::TreatAsZero) => Some(running),
                (None, MissingResidual::Propagate) => {
                    poisoned = true;
                    None
                }
                _ => None,
            })
            .collect()
    }
}

/// Fit the shock regression and extract its residual series.
///
/// Both inputs are `(month, value)` observations; duplicate months keep the
/// last value. The regression `y = a + b x` is fit by OLS over the months
/// present in both series, and the residual `y - a - b x` at each such month
/// becomes the shock. The returned span runs from the first to the last
/// overlapping month; interior months missing from either input are gaps.
///
/// # Errors
/// Fails when the series share no months, share fewer than three, or the
/// control series is constant over the overlap.
pub fn residualize(y: &[(MonthId, f64)], x: &[(MonthId, f64)]) -> Result<ShockSeries> {
    let y_map: BTreeMap<MonthId, f64> = y.iter().copied().collect();
    let x_map: BTreeMap<MonthId, f64> = x.iter().copied().collect();

    let overlap: Vec<(MonthId, f64, f64)> = y_map
        .iter()
        .filter_map(|(m, yv)| x_map.get(m).map(|xv| (*m, *yv, *xv)))
        .collect();

    if overlap.is_empty() {
        return Err(InstrumentError::NoOverlap);
    }
    if overlap.len() < 3 {
        return Err(InstrumentError::TooFewObservations { n: overlap.len() });
    }

    let n = overlap.len() as f64;
    let mean_x = overlap.iter().map(|(_, _, xv)| xv).sum::<f64>() / n;
    let mean_y = overlap.iter().map(|(_, yv, _)| yv).sum::<f64>() / n;
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    for (_, yv, xv) in &overlap {
        sxx += (xv - mean_x) * (xv - mean_x);
        sxy += (xv - mean_x) * (yv - mean_y);
    }
    if sxx <= 0.0 {
        return Err(InstrumentError::NoVariation);
    }
    let slope = sxy / sxx;
    let intercept = mean_y - slope * mean_x;

    // Span the full joint range; non-overlap months inside it are gaps
    let start = overlap[0].0;
    let end = overlap[overlap.len() - 1].0;
    let span = (end - start + 1) as usize;
    let mut values = vec![None; span];
    for (m, yv, xv) in &overlap {
        values[(*m - start) as usize] = Some(yv - intercept - slope * xv);
    }

    Ok(ShockSeries { start, values })
}
