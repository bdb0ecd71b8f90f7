//! Fixed-effect absorption by demeaning.
//!
//! One-way effects are removed with a single exact group-mean subtraction.
//! Two-way effects use alternating projections: demean by entity groups,
//! then by time groups, until the largest subtracted mean falls below the
//! tolerance. The result matches a full dummy-variable regression to
//! numerical tolerance; the iteration exists purely to avoid materializing
//! the dummy matrix.

use crate::error::{EstimationError, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which fixed effects a regression absorbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeSpec {
    /// No fixed effects; regressions include an intercept instead.
    None,
    /// Entity fixed effects only.
    Entity,
    /// Time fixed effects only.
    Time,
    /// Entity and time fixed effects.
    TwoWay,
}

impl FeSpec {
    /// Whether entity effects are absorbed.
    pub const fn has_entity(self) -> bool {
        matches!(self, Self::Entity | Self::TwoWay)
    }

    /// Whether time effects are absorbed.
    pub const fn has_time(self) -> bool {
        matches!(self, Self::Time | Self::TwoWay)
    }
}

/// What a demeaning pass did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeReport {
    /// Alternating-projection sweeps performed (1 for one-way effects).
    pub iterations: usize,
    /// Whether the sweep converged within the iteration budget.
    pub converged: bool,
    /// Entity groups with exactly one observation in the sample.
    pub singleton_entity_groups: usize,
    /// Time groups with exactly one observation in the sample.
    pub singleton_time_groups: usize,
}

/// Removes entity and/or time group means from data columns.
#[derive(Debug, Clone)]
pub struct FixedEffectsTransform {
    /// Convergence tolerance on the largest subtracted group mean.
    pub tolerance: f64,
    /// Maximum alternating-projection sweeps before giving up.
    pub max_iterations: usize,
}

impl Default for FixedEffectsTransform {
    fn default() -> Self {
        Self {
            tolerance: 1e-10,
            max_iterations: 1000,
        }
    }
}

impl FixedEffectsTransform {
    /// Create a transform with explicit tolerance and iteration budget.
    pub const fn new(tolerance: f64, max_iterations: usize) -> Self {
        Self {
            tolerance,
            max_iterations,
        }
    }

    /// Demean every column of `values` in place according to `spec`.
    ///
    /// `entity_groups` and `time_groups` assign each row a dense group id
    /// (see [`group_indices`]). Singleton groups contribute a zero after
    /// demeaning; they are counted in the report because they carry no
    /// identifying variation.
    pub fn demean(
        &self,
        values: &mut Array2<f64>,
        entity_groups: &[usize],
        time_groups: &[usize],
        spec: FeSpec,
    ) -> Result<FeReport> {
        let n = values.nrows();
        if entity_groups.len() != n || time_groups.len() != n {
            return Err(EstimationError::Numeric(format!(
                "group index length mismatch: {n} rows, {} entity ids, {} time ids",
                entity_groups.len(),
                time_groups.len()
            )));
        }

        let singleton_entity_groups = count_singletons(entity_groups);
        let singleton_time_groups = count_singletons(time_groups);

        let (iterations, converged) = match spec {
            FeSpec::None => (0, true),
            FeSpec::Entity => {
                demean_by(values, entity_groups);
                (1, true)
            }
            FeSpec::Time => {
                demean_by(values, time_groups);
                (1, true)
            }
            FeSpec::TwoWay => {
                let mut iterations = 0;
                let mut converged = false;
                while iterations < self.max_iterations {
                    iterations += 1;
                    let moved_entity = demean_by(values, entity_groups);
                    let moved_time = demean_by(values, time_groups);
                    if moved_entity.max(moved_time) < self.tolerance {
                        converged = true;
                        break;
                    }
                }
                (iterations, converged)
            }
        };

        Ok(FeReport {
            iterations,
            converged,
            singleton_entity_groups,
            singleton_time_groups,
        })
    }
}

/// Map arbitrary ordered labels to dense group ids.
///
/// Returns one id per row plus the number of distinct groups; ids follow
/// the labels' sort order, so the mapping is deterministic.
pub fn group_indices<T: Ord>(labels: &[T]) -> (Vec<usize>, usize) {
    let mut mapping: BTreeMap<&T, usize> = BTreeMap::new();
    for label in labels {
        let next = mapping.len();
        mapping.entry(label).or_insert(next);
    }
    // re-number in sort order for determinism across input orderings
    let ordered: BTreeMap<&T, usize> = mapping
        .keys()
        .enumerate()
        .map(|(rank, label)| (*label, rank))
        .collect();
    let ids = labels.iter().map(|l| ordered[l]).collect();
    (ids, ordered.len())
}

/// Subtract group means from every column; returns the largest absolute
/// mean that was subtracted.
fn demean_by(values: &mut Array2<f64>, groups: &[usize]) -> f64 {
    let n_groups = groups.iter().copied().max().map_or(0, |g| g + 1);
    let n_cols = values.ncols();
    let mut sums = vec![0.0f64; n_groups * n_cols];
    let mut counts = vec![0usize; n_groups];

    for (row, &g) in groups.iter().enumerate() {
        counts[g] += 1;
        for c in 0..n_cols {
            sums[g * n_cols + c] += values[[row, c]];
        }
    }

    let mut largest = 0.0f64;
    for g in 0..n_groups {
        if counts[g] == 0 {
            continue;
        }
        for c in 0..n_cols {
            let mean = sums[g * n_cols + c] / counts[g] as f64;
            sums[g * n_cols + c] = mean;
            largest = largest.max(mean.abs());
        }
    }
    for (row, &g) in groups.iter().enumerate() {
        for c in 0..n_cols {
            values[[row, c]] -= sums[g * n_cols + c];
        }
    }
    largest
}

fn count_singletons(groups: &[usize]) -> usize {
    let n_groups = groups.iter().copied().max().map_or(0, |g| g + 1);
    let mut counts = vec![0usize; n_groups];
    for &g in groups {
        counts[g] += 1;
    }
    counts.iter().filter(|&&c| c == 1).count()
}
