//! Exposure scoring from category weight observations.
//!
//! Each entity's observations over K ordered buckets inside a reference
//! window are aggregated (with optional exponential recency decay) into a
//! row of non-negative weights, normalized to sum one. The first principal
//! component of the entity-by-bucket matrix is the raw exposure; a
//! directional anchor (weight in the lowest bucket minus weight in the
//! highest) fixes PCA's arbitrary sign, and the result is centered but not
//! rescaled.

use crate::error::{InstrumentError, Result};
use crate::pca::first_principal_component;
use bartik_panel::MonthId;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One raw weight observation: an entity's amount in one bucket in one month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryObservation {
    /// Entity the observation belongs to.
    pub entity_id: String,
    /// Month the observation was recorded.
    pub time_id: MonthId,
    /// Bucket index, `0..n_categories`, ordered lowest to highest.
    pub category: usize,
    /// Non-negative amount.
    pub value: f64,
}

/// Exponential recency weighting inside the reference window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecayConfig {
    /// Base of the decay, in (0, 1].
    pub rate: f64,
    /// Months over which the weight decays by one power of `rate`.
    pub half_life_months: f64,
}

/// Configuration for exposure construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureConfig {
    /// Number of ordered buckets.
    pub n_categories: usize,
    /// Last month of the reference window (inclusive).
    pub reference_month: MonthId,
    /// Window length in months, ending at `reference_month`.
    pub window_months: u32,
    /// Optional recency decay; `None` weights all window months equally.
    pub decay: Option<DecayConfig>,
}

/// Time-invariant per-entity exposure scores.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureIndex {
    entities: Vec<String>,
    values: Vec<f64>,
    excluded: Vec<String>,
}

impl ExposureIndex {
    /// Scored entities, sorted, aligned with [`ExposureIndex::values`].
    pub fn entities(&self) -> &[String] {
        &self.entities
    }

    /// Centered exposure scores aligned with [`ExposureIndex::entities`].
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Entities with no window observations, excluded from the PCA fit.
    pub fn excluded(&self) -> &[String] {
        &self.excluded
    }

    /// The score for one entity, if it was scored.
    pub fn value(&self, entity: &str) -> Option<f64> {
        self.entities
            .binary_search_by(|e| e.as_str().cmp(entity))
            .ok()
            .map(|i| self.values[i])
    }
}

/// Builds an [`ExposureIndex`] from raw weight observations.
#[derive(Debug, Clone)]
pub struct ExposureBuilder {
    config: ExposureConfig,
}

impl ExposureBuilder {
    /// Create a builder with the given configuration.
    pub const fn new(config: ExposureConfig) -> Self {
        Self { config }
    }

    /// The builder's configuration.
    pub const fn config(&self) -> &ExposureConfig {
        &self.config
    }

    /// Aggregate, normalize, and score the observations.
    ///
    /// Every observed entity ends up either scored or on the excluded list:
    /// entities whose weight row is entirely zero (no observations inside
    /// the window) are kept out of the fit and reported on the index, not
    /// silently dropped.
    ///
    /// # Errors
    /// Negative values and out-of-range categories are fatal; so is a
    /// window containing no observations at all, or fewer than two scorable
    /// entities.
    pub fn fit(&self, observations: &[CategoryObservation]) -> Result<ExposureIndex> {
        let k = self.config.n_categories;
        if k < 2 {
            return Err(InstrumentError::TooFewCategories { k });
        }

        let window_start =
            self.config.reference_month - (self.config.window_months.saturating_sub(1) as i32);
        let mut rows: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
        let mut any_in_window = false;

        for obs in observations {
            if obs.value < 0.0 {
                return Err(InstrumentError::NegativeWeight {
                    entity: obs.entity_id.clone(),
                    category: obs.category,
                    value: obs.value,
                });
            }
            if obs.category >= k {
                return Err(InstrumentError::CategoryOutOfRange {
                    category: obs.category,
                    n_categories: k,
                });
            }
            // every observed entity gets a row; off-window observations
            // contribute no mass but must not make the entity vanish
            let row = rows
                .entry(obs.entity_id.as_str())
                .or_insert_with(|| vec![0.0; k]);
            if obs.time_id >= window_start && obs.time_id <= self.config.reference_month {
                row[obs.category] += obs.value * self.decay_factor(obs.time_id);
                any_in_window = true;
            }
        }

        if !any_in_window {
            return Err(InstrumentError::EmptyWindow);
        }

        // Partition zero-weight entities out before normalizing
        let mut entities = Vec::new();
        let mut excluded = Vec::new();
        let mut weights = Vec::new();
        for (entity, mut row) in rows {
            let total: f64 = row.iter().sum();
            if total > 0.0 {
                for w in &mut row {
                    *w /= total;
                }
                entities.push(entity.to_string());
                weights.push(row);
            } else {
                excluded.push(entity.to_string());
            }
        }

        let n = entities.len();
        if n < 2 {
            return Err(InstrumentError::TooFewEntities { n });
        }

        let mut matrix = Array2::<f64>::zeros((n, k));
        for (i, row) in weights.iter().enumerate() {
            for (j, w) in row.iter().enumerate() {
                matrix[[i, j]] = *w;
            }
        }

        let pc = first_principal_component(&matrix)?;

        // Anchor: lowest-bucket weight minus highest-bucket weight. PCA's
        // sign is arbitrary; align the component with the anchor so that
        // the exposure direction is reproducible.
        let anchor: Vec<f64> = weights.iter().map(|row| row[0] - row[k - 1]).collect();
        let mut scores = pc.scores;
        if correlation(&anchor, scores.as_slice().unwrap_or(&[])) < 0.0 {
            scores.mapv_inplace(|v| -v);
        }

        let mean = scores.sum() / n as f64;
        let values = scores.iter().map(|v| v - mean).collect();

        Ok(ExposureIndex {
            entities,
            values,
            excluded,
        })
    }

    fn decay_factor(&self, month: MonthId) -> f64 {
        match self.config.decay {
            Some(decay) => {
                let age = (self.config.reference_month - month) as f64;
                decay.rate.powf(age / decay.half_life_months)
            }
            None => 1.0,
        }
    }
}

/// Pearson correlation of two equal-length slices; zero when degenerate.
fn correlation(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let n = a.len() as f64;
    let mean_a = a.iter().sum::<f64>() / n;
    let mean_b = b.iter().sum::<f64>() / n;
    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        let da = x - mean_a;
        let db = y - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }
    if var_a <= 0.0 || var_b <= 0.0 {
        return 0.0;
    }
    cov / (var_a.sqrt() * var_b.sqrt())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::rstest;

    fn obs(entity: &str, ym: (i32, u32), category: usize, value: f64) -> CategoryObservation {
        CategoryObservation {
            entity_id: entity.to_string(),
            time_id: MonthId::from_ym(ym.0, ym.1).unwrap(),
            category,
            value,
        }
    }

    fn config() -> ExposureConfig {
        ExposureConfig {
            n_categories: 3,
            reference_month: MonthId::from_ym(2020, 12).unwrap(),
            window_months: 12,
            decay: None,
        }
    }

    /// Entities spread across the bucket range, lowest-heavy to highest-heavy.
    fn spread_observations() -> Vec<CategoryObservation> {
        vec![
            obs("a", (2020, 6), 0, 9.0),
            obs("a", (2020, 6), 1, 1.0),
            obs("b", (2020, 6), 0, 6.0),
            obs("b", (2020, 6), 1, 4.0),
            obs("c", (2020, 6), 1, 8.0),
            obs("c", (2020, 6), 2, 2.0),
            obs("d", (2020, 6), 2, 10.0),
        ]
    }

    #[test]
    fn test_orientation_follows_anchor() {
        let index = ExposureBuilder::new(config())
            .fit(&spread_observations())
            .unwrap();
        // "a" is all-lowest-bucket, "d" all-highest: the anchor orientation
        // puts a above d
        assert!(index.value("a").unwrap() > index.value("d").unwrap());
    }

    #[test]
    fn test_scores_are_centered() {
        let index = ExposureBuilder::new(config())
            .fit(&spread_observations())
            .unwrap();
        let sum: f64 = index.values().iter().sum();
        assert_relative_eq!(sum, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_flip_invariance() {
        // mirroring every entity's buckets (low becomes high) must negate
        // the exposure, not scramble it: the anchor re-orients the flipped
        // component deterministically
        let original = ExposureBuilder::new(config())
            .fit(&spread_observations())
            .unwrap();
        let mirrored: Vec<CategoryObservation> = spread_observations()
            .into_iter()
            .map(|mut o| {
                o.category = 2 - o.category;
                o
            })
            .collect();
        let flipped = ExposureBuilder::new(config()).fit(&mirrored).unwrap();
        for (e, v) in original.entities().iter().zip(original.values()) {
            assert_relative_eq!(flipped.value(e).unwrap(), -v, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_zero_weight_entity_excluded_and_reported() {
        let mut observations = spread_observations();
        // "e" only observed outside the window
        observations.push(obs("e", (2018, 1), 0, 5.0));
        observations.push(obs("e", (2020, 6), 1, 0.0));
        let index = ExposureBuilder::new(config()).fit(&observations).unwrap();
        assert_eq!(index.excluded(), ["e".to_string()]);
        assert!(index.value("e").is_none());
    }

    #[test]
    fn test_decay_downweights_old_months() {
        let cfg = ExposureConfig {
            decay: Some(DecayConfig {
                rate: 0.5,
                half_life_months: 6.0,
            }),
            ..config()
        };
        let observations = vec![
            // "a": equal amounts, but bucket 0 observed 12 months before ref
            obs("a", (2020, 1), 0, 10.0),
            obs("a", (2020, 12), 2, 10.0),
            obs("b", (2020, 6), 0, 1.0),
            obs("b", (2020, 6), 2, 1.0),
            obs("c", (2020, 6), 1, 1.0),
        ];
        let builder = ExposureBuilder::new(cfg);
        let index = builder.fit(&observations).unwrap();
        // sanity on the decay itself: 11 months back at half-life 6
        assert_relative_eq!(
            builder.decay_factor(MonthId::from_ym(2020, 1).unwrap()),
            0.5f64.powf(11.0 / 6.0),
            epsilon = 1e-12
        );
        assert_eq!(index.entities().len(), 3);
    }

    #[test]
    fn test_out_of_window_entity_is_reported_not_dropped() {
        // "f" has observations, all outside the window: it belongs on the
        // excluded list, not nowhere
        let mut observations = spread_observations();
        observations.push(obs("f", (2015, 3), 1, 4.0));
        observations.push(obs("f", (2021, 2), 2, 4.0));
        let index = ExposureBuilder::new(config()).fit(&observations).unwrap();
        assert_eq!(index.excluded(), ["f".to_string()]);
        assert!(index.value("f").is_none());
        assert_eq!(index.entities().len(), 4);
    }

    #[rstest]
    #[case(obs("a", (2020, 6), 0, -1.0))]
    #[case(obs("a", (2020, 6), 7, 1.0))]
    fn test_invalid_observation_rejected(#[case] bad: CategoryObservation) {
        let mut observations = spread_observations();
        observations.push(bad);
        assert!(ExposureBuilder::new(config()).fit(&observations).is_err());
    }

    #[test]
    fn test_empty_window_is_fatal() {
        let observations = vec![obs("a", (2015, 1), 0, 1.0)];
        assert!(matches!(
            ExposureBuilder::new(config()).fit(&observations),
            Err(InstrumentError::EmptyWindow)
        ));
    }
}
