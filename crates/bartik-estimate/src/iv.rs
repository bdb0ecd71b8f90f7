//! Two-stage least squares with fixed effects and clustered inference.
//!
//! The pipeline for one fit: listwise-complete extraction, fixed-effect
//! demeaning of every involved column, first-stage regressions of each
//! endogenous regressor on instruments and controls, a second stage on the
//! fitted values, and a cluster-robust sandwich variance built from the
//! *structural* residuals `y - X b` (actual endogenous values, not the
//! second-stage fitted ones).
//!
//! Point estimates are consistent under the usual exclusion and relevance
//! assumptions; the estimator does not verify those, it reports diagnostics
//! (first-stage F, Sargan where over-identified) and leaves the judgment to
//! the caller.

use crate::cluster::clustered_vcov;
use crate::error::{EstimationError, Result};
use crate::fixed_effects::{FeSpec, FixedEffectsTransform, group_indices};
use crate::lstsq::{Lstsq, invert_symmetric, least_squares};
use crate::result::{CoefficientEstimate, Diagnostics, EstimationResult, OveridStatus};
use crate::spec::RegressionSpec;
use bartik_panel::{CompleteCases, CoverageNote, PanelTable};
use ndarray::{Array1, Array2, s};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};

/// Intercept column name used when no fixed effects are absorbed.
const INTERCEPT: &str = "const";

/// Numeric floor below which a demeaned column counts as having no variation.
const VARIATION_FLOOR: f64 = 1e-20;

/// Estimator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IvConfig {
    /// Convergence tolerance for two-way demeaning (default 1e-10).
    pub fe_tolerance: f64,
    /// Iteration budget for two-way demeaning (default 1000).
    pub fe_max_iterations: usize,
}

impl Default for IvConfig {
    fn default() -> Self {
        Self {
            fe_tolerance: 1e-10,
            fe_max_iterations: 1000,
        }
    }
}

/// Fixed-effects 2SLS estimator.
#[derive(Debug, Clone, Default)]
pub struct IVEstimator {
    config: IvConfig,
}

impl IVEstimator {
    /// Create an estimator with explicit configuration.
    pub const fn new(config: IvConfig) -> Self {
        Self { config }
    }

    /// Fit two-stage least squares for `spec` on `panel`.
    ///
    /// # Errors
    /// [`EstimationError::Underidentified`] with fewer instruments than
    /// endogenous regressors; otherwise the per-unit failures documented on
    /// [`EstimationError`]. None of these abort sibling fits: the
    /// local-projection runner records them per horizon.
    pub fn fit(&self, spec: &RegressionSpec, panel: &PanelTable) -> Result<EstimationResult> {
        if spec.endogenous.is_empty() {
            return Err(EstimationError::Underidentified {
                n_instruments: spec.instruments.len(),
                n_endogenous: 0,
            });
        }
        if spec.instruments.len() < spec.endogenous.len() {
            return Err(EstimationError::Underidentified {
                n_instruments: spec.instruments.len(),
                n_endogenous: spec.endogenous.len(),
            });
        }
        self.fit_inner(spec, panel, true)
    }

    /// Fit the spec by plain least squares, ignoring instruments.
    ///
    /// The reduced-form and OLS variants of an analysis reuse the same
    /// spec shape; `endogenous` columns are treated as ordinary regressors.
    pub fn fit_ols(&self, spec: &RegressionSpec, panel: &PanelTable) -> Result<EstimationResult> {
        self.fit_inner(spec, panel, false)
    }

    fn fit_inner(
        &self,
        spec: &RegressionSpec,
        panel: &PanelTable,
        iv: bool,
    ) -> Result<EstimationResult> {
        // column set: outcome, endogenous, instruments (iv only), controls
        let mut columns: Vec<&str> = Vec::new();
        push_unique(&spec.outcome, &mut columns);
        for c in &spec.endogenous {
            push_unique(c, &mut columns);
        }
        if iv {
            for c in &spec.instruments {
                push_unique(c, &mut columns);
            }
        }
        for c in &spec.controls {
            push_unique(c, &mut columns);
        }

        let cases = panel.complete_cases(&columns, &spec.cluster)?;
        let n = cases.values.nrows();
        let p = spec.endogenous.len();
        let m = if iv { spec.instruments.len() } else { 0 };
        let c = spec.controls.len();
        let intercept = spec.fixed_effects == FeSpec::None;
        let k2 = p + c + usize::from(intercept);
        if n <= k2.max(m + c + usize::from(intercept)) {
            return Err(EstimationError::TooFewObservations {
                n_obs: n,
                n_params: k2.max(m + c + usize::from(intercept)),
            });
        }
        if let Some(bad) = first_non_finite(&cases) {
            return Err(EstimationError::Numeric(format!(
                "non-finite value in column {bad}"
            )));
        }

        // joint demeaning of every involved column
        let (entity_ids, _) = group_indices(&cases.entities);
        let (time_ids, _) = group_indices(&cases.times);
        let mut demeaned = cases.values.clone();
        let transform =
            FixedEffectsTransform::new(self.config.fe_tolerance, self.config.fe_max_iterations);
        let fe_report = transform.demean(
            &mut demeaned,
            &entity_ids,
            &time_ids,
            spec.fixed_effects,
        )?;

        if spec.fixed_effects != FeSpec::None {
            let mut check: Vec<&String> = spec.endogenous.iter().collect();
            if iv {
                check.extend(spec.instruments.iter());
            }
            check.extend(spec.controls.iter());
            for name in check {
                let j = column_of(&cases, name)?;
                let ssq: f64 = demeaned.column(j).iter().map(|v| v * v).sum();
                if ssq <= VARIATION_FLOOR * n as f64 {
                    return Err(EstimationError::NoVariation {
                        column: name.clone(),
                    });
                }
            }
        }

        let y = column_vec(&demeaned, column_of(&cases, &spec.outcome)?);
        let endog_idx: Vec<usize> = spec
            .endogenous
            .iter()
            .map(|name| column_of(&cases, name))
            .collect::<Result<_>>()?;
        let control_idx: Vec<usize> = spec
            .controls
            .iter()
            .map(|name| column_of(&cases, name))
            .collect::<Result<_>>()?;

        let mut control_names: Vec<String> = spec.controls.clone();
        if intercept {
            control_names.push(INTERCEPT.to_string());
        }

        let names2: Vec<String> = spec
            .endogenous
            .iter()
            .cloned()
            .chain(control_names.iter().cloned())
            .collect();

        let (second_stage, x2, structural_residuals, first_stage_f, overid) = if iv {
            let instr_idx: Vec<usize> = spec
                .instruments
                .iter()
                .map(|name| column_of(&cases, name))
                .collect::<Result<_>>()?;

            // first-stage design [Z | W] is shared across endogenous columns
            let fs_idx: Vec<usize> =
                instr_idx.iter().chain(control_idx.iter()).copied().collect();
            let xfs = assemble(&demeaned, &fs_idx, intercept);
            let fs_names: Vec<String> = spec
                .instruments
                .iter()
                .cloned()
                .chain(control_names.iter().cloned())
                .collect();

            let mut fitted_endog = Array2::<f64>::zeros((n, p));
            let mut min_f: Option<f64> = Some(f64::INFINITY);
            for (j, &ej) in endog_idx.iter().enumerate() {
                let endog_j = column_vec(&demeaned, ej);
                let fs = least_squares(&xfs, &endog_j, &fs_names)?;
                fitted_endog.column_mut(j).assign(&fs.fitted);
                min_f = match (min_f, self.first_stage_f(&xfs, &fs, m, &cases.clusters)) {
                    (Some(cur), Some(f)) => Some(cur.min(f)),
                    _ => None,
                };
            }

            // second stage on fitted endogenous values
            let mut x2 = Array2::<f64>::zeros((n, k2));
            x2.slice_mut(s![.., 0..p]).assign(&fitted_endog);
            fill_columns(&mut x2, p, &demeaned, &control_idx, intercept);
            let fit2 = least_squares(&x2, &y, &names2)?;

            // structural residuals use the actual endogenous values
            let mut x_struct = Array2::<f64>::zeros((n, k2));
            fill_columns(&mut x_struct, 0, &demeaned, &endog_idx, false);
            fill_columns(&mut x_struct, p, &demeaned, &control_idx, intercept);
            let u = &y - &x_struct.dot(&fit2.coefficients);

            let overid = if m > p {
                self.sargan(&xfs, &fs_names, &u, n, m - p)
            } else {
                OveridStatus::Unavailable {
                    reason: "just-identified".to_string(),
                }
            };

            // structural residuals replace second-stage ones downstream
            (fit2, x2, u, min_f, overid)
        } else {
            let mut x2 = Array2::<f64>::zeros((n, k2));
            fill_columns(&mut x2, 0, &demeaned, &endog_idx, false);
            fill_columns(&mut x2, p, &demeaned, &control_idx, intercept);
            let fit2 = least_squares(&x2, &y, &names2)?;
            let u = fit2.residuals.clone();
            (
                fit2,
                x2,
                u,
                None,
                OveridStatus::Unavailable {
                    reason: "not an instrumental-variable fit".to_string(),
                },
            )
        };

        let vcov = clustered_vcov(
            &x2,
            &structural_residuals,
            &second_stage.xtx_inv,
            &cases.clusters,
        )?;

        let coefficients: Vec<CoefficientEstimate> = names2
            .iter()
            .enumerate()
            .map(|(j, name)| {
                CoefficientEstimate::new(
                    name.clone(),
                    second_stage.coefficients[j],
                    vcov.robust[[j, j]].max(0.0).sqrt(),
                    vcov.naive[[j, j]].max(0.0).sqrt(),
                )
            })
            .collect();

        let mut coverage = panel.coverage().clone();
        if spec.fixed_effects.has_entity() && fe_report.singleton_entity_groups > 0 {
            coverage.push(CoverageNote::SingletonGroups {
                dimension: "entity".to_string(),
                count: fe_report.singleton_entity_groups,
            });
        }
        if spec.fixed_effects.has_time() && fe_report.singleton_time_groups > 0 {
            coverage.push(CoverageNote::SingletonGroups {
                dimension: "time".to_string(),
                count: fe_report.singleton_time_groups,
            });
        }

        Ok(EstimationResult {
            coefficients,
            n_obs: n,
            n_clusters: vcov.n_clusters,
            diagnostics: Diagnostics {
                first_stage_f,
                overid,
                fe_iterations: fe_report.iterations,
                fe_converged: fe_report.converged,
                singleton_entity_groups: fe_report.singleton_entity_groups,
                singleton_time_groups: fe_report.singleton_time_groups,
            },
            coverage,
        })
    }

    /// Cluster-robust Wald F for the joint significance of the instruments
    /// in one first stage. With a single instrument this reduces to the
    /// squared robust t statistic.
    ///
    /// The statistic is a report, not a precondition: when the robust
    /// variance of the instrument block is degenerate (a near-exact first
    /// stage leaves no residual to build it from), the F is simply not
    /// available and the fit proceeds.
    fn first_stage_f(
        &self,
        xfs: &Array2<f64>,
        fs: &Lstsq,
        m: usize,
        clusters: &[String],
    ) -> Option<f64> {
        let vcov = clustered_vcov(xfs, &fs.residuals, &fs.xtx_inv, clusters).ok()?;
        let v_zz = vcov.robust.slice(s![0..m, 0..m]).to_owned();
        let b_z = fs.coefficients.slice(s![0..m]).to_owned();
        let v_inv = invert_symmetric(&v_zz).ok()?;
        let wald = b_z.dot(&v_inv.dot(&b_z));
        Some(wald / m as f64)
    }

    /// Sargan statistic: n times the uncentered R² of the structural
    /// residuals regressed on the full instrument set.
    fn sargan(
        &self,
        xfs: &Array2<f64>,
        fs_names: &[String],
        u: &Array1<f64>,
        n: usize,
        df: usize,
    ) -> OveridStatus {
        let tss: f64 = u.iter().map(|v| v * v).sum();
        if tss <= 0.0 {
            return OveridStatus::Unavailable {
                reason: "zero residual variance".to_string(),
            };
        }
        let fit = match least_squares(xfs, u, fs_names) {
            Ok(fit) => fit,
            Err(err) => {
                return OveridStatus::Unavailable {
                    reason: format!("residual projection failed: {err}"),
                };
            }
        };
        let statistic = n as f64 * (1.0 - fit.rss() / tss);
        match ChiSquared::new(df as f64) {
            Ok(dist) => OveridStatus::Sargan {
                statistic,
                df,
                p_value: 1.0 - dist.cdf(statistic),
            },
            Err(_) => OveridStatus::Unavailable {
                reason: "invalid degrees of freedom".to_string(),
            },
        }
    }
}

fn push_unique<'a>(name: &'a str, out: &mut Vec<&'a str>) {
    if !out.contains(&name) {
        out.push(name);
    }
}

fn column_of(cases: &CompleteCases, name: &str) -> Result<usize> {
    cases.column_index(name).ok_or_else(|| {
        EstimationError::Schema(bartik_panel::SchemaError::MissingColumn(name.to_string()))
    })
}

fn column_vec(values: &Array2<f64>, index: usize) -> Array1<f64> {
    values.column(index).to_owned()
}

/// Copy the named columns (plus an optional trailing intercept) into a
/// fresh design matrix.
fn assemble(values: &Array2<f64>, indices: &[usize], intercept: bool) -> Array2<f64> {
    let n = values.nrows();
    let mut out = Array2::<f64>::zeros((n, indices.len() + usize::from(intercept)));
    fill_columns(&mut out, 0, values, indices, intercept);
    out
}

/// Copy columns into `out` starting at `offset`; append a ones column when
/// `intercept` is set.
fn fill_columns(
    out: &mut Array2<f64>,
    offset: usize,
    values: &Array2<f64>,
    indices: &[usize],
    intercept: bool,
) {
    for (j, &idx) in indices.iter().enumerate() {
        out.column_mut(offset + j).assign(&values.column(idx));
    }
    if intercept {
        out.column_mut(offset + indices.len()).fill(1.0);
    }
}

fn first_non_finite(cases: &CompleteCases) -> Option<&str> {
    for (j, name) in cases.columns.iter().enumerate() {
        if cases.values.column(j).iter().any(|v| !v.is_finite()) {
            return Some(name);
        }
    }
    None
}
