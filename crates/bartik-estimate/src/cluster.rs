//! Cluster-robust variance estimation.
//!
//! The sandwich estimator with per-cluster score sums:
//!
//! ```text
//! V = c * (X'X)^{-1} * [ Σ_g (X_g' u_g)(X_g' u_g)' ] * (X'X)^{-1}
//! c = G/(G-1) * (n-1)/(n-k)
//! ```
//!
//! allowing arbitrary correlation and heteroskedasticity within clusters.
//! The homoskedastic variance is computed alongside as a clearly labeled
//! alternative; it is never what callers report by default.

use crate::error::{EstimationError, Result};
use crate::fixed_effects::group_indices;
use ndarray::{Array1, Array2};

/// Robust and naive variance matrices for one fit.
#[derive(Debug, Clone)]
pub struct ClusterVcov {
    /// Cluster-robust sandwich variance. The default for reporting.
    pub robust: Array2<f64>,
    /// Homoskedastic `s² (X'X)^{-1}` variance. A labeled alternative only.
    pub naive: Array2<f64>,
    /// Number of distinct clusters.
    pub n_clusters: usize,
}

/// Compute cluster-robust and naive variance for coefficients fit on `x`.
///
/// `residuals` are the structural residuals of the model (for 2SLS,
/// `y - X b` with the *actual* endogenous values, not the second-stage
/// fitted ones). `xtx_inv` is the bread from the same design `x`.
///
/// # Errors
/// [`EstimationError::SingleCluster`] when every row shares one cluster
/// label; the clustered variance is undefined there and must not be
/// reported as a finite number.
pub fn clustered_vcov(
    x: &Array2<f64>,
    residuals: &Array1<f64>,
    xtx_inv: &Array2<f64>,
    clusters: &[String],
) -> Result<ClusterVcov> {
    let (n, k) = x.dim();
    if residuals.len() != n || clusters.len() != n {
        return Err(EstimationError::Numeric(format!(
            "vcov shape mismatch: {n} rows, {} residuals, {} cluster labels",
            residuals.len(),
            clusters.len()
        )));
    }
    if n <= k {
        return Err(EstimationError::TooFewObservations {
            n_obs: n,
            n_params: k,
        });
    }

    let (ids, n_clusters) = group_indices(clusters);
    if n_clusters < 2 {
        return Err(EstimationError::SingleCluster {
            cluster: clusters.first().cloned().unwrap_or_default(),
        });
    }

    // per-cluster score sums s_g = Σ_{i∈g} x_i u_i
    let mut scores = Array2::<f64>::zeros((n_clusters, k));
    for (row, &g) in ids.iter().enumerate() {
        for j in 0..k {
            scores[[g, j]] += x[[row, j]] * residuals[row];
        }
    }

    let mut meat = Array2::<f64>::zeros((k, k));
    for g in 0..n_clusters {
        for i in 0..k {
            for j in 0..k {
                meat[[i, j]] += scores[[g, i]] * scores[[g, j]];
            }
        }
    }

    let correction = (n_clusters as f64 / (n_clusters as f64 - 1.0))
        * ((n as f64 - 1.0) / (n as f64 - k as f64));
    let robust = xtx_inv.dot(&meat).dot(xtx_inv) * correction;

    let sigma2 = residuals.iter().map(|u| u * u).sum::<f64>() / (n - k) as f64;
    let naive = xtx_inv * sigma2;

    Ok(ClusterVcov {
        robust,
        naive,
        n_clusters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lstsq::least_squares;

    /// Panel with strong within-cluster correlation: the clustered SE must
    /// exceed the naive SE.
    ///
    /// Both the regressor and the residual carry a cluster-level component;
    /// that is what makes the per-cluster score sums large instead of
    /// cancelling, so the Moulton inflation has to show up.
    #[test]
    fn test_clustering_inflates_se_under_cluster_correlation() {
        // 4 clusters x 10 rows
        let n = 40;
        let mut x_vals = Vec::with_capacity(n * 2);
        let mut y_vals = Vec::with_capacity(n);
        let mut labels = Vec::with_capacity(n);
        let cluster_x = [1.0, -1.0, 1.0, -1.0];
        let cluster_shock = [2.0, 2.0, -2.0, -2.0];
        for g in 0..4usize {
            for i in 0..10usize {
                let xi = cluster_x[g] + 0.1 * (i as f64 - 4.5);
                x_vals.push(1.0);
                x_vals.push(xi);
                // y = x + cluster-level error (+ tiny idiosyncratic part)
                y_vals.push(xi + cluster_shock[g] + 0.01 * (i as f64 - 4.5));
                labels.push(format!("c{g}"));
            }
        }
        let x = Array2::from_shape_vec((n, 2), x_vals).unwrap();
        let y = Array1::from_vec(y_vals);
        let fit = least_squares(&x, &y, &["const".to_string(), "x".to_string()]).unwrap();
        let vcov = clustered_vcov(&x, &fit.residuals, &fit.xtx_inv, &labels).unwrap();

        assert_eq!(vcov.n_clusters, 4);
        let robust_se = vcov.robust[[1, 1]].sqrt();
        let naive_se = vcov.naive[[1, 1]].sqrt();
        assert!(
            robust_se > naive_se,
            "expected clustered SE {robust_se} > naive SE {naive_se}"
        );
    }

    #[test]
    fn test_single_cluster_is_fatal() {
        let x = Array2::from_shape_vec((4, 1), vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let y = Array1::from_vec(vec![1.1, 1.9, 3.2, 3.8]);
        let fit = least_squares(&x, &y, &["x".to_string()]).unwrap();
        let labels = vec!["only".to_string(); 4];
        let err = clustered_vcov(&x, &fit.residuals, &fit.xtx_inv, &labels).unwrap_err();
        assert!(matches!(err, EstimationError::SingleCluster { .. }));
    }

    #[test]
    fn test_vcov_is_symmetric_psd_diagonal() {
        let x = Array2::from_shape_vec(
            (6, 2),
            vec![1.0, 0.3, 1.0, -0.7, 1.0, 1.2, 1.0, 0.1, 1.0, -0.4, 1.0, 0.9],
        )
        .unwrap();
        let y = Array1::from_vec(vec![0.5, -0.1, 1.3, 0.2, 0.0, 1.0]);
        let fit = least_squares(&x, &y, &["const".to_string(), "x".to_string()]).unwrap();
        let labels: Vec<String> = (0..6).map(|i| format!("c{}", i % 3)).collect();
        let vcov = clustered_vcov(&x, &fit.residuals, &fit.xtx_inv, &labels).unwrap();

        for i in 0..2 {
            assert!(vcov.robust[[i, i]] >= 0.0);
            assert!(vcov.naive[[i, i]] >= 0.0);
            for j in 0..2 {
                approx::assert_relative_eq!(
                    vcov.robust[[i, j]],
                    vcov.robust[[j, i]],
                    epsilon = 1e-12
                );
            }
        }
    }
}
