//! Least-squares core.
//!
//! Householder QR with column pivoting. Pivoting makes rank deficiency
//! detectable instead of producing a near-singular, misleading solution:
//! when a pivot column's remaining norm collapses relative to the largest
//! initial column norm, the named column is reported as collinear and the
//! fit fails.

use crate::error::{EstimationError, Result};
use ndarray::{Array1, Array2};

/// Relative pivot threshold below which a column is declared collinear.
const RANK_TOLERANCE: f64 = 1e-10;

/// A completed least-squares fit.
#[derive(Debug, Clone)]
pub struct Lstsq {
    /// Coefficients in the original column order.
    pub coefficients: Array1<f64>,
    /// Fitted values `X b`.
    pub fitted: Array1<f64>,
    /// Residuals `y - X b`.
    pub residuals: Array1<f64>,
    /// `(X'X)^{-1}`, the bread of every sandwich variance downstream.
    pub xtx_inv: Array2<f64>,
    /// Number of observations.
    pub n: usize,
    /// Number of regressors.
    pub k: usize,
}

impl Lstsq {
    /// Residual sum of squares.
    pub fn rss(&self) -> f64 {
        self.residuals.iter().map(|u| u * u).sum()
    }
}

/// Solve `min ||y - X b||` by pivoted Householder QR.
///
/// `names` label the columns of `x` for error reporting; a missing label
/// falls back to the column index.
///
/// # Errors
/// - [`EstimationError::TooFewObservations`] when `n < k`.
/// - [`EstimationError::Collinear`] when `x` is rank deficient at the
///   pivot tolerance.
pub fn least_squares(x: &Array2<f64>, y: &Array1<f64>, names: &[String]) -> Result<Lstsq> {
    let (n, k) = x.dim();
    if y.len() != n {
        return Err(EstimationError::Numeric(format!(
            "outcome length {} does not match {} design rows",
            y.len(),
            n
        )));
    }
    if n < k || k == 0 {
        return Err(EstimationError::TooFewObservations {
            n_obs: n,
            n_params: k,
        });
    }

    let mut a = x.clone();
    let mut qty = y.clone();
    let mut perm: Vec<usize> = (0..k).collect();

    let max_norm0 = (0..k)
        .map(|j| column_norm_sq(&a, 0, j).sqrt())
        .fold(0.0f64, f64::max);
    if max_norm0 <= 0.0 {
        return Err(EstimationError::Collinear {
            column: column_name(names, perm[0]),
        });
    }

    for j in 0..k {
        // pivot: bring the column with the largest remaining norm to front
        let (pivot, pivot_norm_sq) = (j..k)
            .map(|jj| (jj, column_norm_sq(&a, j, jj)))
            .fold((j, f64::NEG_INFINITY), |best, cand| {
                if cand.1 > best.1 { cand } else { best }
            });
        if pivot != j {
            swap_columns(&mut a, j, pivot);
            perm.swap(j, pivot);
        }

        let norm = pivot_norm_sq.max(0.0).sqrt();
        if norm <= RANK_TOLERANCE * max_norm0 {
            return Err(EstimationError::Collinear {
                column: column_name(names, perm[j]),
            });
        }

        // Householder reflection annihilating column j below the diagonal
        let alpha = if a[[j, j]] >= 0.0 { -norm } else { norm };
        let mut v = Array1::<f64>::zeros(n - j);
        v[0] = a[[j, j]] - alpha;
        for i in (j + 1)..n {
            v[i - j] = a[[i, j]];
        }
        let vtv: f64 = v.iter().map(|e| e * e).sum();
        if vtv > 0.0 {
            let beta = 2.0 / vtv;
            for jj in j..k {
                let w: f64 = (j..n).map(|i| v[i - j] * a[[i, jj]]).sum::<f64>() * beta;
                for i in j..n {
                    a[[i, jj]] -= w * v[i - j];
                }
            }
            let w: f64 = (j..n).map(|i| v[i - j] * qty[i]).sum::<f64>() * beta;
            for i in j..n {
                qty[i] -= w * v[i - j];
            }
        }
        a[[j, j]] = alpha;
        for i in (j + 1)..n {
            a[[i, j]] = 0.0;
        }
    }

    // back-substitute R b = Q'y
    let mut b_perm = Array1::<f64>::zeros(k);
    for j in (0..k).rev() {
        let mut acc = qty[j];
        for jj in (j + 1)..k {
            acc -= a[[j, jj]] * b_perm[jj];
        }
        b_perm[j] = acc / a[[j, j]];
    }

    // R^{-1} by columns, then (X'X)^{-1} = P R^{-1} R^{-T} P'
    let mut r_inv = Array2::<f64>::zeros((k, k));
    for col in 0..k {
        for j in (0..=col).rev() {
            let mut acc = if j == col { 1.0 } else { 0.0 };
            for jj in (j + 1)..=col {
                acc -= a[[j, jj]] * r_inv[[jj, col]];
            }
            r_inv[[j, col]] = acc / a[[j, j]];
        }
    }
    let m = r_inv.dot(&r_inv.t());
    let mut xtx_inv = Array2::<f64>::zeros((k, k));
    for i in 0..k {
        for j in 0..k {
            xtx_inv[[perm[i], perm[j]]] = m[[i, j]];
        }
    }

    let mut coefficients = Array1::<f64>::zeros(k);
    for j in 0..k {
        coefficients[perm[j]] = b_perm[j];
    }

    let fitted = x.dot(&coefficients);
    let residuals = y - &fitted;

    Ok(Lstsq {
        coefficients,
        fitted,
        residuals,
        xtx_inv,
        n,
        k,
    })
}

/// Invert a symmetric matrix by Gauss-Jordan with partial pivoting.
///
/// Used for the small Wald-statistic inversions; fails on singular input.
pub(crate) fn invert_symmetric(a: &Array2<f64>) -> Result<Array2<f64>> {
    let k = a.nrows();
    if a.ncols() != k {
        return Err(EstimationError::Numeric(format!(
            "cannot invert {}x{} matrix",
            a.nrows(),
            a.ncols()
        )));
    }
    let mut work = a.clone();
    let mut inv = Array2::<f64>::eye(k);

    for col in 0..k {
        let (pivot, pivot_val) = (col..k)
            .map(|r| (r, work[[r, col]].abs()))
            .fold((col, f64::NEG_INFINITY), |best, cand| {
                if cand.1 > best.1 { cand } else { best }
            });
        if pivot_val < 1e-14 {
            return Err(EstimationError::Numeric(
                "singular matrix in variance inversion".to_string(),
            ));
        }
        if pivot != col {
            swap_rows(&mut work, col, pivot);
            swap_rows(&mut inv, col, pivot);
        }
        let d = work[[col, col]];
        for j in 0..k {
            work[[col, j]] /= d;
            inv[[col, j]] /= d;
        }
        for r in 0..k {
            if r == col {
                continue;
            }
            let factor = work[[r, col]];
            if factor != 0.0 {
                for j in 0..k {
                    work[[r, j]] -= factor * work[[col, j]];
                    inv[[r, j]] -= factor * inv[[col, j]];
                }
            }
        }
    }
    Ok(inv)
}

fn column_norm_sq(a: &Array2<f64>, from_row: usize, col: usize) -> f64 {
    (from_row..a.nrows()).map(|i| a[[i, col]] * a[[i, col]]).sum()
}

fn swap_columns(a: &mut Array2<f64>, c1: usize, c2: usize) {
    for i in 0..a.nrows() {
        let tmp = a[[i, c1]];
        a[[i, c1]] = a[[i, c2]];
        a[[i, c2]] = tmp;
    }
}

fn swap_rows(a: &mut Array2<f64>, r1: usize, r2: usize) {
    for j in 0..a.ncols() {
        let tmp = a[[r1, j]];
        a[[r1, j]] = a[[r2, j]];
        a[[r2, j]] = tmp;
    }
}

fn column_name(names: &[String], index: usize) -> String {
    names
        .get(index)
        .cloned()
        .unwrap_or_else(|| format!("#{index}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn names(tags: &[&str]) -> Vec<String> {
        tags.iter().map(|t| (*t).to_string()).collect()
    }

    #[test]
    fn test_exact_solution_recovered() {
        // y = 2*x1 - 3*x2, no noise
        let x = Array2::from_shape_vec(
            (4, 2),
            vec![1.0, 0.0, 0.0, 1.0, 1.0, 1.0, 2.0, -1.0],
        )
        .unwrap();
        let y = Array1::from_vec(vec![2.0, -3.0, -1.0, 7.0]);
        let fit = least_squares(&x, &y, &names(&["x1", "x2"])).unwrap();
        assert_relative_eq!(fit.coefficients[0], 2.0, epsilon = 1e-12);
        assert_relative_eq!(fit.coefficients[1], -3.0, epsilon = 1e-12);
        assert_relative_eq!(fit.rss(), 0.0, epsilon = 1e-20);
    }

    #[test]
    fn test_collinear_column_is_named() {
        // x2 = 2 * x1
        let x = Array2::from_shape_vec(
            (4, 2),
            vec![1.0, 2.0, 2.0, 4.0, 3.0, 6.0, 4.0, 8.0],
        )
        .unwrap();
        let y = Array1::from_vec(vec![1.0, 2.0, 3.0, 4.0]);
        let err = least_squares(&x, &y, &names(&["x1", "x2"])).unwrap_err();
        assert!(matches!(err, EstimationError::Collinear { .. }));
    }

    #[test]
    fn test_too_few_rows() {
        let x = Array2::<f64>::zeros((2, 3));
        let y = Array1::<f64>::zeros(2);
        assert!(matches!(
            least_squares(&x, &y, &[]),
            Err(EstimationError::TooFewObservations { .. })
        ));
    }

    #[test]
    fn test_xtx_inv_matches_direct_inverse() {
        let x = Array2::from_shape_vec(
            (5, 2),
            vec![1.0, 0.5, 1.0, -0.2, 1.0, 1.3, 1.0, 0.8, 1.0, -1.1],
        )
        .unwrap();
        let y = Array1::from_vec(vec![0.1, 0.2, 0.3, 0.4, 0.5]);
        let fit = least_squares(&x, &y, &names(&["const", "x"])).unwrap();

        let xtx = x.t().dot(&x);
        let direct = invert_symmetric(&xtx).unwrap();
        for i in 0..2 {
            for j in 0..2 {
                assert_relative_eq!(fit.xtx_inv[[i, j]], direct[[i, j]], epsilon = 1e-10);
            }
        }
    }

    #[test]
    fn test_invert_symmetric_identity() {
        let a = Array2::from_shape_vec((2, 2), vec![4.0, 1.0, 1.0, 3.0]).unwrap();
        let inv = invert_symmetric(&a).unwrap();
        let prod = a.dot(&inv);
        assert_relative_eq!(prod[[0, 0]], 1.0, epsilon = 1e-12);
        assert_relative_eq!(prod[[0, 1]], 0.0, epsilon = 1e-12);
        assert_relative_eq!(prod[[1, 1]], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_residuals_orthogonal_to_design() {
        let x = Array2::from_shape_vec(
            (6, 2),
            vec![1.0, 2.0, 1.0, -1.0, 1.0, 0.0, 1.0, 3.0, 1.0, 1.5, 1.0, -2.0],
        )
        .unwrap();
        let y = Array1::from_vec(vec![1.0, -1.0, 0.5, 2.0, 0.0, -0.5]);
        let fit = least_squares(&x, &y, &names(&["const", "x"])).unwrap();
        let xtu = x.t().dot(&fit.residuals);
        for v in xtu.iter() {
            assert_relative_eq!(*v, 0.0, epsilon = 1e-10);
        }
    }
}
