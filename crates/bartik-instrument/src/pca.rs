//! Principal-component extraction for exposure scoring.
//!
//! The exposure score is the first principal component of the entity-by-
//! category weight matrix, computed from the correlation matrix (features
//! standardized to unit variance) via a cyclic Jacobi eigendecomposition.
//! K is small (a handful of buckets), so an iterative Jacobi sweep is both
//! simple and fast; no LAPACK binding is needed.

use crate::error::{InstrumentError, Result};
use ndarray::{Array1, Array2};

/// Columns with sample standard deviation below this carry no cross-entity
/// information and are zeroed rather than standardized.
const STD_FLOOR: f64 = 1e-12;

const JACOBI_MAX_SWEEPS: usize = 64;
const JACOBI_TOLERANCE: f64 = 1e-12;

/// Eigenvalues (descending) and matching eigenvector columns.
#[derive(Debug, Clone)]
pub struct EigenDecomposition {
    /// Eigenvalues in descending order.
    pub eigenvalues: Array1<f64>,
    /// Eigenvectors as columns, ordered to match the eigenvalues.
    pub eigenvectors: Array2<f64>,
}

/// First principal component of a data matrix.
#[derive(Debug, Clone)]
pub struct PrincipalComponent {
    /// Per-row scores: each row of the standardized matrix projected onto
    /// the leading eigenvector.
    pub scores: Array1<f64>,
    /// The leading eigenvector (loadings per column).
    pub loadings: Array1<f64>,
    /// Share of total variance explained by the leading component.
    pub explained: f64,
}

/// Compute the first principal component of `x` (rows = entities,
/// columns = categories).
///
/// Columns are centered and scaled to unit variance before the correlation
/// matrix is formed; zero-variance columns are centered only and contribute
/// nothing. The sign of the returned component is whatever the
/// eigendecomposition produced; orientation is the caller's concern.
///
/// # Errors
/// Fails when `x` has fewer than two rows or columns.
pub fn first_principal_component(x: &Array2<f64>) -> Result<PrincipalComponent> {
    let (n, k) = x.dim();
    if n < 2 {
        return Err(InstrumentError::TooFewEntities { n });
    }
    if k < 2 {
        return Err(InstrumentError::TooFewCategories { k });
    }

    let standardized = standardize_columns(x);
    let corr = correlation_matrix(&standardized);
    let eigen = jacobi_eigendecomp(&corr, JACOBI_MAX_SWEEPS, JACOBI_TOLERANCE)?;

    let loadings = eigen.eigenvectors.column(0).to_owned();
    let scores = standardized.dot(&loadings);
    let total: f64 = eigen.eigenvalues.sum();
    let explained = if total > 0.0 {
        eigen.eigenvalues[0] / total
    } else {
        0.0
    };

    Ok(PrincipalComponent {
        scores,
        loadings,
        explained,
    })
}

/// Center each column and scale to unit sample variance.
fn standardize_columns(x: &Array2<f64>) -> Array2<f64> {
    let n = x.nrows() as f64;
    let mut out = x.clone();
    for mut col in out.columns_mut() {
        let mean = col.sum() / n;
        col.mapv_inplace(|v| v - mean);
        let var = col.iter().map(|v| v * v).sum::<f64>() / (n - 1.0);
        let std = var.sqrt();
        if std > STD_FLOOR {
            col.mapv_inplace(|v| v / std);
        }
    }
    out
}

/// Sample correlation matrix of already-standardized columns.
fn correlation_matrix(standardized: &Array2<f64>) -> Array2<f64> {
    let n = standardized.nrows() as f64;
    standardized.t().dot(standardized) / (n - 1.0)
}

/// Jacobi eigendecomposition of a symmetric matrix.
///
/// Runs cyclic sweeps over the off-diagonal pairs, annihilating each with a
/// Givens rotation, until every off-diagonal magnitude falls below
/// `tolerance` or `max_sweeps` is reached. Eigenvalues come back in
/// descending order with matching eigenvector columns.
pub fn jacobi_eigendecomp(
    matrix: &Array2<f64>,
    max_sweeps: usize,
    tolerance: f64,
) -> Result<EigenDecomposition> {
    let n = matrix.nrows();
    if n != matrix.ncols() {
        return Err(InstrumentError::DimensionMismatch {
            expected: n,
            actual: matrix.ncols(),
        });
    }

    let mut a = matrix.clone();
    let mut v = Array2::<f64>::eye(n);

    for _sweep in 0..max_sweeps {
        if max_off_diagonal(&a) < tolerance {
            break;
        }
        for p in 0..n {
            for q in (p + 1)..n {
                if a[[p, q]].abs() >= tolerance {
                    rotate(&mut a, &mut v, p, q);
                }
            }
        }
    }

    let diag: Vec<f64> = (0..n).map(|i| a[[i, i]]).collect();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| {
        diag[j]
            .partial_cmp(&diag[i])
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let eigenvalues = Array1::from_iter(order.iter().map(|&i| diag[i]));
    let mut eigenvectors = Array2::<f64>::zeros((n, n));
    for (dst, &src) in order.iter().enumerate() {
        eigenvectors.column_mut(dst).assign(&v.column(src));
    }

    Ok(EigenDecomposition {
        eigenvalues,
        eigenvectors,
    })
}

fn max_off_diagonal(a: &Array2<f64>) -> f64 {
    let n = a.nrows();
    let mut max = 0.0_f64;
    for i in 0..n {
        for j in (i + 1)..n {
            max = max.max(a[[i, j]].abs());
        }
    }
    max
}

/// Symmetric rotation of rows/columns `p` and `q` zeroing `a[[p, q]]`,
/// accumulated into the eigenvector matrix `v`.
fn rotate(a: &mut Array2<f64>, v: &mut Array2<f64>, p: usize, q: usize) {
    let (app, aqq, apq) = (a[[p, p]], a[[q, q]], a[[p, q]]);
    let theta = 0.5 * (2.0 * apq).atan2(aqq - app);
    let (s, c) = theta.sin_cos();

    a[[p, p]] = c * c * app - 2.0 * s * c * apq + s * s * aqq;
    a[[q, q]] = s * s * app + 2.0 * s * c * apq + c * c * aqq;
    a[[p, q]] = 0.0;
    a[[q, p]] = 0.0;

    let n = a.nrows();
    for i in (0..n).filter(|&i| i != p && i != q) {
        let (aip, aiq) = (a[[i, p]], a[[i, q]]);
        a[[i, p]] = c * aip - s * aiq;
        a[[i, q]] = s * aip + c * aiq;
        a[[p, i]] = a[[i, p]];
        a[[q, i]] = a[[i, q]];
    }

    for i in 0..n {
        let (vip, viq) = (v[[i, p]], v[[i, q]]);
        v[[i, p]] = c * vip - s * viq;
        v[[i, q]] = s * vip + c * viq;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_jacobi_identity() {
        let eye = Array2::<f64>::eye(3);
        let eigen = jacobi_eigendecomp(&eye, 100, 1e-12).unwrap();
        for i in 0..3 {
            assert_relative_eq!(eigen.eigenvalues[i], 1.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn test_jacobi_known_symmetric() {
        // eigenvalues of [[2,1],[1,2]] are 3 and 1
        let m = array![[2.0, 1.0], [1.0, 2.0]];
        let eigen = jacobi_eigendecomp(&m, 100, 1e-12).unwrap();
        assert_relative_eq!(eigen.eigenvalues[0], 3.0, epsilon = 1e-10);
        assert_relative_eq!(eigen.eigenvalues[1], 1.0, epsilon = 1e-10);

        // reconstruct M = V diag(λ) V^T
        let lambda = Array2::from_diag(&eigen.eigenvalues);
        let recon = eigen.eigenvectors.dot(&lambda).dot(&eigen.eigenvectors.t());
        for i in 0..2 {
            for j in 0..2 {
                assert_relative_eq!(recon[[i, j]], m[[i, j]], epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_jacobi_rejects_non_square() {
        let m = Array2::<f64>::zeros((2, 3));
        assert!(matches!(
            jacobi_eigendecomp(&m, 100, 1e-12),
            Err(InstrumentError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_pc_captures_dominant_direction() {
        // two perfectly anti-correlated columns plus noise-free spread:
        // the first component explains everything
        let x = array![
            [1.0, 0.0],
            [0.8, 0.2],
            [0.6, 0.4],
            [0.4, 0.6],
            [0.2, 0.8],
            [0.0, 1.0],
        ];
        let pc = first_principal_component(&x).unwrap();
        assert_relative_eq!(pc.explained, 1.0, epsilon = 1e-9);
        // scores are centered
        assert_relative_eq!(pc.scores.sum(), 0.0, epsilon = 1e-9);
        // monotone along the spread, in one direction or the other
        let increasing = pc.scores.windows(2).into_iter().all(|w| w[1] > w[0]);
        let decreasing = pc.scores.windows(2).into_iter().all(|w| w[1] < w[0]);
        assert!(increasing || decreasing);
    }

    #[test]
    fn test_pc_zero_variance_column_is_inert() {
        let x = array![[0.5, 1.0, 0.1], [0.5, 2.0, 0.2], [0.5, 3.0, 0.3]];
        let pc = first_principal_component(&x).unwrap();
        assert_relative_eq!(pc.loadings[0], 0.0, epsilon = 1e-9);
    }

    #[test]
    fn test_pc_needs_two_rows() {
        let x = Array2::<f64>::zeros((1, 3));
        assert!(matches!(
            first_principal_component(&x),
            Err(InstrumentError::TooFewEntities { n: 1 })
        ));
    }
}
