//! Ordinary least squares with an intercept, solved through nalgebra's SVD so
//! collinear calibration data yields the minimum-norm fit instead of an
//! error.

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

/// Singular values below this are treated as zero by the solve.
const SVD_EPSILON: f64 = 1e-12;

/// Errors from a regression fit.
#[derive(Debug, Error, PartialEq)]
pub enum RegressionError {
    /// Fewer rows than coefficients to estimate.
    #[error("not enough samples: have {have}, need {need}")]
    NotEnoughSamples {
        /// Rows supplied.
        have: usize,
        /// Rows required.
        need: usize,
    },

    /// Rows of differing width, or a target count that does not match.
    #[error("dimension mismatch: {0}")]
    Dimension(String),

    /// An input or the fitted solution was not finite.
    #[error("non-finite value in regression")]
    NonFinite,

    /// The least-squares solve failed.
    #[error("least squares solve failed: {0}")]
    Solve(String),
}

/// `target ≈ intercept + Σ slopes[i] · x[i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct LinearFit {
    /// Constant term.
    pub intercept: f64,
    /// One coefficient per predictor, in column order.
    pub slopes: Vec<f64>,
}

impl LinearFit {
    /// Evaluate the fit at `x`.
    pub fn predict(&self, x: &[f64]) -> f64 {
        self.intercept + self.slopes.iter().zip(x).map(|(b, v)| b * v).sum::<f64>()
    }
}

/// Fit `targets` against `predictors` (one row per sample).
///
/// # Errors
///
/// See [`RegressionError`].
pub fn fit_ols(predictors: &[Vec<f64>], targets: &[f64]) -> Result<LinearFit, RegressionError> {
    let rows = predictors.len();
    if rows != targets.len() {
        return Err(RegressionError::Dimension(format!(
            "{rows} predictor rows for {} targets",
            targets.len()
        )));
    }
    let width = predictors.first().map_or(0, Vec::len);
    if predictors.iter().any(|r| r.len() != width) {
        return Err(RegressionError::Dimension("ragged predictor rows".into()));
    }
    let need = width + 1;
    if rows < need {
        return Err(RegressionError::NotEnoughSamples { have: rows, need });
    }
    if targets.iter().chain(predictors.iter().flatten()).any(|v| !v.is_finite()) {
        return Err(RegressionError::NonFinite);
    }

    let design = DMatrix::from_fn(rows, need, |r, c| if c == 0 { 1.0 } else { predictors[r][c - 1] });
    let y = DVector::from_column_slice(targets);
    let beta = design
        .svd(true, true)
        .solve(&y, SVD_EPSILON)
        .map_err(|e| RegressionError::Solve(e.to_string()))?;
    if beta.iter().any(|v| !v.is_finite()) {
        return Err(RegressionError::NonFinite);
    }

    Ok(LinearFit {
        intercept: beta[0],
        slopes: beta.iter().skip(1).copied().collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recovers_exact_plane() {
        let xs: Vec<Vec<f64>> = vec![
            vec![0.0, 0.0],
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![2.0, 3.0],
            vec![-1.0, 4.0],
        ];
        let ys: Vec<f64> = xs.iter().map(|x| 0.5 + 2.0 * x[0] - 3.0 * x[1]).collect();
        let fit = fit_ols(&xs, &ys).unwrap_or_else(|e| panic!("{e}"));
        assert!((fit.intercept - 0.5).abs() < 1e-9);
        assert!((fit.slopes[0] - 2.0).abs() < 1e-9);
        assert!((fit.slopes[1] + 3.0).abs() < 1e-9);
        assert!((fit.predict(&[1.0, 1.0]) + 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_least_squares_on_noisy_line() {
        let xs = vec![vec![0.0], vec![1.0], vec![2.0], vec![3.0]];
        let ys = vec![1.0, 2.9, 5.1, 7.0];
        let fit = fit_ols(&xs, &ys).unwrap_or_else(|e| panic!("{e}"));
        assert!((fit.slopes[0] - 2.0).abs() < 0.1);
        assert!((fit.intercept - 1.0).abs() < 0.1);
    }

    #[test]
    fn test_too_few_rows() {
        let err = fit_ols(&[vec![1.0, 2.0]], &[3.0]);
        assert_eq!(err, Err(RegressionError::NotEnoughSamples { have: 1, need: 3 }));
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let err = fit_ols(&[vec![1.0], vec![1.0, 2.0], vec![3.0]], &[1.0, 2.0, 3.0]);
        assert!(matches!(err, Err(RegressionError::Dimension(_))));
    }

    #[test]
    fn test_non_finite_rejected() {
        let err = fit_ols(&[vec![1.0], vec![f64::NEG_INFINITY]], &[1.0, 2.0]);
        assert_eq!(err, Err(RegressionError::NonFinite));
    }

    #[test]
    fn test_collinear_columns_still_fit() {
        let xs = vec![vec![1.0, 2.0], vec![2.0, 4.0], vec![3.0, 6.0], vec![4.0, 8.0]];
        let ys = vec![2.0, 4.0, 6.0, 8.0];
        let fit = fit_ols(&xs, &ys).unwrap_or_else(|e| panic!("{e}"));
        for (x, y) in xs.iter().zip(&ys) {
            assert!((fit.predict(x) - y).abs() < 1e-6);
        }
    }
}
