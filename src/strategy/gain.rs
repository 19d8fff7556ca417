//! # LQR Gain Solver
//!
//! ## Responsibility
//! Turn a discrete system `(A, B)` and cost weights `(Q, R)` into the
//! infinite-horizon LQR feedback gain `K`. The LQR strategy only depends on
//! the synchronous [`GainSolver`] contract; [`DareSolver`] is the in-process
//! implementation.
//!
//! ## Method
//! Fixed-point iteration of the discrete algebraic Riccati equation:
//!
//! ```text
//! P ← Q + AᵀPA − AᵀPB (R + BᵀPB)⁻¹ BᵀPA
//! K  = (R + BᵀPB)⁻¹ BᵀPA
//! ```
//!
//! starting from `P = Q` until the Frobenius change is below the tolerance.

use nalgebra::DMatrix;
use thiserror::Error;
use tracing::debug;

/// Errors from a gain solve.
#[derive(Debug, Error, PartialEq)]
pub enum GainError {
    /// The input matrices do not describe a consistent system.
    #[error("dimension mismatch: {0}")]
    Dimension(String),

    /// `R + BᵀPB` could not be inverted.
    #[error("R + BᵀPB is singular")]
    Singular,

    /// The Riccati iterate became non-finite.
    #[error("riccati iteration diverged after {iterations} iterations")]
    Diverged {
        /// Iterations completed before divergence.
        iterations: usize,
    },

    /// The iterate had not settled within the iteration budget.
    #[error("riccati iteration did not converge in {iterations} iterations")]
    NotConverged {
        /// Iteration budget that was exhausted.
        iterations: usize,
    },
}

/// Computes an LQR gain matrix from `(A, B, Q, R)`.
///
/// Implementations may solve in-process or call out to a service; callers
/// only rely on this synchronous contract.
pub trait GainSolver: Send + Sync {
    /// Return `K` (inputs × states) minimising the infinite-horizon
    /// discrete quadratic cost.
    ///
    /// # Errors
    ///
    /// Returns a [`GainError`] when the system is malformed or no
    /// stabilising solution was found.
    fn solve(
        &self,
        a: &DMatrix<f64>,
        b: &DMatrix<f64>,
        q: &DMatrix<f64>,
        r: &DMatrix<f64>,
    ) -> Result<DMatrix<f64>, GainError>;
}

/// Discrete algebraic Riccati equation solver by fixed-point iteration.
#[derive(Debug, Clone)]
pub struct DareSolver {
    /// Maximum number of Riccati iterations.
    pub max_iterations: usize,
    /// Relative Frobenius-norm change at which the iterate counts as settled.
    pub tolerance: f64,
}

impl Default for DareSolver {
    fn default() -> Self {
        Self {
            max_iterations: 10_000,
            tolerance: 1e-12,
        }
    }
}

impl DareSolver {
    fn check_dimensions(
        a: &DMatrix<f64>,
        b: &DMatrix<f64>,
        q: &DMatrix<f64>,
        r: &DMatrix<f64>,
    ) -> Result<(), GainError> {
        let n = a.nrows();
        let m = b.ncols();
        if n == 0 || m == 0 {
            return Err(GainError::Dimension("A and B must be non-empty".into()));
        }
        if a.ncols() != n {
            return Err(GainError::Dimension(format!(
                "A must be square, got {}x{}",
                n,
                a.ncols()
            )));
        }
        if b.nrows() != n {
            return Err(GainError::Dimension(format!(
                "B has {} rows, expected {n}",
                b.nrows()
            )));
        }
        if q.shape() != (n, n) {
            return Err(GainError::Dimension(format!(
                "Q is {:?}, expected ({n}, {n})",
                q.shape()
            )));
        }
        if r.shape() != (m, m) {
            return Err(GainError::Dimension(format!(
                "R is {:?}, expected ({m}, {m})",
                r.shape()
            )));
        }
        Ok(())
    }

    fn gain_for(
        p: &DMatrix<f64>,
        a: &DMatrix<f64>,
        b: &DMatrix<f64>,
        r: &DMatrix<f64>,
    ) -> Result<DMatrix<f64>, GainError> {
        let bt_p = b.transpose() * p;
        let s = r + &bt_p * b;
        let s_inv = s.try_inverse().ok_or(GainError::Singular)?;
        Ok(s_inv * bt_p * a)
    }
}

impl GainSolver for DareSolver {
    fn solve(
        &self,
        a: &DMatrix<f64>,
        b: &DMatrix<f64>,
        q: &DMatrix<f64>,
        r: &DMatrix<f64>,
    ) -> Result<DMatrix<f64>, GainError> {
        Self::check_dimensions(a, b, q, r)?;

        let at = a.transpose();
        let mut p = q.clone();
        for iteration in 1..=self.max_iterations {
            let k = Self::gain_for(&p, a, b, r)?;
            let next = q + &at * &p * a - &at * &p * b * &k;
            let next = (&next + next.transpose()) * 0.5;
            if next.iter().any(|v| !v.is_finite()) {
                return Err(GainError::Diverged { iterations: iteration });
            }
            let change = (&next - &p).norm();
            let scale = 1.0 + next.norm();
            p = next;
            if change <= self.tolerance * scale {
                debug!(iterations = iteration, "riccati iteration converged");
                return Self::gain_for(&p, a, b, r);
            }
        }
        Err(GainError::NotConverged {
            iterations: self.max_iterations,
        })
    }
}
