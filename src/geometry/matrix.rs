//! Matrix operations.
//!
//! Thin helpers over `nalgebra` dynamic matrices used by circumsphere
//! computations and by the anisotropic metric field. All sizes are at most
//! `4 × 4`, so dynamic storage keeps the `const D` plumbing simple.

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

/// Matrix type used by geometric helpers.
pub type Matrix = DMatrix<f64>;

/// Error type for matrix operations.
///
/// # Examples
///
/// ```rust
/// use meliorate::geometry::matrix::MatrixError;
///
/// let err = MatrixError::SingularMatrix;
/// assert!(matches!(err, MatrixError::SingularMatrix));
/// ```
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum MatrixError {
    /// Matrix is singular.
    #[error("Matrix is singular!")]
    SingularMatrix,
    /// Matrix is not symmetric positive definite.
    #[error("Matrix is not symmetric positive definite")]
    NotPositiveDefinite,
    /// Operand shapes do not agree.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected row count.
        expected: usize,
        /// Actual row count.
        actual: usize,
    },
}

/// Default tolerance for matrix singularity checks, relative to the largest
/// absolute entry.
pub const SINGULARITY_TOLERANCE: f64 = 1e-12;

/// Largest absolute entry, used to scale tolerances.
#[must_use]
pub fn max_abs_entry(matrix: &Matrix) -> f64 {
    matrix.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()))
}

/// Scales [`SINGULARITY_TOLERANCE`] by the matrix magnitude raised to its
/// order, which is the natural scale of its determinant.
#[must_use]
pub fn adaptive_tolerance(matrix: &Matrix) -> f64 {
    let n = i32::try_from(matrix.nrows()).unwrap_or(i32::MAX);
    SINGULARITY_TOLERANCE * max_abs_entry(matrix).powi(n)
}

/// Solves `a x = b` by LU decomposition.
///
/// # Errors
///
/// Returns [`MatrixError::DimensionMismatch`] if `b` does not match `a`, and
/// [`MatrixError::SingularMatrix`] when the determinant is negligible relative
/// to [`adaptive_tolerance`].
pub fn solve(a: Matrix, b: &DVector<f64>) -> Result<DVector<f64>, MatrixError> {
    if a.nrows() != b.len() || !a.is_square() {
        return Err(MatrixError::DimensionMismatch {
            expected: a.nrows(),
            actual: b.len(),
        });
    }
    let tolerance = adaptive_tolerance(&a);
    let lu = a.lu();
    if lu.determinant().abs() <= tolerance {
        return Err(MatrixError::SingularMatrix);
    }
    lu.solve(b).ok_or(MatrixError::SingularMatrix)
}

/// Upper-triangular factor `U` with `U^T U = m` for a symmetric positive
/// definite matrix.
///
/// # Errors
///
/// Returns [`MatrixError::NotPositiveDefinite`] if the Cholesky factorization
/// fails.
pub fn cholesky_upper(m: Matrix) -> Result<Matrix, MatrixError> {
    m.cholesky()
        .map(|c| c.l().transpose())
        .ok_or(MatrixError::NotPositiveDefinite)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn solve_small_system() {
        let a = Matrix::from_row_slice(2, 2, &[2.0, 1.0, 1.0, 3.0]);
        let b = DVector::from_vec(vec![3.0, 5.0]);
        let x = solve(a, &b).unwrap();
        assert_relative_eq!(x[0], 0.8, epsilon = 1e-12);
        assert_relative_eq!(x[1], 1.4, epsilon = 1e-12);
    }

    #[test]
    fn solve_singular_and_mismatched() {
        let a = Matrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 4.0]);
        let b = DVector::from_vec(vec![1.0, 1.0]);
        assert_eq!(solve(a, &b), Err(MatrixError::SingularMatrix));

        let a = Matrix::identity(3, 3);
        assert!(matches!(
            solve(a, &b),
            Err(MatrixError::DimensionMismatch { expected: 3, actual: 2 })
        ));
    }

    #[test]
    fn cholesky_reconstructs() {
        let m = Matrix::from_row_slice(2, 2, &[4.0, 2.0, 2.0, 3.0]);
        let u = cholesky_upper(m.clone()).unwrap();
        let back = u.transpose() * &u;
        assert_relative_eq!(back, m, epsilon = 1e-12);

        let indefinite = Matrix::from_row_slice(2, 2, &[1.0, 0.0, 0.0, -1.0]);
        assert_eq!(
            cholesky_upper(indefinite),
            Err(MatrixError::NotPositiveDefinite)
        );
    }
}
