//! Anisotropic metric tensors.
//!
//! A metric tensor `M` is symmetric positive definite; the length of an edge
//! vector `e` under it is `sqrt(eᵀ M e)`. A target edge size `h` corresponds to
//! the isotropic tensor `I / h²`, so an edge has unit metric length exactly
//! when it matches the local target.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use thiserror::Error;

use crate::geometry::matrix::{Matrix, MatrixError, cholesky_upper};
use crate::geometry::point::Point;

/// Relative tolerance for the symmetry check of user-supplied tensors.
const SYMMETRY_TOLERANCE: f64 = 1e-10;

/// Errors raised when constructing a metric tensor.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum MetricError {
    /// Row count or row length differs from `D`.
    #[error("Metric tensor must be {expected}x{expected}, got {rows} rows (row lengths {row_lengths:?})")]
    WrongShape {
        /// Ambient dimension.
        expected: usize,
        /// Number of rows supplied.
        rows: usize,
        /// Length of each supplied row.
        row_lengths: Vec<usize>,
    },
    /// `M[i][j] != M[j][i]` beyond tolerance.
    #[error("Metric tensor is not symmetric at ({row}, {col}): {upper} vs {lower}")]
    NotSymmetric {
        /// Row index.
        row: usize,
        /// Column index.
        col: usize,
        /// `M[row][col]`.
        upper: f64,
        /// `M[col][row]`.
        lower: f64,
    },
    /// An entry is NaN or infinite.
    #[error("Metric tensor has a non-finite entry")]
    NonFinite,
    /// The tensor is not positive definite.
    #[error("Metric tensor is not positive definite: {0}")]
    NotPositiveDefinite(#[from] MatrixError),
}

/// A symmetric positive definite `D × D` tensor stored row-major.
///
/// Serialized as a list of rows.
///
/// # Examples
///
/// ```
/// use meliorate::geometry::metric::MetricTensor;
/// use meliorate::geometry::point::Point;
///
/// // Edges along x should be twice as long as along y.
/// let m = MetricTensor::<2>::from_rows([[0.25, 0.0], [0.0, 1.0]]).unwrap();
/// assert!((m.length(&Point::new([2.0, 0.0])) - 1.0).abs() < 1e-12);
/// assert!((m.length(&Point::new([0.0, 1.0])) - 1.0).abs() < 1e-12);
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Vec<f64>>", into = "Vec<Vec<f64>>")]
pub struct MetricTensor<const D: usize> {
    entries: SmallVec<[f64; 9]>,
}

impl<const D: usize> MetricTensor<D> {
    /// The identity tensor (Euclidean lengths).
    #[must_use]
    pub fn identity() -> Self {
        Self::isotropic(1.0)
    }

    /// `I / h²`: unit metric length for edges of Euclidean length `h`.
    #[must_use]
    pub fn isotropic(h: f64) -> Self {
        let diag = 1.0 / (h * h);
        let entries = (0..D * D)
            .map(|k| if k / D == k % D { diag } else { 0.0 })
            .collect();
        Self { entries }
    }

    /// Builds and validates a tensor from its rows.
    ///
    /// # Errors
    ///
    /// Returns [`MetricError`] if an entry is not finite, the matrix is not
    /// symmetric, or it is not positive definite.
    pub fn from_rows(rows: [[f64; D]; D]) -> Result<Self, MetricError> {
        let entries: SmallVec<[f64; 9]> = rows.iter().flat_map(|r| r.iter().copied()).collect();
        Self::from_entries(entries)
    }

    fn from_entries(entries: SmallVec<[f64; 9]>) -> Result<Self, MetricError> {
        if entries.iter().any(|v| !v.is_finite()) {
            return Err(MetricError::NonFinite);
        }
        let scale = entries.iter().fold(0.0_f64, |acc, v| acc.max(v.abs()));
        for row in 0..D {
            for col in (row + 1)..D {
                let upper = entries[row * D + col];
                let lower = entries[col * D + row];
                if (upper - lower).abs() > SYMMETRY_TOLERANCE * scale.max(1.0) {
                    return Err(MetricError::NotSymmetric {
                        row,
                        col,
                        upper,
                        lower,
                    });
                }
            }
        }
        let tensor = Self { entries };
        cholesky_upper(tensor.to_matrix())?;
        Ok(tensor)
    }

    /// Entry `(row, col)`.
    #[must_use]
    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.entries[row * D + col]
    }

    /// `vᵀ M v`.
    #[must_use]
    pub fn quadratic_form(&self, v: &Point<D>) -> f64 {
        let mut acc = 0.0;
        for row in 0..D {
            for col in 0..D {
                acc += v[row] * self.entries[row * D + col] * v[col];
            }
        }
        acc
    }

    /// Metric length `sqrt(vᵀ M v)`.
    #[must_use]
    pub fn length(&self, v: &Point<D>) -> f64 {
        self.quadratic_form(v).max(0.0).sqrt()
    }

    /// `s · M`.
    #[must_use]
    pub fn scaled(&self, s: f64) -> Self {
        Self {
            entries: self.entries.iter().map(|v| v * s).collect(),
        }
    }

    /// Weighted arithmetic mean of tensors. A convex combination of SPD
    /// tensors is SPD. Returns `None` if the weights do not sum to a positive
    /// value.
    pub fn weighted_mean<'a, I>(items: I) -> Option<Self>
    where
        I: IntoIterator<Item = (f64, &'a Self)>,
    {
        let mut acc: SmallVec<[f64; 9]> = SmallVec::from_elem(0.0, D * D);
        let mut total = 0.0;
        for (w, tensor) in items {
            for (slot, v) in acc.iter_mut().zip(tensor.entries.iter()) {
                *slot += w * v;
            }
            total += w;
        }
        (total > 0.0).then(|| Self {
            entries: acc.into_iter().map(|v| v / total).collect(),
        })
    }

    /// Dense copy as an `nalgebra` matrix.
    #[must_use]
    pub fn to_matrix(&self) -> Matrix {
        Matrix::from_row_slice(D, D, &self.entries)
    }

    /// Upper-triangular `U` with `Uᵀ U = M`. Mapping points through `U` turns
    /// metric lengths into Euclidean lengths.
    ///
    /// # Errors
    ///
    /// Returns [`MatrixError::NotPositiveDefinite`] if the factorization fails,
    /// which cannot happen for a validated tensor unless it was scaled by a
    /// non-positive factor.
    pub fn transform(&self) -> Result<Matrix, MatrixError> {
        cholesky_upper(self.to_matrix())
    }
}

impl<const D: usize> Default for MetricTensor<D> {
    fn default() -> Self {
        Self::identity()
    }
}

impl<const D: usize> TryFrom<Vec<Vec<f64>>> for MetricTensor<D> {
    type Error = MetricError;

    fn try_from(rows: Vec<Vec<f64>>) -> Result<Self, Self::Error> {
        if rows.len() != D || rows.iter().any(|r| r.len() != D) {
            return Err(MetricError::WrongShape {
                expected: D,
                rows: rows.len(),
                row_lengths: rows.iter().map(Vec::len).collect(),
            });
        }
        Self::from_entries(rows.into_iter().flatten().collect())
    }
}

impl<const D: usize> From<MetricTensor<D>> for Vec<Vec<f64>> {
    fn from(tensor: MetricTensor<D>) -> Self {
        tensor.entries.chunks(D.max(1)).map(<[f64]>::to_vec).collect()
    }
}

/// Maps `p` through the upper-triangular factor of a metric.
#[must_use]
pub fn apply_transform<const D: usize>(transform: &Matrix, p: &Point<D>) -> Point<D> {
    Point::new(std::array::from_fn(|row| {
        (0..D).map(|col| transform[(row, col)] * p[col]).sum()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn isotropic_length_matches_target() {
        let m = MetricTensor::<3>::isotropic(0.5);
        assert_relative_eq!(m.length(&Point::new([0.5, 0.0, 0.0])), 1.0);
        assert_relative_eq!(m.length(&Point::new([0.0, 0.0, 1.0])), 2.0);
    }

    #[test]
    fn rejects_invalid_tensors() {
        assert!(matches!(
            MetricTensor::<2>::from_rows([[1.0, 0.5], [0.4, 1.0]]),
            Err(MetricError::NotSymmetric { row: 0, col: 1, .. })
        ));
        assert!(matches!(
            MetricTensor::<2>::from_rows([[1.0, 2.0], [2.0, 1.0]]),
            Err(MetricError::NotPositiveDefinite(_))
        ));
        assert_eq!(
            MetricTensor::<2>::from_rows([[f64::NAN, 0.0], [0.0, 1.0]]),
            Err(MetricError::NonFinite)
        );
    }

    #[test]
    fn transform_turns_metric_into_euclidean_length() {
        let m = MetricTensor::<2>::from_rows([[4.0, 1.0], [1.0, 2.0]]).unwrap();
        let u = m.transform().unwrap();
        let v = Point::new([0.3, -0.7]);
        let mapped = apply_transform(&u, &v);
        assert_relative_eq!(mapped.norm(), m.length(&v), epsilon = 1e-12);
    }

    #[test]
    fn weighted_mean_and_serde() {
        let a = MetricTensor::<2>::isotropic(1.0);
        let b = MetricTensor::<2>::isotropic(0.5);
        let mean = MetricTensor::weighted_mean([(1.0, &a), (1.0, &b)]).unwrap();
        assert_relative_eq!(mean.get(0, 0), 2.5);
        assert_relative_eq!(mean.get(0, 1), 0.0);
        assert!(MetricTensor::<2>::weighted_mean([]).is_none());

        let json = serde_json::to_string(&mean).unwrap();
        assert_eq!(json, "[[2.5,0.0],[0.0,2.5]]");
        let back: MetricTensor<2> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, mean);
        assert!(serde_json::from_str::<MetricTensor<2>>("[[1.0]]").is_err());
    }
}
