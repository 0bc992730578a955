//! Circumsphere calculations for simplices.

use nalgebra::DVector;

use crate::geometry::matrix::{Matrix, solve};
use crate::geometry::point::Point;

use super::CircumcenterError;

/// Calculate the circumcenter of a `D`-simplex.
///
/// Solves the perpendicular-bisector system
/// `2 (p_i - p_0) · c' = |p_i - p_0|^2` for `c' = c - p_0`, which keeps the
/// right-hand side small for simplices far from the origin.
///
/// # Errors
///
/// Returns [`CircumcenterError::InvalidSimplex`] unless exactly `D + 1` points
/// are given, and [`CircumcenterError::Matrix`] for flat simplices.
///
/// # Example
///
/// ```
/// use meliorate::geometry::point::Point;
/// use meliorate::geometry::util::circumcenter;
///
/// let points = [
///     Point::new([0.0, 0.0, 0.0]),
///     Point::new([1.0, 0.0, 0.0]),
///     Point::new([0.0, 1.0, 0.0]),
///     Point::new([0.0, 0.0, 1.0]),
/// ];
/// let center = circumcenter(&points).unwrap();
/// assert!((center.coords()[0] - 0.5).abs() < 1e-12);
/// ```
pub fn circumcenter<const D: usize>(points: &[Point<D>]) -> Result<Point<D>, CircumcenterError> {
    if points.len() != D + 1 {
        return Err(CircumcenterError::InvalidSimplex {
            actual: points.len(),
            expected: D + 1,
            dimension: D,
        });
    }

    let origin = points[0];
    let mut a = Matrix::zeros(D, D);
    let mut b = DVector::zeros(D);
    for (i, p) in points[1..].iter().enumerate() {
        let diff = *p - origin;
        for j in 0..D {
            a[(i, j)] = 2.0 * diff[j];
        }
        b[i] = diff.norm_squared();
    }

    let x = solve(a, &b)?;
    Ok(origin + Point::new(std::array::from_fn(|i| x[i])))
}

/// Circumradius of a `D`-simplex.
///
/// # Errors
///
/// Propagates [`circumcenter`] failures.
pub fn circumradius<const D: usize>(points: &[Point<D>]) -> Result<f64, CircumcenterError> {
    let center = circumcenter(points)?;
    Ok(center.distance(&points[0]))
}
