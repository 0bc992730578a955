//! Geometric measure computations for simplices.

use crate::geometry::matrix::Matrix;
use crate::geometry::point::Point;
use crate::geometry::util::conversions::count_to_f64;

/// `k!` for the small orders that occur in meshes.
#[must_use]
#[expect(clippy::cast_precision_loss, reason = "k is at most a few dozen")]
pub const fn factorial(k: usize) -> f64 {
    let mut acc = 1.0;
    let mut i = 2;
    while i <= k {
        acc *= i as f64;
        i += 1;
    }
    acc
}

/// Signed volume `det[p1 - p0, ..., pD - p0] / D!` in floating point.
///
/// The sign is only trustworthy away from degeneracy; use
/// [`simplex_orientation`](crate::geometry::predicates::simplex_orientation)
/// for decisions. Returns `0.0` if `points.len() != D + 1`.
///
/// # Examples
///
/// ```
/// use meliorate::geometry::point::Point;
/// use meliorate::geometry::util::signed_volume;
/// use approx::assert_relative_eq;
///
/// let tetrahedron = [
///     Point::new([0.0, 0.0, 0.0]),
///     Point::new([1.0, 0.0, 0.0]),
///     Point::new([0.0, 1.0, 0.0]),
///     Point::new([0.0, 0.0, 1.0]),
/// ];
/// assert_relative_eq!(signed_volume(&tetrahedron), 1.0 / 6.0, epsilon = 1e-12);
/// ```
#[must_use]
pub fn signed_volume<const D: usize>(points: &[Point<D>]) -> f64 {
    if points.len() != D + 1 {
        return 0.0;
    }
    let origin = points[0];
    match D {
        2 => {
            let u = points[1] - origin;
            let v = points[2] - origin;
            0.5 * (u[0] * v[1] - u[1] * v[0])
        }
        3 => {
            let u = points[1] - origin;
            let v = points[2] - origin;
            let w = points[3] - origin;
            let det = u[0] * (v[1] * w[2] - v[2] * w[1]) - u[1] * (v[0] * w[2] - v[2] * w[0])
                + u[2] * (v[0] * w[1] - v[1] * w[0]);
            det / 6.0
        }
        _ => {
            let mut m = Matrix::zeros(D, D);
            for (i, p) in points[1..].iter().enumerate() {
                let diff = *p - origin;
                for j in 0..D {
                    m[(i, j)] = diff[j];
                }
            }
            m.determinant() / factorial(D)
        }
    }
}

/// Unsigned volume of a `D`-simplex.
#[must_use]
pub fn simplex_volume<const D: usize>(points: &[Point<D>]) -> f64 {
    signed_volume(points).abs()
}

/// `(k-1)`-dimensional measure of a simplex with `k` vertices embedded in
/// `D` dimensions, via the Gram determinant of its edge vectors.
///
/// Two points give a length, three an area.
#[must_use]
pub fn facet_measure<const D: usize>(points: &[Point<D>]) -> f64 {
    let Some((&origin, rest)) = points.split_first() else {
        return 0.0;
    };
    let k = rest.len();
    if k == 0 {
        return 0.0;
    }
    if k == 1 {
        return origin.distance(&rest[0]);
    }
    let edges: Vec<Point<D>> = rest.iter().map(|p| *p - origin).collect();
    let gram = Matrix::from_fn(k, k, |i, j| edges[i].dot(&edges[j]));
    gram.determinant().max(0.0).sqrt() / factorial(k)
}

/// Lengths of the `D(D+1)/2` edges of a simplex, in vertex-pair order
/// `(0,1), (0,2), ..., (D-1,D)`.
#[must_use]
pub fn edge_lengths<const D: usize>(points: &[Point<D>]) -> Vec<f64> {
    let mut lengths = Vec::with_capacity(points.len() * points.len().saturating_sub(1) / 2);
    for i in 0..points.len() {
        for j in (i + 1)..points.len() {
            lengths.push(points[i].distance(&points[j]));
        }
    }
    lengths
}

/// Measures of the `D + 1` facets; entry `i` is the facet opposite vertex `i`.
#[must_use]
pub fn facet_measures<const D: usize>(points: &[Point<D>]) -> Vec<f64> {
    (0..points.len())
        .map(|skip| {
            let facet: Vec<Point<D>> = points
                .iter()
                .enumerate()
                .filter(|&(i, _)| i != skip)
                .map(|(_, p)| *p)
                .collect();
            facet_measure(&facet)
        })
        .collect()
}

/// Inradius `D · V / Σ A_i` of a `D`-simplex; `0.0` when degenerate.
#[must_use]
pub fn inradius<const D: usize>(points: &[Point<D>]) -> f64 {
    let volume = simplex_volume(points);
    let surface: f64 = facet_measures(points).iter().sum();
    if surface <= 0.0 {
        return 0.0;
    }
    count_to_f64(D) * volume / surface
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn factorials() {
        assert_relative_eq!(factorial(0), 1.0);
        assert_relative_eq!(factorial(3), 6.0);
        assert_relative_eq!(factorial(4), 24.0);
    }

    #[test]
    fn volumes_carry_orientation() {
        let tri = [
            Point::new([0.0, 0.0]),
            Point::new([2.0, 0.0]),
            Point::new([0.0, 2.0]),
        ];
        assert_relative_eq!(signed_volume(&tri), 2.0);
        let flipped = [tri[1], tri[0], tri[2]];
        assert_relative_eq!(signed_volume(&flipped), -2.0);
        assert_relative_eq!(simplex_volume(&flipped), 2.0);
    }

    #[test]
    fn facet_measures_of_unit_tet() {
        let tet = [
            Point::new([0.0, 0.0, 0.0]),
            Point::new([1.0, 0.0, 0.0]),
            Point::new([0.0, 1.0, 0.0]),
            Point::new([0.0, 0.0, 1.0]),
        ];
        let areas = facet_measures(&tet);
        assert_relative_eq!(areas[0], 3.0_f64.sqrt() / 2.0, epsilon = 1e-12);
        for area in &areas[1..] {
            assert_relative_eq!(*area, 0.5, epsilon = 1e-12);
        }
        assert_eq!(edge_lengths(&tet).len(), 6);
        // r = 3V / A = 0.5 / (1.5 + sqrt(3)/2)
        assert_relative_eq!(
            inradius(&tet),
            0.5 / (1.5 + 3.0_f64.sqrt() / 2.0),
            epsilon = 1e-12
        );
    }
}
