//! Geometric predicates on simplices.
//!
//! [`simplex_orientation`] is exact (see
//! [`robust_predicates`](crate::geometry::robust_predicates)); it is the only
//! predicate whose answer decides whether an edit may be committed.
//! [`insphere`] is a plain floating-point test used to grow conflict regions,
//! where an occasional wrong answer only changes which cavity is tried.

use nalgebra::DMatrix;
use std::cmp::Ordering;

use crate::geometry::point::Point;
use crate::geometry::robust_predicates::{exact_orientation_sign, orient2d, orient3d};
use crate::geometry::util::conversions::count_to_f64;

/// Represents the position of a point relative to a circumsphere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InSphere {
    /// The point is outside the circumsphere
    OUTSIDE,
    /// The point is on the boundary of the circumsphere (within numerical tolerance)
    BOUNDARY,
    /// The point is inside the circumsphere
    INSIDE,
}

impl std::fmt::Display for InSphere {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OUTSIDE => write!(f, "OUTSIDE"),
            Self::BOUNDARY => write!(f, "BOUNDARY"),
            Self::INSIDE => write!(f, "INSIDE"),
        }
    }
}

/// Represents the orientation of a simplex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Orientation {
    /// `det[p1 - p0, ..., pD - p0] < 0`
    NEGATIVE,
    /// The determinant is exactly zero.
    DEGENERATE,
    /// `det[p1 - p0, ..., pD - p0] > 0`
    POSITIVE,
}

impl Orientation {
    /// Converts the sign of a determinant.
    #[must_use]
    pub const fn from_ordering(sign: Ordering) -> Self {
        match sign {
            Ordering::Less => Self::NEGATIVE,
            Ordering::Equal => Self::DEGENERATE,
            Ordering::Greater => Self::POSITIVE,
        }
    }

    /// `true` only for [`Orientation::POSITIVE`].
    #[must_use]
    pub const fn is_positive(self) -> bool {
        matches!(self, Self::POSITIVE)
    }

    /// Opposite orientation (what swapping two vertices produces).
    #[must_use]
    pub const fn flipped(self) -> Self {
        match self {
            Self::NEGATIVE => Self::POSITIVE,
            Self::DEGENERATE => Self::DEGENERATE,
            Self::POSITIVE => Self::NEGATIVE,
        }
    }
}

impl std::fmt::Display for Orientation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NEGATIVE => write!(f, "NEGATIVE"),
            Self::DEGENERATE => write!(f, "DEGENERATE"),
            Self::POSITIVE => write!(f, "POSITIVE"),
        }
    }
}

/// Exact orientation of a simplex given by `D + 1` points.
///
/// The sign is that of `det[p1 - p0, ..., pD - p0]`, so the unit right
/// simplex `(0, e1, ..., eD)` is [`Orientation::POSITIVE`]. A slice whose
/// length is not `D + 1` is reported as [`Orientation::DEGENERATE`].
///
/// # Example
///
/// ```
/// use meliorate::geometry::point::Point;
/// use meliorate::geometry::predicates::{simplex_orientation, Orientation};
///
/// let tet = [
///     Point::new([0.0, 0.0, 0.0]),
///     Point::new([1.0, 0.0, 0.0]),
///     Point::new([0.0, 1.0, 0.0]),
///     Point::new([0.0, 0.0, 1.0]),
/// ];
/// assert_eq!(simplex_orientation(&tet), Orientation::POSITIVE);
/// ```
#[must_use]
pub fn simplex_orientation<const D: usize>(points: &[Point<D>]) -> Orientation {
    if points.len() != D + 1 {
        return Orientation::DEGENERATE;
    }
    let sign = match D {
        2 => orient2d(points[0].coords(), points[1].coords(), points[2].coords()),
        3 => orient3d(
            points[0].coords(),
            points[1].coords(),
            points[2].coords(),
            points[3].coords(),
        ),
        _ => {
            let rows: Vec<&[f64]> = points.iter().map(|p| p.coords().as_slice()).collect();
            exact_orientation_sign(&rows)
        }
    };
    Orientation::from_ordering(sign)
}

/// Floating-point circumsphere containment test.
///
/// Uses the lifted determinant with rows `[p_i - q, |p_i - q|^2]`, corrected by
/// the simplex orientation so the answer does not depend on vertex order.
/// Values within a relative tolerance of zero are reported as
/// [`InSphere::BOUNDARY`]. Degenerate simplices report
/// [`InSphere::OUTSIDE`].
#[must_use]
pub fn insphere<const D: usize>(simplex: &[Point<D>], query: &Point<D>) -> InSphere {
    let orientation = simplex_orientation(simplex);
    let orient_sign = match orientation {
        Orientation::POSITIVE => 1.0,
        Orientation::NEGATIVE => -1.0,
        Orientation::DEGENERATE => return InSphere::OUTSIDE,
    };

    let n = D + 1;
    let mut matrix = DMatrix::<f64>::zeros(n, n);
    let mut scale = 0.0_f64;
    for (i, p) in simplex.iter().enumerate() {
        let diff = *p - *query;
        for j in 0..D {
            matrix[(i, j)] = diff[j];
        }
        let lifted = diff.norm_squared();
        matrix[(i, D)] = lifted;
        scale = scale.max(lifted);
    }

    // The lifted determinant flips sign with each extra dimension relative to
    // the orientation determinant.
    let parity = if D % 2 == 0 { 1.0 } else { -1.0 };
    let det = matrix.determinant() * orient_sign * parity;
    let tolerance = 1e-12 * scale.powf((count_to_f64(D) + 2.0) / 2.0).max(f64::MIN_POSITIVE);

    if det > tolerance {
        InSphere::INSIDE
    } else if det < -tolerance {
        InSphere::OUTSIDE
    } else {
        InSphere::BOUNDARY
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_triangle() -> [Point<2>; 3] {
        [
            Point::new([0.0, 0.0]),
            Point::new([1.0, 0.0]),
            Point::new([0.0, 1.0]),
        ]
    }

    fn unit_tet() -> [Point<3>; 4] {
        [
            Point::new([0.0, 0.0, 0.0]),
            Point::new([1.0, 0.0, 0.0]),
            Point::new([0.0, 1.0, 0.0]),
            Point::new([0.0, 0.0, 1.0]),
        ]
    }

    #[test]
    fn orientation_signs() {
        let mut tri = unit_triangle();
        assert_eq!(simplex_orientation(&tri), Orientation::POSITIVE);
        tri.swap(0, 1);
        assert_eq!(simplex_orientation(&tri), Orientation::NEGATIVE);

        let mut tet = unit_tet();
        assert_eq!(simplex_orientation(&tet), Orientation::POSITIVE);
        tet.swap(2, 3);
        assert_eq!(simplex_orientation(&tet), Orientation::NEGATIVE);
        tet[3] = Point::new([0.5, 0.5, 0.0]);
        tet[2] = Point::new([0.2, 0.1, 0.0]);
        assert_eq!(simplex_orientation(&tet), Orientation::DEGENERATE);
    }

    #[test]
    fn orientation_rejects_wrong_arity() {
        let tri = unit_triangle();
        assert_eq!(simplex_orientation(&tri[..2]), Orientation::DEGENERATE);
    }

    #[test]
    fn insphere_2d_independent_of_order() {
        let tri = unit_triangle();
        let inside = Point::new([0.25, 0.25]);
        let outside = Point::new([2.0, 2.0]);
        assert_eq!(insphere(&tri, &inside), InSphere::INSIDE);
        assert_eq!(insphere(&tri, &outside), InSphere::OUTSIDE);

        let flipped = [tri[1], tri[0], tri[2]];
        assert_eq!(insphere(&flipped, &inside), InSphere::INSIDE);
        // (1, 1) lies on the circumcircle of the right triangle.
        assert_eq!(insphere(&tri, &Point::new([1.0, 1.0])), InSphere::BOUNDARY);
    }

    #[test]
    fn insphere_3d() {
        let tet = unit_tet();
        assert_eq!(
            insphere(&tet, &Point::new([0.25, 0.25, 0.25])),
            InSphere::INSIDE
        );
        assert_eq!(
            insphere(&tet, &Point::new([3.0, 3.0, 3.0])),
            InSphere::OUTSIDE
        );
        let swapped = [tet[0], tet[2], tet[1], tet[3]];
        assert_eq!(
            insphere(&swapped, &Point::new([0.9, 0.9, 0.1])),
            InSphere::INSIDE
        );
    }
}
