//! Property-based tests for exact orientation.
//!
//! Coordinates are dyadic rationals `n / 1024` with bounded integer `n`, so
//! every input is an exact `f64` and the true determinant sign can be
//! computed in `i128` as a reference.

use meliorate::geometry::point::Point;
use meliorate::geometry::predicates::{Orientation, simplex_orientation};
use proptest::prelude::*;

const SCALE: f64 = 1024.0;

fn integer_coordinate() -> impl Strategy<Value = i64> {
    -(1_i64 << 24)..(1_i64 << 24)
}

#[expect(clippy::cast_precision_loss, reason = "|n| < 2^53 is exact in f64")]
fn to_point<const D: usize>(coords: [i64; D]) -> Point<D> {
    Point::new(coords.map(|n| n as f64 / SCALE))
}

fn reference_sign_2d(p: [[i64; 2]; 3]) -> Orientation {
    let [a, b, c] = p.map(|q| q.map(i128::from));
    let det = (b[0] - a[0]) * (c[1] - a[1]) - (b[1] - a[1]) * (c[0] - a[0]);
    Orientation::from_ordering(det.cmp(&0))
}

fn reference_sign_3d(p: [[i64; 3]; 4]) -> Orientation {
    let [a, b, c, d] = p.map(|q| q.map(i128::from));
    let u = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
    let v = [c[0] - a[0], c[1] - a[1], c[2] - a[2]];
    let w = [d[0] - a[0], d[1] - a[1], d[2] - a[2]];
    let det = u[0] * (v[1] * w[2] - v[2] * w[1]) - u[1] * (v[0] * w[2] - v[2] * w[0])
        + u[2] * (v[0] * w[1] - v[1] * w[0]);
    Orientation::from_ordering(det.cmp(&0))
}

proptest! {
    #[test]
    fn prop_orientation_2d_matches_integer_determinant(
        p in prop::array::uniform3(prop::array::uniform2(integer_coordinate())),
    ) {
        let points = p.map(to_point);
        prop_assert_eq!(simplex_orientation(&points), reference_sign_2d(p));
    }

    #[test]
    fn prop_orientation_3d_matches_integer_determinant(
        p in prop::array::uniform4(prop::array::uniform3(integer_coordinate())),
    ) {
        let points = p.map(to_point);
        prop_assert_eq!(simplex_orientation(&points), reference_sign_3d(p));
    }

    #[test]
    fn prop_collinear_triangles_are_degenerate(
        origin in prop::array::uniform2(integer_coordinate()),
        step in prop::array::uniform2(-4096_i64..4096),
        k in -64_i64..64,
    ) {
        let p = [
            origin,
            [origin[0] + step[0], origin[1] + step[1]],
            [origin[0] + k * step[0], origin[1] + k * step[1]],
        ];
        let points = p.map(to_point);
        prop_assert_eq!(simplex_orientation(&points), Orientation::DEGENERATE);
    }

    #[test]
    fn prop_coplanar_tetrahedra_are_degenerate(
        origin in prop::array::uniform3(integer_coordinate()),
        u in prop::array::uniform3(-4096_i64..4096),
        v in prop::array::uniform3(-4096_i64..4096),
        s in -32_i64..32,
        t in -32_i64..32,
    ) {
        let at = |a: i64, b: i64| [
            origin[0] + a * u[0] + b * v[0],
            origin[1] + a * u[1] + b * v[1],
            origin[2] + a * u[2] + b * v[2],
        ];
        let p = [origin, at(1, 0), at(0, 1), at(s, t)];
        let points = p.map(to_point);
        prop_assert_eq!(simplex_orientation(&points), Orientation::DEGENERATE);
    }

    #[test]
    fn prop_swapping_two_vertices_flips_orientation(
        p in prop::array::uniform4(prop::array::uniform3(integer_coordinate())),
    ) {
        let mut points = p.map(to_point);
        let before = simplex_orientation(&points);
        points.swap(0, 1);
        prop_assert_eq!(simplex_orientation(&points), before.flipped());
    }
}
