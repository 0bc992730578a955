//! Filtered exact orientation with an expansion-arithmetic fallback.
//!
//! The sign of an orientation determinant is first computed in plain `f64`
//! together with a forward error bound. When the magnitude of the result
//! clears the bound the floating sign is certain; otherwise the determinant is
//! re-evaluated exactly with floating-point expansions (sums of
//! non-overlapping doubles), following Shewchuk's
//! "Adaptive Precision Floating-Point Arithmetic and Fast Robust Geometric
//! Predicates" (1997).
//!
//! The result is exact for any finite input coordinates, which is what lets the
//! improvement engine guarantee that no committed element is inverted.

use smallvec::SmallVec;
use std::cmp::Ordering;

/// Half of machine epsilon (the unit roundoff `u = 2^-53`).
const HALF_EPSILON: f64 = f64::EPSILON * 0.5;

/// Error bound coefficient for the 2D orientation filter.
const ORIENT2D_BOUND: f64 = (3.0 + 16.0 * HALF_EPSILON) * HALF_EPSILON;

/// Error bound coefficient for the 3D orientation filter.
const ORIENT3D_BOUND: f64 = (7.0 + 56.0 * HALF_EPSILON) * HALF_EPSILON;

// =============================================================================
// ERROR-FREE TRANSFORMATIONS
// =============================================================================

/// `a + b = s + e` exactly, with `s = fl(a + b)`.
#[inline]
fn two_sum(a: f64, b: f64) -> (f64, f64) {
    let s = a + b;
    let bb = s - a;
    let err = (a - (s - bb)) + (b - bb);
    (s, err)
}

/// `a * b = p + e` exactly, with `p = fl(a * b)`.
#[inline]
fn two_product(a: f64, b: f64) -> (f64, f64) {
    let p = a * b;
    // mul_add is a correctly rounded fused multiply-add on every target.
    let err = f64::mul_add(a, b, -p);
    (p, err)
}

// =============================================================================
// EXPANSIONS
// =============================================================================

/// An exact real number stored as a sum of non-overlapping doubles ordered by
/// increasing magnitude. Zero components are never stored, so the empty
/// expansion is zero.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Expansion {
    terms: SmallVec<[f64; 16]>,
}

impl Expansion {
    /// The exact value zero.
    #[must_use]
    pub fn zero() -> Self {
        Self::default()
    }

    /// Exact expansion of a single double.
    #[must_use]
    pub fn from_f64(value: f64) -> Self {
        let mut terms = SmallVec::new();
        if value != 0.0 {
            terms.push(value);
        }
        Self { terms }
    }

    /// Exact product of two doubles.
    #[must_use]
    pub fn from_product(a: f64, b: f64) -> Self {
        let (p, e) = two_product(a, b);
        let mut terms = SmallVec::new();
        if e != 0.0 {
            terms.push(e);
        }
        if p != 0.0 {
            terms.push(p);
        }
        Self { terms }
    }

    /// Number of stored components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.terms.len()
    }

    /// `true` for the exact value zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.terms.is_empty()
    }

    /// Adds a single double, returning a new expansion (Shewchuk's
    /// `GROW-EXPANSION` with zero elimination).
    #[must_use]
    pub fn grow(&self, b: f64) -> Self {
        let mut q = b;
        let mut terms = SmallVec::with_capacity(self.terms.len() + 1);
        for &e in &self.terms {
            let (sum, err) = two_sum(q, e);
            if err != 0.0 {
                terms.push(err);
            }
            q = sum;
        }
        if q != 0.0 {
            terms.push(q);
        }
        Self { terms }
    }

    /// Exact sum of two expansions.
    #[must_use]
    pub fn add(&self, other: &Self) -> Self {
        other.terms.iter().fold(self.clone(), |acc, &b| acc.grow(b))
    }

    /// Exact negation.
    #[must_use]
    pub fn neg(&self) -> Self {
        Self {
            terms: self.terms.iter().map(|t| -t).collect(),
        }
    }

    /// Exact difference.
    #[must_use]
    pub fn sub(&self, other: &Self) -> Self {
        self.add(&other.neg())
    }

    /// Exact product with a single double (Shewchuk's `SCALE-EXPANSION`).
    #[must_use]
    pub fn scale(&self, b: f64) -> Self {
        let mut terms = SmallVec::with_capacity(2 * self.terms.len());
        let Some((&first, rest)) = self.terms.split_first() else {
            return Self::zero();
        };
        let (mut q, low) = two_product(first, b);
        if low != 0.0 {
            terms.push(low);
        }
        for &e in rest {
            let (hi, lo) = two_product(e, b);
            let (sum, err) = two_sum(q, lo);
            if err != 0.0 {
                terms.push(err);
            }
            let (next, err) = two_sum(hi, sum);
            if err != 0.0 {
                terms.push(err);
            }
            q = next;
        }
        if q != 0.0 {
            terms.push(q);
        }
        Self { terms }
    }

    /// Exact product of two expansions.
    #[must_use]
    pub fn mul(&self, other: &Self) -> Self {
        other
            .terms
            .iter()
            .fold(Self::zero(), |acc, &b| acc.add(&self.scale(b)))
    }

    /// Sign of the exact value.
    #[must_use]
    pub fn sign(&self) -> Ordering {
        self.terms
            .last()
            .map_or(Ordering::Equal, |top| top.partial_cmp(&0.0).unwrap_or(Ordering::Equal))
    }

    /// Floating-point approximation of the exact value.
    #[must_use]
    pub fn estimate(&self) -> f64 {
        self.terms.iter().sum()
    }
}

// =============================================================================
// EXACT DETERMINANTS
// =============================================================================

/// Exact determinant of a small square matrix of doubles by cofactor
/// expansion along the first row.
fn exact_determinant(rows: &[SmallVec<[f64; 4]>]) -> Expansion {
    let n = rows.len();
    match n {
        0 => Expansion::from_f64(1.0),
        1 => Expansion::from_f64(rows[0][0]),
        2 => Expansion::from_product(rows[0][0], rows[1][1])
            .sub(&Expansion::from_product(rows[0][1], rows[1][0])),
        _ => {
            let mut det = Expansion::zero();
            for col in 0..n {
                let entry = rows[0][col];
                if entry == 0.0 {
                    continue;
                }
                let minor: SmallVec<[SmallVec<[f64; 4]>; 4]> = rows[1..]
                    .iter()
                    .map(|row| {
                        row.iter()
                            .enumerate()
                            .filter(|&(j, _)| j != col)
                            .map(|(_, &v)| v)
                            .collect()
                    })
                    .collect();
                let term = exact_determinant(&minor).scale(entry);
                det = if col % 2 == 0 {
                    det.add(&term)
                } else {
                    det.sub(&term)
                };
            }
            det
        }
    }
}

/// Exact sign of `det[p1 - p0, ..., pD - p0]` for `D + 1` points given as
/// coordinate slices of length `D`.
///
/// Evaluated as the determinant of the lifted matrix with rows `[1, p_i]`,
/// which has the same value and whose entries are the input doubles
/// themselves, so no rounded differences enter the computation.
#[must_use]
pub fn exact_orientation_sign(points: &[&[f64]]) -> Ordering {
    let rows: SmallVec<[SmallVec<[f64; 4]>; 4]> = points
        .iter()
        .map(|p| std::iter::once(1.0).chain(p.iter().copied()).collect())
        .collect();
    exact_determinant(&rows).sign()
}

// =============================================================================
// FILTERED PREDICATES
// =============================================================================

fn sign_of(value: f64) -> Ordering {
    value.partial_cmp(&0.0).unwrap_or(Ordering::Equal)
}

/// Sign of `det[b - a, c - a]`; positive for counter-clockwise triangles.
#[must_use]
pub fn orient2d(a: &[f64], b: &[f64], c: &[f64]) -> Ordering {
    let (bx, by) = (b[0] - a[0], b[1] - a[1]);
    let (cx, cy) = (c[0] - a[0], c[1] - a[1]);
    let left = bx * cy;
    let right = by * cx;
    let det = left - right;
    let bound = ORIENT2D_BOUND * (left.abs() + right.abs());
    if det > bound || -det > bound {
        return sign_of(det);
    }
    exact_orientation_sign(&[a, b, c])
}

/// Sign of `det[b - a, c - a, d - a]`; positive when `d` lies on the side of
/// the plane `abc` that sees `a, b, c` counter-clockwise.
#[must_use]
pub fn orient3d(a: &[f64], b: &[f64], c: &[f64], d: &[f64]) -> Ordering {
    let u = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
    let v = [c[0] - a[0], c[1] - a[1], c[2] - a[2]];
    let w = [d[0] - a[0], d[1] - a[1], d[2] - a[2]];

    let v1w2 = v[1] * w[2];
    let v2w1 = v[2] * w[1];
    let v0w2 = v[0] * w[2];
    let v2w0 = v[2] * w[0];
    let v0w1 = v[0] * w[1];
    let v1w0 = v[1] * w[0];

    let det = u[0] * (v1w2 - v2w1) - u[1] * (v0w2 - v2w0) + u[2] * (v0w1 - v1w0);
    let permanent = u[0].abs() * (v1w2.abs() + v2w1.abs())
        + u[1].abs() * (v0w2.abs() + v2w0.abs())
        + u[2].abs() * (v0w1.abs() + v1w0.abs());
    let bound = ORIENT3D_BOUND * permanent;
    if det > bound || -det > bound {
        return sign_of(det);
    }
    exact_orientation_sign(&[a, b, c, d])
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn two_sum_is_error_free() {
        let (s, e) = two_sum(1.0, 1e-20);
        assert_eq!(s, 1.0);
        assert_eq!(e, 1e-20);
    }

    #[test]
    fn two_product_recovers_low_bits() {
        let a = 1.0 + f64::EPSILON;
        let (p, e) = two_product(a, a);
        // (1 + eps)^2 = 1 + 2 eps + eps^2; the eps^2 part is lost in p.
        assert_eq!(p, 1.0 + 2.0 * f64::EPSILON);
        assert_eq!(e, f64::EPSILON * f64::EPSILON);
    }

    #[test]
    fn expansion_cancellation_is_exact() {
        let big = Expansion::from_f64(1e30);
        let tiny = Expansion::from_f64(1.0);
        let sum = big.add(&tiny).sub(&big);
        assert_eq!(sum.sign(), Ordering::Greater);
        assert_eq!(sum.estimate(), 1.0);
        assert!(big.sub(&big).is_zero());
    }

    #[test]
    fn expansion_product_sign() {
        let a = Expansion::from_f64(3.0).grow(1e-40);
        let b = Expansion::from_f64(-2.0);
        let p = a.mul(&b);
        assert_eq!(p.sign(), Ordering::Less);
        assert!((p.estimate() + 6.0).abs() < 1e-12);
        assert_eq!(a.scale(0.0).sign(), Ordering::Equal);
    }

    #[test]
    fn orient2d_basic_and_collinear() {
        let a = [0.0, 0.0];
        let b = [1.0, 0.0];
        let c = [0.0, 1.0];
        assert_eq!(orient2d(&a, &b, &c), Ordering::Greater);
        assert_eq!(orient2d(&a, &c, &b), Ordering::Less);
        assert_eq!(orient2d(&a, &b, &[2.0, 0.0]), Ordering::Equal);
    }

    #[test]
    fn orient2d_near_collinear_is_resolved_exactly() {
        // Points on the line y = x perturbed by one ulp; naive evaluation is
        // unreliable here.
        let a = [0.5, 0.5];
        let b = [12.0, 12.0];
        let c = [24.0, 24.0];
        assert_eq!(orient2d(&a, &b, &c), Ordering::Equal);

        let c_up = [24.0, f64::from_bits(24.0_f64.to_bits() + 1)];
        assert_eq!(orient2d(&a, &b, &c_up), Ordering::Greater);
        let c_down = [24.0, f64::from_bits(24.0_f64.to_bits() - 1)];
        assert_eq!(orient2d(&a, &b, &c_down), Ordering::Less);
    }

    #[test]
    fn orient3d_unit_tetrahedron() {
        let o = [0.0, 0.0, 0.0];
        let x = [1.0, 0.0, 0.0];
        let y = [0.0, 1.0, 0.0];
        let z = [0.0, 0.0, 1.0];
        assert_eq!(orient3d(&o, &x, &y, &z), Ordering::Greater);
        assert_eq!(orient3d(&o, &y, &x, &z), Ordering::Less);
        assert_eq!(orient3d(&o, &x, &y, &[0.3, 0.7, 0.0]), Ordering::Equal);
    }

    #[test]
    fn orient3d_coplanar_with_large_offsets() {
        let shift = 1e8;
        let a = [shift, shift, 0.1];
        let b = [shift + 1.0, shift, 0.1];
        let c = [shift, shift + 1.0, 0.1];
        let d = [shift + 0.25, shift + 0.25, 0.1];
        assert_eq!(orient3d(&a, &b, &c, &d), Ordering::Equal);
    }
}
