//! Data and operations on d-dimensional points.
//!
//! Mesh coordinates are always `f64`. Exact predicates in
//! [`predicates`](crate::geometry::predicates) rely on every coordinate being a
//! finite IEEE double, so non-finite values are rejected when a mesh is
//! built rather than here.

#![allow(clippy::similar_names)]

use serde::de::{Error, SeqAccess, Visitor};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Index, Mul, Sub};

// =============================================================================
// POINT STRUCT DEFINITION
// =============================================================================

/// A point (or displacement vector) in `D`-dimensional Euclidean space.
///
/// # Examples
///
/// ```rust
/// use meliorate::geometry::point::Point;
///
/// let p = Point::new([1.0, 2.0]);
/// let q = Point::new([4.0, 6.0]);
/// assert_eq!(p.coords(), &[1.0, 2.0]);
/// assert!((p.distance(&q) - 5.0).abs() < 1e-12);
/// ```
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Point<const D: usize> {
    coords: [f64; D],
}

impl<const D: usize> Point<D> {
    /// Creates a point from its coordinates.
    #[inline]
    #[must_use]
    pub const fn new(coords: [f64; D]) -> Self {
        Self { coords }
    }

    /// The origin.
    #[inline]
    #[must_use]
    pub const fn origin() -> Self {
        Self { coords: [0.0; D] }
    }

    /// Returns a reference to the coordinate array.
    #[inline]
    #[must_use]
    pub const fn coords(&self) -> &[f64; D] {
        &self.coords
    }

    /// Returns an owned copy of the coordinate array.
    #[inline]
    #[must_use]
    pub const fn to_array(&self) -> [f64; D] {
        self.coords
    }

    /// `true` when every coordinate is finite.
    #[must_use]
    pub fn is_finite(&self) -> bool {
        self.coords.iter().all(|c| c.is_finite())
    }

    /// Dot product, treating both points as vectors.
    #[must_use]
    pub fn dot(&self, other: &Self) -> f64 {
        self.coords
            .iter()
            .zip(other.coords.iter())
            .map(|(a, b)| a * b)
            .sum()
    }

    /// Squared Euclidean norm.
    #[must_use]
    pub fn norm_squared(&self) -> f64 {
        self.dot(self)
    }

    /// Euclidean norm.
    #[must_use]
    pub fn norm(&self) -> f64 {
        self.norm_squared().sqrt()
    }

    /// Euclidean distance to `other`.
    #[must_use]
    pub fn distance(&self, other: &Self) -> f64 {
        (*other - *self).norm()
    }

    /// Linear interpolation `self + t (other - self)`.
    #[must_use]
    pub fn lerp(&self, other: &Self, t: f64) -> Self {
        *self + (*other - *self) * t
    }

    /// Arithmetic mean of a non-empty set of points. Returns `None` for an
    /// empty iterator.
    pub fn centroid<'a, I>(points: I) -> Option<Self>
    where
        I: IntoIterator<Item = &'a Self>,
    {
        let mut sum = Self::origin();
        let mut count = 0_u32;
        for p in points {
            sum = sum + *p;
            count += 1;
        }
        (count > 0).then(|| sum * (1.0 / f64::from(count)))
    }
}

impl<const D: usize> Default for Point<D> {
    fn default() -> Self {
        Self::origin()
    }
}

impl<const D: usize> From<[f64; D]> for Point<D> {
    fn from(coords: [f64; D]) -> Self {
        Self::new(coords)
    }
}

impl<const D: usize> From<Point<D>> for [f64; D] {
    fn from(point: Point<D>) -> Self {
        point.coords
    }
}

impl<const D: usize> Index<usize> for Point<D> {
    type Output = f64;

    fn index(&self, index: usize) -> &f64 {
        &self.coords[index]
    }
}

impl<const D: usize> Add for Point<D> {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(std::array::from_fn(|i| self.coords[i] + rhs.coords[i]))
    }
}

impl<const D: usize> Sub for Point<D> {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(std::array::from_fn(|i| self.coords[i] - rhs.coords[i]))
    }
}

impl<const D: usize> Mul<f64> for Point<D> {
    type Output = Self;

    fn mul(self, rhs: f64) -> Self {
        Self::new(self.coords.map(|c| c * rhs))
    }
}

// =============================================================================
// SERIALIZATION
// =============================================================================

impl<const D: usize> Serialize for Point<D> {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeTuple;
        let mut tuple = serializer.serialize_tuple(D)?;
        for coord in &self.coords {
            tuple.serialize_element(coord)?;
        }
        tuple.end()
    }
}

impl<'de, const D: usize> Deserialize<'de> for Point<D> {
    fn deserialize<DE>(deserializer: DE) -> Result<Self, DE::Error>
    where
        DE: serde::Deserializer<'de>,
    {
        struct ArrayVisitor<const D: usize>;

        impl<'de, const D: usize> Visitor<'de> for ArrayVisitor<D> {
            type Value = Point<D>;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_fmt(format_args!("an array of {D} finite coordinates"))
            }

            fn visit_seq<A>(self, mut seq: A) -> Result<Self::Value, A::Error>
            where
                A: SeqAccess<'de>,
            {
                let mut coords = [0.0; D];
                for (i, slot) in coords.iter_mut().enumerate() {
                    let value: f64 = seq
                        .next_element()?
                        .ok_or_else(|| Error::invalid_length(i, &self))?;
                    if !value.is_finite() {
                        return Err(Error::custom(format!(
                            "coordinate {i} is not finite: {value}"
                        )));
                    }
                    *slot = value;
                }
                Ok(Point::new(coords))
            }
        }

        deserializer.deserialize_tuple(D, ArrayVisitor::<D>)
    }
}

// =============================================================================
// TESTS
// =============================================================================
