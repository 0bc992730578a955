//! Mesh vertices.
//!
//! A vertex carries its position, the optional sizing attributes the quality
//! evaluator reads, a [`VertexKind`] that tells operators what they may do with
//! it, and an anchor: one live element incident to it, from which its star is
//! found by adjacency walks.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::mesh::ElementKey;
use crate::geometry::metric::MetricTensor;
use crate::geometry::point::Point;

/// Errors from vertex validation.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum VertexValidationError {
    /// A coordinate is NaN or infinite.
    #[error("Vertex has a non-finite coordinate: {coords:?}")]
    NonFiniteCoordinate {
        /// The offending coordinates.
        coords: Vec<f64>,
    },
    /// The target size is not a positive finite number.
    #[error("Vertex target size must be positive and finite, got {size}")]
    InvalidSize {
        /// The offending size.
        size: f64,
    },
}

/// What operators may do with a vertex.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VertexKind {
    /// Free interior vertex: may move and may be removed.
    #[default]
    Interior,
    /// Lies on a boundary facet. Moves and removals are restricted to keep the
    /// boundary intact.
    Boundary,
    /// Never moved or removed.
    Fixed,
}

impl VertexKind {
    /// `true` for boundary and fixed vertices.
    #[must_use]
    pub const fn is_constrained(self) -> bool {
        !matches!(self, Self::Interior)
    }
}

/// Convenience macro for building vertices in tests and examples.
///
/// # Examples
///
/// ```rust
/// use meliorate::core::vertex::{Vertex, VertexKind};
/// use meliorate::vertex;
///
/// let v: Vertex<2> = vertex!([0.5, 1.0]);
/// assert_eq!(v.kind, VertexKind::Interior);
///
/// let pinned: Vertex<3> = vertex!([0.0, 0.0, 0.0], VertexKind::Fixed);
/// assert_eq!(pinned.kind, VertexKind::Fixed);
/// ```
#[macro_export]
macro_rules! vertex {
    ($coords:expr) => {
        $crate::core::vertex::VertexBuilder::default()
            .point($crate::geometry::point::Point::new($coords))
            .build()
            .expect("Failed to build vertex: invalid coordinates")
    };

    ($coords:expr, $kind:expr) => {
        $crate::core::vertex::VertexBuilder::default()
            .point($crate::geometry::point::Point::new($coords))
            .kind($kind)
            .build()
            .expect("Failed to build vertex: invalid coordinates")
    };
}

pub use crate::vertex;

// =============================================================================
// VERTEX STRUCT DEFINITION
// =============================================================================

/// A mesh vertex.
///
/// # Usage
///
/// ```rust
/// use meliorate::core::vertex::{VertexBuilder, VertexKind};
/// use meliorate::geometry::point::Point;
///
/// let v = VertexBuilder::<2>::default()
///     .point(Point::new([1.0, 2.0]))
///     .size(0.1)
///     .kind(VertexKind::Boundary)
///     .build()
///     .unwrap();
/// assert_eq!(v.size, Some(0.1));
/// ```
#[derive(Builder, Clone, Debug, PartialEq)]
#[builder(build_fn(validate = "Self::validate"))]
pub struct Vertex<const D: usize> {
    /// Position.
    pub(crate) point: Point<D>,
    /// Target edge length near this vertex.
    #[builder(setter(strip_option), default)]
    pub size: Option<f64>,
    /// Anisotropy tensor at this vertex.
    #[builder(setter(strip_option), default)]
    pub metric: Option<MetricTensor<D>>,
    /// Operator permissions.
    #[builder(default)]
    pub kind: VertexKind,
    /// A live element containing this vertex; maintained by the mesh.
    #[builder(setter(skip), default = "None")]
    pub(crate) anchor: Option<ElementKey>,
}

impl<const D: usize> VertexBuilder<D> {
    fn validate(&self) -> Result<(), String> {
        if let Some(point) = &self.point
            && !point.is_finite()
        {
            return Err(format!("non-finite coordinates {:?}", point.coords()));
        }
        if let Some(Some(size)) = self.size
            && !(size.is_finite() && size > 0.0)
        {
            return Err(format!("invalid target size {size}"));
        }
        Ok(())
    }
}

impl<const D: usize> Vertex<D> {
    /// Position of the vertex.
    #[inline]
    #[must_use]
    pub const fn point(&self) -> &Point<D> {
        &self.point
    }

    /// The live element the mesh uses to reach this vertex's star.
    #[inline]
    #[must_use]
    pub const fn anchor(&self) -> Option<ElementKey> {
        self.anchor
    }

    pub(crate) const fn set_point(&mut self, point: Point<D>) {
        self.point = point;
    }

    /// Checks coordinates and size.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn is_valid(&self) -> Result<(), VertexValidationError> {
        if !self.point.is_finite() {
            return Err(VertexValidationError::NonFiniteCoordinate {
                coords: self.point.coords().to_vec(),
            });
        }
        if let Some(size) = self.size
            && !(size.is_finite() && size > 0.0)
        {
            return Err(VertexValidationError::InvalidSize { size });
        }
        Ok(())
    }
}
