//! Plain, index-based mesh exchange format.
//!
//! [`MeshData`] is what callers hand to
//! [`improve`](crate::improve::improve) and get back from it. It carries no
//! keys or adjacency, only vertex records and element index tuples, and is
//! serde-serializable so readers and writers for concrete file formats can
//! live outside this crate.
//!
//! Orientation is decided exactly on the stored coordinates, so a format must
//! round-trip every `f64` bit for bit (for `serde_json`, enable its
//! `float_roundtrip` feature).

use serde::{Deserialize, Serialize};

use crate::geometry::metric::MetricTensor;
use crate::geometry::point::Point;

/// One vertex of a [`MeshData`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct VertexRecord<const D: usize> {
    /// Position.
    pub position: Point<D>,
    /// Target edge length near this vertex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<f64>,
    /// Anisotropy tensor at this vertex.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metric: Option<MetricTensor<D>>,
    /// The vertex must never move or be removed.
    #[serde(default)]
    pub fixed: bool,
    /// Set on output for vertices lying on the mesh boundary; ignored on
    /// input, where the boundary is recovered from the elements.
    #[serde(default)]
    pub boundary: bool,
}

impl<const D: usize> VertexRecord<D> {
    /// A free vertex at `position` without sizing attributes.
    #[must_use]
    pub const fn new(position: Point<D>) -> Self {
        Self {
            position,
            size: None,
            metric: None,
            fixed: false,
            boundary: false,
        }
    }

    /// Sets the target size.
    #[must_use]
    pub const fn with_size(mut self, size: f64) -> Self {
        self.size = Some(size);
        self
    }

    /// Sets the anisotropy tensor.
    #[must_use]
    pub fn with_metric(mut self, metric: MetricTensor<D>) -> Self {
        self.metric = Some(metric);
        self
    }

    /// Marks the vertex as fixed.
    #[must_use]
    pub const fn fixed(mut self) -> Self {
        self.fixed = true;
        self
    }
}

/// Vertices plus elements as `D + 1` vertex indices each.
///
/// # Examples
///
/// ```
/// use meliorate::core::data::MeshData;
///
/// let mesh = MeshData::<2>::from_positions(
///     &[[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]],
///     vec![vec![0, 1, 2]],
/// );
/// assert_eq!(mesh.vertices.len(), 3);
/// assert_eq!(mesh.elements.len(), 1);
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MeshData<const D: usize> {
    /// Vertex records; element tuples index into this list.
    pub vertices: Vec<VertexRecord<D>>,
    /// Element vertex tuples.
    pub elements: Vec<Vec<usize>>,
}

impl<const D: usize> MeshData<D> {
    /// Builds mesh data from bare coordinates.
    #[must_use]
    pub fn from_positions(positions: &[[f64; D]], elements: Vec<Vec<usize>>) -> Self {
        Self {
            vertices: positions
                .iter()
                .map(|p| VertexRecord::new(Point::new(*p)))
                .collect(),
            elements,
        }
    }

    /// Element corner positions, skipping tuples with out-of-range indices.
    pub fn element_points(&self) -> impl Iterator<Item = Vec<Point<D>>> + '_ {
        self.elements.iter().filter_map(|tuple| {
            tuple
                .iter()
                .map(|&i| self.vertices.get(i).map(|v| v.position))
                .collect()
        })
    }
}
