//! Mesh elements (triangles in 2D, tetrahedra in 3D).
//!
//! An element stores `D + 1` vertex keys and `D + 1` neighbor slots, where
//! `neighbors[i]` is the element across the facet opposite `vertices[i]` and
//! `None` marks a mesh-boundary facet. Committed elements are always
//! positively oriented.

use thiserror::Error;

use crate::core::collections::{
    FacetIndex, FacetVertices, NeighborBuffer, VertexKeyBuffer, facet_vertices,
};
use crate::core::mesh::{ElementKey, VertexKey};

/// Errors from element construction.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ElementValidationError {
    /// Wrong vertex count for a `D`-simplex.
    #[error(
        "Insufficient vertices: element has {actual} vertices; expected exactly {expected} for a {dimension}D simplex"
    )]
    WrongArity {
        /// The actual number of vertices.
        actual: usize,
        /// `D + 1`.
        expected: usize,
        /// The dimension `D`.
        dimension: usize,
    },
    /// A vertex appears twice.
    #[error("Duplicate vertices: element contains non-unique vertices")]
    DuplicateVertices,
}

/// A simplex of the mesh.
#[derive(Clone, Debug, PartialEq)]
pub struct Element {
    vertices: VertexKeyBuffer,
    neighbors: NeighborBuffer,
    quality: Option<f64>,
}

impl Element {
    /// Creates an unlinked element over the given vertices.
    ///
    /// # Errors
    ///
    /// Returns [`ElementValidationError`] for a wrong vertex count or repeated
    /// vertices.
    pub fn new<const D: usize>(vertices: &[VertexKey]) -> Result<Self, ElementValidationError> {
        if vertices.len() != D + 1 {
            return Err(ElementValidationError::WrongArity {
                actual: vertices.len(),
                expected: D + 1,
                dimension: D,
            });
        }
        for (i, v) in vertices.iter().enumerate() {
            if vertices[i + 1..].contains(v) {
                return Err(ElementValidationError::DuplicateVertices);
            }
        }
        Ok(Self {
            vertices: vertices.iter().copied().collect(),
            neighbors: std::iter::repeat_n(None, vertices.len()).collect(),
            quality: None,
        })
    }

    /// Vertex keys in element order.
    #[inline]
    #[must_use]
    pub fn vertices(&self) -> &[VertexKey] {
        &self.vertices
    }

    /// Neighbor slots; entry `i` is opposite vertex `i`.
    #[inline]
    #[must_use]
    pub fn neighbors(&self) -> &[Option<ElementKey>] {
        &self.neighbors
    }

    /// Neighbor across the facet opposite vertex `facet`.
    #[inline]
    #[must_use]
    pub fn neighbor(&self, facet: usize) -> Option<ElementKey> {
        self.neighbors.get(facet).copied().flatten()
    }

    /// Position of `vertex` in this element.
    #[must_use]
    pub fn vertex_index(&self, vertex: VertexKey) -> Option<usize> {
        self.vertices.iter().position(|v| *v == vertex)
    }

    /// `true` if `vertex` is a corner.
    #[must_use]
    pub fn contains_vertex(&self, vertex: VertexKey) -> bool {
        self.vertices.contains(&vertex)
    }

    /// Facet index whose neighbor slot holds `neighbor`.
    #[must_use]
    pub fn facet_towards(&self, neighbor: ElementKey) -> Option<FacetIndex> {
        self.neighbors
            .iter()
            .position(|n| *n == Some(neighbor))
            .and_then(|i| FacetIndex::try_from(i).ok())
    }

    /// Sorted vertex keys of the facet opposite `facet`.
    #[must_use]
    pub fn facet_key(&self, facet: usize) -> FacetVertices {
        facet_vertices(&self.vertices, facet)
    }

    /// Cached quality, if still valid.
    #[inline]
    #[must_use]
    pub const fn cached_quality(&self) -> Option<f64> {
        self.quality
    }

    pub(crate) const fn set_cached_quality(&mut self, quality: Option<f64>) {
        self.quality = quality;
    }

    pub(crate) fn set_neighbor(&mut self, facet: usize, neighbor: Option<ElementKey>) {
        if let Some(slot) = self.neighbors.get_mut(facet) {
            *slot = neighbor;
        }
    }

    /// Replaces the vertex list. Neighbor slots are left for the caller to
    /// relink; the quality cache is cleared.
    pub(crate) fn set_vertices(&mut self, vertices: VertexKeyBuffer) {
        self.vertices = vertices;
        self.quality = None;
    }

    pub(crate) fn swap_vertices(&mut self, a: usize, b: usize) {
        self.vertices.swap(a, b);
        self.neighbors.swap(a, b);
        self.quality = None;
    }
}
