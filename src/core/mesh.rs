//! The mutable simplicial mesh.
//!
//! [`Mesh`] owns the vertex and element pools, the transaction journal and the
//! quality evaluator used to fill element quality caches. Every topological or
//! geometric change made while an edit is open goes through the journaled
//! primitives in this module, so [`Mesh::rollback_edit`] can restore the exact
//! prior state (see [`journal`](crate::core::journal)).
//!
//! # Invariants at every committed state
//!
//! | Invariant | Checked by |
//! |---|---|
//! | `neighbors[i]` of `e` is `n` ⇔ `n` lists `e` across the same facet | [`Mesh::validation_report`] |
//! | Neighbors share exactly the facet's `D` vertices | [`Mesh::validation_report`] |
//! | Every element is exactly positively oriented | [`Mesh::validation_report`] |
//! | Neighbors lie on opposite sides of their shared facet | [`Mesh::validation_report`] |
//! | Every used vertex is anchored to a live element containing it | [`Mesh::validation_report`] |

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use slotmap::new_key_type;
use thiserror::Error;

use crate::core::collections::{
    FacetIndex, FacetToElementsMap, FastHashMap, SmallBuffer, VertexKeyBuffer,
    fast_hash_map_with_capacity,
};
use crate::core::data::{MeshData, VertexRecord};
use crate::core::element::{Element, ElementValidationError};
use crate::core::journal::{Journal, JournalEntry};
use crate::core::pool::Pool;
use crate::core::vertex::{Vertex, VertexKind, VertexValidationError};
use crate::geometry::point::Point;
use crate::geometry::predicates::{Orientation, simplex_orientation};
use crate::geometry::quality::{
    Corner, QualityEvaluator, QualityStats, angle_extrema_degrees,
};

// =============================================================================
// KEYS
// =============================================================================

new_key_type! {
    /// Stable identifier of a mesh vertex.
    pub struct VertexKey;

    /// Stable identifier of a mesh element.
    pub struct ElementKey;
}

/// Corner positions of one element.
pub type ElementPoints<const D: usize> = SmallBuffer<Point<D>, 4>;

// =============================================================================
// ERRORS
// =============================================================================

/// Errors raised while building a mesh from [`MeshData`].
#[derive(Clone, Debug, Error, PartialEq)]
pub enum MeshError {
    /// Only triangles (`D = 2`) and tetrahedra (`D = 3`) are supported.
    #[error("Unsupported dimension {dimension}: only 2D triangle and 3D tetrahedral meshes are supported")]
    UnsupportedDimension {
        /// The requested dimension.
        dimension: usize,
    },
    /// A vertex record is invalid.
    #[error("Vertex {vertex} is invalid: {source}")]
    InvalidVertex {
        /// Input index of the vertex.
        vertex: usize,
        /// What is wrong with it.
        source: VertexValidationError,
    },
    /// An element references a vertex index that does not exist.
    #[error("Element {element} references vertex {index}, but the mesh has {vertex_count} vertices")]
    VertexIndexOutOfRange {
        /// Input index of the element.
        element: usize,
        /// The offending vertex index.
        index: usize,
        /// Number of input vertices.
        vertex_count: usize,
    },
    /// An element tuple is malformed.
    #[error("Element {element} is invalid: {source}")]
    InvalidElement {
        /// Input index of the element.
        element: usize,
        /// What is wrong with it.
        source: ElementValidationError,
    },
    /// A flat or inverted input element.
    #[error("Element {element} is {orientation}")]
    DegenerateElement {
        /// Input index of the element.
        element: usize,
        /// Its exact orientation.
        orientation: Orientation,
    },
    /// More than two elements share a facet.
    #[error("Facet shared by more than two elements (input elements {elements:?})")]
    NonManifoldFacet {
        /// Input indices of the elements sharing the facet.
        elements: Vec<usize>,
    },
    /// Two elements share a facet but lie on the same side of it.
    #[error("Elements {first} and {second} overlap across their shared facet")]
    OverlappingElements {
        /// Input index of one element.
        first: usize,
        /// Input index of the other.
        second: usize,
    },
}

// =============================================================================
// MESH
// =============================================================================

/// Corner positions of one boundary facet, see [`Mesh::boundary_signature`].
pub type BoundaryFacet<const D: usize> = Vec<[OrderedFloat<f64>; D]>;

/// A conforming simplicial mesh under improvement.
#[derive(Clone, Debug)]
pub struct Mesh<const D: usize> {
    pub(crate) vertices: Pool<VertexKey, Vertex<D>>,
    pub(crate) elements: Pool<ElementKey, Element>,
    pub(crate) journal: Journal<D>,
    evaluator: QualityEvaluator,
}

/// How [`Mesh::from_data`] treats negatively oriented input elements.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildOptions {
    /// Swap the first two vertices of inverted elements instead of rejecting
    /// them. Flat elements are always rejected.
    pub reorient_input: bool,
}

impl<const D: usize> Mesh<D> {
    /// An empty mesh.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::UnsupportedDimension`] unless `D` is 2 or 3.
    pub fn empty() -> Result<Self, MeshError> {
        if !(2..=3).contains(&D) {
            return Err(MeshError::UnsupportedDimension { dimension: D });
        }
        Ok(Self {
            vertices: Pool::new(),
            elements: Pool::new(),
            journal: Journal::default(),
            evaluator: QualityEvaluator::default(),
        })
    }

    /// Builds a mesh with full adjacency from index-based data.
    ///
    /// Facets owned by a single element form the mesh boundary; every vertex
    /// on such a facet becomes [`VertexKind::Boundary`] unless the input marks
    /// it fixed.
    ///
    /// # Errors
    ///
    /// Returns a [`MeshError`] for unsupported dimensions, invalid vertex
    /// records, malformed or degenerate elements (inverted ones unless
    /// `options.reorient_input`), and non-manifold or overlapping facets.
    ///
    /// # Examples
    ///
    /// ```
    /// use meliorate::core::data::MeshData;
    /// use meliorate::core::mesh::{BuildOptions, Mesh};
    ///
    /// let data = MeshData::<2>::from_positions(
    ///     &[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]],
    ///     vec![vec![0, 1, 2], vec![0, 2, 3]],
    /// );
    /// let mesh = Mesh::from_data(&data, BuildOptions::default()).unwrap();
    /// assert_eq!(mesh.number_of_elements(), 2);
    /// assert_eq!(mesh.boundary_facets().len(), 4);
    /// assert!(mesh.validate().is_ok());
    /// ```
    pub fn from_data(data: &MeshData<D>, options: BuildOptions) -> Result<Self, MeshError> {
        let mut mesh = Self::empty()?;
        mesh.vertices = Pool::with_capacity(data.vertices.len());
        mesh.elements = Pool::with_capacity(data.elements.len());

        let mut vertex_keys: Vec<VertexKey> = Vec::with_capacity(data.vertices.len());
        for (index, record) in data.vertices.iter().enumerate() {
            let vertex = Self::vertex_from_record(record)
                .map_err(|source| MeshError::InvalidVertex { vertex: index, source })?;
            vertex_keys.push(mesh.vertices.insert(vertex));
        }

        let mut element_index: FastHashMap<ElementKey, usize> =
            fast_hash_map_with_capacity(data.elements.len());
        for (index, tuple) in data.elements.iter().enumerate() {
            let mut keys: VertexKeyBuffer = SmallBuffer::with_capacity(tuple.len());
            for &vi in tuple {
                let key = vertex_keys.get(vi).copied().ok_or(
                    MeshError::VertexIndexOutOfRange {
                        element: index,
                        index: vi,
                        vertex_count: vertex_keys.len(),
                    },
                )?;
                keys.push(key);
            }
            let mut element = Element::new::<D>(&keys)
                .map_err(|source| MeshError::InvalidElement { element: index, source })?;

            let points = mesh
                .points_of(element.vertices())
                .unwrap_or_default();
            match simplex_orientation(&points) {
                Orientation::POSITIVE => {}
                Orientation::NEGATIVE if options.reorient_input => {
                    tracing::debug!(element = index, "reorienting inverted input element");
                    element.swap_vertices(0, 1);
                }
                orientation => {
                    return Err(MeshError::DegenerateElement {
                        element: index,
                        orientation,
                    });
                }
            }

            let key = mesh.elements.insert(element);
            element_index.insert(key, index);
            for &v in &keys {
                if let Some(vertex) = mesh.vertices.get_mut(v)
                    && vertex.anchor.is_none()
                {
                    vertex.anchor = Some(key);
                }
            }
        }

        mesh.assign_neighbors(&element_index)?;
        mesh.classify_boundary_vertices();

        tracing::debug!(
            dimension = D,
            vertices = mesh.number_of_vertices(),
            elements = mesh.number_of_elements(),
            boundary_facets = mesh.boundary_facets().len(),
            "built mesh"
        );
        Ok(mesh)
    }

    fn vertex_from_record(record: &VertexRecord<D>) -> Result<Vertex<D>, VertexValidationError> {
        let vertex = Vertex {
            point: record.position,
            size: record.size,
            metric: record.metric.clone(),
            kind: if record.fixed {
                VertexKind::Fixed
            } else {
                VertexKind::Interior
            },
            anchor: None,
        };
        vertex.is_valid()?;
        Ok(vertex)
    }

    /// Links every pair of elements sharing a facet.
    fn assign_neighbors(
        &mut self,
        element_index: &FastHashMap<ElementKey, usize>,
    ) -> Result<(), MeshError> {
        let input_index = |key: &ElementKey| element_index.get(key).copied().unwrap_or(usize::MAX);

        let mut facet_map: FacetToElementsMap =
            fast_hash_map_with_capacity(self.elements.len().saturating_mul(D + 1));
        for (key, element) in self.elements.iter() {
            for i in 0..element.vertices().len() {
                let entry = facet_map.entry(element.facet_key(i)).or_default();
                if entry.len() >= 2 {
                    let mut elements: Vec<usize> = entry.iter().map(|(k, _)| input_index(k)).collect();
                    elements.push(input_index(&key));
                    return Err(MeshError::NonManifoldFacet { elements });
                }
                entry.push((key, FacetIndex::try_from(i).unwrap_or(FacetIndex::MAX)));
            }
        }

        for owners in facet_map.values() {
            let [(a, fa), (b, fb)] = owners.as_slice() else {
                continue;
            };
            if !self.opposite_sides(*a, usize::from(*fa), *b, usize::from(*fb)) {
                return Err(MeshError::OverlappingElements {
                    first: input_index(a),
                    second: input_index(b),
                });
            }
            if let Some(element) = self.elements.get_mut(*a) {
                element.set_neighbor(usize::from(*fa), Some(*b));
            }
            if let Some(element) = self.elements.get_mut(*b) {
                element.set_neighbor(usize::from(*fb), Some(*a));
            }
        }
        Ok(())
    }

    /// `true` when the vertex of `b` opposite facet `fb` lies strictly on the
    /// far side of facet `fa` of `a`: substituting it into `a` must invert `a`.
    pub(crate) fn opposite_sides(&self, a: ElementKey, fa: usize, b: ElementKey, fb: usize) -> bool {
        let (Some(ea), Some(eb)) = (self.elements.get(a), self.elements.get(b)) else {
            return false;
        };
        let Some(&apex) = eb.vertices().get(fb) else {
            return false;
        };
        let mut probe: VertexKeyBuffer = ea.vertices().iter().copied().collect();
        if fa >= probe.len() {
            return false;
        }
        probe[fa] = apex;
        self.points_of(&probe)
            .is_some_and(|points| simplex_orientation(&points) == Orientation::NEGATIVE)
    }

    fn classify_boundary_vertices(&mut self) {
        let mut on_boundary: SmallBuffer<VertexKey, 64> = SmallBuffer::new();
        for (_, element) in self.elements.iter() {
            for (i, neighbor) in element.neighbors().iter().enumerate() {
                if neighbor.is_none() {
                    on_boundary.extend(
                        element
                            .vertices()
                            .iter()
                            .enumerate()
                            .filter(|&(j, _)| j != i)
                            .map(|(_, v)| *v),
                    );
                }
            }
        }
        for v in on_boundary {
            if let Some(vertex) = self.vertices.get_mut(v)
                && vertex.kind == VertexKind::Interior
            {
                vertex.kind = VertexKind::Boundary;
            }
        }
    }

    /// Exports the mesh as compact index-based data, vertices and elements
    /// in storage order.
    #[must_use]
    pub fn to_data(&self) -> MeshData<D> {
        let mut index: FastHashMap<VertexKey, usize> =
            fast_hash_map_with_capacity(self.vertices.len());
        let mut boundary = crate::core::collections::VertexKeySet::default();
        for (element_key, element) in self.elements.iter() {
            for facet in 0..element.vertices().len() {
                if element.neighbor(facet).is_none() {
                    boundary.extend(self.facet_vertex_keys(element_key, facet));
                }
            }
        }

        let vertices = self
            .vertices
            .iter()
            .enumerate()
            .map(|(i, (key, vertex))| {
                index.insert(key, i);
                VertexRecord {
                    position: vertex.point,
                    size: vertex.size,
                    metric: vertex.metric.clone(),
                    fixed: vertex.kind == VertexKind::Fixed,
                    boundary: boundary.contains(&key),
                }
            })
            .collect();
        let elements = self
            .elements
            .iter()
            .map(|(_, element)| {
                element
                    .vertices()
                    .iter()
                    .map(|v| index.get(v).copied().unwrap_or(usize::MAX))
                    .collect()
            })
            .collect();
        MeshData { vertices, elements }
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Number of live vertices.
    #[must_use]
    pub const fn number_of_vertices(&self) -> usize {
        self.vertices.len()
    }

    /// Number of live elements.
    #[must_use]
    pub const fn number_of_elements(&self) -> usize {
        self.elements.len()
    }

    /// Live vertex by key.
    #[must_use]
    pub fn vertex(&self, key: VertexKey) -> Option<&Vertex<D>> {
        self.vertices.get(key)
    }

    /// Live element by key.
    #[must_use]
    pub fn element(&self, key: ElementKey) -> Option<&Element> {
        self.elements.get(key)
    }

    /// Live vertices in storage order.
    pub fn vertices(&self) -> impl Iterator<Item = (VertexKey, &Vertex<D>)> + '_ {
        self.vertices.iter()
    }

    /// Live elements in storage order.
    pub fn elements(&self) -> impl Iterator<Item = (ElementKey, &Element)> + '_ {
        self.elements.iter()
    }

    /// Live element keys in storage order.
    pub fn element_keys(&self) -> impl Iterator<Item = ElementKey> + '_ {
        self.elements.keys()
    }

    /// Position of a live vertex.
    #[must_use]
    pub fn position(&self, key: VertexKey) -> Option<Point<D>> {
        self.vertices.get(key).map(|v| v.point)
    }

    /// Positions for a list of vertex keys; `None` if any key is dead.
    #[must_use]
    pub fn points_of(&self, vertices: &[VertexKey]) -> Option<ElementPoints<D>> {
        vertices.iter().map(|v| self.position(*v)).collect()
    }

    /// Corner positions of a live element.
    #[must_use]
    pub fn element_points(&self, key: ElementKey) -> Option<ElementPoints<D>> {
        self.points_of(self.elements.get(key)?.vertices())
    }

    /// Exact orientation of a live element.
    #[must_use]
    pub fn orientation(&self, key: ElementKey) -> Option<Orientation> {
        self.element_points(key).map(|p| simplex_orientation(&p))
    }

    /// Vertex keys of the facet opposite `facet` in element order.
    #[must_use]
    pub fn facet_vertex_keys(&self, element: ElementKey, facet: usize) -> VertexKeyBuffer {
        self.elements.get(element).map_or_else(VertexKeyBuffer::new, |e| {
            e.vertices()
                .iter()
                .enumerate()
                .filter(|&(i, _)| i != facet)
                .map(|(_, v)| *v)
                .collect()
        })
    }

    /// Facets on the mesh boundary as `(element, facet index)` pairs.
    #[must_use]
    pub fn boundary_facets(&self) -> Vec<(ElementKey, usize)> {
        self.elements
            .iter()
            .flat_map(|(key, element)| {
                (0..element.vertices().len())
                    .filter(|&i| element.neighbor(i).is_none())
                    .map(move |i| (key, i))
            })
            .collect()
    }

    /// The boundary as a sorted list of facets, each facet a sorted list of
    /// corner positions. Equal signatures mean the same boundary facets at
    /// the same positions, independent of keys and element order.
    #[must_use]
    pub fn boundary_signature(&self) -> Vec<BoundaryFacet<D>> {
        let mut signature: Vec<BoundaryFacet<D>> = self
            .boundary_facets()
            .into_iter()
            .map(|(element, facet)| {
                let mut corners: BoundaryFacet<D> = self
                    .facet_vertex_keys(element, facet)
                    .iter()
                    .filter_map(|v| self.position(*v))
                    .map(|p| p.to_array().map(OrderedFloat))
                    .collect();
                corners.sort_unstable();
                corners
            })
            .collect();
        signature.sort_unstable();
        signature
    }

    // =========================================================================
    // QUALITY
    // =========================================================================

    /// The evaluator used to fill quality caches.
    #[must_use]
    pub const fn evaluator(&self) -> &QualityEvaluator {
        &self.evaluator
    }

    /// Replaces the evaluator and clears every quality cache.
    pub fn set_evaluator(&mut self, evaluator: QualityEvaluator) {
        self.evaluator = evaluator;
        let keys: Vec<ElementKey> = self.elements.keys().collect();
        for key in keys {
            if let Some(element) = self.elements.get_mut(key) {
                element.set_cached_quality(None);
            }
        }
    }

    /// Field-aware corners of a vertex list; `None` if any key is dead.
    /// `overrides` substitutes corners for specific keys (hypothetical
    /// positions or not-yet-created vertices).
    #[must_use]
    pub fn corners<'a>(
        &'a self,
        vertices: &[VertexKey],
        overrides: &[(VertexKey, Corner<'a, D>)],
    ) -> Option<SmallBuffer<Corner<'a, D>, 4>> {
        vertices
            .iter()
            .map(|v| {
                overrides
                    .iter()
                    .find(|(key, _)| key == v)
                    .map(|(_, corner)| *corner)
                    .or_else(|| {
                        self.vertices.get(*v).map(|vertex| Corner {
                            point: vertex.point,
                            size: vertex.size,
                            metric: vertex.metric.as_ref(),
                        })
                    })
            })
            .collect()
    }

    /// Quality of a hypothetical element; degenerate if a key is dead.
    #[must_use]
    pub fn evaluate(&self, vertices: &[VertexKey], overrides: &[(VertexKey, Corner<'_, D>)]) -> f64 {
        self.corners(vertices, overrides)
            .map_or(crate::geometry::quality::DEGENERATE_QUALITY, |corners| {
                self.evaluator.evaluate(&corners)
            })
    }

    /// Quality of a live element without touching the cache.
    #[must_use]
    pub fn peek_quality(&self, key: ElementKey) -> Option<f64> {
        let element = self.elements.get(key)?;
        Some(
            element
                .cached_quality()
                .unwrap_or_else(|| self.evaluate(element.vertices(), &[])),
        )
    }

    /// Quality of a live element, filling its cache.
    pub fn quality(&mut self, key: ElementKey) -> Option<f64> {
        let quality = self.peek_quality(key)?;
        if let Some(element) = self.elements.get_mut(key) {
            element.set_cached_quality(Some(quality));
        }
        Some(quality)
    }

    /// Smallest element quality, `None` for an empty mesh.
    pub fn min_quality(&mut self) -> Option<f64> {
        let keys: Vec<ElementKey> = self.elements.keys().collect();
        keys.into_iter()
            .filter_map(|k| self.quality(k))
            .reduce(f64::min)
    }

    /// Quality statistics over all elements.
    pub fn quality_stats(&mut self) -> QualityStats {
        let keys: Vec<ElementKey> = self.elements.keys().collect();
        let mut samples = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(quality) = self.quality(key) else {
                continue;
            };
            let angles = self
                .element_points(key)
                .map_or((0.0, 180.0), |p| angle_extrema_degrees(&p));
            samples.push((quality, self.evaluator.band(quality), angles));
        }
        QualityStats::from_samples(samples)
    }

    pub(crate) fn invalidate_quality(&mut self, key: ElementKey) {
        if let Some(element) = self.elements.get_mut(key) {
            element.set_cached_quality(None);
        }
    }

    // =========================================================================
    // JOURNALED PRIMITIVES
    // =========================================================================

    fn record(&mut self, entry: JournalEntry<D>) {
        tracing::trace!(?entry, "journal step");
        self.journal.record(entry);
    }

    /// Adds a vertex; undone by releasing it.
    pub(crate) fn create_vertex(&mut self, vertex: Vertex<D>) -> VertexKey {
        let key = self.vertices.insert(vertex);
        self.record(JournalEntry::CreateVertex { vertex: key });
        key
    }

    /// Deletes a vertex. Inside an open edit the slot is retired so rollback
    /// revives it under the same key.
    pub(crate) fn delete_vertex(&mut self, key: VertexKey) -> Result<(), crate::core::pool::PoolError> {
        if self.journal.is_open() {
            self.vertices.retire(key)?;
            self.record(JournalEntry::RetireVertex { vertex: key });
        } else {
            self.vertices.remove(key)?;
        }
        Ok(())
    }

    /// Moves a vertex and clears the quality caches of its star.
    pub(crate) fn relocate_vertex(&mut self, key: VertexKey, point: Point<D>) {
        let Some(vertex) = self.vertices.get_mut(key) else {
            return;
        };
        let old = vertex.point;
        vertex.set_point(point);
        self.record(JournalEntry::RelocateVertex { vertex: key, old });
        for element in self.vertex_star(key).unwrap_or_default() {
            self.invalidate_quality(element);
        }
    }

    /// Points a vertex at a new incident element.
    pub(crate) fn set_anchor(&mut self, key: VertexKey, anchor: Option<ElementKey>) {
        let Some(vertex) = self.vertices.get_mut(key) else {
            return;
        };
        let old = vertex.anchor;
        if old == anchor {
            return;
        }
        vertex.anchor = anchor;
        self.record(JournalEntry::Reanchor { vertex: key, old });
    }

    /// Adds an unlinked element.
    pub(crate) fn create_element(&mut self, element: Element) -> ElementKey {
        let key = self.elements.insert(element);
        self.record(JournalEntry::CreateElement { element: key });
        key
    }

    /// Deletes an element (retired while an edit is open).
    pub(crate) fn delete_element(&mut self, key: ElementKey) -> Result<(), crate::core::pool::PoolError> {
        if self.journal.is_open() {
            self.elements.retire(key)?;
            self.record(JournalEntry::RetireElement { element: key });
        } else {
            self.elements.remove(key)?;
        }
        Ok(())
    }

    /// Replaces the vertex list of a live element, keeping its key.
    pub(crate) fn reassign_vertices(&mut self, key: ElementKey, vertices: VertexKeyBuffer) {
        let Some(element) = self.elements.get_mut(key) else {
            return;
        };
        let old: VertexKeyBuffer = element.vertices().iter().copied().collect();
        element.set_vertices(vertices);
        self.record(JournalEntry::ReassignVertices { element: key, old });
    }

    /// Sets one neighbor slot.
    pub(crate) fn relink(&mut self, key: ElementKey, facet: usize, neighbor: Option<ElementKey>) {
        let Some(element) = self.elements.get_mut(key) else {
            return;
        };
        let old = element.neighbor(facet);
        if old == neighbor {
            return;
        }
        element.set_neighbor(facet, neighbor);
        self.record(JournalEntry::Relink {
            element: key,
            facet,
            old,
        });
    }
}

// =============================================================================
// TESTS
// =============================================================================
