//! Local adjacency traversal.
//!
//! Everything here walks neighbor links starting from a vertex anchor or a
//! hint element, so cost is proportional to the size of the neighborhood
//! visited, never to the size of the mesh.
//!
//! # References
//!
//! - O. Devillers, S. Pion, and M. Teillaud, "Walking in a Triangulation",
//!   International Journal of Foundations of Computer Science, 2001.

use thiserror::Error;

use crate::core::collections::{ElementBuffer, ElementKeySet, FastHashSet, SmallBuffer, VertexKeyBuffer};
use crate::core::mesh::{ElementKey, Mesh, VertexKey};
use crate::geometry::point::Point;
use crate::geometry::predicates::{Orientation, simplex_orientation};

/// Upper bound on the number of elements visited around one edge.
const MAX_EDGE_RING: usize = 64;

/// Result of a point-location walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocateResult {
    /// Point is strictly inside the element.
    Inside(ElementKey),
    /// Point lies on a facet, edge or vertex of the element.
    OnClosure(ElementKey),
    /// The walk left the mesh through a boundary facet.
    Outside,
}

/// Error during point location.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LocateError {
    /// The mesh has no elements.
    #[error("Cannot locate in an empty mesh")]
    EmptyMesh,
    /// The walk revisited an element.
    #[error("Point location cycled after {steps} steps")]
    CycleDetected {
        /// Steps taken before the cycle.
        steps: usize,
    },
}

/// Elements around an edge in adjacency order.
///
/// `elements[i]` has the edge plus `ring[i]` and `ring[(i + 1) % ring.len()]`
/// as its other two corners. A closed ring has as many ring vertices as
/// elements; an open ring (boundary edge) has one more.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdgeRing {
    /// Elements in walk order.
    pub elements: ElementBuffer,
    /// Vertices opposite the edge, in walk order.
    pub ring: SmallBuffer<VertexKey, 16>,
    /// `false` when the walk hit the boundary.
    pub closed: bool,
}

impl<const D: usize> Mesh<D> {
    /// Elements incident to `vertex`, found by walking from its anchor across
    /// the facets that contain it.
    ///
    /// Returns `None` for a dead vertex or one without a valid anchor.
    #[must_use]
    pub fn vertex_star(&self, vertex: VertexKey) -> Option<ElementBuffer> {
        let anchor = self.vertices.get(vertex)?.anchor()?;
        if !self.elements.get(anchor)?.contains_vertex(vertex) {
            return None;
        }

        let mut star = ElementBuffer::new();
        let mut seen = ElementKeySet::default();
        let mut stack: ElementBuffer = SmallBuffer::from_elem(anchor, 1);
        seen.insert(anchor);

        while let Some(key) = stack.pop() {
            star.push(key);
            let Some(element) = self.elements.get(key) else {
                continue;
            };
            for (i, &corner) in element.vertices().iter().enumerate() {
                // Facets opposite other corners contain `vertex`.
                if corner == vertex {
                    continue;
                }
                if let Some(next) = element.neighbor(i)
                    && seen.insert(next)
                {
                    stack.push(next);
                }
            }
        }
        Some(star)
    }

    /// Vertices sharing an edge with `vertex`, in first-seen order.
    #[must_use]
    pub fn vertex_neighbors(&self, vertex: VertexKey) -> Vec<VertexKey> {
        let mut seen = FastHashSet::default();
        let mut out = Vec::new();
        for key in self.vertex_star(vertex).unwrap_or_default() {
            if let Some(element) = self.elements.get(key) {
                for &v in element.vertices() {
                    if v != vertex && seen.insert(v) {
                        out.push(v);
                    }
                }
            }
        }
        out
    }

    /// Boundary facets containing `vertex`, as `(element, facet index)`.
    #[must_use]
    pub fn vertex_boundary_facets(&self, vertex: VertexKey) -> Vec<(ElementKey, usize)> {
        let mut facets = Vec::new();
        for key in self.vertex_star(vertex).unwrap_or_default() {
            let Some(element) = self.elements.get(key) else {
                continue;
            };
            for (i, &corner) in element.vertices().iter().enumerate() {
                if corner != vertex && element.neighbor(i).is_none() {
                    facets.push((key, i));
                }
            }
        }
        facets
    }

    /// `true` if some boundary facet contains `vertex`.
    #[must_use]
    pub fn vertex_on_boundary(&self, vertex: VertexKey) -> bool {
        !self.vertex_boundary_facets(vertex).is_empty()
    }

    /// `true` if `vertex` is on the boundary and every boundary facet around
    /// it lies exactly in one hyperplane.
    #[must_use]
    pub fn boundary_is_flat_at(&self, vertex: VertexKey) -> bool {
        let facets = self.vertex_boundary_facets(vertex);
        let Some(&(first, facet)) = facets.first() else {
            return false;
        };
        let Some(reference) = self.points_of(&self.facet_vertex_keys(first, facet)) else {
            return false;
        };
        let mut seen = FastHashSet::default();
        facets
            .iter()
            .flat_map(|&(element, index)| self.facet_vertex_keys(element, index))
            .filter(|w| seen.insert(*w))
            .all(|w| {
                self.position(w).is_some_and(|p| {
                    let mut probe = reference.clone();
                    probe.push(p);
                    simplex_orientation(&probe) == Orientation::DEGENERATE
                })
            })
    }

    /// Elements containing both `a` and `b`.
    #[must_use]
    pub fn edge_star(&self, a: VertexKey, b: VertexKey) -> ElementBuffer {
        self.vertex_star(a)
            .unwrap_or_default()
            .into_iter()
            .filter(|k| self.elements.get(*k).is_some_and(|e| e.contains_vertex(b)))
            .collect()
    }

    /// Ordered ring of tetrahedra around the edge `(a, b)`.
    ///
    /// Only meaningful for `D = 3`; returns `None` otherwise, when the edge
    /// does not exist, or when its star is not a single fan.
    #[must_use]
    pub fn edge_ring(&self, a: VertexKey, b: VertexKey) -> Option<EdgeRing> {
        if D != 3 {
            return None;
        }
        let star = self.edge_star(a, b);
        if star.is_empty() || star.len() > MAX_EDGE_RING {
            return None;
        }
        let others = |key: ElementKey| -> Option<[VertexKey; 2]> {
            let rest: VertexKeyBuffer = self
                .elements
                .get(key)?
                .vertices()
                .iter()
                .copied()
                .filter(|v| *v != a && *v != b)
                .collect();
            match rest.as_slice() {
                [c, d] => Some([*c, *d]),
                _ => None,
            }
        };

        // Open rings start at the element whose (a, b, ring[0]) facet is on
        // the boundary.
        let mut start = (star[0], others(star[0])?);
        for &key in &star {
            let [c, d] = others(key)?;
            let element = self.elements.get(key)?;
            if element.neighbor(element.vertex_index(d)?).is_none() {
                start = (key, [c, d]);
                break;
            }
            if element.neighbor(element.vertex_index(c)?).is_none() {
                start = (key, [d, c]);
                break;
            }
        }

        let (first, [c, d]) = start;
        let mut elements: ElementBuffer = SmallBuffer::from_elem(first, 1);
        let mut ring: SmallBuffer<VertexKey, 16> = SmallBuffer::new();
        ring.push(c);
        ring.push(d);
        let mut current = first;
        let mut last = d;
        let closed = loop {
            let element = self.elements.get(current)?;
            let behind = others(current)?.into_iter().find(|v| *v != last)?;
            match element.neighbor(element.vertex_index(behind)?) {
                None => break false,
                Some(next) if next == first => break true,
                Some(next) => {
                    if elements.len() >= star.len() {
                        return None;
                    }
                    let ahead = others(next)?.into_iter().find(|v| *v != last)?;
                    elements.push(next);
                    ring.push(ahead);
                    last = ahead;
                    current = next;
                }
            }
        };
        if closed {
            // The walk re-entered `first`, so the last pushed vertex repeats ring[0].
            ring.pop();
        }
        (elements.len() == star.len()).then_some(EdgeRing {
            elements,
            ring,
            closed,
        })
    }

    /// Walks from `hint` towards `point` by crossing any facet that separates
    /// them.
    ///
    /// # Errors
    ///
    /// Returns [`LocateError::EmptyMesh`] without elements and
    /// [`LocateError::CycleDetected`] if the walk revisits an element.
    pub fn locate(
        &self,
        point: &Point<D>,
        hint: Option<ElementKey>,
    ) -> Result<LocateResult, LocateError> {
        let mut current = match hint {
            Some(key) if self.elements.contains(key) => key,
            _ => self.elements.keys().next().ok_or(LocateError::EmptyMesh)?,
        };
        let mut visited = ElementKeySet::default();
        let limit = self.elements.len() + 1;

        for step in 0..limit {
            if !visited.insert(current) {
                return Err(LocateError::CycleDetected { steps: step });
            }
            let Some(element) = self.elements.get(current) else {
                return Err(LocateError::EmptyMesh);
            };
            let Some(corners) = self.points_of(element.vertices()) else {
                return Err(LocateError::EmptyMesh);
            };

            let mut on_closure = false;
            let mut crossed = None;
            for facet in 0..corners.len() {
                let mut probe = corners.clone();
                probe[facet] = *point;
                match simplex_orientation(&probe) {
                    Orientation::NEGATIVE => {
                        crossed = Some(element.neighbor(facet));
                        break;
                    }
                    Orientation::DEGENERATE => on_closure = true,
                    Orientation::POSITIVE => {}
                }
            }
            match crossed {
                Some(Some(next)) => current = next,
                Some(None) => return Ok(LocateResult::Outside),
                None if on_closure => return Ok(LocateResult::OnClosure(current)),
                None => return Ok(LocateResult::Inside(current)),
            }
        }
        Err(LocateError::CycleDetected { steps: limit })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::data::MeshData;
    use crate::core::mesh::BuildOptions;

    /// Four triangles around the center of the unit square.
    fn fan() -> (Mesh<2>, Vec<VertexKey>) {
        let data = MeshData::from_positions(
            &[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.5, 0.5]],
            vec![vec![0, 1, 4], vec![1, 2, 4], vec![2, 3, 4], vec![3, 0, 4]],
        );
        let mesh = Mesh::from_data(&data, BuildOptions::default()).unwrap();
        let keys = mesh.vertices().map(|(k, _)| k).collect();
        (mesh, keys)
    }

    /// Three tetrahedra around the vertical edge through the centroid.
    fn edge_fan() -> (Mesh<3>, Vec<VertexKey>) {
        let data = MeshData::from_positions(
            &[
                [0.0, 0.0, -1.0],
                [0.0, 0.0, 1.0],
                [1.0, 0.0, 0.0],
                [-0.5, 0.8, 0.0],
                [-0.5, -0.8, 0.0],
            ],
            vec![vec![0, 1, 2, 3], vec![0, 1, 3, 4], vec![0, 1, 4, 2]],
        );
        let mesh = Mesh::from_data(&data, BuildOptions { reorient_input: true }).unwrap();
        let keys = mesh.vertices().map(|(k, _)| k).collect();
        (mesh, keys)
    }

    #[test]
    fn star_of_center_and_corner() {
        let (mesh, v) = fan();
        assert_eq!(mesh.vertex_star(v[4]).unwrap().len(), 4);
        assert_eq!(mesh.vertex_star(v[0]).unwrap().len(), 2);
        assert_eq!(mesh.vertex_neighbors(v[4]).len(), 4);
        assert!(!mesh.vertex_on_boundary(v[4]));
        assert!(mesh.vertex_on_boundary(v[0]));
        assert_eq!(mesh.vertex_boundary_facets(v[1]).len(), 2);
    }

    #[test]
    fn closed_and_open_edge_rings() {
        let (mesh, v) = edge_fan();
        let ring = mesh.edge_ring(v[0], v[1]).unwrap();
        assert!(ring.closed);
        assert_eq!(ring.elements.len(), 3);
        assert_eq!(ring.ring.len(), 3);
        for (i, &e) in ring.elements.iter().enumerate() {
            let element = mesh.element(e).unwrap();
            assert!(element.contains_vertex(ring.ring[i]));
            assert!(element.contains_vertex(ring.ring[(i + 1) % 3]));
        }

        let open = mesh.edge_ring(v[0], v[2]).unwrap();
        assert!(!open.closed);
        assert_eq!(open.elements.len(), 2);
        assert_eq!(open.ring.len(), 3);
        assert!(mesh.edge_ring(v[2], v[3]).is_some());
        assert!(mesh.edge_ring(v[3], v[4]).is_some());
    }

    #[test]
    fn locate_walks_to_containing_element() {
        let (mesh, v) = fan();
        let start = mesh.vertex_star(v[0]).unwrap()[0];
        let LocateResult::Inside(found) = mesh.locate(&Point::new([0.5, 0.9]), Some(start)).unwrap()
        else {
            panic!("expected an interior hit");
        };
        let element = mesh.element(found).unwrap();
        assert!(element.contains_vertex(v[2]) && element.contains_vertex(v[3]));

        assert_eq!(
            mesh.locate(&Point::new([2.0, 0.5]), Some(start)).unwrap(),
            LocateResult::Outside
        );
        assert!(matches!(
            mesh.locate(&Point::new([0.5, 0.5]), None).unwrap(),
            LocateResult::OnClosure(_)
        ));
    }
}
