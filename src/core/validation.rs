//! Structural and geometric invariant checks.
//!
//! [`Mesh::validation_report`] runs every check and records each failure,
//! rather than stopping at the first one, so a self-check failure in the
//! improvement driver can surface the full picture at once.

use std::fmt;

use thiserror::Error;

use crate::core::collections::{FacetToElementsMap, FacetIndex, fast_hash_map_with_capacity};
use crate::core::mesh::{ElementKey, Mesh, VertexKey};
use crate::geometry::predicates::Orientation;

/// Classifies the invariant that failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum InvariantKind {
    /// Elements reference live vertices only.
    VertexLiveness,
    /// Neighbor links are mutual and point at live elements.
    NeighborSymmetry,
    /// Neighbors share exactly the facet's vertices.
    FacetAgreement,
    /// Each facet is owned by at most two elements, and two owners are linked.
    FacetSharing,
    /// Every element is positively oriented.
    Orientation,
    /// Neighbors lie on opposite sides of their shared facet.
    FacetConsistency,
    /// Every used vertex is anchored to a live element containing it.
    VertexAnchor,
    /// No edit is left open at a committed state.
    JournalOpen,
}

/// What went wrong in one check.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum TopologyError {
    /// An element references a dead vertex.
    #[error("Element {element:?} references missing vertex {vertex:?}")]
    MissingVertex {
        /// The element.
        element: ElementKey,
        /// The dead vertex.
        vertex: VertexKey,
    },
    /// A neighbor link points at a dead element or is not returned.
    #[error("Element {element:?} lists {neighbor:?} across facet {facet}, which does not link back")]
    AsymmetricNeighbor {
        /// The element.
        element: ElementKey,
        /// Its facet index.
        facet: usize,
        /// The neighbor.
        neighbor: ElementKey,
    },
    /// Two linked elements disagree on the shared facet.
    #[error("Elements {element:?} and {neighbor:?} are linked but do not share facet {facet} of the first")]
    FacetMismatch {
        /// The element.
        element: ElementKey,
        /// Its facet index.
        facet: usize,
        /// The neighbor.
        neighbor: ElementKey,
    },
    /// A facet is owned by too many elements, or two owners are not linked.
    #[error("Facet is shared by {owners:?} without matching links")]
    UnlinkedFacet {
        /// The elements owning the facet.
        owners: Vec<ElementKey>,
    },
    /// A flat or inverted element.
    #[error("Element {element:?} is {orientation}")]
    BadOrientation {
        /// The element.
        element: ElementKey,
        /// Its exact orientation.
        orientation: Orientation,
    },
    /// Two linked elements lie on the same side of the shared facet.
    #[error("Elements {element:?} and {neighbor:?} fold over their shared facet")]
    FoldedFacet {
        /// The element.
        element: ElementKey,
        /// The neighbor.
        neighbor: ElementKey,
    },
    /// A vertex anchor is missing, dead, or does not contain the vertex.
    #[error("Vertex {vertex:?} has invalid anchor {anchor:?}")]
    BadAnchor {
        /// The vertex.
        vertex: VertexKey,
        /// Its anchor.
        anchor: Option<ElementKey>,
    },
    /// An edit is open.
    #[error("Journal has an open edit with {entries} entries")]
    OpenEdit {
        /// Entries recorded in the open edit.
        entries: usize,
    },
}

/// A single invariant violation.
#[derive(Clone, Debug, PartialEq)]
pub struct InvariantViolation {
    /// The kind of invariant that failed.
    pub kind: InvariantKind,
    /// Details.
    pub error: TopologyError,
}

/// Every invariant violation found by [`Mesh::validation_report`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ValidationReport {
    /// Violations in check order.
    pub violations: Vec<InvariantViolation>,
}

impl ValidationReport {
    /// Returns `true` if no violations were recorded.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.violations.is_empty()
    }

    /// `true` if some violation has the given kind.
    #[must_use]
    pub fn has(&self, kind: InvariantKind) -> bool {
        self.violations.iter().any(|v| v.kind == kind)
    }

    fn push(&mut self, kind: InvariantKind, error: TopologyError) {
        self.violations.push(InvariantViolation { kind, error });
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} invariant violation(s)", self.violations.len())?;
        for violation in &self.violations {
            write!(f, "\n  {:?}: {}", violation.kind, violation.error)?;
        }
        Ok(())
    }
}

impl<const D: usize> Mesh<D> {
    /// Runs every invariant check and collects all failures.
    #[must_use]
    pub fn validation_report(&self) -> ValidationReport {
        let mut report = ValidationReport::default();

        if self.journal.is_open() {
            report.push(
                InvariantKind::JournalOpen,
                TopologyError::OpenEdit {
                    entries: self.journal.entries().len(),
                },
            );
        }

        self.check_elements(&mut report);
        // Geometry and anchors are meaningless over dangling references.
        if report.has(InvariantKind::VertexLiveness) {
            return report;
        }
        self.check_neighbors(&mut report);
        self.check_facet_sharing(&mut report);
        self.check_anchors(&mut report);
        report
    }

    /// Checks all invariants.
    ///
    /// # Errors
    ///
    /// Returns the full [`ValidationReport`] if any invariant fails.
    pub fn validate(&self) -> Result<(), ValidationReport> {
        let report = self.validation_report();
        if report.is_empty() { Ok(()) } else { Err(report) }
    }

    fn check_elements(&self, report: &mut ValidationReport) {
        for (key, element) in self.elements.iter() {
            if let Some(&vertex) = element
                .vertices()
                .iter()
                .find(|v| !self.vertices.contains(**v))
            {
                report.push(
                    InvariantKind::VertexLiveness,
                    TopologyError::MissingVertex {
                        element: key,
                        vertex,
                    },
                );
                continue;
            }
            if let Some(orientation) = self.orientation(key)
                && orientation != Orientation::POSITIVE
            {
                report.push(
                    InvariantKind::Orientation,
                    TopologyError::BadOrientation {
                        element: key,
                        orientation,
                    },
                );
            }
        }
    }

    fn check_neighbors(&self, report: &mut ValidationReport) {
        for (key, element) in self.elements.iter() {
            for facet in 0..element.vertices().len() {
                let Some(neighbor) = element.neighbor(facet) else {
                    continue;
                };
                let back = self
                    .elements
                    .get(neighbor)
                    .and_then(|n| n.facet_towards(key));
                let Some(back) = back else {
                    report.push(
                        InvariantKind::NeighborSymmetry,
                        TopologyError::AsymmetricNeighbor {
                            element: key,
                            facet,
                            neighbor,
                        },
                    );
                    continue;
                };
                let back = usize::from(back);
                let shared = self
                    .elements
                    .get(neighbor)
                    .is_some_and(|n| n.facet_key(back) == element.facet_key(facet));
                if !shared {
                    report.push(
                        InvariantKind::FacetAgreement,
                        TopologyError::FacetMismatch {
                            element: key,
                            facet,
                            neighbor,
                        },
                    );
                    continue;
                }
                // Each pair once.
                if key < neighbor && !self.opposite_sides(key, facet, neighbor, back) {
                    report.push(
                        InvariantKind::FacetConsistency,
                        TopologyError::FoldedFacet {
                            element: key,
                            neighbor,
                        },
                    );
                }
            }
        }
    }

    fn check_facet_sharing(&self, report: &mut ValidationReport) {
        let mut facets: FacetToElementsMap =
            fast_hash_map_with_capacity(self.elements.len().saturating_mul(D + 1));
        for (key, element) in self.elements.iter() {
            for facet in 0..element.vertices().len() {
                facets
                    .entry(element.facet_key(facet))
                    .or_default()
                    .push((key, FacetIndex::try_from(facet).unwrap_or(FacetIndex::MAX)));
            }
        }
        for owners in facets.values() {
            let linked = match owners.as_slice() {
                [_] => true,
                [(a, fa), (b, _)] => self
                    .elements
                    .get(*a)
                    .is_some_and(|e| e.neighbor(usize::from(*fa)) == Some(*b)),
                _ => false,
            };
            if !linked {
                report.push(
                    InvariantKind::FacetSharing,
                    TopologyError::UnlinkedFacet {
                        owners: owners.iter().map(|(k, _)| *k).collect(),
                    },
                );
            }
        }
    }

    fn check_anchors(&self, report: &mut ValidationReport) {
        let mut used = crate::core::collections::VertexKeySet::default();
        for (_, element) in self.elements.iter() {
            used.extend(element.vertices().iter().copied());
        }
        for (key, vertex) in self.vertices.iter() {
            let anchor = vertex.anchor();
            let valid = match anchor {
                Some(element) => self
                    .elements
                    .get(element)
                    .is_some_and(|e| e.contains_vertex(key)),
                None => !used.contains(&key),
            };
            if !valid {
                report.push(
                    InvariantKind::VertexAnchor,
                    TopologyError::BadAnchor {
                        vertex: key,
                        anchor,
                    },
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::data::MeshData;
    use crate::core::mesh::BuildOptions;

    fn square() -> Mesh<2> {
        let data = MeshData::from_positions(
            &[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]],
            vec![vec![0, 1, 2], vec![0, 2, 3]],
        );
        Mesh::from_data(&data, BuildOptions::default()).unwrap()
    }

    #[test]
    fn valid_mesh_has_empty_report() {
        let mesh = square();
        assert!(mesh.validation_report().is_empty());
        assert!(mesh.validate().is_ok());
    }

    #[test]
    fn broken_link_is_reported() {
        let mut mesh = square();
        let first = mesh.element_keys().next().unwrap();
        let facet = mesh
            .element(first)
            .unwrap()
            .neighbors()
            .iter()
            .position(Option::is_some)
            .unwrap();
        mesh.relink(first, facet, None);
        let report = mesh.validate().unwrap_err();
        assert!(report.has(InvariantKind::NeighborSymmetry));
        assert!(report.has(InvariantKind::FacetSharing));
        assert!(report.to_string().contains("invariant violation"));
    }

    #[test]
    fn moved_vertex_inverts_and_open_edit_is_reported() {
        let mut mesh = square();
        let v = mesh.vertices().map(|(k, _)| k).nth(1).unwrap();
        mesh.begin_edit().unwrap();
        mesh.relocate_vertex(v, crate::geometry::point::Point::new([-1.0, 2.0]));
        let report = mesh.validation_report();
        assert!(report.has(InvariantKind::JournalOpen));
        assert!(report.has(InvariantKind::Orientation));
        mesh.rollback_edit().unwrap();
        assert!(mesh.validate().is_ok());
    }

    #[test]
    fn stale_anchor_is_reported() {
        let mut mesh = square();
        let (v, anchor) = mesh
            .vertices()
            .map(|(k, vx)| (k, vx.anchor().unwrap()))
            .find(|(k, _)| mesh.vertex_star(*k).is_some_and(|s| s.len() == 1))
            .unwrap();
        let other = mesh.element_keys().find(|e| *e != anchor).unwrap();
        mesh.set_anchor(v, Some(other));
        assert!(mesh.validate().unwrap_err().has(InvariantKind::VertexAnchor));
    }
}
