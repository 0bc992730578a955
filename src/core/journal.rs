//! Transaction journal for speculative edits.
//!
//! An edit runs between [`Mesh::begin_edit`] and either
//! [`Mesh::commit_edit`] or [`Mesh::rollback_edit`]. Each journaled primitive
//! appends one [`JournalEntry`] describing how to undo it; rollback replays
//! the inverses in strict reverse order, so any sequence of primitives is
//! undone exactly, including slot liveness, vertex lists, neighbor links,
//! positions and anchors. Commit makes the edit permanent and releases the
//! slots retired by it.
//!
//! At most one edit is open at a time.

use thiserror::Error;

use crate::core::collections::VertexKeyBuffer;
use crate::core::mesh::{ElementKey, Mesh, VertexKey};
use crate::core::pool::PoolError;
use crate::geometry::point::Point;

/// Errors from journal lifecycle misuse. These indicate programming errors
/// and are fatal for an improvement run.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum JournalError {
    /// [`Mesh::begin_edit`] was called while an edit was open.
    #[error("An edit is already open with {entries} journal entries")]
    AlreadyOpen {
        /// Entries recorded so far in the open edit.
        entries: usize,
    },
    /// Commit or rollback without an open edit.
    #[error("No edit is open")]
    NotOpen,
    /// A slot was not in the state its inverse expected.
    #[error("Journal replay failed: {0}")]
    Pool(#[from] PoolError),
}

/// One reversible step of an edit.
#[derive(Clone, Debug, PartialEq)]
pub enum JournalEntry<const D: usize> {
    /// A vertex was allocated.
    CreateVertex {
        /// The new vertex.
        vertex: VertexKey,
    },
    /// A vertex slot was retired.
    RetireVertex {
        /// The retired vertex.
        vertex: VertexKey,
    },
    /// A vertex moved.
    RelocateVertex {
        /// The moved vertex.
        vertex: VertexKey,
        /// Its previous position.
        old: Point<D>,
    },
    /// A vertex anchor changed.
    Reanchor {
        /// The vertex.
        vertex: VertexKey,
        /// Its previous anchor.
        old: Option<ElementKey>,
    },
    /// An element was allocated.
    CreateElement {
        /// The new element.
        element: ElementKey,
    },
    /// An element slot was retired.
    RetireElement {
        /// The retired element.
        element: ElementKey,
    },
    /// An element's vertex list was replaced.
    ReassignVertices {
        /// The element.
        element: ElementKey,
        /// Its previous vertex list.
        old: VertexKeyBuffer,
    },
    /// A neighbor slot changed.
    Relink {
        /// The element.
        element: ElementKey,
        /// The facet index.
        facet: usize,
        /// The previous neighbor.
        old: Option<ElementKey>,
    },
}

/// Ordered undo log of the open edit.
#[derive(Clone, Debug)]
pub struct Journal<const D: usize> {
    entries: Vec<JournalEntry<D>>,
    open: bool,
}

impl<const D: usize> Default for Journal<D> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
            open: false,
        }
    }
}

impl<const D: usize> Journal<D> {
    /// `true` while an edit is open.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.open
    }

    /// Entries recorded in the open edit.
    #[must_use]
    pub fn entries(&self) -> &[JournalEntry<D>] {
        &self.entries
    }

    fn begin(&mut self) -> Result<(), JournalError> {
        if self.open {
            return Err(JournalError::AlreadyOpen {
                entries: self.entries.len(),
            });
        }
        self.open = true;
        self.entries.clear();
        Ok(())
    }

    /// Appends an entry; outside an edit nothing is recorded.
    pub(crate) fn record(&mut self, entry: JournalEntry<D>) {
        if self.open {
            self.entries.push(entry);
        }
    }

    fn close(&mut self) -> Result<Vec<JournalEntry<D>>, JournalError> {
        if !self.open {
            return Err(JournalError::NotOpen);
        }
        self.open = false;
        Ok(std::mem::take(&mut self.entries))
    }
}

impl<const D: usize> Mesh<D> {
    /// Opens a speculative edit.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::AlreadyOpen`] if an edit is already open.
    pub fn begin_edit(&mut self) -> Result<(), JournalError> {
        self.journal.begin()
    }

    /// `true` while an edit is open.
    #[must_use]
    pub const fn has_open_edit(&self) -> bool {
        self.journal.is_open()
    }

    /// Makes the open edit permanent and releases the slots it retired.
    /// Returns the number of journal entries committed.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::NotOpen`] without an open edit, or a pool error
    /// if a retired slot was touched behind the journal's back.
    pub fn commit_edit(&mut self) -> Result<usize, JournalError> {
        let entries = self.journal.close()?;
        for entry in &entries {
            match entry {
                JournalEntry::RetireElement { element } => {
                    self.elements.release(*element)?;
                }
                JournalEntry::RetireVertex { vertex } => {
                    self.vertices.release(*vertex)?;
                }
                _ => {}
            }
        }
        tracing::trace!(entries = entries.len(), "committed edit");
        Ok(entries.len())
    }

    /// Undoes the open edit, restoring the exact prior state.
    ///
    /// # Errors
    ///
    /// Returns [`JournalError::NotOpen`] without an open edit, or a pool error
    /// if a slot is not in the state recorded by the journal.
    pub fn rollback_edit(&mut self) -> Result<(), JournalError> {
        let entries = self.journal.close()?;
        let count = entries.len();
        let mut moved: VertexKeyBuffer = VertexKeyBuffer::new();

        for entry in entries.into_iter().rev() {
            match entry {
                JournalEntry::CreateVertex { vertex } => {
                    self.vertices.remove(vertex)?;
                }
                JournalEntry::RetireVertex { vertex } => {
                    self.vertices.revive(vertex)?;
                }
                JournalEntry::RelocateVertex { vertex, old } => {
                    if let Some(v) = self.vertices.get_mut(vertex) {
                        v.set_point(old);
                    }
                    moved.push(vertex);
                }
                JournalEntry::Reanchor { vertex, old } => {
                    if let Some(v) = self.vertices.get_mut(vertex) {
                        v.anchor = old;
                    }
                }
                JournalEntry::CreateElement { element } => {
                    self.elements.remove(element)?;
                }
                JournalEntry::RetireElement { element } => {
                    self.elements.revive(element)?;
                }
                JournalEntry::ReassignVertices { element, old } => {
                    if let Some(e) = self.elements.get_mut(element) {
                        e.set_vertices(old);
                    }
                }
                JournalEntry::Relink {
                    element,
                    facet,
                    old,
                } => {
                    if let Some(e) = self.elements.get_mut(element) {
                        e.set_neighbor(facet, old);
                    }
                }
            }
        }

        // Positions are restored, so stars are valid again; drop caches that
        // were computed at the speculative positions.
        for vertex in moved {
            for element in self.vertex_star(vertex).unwrap_or_default() {
                self.invalidate_quality(element);
            }
        }
        tracing::trace!(entries = count, "rolled back edit");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::data::MeshData;
    use crate::core::element::Element;
    use crate::core::mesh::BuildOptions;

    fn two_triangles() -> Mesh<2> {
        let data = MeshData::from_positions(
            &[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]],
            vec![vec![0, 1, 2], vec![0, 2, 3]],
        );
        Mesh::from_data(&data, BuildOptions::default()).unwrap()
    }

    #[test]
    fn single_open_edit() {
        let mut mesh = two_triangles();
        mesh.begin_edit().unwrap();
        assert_eq!(
            mesh.begin_edit(),
            Err(JournalError::AlreadyOpen { entries: 0 })
        );
        mesh.commit_edit().unwrap();
        assert_eq!(mesh.commit_edit(), Err(JournalError::NotOpen));
        assert_eq!(mesh.rollback_edit(), Err(JournalError::NotOpen));
    }

    #[test]
    fn rollback_restores_everything() {
        let mut mesh = two_triangles();
        let before = mesh.to_data();
        let elements: Vec<ElementKey> = mesh.element_keys().collect();
        let vertices: Vec<VertexKey> = mesh.vertices().map(|(k, _)| k).collect();

        mesh.begin_edit().unwrap();
        mesh.relocate_vertex(vertices[0], Point::new([0.1, 0.1]));
        mesh.delete_element(elements[1]).unwrap();
        mesh.relink(elements[0], 1, None);
        let extra = mesh.create_element(Element::new::<2>(&vertices[1..4]).unwrap());
        mesh.reassign_vertices(elements[0], vertices[..3].iter().rev().copied().collect());
        mesh.set_anchor(vertices[3], Some(extra));
        assert_eq!(mesh.number_of_elements(), 2);
        assert!(!mesh.journal.entries().is_empty());

        mesh.rollback_edit().unwrap();
        assert!(!mesh.has_open_edit());
        assert_eq!(mesh.to_data(), before);
        assert!(mesh.element(extra).is_none());
        assert_eq!(mesh.element_keys().collect::<Vec<_>>(), elements);
        assert!(mesh.validate().is_ok());
    }

    #[test]
    fn commit_releases_retired_slots() {
        let mut mesh = two_triangles();
        let doomed = mesh.element_keys().last().unwrap();
        mesh.begin_edit().unwrap();
        mesh.delete_element(doomed).unwrap();
        assert!(mesh.elements.is_retired(doomed));
        assert_eq!(mesh.commit_edit(), Ok(1));
        assert!(!mesh.elements.is_retired(doomed));
        assert!(mesh.element(doomed).is_none());
        assert_eq!(mesh.number_of_elements(), 1);
    }
}
