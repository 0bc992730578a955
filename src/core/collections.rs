//! Collection aliases used throughout the mesh and its operators.
//!
//! Hash-based collections use `rustc_hash` (not DoS-resistant; keys are
//! always internal), small per-element buffers use `SmallVec`, and keyed
//! storage uses `slotmap`.

use rustc_hash::{FxBuildHasher, FxHashMap, FxHashSet};
use smallvec::SmallVec;

#[cfg(not(feature = "dense-slotmap"))]
use slotmap::SlotMap;

#[cfg(feature = "dense-slotmap")]
use slotmap::DenseSlotMap;

use crate::core::mesh::{ElementKey, VertexKey};

/// Index of a facet (equivalently, of the opposite vertex) within an
/// element. Elements have at most four facets.
pub type FacetIndex = u8;

/// Inline capacity for per-element vertex and neighbor buffers (tetrahedra).
pub const MAX_ELEMENT_VERTICES: usize = 4;

// =============================================================================
// STORAGE BACKEND
// =============================================================================

/// Storage backend for vertex and element slots.
///
/// `SlotMap` by default; `DenseSlotMap` with the `dense-slotmap` feature.
/// Both hand out versioned keys, so a released slot that is reused never
/// aliases a stale key.
#[cfg(not(feature = "dense-slotmap"))]
pub type StorageMap<K, V> = SlotMap<K, V>;

#[cfg(feature = "dense-slotmap")]
pub type StorageMap<K, V> = DenseSlotMap<K, V>;

// =============================================================================
// CORE OPTIMIZED TYPES
// =============================================================================

/// `HashMap` with the Fx hasher.
///
/// # Examples
///
/// ```rust
/// use meliorate::core::collections::FastHashMap;
///
/// let mut map: FastHashMap<u64, usize> = FastHashMap::default();
/// map.insert(123, 456);
/// ```
pub type FastHashMap<K, V> = FxHashMap<K, V>;

/// Build hasher of [`FastHashMap`] and [`FastHashSet`].
pub type FastBuildHasher = FxBuildHasher;

pub use std::collections::hash_map::Entry;

/// `HashSet` with the Fx hasher.
pub type FastHashSet<T> = FxHashSet<T>;

/// Small-optimized `Vec`: inline up to `N` elements, heap beyond.
pub type SmallBuffer<T, const N: usize> = SmallVec<[T; N]>;

/// Creates a [`FastHashMap`] with pre-allocated capacity.
#[must_use]
pub fn fast_hash_map_with_capacity<K, V>(capacity: usize) -> FastHashMap<K, V> {
    FastHashMap::with_capacity_and_hasher(capacity, FastBuildHasher::default())
}

/// Creates a [`FastHashSet`] with pre-allocated capacity.
#[must_use]
pub fn fast_hash_set_with_capacity<T>(capacity: usize) -> FastHashSet<T> {
    FastHashSet::with_capacity_and_hasher(capacity, FastBuildHasher::default())
}

// =============================================================================
// DOMAIN-SPECIFIC ALIASES
// =============================================================================

/// Vertex keys of one element, in element order.
pub type VertexKeyBuffer = SmallBuffer<VertexKey, MAX_ELEMENT_VERTICES>;

/// Neighbor slots of one element; entry `i` is across the facet opposite
/// vertex `i`, `None` on the mesh boundary.
pub type NeighborBuffer = SmallBuffer<Option<ElementKey>, MAX_ELEMENT_VERTICES>;

/// Sorted vertex keys of a facet; identifies the facet independently of the
/// element it is seen from.
pub type FacetVertices = SmallBuffer<VertexKey, 3>;

/// Set of element keys.
pub type ElementKeySet = FastHashSet<ElementKey>;

/// Set of vertex keys.
pub type VertexKeySet = FastHashSet<VertexKey>;

/// Element keys collected during a local operation.
pub type ElementBuffer = SmallBuffer<ElementKey, 16>;

/// Map from a facet to the `(element, facet index)` pairs that own it.
pub type FacetToElementsMap = FastHashMap<FacetVertices, SmallBuffer<(ElementKey, FacetIndex), 2>>;

/// Builds the [`FacetVertices`] of the facet opposite `skip`.
#[must_use]
pub fn facet_vertices(vertices: &[VertexKey], skip: usize) -> FacetVertices {
    let mut facet: FacetVertices = vertices
        .iter()
        .enumerate()
        .filter(|&(i, _)| i != skip)
        .map(|(_, v)| *v)
        .collect();
    facet.sort_unstable();
    facet
}

#[cfg(test)]
mod tests {
    use super::*;
    use slotmap::SlotMap;

    #[test]
    fn capacity_helpers() {
        let map = fast_hash_map_with_capacity::<u64, usize>(100);
        assert!(map.capacity() >= 100);
        let set = fast_hash_set_with_capacity::<u64>(50);
        assert!(set.capacity() >= 50);
    }

    #[test]
    fn facet_vertices_are_order_independent() {
        let mut keys: SlotMap<VertexKey, ()> = SlotMap::with_key();
        let a = keys.insert(());
        let b = keys.insert(());
        let c = keys.insert(());
        let d = keys.insert(());
        let from_one = facet_vertices(&[a, b, c, d], 3);
        let from_other = facet_vertices(&[c, d, b, a], 1);
        assert_eq!(from_one, from_other);
        assert_eq!(from_one.len(), 3);
    }
}
