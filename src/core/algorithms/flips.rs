//! Local re-triangulation (flips) of small element clusters.
//!
//! Supported moves:
//!
//! - 2D edge flip (2→2): two triangles sharing an edge are replaced by the
//!   two triangles on the other diagonal of their quadrilateral.
//! - 3D facet flip (2→3): two tetrahedra sharing a facet are replaced by
//!   three tetrahedra around the edge joining their apexes.
//! - 3D edge removal (n→2n−4): the `n` tetrahedra around an interior edge are
//!   replaced by two tetrahedra per triangle of a triangulation of the ring
//!   polygon. `n = 3` is the 3→2 flip and `n = 4` the 4→4 flip. The ring
//!   triangulation maximizing the minimum quality is found by dynamic
//!   programming over sub-polygons.
//!
//! Flips never change the boundary: every cluster facet is matched by the new
//! elements (see [`cavity`](crate::core::algorithms::cavity)).
//!
//! # References
//!
//! - B. Joe, "Construction of three-dimensional improved-quality
//!   triangulations using local transformations", SIAM J. Sci. Comput., 1995.
//! - J. R. Shewchuk, "Two Discrete Optimization Algorithms for the
//!   Topological Improvement of Tetrahedral Meshes", 2002.

use crate::core::algorithms::cavity::{CavityPlan, CavityPolicy, plan_retriangulation};
use crate::core::algorithms::operators::{
    Candidates, OperatorKind, OperatorRejection, OperatorSettings, Proposal,
};
use crate::core::collections::{ElementBuffer, SmallBuffer, VertexKeyBuffer};
use crate::core::mesh::{ElementKey, Mesh, VertexKey};
use crate::geometry::predicates::{Orientation, simplex_orientation};
use crate::geometry::quality::DEGENERATE_QUALITY;

/// Largest edge ring handled by edge removal.
pub const MAX_EDGE_REMOVAL_RING: usize = 7;

const FLIP_POLICY: CavityPolicy = CavityPolicy {
    auto_orient: true,
    replace_boundary: false,
};

/// Best flip for the cluster around `element`.
///
/// # Errors
///
/// Returns the last [`OperatorRejection`] when no flip improves the minimum
/// quality of its cluster.
pub fn propose_flip<const D: usize>(
    mesh: &Mesh<D>,
    element: ElementKey,
    settings: &OperatorSettings,
) -> Result<Proposal<D>, OperatorRejection> {
    let vertices: VertexKeyBuffer = mesh
        .element(element)
        .ok_or(OperatorRejection::NotApplicable)?
        .vertices()
        .iter()
        .copied()
        .collect();
    let mut candidates = Candidates::new(settings);
    let mut offer = |plan: Result<CavityPlan<D>, OperatorRejection>| match plan {
        Ok(plan) => candidates.offer(Proposal::from_plan(OperatorKind::Flip, plan)),
        Err(rejection) => candidates.reject(rejection),
    };

    match D {
        2 => {
            for facet in 0..=D {
                offer(plan_edge_flip(mesh, element, facet));
            }
        }
        3 => {
            for facet in 0..=D {
                offer(plan_facet_flip(mesh, element, facet));
            }
            for i in 0..vertices.len() {
                for j in (i + 1)..vertices.len() {
                    offer(plan_edge_removal(mesh, vertices[i], vertices[j]));
                }
            }
        }
        _ => {}
    }
    candidates.finish()
}

/// Corners of `element` other than the one at `facet`, plus that corner and
/// the apex of the neighbor across the facet.
fn facet_cluster<const D: usize>(
    mesh: &Mesh<D>,
    element: ElementKey,
    facet: usize,
) -> Result<(ElementKey, VertexKeyBuffer, VertexKey, VertexKey), OperatorRejection> {
    let e = mesh.element(element).ok_or(OperatorRejection::NotApplicable)?;
    let neighbor = e.neighbor(facet).ok_or(OperatorRejection::TouchesBoundary)?;
    let n = mesh.element(neighbor).ok_or(OperatorRejection::NotApplicable)?;
    let apex = *e.vertices().get(facet).ok_or(OperatorRejection::NotApplicable)?;
    let shared: VertexKeyBuffer = mesh.facet_vertex_keys(element, facet);
    let opposite = n
        .vertices()
        .iter()
        .copied()
        .find(|v| !shared.contains(v))
        .ok_or(OperatorRejection::CavityMismatch)?;
    Ok((neighbor, shared, apex, opposite))
}

/// 2D edge flip across facet `facet` of `element`.
///
/// # Errors
///
/// Rejects boundary edges and non-convex quadrilaterals.
pub fn plan_edge_flip<const D: usize>(
    mesh: &Mesh<D>,
    element: ElementKey,
    facet: usize,
) -> Result<CavityPlan<D>, OperatorRejection> {
    if D != 2 {
        return Err(OperatorRejection::NotApplicable);
    }
    let (neighbor, shared, apex, opposite) = facet_cluster(mesh, element, facet)?;
    let [p, q] = shared.as_slice() else {
        return Err(OperatorRejection::CavityMismatch);
    };
    let created = vec![
        SmallBuffer::from_slice(&[apex, *p, opposite]),
        SmallBuffer::from_slice(&[apex, opposite, *q]),
    ];
    plan_retriangulation(mesh, &[element, neighbor], created, None, None, FLIP_POLICY)
}

/// 3D 2→3 flip across facet `facet` of `element`.
///
/// # Errors
///
/// Rejects boundary facets and pairs whose apex segment misses the shared
/// facet.
pub fn plan_facet_flip<const D: usize>(
    mesh: &Mesh<D>,
    element: ElementKey,
    facet: usize,
) -> Result<CavityPlan<D>, OperatorRejection> {
    if D != 3 {
        return Err(OperatorRejection::NotApplicable);
    }
    let (neighbor, shared, apex, opposite) = facet_cluster(mesh, element, facet)?;
    let created = (0..shared.len())
        .map(|i| {
            SmallBuffer::from_slice(&[
                apex,
                opposite,
                shared[i],
                shared[(i + 1) % shared.len()],
            ])
        })
        .collect();
    plan_retriangulation(mesh, &[element, neighbor], created, None, None, FLIP_POLICY)
}

/// Quality of the tetrahedron pair `(triangle, a)` and `(triangle, b)`,
/// positively ordered, or `None` unless the triangle separates `a` and `b`.
fn ring_triangle<const D: usize>(
    mesh: &Mesh<D>,
    triangle: [VertexKey; 3],
    a: VertexKey,
    b: VertexKey,
) -> Option<(f64, [VertexKeyBuffer; 2])> {
    let mut tets: [VertexKeyBuffer; 2] = Default::default();
    let mut sides = [Orientation::DEGENERATE; 2];
    for (slot, apex) in [a, b].into_iter().enumerate() {
        let mut tet: VertexKeyBuffer = SmallBuffer::from_slice(&triangle);
        tet.push(apex);
        let points = mesh.points_of(&tet)?;
        sides[slot] = simplex_orientation(&points);
        if sides[slot] == Orientation::NEGATIVE {
            tet.swap(0, 1);
        }
        tets[slot] = tet;
    }
    let separated = match sides {
        [Orientation::POSITIVE, Orientation::NEGATIVE]
        | [Orientation::NEGATIVE, Orientation::POSITIVE] => true,
        _ => false,
    };
    if !separated {
        return None;
    }
    let quality = mesh.evaluate(&tets[0], &[]).min(mesh.evaluate(&tets[1], &[]));
    Some((quality, tets))
}

/// 3D edge removal of the interior edge `(a, b)`.
///
/// # Errors
///
/// Rejects boundary edges, rings larger than [`MAX_EDGE_REMOVAL_RING`], and
/// rings without a valid triangulation.
pub fn plan_edge_removal<const D: usize>(
    mesh: &Mesh<D>,
    a: VertexKey,
    b: VertexKey,
) -> Result<CavityPlan<D>, OperatorRejection> {
    if D != 3 {
        return Err(OperatorRejection::NotApplicable);
    }
    let ring = mesh.edge_ring(a, b).ok_or(OperatorRejection::NotApplicable)?;
    if !ring.closed {
        return Err(OperatorRejection::TouchesBoundary);
    }
    let n = ring.ring.len();
    if !(3..=MAX_EDGE_REMOVAL_RING).contains(&n) {
        return Err(OperatorRejection::NotApplicable);
    }

    // best[i][j]: best minimum quality triangulating ring[i..=j];
    // split[i][j]: apex of the triangle on chord (i, j).
    const N: usize = MAX_EDGE_REMOVAL_RING;
    let mut best = [[f64::INFINITY; N]; N];
    let mut split = [[usize::MAX; N]; N];
    for width in 2..n {
        for i in 0..(n - width) {
            let j = i + width;
            best[i][j] = DEGENERATE_QUALITY;
            for k in (i + 1)..j {
                let Some((quality, _)) =
                    ring_triangle(mesh, [ring.ring[i], ring.ring[k], ring.ring[j]], a, b)
                else {
                    continue;
                };
                let value = quality.min(best[i][k]).min(best[k][j]);
                if value > best[i][j] {
                    best[i][j] = value;
                    split[i][j] = k;
                }
            }
        }
    }
    if best[0][n - 1] <= DEGENERATE_QUALITY {
        return Err(OperatorRejection::Inverted);
    }

    let mut created = Vec::with_capacity(2 * (n - 2));
    let mut chords: SmallBuffer<(usize, usize), N> = SmallBuffer::from_elem((0, n - 1), 1);
    while let Some((i, j)) = chords.pop() {
        if j < i + 2 {
            continue;
        }
        let k = split[i][j];
        if k == usize::MAX {
            return Err(OperatorRejection::Inverted);
        }
        let (_, tets) = ring_triangle(mesh, [ring.ring[i], ring.ring[k], ring.ring[j]], a, b)
            .ok_or(OperatorRejection::Inverted)?;
        created.extend(tets);
        chords.push((i, k));
        chords.push((k, j));
    }

    let removed: ElementBuffer = ring.elements;
    plan_retriangulation(mesh, &removed, created, None, None, FLIP_POLICY)
}
