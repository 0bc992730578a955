//! Vertex removal by edge contraction.
//!
//! Contracting `v` onto a neighbor `u` deletes every element of the star of
//! `v` that contains the edge `(u, v)` and rewires the rest of the star to
//! `u`. The contraction is only kept if the re-wired elements close the
//! star's boundary exactly, so the mesh boundary is untouched unless `v` is
//! itself a boundary vertex and boundary edits are permitted.

use crate::core::algorithms::cavity::{CavityPlan, CavityPolicy, plan_retriangulation};
use crate::core::algorithms::operators::{
    Candidates, OperatorKind, OperatorRejection, OperatorSettings, Proposal,
};
use crate::core::collections::VertexKeyBuffer;
use crate::core::mesh::{ElementKey, Mesh, VertexKey};
use crate::core::vertex::VertexKind;

/// Best contraction removing one corner of `element`.
///
/// # Errors
///
/// Returns the last [`OperatorRejection`] when no contraction improves the
/// minimum quality of its star.
pub fn propose_removal<const D: usize>(
    mesh: &Mesh<D>,
    element: ElementKey,
    settings: &OperatorSettings,
) -> Result<Proposal<D>, OperatorRejection> {
    let corners: VertexKeyBuffer = mesh
        .element(element)
        .ok_or(OperatorRejection::NotApplicable)?
        .vertices()
        .iter()
        .copied()
        .collect();
    let mut candidates = Candidates::new(settings);
    for v in corners {
        for u in mesh.vertex_neighbors(v) {
            match plan_contraction(mesh, v, u, settings) {
                Ok(plan) => candidates.offer(Proposal::from_plan(OperatorKind::Removal, plan)),
                Err(rejection) => candidates.reject(rejection),
            }
        }
    }
    candidates.finish()
}

/// Plans removing `v` by contracting it onto its neighbor `u`.
///
/// # Errors
///
/// - [`OperatorRejection::FixedVertex`] if `v` is fixed.
/// - [`OperatorRejection::TouchesBoundary`] if `v` is on the boundary and
///   `settings.preserve_boundary` is set, or the boundary around `v` is not
///   flat, or `u` is not on a boundary facet of `v`.
/// - [`OperatorRejection::Inverted`] if a re-wired element folds.
pub fn plan_contraction<const D: usize>(
    mesh: &Mesh<D>,
    v: VertexKey,
    u: VertexKey,
    settings: &OperatorSettings,
) -> Result<CavityPlan<D>, OperatorRejection> {
    let vertex = mesh.vertex(v).ok_or(OperatorRejection::NotApplicable)?;
    if u == v || mesh.vertex(u).is_none() {
        return Err(OperatorRejection::NotApplicable);
    }
    let on_boundary = match vertex.kind {
        VertexKind::Fixed => return Err(OperatorRejection::FixedVertex),
        VertexKind::Boundary => true,
        VertexKind::Interior => mesh.vertex_on_boundary(v),
    };
    if on_boundary {
        if settings.preserve_boundary {
            return Err(OperatorRejection::TouchesBoundary);
        }
        check_flat_boundary(mesh, v, u)?;
    }

    let star = mesh.vertex_star(v).ok_or(OperatorRejection::NotApplicable)?;
    let mut created = Vec::with_capacity(star.len());
    for &key in &star {
        let element = mesh.element(key).ok_or(OperatorRejection::NotApplicable)?;
        if element.contains_vertex(u) {
            continue;
        }
        let tuple: VertexKeyBuffer = element
            .vertices()
            .iter()
            .map(|w| if *w == v { u } else { *w })
            .collect();
        created.push(tuple);
    }

    let policy = CavityPolicy {
        auto_orient: false,
        replace_boundary: on_boundary,
    };
    plan_retriangulation(mesh, &star, created, None, Some(v), policy)
}

/// A boundary vertex may only be contracted along a flat boundary, onto a
/// vertex of one of its boundary facets.
fn check_flat_boundary<const D: usize>(
    mesh: &Mesh<D>,
    v: VertexKey,
    u: VertexKey,
) -> Result<(), OperatorRejection> {
    let along = mesh
        .vertex_boundary_facets(v)
        .iter()
        .any(|&(element, facet)| mesh.facet_vertex_keys(element, facet).contains(&u));
    if along && mesh.boundary_is_flat_at(v) {
        Ok(())
    } else {
        Err(OperatorRejection::TouchesBoundary)
    }
}
