//! Vertex insertion by cavity re-triangulation.
//!
//! A candidate point is located by walking from the target element, the
//! conflict region (elements whose circumsphere contains the point) is grown
//! by breadth-first search, and the region is then enlarged until the point
//! sees every outer facet strictly from inside. The cavity is re-filled by
//! connecting the point to each outer facet.
//!
//! Boundary facets are never replaced: a cavity whose boundary facet cannot
//! be seen from the point is rejected.

use std::collections::VecDeque;

use crate::core::algorithms::cavity::{
    CavityPlan, CavityPolicy, new_vertex_placeholder, plan_retriangulation,
};
use crate::core::algorithms::operators::{
    Candidates, OperatorKind, OperatorRejection, OperatorSettings, Proposal,
};
use crate::core::collections::{ElementBuffer, ElementKeySet, SmallBuffer, VertexKeyBuffer};
use crate::core::mesh::{ElementKey, Mesh};
use crate::core::traversal::LocateResult;
use crate::core::vertex::{Vertex, VertexKind};
use crate::geometry::metric::MetricTensor;
use crate::geometry::point::Point;
use crate::geometry::predicates::{InSphere, Orientation, insphere, simplex_orientation};
use crate::geometry::util::{circumcenter, facet_measures, signed_volume};

/// Best insertion for `element`, trying its circumcenter, its centroid and
/// the point halfway between its centroid and the centroid of its largest
/// facet.
///
/// # Errors
///
/// Returns the last [`OperatorRejection`] when no candidate improves the
/// minimum quality of its cavity.
pub fn propose_insertion<const D: usize>(
    mesh: &Mesh<D>,
    element: ElementKey,
    settings: &OperatorSettings,
) -> Result<Proposal<D>, OperatorRejection> {
    let points = mesh
        .element_points(element)
        .ok_or(OperatorRejection::NotApplicable)?;
    let Some(centroid) = Point::centroid(points.iter()) else {
        return Err(OperatorRejection::NotApplicable);
    };

    let mut targets: SmallBuffer<Point<D>, 3> = SmallBuffer::new();
    if let Ok(center) = circumcenter(&points) {
        targets.push(center);
    }
    targets.push(centroid);
    let measures = facet_measures(&points);
    if let Some(largest) = (0..measures.len()).max_by(|&a, &b| measures[a].total_cmp(&measures[b])) {
        let facet = points
            .iter()
            .enumerate()
            .filter(|&(i, _)| i != largest)
            .map(|(_, p)| p);
        if let Some(facet_centroid) = Point::centroid(facet) {
            targets.push(facet_centroid.lerp(&centroid, 0.5));
        }
    }

    let mut candidates = Candidates::new(settings);
    for target in targets {
        match plan_insertion(mesh, element, target, settings) {
            Ok(plan) => candidates.offer(Proposal::from_plan(OperatorKind::Insertion, plan)),
            Err(rejection) => candidates.reject(rejection),
        }
    }
    candidates.finish()
}

/// Plans inserting `point`, requiring the cavity to contain `element`.
///
/// # Errors
///
/// - [`OperatorRejection::OutsideDomain`] if the point is not in the mesh.
/// - [`OperatorRejection::CavityTooLarge`] past `settings.max_cavity_size`.
/// - [`OperatorRejection::TouchesBoundary`] if a boundary facet is not
///   visible from the point.
/// - [`OperatorRejection::NotApplicable`] if the cavity misses `element`.
pub fn plan_insertion<const D: usize>(
    mesh: &Mesh<D>,
    element: ElementKey,
    point: Point<D>,
    settings: &OperatorSettings,
) -> Result<CavityPlan<D>, OperatorRejection> {
    if !point.is_finite() {
        return Err(OperatorRejection::OutsideDomain);
    }
    let start = match mesh.locate(&point, Some(element)) {
        Ok(LocateResult::Inside(key) | LocateResult::OnClosure(key)) => key,
        Ok(LocateResult::Outside) => return Err(OperatorRejection::OutsideDomain),
        Err(error) => {
            tracing::debug!(%error, "insertion point location failed");
            return Err(OperatorRejection::NotApplicable);
        }
    };

    let limit = settings.max_cavity_size;
    let mut cavity = conflict_region(mesh, start, &point, limit)?;
    if !cavity.contains(&element) {
        return Err(OperatorRejection::NotApplicable);
    }
    make_star_shaped(mesh, &mut cavity, &point, limit)?;

    let placeholder = new_vertex_placeholder();
    let mut created = Vec::new();
    for &key in &cavity {
        let e = mesh.element(key).ok_or(OperatorRejection::NotApplicable)?;
        for (facet, neighbor) in e.neighbors().iter().enumerate() {
            if neighbor.is_some_and(|n| cavity.contains(&n)) {
                continue;
            }
            let mut tuple: VertexKeyBuffer = e.vertices().iter().copied().collect();
            tuple[facet] = placeholder;
            created.push(tuple);
        }
    }

    let vertex = interpolated_vertex(mesh, start, point);
    plan_retriangulation(mesh, &cavity, created, Some(vertex), None, CavityPolicy::default())
}

/// Elements whose circumsphere does not exclude `point`, connected to
/// `start`.
fn conflict_region<const D: usize>(
    mesh: &Mesh<D>,
    start: ElementKey,
    point: &Point<D>,
    limit: usize,
) -> Result<ElementBuffer, OperatorRejection> {
    let mut region = ElementBuffer::new();
    let mut seen = ElementKeySet::default();
    let mut queue = VecDeque::from([start]);
    seen.insert(start);
    while let Some(key) = queue.pop_front() {
        region.push(key);
        if region.len() > limit {
            return Err(OperatorRejection::CavityTooLarge { limit });
        }
        let Some(element) = mesh.element(key) else {
            continue;
        };
        for neighbor in element.neighbors().iter().flatten() {
            if !seen.insert(*neighbor) {
                continue;
            }
            let conflicts = mesh
                .element_points(*neighbor)
                .is_some_and(|points| insphere(&points, point) != InSphere::OUTSIDE);
            if conflicts {
                queue.push_back(*neighbor);
            }
        }
    }
    Ok(region)
}

/// Grows `cavity` until `point` lies strictly inside every outer facet.
fn make_star_shaped<const D: usize>(
    mesh: &Mesh<D>,
    cavity: &mut ElementBuffer,
    point: &Point<D>,
    limit: usize,
) -> Result<(), OperatorRejection> {
    loop {
        let mut grow = None;
        'scan: for &key in cavity.iter() {
            let element = mesh.element(key).ok_or(OperatorRejection::NotApplicable)?;
            let points = mesh
                .element_points(key)
                .ok_or(OperatorRejection::NotApplicable)?;
            for (facet, neighbor) in element.neighbors().iter().enumerate() {
                if neighbor.is_some_and(|n| cavity.contains(&n)) {
                    continue;
                }
                let mut probe = points.clone();
                probe[facet] = *point;
                if simplex_orientation(&probe) == Orientation::POSITIVE {
                    continue;
                }
                match neighbor {
                    Some(n) => {
                        grow = Some(*n);
                        break 'scan;
                    }
                    None => return Err(OperatorRejection::TouchesBoundary),
                }
            }
        }
        let Some(next) = grow else {
            return Ok(());
        };
        cavity.push(next);
        if cavity.len() > limit {
            return Err(OperatorRejection::CavityTooLarge { limit });
        }
    }
}

/// New interior vertex at `point` carrying the size and metric of `host`
/// interpolated with barycentric weights.
fn interpolated_vertex<const D: usize>(mesh: &Mesh<D>, host: ElementKey, point: Point<D>) -> Vertex<D> {
    let mut vertex = Vertex {
        point,
        size: None,
        metric: None,
        kind: VertexKind::Interior,
        anchor: None,
    };
    let (Some(element), Some(points)) = (mesh.element(host), mesh.element_points(host)) else {
        return vertex;
    };
    let volume = signed_volume(&points);
    if volume <= 0.0 {
        return vertex;
    }
    let weights: SmallBuffer<f64, 4> = (0..points.len())
        .map(|i| {
            let mut probe = points.clone();
            probe[i] = point;
            (signed_volume(&probe) / volume).max(0.0)
        })
        .collect();
    let corners: SmallBuffer<&Vertex<D>, 4> = element
        .vertices()
        .iter()
        .filter_map(|v| mesh.vertex(*v))
        .collect();
    if corners.len() != weights.len() {
        return vertex;
    }

    let (mut size, mut total) = (0.0, 0.0);
    for (w, corner) in weights.iter().zip(&corners) {
        if let Some(h) = corner.size {
            size += w * h;
            total += w;
        }
    }
    if total > 0.0 {
        vertex.size = Some(size / total);
    }
    vertex.metric = MetricTensor::weighted_mean(
        weights
            .iter()
            .zip(&corners)
            .filter_map(|(w, corner)| corner.metric.as_ref().map(|m| (*w, m))),
    );
    vertex
}
