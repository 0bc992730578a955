//! Generic cavity re-triangulation shared by flips, insertion and removal.
//!
//! A cavity is a set of live elements to be removed together with its outer
//! facets: facets of removed elements whose neighbor is not removed (or is
//! the boundary). A re-triangulation is a list of new vertex tuples that must
//! close the cavity exactly:
//!
//! 1. every outer facet is a facet of exactly one new element;
//! 2. every other facet of a new element is shared by exactly two new
//!    elements;
//! 3. every new element is positively oriented and neighbors across every
//!    matched facet lie on opposite sides of it;
//! 4. total volume is conserved.
//!
//! Only operators allowed to move the boundary may leave boundary outer
//! facets unmatched, in which case the unmatched new facets become the new
//! boundary.
//!
//! Planning is pure. [`apply_retriangulation`] then reuses removed element
//! slots by reassigning their vertex lists before allocating new ones, wires
//! neighbor links locally and repairs vertex anchors, all through journaled
//! primitives.

use crate::core::algorithms::operators::{OperatorError, OperatorRejection};
use crate::core::collections::{
    ElementBuffer, ElementKeySet, FacetIndex, FacetToElementsMap, FacetVertices, FastHashMap,
    FastHashSet, SmallBuffer, VertexKeyBuffer, VertexKeySet, facet_vertices,
    fast_hash_map_with_capacity,
};
use crate::core::element::Element;
use crate::core::mesh::{ElementKey, ElementPoints, Mesh, VertexKey};
use crate::core::vertex::Vertex;
use crate::geometry::point::Point;
use crate::geometry::predicates::{Orientation, simplex_orientation};
use crate::geometry::quality::{Corner, DEGENERATE_QUALITY};
use crate::geometry::util::measures::signed_volume;

/// Relative tolerance of the volume conservation check.
const VOLUME_TOLERANCE: f64 = 1e-9;

/// Facet of a planned element to `(element index, local facet)` owners.
type LocalFacetMap = FastHashMap<FacetVertices, SmallBuffer<(usize, usize), 2>>;

/// Placeholder key standing for the vertex a plan creates.
#[must_use]
pub fn new_vertex_placeholder() -> VertexKey {
    VertexKey::default()
}

/// How strictly a re-triangulation is checked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CavityPolicy {
    /// Swap the first two vertices of negatively ordered new elements
    /// instead of rejecting them.
    pub auto_orient: bool,
    /// Allow boundary outer facets to disappear and new boundary facets to
    /// appear.
    pub replace_boundary: bool,
}

/// A facet on the cavity boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
struct OuterFacet {
    key: FacetVertices,
    /// Corner of the removed element opposite the facet.
    apex: VertexKey,
    /// Element outside the cavity across the facet, and its facet index.
    outside: Option<(ElementKey, usize)>,
}

/// A checked re-triangulation ready to apply.
#[derive(Clone, Debug)]
pub struct CavityPlan<const D: usize> {
    /// Elements to remove.
    pub removed: ElementBuffer,
    /// New elements, positively ordered. The placeholder key stands for
    /// `new_vertex`.
    pub created: Vec<VertexKeyBuffer>,
    /// Vertex the plan creates.
    pub new_vertex: Option<Vertex<D>>,
    /// Vertex the plan deletes.
    pub removed_vertex: Option<VertexKey>,
    /// Minimum quality of the removed elements.
    pub before: f64,
    /// Minimum predicted quality of the new elements.
    pub predicted: f64,
    outer: Vec<OuterFacet>,
}

impl<const D: usize> CavityPlan<D> {
    /// Elements removed plus elements created.
    #[must_use]
    pub fn touched(&self) -> usize {
        self.removed.len() + self.created.len()
    }
}

/// Positions of a vertex list with the placeholder resolved to `new_point`.
fn points_with<const D: usize>(
    mesh: &Mesh<D>,
    vertices: &[VertexKey],
    new_point: Option<&Point<D>>,
) -> Option<ElementPoints<D>> {
    let placeholder = new_vertex_placeholder();
    vertices
        .iter()
        .map(|v| {
            if *v == placeholder {
                new_point.copied()
            } else {
                mesh.position(*v)
            }
        })
        .collect()
}

/// `true` if `probe` replacing corner `facet` of `points` gives `expected`.
fn side_of<const D: usize>(points: &[Point<D>], facet: usize, probe: Point<D>, expected: Orientation) -> bool {
    let mut swapped: ElementPoints<D> = points.iter().copied().collect();
    swapped[facet] = probe;
    simplex_orientation(&swapped) == expected
}

/// `true` if a live element outside `cavity` has every vertex of `facet`.
fn owned_outside<const D: usize>(mesh: &Mesh<D>, facet: &FacetVertices, cavity: &ElementKeySet) -> bool {
    let placeholder = new_vertex_placeholder();
    let Some(&first) = facet.iter().find(|v| **v != placeholder) else {
        return false;
    };
    mesh.vertex_star(first).is_some_and(|star| {
        star.iter().filter(|k| !cavity.contains(*k)).any(|k| {
            mesh.element(*k)
                .is_some_and(|e| facet.iter().all(|v| e.contains_vertex(*v)))
        })
    })
}

/// Checks a re-triangulation of the cavity formed by `removed`.
///
/// # Errors
///
/// Returns [`OperatorRejection::Inverted`] for flat or inverted new elements,
/// [`OperatorRejection::CavityMismatch`] when the new elements do not close
/// the cavity, and [`OperatorRejection::TouchesBoundary`] when boundary facets
/// would change without `policy.replace_boundary`.
pub fn plan_retriangulation<const D: usize>(
    mesh: &Mesh<D>,
    removed: &[ElementKey],
    created: Vec<VertexKeyBuffer>,
    new_vertex: Option<Vertex<D>>,
    removed_vertex: Option<VertexKey>,
    policy: CavityPolicy,
) -> Result<CavityPlan<D>, OperatorRejection> {
    if removed.is_empty() || created.is_empty() {
        return Err(OperatorRejection::NotApplicable);
    }
    let placeholder = new_vertex_placeholder();
    let new_point = new_vertex.as_ref().map(|v| *v.point());
    let cavity: ElementKeySet = removed.iter().copied().collect();

    // Outer facets and the vertex set of the cavity.
    let mut outer = Vec::new();
    let mut cavity_vertices = VertexKeySet::default();
    let mut removed_volume = 0.0;
    let mut before = f64::INFINITY;
    for &key in removed {
        let element = mesh.element(key).ok_or(OperatorRejection::NotApplicable)?;
        cavity_vertices.extend(element.vertices().iter().copied());
        let points = mesh.element_points(key).ok_or(OperatorRejection::NotApplicable)?;
        removed_volume += signed_volume(&points);
        before = before.min(mesh.peek_quality(key).unwrap_or(DEGENERATE_QUALITY));
        for (facet, neighbor) in element.neighbors().iter().enumerate() {
            if neighbor.is_some_and(|n| cavity.contains(&n)) {
                continue;
            }
            let facet_key = element.facet_key(facet);
            let outside = match neighbor {
                Some(n) => {
                    let back = mesh
                        .element(*n)
                        .and_then(|e| (0..=D).find(|&j| e.facet_key(j) == facet_key))
                        .ok_or(OperatorRejection::CavityMismatch)?;
                    Some((*n, back))
                }
                None => None,
            };
            outer.push(OuterFacet {
                key: facet_key,
                apex: element.vertices()[facet],
                outside,
            });
        }
    }

    // Orientation and vertex usage of the new elements.
    let mut created = created;
    let mut created_points: Vec<ElementPoints<D>> = Vec::with_capacity(created.len());
    let mut created_volume = 0.0;
    let mut used = VertexKeySet::default();
    for tuple in &mut created {
        if tuple.len() != D + 1 {
            return Err(OperatorRejection::CavityMismatch);
        }
        for v in tuple.iter() {
            let known = if *v == placeholder {
                new_vertex.is_some()
            } else {
                cavity_vertices.contains(v) && Some(*v) != removed_vertex
            };
            if !known {
                return Err(OperatorRejection::CavityMismatch);
            }
            used.insert(*v);
        }
        let mut points = points_with(mesh, tuple, new_point.as_ref())
            .ok_or(OperatorRejection::CavityMismatch)?;
        match simplex_orientation(&points) {
            Orientation::POSITIVE => {}
            Orientation::NEGATIVE if policy.auto_orient => {
                tuple.swap(0, 1);
                points.swap(0, 1);
            }
            _ => return Err(OperatorRejection::Inverted),
        }
        created_volume += signed_volume(&points);
        created_points.push(points);
    }
    if cavity_vertices
        .iter()
        .any(|v| Some(*v) != removed_vertex && !used.contains(v))
    {
        return Err(OperatorRejection::CavityMismatch);
    }

    // Facet matching.
    let mut facets: LocalFacetMap = fast_hash_map_with_capacity(created.len() * (D + 1));
    for (index, tuple) in created.iter().enumerate() {
        for facet in 0..=D {
            let owners = facets.entry(facet_vertices(tuple, facet)).or_default();
            if owners.len() >= 2 {
                return Err(OperatorRejection::CavityMismatch);
            }
            owners.push((index, facet));
        }
    }

    let mut matched = 0;
    let mut matched_keys: FastHashSet<&FacetVertices> = FastHashSet::default();
    for facet in &outer {
        match facets.get(&facet.key).map(|owners| owners.as_slice()) {
            Some([(index, local)]) => {
                matched += 1;
                matched_keys.insert(&facet.key);
                let points = &created_points[*index];
                let local = *local;
                let separated = match facet.outside {
                    Some((n, j)) => {
                        let apex = mesh
                            .element(n)
                            .and_then(|e| e.vertices().get(j).copied())
                            .and_then(|v| mesh.position(v))
                            .ok_or(OperatorRejection::CavityMismatch)?;
                        side_of(points, local, apex, Orientation::NEGATIVE)
                    }
                    None => mesh
                        .position(facet.apex)
                        .is_some_and(|apex| side_of(points, local, apex, Orientation::POSITIVE)),
                };
                if !separated {
                    return Err(OperatorRejection::Inverted);
                }
            }
            None if facet.outside.is_none() && policy.replace_boundary => {}
            None if facet.outside.is_none() => return Err(OperatorRejection::TouchesBoundary),
            _ => return Err(OperatorRejection::CavityMismatch),
        }
    }

    let mut singles = 0;
    for (key, owners) in &facets {
        match owners.as_slice() {
            [(a, fa), (b, fb)] => {
                let (pa, pb) = (&created_points[*a], &created_points[*b]);
                if !side_of(pa, *fa, pb[*fb], Orientation::NEGATIVE) {
                    return Err(OperatorRejection::Inverted);
                }
            }
            _ => {
                singles += 1;
                // A new boundary facet must not already belong to the rest
                // of the mesh.
                if policy.replace_boundary
                    && !matched_keys.contains(key)
                    && owned_outside(mesh, key, &cavity)
                {
                    return Err(OperatorRejection::CavityMismatch);
                }
            }
        }
    }
    if singles != matched && !policy.replace_boundary {
        return Err(OperatorRejection::CavityMismatch);
    }
    if (created_volume - removed_volume).abs() > VOLUME_TOLERANCE * removed_volume.abs().max(f64::MIN_POSITIVE) {
        return Err(OperatorRejection::CavityMismatch);
    }

    // Predicted quality. The overrides borrow `new_vertex`, which moves into
    // the plan below.
    let predicted = {
        let new_corner = new_vertex.as_ref().map(|v| Corner {
            point: *v.point(),
            size: v.size,
            metric: v.metric.as_ref(),
        });
        let overrides: SmallBuffer<(VertexKey, Corner<'_, D>), 1> =
            new_corner.into_iter().map(|c| (placeholder, c)).collect();
        created
            .iter()
            .map(|tuple| mesh.evaluate(tuple, &overrides))
            .fold(f64::INFINITY, f64::min)
    };
    if predicted <= DEGENERATE_QUALITY {
        return Err(OperatorRejection::Inverted);
    }

    Ok(CavityPlan {
        removed: removed.iter().copied().collect(),
        created,
        new_vertex,
        removed_vertex,
        before,
        predicted,
        outer,
    })
}

/// Performs a plan through journaled primitives and returns the keys of the
/// new elements.
///
/// # Errors
///
/// Returns [`OperatorError`] if the plan no longer matches the mesh.
pub fn apply_retriangulation<const D: usize>(
    mesh: &mut Mesh<D>,
    plan: &CavityPlan<D>,
) -> Result<ElementBuffer, OperatorError> {
    if let Some(dead) = plan.removed.iter().find(|k| mesh.element(**k).is_none()) {
        return Err(OperatorError::StalePlan {
            message: format!("cavity element {dead:?} is gone"),
        });
    }
    let placeholder = new_vertex_placeholder();
    let new_key = plan.new_vertex.clone().map(|v| mesh.create_vertex(v));
    let resolve = |tuple: &VertexKeyBuffer| -> VertexKeyBuffer {
        tuple
            .iter()
            .map(|v| if *v == placeholder { new_key.unwrap_or(*v) } else { *v })
            .collect()
    };

    // Reuse removed slots first.
    let mut keys = ElementBuffer::with_capacity(plan.created.len());
    for (i, tuple) in plan.created.iter().enumerate() {
        let vertices = resolve(tuple);
        let key = if let Some(&slot) = plan.removed.get(i) {
            mesh.reassign_vertices(slot, vertices);
            slot
        } else {
            let element = Element::new::<D>(&vertices).map_err(|e| OperatorError::StalePlan {
                message: e.to_string(),
            })?;
            mesh.create_element(element)
        };
        keys.push(key);
    }
    for &slot in plan.removed.iter().skip(plan.created.len()) {
        mesh.delete_element(slot)?;
    }

    // Wire new facets among themselves and to the outside.
    let mut facets: FacetToElementsMap = fast_hash_map_with_capacity(keys.len() * (D + 1));
    for &key in &keys {
        let Some(element) = mesh.element(key) else {
            continue;
        };
        for facet in 0..=D {
            facets
                .entry(element.facet_key(facet))
                .or_default()
                .push((key, FacetIndex::try_from(facet).unwrap_or(FacetIndex::MAX)));
        }
    }
    for owners in facets.values() {
        match owners.as_slice() {
            [(a, fa), (b, fb)] => {
                mesh.relink(*a, usize::from(*fa), Some(*b));
                mesh.relink(*b, usize::from(*fb), Some(*a));
            }
            [(a, fa)] => mesh.relink(*a, usize::from(*fa), None),
            _ => {
                return Err(OperatorError::StalePlan {
                    message: "facet shared by more than two new elements".to_owned(),
                });
            }
        }
    }
    for facet in &plan.outer {
        let Some([(key, local)]) = facets.get(&facet.key).map(|owners| owners.as_slice()) else {
            continue;
        };
        let outside = facet.outside.map(|(n, _)| n);
        mesh.relink(*key, usize::from(*local), outside);
        if let Some((n, j)) = facet.outside {
            mesh.relink(n, j, Some(*key));
        }
    }

    // Anchors.
    for &key in &keys {
        let vertices: VertexKeyBuffer = mesh
            .element(key)
            .map(|e| e.vertices().iter().copied().collect())
            .unwrap_or_default();
        for v in vertices {
            let anchored = mesh
                .vertex(v)
                .and_then(|vertex| vertex.anchor())
                .and_then(|a| mesh.element(a))
                .is_some_and(|e| e.contains_vertex(v));
            if !anchored {
                mesh.set_anchor(v, Some(key));
            }
        }
    }
    if let Some(v) = plan.removed_vertex {
        mesh.delete_vertex(v)?;
    }

    tracing::trace!(
        removed = plan.removed.len(),
        created = keys.len(),
        "applied re-triangulation"
    );
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::data::MeshData;
    use crate::core::mesh::BuildOptions;
    use crate::geometry::metric::MetricTensor;
    use crate::vertex;

    fn square() -> (Mesh<2>, Vec<VertexKey>, Vec<ElementKey>) {
        let data = MeshData::from_positions(
            &[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]],
            vec![vec![0, 1, 2], vec![0, 2, 3]],
        );
        let mesh = Mesh::from_data(&data, BuildOptions::default()).unwrap();
        let v = mesh.vertices().map(|(k, _)| k).collect();
        let e = mesh.element_keys().collect();
        (mesh, v, e)
    }

    fn tuple(keys: &[VertexKey]) -> VertexKeyBuffer {
        keys.iter().copied().collect()
    }

    #[test]
    fn diagonal_swap_applies_and_rolls_back() {
        let (mut mesh, v, e) = square();
        let before = mesh.to_data();
        let plan = plan_retriangulation(
            &mesh,
            &e,
            vec![tuple(&[v[1], v[3], v[0]]), tuple(&[v[3], v[1], v[2]])],
            None,
            None,
            CavityPolicy::default(),
        )
        .unwrap();
        assert_eq!(plan.touched(), 4);

        mesh.begin_edit().unwrap();
        let keys = apply_retriangulation(&mut mesh, &plan).unwrap();
        assert_eq!(keys.as_slice(), e.as_slice());
        assert!(mesh.validation_report().violations.iter().all(|x| x.kind
            == crate::core::validation::InvariantKind::JournalOpen));
        mesh.rollback_edit().unwrap();
        assert_eq!(mesh.to_data(), before);
        assert!(mesh.validate().is_ok());
    }

    #[test]
    fn center_insertion_creates_fan() {
        let (mut mesh, v, e) = square();
        let p = new_vertex_placeholder();
        let plan = plan_retriangulation(
            &mesh,
            &e,
            vec![
                tuple(&[v[0], v[1], p]),
                tuple(&[v[1], v[2], p]),
                tuple(&[v[2], v[3], p]),
                tuple(&[v[3], v[0], p]),
            ],
            Some(vertex!([0.5, 0.5])),
            None,
            CavityPolicy::default(),
        )
        .unwrap();
        mesh.begin_edit().unwrap();
        apply_retriangulation(&mut mesh, &plan).unwrap();
        mesh.commit_edit().unwrap();
        assert_eq!(mesh.number_of_elements(), 4);
        assert_eq!(mesh.number_of_vertices(), 5);
        assert!(mesh.validate().is_ok());
        assert!(plan.predicted > 0.0);
    }

    #[test]
    fn planned_vertex_carries_size_and_metric_into_the_mesh() {
        let (mut mesh, v, e) = square();
        let p = new_vertex_placeholder();
        let metric = MetricTensor::isotropic(0.5);
        let created = crate::core::vertex::VertexBuilder::default()
            .point(Point::new([0.5, 0.5]))
            .size(0.5)
            .metric(metric.clone())
            .build()
            .unwrap();
        let plan = plan_retriangulation(
            &mesh,
            &e,
            vec![
                tuple(&[v[0], v[1], p]),
                tuple(&[v[1], v[2], p]),
                tuple(&[v[2], v[3], p]),
                tuple(&[v[3], v[0], p]),
            ],
            Some(created),
            None,
            CavityPolicy::default(),
        )
        .unwrap();
        let planned = plan.new_vertex.as_ref().unwrap();
        assert_eq!(planned.size, Some(0.5));
        assert_eq!(planned.metric.as_ref(), Some(&metric));
        assert!(plan.predicted > 0.0);

        mesh.begin_edit().unwrap();
        apply_retriangulation(&mut mesh, &plan).unwrap();
        mesh.commit_edit().unwrap();
        let inserted = mesh
            .vertices()
            .map(|(_, vertex)| vertex)
            .find(|vertex| vertex.point().coords() == &[0.5, 0.5])
            .unwrap();
        assert_eq!(inserted.size, Some(0.5));
        assert_eq!(inserted.metric.as_ref(), Some(&metric));
    }

    #[test]
    fn rejects_open_overlapping_and_inverted_fills() {
        let (mesh, v, e) = square();
        let open = plan_retriangulation(
            &mesh,
            &e,
            vec![tuple(&[v[0], v[1], v[2]])],
            None,
            None,
            CavityPolicy::default(),
        );
        assert_eq!(open.err(), Some(OperatorRejection::CavityMismatch));

        let inverted = plan_retriangulation(
            &mesh,
            &e,
            vec![tuple(&[v[0], v[2], v[1]]), tuple(&[v[0], v[2], v[3]])],
            None,
            None,
            CavityPolicy::default(),
        );
        assert_eq!(inverted.err(), Some(OperatorRejection::Inverted));

        let p = new_vertex_placeholder();
        let outside = plan_retriangulation(
            &mesh,
            &e,
            vec![
                tuple(&[v[0], v[1], p]),
                tuple(&[v[1], v[2], p]),
                tuple(&[v[2], v[3], p]),
                tuple(&[v[3], v[0], p]),
            ],
            Some(vertex!([2.0, 0.5])),
            None,
            CavityPolicy { auto_orient: true, replace_boundary: false },
        );
        assert!(outside.is_err());
    }
}
