//! Vertex relocation (smoothing).
//!
//! Each corner of a target element is tried at three candidate positions:
//! the Laplacian average of its neighbors, the volume-weighted centroid of
//! its star, and the end point of a short finite-difference ascent on the
//! minimum quality of its star. A candidate is kept only if every element of
//! the star stays exactly positively oriented.
//!
//! Fixed vertices never move. Boundary vertices move only when boundary edits
//! are permitted and the boundary around them is flat, and then only within
//! the boundary line or plane.

use crate::core::algorithms::operators::{
    Candidates, Edit, OperatorKind, OperatorRejection, OperatorSettings, Proposal,
};
use crate::core::collections::{ElementBuffer, VertexKeyBuffer};
use crate::core::mesh::{ElementKey, Mesh, VertexKey};
use crate::core::vertex::VertexKind;
use crate::geometry::point::Point;
use crate::geometry::predicates::{Orientation, simplex_orientation};
use crate::geometry::quality::{Corner, DEGENERATE_QUALITY};
use crate::geometry::util::conversions::count_to_f64;
use crate::geometry::util::signed_volume;

/// Initial ascent step as a fraction of the mean incident edge length.
const ASCENT_STEP: f64 = 0.25;

/// Finite-difference spacing as a fraction of the mean incident edge length.
const GRADIENT_SPACING: f64 = 1e-4;

/// Smallest ascent step tried, as a fraction of the mean incident edge length.
const MIN_STEP: f64 = 1e-6;

/// Smallest gain in minimum star quality a relocation must bring.
const MIN_SMOOTHING_GAIN: f64 = 1e-3;

/// Subspace a vertex may move in.
#[derive(Clone, Copy, Debug)]
enum Constraint<const D: usize> {
    Free,
    /// Along a boundary line through `origin` (2D).
    Line { origin: Point<D>, direction: Point<D> },
    /// Within a boundary plane through `origin` (3D).
    Plane { origin: Point<D>, normal: Point<D> },
}

impl<const D: usize> Constraint<D> {
    fn project(&self, p: Point<D>) -> Point<D> {
        match *self {
            Self::Free => p,
            Self::Line { origin, direction } => origin + direction * (p - origin).dot(&direction),
            Self::Plane { origin, normal } => p - normal * (p - origin).dot(&normal),
        }
    }
}

/// The star of one vertex and the data needed to score moves of it.
struct Relocation<'a, const D: usize> {
    mesh: &'a Mesh<D>,
    vertex: VertexKey,
    star: ElementBuffer,
    constraint: Constraint<D>,
    boundary: Vec<(ElementKey, usize)>,
    /// Mean length of the edges at `vertex`.
    scale: f64,
}

impl<'a, const D: usize> Relocation<'a, D> {
    fn new(
        mesh: &'a Mesh<D>,
        vertex: VertexKey,
        settings: &OperatorSettings,
    ) -> Result<Self, OperatorRejection> {
        let record = mesh.vertex(vertex).ok_or(OperatorRejection::NotApplicable)?;
        let origin = *record.point();
        let boundary = mesh.vertex_boundary_facets(vertex);
        let constraint = match record.kind {
            VertexKind::Fixed => return Err(OperatorRejection::FixedVertex),
            _ if boundary.is_empty() => Constraint::Free,
            _ if settings.preserve_boundary => return Err(OperatorRejection::TouchesBoundary),
            _ if !mesh.boundary_is_flat_at(vertex) => {
                return Err(OperatorRejection::TouchesBoundary);
            }
            _ => boundary_constraint(mesh, vertex, origin, &boundary)?,
        };

        let star = mesh.vertex_star(vertex).ok_or(OperatorRejection::NotApplicable)?;
        let neighbors = mesh.vertex_neighbors(vertex);
        let total: f64 = neighbors
            .iter()
            .filter_map(|w| mesh.position(*w))
            .map(|p| p.distance(&origin))
            .sum();
        if neighbors.is_empty() || total <= 0.0 {
            return Err(OperatorRejection::NotApplicable);
        }
        Ok(Self {
            mesh,
            vertex,
            star,
            constraint,
            boundary,
            scale: total / count_to_f64(neighbors.len()),
        })
    }

    fn origin(&self) -> Option<Point<D>> {
        self.mesh.position(self.vertex)
    }

    /// Minimum star quality now.
    fn before(&self) -> f64 {
        self.star
            .iter()
            .map(|k| self.mesh.peek_quality(*k).unwrap_or(DEGENERATE_QUALITY))
            .fold(f64::INFINITY, f64::min)
    }

    /// Minimum star quality with the vertex at `p`; degenerate if any element
    /// would not be exactly positive.
    fn score(&self, p: Point<D>) -> f64 {
        let Some(record) = self.mesh.vertex(self.vertex) else {
            return DEGENERATE_QUALITY;
        };
        let corner = Corner {
            point: p,
            size: record.size,
            metric: record.metric.as_ref(),
        };
        let overrides = [(self.vertex, corner)];
        let mut worst = f64::INFINITY;
        for &key in &self.star {
            let Some(element) = self.mesh.element(key) else {
                return DEGENERATE_QUALITY;
            };
            let Some(mut points) = self.mesh.points_of(element.vertices()) else {
                return DEGENERATE_QUALITY;
            };
            if let Some(slot) = element.vertex_index(self.vertex) {
                points[slot] = p;
            }
            if simplex_orientation(&points) != Orientation::POSITIVE {
                return DEGENERATE_QUALITY;
            }
            worst = worst.min(self.mesh.evaluate(element.vertices(), &overrides));
        }
        worst
    }

    /// `p` stays on the boundary hyperplane of every boundary facet.
    fn keeps_boundary(&self, p: Point<D>) -> bool {
        let Some(origin) = self.origin() else {
            return false;
        };
        self.boundary.iter().all(|&(element, facet)| {
            let keys = self.mesh.facet_vertex_keys(element, facet);
            let Some(mut probe) = self.mesh.points_of(&keys) else {
                return false;
            };
            for (slot, key) in keys.iter().enumerate() {
                if *key == self.vertex {
                    probe[slot] = p;
                }
            }
            probe.push(origin);
            simplex_orientation(&probe) == Orientation::DEGENERATE
        })
    }

    /// Average of the neighbor positions.
    fn laplacian(&self) -> Option<Point<D>> {
        let points: Vec<Point<D>> = self
            .mesh
            .vertex_neighbors(self.vertex)
            .into_iter()
            .filter_map(|w| self.mesh.position(w))
            .collect();
        Point::centroid(points.iter())
    }

    /// Centroid of the star weighted by element volume.
    fn weighted_centroid(&self) -> Option<Point<D>> {
        let mut sum = Point::origin();
        let mut total = 0.0;
        for &key in &self.star {
            let points = self.mesh.element_points(key)?;
            let volume = signed_volume(&points);
            sum = sum + Point::centroid(points.iter())? * volume;
            total += volume;
        }
        (total > 0.0).then(|| sum * (1.0 / total))
    }

    /// Coordinate-wise central differences of [`Self::score`].
    fn gradient(&self, p: Point<D>) -> Point<D> {
        let h = GRADIENT_SPACING * self.scale;
        let mut g = [0.0; D];
        for (axis, slot) in g.iter_mut().enumerate() {
            let mut offset = [0.0; D];
            offset[axis] = h;
            let step = Point::new(offset);
            *slot = (self.score(p + step) - self.score(p - step)) / (2.0 * h);
        }
        Point::new(g)
    }

    /// Steepest ascent with step halving, at most `iterations` accepted steps.
    fn ascend(&self, iterations: usize) -> Option<Point<D>> {
        let mut x = self.origin()?;
        let mut q = self.score(x);
        let mut moved = false;
        for _ in 0..iterations {
            let direction = self.constraint.project(x + self.gradient(x)) - x;
            let norm = direction.norm();
            if !(norm.is_finite() && norm > 0.0) {
                break;
            }
            let direction = direction * (1.0 / norm);
            let mut step = ASCENT_STEP * self.scale;
            let mut accepted = false;
            while step > MIN_STEP * self.scale {
                let y = self.constraint.project(x + direction * step);
                let qy = self.score(y);
                if qy > q {
                    x = y;
                    q = qy;
                    accepted = true;
                    break;
                }
                step *= 0.5;
            }
            if !accepted {
                break;
            }
            moved = true;
        }
        moved.then_some(x)
    }

    fn proposal(&self, to: Point<D>, before: f64) -> Result<Proposal<D>, OperatorRejection> {
        let to = self.constraint.project(to);
        if !to.is_finite() {
            return Err(OperatorRejection::NotApplicable);
        }
        if !matches!(self.constraint, Constraint::Free) && !self.keeps_boundary(to) {
            return Err(OperatorRejection::TouchesBoundary);
        }
        let predicted = self.score(to);
        if predicted <= DEGENERATE_QUALITY {
            return Err(OperatorRejection::Inverted);
        }
        Ok(Proposal {
            kind: OperatorKind::Smoothing,
            edit: Edit::Relocate {
                vertex: self.vertex,
                to,
            },
            before,
            predicted,
            touched: self.star.len(),
        })
    }
}

/// Line or plane of a flat boundary through `origin`.
fn boundary_constraint<const D: usize>(
    mesh: &Mesh<D>,
    vertex: VertexKey,
    origin: Point<D>,
    boundary: &[(ElementKey, usize)],
) -> Result<Constraint<D>, OperatorRejection> {
    let &(element, facet) = boundary.first().ok_or(OperatorRejection::TouchesBoundary)?;
    let others: Vec<Point<D>> = mesh
        .facet_vertex_keys(element, facet)
        .into_iter()
        .filter(|w| *w != vertex)
        .filter_map(|w| mesh.position(w))
        .collect();
    match (D, others.as_slice()) {
        (2, [w]) => {
            let direction = *w - origin;
            let norm = direction.norm();
            if norm <= 0.0 {
                return Err(OperatorRejection::TouchesBoundary);
            }
            Ok(Constraint::Line {
                origin,
                direction: direction * (1.0 / norm),
            })
        }
        (3, [a, b]) => {
            let (u, v) = (*a - origin, *b - origin);
            let mut normal = [0.0; D];
            for (i, slot) in normal.iter_mut().enumerate() {
                let (j, k) = ((i + 1) % 3, (i + 2) % 3);
                *slot = u[j] * v[k] - u[k] * v[j];
            }
            let normal = Point::new(normal);
            let norm = normal.norm();
            if norm <= 0.0 {
                return Err(OperatorRejection::TouchesBoundary);
            }
            Ok(Constraint::Plane {
                origin,
                normal: normal * (1.0 / norm),
            })
        }
        _ => Err(OperatorRejection::TouchesBoundary),
    }
}

/// Best relocation of one corner of `element`.
///
/// # Errors
///
/// Returns the last [`OperatorRejection`] when no move improves the minimum
/// quality of the moved vertex's star.
pub fn propose_smoothing<const D: usize>(
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
    let settings = &OperatorSettings {
        min_improvement: settings.min_improvement.max(MIN_SMOOTHING_GAIN),
        ..*settings
    };
    let mut candidates = Candidates::new(settings);
    for vertex in corners {
        let relocation = match Relocation::new(mesh, vertex, settings) {
            Ok(relocation) => relocation,
            Err(rejection) => {
                candidates.reject(rejection);
                continue;
            }
        };
        let before = relocation.before();
        let targets = [
            relocation.laplacian(),
            relocation.weighted_centroid(),
            relocation.ascend(settings.smoothing_iterations),
        ];
        for target in targets.into_iter().flatten() {
            match relocation.proposal(target, before) {
                Ok(proposal) => candidates.offer(proposal),
                Err(rejection) => candidates.reject(rejection),
            }
        }
    }
    candidates.finish()
}

/// Scores moving `vertex` to `to`.
///
/// # Errors
///
/// Returns [`OperatorRejection::FixedVertex`] for fixed vertices,
/// [`OperatorRejection::TouchesBoundary`] for boundary vertices that may not
/// move there, and [`OperatorRejection::Inverted`] if an element of the star
/// would fold.
pub fn plan_relocation<const D: usize>(
    mesh: &Mesh<D>,
    vertex: VertexKey,
    to: Point<D>,
    settings: &OperatorSettings,
) -> Result<Proposal<D>, OperatorRejection> {
    let relocation = Relocation::new(mesh, vertex, settings)?;
    let before = relocation.before();
    relocation.proposal(to, before)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::algorithms::operators::apply;
    use crate::core::data::MeshData;
    use crate::core::mesh::BuildOptions;
    use approx::assert_relative_eq;
    use std::f64::consts::TAU;

    /// Six equilateral triangles around an interior vertex at `center`.
    fn hexagon(center: [f64; 2]) -> (Mesh<2>, VertexKey) {
        let mut positions = vec![center];
        positions.extend((0..6_u32).map(|i| {
            let angle = TAU * f64::from(i) / 6.0;
            [angle.cos(), angle.sin()]
        }));
        let elements = (0..6).map(|i| vec![0, 1 + i, 1 + (i + 1) % 6]).collect();
        let mesh = Mesh::from_data(&MeshData::from_positions(&positions, elements), BuildOptions::default())
            .unwrap();
        let center = mesh.vertices().map(|(k, _)| k).next().unwrap();
        (mesh, center)
    }

    #[test]
    fn ideal_star_has_nothing_to_improve() {
        let (mesh, center) = hexagon([0.0, 0.0]);
        let settings = OperatorSettings::default();
        for element in mesh.element_keys() {
            assert!(propose_smoothing(&mesh, element, &settings).is_err());
        }
        assert_eq!(
            plan_relocation(&mesh, center, Point::new([1.5, 0.0]), &settings).err(),
            Some(OperatorRejection::Inverted)
        );
    }

    #[test]
    fn perturbed_center_moves_back() {
        let (mut mesh, center) = hexagon([0.3, 0.1]);
        let before = mesh.min_quality().unwrap();
        let element = mesh.element_keys().next().unwrap();

        let proposal = propose_smoothing(&mesh, element, &OperatorSettings::default()).unwrap();
        let Edit::Relocate { vertex, to } = proposal.edit else {
            panic!("smoothing must relocate");
        };
        assert_eq!(vertex, center);
        assert!(to.norm() < 0.3);
        assert_eq!(proposal.touched, 6);

        mesh.begin_edit().unwrap();
        apply(&mut mesh, &proposal).unwrap();
        mesh.commit_edit().unwrap();
        assert!(mesh.validate().is_ok());
        let after = mesh.min_quality().unwrap();
        assert!(after > before);
        assert_relative_eq!(after, proposal.predicted, epsilon = 1e-12);
    }

    #[test]
    fn negligible_gains_are_not_proposed() {
        let (mesh, _) = hexagon([1e-5, 0.0]);
        let settings = OperatorSettings::default();
        assert!(settings.min_improvement < MIN_SMOOTHING_GAIN);
        for element in mesh.element_keys() {
            assert!(propose_smoothing(&mesh, element, &settings).is_err());
        }

        let (mesh, _) = hexagon([0.05, 0.0]);
        let element = mesh.element_keys().next().unwrap();
        let proposal = propose_smoothing(&mesh, element, &settings).unwrap();
        assert!(proposal.improves(MIN_SMOOTHING_GAIN));
    }

    #[test]
    fn constrained_vertices_stay_put() {
        let (mesh, center) = hexagon([0.3, 0.1]);
        let mut data = mesh.to_data();
        data.vertices[0].fixed = true;
        let pinned = Mesh::from_data(&data, BuildOptions::default()).unwrap();
        let center_key = pinned.vertices().map(|(k, _)| k).next().unwrap();
        assert_eq!(
            plan_relocation(&pinned, center_key, Point::new([0.0, 0.0]), &OperatorSettings::default())
                .err(),
            Some(OperatorRejection::FixedVertex)
        );

        let corner = mesh.vertices().map(|(k, _)| k).nth(1).unwrap();
        assert_ne!(corner, center);
        assert_eq!(
            plan_relocation(&mesh, corner, Point::new([0.9, 0.0]), &OperatorSettings::default()).err(),
            Some(OperatorRejection::TouchesBoundary)
        );
    }

    #[test]
    fn flat_boundary_vertex_slides_along_boundary() {
        // Bottom edge midpoint pushed sideways; sliding it back helps.
        let data = MeshData::from_positions(
            &[[0.0, 0.0], [0.8, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0]],
            vec![vec![0, 1, 4], vec![1, 2, 3], vec![1, 3, 4]],
        );
        let mesh = Mesh::from_data(&data, BuildOptions::default()).unwrap();
        let settings = OperatorSettings {
            preserve_boundary: false,
            ..OperatorSettings::default()
        };
        let mid = mesh.vertices().map(|(k, _)| k).nth(1).unwrap();
        let element = mesh.vertex_star(mid).unwrap()[0];

        let proposal = propose_smoothing(&mesh, element, &settings).unwrap();
        let Edit::Relocate { vertex, to } = proposal.edit else {
            panic!("smoothing must relocate");
        };
        assert_eq!(vertex, mid);
        assert_eq!(to.coords()[1], 0.0);
        assert!(to.coords()[0] < 0.8);
        assert!(proposal.improves(settings.min_improvement));

        assert_eq!(
            plan_relocation(&mesh, mid, Point::new([0.5, 0.1]), &settings)
                .map(|p| p.edit)
                .map(|e| matches!(e, Edit::Relocate { to, .. } if to.coords()[1] == 0.0))
                .ok(),
            Some(true)
        );
    }
}
