//! Structured mesh generation for tests and benchmarks.
//!
//! Box meshes are built by Freudenthal (Kuhn) subdivision: the box is split
//! into `cells^D` cubes and every cube into `D!` simplices along its main
//! diagonal, which yields a conforming mesh. Interior vertices can then be
//! jittered with a seeded RNG to produce reproducible poor-quality input.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use crate::core::data::MeshData;
use crate::geometry::point::Point;
use crate::geometry::predicates::{Orientation, simplex_orientation};
use crate::geometry::util::conversions::count_to_f64;

/// Rounds of jitter damping before interior vertices are reset to the grid.
const MAX_JITTER_ROUNDS: usize = 8;

/// Errors from mesh generation.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum MeshGenerationError {
    /// Only 2D and 3D boxes are generated.
    #[error("Unsupported dimension {dimension}")]
    UnsupportedDimension {
        /// The requested dimension.
        dimension: usize,
    },
    /// At least one cell per axis is required.
    #[error("Invalid resolution: {cells} cells per axis")]
    InvalidResolution {
        /// The requested cells per axis.
        cells: usize,
    },
    /// Extent must be positive and finite.
    #[error("Invalid extent {extent}")]
    InvalidExtent {
        /// The requested extent.
        extent: f64,
    },
    /// Jitter is a fraction of the grid spacing in `[0, 0.5)`.
    #[error("Invalid jitter {jitter}: expected a fraction in [0, 0.5)")]
    InvalidJitter {
        /// The requested jitter.
        jitter: f64,
    },
}

fn permutations(n: usize) -> Vec<Vec<usize>> {
    if n == 0 {
        return vec![Vec::new()];
    }
    let mut out = Vec::new();
    for rest in permutations(n - 1) {
        for slot in 0..=rest.len() {
            let mut p = rest.clone();
            p.insert(slot, n - 1);
            out.push(p);
        }
    }
    out
}

/// Freudenthal subdivision of `[0, extent]^D` with `cells` cubes per axis.
///
/// Every element is positively oriented.
///
/// # Errors
///
/// Returns [`MeshGenerationError`] for dimensions other than 2 and 3, zero
/// cells, or a non-positive extent.
///
/// # Examples
///
/// ```
/// use meliorate::geometry::util::mesh_generation::box_mesh;
///
/// let square = box_mesh::<2>(2, 1.0).unwrap();
/// assert_eq!(square.vertices.len(), 9);
/// assert_eq!(square.elements.len(), 8);
///
/// let cube = box_mesh::<3>(1, 1.0).unwrap();
/// assert_eq!(cube.elements.len(), 6);
/// ```
pub fn box_mesh<const D: usize>(cells: usize, extent: f64) -> Result<MeshData<D>, MeshGenerationError> {
    if !(2..=3).contains(&D) {
        return Err(MeshGenerationError::UnsupportedDimension { dimension: D });
    }
    if cells == 0 {
        return Err(MeshGenerationError::InvalidResolution { cells });
    }
    if !(extent.is_finite() && extent > 0.0) {
        return Err(MeshGenerationError::InvalidExtent { extent });
    }

    let side = cells + 1;
    let spacing = extent / count_to_f64(cells);
    let index = |multi: &[usize; D]| -> usize {
        multi.iter().rev().fold(0, |acc, &i| acc * side + i)
    };

    let vertex_count: usize = std::iter::repeat_n(side, D).product();
    let cube_count: usize = std::iter::repeat_n(cells, D).product();
    let mut positions: Vec<[f64; D]> = Vec::with_capacity(vertex_count);
    for linear in 0..vertex_count {
        let mut coords = [0.0; D];
        let mut rest = linear;
        for c in &mut coords {
            let i = rest % side;
            *c = if i == cells { extent } else { count_to_f64(i) * spacing };
            rest /= side;
        }
        positions.push(coords);
    }

    let orders = permutations(D);
    let mut elements = Vec::with_capacity(cube_count * orders.len());
    for cube in 0..cube_count {
        let mut corner = [0usize; D];
        let mut rest = cube;
        for c in &mut corner {
            *c = rest % cells;
            rest /= cells;
        }
        for order in &orders {
            let mut walk = corner;
            let mut tuple = Vec::with_capacity(D + 1);
            tuple.push(index(&walk));
            for &axis in order {
                walk[axis] += 1;
                tuple.push(index(&walk));
            }
            let points: Vec<Point<D>> = tuple.iter().map(|&i| Point::new(positions[i])).collect();
            if simplex_orientation(&points) == Orientation::NEGATIVE {
                tuple.swap(0, 1);
            }
            elements.push(tuple);
        }
    }

    Ok(MeshData::from_positions(&positions, elements))
}

/// [`box_mesh`] with every interior vertex displaced by up to
/// `jitter * spacing` per axis, reproducibly for a given `seed`.
///
/// Boundary vertices are never moved. Displacements that would invert an
/// element are damped until the mesh is valid again.
///
/// # Errors
///
/// As [`box_mesh`], plus [`MeshGenerationError::InvalidJitter`] unless
/// `0 <= jitter < 0.5`.
pub fn jittered_box_mesh<const D: usize>(
    cells: usize,
    extent: f64,
    jitter: f64,
    seed: u64,
) -> Result<MeshData<D>, MeshGenerationError> {
    if !(0.0..0.5).contains(&jitter) {
        return Err(MeshGenerationError::InvalidJitter { jitter });
    }
    let mut data = box_mesh::<D>(cells, extent)?;
    let spacing = extent / count_to_f64(cells);
    let grid: Vec<Point<D>> = data.vertices.iter().map(|v| v.position).collect();
    let interior = |p: &Point<D>| {
        p.coords()
            .iter()
            .all(|&c| c > spacing * 0.5 && c < extent - spacing * 0.5)
    };

    let mut rng = StdRng::seed_from_u64(seed);
    let offsets: Vec<[f64; D]> = grid
        .iter()
        .map(|p| {
            let offset = [0.0; D].map(|_| rng.random_range(-1.0..1.0) * jitter * spacing);
            if interior(p) { offset } else { [0.0; D] }
        })
        .collect();

    let mut scale = 1.0;
    for _ in 0..=MAX_JITTER_ROUNDS {
        for ((record, base), offset) in data.vertices.iter_mut().zip(&grid).zip(&offsets) {
            record.position = *base + Point::new(*offset) * scale;
        }
        if data
            .element_points()
            .all(|points| simplex_orientation(&points) == Orientation::POSITIVE)
        {
            return Ok(data);
        }
        scale *= 0.5;
    }
    for (record, base) in data.vertices.iter_mut().zip(&grid) {
        record.position = *base;
    }
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mesh::{BuildOptions, Mesh};

    #[test]
    fn box_meshes_are_valid() {
        for cells in 1..=3 {
            let square = box_mesh::<2>(cells, 2.0).unwrap();
            let mesh = Mesh::from_data(&square, BuildOptions::default()).unwrap();
            assert!(mesh.validate().is_ok());
            assert_eq!(mesh.boundary_facets().len(), 4 * cells);

            let cube = box_mesh::<3>(cells, 1.0).unwrap();
            let mesh = Mesh::from_data(&cube, BuildOptions::default()).unwrap();
            assert!(mesh.validate().is_ok());
            assert_eq!(mesh.boundary_facets().len(), 12 * cells * cells);
        }
    }

    #[test]
    fn jitter_is_reproducible_and_keeps_boundary() {
        let a = jittered_box_mesh::<3>(3, 1.0, 0.3, 7).unwrap();
        let b = jittered_box_mesh::<3>(3, 1.0, 0.3, 7).unwrap();
        assert_eq!(a, b);
        let grid = box_mesh::<3>(3, 1.0).unwrap();
        assert_ne!(a, grid);
        for (moved, base) in a.vertices.iter().zip(&grid.vertices) {
            let on_boundary = base.position.coords().iter().any(|&c| c == 0.0 || c == 1.0);
            if on_boundary {
                assert_eq!(moved.position, base.position);
            }
        }
        assert!(Mesh::from_data(&a, BuildOptions::default()).unwrap().validate().is_ok());
    }

    #[test]
    fn rejects_bad_parameters() {
        assert_eq!(
            box_mesh::<2>(0, 1.0),
            Err(MeshGenerationError::InvalidResolution { cells: 0 })
        );
        assert!(matches!(
            box_mesh::<4>(1, 1.0),
            Err(MeshGenerationError::UnsupportedDimension { dimension: 4 })
        ));
        assert!(matches!(
            jittered_box_mesh::<2>(2, 1.0, 0.5, 1),
            Err(MeshGenerationError::InvalidJitter { .. })
        ));
    }
}
