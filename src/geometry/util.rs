//! Geometric utility functions for simplices.
//!
//! Circumspheres, volumes and facet measures shared by the quality measures,
//! the insertion operator and the validators, plus structured mesh generators
//! used by tests and benchmarks.

use thiserror::Error;

use crate::geometry::matrix::MatrixError;

pub mod circumsphere;
pub mod conversions;
pub mod measures;
pub mod mesh_generation;

pub use circumsphere::*;
pub use measures::*;

/// Errors raised by circumsphere computations.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CircumcenterError {
    /// Wrong number of points for a `D`-simplex.
    #[error("Invalid simplex: expected {expected} points, got {actual} (D={dimension})")]
    InvalidSimplex {
        /// Number of points supplied.
        actual: usize,
        /// `D + 1`.
        expected: usize,
        /// Ambient dimension.
        dimension: usize,
    },
    /// The bisector system is singular (flat simplex).
    #[error("Circumcenter system could not be solved: {0}")]
    Matrix(#[from] MatrixError),
}
