//! # meliorate
//!
//! Quality improvement of triangular (2D) and tetrahedral (3D) meshes by
//! repeated local edits.
//!
//! Starting from a valid conforming mesh, the improvement driver takes the
//! worst element below a quality threshold and tries a fixed sequence of
//! local operators on it: vertex smoothing, local re-triangulation (flips),
//! vertex insertion and vertex removal. Every edit runs speculatively inside
//! a transaction journal. It is committed only if the exactly-oriented
//! quality of the touched region improves, and rolled back exactly otherwise.
//!
//! # Features
//!
//! - 2D triangle and 3D tetrahedral meshes over a const dimension `D`
//! - Exact orientation predicates (adaptive expansion arithmetic)
//! - Shape measures (minimum sine, volume/length ratio, radius ratio),
//!   optionally weighted by a target size field and anisotropy tensors
//! - Boundary preservation and fixed vertices
//! - Full topology validation with a report of every failed invariant
//! - Serialization with [serde](https://serde.rs) of the mesh exchange format,
//!   the options and the report
//!
//! # Basic Usage
//!
//! ```rust
//! use meliorate::prelude::*;
//!
//! // A unit square split into four triangles around a badly placed vertex.
//! let input = MeshData::<2>::from_positions(
//!     &[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.9, 0.15]],
//!     vec![vec![0, 1, 4], vec![1, 2, 4], vec![2, 3, 4], vec![3, 0, 4]],
//! );
//!
//! let (output, report) = improve(&input, 0.5, 100, &ImproveOptions::default()).unwrap();
//!
//! assert!(report.final_quality.min_quality > report.initial_quality.min_quality);
//! assert_eq!(output.vertices.len(), report.vertices_after);
//! ```
//!
//! # Speculative edits
//!
//! The journaled primitives of [`Mesh`](core::mesh::Mesh) are only reachable
//! through the operators, but the transaction itself is public:
//!
//! ```rust
//! use meliorate::prelude::*;
//!
//! let data = box_mesh::<3>(2, 1.0).unwrap();
//! let mut mesh = Mesh::from_data(&data, BuildOptions::default()).unwrap();
//! let element = mesh.element_keys().next().unwrap();
//!
//! let settings = OperatorSettings { preserve_boundary: false, ..OperatorSettings::default() };
//! if let Ok(proposal) = propose(&mesh, OperatorKind::Insertion, element, &settings) {
//!     mesh.begin_edit().unwrap();
//!     apply(&mut mesh, &proposal).unwrap();
//!     mesh.rollback_edit().unwrap();
//! }
//! assert_eq!(mesh.to_data(), Mesh::from_data(&data, BuildOptions::default()).unwrap().to_data());
//! assert!(mesh.validate().is_ok());
//! ```
//!
//! # Invariants
//!
//! At every committed state:
//!
//! - neighbor links are mutual and neighbors share exactly the facet's vertices,
//! - every element is exactly positively oriented,
//! - the minimum element quality is no lower than at the previous committed state,
//! - with `preserve_boundary`, the boundary facets and their vertex positions
//!   are those of the input.
//!
//! [`Mesh::validation_report`](core::mesh::Mesh::validation_report) checks the
//! structural ones; the driver runs it after every commit in debug builds and
//! with the `self-check` feature.

// Forbid unsafe code throughout the entire crate
#![forbid(unsafe_code)]

#[macro_use]
extern crate derive_builder;

/// The `core` module contains the mesh, its storage, the transaction journal
/// and the local edit operators.
pub mod core {
    /// Local edit operators and the shared cavity re-triangulation.
    pub mod algorithms {
        /// Cavity re-triangulation shared by flips, insertion and removal
        pub mod cavity;
        /// 2-2, 2-3 and 3-2 flips and edge removal
        pub mod flips;
        /// Vertex insertion with Bowyer-Watson style cavities
        pub mod insertion;
        /// Operator dispatch, proposals and rejections
        pub mod operators;
        /// Vertex removal by edge contraction
        pub mod removal;
        /// Vertex relocation
        pub mod smoothing;
    }
    /// Collection aliases optimized for small simplicial neighborhoods
    pub mod collections;
    pub mod data;
    pub mod element;
    pub mod journal;
    pub mod mesh;
    pub mod pool;
    /// Stars, rings and point location
    pub mod traversal;
    pub mod validation;
    pub mod vertex;
    // Re-export the `core` modules.
    pub use data::*;
    pub use element::*;
    pub use journal::*;
    pub use mesh::*;
    pub use traversal::*;
    pub use validation::*;
    pub use vertex::*;
    // Note: collections module not re-exported here to avoid namespace pollution
    // Import specific types via prelude or use crate::core::collections::
}

/// Contains geometric types including the `Point` struct, exact predicates and
/// element quality measures.
pub mod geometry {
    pub mod matrix;
    pub mod metric;
    pub mod point;
    pub mod predicates;
    /// Element shape measures, quality bands and the field-aware evaluator
    pub mod quality;
    /// Adaptive exact orientation predicates
    pub mod robust_predicates;
    /// Geometric utility functions for simplices and structured test meshes
    pub mod util;
    pub use matrix::*;
    pub use metric::*;
    pub use point::*;
    pub use predicates::*;
    pub use quality::*;
    pub use util::*;
}

/// The improvement driver: options, the scan loop and its report.
pub mod improve {
    pub mod driver;
    pub mod options;
    pub mod report;
    pub use driver::*;
    pub use options::*;
    pub use report::*;
}

/// A prelude module that re-exports commonly used types and macros.
/// This makes it easier to import the most commonly used items from the crate.
pub mod prelude {
    // Re-export from core
    pub use crate::core::{
        algorithms::operators::{
            OperatorError, OperatorKind, OperatorRejection, OperatorSettings, Proposal, apply,
            propose,
        },
        data::*,
        element::*,
        journal::{JournalError, JournalEntry},
        mesh::*,
        traversal::*,
        validation::*,
        vertex::*,
    };

    // Re-export commonly used collection types from core::collections
    pub use crate::core::collections::{
        ElementBuffer, FastHashMap, FastHashSet, SmallBuffer, VertexKeyBuffer,
        fast_hash_map_with_capacity, fast_hash_set_with_capacity,
    };

    // Re-export from geometry
    pub use crate::geometry::{
        metric::*, point::*, predicates::*, quality::*,
        util::mesh_generation::{MeshGenerationError, box_mesh, jittered_box_mesh},
        util::{circumcenter, signed_volume},
    };

    // Re-export the driver
    pub use crate::improve::*;

    // Convenience macros
    pub use crate::vertex;
}

/// The function `is_normal` checks that structs implement `auto` traits.
/// Traits are checked at compile time, so this function is only used for
/// testing.
#[must_use]
pub const fn is_normal<T: Sized + Send + Sync + Unpin>() -> bool {
    true
}

// =============================================================================
// TESTS
// =============================================================================
