//! Edit operator dispatch.
//!
//! Every operator is split into a pure *plan* step, which inspects the mesh
//! and returns the best [`Proposal`] it can find for a target element, and an
//! *apply* step, which performs the proposal through journaled primitives.
//! The driver brackets apply with [`Mesh::begin_edit`] and either
//! [`Mesh::commit_edit`] or [`Mesh::rollback_edit`].

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::algorithms::cavity::{CavityPlan, apply_retriangulation};
use crate::core::algorithms::{flips, insertion, removal, smoothing};
use crate::core::collections::ElementBuffer;
use crate::core::journal::JournalError;
use crate::core::mesh::{ElementKey, Mesh, VertexKey};
use crate::core::pool::PoolError;
use crate::geometry::point::Point;

/// The edit operators, in the order the driver tries them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperatorKind {
    /// Vertex relocation.
    Smoothing,
    /// Local re-triangulation of a small cluster.
    Flip,
    /// Vertex insertion with cavity re-triangulation.
    Insertion,
    /// Vertex removal by edge contraction.
    Removal,
}

impl OperatorKind {
    /// All operators in priority order.
    pub const ALL: [Self; 4] = [Self::Smoothing, Self::Flip, Self::Insertion, Self::Removal];
}

impl fmt::Display for OperatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Smoothing => write!(f, "smoothing"),
            Self::Flip => write!(f, "flip"),
            Self::Insertion => write!(f, "insertion"),
            Self::Removal => write!(f, "removal"),
        }
    }
}

/// Why an operator produced no acceptable proposal. Recovered locally by the
/// driver.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum OperatorRejection {
    /// Some resulting element would be flat or inverted.
    #[error("Edit would create a flat or inverted element")]
    Inverted,
    /// The best candidate does not beat the current quality.
    #[error("No candidate improves the minimum quality")]
    NoImprovement,
    /// The edit would change the mesh boundary.
    #[error("Edit would modify the mesh boundary")]
    TouchesBoundary,
    /// The edit would move or remove a fixed vertex.
    #[error("Edit would move or remove a fixed vertex")]
    FixedVertex,
    /// New elements do not close the cavity boundary.
    #[error("Re-triangulation does not match the cavity boundary")]
    CavityMismatch,
    /// The cavity grew past its size limit.
    #[error("Cavity exceeds {limit} elements")]
    CavityTooLarge {
        /// The configured limit.
        limit: usize,
    },
    /// A candidate point lies outside the mesh.
    #[error("Candidate point lies outside the mesh")]
    OutsideDomain,
    /// The operator has nothing to try for this element.
    #[error("Operator is not applicable here")]
    NotApplicable,
}

/// Failure while applying a proposal. These indicate a stale plan or a bug
/// and abort the run.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum OperatorError {
    /// Journal misuse.
    #[error(transparent)]
    Journal(#[from] JournalError),
    /// A slot was not in the expected state.
    #[error(transparent)]
    Pool(#[from] PoolError),
    /// The plan no longer matches the mesh.
    #[error("Stale plan: {message}")]
    StalePlan {
        /// What did not match.
        message: String,
    },
}

/// Knobs shared by all operators.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OperatorSettings {
    /// Never move, remove or re-triangulate boundary vertices and facets.
    pub preserve_boundary: bool,
    /// Required gain in minimum quality for a proposal to count.
    pub min_improvement: f64,
    /// Iteration cap of the smoothing ascent.
    pub smoothing_iterations: usize,
    /// Largest cavity an insertion may grow.
    pub max_cavity_size: usize,
}

impl Default for OperatorSettings {
    fn default() -> Self {
        Self {
            preserve_boundary: true,
            min_improvement: 1e-6,
            smoothing_iterations: 8,
            max_cavity_size: 48,
        }
    }
}

/// What a proposal changes.
#[derive(Clone, Debug)]
pub enum Edit<const D: usize> {
    /// Move one vertex.
    Relocate {
        /// The vertex.
        vertex: VertexKey,
        /// Its new position.
        to: Point<D>,
    },
    /// Replace a set of elements.
    Retriangulate(CavityPlan<D>),
}

/// The best edit an operator found for one target element.
#[derive(Clone, Debug)]
pub struct Proposal<const D: usize> {
    /// Which operator produced it.
    pub kind: OperatorKind,
    /// The edit.
    pub edit: Edit<D>,
    /// Minimum quality of the affected elements now.
    pub before: f64,
    /// Predicted minimum quality of the affected elements afterwards.
    pub predicted: f64,
    /// Number of elements removed plus created, or the star size for moves.
    pub touched: usize,
}

impl<const D: usize> Proposal<D> {
    /// Wraps a checked cavity plan.
    #[must_use]
    pub fn from_plan(kind: OperatorKind, plan: CavityPlan<D>) -> Self {
        Self {
            kind,
            before: plan.before,
            predicted: plan.predicted,
            touched: plan.touched(),
            edit: Edit::Retriangulate(plan),
        }
    }

    /// `true` if the predicted quality beats `before` by at least `margin`.
    #[must_use]
    pub fn improves(&self, margin: f64) -> bool {
        self.predicted > self.before + margin
    }

    /// Ranking among candidates of one operator: higher predicted quality
    /// first, then fewer touched elements.
    #[must_use]
    pub fn rank(&self, other: &Self) -> Ordering {
        other
            .predicted
            .total_cmp(&self.predicted)
            .then(self.touched.cmp(&other.touched))
    }
}

/// Collects candidate proposals of one operator and keeps the best one that
/// improves on its own `before` quality.
#[derive(Debug)]
pub(crate) struct Candidates<const D: usize> {
    best: Option<Proposal<D>>,
    rejection: Option<OperatorRejection>,
    margin: f64,
}

impl<const D: usize> Candidates<D> {
    pub(crate) const fn new(settings: &OperatorSettings) -> Self {
        Self {
            best: None,
            rejection: None,
            margin: settings.min_improvement,
        }
    }

    /// Offers a candidate; non-improving ones only count as a rejection.
    /// The earlier candidate wins ties.
    pub(crate) fn offer(&mut self, candidate: Proposal<D>) {
        if !candidate.improves(self.margin) {
            self.rejection = Some(OperatorRejection::NoImprovement);
            return;
        }
        let replace = self
            .best
            .as_ref()
            .is_none_or(|best| best.rank(&candidate) == Ordering::Greater);
        if replace {
            self.best = Some(candidate);
        }
    }

    /// Records why a candidate was dropped.
    pub(crate) fn reject(&mut self, rejection: OperatorRejection) {
        self.rejection = Some(rejection);
    }

    /// The best improving candidate, or the last rejection.
    pub(crate) fn finish(self) -> Result<Proposal<D>, OperatorRejection> {
        self.best
            .ok_or_else(|| self.rejection.unwrap_or(OperatorRejection::NotApplicable))
    }
}

/// Runs the planning step of one operator for `element`.
///
/// # Errors
///
/// Returns the [`OperatorRejection`] explaining why nothing was proposed.
pub fn propose<const D: usize>(
    mesh: &Mesh<D>,
    kind: OperatorKind,
    element: ElementKey,
    settings: &OperatorSettings,
) -> Result<Proposal<D>, OperatorRejection> {
    if mesh.element(element).is_none() {
        return Err(OperatorRejection::NotApplicable);
    }
    match kind {
        OperatorKind::Smoothing => smoothing::propose_smoothing(mesh, element, settings),
        OperatorKind::Flip => flips::propose_flip(mesh, element, settings),
        OperatorKind::Insertion => insertion::propose_insertion(mesh, element, settings),
        OperatorKind::Removal => removal::propose_removal(mesh, element, settings),
    }
}

/// Applies a proposal through journaled primitives and returns the elements
/// whose quality must be re-evaluated.
///
/// # Errors
///
/// Returns [`OperatorError`] if the proposal no longer matches the mesh.
pub fn apply<const D: usize>(
    mesh: &mut Mesh<D>,
    proposal: &Proposal<D>,
) -> Result<ElementBuffer, OperatorError> {
    match &proposal.edit {
        Edit::Relocate { vertex, to } => {
            if mesh.vertex(*vertex).is_none() {
                return Err(OperatorError::StalePlan {
                    message: format!("vertex {vertex:?} is gone"),
                });
            }
            mesh.relocate_vertex(*vertex, *to);
            mesh.vertex_star(*vertex)
                .ok_or_else(|| OperatorError::StalePlan {
                    message: format!("vertex {vertex:?} has no star"),
                })
        }
        Edit::Retriangulate(plan) => apply_retriangulation(mesh, plan),
    }
}
