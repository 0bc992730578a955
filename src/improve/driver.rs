//! The improvement loop.
//!
//! [`Improver::run`] repeatedly takes the worst element below the quality
//! threshold (worst band first, then lowest quality, then lowest key) and
//! offers it to the enabled operators in priority order: smoothing, flip,
//! insertion, removal. The first proposal whose measured effect beats the
//! affected region's previous minimum quality is committed; every other
//! applied proposal is rolled back. An element no operator can improve is
//! marked exhausted and only re-enters the queue when an edit elsewhere
//! changes its quality.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};

use ordered_float::OrderedFloat;
use thiserror::Error;

use crate::core::algorithms::operators::{
    OperatorError, OperatorKind, OperatorSettings, apply, propose,
};
use crate::core::collections::{ElementBuffer, FastHashMap, SmallBuffer};
use crate::core::data::MeshData;
use crate::core::journal::JournalError;
use crate::core::mesh::{BuildOptions, ElementKey, Mesh, MeshError};
use crate::core::validation::{InvariantKind, ValidationReport};
use crate::geometry::predicates::Orientation;
use crate::geometry::quality::{DEGENERATE_QUALITY, QualityBand, QualityEvaluator};
use crate::improve::options::{ImproveOptions, OptionsError, SelfCheck};
use crate::improve::report::{ImprovementReport, ImprovementStatus, OperatorTally, StopReason};

/// Fatal errors of an improvement run. Rejected and exhausted candidates are
/// not errors; they show up in the [`ImprovementReport`].
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ImproveError<const D: usize> {
    /// The quality threshold is outside `[0, 1]`.
    #[error("Quality threshold must lie in [0, 1], got {threshold}")]
    InvalidThreshold {
        /// Offending value.
        threshold: f64,
    },
    /// The options failed validation.
    #[error("Invalid options: {0}")]
    InvalidOptions(#[from] OptionsError),
    /// The input contains a flat or inverted element.
    #[error("Input element {element} is {orientation}")]
    DegenerateInput {
        /// Input index of the element.
        element: usize,
        /// Its exact orientation.
        orientation: Orientation,
    },
    /// The input is structurally malformed.
    #[error("Invalid input mesh: {0}")]
    InvalidInput(MeshError),
    /// A topology or geometry invariant failed. This is a bug; the mesh
    /// snapshot shows the offending state.
    #[error("Mesh invariants violated: {report}")]
    InvariantViolation {
        /// Every failed check.
        report: ValidationReport,
        /// The mesh at the time of the failure.
        mesh: Box<MeshData<D>>,
    },
    /// Journal misuse.
    #[error(transparent)]
    Journal(#[from] JournalError),
    /// A proposal could not be applied.
    #[error(transparent)]
    Operator(#[from] OperatorError),
}

impl<const D: usize> From<MeshError> for ImproveError<D> {
    fn from(error: MeshError) -> Self {
        match error {
            MeshError::DegenerateElement {
                element,
                orientation,
            } => Self::DegenerateInput {
                element,
                orientation,
            },
            other => Self::InvalidInput(other),
        }
    }
}

/// Elements waiting for an edit, worst first.
#[derive(Debug, Default)]
struct ScanQueue {
    entries: BTreeSet<(QualityBand, OrderedFloat<f64>, ElementKey)>,
}

impl ScanQueue {
    fn push(&mut self, band: QualityBand, quality: f64, key: ElementKey) {
        self.entries.insert((band, OrderedFloat(quality), key));
    }

    fn pop(&mut self) -> Option<(f64, ElementKey)> {
        self.entries
            .pop_first()
            .map(|(_, quality, key)| (quality.into_inner(), key))
    }
}

/// Runs improvement passes over a mesh it owns.
///
/// # Examples
///
/// ```
/// use meliorate::core::data::MeshData;
/// use meliorate::improve::{ImproveOptions, Improver};
///
/// let data = MeshData::<2>::from_positions(
///     &[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.5, 0.5]],
///     vec![vec![0, 1, 4], vec![1, 2, 4], vec![2, 3, 4], vec![3, 0, 4]],
/// );
/// let mut improver = Improver::from_data(&data, 0.3, ImproveOptions::default()).unwrap();
/// let report = improver.run(100, None).unwrap();
/// assert!(report.converged());
/// assert_eq!(report.edits, 0);
/// ```
#[derive(Debug)]
pub struct Improver<const D: usize> {
    mesh: Mesh<D>,
    options: ImproveOptions,
    settings: OperatorSettings,
    evaluator: QualityEvaluator,
}

impl<const D: usize> Improver<D> {
    /// Takes ownership of a mesh and installs the quality evaluator the
    /// options describe.
    ///
    /// # Errors
    ///
    /// Returns [`ImproveError::InvalidThreshold`] or
    /// [`ImproveError::InvalidOptions`] for bad parameters, and
    /// [`ImproveError::InvariantViolation`] if the mesh is not valid.
    pub fn new(
        mut mesh: Mesh<D>,
        threshold: f64,
        options: ImproveOptions,
    ) -> Result<Self, ImproveError<D>> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ImproveError::InvalidThreshold { threshold });
        }
        options.validate()?;
        if let Err(report) = mesh.validate() {
            return Err(ImproveError::InvariantViolation {
                report,
                mesh: Box::new(mesh.to_data()),
            });
        }
        let evaluator = options.evaluator(threshold);
        mesh.set_evaluator(evaluator);
        Ok(Self {
            settings: options.operator_settings(),
            mesh,
            options,
            evaluator,
        })
    }

    /// Builds the mesh from index data, then calls [`Improver::new`].
    ///
    /// # Errors
    ///
    /// Returns [`ImproveError::DegenerateInput`] for flat or inverted input
    /// elements, [`ImproveError::InvalidInput`] for other structural
    /// problems, and the errors of [`Improver::new`].
    pub fn from_data(
        data: &MeshData<D>,
        threshold: f64,
        options: ImproveOptions,
    ) -> Result<Self, ImproveError<D>> {
        let build = BuildOptions {
            reorient_input: options.reorient_input,
        };
        let mesh = Mesh::from_data(data, build)?;
        Self::new(mesh, threshold, options)
    }

    /// The mesh in its current state.
    #[must_use]
    pub const fn mesh(&self) -> &Mesh<D> {
        &self.mesh
    }

    /// Releases the mesh.
    #[must_use]
    pub fn into_mesh(self) -> Mesh<D> {
        self.mesh
    }

    /// The options in use.
    #[must_use]
    pub const fn options(&self) -> &ImproveOptions {
        &self.options
    }

    /// Runs at most `max_iterations` scan iterations.
    ///
    /// `cancel` is polled before every iteration; once it reads `true` the
    /// run stops with [`ImprovementStatus::Cancelled`]. No edit is ever left
    /// open when this returns.
    ///
    /// # Errors
    ///
    /// Returns [`ImproveError::InvariantViolation`] if a self-check fails,
    /// and [`ImproveError::Journal`] or [`ImproveError::Operator`] if an
    /// edit cannot be applied or undone.
    pub fn run(
        &mut self,
        max_iterations: usize,
        cancel: Option<&AtomicBool>,
    ) -> Result<ImprovementReport, ImproveError<D>> {
        let vertices_before = self.mesh.number_of_vertices();
        let elements_before = self.mesh.number_of_elements();
        let initial_quality = self.mesh.quality_stats();
        let mut operators: BTreeMap<OperatorKind, OperatorTally> = self
            .options
            .enabled_operators()
            .map(|kind| (kind, OperatorTally::default()))
            .collect();

        let mut queue = ScanQueue::default();
        let keys: Vec<ElementKey> = self.mesh.element_keys().collect();
        self.enqueue(&mut queue, &FastHashMap::default(), &keys);
        let mut exhausted: FastHashMap<ElementKey, f64> = FastHashMap::default();

        let mut iterations = 0;
        let mut edits = 0;
        let stop_reason = loop {
            if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
                break StopReason::Cancelled;
            }
            if iterations >= max_iterations {
                break StopReason::IterationBudget;
            }
            if self.options.max_edits_per_run.is_some_and(|cap| edits >= cap) {
                break StopReason::EditBudget;
            }
            let Some((queued, key)) = queue.pop() else {
                break if exhausted.is_empty() {
                    StopReason::Converged
                } else {
                    StopReason::CandidatesExhausted
                };
            };
            // Entries go stale when their element dies or is re-queued with
            // a new quality.
            let Some(current) = self.mesh.quality(key) else {
                continue;
            };
            if current.to_bits() != queued.to_bits() || exhausted.contains_key(&key) {
                continue;
            }

            iterations += 1;
            if let Some(touched) = self.improve_element(key, &mut operators)? {
                edits += 1;
                let mut requeue: Vec<ElementKey> = touched.into_iter().collect();
                requeue.push(key);
                for element in &requeue {
                    let unchanged = exhausted.get(element).is_some_and(|q| {
                        self.mesh
                            .peek_quality(*element)
                            .is_some_and(|now| now.to_bits() == q.to_bits())
                    });
                    if !unchanged {
                        exhausted.remove(element);
                    }
                }
                self.enqueue(&mut queue, &exhausted, &requeue);
            } else {
                tracing::debug!(?key, quality = current, "element exhausted");
                exhausted.insert(key, current);
            }
        };

        let final_quality = self.mesh.quality_stats();
        let unresolved_elements = final_quality.below_threshold();
        let (status, stop_reason) = match stop_reason {
            StopReason::Cancelled => (ImprovementStatus::Cancelled, StopReason::Cancelled),
            _ if unresolved_elements == 0 => (ImprovementStatus::Converged, StopReason::Converged),
            reason => (ImprovementStatus::NonConvergence, reason),
        };

        let report = ImprovementReport {
            status,
            stop_reason,
            iterations,
            edits,
            initial_quality,
            final_quality,
            operators,
            unresolved_elements,
            vertices_before,
            vertices_after: self.mesh.number_of_vertices(),
            elements_before,
            elements_after: self.mesh.number_of_elements(),
        };
        match status {
            ImprovementStatus::Converged => tracing::info!(
                iterations,
                edits,
                min_quality = report.final_quality.min_quality,
                "mesh improvement converged"
            ),
            ImprovementStatus::NonConvergence | ImprovementStatus::Cancelled => tracing::warn!(
                ?status,
                %stop_reason,
                iterations,
                edits,
                unresolved = unresolved_elements,
                min_quality = report.final_quality.min_quality,
                "mesh improvement stopped early"
            ),
        }
        Ok(report)
    }

    /// Pushes every live element of `keys` that is below the threshold,
    /// unless it is exhausted at its current quality.
    fn enqueue(
        &mut self,
        queue: &mut ScanQueue,
        exhausted: &FastHashMap<ElementKey, f64>,
        keys: &[ElementKey],
    ) {
        for &key in keys {
            let Some(quality) = self.mesh.quality(key) else {
                continue;
            };
            if !self.evaluator.needs_improvement(quality) {
                continue;
            }
            if exhausted
                .get(&key)
                .is_some_and(|q| q.to_bits() == quality.to_bits())
            {
                continue;
            }
            queue.push(self.evaluator.band(quality), quality, key);
        }
    }

    /// Tries the enabled operators on one element. Returns the elements an
    /// edit touched, or `None` if every operator failed.
    fn improve_element(
        &mut self,
        key: ElementKey,
        operators: &mut BTreeMap<OperatorKind, OperatorTally>,
    ) -> Result<Option<ElementBuffer>, ImproveError<D>> {
        let kinds: SmallBuffer<OperatorKind, 4> = self.options.enabled_operators().collect();
        for kind in kinds {
            let tally = operators.entry(kind).or_default();
            tally.attempts += 1;

            let proposal = match propose(&self.mesh, kind, key, &self.settings) {
                Ok(proposal) => proposal,
                Err(rejection) => {
                    tracing::trace!(?key, %kind, %rejection, "proposal rejected");
                    tally.rejections += 1;
                    continue;
                }
            };

            self.mesh.begin_edit()?;
            let touched = match apply(&mut self.mesh, &proposal) {
                Ok(touched) => touched,
                Err(error) => {
                    self.mesh.rollback_edit()?;
                    return Err(error.into());
                }
            };
            if self.options.self_check == SelfCheck::EveryStep {
                self.check_open_edit()?;
            }

            let after = self.region_quality(&touched);
            if after > proposal.before + self.settings.min_improvement {
                self.mesh.commit_edit()?;
                tally.commits += 1;
                tracing::debug!(
                    ?key,
                    %kind,
                    before = proposal.before,
                    after,
                    touched = touched.len(),
                    "committed edit"
                );
                if self.options.self_check.on_commit() {
                    self.check_committed()?;
                }
                return Ok(Some(touched));
            }

            tracing::debug!(
                ?key,
                %kind,
                before = proposal.before,
                predicted = proposal.predicted,
                after,
                "rolled back edit"
            );
            self.mesh.rollback_edit()?;
            tally.rollbacks += 1;
        }
        Ok(None)
    }

    /// Worst quality over `touched`, counting anything not exactly
    /// positively oriented as degenerate.
    fn region_quality(&mut self, touched: &[ElementKey]) -> f64 {
        let mut worst: Option<f64> = None;
        for &key in touched {
            let quality = match self.mesh.orientation(key) {
                Some(Orientation::POSITIVE) => self.mesh.quality(key).unwrap_or(DEGENERATE_QUALITY),
                _ => DEGENERATE_QUALITY,
            };
            worst = Some(worst.map_or(quality, |w| w.min(quality)));
        }
        worst.unwrap_or(DEGENERATE_QUALITY)
    }

    fn check_committed(&self) -> Result<(), ImproveError<D>> {
        self.mesh
            .validate()
            .map_err(|report| self.violation(report))
    }

    /// Validates mid-edit; the open edit itself is expected. On failure the
    /// snapshot is taken before the edit is rolled back.
    fn check_open_edit(&mut self) -> Result<(), ImproveError<D>> {
        let report = ValidationReport {
            violations: self
                .mesh
                .validation_report()
                .violations
                .into_iter()
                .filter(|v| v.kind != InvariantKind::JournalOpen)
                .collect(),
        };
        if report.is_empty() {
            return Ok(());
        }
        let error = self.violation(report);
        self.mesh.rollback_edit()?;
        Err(error)
    }

    fn violation(&self, report: ValidationReport) -> ImproveError<D> {
        tracing::warn!(%report, "mesh invariant violated");
        ImproveError::InvariantViolation {
            report,
            mesh: Box::new(self.mesh.to_data()),
        }
    }
}

/// Improves a mesh given as index data.
///
/// Builds the mesh, runs at most `max_iterations` scan iterations with the
/// given options and returns the improved mesh with a report. Elements are
/// improved until their quality reaches `quality_threshold`.
///
/// # Errors
///
/// Returns [`ImproveError::DegenerateInput`] if the input has a flat or
/// inverted element, [`ImproveError::InvalidInput`] if it is otherwise
/// malformed, and [`ImproveError::InvariantViolation`] if a self-check
/// fails. Non-convergence is not an error.
///
/// # Examples
///
/// ```
/// use meliorate::geometry::util::mesh_generation::jittered_box_mesh;
/// use meliorate::improve::{ImproveOptions, improve};
///
/// let input = jittered_box_mesh::<2>(4, 1.0, 0.3, 7).unwrap();
/// let (output, report) = improve(&input, 0.4, 500, &ImproveOptions::default()).unwrap();
/// assert!(report.final_quality.min_quality >= report.initial_quality.min_quality);
/// assert_eq!(output.elements.len(), report.elements_after);
/// ```
pub fn improve<const D: usize>(
    mesh: &MeshData<D>,
    quality_threshold: f64,
    max_iterations: usize,
    options: &ImproveOptions,
) -> Result<(MeshData<D>, ImprovementReport), ImproveError<D>> {
    let mut improver = Improver::from_data(mesh, quality_threshold, options.clone())?;
    let report = improver.run(max_iterations, None)?;
    Ok((improver.into_mesh().to_data(), report))
}
