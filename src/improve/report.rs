//! Outcome of an improvement run.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::algorithms::operators::OperatorKind;
use crate::geometry::quality::QualityStats;
use crate::geometry::util::conversions::count_to_f64;

/// Overall result of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImprovementStatus {
    /// No element is below the threshold.
    Converged,
    /// Elements below the threshold remain. The mesh is still valid and
    /// better than or equal to the input.
    NonConvergence,
    /// The caller stopped the run.
    Cancelled,
}

/// Why the driver stopped scanning.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The queue of elements below the threshold emptied out.
    Converged,
    /// `max_iterations` scan iterations were spent.
    IterationBudget,
    /// `max_edits_per_run` edits were committed.
    EditBudget,
    /// Every remaining element below the threshold was tried without success.
    CandidatesExhausted,
    /// The cancellation flag was raised.
    Cancelled,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Converged => "converged",
            Self::IterationBudget => "iteration budget",
            Self::EditBudget => "edit budget",
            Self::CandidatesExhausted => "candidates exhausted",
            Self::Cancelled => "cancelled",
        };
        f.write_str(text)
    }
}

/// Per-operator counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorTally {
    /// Times the operator was asked for a proposal.
    pub attempts: usize,
    /// Proposals committed.
    pub commits: usize,
    /// Plans rejected before any mutation.
    pub rejections: usize,
    /// Applied proposals undone because the measured quality did not improve.
    pub rollbacks: usize,
}

impl OperatorTally {
    /// Fraction of attempts that ended in a commit.
    #[must_use]
    pub fn success_rate(&self) -> Option<f64> {
        (self.attempts > 0).then(|| count_to_f64(self.commits) / count_to_f64(self.attempts))
    }
}

/// Summary returned by [`improve`](crate::improve::improve).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImprovementReport {
    /// Overall result.
    pub status: ImprovementStatus,
    /// Why scanning stopped.
    pub stop_reason: StopReason,
    /// Scan iterations performed.
    pub iterations: usize,
    /// Edits committed.
    pub edits: usize,
    /// Quality of the input.
    pub initial_quality: QualityStats,
    /// Quality of the output.
    pub final_quality: QualityStats,
    /// Counters per operator, for the enabled operators.
    pub operators: BTreeMap<OperatorKind, OperatorTally>,
    /// Elements still below the threshold.
    pub unresolved_elements: usize,
    /// Vertex count of the input.
    pub vertices_before: usize,
    /// Vertex count of the output.
    pub vertices_after: usize,
    /// Element count of the input.
    pub elements_before: usize,
    /// Element count of the output.
    pub elements_after: usize,
}

impl ImprovementReport {
    /// Commits of one operator.
    #[must_use]
    pub fn commits(&self, kind: OperatorKind) -> usize {
        self.operators.get(&kind).map_or(0, |tally| tally.commits)
    }

    /// `true` if the run reached the threshold everywhere.
    #[must_use]
    pub fn converged(&self) -> bool {
        self.status == ImprovementStatus::Converged
    }
}

impl fmt::Display for ImprovementReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:?} after {} iterations ({}), {} edits",
            self.status, self.iterations, self.stop_reason, self.edits
        )?;
        writeln!(
            f,
            "min quality {:.4} -> {:.4}, mean {:.4} -> {:.4}",
            self.initial_quality.min_quality,
            self.final_quality.min_quality,
            self.initial_quality.mean_quality,
            self.final_quality.mean_quality
        )?;
        writeln!(
            f,
            "vertices {} -> {}, elements {} -> {}, unresolved {}",
            self.vertices_before,
            self.vertices_after,
            self.elements_before,
            self.elements_after,
            self.unresolved_elements
        )?;
        for (kind, tally) in &self.operators {
            write!(
                f,
                "  {kind}: attempts {:>6} commits {:>6} rejections {:>6} rollbacks {:>6}",
                tally.attempts, tally.commits, tally.rejections, tally.rollbacks
            )?;
            match tally.success_rate() {
                Some(rate) => writeln!(f, " success {:.1}%", rate * 100.0)?,
                None => writeln!(f)?,
            }
        }
        Ok(())
    }
}
