//! Configuration of an improvement run.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::algorithms::operators::{OperatorKind, OperatorSettings};
use crate::geometry::quality::{QualityEvaluator, QualityMeasure};

/// How often the full topology validator runs during improvement.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelfCheck {
    /// Never.
    #[default]
    Off,
    /// After every committed edit.
    Commit,
    /// After every applied edit, before it is committed or rolled back, and
    /// after every commit.
    EveryStep,
}

impl SelfCheck {
    /// `Commit` in debug builds or with the `self-check` feature, `Off`
    /// otherwise.
    #[must_use]
    pub const fn for_build() -> Self {
        if cfg!(any(debug_assertions, feature = "self-check")) {
            Self::Commit
        } else {
            Self::Off
        }
    }

    /// `true` if the validator runs after commits.
    #[must_use]
    pub const fn on_commit(self) -> bool {
        matches!(self, Self::Commit | Self::EveryStep)
    }
}

/// Invalid [`ImproveOptions`].
#[derive(Clone, Debug, Error, PartialEq)]
pub enum OptionsError {
    /// `min_improvement` is negative or not finite.
    #[error("min_improvement must be finite and non-negative, got {value}")]
    InvalidMinImprovement {
        /// Offending value.
        value: f64,
    },
    /// `bad_band_fraction` is outside `(0, 1]`.
    #[error("bad_band_fraction must lie in (0, 1], got {value}")]
    InvalidBadBandFraction {
        /// Offending value.
        value: f64,
    },
    /// A cavity must hold at least one element.
    #[error("max_cavity_size must be at least 1")]
    EmptyCavityLimit,
    /// Every operator is switched off.
    #[error("At least one operator must be enabled")]
    NoOperators,
}

/// Options of [`improve`](crate::improve::improve).
///
/// Missing fields fall back to [`Default`] when deserializing, so a
/// configuration file only needs the entries it changes.
///
/// # Examples
///
/// ```
/// use meliorate::improve::ImproveOptionsBuilder;
///
/// let options = ImproveOptionsBuilder::default()
///     .preserve_boundary(false)
///     .max_edits_per_run(200)
///     .build()
///     .unwrap();
/// assert_eq!(options.max_edits_per_run, Some(200));
/// assert!(options.enable_flips);
/// ```
#[derive(Builder, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[builder(default, build_fn(validate = "Self::validate"))]
#[serde(default)]
#[expect(
    clippy::struct_excessive_bools,
    reason = "independent switches mirrored one-to-one in configuration files"
)]
pub struct ImproveOptions {
    /// Never move, remove or re-triangulate boundary vertices and facets.
    pub preserve_boundary: bool,
    /// Measure quality against the per-vertex target sizes.
    pub target_size_field: bool,
    /// Measure quality in the per-vertex anisotropy tensors.
    pub anisotropy: bool,
    /// Stop after this many committed edits.
    #[builder(setter(strip_option))]
    pub max_edits_per_run: Option<usize>,
    /// Shape measure used for every element.
    pub quality_measure: QualityMeasure,
    /// Gain in minimum local quality an edit must reach to be committed.
    pub min_improvement: f64,
    /// Fraction of the threshold below which an element is in the bad band.
    pub bad_band_fraction: f64,
    /// Iteration cap of one smoothing ascent.
    pub smoothing_iterations: usize,
    /// Largest cavity an insertion may grow.
    pub max_cavity_size: usize,
    /// Try vertex relocation.
    pub enable_smoothing: bool,
    /// Try local re-triangulation.
    pub enable_flips: bool,
    /// Try vertex insertion.
    pub enable_insertion: bool,
    /// Try vertex removal.
    pub enable_removal: bool,
    /// Swap the first two vertices of negatively ordered input elements
    /// instead of rejecting them.
    pub reorient_input: bool,
    /// Validator schedule.
    pub self_check: SelfCheck,
}

impl Default for ImproveOptions {
    fn default() -> Self {
        Self {
            preserve_boundary: true,
            target_size_field: false,
            anisotropy: false,
            max_edits_per_run: None,
            quality_measure: QualityMeasure::default(),
            min_improvement: 1e-6,
            bad_band_fraction: 0.5,
            smoothing_iterations: 8,
            max_cavity_size: 48,
            enable_smoothing: true,
            enable_flips: true,
            enable_insertion: true,
            enable_removal: true,
            reorient_input: false,
            self_check: SelfCheck::for_build(),
        }
    }
}

impl ImproveOptions {
    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns the first [`OptionsError`] found.
    pub fn validate(&self) -> Result<(), OptionsError> {
        if !(self.min_improvement.is_finite() && self.min_improvement >= 0.0) {
            return Err(OptionsError::InvalidMinImprovement {
                value: self.min_improvement,
            });
        }
        if !(self.bad_band_fraction > 0.0 && self.bad_band_fraction <= 1.0) {
            return Err(OptionsError::InvalidBadBandFraction {
                value: self.bad_band_fraction,
            });
        }
        if self.max_cavity_size == 0 {
            return Err(OptionsError::EmptyCavityLimit);
        }
        if self.enabled_operators().next().is_none() {
            return Err(OptionsError::NoOperators);
        }
        Ok(())
    }

    /// Enabled operators in priority order.
    pub fn enabled_operators(&self) -> impl Iterator<Item = OperatorKind> + '_ {
        OperatorKind::ALL.into_iter().filter(|kind| match kind {
            OperatorKind::Smoothing => self.enable_smoothing,
            OperatorKind::Flip => self.enable_flips,
            OperatorKind::Insertion => self.enable_insertion,
            OperatorKind::Removal => self.enable_removal,
        })
    }

    /// Operator knobs derived from these options.
    #[must_use]
    pub const fn operator_settings(&self) -> OperatorSettings {
        OperatorSettings {
            preserve_boundary: self.preserve_boundary,
            min_improvement: self.min_improvement,
            smoothing_iterations: self.smoothing_iterations,
            max_cavity_size: self.max_cavity_size,
        }
    }

    /// Quality evaluator for the given threshold.
    #[must_use]
    pub const fn evaluator(&self, threshold: f64) -> QualityEvaluator {
        QualityEvaluator::new(
            self.quality_measure,
            self.target_size_field,
            self.anisotropy,
            threshold,
            self.bad_band_fraction,
        )
    }
}

impl ImproveOptionsBuilder {
    fn validate(&self) -> Result<(), String> {
        let mut options = ImproveOptions::default();
        if let Some(value) = self.min_improvement {
            options.min_improvement = value;
        }
        if let Some(value) = self.bad_band_fraction {
            options.bad_band_fraction = value;
        }
        if let Some(value) = self.max_cavity_size {
            options.max_cavity_size = value;
        }
        if let Some(value) = self.enable_smoothing {
            options.enable_smoothing = value;
        }
        if let Some(value) = self.enable_flips {
            options.enable_flips = value;
        }
        if let Some(value) = self.enable_insertion {
            options.enable_insertion = value;
        }
        if let Some(value) = self.enable_removal {
            options.enable_removal = value;
        }
        options.validate().map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_enable_every_operator_in_priority_order() {
        let options = ImproveOptions::default();
        assert!(options.validate().is_ok());
        assert!(options.preserve_boundary);
        let order: Vec<_> = options.enabled_operators().collect();
        assert_eq!(order, OperatorKind::ALL.to_vec());
    }

    #[test]
    fn builder_keeps_unset_fields_at_defaults() {
        let options = ImproveOptionsBuilder::default()
            .enable_insertion(false)
            .smoothing_iterations(3_usize)
            .build()
            .unwrap();
        assert_eq!(options.smoothing_iterations, 3);
        assert_eq!(options.max_cavity_size, 48);
        let order: Vec<_> = options.enabled_operators().collect();
        assert_eq!(
            order,
            vec![OperatorKind::Smoothing, OperatorKind::Flip, OperatorKind::Removal]
        );
    }

    #[test]
    fn builder_rejects_invalid_values() {
        assert!(
            ImproveOptionsBuilder::default()
                .bad_band_fraction(0.0)
                .build()
                .is_err()
        );
        assert!(
            ImproveOptionsBuilder::default()
                .enable_smoothing(false)
                .enable_flips(false)
                .enable_insertion(false)
                .enable_removal(false)
                .build()
                .is_err()
        );
        let options = ImproveOptions {
            min_improvement: f64::NAN,
            ..ImproveOptions::default()
        };
        assert!(matches!(
            options.validate(),
            Err(OptionsError::InvalidMinImprovement { .. })
        ));
    }

    #[test]
    fn partial_configuration_deserializes_over_defaults() {
        let options: ImproveOptions =
            serde_json::from_str(r#"{"preserve_boundary": false, "self_check": "every_step"}"#)
                .unwrap();
        assert!(!options.preserve_boundary);
        assert_eq!(options.self_check, SelfCheck::EveryStep);
        assert!(options.self_check.on_commit());
        assert_eq!(options.max_cavity_size, 48);
    }

    #[test]
    fn settings_and_evaluator_follow_options() {
        let options = ImproveOptions {
            preserve_boundary: false,
            max_cavity_size: 7,
            ..ImproveOptions::default()
        };
        let settings = options.operator_settings();
        assert!(!settings.preserve_boundary);
        assert_eq!(settings.max_cavity_size, 7);
        let evaluator = options.evaluator(0.4);
        assert!((evaluator.threshold() - 0.4).abs() < f64::EPSILON);
        assert!(evaluator.needs_improvement(0.3));
    }
}
