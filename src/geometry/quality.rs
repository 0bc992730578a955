//! Geometric quality measures for triangles and tetrahedra.
//!
//! Every measure is normalized to `[0, 1]`: [`IDEAL_QUALITY`] for the regular
//! simplex and [`DEGENERATE_QUALITY`] for flat or inverted elements. Shape
//! measures only look at the corner positions; the [`QualityEvaluator`] adds
//! the target size field and anisotropy by measuring the element in the
//! local metric.
//!
//! # Quality Metrics
//!
//! - **Minimum sine**: smallest sine of the planar angles (2D) or dihedral
//!   angles (3D), divided by its value for the regular simplex. Penalizes
//!   both small and large angles.
//! - **Volume-length ratio**: `V / l_rms^D` divided by its regular value.
//! - **Radius ratio**: `D · r / R` (inradius over circumradius).
//!
//! # References
//!
//! - Shewchuk, J.R. "What Is a Good Linear Element? Interpolation, Conditioning,
//!   Anisotropy, and Quality Measures" (2002)
//! - Klingner, B.M. and Shewchuk, J.R. "Aggressive Tetrahedral Mesh
//!   Improvement" (2007)

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::geometry::metric::{MetricTensor, apply_transform};
use crate::geometry::point::Point;
use crate::geometry::predicates::simplex_orientation;
use crate::geometry::util::conversions::{count_to_f64, mean};
use crate::geometry::util::{
    circumradius, edge_lengths, facet_measures, inradius, signed_volume,
};

/// Quality of a flat or inverted element.
pub const DEGENERATE_QUALITY: f64 = 0.0;

/// Quality of the regular simplex.
pub const IDEAL_QUALITY: f64 = 1.0;

/// Sine of the angles of the equilateral triangle.
const REGULAR_TRIANGLE_SINE: f64 = 0.866_025_403_784_438_6;

/// Sine of the dihedral angle of the regular tetrahedron, `2√2 / 3`.
const REGULAR_TET_DIHEDRAL_SINE: f64 = 0.942_809_041_582_063_4;

/// Shape measure used to score elements.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityMeasure {
    /// Normalized minimum sine of the planar (2D) or dihedral (3D) angles.
    #[default]
    MinSine,
    /// Normalized volume over the RMS edge length raised to `D`.
    VolumeLengthRatio,
    /// `D` times inradius over circumradius.
    RadiusRatio,
}

impl std::fmt::Display for QualityMeasure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MinSine => write!(f, "min-sine"),
            Self::VolumeLengthRatio => write!(f, "volume-length"),
            Self::RadiusRatio => write!(f, "radius-ratio"),
        }
    }
}

/// Classification of an element quality against the improvement threshold.
///
/// Ordered from worst to best so that sorting puts bad elements first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityBand {
    /// Well below the threshold.
    Bad,
    /// Below the threshold.
    Marginal,
    /// At or above the threshold.
    Acceptable,
}

// =============================================================================
// SHAPE MEASURES
// =============================================================================

/// Sines of all planar angles (2D) or dihedral angles (3D) of a positively
/// oriented simplex. Empty for other dimensions.
fn angle_sines<const D: usize>(points: &[Point<D>]) -> SmallVec<[f64; 6]> {
    let volume = signed_volume(points);
    let mut sines = SmallVec::new();
    match D {
        2 => {
            // sin(angle at i) = 2A / (|e_ij| |e_ik|)
            for i in 0..3 {
                let a = points[(i + 1) % 3] - points[i];
                let b = points[(i + 2) % 3] - points[i];
                let denom = a.norm() * b.norm();
                sines.push(if denom > 0.0 { 2.0 * volume / denom } else { 0.0 });
            }
        }
        3 => {
            // sin(θ_ij) = 3 V l_ij / (2 A_k A_l), where k, l are the other two
            // vertices and A_k is the area of the facet opposite k.
            let areas = facet_measures(points);
            for i in 0..4 {
                for j in (i + 1)..4 {
                    let mut others = (0..4).filter(|&v| v != i && v != j);
                    let (Some(k), Some(l)) = (others.next(), others.next()) else {
                        continue;
                    };
                    let denom = 2.0 * areas[k] * areas[l];
                    let length = points[i].distance(&points[j]);
                    sines.push(if denom > 0.0 { 3.0 * volume * length / denom } else { 0.0 });
                }
            }
        }
        _ => {}
    }
    sines
}

fn min_sine<const D: usize>(points: &[Point<D>]) -> f64 {
    let normalizer = match D {
        2 => REGULAR_TRIANGLE_SINE,
        3 => REGULAR_TET_DIHEDRAL_SINE,
        _ => return DEGENERATE_QUALITY,
    };
    angle_sines(points)
        .into_iter()
        .fold(f64::INFINITY, f64::min)
        / normalizer
}

fn volume_length_ratio<const D: usize>(points: &[Point<D>]) -> f64 {
    let lengths = edge_lengths(points);
    if lengths.is_empty() {
        return DEGENERATE_QUALITY;
    }
    let mean_square = lengths.iter().map(|l| l * l).sum::<f64>() / count_to_f64(lengths.len());
    let dim = i32::try_from(D).unwrap_or(i32::MAX);
    let regular = regular_volume(D) * mean_square.sqrt().powi(dim);
    if regular > 0.0 {
        signed_volume(points) / regular
    } else {
        DEGENERATE_QUALITY
    }
}

/// Volume of the regular `D`-simplex with unit edges,
/// `sqrt(D + 1) / (D! · 2^(D/2))`.
fn regular_volume(dimension: usize) -> f64 {
    let d = count_to_f64(dimension);
    (d + 1.0).sqrt() / (crate::geometry::util::factorial(dimension) * 2.0_f64.powf(d / 2.0))
}

fn radius_ratio<const D: usize>(points: &[Point<D>]) -> f64 {
    let r = inradius(points);
    match circumradius(points) {
        Ok(big_r) if big_r > 0.0 => count_to_f64(D) * r / big_r,
        _ => DEGENERATE_QUALITY,
    }
}

/// Shape quality of a simplex in `[0, 1]`.
///
/// Elements that are not exactly positively oriented score
/// [`DEGENERATE_QUALITY`].
///
/// # Examples
///
/// ```
/// use meliorate::geometry::point::Point;
/// use meliorate::geometry::quality::{shape_quality, QualityMeasure};
/// use approx::assert_relative_eq;
///
/// let h = 3.0_f64.sqrt() / 2.0;
/// let equilateral = [
///     Point::new([0.0, 0.0]),
///     Point::new([1.0, 0.0]),
///     Point::new([0.5, h]),
/// ];
/// for measure in [
///     QualityMeasure::MinSine,
///     QualityMeasure::VolumeLengthRatio,
///     QualityMeasure::RadiusRatio,
/// ] {
///     assert_relative_eq!(shape_quality(measure, &equilateral), 1.0, epsilon = 1e-9);
/// }
/// ```
#[must_use]
pub fn shape_quality<const D: usize>(measure: QualityMeasure, points: &[Point<D>]) -> f64 {
    if points.len() != D + 1 || !simplex_orientation(points).is_positive() {
        return DEGENERATE_QUALITY;
    }
    let raw = match measure {
        QualityMeasure::MinSine => min_sine(points),
        QualityMeasure::VolumeLengthRatio => volume_length_ratio(points),
        QualityMeasure::RadiusRatio => radius_ratio(points),
    };
    if raw.is_finite() {
        raw.clamp(DEGENERATE_QUALITY, IDEAL_QUALITY)
    } else {
        DEGENERATE_QUALITY
    }
}

/// Smallest and largest planar (2D) or dihedral (3D) angle in degrees.
///
/// Returns `(0, 180)` for degenerate input.
#[must_use]
pub fn angle_extrema_degrees<const D: usize>(points: &[Point<D>]) -> (f64, f64) {
    let mut angles: SmallVec<[f64; 6]> = SmallVec::new();
    match D {
        2 if points.len() == 3 => {
            for i in 0..3 {
                let a = points[(i + 1) % 3] - points[i];
                let b = points[(i + 2) % 3] - points[i];
                let denom = a.norm() * b.norm();
                if denom > 0.0 {
                    angles.push((a.dot(&b) / denom).clamp(-1.0, 1.0).acos());
                }
            }
        }
        3 if points.len() == 4 => {
            for i in 0..4 {
                for j in (i + 1)..4 {
                    let mut others = (0..4).filter(|&v| v != i && v != j);
                    let (Some(k), Some(l)) = (others.next(), others.next()) else {
                        continue;
                    };
                    // Angle between the two faces sharing edge ij, measured
                    // through the projections of k and l orthogonal to the edge.
                    let edge = points[j] - points[i];
                    let len2 = edge.norm_squared();
                    if len2 <= 0.0 {
                        continue;
                    }
                    let project = |p: Point<D>| {
                        let v = p - points[i];
                        v - edge * (v.dot(&edge) / len2)
                    };
                    let u = project(points[k]);
                    let w = project(points[l]);
                    let denom = u.norm() * w.norm();
                    if denom > 0.0 {
                        angles.push((u.dot(&w) / denom).clamp(-1.0, 1.0).acos());
                    }
                }
            }
        }
        _ => {}
    }
    if angles.is_empty() {
        return (0.0, 180.0);
    }
    let min = angles.iter().copied().fold(f64::INFINITY, f64::min);
    let max = angles.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    (min.to_degrees(), max.to_degrees())
}

// =============================================================================
// FIELD-AWARE EVALUATION
// =============================================================================

/// Geometry and field data of one element corner.
#[derive(Clone, Copy, Debug)]
pub struct Corner<'a, const D: usize> {
    /// Position.
    pub point: Point<D>,
    /// Target edge length at this vertex.
    pub size: Option<f64>,
    /// Anisotropy tensor at this vertex.
    pub metric: Option<&'a MetricTensor<D>>,
}

/// Scores elements against the shape measure and, optionally, the target
/// size field and anisotropy.
///
/// With the size field enabled, every edge is measured in the element metric
/// `M / h²` (mean vertex tensor over the squared mean target size) and the
/// shape quality is multiplied by the mean of `min(l_M, 1 / l_M)` over the
/// edges. With anisotropy enabled, the shape measure is evaluated on the
/// corners mapped through the Cholesky factor of the mean tensor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct QualityEvaluator {
    measure: QualityMeasure,
    use_size_field: bool,
    use_anisotropy: bool,
    threshold: f64,
    bad_fraction: f64,
}

impl QualityEvaluator {
    /// Creates an evaluator. `threshold` is the target quality and elements
    /// below `bad_fraction * threshold` fall in [`QualityBand::Bad`].
    #[must_use]
    pub const fn new(
        measure: QualityMeasure,
        use_size_field: bool,
        use_anisotropy: bool,
        threshold: f64,
        bad_fraction: f64,
    ) -> Self {
        Self {
            measure,
            use_size_field,
            use_anisotropy,
            threshold,
            bad_fraction,
        }
    }

    /// Pure shape evaluation with the given measure.
    #[must_use]
    pub const fn shape_only(measure: QualityMeasure, threshold: f64) -> Self {
        Self::new(measure, false, false, threshold, 0.5)
    }

    /// The shape measure in use.
    #[must_use]
    pub const fn measure(&self) -> QualityMeasure {
        self.measure
    }

    /// Quality threshold.
    #[must_use]
    pub const fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Band of a quality value.
    #[must_use]
    pub fn band(&self, quality: f64) -> QualityBand {
        if quality < self.bad_fraction * self.threshold {
            QualityBand::Bad
        } else if quality < self.threshold {
            QualityBand::Marginal
        } else {
            QualityBand::Acceptable
        }
    }

    /// `true` when the quality is below the threshold.
    #[must_use]
    pub fn needs_improvement(&self, quality: f64) -> bool {
        quality < self.threshold
    }

    /// Quality of an element in `[0, 1]`.
    #[must_use]
    pub fn evaluate<const D: usize>(&self, corners: &[Corner<'_, D>]) -> f64 {
        let points: SmallVec<[Point<D>; 4]> = corners.iter().map(|c| c.point).collect();
        if !self.use_size_field && !self.use_anisotropy {
            return shape_quality(self.measure, &points);
        }
        // Inversion is decided on the real coordinates.
        if points.len() != D + 1 || !simplex_orientation(&points).is_positive() {
            return DEGENERATE_QUALITY;
        }

        let metric = self.element_metric(corners);
        let Ok(transform) = metric.transform() else {
            return shape_quality(self.measure, &points);
        };

        let shape = if self.use_anisotropy {
            let mapped: SmallVec<[Point<D>; 4]> = points
                .iter()
                .map(|p| apply_transform(&transform, p))
                .collect();
            shape_quality(self.measure, &mapped)
        } else {
            shape_quality(self.measure, &points)
        };

        if !self.use_size_field {
            return shape;
        }
        let mut conformity = 0.0;
        let mut edges = 0_u32;
        for i in 0..points.len() {
            for j in (i + 1)..points.len() {
                let l = metric.length(&(points[j] - points[i]));
                conformity += if l > 0.0 { l.min(1.0 / l) } else { 0.0 };
                edges += 1;
            }
        }
        if edges == 0 {
            return shape;
        }
        (shape * conformity / f64::from(edges)).clamp(DEGENERATE_QUALITY, IDEAL_QUALITY)
    }

    fn element_metric<const D: usize>(&self, corners: &[Corner<'_, D>]) -> MetricTensor<D> {
        let identity = MetricTensor::identity();
        let mut metric = if self.use_anisotropy {
            MetricTensor::weighted_mean(
                corners.iter().map(|c| (1.0, c.metric.unwrap_or(&identity))),
            )
            .unwrap_or_default()
        } else {
            identity.clone()
        };
        if self.use_size_field {
            let sizes: SmallVec<[f64; 4]> = corners
                .iter()
                .filter_map(|c| c.size)
                .filter(|h| *h > 0.0 && h.is_finite())
                .collect();
            if let Some(h) = mean(&sizes) {
                metric = metric.scaled(1.0 / (h * h));
            }
        }
        metric
    }
}

impl Default for QualityEvaluator {
    fn default() -> Self {
        Self::shape_only(QualityMeasure::default(), 0.3)
    }
}

// =============================================================================
// STATISTICS
// =============================================================================

/// Summary of element qualities over a mesh.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct QualityStats {
    /// Number of elements measured.
    pub elements: usize,
    /// Worst element quality.
    pub min_quality: f64,
    /// Mean element quality.
    pub mean_quality: f64,
    /// Best element quality.
    pub max_quality: f64,
    /// Elements in [`QualityBand::Bad`].
    pub bad: usize,
    /// Elements in [`QualityBand::Marginal`].
    pub marginal: usize,
    /// Elements in [`QualityBand::Acceptable`].
    pub acceptable: usize,
    /// Smallest planar or dihedral angle in degrees.
    pub min_angle_degrees: f64,
    /// Largest planar or dihedral angle in degrees.
    pub max_angle_degrees: f64,
}

impl QualityStats {
    /// Folds `(quality, band, (min_angle, max_angle))` samples.
    pub fn from_samples<I>(samples: I) -> Self
    where
        I: IntoIterator<Item = (f64, QualityBand, (f64, f64))>,
    {
        let mut stats = Self {
            min_quality: f64::INFINITY,
            max_quality: f64::NEG_INFINITY,
            min_angle_degrees: f64::INFINITY,
            max_angle_degrees: f64::NEG_INFINITY,
            ..Self::default()
        };
        let mut sum = 0.0;
        for (quality, band, (lo, hi)) in samples {
            stats.elements += 1;
            sum += quality;
            stats.min_quality = stats.min_quality.min(quality);
            stats.max_quality = stats.max_quality.max(quality);
            stats.min_angle_degrees = stats.min_angle_degrees.min(lo);
            stats.max_angle_degrees = stats.max_angle_degrees.max(hi);
            match band {
                QualityBand::Bad => stats.bad += 1,
                QualityBand::Marginal => stats.marginal += 1,
                QualityBand::Acceptable => stats.acceptable += 1,
            }
        }
        if stats.elements == 0 {
            return Self::default();
        }
        stats.mean_quality = sum / count_to_f64(stats.elements);
        stats
    }

    /// Elements below the threshold.
    #[must_use]
    pub const fn below_threshold(&self) -> usize {
        self.bad + self.marginal
    }
}

// =============================================================================
// TESTS
// =============================================================================
