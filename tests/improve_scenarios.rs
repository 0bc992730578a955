//! End-to-end scenarios for the improvement driver.
//!
//! Each test builds a small mesh by hand, runs [`improve`] or an
//! [`Improver`], and checks the outcome against hand-computed geometry.

use approx::assert_relative_eq;
use meliorate::prelude::*;
use std::sync::atomic::AtomicBool;

// =============================================================================
// FIXTURES
// =============================================================================

/// Three tetrahedra around the edge `a = (0,0,1)`, `b = (0,0,-1)`. The ring
/// vertices at 0° and about 177° make one of them nearly flat.
fn sliver_fan() -> MeshData<3> {
    MeshData::from_positions(
        &[
            [0.0, 0.0, 1.0],
            [0.0, 0.0, -1.0],
            [1.0, 0.0, 0.0],
            [-1.0, 0.05, 0.0],
            [0.0, -1.0, 0.0],
        ],
        vec![vec![0, 1, 2, 3], vec![0, 1, 3, 4], vec![0, 1, 4, 2]],
    )
}

/// Regular hexagon of radius 1 around an interior vertex at `center`.
fn hexagon(center: [f64; 2]) -> MeshData<2> {
    let mut positions = vec![center];
    for i in 0..6_u32 {
        let angle = std::f64::consts::FRAC_PI_3 * f64::from(i);
        positions.push([angle.cos(), angle.sin()]);
    }
    let elements = (0..6).map(|i| vec![0, 1 + i, 1 + (i + 1) % 6]).collect();
    MeshData::from_positions(&positions, elements)
}

/// `data` as the mesh reports it back, with boundary flags filled in.
fn canonical<const D: usize>(data: &MeshData<D>) -> MeshData<D> {
    Mesh::from_data(data, BuildOptions::default()).unwrap().to_data()
}

fn reoriented() -> ImproveOptions {
    ImproveOptions {
        reorient_input: true,
        self_check: SelfCheck::EveryStep,
        ..ImproveOptions::default()
    }
}

// =============================================================================
// SCENARIOS
// =============================================================================

#[test]
fn sliver_is_replaced_by_a_well_shaped_pair() {
    let input = sliver_fan();
    let (output, report) = improve(&input, 0.5, 50, &reoriented()).unwrap();

    assert!(report.initial_quality.min_quality < 0.05);
    assert_eq!(report.commits(OperatorKind::Flip), 1);
    assert_eq!(report.elements_after, 2);
    assert!(report.converged());
    assert_relative_eq!(report.final_quality.min_quality, 0.866_025, epsilon = 1e-5);

    // Flips never move vertices.
    let before: Vec<_> = input.vertices.iter().map(|v| v.position).collect();
    let after: Vec<_> = output.vertices.iter().map(|v| v.position).collect();
    assert_eq!(before, after);

    let mesh = Mesh::from_data(&output, BuildOptions::default()).unwrap();
    assert!(mesh.validate().is_ok());
}

#[test]
fn displaced_center_is_smoothed_back() {
    let options = ImproveOptions {
        enable_flips: false,
        enable_insertion: false,
        enable_removal: false,
        ..ImproveOptions::default()
    };
    let (output, report) = improve(&hexagon([0.45, 0.2]), 0.9, 100, &options).unwrap();

    assert!(report.commits(OperatorKind::Smoothing) >= 1);
    assert!(report.final_quality.min_quality > report.initial_quality.min_quality);
    let center = output.vertices[0].position;
    assert!(center.norm() < 0.2, "center stayed at {center:?}");
    // Boundary vertices of the hexagon never move.
    let ring: Vec<_> = hexagon([0.0, 0.0]).vertices[1..].iter().map(|v| v.position).collect();
    let moved: Vec<_> = output.vertices[1..].iter().map(|v| v.position).collect();
    assert_eq!(moved, ring);
}

#[test]
fn inverting_target_is_rejected_by_smoothing() {
    let mesh = Mesh::from_data(&hexagon([0.0, 0.0]), BuildOptions::default()).unwrap();
    let center = mesh.vertices().next().unwrap().0;
    let settings = OperatorSettings::default();
    assert_eq!(
        meliorate::core::algorithms::smoothing::plan_relocation(
            &mesh,
            center,
            Point::new([1.2, 0.0]),
            &settings,
        )
        .err(),
        Some(OperatorRejection::Inverted)
    );
}

#[test]
fn zero_iterations_leave_the_mesh_untouched() {
    let input = jittered_box_mesh::<3>(2, 1.0, 0.3, 11).unwrap();
    let (output, report) = improve(&input, 0.9, 0, &ImproveOptions::default()).unwrap();
    assert_eq!(output, canonical(&input));
    assert_eq!(report.edits, 0);
    assert_eq!(report.status, ImprovementStatus::NonConvergence);
    assert_eq!(report.initial_quality, report.final_quality);
}

#[test]
fn converged_output_needs_no_further_edits() {
    let input = jittered_box_mesh::<2>(5, 1.0, 0.35, 3).unwrap();
    let options = ImproveOptions::default();
    let (first, report) = improve(&input, 0.35, 2_000, &options).unwrap();
    assert!(report.final_quality.min_quality >= report.initial_quality.min_quality);
    if report.converged() {
        let (second, again) = improve(&first, 0.35, 2_000, &options).unwrap();
        assert_eq!(again.edits, 0);
        assert_eq!(second, first);
    }
}

#[test]
fn boundary_is_preserved_by_default() {
    let input = jittered_box_mesh::<3>(3, 2.0, 0.3, 5).unwrap();
    let before = Mesh::from_data(&input, BuildOptions::default())
        .unwrap()
        .boundary_signature();
    let (output, _) = improve(&input, 0.6, 300, &ImproveOptions::default()).unwrap();
    let mesh = Mesh::from_data(&output, BuildOptions::default()).unwrap();
    assert_eq!(mesh.boundary_signature(), before);
    assert!(mesh.validate().is_ok());
}

#[test]
fn size_field_and_anisotropy_drive_the_run() {
    let metric = MetricTensor::from_rows([[4.0, 1.0], [1.0, 2.0]]).unwrap();
    let target = |p: &Point<2>| 0.05 + 0.05 * p.coords()[0];
    let mut input = jittered_box_mesh::<2>(3, 1.0, 0.15, 17).unwrap();
    input.vertices = input
        .vertices
        .into_iter()
        .map(|v| {
            let h = target(&v.position);
            v.with_size(h).with_metric(metric.clone())
        })
        .collect();

    // Vertices keep their attributes only if they never move.
    let options = ImproveOptions {
        target_size_field: true,
        anisotropy: true,
        enable_smoothing: false,
        self_check: SelfCheck::EveryStep,
        ..ImproveOptions::default()
    };
    let (output, report) = improve(&input, 0.6, 200, &options).unwrap();

    // Every edge is far longer than its target, so no element scores well.
    assert!(report.initial_quality.max_quality < 0.5);
    assert!(report.final_quality.min_quality >= report.initial_quality.min_quality);
    assert!(Mesh::from_data(&output, BuildOptions::default()).unwrap().validate().is_ok());

    // A linear size field and a constant tensor survive barycentric
    // interpolation onto inserted vertices.
    for record in &output.vertices {
        let size = record.size.unwrap();
        assert_relative_eq!(size, target(&record.position), max_relative = 1e-9);
        let m = record.metric.as_ref().unwrap();
        for row in 0..2 {
            for col in 0..2 {
                assert_relative_eq!(m.get(row, col), metric.get(row, col), max_relative = 1e-9);
            }
        }
    }
}

#[test]
fn fixed_vertices_never_move() {
    let mut input = hexagon([0.45, 0.2]);
    input.vertices[0].fixed = true;

    // Smoothing alone has nothing it may move.
    let smoothing_only = ImproveOptions {
        enable_insertion: false,
        enable_removal: false,
        ..ImproveOptions::default()
    };
    let (output, report) = improve(&input, 0.9, 100, &smoothing_only).unwrap();
    assert_eq!(output.vertices[0].position, input.vertices[0].position);
    assert!(output.vertices[0].fixed);
    assert_eq!(report.commits(OperatorKind::Smoothing), 0);

    // With every operator on, new interior vertices may move but the fixed
    // one may not.
    let (output, report) = improve(&input, 0.9, 100, &ImproveOptions::default()).unwrap();
    assert_eq!(output.vertices[0].position, input.vertices[0].position);
    assert!(output.vertices[0].fixed);
    assert!(report.final_quality.min_quality >= report.initial_quality.min_quality);
}

#[test]
fn cancelled_run_returns_a_valid_mesh() {
    let input = jittered_box_mesh::<2>(4, 1.0, 0.3, 9).unwrap();
    let cancel = AtomicBool::new(true);
    let mut improver = Improver::from_data(&input, 0.8, ImproveOptions::default()).unwrap();
    let report = improver.run(1_000, Some(&cancel)).unwrap();
    assert_eq!(report.status, ImprovementStatus::Cancelled);
    assert_eq!(report.stop_reason, StopReason::Cancelled);
    assert!(!improver.mesh().has_open_edit());
    assert!(improver.mesh().validate().is_ok());
    assert_eq!(improver.into_mesh().to_data(), canonical(&input));
}

#[test]
fn degenerate_input_is_fatal() {
    let input = MeshData::from_positions(
        &[[0.0, 0.0], [1.0, 0.0], [2.0, 0.0], [0.0, 1.0]],
        vec![vec![0, 1, 2], vec![0, 2, 3]],
    );
    let result = improve(&input, 0.5, 10, &ImproveOptions::default());
    assert!(matches!(
        result,
        Err(ImproveError::DegenerateInput { orientation, .. })
            if orientation == Orientation::DEGENERATE
    ));
}

#[test]
fn options_and_report_round_trip_through_json() {
    let options = ImproveOptionsBuilder::default()
        .preserve_boundary(false)
        .max_edits_per_run(25_usize)
        .quality_measure(QualityMeasure::RadiusRatio)
        .build()
        .unwrap();
    let json = serde_json::to_string(&options).unwrap();
    let back: ImproveOptions = serde_json::from_str(&json).unwrap();
    assert_eq!(back, options);

    let input = jittered_box_mesh::<2>(3, 1.0, 0.3, 1).unwrap();
    let (output, report) = improve(&input, 0.5, 100, &options).unwrap();
    let json = serde_json::to_string(&report).unwrap();
    let back: ImprovementReport = serde_json::from_str(&json).unwrap();
    assert_eq!(back, report);

    let json = serde_json::to_string(&output).unwrap();
    let back: MeshData<2> = serde_json::from_str(&json).unwrap();
    assert_eq!(back, output);
}
