//! Property-based tests for the invariants of committed meshes.
//!
//! This module uses proptest on jittered structured meshes to verify:
//! - Every output mesh passes full validation (neighbor symmetry, shared
//!   facets, exact positive orientation, anchors)
//! - The minimum element quality never decreases across a committed edit
//! - With `preserve_boundary`, boundary facets and their positions are kept
//! - Rolling back any applied proposal restores the exact previous mesh

use meliorate::prelude::*;
use proptest::prelude::*;

// =============================================================================
// TEST CONFIGURATION
// =============================================================================

/// Element tuples plus neighbor links, keyed, for exact state comparison.
type Snapshot = Vec<(ElementKey, Vec<VertexKey>, Vec<Option<ElementKey>>)>;

fn snapshot<const D: usize>(mesh: &Mesh<D>) -> Snapshot {
    mesh.elements()
        .map(|(key, e)| (key, e.vertices().to_vec(), e.neighbors().to_vec()))
        .collect()
}

fn checked_options() -> ImproveOptions {
    ImproveOptions {
        self_check: SelfCheck::EveryStep,
        ..ImproveOptions::default()
    }
}

fn cells_for(dim: usize) -> std::ops::RangeInclusive<usize> {
    if dim == 2 { 2..=5 } else { 1..=2 }
}

// =============================================================================
// RUN INVARIANTS
// =============================================================================

macro_rules! gen_run_invariants {
    ($dim:literal) => {
        pastey::paste! {
            proptest! {
                #![proptest_config(ProptestConfig::with_cases(if $dim == 2 { 24 } else { 8 }))]

                #[test]
                fn [<prop_output_is_valid_and_no_worse_ $dim d>](
                    cells in cells_for($dim),
                    jitter in 0.0..0.45_f64,
                    seed in any::<u64>(),
                    threshold in 0.2..0.9_f64,
                ) {
                    let input = jittered_box_mesh::<$dim>(cells, 1.0, jitter, seed).unwrap();
                    let before = Mesh::from_data(&input, BuildOptions::default()).unwrap();
                    let (output, report) = improve(&input, threshold, 200, &checked_options()).unwrap();

                    let mesh = Mesh::from_data(&output, BuildOptions::default());
                    prop_assert!(mesh.is_ok(), "output does not rebuild: {:?}", mesh.err());
                    let mesh = mesh.unwrap();
                    prop_assert!(mesh.validate().is_ok());
                    prop_assert!(report.final_quality.min_quality >= report.initial_quality.min_quality);
                    prop_assert_eq!(mesh.boundary_signature(), before.boundary_signature());
                    prop_assert_eq!(report.elements_after, output.elements.len());
                    prop_assert_eq!(report.vertices_after, output.vertices.len());
                    prop_assert_eq!(report.unresolved_elements == 0, report.converged());
                }

                #[test]
                fn [<prop_min_quality_is_monotone_per_commit_ $dim d>](
                    jitter in 0.2..0.45_f64,
                    seed in any::<u64>(),
                ) {
                    let input = jittered_box_mesh::<$dim>(2, 1.0, jitter, seed).unwrap();
                    let options = ImproveOptions {
                        max_edits_per_run: Some(1),
                        preserve_boundary: false,
                        ..checked_options()
                    };
                    let mut improver = Improver::from_data(&input, 0.9, options).unwrap();
                    let mut previous = improver.mesh().clone().min_quality().unwrap();
                    for _ in 0..6 {
                        let report = improver.run(50, None).unwrap();
                        let current = improver.mesh().clone().min_quality().unwrap();
                        prop_assert!(current >= previous, "{current} < {previous}");
                        prop_assert!(improver.mesh().validate().is_ok());
                        if report.edits == 0 {
                            break;
                        }
                        previous = current;
                    }
                }

                #[test]
                fn [<prop_rollback_restores_exact_state_ $dim d>](
                    jitter in 0.0..0.45_f64,
                    seed in any::<u64>(),
                    pick in any::<prop::sample::Index>(),
                    operator in 0..4_usize,
                    preserve_boundary in any::<bool>(),
                ) {
                    let input = jittered_box_mesh::<$dim>(2, 1.0, jitter, seed).unwrap();
                    let mut mesh = Mesh::from_data(&input, BuildOptions::default()).unwrap();
                    let keys: Vec<ElementKey> = mesh.element_keys().collect();
                    let element = keys[pick.index(keys.len())];
                    let settings = OperatorSettings { preserve_boundary, ..OperatorSettings::default() };
                    let kind = OperatorKind::ALL[operator];

                    let data = mesh.to_data();
                    let links = snapshot(&mesh);
                    if let Ok(proposal) = propose(&mesh, kind, element, &settings) {
                        mesh.begin_edit().unwrap();
                        apply(&mut mesh, &proposal).unwrap();
                        mesh.rollback_edit().unwrap();
                    }
                    prop_assert_eq!(mesh.to_data(), data);
                    prop_assert_eq!(snapshot(&mesh), links);
                    prop_assert!(mesh.validate().is_ok());
                }
            }
        }
    };
}

gen_run_invariants!(2);
gen_run_invariants!(3);

// =============================================================================
// IDEMPOTENCE
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_converged_mesh_needs_no_edits(
        seed in any::<u64>(),
        jitter in 0.0..0.4_f64,
    ) {
        let input = jittered_box_mesh::<2>(3, 1.0, jitter, seed).unwrap();
        let (output, report) = improve(&input, 0.3, 500, &ImproveOptions::default()).unwrap();
        prop_assume!(report.converged());
        let (again, second) = improve(&output, 0.3, 500, &ImproveOptions::default()).unwrap();
        prop_assert_eq!(second.edits, 0);
        prop_assert_eq!(second.iterations, 0);
        prop_assert_eq!(again, output);
    }
}
