//! Storage backend compatibility.
//!
//! Runs the same improvement workload against whichever `StorageMap` backend
//! the crate was built with:
//!
//! ```bash
//! cargo test --test storage_backend
//! cargo test --test storage_backend --features dense-slotmap
//! ```

use meliorate::prelude::*;

macro_rules! test_backend {
    ($dim:literal, $cells:expr) => {
        pastey::paste! {
            #[test]
            fn [<improve_round_trips_through_storage_ $dim d>]() {
                let input = jittered_box_mesh::<$dim>($cells, 1.0, 0.35, 42).unwrap();
                let (output, report) = improve(&input, 0.5, 500, &ImproveOptions::default()).unwrap();

                let mesh = Mesh::from_data(&output, BuildOptions::default()).unwrap();
                assert!(mesh.validate().is_ok());
                assert_eq!(mesh.number_of_elements(), report.elements_after);
                assert_eq!(mesh.number_of_vertices(), report.vertices_after);
                assert_eq!(mesh.to_data(), output);
            }

            #[test]
            fn [<rollback_reuses_released_slots_ $dim d>]() {
                let input = box_mesh::<$dim>($cells, 1.0).unwrap();
                let mut mesh = Mesh::from_data(&input, BuildOptions::default()).unwrap();
                let settings = OperatorSettings { preserve_boundary: false, ..OperatorSettings::default() };
                let keys: Vec<ElementKey> = mesh.element_keys().collect();
                let before = mesh.to_data();

                for key in keys {
                    if let Ok(proposal) = propose(&mesh, OperatorKind::Insertion, key, &settings) {
                        mesh.begin_edit().unwrap();
                        apply(&mut mesh, &proposal).unwrap();
                        mesh.rollback_edit().unwrap();
                    }
                }
                assert_eq!(mesh.to_data(), before);
                assert!(mesh.validate().is_ok());
            }
        }
    };
}

test_backend!(2, 4);
test_backend!(3, 2);
