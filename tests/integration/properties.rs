use crate::sample_record;
use ndarray::prelude::*;
use proptest::prelude::*;
use steinmetz_convert::transcode::{pad_and_concatenate, Tail};
use steinmetz_convert::{transcode, Coordinate, Dim};

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn trial_dimension_counts_active_then_passive(
        active in 0usize..6,
        passive in 0usize..6,
        time in 1usize..5,
        cells in 1usize..4,
    ) {
        let dataset = transcode(&sample_record(active, passive, time, cells)).unwrap();
        let trials = active + passive;

        prop_assert_eq!(
            dataset.coord(Dim::Trial),
            Some(&Coordinate::counting(trials))
        );
        prop_assert_eq!(dataset.dim_len(Dim::Time), Some(time));
        prop_assert_eq!(dataset.dim_len(Dim::Cell), Some(cells));
        prop_assert!(dataset.size_conflicts().is_empty());

        for var in &dataset.variables {
            if let Some(axis) = var.dims.iter().position(|&dim| dim == Dim::Trial) {
                prop_assert_eq!(var.data.shape()[axis], trials, "{}", &var.name);
            }
        }

        let gocue = dataset.variable("gocue").unwrap().data.as_f64().unwrap();
        prop_assert!(gocue.iter().take(active).all(|x| !x.is_nan()));
        prop_assert!(gocue.iter().skip(active).all(|x| x.is_nan()));
    }

    #[test]
    fn time_coordinate_steps_by_bin_size(time in 1usize..200, bin in 0.001f64..1.) {
        let record = sample_record(1, 1, time, 1).with("bin_size", bin);
        let dataset = transcode(&record).unwrap();
        match dataset.coord(Dim::Time) {
            Some(Coordinate::Float64(values)) => {
                prop_assert_eq!(values.len(), time);
                for (i, t) in values.iter().enumerate() {
                    prop_assert!((t - (i + 1) as f64 * bin).abs() < 1e-9);
                }
            }
            other => prop_assert!(false, "unexpected time coordinate {:?}", other),
        }
    }

    #[test]
    fn padding_keeps_the_head(
        head in proptest::collection::vec(-1e6f64..1e6, 0..20),
        len in 0usize..20,
    ) {
        let head = Array1::from(head).into_dyn();
        let out = pad_and_concatenate(
            head.view(),
            Tail::Fill { len, value: f64::NAN },
            Axis(0),
        )
        .unwrap();
        prop_assert_eq!(out.len(), head.len() + len);
        prop_assert!(out.iter().zip(head.iter()).all(|(a, b)| a == b));
        prop_assert!(out.iter().skip(head.len()).all(|x| x.is_nan()));
    }
}
