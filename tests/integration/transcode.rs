use crate::{gocue, sample_record};
use ndarray::prelude::*;
use steinmetz_convert::{transcode, Coordinate, Dim, RecordError, TranscodeError};

#[test]
fn two_active_one_passive() {
    let dataset = transcode(&sample_record(2, 1, 3, 2)).unwrap();

    assert_eq!(dataset.identity.mouse, "Cori");
    assert_eq!(dataset.identity.session_date, "2016-12-14");
    assert_eq!(
        dataset.coord(Dim::Trial),
        Some(&Coordinate::Int64(array![1, 2, 3]))
    );
    assert_eq!(
        dataset.coord(Dim::Cell),
        Some(&Coordinate::Int64(array![1, 2]))
    );
    match dataset.coord(Dim::Time) {
        Some(Coordinate::Float64(time)) => {
            assert_eq!(time.len(), 3);
            for (t, expected) in time.iter().zip([0.01, 0.02, 0.03]) {
                assert!((t - expected).abs() < 1e-12, "{} != {}", t, expected);
            }
        }
        other => panic!("unexpected time coordinate {:?}", other),
    }

    let gocue_values = dataset.variable("gocue").unwrap().data.as_f64().unwrap();
    assert_eq!(gocue_values.shape(), &[3]);
    assert_eq!(gocue_values[[0]], gocue(0));
    assert_eq!(gocue_values[[1]], gocue(1));
    assert!(gocue_values[[2]].is_nan());

    assert_eq!(dataset.attr("bin_size"), Some(0.01));
    assert_eq!(dataset.attr("stim_onset"), Some(0.5));
    assert!(dataset.size_conflicts().is_empty());
}

#[test]
fn variables_follow_the_session_layout() {
    let dataset = transcode(&sample_record(2, 1, 3, 2)).unwrap();
    let names: Vec<_> = dataset.variables.iter().map(|var| var.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "contrast_left",
            "contrast_right",
            "gocue",
            "stim_onset",
            "feedback_type",
            "feedback_time",
            "response_type",
            "response_time",
            "reaction_type",
            "reaction_time",
            "prev_reward",
            "active_trials",
            "wheel",
            "licks",
            "pupil_x",
            "pupil_y",
            "pupil_area",
            "face",
            "spks",
            "trough_to_peak",
            "ccf_ap",
            "ccf_dv",
            "ccf_lr",
            "brain_area",
        ]
    );

    let spks = dataset.variable("spks").unwrap();
    assert_eq!(spks.dims, vec![Dim::Cell, Dim::Trial, Dim::Time]);
    assert_eq!(spks.data.shape(), &[2, 3, 3]);
    // Passive trials follow the active ones along the trial axis.
    let spks = spks.data.as_i8().unwrap();
    assert_eq!(spks[[0, 2, 0]], 1);
    assert_eq!(spks[[1, 0, 2]], 3);

    let wheel = dataset.variable("wheel").unwrap();
    assert_eq!(wheel.dims, vec![Dim::Trial, Dim::Time]);
    assert_eq!(
        wheel.data.as_i8().unwrap(),
        &array![[0, 1, 2], [10, 11, 12], [50, 51, 52]].into_dyn()
    );

    let pupil_y = dataset.variable("pupil_y").unwrap().data.as_f64().unwrap();
    assert_eq!(pupil_y[[1, 2]], 100.5 + 12.);
}

#[test]
fn contrasts_are_scaled_percentages() {
    let dataset = transcode(&sample_record(2, 1, 3, 2)).unwrap();
    assert_eq!(
        dataset.variable("contrast_left").unwrap().data.as_i8().unwrap(),
        &array![0, 25, 0].into_dyn()
    );
    assert_eq!(
        dataset.variable("contrast_right").unwrap().data.as_i8().unwrap(),
        &array![25, 50, 25].into_dyn()
    );
}

#[test]
fn spike_counts_wrap_into_int8() {
    let mut spks = Array::from_elem(IxDyn(&[2, 2, 3]), 1.);
    spks[[0, 0, 0]] = 200.;
    spks[[1, 1, 2]] = -129.5;
    let mut spks_passive = Array::from_elem(IxDyn(&[2, 1, 3]), 0i64);
    spks_passive[[0, 0, 1]] = 300;
    let record = sample_record(2, 1, 3, 2)
        .with("spks", spks)
        .with("spks_passive", spks_passive);

    let dataset = transcode(&record).unwrap();
    let spks = dataset.variable("spks").unwrap().data.as_i8().unwrap();
    assert_eq!(spks[[0, 0, 0]], -56);
    assert_eq!(spks[[1, 1, 2]], 127);
    assert_eq!(spks[[0, 2, 1]], 44);
    assert_eq!(spks[[0, 0, 1]], 1);
}

#[test]
fn active_only_variables_end_with_nan() {
    let dataset = transcode(&sample_record(3, 4, 2, 1)).unwrap();
    for name in [
        "gocue",
        "feedback_type",
        "feedback_time",
        "response_type",
        "response_time",
        "reaction_type",
        "reaction_time",
        "prev_reward",
    ] {
        let values = dataset.variable(name).unwrap().data.as_f64().unwrap();
        assert_eq!(values.len(), 7, "{}", name);
        assert!(values.iter().take(3).all(|x| !x.is_nan()), "{}", name);
        assert!(values.iter().skip(3).all(|x| x.is_nan()), "{}", name);
    }
    let reaction_time = dataset.variable("reaction_time").unwrap().data.as_f64().unwrap();
    assert_eq!(reaction_time[[2]], 202.);
    let reaction_type = dataset.variable("reaction_type").unwrap().data.as_f64().unwrap();
    assert_eq!(reaction_type[[0]], 1.);

    let stim_onset = dataset.variable("stim_onset").unwrap().data.as_f64().unwrap();
    assert_eq!(stim_onset, &ArrayD::from_elem(IxDyn(&[7]), 0.5));
}

#[test]
fn cell_variables() {
    let dataset = transcode(&sample_record(1, 1, 2, 3)).unwrap();
    assert_eq!(
        dataset.variable("ccf_dv").unwrap().data.as_f64().unwrap(),
        &array![1., 1001., 2001.].into_dyn()
    );
    assert_eq!(
        dataset.variable("trough_to_peak").unwrap().data.as_i8().unwrap(),
        &array![10, 11, 12].into_dyn()
    );
    let areas = dataset.variable("brain_area").unwrap();
    assert_eq!(areas.dims, vec![Dim::Cell]);
    assert_eq!(
        areas.data.as_text().unwrap(),
        &array!["VISp".to_owned(), "CA1".to_owned(), "root".to_owned()].into_dyn()
    );
}

#[test]
fn active_trials_are_copied_verbatim() {
    let record = sample_record(2, 1, 3, 2).with("active_trials", array![true, false].into_dyn());
    let dataset = transcode(&record).unwrap();
    assert_eq!(
        dataset.variable("active_trials").unwrap().data.as_bool().unwrap(),
        &array![true, false].into_dyn()
    );
    assert_eq!(dataset.size_conflicts().len(), 1);
}

#[test]
fn reject_unexpected_ccf_axes() {
    let record = sample_record(2, 1, 3, 2).with(
        "ccf_axes",
        array!["dv".to_owned(), "ap".to_owned(), "lr".to_owned()].into_dyn(),
    );
    assert_eq!(
        transcode(&record).unwrap_err(),
        TranscodeError::CcfAxes(vec!["dv".into(), "ap".into(), "lr".into()])
    );
}

#[test]
fn reject_missing_field() {
    let mut record = sample_record(2, 1, 3, 2);
    record.remove("prev_reward");
    assert_eq!(
        transcode(&record).unwrap_err(),
        TranscodeError::Record(RecordError::MissingField("prev_reward".into()))
    );
}

#[test]
fn reject_mismatched_passive_shape() {
    let record = sample_record(2, 1, 3, 2).with(
        "spks_passive",
        ArrayD::<f64>::zeros(IxDyn(&[2, 1, 4])),
    );
    assert!(matches!(
        transcode(&record),
        Err(TranscodeError::Shape { field: "spks", .. })
    ));
}

#[test]
fn reject_conflicting_cell_counts() {
    let record =
        sample_record(2, 1, 3, 2).with("trough_to_peak", array![1., 2., 3.].into_dyn());
    match transcode(&record) {
        Err(TranscodeError::Conflict(conflict)) => {
            assert_eq!(conflict.dim, Dim::Cell);
            assert!(conflict.sizes.contains(&("trough_to_peak".to_owned(), 3)));
        }
        other => panic!("expected a size conflict, got {:?}", other),
    }
}
