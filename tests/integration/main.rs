//! Integration tests.

use ndarray::prelude::*;
use steinmetz_convert::SessionRecord;

mod fetch;
mod properties;
mod store;
mod transcode;

/// Gocue value of active trial `i` in [`sample_record`].
pub fn gocue(i: usize) -> f64 {
    0.5 + i as f64 / 10.
}

/// A session record shaped like the raw archives, with `active` active
/// trials, `passive` passive trials, `time` bins and `cells` cells.
pub fn sample_record(active: usize, passive: usize, time: usize, cells: usize) -> SessionRecord {
    let trials = active + passive;
    let trace = |channels: usize, n: usize, offset: f64| {
        Array::from_shape_fn((channels, n, time), |(c, i, t)| {
            offset + (c * 100 + i * 10 + t) as f64
        })
        .into_dyn()
    };
    let spikes = |n: usize, offset: usize| {
        Array::from_shape_fn((cells, n, time), |(c, i, t)| ((c + i + offset + t) % 4) as f64)
            .into_dyn()
    };
    let contrasts =
        |n: usize, k: usize| Array::from_shape_fn(n, |i| [0., 0.25, 0.5, 1.][(i + k) % 4]).into_dyn();
    let per_active = |offset: f64| Array::from_shape_fn(active, |i| offset + i as f64).into_dyn();

    SessionRecord::new()
        .with("mouse_name", "Cori")
        .with("date_exp", "2016-12-14")
        .with("bin_size", 0.01)
        .with("stim_onset", 0.5)
        .with("contrast_left", contrasts(active, 0))
        .with("contrast_left_passive", contrasts(passive, 0))
        .with("contrast_right", contrasts(active, 1))
        .with("contrast_right_passive", contrasts(passive, 1))
        .with(
            "gocue",
            Array::from_shape_fn((active, 1), |(i, _)| gocue(i)).into_dyn(),
        )
        .with("feedback_type", per_active(1.))
        .with("feedback_time", per_active(1.2))
        .with("response", per_active(-1.))
        .with("response_time", per_active(1.1))
        .with(
            "reaction_time",
            Array::from_shape_fn((active, 2), |(i, j)| if j == 0 { 200. + i as f64 } else { 1. })
                .into_dyn(),
        )
        .with("prev_reward", per_active(0.3))
        .with(
            "active_trials",
            Array::from_shape_fn(trials, |i| i < active).into_dyn(),
        )
        .with("wheel", trace(1, active, 0.))
        .with("wheel_passive", trace(1, passive, 50.))
        .with("licks", trace(1, active, 0.).mapv(|x| x % 2.))
        .with("licks_passive", trace(1, passive, 0.).mapv(|x| x % 2.))
        .with("pupil", trace(3, active, 0.5))
        .with("pupil_passive", trace(3, passive, 0.5))
        .with("face", trace(1, active, 0.25))
        .with("face_passive", trace(1, passive, 0.25))
        .with("spks", spikes(active, 0))
        .with("spks_passive", spikes(passive, 1))
        .with(
            "trough_to_peak",
            Array::from_shape_fn(cells, |c| 10. + c as f64).into_dyn(),
        )
        .with(
            "ccf",
            Array::from_shape_fn((cells, 3), |(c, axis)| (c * 1000 + axis) as f64).into_dyn(),
        )
        .with(
            "ccf_axes",
            array!["ap".to_owned(), "dv".to_owned(), "lr".to_owned()].into_dyn(),
        )
        .with(
            "brain_area",
            Array::from_shape_fn(cells, |c| ["VISp", "CA1", "root"][c % 3].to_owned()).into_dyn(),
        )
}
