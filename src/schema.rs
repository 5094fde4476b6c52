//! The mapping from session record fields to dataset variables.
//!
//! Each row of [`SESSION_SCHEMA`] names an output variable, the dimensions it
//! varies along, and the [`Rule`] producing it from the record. Variables are
//! written in table order.

use crate::dataset::Dim;

/// Field holding the mouse name.
pub const MOUSE_FIELD: &str = "mouse_name";
/// Field holding the session date.
pub const SESSION_DATE_FIELD: &str = "date_exp";
pub const BIN_SIZE_FIELD: &str = "bin_size";
pub const STIM_ONSET_FIELD: &str = "stim_onset";
/// Field naming the axes of [`CCF_FIELD`].
pub const CCF_AXES_FIELD: &str = "ccf_axes";
pub const CCF_FIELD: &str = "ccf";
/// The only accepted value of [`CCF_AXES_FIELD`].
pub const CCF_AXES: [&str; 3] = ["ap", "dv", "lr"];

/// Fields whose lengths are the active and passive trial counts.
pub const ACTIVE_TRIALS_SOURCE: &str = "contrast_left";
pub const PASSIVE_TRIALS_SOURCE: &str = "contrast_left_passive";
/// Field whose last axis is the number of time bins.
pub const TIME_SOURCE: &str = "wheel";
/// Field whose first axis is the number of cells.
pub const CELL_SOURCE: &str = "spks";

/// Element type a variable is stored with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Storage {
    /// Truncated toward zero, then wrapped modulo 256.
    Int8,
    Float64,
}

/// How a variable is built from record fields.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Rule {
    /// `active` then `passive` along `axis`, multiplied by `scale`. With a
    /// `channel`, that index of the leading axis is taken from both sources
    /// first. Leading unit axes beyond the variable's dimensions are dropped.
    Concat {
        active: &'static str,
        passive: &'static str,
        axis: usize,
        channel: Option<usize>,
        scale: f64,
        storage: Storage,
    },
    /// Active trial values, flattened (or one `column` of a 2-D source), then
    /// one NaN per passive trial.
    ActiveOnly {
        source: &'static str,
        column: Option<usize>,
    },
    /// A scalar repeated once per trial.
    Replicated { source: &'static str },
    /// A flag array copied as-is, whatever its length.
    Verbatim { source: &'static str },
    /// One value per cell.
    CellValues {
        source: &'static str,
        storage: Storage,
    },
    /// One column of a cells x k array.
    CellColumn { source: &'static str, column: usize },
    /// One label per cell.
    CellText { source: &'static str },
}

/// One output variable.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FieldSpec {
    pub target: &'static str,
    pub dims: &'static [Dim],
    pub rule: Rule,
}

const TRIAL: &[Dim] = &[Dim::Trial];
const TRIAL_TIME: &[Dim] = &[Dim::Trial, Dim::Time];
const CELL: &[Dim] = &[Dim::Cell];
const CELL_TRIAL_TIME: &[Dim] = &[Dim::Cell, Dim::Trial, Dim::Time];

const fn concat(
    target: &'static str,
    dims: &'static [Dim],
    active: &'static str,
    passive: &'static str,
    axis: usize,
    storage: Storage,
) -> FieldSpec {
    FieldSpec {
        target,
        dims,
        rule: Rule::Concat {
            active,
            passive,
            axis,
            channel: None,
            scale: 1.,
            storage,
        },
    }
}

const fn contrast(target: &'static str, active: &'static str, passive: &'static str) -> FieldSpec {
    FieldSpec {
        target,
        dims: TRIAL,
        rule: Rule::Concat {
            active,
            passive,
            axis: 0,
            channel: None,
            scale: 100.,
            storage: Storage::Int8,
        },
    }
}

const fn active_only(target: &'static str, source: &'static str, column: Option<usize>) -> FieldSpec {
    FieldSpec {
        target,
        dims: TRIAL,
        rule: Rule::ActiveOnly { source, column },
    }
}

const fn pupil(target: &'static str, channel: usize) -> FieldSpec {
    FieldSpec {
        target,
        dims: TRIAL_TIME,
        rule: Rule::Concat {
            active: "pupil",
            passive: "pupil_passive",
            axis: 0,
            channel: Some(channel),
            scale: 1.,
            storage: Storage::Float64,
        },
    }
}

const fn ccf(target: &'static str, column: usize) -> FieldSpec {
    FieldSpec {
        target,
        dims: CELL,
        rule: Rule::CellColumn {
            source: CCF_FIELD,
            column,
        },
    }
}

pub const SESSION_SCHEMA: &[FieldSpec] = &[
    // Stimulus and behavior per trial
    contrast("contrast_left", "contrast_left", "contrast_left_passive"),
    contrast("contrast_right", "contrast_right", "contrast_right_passive"),
    active_only("gocue", "gocue", None),
    FieldSpec {
        target: "stim_onset",
        dims: TRIAL,
        rule: Rule::Replicated {
            source: STIM_ONSET_FIELD,
        },
    },
    active_only("feedback_type", "feedback_type", None),
    active_only("feedback_time", "feedback_time", None),
    active_only("response_type", "response", None),
    active_only("response_time", "response_time", None),
    active_only("reaction_type", "reaction_time", Some(1)),
    active_only("reaction_time", "reaction_time", Some(0)),
    active_only("prev_reward", "prev_reward", None),
    FieldSpec {
        target: "active_trials",
        dims: TRIAL,
        rule: Rule::Verbatim {
            source: "active_trials",
        },
    },
    // Traces
    concat("wheel", TRIAL_TIME, "wheel", "wheel_passive", 0, Storage::Int8),
    concat("licks", TRIAL_TIME, "licks", "licks_passive", 0, Storage::Int8),
    pupil("pupil_x", 0),
    pupil("pupil_y", 1),
    pupil("pupil_area", 2),
    concat("face", TRIAL_TIME, "face", "face_passive", 0, Storage::Float64),
    // Cells
    concat("spks", CELL_TRIAL_TIME, "spks", "spks_passive", 1, Storage::Int8),
    FieldSpec {
        target: "trough_to_peak",
        dims: CELL,
        rule: Rule::CellValues {
            source: "trough_to_peak",
            storage: Storage::Int8,
        },
    },
    ccf("ccf_ap", 0),
    ccf("ccf_dv", 1),
    ccf("ccf_lr", 2),
    FieldSpec {
        target: "brain_area",
        dims: CELL,
        rule: Rule::CellText {
            source: "brain_area",
        },
    },
];
