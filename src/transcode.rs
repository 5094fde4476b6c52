//! Turning a session record into a labeled dataset.

use crate::dataset::{
    Coordinate, Dim, LabeledDataset, SessionIdentity, SizeConflict, Variable, VariableData,
};
use crate::record::{RecordError, SessionRecord};
use crate::schema::{self, FieldSpec, Rule, Storage, SESSION_SCHEMA};
use ndarray::prelude::*;
use ndarray::{ErrorKind, ShapeError};
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt;
use tracing::{debug, warn};

/// An error transcoding a session record.
#[derive(Debug, Clone, PartialEq)]
pub enum TranscodeError {
    /// The anatomical axes are not `['ap', 'dv', 'lr']`.
    CcfAxes(Vec<String>),
    Record(RecordError),
    /// A source array does not have the shape its variable needs.
    Shape {
        field: &'static str,
        detail: String,
    },
    /// Variables disagree on the length of a dimension.
    Conflict(SizeConflict),
}

impl Error for TranscodeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            TranscodeError::Record(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for TranscodeError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            TranscodeError::CcfAxes(found) => write!(
                f,
                "'{}' must be {:?}, found {:?}",
                schema::CCF_AXES_FIELD,
                schema::CCF_AXES,
                found
            ),
            TranscodeError::Record(err) => write!(f, "{}", err),
            TranscodeError::Shape { field, detail } => {
                write!(f, "cannot build '{}': {}", field, detail)
            }
            TranscodeError::Conflict(conflict) => write!(
                f,
                "conflicting sizes for dimension '{}': {:?}",
                conflict.dim, conflict.sizes
            ),
        }
    }
}

impl From<RecordError> for TranscodeError {
    fn from(err: RecordError) -> TranscodeError {
        TranscodeError::Record(err)
    }
}

fn shape_error(field: &'static str, detail: impl fmt::Display) -> TranscodeError {
    TranscodeError::Shape {
        field,
        detail: detail.to_string(),
    }
}

/// What follows the head of a [`pad_and_concatenate`].
pub enum Tail<'a, A> {
    /// Another array with the same shape apart from the concatenation axis.
    Values(ArrayViewD<'a, A>),
    /// `len` copies of `value` along the concatenation axis.
    Fill { len: usize, value: A },
}

/// Appends `tail` to `head` along `axis`.
pub fn pad_and_concatenate<A: Clone>(
    head: ArrayViewD<'_, A>,
    tail: Tail<'_, A>,
    axis: Axis,
) -> Result<ArrayD<A>, ShapeError> {
    if axis.index() >= head.ndim() {
        return Err(ShapeError::from_kind(ErrorKind::OutOfBounds));
    }
    match tail {
        Tail::Values(tail) => ndarray::concatenate(axis, &[head.view(), tail.view()]),
        Tail::Fill { len, value } => {
            let mut shape = head.shape().to_vec();
            shape[axis.index()] = len;
            let pad = ArrayD::from_elem(shape, value);
            ndarray::concatenate(axis, &[head.view(), pad.view()])
        }
    }
}

/// Removes leading unit axes until `view` has `ndim` axes.
fn drop_leading_units<A>(mut view: ArrayViewD<'_, A>, ndim: usize) -> ArrayViewD<'_, A> {
    while view.ndim() > ndim && view.shape()[0] == 1 {
        view = view.index_axis_move(Axis(0), 0);
    }
    view
}

fn flatten<A: Clone>(view: ArrayViewD<'_, A>) -> ArrayD<A> {
    view.iter().cloned().collect::<Array1<A>>().into_dyn()
}

/// Active and passive trial counts of a record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TrialCounts {
    pub active: usize,
    pub passive: usize,
}

impl TrialCounts {
    pub fn of(record: &SessionRecord) -> Result<TrialCounts, RecordError> {
        Ok(TrialCounts {
            active: record.shape(schema::ACTIVE_TRIALS_SOURCE)?.iter().product(),
            passive: record.shape(schema::PASSIVE_TRIALS_SOURCE)?.iter().product(),
        })
    }

    pub fn total(&self) -> usize {
        self.active + self.passive
    }
}

fn check_ccf_axes(record: &SessionRecord) -> Result<(), TranscodeError> {
    let axes = record.texts(schema::CCF_AXES_FIELD)?;
    if axes.ndim() != 1 || !axes.iter().map(String::as_str).eq(schema::CCF_AXES) {
        return Err(TranscodeError::CcfAxes(axes.iter().cloned().collect()));
    }
    Ok(())
}

/// A numeric field as `f64`, multiplied by `scale`.
fn floats_scaled(
    record: &SessionRecord,
    name: &str,
    scale: f64,
) -> Result<ArrayD<f64>, RecordError> {
    let values = record.floats(name)?;
    Ok(if scale == 1. {
        values
    } else {
        values.mapv_into(|x| x * scale)
    })
}

fn concat_parts<A: Clone>(
    spec: &FieldSpec,
    active: &ArrayD<A>,
    passive: &ArrayD<A>,
    channel: Option<usize>,
    axis: Axis,
) -> Result<ArrayD<A>, TranscodeError> {
    let active = trial_part(spec, active.view(), channel)?;
    let passive = trial_part(spec, passive.view(), channel)?;
    pad_and_concatenate(active, Tail::Values(passive), axis)
        .map_err(|err| shape_error(spec.target, err))
}

/// Drops leading unit axes of a per-cell source and checks what remains.
fn cell_values<A: Clone>(
    spec: &FieldSpec,
    values: &ArrayD<A>,
) -> Result<ArrayD<A>, TranscodeError> {
    let ndim = spec.dims.len();
    let values = drop_leading_units(values.view(), ndim);
    if values.ndim() != ndim {
        return Err(shape_error(spec.target, format!("shape {:?}", values.shape())));
    }
    Ok(values.to_owned())
}

/// Selects the channel of one side of a concatenation and brings it to the
/// variable's number of axes.
fn trial_part<'a, A>(
    spec: &FieldSpec,
    part: ArrayViewD<'a, A>,
    channel: Option<usize>,
) -> Result<ArrayViewD<'a, A>, TranscodeError> {
    let part = match channel {
        Some(c) if part.ndim() > 0 && c < part.shape()[0] => part.index_axis_move(Axis(0), c),
        Some(c) => return Err(shape_error(spec.target, format!("no channel {}", c))),
        None => part,
    };
    let part = drop_leading_units(part, spec.dims.len());
    if part.ndim() != spec.dims.len() {
        return Err(shape_error(
            spec.target,
            format!("expected {} axes, found shape {:?}", spec.dims.len(), part.shape()),
        ));
    }
    Ok(part)
}

/// Builds the values of one variable.
fn build(
    spec: &FieldSpec,
    record: &SessionRecord,
    trials: TrialCounts,
) -> Result<VariableData, TranscodeError> {
    let data = match spec.rule {
        Rule::Concat {
            active,
            passive,
            axis,
            channel,
            scale,
            storage,
        } => match storage {
            Storage::Int8 => {
                let active = record.int8s(active, scale)?;
                let passive = record.int8s(passive, scale)?;
                VariableData::Int8(concat_parts(spec, &active, &passive, channel, Axis(axis))?)
            }
            Storage::Float64 => {
                let active = floats_scaled(record, active, scale)?;
                let passive = floats_scaled(record, passive, scale)?;
                VariableData::Float64(concat_parts(spec, &active, &passive, channel, Axis(axis))?)
            }
        },
        Rule::ActiveOnly { source, column } => {
            let values = record.floats(source)?;
            let values = match column {
                Some(c) if values.ndim() == 2 && c < values.shape()[1] => {
                    flatten(values.index_axis(Axis(1), c))
                }
                Some(c) => {
                    return Err(shape_error(
                        spec.target,
                        format!("no column {} in shape {:?}", c, values.shape()),
                    ))
                }
                None => flatten(values.view()),
            };
            if values.len() != trials.active {
                return Err(shape_error(
                    spec.target,
                    format!("{} values for {} active trials", values.len(), trials.active),
                ));
            }
            let padded = pad_and_concatenate(
                values.view(),
                Tail::Fill {
                    len: trials.passive,
                    value: f64::NAN,
                },
                Axis(0),
            )
            .map_err(|err| shape_error(spec.target, err))?;
            VariableData::Float64(padded)
        }
        Rule::Replicated { source } => {
            let value = record.scalar(source)?;
            VariableData::Float64(ArrayD::from_elem(IxDyn(&[trials.total()]), value))
        }
        Rule::Verbatim { source } => {
            let flags = record.bools(source)?;
            if flags.len() != trials.total() {
                warn!(
                    field = spec.target,
                    len = flags.len(),
                    trials = trials.total(),
                    "copying flags whose length differs from the trial count"
                );
            }
            VariableData::Bool(flatten(flags.view()))
        }
        Rule::CellValues { source, storage } => match storage {
            Storage::Int8 => VariableData::Int8(cell_values(spec, &record.int8s(source, 1.)?)?),
            Storage::Float64 => VariableData::Float64(cell_values(spec, &record.floats(source)?)?),
        },
        Rule::CellColumn { source, column } => {
            let values = record.floats(source)?;
            if values.ndim() != 2 || column >= values.shape()[1] {
                return Err(shape_error(
                    spec.target,
                    format!("no column {} in shape {:?}", column, values.shape()),
                ));
            }
            VariableData::Float64(values.index_axis(Axis(1), column).to_owned())
        }
        Rule::CellText { source } => {
            VariableData::Text(cell_values(spec, &record.texts(source)?)?)
        }
    };
    Ok(data)
}

/// Maps one session record onto a [`LabeledDataset`].
///
/// The trial dimension has one entry per active and passive trial, in that
/// order. Variables that only exist for active trials are padded with NaN.
/// Conflicting dimension lengths are an error, except for variables copied
/// verbatim, which are only reported with a warning.
pub fn transcode(record: &SessionRecord) -> Result<LabeledDataset, TranscodeError> {
    check_ccf_axes(record)?;
    let trials = TrialCounts::of(record)?;
    let identity = SessionIdentity {
        mouse: record.text(schema::MOUSE_FIELD)?,
        session_date: record.text(schema::SESSION_DATE_FIELD)?,
    };
    debug!(
        mouse = %identity.mouse,
        date = %identity.session_date,
        active = trials.active,
        passive = trials.passive,
        "transcoding session"
    );

    let variables = SESSION_SCHEMA
        .iter()
        .map(|spec| {
            Ok(Variable {
                name: spec.target.to_owned(),
                dims: spec.dims.to_vec(),
                data: build(spec, record, trials)?,
            })
        })
        .collect::<Result<Vec<_>, TranscodeError>>()?;

    let bin_size = record.scalar(schema::BIN_SIZE_FIELD)?;
    let stim_onset = record.scalar(schema::STIM_ONSET_FIELD)?;
    let n_time = match record.shape(schema::TIME_SOURCE)?.last() {
        Some(&n) => n,
        None => return Err(shape_error("time", "time source is a scalar")),
    };
    let n_cells = match record.shape(schema::CELL_SOURCE)?.first() {
        Some(&n) => n,
        None => return Err(shape_error("cell", "cell source is a scalar")),
    };

    let mut coords = BTreeMap::new();
    coords.insert(Dim::Trial, Coordinate::counting(trials.total()));
    coords.insert(
        Dim::Time,
        Coordinate::Float64((1..=n_time).map(|i| i as f64 * bin_size).collect()),
    );
    coords.insert(Dim::Cell, Coordinate::counting(n_cells));

    let mut attrs = BTreeMap::new();
    attrs.insert(schema::BIN_SIZE_FIELD.to_owned(), bin_size);
    attrs.insert(schema::STIM_ONSET_FIELD.to_owned(), stim_onset);

    let dataset = LabeledDataset {
        identity,
        variables,
        coords,
        attrs,
    };
    check_sizes(&dataset)?;
    Ok(dataset)
}

fn check_sizes(dataset: &LabeledDataset) -> Result<(), TranscodeError> {
    let verbatim: Vec<&str> = SESSION_SCHEMA
        .iter()
        .filter(|spec| matches!(spec.rule, Rule::Verbatim { .. }))
        .map(|spec| spec.target)
        .collect();
    for conflict in dataset.size_conflicts() {
        let strict: Vec<_> = conflict
            .sizes
            .iter()
            .filter(|(name, _)| !verbatim.contains(&name.as_str()))
            .collect();
        if strict.windows(2).any(|w| w[0].1 != w[1].1) {
            return Err(TranscodeError::Conflict(conflict));
        }
        warn!(dim = %conflict.dim, sizes = ?conflict.sizes, "dimension length differs between variables");
    }
    Ok(())
}
