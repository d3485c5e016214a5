use std::{error::Error, fmt, io};

use comms::CommsErr;
use machine_learning::MlErr;
use ndarray::ShapeError;

/// The result type used by the LESS engine.
pub type Result<T> = std::result::Result<T, LessErr>;

/// Failures of a `LessRegressor`.
#[derive(Debug)]
pub enum LessErr {
    /// The hyperparameters can't describe a valid model.
    InvalidConfiguration { detail: String },
    /// The data handed to `fit` can't be used.
    InvalidInput { detail: String },
    /// `predict` was called without a fitted ensemble.
    NotFitted,
    SizeMismatch {
        what: &'static str,
        got: usize,
        expected: usize,
    },
    Ml(MlErr),
    Comms(CommsErr),
    Shape(ShapeError),
}

impl LessErr {
    pub(crate) fn config(detail: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            detail: detail.into(),
        }
    }

    pub(crate) fn input(detail: impl Into<String>) -> Self {
        Self::InvalidInput {
            detail: detail.into(),
        }
    }
}

impl fmt::Display for LessErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LessErr::InvalidConfiguration { detail } => write!(f, "invalid configuration: {detail}"),
            LessErr::InvalidInput { detail } => write!(f, "invalid input: {detail}"),
            LessErr::NotFitted => write!(f, "the regressor must be fitted before predicting"),
            LessErr::SizeMismatch {
                what,
                got,
                expected,
            } => write!(f, "size mismatch in {what}: got {got}, expected {expected}"),
            LessErr::Ml(e) => write!(f, "estimator error: {e}"),
            LessErr::Comms(e) => write!(f, "communication error: {e}"),
            LessErr::Shape(e) => write!(f, "shape error: {e}"),
        }
    }
}

impl Error for LessErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            LessErr::Ml(e) => Some(e),
            LessErr::Comms(e) => Some(e),
            LessErr::Shape(e) => Some(e),
            _ => None,
        }
    }
}

impl From<MlErr> for LessErr {
    fn from(value: MlErr) -> Self {
        Self::Ml(value)
    }
}

impl From<CommsErr> for LessErr {
    fn from(value: CommsErr) -> Self {
        Self::Comms(value)
    }
}

impl From<ShapeError> for LessErr {
    fn from(value: ShapeError) -> Self {
        Self::Shape(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<LessErr> for io::Error {
    fn from(value: LessErr) -> Self {
        match value {
            LessErr::Comms(e) => e.into(),
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
