use std::{
    error::Error,
    fmt::{self, Display},
};

/// The result type used in the entire machine learning module.
pub type Result<T> = std::result::Result<T, MlErr>;

/// The machine learning module's error type.
#[derive(Debug, Clone, PartialEq)]
pub enum MlErr {
    SizeMismatch {
        a: &'static str,
        b: &'static str,
        got: usize,
        expected: usize,
    },
    EmptyInput {
        what: &'static str,
    },
    InvalidParam {
        name: &'static str,
        detail: String,
    },
    TooFewSamples {
        got: usize,
        needed: usize,
    },
}

impl Display for MlErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MlErr::SizeMismatch {
                a,
                b,
                got,
                expected,
            } => {
                format!(
                    "There's a size mismatch between {a} and {b}, got {got} and expected {expected}"
                )
            }
            MlErr::EmptyInput { what } => format!("The given {what} is empty"),
            MlErr::InvalidParam { name, detail } => {
                format!("Invalid value for the parameter {name}: {detail}")
            }
            MlErr::TooFewSamples { got, needed } => {
                format!("Not enough samples, got {got} and at least {needed} are needed")
            }
        };

        write!(f, "{s}")
    }
}

impl Error for MlErr {}
