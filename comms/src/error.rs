use std::{error::Error, fmt, io};

/// The result type used by the communication layer.
pub type Result<T> = std::result::Result<T, CommsErr>;

/// Failures of the collective communication layer.
#[derive(Debug)]
pub enum CommsErr {
    Io(io::Error),
    Codec(serde_json::Error),
    /// A rank gave up on the current collective and sent the reason instead of its payload.
    Aborted {
        rank: usize,
        detail: String,
    },
    UnexpectedMessage {
        expected: &'static str,
        got: &'static str,
    },
    Handshake {
        detail: String,
    },
    /// The coordinator entered a broadcast without a value to send.
    MissingValue,
}

impl fmt::Display for CommsErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommsErr::Io(e) => write!(f, "io error: {e}"),
            CommsErr::Codec(e) => write!(f, "codec error: {e}"),
            CommsErr::Aborted { rank, detail } => write!(f, "rank {rank} aborted: {detail}"),
            CommsErr::UnexpectedMessage { expected, got } => {
                write!(f, "unexpected message: expected {expected}, got {got}")
            }
            CommsErr::Handshake { detail } => write!(f, "handshake failed: {detail}"),
            CommsErr::MissingValue => {
                write!(f, "the coordinator must provide the value to broadcast")
            }
        }
    }
}

impl Error for CommsErr {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            CommsErr::Io(e) => Some(e),
            CommsErr::Codec(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for CommsErr {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for CommsErr {
    fn from(value: serde_json::Error) -> Self {
        Self::Codec(value)
    }
}

/// Boundary conversion for binaries / I/O APIs.
impl From<CommsErr> for io::Error {
    fn from(value: CommsErr) -> Self {
        match value {
            CommsErr::Io(e) => e,
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
