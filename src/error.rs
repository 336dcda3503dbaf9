use std::fmt;

use crate::config::RunningMode;

/// Contract violations and runtime failures surfaced by a landmarker.
#[derive(Debug)]
pub enum LandmarkerError {
    WrongRunningMode {
        expected: RunningMode,
        actual: RunningMode,
    },
    NonMonotonicTimestamp {
        previous: f64,
        current: f64,
    },
    Model(String),
    UnexpectedOutput(String),
}

impl fmt::Display for LandmarkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WrongRunningMode { expected, actual } => write!(
                f,
                "Task is in {actual} mode but was invoked with the {expected} mode API"
            ),
            Self::NonMonotonicTimestamp { previous, current } => write!(
                f,
                "Timestamp {current}ms must be greater than the previous timestamp {previous}ms"
            ),
            Self::Model(msg) => write!(f, "Model error: {msg}"),
            Self::UnexpectedOutput(msg) => write!(f, "Unexpected model output: {msg}"),
        }
    }
}

impl std::error::Error for LandmarkerError {}

impl From<ort::Error> for LandmarkerError {
    fn from(err: ort::Error) -> Self {
        Self::Model(err.to_string())
    }
}
