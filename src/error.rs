use std::fmt;
use std::time::Duration;

/// Failures of the field path resolver.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    #[error("field '{path}': '{segment}' not found")]
    NotFound { path: String, segment: String },

    #[error("field '{path}': cannot descend into {found} at '{segment}'")]
    TypeMismatch {
        path: String,
        segment: String,
        found: &'static str,
    },

    #[error("field '{path}': index {index} out of range for sequence of length {len}")]
    IndexOutOfRange {
        path: String,
        index: usize,
        len: usize,
    },

    #[error("invalid field path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },
}

/// Errors that stop a stage or a runner from being built. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConstructionError {
    #[error("transformer type '{0}' is not registered")]
    NotRegistered(String),

    #[error("transformer type '{0}' is registered twice")]
    DuplicateRegistration(String),

    #[error("invalid configuration for '{stage}': {message}")]
    ConfigValidation { stage: String, message: String },

    #[error("failed to load resource '{path}' for '{stage}': {message}")]
    ResourceLoad {
        stage: String,
        path: String,
        message: String,
    },

    #[error("sample log rejected by '{stage}': {message}")]
    SampleRejected { stage: String, message: String },
}

impl ConstructionError {
    pub fn config(stage: &str, message: impl Into<String>) -> Self {
        ConstructionError::ConfigValidation {
            stage: stage.to_string(),
            message: message.into(),
        }
    }
}

/// Which side of a field access failed for a single record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldErrorKind {
    GetErr,
    SetErr,
    General,
}

impl fmt::Display for FieldErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldErrorKind::GetErr => write!(f, "get"),
            FieldErrorKind::SetErr => write!(f, "set"),
            FieldErrorKind::General => write!(f, "transform"),
        }
    }
}

/// A per-record failure. The record itself travels on unchanged.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} error on '{key}': {message}")]
pub struct RecordFieldError {
    pub kind: FieldErrorKind,
    pub key: String,
    pub message: String,
}

impl RecordFieldError {
    pub fn get(key: impl fmt::Display, source: PathError) -> Self {
        RecordFieldError {
            kind: FieldErrorKind::GetErr,
            key: key.to_string(),
            message: source.to_string(),
        }
    }

    pub fn set(key: impl fmt::Display, source: PathError) -> Self {
        RecordFieldError {
            kind: FieldErrorKind::SetErr,
            key: key.to_string(),
            message: source.to_string(),
        }
    }

    pub fn general(key: impl fmt::Display, message: impl Into<String>) -> Self {
        RecordFieldError {
            kind: FieldErrorKind::General,
            key: key.to_string(),
            message: message.into(),
        }
    }
}

/// A raw line the parser could not turn into a record.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {message}")]
pub struct ParseError {
    pub line: usize,
    pub message: String,
}

/// Aggregate error of one stage call. Records or lines were still returned.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StageError {
    #[error("{stage}: {failed} of {total} records failed, last error: {last}")]
    Records {
        stage: String,
        failed: usize,
        total: usize,
        last: String,
    },

    #[error("{stage} does not support raw line input")]
    Unsupported { stage: String },
}

impl StageError {
    pub fn failed(&self) -> usize {
        match self {
            StageError::Records { failed, .. } => *failed,
            StageError::Unsupported { .. } => 0,
        }
    }
}

/// A failed delivery attempt. The batch controller retries any of these.
#[derive(Debug, thiserror::Error)]
pub enum SendFailure {
    #[error("send attempt timed out after {0:?}")]
    Timeout(Duration),

    #[error("{sender}: {message}")]
    Rejected { sender: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum RunnerError {
    #[error(transparent)]
    Construction(#[from] ConstructionError),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("delivery worker stopped unexpectedly")]
    DeliveryStopped,
}

impl From<serde_json::Error> for RunnerError {
    fn from(err: serde_json::Error) -> Self {
        RunnerError::Config(err.to_string())
    }
}

impl From<serde_yaml::Error> for RunnerError {
    fn from(err: serde_yaml::Error) -> Self {
        RunnerError::Config(err.to_string())
    }
}
