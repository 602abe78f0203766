use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StdError {
    #[error("JsonSerializationError: {0}")]
    JsonSerializationError(#[source] serde_json::Error),

    #[error("Kube Error: {0}")]
    KubeError(#[source] kube::Error),

    #[error("NotFound: {0}")]
    NotFound(String),

    #[error("AmbiguousSource: {0}")]
    AmbiguousSource(String),

    #[error("AlreadyExists: {0}")]
    AlreadyExists(String),

    #[error("InvalidArgument: {0}")]
    InvalidArgument(String),

    #[error("IoError: {0}")]
    IoError(String),

    #[error("unsupported API version: service implements API version '{supported}', but asked for '{requested}'")]
    UnsupportedVersion { supported: String, requested: String },

    #[error("CryptoError: {0}")]
    CryptoError(String),

    #[error("SerializationError: {0}")]
    SerializationError(String),

    #[error("HttpError: {0}")]
    HttpError(String),
}

impl StdError {
    pub fn metric_label(&self) -> String {
        let label = match self {
            StdError::JsonSerializationError(_) | StdError::SerializationError(_) => "serialization",
            StdError::KubeError(_) => "kube",
            StdError::NotFound(_) => "not_found",
            StdError::AmbiguousSource(_) => "ambiguous_source",
            StdError::AlreadyExists(_) => "already_exists",
            StdError::InvalidArgument(_) => "invalid_argument",
            StdError::IoError(_) => "io",
            StdError::UnsupportedVersion { .. } => "unsupported_version",
            StdError::CryptoError(_) => "crypto",
            StdError::HttpError(_) => "http",
        };
        label.to_string()
    }
}

/// A sequential pass that stopped after some of its items were already applied.
#[derive(Error, Debug)]
pub struct PartialFailure {
    pub applied: Vec<String>,
    pub failed: String,
    #[source]
    pub error: StdError,
}

impl PartialFailure {
    pub fn new(applied: Vec<String>, failed: impl Into<String>, error: StdError) -> PartialFailure {
        PartialFailure {
            applied,
            failed: failed.into(),
            error,
        }
    }
}

impl fmt::Display for PartialFailure {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} failed after [{}] were applied: {}",
            self.failed,
            self.applied.join(", "),
            self.error
        )
    }
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("Standard Error: {0}")]
    StdError(#[source] StdError),

    #[error("Partial Failure: {0}")]
    PartialFailure(#[source] PartialFailure),
}

impl Error {
    pub fn metric_label(&self) -> String {
        match self {
            Error::StdError(e) => e.metric_label(),
            Error::PartialFailure(_) => "partial_failure".to_string(),
        }
    }

    /// The innermost error describing what went wrong.
    pub fn root(&self) -> &StdError {
        match self {
            Error::StdError(e) => e,
            Error::PartialFailure(p) => &p.error,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), StdError::NotFound(_))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self.root(), StdError::AlreadyExists(_))
    }
}

impl From<StdError> for Error {
    fn from(e: StdError) -> Self {
        Error::StdError(e)
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_failure_names_applied_and_failed_items() {
        let err = Error::PartialFailure(PartialFailure::new(
            vec!["app1".to_string()],
            "app1-cfg",
            StdError::IoError("connection reset".to_string()),
        ));

        assert_eq!(err.metric_label(), "partial_failure");
        assert!(!err.is_not_found());
        assert_eq!(
            err.to_string(),
            "Partial Failure: app1-cfg failed after [app1] were applied: IoError: connection reset"
        );
    }

    #[test]
    fn unsupported_version_message() {
        let err = StdError::UnsupportedVersion {
            supported: "v1".to_string(),
            requested: "v2".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "unsupported API version: service implements API version 'v1', but asked for 'v2'"
        );
    }
}
