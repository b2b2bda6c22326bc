use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors raised at the capability-client boundary.
///
/// The client never propagates raw model text on failure: anything that does
/// not deserialize into the stage's expected schema becomes
/// `MalformedResponse` here.
#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("capability call exceeded deadline ({0:?})")]
    Timeout(Duration),

    #[error("malformed capability response: {0}")]
    MalformedResponse(String),

    #[error("capability transport error: {0}")]
    Transport(String),
}

/// Errors raised by a data source.
#[derive(Debug, Error)]
pub enum DataSourceError {
    #[error("no data available for shop {shop}, metric {metric}")]
    DataUnavailable { shop: String, metric: String },

    #[error("data source transport error: {0}")]
    Transport(String),
}

/// Classification of a stage failure, used by the orchestrator's retry policy
/// and surfaced in the terminal pipeline error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    MalformedResponse,
    ValidationFailure,
    DataUnavailable,
    Internal,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Timeout => "Timeout",
            FailureKind::MalformedResponse => "MalformedResponse",
            FailureKind::ValidationFailure => "ValidationFailure",
            FailureKind::DataUnavailable => "DataUnavailable",
            FailureKind::Internal => "Internal",
        };
        f.write_str(name)
    }
}

/// A failed stage invocation. Failures are values: no stage failure may crash
/// the orchestrator, and the pipeline converts any unrecovered failure into a
/// terminal `PipelineResult`.
#[derive(Debug, Error)]
#[error("stage {stage} failed ({kind}): {message}")]
pub struct StageFailure {
    pub stage: &'static str,
    pub kind: FailureKind,
    pub message: String,
}

impl StageFailure {
    pub fn new(stage: &'static str, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            stage,
            kind,
            message: message.into(),
        }
    }

    pub fn timeout(stage: &'static str, budget: Duration) -> Self {
        Self::new(
            stage,
            FailureKind::Timeout,
            format!("deadline of {budget:?} exceeded"),
        )
    }

    pub fn internal(stage: &'static str, message: impl Into<String>) -> Self {
        Self::new(stage, FailureKind::Internal, message)
    }

    pub fn from_capability(stage: &'static str, err: CapabilityError) -> Self {
        let kind = match &err {
            CapabilityError::Timeout(_) => FailureKind::Timeout,
            CapabilityError::MalformedResponse(_) => FailureKind::MalformedResponse,
            CapabilityError::Transport(_) => FailureKind::Internal,
        };
        Self::new(stage, kind, err.to_string())
    }

    pub fn from_data_source(stage: &'static str, err: DataSourceError) -> Self {
        let kind = match &err {
            DataSourceError::DataUnavailable { .. } => FailureKind::DataUnavailable,
            DataSourceError::Transport(_) => FailureKind::Internal,
        };
        Self::new(stage, kind, err.to_string())
    }
}

/// Configuration loading/validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {message}")]
    InvalidValue { key: &'static str, message: String },

    #[error("missing required setting: {0}")]
    Missing(&'static str),
}
