use thiserror::Error;

use crate::core::models::alert::AlertId;

/// Why a raw event was not accepted.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IngestError {
    #[error("Malformed event: {0}")]
    Malformed(String),
    #[error("Unknown {kind} '{value}'")]
    UnknownSource { kind: &'static str, value: String },
    #[error("Engine is not running")]
    EngineStopped,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Alert {0} not found")]
    AlertNotFound(AlertId),
    #[error("Engine is not running")]
    Stopped,
}
