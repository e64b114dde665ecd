//! Error types for the bootstrap orchestrator

use thiserror::Error;

/// Problems with the orchestrator's configuration.
///
/// Fatal at startup: an orchestrator is never built from a configuration
/// that fails validation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("Dependency cycle detected: {}", cycle.join(" -> "))]
    DependencyCycle { cycle: Vec<String> },

    #[error("Subsystem names must not be empty")]
    EmptyName,

    #[error("Invalid configuration: {0}")]
    Parse(String),

    #[error("Failed to read configuration file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Orchestrator must be created inside a Tokio runtime")]
    NoRuntime,
}

/// Error returned by a subsystem's own initializer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct SubsystemError {
    pub message: String,
}

impl SubsystemError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for SubsystemError {
    fn from(err: anyhow::Error) -> Self {
        Self::new(format!("{err:#}"))
    }
}
