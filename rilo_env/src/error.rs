//! Error types shared by every stage of the localization pipeline.

use thiserror::Error;

/// Errors that can abort a localization run.
///
/// Weight collapse is not an error: the estimator recovers and counts it.
#[derive(Debug, Error)]
pub enum LocalizationError {
    /// The planner exhausted its iteration budget without reaching the goal
    #[error("Planning failure: goal not reached after {iterations} iterations")]
    PlanningFailure { iterations: usize },

    /// Start/goal outside free space, or unusable map geometry
    #[error("Degenerate map: {0}")]
    DegenerateMap(String),

    /// A collaborator required by the configuration is absent
    #[error("Missing collaborator: {0}")]
    MissingCollaborator(String),

    /// Unknown map identifier
    #[error("Invalid map id: {0}")]
    InvalidMapId(String),

    /// Inconsistent numeric configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Malformed blueprint description
    #[error("Blueprint error: {0}")]
    Blueprint(String),

    /// Filesystem failure (blueprint loading, result export)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding/decoding failure
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl LocalizationError {
    /// Creates a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Creates a degenerate-map error.
    pub fn degenerate(msg: impl Into<String>) -> Self {
        Self::DegenerateMap(msg.into())
    }

    /// Creates a missing-collaborator error.
    pub fn missing(what: impl std::fmt::Display) -> Self {
        Self::MissingCollaborator(what.to_string())
    }
}

/// Convenience alias used across the workspace.
pub type Result<T> = std::result::Result<T, LocalizationError>;
