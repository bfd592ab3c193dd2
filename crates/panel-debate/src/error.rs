//! Error types for debate operations

use thiserror::Error;

/// Debate specific errors
#[derive(Debug, Error)]
pub enum DebateError {
    /// No assessments were supplied
    #[error("Debate on '{0}' has no participants")]
    NoParticipants(String),

    /// Every participant failed in a round
    #[error("No arguments were produced in round {round}")]
    NoArguments { round: u32 },

    /// A role collaborator failed
    #[error("Role '{role_id}' failed: {message}")]
    Role { role_id: String, message: String },

    /// Prompt template rendering failed
    #[error("Template error: {0}")]
    Template(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for debate operations
pub type Result<T> = std::result::Result<T, DebateError>;

impl From<DebateError> for panel_core::Error {
    fn from(err: DebateError) -> Self {
        match err {
            DebateError::Role { role_id, message } => Self::Role { role_id, message },
            DebateError::Template(message) => Self::Template(message),
            DebateError::Config(message) => Self::Config(message),
            other => Self::Generic(other.to_string()),
        }
    }
}

impl From<minijinja::Error> for DebateError {
    fn from(err: minijinja::Error) -> Self {
        DebateError::Template(err.to_string())
    }
}
