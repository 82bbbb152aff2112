//! Unified error types for Huddle

use thiserror::Error;

/// Unified error type for all Huddle operations
#[derive(Error, Debug)]
pub enum HuddleError {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Unknown participant: {0}")]
    UnknownParticipant(String),

    #[error("No eligible next speaker after {0}")]
    NoEligibleSpeaker(String),

    #[error("Invalid speaker selection: {0}")]
    InvalidSelection(String),

    // Selection errors (recoverable through the fallback chain)
    #[error("Speaker {speaker} is not an eligible candidate")]
    OutOfGraphSelection { speaker: String },

    #[error("Speaker selection failed: {0}")]
    SelectionFailed(String),

    #[error("Human deferred speaker selection to the automatic policy")]
    SelectionDeferred,

    // Capability errors
    #[error("Transient failure: {0}")]
    Transient(String),

    #[error("API error: {0}")]
    Api(String),

    #[error("API rate limit: {0}")]
    ApiLimit(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Human input unavailable: {0}")]
    HumanInputUnavailable(String),

    #[error("Human ended the conversation")]
    HumanExit,

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

impl HuddleError {
    /// Whether the failure may succeed on retry
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::ApiLimit(_))
    }

    /// Whether the failure is a fatal configuration problem
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            Self::Config(_)
                | Self::UnknownParticipant(_)
                | Self::NoEligibleSpeaker(_)
                | Self::InvalidSelection(_)
        )
    }

    /// Whether the selector may recover by trying the next strategy
    pub fn is_recoverable_selection(&self) -> bool {
        matches!(
            self,
            Self::OutOfGraphSelection { .. } | Self::SelectionFailed(_) | Self::SelectionDeferred
        )
    }
}

/// Result type alias using HuddleError
pub type Result<T> = std::result::Result<T, HuddleError>;
