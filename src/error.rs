//! Error types for the group conversation controller

use thiserror::Error;

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, GroupChatError>;

/// Main error type for the group conversation controller
#[derive(Debug, Error)]
pub enum GroupChatError {
    /// A termination condition was evaluated after it had already triggered
    #[error("termination condition '{condition}' already triggered; reset it before reuse")]
    AlreadyTerminated { condition: String },

    /// A selector produced a name that is not in the participant registry
    #[error("unknown participant: {name}")]
    UnknownParticipant { name: String },

    /// Two participants were registered under the same name
    #[error("duplicate participant name: {name}")]
    DuplicateParticipant { name: String },

    /// A candidate-narrowing function returned no eligible speakers
    #[error("candidate function returned no eligible speakers")]
    EmptyCandidates,

    /// A selector function and a candidate function were both configured
    #[error("selector function and candidate function are mutually exclusive")]
    SelectorConflict,

    /// The selection model's reply could not be mapped to a roster name
    #[error("selector could not resolve a speaker from model reply: {reply}")]
    SpeakerNotResolved { reply: String },

    /// A second `run` call was issued while a run was already in progress
    #[error("a run is already in progress on this group chat")]
    RunInProgress,

    /// The run was cancelled; in-flight output was discarded
    #[error("run aborted by cancellation")]
    Aborted,

    /// A participant failed and did not recover
    #[error("participant '{name}' failed: {message}")]
    ParticipantFailed { name: String, message: String },

    /// Error from the OpenAI API
    #[error("OpenAI API error: {0}")]
    OpenAIError(#[from] async_openai::error::OpenAIError),

    /// Model collaborator misbehaved (empty choices, malformed reply)
    #[error("model behavior error: {message}")]
    ModelBehaviorError { message: String },

    /// Tool execution error
    #[error("tool execution error: {message}")]
    ToolExecutionError { message: String },

    /// Memory collaborator error
    #[error("memory error: {0}")]
    MemoryError(String),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl GroupChatError {
    /// True when this error is the distinct cancellation outcome rather than
    /// a failure.
    pub fn is_abort(&self) -> bool {
        matches!(self, GroupChatError::Aborted)
    }
}
