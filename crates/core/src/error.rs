//! Error Types
//!
//! Every failure the pipeline can observe, from the transport up to the quiz
//! session. The variants of [`PipelineError`] are what a consumer of the
//! prefetch engine ever sees; the lower-level enums are folded into it by the
//! error policy.

use thiserror::Error;

/// A failure reported by a [`crate::source::StreamingSource`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    /// The generation service explicitly asked us to slow down (HTTP 429 or equivalent).
    #[error("rate limited by generation service: {0}")]
    RateLimited(String),
    /// Any other network or service failure.
    #[error("transport failure: {0}")]
    Transport(String),
}

/// Invalid caller-supplied generation parameters.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ParameterError {
    #[error("word set must not be empty")]
    EmptyWords,
    #[error("duplicate word in word set: {0}")]
    DuplicateWord(String),
    #[error("topic must not be empty")]
    EmptyTopic,
    #[error("unknown difficulty level: {0}")]
    UnknownLevel(String),
}

/// The accumulated text could not be turned into a complete content item.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("generated document is empty")]
    Empty,
    #[error("malformed document: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("generator reported an error: {0}")]
    Reported(String),
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("quiz question {index} is invalid: {reason}")]
    InvalidQuestion { index: usize, reason: String },
}

/// Outcome of a single failed generation attempt, before classification.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Errors surfaced by the prefetch engine to its callers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    /// The retry budget for a rate-limited request ran out.
    #[error("generation service is busy; gave up after {attempts} retries")]
    RetriesExhausted { attempts: u32 },
    #[error("generation failed: {0}")]
    Transient(String),
    #[error("generated content was unusable: {0}")]
    ParseFailure(String),
    /// The request was superseded by a parameter change or a session reset.
    #[error("request superseded by newer parameters")]
    Stale,
    #[error("generation service unavailable after repeated failures")]
    CircuitOpen,
    #[error("session generation limit reached")]
    SessionCeilingReached,
    #[error("prefetch engine is no longer running")]
    EngineClosed,
}

impl PipelineError {
    /// Terminal errors mean the user should leave the flow instead of retrying.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::CircuitOpen | Self::EngineClosed)
    }

    /// Silent errors only mean "no new item right now" and are not shown as failures.
    pub fn is_silent(&self) -> bool {
        matches!(self, Self::Stale | Self::SessionCeilingReached)
    }
}

/// Illegal operations on a [`crate::session::QuizSession`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("no content is active")]
    NoContent,
    #[error("a round is already being generated")]
    AlreadyGenerating,
    #[error("question {0} has not been answered yet")]
    NotAnswered(usize),
    #[error("option `{0}` is not offered by the current question")]
    UnknownOption(String),
    #[error("session already completed")]
    Completed,
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}
