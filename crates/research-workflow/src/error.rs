//! Error types for the research workflow
//!
//! Modeled stage failures (empty plan, zero sources, unsafe draft, ...) are
//! not errors: stages report them as [`StageOutcome`](crate::state::StageOutcome)
//! values and the router sends them through Reflexion. The types here cover
//! everything else: collaborator contract violations, store I/O and routing
//! bugs, all of which end a run in `FailedFatal`.

use thiserror::Error;

use crate::state::{OutcomeKind, Stage};

/// Failure reported by an external collaborator after its own retries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CollaboratorError {
    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Malformed response: {0}")]
    Malformed(String),
}

impl CollaboratorError {
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited(message.into())
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed(message.into())
    }

    /// Transient failures become recoverable stage failures; malformed
    /// responses are fatal.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::RateLimited(_))
    }
}

/// Checkpoint store errors
#[derive(Error, Debug)]
pub enum CheckpointError {
    #[error("Checkpoint I/O error: {0}")]
    Io(String),

    #[error("Checkpoint serialization error: {0}")]
    Serialization(String),

    #[error("Invalid thread id: {0:?}")]
    InvalidThreadId(String),

    #[error("Checkpoint thread mismatch: expected {expected}, found {found}")]
    ThreadMismatch { expected: String, found: String },
}

impl CheckpointError {
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }
}

/// A (stage, outcome) pair the transition table does not model.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RouteError {
    #[error("Unmodeled transition: {stage} returned {outcome:?}")]
    Unmodeled { stage: Stage, outcome: OutcomeKind },
}

/// Fatal stage errors
#[derive(Error, Debug)]
pub enum StageError {
    #[error("{stage}: {source}")]
    Collaborator {
        stage: Stage,
        #[source]
        source: CollaboratorError,
    },

    #[error("{stage}: precondition violated: {message}")]
    Precondition { stage: Stage, message: String },
}

impl StageError {
    pub fn collaborator(stage: Stage, source: CollaboratorError) -> Self {
        Self::Collaborator { stage, source }
    }

    pub fn precondition(stage: Stage, message: impl Into<String>) -> Self {
        Self::Precondition {
            stage,
            message: message.into(),
        }
    }

    pub fn stage(&self) -> Stage {
        match self {
            Self::Collaborator { stage, .. } | Self::Precondition { stage, .. } => *stage,
        }
    }
}

/// Top-level workflow error
///
/// Returned only when the engine cannot produce a session state at all
/// (unknown thread on resume, store unreadable before the first stage, bad
/// configuration). Failures during a run are folded into `FailedFatal`.
#[derive(Error, Debug)]
pub enum WorkflowError {
    #[error(transparent)]
    Stage(#[from] StageError),

    #[error(transparent)]
    Route(#[from] RouteError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error("Thread not found: {0}")]
    ThreadNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl WorkflowError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
