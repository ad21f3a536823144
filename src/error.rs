use std::fmt;

use thiserror::Error;

/// Which whole-document operation failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOperation {
    Fetch,
    Replace,
}

impl fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreOperation::Fetch => f.write_str("fetch"),
            StoreOperation::Replace => f.write_str("replace"),
        }
    }
}

/// Failures raised by a document store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Transport failure or a non-success status
    #[error("document store unavailable during {operation}: {reason}")]
    Unavailable {
        operation: StoreOperation,
        reason: String,
    },

    #[error("malformed document: {0}")]
    MalformedResponse(#[from] serde_json::Error),

    /// A conditional write found a different version than expected
    #[error("document changed since it was fetched")]
    Conflict,

    #[error("gave up after {attempts} conflicting writes")]
    RetriesExhausted { attempts: u32 },
}

impl StoreError {
    pub fn unavailable(operation: StoreOperation, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            operation,
            reason: reason.into(),
        }
    }

    pub fn operation(&self) -> StoreOperation {
        match self {
            StoreError::Unavailable { operation, .. } => *operation,
            StoreError::MalformedResponse(_) => StoreOperation::Fetch,
            StoreError::Conflict | StoreError::RetriesExhausted { .. } => StoreOperation::Replace,
        }
    }
}

/// Failures of a review submission
#[derive(Debug, Error)]
pub enum BoardError {
    #[error("review text is empty")]
    EmptyReview,

    #[error("a submission is already in progress")]
    SubmissionInFlight,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl BoardError {
    /// The message shown to the person using the board
    pub fn user_message(&self) -> &'static str {
        match self {
            BoardError::EmptyReview => "Review must not be empty.",
            BoardError::SubmissionInFlight => {
                "Your previous review is still being sent. Please wait."
            }
            BoardError::Store(err) => match err.operation() {
                StoreOperation::Fetch => "Failed to load reviews from the database.",
                StoreOperation::Replace => "Failed to save your review to the database.",
            },
        }
    }
}
