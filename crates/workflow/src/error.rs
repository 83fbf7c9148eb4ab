use thiserror::Error;

use folio_core::DomainError;

/// Errors raised when asking a part to process something.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProcessError {
    /// A job chain is still outstanding for this part; retry later.
    #[error("part is already processing")]
    AlreadyProcessing,

    /// The request cannot be fulfilled (e.g. no tracked job to cancel).
    #[error("process failure: {0}")]
    ProcessFailure(String),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl ProcessError {
    pub fn failure(msg: impl Into<String>) -> Self {
        Self::ProcessFailure(msg.into())
    }
}
