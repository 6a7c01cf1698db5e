use crate::domain::error::BedError;
use thiserror::Error;

/// What the front end sees when a bed operation fails. The session error is
/// kept as the source for logs.
#[derive(Debug, Error)]
pub enum PresentationError {
    #[error("Failed to {action}")]
    OperationFailed {
        action: String,
        #[source]
        source: BedError,
    },
}

impl PresentationError {
    pub(crate) fn failed(action: impl Into<String>) -> impl FnOnce(BedError) -> Self {
        let action = action.into();
        move |source| Self::OperationFailed { action, source }
    }

    pub fn action(&self) -> &str {
        match self {
            Self::OperationFailed { action, .. } => action,
        }
    }
}
