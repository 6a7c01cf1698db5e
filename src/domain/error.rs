use std::time::Duration;
use thiserror::Error;

/// Failures reported by a transport adapter. No retry policy lives there.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no connectable peripheral resolved for {0}")]
    Unavailable(String),
    #[error("peripheral is not connected")]
    NotConnected,
    #[error("characteristic {0} not found on peripheral")]
    CharacteristicNotFound(uuid::Uuid),
    #[error("peripheral rejected the request: {0}")]
    Rejected(String),
    #[error("bluetooth backend error: {0}")]
    Backend(#[from] btleplug::Error),
}

/// Errors surfaced by the session controller to its callers.
#[derive(Debug, Error)]
pub enum BedError {
    #[error("bed {0} is not reachable; waiting for the platform to rediscover it")]
    TransportUnavailable(String),
    #[error("connect timed out after {attempts} attempt(s) of {timeout:?}")]
    ConnectTimeout { attempts: u32, timeout: Duration },
    #[error("connect failed after {attempts} attempt(s): {source}")]
    ConnectFailed {
        attempts: u32,
        #[source]
        source: TransportError,
    },
    #[error("command write failed: {0}")]
    WriteFailed(#[source] TransportError),
    #[error("command write timed out after {0:?}")]
    WriteTimeout(Duration),
    #[error("invalid settings: {0}")]
    InvalidSettings(String),
}

impl BedError {
    /// Connection-setup failures, as opposed to failures while writing.
    pub fn is_connect_error(&self) -> bool {
        matches!(
            self,
            Self::TransportUnavailable(_) | Self::ConnectTimeout { .. } | Self::ConnectFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = BedError::ConnectFailed {
            attempts: 3,
            source: TransportError::Rejected("gatt busy".into()),
        };
        assert_eq!(
            err.to_string(),
            "connect failed after 3 attempt(s): peripheral rejected the request: gatt busy"
        );
        assert!(err.is_connect_error());
        assert!(!BedError::WriteTimeout(Duration::from_secs(2)).is_connect_error());
    }
}
