//! Error types for remote provider interactions.

use thiserror::Error;

/// Errors surfaced by a [`super::RemoteExecutionClient`].
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The provider refused or failed to start a session.
    #[error("Failed to launch session: {0}")]
    Launch(String),

    /// The provider reported an error while being driven.
    #[error("Provider error: {0}")]
    Provider(String),

    /// Transport-level failure talking to the provider.
    #[error("Session I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The provider throttled the request.
    #[error("Rate limited by provider: {0}")]
    RateLimited(String),

    /// The provider does not know the session id at all.
    #[error("Unknown session: {0}")]
    UnknownSession(String),
}

impl RemoteError {
    /// Whether a fresh attempt against the provider can reasonably succeed.
    ///
    /// Launch failures, I/O failures and throttling are transient; an
    /// unknown session or an explicit provider error is not. Provider error
    /// text still gets a keyword-based second opinion at the engine layer.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RemoteError::Launch(_) | RemoteError::Io(_) | RemoteError::RateLimited(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_launch_is_retryable() {
        assert!(RemoteError::Launch("no capacity".to_string()).is_retryable());
    }

    #[test]
    fn test_rate_limited_is_retryable() {
        assert!(RemoteError::RateLimited("429".to_string()).is_retryable());
    }

    #[test]
    fn test_io_is_retryable() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(RemoteError::Io(io).is_retryable());
    }

    #[test]
    fn test_unknown_session_is_not_retryable() {
        assert!(!RemoteError::UnknownSession("s-1".to_string()).is_retryable());
    }

    #[test]
    fn test_provider_error_is_not_retryable() {
        assert!(!RemoteError::Provider("bad request".to_string()).is_retryable());
    }
}
