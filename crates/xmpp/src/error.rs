use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("stream error: {0}")]
    StreamError(String),

    #[error("connection timeout")]
    Timeout,

    #[error("transport error: {0}")]
    TransportError(String),
}

impl ConnectionError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ConnectionError::AuthenticationFailed(_))
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("stanza parse failed: {0}")]
    ParseFailed(String),

    #[error("stanza serialization failed: {0}")]
    SerializeFailed(String),
}

impl From<PipelineError> for ConnectionError {
    fn from(error: PipelineError) -> Self {
        ConnectionError::StreamError(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_authentication_failures_are_terminal() {
        assert!(!ConnectionError::AuthenticationFailed("not-authorized".into()).is_retryable());
        assert!(ConnectionError::Timeout.is_retryable());
        assert!(ConnectionError::TransportError("reset".into()).is_retryable());
    }

    #[test]
    fn pipeline_errors_surface_as_stream_errors() {
        let error: ConnectionError = PipelineError::ParseFailed("bad".into()).into();
        assert!(matches!(error, ConnectionError::StreamError(ref m) if m.contains("bad")));
    }
}
