//! HTTP surface error types

use axum::http::StatusCode;
use thiserror::Error;

/// Result type for HTTP operations
pub type HttpResult<T> = Result<T, HttpError>;

/// Errors raised by the probe server and the dependency probes
#[derive(Error, Debug)]
pub enum HttpError {
    #[error("Server startup failed: {message}")]
    StartupFailed { message: String },

    #[error("Server error: {message}")]
    ServerFailed { message: String },

    #[error("Dependency discovery failed: {message}")]
    DiscoveryFailed { message: String },

    #[error("{service} check failed: {message}")]
    ProbeFailed { service: String, message: String },

    #[error("{service} check timed out after {millis}ms")]
    ProbeTimeout { service: String, millis: u64 },
}

impl HttpError {
    pub fn startup<T: Into<String>>(message: T) -> Self {
        HttpError::StartupFailed {
            message: message.into(),
        }
    }

    pub fn server<T: Into<String>>(message: T) -> Self {
        HttpError::ServerFailed {
            message: message.into(),
        }
    }

    pub fn discovery<T: Into<String>>(message: T) -> Self {
        HttpError::DiscoveryFailed {
            message: message.into(),
        }
    }

    pub fn probe<S: Into<String>, T: Into<String>>(service: S, message: T) -> Self {
        HttpError::ProbeFailed {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Status code a handler answers with when this error reaches it
    pub fn status_code(&self) -> StatusCode {
        match self {
            HttpError::ProbeFailed { .. } | HttpError::ProbeTimeout { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get error code for consistent API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            HttpError::StartupFailed { .. } => "SERVER_STARTUP_FAILED",
            HttpError::ServerFailed { .. } => "SERVER_FAILED",
            HttpError::DiscoveryFailed { .. } => "DISCOVERY_FAILED",
            HttpError::ProbeFailed { .. } => "PROBE_FAILED",
            HttpError::ProbeTimeout { .. } => "PROBE_TIMEOUT",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(
            HttpError::probe("postgres", "connection refused").status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            HttpError::discovery("no pool").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            HttpError::probe("postgres", "connection refused").to_string(),
            "postgres check failed: connection refused"
        );
    }
}
