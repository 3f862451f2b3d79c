// src/error.rs
use std::time::Duration;

/// Backoff used when an upstream rate-limits without a `Retry-After` hint.
pub const DEFAULT_RATE_LIMIT_BACKOFF: Duration = Duration::from_secs(5);

/// Failure reported by a source adapter for one call.
///
/// Adapters never return these as `Err`; they travel inside a
/// [`FetchStatus`](crate::federated::FetchStatus) so that a failing upstream
/// can only ever degrade a session, not abort it.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SourceError {
    #[error("Transient upstream failure: {0}")]
    Transient(String),

    #[error("Permanent upstream failure: {0}")]
    Permanent(String),

    #[error("Malformed upstream response: {0}")]
    MalformedResponse(String),

    #[error("Rate limited by upstream")]
    RateLimited { retry_after: Option<Duration> },

    #[error("Session deadline exceeded")]
    SessionDeadlineExceeded,
}

impl SourceError {
    pub fn code_str(&self) -> &'static str {
        match self {
            SourceError::Transient(_) => "transient",
            SourceError::Permanent(_) => "permanent",
            SourceError::MalformedResponse(_) => "malformed_response",
            SourceError::RateLimited { .. } => "rate_limited",
            SourceError::SessionDeadlineExceeded => "deadline_exceeded",
        }
    }

    /// Whether the same request may succeed if issued again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SourceError::Transient(_) | SourceError::RateLimited { .. }
        )
    }

    /// Minimum wait the upstream asked for before the next attempt.
    pub fn suggested_backoff(&self) -> Option<Duration> {
        match self {
            SourceError::RateLimited { retry_after } => {
                Some(retry_after.unwrap_or(DEFAULT_RATE_LIMIT_BACKOFF))
            }
            _ => None,
        }
    }
}

/// Errors surfaced to callers of the aggregation service.
///
/// Upstream failures are not represented here; see [`SourceError`].
#[derive(Debug, thiserror::Error)]
pub enum AggregatorError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("TOML write error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unknown source: {0}")]
    UnknownSource(String),
}

impl AggregatorError {
    pub fn code_str(&self) -> &'static str {
        match self {
            AggregatorError::InvalidInput(_) => "invalid_input",
            AggregatorError::Config(_) => "invalid_config",
            AggregatorError::Io(_) => "io_error",
            AggregatorError::Yaml(_) | AggregatorError::TomlDe(_) | AggregatorError::TomlSer(_) => {
                "parse_error"
            }
            AggregatorError::Http(_) => "http_client",
            AggregatorError::UnknownSource(_) => "unknown_source",
        }
    }
}

pub type Result<T> = std::result::Result<T, AggregatorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(SourceError::Transient("502".into()).is_retryable());
        assert!(SourceError::RateLimited { retry_after: None }.is_retryable());
        assert!(!SourceError::Permanent("404".into()).is_retryable());
        assert!(!SourceError::MalformedResponse("eof".into()).is_retryable());
        assert!(!SourceError::SessionDeadlineExceeded.is_retryable());
    }

    #[test]
    fn test_rate_limit_backoff() {
        let explicit = SourceError::RateLimited {
            retry_after: Some(Duration::from_secs(12)),
        };
        assert_eq!(explicit.suggested_backoff(), Some(Duration::from_secs(12)));

        let implicit = SourceError::RateLimited { retry_after: None };
        assert_eq!(
            implicit.suggested_backoff(),
            Some(DEFAULT_RATE_LIMIT_BACKOFF)
        );
        assert_eq!(SourceError::Transient("x".into()).suggested_backoff(), None);
    }

    #[test]
    fn test_display_and_codes() {
        let err = SourceError::MalformedResponse("expected array".into());
        assert_eq!(
            err.to_string(),
            "Malformed upstream response: expected array"
        );
        assert_eq!(err.code_str(), "malformed_response");

        let err = AggregatorError::InvalidInput("entity name is empty".into());
        assert_eq!(err.to_string(), "Invalid input: entity name is empty");
        assert_eq!(err.code_str(), "invalid_input");
    }
}
