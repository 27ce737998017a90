//! Error types for the cplatform convergence engine

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while reconciling cluster resources
#[derive(Error, Debug)]
pub enum OperatorError {
    /// Desired state rejected before any gateway call
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// Resource not found
    #[error("Resource not found: {kind}/{name}")]
    NotFound { kind: String, name: String },

    /// Gateway call failed but may succeed on a later attempt
    #[error("Transient gateway error: {0}")]
    TransientGateway(String),

    /// Gateway call failed permanently
    #[error("Gateway error: {0}")]
    Gateway(String),

    /// Remote state did not reach the target before the timeout
    #[error("Timed out waiting for {resource} to converge (last observed state: {last_state})")]
    ConvergenceTimeout { resource: String, last_state: String },

    /// Wait aborted by the caller's cancellation signal
    #[error("Convergence wait for {resource} was cancelled")]
    Cancelled { resource: String },

    /// Composite identity could not be decoded
    #[error("Malformed identity {identity:?}: {reason}")]
    MalformedIdentity { identity: String, reason: String },

    /// Invalid operator configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// YAML configuration error
    #[error("YAML serialization error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    /// I/O error while loading configuration
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Error decorated with the resource it concerns
    #[error("{context}: {source}")]
    Context {
        context: String,
        #[source]
        source: Box<OperatorError>,
    },
}

/// Result type for operator operations
pub type Result<T> = std::result::Result<T, OperatorError>;

impl OperatorError {
    /// Build a malformed identity error
    pub fn malformed(identity: &str, reason: impl Into<String>) -> Self {
        OperatorError::MalformedIdentity {
            identity: identity.to_string(),
            reason: reason.into(),
        }
    }

    /// Wrap this error with resource context
    pub fn context(self, context: impl Into<String>) -> Self {
        OperatorError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, with all context decoration removed
    pub fn root_cause(&self) -> &OperatorError {
        match self {
            OperatorError::Context { source, .. } => source.root_cause(),
            other => other,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.root_cause(),
            OperatorError::TransientGateway(_) | OperatorError::ConvergenceTimeout { .. }
        )
    }

    /// Whether the error is a validation failure
    pub fn is_validation(&self) -> bool {
        matches!(self.root_cause(), OperatorError::ValidationError(_))
    }

    /// Get a suggested delay before retrying the whole operation
    pub fn requeue_delay(&self) -> Option<Duration> {
        if self.is_retryable() {
            Some(Duration::from_secs(30))
        } else {
            None
        }
    }
}

/// Extension for attaching resource context to results
pub trait ResultExt<T> {
    /// Decorate the error (if any) with resource context
    fn with_resource(self, context: impl FnOnce() -> String) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn with_resource(self, context: impl FnOnce() -> String) -> Result<T> {
        self.map_err(|e| e.context(context()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OperatorError::NotFound {
            kind: "Topic".to_string(),
            name: "orders".to_string(),
        };
        assert!(err.to_string().contains("Topic"));
        assert!(err.to_string().contains("orders"));
    }

    #[test]
    fn test_retryable_errors() {
        let timeout_err = OperatorError::ConvergenceTimeout {
            resource: "topic orders".to_string(),
            last_state: "Updating".to_string(),
        };
        assert!(timeout_err.is_retryable());

        let transient = OperatorError::TransientGateway("503".to_string());
        assert!(transient.is_retryable());

        let validation_err = OperatorError::ValidationError("test".to_string());
        assert!(!validation_err.is_retryable());

        let cancelled = OperatorError::Cancelled {
            resource: "topic orders".to_string(),
        };
        assert!(!cancelled.is_retryable());
    }

    #[test]
    fn test_context_preserves_classification() {
        let err = OperatorError::ValidationError("cannot decrease partitions".to_string())
            .context("topic orders")
            .context("update");

        assert!(err.is_validation());
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "update: topic orders: Validation error: cannot decrease partitions"
        );
        assert!(matches!(err.root_cause(), OperatorError::ValidationError(_)));
    }

    #[test]
    fn test_requeue_delay() {
        let retryable = OperatorError::TransientGateway("test".to_string());
        assert!(retryable.requeue_delay().is_some());

        let not_retryable = OperatorError::InvalidConfig("test".to_string());
        assert!(not_retryable.requeue_delay().is_none());
    }

    #[test]
    fn test_with_resource() {
        let result: Result<()> = Err(OperatorError::Gateway("boom".to_string()));
        let err = result.with_resource(|| "topic orders".to_string()).unwrap_err();
        assert!(err.to_string().starts_with("topic orders: "));
    }
}
