//! Error types for the QMS adapter

use thiserror::Error;

/// Result type for adapter operations
pub type Result<T> = std::result::Result<T, AdapterError>;

/// Errors that can occur while bridging AMQP usage updates to QMS
#[derive(Error, Debug)]
pub enum AdapterError {
    /// AMQP transport failed (connection, channel setup, queue binding, etc.)
    #[error("AMQP transport error: {0}")]
    Transport(#[from] lapin::Error),

    /// A required configuration value is missing or malformed
    #[error("configuration error: {0}")]
    Config(String),

    /// The QMS endpoint URL could not be parsed
    #[error("invalid QMS endpoint: {0}")]
    Endpoint(#[from] url::ParseError),

    /// The HTTP request to QMS failed
    #[error("QMS request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// A usage value could not be parsed as a number
    #[error("invalid usage value: {0}")]
    InvalidValue(String),

    /// Generic error with context
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AdapterError {
    /// Check if the error is fatal to consumer startup
    ///
    /// Transport and configuration errors at setup time mean the adapter
    /// cannot run at all. Per-delivery ack/reject failures never surface
    /// as this type; the consumer logs and absorbs them.
    pub fn is_startup_fatal(&self) -> bool {
        matches!(
            self,
            AdapterError::Transport(_) | AdapterError::Config(_) | AdapterError::Endpoint(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = AdapterError::Config("AMQP_URI must be set".to_string());
        assert_eq!(err.to_string(), "configuration error: AMQP_URI must be set");
    }

    #[test]
    fn test_startup_fatal_classification() {
        assert!(AdapterError::Config("x".to_string()).is_startup_fatal());

        let other = AdapterError::Other(anyhow::anyhow!("handler hiccup"));
        assert!(!other.is_startup_fatal());
    }
}
