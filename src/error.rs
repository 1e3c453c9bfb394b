// ⚠️ Error taxonomy for the usage-measurement core
//
// Incomplete configuration and unsupported tracker operations are NOT
// errors and never show up here.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TrackingError {
    /// A target reached tracker construction without a usable url or site id
    #[error("invalid target ({field}): {message}")]
    InvalidTarget { field: String, message: String },

    /// A supported operation was queued with arguments it cannot decode
    #[error("invalid arguments for {operation}: {message}")]
    InvalidArguments { operation: String, message: String },

    /// The settings provider could not produce settings
    #[error("settings unavailable: {message}")]
    Settings { message: String },

    /// Error raised by a callback command, passed through unchanged
    #[error(transparent)]
    Callback(#[from] anyhow::Error),
}

impl TrackingError {
    pub fn invalid_target(field: &str, message: impl Into<String>) -> Self {
        TrackingError::InvalidTarget {
            field: field.to_string(),
            message: message.into(),
        }
    }

    pub fn invalid_arguments(operation: &str, message: impl Into<String>) -> Self {
        TrackingError::InvalidArguments {
            operation: operation.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TrackingError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = TrackingError::invalid_arguments("setSiteId", "expected a positive integer");
        let msg = err.to_string();
        assert!(msg.contains("setSiteId"));
        assert!(msg.contains("positive integer"));
    }

    #[test]
    fn test_callback_error_is_transparent() {
        let err: TrackingError = anyhow::anyhow!("boom from callback").into();
        assert_eq!(err.to_string(), "boom from callback");
    }
}
