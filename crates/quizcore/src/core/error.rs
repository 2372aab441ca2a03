use std::time::Duration;
use thiserror::Error;

/// Centralized error types for the quiz core
///
/// Storage, catalog and configuration failures are converted to this enum.
/// Delivery failures keep their own [`DeliveryError`] so the retry policy can
/// branch on transient vs permanent.
#[derive(Error, Debug)]
pub enum AppError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Database connection pool errors
    #[error("Database pool error: {0}")]
    DatabasePool(#[from] r2d2::Error),

    /// Schema migration errors
    #[error("Migration error: {0}")]
    Migration(#[from] refinery::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Catalog or column JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Delivery errors surfaced outside the retry loop
    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    /// Anyhow errors (for general error handling)
    #[error("Application error: {0}")]
    Anyhow(#[from] anyhow::Error),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Type alias for Result with AppError
pub type AppResult<T> = Result<T, AppError>;

/// Failure reported by the bot messaging interface.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeliveryError {
    /// Network blip, timeout or rate limiting. Worth retrying.
    #[error("transient delivery failure: {reason}")]
    Transient {
        reason: String,
        /// Server-suggested wait before the next attempt
        retry_after: Option<Duration>,
    },

    /// Malformed content, revoked permission, chat gone. Never retried.
    #[error("permanent delivery failure: {reason}")]
    Permanent { reason: String },
}

impl DeliveryError {
    pub fn transient(reason: impl Into<String>) -> Self {
        Self::Transient {
            reason: reason.into(),
            retry_after: None,
        }
    }

    pub fn rate_limited(retry_after: Duration) -> Self {
        Self::Transient {
            reason: "rate limited".to_string(),
            retry_after: Some(retry_after),
        }
    }

    pub fn permanent(reason: impl Into<String>) -> Self {
        Self::Permanent { reason: reason.into() }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

#[cfg(feature = "telegram")]
impl From<teloxide::RequestError> for DeliveryError {
    fn from(err: teloxide::RequestError) -> Self {
        use teloxide::RequestError;

        match err {
            RequestError::RetryAfter(seconds) => Self::rate_limited(seconds.duration()),
            RequestError::Network(e) => Self::transient(format!("network: {}", e)),
            RequestError::Io(e) => Self::transient(format!("io: {}", e)),
            RequestError::Api(api_error) => {
                // Server-side hiccups come back as unknown API errors carrying the description
                let error_str = format!("{:?}", api_error);
                if error_str.contains("Bad Gateway")
                    || error_str.contains("Service Unavailable")
                    || error_str.contains("Gateway Timeout")
                    || error_str.contains("Too Many Requests")
                {
                    Self::transient(api_error.to_string())
                } else {
                    Self::permanent(api_error.to_string())
                }
            }
            other => Self::permanent(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delivery_error_kinds() {
        assert!(DeliveryError::transient("timeout").is_transient());
        assert!(DeliveryError::rate_limited(Duration::from_secs(3)).is_transient());
        assert!(!DeliveryError::permanent("bad request").is_transient());
    }

    #[test]
    fn test_app_error_display_wraps_delivery() {
        let err: AppError = DeliveryError::permanent("chat not found").into();
        assert_eq!(
            err.to_string(),
            "Delivery error: permanent delivery failure: chat not found"
        );
    }
}
