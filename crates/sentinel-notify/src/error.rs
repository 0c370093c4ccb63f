/// Errors raised while delivering a notification through one channel.
///
/// Every variant is recorded against the channel and the alert; none of
/// them escape the dispatcher.
///
/// # Examples
///
/// ```rust
/// use sentinel_notify::error::NotifyError;
///
/// let err = NotifyError::InvalidConfig("No webhook URL configured".to_string());
/// assert!(err.to_string().contains("webhook URL"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Channel configuration is missing a required field or holds an invalid value.
    #[error("{0}")]
    InvalidConfig(String),

    /// The sender for this channel kind is switched off in server configuration.
    #[error("{0} notifications are disabled")]
    Disabled(String),

    /// An HTTP request to a notification endpoint failed.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// SMTP transport or message building error.
    #[error("SMTP error: {0}")]
    Smtp(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The remote endpoint answered with a non-success status.
    #[error("{service} returned status {status}: {body}")]
    Api {
        service: String,
        status: u16,
        body: String,
    },

    /// The send did not complete within the per-channel timeout.
    #[error("timed out after {0}s")]
    Timeout(u64),
}

pub type Result<T> = std::result::Result<T, NotifyError>;
