use reqwest::StatusCode;
use serde::Serialize;

use crate::models::TrialNotice;

/// Fallback message used when the backend body cannot be read.
pub const CONNECTION_ERROR_MESSAGE: &str =
    "Unable to connect to the server. Please check your connection.";

/// Coarse grouping of errors, used by the view layer to decide how to present them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// Rejected locally before any network call
    Validation,
    /// Transport failures and generic non-2xx responses
    Network,
    /// Expired or invalid credentials; the session must be dropped
    Authorization,
    /// Trial or subscription expired; routed to the paywall
    PaymentRequired,
    /// Local faults (serialization, IO, configuration)
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Network error: {0}")]
    Network(
        #[from]
        reqwest::Error,
    ),

    #[error("API error ({status}): {message}")]
    Api { status: StatusCode, message: String },

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Session expired: {0}")]
    SessionExpired(String),

    #[error("Trial expired: {}", .0.message)]
    TrialExpired(TrialNotice),

    #[error("Request already in progress")]
    Busy,

    #[error("Request superseded by a newer one")]
    Superseded,

    #[error("Serialization error: {0}")]
    Serialization(
        #[from]
        serde_json::Error,
    ),

    #[error("CSV error: {0}")]
    Csv(
        #[from]
        csv::Error,
    ),

    #[error("IO error: {0}")]
    Io(
        #[from]
        std::io::Error,
    ),

    #[error("Invalid URL: {0}")]
    Url(
        #[from]
        url::ParseError,
    ),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<validator::ValidationErrors> for ClientError {
    fn from(err: validator::ValidationErrors) -> Self {
        ClientError::Validation(err.to_string())
    }
}

impl ClientError {
    pub fn validation(message: impl Into<String>) -> Self {
        ClientError::Validation(message.into())
    }

    /// Builds an API error from a status and an optional server message.
    pub fn api(status: StatusCode, message: Option<String>) -> Self {
        ClientError::Api {
            status,
            message: message.unwrap_or_else(|| CONNECTION_ERROR_MESSAGE.to_string()),
        }
    }

    /// Returns the HTTP status associated with this error, if any.
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            Self::Api { status, .. } => Some(*status),
            Self::Unauthorized(_) | Self::SessionExpired(_) => Some(StatusCode::UNAUTHORIZED),
            Self::TrialExpired(_) => Some(StatusCode::PAYMENT_REQUIRED),
            Self::Network(err) => err.status(),
            _ => None,
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Validation(_) | Self::Busy | Self::Superseded => ErrorCategory::Validation,
            Self::Network(_) | Self::Api { .. } => ErrorCategory::Network,
            Self::Unauthorized(_) | Self::SessionExpired(_) => ErrorCategory::Authorization,
            Self::TrialExpired(_) => ErrorCategory::PaymentRequired,
            Self::Serialization(_)
            | Self::Csv(_)
            | Self::Io(_)
            | Self::Url(_)
            | Self::Internal(_) => ErrorCategory::Internal,
        }
    }

    /// Message suitable for a status banner.
    /// Transport and local faults collapse to generic text so internals are not shown.
    pub fn user_message(&self) -> String {
        match self {
            Self::Validation(msg) => msg.clone(),
            Self::Api { message, .. } => message.clone(),
            Self::Unauthorized(_) | Self::SessionExpired(_) => {
                "Your session has expired. Please log in again.".to_string()
            }
            Self::TrialExpired(notice) => notice.message.clone(),
            Self::Busy => "Please wait for the current request to finish.".to_string(),
            Self::Superseded => "A newer request replaced this one.".to_string(),
            Self::Network(_) => CONNECTION_ERROR_MESSAGE.to_string(),
            Self::Serialization(_) | Self::Csv(_) | Self::Io(_) | Self::Url(_) | Self::Internal(_) => {
                "Something went wrong. Please try again.".to_string()
            }
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_without_message_uses_connection_text() {
        let err = ClientError::api(StatusCode::BAD_GATEWAY, None);
        assert_eq!(err.user_message(), CONNECTION_ERROR_MESSAGE);
        assert_eq!(err.status_code(), Some(StatusCode::BAD_GATEWAY));
        assert_eq!(err.category(), ErrorCategory::Network);
    }

    #[test]
    fn trial_expired_is_payment_required() {
        let err = ClientError::TrialExpired(TrialNotice::default());
        assert_eq!(err.category(), ErrorCategory::PaymentRequired);
        assert_eq!(err.status_code(), Some(StatusCode::PAYMENT_REQUIRED));
        assert_eq!(err.user_message(), "Your free trial has ended");
    }

    #[test]
    fn internal_errors_hide_details() {
        let err = ClientError::Internal("mutex poisoned".into());
        assert!(!err.user_message().contains("mutex"));
    }
}
