use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::billing::BillingError;

/// The main error type for billsync.
///
/// Domain failures from the billing layer are carried intact in
/// [`BillsyncError::Billing`] so callers can still tell a declined card from a
/// provider outage after the error has crossed a module boundary.
#[derive(Debug, thiserror::Error)]
pub enum BillsyncError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error(transparent)]
    Billing(#[from] BillingError),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// JSON body returned for every failed request.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    error_id: String,
}

impl BillsyncError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// The billing error inside this error, if any.
    pub fn as_billing(&self) -> Option<&BillingError> {
        match self {
            Self::Billing(err) => Some(err),
            _ => None,
        }
    }

    /// Whether this is a payment-method failure the user can act on.
    pub fn is_card_error(&self) -> bool {
        self.as_billing().is_some_and(BillingError::is_card_error)
    }

    /// Whether retrying later might succeed.
    ///
    /// A timed-out or throttled provider call is transient and must never be
    /// read as a definitive "no subscription" answer.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Billing(err) => err.is_transient(),
            Self::ServiceUnavailable(_) => true,
            _ => false,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Internal(_) | Self::Storage(_) | Self::Anyhow(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Billing(err) => err.status_code(),
        }
    }

    /// Returns a message suitable for clients.
    ///
    /// Client errors keep their text. Server errors are reduced to a generic
    /// message; the details only go to the server log.
    fn safe_message(&self) -> String {
        match self {
            Self::NotFound(msg) => format!("Not found: {}", msg),
            Self::BadRequest(msg) => format!("Bad request: {}", msg),
            Self::Unauthorized(msg) => format!("Unauthorized: {}", msg),
            Self::Forbidden(msg) => format!("Forbidden: {}", msg),
            Self::Billing(err) if err.status_code().is_client_error() => err.to_string(),
            Self::Billing(_) => "Payment provider error".to_string(),
            Self::Internal(_) | Self::Anyhow(_) => "Internal server error".to_string(),
            Self::Storage(_) => "Storage error".to_string(),
            Self::ServiceUnavailable(_) => "Service unavailable".to_string(),
        }
    }

    /// Machine-readable code, when one exists.
    fn code(&self) -> Option<String> {
        match self {
            Self::Billing(err) => err.code().map(str::to_string),
            _ => None,
        }
    }
}

impl IntoResponse for BillsyncError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_id = uuid::Uuid::new_v4().to_string();

        let message = match &self {
            Self::Billing(BillingError::Card { message, .. }) => Some(message.clone()),
            _ => None,
        };

        if status.is_server_error() {
            tracing::error!(
                target: "billsync::http",
                status = status.as_u16(),
                error_id = %error_id,
                error = %self,
                "Request failed"
            );
        } else {
            tracing::debug!(
                target: "billsync::http",
                status = status.as_u16(),
                error_id = %error_id,
                error = %self,
                "Request rejected"
            );
        }

        let body = ErrorResponse {
            error: self.safe_message(),
            code: self.code(),
            message,
            error_id,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BillsyncError>;

impl From<serde_json::Error> for BillsyncError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            BillsyncError::BadRequest(format!("JSON error: {}", err))
        } else {
            BillsyncError::Internal(format!("JSON serialization error: {}", err))
        }
    }
}

impl From<std::io::Error> for BillsyncError {
    fn from(err: std::io::Error) -> Self {
        BillsyncError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_error() {
        let err = BillsyncError::not_found("account");
        assert_eq!(err.to_string(), "Not found: account");
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_forbidden_error() {
        let err = BillsyncError::forbidden("plan_required");
        assert_eq!(err.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(err.safe_message(), "Forbidden: plan_required");
    }

    #[test]
    fn test_internal_error_is_masked() {
        let err = BillsyncError::internal("connection string leaked");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.safe_message(), "Internal server error");
    }

    #[test]
    fn test_storage_error_is_masked() {
        let err = BillsyncError::from(std::io::Error::other("disk full"));
        assert!(matches!(err, BillsyncError::Storage(_)));
        assert_eq!(err.safe_message(), "Storage error");
    }

    #[test]
    fn test_card_error_maps_to_payment_required() {
        let err: BillsyncError = BillingError::Card {
            code: "card_declined".to_string(),
            message: "Your card was declined.".to_string(),
        }
        .into();

        assert!(err.is_card_error());
        assert!(!err.is_transient());
        assert_eq!(err.status_code(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(err.code().as_deref(), Some("card_declined"));
    }

    #[test]
    fn test_provider_error_is_masked() {
        let err: BillsyncError = BillingError::Provider {
            operation: "get_customer".to_string(),
            message: "upstream said something internal".to_string(),
            code: None,
            http_status: Some(500),
        }
        .into();

        assert!(err.is_transient());
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(err.safe_message(), "Payment provider error");
    }

    #[test]
    fn test_json_syntax_error_is_bad_request() {
        let parse: std::result::Result<serde_json::Value, _> = serde_json::from_str("{oops");
        let err: BillsyncError = parse.unwrap_err().into();
        assert!(matches!(err, BillsyncError::BadRequest(_)));
    }

    #[tokio::test]
    async fn test_card_error_response_body() {
        let err: BillsyncError = BillingError::Card {
            code: "expired_card".to_string(),
            message: "Your card has expired.".to_string(),
        }
        .into();

        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], "expired_card");
        assert_eq!(body["message"], "Your card has expired.");
        assert!(body["error_id"].is_string());
    }
}
