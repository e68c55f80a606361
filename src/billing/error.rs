//! Billing-specific error types.
//!
//! The split that matters most to callers is between card errors, which the
//! user can fix by changing their payment method, and every other provider
//! failure, which they cannot.

use axum::http::StatusCode;
use std::fmt;

/// Billing-specific errors.
///
/// These errors travel inside [`crate::BillsyncError::Billing`] so the HTTP
/// layer can map them to a precise status code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingError {
    // Payment method errors
    /// The provider rejected the payment method (declined, expired, ...).
    Card { code: String, message: String },

    // Provider errors
    /// Any other provider failure: network, auth, validation, throttling.
    Provider {
        operation: String,
        message: String,
        code: Option<String>,
        http_status: Option<u16>,
    },

    // State errors
    /// There is no subscription to act on.
    NoSubscription { email: String },
    /// The customer has no card or other payment source on file.
    NoPaymentSource { email: String },
    /// The account has no provider customer yet.
    NoCustomer { email: String },
    /// The plan is not in the catalogue.
    PlanNotFound { plan_id: String },
    /// The account's status does not grant access.
    PlanRequired { status: String },

    // Input errors
    /// A required field was not supplied.
    MissingField { field: String },

    // Webhook errors
    /// Webhook signature is invalid.
    InvalidWebhookSignature,
    /// Webhook timestamp is outside the tolerance window.
    WebhookTimestampExpired { age_seconds: i64 },
    /// Webhook event data is malformed.
    InvalidWebhookPayload { message: String },

    // Bulk errors
    /// A bulk pass kept failing and gave up.
    RetryLimitExceeded {
        operation: String,
        attempts: u32,
        processed: u64,
        updated: u64,
        deleted: u64,
    },

    /// An unexpected internal error occurred.
    Internal { message: String },
}

impl fmt::Display for BillingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Card { code, message } => {
                write!(f, "Card error ({}): {}", code, message)
            }
            Self::Provider {
                operation,
                message,
                code,
                http_status,
            } => {
                write!(f, "Provider error during '{}': {}", operation, message)?;
                if let Some(code) = code {
                    write!(f, " (code: {})", code)?;
                }
                if let Some(status) = http_status {
                    write!(f, " [HTTP {}]", status)?;
                }
                Ok(())
            }
            Self::NoSubscription { email } => {
                write!(f, "No subscription found for '{}'", email)
            }
            Self::NoPaymentSource { email } => {
                write!(f, "No payment source on file for '{}'", email)
            }
            Self::NoCustomer { email } => {
                write!(f, "No provider customer for '{}'", email)
            }
            Self::PlanNotFound { plan_id } => {
                write!(f, "Plan not found: {}", plan_id)
            }
            Self::PlanRequired { status } => {
                write!(f, "A paid plan is required (status: {})", status)
            }
            Self::MissingField { field } => {
                write!(f, "Missing required field: {}", field)
            }
            Self::InvalidWebhookSignature => {
                write!(f, "Invalid webhook signature")
            }
            Self::WebhookTimestampExpired { age_seconds } => {
                write!(f, "Webhook timestamp expired ({} seconds old)", age_seconds)
            }
            Self::InvalidWebhookPayload { message } => {
                write!(f, "Invalid webhook payload: {}", message)
            }
            Self::RetryLimitExceeded {
                operation,
                attempts,
                processed,
                updated,
                deleted,
            } => {
                write!(
                    f,
                    "Operation '{}' gave up after {} attempts (processed: {}, updated: {}, deleted: {})",
                    operation, attempts, processed, updated, deleted
                )
            }
            Self::Internal { message } => {
                write!(f, "Internal billing error: {}", message)
            }
        }
    }
}

impl std::error::Error for BillingError {}

impl BillingError {
    /// Build a provider error for `operation`.
    pub fn provider(operation: &str, message: impl Into<String>) -> Self {
        Self::Provider {
            operation: operation.to_string(),
            message: message.into(),
            code: None,
            http_status: None,
        }
    }

    /// Check if this is a payment-method failure.
    #[must_use]
    pub fn is_card_error(&self) -> bool {
        matches!(self, Self::Card { .. })
    }

    /// Check if retrying later might succeed.
    ///
    /// Missing status means the request never got an answer.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Provider { http_status, .. } => {
                matches!(http_status, None | Some(408) | Some(429) | Some(500..=599))
            }
            Self::RetryLimitExceeded { .. } => true,
            _ => false,
        }
    }

    /// Check if this is a client error (4xx).
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// Check if this is a server error (5xx).
    #[must_use]
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Card { .. } => StatusCode::PAYMENT_REQUIRED,
            Self::Provider { http_status, .. } => match http_status {
                Some(404) => StatusCode::NOT_FOUND,
                _ => StatusCode::BAD_GATEWAY,
            },
            Self::NoSubscription { .. } | Self::NoCustomer { .. } | Self::PlanNotFound { .. } => {
                StatusCode::NOT_FOUND
            }
            Self::NoPaymentSource { .. }
            | Self::MissingField { .. }
            | Self::InvalidWebhookSignature
            | Self::WebhookTimestampExpired { .. }
            | Self::InvalidWebhookPayload { .. } => StatusCode::BAD_REQUEST,
            Self::PlanRequired { .. } => StatusCode::FORBIDDEN,
            Self::RetryLimitExceeded { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Machine-readable error code.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        let code = match self {
            Self::Card { code, .. } => code.as_str(),
            Self::Provider { .. } => "provider_error",
            Self::NoSubscription { .. } => "no_subscription",
            Self::NoPaymentSource { .. } => "no_payment_source",
            Self::NoCustomer { .. } => "no_customer",
            Self::PlanNotFound { .. } => "plan_not_found",
            Self::PlanRequired { .. } => "plan_required",
            Self::MissingField { .. } => "missing_field",
            Self::InvalidWebhookSignature => "invalid_webhook_signature",
            Self::WebhookTimestampExpired { .. } => "webhook_timestamp_expired",
            Self::InvalidWebhookPayload { .. } => "invalid_webhook_payload",
            Self::RetryLimitExceeded { .. } => "retry_limit_exceeded",
            Self::Internal { .. } => return None,
        };
        Some(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = BillingError::PlanNotFound {
            plan_id: "plan_yearly".to_string(),
        };
        assert_eq!(err.to_string(), "Plan not found: plan_yearly");

        let err = BillingError::Provider {
            operation: "list_customers".to_string(),
            message: "Request timed out".to_string(),
            code: None,
            http_status: Some(408),
        };
        assert_eq!(
            err.to_string(),
            "Provider error during 'list_customers': Request timed out [HTTP 408]"
        );
    }

    #[test]
    fn test_error_classification() {
        let err = BillingError::Card {
            code: "card_declined".to_string(),
            message: "Your card was declined.".to_string(),
        };
        assert!(err.is_card_error());
        assert!(err.is_client_error());
        assert!(!err.is_transient());

        let err = BillingError::provider("get_customer", "connection reset");
        assert!(!err.is_card_error());
        assert!(err.is_server_error());
        assert!(err.is_transient());

        let err = BillingError::Provider {
            operation: "update_customer".to_string(),
            message: "Invalid API key".to_string(),
            code: None,
            http_status: Some(401),
        };
        assert!(!err.is_transient());
        assert_eq!(err.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_timeout_is_transient_not_missing() {
        let err = BillingError::Provider {
            operation: "get_customer".to_string(),
            message: "Request timed out after 30 seconds".to_string(),
            code: None,
            http_status: Some(408),
        };
        assert!(err.is_transient());
        assert_ne!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_codes() {
        let err = BillingError::NoSubscription {
            email: "a@x".to_string(),
        };
        assert_eq!(err.code(), Some("no_subscription"));
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);

        let err = BillingError::Internal {
            message: "oops".to_string(),
        };
        assert_eq!(err.code(), None);
    }
}
