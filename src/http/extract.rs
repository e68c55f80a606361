use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderName, request::Parts},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::future::Future;

use crate::billing::{BillingError, StatusHeaders};
use crate::error::BillsyncError;

use super::routes::AppState;

/// Email of the signed-in user, set by the host server's auth layer.
///
/// # Example
///
/// ```rust,ignore
/// async fn handler(AuthenticatedEmail(email): AuthenticatedEmail) -> String {
///     email
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedEmail(pub String);

impl AuthenticatedEmail {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<S> FromRequestParts<S> for AuthenticatedEmail
where
    S: Send + Sync,
{
    type Rejection = BillsyncError;

    fn from_request_parts(
        parts: &mut Parts,
        _state: &S,
    ) -> impl Future<Output = Result<Self, Self::Rejection>> + Send {
        Box::pin(async move {
            parts
                .extensions
                .get::<AuthenticatedEmail>()
                .filter(|email| !email.0.is_empty())
                .cloned()
                .ok_or_else(|| BillsyncError::unauthorized("authentication required"))
        })
    }
}

/// Middleware that lets a request through only when the account's status
/// grants access (active or trialing).
///
/// Status headers are attached to the response either way, so a gateway
/// can read them without deriving the status itself.
///
/// ```rust,ignore
/// let premium = Router::new()
///     .route("/reports", get(reports))
///     .layer(axum::middleware::from_fn_with_state(state.clone(), require_subscription));
/// ```
pub async fn require_subscription(
    State(state): State<AppState>,
    email: AuthenticatedEmail,
    request: Request,
    next: Next,
) -> Result<Response, BillsyncError> {
    let info = state.manager.status(email.as_str()).await?;
    let headers = StatusHeaders::from(info);

    if !info.has_access() {
        tracing::debug!(
            target: "billsync::http",
            email = %email.as_str(),
            status = %info.status,
            "Subscription required"
        );
        let err = BillsyncError::from(BillingError::PlanRequired {
            status: info.status.as_str().to_string(),
        });
        return Ok((headers, err).into_response());
    }

    let response = next.run(request).await;
    Ok((headers, response).into_response())
}

/// Middleware that trusts an upstream proxy's header for the signed-in
/// email and installs it as an [`AuthenticatedEmail`].
///
/// Only for deployments where the header cannot reach the server without
/// passing the proxy. A missing or blank header leaves the request
/// unauthenticated.
pub async fn email_from_header(
    State(header): State<HeaderName>,
    mut request: Request,
    next: Next,
) -> Response {
    let email = request
        .headers()
        .get(&header)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());

    if let Some(email) = email {
        request.extensions_mut().insert(AuthenticatedEmail(email));
    }

    next.run(request).await
}
