//! Alba-style HTTP testing for the billing routes
//!
//! Requests go straight through the router with `tower::ServiceExt::oneshot`,
//! no server needed.
//!
//! # Example
//!
//! ```rust,ignore
//! use billsync::testing;
//!
//! #[tokio::test]
//! async fn test_account() {
//!     let harness = testing::BillingHarness::new();
//!
//!     testing::get(harness.app(), "/account")
//!         .authenticated("a@example.com")
//!         .execute()
//!         .await
//!         .assert_ok()
//!         .assert_header("x-subscription-status", "inactive");
//! }
//! ```

use axum::{
    Router,
    body::Body,
    http::{HeaderName, Method, Request, StatusCode, header},
};
use serde::{Deserialize, Serialize};
use tower::ServiceExt;

use crate::http::AuthenticatedEmail;

/// Test scenario builder
pub struct Scenario {
    app: Router,
    request: Request<Body>,
}

impl Scenario {
    pub fn new(app: Router) -> Self {
        Self {
            app,
            request: Request::builder()
                .method(Method::GET)
                .uri("/")
                .body(Body::empty())
                .unwrap(),
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        *self.request.method_mut() = method;
        self
    }

    pub fn uri(mut self, uri: &str) -> Self {
        *self.request.uri_mut() = uri.parse().unwrap();
        self
    }

    pub fn header(mut self, key: &str, value: &str) -> Self {
        self.request.headers_mut().insert(
            HeaderName::from_bytes(key.as_bytes()).unwrap(),
            value.parse().unwrap(),
        );
        self
    }

    /// Act as the signed-in user `email`, the way the host auth layer would.
    pub fn authenticated(mut self, email: &str) -> Self {
        self.request
            .extensions_mut()
            .insert(AuthenticatedEmail(email.to_string()));
        self
    }

    /// Add query parameters to the request URI
    pub fn with_query(mut self, params: &[(&str, &str)]) -> Self {
        let uri = self.request.uri().clone();
        let mut query_parts = vec![];

        if let Some(query) = uri.query() {
            query_parts.push(query.to_string());
        }
        for (key, value) in params {
            query_parts.push(format!("{}={}", urlencoding::encode(key), urlencoding::encode(value)));
        }

        let new_uri = if query_parts.is_empty() {
            uri.path().to_string()
        } else {
            format!("{}?{}", uri.path(), query_parts.join("&"))
        };
        *self.request.uri_mut() = new_uri.parse().unwrap();
        self
    }

    pub fn json_body<T: Serialize>(mut self, body: &T) -> Self {
        let json = serde_json::to_string(body).unwrap();
        *self.request.body_mut() = Body::from(json);
        self.request
            .headers_mut()
            .insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        self
    }

    /// URL-encoded form body
    pub fn form_body(mut self, fields: &[(&str, &str)]) -> Self {
        let encoded = fields
            .iter()
            .map(|(k, v)| format!("{}={}", urlencoding::encode(k), urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        *self.request.body_mut() = Body::from(encoded);
        self.request.headers_mut().insert(
            header::CONTENT_TYPE,
            "application/x-www-form-urlencoded".parse().unwrap(),
        );
        self
    }

    /// Raw body, sent as is
    pub fn raw_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        *self.request.body_mut() = Body::from(body.into());
        self
    }

    pub async fn execute(self) -> ScenarioAssert {
        let response = self.app.oneshot(self.request).await.unwrap();
        ScenarioAssert { response }
    }
}

/// Assertion builder for test responses
pub struct ScenarioAssert {
    response: axum::response::Response,
}

impl ScenarioAssert {
    pub fn status(&self) -> StatusCode {
        self.response.status()
    }

    pub fn assert_status(self, expected: StatusCode) -> Self {
        assert_eq!(
            self.response.status(),
            expected,
            "Expected status {}, got {}",
            expected,
            self.response.status()
        );
        self
    }

    pub fn assert_ok(self) -> Self {
        self.assert_status(StatusCode::OK)
    }

    pub fn assert_bad_request(self) -> Self {
        self.assert_status(StatusCode::BAD_REQUEST)
    }

    pub fn assert_unauthorized(self) -> Self {
        self.assert_status(StatusCode::UNAUTHORIZED)
    }

    pub fn assert_payment_required(self) -> Self {
        self.assert_status(StatusCode::PAYMENT_REQUIRED)
    }

    pub fn assert_forbidden(self) -> Self {
        self.assert_status(StatusCode::FORBIDDEN)
    }

    pub fn assert_not_found(self) -> Self {
        self.assert_status(StatusCode::NOT_FOUND)
    }

    /// Assert a header exists with the given value
    pub fn assert_header(self, key: &str, expected: &str) -> Self {
        let value = self
            .response
            .headers()
            .get(key)
            .unwrap_or_else(|| panic!("Header '{}' not found", key))
            .to_str()
            .unwrap();
        assert_eq!(value, expected, "Header '{}' value mismatch", key);
        self
    }

    pub fn assert_json(self) -> Self {
        let content_type = self
            .response
            .headers()
            .get(header::CONTENT_TYPE)
            .expect("Content-Type header not found")
            .to_str()
            .unwrap();
        assert!(
            content_type.contains("application/json"),
            "Expected JSON content type, got: {}",
            content_type
        );
        self
    }

    pub async fn body_bytes(self) -> Vec<u8> {
        axum::body::to_bytes(self.response.into_body(), usize::MAX)
            .await
            .unwrap()
            .to_vec()
    }

    pub async fn body_string(self) -> String {
        String::from_utf8(self.body_bytes().await).unwrap()
    }

    pub async fn json<T: for<'de> Deserialize<'de>>(self) -> T {
        let bytes = self.body_bytes().await;
        serde_json::from_slice(&bytes).expect("Failed to parse JSON response")
    }

    /// Assert a JSON value by dotted path, e.g. `"plan.id"` or `"invoices.0.id"`
    pub async fn assert_json_path(self, path: &str, expected: serde_json::Value) -> Self {
        let (parts, body) = self.response.into_parts();
        let bytes = axum::body::to_bytes(body, usize::MAX).await.unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        let actual =
            json_path_get(&json, path).unwrap_or_else(|| panic!("Path '{}' not found in JSON", path));
        assert_eq!(actual, &expected, "JSON path '{}' value mismatch", path);

        Self {
            response: axum::response::Response::from_parts(parts, Body::from(bytes)),
        }
    }

    pub fn response(self) -> axum::response::Response {
        self.response
    }
}

fn json_path_get<'a>(json: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let mut current = json;
    for part in path.split('.') {
        current = match part.parse::<usize>() {
            Ok(index) => current.get(index)?,
            Err(_) => current.get(part)?,
        };
    }
    Some(current)
}

pub fn get(app: Router, uri: &str) -> Scenario {
    Scenario::new(app).method(Method::GET).uri(uri)
}

pub fn post(app: Router, uri: &str) -> Scenario {
    Scenario::new(app).method(Method::POST).uri(uri)
}

pub fn put(app: Router, uri: &str) -> Scenario {
    Scenario::new(app).method(Method::PUT).uri(uri)
}

pub fn delete(app: Router, uri: &str) -> Scenario {
    Scenario::new(app).method(Method::DELETE).uri(uri)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Form, Json, routing};
    use serde_json::json;
    use std::collections::HashMap;

    async fn whoami(email: AuthenticatedEmail) -> Json<serde_json::Value> {
        Json(json!({"email": email.0}))
    }

    async fn echo_form(Form(fields): Form<HashMap<String, String>>) -> Json<HashMap<String, String>> {
        Json(fields)
    }

    #[tokio::test]
    async fn test_authenticated_inserts_email() {
        let app = Router::new().route("/me", routing::get(whoami));

        get(app, "/me")
            .authenticated("a@example.com")
            .execute()
            .await
            .assert_ok()
            .assert_json()
            .assert_json_path("email", json!("a@example.com"))
            .await;
    }

    #[tokio::test]
    async fn test_missing_email_is_unauthorized() {
        let app = Router::new().route("/me", routing::get(whoami));
        get(app, "/me").execute().await.assert_unauthorized();
    }

    #[tokio::test]
    async fn test_form_body_is_encoded() {
        let app = Router::new().route("/echo", routing::post(echo_form));

        let body: HashMap<String, String> = post(app, "/echo")
            .form_body(&[("plan", "plan_yearly"), ("token", "tok visa&co")])
            .execute()
            .await
            .assert_ok()
            .json()
            .await;
        assert_eq!(body["token"], "tok visa&co");
    }

    #[test]
    fn test_json_path_get() {
        let value = json!({"invoices": [{"id": "in_1"}]});
        assert_eq!(json_path_get(&value, "invoices.0.id"), Some(&json!("in_1")));
        assert_eq!(json_path_get(&value, "invoices.1.id"), None);
    }
}
