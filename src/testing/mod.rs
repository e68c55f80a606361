//! Testing utilities for billsync
//!
//! - Alba-style HTTP endpoint testing without running a server
//! - Fixtures and a harness around the mock billing provider (with the
//!   `test-billing` feature)
//!
//! # Example
//!
//! ```rust,ignore
//! use billsync::testing::{self, BillingHarness};
//!
//! #[tokio::test]
//! async fn test_unsubscribed_account_is_gated() {
//!     let harness = BillingHarness::new();
//!
//!     testing::get(harness.app(), "/subscription/check")
//!         .authenticated("a@example.com")
//!         .execute()
//!         .await
//!         .assert_forbidden();
//! }
//! ```

#[cfg(any(test, feature = "test-billing"))]
mod fixtures;
mod scenario;

#[cfg(any(test, feature = "test-billing"))]
pub use fixtures::{BillingHarness, CustomerFixture, fake};
pub use scenario::{Scenario, ScenarioAssert, delete, get, post, put};
